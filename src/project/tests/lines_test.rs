//! Tests of line counting, rendering, and address/line round trips.

use super::*;
use super::super::blocks::DataType;
use super::super::lines::Column;

#[test]
fn single_final_instruction_with_headers() {
    // JMP (xxx).L back to itself fills the whole segment
    let mut p = project_with(vec![segment(0,0x1000,"4EF900001000",0)],true,false,0);
    assert_partition(&p);
    assert_eq!(p.file_line_count(),5);
    // section header splits into directive and remainder
    assert_eq!(p.file_line(0,Column::Instruction),"SECTION");
    assert_eq!(p.file_line(0,Column::Operands),"seg001000, CODE");
    assert_eq!(p.file_line(0,Column::Offset),"");
    assert_eq!(p.file_line(1,Column::Instruction),"");
    // the instruction line
    assert_eq!(p.file_line(2,Column::Offset),"00001000");
    assert_eq!(p.file_line(2,Column::Bytes),"4EF900001000");
    assert_eq!(p.file_line(2,Column::Label),"lbC001000");
    assert_eq!(p.file_line(2,Column::Instruction),"JMP");
    assert_eq!(p.file_line(2,Column::Operands),"lbC001000");
    // the footer
    assert_eq!(p.file_line(3,Column::Instruction),"");
    assert_eq!(p.file_line(4,Column::Instruction),"END");
    // round trips, including mid-instruction addresses
    assert_eq!(p.line_for_address(0x1000),Some(2));
    assert_eq!(p.line_for_address(0x1002),Some(2));
    assert_eq!(p.address_for_line(2),Some(0x1000));
    assert_eq!(p.referenced_symbol_addresses_for_line(2),vec![0x1000]);
    assert_line_counts(&mut p);
}

#[test]
fn mid_instruction_symbol_renders_an_equate() {
    let mut seg = segment(0,0x1000,"6000FFFE",0);
    seg.symbols.push((2,"foo".to_string()));
    let mut p = project(vec![seg],0);
    assert_eq!(p.file_line_count(),4);
    assert_eq!(p.file_line(0,Column::Instruction),"BRA.W");
    assert_eq!(p.file_line(0,Column::Operands),"lbC001000");
    // the symbol inside the branch gets its own location-relative line
    assert_eq!(p.file_line(1,Column::Offset),"00001002");
    assert_eq!(p.file_line(1,Column::Bytes),"");
    assert_eq!(p.file_line(1,Column::Label),"foo");
    assert_eq!(p.file_line(1,Column::Instruction),"EQU");
    assert_eq!(p.file_line(1,Column::Operands),"*-2");
    assert_eq!(p.line_for_address(0x1002),Some(1));
    assert_eq!(p.address_for_line(1),Some(0x1002));
    // an unlabeled mid-instruction address resolves to the instruction line
    assert_eq!(p.line_for_address(0x1003),Some(0));
    assert_line_counts(&mut p);
}

#[test]
fn numeric_widths_decompose_greedily() {
    // RTS followed by seven data bytes renders L, W, B lines
    let mut p = project(vec![segment(0,0x1000,"4E75AABBCCDDEEFF11",0)],0);
    assert_eq!(p.store.len(),2);
    assert_eq!(p.cached_line_count(1),3);
    assert_eq!(p.file_line_count(),7);
    assert_eq!(p.file_line(0,Column::Instruction),"RTS");
    // blank line after the final instruction
    assert_eq!(p.file_line(1,Column::Instruction),"");
    assert_eq!(p.file_line(2,Column::Instruction),"DC.L");
    assert_eq!(p.file_line(2,Column::Operands),"$AABBCCDD");
    assert_eq!(p.file_line(2,Column::Bytes),"AABBCCDD");
    assert_eq!(p.file_line(3,Column::Instruction),"DC.W");
    assert_eq!(p.file_line(3,Column::Operands),"$EEFF");
    assert_eq!(p.file_line(3,Column::Offset),"00001006");
    assert_eq!(p.file_line(4,Column::Instruction),"DC.B");
    assert_eq!(p.file_line(4,Column::Operands),"$11");
    assert_eq!(p.file_line(6,Column::Instruction),"END");
    assert_eq!(p.line_for_address(0x1006),Some(3));
    assert_eq!(p.line_for_address(0x1007),Some(3));
    assert_eq!(p.address_for_line(4),Some(0x1008));
    assert_line_counts(&mut p);
}

#[test]
fn trap_takes_a_trailing_blank() {
    let mut p = project(vec![segment(0,0x1000,"4E414E75",0)],0);
    assert_eq!(p.file_line_count(),5);
    assert_eq!(p.file_line(0,Column::Instruction),"TRAP");
    assert_eq!(p.file_line(0,Column::Operands),"#1");
    assert_eq!(p.file_line(1,Column::Instruction),"");
    assert_eq!(p.file_line(2,Column::Instruction),"RTS");
    // the blank after TRAP belongs to it, so the RTS address skips a line
    assert_eq!(p.line_for_address(0x1002),Some(2));
    assert_eq!(p.address_for_line(2),Some(0x1002));
    assert_line_counts(&mut p);
}

#[test]
fn conditional_branch_takes_a_trailing_blank() {
    let mut p = project(vec![segment(0,0x1000,"66024E714E75",0)],0);
    // the branch target splits the block
    assert_eq!(p.store.len(),2);
    assert_eq!(p.file_line_count(),6);
    assert_eq!(p.file_line(0,Column::Instruction),"BNE.S");
    assert_eq!(p.file_line(0,Column::Operands),"lbC001004");
    assert_eq!(p.file_line(1,Column::Instruction),"");
    assert_eq!(p.file_line(2,Column::Instruction),"NOP");
    assert_eq!(p.file_line(3,Column::Instruction),"RTS");
    assert_eq!(p.file_line(3,Column::Label),"lbC001004");
    assert_eq!(p.line_for_address(0x1004),Some(3));
    assert_line_counts(&mut p);
}

#[test]
fn navigation_to_neighboring_data() {
    let mut p = project(vec![segment(0,0x1000,"4E75AABBCCDD",0)],0);
    // block 0 is code, block 1 is data
    assert_eq!(p.next_data_line(0,true),Some(2));
    assert_eq!(p.next_data_line(2,false),None);
    assert_eq!(p.data_type_at_address(0x1000),DataType::Code);
    assert_eq!(p.data_type_at_address(0x1002),DataType::Longword);
}

#[test]
fn out_of_range_queries_are_harmless() {
    let mut p = project(vec![segment(0,0x1000,"4E75",0)],0);
    assert_eq!(p.line_for_address(0x0FFF),None);
    assert_eq!(p.line_for_address(0x2000),None);
    let total = p.file_line_count();
    assert_eq!(p.file_line(total + 5,Column::Instruction),"");
    assert_eq!(p.address_for_line(total + 5),None);
}
