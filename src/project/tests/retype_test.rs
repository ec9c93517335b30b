//! Tests of interactive retyping: character shaping, width changes, code
//! re-discovery, event delivery, and the guard rails.

use super::*;
use super::super::Project;
use super::super::blocks::DataType;
use super::super::lines::Column;

fn hello_world_project() -> Project {
    // RTS, then two NUL-terminated strings
    project(vec![segment(0,0x1000,"4E7548656C6C6F00576F726C6400",0)],0)
}

#[test]
fn retype_to_ascii_shapes_strings() {
    let mut p = hello_world_project();
    p.set_data_type_at_address(0x1002,DataType::Ascii,None).expect("retype failed");
    assert_partition(&p);
    let idx = p.store.find_by_address(0x1002);
    assert_eq!(p.store.get(idx).data_type,DataType::Ascii);
    assert_eq!(p.store.get(idx).ascii_ranges().to_vec(),vec![(0,6),(6,6)]);
    // code block renders two lines, then the strings
    assert_eq!(p.file_line(2,Column::Instruction),"DC.B");
    assert_eq!(p.file_line(2,Column::Operands),"'Hello',0");
    assert_eq!(p.file_line(2,Column::Bytes),"48656C6C6F00");
    assert_eq!(p.file_line(3,Column::Operands),"'World',0");
    assert_eq!(p.line_for_address(0x1008),Some(3));
    assert_eq!(p.address_for_line(3),Some(0x1008));
    assert_line_counts(&mut p);
}

#[test]
fn retype_fires_one_event_pair() {
    let mut p = hello_world_project();
    let (log,observer) = recorder();
    p.set_observer(observer);
    p.set_data_type_at_address(0x1002,DataType::Ascii,None).expect("retype failed");
    // three longword lines became two string lines
    assert_eq!(log.borrow().pre,vec![(4,-1)]);
    assert_eq!(log.borrow().post,vec![(None,-1)]);
    let uncertain = log.borrow().uncertain.clone();
    assert_eq!(uncertain,vec![(DataType::Longword,DataType::Ascii,0x1002,12)]);
}

#[test]
fn retype_is_idempotent() {
    let mut p = hello_world_project();
    p.set_data_type_at_address(0x1002,DataType::Ascii,None).expect("retype failed");
    let before = p.file_line_count();
    let (log,observer) = recorder();
    p.set_observer(observer);
    p.set_data_type_at_address(0x1002,DataType::Ascii,None).expect("retype failed");
    assert_eq!(p.file_line_count(),before);
    assert_eq!(log.borrow().pre.len(),0);
    assert_eq!(log.borrow().post.len(),0);
}

#[test]
fn retype_through_the_widths() {
    let mut p = hello_world_project();
    p.set_data_type_at_address(0x1002,DataType::Word,None).expect("retype failed");
    let idx = p.store.find_by_address(0x1002);
    assert_eq!(p.cached_line_count(idx),6);
    assert_eq!(p.file_line(2,Column::Instruction),"DC.W");
    p.set_data_type_at_address(0x1002,DataType::Byte,None).expect("retype failed");
    assert_eq!(p.cached_line_count(idx),12);
    assert_eq!(p.file_line(2,Column::Instruction),"DC.B");
    assert_eq!(p.file_line(2,Column::Operands),"$48");
    assert_line_counts(&mut p);
}

#[test]
fn retype_to_code_runs_discovery() {
    // RTS, then code that was not reached from the entry
    let mut p = project(vec![segment(0,0x1000,"4E754E714E75",0)],0);
    assert_eq!(p.store.get(1).data_type,DataType::Longword);
    p.set_data_type_at_address(0x1002,DataType::Code,None).expect("retype failed");
    assert_partition(&p);
    let idx = p.store.find_by_address(0x1002);
    assert_eq!(p.store.get(idx).data_type,DataType::Code);
    assert!(p.store.get(idx).processed);
    assert_eq!(p.file_line(2,Column::Instruction),"NOP");
    assert_eq!(p.file_line(3,Column::Instruction),"RTS");
    assert_line_counts(&mut p);
}

#[test]
fn retype_from_the_middle_of_a_block() {
    let mut p = hello_world_project();
    // only the bytes from the split onward change type
    p.set_data_type_at_address(0x1008,DataType::Byte,None).expect("retype failed");
    assert_partition(&p);
    assert_eq!(p.data_type_at_address(0x1002),DataType::Longword);
    assert_eq!(p.data_type_at_address(0x1008),DataType::Byte);
    assert_line_counts(&mut p);
}

#[test]
fn allocated_blocks_refuse_code_and_ascii() {
    let mut p = project(vec![segment(0,0x1000,"4E75",4)],0);
    let tail = p.store.len() - 1;
    assert!(p.store.get(tail).alloc);
    assert!(p.set_data_type_at_address(0x1002,DataType::Ascii,None).is_err());
    assert!(p.set_data_type_at_address(0x1002,DataType::Code,None).is_err());
    assert_eq!(p.data_type_at_address(0x1002),DataType::Longword);
    // width changes are fine
    p.set_data_type_at_address(0x1002,DataType::Byte,None).expect("retype failed");
    assert_eq!(p.data_type_at_address(0x1002),DataType::Byte);
}

#[test]
fn retype_mid_instruction_is_surfaced() {
    let mut p = project(vec![segment(0,0x1000,"4E714E714E75",0)],0);
    assert!(p.set_data_type_at_address(0x1003,DataType::Longword,None).is_err());
    assert_eq!(p.store.len(),1);
    assert_eq!(p.data_type_at_address(0x1000),DataType::Code);
}

#[test]
fn symbols_are_gated_and_observed() {
    let mut p = hello_world_project();
    let (log,observer) = recorder();
    p.set_observer(observer);
    assert!(p.set_symbol(0x5000,"nowhere").is_err());
    p.set_symbol(0x1002,"greeting").expect("set_symbol failed");
    assert_eq!(log.borrow().symbols,vec![(0x1002,"greeting".to_string())]);
    assert_eq!(p.file_line(2,Column::Label),"greeting");
    assert_eq!(p.address_for_symbol("GREETING"),Some(0x1002));
    assert_eq!(p.address_for_symbol("nobody"),None);
}
