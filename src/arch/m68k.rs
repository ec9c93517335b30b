//! Decoder for a 68000 subset.
//!
//! Covers the control transfers, TRAP, LEA/PEA, and the long-sized MOVE and
//! MOVEA forms that carry absolute or immediate addresses.  This is the part
//! of the instruction set the analysis engine needs to see through; anything
//! else fails to match and is stepped over as data one word at a time.
//! All reads are big-endian and opcodes are word-aligned.

use std::collections::HashMap;
use super::{Architecture,Instruction,Operand,SymbolLookup,match_flags};

#[derive(Clone,Copy,PartialEq)]
enum Shape {
    /// no operands
    Inherent,
    /// trap vector in the low nibble
    Vector,
    /// (xxx).L
    AbsLong,
    /// (xxx).L,An with the register in bits 9-11
    AbsLongToAddr,
    /// (xxx).L,Dn with the register in bits 9-11
    AbsLongToData,
    /// #imm,Dn
    ImmLongToData,
    /// #imm,An
    ImmLongToAddr,
    /// d16(PC),An
    PcDispToAddr,
    /// Bcc with embedded byte or trailing word displacement
    Branch,
    /// DBcc Dn,d16
    BranchDecrement
}

struct OperationSpec {
    key: &'static str,
    mnemonic: &'static str,
    base: u16,
    mask: u16,
    shape: Shape,
    ends_flow: bool
}

const SPECS: [OperationSpec;15] = [
    OperationSpec { key: "NOP", mnemonic: "NOP", base: 0x4E71, mask: 0xFFFF, shape: Shape::Inherent, ends_flow: false },
    OperationSpec { key: "RTS", mnemonic: "RTS", base: 0x4E75, mask: 0xFFFF, shape: Shape::Inherent, ends_flow: true },
    OperationSpec { key: "RTE", mnemonic: "RTE", base: 0x4E73, mask: 0xFFFF, shape: Shape::Inherent, ends_flow: true },
    OperationSpec { key: "TRAP", mnemonic: "TRAP", base: 0x4E40, mask: 0xFFF0, shape: Shape::Vector, ends_flow: false },
    OperationSpec { key: "JSR", mnemonic: "JSR", base: 0x4EB9, mask: 0xFFFF, shape: Shape::AbsLong, ends_flow: false },
    OperationSpec { key: "JMP", mnemonic: "JMP", base: 0x4EF9, mask: 0xFFFF, shape: Shape::AbsLong, ends_flow: true },
    OperationSpec { key: "PEA", mnemonic: "PEA", base: 0x4879, mask: 0xFFFF, shape: Shape::AbsLong, ends_flow: false },
    OperationSpec { key: "LEA", mnemonic: "LEA", base: 0x41F9, mask: 0xF1FF, shape: Shape::AbsLongToAddr, ends_flow: false },
    OperationSpec { key: "LEA", mnemonic: "LEA", base: 0x41FA, mask: 0xF1FF, shape: Shape::PcDispToAddr, ends_flow: false },
    OperationSpec { key: "MOVE", mnemonic: "MOVE.L", base: 0x2039, mask: 0xF1FF, shape: Shape::AbsLongToData, ends_flow: false },
    OperationSpec { key: "MOVE", mnemonic: "MOVE.L", base: 0x203C, mask: 0xF1FF, shape: Shape::ImmLongToData, ends_flow: false },
    OperationSpec { key: "MOVEA", mnemonic: "MOVEA.L", base: 0x2079, mask: 0xF1FF, shape: Shape::AbsLongToAddr, ends_flow: false },
    OperationSpec { key: "MOVEA", mnemonic: "MOVEA.L", base: 0x207C, mask: 0xF1FF, shape: Shape::ImmLongToAddr, ends_flow: false },
    OperationSpec { key: "Bcc", mnemonic: "", base: 0x6000, mask: 0xF000, shape: Shape::Branch, ends_flow: false },
    OperationSpec { key: "DBcc", mnemonic: "", base: 0x50C8, mask: 0xF0F8, shape: Shape::BranchDecrement, ends_flow: false }
];

/// branch condition names indexed by the condition nibble
const BCC_NAMES: [&str;16] = ["RA","SR","HI","LS","CC","CS","NE","EQ","VC","VS","PL","MI","GE","LT","GT","LE"];
const DBCC_NAMES: [&str;16] = ["T","F","HI","LS","CC","CS","NE","EQ","VC","VS","PL","MI","GE","LT","GT","LE"];

fn word(data: &[u8],offset: usize) -> Option<u16> {
    if offset + 2 > data.len() {
        return None;
    }
    Some(u16::from_be_bytes([data[offset],data[offset+1]]))
}

fn long(data: &[u8],offset: usize) -> Option<u32> {
    if offset + 4 > data.len() {
        return None;
    }
    Some(u32::from_be_bytes([data[offset],data[offset+1],data[offset+2],data[offset+3]]))
}

fn branch_target(instruction: &Instruction,displacement: i16) -> u32 {
    instruction.address.wrapping_add(2).wrapping_add(displacement as i32 as u32)
}

pub struct M68k {}

impl M68k {
    pub fn new() -> Self {
        Self {}
    }
}

impl Architecture for M68k {
    fn disassemble_one_line(&self,data: &[u8],offset: usize,address: u32) -> (Option<Instruction>,usize) {
        let op = match word(data,offset) {
            Some(op) => op,
            None => return (None,offset)
        };
        for spec in &SPECS {
            if op & spec.mask != spec.base {
                continue;
            }
            let reg9 = ((op >> 9) & 7) as u8;
            let (mnemonic,operands,num_bytes,ends_flow) = match spec.shape {
                Shape::Inherent => (spec.mnemonic.to_string(),vec![],2,spec.ends_flow),
                Shape::Vector => (spec.mnemonic.to_string(),vec![Operand::Vector((op & 0xF) as u8)],2,spec.ends_flow),
                Shape::AbsLong => match long(data,offset+2) {
                    Some(val) => (spec.mnemonic.to_string(),vec![Operand::AbsoluteLong(val)],6,spec.ends_flow),
                    None => return (None,offset)
                },
                Shape::AbsLongToAddr => match long(data,offset+2) {
                    Some(val) => (spec.mnemonic.to_string(),vec![Operand::AbsoluteLong(val),Operand::AddressRegister(reg9)],6,spec.ends_flow),
                    None => return (None,offset)
                },
                Shape::AbsLongToData => match long(data,offset+2) {
                    Some(val) => (spec.mnemonic.to_string(),vec![Operand::AbsoluteLong(val),Operand::DataRegister(reg9)],6,spec.ends_flow),
                    None => return (None,offset)
                },
                Shape::ImmLongToData => match long(data,offset+2) {
                    Some(val) => (spec.mnemonic.to_string(),vec![Operand::Immediate(val),Operand::DataRegister(reg9)],6,spec.ends_flow),
                    None => return (None,offset)
                },
                Shape::ImmLongToAddr => match long(data,offset+2) {
                    Some(val) => (spec.mnemonic.to_string(),vec![Operand::Immediate(val),Operand::AddressRegister(reg9)],6,spec.ends_flow),
                    None => return (None,offset)
                },
                Shape::PcDispToAddr => match word(data,offset+2) {
                    Some(disp) => (spec.mnemonic.to_string(),vec![Operand::Displacement(disp as i16),Operand::AddressRegister(reg9)],4,spec.ends_flow),
                    None => return (None,offset)
                },
                Shape::Branch => {
                    let cond = ((op >> 8) & 0xF) as usize;
                    let name = ["B",BCC_NAMES[cond]].concat();
                    let disp8 = (op & 0xFF) as u8;
                    let ends_flow = cond == 0;
                    if disp8 == 0 {
                        match word(data,offset+2) {
                            Some(disp) => ([name,".W".to_string()].concat(),vec![Operand::Displacement(disp as i16)],4,ends_flow),
                            None => return (None,offset)
                        }
                    } else {
                        ([name,".S".to_string()].concat(),vec![Operand::Displacement(disp8 as i8 as i16)],2,ends_flow)
                    }
                },
                Shape::BranchDecrement => {
                    let cond = ((op >> 8) & 0xF) as usize;
                    match word(data,offset+2) {
                        Some(disp) => (["DB",DBCC_NAMES[cond]].concat(),vec![Operand::DataRegister((op & 7) as u8),Operand::Displacement(disp as i16)],4,spec.ends_flow),
                        None => return (None,offset)
                    }
                }
            };
            let key = match spec.shape {
                Shape::Branch => {
                    match (op >> 8) & 0xF {
                        0 => "BRA",
                        1 => "BSR",
                        _ => "Bcc"
                    }
                },
                _ => spec.key
            };
            let instruction = Instruction {
                key,
                mnemonic,
                operands,
                num_bytes,
                address,
                ends_flow
            };
            return (Some(instruction),offset + num_bytes);
        }
        (None,offset)
    }
    fn disassemble_as_data(&self,data: &[u8],offset: usize) -> usize {
        if offset % 2 == 1 {
            return 1;
        }
        if offset + 2 <= data.len() {
            return 2;
        }
        0
    }
    fn is_final_instruction(&self,instruction: &Instruction) -> bool {
        instruction.ends_flow
    }
    fn get_match_addresses(&self,instruction: &Instruction) -> HashMap<u32,u8> {
        let mut ans: HashMap<u32,u8> = HashMap::new();
        for operand in &instruction.operands {
            let (target,flags) = match (instruction.key,operand) {
                ("JSR",Operand::AbsoluteLong(val)) | ("JMP",Operand::AbsoluteLong(val)) => (*val,match_flags::CODE),
                ("BRA",Operand::Displacement(d)) | ("BSR",Operand::Displacement(d)) |
                ("Bcc",Operand::Displacement(d)) | ("DBcc",Operand::Displacement(d)) => (branch_target(instruction,*d),match_flags::CODE),
                (_,Operand::AbsoluteLong(val)) => (*val,match_flags::ABSOLUTE),
                (_,Operand::Immediate(val)) => (*val,match_flags::ABSOLUTE | match_flags::UNCERTAIN),
                (_,Operand::Displacement(d)) => (branch_target(instruction,*d),0),
                _ => continue
            };
            *ans.entry(target).or_insert(0) |= flags;
        }
        ans
    }
    fn get_instruction_string(&self,instruction: &Instruction) -> String {
        instruction.mnemonic.clone()
    }
    fn get_operand_string(&self,instruction: &Instruction,idx: usize,lookup_symbol: SymbolLookup) -> String {
        let operand = match instruction.operands.get(idx) {
            Some(operand) => operand,
            None => return String::new()
        };
        match operand {
            Operand::DataRegister(r) => format!("D{}",r),
            Operand::AddressRegister(r) => format!("A{}",r),
            Operand::Vector(v) => format!("#{}",v),
            Operand::AbsoluteLong(val) => {
                match lookup_symbol(*val,None) {
                    Some(label) => label,
                    None => format!("${:08X}",val)
                }
            },
            Operand::Immediate(val) => {
                // a symbol is only meaningful when the destination is an address register
                let addr_dest = matches!(instruction.operands.get(idx+1),Some(Operand::AddressRegister(_)));
                let label = match addr_dest {
                    true => lookup_symbol(*val,Some((instruction.address,instruction.num_bytes))),
                    false => None
                };
                match label {
                    Some(label) => format!("#{}",label),
                    None => format!("#${:08X}",val)
                }
            },
            Operand::Displacement(d) => {
                let target = branch_target(instruction,*d);
                let txt = match lookup_symbol(target,None) {
                    Some(label) => label,
                    None => format!("${:08X}",target)
                };
                match instruction.key {
                    "LEA" => format!("{}(PC)",txt),
                    _ => txt
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(hex: &str,address: u32) -> (Option<Instruction>,usize) {
        let img = hex::decode(hex).expect("hex error");
        M68k::new().disassemble_one_line(&img,0,address)
    }

    #[test]
    fn inherent() {
        let (m,end) = decode("4e75",0x1000);
        let m = m.expect("no match");
        assert_eq!(m.mnemonic,"RTS");
        assert_eq!(m.num_bytes,2);
        assert_eq!(end,2);
        assert!(M68k::new().is_final_instruction(&m));
    }

    #[test]
    fn short_branch() {
        let (m,_) = decode("66fe",0x1000);
        let m = m.expect("no match");
        assert_eq!(m.mnemonic,"BNE.S");
        assert_eq!(m.key,"Bcc");
        assert_eq!(m.num_bytes,2);
        let targets = M68k::new().get_match_addresses(&m);
        assert_eq!(targets.get(&0x1000),Some(&match_flags::CODE));
    }

    #[test]
    fn word_branch() {
        let (m,_) = decode("60000004",0x1000);
        let m = m.expect("no match");
        assert_eq!(m.mnemonic,"BRA.W");
        assert_eq!(m.key,"BRA");
        assert!(m.ends_flow);
        let targets = M68k::new().get_match_addresses(&m);
        assert_eq!(targets.get(&0x1006),Some(&match_flags::CODE));
    }

    #[test]
    fn jump_subroutine() {
        let (m,_) = decode("4eb900001234",0x1000);
        let m = m.expect("no match");
        assert_eq!(m.mnemonic,"JSR");
        assert_eq!(m.num_bytes,6);
        let lookup: &dyn Fn(u32,Option<(u32,usize)>) -> Option<String> = &|addr,_| match addr {
            0x1234 => Some("entry".to_string()),
            _ => None
        };
        assert_eq!(M68k::new().get_operand_string(&m,0,lookup),"entry");
    }

    #[test]
    fn decrement_branch() {
        let (m,_) = decode("51c8fffc",0x1000);
        let m = m.expect("no match");
        assert_eq!(m.mnemonic,"DBF");
        assert_eq!(m.key,"DBcc");
        let targets = M68k::new().get_match_addresses(&m);
        assert_eq!(targets.get(&0x0FFE),Some(&match_flags::CODE));
    }

    #[test]
    fn effective_addresses() {
        let (m,_) = decode("41f900002000",0x1000);
        let m = m.expect("no match");
        assert_eq!(m.mnemonic,"LEA");
        let targets = M68k::new().get_match_addresses(&m);
        assert_eq!(targets.get(&0x2000),Some(&match_flags::ABSOLUTE));
        let lookup: &dyn Fn(u32,Option<(u32,usize)>) -> Option<String> = &|_,_| None;
        assert_eq!(M68k::new().get_operand_string(&m,0,lookup),"$00002000");
        assert_eq!(M68k::new().get_operand_string(&m,1,lookup),"A0");
    }

    #[test]
    fn immediate_to_address_register() {
        let (m,_) = decode("227c00004000",0x1000);
        let m = m.expect("no match");
        assert_eq!(m.mnemonic,"MOVEA.L");
        let targets = M68k::new().get_match_addresses(&m);
        assert_eq!(targets.get(&0x4000),Some(&(match_flags::ABSOLUTE | match_flags::UNCERTAIN)));
        let lookup: &dyn Fn(u32,Option<(u32,usize)>) -> Option<String> = &|addr,_| match addr {
            0x4000 => Some("lbW004000".to_string()),
            _ => None
        };
        assert_eq!(M68k::new().get_operand_string(&m,0,lookup),"#lbW004000");
        assert_eq!(M68k::new().get_operand_string(&m,1,lookup),"A1");
    }

    #[test]
    fn pc_relative() {
        let (m,_) = decode("41fa0010",0x1000);
        let m = m.expect("no match");
        assert_eq!(m.mnemonic,"LEA");
        assert_eq!(m.num_bytes,4);
        let targets = M68k::new().get_match_addresses(&m);
        assert_eq!(targets.get(&0x1012),Some(&0));
        let lookup: &dyn Fn(u32,Option<(u32,usize)>) -> Option<String> = &|_,_| None;
        assert_eq!(M68k::new().get_operand_string(&m,0,lookup),"$00001012(PC)");
    }

    #[test]
    fn unrecognized_words_are_data() {
        let img = hex::decode("ffff12").expect("hex error");
        let dasm = M68k::new();
        let (m,end) = dasm.disassemble_one_line(&img,0,0x1000);
        assert!(m.is_none());
        assert_eq!(end,0);
        assert_eq!(dasm.disassemble_as_data(&img,0),2);
        assert_eq!(dasm.disassemble_as_data(&img,2),0);
        assert_eq!(dasm.disassemble_as_data(&img,1),1);
    }
}
