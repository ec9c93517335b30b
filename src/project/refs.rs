//! Scanners feeding the uncertain-reference views.
//!
//! A code block's uncertain references are the absolute operands of its
//! instructions: values that read like addresses but carry no relocation
//! evidence.  A data block's are 32-bit values at 16-bit alignment that land
//! inside the image.  Both scans are pure; the caches they feed live on the
//! blocks and are rebuilt when a retype touches them.

use crate::arch::match_flags;
use super::Project;
use super::blocks::{DataType,UncertainReference};

impl Project {
    /// Absolute-flagged operands of every instruction in a code block.
    pub(crate) fn locate_uncertain_code_references(&self,idx: usize) -> Vec<UncertainReference> {
        let block = self.store.get(idx);
        let mut matches: Vec<UncertainReference> = Vec::new();
        for entry in block.code_entries() {
            let slot = match entry {
                super::blocks::CodeEntry::Instruction(slot) => slot,
                _ => continue
            };
            let m = match self.decode_slot(block,slot) {
                Ok(m) => m,
                Err(_) => continue
            };
            for (target,flags) in self.arch.get_match_addresses(&m) {
                if flags & match_flags::ABSOLUTE != 0 {
                    matches.push(UncertainReference {
                        address: m.address,
                        target,
                        code: self.render_match(&m)
                    });
                }
            }
        }
        matches.sort_by_key(|r| r.address);
        matches
    }

    /// 32-bit probes at every 16-bit aligned offset of a data block.
    pub(crate) fn locate_uncertain_data_references(&self,idx: usize) -> Vec<UncertainReference> {
        let block = self.store.get(idx);
        if block.alloc {
            return Vec::new();
        }
        let seg = &self.segments[block.segment_id];
        let types = self.system.data_types();
        let name = self.system.get_data_instruction_string(seg.is_bss,true);
        let start = block.segment_offset;
        let end = block.segment_offset + block.length;
        let mut matches: Vec<UncertainReference> = Vec::new();
        let mut offset: usize = 0;
        while start + offset + 4 <= end {
            if let Some(value) = types.uint32_value(&seg.data,start + offset) {
                if self.is_known_address(value) {
                    let operand = match self.relocated.contains(&value) {
                        true => self.symbol_for_address(value,None).unwrap_or(format!("${:08X}",value)),
                        false => format!("${:08X}",value)
                    };
                    matches.push(UncertainReference {
                        address: block.address + offset as u32,
                        target: value,
                        code: format!("{}.L {}",name,operand)
                    });
                }
            }
            offset += 2;
        }
        matches
    }

    fn render_match(&self,m: &crate::arch::Instruction) -> String {
        let lookup = |address: u32,absolute_info: Option<(u32,usize)>| self.symbol_for_address(address,absolute_info);
        let mut code = self.arch.get_instruction_string(m);
        let operands = match m.operands.len() {
            0 => String::new(),
            1 => self.arch.get_operand_string(m,0,&lookup),
            _ => {
                let mut s = self.arch.get_operand_string(m,0,&lookup);
                s += ",";
                s += &self.arch.get_operand_string(m,1,&lookup);
                s
            }
        };
        if operands.len() > 0 {
            code += " ";
            code += &operands;
        }
        code
    }

    /// All cached uncertain references of code blocks.
    pub fn uncertain_code_references(&self) -> Vec<UncertainReference> {
        let mut results: Vec<UncertainReference> = Vec::new();
        for block in self.store.blocks() {
            if block.data_type == DataType::Code {
                if let Some(refs) = &block.references {
                    results.extend(refs.iter().cloned());
                }
            }
        }
        results
    }

    /// All cached uncertain references of data blocks.
    pub fn uncertain_data_references(&self) -> Vec<UncertainReference> {
        let mut results: Vec<UncertainReference> = Vec::new();
        for block in self.store.blocks() {
            if block.data_type != DataType::Code {
                if let Some(refs) = &block.references {
                    results.extend(refs.iter().cloned());
                }
            }
        }
        results
    }

    /// Cached uncertain references of the block containing an address.
    pub fn uncertain_references_by_address(&self,address: u32) -> Vec<UncertainReference> {
        let idx = self.store.find_by_address(address);
        match &self.store.get(idx).references {
            Some(refs) => refs.clone(),
            None => Vec::new()
        }
    }
}
