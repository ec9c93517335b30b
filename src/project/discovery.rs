//! Recursive code discovery.
//!
//! A worklist of addresses starts from the entry point (or a retype target)
//! and grows as decoded instructions surface new control-flow targets.  Each
//! address splits its block if needed, the block is walked instruction by
//! instruction, and the result commits atomically under one pre/post line
//! event pair.  Local failures never abort the pass: an undecodable range is
//! left behind as a processed numeric block and the walk continues wherever
//! the decoder says code can resume.
//!
//! After the fixpoint, every recorded target that still lacks a symbol gets a
//! synthesized label whose letter reflects the data type of its block.

use std::collections::{BTreeSet,HashSet};
use log::{debug,error};
use crate::arch::{Instruction,match_flags};
use super::{poll,Error,Project,WorkState};
use super::blocks::{CodeEntry,DataType,InstructionSlot,LineData};

impl Project {
    pub(crate) fn process_address_as_code(&mut self,address: u32,pending: &mut HashSet<u32>,mut work_state: Option<&mut dyn WorkState>) {
        let mut worklist: BTreeSet<u32> = BTreeSet::new();
        worklist.insert(address);
        while let Some(address) = worklist.pop_first() {
            if work_state.is_some() {
                let code_bytes: usize = self.store.blocks().iter()
                    .filter(|b| b.data_type == DataType::Code).map(|b| b.length).sum();
                let fraction = match self.file_size {
                    0 => 0.0,
                    n => code_bytes as f32 / n as f32 * 0.6
                };
                if poll(&mut work_state,0.2 + fraction,"disassembling") {
                    return;
                }
            }

            // when the address is mid-block, split the trailing portion off
            let mut idx = self.store.find_by_address(address);
            if address > self.store.get(idx).address {
                match self.split_block(address,false) {
                    Ok(new_idx) => idx = new_idx,
                    Err(e) => {
                        debug!("discovery split at ${:06X}: {}",address,e);
                        continue;
                    }
                }
            }
            if self.store.get(idx).data_type == DataType::Code || self.store.get(idx).processed {
                continue;
            }

            // disassemble as much of the block as possible
            let (block_address,block_length,segment_id,segment_offset) = {
                let block = self.store.get(idx);
                (block.address,block.length,block.segment_id,block.segment_offset)
            };
            let arch = self.arch.clone();
            let mut bytes_consumed: usize = 0;
            let mut data_bytes_to_skip: usize = 0;
            let mut line_data: Vec<CodeEntry> = Vec::new();
            let mut matches: Vec<Instruction> = Vec::new();
            let mut found_terminating = false;
            while bytes_consumed < block_length {
                let data = &self.segments[segment_id].data;
                let offset_start = segment_offset + bytes_consumed;
                let match_address = block_address + bytes_consumed as u32;
                let (m,offset_end) = arch.disassemble_one_line(data,offset_start,match_address);
                let m = match m {
                    Some(m) => m,
                    None => {
                        data_bytes_to_skip = arch.disassemble_as_data(data,offset_start);
                        if data_bytes_to_skip == 0 {
                            error!("unable to disassemble data at ${:06X} (started at ${:06X})",match_address,address);
                        }
                        break;
                    }
                };
                let bytes_matched = offset_end - offset_start;
                if bytes_consumed + bytes_matched > block_length {
                    error!("unable to disassemble due to a block length overrun at ${:06X} (started at ${:06X})",match_address,address);
                    break;
                }
                line_data.push(CodeEntry::Instruction(InstructionSlot::Decoded(Box::new(m.clone()))));
                // a symbol inside the instruction still deserves a line
                for label_offset in 1..bytes_matched {
                    let label_address = match_address + label_offset as u32;
                    if self.symbols_by_address.contains_key(&label_address) {
                        line_data.push(CodeEntry::LocationRelativeEqu((label_address - block_address) as usize));
                    }
                }
                bytes_consumed += bytes_matched;
                found_terminating = arch.is_final_instruction(&m);
                matches.push(m);
                if found_terminating {
                    break;
                }
            }

            // discard any unprocessed remainder, or jump over skippable data
            if bytes_consumed < block_length {
                let mut new_code_address: Option<u32> = None;
                let failed_address = block_address + bytes_consumed as u32;
                if bytes_consumed == 0 {
                    if data_bytes_to_skip > 0 {
                        // the current block stays behind as processed data
                        new_code_address = Some(failed_address + data_bytes_to_skip as u32);
                    } else {
                        error!("skipping block at ${:06X} with no code (length: {})",block_address,block_length);
                    }
                } else {
                    match self.split_block(failed_address,false) {
                        Ok(trailing_idx) => {
                            if let Err(e) = self.set_block_data_type(trailing_idx,DataType::Longword,None) {
                                debug!("retyping trailing block at ${:06X}: {}",failed_address,e);
                            }
                            if !found_terminating {
                                self.store.get_mut(trailing_idx).processed = true;
                                if data_bytes_to_skip > 0 {
                                    new_code_address = Some(failed_address + data_bytes_to_skip as u32);
                                }
                            } else {
                                self.store.get_mut(trailing_idx).processed = false;
                            }
                        },
                        Err(e) => {
                            error!("unrecognized code at ${:06X}: unexpected splitting error {}",failed_address,e);
                            self.store.get_mut(idx).processed = true;
                            continue;
                        }
                    }
                }
                if let Some(code_address) = new_code_address {
                    match self.split_block(code_address,false) {
                        Ok(trailing_idx) => {
                            self.store.get_mut(trailing_idx).processed = false;
                            if let Err(e) = self.set_block_data_type(trailing_idx,DataType::Longword,None) {
                                debug!("retyping skipped data at ${:06X}: {}",code_address,e);
                            }
                            worklist.insert(code_address);
                        },
                        Err(Error::SplitExisting) => {
                            // skipped into an existing block, only continue if unprocessed
                            let existing = self.store.find_by_address(code_address);
                            if !self.store.get(existing).processed {
                                worklist.insert(code_address);
                            }
                        },
                        Err(e) => {
                            error!("skipped data at ${:06X}: unexpected splitting error {}",code_address,e);
                            self.store.get_mut(idx).processed = true;
                            continue;
                        }
                    }
                }
            }

            // with no code statements this is just processed data
            self.store.get_mut(idx).processed = true;
            if line_data.len() == 0 {
                continue;
            }

            // commit the new code block under one pre/post event pair
            let line0 = self.block_line_number(idx);
            let old_line_count = self.cached_line_count(idx);
            let mut temp = self.store.get(idx).clone();
            temp.set_data_type(DataType::Code);
            temp.line_data = LineData::Code(line_data);
            temp.line_count = self.block_line_count(&temp);
            let delta = temp.line_count as isize - old_line_count as isize;
            if delta != 0 {
                let first = match delta > 0 {
                    true => line0 + old_line_count,
                    false => ((line0 + old_line_count) as isize + delta) as usize
                };
                self.notify_pre_line(first,delta);
            }
            *self.store.get_mut(idx) = temp;
            if delta != 0 {
                self.store.mark_dirty(idx + 1);
                self.notify_post_line(None,delta);
            }

            // extract referred addresses for labeling and further discovery
            for m in &matches {
                for (target,flags) in arch.get_match_addresses(m) {
                    if flags & match_flags::CODE != 0 {
                        worklist.insert(target);
                        self.insert_branch_address(target,m.address,pending);
                    } else if flags & match_flags::ABSOLUTE != 0 {
                        if self.binary_file {
                            self.insert_reference_address(target,m.address,pending);
                        } else if self.relocated.contains(&target) {
                            let relocated_within = (0..m.num_bytes).any(|i| self.is_relocatable(m.address + i as u32));
                            if relocated_within {
                                self.insert_reference_address(target,m.address,pending);
                            }
                        }
                    } else if flags & match_flags::UNCERTAIN == 0 {
                        self.insert_reference_address(target,m.address,pending);
                    }
                }
            }
        }

        // synthesize default labels for the detected addresses, splitting so
        // the labels have lines to appear on
        let mut addresses: Vec<u32> = pending.iter().copied().collect();
        addresses.sort();
        for address in addresses {
            if self.symbols_by_address.contains_key(&address) {
                continue;
            }
            let mut idx = self.store.find_by_address(address);
            if self.store.get(idx).address != address {
                match self.split_block(address,true) {
                    Ok(new_idx) => idx = new_idx,
                    Err(Error::SplitOutOfBounds) => {
                        self.insert_symbol(address,format!("lbZ{:06X}",address));
                        continue;
                    },
                    Err(Error::SplitMidInstruction) => {
                        self.insert_symbol(address,format!("SYM{:06X}",address));
                        continue;
                    },
                    Err(e) => {
                        error!("labeling at ${:06X}: unexpected splitting error {}",address,e);
                        continue;
                    }
                }
            }
            let prefix = self.store.get(idx).data_type.label_prefix();
            self.insert_symbol(address,format!("lb{}{:06X}",prefix,address));
        }
    }
}
