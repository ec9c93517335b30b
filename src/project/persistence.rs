//! Saving and restoring analysis state.
//!
//! A `ProjectImage` is the serializable shape of everything the analysis
//! learned: the block list (code line data reduced to raw offsets), the
//! symbol and reference registries, and enough loader metadata to rebuild
//! the system object.  The original file bytes are not embedded; restoring
//! takes them alongside the image and verifies size and CRC-32 before
//! reconstructing a fully queryable project.

use std::collections::HashMap;
use std::sync::Arc;
use serde::{Serialize,Deserialize};
use num_traits::FromPrimitive;
use log::warn;
use crate::arch::Architecture;
use crate::loader;
use crate::DYNERR;
use super::{make_address_ranges,relocation_sets,DisplayConfiguration,Project};
use super::blocks::{Block,BlockStore,CodeEntry,DataType,InstructionSlot,LineData};

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize,Deserialize,Clone)]
pub enum CodeEntryImage {
    /// block offset of an instruction, decoded again on demand
    Instruction(usize),
    /// block offset of a location-relative EQU line
    Equ(usize),
    Comment(String)
}

#[derive(Serialize,Deserialize,Clone)]
pub struct BlockImage {
    pub segment_id: usize,
    pub segment_offset: usize,
    pub address: u32,
    pub length: usize,
    pub data_type: u8,
    pub alloc: bool,
    pub processed: bool,
    pub code_entries: Option<Vec<CodeEntryImage>>
}

#[derive(Serialize,Deserialize)]
pub struct ProjectImage {
    pub version: u32,
    pub system_name: String,
    pub arch_name: String,
    pub file_name: String,
    pub file_size: usize,
    pub file_checksum: u32,
    pub save_count: usize,
    pub saved_at: String,
    pub binary_file: bool,
    pub entrypoint_segment_id: usize,
    pub entrypoint_offset: usize,
    pub internal_data: serde_json::Value,
    pub blocks: Vec<BlockImage>,
    pub symbols: Vec<(u32,String)>,
    pub branches: Vec<(u32,Vec<u32>)>,
    pub references: Vec<(u32,Vec<u32>)>,
    pub post_segment_addresses: Vec<(usize,Vec<u32>)>
}

fn sorted_registry(registry: &HashMap<u32,std::collections::HashSet<u32>>) -> Vec<(u32,Vec<u32>)> {
    let mut ans: Vec<(u32,Vec<u32>)> = Vec::new();
    for (target,referrers) in registry {
        let mut referrers: Vec<u32> = referrers.iter().copied().collect();
        referrers.sort();
        ans.push((*target,referrers));
    }
    ans.sort();
    ans
}

impl Project {
    /// Capture the analysis state.  Bumps the save counter.
    pub fn save(&mut self) -> ProjectImage {
        self.save_count += 1;
        let mut blocks: Vec<BlockImage> = Vec::new();
        for block in self.store.blocks() {
            let code_entries = match &block.line_data {
                LineData::Code(entries) => {
                    let mut images: Vec<CodeEntryImage> = Vec::new();
                    for entry in entries {
                        images.push(match entry {
                            CodeEntry::Instruction(InstructionSlot::Raw(offset)) => CodeEntryImage::Instruction(*offset),
                            CodeEntry::Instruction(InstructionSlot::Decoded(m)) => CodeEntryImage::Instruction((m.address - block.address) as usize),
                            CodeEntry::LocationRelativeEqu(offset) => CodeEntryImage::Equ(*offset),
                            CodeEntry::FullLineComment(text) => CodeEntryImage::Comment(text.clone())
                        });
                    }
                    Some(images)
                },
                _ => None
            };
            blocks.push(BlockImage {
                segment_id: block.segment_id,
                segment_offset: block.segment_offset,
                address: block.address,
                length: block.length,
                data_type: block.data_type as u8,
                alloc: block.alloc,
                processed: block.processed,
                code_entries
            });
        }
        let mut symbols: Vec<(u32,String)> = self.symbols_by_address.iter()
            .map(|(a,s)| (*a,s.clone())).collect();
        symbols.sort();
        let mut post_segment_addresses: Vec<(usize,Vec<u32>)> = self.post_segment_addresses.iter()
            .map(|(id,v)| (*id,v.clone())).collect();
        post_segment_addresses.sort();
        ProjectImage {
            version: FORMAT_VERSION,
            system_name: self.system.system_name().to_string(),
            arch_name: self.system.arch_name().to_string(),
            file_name: self.file_name.clone(),
            file_size: self.file_size,
            file_checksum: self.file_checksum,
            save_count: self.save_count,
            saved_at: chrono::Utc::now().to_rfc3339(),
            binary_file: self.binary_file,
            entrypoint_segment_id: self.entrypoint_segment_id,
            entrypoint_offset: self.entrypoint_offset,
            internal_data: self.system.internal_data(),
            blocks,
            symbols,
            branches: sorted_registry(&self.branch_addresses),
            references: sorted_registry(&self.reference_addresses),
            post_segment_addresses
        }
    }

    pub fn to_json(&mut self) -> String {
        serde_json::to_string_pretty(&self.save()).expect("unreachable")
    }

    /// Rebuild a project from a saved image plus the original file bytes.
    pub fn restore(file_data: &Vec<u8>,image: &ProjectImage,arch: Arc<dyn Architecture>) -> Result<Self,DYNERR> {
        if file_data.len() != image.file_size || crate::crc32(0,file_data) != image.file_checksum {
            return Err(Box::new(loader::Error::ChecksumMismatch));
        }
        let loaded = match image.system_name.as_str() {
            "binary" => {
                let mut options = loader::binary::BinaryOptions::new();
                if let Some(load_address) = image.internal_data["load_address"].as_u64() {
                    options.load_address = load_address as u32;
                }
                if let Some(offset) = image.internal_data["entrypoint_offset"].as_u64() {
                    options.entrypoint_offset = offset as usize;
                }
                if image.internal_data["endian"].as_str() == Some("little") {
                    options.endian = loader::Endian::Little;
                }
                loader::binary::image(file_data,&options)
            },
            _ => loader::load_image(file_data)?
        };
        let loader::Image { system, segments, .. } = loaded;
        let (relocated,relocatable) = relocation_sets(system.data_types(),&segments);
        let mut store = BlockStore::new();
        for bi in &image.blocks {
            if bi.segment_id >= segments.len() {
                warn!("block at ${:06X} names a segment that does not exist",bi.address);
                continue;
            }
            let data_type = match DataType::from_u8(bi.data_type) {
                Some(data_type) => data_type,
                None => {
                    warn!("block at ${:06X} has unknown data type {}",bi.address,bi.data_type);
                    DataType::Longword
                }
            };
            let mut block = Block::new(bi.segment_id,bi.segment_offset,bi.address,bi.length,data_type,bi.alloc);
            block.processed = bi.processed;
            if let Some(entries) = &bi.code_entries {
                let mut line_data: Vec<CodeEntry> = Vec::new();
                for entry in entries {
                    line_data.push(match entry {
                        CodeEntryImage::Instruction(offset) => CodeEntry::Instruction(InstructionSlot::Raw(*offset)),
                        CodeEntryImage::Equ(offset) => CodeEntry::LocationRelativeEqu(*offset),
                        CodeEntryImage::Comment(text) => CodeEntry::FullLineComment(text.clone())
                    });
                }
                block.line_data = LineData::Code(line_data);
            }
            store.push(block);
        }
        let mut project = Self {
            address_ranges: make_address_ranges(&segments),
            system,
            segments,
            arch,
            store,
            symbols_by_address: image.symbols.iter().cloned().collect(),
            branch_addresses: image.branches.iter().map(|(t,v)| (*t,v.iter().copied().collect())).collect(),
            reference_addresses: image.references.iter().map(|(t,v)| (*t,v.iter().copied().collect())).collect(),
            post_segment_addresses: image.post_segment_addresses.iter().cloned().collect(),
            relocated,
            relocatable,
            entrypoint_segment_id: image.entrypoint_segment_id,
            entrypoint_offset: image.entrypoint_offset,
            binary_file: image.binary_file,
            file_name: image.file_name.clone(),
            file_size: image.file_size,
            file_checksum: image.file_checksum,
            save_count: image.save_count,
            display: DisplayConfiguration::new(),
            observer: None
        };
        // character blocks persist no line data, shape them again
        for idx in 0..project.store.len() {
            if project.store.get(idx).data_type == DataType::Ascii {
                project.reshape_ascii(idx);
            }
        }
        project.verify_partition();
        project.cache_uncertain_references();
        Ok(project)
    }

    pub fn restore_from_json(file_data: &Vec<u8>,json: &str,arch: Arc<dyn Architecture>) -> Result<Self,DYNERR> {
        let image: ProjectImage = serde_json::from_str(json)?;
        Self::restore(file_data,&image,arch)
    }

    fn verify_partition(&self) {
        for i in 0..self.store.len() {
            let block = self.store.get(i);
            if block.length == 0 {
                warn!("restored block at ${:06X} is empty",block.address);
            }
            if i + 1 < self.store.len() {
                let next = self.store.get(i+1);
                if next.segment_id == block.segment_id && block.end_address() != next.address {
                    warn!("restored blocks at ${:06X} and ${:06X} do not meet",block.address,next.address);
                }
            }
        }
    }
}
