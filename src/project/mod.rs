//! # Project Module
//!
//! A `Project` owns everything the analysis knows about one loaded image: the
//! segments, the typed block partition, the symbol and reference registries,
//! and the lazily maintained line-number index.  All state is explicit in the
//! project value; operations are methods and there are no globals.
//!
//! A single logical mutator owns the project.  Long operations (code discovery,
//! retyping) poll a cooperative `WorkState` and unwind cleanly when asked; every
//! mutation commits atomically at a line-delta event boundary, so the partition
//! invariants hold wherever a cancellation lands.
//!
//! The embedding application registers one `ProjectObserver` to hear about
//! inserted symbols, line count changes (so a display can patch itself), and
//! uncertain-reference list changes (so a dock view can refresh).

pub mod blocks;
pub mod lines;
pub mod persistence;
mod ascii;
mod discovery;
mod refs;

#[cfg(test)]
mod tests;

use std::collections::{HashMap,HashSet};
use std::sync::Arc;
use bit_vec::BitVec;
use log::{debug,error};
use crate::arch::{Architecture,Instruction};
use crate::loader::{Image,Segment,System};
use crate::{DYNERR,STDRESULT};
use blocks::{Block,BlockStore,CodeEntry,DataType,InstructionSlot,LineData,UncertainReference};

pub(crate) const RCH: &str = "unreachable was reached";

/// Enumerates analysis errors.  The `Display` trait will print the equivalent
/// long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("split requested at an existing boundary")]
    SplitExisting,
    #[error("split address is out of bounds")]
    SplitOutOfBounds,
    #[error("split address is inside an instruction")]
    SplitMidInstruction,
    #[error("decoder could not process the bytes")]
    DecodeFailure,
    #[error("address is outside the loaded image")]
    UnknownAddress,
    #[error("block is not backed by file data")]
    NotFileBacked
}

/// Extra lines a display may want after certain instructions.
pub struct DisplayConfiguration {
    /// blank line after an instruction that ends the flow
    pub trailing_line_exit: bool,
    /// blank line after conditional branches
    pub trailing_line_branch: bool,
    /// blank line after traps
    pub trailing_line_trap: bool
}

impl DisplayConfiguration {
    pub fn new() -> Self {
        Self {
            trailing_line_exit: true,
            trailing_line_branch: true,
            trailing_line_trap: true
        }
    }
}

/// Cooperative handle polled by long operations at progress points.
pub trait WorkState {
    /// Report progress and learn whether the operation should unwind at the
    /// next commit boundary.
    fn check_exit_update(&mut self,fraction: f32,status: &str) -> bool;
}

fn poll(work_state: &mut Option<&mut dyn WorkState>,fraction: f32,status: &str) -> bool {
    match work_state {
        Some(ws) => ws.check_exit_update(fraction,status),
        None => false
    }
}

/// Callbacks the embedding application can register to stay in sync.
/// Line deltas arrive as one pre event then one post event per block commit.
pub trait ProjectObserver {
    fn symbol_inserted(&mut self,_address: u32,_name: &str) {}
    fn pre_line_change(&mut self,_line0: usize,_delta: isize) {}
    fn post_line_change(&mut self,_line0: Option<usize>,_delta: isize) {}
    fn uncertain_references_changed(&mut self,_old_type: DataType,_new_type: DataType,_address: u32,_length: usize) {}
}

/// A maximal run of contiguous segments, `last` inclusive.
pub(crate) struct AddressRange {
    pub first: u32,
    pub last: u32,
    pub segment_ids: Vec<usize>
}

enum AddressClass {
    Within,
    /// exactly one past a run, value is the predecessor segment
    Adjacent(usize),
    Outside
}

pub struct Project {
    pub(crate) system: Box<dyn System>,
    pub(crate) segments: Vec<Segment>,
    pub(crate) arch: Arc<dyn Architecture>,
    pub(crate) store: BlockStore,
    pub(crate) symbols_by_address: HashMap<u32,String>,
    pub(crate) branch_addresses: HashMap<u32,HashSet<u32>>,
    pub(crate) reference_addresses: HashMap<u32,HashSet<u32>>,
    pub(crate) post_segment_addresses: HashMap<usize,Vec<u32>>,
    pub(crate) address_ranges: Vec<AddressRange>,
    /// values that were patched by relocation
    pub(crate) relocated: HashSet<u32>,
    /// per-segment bitmap of patched positions
    pub(crate) relocatable: Vec<BitVec>,
    pub(crate) entrypoint_segment_id: usize,
    pub(crate) entrypoint_offset: usize,
    pub(crate) binary_file: bool,
    pub(crate) file_name: String,
    pub(crate) file_size: usize,
    pub(crate) file_checksum: u32,
    pub(crate) save_count: usize,
    pub display: DisplayConfiguration,
    observer: Option<Box<dyn ProjectObserver>>
}

impl Project {
    /// Build a project from a loaded image and run code discovery from the
    /// entry point and every relocated address.  `file_data` is only
    /// fingerprinted here; the segments already own their bytes.
    pub fn new(file_data: &Vec<u8>,image: Image,arch: Arc<dyn Architecture>,file_name: &str,mut work_state: Option<&mut dyn WorkState>) -> Result<Self,DYNERR> {
        let Image { system, segments, entrypoint_segment_id, entrypoint_offset } = image;
        let binary_file = system.is_binary();
        let (relocated,relocatable) = relocation_sets(system.data_types(),&segments);
        let mut project = Self {
            address_ranges: make_address_ranges(&segments),
            system,
            segments,
            arch,
            store: BlockStore::new(),
            symbols_by_address: HashMap::new(),
            branch_addresses: HashMap::new(),
            reference_addresses: HashMap::new(),
            post_segment_addresses: HashMap::new(),
            relocated,
            relocatable,
            entrypoint_segment_id,
            entrypoint_offset,
            binary_file,
            file_name: file_name.to_string(),
            file_size: file_data.len(),
            file_checksum: crate::crc32(0,file_data),
            save_count: 0,
            display: DisplayConfiguration::new(),
            observer: None
        };

        // Pass 1: one block per file-backed region plus one per uninitialized tail.
        for i in 0..project.segments.len() {
            let seg = &project.segments[i];
            let data_length = seg.data_length();
            if data_length > 0 {
                project.store.push(Block::new(i,0,seg.address,data_length,DataType::Longword,false));
            }
            if seg.length > data_length {
                project.store.push(Block::new(i,data_length,seg.address + data_length as u32,seg.length - data_length,DataType::Longword,true));
            }
        }

        // Pass 2: incorporate known symbols.
        let mut known: Vec<(u32,String)> = Vec::new();
        for seg in &project.segments {
            for (offset,name) in &seg.symbols {
                known.push((seg.address + *offset as u32,name.clone()));
            }
        }
        for (address,name) in &known {
            project.insert_symbol(*address,name.clone());
        }

        // Pass 3: discovery from the entry point and all relocated addresses.
        if !poll(&mut work_state,0.2,"disassembling") {
            let entrypoint_address = project.entrypoint_address();
            let mut pending: HashSet<u32> = project.relocated.clone();
            pending.insert(entrypoint_address);
            project.process_address_as_code(entrypoint_address,&mut pending,work_state);
        }

        // Split at the loader symbols so their labels appear on their own lines.
        for (address,_name) in &known {
            match project.split_block(*address,false) {
                Ok(_) | Err(Error::SplitExisting) | Err(Error::SplitMidInstruction) => {},
                Err(e) => error!("splitting at symbol ${:06X}: {}",address,e)
            }
        }

        project.cache_uncertain_references();
        project.log_load_stats();
        Ok(project)
    }

    pub fn set_observer(&mut self,observer: Box<dyn ProjectObserver>) {
        self.observer = Some(observer);
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn entrypoint_address(&self) -> u32 {
        self.segments[self.entrypoint_segment_id].address + self.entrypoint_offset as u32
    }

    pub fn data_type_at_address(&self,address: u32) -> DataType {
        self.store.get(self.store.find_by_address(address)).data_type
    }

    pub(crate) fn notify_symbol(&mut self,address: u32,name: &str) {
        if let Some(obs) = self.observer.as_mut() {
            obs.symbol_inserted(address,name);
        }
    }

    pub(crate) fn notify_pre_line(&mut self,line0: usize,delta: isize) {
        if let Some(obs) = self.observer.as_mut() {
            obs.pre_line_change(line0,delta);
        }
    }

    pub(crate) fn notify_post_line(&mut self,line0: Option<usize>,delta: isize) {
        if let Some(obs) = self.observer.as_mut() {
            obs.post_line_change(line0,delta);
        }
    }

    pub(crate) fn notify_uncertain(&mut self,old_type: DataType,new_type: DataType,address: u32,length: usize) {
        if let Some(obs) = self.observer.as_mut() {
            obs.uncertain_references_changed(old_type,new_type,address,length);
        }
    }

    fn classify_address(&self,address: u32) -> AddressClass {
        for range in &self.address_ranges {
            if address >= range.first && address <= range.last {
                return AddressClass::Within;
            }
            if address == range.last + 1 {
                let pre = match range.segment_ids.iter().max() {
                    Some(id) => *id,
                    None => continue
                };
                return AddressClass::Adjacent(pre);
            }
        }
        AddressClass::Outside
    }

    /// Pure containment test, used by scanners that must not mutate.
    pub(crate) fn is_known_address(&self,address: u32) -> bool {
        !matches!(self.classify_address(address),AddressClass::Outside)
    }

    /// Containment test that also registers a just-past-the-end address for
    /// rendering as a trailing label line of its predecessor segment.
    pub(crate) fn check_known_address(&mut self,address: u32) -> bool {
        match self.classify_address(address) {
            AddressClass::Within => true,
            AddressClass::Adjacent(pre) => {
                let addresses = self.post_segment_addresses.entry(pre).or_insert(Vec::new());
                if !addresses.contains(&address) {
                    addresses.push(address);
                    addresses.sort();
                    if self.store.len() > 0 {
                        // the predecessor's last block renders these, its count is stale now
                        let idx = self.store.find_by_address(address - 1);
                        self.clear_block_line_count(idx);
                    }
                }
                true
            },
            AddressClass::Outside => false
        }
    }

    pub(crate) fn is_relocatable(&self,address: u32) -> bool {
        for seg in &self.segments {
            if address >= seg.address && address < seg.end_address() {
                return self.relocatable[seg.id].get((address - seg.address) as usize).unwrap_or(false);
            }
        }
        false
    }

    /// Insert a symbol, silently dropping targets outside the image.
    pub(crate) fn insert_symbol(&mut self,address: u32,name: String) {
        if !self.check_known_address(address) {
            debug!("dropping symbol {} at unknown address ${:06X}",name,address);
            return;
        }
        self.symbols_by_address.insert(address,name.clone());
        self.notify_symbol(address,&name);
    }

    /// Name an address.  Unlike discovery-synthesized labels, an unknown
    /// address is reported to the caller.
    pub fn set_symbol(&mut self,address: u32,name: &str) -> STDRESULT {
        if !self.check_known_address(address) {
            return Err(Box::new(Error::UnknownAddress));
        }
        self.symbols_by_address.insert(address,name.to_string());
        self.notify_symbol(address,name);
        Ok(())
    }

    /// Reverse lookup over the small symbol set, case-insensitive.
    pub fn address_for_symbol(&self,name: &str) -> Option<u32> {
        let name = name.to_lowercase();
        for (address,symbol) in &self.symbols_by_address {
            if symbol.to_lowercase() == name {
                return Some(*address);
            }
        }
        None
    }

    /// The symbol at an address.  When `absolute_info` carries the referring
    /// instruction, the lookup only succeeds with evidence the value really is
    /// a pointer: for binaries the referrer must be recorded against the
    /// target, for executables some byte of the instruction must be a
    /// relocated position.
    pub fn symbol_for_address(&self,address: u32,absolute_info: Option<(u32,usize)>) -> Option<String> {
        let valid = match absolute_info {
            Some((referrer,num_bytes)) => {
                if self.binary_file {
                    self.referring_addresses(address).contains(&referrer)
                } else if self.relocated.contains(&address) {
                    (0..num_bytes).any(|i| self.is_relocatable(referrer + i as u32))
                } else {
                    false
                }
            },
            None => true
        };
        match valid {
            true => self.symbols_by_address.get(&address).cloned(),
            false => None
        }
    }

    pub(crate) fn insert_branch_address(&mut self,target: u32,referrer: u32,pending: &mut HashSet<u32>) -> bool {
        if !self.check_known_address(target) {
            return false;
        }
        self.branch_addresses.entry(target).or_insert(HashSet::new()).insert(referrer);
        pending.insert(target);
        true
    }

    pub(crate) fn insert_reference_address(&mut self,target: u32,referrer: u32,pending: &mut HashSet<u32>) -> bool {
        if !self.check_known_address(target) {
            return false;
        }
        self.reference_addresses.entry(target).or_insert(HashSet::new()).insert(referrer);
        pending.insert(target);
        true
    }

    /// Union of branch and data referrers recorded against an address.
    pub fn referring_addresses(&self,address: u32) -> HashSet<u32> {
        let mut ans: HashSet<u32> = HashSet::new();
        if let Some(set) = self.branch_addresses.get(&address) {
            ans.extend(set);
        }
        if let Some(set) = self.reference_addresses.get(&address) {
            ans.extend(set);
        }
        ans
    }

    /// Decode an instruction slot, consulting the segment bytes for the raw
    /// offset form.
    pub(crate) fn decode_slot(&self,block: &Block,slot: &InstructionSlot) -> Result<Instruction,Error> {
        match slot {
            InstructionSlot::Decoded(instruction) => Ok((**instruction).clone()),
            InstructionSlot::Raw(offset) => {
                let seg = &self.segments[block.segment_id];
                let (m,_) = self.arch.disassemble_one_line(&seg.data,block.segment_offset + offset,block.address + *offset as u32);
                m.ok_or(Error::DecodeFailure)
            }
        }
    }

    pub(crate) fn clear_block_line_count(&mut self,idx: usize) {
        self.store.get_mut(idx).line_count = 0;
        self.store.mark_dirty(idx);
    }

    /// Split the block containing `address` so that `address` begins a new
    /// block, and return the new block's index.  Both halves keep the data
    /// type, allocation, and processed marks, so a split by itself creates no
    /// new work.  With `own_midinstruction`, a split landing inside an
    /// instruction instead records a location-relative EQU line in the
    /// existing block (the caller only wanted a label there).
    pub(crate) fn split_block(&mut self,address: u32,own_midinstruction: bool) -> Result<usize,Error> {
        let idx = self.store.find_by_address(address);
        let (seg_id,seg_offset,blk_address,blk_length,data_type,alloc,processed) = {
            let block = self.store.get(idx);
            (block.segment_id,block.segment_offset,block.address,block.length,block.data_type,block.alloc,block.processed)
        };
        if blk_address == address {
            return Err(Error::SplitExisting);
        }
        let seg = &self.segments[seg_id];
        if address < seg.address || address >= seg.end_address() {
            error!("tried to split at out of bounds address: ${:06X} not within ${:06X}-${:06X}",address,seg.address,seg.end_address()-1);
            return Err(Error::SplitOutOfBounds);
        }

        let split_offset = (address - blk_address) as usize;
        let excess_length = blk_length - split_offset;

        let mut keep_entries: Vec<CodeEntry> = Vec::new();
        let mut carry_entries: Vec<CodeEntry> = Vec::new();
        let mut keep_refs: Option<Vec<UncertainReference>> = None;
        let mut carry_refs: Option<Vec<UncertainReference>> = None;
        if data_type == DataType::Code {
            // find the entry where the new block begins; comments group with
            // the succeeding instruction
            let block = self.store.get(idx);
            let entries = block.code_entries();
            let mut offset_n: usize = 0;
            let mut at: Option<usize> = None;
            let mut mid: Option<usize> = None;
            for i in 0..entries.len() {
                if matches!(entries[i],CodeEntry::Instruction(_) | CodeEntry::FullLineComment(_)) && offset_n == split_offset {
                    at = Some(i);
                    break;
                }
                if let CodeEntry::Instruction(slot) = &entries[i] {
                    let instruction = self.decode_slot(block,slot)?;
                    offset_n += instruction.num_bytes;
                    if split_offset < offset_n {
                        mid = Some(i + 1);
                        break;
                    }
                }
            }
            if let Some(insert_at) = mid {
                if own_midinstruction {
                    if let LineData::Code(entries) = &mut self.store.get_mut(idx).line_data {
                        entries.insert(insert_at,CodeEntry::LocationRelativeEqu(split_offset));
                    }
                    self.clear_block_line_count(idx);
                } else {
                    debug!("attempting to split block mid-instruction: ${:06X}",address);
                }
                return Err(Error::SplitMidInstruction);
            }
            let at = match at {
                Some(at) => at,
                None => entries.len()
            };
            keep_entries = entries[..at].to_vec();
            carry_entries = entries[at..].to_vec();
            for entry in carry_entries.iter_mut() {
                match entry {
                    CodeEntry::Instruction(InstructionSlot::Raw(offset)) => *offset -= split_offset,
                    CodeEntry::LocationRelativeEqu(offset) => *offset -= split_offset,
                    _ => {}
                }
            }
            if let Some(refs) = &block.references {
                let cut = refs.partition_point(|r| r.address < address);
                keep_refs = Some(refs[..cut].to_vec());
                carry_refs = Some(refs[cut..].to_vec());
            }
            if address & 1 != 0 {
                debug!("splitting code block at odd address: ${:06X}",address);
            }
        }

        {
            let block = self.store.get_mut(idx);
            block.length = split_offset;
            if data_type == DataType::Code {
                block.line_data = LineData::Code(keep_entries);
                block.references = keep_refs;
            }
        }
        let mut new_block = Block::new(seg_id,seg_offset + split_offset,address,excess_length,data_type,alloc);
        new_block.processed = processed;
        if data_type == DataType::Code {
            new_block.line_data = LineData::Code(carry_entries);
            new_block.references = carry_refs;
        }
        self.store.insert(idx + 1,new_block);
        if data_type == DataType::Ascii {
            self.reshape_ascii(idx);
            self.reshape_ascii(idx + 1);
        }
        self.clear_block_line_count(idx);
        Ok(idx + 1)
    }

    /// Retype the bytes from `address` to the end of its block.  Retyping to
    /// code re-runs discovery from `address`; other retypes commit under one
    /// pre/post event pair.  A split failure other than an existing boundary
    /// aborts the retype.
    pub fn set_data_type_at_address(&mut self,address: u32,data_type: DataType,mut work_state: Option<&mut dyn WorkState>) -> STDRESULT {
        if !self.is_known_address(address) {
            return Err(Box::new(Error::UnknownAddress));
        }
        let idx = self.store.find_by_address(address);
        if self.store.get(idx).data_type == data_type {
            return Ok(());
        }
        if self.store.get(idx).alloc && matches!(data_type,DataType::Code | DataType::Ascii) {
            return Err(Box::new(Error::NotFileBacked));
        }
        let idx = match self.split_block(address,false) {
            Ok(new_idx) => new_idx,
            Err(Error::SplitExisting) => idx,
            Err(e) => {
                error!("set data type at ${:06X}: {}",address,e);
                return Err(Box::new(e));
            }
        };
        self.set_block_data_type(idx,data_type,work_state.take())
    }

    /// Retype a whole block, given by index.
    pub(crate) fn set_block_data_type(&mut self,idx: usize,data_type: DataType,work_state: Option<&mut dyn WorkState>) -> STDRESULT {
        let (address,old_type,length) = {
            let block = self.store.get(idx);
            (block.address,block.data_type,block.length)
        };
        if old_type == data_type {
            return Ok(());
        }
        if self.store.get(idx).alloc && matches!(data_type,DataType::Code | DataType::Ascii) {
            return Err(Box::new(Error::NotFileBacked));
        }

        let mut affected: Vec<u32> = Vec::new();
        if data_type == DataType::Code {
            self.store.get_mut(idx).processed = false;
            let mut pending: HashSet<u32> = HashSet::new();
            self.process_address_as_code(address,&mut pending,work_state);
            // discovery may have split the original range apart; every block
            // now inside it needs its cached references rebuilt
            let mut i = self.store.find_by_address(address);
            while i < self.store.len() {
                let b = self.store.get(i);
                if b.address < address || b.address >= address + length as u32 {
                    break;
                }
                affected.push(b.address);
                i += 1;
            }
        } else {
            // 1. pre-change data
            let line0 = self.block_line_number(idx);
            let old_line_count = self.cached_line_count(idx);
            // 2. apply to a temporary
            let mut temp = self.store.get(idx).clone();
            temp.set_data_type(data_type);
            temp.line_data = match data_type {
                DataType::Ascii => LineData::Ascii(self.ascii_ranges_for(&temp)),
                _ => LineData::None
            };
            temp.processed = false;
            temp.line_count = self.block_line_count(&temp);
            // 3. notify with metadata before the change lands
            let delta = temp.line_count as isize - old_line_count as isize;
            if delta != 0 {
                let first = match delta > 0 {
                    true => line0 + old_line_count,
                    false => ((line0 + old_line_count) as isize + delta) as usize
                };
                self.notify_pre_line(first,delta);
            }
            // 4. commit
            *self.store.get_mut(idx) = temp;
            if delta != 0 {
                self.store.mark_dirty(idx + 1);
                self.notify_post_line(None,delta);
            }
            affected.push(address);
        }

        for address in affected {
            let idx = self.store.find_by_address(address);
            self.rebuild_block_references(idx);
        }
        Ok(())
    }

    /// Recompute a block's cached uncertain references and fire the observer
    /// if the list changed.
    pub(crate) fn rebuild_block_references(&mut self,idx: usize) {
        let (address,length,data_type,old_type) = {
            let block = self.store.get(idx);
            (block.address,block.length,block.data_type,block.old_data_type)
        };
        let new_refs = match data_type {
            DataType::Code => self.locate_uncertain_code_references(idx),
            _ => self.locate_uncertain_data_references(idx)
        };
        if self.store.get(idx).references.as_ref() != Some(&new_refs) {
            self.store.get_mut(idx).references = Some(new_refs);
            self.notify_uncertain(old_type,data_type,address,length);
        }
    }

    /// Prime every block's uncertain-reference cache.  Only binary projects
    /// get this at load; executables fill in as retypes touch blocks.
    pub(crate) fn cache_uncertain_references(&mut self) {
        if !self.binary_file {
            return;
        }
        for idx in 0..self.store.len() {
            let refs = match self.store.get(idx).data_type {
                DataType::Code => self.locate_uncertain_code_references(idx),
                _ => self.locate_uncertain_data_references(idx)
            };
            self.store.get_mut(idx).references = Some(refs);
        }
    }

    fn log_load_stats(&self) {
        let mut num_code_blocks = 0;
        let mut num_code_bytes = 0;
        for block in self.store.blocks() {
            if block.data_type == DataType::Code {
                num_code_bytes += block.length;
                num_code_blocks += 1;
            }
        }
        debug!("initial result, code bytes: {}, code blocks: {}",num_code_bytes,num_code_blocks);
    }
}

/// The two relocation views: patched values and patched positions.
pub(crate) fn relocation_sets(types: crate::loader::DataTypes,segments: &[Segment]) -> (HashSet<u32>,Vec<BitVec>) {
    let mut relocated: HashSet<u32> = HashSet::new();
    let mut relocatable: Vec<BitVec> = Vec::new();
    for seg in segments {
        let mut bits = BitVec::from_elem(seg.length,false);
        for offset in &seg.relocations {
            bits.set(*offset,true);
            if let Some(val) = types.uint32_value(&seg.data,*offset) {
                relocated.insert(val);
            }
        }
        relocatable.push(bits);
    }
    (relocated,relocatable)
}

fn make_address_ranges(segments: &[Segment]) -> Vec<AddressRange> {
    let mut ranges: Vec<AddressRange> = Vec::new();
    for seg in segments {
        let first = seg.address;
        let last = seg.end_address() - 1;
        let mut merged = false;
        for range in ranges.iter_mut() {
            if range.last + 1 == first {
                range.last = last;
                range.segment_ids.push(seg.id);
                merged = true;
                break;
            }
            if last + 1 == range.first {
                range.first = first;
                range.segment_ids.push(seg.id);
                merged = true;
                break;
            }
        }
        if !merged {
            ranges.push(AddressRange { first, last, segment_ids: vec![seg.id] });
        }
    }
    ranges.sort_by_key(|r| r.first);
    ranges
}
