//! Typed blocks and the ordered store that partitions the address space.
//!
//! Every byte of every segment belongs to exactly one block, blocks never
//! cross segment boundaries, and consecutive blocks in a segment are
//! contiguous.  The store keeps two parallel arrays next to the blocks, one
//! of first addresses and one of first line numbers, purely so lookups can
//! bisect; the line-number array is recomputed lazily from a dirty cursor.

use num_derive::FromPrimitive;
use crate::arch::Instruction;

#[derive(Clone,Copy,PartialEq,Debug,FromPrimitive)]
pub enum DataType {
    Code = 1,
    Ascii = 2,
    Byte = 3,
    Word = 4,
    Longword = 5
}

impl DataType {
    pub fn is_numeric(&self) -> bool {
        matches!(self,DataType::Byte | DataType::Word | DataType::Longword)
    }
    /// letter used in synthesized labels such as `lbC001000`
    pub fn label_prefix(&self) -> char {
        match self {
            DataType::Code => 'C',
            DataType::Ascii => 'A',
            DataType::Byte => 'B',
            DataType::Word => 'W',
            DataType::Longword => 'L'
        }
    }
}

/// An instruction entry is either a decoded match or the block offset where
/// one can be decoded on demand (the form restored projects start with).
#[derive(Clone,Debug)]
pub enum InstructionSlot {
    Raw(usize),
    Decoded(Box<Instruction>)
}

#[derive(Clone,Debug)]
pub enum CodeEntry {
    Instruction(InstructionSlot),
    /// extra `EQU *-n` line for a label inside an instruction, value is the block offset
    LocationRelativeEqu(usize),
    FullLineComment(String)
}

#[derive(Clone,Debug)]
pub enum LineData {
    None,
    Code(Vec<CodeEntry>),
    /// (byte offset, byte length) per rendered line
    Ascii(Vec<(usize,usize)>)
}

/// A potential pointer noticed in a block, kept for the uncertain-reference
/// views.  `address` is where the value sits, `target` is what it points at.
#[derive(Clone,Debug,PartialEq)]
pub struct UncertainReference {
    pub address: u32,
    pub target: u32,
    pub code: String
}

#[derive(Clone,Debug)]
pub struct Block {
    pub segment_id: usize,
    /// offset of this block within its segment
    pub segment_offset: usize,
    /// flat address of the first byte
    pub address: u32,
    pub length: usize,
    pub data_type: DataType,
    /// not backed by file bytes
    pub alloc: bool,
    /// the discovery engine has visited this block
    pub processed: bool,
    pub line_data: LineData,
    /// cached; 0 means stale
    pub line_count: usize,
    pub references: Option<Vec<UncertainReference>>,
    /// data type prior to the most recent retype
    pub old_data_type: DataType
}

impl Block {
    pub fn new(segment_id: usize,segment_offset: usize,address: u32,length: usize,data_type: DataType,alloc: bool) -> Self {
        Self {
            segment_id,
            segment_offset,
            address,
            length,
            data_type,
            alloc,
            processed: false,
            line_data: LineData::None,
            line_count: 0,
            references: None,
            old_data_type: data_type
        }
    }
    pub fn set_data_type(&mut self,data_type: DataType) {
        self.old_data_type = self.data_type;
        self.data_type = data_type;
    }
    pub fn end_address(&self) -> u32 {
        self.address + self.length as u32
    }
    pub fn code_entries(&self) -> &[CodeEntry] {
        match &self.line_data {
            LineData::Code(entries) => entries,
            _ => &[]
        }
    }
    pub fn ascii_ranges(&self) -> &[(usize,usize)] {
        match &self.line_data {
            LineData::Ascii(ranges) => ranges,
            _ => &[]
        }
    }
}

pub struct BlockStore {
    blocks: Vec<Block>,
    addresses: Vec<u32>,
    line0s: Vec<usize>,
    dirty_from: Option<usize>
}

impl BlockStore {
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            addresses: Vec::new(),
            line0s: Vec::new(),
            dirty_from: Some(0)
        }
    }
    pub fn len(&self) -> usize {
        self.blocks.len()
    }
    pub fn get(&self,idx: usize) -> &Block {
        &self.blocks[idx]
    }
    pub fn get_mut(&mut self,idx: usize) -> &mut Block {
        &mut self.blocks[idx]
    }
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }
    pub fn push(&mut self,block: Block) {
        self.addresses.push(block.address);
        self.line0s.push(0);
        self.blocks.push(block);
        self.mark_dirty(self.blocks.len()-1);
    }
    pub fn insert(&mut self,idx: usize,block: Block) {
        self.addresses.insert(idx,block.address);
        self.line0s.insert(idx,0);
        self.blocks.insert(idx,block);
        self.mark_dirty(idx);
    }
    /// right-most block whose address does not exceed the lookup address
    pub fn find_by_address(&self,address: u32) -> usize {
        self.addresses.partition_point(|a| *a <= address).saturating_sub(1)
    }
    /// right-most block whose first line does not exceed the lookup line;
    /// only meaningful after the line index has been recomputed
    pub fn find_by_line(&self,line: usize) -> usize {
        self.line0s.partition_point(|n| *n <= line).saturating_sub(1)
    }
    pub fn line0(&self,idx: usize) -> usize {
        self.line0s[idx]
    }
    pub fn set_line0(&mut self,idx: usize,val: usize) {
        self.line0s[idx] = val;
    }
    pub fn dirty_from(&self) -> Option<usize> {
        self.dirty_from
    }
    pub fn clear_dirty(&mut self) {
        self.dirty_from = None;
    }
    pub fn mark_dirty(&mut self,idx: usize) {
        self.dirty_from = Some(match self.dirty_from {
            Some(prev) => prev.min(idx),
            None => idx
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(address: u32,length: usize) -> Block {
        Block::new(0,(address - 0x1000) as usize,address,length,DataType::Longword,false)
    }

    #[test]
    fn address_bisection() {
        let mut store = BlockStore::new();
        store.push(block(0x1000,4));
        store.push(block(0x1004,8));
        store.push(block(0x100C,2));
        assert_eq!(store.find_by_address(0x1000),0);
        assert_eq!(store.find_by_address(0x1003),0);
        assert_eq!(store.find_by_address(0x1004),1);
        assert_eq!(store.find_by_address(0x100B),1);
        assert_eq!(store.find_by_address(0x100D),2);
    }

    #[test]
    fn insertion_marks_dirty() {
        let mut store = BlockStore::new();
        store.push(block(0x1000,4));
        store.push(block(0x1008,4));
        store.clear_dirty();
        store.insert(1,block(0x1004,4));
        assert_eq!(store.dirty_from(),Some(1));
        assert_eq!(store.find_by_address(0x1005),1);
        store.mark_dirty(0);
        assert_eq!(store.dirty_from(),Some(0));
    }
}
