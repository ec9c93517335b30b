//! Line counting, address/line translation, and column rendering.
//!
//! The line view is derived entirely from block state.  Each block renders as
//! header + body + footer: an optional two-line section header, one line per
//! body slot (instruction, EQU, comment, numeric unit, or character range),
//! then trailing label lines for just-past-the-segment addresses, an optional
//! inter-segment blank, and at the very end of the image a blank plus `END`.
//!
//! Counts are cached per block and the per-block first-line array is
//! recomputed lazily from the store's dirty cursor, so mutations stay cheap
//! and queries pay only for what changed.

use hex::ToHex;
use log::error;
use crate::arch::Instruction;
use super::Project;
use super::ascii::byte_representation;
use super::blocks::{Block,CodeEntry,DataType};

pub(crate) const SEGMENT_HEADER_LINE_COUNT: usize = 2;

/// annotations render only in debug builds
const ANNOTATE: bool = cfg!(debug_assertions);

/// The columns of one rendered line.
#[derive(Clone,Copy,PartialEq,Debug)]
pub enum Column {
    Offset,
    Bytes,
    Label,
    Instruction,
    Operands,
    Annotations
}

/// Greedy width decomposition of a numeric block: (size letter, unit bytes,
/// unit count, rendered lines) per used width.
pub(crate) fn data_type_sizes(block: &Block) -> Vec<(char,usize,usize,usize)> {
    let size_types: &[(char,usize)] = match block.data_type {
        DataType::Longword => &[('L',4),('W',2),('B',1)],
        DataType::Word => &[('W',2),('B',1)],
        DataType::Byte => &[('B',1)],
        _ => return Vec::new()
    };
    let mut sizes: Vec<(char,usize,usize,usize)> = Vec::new();
    let mut unconsumed = block.length;
    for (size_char,num_bytes) in size_types {
        let size_count = unconsumed / num_bytes;
        if size_count == 0 {
            continue;
        }
        // an allocated run aggregates to a single line per width
        let size_lines = match block.alloc {
            true => 1,
            false => size_count
        };
        sizes.push((*size_char,*num_bytes,size_count,size_lines));
        unconsumed -= size_count * num_bytes;
    }
    sizes
}

impl Project {
    pub(crate) fn block_header_line_count(&self,block: &Block) -> usize {
        match block.segment_offset == 0 && self.system.has_segment_headers() {
            true => SEGMENT_HEADER_LINE_COUNT,
            false => 0
        }
    }

    pub(crate) fn instruction_line_count(&self,instruction: &Instruction) -> usize {
        let mut count = 1;
        if self.display.trailing_line_trap && instruction.key == "TRAP" {
            count += 1;
        } else if self.display.trailing_line_branch && matches!(instruction.key,"Bcc" | "DBcc") {
            count += 1;
        }
        count
    }

    /// Pure line count of a block in its current state; also correct for
    /// temporary copies that are not in the store.
    pub(crate) fn block_line_count(&self,block: &Block) -> usize {
        let mut count = self.block_header_line_count(block);
        match block.data_type {
            DataType::Code => {
                for entry in block.code_entries() {
                    match entry {
                        CodeEntry::Instruction(slot) => match self.decode_slot(block,slot) {
                            Ok(m) => count += self.instruction_line_count(&m),
                            Err(e) => {
                                error!("counting lines at ${:06X}: {}",block.address,e);
                                count += 1;
                            }
                        },
                        _ => count += 1
                    }
                }
            },
            DataType::Ascii => count += block.ascii_ranges().len(),
            _ => {
                for (_size_char,_num_bytes,_size_count,size_lines) in data_type_sizes(block) {
                    count += size_lines;
                }
            }
        }
        let seg = &self.segments[block.segment_id];
        if block.segment_offset + block.length == seg.length {
            if let Some(addresses) = self.post_segment_addresses.get(&block.segment_id) {
                count += addresses.len();
            }
        }
        count + self.block_footer_line_count(block)
    }

    pub(crate) fn block_footer_line_count(&self,block: &Block) -> usize {
        let seg = &self.segments[block.segment_id];
        if block.segment_offset + block.length == seg.length {
            return match block.segment_id < self.segments.len() - 1 {
                true => 1,
                false => 0
            };
        }
        if block.data_type == DataType::Code && self.display.trailing_line_exit {
            if let Some(CodeEntry::Instruction(slot)) = block.code_entries().last() {
                if let Ok(m) = self.decode_slot(block,slot) {
                    if self.arch.is_final_instruction(&m) {
                        return 1;
                    }
                }
            }
        }
        0
    }

    pub(crate) fn file_footer_line_count(&self) -> usize {
        match self.store.len() {
            0 => 0,
            n => match self.block_footer_line_count(self.store.get(n-1)) > 0 {
                true => 1,
                false => 2
            }
        }
    }

    fn block_line_count_cached_ref(&self,block: &Block) -> usize {
        match block.line_count {
            0 => self.block_line_count(block),
            n => n
        }
    }

    pub(crate) fn cached_line_count(&mut self,idx: usize) -> usize {
        if self.store.get(idx).line_count != 0 {
            return self.store.get(idx).line_count;
        }
        let count = self.block_line_count(self.store.get(idx));
        self.store.get_mut(idx).line_count = count;
        count
    }

    /// Bring the first-line array up to date from the dirty cursor onward.
    pub(crate) fn recalculate_line_numbers(&mut self) {
        let dirty = match self.store.dirty_from() {
            Some(d) => d,
            None => return
        };
        let mut start = match dirty {
            0 => 0,
            d => self.store.line0(d-1) + self.cached_line_count(d-1)
        };
        for i in dirty..self.store.len() {
            self.store.set_line0(i,start);
            start += self.cached_line_count(i);
        }
        self.store.clear_dirty();
    }

    pub(crate) fn block_line_number(&mut self,idx: usize) -> usize {
        self.recalculate_line_numbers();
        self.store.line0(idx)
    }

    pub(crate) fn lookup_block_by_line(&mut self,line: usize) -> usize {
        self.recalculate_line_numbers();
        self.store.find_by_line(line)
    }

    /// Total number of lines in the rendered file, 0 being the first.
    pub fn file_line_count(&mut self) -> usize {
        if self.store.len() == 0 {
            return 0;
        }
        self.recalculate_line_numbers();
        let last = self.store.len() - 1;
        self.store.line0(last) + self.cached_line_count(last) + self.file_footer_line_count()
    }

    /// Line and decoded match of the instruction containing an address; a
    /// location-relative EQU entry claims its own address exactly.
    pub(crate) fn code_block_info_for_address(&mut self,address: u32) -> Option<(usize,Instruction)> {
        let idx = self.store.find_by_address(address);
        let mut line_number = self.block_line_number(idx);
        let block = self.store.get(idx);
        let base = block.address;
        line_number += self.block_header_line_count(block);
        let mut bytes_used: usize = 0;
        let mut previous: Option<(usize,Instruction)> = None;
        for entry in block.code_entries() {
            match entry {
                CodeEntry::Instruction(slot) => {
                    // within but not at the start of the previous instruction
                    if address < base + bytes_used as u32 {
                        return previous;
                    }
                    let m = match self.decode_slot(block,slot) {
                        Ok(m) => m,
                        Err(_) => return previous
                    };
                    let current = (line_number,m);
                    if address == base + bytes_used as u32 {
                        return Some(current);
                    }
                    bytes_used += current.1.num_bytes;
                    line_number += self.instruction_line_count(&current.1);
                    previous = Some(current);
                },
                CodeEntry::LocationRelativeEqu(offset) => {
                    if base + *offset as u32 == address {
                        if let Some((_prev_line,m)) = &previous {
                            return Some((line_number,m.clone()));
                        }
                    }
                    line_number += 1;
                },
                CodeEntry::FullLineComment(_) => line_number += 1
            }
        }
        if address < base + bytes_used as u32 {
            return previous;
        }
        None
    }

    /// Address and decoded match of the instruction on a line of a code block.
    pub(crate) fn code_block_info_for_line(&mut self,line: usize) -> Option<(u32,Instruction)> {
        let idx = self.lookup_block_by_line(line);
        let mut line_count = self.store.line0(idx);
        let block = self.store.get(idx);
        if block.data_type != DataType::Code {
            return None;
        }
        let base = block.address;
        line_count += self.block_header_line_count(block);
        let mut bytes_used: usize = 0;
        let mut previous: Option<(u32,Instruction)> = None;
        for entry in block.code_entries() {
            match entry {
                CodeEntry::Instruction(slot) => {
                    if line < line_count {
                        return previous;
                    }
                    let m = match self.decode_slot(block,slot) {
                        Ok(m) => m,
                        Err(_) => return previous
                    };
                    let current = (base + bytes_used as u32,m);
                    if line == line_count {
                        return Some(current);
                    }
                    bytes_used += current.1.num_bytes;
                    line_count += self.instruction_line_count(&current.1);
                    previous = Some(current);
                },
                CodeEntry::LocationRelativeEqu(offset) => {
                    if line == line_count {
                        if let Some((_addr,m)) = &previous {
                            return Some((base + *offset as u32,m.clone()));
                        }
                        return None;
                    }
                    line_count += 1;
                },
                CodeEntry::FullLineComment(_) => {
                    if line == line_count {
                        if let Some((_addr,m)) = &previous {
                            return Some((base + bytes_used as u32,m.clone()));
                        }
                        return None;
                    }
                    line_count += 1;
                }
            }
        }
        if line < line_count {
            return previous;
        }
        None
    }

    /// The line number displaying an address, if the address is in the image.
    pub fn line_for_address(&mut self,address: u32) -> Option<usize> {
        if self.store.len() == 0 {
            return None;
        }
        let idx = self.store.find_by_address(address);
        if address < self.store.get(idx).address || address >= self.store.get(idx).end_address() {
            return None;
        }
        match self.store.get(idx).data_type {
            DataType::Code => self.code_block_info_for_address(address).map(|r| r.0),
            DataType::Ascii => {
                let mut line_n = self.block_line_number(idx);
                let block = self.store.get(idx);
                line_n += self.block_header_line_count(block);
                let address_offset = (address - block.address) as usize;
                let mut offset_n: usize = 0;
                for (_byte_offset,byte_length) in block.ascii_ranges() {
                    let offset0 = offset_n;
                    offset_n += byte_length;
                    let line0 = line_n;
                    line_n += 1;
                    if address_offset >= offset0 && address_offset < offset_n {
                        return Some(line0);
                    }
                }
                None
            },
            _ => {
                let mut line_n = self.block_line_number(idx);
                let block = self.store.get(idx);
                line_n += self.block_header_line_count(block);
                let address_offset = (address - block.address) as usize;
                let mut offset_n: usize = 0;
                for (_size_char,num_bytes,size_count,size_lines) in data_type_sizes(block) {
                    let offset0 = offset_n;
                    offset_n += num_bytes * size_count;
                    let line0 = line_n;
                    line_n += size_lines;
                    // return as soon as the width slice contains the address
                    if address_offset >= offset0 && address_offset < offset_n {
                        return Some(match block.alloc {
                            true => line0,
                            false => line0 + (address_offset - offset0) / num_bytes
                        });
                    }
                }
                None
            }
        }
    }

    /// The first address displayed on a line, if the line belongs to a block.
    pub fn address_for_line(&mut self,line: usize) -> Option<u32> {
        if self.store.len() == 0 {
            return None;
        }
        let idx = self.lookup_block_by_line(line);
        match self.store.get(idx).data_type {
            DataType::Code => self.code_block_info_for_line(line).map(|r| r.0),
            DataType::Ascii => {
                let mut line_n = self.store.line0(idx);
                let block = self.store.get(idx);
                line_n += self.block_header_line_count(block);
                let mut offset_n: usize = 0;
                for (_byte_offset,byte_length) in block.ascii_ranges() {
                    let offset0 = offset_n;
                    offset_n += byte_length;
                    let line0 = line_n;
                    line_n += 1;
                    if line >= line0 && line < line_n {
                        return Some(block.address + offset0 as u32);
                    }
                }
                None
            },
            _ => {
                let mut line_n = self.store.line0(idx);
                let block = self.store.get(idx);
                line_n += self.block_header_line_count(block);
                let mut offset_n: usize = 0;
                for (_size_char,num_bytes,size_count,size_lines) in data_type_sizes(block) {
                    let offset0 = offset_n;
                    offset_n += num_bytes * size_count;
                    let line0 = line_n;
                    line_n += size_lines;
                    if line >= line0 && line < line_n {
                        return Some(block.address + (offset0 + (line - line0) * num_bytes) as u32);
                    }
                }
                None
            }
        }
    }

    /// Addresses referred to by the instruction on a line that carry symbols.
    pub fn referenced_symbol_addresses_for_line(&mut self,line: usize) -> Vec<u32> {
        match self.code_block_info_for_line(line) {
            Some((_address,m)) => {
                let arch = self.arch.clone();
                let mut ans: Vec<u32> = arch.get_match_addresses(&m).keys()
                    .filter(|k| self.symbols_by_address.contains_key(k))
                    .copied().collect();
                ans.sort();
                ans
            },
            None => Vec::new()
        }
    }

    /// First non-code line searching block-wise from `line`, forward or back.
    pub fn next_data_line(&mut self,line: usize,forward: bool) -> Option<usize> {
        let mut idx = self.lookup_block_by_line(line) as isize;
        let step: isize = match forward {
            true => 1,
            false => -1
        };
        idx += step;
        while idx >= 0 && (idx as usize) < self.store.len() {
            if self.store.get(idx as usize).data_type != DataType::Code {
                return Some(self.block_line_number(idx as usize));
            }
            idx += step;
        }
        None
    }

    /// Render one column of one line.
    pub fn file_line(&mut self,line: usize,column: Column) -> String {
        self.recalculate_line_numbers();
        self.render_line(line,column)
    }

    fn render_line(&self,line: usize,column: Column) -> String {
        if self.store.len() == 0 {
            return String::new();
        }
        let idx = self.store.find_by_line(line);
        let block = self.store.get(idx);
        let line0 = self.store.line0(idx);
        let line_n = line0 + self.block_line_count_cached_ref(block);
        let seg = &self.segments[block.segment_id];

        // the first two lines of a segment may be the section header
        let mut leading: usize = 0;
        if block.segment_offset == 0 && self.system.has_segment_headers() {
            if line == line0 {
                let header = self.system.get_segment_header(&self.segments,block.segment_id);
                return match (column,header.find(' ')) {
                    (Column::Instruction,Some(i)) => header[..i].to_string(),
                    (Column::Instruction,None) => header,
                    (Column::Operands,Some(i)) => header[i+1..].to_string(),
                    _ => String::new()
                };
            }
            if line == line0 + 1 {
                return String::new();
            }
            leading = SEGMENT_HEADER_LINE_COUNT;
        }

        // trailing label lines and the inter-segment blank
        if block.segment_offset + block.length == seg.length {
            let empty: Vec<u32> = Vec::new();
            let addresses = self.post_segment_addresses.get(&block.segment_id).unwrap_or(&empty);
            let trailing = addresses.len() + match block.segment_id < self.segments.len() - 1 {
                true => 1,
                false => 0
            };
            if let Some(address_idx) = (line + trailing).checked_sub(line_n) {
                if address_idx < addresses.len() {
                    let address = addresses[address_idx];
                    return match column {
                        Column::Offset => format!("{:08X}",address),
                        Column::Label => self.symbol_for_address(address,None).unwrap_or_default(),
                        Column::Instruction => "EQU".to_string(),
                        Column::Operands => {
                            let last_address = seg.address + (block.segment_offset + block.length) as u32;
                            match address - last_address {
                                0 => "*".to_string(),
                                offset => format!("*+${:X}",offset)
                            }
                        },
                        _ => String::new()
                    };
                }
                if address_idx == addresses.len() && address_idx + 1 == trailing {
                    return String::new();
                }
            }
        }

        // the file footer is a blank separator and the END directive
        let last = self.store.len() - 1;
        let footer_line0 = self.store.line0(last) + self.block_line_count_cached_ref(self.store.get(last));
        let footer_count = self.file_footer_line_count();
        if footer_count == 2 && line == footer_line0 {
            return String::new();
        }
        if footer_count > 0 && line == footer_line0 + footer_count - 1 {
            return match column {
                Column::Instruction => "END".to_string(),
                _ => String::new()
            };
        }

        match block.data_type {
            DataType::Code => self.render_code_line(block,line,line0 + leading,column),
            DataType::Ascii => self.render_ascii_line(block,line,line0 + leading,column),
            _ => self.render_numeric_line(block,line,line0 + leading,column)
        }
    }

    fn render_code_line(&self,block: &Block,line: usize,mut line_count: usize,column: Column) -> String {
        let seg = &self.segments[block.segment_id];
        let mut offset0: usize = 0;
        let mut offset_n: usize = 0;
        let mut found: Option<(&CodeEntry,Option<Instruction>)> = None;
        for entry in block.code_entries() {
            let mut m: Option<Instruction> = None;
            if let CodeEntry::Instruction(slot) = entry {
                match self.decode_slot(block,slot) {
                    Ok(decoded) => {
                        offset_n += decoded.num_bytes;
                        m = Some(decoded);
                    },
                    Err(e) => {
                        error!("rendering at ${:06X}: {}",block.address,e);
                        return String::new();
                    }
                }
            }
            if line_count == line {
                found = Some((entry,m));
                break;
            }
            match &m {
                Some(m) => {
                    offset0 = offset_n;
                    line_count += self.instruction_line_count(m);
                },
                None => line_count += 1
            }
        }
        let (entry,m) = match found {
            Some(found) => found,
            // trailing blank lines within the block
            None => return String::new()
        };
        let mut address0 = block.address + offset0 as u32;
        let address_n = block.address + offset_n as u32;
        if let CodeEntry::LocationRelativeEqu(offset) = entry {
            address0 = seg.address + (block.segment_offset + offset) as u32;
        }
        let num_bytes = (address_n - address0) as usize;
        match column {
            Column::Offset => format!("{:08X}",address0),
            Column::Bytes => match entry {
                CodeEntry::Instruction(_) => {
                    let data_offset = block.segment_offset + offset0;
                    let bytes: String = (&seg.data[data_offset..data_offset+num_bytes]).encode_hex_upper();
                    bytes
                },
                _ => String::new()
            },
            Column::Label => self.symbol_for_address(address0,None).unwrap_or_default(),
            Column::Instruction => match entry {
                CodeEntry::Instruction(_) => self.arch.get_instruction_string(m.as_ref().expect(super::RCH)),
                CodeEntry::LocationRelativeEqu(_) => "EQU".to_string(),
                CodeEntry::FullLineComment(_) => String::new()
            },
            Column::Operands => match entry {
                CodeEntry::Instruction(_) => {
                    let m = m.as_ref().expect(super::RCH);
                    let lookup = |address: u32,absolute_info: Option<(u32,usize)>| self.symbol_for_address(address,absolute_info);
                    let mut ans = self.arch.get_operand_string(m,0,&lookup);
                    if m.operands.len() > 1 {
                        ans += ",";
                        ans += &self.arch.get_operand_string(m,1,&lookup);
                    }
                    ans
                },
                CodeEntry::LocationRelativeEqu(_) => format!("*-{}",num_bytes),
                CodeEntry::FullLineComment(text) => text.clone()
            },
            Column::Annotations => match (ANNOTATE,entry) {
                (true,CodeEntry::Instruction(_)) => m.as_ref().expect(super::RCH).key.to_string(),
                _ => String::new()
            }
        }
    }

    fn render_numeric_line(&self,block: &Block,line: usize,line_start: usize,column: Column) -> String {
        let seg = &self.segments[block.segment_id];
        let mut line_n = line_start;
        let mut offset_n = block.segment_offset;
        for (size_char,num_bytes,size_count,size_lines) in data_type_sizes(block) {
            let offset0 = offset_n;
            offset_n += num_bytes * size_count;
            let line0 = line_n;
            line_n += size_lines;
            if line < line0 || line >= line_n {
                continue;
            }
            let data_idx = offset0 + (line - line0) * num_bytes;
            return match column {
                Column::Offset => format!("{:08X}",seg.address + data_idx as u32),
                Column::Bytes => match block.alloc {
                    true => String::new(),
                    false => (&seg.data[data_idx..data_idx+num_bytes]).encode_hex_upper()
                },
                Column::Label => self.symbol_for_address(seg.address + data_idx as u32,None).unwrap_or_default(),
                Column::Instruction => {
                    let name = self.system.get_data_instruction_string(seg.is_bss,!block.alloc);
                    format!("{}.{}",name,size_char)
                },
                Column::Operands => {
                    if block.alloc {
                        return format!("{}",size_count);
                    }
                    let types = self.system.data_types();
                    let value = match num_bytes {
                        4 => types.uint32_value(&seg.data,data_idx),
                        2 => types.uint16_value(&seg.data,data_idx).map(|v| v as u32),
                        _ => types.uint8_value(&seg.data,data_idx).map(|v| v as u32)
                    };
                    let value = match value {
                        Some(value) => value,
                        None => return String::new()
                    };
                    // only substitute a symbol for a value that was relocated
                    let label = match num_bytes == 4 && self.relocated.contains(&value) {
                        true => self.symbol_for_address(value,None),
                        false => None
                    };
                    match label {
                        Some(label) => label,
                        None => format!("${:01$X}",value,num_bytes * 2)
                    }
                },
                Column::Annotations => match ANNOTATE {
                    true => "-".to_string(),
                    false => String::new()
                }
            };
        }
        String::new()
    }

    fn render_ascii_line(&self,block: &Block,line: usize,line_start: usize,column: Column) -> String {
        let seg = &self.segments[block.segment_id];
        let mut line_n = line_start;
        let mut offset_n = block.segment_offset;
        for (_byte_offset,byte_length) in block.ascii_ranges() {
            let offset0 = offset_n;
            offset_n += byte_length;
            let line0 = line_n;
            line_n += 1;
            if line < line0 || line >= line_n {
                continue;
            }
            let data_idx = offset0;
            return match column {
                Column::Offset => format!("{:08X}",seg.address + data_idx as u32),
                Column::Bytes => (&seg.data[data_idx..data_idx+byte_length]).encode_hex_upper(),
                Column::Label => self.symbol_for_address(seg.address + data_idx as u32,None).unwrap_or_default(),
                Column::Instruction => {
                    let name = self.system.get_data_instruction_string(seg.is_bss,true);
                    format!("{}.B",name)
                },
                Column::Operands => {
                    let mut ans = String::new();
                    let mut in_string = false;
                    let mut any = false;
                    for byte in &seg.data[data_idx..data_idx+byte_length] {
                        if *byte >= 32 && *byte < 127 {
                            // displayable characters collect into one quoted run
                            if !in_string {
                                if any {
                                    ans += ",";
                                }
                                ans += "'";
                                in_string = true;
                            }
                            ans.push(*byte as char);
                        } else {
                            if in_string {
                                ans += "'";
                                in_string = false;
                                ans += ",";
                            } else if any {
                                ans += ",";
                            }
                            ans += &byte_representation(*byte);
                        }
                        any = true;
                    }
                    if in_string {
                        ans += "'";
                    }
                    ans
                },
                Column::Annotations => match ANNOTATE {
                    true => "-".to_string(),
                    false => String::new()
                }
            };
        }
        String::new()
    }
}
