//! Loader for Amiga hunk executables.
//!
//! Parses the load-file subset of the hunk format: a header with the segment
//! size table, then code/data/bss hunks with their 32-bit relocation and
//! symbol blocks.  Segments are placed contiguously in a flat address space
//! and relocations are patched in place during loading, recording both the
//! patched positions and the patched values for the analysis layer.

use log::{debug,warn};
use super::{Segment,System,Image,DataTypes,Endian};

pub const HUNK_NAME: u32 = 0x3E8;
pub const HUNK_CODE: u32 = 0x3E9;
pub const HUNK_DATA: u32 = 0x3EA;
pub const HUNK_BSS: u32 = 0x3EB;
pub const HUNK_RELOC32: u32 = 0x3EC;
pub const HUNK_SYMBOL: u32 = 0x3F0;
pub const HUNK_DEBUG: u32 = 0x3F1;
pub const HUNK_END: u32 = 0x3F2;
pub const HUNK_HEADER: u32 = 0x3F3;

const MEMF_MASK: u32 = 0xC0000000;
const MEMF_CHIP: u32 = 0x40000000;
const MEMF_FAST: u32 = 0x80000000;

/// flat placement address of the first segment
const LOAD_ADDRESS: u32 = 0x1000;

fn take(data: &[u8],ptr: &mut usize) -> Option<u32> {
    if *ptr + 4 > data.len() {
        return None;
    }
    let val = u32::from_be_bytes([data[*ptr],data[*ptr+1],data[*ptr+2],data[*ptr+3]]);
    *ptr += 4;
    Some(val)
}

pub struct Amiga {
    kinds: Vec<u32>,
    memf: Vec<u32>
}

impl Amiga {
    /// Parse a hunk executable, or None if the magic longword is absent or
    /// the stream is inconsistent with its own header.
    pub fn from_bytes(data: &Vec<u8>) -> Option<Image> {
        let mut ptr: usize = 0;
        if take(data,&mut ptr)? != HUNK_HEADER {
            return None;
        }
        // resident library names, not expected in a load file, skip if present
        loop {
            let n = take(data,&mut ptr)? as usize;
            if n == 0 {
                break;
            }
            ptr += n * 4;
        }
        let _table_size = take(data,&mut ptr)?;
        let first = take(data,&mut ptr)? as usize;
        let last = take(data,&mut ptr)? as usize;
        if last < first {
            warn!("hunk table range is inverted");
            return None;
        }
        let count = last - first + 1;
        let mut total_lengths: Vec<usize> = Vec::new();
        let mut memf: Vec<u32> = Vec::new();
        for _i in 0..count {
            let val = take(data,&mut ptr)?;
            if val & MEMF_MASK == MEMF_MASK {
                // extended attributes occupy one more longword
                take(data,&mut ptr)?;
            }
            memf.push(val & MEMF_MASK);
            total_lengths.push(((val & 0x3FFFFFFF) as usize) * 4);
        }
        // assign flat addresses up front so relocations can be patched in one pass
        let mut addresses: Vec<u32> = Vec::new();
        let mut next = LOAD_ADDRESS;
        for i in 0..count {
            addresses.push(next);
            next += total_lengths[i] as u32;
        }
        let mut kinds: Vec<u32> = Vec::new();
        let mut segments: Vec<Segment> = Vec::new();
        let mut relocs: Vec<Vec<(usize,usize)>> = Vec::new();
        while segments.len() < count {
            let id = segments.len();
            let kind = take(data,&mut ptr)? & 0x3FFFFFFF;
            match kind {
                HUNK_NAME => {
                    let n = take(data,&mut ptr)? as usize;
                    ptr += n * 4;
                    continue;
                },
                HUNK_CODE | HUNK_DATA | HUNK_BSS => {},
                _ => {
                    warn!("expected a code, data, or bss hunk, found {:X}",kind);
                    return None;
                }
            }
            let n = take(data,&mut ptr)? as usize;
            let bytes = match kind {
                HUNK_BSS => Vec::new(),
                _ => {
                    if ptr + n * 4 > data.len() {
                        return None;
                    }
                    let bytes = data[ptr..ptr+n*4].to_vec();
                    ptr += n * 4;
                    bytes
                }
            };
            let mut segment = Segment {
                id,
                address: addresses[id],
                data: bytes,
                length: total_lengths[id].max(match kind { HUNK_BSS => n * 4, _ => 0 }),
                is_bss: kind == HUNK_BSS,
                relocations: Vec::new(),
                symbols: Vec::new()
            };
            let mut seg_relocs: Vec<(usize,usize)> = Vec::new();
            // trailing blocks belonging to this hunk
            loop {
                let block = match take(data,&mut ptr) {
                    Some(block) => block & 0x3FFFFFFF,
                    None => break
                };
                match block {
                    HUNK_RELOC32 => {
                        loop {
                            let n = take(data,&mut ptr)? as usize;
                            if n == 0 {
                                break;
                            }
                            let target_hunk = take(data,&mut ptr)? as usize;
                            for _j in 0..n {
                                let offset = take(data,&mut ptr)? as usize;
                                seg_relocs.push((offset,target_hunk));
                            }
                        }
                    },
                    HUNK_SYMBOL => {
                        loop {
                            let n = take(data,&mut ptr)? as usize;
                            if n == 0 {
                                break;
                            }
                            if ptr + n * 4 > data.len() {
                                return None;
                            }
                            let raw = data[ptr..ptr+n*4].to_vec();
                            ptr += n * 4;
                            let name: String = raw.iter().take_while(|b| **b != 0).map(|b| *b as char).collect();
                            let offset = take(data,&mut ptr)? as usize;
                            segment.symbols.push((offset,name));
                        }
                    },
                    HUNK_DEBUG => {
                        let n = take(data,&mut ptr)? as usize;
                        ptr += n * 4;
                    },
                    HUNK_END => break,
                    _ => {
                        // start of the next hunk
                        ptr -= 4;
                        break;
                    }
                }
            }
            debug!("hunk {}: kind {:X}, {} data bytes, {} total",id,kind,segment.data_length(),segment.length);
            kinds.push(kind);
            relocs.push(seg_relocs);
            segments.push(segment);
        }
        // patch the relocated longwords now that every hunk has an address
        let types = DataTypes { endian: Endian::Big };
        for i in 0..segments.len() {
            for (offset,target_hunk) in &relocs[i] {
                if *target_hunk >= segments.len() {
                    warn!("relocation target hunk {} does not exist",target_hunk);
                    continue;
                }
                let base = addresses[*target_hunk];
                match types.uint32_value(&segments[i].data,*offset) {
                    Some(val) => {
                        types.put_uint32(&mut segments[i].data,*offset,val + base);
                        segments[i].relocations.push(*offset);
                    },
                    None => warn!("relocation offset {:X} outside hunk {}",offset,i)
                }
            }
            segments[i].relocations.sort();
        }
        Some(Image {
            system: Box::new(Self { kinds, memf }),
            segments,
            entrypoint_segment_id: 0,
            entrypoint_offset: 0
        })
    }
}

impl System for Amiga {
    fn system_name(&self) -> &str {
        "amiga"
    }
    fn arch_name(&self) -> &str {
        "m68k"
    }
    fn data_types(&self) -> DataTypes {
        DataTypes { endian: Endian::Big }
    }
    fn has_segment_headers(&self) -> bool {
        true
    }
    fn get_segment_header(&self,segments: &[Segment],segment_id: usize) -> String {
        let mut s = format!("SECTION name{:06X}",segments[segment_id].address);
        match self.kinds.get(segment_id) {
            Some(&HUNK_DATA) => s += ", DATA",
            Some(&HUNK_CODE) => s += ", CODE",
            Some(&HUNK_BSS) => s += ", BSS",
            _ => {}
        }
        match self.memf.get(segment_id) {
            Some(&MEMF_CHIP) => s += ", CHIP",
            Some(&MEMF_FAST) => s += ", FAST",
            _ => {}
        }
        s
    }
    fn get_data_instruction_string(&self,is_bss: bool,with_file_data: bool) -> &'static str {
        if with_file_data {
            return "DC";
        }
        if is_bss {
            return "DS";
        }
        "DX"
    }
    fn internal_data(&self) -> serde_json::Value {
        serde_json::json!({
            "kinds": self.kinds,
            "memf": self.memf
        })
    }
}
