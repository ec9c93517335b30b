//! Loader for raw binary images.
//!
//! A raw binary carries no segment table, relocations, or symbols, so the
//! caller supplies the load address and the entry offset.  Projects built
//! this way are marked binary, which loosens the evidence rules for turning
//! numeric values into labels: absence of relocation data means every
//! plausible pointer has to be judged by whether it was actually referenced.

use super::{Segment,System,Image,DataTypes,Endian};

pub struct BinaryOptions {
    pub load_address: u32,
    pub entrypoint_offset: usize,
    pub endian: Endian
}

impl BinaryOptions {
    pub fn new() -> Self {
        Self {
            load_address: 0x1000,
            entrypoint_offset: 0,
            endian: Endian::Big
        }
    }
}

pub struct Binary {
    endian: Endian,
    load_address: u32,
    entrypoint_offset: usize
}

/// A raw binary always loads: one segment at the requested address.
pub fn image(data: &Vec<u8>,options: &BinaryOptions) -> Image {
    let segment = Segment {
        id: 0,
        address: options.load_address,
        data: data.clone(),
        length: data.len(),
        is_bss: false,
        relocations: Vec::new(),
        symbols: Vec::new()
    };
    Image {
        system: Box::new(Binary {
            endian: options.endian,
            load_address: options.load_address,
            entrypoint_offset: options.entrypoint_offset
        }),
        segments: vec![segment],
        entrypoint_segment_id: 0,
        entrypoint_offset: options.entrypoint_offset
    }
}

impl System for Binary {
    fn system_name(&self) -> &str {
        "binary"
    }
    fn arch_name(&self) -> &str {
        "m68k"
    }
    fn data_types(&self) -> DataTypes {
        DataTypes { endian: self.endian }
    }
    fn has_segment_headers(&self) -> bool {
        false
    }
    fn get_segment_header(&self,_segments: &[Segment],_segment_id: usize) -> String {
        String::new()
    }
    fn get_data_instruction_string(&self,_is_bss: bool,with_file_data: bool) -> &'static str {
        match with_file_data {
            true => "DC",
            false => "DS"
        }
    }
    fn internal_data(&self) -> serde_json::Value {
        serde_json::json!({
            "load_address": self.load_address,
            "entrypoint_offset": self.entrypoint_offset,
            "endian": match self.endian { Endian::Big => "big", Endian::Little => "little" }
        })
    }
    fn is_binary(&self) -> bool {
        true
    }
}
