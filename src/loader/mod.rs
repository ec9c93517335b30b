//! # Loader Module
//!
//! Loader modules turn a byte stream into segments the analysis core can work
//! with.  There is a sub-module for each supported executable format.
//!
//! A format is represented by the `System` trait.  The trait object answers the
//! questions the line renderer asks of a format: whether named section headers
//! exist, how a data line is spelled (`DC`/`DS`/`DX`), and how to read integers
//! of the format's endianness.  Parsing produces an `Image`, which owns the
//! segments (bytes already relocated), the entry point, and the system object.
//!
//! Relocations are applied at load time; what remains visible afterward is the
//! list of patched byte offsets per segment and, downstream in the project, the
//! set of patched values.  Those two sets are the authoritative evidence of
//! pointer-ness used when labels are substituted for numeric values.

pub mod amiga;
pub mod binary;

use log::warn;
use crate::DYNERR;

/// Enumerates loader errors.  The `Display` trait will print the equivalent
/// long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("image format not recognized")]
    ImageFormatMismatch,
    #[error("image data ends unexpectedly")]
    ImageCorrupt,
    #[error("substitute file does not match the project")]
    ChecksumMismatch
}

#[derive(Clone,Copy,PartialEq,Debug)]
pub enum Endian {
    Big,
    Little
}

/// Primitive integer readers with the endianness of the loaded system.
#[derive(Clone,Copy)]
pub struct DataTypes {
    pub endian: Endian
}

impl DataTypes {
    pub fn uint8_value(&self,data: &[u8],idx: usize) -> Option<u8> {
        data.get(idx).copied()
    }
    pub fn uint16_value(&self,data: &[u8],idx: usize) -> Option<u16> {
        if idx + 2 > data.len() {
            return None;
        }
        let bytes = [data[idx],data[idx+1]];
        Some(match self.endian {
            Endian::Big => u16::from_be_bytes(bytes),
            Endian::Little => u16::from_le_bytes(bytes)
        })
    }
    pub fn uint32_value(&self,data: &[u8],idx: usize) -> Option<u32> {
        if idx + 4 > data.len() {
            return None;
        }
        let bytes = [data[idx],data[idx+1],data[idx+2],data[idx+3]];
        Some(match self.endian {
            Endian::Big => u32::from_be_bytes(bytes),
            Endian::Little => u32::from_le_bytes(bytes)
        })
    }
    pub fn put_uint32(&self,data: &mut [u8],idx: usize,val: u32) {
        let bytes = match self.endian {
            Endian::Big => val.to_be_bytes(),
            Endian::Little => val.to_le_bytes()
        };
        data[idx..idx+4].copy_from_slice(&bytes);
    }
}

/// One contiguous region of the loaded image.  `data` holds the file-backed
/// bytes with relocations already applied; `length` may exceed `data.len()`,
/// in which case the excess is uninitialized space.
pub struct Segment {
    pub id: usize,
    /// flat address of the first byte
    pub address: u32,
    pub data: Vec<u8>,
    /// total length including any uninitialized tail
    pub length: usize,
    pub is_bss: bool,
    /// offsets of the 32-bit fields patched by relocation
    pub relocations: Vec<usize>,
    /// known symbols as (offset, name)
    pub symbols: Vec<(usize,String)>
}

impl Segment {
    pub fn data_length(&self) -> usize {
        self.data.len()
    }
    pub fn end_address(&self) -> u32 {
        self.address + self.length as u32
    }
}

pub trait System {
    fn system_name(&self) -> &str;
    fn arch_name(&self) -> &str;
    fn data_types(&self) -> DataTypes;
    fn has_segment_headers(&self) -> bool;
    /// Directive plus remainder, split at the first space by the renderer.
    fn get_segment_header(&self,segments: &[Segment],segment_id: usize) -> String;
    /// `DC` when file bytes back the line, otherwise the format's way of
    /// spelling reserved space.
    fn get_data_instruction_string(&self,is_bss: bool,with_file_data: bool) -> &'static str;
    /// Opaque state a saved project stores so the system can be rebuilt.
    fn internal_data(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
    /// Raw binaries get looser symbol gating than relocatable executables.
    fn is_binary(&self) -> bool {
        false
    }
}

/// The product of loading: the system object plus the segments it found.
pub struct Image {
    pub system: Box<dyn System>,
    pub segments: Vec<Segment>,
    pub entrypoint_segment_id: usize,
    pub entrypoint_offset: usize
}

impl Image {
    pub fn entrypoint_address(&self) -> u32 {
        self.segments[self.entrypoint_segment_id].address + self.entrypoint_offset as u32
    }
}

/// Given a bytestream return an Image, or Err if the bytestream cannot be
/// interpreted as any known executable format.  Raw binaries are not tried
/// here since they match anything; use `binary::image` directly.
pub fn load_image(data: &Vec<u8>) -> Result<Image,DYNERR> {
    if let Some(image) = amiga::Amiga::from_bytes(data) {
        log::info!("identified hunk executable");
        return Ok(image);
    }
    warn!("cannot match any executable format");
    Err(Box::new(Error::ImageFormatMismatch))
}
