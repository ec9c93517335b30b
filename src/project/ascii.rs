//! Shaping of character blocks into rendered line ranges.
//!
//! A character block renders as one line per `(offset,length)` range.  Ranges
//! are bounded two ways: a NUL ends the string it terminates and flushes the
//! line, and a line flushes once its rendered width (quotes and commas
//! included) would pass 40 characters.

use super::Project;
use super::blocks::Block;

/// printable bytes collapse into quoted runs, the rest render as numbers
pub(crate) fn byte_representation(byte: u8) -> String {
    match byte < 16 {
        true => format!("{}",byte),
        false => format!("${:X}",byte)
    }
}

#[derive(PartialEq,Clone,Copy)]
enum LastValue {
    Char,
    Byte(u8)
}

impl Project {
    /// Walk a block's bytes producing the `(offset,length)` line ranges.
    pub(crate) fn ascii_ranges_for(&self,block: &Block) -> Vec<(usize,usize)> {
        let data = &self.segments[block.segment_id].data;
        let line_width_max: usize = 40;
        let mut ranges: Vec<(usize,usize)> = Vec::new();
        let mut consumed: usize = 0;
        let mut consumed0: usize = 0;
        let mut line_width: usize = 0;
        let mut last_value: Option<LastValue> = None;
        while consumed < block.length {
            let idx = block.segment_offset + consumed;
            let byte = match data.get(idx) {
                Some(byte) => *byte,
                None => break
            };
            let value;
            let mut char_line_width: usize = 0;
            let comma_separated;
            if byte >= 32 && byte < 127 {
                value = LastValue::Char;
                comma_separated = last_value != Some(LastValue::Char);
                if comma_separated {
                    // opening and closing quotes for this character and any appended to it
                    char_line_width += 2;
                }
                char_line_width += 1;
            } else {
                value = LastValue::Byte(byte);
                comma_separated = last_value.is_some();
                char_line_width += byte_representation(byte).len();
            }
            if comma_separated {
                char_line_width += 1;
            }
            consumed += 1;
            // a NUL terminates the string before it and flushes the line
            let force_new_line = byte == 0 && last_value != Some(LastValue::Byte(0));
            if line_width + char_line_width > line_width_max || force_new_line {
                ranges.push((consumed0,consumed - consumed0));
                consumed0 = consumed;
                line_width = char_line_width;
                last_value = None;
            } else {
                line_width += char_line_width;
                last_value = Some(value);
            }
        }
        if consumed != consumed0 {
            ranges.push((consumed0,consumed - consumed0));
        }
        ranges
    }

    pub(crate) fn reshape_ascii(&mut self,idx: usize) {
        let ranges = self.ascii_ranges_for(self.store.get(idx));
        self.store.get_mut(idx).line_data = super::blocks::LineData::Ascii(ranges);
    }
}
