//! Shared fixtures for the analysis tests.
//!
//! Projects are built over hand-assembled 68000 byte images with a minimal
//! test system, so every test controls exactly what the loader would have
//! delivered: segment shapes, symbols, relocations, and the entry point.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use crate::arch::m68k::M68k;
use crate::loader::{DataTypes,Endian,Image,Segment,System};
use super::{Project,ProjectObserver,WorkState};
use super::blocks::DataType;

mod lines_test;
mod retype_test;

pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct TestSystem {
    pub headers: bool,
    pub binary: bool
}

impl System for TestSystem {
    fn system_name(&self) -> &str {
        "test"
    }
    fn arch_name(&self) -> &str {
        "m68k"
    }
    fn data_types(&self) -> DataTypes {
        DataTypes { endian: Endian::Big }
    }
    fn has_segment_headers(&self) -> bool {
        self.headers
    }
    fn get_segment_header(&self,segments: &[Segment],segment_id: usize) -> String {
        format!("SECTION seg{:06X}, CODE",segments[segment_id].address)
    }
    fn get_data_instruction_string(&self,_is_bss: bool,with_file_data: bool) -> &'static str {
        match with_file_data {
            true => "DC",
            false => "DS"
        }
    }
    fn is_binary(&self) -> bool {
        self.binary
    }
}

/// file-backed segment with an optional uninitialized tail
pub fn segment(id: usize,address: u32,hex: &str,extra: usize) -> Segment {
    let data = hex::decode(hex).expect("hex error");
    let length = data.len() + extra;
    Segment {
        id,
        address,
        data,
        length,
        is_bss: false,
        relocations: Vec::new(),
        symbols: Vec::new()
    }
}

pub fn project_with(segments: Vec<Segment>,headers: bool,binary: bool,entrypoint_offset: usize) -> Project {
    init_log();
    let image = Image {
        system: Box::new(TestSystem { headers, binary }),
        segments,
        entrypoint_segment_id: 0,
        entrypoint_offset
    };
    Project::new(&Vec::new(),image,Arc::new(M68k::new()),"test",None).expect("project build failed")
}

pub fn project(segments: Vec<Segment>,entrypoint_offset: usize) -> Project {
    project_with(segments,false,false,entrypoint_offset)
}

#[derive(Default)]
pub struct EventLog {
    pub symbols: Vec<(u32,String)>,
    pub pre: Vec<(usize,isize)>,
    pub post: Vec<(Option<usize>,isize)>,
    pub uncertain: Vec<(DataType,DataType,u32,usize)>
}

pub struct Recorder(pub Rc<RefCell<EventLog>>);

impl ProjectObserver for Recorder {
    fn symbol_inserted(&mut self,address: u32,name: &str) {
        self.0.borrow_mut().symbols.push((address,name.to_string()));
    }
    fn pre_line_change(&mut self,line0: usize,delta: isize) {
        self.0.borrow_mut().pre.push((line0,delta));
    }
    fn post_line_change(&mut self,line0: Option<usize>,delta: isize) {
        self.0.borrow_mut().post.push((line0,delta));
    }
    fn uncertain_references_changed(&mut self,old_type: DataType,new_type: DataType,address: u32,length: usize) {
        self.0.borrow_mut().uncertain.push((old_type,new_type,address,length));
    }
}

pub fn recorder() -> (Rc<RefCell<EventLog>>,Box<Recorder>) {
    let log = Rc::new(RefCell::new(EventLog::default()));
    (log.clone(),Box::new(Recorder(log)))
}

/// unwinds after a fixed number of polls
pub struct CancelAfter {
    pub polls: usize,
    pub count: usize
}

impl WorkState for CancelAfter {
    fn check_exit_update(&mut self,_fraction: f32,_status: &str) -> bool {
        self.count += 1;
        self.count > self.polls
    }
}

/// every byte of every segment is in exactly one block, blocks are contiguous
/// and never empty, and allocated blocks are numeric
pub fn assert_partition(p: &Project) {
    let mut idx = 0;
    for seg in &p.segments {
        let mut cursor = seg.address;
        while cursor < seg.end_address() {
            let block = p.store.get(idx);
            assert_eq!(block.address,cursor,"block does not start where the previous ended");
            assert_eq!(block.segment_id,seg.id);
            assert!(block.length > 0,"empty block at {:06X}",block.address);
            if block.alloc {
                assert!(block.data_type.is_numeric(),"allocated block with non-numeric type");
            }
            cursor += block.length as u32;
            idx += 1;
        }
        assert_eq!(cursor,seg.end_address(),"blocks overrun the segment");
    }
    assert_eq!(idx,p.store.len(),"stray blocks outside the segments");
}

/// the sum of per-block counts plus the file footer is the file line count
pub fn assert_line_counts(p: &mut Project) {
    let total = p.file_line_count();
    let mut sum = p.file_footer_line_count();
    for i in 0..p.store.len() {
        sum += p.block_line_count(p.store.get(i));
    }
    assert_eq!(total,sum);
}
