//! Common test utilities shared between integration tests
#![allow(dead_code)]

use std::io::Write;
use std::sync::{Arc, Mutex};
use wasmjs::runtime::{Guest, HostError, Instance, LinearMemory, Value};

/// Captured writer that stores output for testing
pub struct CapturedWriter(pub Arc<Mutex<Vec<u8>>>);

impl CapturedWriter {
    pub fn new() -> (Self, Arc<Mutex<Vec<u8>>>) {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        (CapturedWriter(buffer.clone()), buffer)
    }
}

impl Write for CapturedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// A module stand-in: 64KiB of memory, a stack pointer, and an optional
/// hook that runs on every `resume`.
pub struct MockGuest {
    pub memory: Vec<u8>,
    pub sp: u32,
    pub resumes: usize,
    pub on_resume: Option<Box<dyn FnMut(&mut Vec<u8>, &mut u32)>>,
}

impl MockGuest {
    pub fn new(sp: u32) -> Self {
        MockGuest {
            memory: vec![0; 65536],
            sp,
            resumes: 0,
            on_resume: None,
        }
    }

    pub fn mem(&mut self) -> LinearMemory<'_> {
        LinearMemory::new(&mut self.memory)
    }

    /// Write `s` at `data_at` and its (pointer, length) pair at `addr`.
    pub fn write_string(&mut self, addr: u32, data_at: u32, s: &str) {
        self.write_slice(addr, data_at, s.as_bytes());
    }

    pub fn write_slice(&mut self, addr: u32, data_at: u32, bytes: &[u8]) {
        let mut mem = self.mem();
        mem.write_bytes(data_at, bytes).unwrap();
        mem.write_i64(addr, data_at as i64).unwrap();
        mem.write_i64(addr + 8, bytes.len() as i64).unwrap();
    }

    /// Box `values` into consecutive slots at `data_at` and describe them at `addr`.
    pub fn write_values(&mut self, instance: &Instance, addr: u32, data_at: u32, values: &[Value]) {
        for (i, value) in values.iter().enumerate() {
            instance.store(self, data_at + i as u32 * 8, value.clone()).unwrap();
        }
        let mut mem = self.mem();
        mem.write_i64(addr, data_at as i64).unwrap();
        mem.write_i64(addr + 8, values.len() as i64).unwrap();
    }
}

impl Guest for MockGuest {
    fn memory(&mut self) -> Result<&mut [u8], HostError> {
        Ok(&mut self.memory)
    }

    fn stack_pointer(&mut self) -> Result<u32, HostError> {
        Ok(self.sp)
    }

    fn resume(&mut self) -> Result<(), HostError> {
        self.resumes += 1;
        if let Some(hook) = self.on_resume.as_mut() {
            hook(&mut self.memory, &mut self.sp);
        }
        Ok(())
    }

    fn run(&mut self, _argc: i32, _argv: i32) -> Result<(), HostError> {
        Ok(())
    }
}

/// An instance whose stdout is captured
pub fn captured_instance() -> (Instance, Arc<Mutex<Vec<u8>>>) {
    let (stdout, buffer) = CapturedWriter::new();
    let instance = Instance::builder().stdout(Box::new(stdout)).build();
    (instance, buffer)
}
