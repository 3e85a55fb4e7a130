//! Console output for file descriptors 1 and 2
//!
//! Shared by the `runtime.wasmWrite` import and the filesystem stub, so both
//! paths interleave on the same writers.

use super::HostError;
use std::cell::RefCell;
use std::io::Write;

pub const STDOUT: i64 = 1;
pub const STDERR: i64 = 2;

pub struct Console {
    stdout: RefCell<Box<dyn Write>>,
    stderr: RefCell<Box<dyn Write>>,
}

impl Console {
    pub fn new(stdout: Box<dyn Write>, stderr: Box<dyn Write>) -> Self {
        Console {
            stdout: RefCell::new(stdout),
            stderr: RefCell::new(stderr),
        }
    }

    /// The process's own stdout and stderr
    pub fn inherit() -> Self {
        Self::new(Box::new(std::io::stdout()), Box::new(std::io::stderr()))
    }

    /// Write `bytes` verbatim to `fd`, flushing immediately.
    ///
    /// # Errors
    /// Returns `BadFileDescriptor` for anything but 1 and 2.
    pub fn write(&self, fd: i64, bytes: &[u8]) -> Result<usize, HostError> {
        let writer = match fd {
            STDOUT => &self.stdout,
            STDERR => &self.stderr,
            other => return Err(HostError::BadFileDescriptor(other)),
        };
        let mut writer = writer.borrow_mut();
        writer.write_all(bytes)?;
        writer.flush()?;
        Ok(bytes.len())
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::inherit()
    }
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console").finish_non_exhaustive()
    }
}
