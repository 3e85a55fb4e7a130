//! Host runtime for `syscall/js` WebAssembly modules
//!
//! This module provides everything a module compiled for the browser-style
//! JS-interop model expects from its host: the value model, the NaN-boxed
//! value table, the import dispatcher, and the minimal global object graph.

pub mod boxing;
pub mod config;
pub mod console;
pub mod dispatch;
#[cfg(feature = "wasmtime")]
pub mod engine;
pub mod globals;
pub mod guest;
pub mod imports;
pub mod instance;
pub mod memory;
pub mod table;
pub mod test_utils;
pub mod timers;
pub mod value;

pub use config::{ExportNames, HostConfig};
pub use guest::Guest;
pub use imports::{HostImport, ImportObject};
pub use instance::{Instance, InstanceBuilder};
pub use memory::LinearMemory;
pub use table::{RefCount, ValueTable};
pub use value::{Array, Constructor, Function, Kind, Object, Value};

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("unresolved import: {module}.{name}")]
    UnresolvedImport { module: String, name: String },
    #[error("out of bounds memory access: address {addr} + length {len}")]
    MemoryOutOfBounds { addr: u64, len: u64 },
    #[error("bad file descriptor: {0}")]
    BadFileDescriptor(i64),
    #[error("{operation}: expected {expected}, got {actual}")]
    TypeAssertion {
        operation: &'static str,
        expected: &'static str,
        actual: String,
    },
    #[error("value is not callable: {0}")]
    NotCallable(String),
    #[error("unknown value reference: {0}")]
    UnknownRef(u32),
    #[error("total length of command line and environment variables exceeds limit")]
    ArgsTooLong,
    #[error("uncaught exception: {message}")]
    Thrown { message: String, code: Option<String> },
    #[error("Go program has already exited")]
    Exited,
    #[error("module stalled without exiting")]
    Stalled,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error("engine error: {0}")]
    Engine(String),
}

impl HostError {
    /// An exception with only a message, as raised by a native function.
    pub fn thrown(message: impl Into<String>) -> Self {
        HostError::Thrown {
            message: message.into(),
            code: None,
        }
    }

    pub(crate) fn type_assertion(operation: &'static str, expected: &'static str, actual: &Value) -> Self {
        HostError::TypeAssertion {
            operation,
            expected,
            actual: actual.kind().to_string(),
        }
    }
}
