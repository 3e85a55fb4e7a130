//! A host for WebAssembly modules compiled against the `syscall/js` interop ABI.
//!
//! Such modules expect a browser-style JavaScript host: they import a fixed set
//! of functions (clocks, timers, console output, and "call into host object"
//! operations) and exchange values with the host through NaN-boxed 8-byte
//! slots in their linear memory. wasmjs supplies that host natively.
//!
//! # Modules
//!
//! - [`runtime::value`] -- The host-side value model.
//! - [`runtime::table`] and [`runtime::boxing`] -- Value ids, reference counts and the slot encoding.
//! - [`runtime::dispatch`] -- One handler per imported function.
//! - [`runtime::instance`] -- Per-instantiation state, program bootstrap and the event loop.
//! - `runtime::engine` -- wasmtime bindings (feature `wasmtime`).
//!
//! The engine itself is abstracted behind [`runtime::Guest`]; anything that can
//! expose linear memory and call the module's exports can drive an
//! [`runtime::Instance`].
//!
//! # Example
//!
//! Box a host value into a module's memory and read it back:
//!
//! ```
//! use wasmjs::runtime::{Guest, HostError, Instance, Value};
//!
//! struct Memory(Vec<u8>);
//!
//! impl Guest for Memory {
//!     fn memory(&mut self) -> Result<&mut [u8], HostError> { Ok(&mut self.0) }
//!     fn stack_pointer(&mut self) -> Result<u32, HostError> { Ok(0) }
//!     fn resume(&mut self) -> Result<(), HostError> { Ok(()) }
//!     fn run(&mut self, _argc: i32, _argv: i32) -> Result<(), HostError> { Ok(()) }
//! }
//!
//! let instance = Instance::new();
//! let mut guest = Memory(vec![0; 64]);
//!
//! instance.store(&mut guest, 8, instance.global()).unwrap();
//! assert_eq!(&guest.0[8..16], &[5, 0, 0, 0, 1, 0, 0xF8, 0x7F]);
//!
//! let array = instance.load(&mut guest, 8).unwrap().get_property("Array");
//! assert!(array.callable().is_some());
//! ```

pub mod runtime;

pub use runtime::{Guest, HostConfig, HostError, Instance, InstanceBuilder, Value};
