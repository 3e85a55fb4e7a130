//! The engine seam
//!
//! The host never executes WebAssembly itself. Whatever engine instantiated
//! the module hands the dispatcher a [`Guest`]: a live view of linear memory
//! plus the module exports the host calls back into.

use super::HostError;

/// Access to a running module instance
///
/// Every method may re-enter the module. Stack-relative addresses computed
/// before a call to [`Guest::resume`] (or to anything that can reach it) are
/// stale afterwards; re-query [`Guest::stack_pointer`].
pub trait Guest {
    /// The module's linear memory, read fresh on every call.
    fn memory(&mut self) -> Result<&mut [u8], HostError>;

    /// The module's current stack pointer (the `getsp` export).
    fn stack_pointer(&mut self) -> Result<u32, HostError>;

    /// Re-enter the module after a deferred event (the `resume` export).
    fn resume(&mut self) -> Result<(), HostError>;

    /// Start the program (the `run` export).
    fn run(&mut self, argc: i32, argv: i32) -> Result<(), HostError>;
}
