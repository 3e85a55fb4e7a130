//! Import resolution for hosted modules
//!
//! Every function a module may import is a [`HostImport`]. An [`ImportObject`]
//! maps `(module, name)` pairs onto them, so a module whose imports do not all
//! resolve is rejected before it ever runs.

use super::HostError;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Import module names the toolchain has used, newest first
pub const IMPORT_MODULES: [&str; 2] = ["gojs", "go"];

/// A host function the module can import
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostImport {
    WasmExit,
    WasmWrite,
    ResetMemoryDataView,
    Nanotime,
    Walltime,
    ScheduleTimeoutEvent,
    ClearTimeoutEvent,
    GetRandomData,
    FinalizeRef,
    StringVal,
    ValueGet,
    ValueSet,
    ValueDelete,
    ValueIndex,
    ValueSetIndex,
    ValueCall,
    ValueInvoke,
    ValueNew,
    ValueLength,
    ValuePrepareString,
    ValueLoadString,
    ValueInstanceOf,
    CopyBytesToGo,
    CopyBytesToJs,
    Debug,
}

/// Import names, including the historical spellings of the clock imports
const NAMES: &[(&str, HostImport)] = &[
    ("runtime.wasmExit", HostImport::WasmExit),
    ("runtime.wasmWrite", HostImport::WasmWrite),
    ("runtime.resetMemoryDataView", HostImport::ResetMemoryDataView),
    ("runtime.nanotime1", HostImport::Nanotime),
    ("runtime.nanotime", HostImport::Nanotime),
    ("runtime.walltime", HostImport::Walltime),
    ("runtime.walltime1", HostImport::Walltime),
    ("runtime.scheduleTimeoutEvent", HostImport::ScheduleTimeoutEvent),
    ("runtime.clearTimeoutEvent", HostImport::ClearTimeoutEvent),
    ("runtime.getRandomData", HostImport::GetRandomData),
    ("syscall/js.finalizeRef", HostImport::FinalizeRef),
    ("syscall/js.stringVal", HostImport::StringVal),
    ("syscall/js.valueGet", HostImport::ValueGet),
    ("syscall/js.valueSet", HostImport::ValueSet),
    ("syscall/js.valueDelete", HostImport::ValueDelete),
    ("syscall/js.valueIndex", HostImport::ValueIndex),
    ("syscall/js.valueSetIndex", HostImport::ValueSetIndex),
    ("syscall/js.valueCall", HostImport::ValueCall),
    ("syscall/js.valueInvoke", HostImport::ValueInvoke),
    ("syscall/js.valueNew", HostImport::ValueNew),
    ("syscall/js.valueLength", HostImport::ValueLength),
    ("syscall/js.valuePrepareString", HostImport::ValuePrepareString),
    ("syscall/js.valueLoadString", HostImport::ValueLoadString),
    ("syscall/js.valueInstanceOf", HostImport::ValueInstanceOf),
    ("syscall/js.copyBytesToGo", HostImport::CopyBytesToGo),
    ("syscall/js.copyBytesToJS", HostImport::CopyBytesToJs),
    ("debug", HostImport::Debug),
];

static BY_NAME: Lazy<HashMap<&'static str, HostImport>> = Lazy::new(|| NAMES.iter().copied().collect());

impl HostImport {
    /// Look up an import by its field name.
    pub fn from_name(name: &str) -> Option<Self> {
        BY_NAME.get(name).copied()
    }

    /// The current field name of this import
    pub fn name(self) -> &'static str {
        NAMES
            .iter()
            .find(|(_, import)| *import == self)
            .map_or("debug", |(name, _)| *name)
    }

    /// Whether the import receives a raw value instead of a stack pointer
    pub fn takes_raw_argument(self) -> bool {
        self == HostImport::Debug
    }
}

/// Host functions available to a module, keyed by (module, name)
#[derive(Debug, Clone, Default)]
pub struct ImportObject {
    pub functions: HashMap<(String, String), HostImport>,
}

impl ImportObject {
    /// Create a new empty import object
    pub fn new() -> Self {
        Self::default()
    }

    /// Every host import under each of [`IMPORT_MODULES`]
    pub fn standard() -> Self {
        let mut imports = Self::new();
        for module in IMPORT_MODULES {
            for (name, import) in NAMES {
                imports.add_function(module, *name, *import);
            }
        }
        imports
    }

    pub fn add_function(&mut self, module: impl Into<String>, name: impl Into<String>, import: HostImport) {
        self.functions.insert((module.into(), name.into()), import);
    }

    /// Get a function import
    ///
    /// # Errors
    /// Returns `UnresolvedImport` if nothing is registered under the pair
    pub fn get_function(&self, module: &str, name: &str) -> Result<HostImport, HostError> {
        self.functions
            .get(&(module.to_string(), name.to_string()))
            .copied()
            .ok_or_else(|| HostError::UnresolvedImport {
                module: module.to_string(),
                name: name.to_string(),
            })
    }

    /// Resolve a module's declared function imports in order, failing on the first miss.
    pub fn resolve<'a>(
        &self,
        declared: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Vec<HostImport>, HostError> {
        declared
            .into_iter()
            .map(|(module, name)| self.get_function(module, name))
            .collect()
    }
}
