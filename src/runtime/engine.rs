//! wasmtime adapter
//!
//! Binds every import a module declares to the dispatcher and runs the
//! module to completion. The store's data is the shared [`Instance`]; host
//! functions reach it through the `Caller`, so the closures handed to the
//! linker capture nothing but the import they serve.

use super::{Guest, HostError, ImportObject, Instance};
use std::rc::Rc;
use wasmtime::{Caller, Engine, Extern, Func, Linker, Memory, Module, Store};

/// Convert an engine error, recovering a host error raised inside an import.
fn engine_error(e: wasmtime::Error) -> HostError {
    match e.downcast::<HostError>() {
        Ok(host) => host,
        Err(e) => HostError::Engine(format!("{e:#}")),
    }
}

fn memory_export(export: Option<Extern>, name: &str) -> Result<Memory, HostError> {
    export
        .and_then(Extern::into_memory)
        .ok_or_else(|| HostError::Engine(format!("missing memory export: {name}")))
}

fn func_export(export: Option<Extern>, name: &str) -> Result<Func, HostError> {
    export
        .and_then(Extern::into_func)
        .ok_or_else(|| HostError::Engine(format!("missing function export: {name}")))
}

/// Define every import `module` declares, resolved through [`ImportObject::standard`].
///
/// # Errors
/// Returns `UnresolvedImport` for the first import the host does not provide.
pub fn link(linker: &mut Linker<Rc<Instance>>, module: &Module) -> Result<(), HostError> {
    let imports = ImportObject::standard();
    linker.allow_shadowing(true);

    for import in module.imports() {
        let host = imports.get_function(import.module(), import.name())?;
        linker
            .func_wrap(
                import.module(),
                import.name(),
                move |mut caller: Caller<'_, Rc<Instance>>, arg: i32| -> wasmtime::Result<()> {
                    let instance = caller.data().clone();
                    let mut guest = CallerGuest::new(&mut caller);
                    instance.handle(host, arg, &mut guest).map_err(wasmtime::Error::new)
                },
            )
            .map_err(engine_error)?;
    }
    Ok(())
}

/// Compile, instantiate and run `wasm`, returning the program's exit code.
pub fn run_module(wasm: &[u8], instance: Rc<Instance>) -> Result<i32, HostError> {
    let engine = Engine::default();
    let module = Module::new(&engine, wasm).map_err(engine_error)?;

    let mut linker = Linker::new(&engine);
    link(&mut linker, &module)?;

    let mut store = Store::new(&engine, instance.clone());
    let handle = linker.instantiate(&mut store, &module).map_err(engine_error)?;

    let mut guest = WasmtimeGuest::new(store, handle);
    instance.run(&mut guest)
}

/// A module instance driven from outside any import call
pub struct WasmtimeGuest {
    store: Store<Rc<Instance>>,
    instance: wasmtime::Instance,
}

impl WasmtimeGuest {
    pub fn new(store: Store<Rc<Instance>>, instance: wasmtime::Instance) -> Self {
        WasmtimeGuest { store, instance }
    }

    fn func(&mut self, name: &str) -> Result<Func, HostError> {
        func_export(self.instance.get_export(&mut self.store, name), name)
    }
}

impl Guest for WasmtimeGuest {
    fn memory(&mut self) -> Result<&mut [u8], HostError> {
        let host = self.store.data().clone();
        let name = &host.config().exports.memory;
        let memory = memory_export(self.instance.get_export(&mut self.store, name), name)?;
        Ok(memory.data_mut(&mut self.store))
    }

    fn stack_pointer(&mut self) -> Result<u32, HostError> {
        let host = self.store.data().clone();
        let getsp = self.func(&host.config().exports.stack_pointer)?;
        let sp = getsp
            .typed::<(), i32>(&self.store)
            .and_then(|f| f.call(&mut self.store, ()))
            .map_err(engine_error)?;
        Ok(sp as u32)
    }

    fn resume(&mut self) -> Result<(), HostError> {
        let host = self.store.data().clone();
        let resume = self.func(&host.config().exports.resume)?;
        resume
            .typed::<(), ()>(&self.store)
            .and_then(|f| f.call(&mut self.store, ()))
            .map_err(engine_error)
    }

    fn run(&mut self, argc: i32, argv: i32) -> Result<(), HostError> {
        let host = self.store.data().clone();
        let run = self.func(&host.config().exports.run)?;
        run.typed::<(i32, i32), ()>(&self.store)
            .and_then(|f| f.call(&mut self.store, (argc, argv)))
            .map_err(engine_error)
    }
}

/// The module as seen from inside an import call
pub struct CallerGuest<'a, 'b> {
    caller: &'a mut Caller<'b, Rc<Instance>>,
    host: Rc<Instance>,
}

impl<'a, 'b> CallerGuest<'a, 'b> {
    pub fn new(caller: &'a mut Caller<'b, Rc<Instance>>) -> Self {
        let host = caller.data().clone();
        CallerGuest { caller, host }
    }

    fn func(&mut self, name: &str) -> Result<Func, HostError> {
        func_export(self.caller.get_export(name), name)
    }
}

impl Guest for CallerGuest<'_, '_> {
    fn memory(&mut self) -> Result<&mut [u8], HostError> {
        let name = &self.host.config().exports.memory;
        let memory = memory_export(self.caller.get_export(name), name)?;
        Ok(memory.data_mut(&mut *self.caller))
    }

    fn stack_pointer(&mut self) -> Result<u32, HostError> {
        let host = self.host.clone();
        let getsp = self.func(&host.config().exports.stack_pointer)?;
        let sp = getsp
            .typed::<(), i32>(&*self.caller)
            .and_then(|f| f.call(&mut *self.caller, ()))
            .map_err(engine_error)?;
        Ok(sp as u32)
    }

    fn resume(&mut self) -> Result<(), HostError> {
        let host = self.host.clone();
        let resume = self.func(&host.config().exports.resume)?;
        resume
            .typed::<(), ()>(&*self.caller)
            .and_then(|f| f.call(&mut *self.caller, ()))
            .map_err(engine_error)
    }

    fn run(&mut self, argc: i32, argv: i32) -> Result<(), HostError> {
        let host = self.host.clone();
        let run = self.func(&host.config().exports.run)?;
        run.typed::<(i32, i32), ()>(&*self.caller)
            .and_then(|f| f.call(&mut *self.caller, (argc, argv)))
            .map_err(engine_error)
    }
}
