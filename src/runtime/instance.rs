//! Hosted module instance
//!
//! An [`Instance`] owns everything one module instantiation shares across
//! import calls: the value table, the global object graph, the console, the
//! timeout registry, and the exit status. It is single-threaded and
//! re-entrant; every field is borrowed only for the duration of one step, so
//! a native function may call back into the module while an import is still
//! on the stack.

use super::boxing::{load_slice_of_values, load_value, store_value};
use super::config::HostConfig;
use super::console::Console;
use super::dispatch::dispatch;
use super::globals::Globals;
use super::timers::{Clock, Timers};
use super::{Guest, HostError, HostImport, LinearMemory, Object, Value, ValueTable};
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::io::Write;
use std::rc::Rc;
use std::time::Instant;
use tracing::{info, warn};

/// Where argv and the environment are written before `run`
pub const ARGS_OFFSET: u32 = 4096;

/// The module's static data starts here; arguments must end before it
pub const MIN_DATA_ADDR: u32 = 4096 + 8192;

pub struct Instance {
    values: RefCell<ValueTable>,
    globals: Globals,
    console: Rc<Console>,
    timers: RefCell<Timers>,
    clock: Clock,
    exit_code: Cell<Option<i32>>,
    config: HostConfig,
}

impl Instance {
    /// An instance with the default configuration and the process's console
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> InstanceBuilder {
        InstanceBuilder::new()
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn values(&self) -> Ref<'_, ValueTable> {
        self.values.borrow()
    }

    pub fn values_mut(&self) -> RefMut<'_, ValueTable> {
        self.values.borrow_mut()
    }

    /// The global object (id 5)
    pub fn global(&self) -> Value {
        Value::Object(self.globals.global.clone())
    }

    /// The instance's own object (id 6)
    pub fn this_object(&self) -> Value {
        Value::Object(self.globals.this.clone())
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn timers(&self) -> Ref<'_, Timers> {
        self.timers.borrow()
    }

    pub fn timers_mut(&self) -> RefMut<'_, Timers> {
        self.timers.borrow_mut()
    }

    /// The code passed to `runtime.wasmExit`, once the module has exited
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code.get()
    }

    pub fn exited(&self) -> bool {
        self.exit_code.get().is_some()
    }

    pub(crate) fn record_exit(&self, code: i32) {
        info!(code, "program exited");
        self.exit_code.set(Some(code));
        self.globals.this.borrow_mut().set("exited", Value::Bool(true));
    }

    /// Handle one import call from the module.
    pub fn handle(&self, import: HostImport, arg: i32, guest: &mut dyn Guest) -> Result<(), HostError> {
        dispatch(self, import, arg, guest)
    }

    /// Decode the boxed slot at `addr`.
    pub fn load(&self, guest: &mut dyn Guest, addr: u32) -> Result<Value, HostError> {
        let mem = LinearMemory::new(guest.memory()?);
        load_value(&mem, &self.values.borrow(), addr)
    }

    /// Box `value` into the slot at `addr`, taking a reference on its id.
    pub fn store(&self, guest: &mut dyn Guest, addr: u32, value: Value) -> Result<(), HostError> {
        let mut mem = LinearMemory::new(guest.memory()?);
        store_value(&mut mem, &mut self.values.borrow_mut(), addr, value)
    }

    /// Decode the slice of boxed slots described at `addr`.
    pub fn load_args(&self, guest: &mut dyn Guest, addr: u32) -> Result<Vec<Value>, HostError> {
        let mem = LinearMemory::new(guest.memory()?);
        load_slice_of_values(&mem, &self.values.borrow(), addr)
    }

    /// Lay out argv and the environment at [`ARGS_OFFSET`].
    ///
    /// Strings come first (NUL-terminated, each starting 8-byte aligned), then
    /// a table of 64-bit pointers: the argv pointers and a 0, then the
    /// `KEY=value` pointers and a 0. Returns `(argc, argv)`, where `argv` is
    /// the address of the table.
    pub fn write_args(&self, guest: &mut dyn Guest) -> Result<(i32, i32), HostError> {
        let env = self.config.env.iter().map(|(key, value)| format!("{key}={value}"));
        let strings: Vec<String> = self.config.args.iter().cloned().chain(env).collect();
        let argc = self.config.args.len();

        let mut offset = ARGS_OFFSET as usize;
        let mut pointers = Vec::with_capacity(strings.len() + 2);
        for (i, s) in strings.iter().enumerate() {
            if i == argc {
                pointers.push(0);
            }
            pointers.push(offset);
            offset = (offset + s.len() + 1).next_multiple_of(8);
        }
        if argc == strings.len() {
            pointers.push(0);
        }
        pointers.push(0);

        let argv = offset;
        let end = argv + pointers.len() * 8;
        if end >= MIN_DATA_ADDR as usize {
            return Err(HostError::ArgsTooLong);
        }

        let mut mem = LinearMemory::new(guest.memory()?);
        for (s, &ptr) in strings.iter().zip(pointers.iter().filter(|&&p| p != 0)) {
            mem.write_bytes(ptr as u32, s.as_bytes())?;
            mem.write_u8((ptr + s.len()) as u32, 0)?;
        }
        for (i, &ptr) in pointers.iter().enumerate() {
            mem.write_i64((argv + i * 8) as u32, ptr as i64)?;
        }

        Ok((argc as i32, argv as i32))
    }

    /// Run the program to completion and return its exit code.
    ///
    /// Calls the `run` export, then drives scheduled timeouts until the
    /// module exits. A module left with nothing scheduled is poked once with
    /// an empty event so it can report its own deadlock; if it still has not
    /// exited the run fails with `Stalled`.
    pub fn run(&self, guest: &mut dyn Guest) -> Result<i32, HostError> {
        if self.exited() {
            return Err(HostError::Exited);
        }

        let (argc, argv) = self.write_args(guest)?;
        guest.run(argc, argv)?;

        while !self.exited() {
            let next = self.timers.borrow().next_due();
            match next {
                Some((id, deadline)) => {
                    let now = Instant::now();
                    if deadline > now {
                        std::thread::sleep(deadline - now);
                    }
                    guest.resume()?;
                    while !self.exited() && self.timers.borrow().contains(id) {
                        warn!(id, "missed timeout event");
                        guest.resume()?;
                    }
                }
                None => {
                    warn!("no pending events, poking the module");
                    self.post_event(Object::new().with("id", 0.0));
                    guest.resume()?;
                    if !self.exited() {
                        return Err(HostError::Stalled);
                    }
                }
            }
        }

        Ok(self.exit_code.get().unwrap_or_default())
    }

    /// Make `event` the module's pending event.
    pub fn post_event(&self, event: Object) {
        self.globals.this.borrow_mut().set("_pendingEvent", Value::object(event));
    }
}

impl Default for Instance {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`Instance`]
#[derive(Default)]
pub struct InstanceBuilder {
    config: HostConfig,
    stdout: Option<Box<dyn Write>>,
    stderr: Option<Box<dyn Write>>,
}

impl InstanceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set command line arguments, including the program name
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.config.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set environment variables
    pub fn env(mut self, env: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>) -> Self {
        self.config.env = env.into_iter().map(|(k, v)| (k.into(), v.into())).collect::<BTreeMap<_, _>>();
        self
    }

    pub fn stdout(mut self, stdout: Box<dyn Write>) -> Self {
        self.stdout = Some(stdout);
        self
    }

    pub fn stderr(mut self, stderr: Box<dyn Write>) -> Self {
        self.stderr = Some(stderr);
        self
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: HostConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Instance {
        let console = Rc::new(Console::new(
            self.stdout.unwrap_or_else(|| Box::new(std::io::stdout())),
            self.stderr.unwrap_or_else(|| Box::new(std::io::stderr())),
        ));
        let globals = Globals::new(console.clone());

        Instance {
            values: RefCell::new(ValueTable::with_predefined(globals.predefined())),
            globals,
            console,
            timers: RefCell::new(Timers::new()),
            clock: Clock::new(),
            exit_code: Cell::new(None),
            config: self.config,
        }
    }
}
