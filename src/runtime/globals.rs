//! The pre-populated object graph the module queries at startup
//!
//! Only what early startup and console output need is present: the `Object`,
//! `Array` and `Uint8Array` constructors, and an `fs` stub whose writes go to
//! the [`Console`]. The instance's own object (id 6) carries the callback
//! wrapper factory and the pending-event slot used to re-enter the module.

use super::console::Console;
use super::value::ObjectRef;
use super::{Array, Function, HostError, Kind, Object, Value};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Message thrown by callback wrappers once the module has exited
pub const EXITED_MESSAGE: &str = "Go program has already exited";

/// Largest length accepted by the array constructors
const MAX_LENGTH: f64 = u32::MAX as f64;

/// The global object and the instance's own object
#[derive(Clone)]
pub struct Globals {
    pub global: ObjectRef,
    pub this: ObjectRef,
}

impl Globals {
    pub fn new(console: Rc<Console>) -> Self {
        let global = Object::new()
            .with("Object", object_constructor())
            .with("Array", array_constructor())
            .with("Uint8Array", uint8_array_constructor())
            .with("fs", filesystem(console))
            .into_ref();

        Globals {
            global,
            this: this_object(),
        }
    }

    /// The values behind the ids the module hard-codes, in id order:
    /// NaN, 0, null, true, false, global, this.
    pub fn predefined(&self) -> [Value; 7] {
        [
            Value::Number(f64::NAN),
            Value::Number(0.0),
            Value::Null,
            Value::Bool(true),
            Value::Bool(false),
            Value::Object(self.global.clone()),
            Value::Object(self.this.clone()),
        ]
    }
}

/// An error object as the module expects to receive it: `message` plus an
/// optional errno-style `code`.
pub fn error_object(message: &str, code: Option<&str>) -> Value {
    let mut error = Object::new().with("message", message);
    if let Some(code) = code {
        error.set("code", Value::string(code));
    }
    Value::object(error)
}

fn valid_length(n: f64) -> Option<usize> {
    (n >= 0.0 && n.fract() == 0.0 && n <= MAX_LENGTH).then_some(n as usize)
}

fn object_constructor() -> Object {
    Object::with_constructor(
        Kind::Object,
        Function::new("Object", |_, _, args| {
            Ok(match args.first() {
                Some(value) if value.kind().is_object_like() => value.clone(),
                _ => Value::object(Object::new()),
            })
        }),
    )
}

fn array_constructor() -> Object {
    Object::with_constructor(
        Kind::Array,
        Function::new("Array", |_, _, args| match args {
            [Value::Number(n)] => {
                let len = valid_length(*n).ok_or_else(|| HostError::thrown("Invalid array length"))?;
                Ok(Value::Array(Rc::new(RefCell::new(Array::with_len(len)?))))
            }
            _ => Ok(Value::array(args.to_vec())),
        }),
    )
}

/// ToUint8: truncate, then wrap modulo 256
pub(crate) fn to_uint8(value: &Value) -> u8 {
    match value {
        Value::Number(n) if n.is_finite() => (n.trunc() as i64).rem_euclid(256) as u8,
        Value::Bool(true) => 1,
        _ => 0,
    }
}

fn uint8_array_constructor() -> Object {
    Object::with_constructor(
        Kind::Bytes,
        Function::new("Uint8Array", |_, _, args| {
            let bytes = match args.first() {
                Some(Value::Number(n)) => {
                    let len = valid_length(*n).ok_or_else(|| HostError::thrown("Invalid typed array length"))?;
                    let mut bytes = Vec::new();
                    bytes
                        .try_reserve_exact(len)
                        .map_err(|_| HostError::thrown("Array buffer allocation failed"))?;
                    bytes.resize(len, 0);
                    bytes
                }
                Some(Value::Array(items)) => items.borrow().iter().map(to_uint8).collect(),
                Some(Value::Bytes(bytes)) => bytes.borrow().clone(),
                _ => Vec::new(),
            };
            Ok(Value::bytes(bytes))
        }),
    )
}

fn filesystem(console: Rc<Console>) -> Object {
    let constants = ["O_WRONLY", "O_RDWR", "O_CREAT", "O_TRUNC", "O_APPEND", "O_EXCL"]
        .into_iter()
        .fold(Object::new(), |constants, name| constants.with(name, -1.0));

    let sync_console = console.clone();
    let sync = Function::new("writeSync", move |_, _, args| write_sync(&sync_console, args));

    // write(fd, buf, offset, length, position, callback)
    let write = Function::new("write", move |guest, _, args| {
        let callback = args
            .get(5)
            .and_then(Value::callable)
            .ok_or_else(|| HostError::thrown("callback must be a function"))?;

        let whole_buffer = match args.get(1) {
            Some(Value::Bytes(buf)) => {
                args.get(2).and_then(Value::as_number) == Some(0.0)
                    && args.get(3).and_then(Value::as_number) == Some(buf.borrow().len() as f64)
                    && matches!(args.get(4), Some(Value::Null))
            }
            _ => false,
        };
        if !whole_buffer {
            let error = error_object("not implemented", Some("ENOSYS"));
            callback.call(guest, &Value::Undefined, &[error])?;
            return Ok(Value::Undefined);
        }

        let outcome = match write_sync(&console, &args[..2]) {
            Ok(written) => vec![Value::Null, written],
            Err(HostError::Thrown { message, code }) => vec![error_object(&message, code.as_deref())],
            Err(e) => return Err(e),
        };
        callback.call(guest, &Value::Undefined, &outcome)?;
        Ok(Value::Undefined)
    });

    Object::new()
        .with("constants", constants)
        .with("writeSync", Value::Function(sync))
        .with("write", Value::Function(write))
}

/// writeSync(fd, buf): the whole buffer goes to the console; returns the count.
fn write_sync(console: &Console, args: &[Value]) -> Result<Value, HostError> {
    let fd = args
        .first()
        .and_then(Value::as_number)
        .ok_or_else(|| HostError::thrown("fd must be a number"))?;
    let buf = args
        .get(1)
        .and_then(Value::as_bytes)
        .ok_or_else(|| HostError::thrown("buffer must be a Uint8Array"))?;

    match console.write(fd as i64, &buf.borrow()) {
        Ok(written) => Ok(Value::Number(written as f64)),
        Err(HostError::BadFileDescriptor(fd)) => Err(HostError::Thrown {
            message: format!("EBADF: bad file descriptor, write {fd}"),
            code: Some("EBADF".to_string()),
        }),
        Err(e) => Err(e),
    }
}

fn this_object() -> ObjectRef {
    let this = Object::new()
        .with("exited", false)
        .with("_pendingEvent", Value::Null)
        .into_ref();

    let weak = Rc::downgrade(&this);
    let make_wrapper = Function::new("_makeFuncWrapper", move |_, _, args| {
        let id = args.first().cloned().unwrap_or(Value::Undefined);
        Ok(Value::Function(func_wrapper(weak.clone(), id)))
    });
    this.borrow_mut().set("_makeFuncWrapper", Value::Function(make_wrapper));
    this
}

/// A function that hands its call to the module as a pending event.
///
/// The module picks the event up from `_pendingEvent` during `resume`, runs
/// the callback registered under `id`, and stores the outcome in the event's
/// `result` attribute.
fn func_wrapper(this_object: Weak<RefCell<Object>>, id: Value) -> Rc<Function> {
    Function::new("wrapper", move |guest, this, args| {
        let this_object = this_object.upgrade().ok_or(HostError::Exited)?;
        if this_object.borrow().get("exited") == Value::Bool(true) {
            return Err(HostError::thrown(EXITED_MESSAGE));
        }

        let event = Object::new()
            .with("id", id.clone())
            .with("this", this.clone())
            .with("args", Value::array(args.to_vec()))
            .into_ref();
        this_object
            .borrow_mut()
            .set("_pendingEvent", Value::Object(event.clone()));

        guest.resume()?;

        let result = event.borrow().get("result");
        Ok(result)
    })
}
