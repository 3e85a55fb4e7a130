//! Import dispatch
//!
//! One handler per [`HostImport`]. Handlers receive the module's stack
//! pointer and find their arguments at fixed offsets above it; results are
//! written back the same way. Offsets below are those the module's compiler
//! generates, with strings and slices passed as (pointer, length) pairs of
//! 64-bit integers.
//!
//! Handlers that can run a native function (which may call `resume` and move
//! the module's stack) re-read the stack pointer before writing results, and
//! never hold a borrow of the value table across the call.

use super::boxing::SLOT_SIZE;
use super::globals::{error_object, to_uint8};
use super::memory::LinearMemory;
use super::value::MAX_INDEX;
use super::{Guest, HostError, HostImport, Instance, Kind, Value};
use rand::RngCore;
use tracing::{debug, warn};

/// Run `import` against `instance`.
///
/// `arg` is the stack pointer for every import except `debug`, which receives
/// a raw value.
pub fn dispatch(instance: &Instance, import: HostImport, arg: i32, guest: &mut dyn Guest) -> Result<(), HostError> {
    if import.takes_raw_argument() {
        debug!(value = arg, "debug");
        return Ok(());
    }

    let sp = arg as u32;
    debug!(import = import.name(), sp, "dispatching import");

    match import {
        HostImport::WasmExit => wasm_exit(instance, sp, guest),
        HostImport::WasmWrite => wasm_write(instance, sp, guest),
        HostImport::ResetMemoryDataView => Ok(()),
        HostImport::Nanotime => nanotime(instance, sp, guest),
        HostImport::Walltime => walltime(instance, sp, guest),
        HostImport::ScheduleTimeoutEvent => schedule_timeout_event(instance, sp, guest),
        HostImport::ClearTimeoutEvent => clear_timeout_event(instance, sp, guest),
        HostImport::GetRandomData => get_random_data(sp, guest),
        HostImport::FinalizeRef => finalize_ref(instance, sp, guest),
        HostImport::StringVal => string_val(instance, sp, guest),
        HostImport::ValueGet => value_get(instance, sp, guest),
        HostImport::ValueSet => value_set(instance, sp, guest),
        HostImport::ValueDelete => value_delete(instance, sp, guest),
        HostImport::ValueIndex => value_index(instance, sp, guest),
        HostImport::ValueSetIndex => value_set_index(instance, sp, guest),
        HostImport::ValueCall => value_call(instance, sp, guest),
        HostImport::ValueInvoke => value_invoke(instance, sp, guest),
        HostImport::ValueNew => value_new(instance, sp, guest),
        HostImport::ValueLength => value_length(instance, sp, guest),
        HostImport::ValuePrepareString => value_prepare_string(instance, sp, guest),
        HostImport::ValueLoadString => value_load_string(instance, sp, guest),
        HostImport::ValueInstanceOf => value_instance_of(instance, sp, guest),
        HostImport::CopyBytesToGo => copy_bytes_to_go(instance, sp, guest),
        HostImport::CopyBytesToJs => copy_bytes_to_js(instance, sp, guest),
        HostImport::Debug => Ok(()),
    }
}

fn memory(guest: &mut dyn Guest) -> Result<LinearMemory<'_>, HostError> {
    Ok(LinearMemory::new(guest.memory()?))
}

fn read_string(guest: &mut dyn Guest, addr: u32) -> Result<String, HostError> {
    Ok(memory(guest)?.read_string(addr)?.into_owned())
}

// func wasmExit(code int32)
fn wasm_exit(instance: &Instance, sp: u32, guest: &mut dyn Guest) -> Result<(), HostError> {
    let code = memory(guest)?.read_i32(sp + 8)?;
    instance.record_exit(code);
    Ok(())
}

// func wasmWrite(fd uintptr, p unsafe.Pointer, n int32)
fn wasm_write(instance: &Instance, sp: u32, guest: &mut dyn Guest) -> Result<(), HostError> {
    let mem = memory(guest)?;
    let fd = mem.read_i64(sp + 8)?;
    let ptr = mem.read_i64(sp + 16)?;
    let len = mem.read_i32(sp + 24)?;
    let bytes = mem.bytes(ptr as u64, len as u64)?;
    instance.console().write(fd, bytes)?;
    Ok(())
}

// func nanotime1() int64
fn nanotime(instance: &Instance, sp: u32, guest: &mut dyn Guest) -> Result<(), HostError> {
    memory(guest)?.write_i64(sp + 8, instance.clock().nanotime())
}

// func walltime() (sec int64, nsec int32)
fn walltime(instance: &Instance, sp: u32, guest: &mut dyn Guest) -> Result<(), HostError> {
    let (sec, nsec) = instance.clock().walltime();
    let mut mem = memory(guest)?;
    mem.write_i64(sp + 8, sec)?;
    mem.write_i32(sp + 16, nsec)
}

// func scheduleTimeoutEvent(delay int64) int32
fn schedule_timeout_event(instance: &Instance, sp: u32, guest: &mut dyn Guest) -> Result<(), HostError> {
    let mut mem = memory(guest)?;
    let delay = mem.read_i64(sp + 8)?;
    let id = instance.timers_mut().schedule(delay);
    mem.write_i32(sp + 16, id)
}

// func clearTimeoutEvent(id int32)
fn clear_timeout_event(instance: &Instance, sp: u32, guest: &mut dyn Guest) -> Result<(), HostError> {
    let id = memory(guest)?.read_i32(sp + 8)?;
    instance.timers_mut().clear(id);
    Ok(())
}

// func getRandomData(r []byte)
fn get_random_data(sp: u32, guest: &mut dyn Guest) -> Result<(), HostError> {
    let mut mem = memory(guest)?;
    rand::thread_rng().fill_bytes(mem.slice_mut(sp + 8)?);
    Ok(())
}

// func finalizeRef(v ref)
fn finalize_ref(instance: &Instance, sp: u32, guest: &mut dyn Guest) -> Result<(), HostError> {
    let id = memory(guest)?.read_u32(sp + 8)?;
    instance.values_mut().release(id)?;
    Ok(())
}

// func stringVal(value string) ref
fn string_val(instance: &Instance, sp: u32, guest: &mut dyn Guest) -> Result<(), HostError> {
    let s = read_string(guest, sp + 8)?;
    instance.store(guest, sp + 24, Value::string(s))
}

// func valueGet(v ref, p string) ref
fn value_get(instance: &Instance, sp: u32, guest: &mut dyn Guest) -> Result<(), HostError> {
    let target = instance.load(guest, sp + 8)?;
    let name = read_string(guest, sp + 16)?;
    let result = target.get_property(&name);
    let sp = guest.stack_pointer()?;
    instance.store(guest, sp + 32, result)
}

/// Receivers that property writes may not target
fn check_receiver(operation: &'static str, target: &Value) -> Result<(), HostError> {
    if target.kind().is_object_like() {
        Ok(())
    } else {
        Err(HostError::type_assertion(operation, "object", target))
    }
}

// func valueSet(v ref, p string, x ref)
//
// Only plain objects carry attributes; a write to an array, byte buffer or
// function receiver is dropped with a warning.
fn value_set(instance: &Instance, sp: u32, guest: &mut dyn Guest) -> Result<(), HostError> {
    let target = instance.load(guest, sp + 8)?;
    let name = read_string(guest, sp + 16)?;
    let value = instance.load(guest, sp + 32)?;

    check_receiver("valueSet", &target)?;
    match target.as_object() {
        Some(object) => object.borrow_mut().set(name, value),
        None => warn!(%name, kind = %target.kind(), "dropping property write"),
    }
    Ok(())
}

// func valueDelete(v ref, p string)
fn value_delete(instance: &Instance, sp: u32, guest: &mut dyn Guest) -> Result<(), HostError> {
    let target = instance.load(guest, sp + 8)?;
    let name = read_string(guest, sp + 16)?;

    check_receiver("valueDelete", &target)?;
    match target.as_object() {
        Some(object) => {
            object.borrow_mut().delete(&name);
        }
        None => warn!(%name, kind = %target.kind(), "dropping property delete"),
    }
    Ok(())
}

fn element(target: &Value, index: i64) -> Value {
    let Ok(i) = usize::try_from(index) else {
        return Value::Undefined;
    };
    match target {
        Value::Array(items) => items.borrow().get(i),
        Value::Bytes(bytes) => bytes.borrow().get(i).map_or(Value::Undefined, |b| Value::Number(*b as f64)),
        Value::Object(object) => object.borrow().get(&index.to_string()),
        _ => Value::Undefined,
    }
}

// func valueIndex(v ref, i int) ref
fn value_index(instance: &Instance, sp: u32, guest: &mut dyn Guest) -> Result<(), HostError> {
    let target = instance.load(guest, sp + 8)?;
    let index = memory(guest)?.read_i64(sp + 16)?;
    instance.store(guest, sp + 24, element(&target, index))
}

// func valueSetIndex(v ref, i int, x ref)
fn value_set_index(instance: &Instance, sp: u32, guest: &mut dyn Guest) -> Result<(), HostError> {
    let target = instance.load(guest, sp + 8)?;
    let index = memory(guest)?.read_i64(sp + 16)?;
    let value = instance.load(guest, sp + 24)?;

    check_receiver("valueSetIndex", &target)?;
    match (&target, usize::try_from(index)) {
        (Value::Array(items), Ok(i)) if i < MAX_INDEX => {
            if let Err(e) = items.borrow_mut().set(i, value) {
                warn!(index, error = %e, "dropping element write");
            }
        }
        (Value::Bytes(bytes), Ok(i)) => {
            // typed arrays drop writes past the end
            if let Some(byte) = bytes.borrow_mut().get_mut(i) {
                *byte = to_uint8(&value);
            }
        }
        (Value::Object(object), _) => object.borrow_mut().set(index.to_string(), value),
        _ => debug!(index, kind = %target.kind(), "ignoring element write"),
    }
    Ok(())
}

/// Store a call's outcome at `result` and its success flag at `result + 8`.
///
/// A thrown exception becomes an error object with a 0 flag; anything else is
/// fatal.
fn store_outcome(
    instance: &Instance,
    guest: &mut dyn Guest,
    result: u32,
    outcome: Result<Value, HostError>,
) -> Result<(), HostError> {
    let (value, ok) = match outcome {
        Ok(value) => (value, 1),
        Err(HostError::Thrown { message, code }) => {
            debug!(%message, "native function threw");
            (error_object(&message, code.as_deref()), 0)
        }
        Err(e) => return Err(e),
    };
    instance.store(guest, result, value)?;
    memory(guest)?.write_u8(result + SLOT_SIZE, ok)
}

// func valueCall(v ref, m string, args []ref) (ref, bool)
fn value_call(instance: &Instance, sp: u32, guest: &mut dyn Guest) -> Result<(), HostError> {
    let receiver = instance.load(guest, sp + 8)?;
    let name = read_string(guest, sp + 16)?;
    let args = instance.load_args(guest, sp + 32)?;

    let method = receiver
        .get_property(&name)
        .callable()
        .ok_or_else(|| HostError::NotCallable(format!("{}.{name}", receiver.kind())))?;
    let outcome = method.call(guest, &receiver, &args);

    let sp = guest.stack_pointer()?;
    store_outcome(instance, guest, sp + 56, outcome)
}

// func valueInvoke(v ref, args []ref) (ref, bool)
fn value_invoke(instance: &Instance, sp: u32, guest: &mut dyn Guest) -> Result<(), HostError> {
    let target = instance.load(guest, sp + 8)?;
    let args = instance.load_args(guest, sp + 16)?;

    let function = target
        .callable()
        .ok_or_else(|| HostError::NotCallable(target.kind().to_string()))?;
    let outcome = function.call(guest, &Value::Undefined, &args);

    let sp = guest.stack_pointer()?;
    store_outcome(instance, guest, sp + 40, outcome)
}

// func valueNew(v ref, args []ref) (ref, bool)
fn value_new(instance: &Instance, sp: u32, guest: &mut dyn Guest) -> Result<(), HostError> {
    let target = instance.load(guest, sp + 8)?;
    let args = instance.load_args(guest, sp + 16)?;

    let constructor = target
        .callable()
        .ok_or_else(|| HostError::NotCallable(target.kind().to_string()))?;
    let outcome = constructor.call(guest, &Value::Undefined, &args);

    let sp = guest.stack_pointer()?;
    store_outcome(instance, guest, sp + 40, outcome)
}

// func valueLength(v ref) int
fn value_length(instance: &Instance, sp: u32, guest: &mut dyn Guest) -> Result<(), HostError> {
    let target = instance.load(guest, sp + 8)?;
    let len = target.length().unwrap_or(0);
    memory(guest)?.write_i64(sp + 16, len as i64)
}

// func valuePrepareString(v ref) (ref, int)
fn value_prepare_string(instance: &Instance, sp: u32, guest: &mut dyn Guest) -> Result<(), HostError> {
    let target = instance.load(guest, sp + 8)?;
    let encoded = target.to_string().into_bytes();
    let len = encoded.len() as i64;
    instance.store(guest, sp + 16, Value::bytes(encoded))?;
    memory(guest)?.write_i64(sp + 24, len)
}

// func valueLoadString(v ref, b []byte)
fn value_load_string(instance: &Instance, sp: u32, guest: &mut dyn Guest) -> Result<(), HostError> {
    let source = instance.load(guest, sp + 8)?;
    let bytes = source
        .as_bytes()
        .ok_or_else(|| HostError::type_assertion("valueLoadString", "Uint8Array", &source))?;

    let mut mem = memory(guest)?;
    let dst = mem.slice_mut(sp + 16)?;
    let src = bytes.borrow();
    let n = dst.len().min(src.len());
    dst[..n].copy_from_slice(&src[..n]);
    Ok(())
}

/// `value instanceof constructor`, decided by the kind the constructor produces.
pub fn instance_of(value: &Value, constructor: &Value) -> bool {
    let Some(object) = constructor.as_object() else {
        return false;
    };
    let object = object.borrow();
    match object.constructor().map(|c| c.kind) {
        Some(Kind::Object) => value.kind().is_object_like(),
        Some(kind) => value.kind() == kind,
        None => false,
    }
}

// func valueInstanceOf(v ref, t ref) bool
fn value_instance_of(instance: &Instance, sp: u32, guest: &mut dyn Guest) -> Result<(), HostError> {
    let value = instance.load(guest, sp + 8)?;
    let constructor = instance.load(guest, sp + 16)?;
    let result = instance_of(&value, &constructor);
    memory(guest)?.write_u8(sp + 24, result as u8)
}

// func copyBytesToGo(dst []byte, src ref) (int, bool)
fn copy_bytes_to_go(instance: &Instance, sp: u32, guest: &mut dyn Guest) -> Result<(), HostError> {
    let source = instance.load(guest, sp + 32)?;
    let mut mem = memory(guest)?;
    let Some(src) = source.as_bytes() else {
        return mem.write_u8(sp + 48, 0);
    };

    let dst = mem.slice_mut(sp + 8)?;
    let src = src.borrow();
    let n = dst.len().min(src.len());
    dst[..n].copy_from_slice(&src[..n]);

    mem.write_i64(sp + 40, n as i64)?;
    mem.write_u8(sp + 48, 1)
}

// func copyBytesToJS(dst ref, src []byte) (int, bool)
fn copy_bytes_to_js(instance: &Instance, sp: u32, guest: &mut dyn Guest) -> Result<(), HostError> {
    let target = instance.load(guest, sp + 8)?;
    let mut mem = memory(guest)?;
    let Some(dst) = target.as_bytes() else {
        return mem.write_u8(sp + 48, 0);
    };

    let src = mem.slice(sp + 16)?;
    let mut dst = dst.borrow_mut();
    let n = dst.len().min(src.len());
    dst[..n].copy_from_slice(&src[..n]);

    mem.write_i64(sp + 40, n as i64)?;
    mem.write_u8(sp + 48, 1)
}
