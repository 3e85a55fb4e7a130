//! NaN-boxing of values into 8-byte memory slots
//!
//! A slot holds either a plain double, or a quiet NaN whose high word carries
//! a type flag and whose low word is a value table id:
//!
//! ```text
//!  high word                    low word
//! +----------------------------+-------------+
//! | 0x7FF80000 | type flag     |  id         |
//! +----------------------------+-------------+
//! ```
//!
//! An all-zero slot is Undefined. NaN itself is boxed as id 0 with flag 0,
//! so a raw NaN payload is never mistaken for a reference.

use super::memory::LinearMemory;
use super::{HostError, Value, ValueTable};

/// High word of every boxed slot
pub const NAN_HEAD: u32 = 0x7FF8_0000;

/// Size of one boxed slot in bytes
pub const SLOT_SIZE: u32 = 8;

/// Encode `value` into the slot at `addr`.
///
/// Non-zero, non-NaN numbers are written inline. Everything else except
/// Undefined takes a reference in `table`, so the module now owns one count
/// on the id it reads back.
pub fn store_value(
    mem: &mut LinearMemory<'_>,
    table: &mut ValueTable,
    addr: u32,
    value: Value,
) -> Result<(), HostError> {
    match value {
        Value::Number(n) if n.is_nan() => {
            mem.write_u32(addr.wrapping_add(4), NAN_HEAD)?;
            return mem.write_u32(addr, 0);
        }
        Value::Number(n) if n != 0.0 => return mem.write_f64(addr, n),
        Value::Undefined => return mem.write_f64(addr, 0.0),
        _ => {}
    }

    // fail before taking a reference the module would never see
    mem.bytes(addr as u64, SLOT_SIZE as u64)?;

    let flag = value.type_flag();
    let id = table.acquire(value);
    mem.write_u32(addr + 4, NAN_HEAD | flag)?;
    mem.write_u32(addr, id)
}

/// Decode the slot at `addr`.
pub fn load_value(mem: &LinearMemory<'_>, table: &ValueTable, addr: u32) -> Result<Value, HostError> {
    let f = mem.read_f64(addr)?;
    if f == 0.0 {
        return Ok(Value::Undefined);
    }
    if !f.is_nan() {
        return Ok(Value::Number(f));
    }
    table.get(mem.read_u32(addr)?)
}

/// Decode the slice of boxed slots described by the (pointer, length) pair at `addr`.
pub fn load_slice_of_values(mem: &LinearMemory<'_>, table: &ValueTable, addr: u32) -> Result<Vec<Value>, HostError> {
    let (ptr, len) = mem.read_pair(addr)?;
    // validates the whole range up front
    mem.bytes(ptr, len.saturating_mul(SLOT_SIZE as u64))?;

    let base = ptr as u32;
    (0..len as u32)
        .map(|i| load_value(mem, table, base + i * SLOT_SIZE))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Function, Object, RefCount};

    fn table() -> ValueTable {
        ValueTable::with_predefined([Value::Number(f64::NAN), Value::Number(0.0), Value::Null])
    }

    #[test]
    fn test_numbers_are_inlined() {
        let mut data = vec![0u8; 16];
        let mut mem = LinearMemory::new(&mut data);
        let mut table = table();

        for n in [1.0, -2.5, f64::MIN_POSITIVE, 1e300, f64::INFINITY] {
            store_value(&mut mem, &mut table, 0, Value::Number(n)).unwrap();
            assert_eq!(mem.read_f64(0).unwrap().to_bits(), n.to_bits());
            let loaded = load_value(&mem, &table, 0).unwrap();
            assert_eq!(loaded.as_number().unwrap().to_bits(), n.to_bits());
        }
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_undefined_is_all_zero() {
        let mut data = vec![0xFFu8; 8];
        let mut mem = LinearMemory::new(&mut data);
        let mut table = table();

        store_value(&mut mem, &mut table, 0, Value::Undefined).unwrap();
        assert_eq!(mem.bytes(0, 8).unwrap(), &[0u8; 8]);
        assert_eq!(load_value(&mem, &table, 0).unwrap(), Value::Undefined);
    }

    #[test]
    fn test_zero_uses_the_pinned_id() {
        let mut data = vec![0u8; 8];
        let mut mem = LinearMemory::new(&mut data);
        let mut table = table();

        store_value(&mut mem, &mut table, 0, Value::Number(-0.0)).unwrap();
        assert_eq!(mem.read_u32(0).unwrap(), 1);
        assert_eq!(mem.read_u32(4).unwrap(), NAN_HEAD);
        assert_eq!(load_value(&mem, &table, 0).unwrap(), Value::Number(0.0));
        assert_eq!(table.ref_count(1), Some(RefCount::Pinned));
    }

    #[test]
    fn test_nan_does_not_disturb_neighbouring_slots() {
        let mut data = vec![0u8; 16];
        let mut mem = LinearMemory::new(&mut data);
        let mut table = table();

        store_value(&mut mem, &mut table, 8, Value::string("s")).unwrap();
        store_value(&mut mem, &mut table, 0, Value::Number(f64::NAN)).unwrap();

        assert_eq!(mem.read_u32(0).unwrap(), 0);
        assert_eq!(mem.read_u32(4).unwrap(), NAN_HEAD);
        assert_eq!(mem.read_u32(12).unwrap(), NAN_HEAD | 2);
        assert!(load_value(&mem, &table, 0).unwrap().as_number().unwrap().is_nan());
        assert_eq!(load_value(&mem, &table, 8).unwrap(), Value::string("s"));
    }

    #[test]
    fn test_references_round_trip_with_type_flags() {
        let mut data = vec![0u8; 8];
        let mut mem = LinearMemory::new(&mut data);
        let mut table = table();

        let function = Value::Function(Function::new("f", |_, _, _| Ok(Value::Null)));
        let cases = [
            (Value::object(Object::new()), 1),
            (Value::array(vec![]), 1),
            (Value::bytes(vec![0]), 1),
            (Value::string("str"), 2),
            (Value::symbol("sym"), 3),
            (function, 4),
            (Value::Null, 0),
            (Value::Bool(false), 0),
        ];
        for (value, flag) in cases {
            store_value(&mut mem, &mut table, 0, value.clone()).unwrap();
            assert_eq!(mem.read_u32(4).unwrap(), NAN_HEAD | flag, "{value:?}");
            let id = mem.read_u32(0).unwrap();
            assert_eq!(load_value(&mem, &table, 0).unwrap(), value);

            store_value(&mut mem, &mut table, 0, value.clone()).unwrap();
            assert_eq!(mem.read_u32(0).unwrap(), id, "{value:?} was re-registered");
        }
    }

    #[test]
    fn test_failed_store_takes_no_reference() {
        let mut data = vec![0u8; 4];
        let mut mem = LinearMemory::new(&mut data);
        let mut table = table();
        let object = Value::object(Object::new());

        assert!(store_value(&mut mem, &mut table, 0, object.clone()).is_err());
        assert_eq!(table.id_of(&object), None);
    }

    #[test]
    fn test_load_slice_of_values() {
        let mut data = vec![0u8; 128];
        let mut mem = LinearMemory::new(&mut data);
        let mut table = table();

        store_value(&mut mem, &mut table, 64, Value::Number(3.0)).unwrap();
        store_value(&mut mem, &mut table, 72, Value::string("x")).unwrap();
        store_value(&mut mem, &mut table, 80, Value::Undefined).unwrap();
        mem.write_i64(0, 64).unwrap();
        mem.write_i64(8, 3).unwrap();

        let values = load_slice_of_values(&mem, &table, 0).unwrap();
        assert_eq!(values, vec![Value::Number(3.0), Value::string("x"), Value::Undefined]);

        mem.write_i64(8, 100).unwrap();
        assert!(load_slice_of_values(&mem, &table, 0).is_err());
    }
}
