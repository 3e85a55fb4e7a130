//! Memory codec over the hosted module's linear memory
//!
//! All accessors are bounds-checked and little-endian. The module's calling
//! convention passes 64-bit integers as two consecutive 32-bit words (low word
//! first), so `read_i64`/`write_i64` go through two word accesses instead of a
//! native 64-bit access.
//!
//! A view is short-lived: build one from [`Guest::memory`](super::Guest::memory)
//! for each access and drop it before anything can re-enter the module, since
//! the module's memory may grow (and move) underneath it.

use super::HostError;
use byteorder::{ByteOrder, LittleEndian};
use std::borrow::Cow;

/// 2^32, the weight of the high word in a split 64-bit integer
const HIGH_WORD: i64 = 4_294_967_296;

/// A bounds-checked view of linear memory
pub struct LinearMemory<'a> {
    data: &'a mut [u8],
}

impl<'a> LinearMemory<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        LinearMemory { data }
    }

    /// Size of the view in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check that `[addr, addr + size)` lies inside memory, returning the start index.
    #[inline]
    fn check_bounds(&self, addr: u64, size: usize) -> Result<usize, HostError> {
        let out_of_bounds = || HostError::MemoryOutOfBounds {
            addr,
            len: size as u64,
        };
        let start = usize::try_from(addr).map_err(|_| out_of_bounds())?;
        let end = start.checked_add(size).ok_or_else(out_of_bounds)?;
        if end > self.data.len() {
            return Err(out_of_bounds());
        }
        Ok(start)
    }

    pub fn read_u8(&self, addr: u32) -> Result<u8, HostError> {
        let addr = self.check_bounds(addr as u64, 1)?;
        Ok(self.data[addr])
    }

    pub fn write_u8(&mut self, addr: u32, value: u8) -> Result<(), HostError> {
        let addr = self.check_bounds(addr as u64, 1)?;
        self.data[addr] = value;
        Ok(())
    }

    pub fn read_u32(&self, addr: u32) -> Result<u32, HostError> {
        let addr = self.check_bounds(addr as u64, 4)?;
        Ok(LittleEndian::read_u32(&self.data[addr..addr + 4]))
    }

    pub fn write_u32(&mut self, addr: u32, value: u32) -> Result<(), HostError> {
        let addr = self.check_bounds(addr as u64, 4)?;
        LittleEndian::write_u32(&mut self.data[addr..addr + 4], value);
        Ok(())
    }

    pub fn read_i32(&self, addr: u32) -> Result<i32, HostError> {
        Ok(self.read_u32(addr)? as i32)
    }

    pub fn write_i32(&mut self, addr: u32, value: i32) -> Result<(), HostError> {
        self.write_u32(addr, value as u32)
    }

    /// Read a 64-bit integer stored as (low u32, high i32).
    pub fn read_i64(&self, addr: u32) -> Result<i64, HostError> {
        let low = self.read_u32(addr)? as i64;
        let high = self.read_i32(addr.wrapping_add(4))? as i64;
        Ok(low + high * HIGH_WORD)
    }

    /// Write a 64-bit integer as (low u32, high u32).
    pub fn write_i64(&mut self, addr: u32, value: i64) -> Result<(), HostError> {
        self.check_bounds(addr as u64, 8)?;
        self.write_u32(addr, value as u32)?;
        self.write_u32(addr + 4, value.div_euclid(HIGH_WORD) as u32)
    }

    /// Read the raw bit pattern of a 64-bit float.
    pub fn read_f64(&self, addr: u32) -> Result<f64, HostError> {
        let addr = self.check_bounds(addr as u64, 8)?;
        Ok(LittleEndian::read_f64(&self.data[addr..addr + 8]))
    }

    pub fn write_f64(&mut self, addr: u32, value: f64) -> Result<(), HostError> {
        let addr = self.check_bounds(addr as u64, 8)?;
        LittleEndian::write_f64(&mut self.data[addr..addr + 8], value);
        Ok(())
    }

    /// Borrow `len` bytes starting at `addr`.
    pub fn bytes(&self, addr: u64, len: u64) -> Result<&[u8], HostError> {
        let size = usize::try_from(len).map_err(|_| HostError::MemoryOutOfBounds { addr, len })?;
        let start = self.check_bounds(addr, size)?;
        Ok(&self.data[start..start + size])
    }

    pub fn bytes_mut(&mut self, addr: u64, len: u64) -> Result<&mut [u8], HostError> {
        let size = usize::try_from(len).map_err(|_| HostError::MemoryOutOfBounds { addr, len })?;
        let start = self.check_bounds(addr, size)?;
        Ok(&mut self.data[start..start + size])
    }

    pub fn write_bytes(&mut self, addr: u32, bytes: &[u8]) -> Result<(), HostError> {
        let addr = self.check_bounds(addr as u64, bytes.len())?;
        self.data[addr..addr + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Read a (pointer, length) pair of 64-bit integers at `addr`.
    pub fn read_pair(&self, addr: u32) -> Result<(u64, u64), HostError> {
        let ptr = self.read_i64(addr)?;
        let len = self.read_i64(addr.wrapping_add(8))?;
        let (Ok(ptr), Ok(len)) = (u64::try_from(ptr), u64::try_from(len)) else {
            return Err(HostError::MemoryOutOfBounds {
                addr: ptr as u64,
                len: len as u64,
            });
        };
        Ok((ptr, len))
    }

    /// The byte range described by the (pointer, length) pair at `addr`.
    pub fn slice(&self, addr: u32) -> Result<&[u8], HostError> {
        let (ptr, len) = self.read_pair(addr)?;
        self.bytes(ptr, len)
    }

    pub fn slice_mut(&mut self, addr: u32) -> Result<&mut [u8], HostError> {
        let (ptr, len) = self.read_pair(addr)?;
        self.bytes_mut(ptr, len)
    }

    /// Decode the UTF-8 string described by the (pointer, length) pair at `addr`.
    ///
    /// Invalid sequences are replaced, as the host language's decoder does.
    pub fn read_string(&self, addr: u32) -> Result<Cow<'_, str>, HostError> {
        Ok(String::from_utf8_lossy(self.slice(addr)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_access_is_little_endian() {
        let mut data = vec![0u8; 16];
        let mut mem = LinearMemory::new(&mut data);
        mem.write_u32(4, 0x1234_5678).unwrap();
        assert_eq!(mem.read_u32(4).unwrap(), 0x1234_5678);
        assert_eq!(mem.bytes(4, 4).unwrap(), &[0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn test_i64_is_split_low_word_first() {
        let mut data = vec![0u8; 16];
        let mut mem = LinearMemory::new(&mut data);
        mem.write_i64(0, 0x0000_0002_0000_0001).unwrap();
        assert_eq!(mem.read_u32(0).unwrap(), 1);
        assert_eq!(mem.read_u32(4).unwrap(), 2);
        assert_eq!(mem.read_i64(0).unwrap(), 0x0000_0002_0000_0001);

        mem.write_i64(8, -5).unwrap();
        assert_eq!(mem.read_i64(8).unwrap(), -5);
        assert_eq!(mem.read_u32(12).unwrap(), 0xFFFF_FFFF);
    }

    #[test]
    fn test_f64_bit_pattern() {
        let mut data = vec![0u8; 8];
        let mut mem = LinearMemory::new(&mut data);
        mem.write_f64(0, 1.5).unwrap();
        assert_eq!(mem.read_f64(0).unwrap().to_bits(), 1.5f64.to_bits());
        assert_eq!(mem.read_u32(4).unwrap(), 0x3FF8_0000);
    }

    #[test]
    fn test_bounds_checking() {
        let mut data = vec![0u8; 8];
        let mut mem = LinearMemory::new(&mut data);
        assert!(mem.read_u32(5).is_err());
        assert!(mem.write_u32(u32::MAX, 1).is_err());
        assert!(mem.write_i64(4, 1).is_err());
        // the failed write left nothing behind
        assert_eq!(mem.read_u32(4).unwrap(), 0);
        assert!(mem.bytes(8, 0).is_ok());
        assert!(mem.bytes(8, 1).is_err());
    }

    #[test]
    fn test_slice_and_string_pairs() {
        let mut data = vec![0u8; 64];
        let mut mem = LinearMemory::new(&mut data);
        mem.write_bytes(32, b"hello").unwrap();
        mem.write_i64(0, 32).unwrap();
        mem.write_i64(8, 5).unwrap();

        assert_eq!(mem.slice(0).unwrap(), b"hello");
        assert_eq!(mem.read_string(0).unwrap(), "hello");

        mem.slice_mut(0).unwrap()[0] = b'j';
        assert_eq!(mem.read_string(0).unwrap(), "jello");

        mem.write_i64(16, -1).unwrap();
        mem.write_i64(24, 1).unwrap();
        assert!(mem.slice(16).is_err());

        // invalid UTF-8 decodes to the replacement character
        mem.write_bytes(40, &[b'a', 0xFF]).unwrap();
        mem.write_i64(0, 40).unwrap();
        mem.write_i64(8, 2).unwrap();
        assert_eq!(mem.read_string(0).unwrap(), "a\u{FFFD}");
    }
}
