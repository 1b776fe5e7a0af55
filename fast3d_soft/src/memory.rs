//! Access to the memory that display lists and their payloads live in.

use bytemuck::cast_slice;

use crate::error::MemoryError;

/// Big endian reads from console memory.
///
/// Addresses passed to these methods are already resolved to physical addresses (see
/// [SegmentTable::resolve]).
pub trait GfxMemory {
    /// Reads `dst.len()` bytes starting at `addr + offset`.
    fn read_u8(&self, dst: &mut [u8], addr: u32, offset: usize) -> Result<(), MemoryError>;

    /// Reads `dst.len()` u16s starting at `addr + offset`.
    fn read_u16(&self, dst: &mut [u16], addr: u32, offset: usize) -> Result<(), MemoryError> {
        let mut bytes = vec![0; 2 * dst.len()];
        self.read_u8(&mut bytes, addr, offset)?;
        for (d, b) in dst.iter_mut().zip(bytes.chunks_exact(2)) {
            *d = u16::from_be_bytes([b[0], b[1]]);
        }
        Ok(())
    }

    /// Reads `dst.len()` u32s starting at `addr + offset`.
    fn read_u32(&self, dst: &mut [u32], addr: u32, offset: usize) -> Result<(), MemoryError> {
        let mut bytes = vec![0; 4 * dst.len()];
        self.read_u8(&mut bytes, addr, offset)?;
        for (d, b) in dst.iter_mut().zip(bytes.chunks_exact(4)) {
            *d = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
        }
        Ok(())
    }

    /// Reads `dst.len()` i16s starting at `addr + offset`.
    fn read_i16(&self, dst: &mut [i16], addr: u32, offset: usize) -> Result<(), MemoryError> {
        let mut words = vec![0u16; dst.len()];
        self.read_u16(&mut words, addr, offset)?;
        dst.copy_from_slice(cast_slice(&words[..]));
        Ok(())
    }

    /// Reads `len` bytes into a new vector.
    fn read_bytes(&self, addr: u32, offset: usize, len: usize) -> Result<Vec<u8>, MemoryError> {
        let mut bytes = vec![0; len];
        self.read_u8(&mut bytes, addr, offset)?;
        Ok(bytes)
    }
}

/// The 16 entry RSP segment table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentTable([u32; 16]);

impl SegmentTable {
    const K0_BIT: u32 = 0x8000_0000;
    const PHYSICAL_MASK: u32 = 0x1FFF_FFFF;

    /// Sets the base of `seg`. Out of range segments are ignored.
    pub fn set(&mut self, seg: u32, base: u32) {
        if let Some(entry) = self.0.get_mut(seg as usize) {
            *entry = base & Self::PHYSICAL_MASK;
        }
    }

    /// Resolves a segmented (`seg << 24 | offset`) or KSEG0 address to a physical address.
    pub fn resolve(&self, addr: u32) -> u32 {
        if addr & Self::K0_BIT != 0 {
            addr & Self::PHYSICAL_MASK
        } else {
            let seg = ((addr >> 24) & 0xF) as usize;
            self.0[seg].wrapping_add(addr & 0x00FF_FFFF)
        }
    }
}

/// A flat byte buffer standing in for RDRAM.
#[derive(Debug, Clone, Default)]
pub struct Rdram {
    bytes: Vec<u8>,
}

impl Rdram {
    /// Allocates `size` zeroed bytes.
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0; size],
        }
    }

    #[allow(missing_docs)]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn range(&self, addr: u32, len: usize) -> Result<std::ops::Range<usize>, MemoryError> {
        let start = addr as usize;
        match start.checked_add(len) {
            Some(end) if end <= self.bytes.len() => Ok(start..end),
            _ => Err(MemoryError::OutOfBounds { addr, len }),
        }
    }

    /// Writes raw bytes at a physical address.
    pub fn write_bytes(&mut self, addr: u32, data: &[u8]) -> Result<(), MemoryError> {
        let range = self.range(addr, data.len())?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    /// Writes big endian u16s.
    pub fn write_u16(&mut self, addr: u32, data: &[u16]) -> Result<(), MemoryError> {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_be_bytes()).collect();
        self.write_bytes(addr, &bytes)
    }

    /// Writes big endian u32s.
    pub fn write_u32(&mut self, addr: u32, data: &[u32]) -> Result<(), MemoryError> {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_be_bytes()).collect();
        self.write_bytes(addr, &bytes)
    }
}

impl GfxMemory for Rdram {
    fn read_u8(&self, dst: &mut [u8], addr: u32, offset: usize) -> Result<(), MemoryError> {
        let start = u32::try_from(offset)
            .ok()
            .and_then(|offset| addr.checked_add(offset))
            .ok_or(MemoryError::InvalidAddress(addr))?;
        let range = self.range(start, dst.len())?;
        dst.copy_from_slice(&self.bytes[range]);
        Ok(())
    }
}
