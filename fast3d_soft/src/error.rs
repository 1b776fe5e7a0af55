#![allow(missing_docs)]

use core::fmt;
use std::error;

use crate::cmd::{ComponentSize, ImageFormat};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    InvalidAddress(u32),
    OutOfBounds { addr: u32, len: usize },
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::InvalidAddress(addr) => write!(f, "invalid address: {:#010X}", addr),
            MemoryError::OutOfBounds { addr, len } => {
                write!(f, "read of {} bytes at {:#010X} is out of bounds", len, addr)
            }
        }
    }
}

impl error::Error for MemoryError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GfxError {
    Memory(MemoryError),
    CallStackOverflow { depth: usize },
    TextureTooLarge { size: u32 },
    UnsupportedTextureFormat { fmt: ImageFormat, siz: ComponentSize },
    OutOfTextureSlots,
    UnsupportedPropertyCount(usize),
    InvalidVertexIndex(u32),
}

impl fmt::Display for GfxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GfxError::Memory(error) => write!(f, "{}", error),
            GfxError::CallStackOverflow { depth } => {
                write!(f, "display list call depth exceeded {}", depth)
            }
            GfxError::TextureTooLarge { size } => {
                write!(f, "texture load of {} bytes exceeds tmem", size)
            }
            GfxError::UnsupportedTextureFormat { fmt, siz } => {
                write!(f, "unsupported texture format: {:?} {:?}", fmt, siz)
            }
            GfxError::OutOfTextureSlots => write!(f, "out of texture slots"),
            GfxError::UnsupportedPropertyCount(n) => {
                write!(f, "no rasterizer for {} vertex properties", n)
            }
            GfxError::InvalidVertexIndex(i) => write!(f, "invalid vertex index: {}", i),
        }
    }
}

impl error::Error for GfxError {}

impl From<MemoryError> for GfxError {
    fn from(v: MemoryError) -> Self {
        Self::Memory(v)
    }
}
