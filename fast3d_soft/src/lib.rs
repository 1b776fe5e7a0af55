//! Decoding, interpreting, and software rendering of Nintendo 64 Fast3D display lists.
//!
//! Geometry is transformed, lit, clipped and rasterized in 32.32 fixed point. Display lists
//! are read from any [GfxMemory](memory::GfxMemory) implementation, interpreted by a
//! [GraphicsContext](interpret::GraphicsContext), and submitted to a
//! [RenderingBackend](backend::RenderingBackend). [SoftwareBackend](soft::SoftwareBackend)
//! renders into an in-memory framebuffer.
//!
//! Note: this is not intended to be a cycle accurate RDP. Coverage, dithering and
//! two-cycle combining are not emulated.

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![allow(clippy::map_entry, clippy::needless_range_loop)]

pub use error::*;

pub mod backend;
pub mod builder;
pub mod clip;
pub mod cmd;
pub mod combiner;
pub mod config;
pub mod decode;
mod error;
pub mod fixed;
pub mod interpret;
pub mod memory;
pub mod raster;
pub mod rsp;
pub mod soft;
pub mod texture;
pub mod util;
