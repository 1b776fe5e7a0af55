//! Typed display list commands.
//!
//! Every supported microcode layout decodes into the same [GfxCommand] set, so the
//! interpreter never looks at raw bit positions.

#![allow(missing_docs)]

use core::fmt;

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};

use crate::decode::RawCommand;

/// The wire layout of the command stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MicrocodeVersion {
    /// Original Fast3D.
    F3d,
    /// Fast3DEX: F3D opcodes with wider vertex indices and two-triangle commands.
    F3dex,
    /// Fast3DEX2: a renumbered opcode table and a different geometry mode layout.
    F3dex2,
}

impl Default for MicrocodeVersion {
    fn default() -> Self {
        Self::F3d
    }
}

/// A decoded display list command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GfxCommand {
    NoOp,
    Unknown(RawCommand),

    // SP commands
    SPMatrix {
        matrix: u32,
        params: MatrixParams,
    },
    SPPopMatrix(u32),
    SPViewport(u32),
    SPLight {
        light: u32,
        index: u32,
    },
    SPVertex {
        v: u32,
        n: u32,
        v0: u32,
    },
    SPDisplayList(u32),
    SPBranchList(u32),
    SPEndDisplayList,
    SPOneTriangle([u32; 3]),
    SPTwoTriangles([u32; 3], [u32; 3]),
    /// Light count including the ambient light.
    SPNumLights(u32),
    SPSegment {
        seg: u32,
        base: u32,
    },
    SPFogFactor {
        mul: i16,
        offset: i16,
    },
    SPTexture {
        sc: u16,
        tc: u16,
        level: u32,
        tile: u32,
        on: bool,
    },
    SPGeometryMode {
        clear: GeometryModes,
        set: GeometryModes,
    },

    // DP commands
    DPSetOtherMode {
        shift: u32,
        len: u32,
        data: u64,
    },
    DPSetColorImage(Image),
    DPSetDepthImage(u32),
    DPSetTextureImage(Image),
    DPSetCombineMode(CombineMode),
    DPSetEnvColor(Rgba32),
    DPSetPrimColor(Rgba32),
    DPSetBlendColor(Rgba32),
    DPSetFogColor(Rgba32),
    DPSetFillColor(u32),
    DPFillRectangle(Rectangle<u32>),
    DPSetTile(TileIndex, TileParams),
    DPLoadTile(TileIndex, TileSize),
    DPLoadBlock(TileIndex, TextureBlock),
    DPSetTileSize(TileIndex, TileSize),
    DPLoadTLUTCmd(TileIndex, u32),
    DPSetScissor(ScissorMode, Rectangle<u16>),
    DPFullSync,
    DPTileSync,
    DPPipeSync,
    DPLoadSync,
    DPTextureRectangle(TextureRectangle),
    DPTextureRectangleFlip(TextureRectangle),
}

bitflags! {
    /// Matrix command parameters, always in the F3D bit layout.
    pub struct MatrixParams: u8 {
        const PROJECTION = 0x01;
        const LOAD       = 0x02;
        const PUSH       = 0x04;
    }
}

bitflags! {
    /// Geometry mode bits, always in the F3D bit layout.
    pub struct GeometryModes: u32 {
        const ZBUFFER             = 0x00000001;
        const TEXTURE_ENABLE      = 0x00000002;
        const SHADE               = 0x00000004;
        const SHADING_SMOOTH      = 0x00000200;
        const CULL_FRONT          = 0x00001000;
        const CULL_BACK           = 0x00002000;
        const CULL_BOTH           = 0x00003000;
        const FOG                 = 0x00010000;
        const LIGHTING            = 0x00020000;
        const TEXTURE_GEN         = 0x00040000;
        const TEXTURE_GEN_LINEAR  = 0x00080000;
        const LOD                 = 0x00100000;
        const CLIPPING            = 0x00800000;
    }
}

impl Default for GeometryModes {
    fn default() -> Self {
        Self::empty()
    }
}

impl GeometryModes {
    /// Translates F3DEX2 geometry bits, which move culling and smooth shading.
    pub fn from_f3dex2(bits: u32) -> Self {
        const MOVED: [(u32, GeometryModes); 3] = [
            (0x00000200, GeometryModes::CULL_FRONT),
            (0x00000400, GeometryModes::CULL_BACK),
            (0x00200000, GeometryModes::SHADING_SMOOTH),
        ];
        let shared = Self::ZBUFFER
            | Self::SHADE
            | Self::FOG
            | Self::LIGHTING
            | Self::TEXTURE_GEN
            | Self::TEXTURE_GEN_LINEAR
            | Self::LOD
            | Self::CLIPPING;
        let mut modes = Self::from_bits_truncate(bits) & shared;
        for (bit, mode) in MOVED {
            if bits & bit != 0 {
                modes |= mode;
            }
        }
        modes
    }
}

/// The 64 bit RDP other mode word: the low half in bits 0-31, the high half in bits 32-63.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OtherMode(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u8)]
pub enum CycleType {
    OneCycle = 0,
    TwoCycle = 1,
    Copy = 2,
    Fill = 3,
}

impl OtherMode {
    const Z_UPD: u32 = 0x0020;
    const ZMODE_DEC: u32 = 0x0c00;
    const CVG_X_ALPHA: u32 = 0x1000;
    const BL_A_MEM: u32 = 1 << 18;
    const BL_CLR_FOG: u32 = 3;
    const AC_DITHER: u32 = 3;
    const TEXT_FILT_MASK: u32 = 3 << 12;

    pub fn low(self) -> u32 {
        self.0 as u32
    }

    pub fn high(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Replaces `len` bits starting at `shift`.
    pub fn set(&mut self, shift: u32, len: u32, data: u64) {
        if shift >= 64 {
            return;
        }
        let mask = 1u64.checked_shl(len).map_or(u64::MAX, |v| v - 1) << shift;
        self.0 = (self.0 & !mask) | (data & mask);
    }

    pub fn cycle_type(self) -> CycleType {
        match (self.high() >> 20) & 3 {
            0 => CycleType::OneCycle,
            1 => CycleType::TwoCycle,
            2 => CycleType::Copy,
            _ => CycleType::Fill,
        }
    }

    pub fn point_filter(self) -> bool {
        self.high() & Self::TEXT_FILT_MASK == 0
    }

    pub fn z_update(self) -> bool {
        self.low() & Self::Z_UPD != 0
    }

    pub fn zmode_decal(self) -> bool {
        self.low() & Self::ZMODE_DEC == Self::ZMODE_DEC
    }

    /// Blending with `1 - alpha` rather than the memory alpha.
    pub fn alpha_blend(self) -> bool {
        self.low() & Self::BL_A_MEM == 0
    }

    pub fn fog_blend(self) -> bool {
        self.low() >> 30 == Self::BL_CLR_FOG
    }

    pub fn texture_edge(self) -> bool {
        self.low() & Self::CVG_X_ALPHA != 0
    }

    pub fn noise(self) -> bool {
        self.low() & Self::AC_DITHER == Self::AC_DITHER
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Image {
    pub fmt: ImageFormat,
    pub size: ComponentSize,
    pub width: u32,
    pub img: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u8)]
pub enum ImageFormat {
    Rgba = 0,
    Yuv = 1,
    Ci = 2,
    Ia = 3,
    I = 4,
}

impl Default for ImageFormat {
    fn default() -> Self {
        Self::Rgba
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u8)]
pub enum ComponentSize {
    Bits4 = 0,
    Bits8 = 1,
    Bits16 = 2,
    Bits32 = 3,
}

impl Default for ComponentSize {
    fn default() -> Self {
        Self::Bits4
    }
}

impl ComponentSize {
    /// Log2 of the bytes per texel used when sizing tmem loads. Sub-byte texels count as one.
    pub fn load_shift(self) -> u32 {
        match self {
            ComponentSize::Bits4 | ComponentSize::Bits8 => 0,
            ComponentSize::Bits16 => 1,
            ComponentSize::Bits32 => 2,
        }
    }
}

/// A packed combine mode: the rgb equation in bits 0-11, alpha in bits 12-23.
///
/// Each equation holds four 3 bit inputs `[a, b, c, d]` for `(a - b) * c + d`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CombineMode(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
#[repr(C)]
pub struct Rgba32 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba32 {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn from_u32(w: u32) -> Self {
        Self {
            r: (w >> 24) as u8,
            g: (w >> 16) as u8,
            b: (w >> 8) as u8,
            a: w as u8,
        }
    }

    pub fn rgb(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }

    /// Expands an RGBA 5551 texel or fill color.
    pub fn from_rgba16(v: u16) -> Self {
        let scale = |c: u16| ((c & 0x1F) as u32 * 255 / 31) as u8;
        Self {
            r: scale(v >> 11),
            g: scale(v >> 6),
            b: scale(v >> 1),
            a: if v & 1 != 0 { 0xFF } else { 0 },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rectangle<T> {
    pub ulx: T,
    pub uly: T,
    pub lrx: T,
    pub lry: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TileParams {
    pub fmt: ImageFormat,
    pub size: ComponentSize,
    pub line: u32,
    pub tmem: u32,
    pub palette: u32,
    pub cmt: TileWrap,
    pub maskt: u32,
    pub shiftt: u32,
    pub cms: TileWrap,
    pub masks: u32,
    pub shifts: u32,
}

/// Per axis wrap bits of a tile (`G_TX_MIRROR`, `G_TX_CLAMP`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TileWrap {
    pub mirror: bool,
    pub clamp: bool,
}

impl From<u8> for TileWrap {
    fn from(v: u8) -> Self {
        Self {
            mirror: v & 0x1 != 0,
            clamp: v & 0x2 != 0,
        }
    }
}

impl TileWrap {
    pub const WRAP: Self = Self {
        mirror: false,
        clamp: false,
    };
    pub const MIRROR: Self = Self {
        mirror: true,
        clamp: false,
    };
    pub const CLAMP: Self = Self {
        mirror: false,
        clamp: true,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureBlock {
    pub uls: u32,
    pub ult: u32,
    pub lrs: u32,
    pub dxt: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TileSize {
    pub uls: u32,
    pub ult: u32,
    pub lrs: u32,
    pub lrt: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileIndex(pub u8);

impl TileIndex {
    pub const LOAD: TileIndex = TileIndex(7);
    pub const RENDER: TileIndex = TileIndex(0);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u8)]
#[allow(clippy::enum_variant_names)]
pub enum ScissorMode {
    NonInterlace = 0,
    OddInterlace = 3,
    EvenInterlace = 2,
}

impl Default for ScissorMode {
    fn default() -> Self {
        Self::NonInterlace
    }
}

/// A texture rectangle in 10.2 screen coordinates with S10.5 texture coordinates and
/// S5.10 texture steps.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureRectangle {
    pub rect: Rectangle<u32>,
    pub tile: TileIndex,
    pub s: i16,
    pub t: i16,
    pub dsdx: i16,
    pub dtdy: i16,
}

impl fmt::Debug for TextureRectangle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TextureRectangle {{ rect: ({}, {})-({}, {}), tile: {}, st: ({}, {}), step: ({}, {}) }}",
            self.rect.ulx,
            self.rect.uly,
            self.rect.lrx,
            self.rect.lry,
            self.tile.0,
            self.s,
            self.t,
            self.dsdx,
            self.dtdy
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_f3dex2_geometry_modes() {
        let modes = GeometryModes::from_f3dex2(0x00000001 | 0x00000400 | 0x00200000 | 0x00020000);
        assert_eq!(
            modes,
            GeometryModes::ZBUFFER
                | GeometryModes::CULL_BACK
                | GeometryModes::SHADING_SMOOTH
                | GeometryModes::LIGHTING
        );
        assert_eq!(GeometryModes::from_f3dex2(0x200), GeometryModes::CULL_FRONT);
    }

    #[test]
    fn test_other_mode_set() {
        let mut om = OtherMode::default();
        om.set(32 + 20, 2, 2 << 52);
        assert_eq!(om.cycle_type(), CycleType::Copy);
        om.set(3, 29, 0x0c30 | (1 << 18));
        assert!(om.z_update());
        assert!(om.zmode_decal());
        assert!(!om.alpha_blend());
        om.set(3, 29, 0xffff_fff8);
        assert!(om.fog_blend());
        assert_eq!(om.cycle_type(), CycleType::Copy);
    }
}
