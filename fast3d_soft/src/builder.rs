//! Assembles F3D display lists and their payloads in an [Rdram].
//!
//! Coordinates follow the `gs*` macros: rectangle and scissor corners are whole pixels,
//! while tile sizes and texture rectangles take 10.2 values.

#![allow(missing_docs)]

use crate::{
    cmd::{
        ComponentSize, CycleType, GeometryModes, ImageFormat, MatrixParams, Rgba32, TileIndex,
        TileParams, TileSize, TileWrap,
    },
    decode::RawCommand,
    error::MemoryError,
    memory::Rdram,
    util::{Light, Matrix, Vertex, Viewport},
};

/// `G_CCMUX_*` and `G_ACMUX_*` values accepted by [DisplayListBuilder::set_combine].
pub mod mux {
    pub const COMBINED: u32 = 0;
    pub const TEXEL0: u32 = 1;
    pub const TEXEL1: u32 = 2;
    pub const PRIMITIVE: u32 = 3;
    pub const SHADE: u32 = 4;
    pub const ENVIRONMENT: u32 = 5;
    pub const ONE: u32 = 6;
    pub const TEXEL0_ALPHA: u32 = 8;
    pub const LOD_FRACTION: u32 = 13;
    /// Truncated to each field's width.
    pub const ZERO: u32 = 0x1F;
}

/// Render mode bits for [DisplayListBuilder::set_render_mode].
pub mod render_mode {
    pub const Z_CMP: u32 = 0x0010;
    pub const Z_UPD: u32 = 0x0020;
    pub const ZMODE_DEC: u32 = 0x0C00;
    pub const CVG_X_ALPHA: u32 = 0x1000;
    /// Blend with memory alpha instead of `1 - alpha`.
    pub const BL_A_MEM: u32 = 1 << 18;
    /// Blend the fog color in the first cycle.
    pub const BL_CLR_FOG: u32 = 3 << 30;
}

fn field(v: u32, pos: u32, width: u32) -> u32 {
    (v & ((1 << width) - 1)) << pos
}

fn wrap_bits(wrap: TileWrap) -> u32 {
    wrap.mirror as u32 | (wrap.clamp as u32) << 1
}

/// Packs a color into RGBA 5551.
pub fn rgba16(c: Rgba32) -> u16 {
    let ch = |v: u8| (v as u16 >> 3) & 0x1F;
    ch(c.r) << 11 | ch(c.g) << 6 | ch(c.b) << 1 | (c.a >= 0x80) as u16
}

/// A viewport covering `width` by `height` native pixels.
pub fn screen_viewport(width: i16, height: i16) -> Viewport {
    Viewport {
        scale: [width * 2, height * 2, 511, 0],
        trans: [width * 2, height * 2, 511, 0],
    }
}

#[derive(Debug, Clone, Default)]
pub struct DisplayListBuilder {
    commands: Vec<RawCommand>,
}

impl DisplayListBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> &[RawCommand] {
        &self.commands
    }

    /// Size of the encoded list in bytes.
    pub fn byte_len(&self) -> usize {
        self.commands.len() * 8
    }

    /// Appends a raw command.
    pub fn raw(&mut self, w0: u32, w1: u32) -> &mut Self {
        self.commands.push(RawCommand::new(w0, w1));
        self
    }

    fn op(&mut self, opcode: u32, w0: u32, w1: u32) -> &mut Self {
        self.raw(opcode << 24 | (w0 & 0x00FF_FFFF), w1)
    }

    /// Writes the encoded list at `addr`.
    pub fn write_to(&self, memory: &mut Rdram, addr: u32) -> Result<(), MemoryError> {
        let words: Vec<u32> = self.commands.iter().flat_map(|c| [c.w0, c.w1]).collect();
        memory.write_u32(addr, &words)
    }

    pub fn no_op(&mut self) -> &mut Self {
        self.op(0x00, 0, 0)
    }

    pub fn matrix(&mut self, addr: u32, params: MatrixParams) -> &mut Self {
        self.op(0x01, field(params.bits() as u32, 16, 8) | 64, addr)
    }

    pub fn pop_matrix(&mut self) -> &mut Self {
        self.op(0xBD, 0, 0)
    }

    pub fn viewport(&mut self, addr: u32) -> &mut Self {
        self.op(0x03, field(0x80, 16, 8) | 16, addr)
    }

    /// Loads light `index`, counting from 0.
    pub fn light(&mut self, addr: u32, index: u32) -> &mut Self {
        self.op(0x03, field(0x86 + 2 * index, 16, 8) | 16, addr)
    }

    /// Sets the number of directional lights. The ambient light follows them.
    pub fn num_lights(&mut self, n: u32) -> &mut Self {
        self.op(0xBC, 2, 0x8000_0000 + 32 * (n + 1))
    }

    pub fn segment(&mut self, seg: u32, base: u32) -> &mut Self {
        self.op(0xBC, field(seg * 4, 8, 16) | 6, base)
    }

    pub fn fog_factor(&mut self, mul: i16, offset: i16) -> &mut Self {
        self.op(0xBC, 8, (mul as u16 as u32) << 16 | offset as u16 as u32)
    }

    pub fn vertex(&mut self, addr: u32, n: u32, v0: u32) -> &mut Self {
        self.op(
            0x04,
            field(n.wrapping_sub(1), 20, 4) | field(v0, 16, 4) | field(n * 16, 0, 16),
            addr,
        )
    }

    pub fn tri1(&mut self, v0: u32, v1: u32, v2: u32) -> &mut Self {
        self.op(
            0xBF,
            0,
            field(v0 * 10, 16, 8) | field(v1 * 10, 8, 8) | field(v2 * 10, 0, 8),
        )
    }

    pub fn display_list(&mut self, addr: u32) -> &mut Self {
        self.op(0x06, 0, addr)
    }

    pub fn branch_list(&mut self, addr: u32) -> &mut Self {
        self.op(0x06, field(1, 16, 8), addr)
    }

    pub fn end(&mut self) -> &mut Self {
        self.op(0xB8, 0, 0)
    }

    pub fn set_geometry_mode(&mut self, modes: GeometryModes) -> &mut Self {
        self.op(0xB7, 0, modes.bits())
    }

    pub fn clear_geometry_mode(&mut self, modes: GeometryModes) -> &mut Self {
        self.op(0xB6, 0, modes.bits())
    }

    /// Enables texturing with S and T scales in 0.16.
    pub fn texture(&mut self, sc: u16, tc: u16, on: bool) -> &mut Self {
        self.op(0xBB, on as u32, (sc as u32) << 16 | tc as u32)
    }

    pub fn set_other_mode_l(&mut self, shift: u32, len: u32, data: u32) -> &mut Self {
        self.op(0xB9, field(shift, 8, 8) | field(len, 0, 8), data)
    }

    /// `shift` counts from bit 0 of the high word.
    pub fn set_other_mode_h(&mut self, shift: u32, len: u32, data: u32) -> &mut Self {
        self.op(0xBA, field(shift, 8, 8) | field(len, 0, 8), data)
    }

    pub fn set_cycle_type(&mut self, cycle_type: CycleType) -> &mut Self {
        self.set_other_mode_h(20, 2, (cycle_type as u32) << 20)
    }

    pub fn set_texture_filter(&mut self, bilinear: bool) -> &mut Self {
        self.set_other_mode_h(12, 2, if bilinear { 2 << 12 } else { 0 })
    }

    /// Sets the render mode bits (`G_MDSFT_RENDERMODE` and up).
    pub fn set_render_mode(&mut self, bits: u32) -> &mut Self {
        self.set_other_mode_l(3, 29, bits)
    }

    /// Sets the same `(a - b) * c + d` equations for both cycles, as mux values.
    pub fn set_combine(&mut self, rgb: [u32; 4], alpha: [u32; 4]) -> &mut Self {
        let [a, b, c, d] = rgb;
        let [aa, ab, ac, ad] = alpha;
        let w0 = field(a, 20, 4)
            | field(c, 15, 5)
            | field(aa, 12, 3)
            | field(ac, 9, 3)
            | field(a, 5, 4)
            | field(c, 0, 5);
        let w1 = field(b, 28, 4)
            | field(b, 24, 4)
            | field(aa, 21, 3)
            | field(ac, 18, 3)
            | field(d, 15, 3)
            | field(ab, 12, 3)
            | field(ad, 9, 3)
            | field(d, 6, 3)
            | field(ab, 3, 3)
            | field(ad, 0, 3);
        self.op(0xFC, w0, w1)
    }

    /// A combine mode that passes `rgb` and `alpha` straight through.
    pub fn set_combine_source(&mut self, rgb: u32, alpha: u32) -> &mut Self {
        use mux::ZERO;
        self.set_combine([ZERO, ZERO, ZERO, rgb], [ZERO, ZERO, ZERO, alpha])
    }

    fn image(
        &mut self,
        opcode: u32,
        fmt: ImageFormat,
        siz: ComponentSize,
        width: u32,
        addr: u32,
    ) -> &mut Self {
        let w0 = field(fmt as u32, 21, 3)
            | field(siz as u32, 19, 2)
            | field(width.wrapping_sub(1), 0, 12);
        self.op(opcode, w0, addr)
    }

    pub fn set_color_image(
        &mut self,
        fmt: ImageFormat,
        siz: ComponentSize,
        width: u32,
        addr: u32,
    ) -> &mut Self {
        self.image(0xFF, fmt, siz, width, addr)
    }

    pub fn set_texture_image(
        &mut self,
        fmt: ImageFormat,
        siz: ComponentSize,
        width: u32,
        addr: u32,
    ) -> &mut Self {
        self.image(0xFD, fmt, siz, width, addr)
    }

    pub fn set_depth_image(&mut self, addr: u32) -> &mut Self {
        self.op(0xFE, 0, addr)
    }

    fn color(&mut self, opcode: u32, c: Rgba32) -> &mut Self {
        self.op(opcode, 0, u32::from_be_bytes([c.r, c.g, c.b, c.a]))
    }

    pub fn set_env_color(&mut self, c: Rgba32) -> &mut Self {
        self.color(0xFB, c)
    }

    pub fn set_prim_color(&mut self, c: Rgba32) -> &mut Self {
        self.color(0xFA, c)
    }

    pub fn set_blend_color(&mut self, c: Rgba32) -> &mut Self {
        self.color(0xF9, c)
    }

    pub fn set_fog_color(&mut self, c: Rgba32) -> &mut Self {
        self.color(0xF8, c)
    }

    /// Sets the fill color to a color packed twice as RGBA 5551.
    pub fn set_fill_color(&mut self, c: Rgba32) -> &mut Self {
        let packed = rgba16(c) as u32;
        self.op(0xF7, 0, packed << 16 | packed)
    }

    /// Fills whole pixels from `(ulx, uly)` to `(lrx, lry)`. In fill and copy mode the lower
    /// right pixel is included.
    pub fn fill_rectangle(&mut self, ulx: u32, uly: u32, lrx: u32, lry: u32) -> &mut Self {
        self.op(
            0xF6,
            field(lrx << 2, 12, 12) | field(lry << 2, 0, 12),
            field(ulx << 2, 12, 12) | field(uly << 2, 0, 12),
        )
    }

    pub fn set_scissor(&mut self, ulx: u32, uly: u32, lrx: u32, lry: u32) -> &mut Self {
        self.op(
            0xED,
            field(ulx << 2, 12, 12) | field(uly << 2, 0, 12),
            field(lrx << 2, 12, 12) | field(lry << 2, 0, 12),
        )
    }

    pub fn set_tile(&mut self, tile: TileIndex, params: TileParams) -> &mut Self {
        let w0 = field(params.fmt as u32, 21, 3)
            | field(params.size as u32, 19, 2)
            | field(params.line, 9, 9)
            | field(params.tmem, 0, 9);
        let w1 = field(tile.0 as u32, 24, 3)
            | field(params.palette, 20, 4)
            | field(wrap_bits(params.cmt), 18, 2)
            | field(params.maskt, 14, 4)
            | field(params.shiftt, 10, 4)
            | field(wrap_bits(params.cms), 8, 2)
            | field(params.masks, 4, 4)
            | field(params.shifts, 0, 4);
        self.op(0xF5, w0, w1)
    }

    fn tile_size_op(&mut self, opcode: u32, tile: TileIndex, size: TileSize) -> &mut Self {
        self.op(
            opcode,
            field(size.uls, 12, 12) | field(size.ult, 0, 12),
            field(tile.0 as u32, 24, 3) | field(size.lrs, 12, 12) | field(size.lrt, 0, 12),
        )
    }

    pub fn set_tile_size(&mut self, tile: TileIndex, size: TileSize) -> &mut Self {
        self.tile_size_op(0xF2, tile, size)
    }

    pub fn load_tile(&mut self, tile: TileIndex, size: TileSize) -> &mut Self {
        self.tile_size_op(0xF4, tile, size)
    }

    /// Loads `texels` texels from the texture image in one block.
    pub fn load_block(&mut self, tile: TileIndex, texels: u32, dxt: u32) -> &mut Self {
        let w1 = field(tile.0 as u32, 24, 3)
            | field(texels.wrapping_sub(1), 12, 12)
            | field(dxt, 0, 12);
        self.op(0xF3, 0, w1)
    }

    pub fn load_tlut(&mut self, tile: TileIndex, count: u32) -> &mut Self {
        self.op(
            0xF0,
            0,
            field(tile.0 as u32, 24, 3) | field(count.wrapping_sub(1), 14, 10),
        )
    }

    fn texture_rectangle_op(
        &mut self,
        opcode: u32,
        [ulx, uly, lrx, lry]: [u32; 4],
        tile: TileIndex,
        [s, t]: [i16; 2],
        [dsdx, dtdy]: [i16; 2],
    ) -> &mut Self {
        let halves = |a: i16, b: i16| (a as u16 as u32) << 16 | b as u16 as u32;
        self.op(
            opcode,
            field(lrx, 12, 12) | field(lry, 0, 12),
            field(tile.0 as u32, 24, 3) | field(ulx, 12, 12) | field(uly, 0, 12),
        )
        // G_RDPHALF_2, G_RDPHALF_CONT
        .op(0xB3, 0, halves(s, t))
        .op(0xB2, 0, halves(dsdx, dtdy))
    }

    /// A texture rectangle with 10.2 corners, S10.5 texture coordinates and S5.10 steps.
    pub fn texture_rectangle(
        &mut self,
        rect: [u32; 4],
        tile: TileIndex,
        st: [i16; 2],
        steps: [i16; 2],
    ) -> &mut Self {
        self.texture_rectangle_op(0xE4, rect, tile, st, steps)
    }

    /// Like [Self::texture_rectangle] with S and T swapped.
    pub fn texture_rectangle_flip(
        &mut self,
        rect: [u32; 4],
        tile: TileIndex,
        st: [i16; 2],
        steps: [i16; 2],
    ) -> &mut Self {
        self.texture_rectangle_op(0xE5, rect, tile, st, steps)
    }

    pub fn pipe_sync(&mut self) -> &mut Self {
        self.op(0xE7, 0, 0)
    }

    pub fn load_sync(&mut self) -> &mut Self {
        self.op(0xE6, 0, 0)
    }

    pub fn tile_sync(&mut self) -> &mut Self {
        self.op(0xE8, 0, 0)
    }

    pub fn full_sync(&mut self) -> &mut Self {
        self.op(0xE9, 0, 0)
    }
}

pub fn write_vertices(
    memory: &mut Rdram,
    addr: u32,
    vertices: &[Vertex],
) -> Result<(), MemoryError> {
    let bytes: Vec<u8> = vertices.iter().flat_map(|v| v.to_bytes()).collect();
    memory.write_bytes(addr, &bytes)
}

pub fn write_matrix(memory: &mut Rdram, addr: u32, m: &Matrix) -> Result<(), MemoryError> {
    memory.write_u32(addr, &m.to_fixed())
}

pub fn write_light(memory: &mut Rdram, addr: u32, light: &Light) -> Result<(), MemoryError> {
    memory.write_bytes(addr, &light.to_bytes())
}

pub fn write_viewport(
    memory: &mut Rdram,
    addr: u32,
    viewport: &Viewport,
) -> Result<(), MemoryError> {
    let halves: Vec<u16> = viewport
        .scale
        .iter()
        .chain(viewport.trans.iter())
        .map(|&v| v as u16)
        .collect();
    memory.write_u16(addr, &halves)
}

/// Writes texels as RGBA 5551.
pub fn write_texture_rgba16(
    memory: &mut Rdram,
    addr: u32,
    texels: &[Rgba32],
) -> Result<(), MemoryError> {
    let halves: Vec<u16> = texels.iter().map(|&c| rgba16(c)).collect();
    memory.write_u16(addr, &halves)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        cmd::{CombineMode, GfxCommand, MicrocodeVersion, Rectangle, TextureRectangle},
        combiner::cc,
        decode::decode_command,
        memory::GfxMemory,
        util::{read_viewport, read_vertices},
    };

    fn decode_all(dl: &DisplayListBuilder) -> Vec<GfxCommand> {
        let mut out = Vec::new();
        let mut raw = dl.commands().iter();
        while let Some(&first) = raw.next() {
            let mut result = decode_command(MicrocodeVersion::F3d, first);
            while !result.is_complete() {
                result = result.next(*raw.next().unwrap());
            }
            out.push(result.complete().unwrap());
        }
        out
    }

    #[test]
    fn test_texture_rectangle_uses_three_commands() {
        let mut dl = DisplayListBuilder::new();
        dl.texture_rectangle(
            [8, 12, 72, 76],
            TileIndex::RENDER,
            [32, -64],
            [1 << 10, -(1 << 10)],
        )
        .end();
        assert_eq!(dl.byte_len(), 32);
        assert_eq!(
            decode_all(&dl),
            vec![
                GfxCommand::DPTextureRectangle(TextureRectangle {
                    rect: Rectangle {
                        ulx: 8,
                        uly: 12,
                        lrx: 72,
                        lry: 76
                    },
                    tile: TileIndex::RENDER,
                    s: 32,
                    t: -64,
                    dsdx: 1 << 10,
                    dtdy: -(1 << 10),
                }),
                GfxCommand::SPEndDisplayList,
            ]
        );
    }

    #[test]
    fn test_combine_and_counts() {
        let mut dl = DisplayListBuilder::new();
        dl.set_combine(
            [mux::TEXEL0, mux::ZERO, mux::SHADE, mux::ZERO],
            [mux::ZERO, mux::ZERO, mux::ZERO, mux::ENVIRONMENT],
        )
        .vertex(0x0600_0000, 4, 2)
        .num_lights(1)
        .segment(6, 0x1000);

        let cmds = decode_all(&dl);
        let combine = match cmds[0] {
            GfxCommand::DPSetCombineMode(mode) => mode,
            other => panic!("{:?}", other),
        };
        assert_eq!(combine.input(0, 0), cc::TEXEL0);
        assert_eq!(combine.input(0, 2), cc::SHADE);
        assert_eq!(combine.input(1, 3), cc::ENV);
        assert_ne!(combine, CombineMode::default());
        assert_eq!(
            cmds[1..],
            [
                GfxCommand::SPVertex {
                    v: 0x0600_0000,
                    n: 4,
                    v0: 2
                },
                GfxCommand::SPNumLights(2),
                GfxCommand::SPSegment {
                    seg: 6,
                    base: 0x1000
                },
            ]
        );
    }

    #[test]
    fn test_payload_writers() {
        let mut memory = Rdram::new(0x100);
        let vertices = [
            Vertex {
                pos: [-1, 2, -3],
                uv: [64, -64],
                cn: [1, 2, 3, 4],
                ..Default::default()
            },
            Vertex::default(),
        ];
        write_vertices(&mut memory, 0x10, &vertices).unwrap();
        assert_eq!(read_vertices(&memory, 0x10, 2).unwrap(), vertices);

        let viewport = screen_viewport(320, 240);
        write_viewport(&mut memory, 0x80, &viewport).unwrap();
        assert_eq!(read_viewport(&memory, 0x80).unwrap(), viewport);

        write_texture_rgba16(&mut memory, 0xA0, &[Rgba32::new(255, 0, 0, 255)]).unwrap();
        let mut texel = [0u16];
        memory.read_u16(&mut texel, 0xA0, 0).unwrap();
        assert_eq!(Rgba32::from_rgba16(texel[0]), Rgba32::new(255, 0, 0, 255));
    }
}
