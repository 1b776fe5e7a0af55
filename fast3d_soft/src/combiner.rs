//! Translation of RDP combine modes into shader ids, and the combiner cache.
//!
//! A combine mode selects four mux inputs per equation. Before it reaches the backend the
//! mode is packed into a 32 bit "cc id" (3 bits per input plus option flags) and then
//! normalized into a shader id, where inputs that interpolate per-vertex colors are
//! renumbered to shader input slots. The slot-to-source mapping is kept alongside the
//! shader so the interpreter knows which colors to push per vertex.

use crate::{
    backend::{RenderingBackend, ShaderId},
    cmd::CombineMode,
    error::GfxError,
};

/// Combine mux inputs, as stored in a cc id.
pub mod cc {
    pub const ZERO: u8 = 0;
    pub const TEXEL0: u8 = 1;
    pub const TEXEL1: u8 = 2;
    pub const PRIM: u8 = 3;
    pub const SHADE: u8 = 4;
    pub const ENV: u8 = 5;
    pub const TEXEL0A: u8 = 6;
    pub const LOD: u8 = 7;
}

/// Shader inputs, as stored in a shader id.
pub mod shader {
    pub const ZERO: u8 = 0;
    pub const INPUT_1: u8 = 1;
    pub const INPUT_2: u8 = 2;
    pub const INPUT_3: u8 = 3;
    pub const INPUT_4: u8 = 4;
    pub const TEXEL0: u8 = 5;
    pub const TEXEL0A: u8 = 6;
    pub const TEXEL1: u8 = 7;
}

pub const OPT_ALPHA: u32 = 1 << 24;
pub const OPT_FOG: u32 = 1 << 25;
pub const OPT_TEXTURE_EDGE: u32 = 1 << 26;
pub const OPT_NOISE: u32 = 1 << 27;

/// Shader ids that are compiled up front so that they don't cause a flush mid-frame.
pub const PRECOMPILED_SHADERS: [u32; 26] = [
    0x01200200, 0x00000045, 0x00000200, 0x01200a00, 0x00000a00, 0x01a00045, 0x00000551,
    0x01045045, 0x05a00a00, 0x01200045, 0x05045045, 0x01045a00, 0x01a00a00, 0x0000038d,
    0x01081081, 0x0120038d, 0x03200045, 0x03200a00, 0x01a00a6f, 0x01141045, 0x07a00a00,
    0x05200200, 0x03200200, 0x09200200, 0x0920038d, 0x09200045,
];

/// Maps a 4 or 5 bit RDP color mux value to a cc input.
fn color_comb_component(v: u32) -> u32 {
    let c = match v {
        1 => cc::TEXEL0,
        2 => cc::TEXEL1,
        3 => cc::PRIM,
        4 => cc::SHADE,
        5 => cc::ENV,
        8 => cc::TEXEL0A,
        13 => cc::LOD,
        _ => cc::ZERO,
    };
    c as u32
}

fn color_comb(a: u32, b: u32, c: u32, d: u32) -> u32 {
    color_comb_component(a)
        | (color_comb_component(b) << 3)
        | (color_comb_component(c) << 6)
        | (color_comb_component(d) << 9)
}

impl CombineMode {
    /// Packs the first cycle of a `G_SETCOMBINE` mux.
    pub fn from_mux(w0: u32, w1: u32) -> Self {
        let c0 = |pos: u32, width: u32| (w0 >> pos) & ((1 << width) - 1);
        let c1 = |pos: u32, width: u32| (w1 >> pos) & ((1 << width) - 1);
        let rgb = color_comb(c0(20, 4), c1(28, 4), c0(15, 5), c1(15, 3));
        let alpha = color_comb(c0(12, 3), c1(12, 3), c0(9, 3), c1(9, 3));
        Self::from_equations(rgb, alpha)
    }

    /// Combines packed rgb and alpha equations.
    pub const fn from_equations(rgb: u32, alpha: u32) -> Self {
        Self(rgb | (alpha << 12))
    }

    /// `d` only, for both equations.
    pub fn passthrough(rgb: u32, alpha: u32) -> Self {
        Self::from_equations(color_comb(0, 0, 0, rgb), color_comb(0, 0, 0, alpha))
    }

    /// Only a single texel0 input.
    pub fn texel0() -> Self {
        // G_CCMUX_TEXEL0, G_ACMUX_TEXEL0
        Self::passthrough(1, 1)
    }

    /// Only a single shade input.
    pub fn shade() -> Self {
        // G_CCMUX_SHADE, G_ACMUX_SHADE
        Self::passthrough(4, 4)
    }

    /// The cc input at `[equation][index]`, with `equation` 0 for rgb and 1 for alpha.
    pub fn input(self, equation: usize, index: usize) -> u8 {
        ((self.0 >> (equation * 12 + index * 3)) & 7) as u8
    }
}

/// A shader id together with the color sources feeding its input slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GeneratedCombiner {
    pub shader_id: u32,
    /// `[equation][slot]` cc input for shader inputs 1 to 4.
    pub input_mapping: [[u8; 4]; 2],
}

/// Normalizes a cc id into a shader id.
///
/// An equation that is constant (`a == b` or `c == 0`) collapses to its `d` input. Color
/// sources are assigned shader inputs in order of first use, separately per equation.
pub fn generate_cc(cc_id: u32) -> GeneratedCombiner {
    let mut c = [[0u8; 4]; 2];
    for i in 0..4 {
        c[0][i] = ((cc_id >> (i * 3)) & 7) as u8;
        c[1][i] = ((cc_id >> (12 + i * 3)) & 7) as u8;
    }

    let mut shader_id = (cc_id >> 24) << 24;
    let mut input_mapping = [[0u8; 4]; 2];
    for (i, eq) in c.iter_mut().enumerate() {
        if eq[0] == eq[1] || eq[2] == cc::ZERO {
            eq[0] = 0;
            eq[1] = 0;
            eq[2] = 0;
        }
        let mut input_number = [0u8; 8];
        let mut next_input_number = shader::INPUT_1;
        for (j, &input) in eq.iter().enumerate() {
            let val = match input {
                cc::TEXEL0 => shader::TEXEL0,
                cc::TEXEL1 => shader::TEXEL1,
                cc::TEXEL0A => shader::TEXEL0A,
                cc::PRIM | cc::SHADE | cc::ENV | cc::LOD => {
                    let n = &mut input_number[input as usize];
                    if *n == 0 {
                        input_mapping[i][(next_input_number - 1) as usize] = input;
                        *n = next_input_number;
                        next_input_number += 1;
                    }
                    *n
                }
                _ => shader::ZERO,
            };
            shader_id |= (val as u32) << (i * 12 + j * 3);
        }
    }

    GeneratedCombiner {
        shader_id,
        input_mapping,
    }
}

/// The properties of a shader id that backends build programs from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShaderFeatures {
    /// `[equation][index]` shader inputs.
    pub c: [[u8; 4]; 2],
    pub opt_alpha: bool,
    pub opt_fog: bool,
    pub opt_texture_edge: bool,
    pub opt_noise: bool,
    pub used_textures: [bool; 2],
    pub num_inputs: u8,
    /// The equation is `d` only.
    pub do_single: [bool; 2],
    /// The equation is `a * c`.
    pub do_multiply: [bool; 2],
    /// The equation is `(a - b) * c + b`.
    pub do_mix: [bool; 2],
    pub color_alpha_same: bool,
}

impl ShaderFeatures {
    #[allow(missing_docs)]
    pub fn from_shader_id(shader_id: u32) -> Self {
        let mut f = ShaderFeatures {
            opt_alpha: shader_id & OPT_ALPHA != 0,
            opt_fog: shader_id & OPT_FOG != 0,
            opt_texture_edge: shader_id & OPT_TEXTURE_EDGE != 0,
            opt_noise: shader_id & OPT_NOISE != 0,
            color_alpha_same: (shader_id & 0xFFF) == ((shader_id >> 12) & 0xFFF),
            ..Default::default()
        };
        for i in 0..2 {
            for j in 0..4 {
                let v = ((shader_id >> (i * 12 + j * 3)) & 7) as u8;
                f.c[i][j] = v;
                if (shader::INPUT_1..=shader::INPUT_4).contains(&v) && v > f.num_inputs {
                    f.num_inputs = v;
                }
                if v == shader::TEXEL0 || v == shader::TEXEL0A {
                    f.used_textures[0] = true;
                }
                if v == shader::TEXEL1 {
                    f.used_textures[1] = true;
                }
            }
            let c = f.c[i];
            f.do_single[i] = c[2] == shader::ZERO;
            f.do_multiply[i] = c[1] == shader::ZERO && c[3] == shader::ZERO;
            f.do_mix[i] = c[1] == c[3];
        }
        f
    }
}

/// A cached combine mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorCombiner {
    pub cc_id: u32,
    pub prg: ShaderId,
    pub input_mapping: [[u8; 4]; 2],
}

/// Fixed size cache of combiners, keyed by cc id.
///
/// When the pool is full it is emptied as a whole before the next insert.
#[derive(Debug, Clone, Default)]
pub struct CombinerPool {
    entries: Vec<ColorCombiner>,
    prev: Option<usize>,
}

impl CombinerPool {
    pub const CAPACITY: usize = 64;

    /// Finds the combiner for `cc_id`, checking the last hit first.
    pub fn lookup(&mut self, cc_id: u32) -> Option<ColorCombiner> {
        if let Some(prev) = self.prev.and_then(|i| self.entries.get(i)) {
            if prev.cc_id == cc_id {
                return Some(*prev);
            }
        }
        let index = self.entries.iter().position(|c| c.cc_id == cc_id)?;
        self.prev = Some(index);
        Some(self.entries[index])
    }

    #[allow(missing_docs)]
    pub fn insert(&mut self, combiner: ColorCombiner) {
        if self.entries.len() == Self::CAPACITY {
            log::debug!("combiner pool full, resetting");
            self.entries.clear();
        }
        self.entries.push(combiner);
        self.prev = Some(self.entries.len() - 1);
    }

    #[allow(missing_docs)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Returns the backend program for `shader_id`, creating and loading it if needed.
///
/// `current` tracks the program the backend has loaded.
pub fn lookup_or_create_shader_program<R: RenderingBackend + ?Sized>(
    backend: &mut R,
    current: &mut Option<ShaderId>,
    shader_id: u32,
) -> Result<ShaderId, GfxError> {
    if let Some(prg) = backend.lookup_shader(shader_id) {
        return Ok(prg);
    }
    backend.unload_shader(*current);
    let prg = backend.create_and_load_new_shader(shader_id)?;
    log::debug!("created shader {:#010X} as {:?}", shader_id, prg);
    *current = Some(prg);
    Ok(prg)
}

#[cfg(test)]
mod test {
    use super::*;

    /// Builds a two cycle mux word pair with the same equations in both cycles.
    fn mux(rgb: [u32; 4], alpha: [u32; 4]) -> (u32, u32) {
        let [a, b, c, d] = rgb;
        let [aa, ab, ac, ad] = alpha;
        let w0 = a << 20 | c << 15 | aa << 12 | ac << 9 | a << 5 | c;
        let w1 = b << 28 | b << 24 | aa << 21 | ac << 18 | d << 15 | ab << 12 | ad << 9 | d << 6
            | ab << 3
            | ad;
        (w0, w1)
    }

    #[test]
    fn test_from_mux() {
        // G_CC_MODULATERGBA
        let (w0, w1) = mux([1, 15, 4, 7], [1, 7, 4, 7]);
        let mode = CombineMode::from_mux(w0, w1);
        assert_eq!(mode.input(0, 0), cc::TEXEL0);
        assert_eq!(mode.input(0, 1), cc::ZERO);
        assert_eq!(mode.input(0, 2), cc::SHADE);
        assert_eq!(mode.input(0, 3), cc::ZERO);
        assert_eq!(mode.input(1, 0), cc::TEXEL0);
        assert_eq!(mode.input(1, 2), cc::SHADE);

        // G_CC_SHADE
        let (w0, w1) = mux([15, 15, 31, 4], [7, 7, 7, 4]);
        assert_eq!(CombineMode::from_mux(w0, w1), CombineMode::shade());

        // texel0 alpha and lod fraction only exist in the 5 bit c input
        let (w0, w1) = mux([1, 15, 8, 7], [7, 7, 7, 1]);
        assert_eq!(CombineMode::from_mux(w0, w1).input(0, 2), cc::TEXEL0A);
        let (w0, w1) = mux([1, 15, 13, 7], [7, 7, 7, 1]);
        assert_eq!(CombineMode::from_mux(w0, w1).input(0, 2), cc::LOD);
    }

    #[test]
    fn test_generate_cc() {
        // (TEXEL0 - 0) * SHADE + 0 for rgb, SHADE for alpha, with alpha enabled
        let rgb = cc::TEXEL0 as u32 | (cc::SHADE as u32) << 6;
        let alpha = (cc::SHADE as u32) << 9;
        let generated = generate_cc(rgb | alpha << 12 | OPT_ALPHA);
        assert_eq!(generated.shader_id, 0x01200045);
        assert_eq!(generated.input_mapping[0][0], cc::SHADE);
        assert_eq!(generated.input_mapping[1][0], cc::SHADE);

        // constant equation collapses to d
        let rgb = [cc::PRIM, cc::PRIM, cc::SHADE, cc::ENV]
            .iter()
            .enumerate()
            .fold(0, |acc, (i, &c)| acc | (c as u32) << (i * 3));
        let generated = generate_cc(rgb);
        assert_eq!(generated.shader_id, (shader::INPUT_1 as u32) << 9);
        assert_eq!(generated.input_mapping[0], [cc::ENV, 0, 0, 0]);
    }

    #[test]
    fn test_features() {
        let f = ShaderFeatures::from_shader_id(0x01200045);
        assert!(f.opt_alpha && !f.opt_fog);
        assert_eq!(f.num_inputs, 1);
        assert_eq!(f.used_textures, [true, false]);
        assert!(f.do_multiply[0]);

        let f = ShaderFeatures::from_shader_id(0x0920038d);
        assert!(f.opt_alpha && f.opt_noise && !f.opt_texture_edge);
        assert_eq!(f.c[0], [shader::TEXEL0, shader::INPUT_1, shader::TEXEL0A, shader::INPUT_1]);
        assert!(f.do_mix[0]);

        let f = ShaderFeatures::from_shader_id(0x07a00a00);
        assert!(f.opt_alpha && f.opt_fog && f.opt_texture_edge);
        assert_eq!(f.used_textures, [true, false]);
        assert_eq!(f.num_inputs, 0);
        assert!(f.color_alpha_same && f.do_single[0]);

        let f = ShaderFeatures::from_shader_id(0x01a00a6f);
        assert_eq!(f.used_textures, [true, true]);
        assert_eq!(f.num_inputs, 1);
    }

    #[test]
    fn test_pool_reset() {
        let mut pool = CombinerPool::default();
        for cc_id in 0..CombinerPool::CAPACITY as u32 {
            pool.insert(ColorCombiner {
                cc_id,
                prg: ShaderId(0),
                input_mapping: Default::default(),
            });
        }
        assert_eq!(pool.len(), CombinerPool::CAPACITY);
        assert!(pool.lookup(3).is_some());
        pool.insert(ColorCombiner {
            cc_id: 1000,
            prg: ShaderId(1),
            input_mapping: Default::default(),
        });
        assert_eq!(pool.len(), 1);
        assert!(pool.lookup(3).is_none());
        assert_eq!(pool.lookup(1000).map(|c| c.prg), Some(ShaderId(1)));
    }
}
