//! Scanline triangle rasterization, color combining and pixel writes.

use crate::{cmd::Rgba32, fixed::Fix64, texture::TexturePool};

/// Most interpolated values per vertex, counting `x, y, z, 1/w`.
pub const MAX_PROPS: usize = 14;

/// Fewest interpolated values per vertex that a rasterizer exists for.
pub const MIN_PROPS: usize = 6;

/// 8 bit multiply and lerp lookup tables.
#[derive(Clone)]
pub struct BlendTables {
    /// `mult[x][y] = x * y / 256`
    mult: Vec<[u8; 256]>,
    /// `lerp[t][0xFF + d] = d * t / 256` for `d` in `-255..=255`
    lerp: Vec<[u8; 511]>,
}

impl std::fmt::Debug for BlendTables {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlendTables").finish_non_exhaustive()
    }
}

impl Default for BlendTables {
    fn default() -> Self {
        let mult = (0..256u32)
            .map(|x| {
                let mut row = [0; 256];
                for (y, v) in row.iter_mut().enumerate() {
                    *v = ((x * y as u32) >> 8) as u8;
                }
                row
            })
            .collect();
        let lerp = (0..256i32)
            .map(|t| {
                let mut row = [0; 511];
                for i in 0..256i32 {
                    let sum = i * t;
                    row[(0xFF - i) as usize] = (-sum >> 8) as u8;
                    row[(0xFF + i) as usize] = (sum >> 8) as u8;
                }
                row
            })
            .collect();
        Self { mult, lerp }
    }
}

impl BlendTables {
    #[allow(missing_docs)]
    pub fn mult(&self, x: u8, y: u8) -> u8 {
        self.mult[x as usize][y as usize]
    }

    /// Per channel product.
    pub fn modulate(&self, c1: Rgba32, c2: Rgba32) -> Rgba32 {
        Rgba32::new(
            self.mult(c1.r, c2.r),
            self.mult(c1.g, c2.g),
            self.mult(c1.b, c2.b),
            self.mult(c1.a, c2.a),
        )
    }

    /// `src * a + dst * (1 - a)`, keeping the alpha of `dst`.
    pub fn blend(&self, src: Rgba32, dst: Rgba32, a: u8) -> Rgba32 {
        let ia = 0xFF - a;
        Rgba32::new(
            self.mult(src.r, a).wrapping_add(self.mult(dst.r, ia)),
            self.mult(src.g, a).wrapping_add(self.mult(dst.g, ia)),
            self.mult(src.b, a).wrapping_add(self.mult(dst.b, ia)),
            dst.a,
        )
    }

    /// `c1 + (c2 - c1) * t`
    pub fn lerp(&self, c1: Rgba32, c2: Rgba32, t: u8) -> Rgba32 {
        let row = &self.lerp[t as usize];
        let ch = |a: u8, b: u8| a.wrapping_add(row[(0xFF + b as i32 - a as i32) as usize]);
        Rgba32::new(
            ch(c1.r, c2.r),
            ch(c1.g, c2.g),
            ch(c1.b, c2.b),
            ch(c1.a, c2.a),
        )
    }
}

/// How a shader turns its interpolated properties into a color.
///
/// Properties are listed in the order they appear after `1/w`. `fog` is a single
/// intensity, `tex` is a `u, v` pair and each color is 3 or 4 channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CombineFn {
    /// color
    Rgb,
    /// color
    Rgba,
    /// fog, color
    FogRgb,
    /// fog, color
    FogRgba,
    /// color, color
    RgbaRgba,
    /// tex
    Tex,
    /// tex, fog
    TexFog,
    /// tex, color
    TexRgb,
    /// tex, fog, color
    TexFogRgb,
    /// tex, color
    TexRgbDecal,
    /// tex, color
    TexRgba,
    /// tex, color with the alpha replaced by the texture's
    TexRgbaTexa,
    /// tex, fog, color
    TexFogRgba,
    /// tex, color
    TexRgbaDecal,
    /// tex, color, color
    TexRgbRgb,
    /// tex, lerp factor
    TexTexRgba,
}

/// Read only state shared by every fragment in a draw.
#[derive(Debug, Clone, Copy)]
pub struct ShadeContext<'a> {
    pub tables: &'a BlendTables,
    pub textures: &'a TexturePool,
    pub fog_color: Rgba32,
}

fn ch(p: Fix64, w: Fix64) -> u8 {
    p.mul_int(w).clamp(0, 255) as u8
}

fn rgb(p: &[Fix64], w: Fix64) -> Rgba32 {
    Rgba32::new(ch(p[0], w), ch(p[1], w), ch(p[2], w), 0xFF)
}

fn rgba(p: &[Fix64], w: Fix64) -> Rgba32 {
    Rgba32::new(ch(p[0], w), ch(p[1], w), ch(p[2], w), ch(p[3], w))
}

impl CombineFn {
    /// Evaluates the combiner for one fragment. `w` undoes the `1/w` premultiplication.
    pub fn combine(self, ctx: &ShadeContext<'_>, w: Fix64, p: &[Fix64]) -> Rgba32 {
        use CombineFn::*;

        let t = ctx.tables;
        let tex0 = || ctx.textures.sample(0, p[0] * w, p[1] * w);
        match self {
            Rgb => rgb(p, w),
            Rgba => rgba(p, w),
            FogRgb => t.blend(ctx.fog_color, rgb(&p[1..], w), ch(p[0], w)),
            FogRgba => t.blend(ctx.fog_color, rgba(&p[1..], w), ch(p[0], w)),
            RgbaRgba => t.modulate(rgba(p, w), rgba(&p[4..], w)),
            Tex => tex0(),
            TexFog => t.blend(ctx.fog_color, tex0(), ch(p[2], w)),
            TexRgb => t.modulate(tex0(), rgb(&p[2..], w)),
            TexFogRgb => {
                let c = t.modulate(tex0(), rgb(&p[3..], w));
                t.blend(ctx.fog_color, c, ch(p[2], w))
            }
            TexRgbDecal => {
                let tc = tex0();
                t.blend(tc, rgb(&p[2..], w), tc.a)
            }
            TexRgba => t.modulate(tex0(), rgba(&p[2..], w)),
            TexRgbaTexa => t.modulate(tex0(), rgb(&p[2..], w)),
            TexFogRgba => {
                let c = t.modulate(tex0(), rgba(&p[3..], w));
                t.blend(ctx.fog_color, c, ch(p[2], w))
            }
            TexRgbaDecal => {
                let tc = tex0();
                t.blend(tc, rgba(&p[2..], w), tc.a)
            }
            TexRgbRgb => {
                let tc = tex0();
                t.lerp(rgb(&p[5..], w), rgb(&p[2..], w), tc.r)
            }
            TexTexRgba => {
                let (u, v) = (p[0] * w, p[1] * w);
                let tc1 = ctx.textures.sample(0, u, v);
                let tc2 = ctx.textures.sample(1, u, v);
                t.lerp(tc1, tc2, ch(p[2], w))
            }
        }
    }
}

/// How fragments are written to the color buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendMode {
    Opaque,
    /// Source alpha over destination.
    Alpha,
    /// Alpha blending that drops fragments with alpha at or below one half.
    Edge,
}

impl Default for BlendMode {
    fn default() -> Self {
        Self::Opaque
    }
}

/// A color and depth buffer pair with a top left origin.
#[derive(Debug, Clone, Default)]
pub struct RenderTarget {
    pub width: u32,
    pub height: u32,
    pub color: Vec<Rgba32>,
    pub depth: Vec<u16>,
}

impl RenderTarget {
    /// Reallocates both buffers, clearing color to zero and depth to the far plane.
    pub fn resize(&mut self, width: u32, height: u32) {
        let size = width as usize * height as usize;
        self.width = width;
        self.height = height;
        self.color = vec![Rgba32::default(); size];
        self.depth = vec![0xFFFF; size];
    }

    #[allow(missing_docs)]
    pub fn clear_depth(&mut self) {
        self.depth.fill(0xFFFF);
    }

    /// Writes a fragment that already passed the depth test.
    pub fn draw_pixel(
        &mut self,
        tables: &BlendTables,
        idx: usize,
        z: u16,
        mut src: Rgba32,
        blend: BlendMode,
        z_write: bool,
    ) {
        match blend {
            BlendMode::Opaque => {}
            BlendMode::Edge if src.a <= 0x80 => return,
            BlendMode::Alpha | BlendMode::Edge => {
                let dst = self.color[idx];
                let a = src.a;
                src = tables.blend(src, dst, a);
                src.a = a;
            }
        }
        self.color[idx] = src;
        if z_write {
            self.depth[idx] = z;
        }
    }
}

/// Maps normalized device x, y to window pixels, bottom left origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewportTransform {
    pub hw: Fix64,
    pub hh: Fix64,
    pub cx: Fix64,
    pub cy: Fix64,
}

impl ViewportTransform {
    #[allow(missing_docs)]
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        let hw = Fix64::from_int(width >> 1);
        let hh = Fix64::from_int(height >> 1);
        Self {
            hw,
            hh,
            cx: Fix64::from_int(x) + hw,
            cy: Fix64::from_int(y) + hh,
        }
    }

    /// Transforms `x` and `y` in place, with a half pixel offset to sample pixel centers.
    pub fn apply(&self, v: &mut [Fix64]) {
        v[0] = v[0] * self.hw + self.cx + Fix64::HALF;
        v[1] = v[1] * self.hh + self.cy + Fix64::HALF;
    }
}

/// Half open pixel bounds, bottom left origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClipRect {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl ClipRect {
    #[allow(missing_docs)]
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x0: x,
            y0: y,
            x1: x + width,
            y1: y + height,
        }
    }

    /// Restricts to `[0, width) x [0, height)`.
    pub fn clamp_to(self, width: u32, height: u32) -> Self {
        Self {
            x0: self.x0.max(0),
            y0: self.y0.max(0),
            x1: self.x1.min(width as i32),
            y1: self.y1.min(height as i32),
        }
    }
}

/// Per draw rasterization parameters.
#[derive(Debug, Clone, Copy)]
pub struct RasterState {
    pub clip: ClipRect,
    pub z_test: bool,
    pub z_write: bool,
    pub z_offset: Fix64,
    pub blend: BlendMode,
    pub combine: CombineFn,
    /// Values per vertex, including `x, y, z, 1/w`.
    pub nprops: usize,
}

fn slope(dx: Fix64, dy: Fix64) -> Fix64 {
    if dy != Fix64::ZERO {
        dx.div(dy)
    } else if dx > Fix64::ZERO {
        Fix64::MAX
    } else {
        Fix64::MIN
    }
}

fn u16clamp(v: i32) -> u16 {
    v.clamp(0, 0xFFFF) as u16
}

/// Interpolators for one edge walk.
struct Edge {
    x: Fix64,
    dxdy: Fix64,
}

/// Rasterizes one triangle whose vertices are sorted by ascending y.
///
/// Each vertex holds `x, y` in window pixels, `z/w`, `1/w` and then the shader
/// properties premultiplied by `1/w`.
pub fn rasterize(
    target: &mut RenderTarget,
    ctx: &ShadeContext<'_>,
    state: &RasterState,
    v0: &[Fix64],
    v1: &[Fix64],
    v2: &[Fix64],
) {
    let n = state.nprops;
    let clip = state.clip;

    let y0i = clip.y0.max(v0[1].to_int());
    let y2i = clip.y1.min(v2[1].to_int());
    let y1i = y0i.max(v1[1].to_int()).min(y2i.max(y0i));
    let (x0i, x1i, x2i) = (v0[0].to_int(), v1[0].to_int(), v2[0].to_int());
    if (y0i == y1i && y0i == y2i) || (x0i == x1i && x0i == x2i) {
        return;
    }

    let ab = [v1[0] - v0[0], v1[1] - v0[1]];
    let ac = [v2[0] - v0[0], v2[1] - v0[1]];
    let bc = [v2[0] - v1[0], v2[1] - v1[1]];
    let denom = Fix64::ONE.div(ac[0] * ab[1] - ab[0] * ac[1]);
    let dxdy_ab = slope(ab[0], ab[1]);
    let dxdy_ac = slope(ac[0], ac[1]);
    let dxdy_bc = slope(bc[0], bc[1]);
    let long_edge_right = dxdy_ac > dxdy_ab;
    let y_pre0 = Fix64::ONE - (v0[1] - Fix64::from_int(y0i));
    let y_pre1 = Fix64::ONE - (v1[1] - Fix64::from_int(y1i));

    let mut dpdx = [Fix64::ZERO; MAX_PROPS];
    let mut dpdy = [Fix64::ZERO; MAX_PROPS];
    for i in 2..n {
        let d1 = v1[i] - v0[i];
        let d2 = v2[i] - v0[i];
        dpdx[i] = (d2 * ab[1] - d1 * ac[1]) * denom;
        dpdy[i] = (d1 * ac[0] - d2 * ab[0]) * denom;
    }

    let mut seg = Segment {
        target,
        ctx,
        state,
        dpdx: &dpdx,
        p_a: [Fix64::ZERO; MAX_PROPS],
        dpdy_a: [Fix64::ZERO; MAX_PROPS],
    };

    if !long_edge_right {
        // AC is on the left for both halves
        let mut left = Edge {
            x: v0[0] + y_pre0 * dxdy_ac,
            dxdy: dxdy_ac,
        };
        seg.start_left_edge(v0, y_pre0, dxdy_ac, &dpdy);
        if y0i < y1i {
            let mut right = Edge {
                x: v0[0] + y_pre0 * dxdy_ab,
                dxdy: dxdy_ab,
            };
            seg.draw(y0i, y1i, &mut left, &mut right);
        }
        if y1i < y2i {
            let mut right = Edge {
                x: v1[0] + y_pre1 * dxdy_bc,
                dxdy: dxdy_bc,
            };
            seg.draw(y1i, y2i, &mut left, &mut right);
        }
    } else {
        let mut right = Edge {
            x: v0[0] + y_pre0 * dxdy_ac,
            dxdy: dxdy_ac,
        };
        if y0i < y1i {
            let mut left = Edge {
                x: v0[0] + y_pre0 * dxdy_ab,
                dxdy: dxdy_ab,
            };
            seg.start_left_edge(v0, y_pre0, dxdy_ab, &dpdy);
            seg.draw(y0i, y1i, &mut left, &mut right);
        }
        if y1i < y2i {
            let mut left = Edge {
                x: v1[0] + y_pre1 * dxdy_bc,
                dxdy: dxdy_bc,
            };
            seg.start_left_edge(v1, y_pre1, dxdy_bc, &dpdy);
            seg.draw(y1i, y2i, &mut left, &mut right);
        }
    }
}

struct Segment<'t, 'a, 's> {
    target: &'t mut RenderTarget,
    ctx: &'a ShadeContext<'a>,
    state: &'s RasterState,
    dpdx: &'s [Fix64; MAX_PROPS],
    /// Properties at the left edge of the current scanline.
    p_a: [Fix64; MAX_PROPS],
    /// Step of `p_a` per scanline.
    dpdy_a: [Fix64; MAX_PROPS],
}

impl Segment<'_, '_, '_> {
    fn start_left_edge(
        &mut self,
        v: &[Fix64],
        y_pre: Fix64,
        dxdy: Fix64,
        dpdy: &[Fix64; MAX_PROPS],
    ) {
        for i in 2..self.state.nprops {
            self.dpdy_a[i] = dxdy * self.dpdx[i] + dpdy[i];
            self.p_a[i] = v[i] + y_pre * self.dpdy_a[i];
        }
    }

    fn draw(&mut self, y_start: i32, y_end: i32, left: &mut Edge, right: &mut Edge) {
        let n = self.state.nprops;
        let clip = self.state.clip;
        let width = self.target.width as i32;
        let height = self.target.height as i32;
        let mut p = [Fix64::ZERO; MAX_PROPS];

        for y in y_start..y_end {
            let x_start = clip.x0.max(left.x.to_int());
            let x_end = clip.x1.min(right.x.to_int());

            // subpixel prestep to the first covered column
            let dx = Fix64::ONE - (left.x - Fix64::from_int(x_start));
            for i in 2..n {
                p[i] = self.p_a[i] + dx * self.dpdx[i];
            }

            if x_start < x_end && (0..height).contains(&y) {
                let row = (width * (height - y - 1)) as usize;
                for x in x_start..x_end {
                    let idx = row + x as usize;
                    self.fragment(idx, &p);
                    for i in 2..n {
                        p[i] += self.dpdx[i];
                    }
                }
            }

            left.x += left.dxdy;
            right.x += right.dxdy;
            for i in 2..n {
                self.p_a[i] += self.dpdy_a[i];
            }
        }
    }

    fn fragment(&mut self, idx: usize, p: &[Fix64; MAX_PROPS]) {
        let state = self.state;
        let uz = u16clamp((p[2].scale(65535) + state.z_offset).to_int());
        if state.z_test && uz > self.target.depth[idx] {
            return;
        }
        let w = if p[3] == Fix64::ONE {
            Fix64::ONE
        } else {
            p[3].inv()
        };
        let color = state.combine.combine(self.ctx, w, &p[4..state.nprops]);
        self.target
            .draw_pixel(self.ctx.tables, idx, uz, color, state.blend, state.z_write);
    }
}
