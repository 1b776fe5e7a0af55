//! A [RenderingBackend] that rasterizes into an in-memory framebuffer.

use bytemuck::cast_slice;

use crate::{
    backend::{RenderingBackend, ShaderId, ShaderInfo, TexRect},
    cmd::{Rgba32, TileWrap},
    combiner::ShaderFeatures,
    error::GfxError,
    fixed::Fix64,
    raster::{
        rasterize, BlendMode, BlendTables, ClipRect, CombineFn, RasterState, RenderTarget,
        ShadeContext, ViewportTransform, MAX_PROPS, MIN_PROPS,
    },
    texture::{TexturePool, WrapMode},
};

/// Shader ids whose single color input is blended under the texture by texture alpha.
const DECAL_SHADERS: [u32; 3] = [0x0000038D, 0x01200A00, 0x01045A00];
const TEXA_SHADER: u32 = 0x01A00045;

/// A compiled combiner: which combine function runs and how many properties it reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderProgram {
    pub shader_id: u32,
    pub features: ShaderFeatures,
    /// `None` for shaders with no inputs, which draw nothing.
    pub combine: Option<CombineFn>,
    pub blend: BlendMode,
    /// Properties after `x, y, z, 1/w`.
    pub num_props: usize,
}

impl ShaderProgram {
    fn new(shader_id: u32) -> Result<Self, GfxError> {
        use CombineFn::*;

        let f = ShaderFeatures::from_shader_id(shader_id);
        let inputs = f.num_inputs as usize;
        let color_props = if f.opt_alpha { 4 } else { 3 };
        // the fog factor is a single intensity
        let uses_texture = f.used_textures[0] || f.used_textures[1];
        let num_props = f.opt_fog as usize + inputs * color_props + 2 * uses_texture as usize;

        let combine = if f.used_textures[0] && f.used_textures[1] {
            Some(TexTexRgba)
        } else if f.used_textures[0] && inputs > 0 {
            Some(if inputs > 1 {
                TexRgbRgb
            } else if DECAL_SHADERS.contains(&shader_id) {
                if f.opt_alpha {
                    TexRgbaDecal
                } else {
                    TexRgbDecal
                }
            } else if f.opt_fog {
                if f.opt_alpha {
                    TexFogRgba
                } else {
                    TexFogRgb
                }
            } else if f.opt_alpha {
                if shader_id == TEXA_SHADER {
                    TexRgbaTexa
                } else {
                    TexRgba
                }
            } else {
                TexRgb
            })
        } else if f.used_textures[0] {
            Some(if f.opt_fog { TexFog } else { Tex })
        } else if inputs > 1 {
            Some(RgbaRgba)
        } else if inputs == 1 {
            Some(match (f.opt_fog, f.opt_alpha) {
                (true, true) => FogRgba,
                (true, false) => FogRgb,
                (false, true) => Rgba,
                (false, false) => Rgb,
            })
        } else {
            None
        };

        if combine.is_some() && !(MIN_PROPS..=MAX_PROPS).contains(&(num_props + 4)) {
            return Err(GfxError::UnsupportedPropertyCount(num_props + 4));
        }

        let blend = match (f.opt_alpha, f.opt_texture_edge) {
            (false, _) => BlendMode::Opaque,
            (true, false) => BlendMode::Alpha,
            (true, true) => BlendMode::Edge,
        };

        Ok(Self {
            shader_id,
            features: f,
            combine,
            blend,
            num_props,
        })
    }
}

/// Software rasterizer with an RGBA8 color buffer and a 16 bit depth buffer.
#[derive(Debug, Clone)]
pub struct SoftwareBackend {
    programs: Vec<ShaderProgram>,
    current: Option<ShaderId>,
    textures: TexturePool,
    tables: BlendTables,
    target: RenderTarget,
    viewport: ViewportTransform,
    scissor: ClipRect,
    z_test: bool,
    z_write: bool,
    z_offset: Fix64,
    fog_color: Rgba32,
    triangles_drawn: usize,
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self {
            programs: Vec::new(),
            current: None,
            textures: TexturePool::default(),
            tables: BlendTables::default(),
            target: RenderTarget::default(),
            viewport: ViewportTransform::default(),
            scissor: ClipRect::default(),
            z_test: true,
            z_write: true,
            z_offset: Fix64::ZERO,
            fog_color: Rgba32::default(),
            triangles_drawn: 0,
        }
    }
}

impl SoftwareBackend {
    /// Creates a backend with a framebuffer of the given size.
    pub fn new(width: u32, height: u32) -> Self {
        let mut backend = Self::default();
        backend.resize(width, height);
        backend
    }

    /// Reallocates the color and depth buffers. Color is cleared to transparent black.
    ///
    /// The viewport and scissor are reset to cover the whole framebuffer.
    pub fn resize(&mut self, width: u32, height: u32) {
        log::debug!("software framebuffer {}x{}", width, height);
        self.target.resize(width, height);
        self.viewport = ViewportTransform::new(0, 0, width as i32, height as i32);
        self.scissor = ClipRect::new(0, 0, width as i32, height as i32);
    }

    #[allow(missing_docs)]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.target.width, self.target.height)
    }

    /// The color buffer, row major with a top left origin.
    pub fn framebuffer(&self) -> &[Rgba32] {
        &self.target.color
    }

    /// The color buffer as RGBA8 bytes.
    pub fn framebuffer_bytes(&self) -> &[u8] {
        cast_slice(&self.target.color[..])
    }

    #[allow(missing_docs)]
    pub fn depth_buffer(&self) -> &[u16] {
        &self.target.depth
    }

    /// The color at `(x, y)` with a top left origin.
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba32> {
        if x >= self.target.width {
            return None;
        }
        let idx = y as usize * self.target.width as usize + x as usize;
        self.target.color.get(idx).copied()
    }

    #[allow(missing_docs)]
    pub fn programs(&self) -> &[ShaderProgram] {
        &self.programs
    }

    #[allow(missing_docs)]
    pub fn textures(&self) -> &TexturePool {
        &self.textures
    }

    /// Triangles rasterized since the last `start_frame`.
    pub fn triangles_drawn(&self) -> usize {
        self.triangles_drawn
    }

    fn current_program(&self) -> Option<&ShaderProgram> {
        self.current.and_then(|id| self.programs.get(id.0))
    }

    fn clip_rect(&self) -> ClipRect {
        self.scissor.clamp_to(self.target.width, self.target.height)
    }
}

impl RenderingBackend for SoftwareBackend {
    fn z_is_from_0_to_1(&self) -> bool {
        true
    }

    fn unload_shader(&mut self, old_prg: Option<ShaderId>) {
        if self.current.is_some() && (self.current == old_prg || old_prg.is_none()) {
            self.current = None;
        }
    }

    fn load_shader(&mut self, new_prg: ShaderId) {
        self.current = Some(new_prg);
    }

    fn create_and_load_new_shader(&mut self, shader_id: u32) -> Result<ShaderId, GfxError> {
        let program = ShaderProgram::new(shader_id)?;
        log::debug!(
            "shader {:#010X}: {:?} with {} properties",
            shader_id,
            program.combine,
            program.num_props
        );
        self.programs.push(program);
        let id = ShaderId(self.programs.len() - 1);
        self.load_shader(id);
        Ok(id)
    }

    fn lookup_shader(&self, shader_id: u32) -> Option<ShaderId> {
        self.programs
            .iter()
            .position(|p| p.shader_id == shader_id)
            .map(ShaderId)
    }

    fn shader_get_info(&self, prg: ShaderId) -> ShaderInfo {
        let f = self.programs.get(prg.0).map(|p| p.features).unwrap_or_default();
        ShaderInfo {
            num_inputs: f.num_inputs,
            used_textures: f.used_textures,
        }
    }

    fn new_texture(&mut self) -> Result<u32, GfxError> {
        self.textures.new_texture()
    }

    fn select_texture(&mut self, tile: usize, texture_id: u32) {
        self.textures.select(tile, texture_id);
    }

    fn upload_texture(&mut self, rgba8: &[u8], width: u32, height: u32) {
        self.textures.upload(rgba8, width, height);
    }

    fn set_sampler_parameters(
        &mut self,
        tile: usize,
        linear_filter: bool,
        cms: TileWrap,
        cmt: TileWrap,
    ) {
        self.textures
            .set_sampler(tile, linear_filter, WrapMode::from(cms), WrapMode::from(cmt));
    }

    fn set_depth_test(&mut self, depth_test: bool) {
        self.z_test = depth_test;
    }

    fn set_depth_mask(&mut self, z_upd: bool) {
        self.z_write = z_upd;
    }

    fn set_zmode_decal(&mut self, zmode_decal: bool) {
        self.z_offset = if zmode_decal {
            Fix64::from_int(-32)
        } else {
            Fix64::ZERO
        };
    }

    fn set_viewport(&mut self, x: i32, y: i32, width: i32, height: i32) {
        self.viewport = ViewportTransform::new(x, y, width, height);
    }

    fn set_scissor(&mut self, x: i32, y: i32, width: i32, height: i32) {
        self.scissor = ClipRect::new(x, y, width, height);
    }

    // Blending is selected per program from its BlendMode.
    fn set_use_alpha(&mut self, _use_alpha: bool) {}

    fn draw_triangles(&mut self, buf_vbo: &[Fix64], num_tris: usize) -> Result<(), GfxError> {
        if num_tris == 0 {
            return Ok(());
        }
        let program = match self.current_program() {
            Some(program) => *program,
            None => {
                log::warn!("draw with no shader loaded");
                return Ok(());
            }
        };
        let combine = match program.combine {
            Some(combine) => combine,
            None => return Ok(()),
        };

        let stride = buf_vbo.len() / (3 * num_tris);
        if !(MIN_PROPS..=MAX_PROPS).contains(&stride) {
            return Err(GfxError::UnsupportedPropertyCount(stride));
        }

        let state = RasterState {
            clip: self.clip_rect(),
            z_test: self.z_test,
            z_write: self.z_write,
            z_offset: self.z_offset,
            blend: program.blend,
            combine,
            nprops: stride.min(program.num_props + 4),
        };
        let ctx = ShadeContext {
            tables: &self.tables,
            textures: &self.textures,
            fog_color: self.fog_color,
        };

        for tri in buf_vbo.chunks_exact(3 * stride).take(num_tris) {
            let mut vs = [[Fix64::ZERO; MAX_PROPS]; 3];
            for (v, src) in vs.iter_mut().zip(tri.chunks_exact(stride)) {
                v[..stride].copy_from_slice(src);
                self.viewport.apply(v);
            }
            vs.sort_by_key(|v| v[1]);
            rasterize(&mut self.target, &ctx, &state, &vs[0], &vs[1], &vs[2]);
        }
        self.triangles_drawn += num_tris;
        Ok(())
    }

    fn init(&mut self, width: u32, height: u32) {
        self.z_test = true;
        self.z_write = true;
        self.resize(width, height);
    }

    fn on_resize(&mut self, width: u32, height: u32) {
        if (width, height) != self.dimensions() {
            self.resize(width, height);
        }
    }

    fn start_frame(&mut self) {
        self.target.clear_depth();
        self.triangles_drawn = 0;
    }

    fn end_frame(&mut self) {}

    fn finish_render(&mut self) {}

    fn supports_rect_fast_path(&self) -> bool {
        true
    }

    fn fill_rect(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, color: Rgba32) {
        let width = self.target.width as i32;
        let (x0, y0) = (x0.max(0), y0.max(0));
        let (x1, y1) = (x1.min(width), y1.min(self.target.height as i32));
        if x0 >= x1 {
            return;
        }
        for y in y0..y1 {
            let row = (y * width) as usize;
            self.target.color[row + x0 as usize..row + x1 as usize].fill(color);
        }
    }

    fn tex_rect(&mut self, rect: TexRect) {
        let program = self.current_program().copied();
        let modulate = program.map_or(false, |p| p.features.num_inputs > 0);
        let blend = program.map(|p| p.blend).unwrap_or_default();

        let width = self.target.width as i32;
        let (x0, y0) = (rect.x0.max(0), rect.y0.max(0));
        let (x1, y1) = (rect.x1.min(width), rect.y1.min(self.target.height as i32));
        let Self {
            target,
            textures,
            tables,
            z_write,
            ..
        } = self;

        let u0 = rect.u0 + (x0 - rect.x0) as f32 * rect.dudx;
        let mut v = rect.v0 + (y0 - rect.y0) as f32 * rect.dvdy;
        for y in y0..y1 {
            let row = (y * width) as usize;
            let mut u = u0;
            for x in x0..x1 {
                let texel = textures.sample_texel(0, u as i32, v as i32);
                let color = if modulate {
                    tables.modulate(texel, rect.color)
                } else {
                    texel
                };
                target.draw_pixel(tables, row + x as usize, 0, color, blend, *z_write);
                u += rect.dudx;
            }
            v += rect.dvdy;
        }
    }

    fn set_fog_color(&mut self, color: Rgba32) {
        self.fog_color = Rgba32 { a: 0xFF, ..color };
    }

    fn shutdown(&mut self) {
        log::debug!("software backend shutdown with {} programs", self.programs.len());
    }
}
