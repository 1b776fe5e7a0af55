//! The display list interpreter and the host facing [GraphicsContext].
//!
//! A frame is driven by calling [GraphicsContext::start_frame], [GraphicsContext::run] and
//! [GraphicsContext::end_frame] in order. `run` walks the display list, keeping the RSP and
//! RDP state in a [PipelineState], and submits triangles to the [RenderingBackend] in
//! batches. A batch is flushed whenever a piece of backend state it depends on changes.
//!
//! Errors abort the current display list and are returned from `run`. Unsupported but
//! harmless commands are logged and skipped.

use derivative::Derivative;

use crate::{
    backend::{RenderingBackend, ShaderId, TexRect, WindowBackend},
    clip::{clip_triangle, is_culled},
    cmd::{
        ComponentSize, CombineMode, CycleType, GeometryModes, GfxCommand, ImageFormat, OtherMode,
        Rectangle, Rgba32, TextureBlock, TextureRectangle, TileIndex, TileParams, TileSize,
        TileWrap,
    },
    combiner::{
        cc, generate_cc, lookup_or_create_shader_program, ColorCombiner, CombinerPool,
        OPT_ALPHA, OPT_FOG, OPT_NOISE, OPT_TEXTURE_EDGE, PRECOMPILED_SHADERS,
    },
    config::GfxConfig,
    decode::{decode_command, RawCommand},
    error::GfxError,
    fixed::Fix64,
    memory::{GfxMemory, SegmentTable},
    rsp::{ClipFlags, LoadedVertex, RspState, MAX_VERTICES},
    texture::{self, TextureCache, TextureKey},
    util::{read_light, read_matrix, read_vertices, read_viewport, Viewport},
};

/// Width of the native framebuffer that display list coordinates refer to.
pub const SCREEN_WIDTH: u32 = 320;
/// Height of the native framebuffer that display list coordinates refer to.
pub const SCREEN_HEIGHT: u32 = 240;
/// Triangles buffered before a flush is forced.
pub const MAX_BUFFERED: usize = 256;

const TMEM_SIZE: u32 = 4096;

/// A rectangle in window pixels with a bottom left origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScreenRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// Counters for a single call to [GraphicsContext::run].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    /// Decoded commands, counting a texture rectangle once.
    pub commands: usize,
    /// Triangles written to the vertex buffer, after clipping.
    pub triangles: usize,
    /// Triangles rejected by the frustum or by face culling.
    pub culled: usize,
    /// Triangles that crossed a frustum plane and were clipped.
    pub clipped: usize,
    /// Calls to [RenderingBackend::draw_triangles].
    pub flushes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct TextureToLoad {
    addr: u32,
    siz: ComponentSize,
    tile_number: usize,
}

/// A texture payload staged in one of the two tmem halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadedTexture {
    pub addr: u32,
    pub size_bytes: u32,
}

/// The render tile, which every used texture is sampled through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextureTile {
    pub fmt: ImageFormat,
    pub siz: ComponentSize,
    pub cms: TileWrap,
    pub cmt: TileWrap,
    /// 10.2 texel bounds.
    pub uls: u32,
    pub ult: u32,
    pub lrs: u32,
    pub lrt: u32,
    pub line_size_bytes: u32,
}

impl TextureTile {
    /// Width and height in whole texels.
    pub fn dimensions(&self) -> (i64, i64) {
        let size = |lo: u32, hi: u32| ((hi as i64 - lo as i64 + 4) / 4).max(1);
        (size(self.uls, self.lrs), size(self.ult, self.lrt))
    }
}

/// RDP state set by display list commands.
#[derive(Debug, Clone, Default)]
pub struct RdpState {
    /// Address of the RGBA16 lookup table for CI textures.
    pub palette: u32,
    texture_to_load: TextureToLoad,
    pub loaded_texture: [LoadedTexture; 2],
    pub texture_tile: TextureTile,
    pub textures_changed: [bool; 2],

    pub other_mode: OtherMode,
    pub combine_mode: CombineMode,

    pub env_color: Rgba32,
    pub prim_color: Rgba32,
    pub fog_color: Rgba32,
    pub blend_color: Rgba32,
    pub fill_color: Rgba32,

    pub viewport: ScreenRect,
    pub scissor: ScreenRect,
    viewport_or_scissor_changed: bool,

    pub z_buf_address: Option<u32>,
    pub color_image_address: Option<u32>,
}

/// The state last sent to the backend. `None` means it hasn't been sent yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct RenderingState {
    depth_test: Option<bool>,
    depth_mask: Option<bool>,
    decal_mode: Option<bool>,
    alpha_blend: Option<bool>,
    viewport: Option<ScreenRect>,
    scissor: Option<ScreenRect>,
    shader_program: Option<ShaderId>,
    /// Texture cache nodes bound to each tile.
    textures: [Option<usize>; 2],
}

/// Everything a display list can change, plus the caches and the pending vertex buffer.
#[derive(Debug, Clone, Derivative)]
#[derivative(Default)]
pub struct PipelineState {
    pub rsp: RspState,
    pub rdp: RdpState,
    pub segments: SegmentTable,
    rendering: RenderingState,
    combiners: CombinerPool,
    textures: TextureCache,
    #[derivative(Default(value = "Vec::with_capacity(MAX_BUFFERED * 3 * 18)"))]
    vbo: Vec<Fix64>,
    num_tris: usize,
}

impl PipelineState {
    /// Number of triangles waiting for a flush.
    pub fn buffered_triangles(&self) -> usize {
        self.num_tris
    }

    #[allow(missing_docs)]
    pub fn combiners(&self) -> &CombinerPool {
        &self.combiners
    }

    #[allow(missing_docs)]
    pub fn texture_cache(&self) -> &TextureCache {
        &self.textures
    }

    fn discard_buffered(&mut self) {
        self.vbo.clear();
        self.num_tris = 0;
    }
}

/// Owns the backends and the pipeline state, and runs display lists against them.
#[derive(Debug)]
pub struct GraphicsContext<R, W> {
    config: GfxConfig,
    backend: R,
    window: W,
    state: PipelineState,
    dimensions: (u32, u32),
    ratio: (f32, f32),
    dropped_frame: bool,
    stats: FrameStats,
}

impl<R: RenderingBackend, W: WindowBackend> GraphicsContext<R, W> {
    #[allow(missing_docs)]
    pub fn new(config: GfxConfig, backend: R, window: W) -> Self {
        Self {
            config,
            backend,
            window,
            state: PipelineState::default(),
            dimensions: (SCREEN_WIDTH, SCREEN_HEIGHT),
            ratio: (1.0, 1.0),
            dropped_frame: false,
            stats: FrameStats::default(),
        }
    }

    #[allow(missing_docs)]
    pub fn config(&self) -> &GfxConfig {
        &self.config
    }

    #[allow(missing_docs)]
    pub fn backend(&self) -> &R {
        &self.backend
    }

    #[allow(missing_docs)]
    pub fn backend_mut(&mut self) -> &mut R {
        &mut self.backend
    }

    #[allow(missing_docs)]
    pub fn window(&self) -> &W {
        &self.window
    }

    #[allow(missing_docs)]
    pub fn window_mut(&mut self) -> &mut W {
        &mut self.window
    }

    #[allow(missing_docs)]
    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    #[allow(missing_docs)]
    pub fn state_mut(&mut self) -> &mut PipelineState {
        &mut self.state
    }

    /// The window dimensions read at the last [Self::start_frame].
    pub fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    /// Whether the window skipped the last frame.
    pub fn dropped_frame(&self) -> bool {
        self.dropped_frame
    }

    /// Initializes the window and the backend and compiles the known shaders.
    pub fn init(&mut self) -> Result<(), GfxError> {
        self.window
            .init(&self.config.window_title, self.config.start_fullscreen);
        let (width, height) = self.window.dimensions();
        self.dimensions = (width, height.max(1));
        self.backend.init(width, height);

        for &shader_id in PRECOMPILED_SHADERS.iter() {
            lookup_or_create_shader_program(
                &mut self.backend,
                &mut self.state.rendering.shader_program,
                shader_id,
            )?;
        }
        log::debug!("precompiled {} shaders", PRECOMPILED_SHADERS.len());
        Ok(())
    }

    /// Polls window events and picks up a resized window.
    pub fn start_frame(&mut self) {
        self.window.handle_events();
        let (width, height) = self.window.dimensions();
        let height = height.max(1);
        self.dimensions = (width, height);
        self.ratio = (
            width as f32 / SCREEN_WIDTH as f32,
            height as f32 / SCREEN_HEIGHT as f32,
        );
        self.backend.on_resize(width, height);
    }

    /// Interprets the display list at `dl` and submits everything it draws.
    ///
    /// If the window decides to skip this frame nothing is interpreted and the returned
    /// stats are empty.
    pub fn run<M: GfxMemory>(&mut self, memory: &M, dl: u32) -> Result<FrameStats, GfxError> {
        self.state.rsp.reset();
        self.stats = FrameStats::default();

        if !self.window.start_frame() {
            log::debug!("frame skipped by the window");
            self.dropped_frame = true;
            return Ok(self.stats);
        }
        self.dropped_frame = false;

        self.backend.start_frame();
        if let Err(error) = self.run_dl(memory, dl).and_then(|()| self.flush()) {
            self.state.discard_buffered();
            return Err(error);
        }
        self.backend.end_frame();
        self.window.swap_buffers_begin();

        log::debug!("{:?}", self.stats);
        Ok(self.stats)
    }

    /// Finishes presenting the frame, unless it was skipped.
    pub fn end_frame(&mut self) {
        if !self.dropped_frame {
            self.backend.finish_render();
            self.window.swap_buffers_end();
        }
    }

    #[allow(missing_docs)]
    pub fn shutdown(&mut self) {
        self.backend.shutdown();
        self.window.shutdown();
    }

    fn run_dl<M: GfxMemory>(&mut self, memory: &M, dl: u32) -> Result<(), GfxError> {
        let read_raw = |addr: u32| -> Result<RawCommand, GfxError> {
            let mut words = [0; 2];
            memory.read_u32(&mut words, addr, 0)?;
            Ok(RawCommand::new(words[0], words[1]))
        };

        let mut call_stack: Vec<u32> = Vec::new();
        let mut cursor = self.state.segments.resolve(dl);
        loop {
            let addr = cursor;
            let mut result = decode_command(self.config.microcode, read_raw(cursor)?);
            cursor = cursor.wrapping_add(8);
            let cmd = loop {
                if let Some(cmd) = result.complete() {
                    break cmd;
                }
                result = result.next(read_raw(cursor)?);
                cursor = cursor.wrapping_add(8);
            };

            self.stats.commands += 1;
            log::trace!("{:#010X}: {:?}", addr, cmd);

            match cmd {
                GfxCommand::SPDisplayList(child) => {
                    if call_stack.len() >= self.config.max_call_depth {
                        return Err(GfxError::CallStackOverflow {
                            depth: self.config.max_call_depth,
                        });
                    }
                    call_stack.push(cursor);
                    cursor = self.state.segments.resolve(child);
                }
                GfxCommand::SPBranchList(target) => {
                    cursor = self.state.segments.resolve(target);
                }
                GfxCommand::SPEndDisplayList => match call_stack.pop() {
                    Some(ret) => cursor = ret,
                    None => return Ok(()),
                },
                cmd => self.execute(memory, cmd)?,
            }
        }
    }

    fn execute<M: GfxMemory>(&mut self, memory: &M, cmd: GfxCommand) -> Result<(), GfxError> {
        use GfxCommand::*;

        let segments = self.state.segments;
        match cmd {
            SPMatrix { matrix, params } => {
                let m = read_matrix(memory, segments.resolve(matrix))?;
                self.state.rsp.matrix(params, &m);
            }
            SPPopMatrix(count) => self.state.rsp.pop_matrix(count),
            SPViewport(addr) => {
                let viewport = read_viewport(memory, segments.resolve(addr))?;
                self.set_viewport(&viewport);
            }
            SPLight { light, index } => {
                let light = read_light(memory, segments.resolve(light))?;
                self.state.rsp.set_light(index as usize, light);
            }
            SPVertex { v, n, v0 } => {
                let vertices = read_vertices(memory, segments.resolve(v), n as usize)?;
                self.state
                    .rsp
                    .load_vertices(v0 as usize, &vertices, self.config.enable_fog)?;
            }
            SPOneTriangle(tri) => self.tri1(memory, tri)?,
            SPTwoTriangles(tri1, tri2) => {
                self.tri1(memory, tri1)?;
                self.tri1(memory, tri2)?;
            }
            SPNumLights(n) => self.state.rsp.set_num_lights(n),
            SPSegment { seg, base } => self.state.segments.set(seg, base),
            SPFogFactor { mul, offset } => {
                self.state.rsp.fog_mul = mul;
                self.state.rsp.fog_offset = offset;
            }
            SPTexture { sc, tc, .. } => self.state.rsp.texture_scale = [sc, tc],
            SPGeometryMode { clear, set } => self.state.rsp.update_geometry_mode(clear, set),

            DPSetOtherMode { shift, len, data } => self.state.rdp.other_mode.set(shift, len, data),
            DPSetColorImage(image) => {
                self.state.rdp.color_image_address = Some(segments.resolve(image.img))
            }
            DPSetDepthImage(addr) => self.state.rdp.z_buf_address = Some(segments.resolve(addr)),
            DPSetTextureImage(image) => {
                self.state.rdp.texture_to_load.addr = segments.resolve(image.img);
                self.state.rdp.texture_to_load.siz = image.size;
            }
            DPSetCombineMode(mode) => self.state.rdp.combine_mode = mode,
            DPSetEnvColor(color) => self.state.rdp.env_color = color,
            DPSetPrimColor(color) => self.state.rdp.prim_color = color,
            DPSetBlendColor(color) => self.state.rdp.blend_color = color,
            DPSetFogColor(color) => {
                if self.state.rdp.fog_color != color {
                    self.flush()?;
                    self.backend.set_fog_color(color);
                    self.state.rdp.fog_color = color;
                }
            }
            DPSetFillColor(packed) => {
                self.state.rdp.fill_color = Rgba32::from_rgba16(packed as u16)
            }
            DPFillRectangle(rect) => self.fill_rectangle(memory, rect)?,
            DPSetTile(tile, params) => self.set_tile(tile, params),
            DPLoadTile(tile, size) => self.load_tile(tile, size)?,
            DPLoadBlock(tile, block) => self.load_block(tile, block)?,
            DPSetTileSize(tile, size) => self.set_tile_size(tile, size),
            DPLoadTLUTCmd(_, _) => self.state.rdp.palette = self.state.rdp.texture_to_load.addr,
            DPSetScissor(_, rect) => self.set_scissor(rect),
            DPTextureRectangle(tex_rect) => self.texture_rectangle(memory, tex_rect, false)?,
            DPTextureRectangleFlip(tex_rect) => self.texture_rectangle(memory, tex_rect, true)?,

            Unknown(raw) => log::warn!("unknown command: {:?}", raw),
            // control flow is handled by run_dl
            NoOp | DPFullSync | DPTileSync | DPPipeSync | DPLoadSync | SPDisplayList(_)
            | SPBranchList(_) | SPEndDisplayList => {}
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), GfxError> {
        if self.state.num_tris > 0 {
            let result = self
                .backend
                .draw_triangles(&self.state.vbo, self.state.num_tris);
            self.state.discard_buffered();
            self.stats.flushes += 1;
            result?;
        }
        Ok(())
    }

    fn set_viewport(&mut self, viewport: &Viewport) {
        let (rx, ry) = self.ratio;
        let width = 2.0 * viewport.scale[0] as f32 / 4.0;
        let height = 2.0 * viewport.scale[1] as f32 / 4.0;
        let x = viewport.trans[0] as f32 / 4.0 - width / 2.0;
        let y = SCREEN_HEIGHT as f32 - (viewport.trans[1] as f32 / 4.0 + height / 2.0);

        self.state.rdp.viewport = ScreenRect {
            x: (x * rx) as i32,
            y: (y * ry) as i32,
            width: (width * rx) as i32,
            height: (height * ry) as i32,
        };
        self.state.rdp.viewport_or_scissor_changed = true;
    }

    fn set_scissor(&mut self, rect: Rectangle<u16>) {
        let (rx, ry) = self.ratio;
        let [ulx, uly, lrx, lry] = [rect.ulx, rect.uly, rect.lrx, rect.lry].map(|c| c as f32 / 4.0);

        self.state.rdp.scissor = ScreenRect {
            x: (ulx * rx) as i32,
            y: ((SCREEN_HEIGHT as f32 - lry) * ry) as i32,
            width: ((lrx - ulx) * rx) as i32,
            height: ((lry - uly) * ry) as i32,
        };
        self.state.rdp.viewport_or_scissor_changed = true;
    }

    fn set_tile(&mut self, tile: TileIndex, params: TileParams) {
        let rdp = &mut self.state.rdp;
        if tile == TileIndex::RENDER {
            rdp.texture_tile.fmt = params.fmt;
            rdp.texture_tile.siz = params.size;
            rdp.texture_tile.cms = params.cms;
            rdp.texture_tile.cmt = params.cmt;
            rdp.texture_tile.line_size_bytes = params.line * 8;
            rdp.textures_changed = [true; 2];
        }
        if tile == TileIndex::LOAD {
            match params.tmem / 256 {
                n @ (0 | 1) => rdp.texture_to_load.tile_number = n as usize,
                n => log::warn!("ignoring load tile at tmem {:#X} (half {})", params.tmem, n),
            }
        }
    }

    fn set_tile_size(&mut self, tile: TileIndex, size: TileSize) {
        if tile == TileIndex::RENDER {
            let rdp = &mut self.state.rdp;
            rdp.texture_tile.uls = size.uls;
            rdp.texture_tile.ult = size.ult;
            rdp.texture_tile.lrs = size.lrs;
            rdp.texture_tile.lrt = size.lrt;
            rdp.textures_changed = [true; 2];
        }
    }

    fn stage_texture(&mut self, size_bytes: u32) -> Result<(), GfxError> {
        if size_bytes > TMEM_SIZE {
            return Err(GfxError::TextureTooLarge { size: size_bytes });
        }
        let rdp = &mut self.state.rdp;
        let n = rdp.texture_to_load.tile_number;
        rdp.loaded_texture[n] = LoadedTexture {
            addr: rdp.texture_to_load.addr,
            size_bytes,
        };
        rdp.textures_changed[n] = true;
        Ok(())
    }

    fn load_block(&mut self, tile: TileIndex, block: TextureBlock) -> Result<(), GfxError> {
        if tile.0 == 1 {
            return Ok(());
        }
        // lrs is the number of texels to load, minus one
        let shift = self.state.rdp.texture_to_load.siz.load_shift();
        self.stage_texture((block.lrs + 1) << shift)
    }

    fn load_tile(&mut self, tile: TileIndex, size: TileSize) -> Result<(), GfxError> {
        if tile.0 == 1 {
            return Ok(());
        }
        let shift = self.state.rdp.texture_to_load.siz.load_shift();
        let texels = ((size.lrs >> 2) + 1) * ((size.lrt >> 2) + 1);
        self.stage_texture(texels << shift)?;

        let texture_tile = &mut self.state.rdp.texture_tile;
        texture_tile.uls = size.uls;
        texture_tile.ult = size.ult;
        texture_tile.lrs = size.lrs;
        texture_tile.lrt = size.lrt;
        Ok(())
    }

    fn tri1<M: GfxMemory>(&mut self, memory: &M, indices: [u32; 3]) -> Result<(), GfxError> {
        let rsp = &self.state.rsp;
        let tri = [
            *rsp.vertex(indices[0])?,
            *rsp.vertex(indices[1])?,
            *rsp.vertex(indices[2])?,
        ];

        let clip_and = tri[0].clip_rej & tri[1].clip_rej & tri[2].clip_rej;
        if !clip_and.is_empty() || is_culled(&tri, rsp.geometry_mode) {
            self.stats.culled += 1;
            return Ok(());
        }

        let clip_or = tri[0].clip_rej | tri[1].clip_rej | tri[2].clip_rej;
        if clip_or.is_empty() {
            return self.push_triangle(memory, &tri);
        }

        self.stats.clipped += 1;
        if let Some(polygon) = clip_triangle(tri) {
            for tri in polygon.fan() {
                self.push_triangle(memory, &tri)?;
            }
        }
        Ok(())
    }

    fn update_viewport_and_scissor(&mut self) -> Result<(), GfxError> {
        if !self.state.rdp.viewport_or_scissor_changed {
            return Ok(());
        }
        let viewport = self.state.rdp.viewport;
        if self.state.rendering.viewport != Some(viewport) {
            self.flush()?;
            self.backend
                .set_viewport(viewport.x, viewport.y, viewport.width, viewport.height);
            self.state.rendering.viewport = Some(viewport);
        }
        let scissor = self.state.rdp.scissor;
        if self.state.rendering.scissor != Some(scissor) {
            self.flush()?;
            self.backend
                .set_scissor(scissor.x, scissor.y, scissor.width, scissor.height);
            self.state.rendering.scissor = Some(scissor);
        }
        self.state.rdp.viewport_or_scissor_changed = false;
        Ok(())
    }

    /// Selects and loads the combiner for the current combine and other modes.
    ///
    /// Returns the combiner along with whether alpha and fog are in use.
    fn pick_combiner(&mut self) -> Result<(ColorCombiner, bool, bool), GfxError> {
        let other_mode = self.state.rdp.other_mode;
        let texture_edge = other_mode.texture_edge();
        let use_alpha = other_mode.alpha_blend() || texture_edge;
        let use_fog = self.config.enable_fog && other_mode.fog_blend();

        let mut cc_id = self.state.rdp.combine_mode.0;
        if use_alpha {
            cc_id |= OPT_ALPHA;
        }
        if use_fog {
            cc_id |= OPT_FOG;
        }
        if texture_edge {
            cc_id |= OPT_TEXTURE_EDGE;
        }
        if other_mode.noise() {
            cc_id |= OPT_NOISE;
        }
        if !use_alpha {
            cc_id &= !0xFFF000;
        }

        let combiner = match self.state.combiners.lookup(cc_id) {
            Some(combiner) => combiner,
            None => {
                self.flush()?;
                let generated = generate_cc(cc_id);
                let prg = lookup_or_create_shader_program(
                    &mut self.backend,
                    &mut self.state.rendering.shader_program,
                    generated.shader_id,
                )?;
                let combiner = ColorCombiner {
                    cc_id,
                    prg,
                    input_mapping: generated.input_mapping,
                };
                self.state.combiners.insert(combiner);
                combiner
            }
        };

        if self.state.rendering.shader_program != Some(combiner.prg) {
            self.flush()?;
            self.backend.unload_shader(self.state.rendering.shader_program);
            self.backend.load_shader(combiner.prg);
            self.state.rendering.shader_program = Some(combiner.prg);
        }
        if self.state.rendering.alpha_blend != Some(use_alpha) {
            self.flush()?;
            self.backend.set_use_alpha(use_alpha);
            self.state.rendering.alpha_blend = Some(use_alpha);
        }

        Ok((combiner, use_alpha, use_fog))
    }

    /// Imports the staged texture for `tile`, unless the cache already holds it.
    fn load_texture<M: GfxMemory>(&mut self, memory: &M, tile: usize) -> Result<(), GfxError> {
        let rdp = &self.state.rdp;
        let loaded = rdp.loaded_texture[tile];
        let texture_tile = rdp.texture_tile;
        let palette = rdp.palette;
        let key = TextureKey {
            addr: loaded.addr,
            fmt: texture_tile.fmt,
            siz: texture_tile.siz,
        };

        let (node, hit) = self.state.textures.lookup(&mut self.backend, tile, key)?;
        self.state.rendering.textures[tile] = Some(node);
        if !hit {
            let decoded = texture::import_texture(
                memory,
                key,
                loaded.size_bytes,
                texture_tile.line_size_bytes,
                palette,
            )?;
            log::debug!(
                "imported {:?} {:?} at {:#010X} as {}x{}",
                key.fmt,
                key.siz,
                key.addr,
                decoded.width,
                decoded.height
            );
            self.backend
                .upload_texture(&decoded.rgba8, decoded.width, decoded.height);
        }
        Ok(())
    }

    /// Makes sure the textures a shader samples are bound with up to date sampler state.
    ///
    /// Returns whether any texture is used.
    fn update_textures<M: GfxMemory>(
        &mut self,
        memory: &M,
        used_textures: [bool; 2],
        linear_filter: bool,
    ) -> Result<bool, GfxError> {
        for tile in 0..2 {
            if !used_textures[tile] {
                continue;
            }
            let bound = self.state.rendering.textures[tile];
            if self.state.rdp.textures_changed[tile] || bound.is_none() {
                self.flush()?;
                self.load_texture(memory, tile)?;
                self.state.rdp.textures_changed[tile] = false;
            }

            let index = match self.state.rendering.textures[tile] {
                Some(index) => index,
                None => continue,
            };
            let texture_tile = self.state.rdp.texture_tile;
            let node = self.state.textures.node(index);
            if node.linear_filter != linear_filter
                || node.cms != texture_tile.cms
                || node.cmt != texture_tile.cmt
            {
                self.flush()?;
                self.backend.set_sampler_parameters(
                    tile,
                    linear_filter,
                    texture_tile.cms,
                    texture_tile.cmt,
                );
                let node = self.state.textures.node_mut(index);
                node.linear_filter = linear_filter;
                node.cms = texture_tile.cms;
                node.cmt = texture_tile.cmt;
            }
        }
        Ok(used_textures[0] || used_textures[1])
    }

    fn push_triangle<M: GfxMemory>(
        &mut self,
        memory: &M,
        tri: &[LoadedVertex; 3],
    ) -> Result<(), GfxError> {
        let depth_test = self
            .state
            .rsp
            .geometry_mode
            .contains(GeometryModes::ZBUFFER);
        if self.state.rendering.depth_test != Some(depth_test) {
            self.flush()?;
            self.backend.set_depth_test(depth_test);
            self.state.rendering.depth_test = Some(depth_test);
        }

        let other_mode = self.state.rdp.other_mode;
        let z_upd = other_mode.z_update();
        if self.state.rendering.depth_mask != Some(z_upd) {
            self.flush()?;
            self.backend.set_depth_mask(z_upd);
            self.state.rendering.depth_mask = Some(z_upd);
        }

        let zmode_decal = other_mode.zmode_decal();
        if self.state.rendering.decal_mode != Some(zmode_decal) {
            self.flush()?;
            self.backend.set_zmode_decal(zmode_decal);
            self.state.rendering.decal_mode = Some(zmode_decal);
        }

        self.update_viewport_and_scissor()?;

        let (combiner, use_alpha, use_fog) = self.pick_combiner()?;
        let info = self.backend.shader_get_info(combiner.prg);

        let point_filter = other_mode.point_filter();
        let linear_filter = self.config.texture_filtering && !point_filter;
        let use_texture = self.update_textures(memory, info.used_textures, linear_filter)?;

        let PipelineState { rdp, vbo, .. } = &mut self.state;
        let (tex_width, tex_height) = rdp.texture_tile.dimensions();
        let tex_origin = (
            Fix64::from_int(rdp.texture_tile.uls as i32 * 8),
            Fix64::from_int(rdp.texture_tile.ult as i32 * 8),
        );

        // level of detail from the distance of the first vertex
        let lod_distance = Fix64::from_int(3000);
        let lod = ((tri[0].w - lod_distance).div(lod_distance))
            .clamp_to(Fix64::ZERO, Fix64::ONE)
            .scale(255)
            .to_int() as u8;

        for v in tri {
            // near-zero w is not floored here; inv saturates 1/w instead
            // w near zero saturates in inv, which floors the slopes downstream
            let w_inv = v.w.inv();
            vbo.push(v.x * w_inv);
            vbo.push(v.y * w_inv);
            vbo.push(((v.z + v.w) * Fix64::HALF) * w_inv);
            vbo.push(w_inv);

            if use_texture {
                let mut u = (v.u - tex_origin.0) >> 5;
                let mut t = (v.v - tex_origin.1) >> 5;
                if !point_filter {
                    u = u + Fix64::HALF;
                    t = t + Fix64::HALF;
                }
                vbo.push(Fix64(u.0 / tex_width) * w_inv);
                vbo.push(Fix64(t.0 / tex_height) * w_inv);
            }

            if use_fog {
                vbo.push(w_inv.scale(v.color.a as i32));
            }

            for j in 0..info.num_inputs as usize {
                for k in 0..1 + use_alpha as usize {
                    let source = combiner.input_mapping[k][j];
                    let color = match source {
                        cc::PRIM => rdp.prim_color,
                        cc::SHADE => v.color,
                        cc::ENV => rdp.env_color,
                        cc::LOD => Rgba32::new(lod, lod, lod, lod),
                        _ => Rgba32::default(),
                    };
                    if k == 0 {
                        for c in color.rgb() {
                            vbo.push(w_inv.scale(c as i32));
                        }
                    } else {
                        // shade alpha carries the fog factor
                        let a = if use_fog && source == cc::SHADE {
                            0xFF
                        } else {
                            color.a
                        };
                        vbo.push(w_inv.scale(a as i32));
                    }
                }
            }
        }

        self.state.num_tris += 1;
        self.stats.triangles += 1;
        if self.state.num_tris == MAX_BUFFERED {
            self.flush()?;
        }
        Ok(())
    }

    fn cycle_type(&self) -> CycleType {
        self.state.rdp.other_mode.cycle_type()
    }

    /// Draws a screen space quad through the triangle path, bypassing the viewport.
    ///
    /// Coordinates are 10.2 in native screen space. The corners' colors and texture
    /// coordinates must already be set.
    fn draw_rectangle<M: GfxMemory>(
        &mut self,
        memory: &M,
        ulx: i32,
        uly: i32,
        lrx: i32,
        lry: i32,
    ) -> Result<(), GfxError> {
        let saved_other_mode = self.state.rdp.other_mode;
        if self.cycle_type() == CycleType::Copy {
            // G_TF_POINT
            self.state.rdp.other_mode.set(32 + 12, 2, 0);
        }

        let half_width = Fix64::from_int(4 * SCREEN_WIDTH as i32 / 2);
        let half_height = Fix64::from_int(4 * SCREEN_HEIGHT as i32 / 2);
        let ndc_x = |x: i32| Fix64::from_int(x).div(half_width) - Fix64::ONE;
        let ndc_y = |y: i32| Fix64::ONE - Fix64::from_int(y).div(half_height);
        let (x0, y0, x1, y1) = (ndc_x(ulx), ndc_y(uly), ndc_x(lrx), ndc_y(lry));

        // ul, ll, lr, ur
        for (corner, (x, y)) in [(x0, y0), (x0, y1), (x1, y1), (x1, y0)]
            .into_iter()
            .enumerate()
        {
            let v = self.state.rsp.rect_vertex_mut(corner);
            v.x = x;
            v.y = y;
            v.z = -Fix64::ONE;
            v.w = Fix64::ONE;
            v.clip_rej = ClipFlags::empty();
        }

        let saved_viewport = self.state.rdp.viewport;
        let saved_geometry_mode = self.state.rsp.geometry_mode;
        let (width, height) = self.dimensions;
        self.state.rdp.viewport = ScreenRect {
            x: 0,
            y: 0,
            width: width as i32,
            height: height as i32,
        };
        self.state.rdp.viewport_or_scissor_changed = true;
        self.state.rsp.geometry_mode = GeometryModes::empty();

        let r = MAX_VERTICES as u32;
        let result = self
            .tri1(memory, [r, r + 1, r + 3])
            .and_then(|()| self.tri1(memory, [r + 1, r + 2, r + 3]));

        self.state.rsp.geometry_mode = saved_geometry_mode;
        self.state.rdp.viewport = saved_viewport;
        self.state.rdp.viewport_or_scissor_changed = true;
        self.state.rdp.other_mode = saved_other_mode;
        result
    }

    /// Converts 10.2 screen coordinates to window pixels.
    fn to_window(&self, x: i32, y: i32) -> (i32, i32) {
        let (rx, ry) = self.ratio;
        ((x as f32 * rx / 4.0) as i32, (y as f32 * ry / 4.0) as i32)
    }

    fn texture_rectangle<M: GfxMemory>(
        &mut self,
        memory: &M,
        tex_rect: TextureRectangle,
        flip: bool,
    ) -> Result<(), GfxError> {
        let saved_combine_mode = self.state.rdp.combine_mode;

        let Rectangle { ulx, uly, lrx, lry } = tex_rect.rect;
        let (ulx, uly, mut lrx, mut lry) = (ulx as i32, uly as i32, lrx as i32, lry as i32);
        let mut dsdx = tex_rect.dsdx as i32;
        let mut dtdy = tex_rect.dtdy as i32;
        if self.cycle_type() == CycleType::Copy {
            // copy mode steps 4 texels per pixel
            dsdx >>= 2;
            self.state.rdp.combine_mode = CombineMode::texel0();
            lrx += 4;
            lry += 4;
        }
        if flip {
            dsdx = -dsdx;
            dtdy = -dtdy;
        }

        // s and t are S10.5, the steps S5.10 and the corners U10.2
        let (uls, ult) = (tex_rect.s as i32, tex_rect.t as i32);
        let (width, height) = if flip {
            (lry - uly, lrx - ulx)
        } else {
            (lrx - ulx, lry - uly)
        };
        let lrs = ((uls << 7) + dsdx * width) >> 7;
        let lrt = ((ult << 7) + dtdy * height) >> 7;

        let result = if self.backend.supports_rect_fast_path() && !flip {
            self.texture_rectangle_fast(memory, [ulx, uly, lrx, lry], [uls, ult, lrs, lrt])
        } else {
            let corners = if flip {
                [(uls, ult), (lrs, ult), (lrs, lrt), (uls, lrt)]
            } else {
                [(uls, ult), (uls, lrt), (lrs, lrt), (lrs, ult)]
            };
            for (corner, (u, v)) in corners.into_iter().enumerate() {
                let vertex = self.state.rsp.rect_vertex_mut(corner);
                vertex.u = Fix64::from_int(u);
                vertex.v = Fix64::from_int(v);
            }
            self.draw_rectangle(memory, ulx, uly, lrx, lry)
        };

        self.state.rdp.combine_mode = saved_combine_mode;
        result
    }

    fn texture_rectangle_fast<M: GfxMemory>(
        &mut self,
        memory: &M,
        [ulx, uly, lrx, lry]: [i32; 4],
        [uls, ult, lrs, lrt]: [i32; 4],
    ) -> Result<(), GfxError> {
        let (rx, ry) = self.ratio;
        let dudx = (lrs - uls) as f32 / ((lrx - ulx) as f32 * rx);
        let dvdy = (lrt - ult) as f32 / ((lry - uly) as f32 * ry);

        self.pick_combiner()?;
        self.update_textures(memory, [true, false], false)?;
        self.flush()?;

        let (x0, y0) = self.to_window(ulx, uly);
        let (x1, y1) = self.to_window(lrx, lry);
        self.backend.tex_rect(TexRect {
            x0,
            y0,
            x1,
            y1,
            u0: uls as f32 / 32.0,
            v0: ult as f32 / 32.0,
            dudx: dudx / 8.0,
            dvdy: dvdy / 8.0,
            color: self.state.rdp.env_color,
        });
        Ok(())
    }

    fn fill_rectangle<M: GfxMemory>(
        &mut self,
        memory: &M,
        rect: Rectangle<u32>,
    ) -> Result<(), GfxError> {
        let rdp = &self.state.rdp;
        if rdp.color_image_address.is_some() && rdp.color_image_address == rdp.z_buf_address {
            // depth clears happen in the backend at the start of a frame
            return Ok(());
        }

        let Rectangle { ulx, uly, lrx, lry } = rect;
        let (ulx, uly, mut lrx, mut lry) = (ulx as i32, uly as i32, lrx as i32, lry as i32);
        if matches!(self.cycle_type(), CycleType::Copy | CycleType::Fill) {
            lrx += 4;
            lry += 4;
        }

        let saved_combine_mode = self.state.rdp.combine_mode;
        self.state.rdp.combine_mode = CombineMode::shade();

        let result = if self.backend.supports_rect_fast_path() {
            self.fill_rectangle_fast([ulx, uly, lrx, lry])
        } else {
            let fill_color = self.state.rdp.fill_color;
            for corner in 0..4 {
                self.state.rsp.rect_vertex_mut(corner).color = fill_color;
            }
            self.draw_rectangle(memory, ulx, uly, lrx, lry)
        };

        self.state.rdp.combine_mode = saved_combine_mode;
        result
    }

    fn fill_rectangle_fast(&mut self, [ulx, uly, lrx, lry]: [i32; 4]) -> Result<(), GfxError> {
        self.pick_combiner()?;
        self.flush()?;
        let (x0, y0) = self.to_window(ulx, uly);
        let (x1, y1) = self.to_window(lrx, lry);
        self.backend
            .fill_rect(x0, y0, x1, y1, self.state.rdp.fill_color);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        backend::{HeadlessWindow, ShaderInfo},
        cmd::MatrixParams,
        memory::Rdram,
        util::{Matrix, Vertex},
    };

    /// Records what the interpreter sends without drawing anything.
    #[derive(Debug, Default)]
    struct RecordingBackend {
        shaders: Vec<u32>,
        textures: u32,
        draws: Vec<(usize, usize)>,
        depth_test: Option<bool>,
        fast_path: bool,
        fills: Vec<[i32; 4]>,
    }

    impl RenderingBackend for RecordingBackend {
        fn z_is_from_0_to_1(&self) -> bool {
            true
        }
        fn unload_shader(&mut self, _old_prg: Option<ShaderId>) {}
        fn load_shader(&mut self, _new_prg: ShaderId) {}
        fn create_and_load_new_shader(&mut self, shader_id: u32) -> Result<ShaderId, GfxError> {
            self.shaders.push(shader_id);
            Ok(ShaderId(self.shaders.len() - 1))
        }
        fn lookup_shader(&self, shader_id: u32) -> Option<ShaderId> {
            self.shaders.iter().position(|&s| s == shader_id).map(ShaderId)
        }
        fn shader_get_info(&self, prg: ShaderId) -> ShaderInfo {
            let f = crate::combiner::ShaderFeatures::from_shader_id(self.shaders[prg.0]);
            ShaderInfo {
                num_inputs: f.num_inputs,
                used_textures: f.used_textures,
            }
        }
        fn new_texture(&mut self) -> Result<u32, GfxError> {
            self.textures += 1;
            Ok(self.textures - 1)
        }
        fn select_texture(&mut self, _tile: usize, _texture_id: u32) {}
        fn upload_texture(&mut self, _rgba8: &[u8], _width: u32, _height: u32) {}
        fn set_sampler_parameters(&mut self, _: usize, _: bool, _: TileWrap, _: TileWrap) {}
        fn set_depth_test(&mut self, depth_test: bool) {
            self.depth_test = Some(depth_test);
        }
        fn set_depth_mask(&mut self, _z_upd: bool) {}
        fn set_zmode_decal(&mut self, _zmode_decal: bool) {}
        fn set_viewport(&mut self, _x: i32, _y: i32, _width: i32, _height: i32) {}
        fn set_scissor(&mut self, _x: i32, _y: i32, _width: i32, _height: i32) {}
        fn set_use_alpha(&mut self, _use_alpha: bool) {}
        fn draw_triangles(&mut self, buf_vbo: &[Fix64], num_tris: usize) -> Result<(), GfxError> {
            self.draws.push((buf_vbo.len(), num_tris));
            Ok(())
        }
        fn init(&mut self, _width: u32, _height: u32) {}
        fn on_resize(&mut self, _width: u32, _height: u32) {}
        fn start_frame(&mut self) {}
        fn end_frame(&mut self) {}
        fn finish_render(&mut self) {}
        fn supports_rect_fast_path(&self) -> bool {
            self.fast_path
        }
        fn fill_rect(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, _color: Rgba32) {
            self.fills.push([x0, y0, x1, y1]);
        }
    }

    fn context() -> GraphicsContext<RecordingBackend, HeadlessWindow> {
        let mut gfx = GraphicsContext::new(
            GfxConfig::default(),
            RecordingBackend::default(),
            HeadlessWindow::default(),
        );
        gfx.init().unwrap();
        gfx.start_frame();
        gfx
    }

    fn write_dl(memory: &mut Rdram, addr: u32, words: &[[u32; 2]]) {
        let flat: Vec<u32> = words.iter().flatten().copied().collect();
        memory.write_u32(addr, &flat).unwrap();
    }

    const END: [u32; 2] = [0xB800_0000, 0];

    #[test]
    fn test_precompiled_shaders() {
        let gfx = context();
        assert_eq!(gfx.backend().shaders.len(), PRECOMPILED_SHADERS.len());
    }

    #[test]
    fn test_call_and_branch() {
        let mut memory = Rdram::new(0x1000);
        // root calls 0x100, which branches to 0x200
        write_dl(&mut memory, 0, &[[0x0600_0000, 0x100], END]);
        write_dl(&mut memory, 0x100, &[[0x0601_0000, 0x200]]);
        write_dl(&mut memory, 0x200, &[[0, 0], END]);

        let mut gfx = context();
        let stats = gfx.run(&memory, 0).unwrap();
        // call, branch, noop, end, end
        assert_eq!(stats.commands, 5);
    }

    #[test]
    fn test_call_depth_limit() {
        let mut memory = Rdram::new(0x100);
        // a list that calls itself
        write_dl(&mut memory, 0, &[[0x0600_0000, 0], END]);
        let mut gfx = context();
        assert_eq!(
            gfx.run(&memory, 0),
            Err(GfxError::CallStackOverflow { depth: 10 })
        );
    }

    #[test]
    fn test_segmented_addresses() {
        let mut memory = Rdram::new(0x1000);
        // G_MW_SEGMENT for segment 4, then call 0x04000010
        write_dl(
            &mut memory,
            0,
            &[[0xBC00_0006 | (4 * 4) << 8, 0x800], [0x0600_0000, 0x0400_0010], END],
        );
        write_dl(&mut memory, 0x810, &[[0, 0], END]);
        let mut gfx = context();
        let stats = gfx.run(&memory, 0).unwrap();
        assert_eq!(stats.commands, 5);
    }

    #[test]
    fn test_unknown_commands_are_skipped() {
        let mut memory = Rdram::new(0x100);
        write_dl(&mut memory, 0, &[[0x4200_0000, 0], END]);
        let mut gfx = context();
        assert_eq!(gfx.run(&memory, 0).unwrap().commands, 2);
    }

    #[test]
    fn test_missing_end_is_a_memory_error() {
        let memory = Rdram::new(0x10);
        let mut gfx = context();
        assert!(matches!(gfx.run(&memory, 0), Err(GfxError::Memory(_))));
    }

    #[test]
    fn test_viewport_transform() {
        let mut gfx = context();
        // full screen viewport in 14.2
        gfx.set_viewport(&Viewport {
            scale: [640, 480, 511, 0],
            trans: [640, 480, 511, 0],
        });
        assert_eq!(
            gfx.state().rdp.viewport,
            ScreenRect {
                x: 0,
                y: 0,
                width: 320,
                height: 240
            }
        );

        gfx.set_scissor(Rectangle {
            ulx: 0,
            uly: 0,
            lrx: 160 << 2,
            lry: 120 << 2,
        });
        assert_eq!(
            gfx.state().rdp.scissor,
            ScreenRect {
                x: 0,
                y: 120,
                width: 160,
                height: 120
            }
        );
    }

    #[test]
    fn test_load_block_limit() {
        let mut gfx = context();
        gfx.state.rdp.texture_to_load.siz = ComponentSize::Bits16;
        let block = |lrs| TextureBlock {
            uls: 0,
            ult: 0,
            lrs,
            dxt: 0,
        };
        gfx.load_block(TileIndex::LOAD, block(2047)).unwrap();
        assert_eq!(gfx.state().rdp.loaded_texture[0].size_bytes, 4096);
        assert_eq!(gfx.state().rdp.textures_changed, [true, false]);
        assert_eq!(
            gfx.load_block(TileIndex::LOAD, block(2048)),
            Err(GfxError::TextureTooLarge { size: 4098 })
        );
    }

    #[test]
    fn test_load_tile_sets_tile_size() {
        let mut gfx = context();
        gfx.state.rdp.texture_to_load.siz = ComponentSize::Bits16;
        gfx.set_tile(
            TileIndex::LOAD,
            TileParams {
                tmem: 256,
                ..Default::default()
            },
        );
        let size = TileSize {
            uls: 0,
            ult: 0,
            lrs: 31 << 2,
            lrt: 15 << 2,
        };
        gfx.load_tile(TileIndex::LOAD, size).unwrap();
        let rdp = &gfx.state().rdp;
        assert_eq!(rdp.loaded_texture[1].size_bytes, 32 * 16 * 2);
        assert_eq!(rdp.texture_tile.lrs, 31 << 2);
        assert_eq!(rdp.texture_tile.dimensions(), (32, 16));
    }

    #[test]
    fn test_triangles_batch_until_state_changes() {
        let memory = Rdram::new(0x10);
        let mut gfx = context();
        let state = gfx.state_mut();
        state.rsp.matrix(
            MatrixParams::PROJECTION | MatrixParams::LOAD,
            &Matrix::scale(0.01, 0.01, 0.01),
        );
        state.rsp.matrix(MatrixParams::LOAD, &Matrix::identity());
        state.rdp.combine_mode = CombineMode::shade();
        // blend with memory alpha so the shader has no alpha input
        state.rdp.other_mode.set(0, 32, 1 << 18);
        let vertices: Vec<Vertex> = [[0, 0], [50, 0], [0, 50]]
            .iter()
            .map(|&[x, y]| Vertex {
                pos: [x, y, 0],
                cn: [255, 0, 0, 255],
                ..Default::default()
            })
            .collect();
        state.rsp.load_vertices(0, &vertices, false).unwrap();

        gfx.tri1(&memory, [0, 1, 2]).unwrap();
        gfx.tri1(&memory, [0, 2, 1]).unwrap();
        assert_eq!(gfx.state().buffered_triangles(), 2);
        assert_eq!(gfx.backend().draws.len(), 0);

        // enabling the depth test flushes the batch first
        gfx.state_mut()
            .rsp
            .update_geometry_mode(GeometryModes::empty(), GeometryModes::ZBUFFER);
        gfx.tri1(&memory, [0, 1, 2]).unwrap();
        assert_eq!(gfx.backend().draws.len(), 1);
        // x, y, z, 1/w and rgb for each vertex
        assert_eq!(gfx.backend().draws[0], (2 * 3 * 7, 2));
        assert_eq!(gfx.backend().depth_test, Some(true));

        gfx.flush().unwrap();
        assert_eq!(gfx.backend().draws.len(), 2);
        assert_eq!(gfx.state().buffered_triangles(), 0);
    }

    #[test]
    fn test_culled_and_rejected_triangles() {
        let memory = Rdram::new(0x10);
        let mut gfx = context();
        let state = gfx.state_mut();
        state.rsp.matrix(MatrixParams::PROJECTION | MatrixParams::LOAD, &Matrix::identity());
        state.rsp.matrix(MatrixParams::LOAD, &Matrix::identity());
        let vertices: Vec<Vertex> = [[5, 0], [6, 0], [5, 1]]
            .iter()
            .map(|&[x, y]| Vertex {
                pos: [x, y, 0],
                ..Default::default()
            })
            .collect();
        state.rsp.load_vertices(0, &vertices, false).unwrap();
        state
            .rsp
            .update_geometry_mode(GeometryModes::empty(), GeometryModes::CULL_BOTH);

        gfx.tri1(&memory, [0, 1, 2]).unwrap();
        assert_eq!(gfx.stats.culled, 1);
        assert_eq!(gfx.state().buffered_triangles(), 0);
        assert_eq!(gfx.tri1(&memory, [0, 1, 70]), Err(GfxError::InvalidVertexIndex(70)));
    }

    #[test]
    fn test_fill_rectangle_paths() {
        let memory = Rdram::new(0x10);
        let mut gfx = context();
        gfx.state.rdp.other_mode.set(32 + 20, 2, (CycleType::Fill as u64) << 52);
        let rect = Rectangle {
            ulx: 0,
            uly: 0,
            lrx: 319 << 2,
            lry: 239 << 2,
        };

        gfx.fill_rectangle(&memory, rect).unwrap();
        assert_eq!(gfx.state().buffered_triangles(), 2);
        // the viewport is restored after the quad
        assert_eq!(gfx.state().rdp.viewport, ScreenRect::default());
        assert_eq!(gfx.state().rdp.combine_mode, CombineMode::default());

        gfx.backend_mut().fast_path = true;
        gfx.fill_rectangle(&memory, rect).unwrap();
        assert_eq!(gfx.backend().fills, vec![[0, 0, 320, 240]]);

        // clearing the depth image is skipped
        gfx.state.rdp.color_image_address = Some(0x100);
        gfx.state.rdp.z_buf_address = Some(0x100);
        gfx.fill_rectangle(&memory, rect).unwrap();
        assert_eq!(gfx.backend().fills.len(), 1);
    }

    #[test]
    fn test_dropped_frame() {
        let memory = Rdram::new(0x10);
        let mut gfx = context();
        gfx.window_mut().skip_next_frame();
        let stats = gfx.run(&memory, 0).unwrap();
        assert_eq!(stats, FrameStats::default());
        assert!(gfx.dropped_frame());
        gfx.end_frame();
        assert_eq!(gfx.window().frames_presented(), 0);
    }
}
