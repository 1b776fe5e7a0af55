//! The interfaces the pipeline renders and presents through.

#![allow(missing_docs)]

use std::time::Instant;

use crate::{
    cmd::{Rgba32, TileWrap},
    error::GfxError,
    fixed::Fix64,
};

/// A backend handle to a compiled shader program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderId(pub usize);

/// What a shader program reads from the vertex stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShaderInfo {
    /// Number of interpolated color inputs (prim, shade, env or LOD), at most 4.
    pub num_inputs: u8,
    pub used_textures: [bool; 2],
}

/// A screen aligned textured rectangle, in window pixels.
///
/// Texture coordinates are in texels of the texture bound to tile 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TexRect {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
    pub u0: f32,
    pub v0: f32,
    pub dudx: f32,
    pub dvdy: f32,
    /// Modulates the texture when the current shader has color inputs.
    pub color: Rgba32,
}

/// Receives shader, texture, state and triangle submissions from the pipeline.
///
/// Triangles arrive in `draw_triangles` as a flat vertex buffer. Each vertex is
/// `x/w, y/w, z/w, 1/w` followed by the shader's properties, each already multiplied by
/// `1/w`.
pub trait RenderingBackend {
    fn z_is_from_0_to_1(&self) -> bool;
    /// Unloads `old_prg`, or whatever is loaded when `None`.
    fn unload_shader(&mut self, old_prg: Option<ShaderId>);
    fn load_shader(&mut self, new_prg: ShaderId);
    fn create_and_load_new_shader(&mut self, shader_id: u32) -> Result<ShaderId, GfxError>;
    fn lookup_shader(&self, shader_id: u32) -> Option<ShaderId>;
    fn shader_get_info(&self, prg: ShaderId) -> ShaderInfo;
    fn new_texture(&mut self) -> Result<u32, GfxError>;
    fn select_texture(&mut self, tile: usize, texture_id: u32);
    /// Uploads RGBA8 texels to the most recently selected tile.
    fn upload_texture(&mut self, rgba8: &[u8], width: u32, height: u32);
    fn set_sampler_parameters(
        &mut self,
        tile: usize,
        linear_filter: bool,
        cms: TileWrap,
        cmt: TileWrap,
    );
    fn set_depth_test(&mut self, depth_test: bool);
    fn set_depth_mask(&mut self, z_upd: bool);
    fn set_zmode_decal(&mut self, zmode_decal: bool);
    /// Rectangles use a bottom left origin.
    fn set_viewport(&mut self, x: i32, y: i32, width: i32, height: i32);
    fn set_scissor(&mut self, x: i32, y: i32, width: i32, height: i32);
    fn set_use_alpha(&mut self, use_alpha: bool);
    fn draw_triangles(&mut self, buf_vbo: &[Fix64], num_tris: usize) -> Result<(), GfxError>;
    fn init(&mut self, width: u32, height: u32);
    fn on_resize(&mut self, width: u32, height: u32);
    fn start_frame(&mut self);
    fn end_frame(&mut self);
    fn finish_render(&mut self);

    /// Whether `fill_rect` and `tex_rect` should be used instead of drawing quads.
    fn supports_rect_fast_path(&self) -> bool {
        false
    }

    /// Fills a rectangle with a top left origin, ignoring depth and blending.
    fn fill_rect(&mut self, _x0: i32, _y0: i32, _x1: i32, _y1: i32, _color: Rgba32) {}

    /// Draws a textured rectangle with a top left origin.
    fn tex_rect(&mut self, _rect: TexRect) {}

    fn set_fog_color(&mut self, _color: Rgba32) {}

    fn shutdown(&mut self) {}
}

/// The window or display the frames are presented to.
pub trait WindowBackend {
    fn init(&mut self, title: &str, start_fullscreen: bool);
    /// Width and height of the drawable area in pixels.
    fn dimensions(&self) -> (u32, u32);
    fn handle_events(&mut self);
    /// Returns false if this frame should be skipped.
    fn start_frame(&mut self) -> bool;
    fn swap_buffers_begin(&mut self);
    fn swap_buffers_end(&mut self);
    /// Seconds since init.
    fn get_time(&self) -> f64;
    fn shutdown(&mut self) {}
}

/// A window that has no display. Only skips frames when asked to.
#[derive(Debug, Clone)]
pub struct HeadlessWindow {
    width: u32,
    height: u32,
    start: Instant,
    frames_presented: u64,
    skip_next: bool,
}

impl HeadlessWindow {
    #[allow(missing_docs)]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            start: Instant::now(),
            frames_presented: 0,
            skip_next: false,
        }
    }

    /// Makes the next `start_frame` report a skipped frame.
    pub fn skip_next_frame(&mut self) {
        self.skip_next = true;
    }

    /// Changes the reported dimensions, as if the window was resized.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    /// Number of completed swaps.
    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }
}

impl Default for HeadlessWindow {
    fn default() -> Self {
        Self::new(320, 240)
    }
}

impl WindowBackend for HeadlessWindow {
    fn init(&mut self, title: &str, _start_fullscreen: bool) {
        log::debug!("headless window \"{}\" at {}x{}", title, self.width, self.height);
        self.start = Instant::now();
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn handle_events(&mut self) {}

    fn start_frame(&mut self) -> bool {
        !std::mem::take(&mut self.skip_next)
    }

    fn swap_buffers_begin(&mut self) {}

    fn swap_buffers_end(&mut self) {
        self.frames_presented += 1;
    }

    fn get_time(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}
