//! End to end scenes rendered through the software backend.

use fast3d_soft::{
    backend::HeadlessWindow,
    builder::{
        mux, render_mode, rgba16, screen_viewport, write_matrix, write_texture_rgba16,
        write_vertices, write_viewport, DisplayListBuilder,
    },
    cmd::{
        ComponentSize, CycleType, GeometryModes, ImageFormat, MatrixParams, Rgba32, TileIndex,
        TileParams, TileSize, TileWrap,
    },
    config::GfxConfig,
    interpret::{FrameStats, GraphicsContext},
    memory::Rdram,
    soft::SoftwareBackend,
    util::{Matrix, Vertex},
};

const DL: u32 = 0x0000;
const VERTICES: u32 = 0x4000;
const PROJECTION: u32 = 0x6000;
const MODELVIEW: u32 = 0x6040;
const VIEWPORT: u32 = 0x6100;
const TEXTURE: u32 = 0x7000;

const RED: Rgba32 = Rgba32::new(255, 0, 0, 255);
const GREEN: Rgba32 = Rgba32::new(0, 255, 0, 255);
const BLUE: Rgba32 = Rgba32::new(0, 0, 255, 255);
const WHITE: Rgba32 = Rgba32::new(255, 255, 255, 255);
const BLACK: Rgba32 = Rgba32::new(0, 0, 0, 255);

type Gfx = GraphicsContext<SoftwareBackend, HeadlessWindow>;

/// Object space x and y in [-128, 128] cover the whole 320x240 screen.
struct Scene {
    memory: Rdram,
    dl: DisplayListBuilder,
    next_vertex: u32,
}

impl Scene {
    fn new() -> Self {
        let mut memory = Rdram::new(0x10000);
        let s = 1.0 / 128.0;
        write_matrix(&mut memory, PROJECTION, &Matrix::scale(s, s, s)).unwrap();
        write_matrix(&mut memory, MODELVIEW, &Matrix::identity()).unwrap();
        write_viewport(&mut memory, VIEWPORT, &screen_viewport(320, 240)).unwrap();

        let mut dl = DisplayListBuilder::new();
        dl.viewport(VIEWPORT)
            .set_scissor(0, 0, 320, 240)
            .matrix(PROJECTION, MatrixParams::PROJECTION | MatrixParams::LOAD)
            .matrix(MODELVIEW, MatrixParams::LOAD)
            .set_cycle_type(CycleType::OneCycle)
            .set_render_mode(render_mode::BL_A_MEM)
            .set_combine_source(mux::SHADE, mux::SHADE);
        Self {
            memory,
            dl,
            next_vertex: VERTICES,
        }
    }

    fn vertices(&mut self, vertices: &[Vertex]) -> &mut DisplayListBuilder {
        let addr = self.next_vertex;
        write_vertices(&mut self.memory, addr, vertices).unwrap();
        self.next_vertex += (vertices.len() * Vertex::SIZE) as u32;
        self.dl.vertex(addr, vertices.len() as u32, 0)
    }

    fn triangle(&mut self, vertices: [Vertex; 3]) -> &mut DisplayListBuilder {
        self.vertices(&vertices).tri1(0, 1, 2)
    }

    fn render(&mut self) -> (Gfx, FrameStats) {
        let mut gfx = GraphicsContext::new(
            GfxConfig::default(),
            SoftwareBackend::default(),
            HeadlessWindow::default(),
        );
        gfx.init().unwrap();
        let stats = self.render_with(&mut gfx);
        (gfx, stats)
    }

    fn render_with(&mut self, gfx: &mut Gfx) -> FrameStats {
        let mut dl = self.dl.clone();
        dl.full_sync().end();
        dl.write_to(&mut self.memory, DL).unwrap();

        gfx.start_frame();
        let stats = gfx.run(&self.memory, DL).unwrap();
        gfx.end_frame();
        stats
    }
}

fn vertex([x, y, z]: [i16; 3], color: Rgba32) -> Vertex {
    Vertex {
        pos: [x, y, z],
        cn: [color.r, color.g, color.b, color.a],
        ..Default::default()
    }
}

fn textured(x: i16, y: i16, uv: [i16; 2]) -> Vertex {
    Vertex {
        pos: [x, y, 0],
        uv,
        cn: [255; 4],
        ..Default::default()
    }
}

/// The pixel at `(x, y)` with a bottom left origin, like object space.
fn pixel(gfx: &Gfx, x: u32, y: u32) -> Rgba32 {
    gfx.backend().pixel(x, 239 - y).unwrap()
}

fn covered(gfx: &Gfx) -> usize {
    gfx.backend()
        .framebuffer()
        .iter()
        .filter(|&&c| c != Rgba32::default())
        .count()
}

#[test]
fn test_gouraud_triangle() {
    let mut scene = Scene::new();
    scene.triangle([
        vertex([-96, -96, 0], RED),
        vertex([96, -96, 0], GREEN),
        vertex([0, 80, 0], BLUE),
    ]);
    let (gfx, stats) = scene.render();

    assert_eq!(stats.triangles, 1);
    assert_eq!(stats.clipped, 0);
    assert_eq!(stats.flushes, 1);

    // corners at (40, 30), (280, 30) and (160, 195)
    let near_red = pixel(&gfx, 52, 34);
    assert!(near_red.r > 220 && near_red.g < 30 && near_red.b < 30, "{:?}", near_red);
    let near_green = pixel(&gfx, 267, 34);
    assert!(near_green.g > 220 && near_green.r < 30 && near_green.b < 30, "{:?}", near_green);
    let near_blue = pixel(&gfx, 160, 185);
    assert!(near_blue.b > 220 && near_blue.r < 30 && near_blue.g < 30, "{:?}", near_blue);

    let centroid = pixel(&gfx, 160, 85);
    for c in [centroid.r, centroid.g, centroid.b] {
        assert!((75..96).contains(&c), "{:?}", centroid);
    }

    // the left edge crosses row 45 at x = 50.9
    assert!(pixel(&gfx, 51, 45).r > 200);
    assert_eq!(pixel(&gfx, 50, 45), Rgba32::default());

    // outside the footprint
    assert_eq!(pixel(&gfx, 5, 5), Rgba32::default());
    assert_eq!(pixel(&gfx, 40, 200), Rgba32::default());
    assert_eq!(pixel(&gfx, 160, 29), Rgba32::default());
    assert_eq!(pixel(&gfx, 315, 235), Rgba32::default());

    // 240 wide, 165 high
    let area = covered(&gfx) as i64;
    assert!((area - 19800).abs() < 400, "{}", area);
}

#[test]
fn test_near_plane_clip() {
    let mut scene = Scene::new();
    scene.triangle([
        vertex([-64, -64, 0], WHITE),
        vertex([64, -64, 0], WHITE),
        vertex([0, 64, 256], WHITE),
    ]);
    let (gfx, stats) = scene.render();

    assert_eq!(stats.clipped, 1);
    assert_eq!(stats.culled, 0);
    // the quad left after clipping is drawn as a fan
    assert_eq!(stats.triangles, 2);

    assert_eq!(pixel(&gfx, 160, 90), WHITE);
    assert_eq!(pixel(&gfx, 160, 150), Rgba32::default());

    // a trapezoid 160 wide at the bottom, 80 at the top and 60 high
    let area = covered(&gfx) as i64;
    assert!((area - 7200).abs() < 400, "{}", area);
}

#[test]
fn test_fully_outside_triangle_is_rejected() {
    let mut scene = Scene::new();
    scene.triangle([
        vertex([200, 0, 0], WHITE),
        vertex([300, 0, 0], WHITE),
        vertex([250, 50, 0], WHITE),
    ]);
    let (gfx, stats) = scene.render();

    assert_eq!(stats.culled, 1);
    assert_eq!(stats.triangles, 0);
    assert_eq!(covered(&gfx), 0);
}

#[test]
fn test_textured_quad() {
    // 4x4 checkerboard
    let texels: Vec<Rgba32> = (0..16)
        .map(|i| if (i % 4 + i / 4) % 2 == 0 { WHITE } else { BLACK })
        .collect();

    let mut scene = Scene::new();
    write_texture_rgba16(&mut scene.memory, TEXTURE, &texels).unwrap();
    let render_tile = TileParams {
        fmt: ImageFormat::Rgba,
        size: ComponentSize::Bits16,
        line: 1,
        cms: TileWrap::WRAP,
        cmt: TileWrap::WRAP,
        ..Default::default()
    };
    scene
        .dl
        .set_combine_source(mux::TEXEL0, mux::TEXEL0)
        // S10.5 coordinates of 512 scale to 8 texels, repeating the texture twice
        .texture(0x8000, 0x8000, true)
        .set_texture_image(ImageFormat::Rgba, ComponentSize::Bits16, 1, TEXTURE)
        .set_tile(
            TileIndex::LOAD,
            TileParams {
                line: 0,
                ..render_tile
            },
        )
        .load_sync()
        .load_block(TileIndex::LOAD, 16, 0)
        .pipe_sync()
        .set_tile(TileIndex::RENDER, render_tile)
        .set_tile_size(
            TileIndex::RENDER,
            TileSize {
                uls: 0,
                ult: 0,
                lrs: 3 << 2,
                lrt: 3 << 2,
            },
        );
    scene
        .vertices(&[
            textured(-128, -128, [0, 512]),
            textured(128, -128, [512, 512]),
            textured(128, 128, [512, 0]),
            textured(-128, 128, [0, 0]),
        ])
        .tri1(0, 1, 2)
        .tri1(0, 2, 3);
    let (gfx, stats) = scene.render();

    assert_eq!(stats.triangles, 2);
    let header = gfx.backend().textures().current(0).unwrap();
    assert_eq!((header.width, header.height), (4, 4));

    // 8x8 cells of 40x30 pixels, sampled at their centers
    let cell = |i: u32, j: u32| pixel(&gfx, 40 * i + 20, 30 * j + 15);
    let first = cell(0, 0);
    assert!(first == WHITE || first == BLACK, "{:?}", first);
    for j in 0..8 {
        for i in 0..8 {
            let expected = if (i + j) % 2 == 0 {
                first
            } else if first == WHITE {
                BLACK
            } else {
                WHITE
            };
            assert_eq!(cell(i, j), expected, "cell {} {}", i, j);
        }
    }
}

#[test]
fn test_depth_test_keeps_nearest() {
    let quad = |scene: &mut Scene, z: i16, color: Rgba32| {
        scene
            .vertices(&[
                vertex([-64, -64, z], color),
                vertex([64, -64, z], color),
                vertex([64, 64, z], color),
                vertex([-64, 64, z], color),
            ])
            .tri1(0, 1, 2)
            .tri1(0, 2, 3);
    };

    for near_first in [true, false] {
        let mut scene = Scene::new();
        scene
            .dl
            .set_geometry_mode(GeometryModes::ZBUFFER)
            .set_render_mode(render_mode::BL_A_MEM | render_mode::Z_CMP | render_mode::Z_UPD);
        if near_first {
            quad(&mut scene, -64, RED);
            quad(&mut scene, 64, BLUE);
        } else {
            quad(&mut scene, 64, BLUE);
            quad(&mut scene, -64, RED);
        }
        let (gfx, _) = scene.render();

        assert_eq!(pixel(&gfx, 160, 120), RED, "near first: {}", near_first);
        assert_eq!(pixel(&gfx, 100, 80), RED, "near first: {}", near_first);
        assert_eq!(pixel(&gfx, 20, 20), Rgba32::default());
    }
}

#[test]
fn test_half_alpha_over_black() {
    let mut scene = Scene::new();
    scene
        .dl
        .set_cycle_type(CycleType::Fill)
        .set_fill_color(BLACK)
        .fill_rectangle(0, 0, 319, 239)
        .pipe_sync()
        .set_cycle_type(CycleType::OneCycle)
        // blend against 1 - alpha
        .set_render_mode(0);
    let half = Rgba32::new(255, 255, 255, 128);
    scene.triangle([
        vertex([-64, -64, 0], half),
        vertex([64, -64, 0], half),
        vertex([0, 64, 0], half),
    ]);
    let (gfx, _) = scene.render();

    let blended = pixel(&gfx, 160, 100);
    for c in [blended.r, blended.g, blended.b] {
        assert!((126..=128).contains(&c), "{:?}", blended);
    }
    let background = pixel(&gfx, 10, 10);
    assert_eq!((background.r, background.g, background.b), (0, 0, 0));
}

#[test]
fn test_copy_mode_texture_rectangle() {
    let texels: Vec<Rgba32> = (0..16)
        .map(|i| Rgba32::new(i as u8 * 16, 255 - i as u8 * 16, 0, 255))
        .map(|c| Rgba32::from_rgba16(rgba16(c)))
        .collect();

    let mut scene = Scene::new();
    write_texture_rgba16(&mut scene.memory, TEXTURE, &texels).unwrap();
    let render_tile = TileParams {
        fmt: ImageFormat::Rgba,
        size: ComponentSize::Bits16,
        line: 1,
        ..Default::default()
    };
    scene
        .dl
        .set_cycle_type(CycleType::Copy)
        .set_texture_image(ImageFormat::Rgba, ComponentSize::Bits16, 1, TEXTURE)
        .set_tile(
            TileIndex::LOAD,
            TileParams {
                line: 0,
                ..render_tile
            },
        )
        .load_block(TileIndex::LOAD, 16, 0)
        .set_tile(TileIndex::RENDER, render_tile)
        .set_tile_size(
            TileIndex::RENDER,
            TileSize {
                uls: 0,
                ult: 0,
                lrs: 3 << 2,
                lrt: 3 << 2,
            },
        )
        // copy mode rectangles include their lower right corner
        .texture_rectangle(
            [8 << 2, 8 << 2, 11 << 2, 11 << 2],
            TileIndex::RENDER,
            [0, 0],
            [4 << 10, 1 << 10],
        );
    let (gfx, stats) = scene.render();

    assert_eq!(stats.triangles, 0);
    for y in 0..4 {
        for x in 0..4 {
            let actual = gfx.backend().pixel(8 + x, 8 + y).unwrap();
            assert_eq!(actual, texels[(y * 4 + x) as usize], "texel {} {}", x, y);
        }
    }
    assert_eq!(gfx.backend().pixel(12, 8), Some(Rgba32::default()));
    assert_eq!(gfx.backend().pixel(8, 12), Some(Rgba32::default()));
}

#[test]
fn test_shaders_are_reused_across_frames() {
    let mut scene = Scene::new();
    scene.triangle([
        vertex([-64, -64, 0], RED),
        vertex([64, -64, 0], GREEN),
        vertex([0, 64, 0], BLUE),
    ]);
    let (mut gfx, first) = scene.render();
    let programs = gfx.backend().programs().len();
    let combiners = gfx.state().combiners().len();
    let frame = gfx.backend().framebuffer().to_vec();

    let second = scene.render_with(&mut gfx);
    assert_eq!(first, second);
    assert_eq!(gfx.backend().programs().len(), programs);
    assert_eq!(gfx.state().combiners().len(), combiners);
    assert_eq!(gfx.backend().framebuffer(), &frame[..]);
    assert_eq!(gfx.window().frames_presented(), 2);
}

#[test]
fn test_skipped_frame_draws_nothing() {
    let mut scene = Scene::new();
    scene.triangle([
        vertex([-64, -64, 0], RED),
        vertex([64, -64, 0], RED),
        vertex([0, 64, 0], RED),
    ]);
    let mut gfx = GraphicsContext::new(
        GfxConfig::default(),
        SoftwareBackend::default(),
        HeadlessWindow::default(),
    );
    gfx.init().unwrap();
    gfx.window_mut().skip_next_frame();

    let stats = scene.render_with(&mut gfx);
    assert_eq!(stats, FrameStats::default());
    assert!(gfx.dropped_frame());
    assert_eq!(covered(&gfx), 0);

    let stats = scene.render_with(&mut gfx);
    assert_eq!(stats.triangles, 1);
    assert!(!gfx.dropped_frame());
    assert!(covered(&gfx) > 0);
}
