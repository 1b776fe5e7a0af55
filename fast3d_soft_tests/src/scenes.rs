use fast3d_soft::{
    builder::{
        mux, render_mode, screen_viewport, write_light, write_matrix, write_texture_rgba16,
        write_vertices, write_viewport, DisplayListBuilder,
    },
    cmd::{
        ComponentSize, CycleType, GeometryModes, ImageFormat, MatrixParams, Rgba32, TileIndex,
        TileParams, TileSize, TileWrap,
    },
    memory::Rdram,
    util::{Light, Matrix, Vertex},
    MemoryError,
};

pub const DL: u32 = 0x0000;
const SUB_DL: u32 = 0x2000;
const VERTICES: u32 = 0x4000;
const PROJECTION: u32 = 0x8000;
const MODELVIEW: u32 = 0x8040;
const VIEWPORT: u32 = 0x8100;
const LIGHTS: u32 = 0x8200;
const TEXTURE: u32 = 0x9000;

/// A display list and the memory it reads from.
#[derive(Debug)]
pub struct Scene {
    pub memory: Rdram,
    pub dl: DisplayListBuilder,
    next_vertex: u32,
}

impl Scene {
    /// Object space x and y in [-128, 128] cover the screen.
    fn new(projection: &Matrix) -> Result<Self, MemoryError> {
        let mut memory = Rdram::new(0x10000);
        write_matrix(&mut memory, PROJECTION, projection)?;
        write_matrix(&mut memory, MODELVIEW, &Matrix::identity())?;
        write_viewport(&mut memory, VIEWPORT, &screen_viewport(320, 240))?;

        let mut dl = DisplayListBuilder::new();
        dl.viewport(VIEWPORT)
            .set_scissor(0, 0, 320, 240)
            .matrix(PROJECTION, MatrixParams::PROJECTION | MatrixParams::LOAD)
            .matrix(MODELVIEW, MatrixParams::LOAD)
            .set_cycle_type(CycleType::OneCycle)
            .set_render_mode(render_mode::BL_A_MEM)
            .set_combine_source(mux::SHADE, mux::SHADE);
        Ok(Self {
            memory,
            dl,
            next_vertex: VERTICES,
        })
    }

    fn flat() -> Result<Self, MemoryError> {
        let s = 1.0 / 128.0;
        Self::new(&Matrix::scale(s, s, s))
    }

    fn vertices(&mut self, vertices: &[Vertex]) -> Result<&mut DisplayListBuilder, MemoryError> {
        let addr = self.next_vertex;
        write_vertices(&mut self.memory, addr, vertices)?;
        self.next_vertex += (vertices.len() * Vertex::SIZE) as u32;
        Ok(self.dl.vertex(addr, vertices.len() as u32, 0))
    }

    fn quad(&mut self, vertices: [Vertex; 4]) -> Result<(), MemoryError> {
        self.vertices(&vertices)?.tri1(0, 1, 2).tri1(0, 2, 3);
        Ok(())
    }

    fn clear(&mut self, color: Rgba32) {
        self.dl
            .set_cycle_type(CycleType::Fill)
            .set_fill_color(color)
            .fill_rectangle(0, 0, 319, 239)
            .pipe_sync()
            .set_cycle_type(CycleType::OneCycle);
    }

    /// Writes the display list to [DL].
    pub fn finish(mut self) -> Result<Rdram, MemoryError> {
        self.dl.full_sync().end();
        self.dl.write_to(&mut self.memory, DL)?;
        Ok(self.memory)
    }
}

fn vertex([x, y, z]: [i16; 3], color: Rgba32) -> Vertex {
    Vertex {
        pos: [x, y, z],
        cn: [color.r, color.g, color.b, color.a],
        ..Default::default()
    }
}

fn textured([x, y]: [i16; 2], uv: [i16; 2]) -> Vertex {
    Vertex {
        pos: [x, y, 0],
        uv,
        cn: [0xFF; 4],
        ..Default::default()
    }
}

fn rgb(r: u8, g: u8, b: u8) -> Rgba32 {
    Rgba32::new(r, g, b, 0xFF)
}

fn load_checker(scene: &mut Scene, size: u32) -> Result<(), MemoryError> {
    let texels: Vec<Rgba32> = (0..size * size)
        .map(|i| {
            if (i % size + i / size) % 2 == 0 {
                rgb(0xF8, 0xF8, 0xF8)
            } else {
                rgb(0x20, 0x40, 0x80)
            }
        })
        .collect();
    write_texture_rgba16(&mut scene.memory, TEXTURE, &texels)?;

    let tile = TileParams {
        fmt: ImageFormat::Rgba,
        size: ComponentSize::Bits16,
        line: size * 2 / 8,
        cms: TileWrap::WRAP,
        cmt: TileWrap::WRAP,
        ..Default::default()
    };
    let lr = (size - 1) << 2;
    scene
        .dl
        .set_texture_image(ImageFormat::Rgba, ComponentSize::Bits16, 1, TEXTURE)
        .set_tile(TileIndex::LOAD, TileParams { line: 0, ..tile })
        .load_sync()
        .load_block(TileIndex::LOAD, size * size, 0)
        .pipe_sync()
        .set_tile(TileIndex::RENDER, tile)
        .set_tile_size(
            TileIndex::RENDER,
            TileSize {
                uls: 0,
                ult: 0,
                lrs: lr,
                lrt: lr,
            },
        );
    Ok(())
}

pub fn gouraud_triangle() -> Result<Rdram, MemoryError> {
    let mut scene = Scene::flat()?;
    scene
        .vertices(&[
            vertex([-96, -96, 0], rgb(0xFF, 0, 0)),
            vertex([96, -96, 0], rgb(0, 0xFF, 0)),
            vertex([0, 80, 0], rgb(0, 0, 0xFF)),
        ])?
        .tri1(0, 1, 2);
    scene.finish()
}

pub fn near_clip() -> Result<Rdram, MemoryError> {
    let mut scene = Scene::flat()?;
    scene
        .vertices(&[
            vertex([-64, -64, 0], rgb(0xFF, 0xFF, 0)),
            vertex([64, -64, 0], rgb(0, 0xFF, 0xFF)),
            vertex([0, 64, 256], rgb(0xFF, 0, 0xFF)),
        ])?
        .tri1(0, 1, 2);
    scene.finish()
}

pub fn perspective_floor() -> Result<Rdram, MemoryError> {
    let projection = Matrix::perspective(60.0_f32.to_radians(), 320.0 / 240.0, 10.0, 1000.0);
    let mut scene = Scene::new(&projection)?;
    scene.clear(rgb(0x30, 0x30, 0x40));
    load_checker(&mut scene, 8)?;
    scene
        .dl
        .set_combine_source(mux::TEXEL0, mux::TEXEL0)
        .texture(0xFFFF, 0xFFFF, true);
    // starts behind the camera, so the near edge is clipped
    let floor = [
        [-200, 20, 0, 0],
        [200, 20, 2048, 0],
        [200, -600, 2048, 2048],
        [-200, -600, 0, 2048],
    ]
    .map(|[x, z, u, v]| Vertex {
        pos: [x, -40, z],
        uv: [u, v],
        cn: [0xFF; 4],
        ..Default::default()
    });
    scene.quad(floor)?;
    scene.finish()
}

pub fn checker_quad() -> Result<Rdram, MemoryError> {
    let mut scene = Scene::flat()?;
    load_checker(&mut scene, 4)?;
    scene
        .dl
        .set_combine_source(mux::TEXEL0, mux::TEXEL0)
        .texture(0x8000, 0x8000, true);
    scene.quad([
        textured([-128, -128], [0, 512]),
        textured([128, -128], [512, 512]),
        textured([128, 128], [512, 0]),
        textured([-128, 128], [0, 0]),
    ])?;
    scene.finish()
}

pub fn modulated_quad() -> Result<Rdram, MemoryError> {
    let mut scene = Scene::flat()?;
    load_checker(&mut scene, 8)?;
    // texel0 * shade
    scene
        .dl
        .set_combine(
            [mux::TEXEL0, mux::ZERO, mux::SHADE, mux::ZERO],
            [mux::ZERO, mux::ZERO, mux::ZERO, mux::SHADE],
        )
        .texture(0xFFFF, 0xFFFF, true);
    let corner = |x, y, uv, color| Vertex {
        uv,
        ..vertex([x, y, 0], color)
    };
    scene.quad([
        corner(-100, -100, [0, 256], rgb(0xFF, 0, 0)),
        corner(100, -100, [256, 256], rgb(0, 0xFF, 0)),
        corner(100, 100, [256, 0], rgb(0, 0, 0xFF)),
        corner(-100, 100, [0, 0], rgb(0xFF, 0xFF, 0xFF)),
    ])?;
    scene.finish()
}

pub fn depth_order() -> Result<Rdram, MemoryError> {
    let mut scene = Scene::flat()?;
    scene
        .dl
        .set_geometry_mode(GeometryModes::ZBUFFER)
        .set_render_mode(render_mode::BL_A_MEM | render_mode::Z_CMP | render_mode::Z_UPD);
    let square = |cx: i16, cy: i16, z: i16, color: Rgba32| {
        [(-1, -1), (1, -1), (1, 1), (-1, 1)].map(|(dx, dy)| {
            vertex([cx + dx * 48, cy + dy * 48, z], color)
        })
    };
    scene.quad(square(-24, 0, -32, rgb(0xFF, 0x40, 0x40)))?;
    scene.quad(square(24, 24, 32, rgb(0x40, 0xFF, 0x40)))?;
    scene.quad(square(0, -24, -64, rgb(0x40, 0x40, 0xFF)))?;
    scene.finish()
}

pub fn alpha_blend() -> Result<Rdram, MemoryError> {
    let mut scene = Scene::flat()?;
    scene.clear(rgb(0, 0, 0));
    scene.dl.set_render_mode(0);
    for (i, alpha) in [0x40u8, 0x80, 0xC0].into_iter().enumerate() {
        let x = -96 + 64 * i as i16;
        let color = Rgba32::new(0xFF, 0xFF, 0xFF, alpha);
        scene.quad([
            vertex([x, -64, 0], color),
            vertex([x + 56, -64, 0], color),
            vertex([x + 56, 64, 0], color),
            vertex([x, 64, 0], color),
        ])?;
    }
    scene.finish()
}

pub fn fog_ramp() -> Result<Rdram, MemoryError> {
    let mut scene = Scene::flat()?;
    scene
        .dl
        .set_geometry_mode(GeometryModes::FOG)
        .fog_factor(128, 128)
        .set_fog_color(rgb(0xA0, 0xA0, 0xC0))
        .set_render_mode(render_mode::BL_CLR_FOG | render_mode::BL_A_MEM);
    let color = rgb(0x80, 0x20, 0x20);
    scene.quad([
        vertex([-128, -96, -120], color),
        vertex([128, -96, -120], color),
        vertex([128, 96, 120], color),
        vertex([-128, 96, 120], color),
    ])?;
    scene.finish()
}

pub fn lit_fan() -> Result<Rdram, MemoryError> {
    let mut scene = Scene::flat()?;
    write_light(
        &mut scene.memory,
        LIGHTS,
        &Light::new([0xE0, 0xC0, 0x80], [0, 0, 127]),
    )?;
    write_light(
        &mut scene.memory,
        LIGHTS + Light::SIZE as u32,
        &Light::new([0x20, 0x20, 0x30], [0, 0, 0]),
    )?;
    scene
        .dl
        .set_geometry_mode(GeometryModes::LIGHTING | GeometryModes::SHADE)
        .num_lights(1)
        .light(LIGHTS, 0)
        .light(LIGHTS + Light::SIZE as u32, 1);

    // normals fan from facing the light to facing sideways
    let mut vertices = vec![Vertex {
        pos: [0, 0, 0],
        cn: [0, 0, 127, 0xFF],
        ..Default::default()
    }];
    for i in 0..8 {
        let angle = i as f32 / 7.0 * std::f32::consts::PI;
        let (sin, cos) = angle.sin_cos();
        vertices.push(Vertex {
            pos: [(cos * 112.0) as i16, (sin * 112.0) as i16 - 40, 0],
            cn: [(cos * 127.0) as i8 as u8, (sin * 127.0) as i8 as u8, 0, 0xFF],
            ..Default::default()
        });
    }
    let dl = scene.vertices(&vertices)?;
    for i in 1..8 {
        dl.tri1(0, i, i + 1);
    }
    scene.finish()
}

pub fn copy_rects() -> Result<Rdram, MemoryError> {
    let mut scene = Scene::flat()?;
    load_checker(&mut scene, 8)?;
    scene.dl.set_cycle_type(CycleType::Copy);
    // rows stretched by 4, 2, 1 and 1/2
    for (i, dtdy) in [256, 512, 1024, 2048].into_iter().enumerate() {
        let (x, y) = (16 + 72 * i as u32, 96);
        scene.dl.texture_rectangle(
            [x << 2, y << 2, (x + 31) << 2, (y + 31) << 2],
            TileIndex::RENDER,
            [0, 0],
            [4 << 10, dtdy],
        );
    }
    scene.finish()
}

pub fn nested_lists() -> Result<Rdram, MemoryError> {
    let mut scene = Scene::flat()?;
    let mut sub = DisplayListBuilder::new();
    let addr = scene.next_vertex;
    write_vertices(
        &mut scene.memory,
        addr,
        &[
            vertex([-32, -32, 0], rgb(0xFF, 0xC0, 0)),
            vertex([32, -32, 0], rgb(0xFF, 0xC0, 0)),
            vertex([0, 32, 0], rgb(0xFF, 0x60, 0)),
        ],
    )?;
    scene.next_vertex += 3 * Vertex::SIZE as u32;
    // segment 6 holds the vertices
    sub.vertex(0x0600_0000, 3, 0).tri1(0, 1, 2).end();
    sub.write_to(&mut scene.memory, SUB_DL)?;

    scene.dl.segment(6, addr);
    for i in 0..3 {
        let offset = MODELVIEW + 0x100 + 0x40 * i;
        let m = Matrix::translate(-80.0 + 80.0 * i as f32, 24.0 * i as f32 - 24.0, 0.0);
        write_matrix(&mut scene.memory, offset, &m)?;
        scene
            .dl
            .matrix(offset, MatrixParams::LOAD | MatrixParams::PUSH)
            .display_list(SUB_DL)
            .pop_matrix();
    }
    scene.finish()
}
