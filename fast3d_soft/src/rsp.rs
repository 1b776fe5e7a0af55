//! Vertex transform and lighting.
//!
//! [RspState] holds the matrix stack, the lights and the table of transformed vertices that
//! triangle commands index into.

use bitflags::bitflags;
use derivative::Derivative;

use crate::{
    cmd::{GeometryModes, MatrixParams, Rgba32},
    error::GfxError,
    fixed::Fix64,
    util::{normalize, Light, Matrix, Vertex},
};

/// Vertex slots addressable by `G_VTX`. Four more slots after these hold rectangle corners.
pub const MAX_VERTICES: usize = 64;
/// Directional lights, not counting the ambient light.
pub const MAX_LIGHTS: usize = 2;
const MATRIX_STACK_SIZE: usize = 11;

bitflags! {
    /// The frustum planes a clip space vertex lies outside of.
    pub struct ClipFlags: u8 {
        const NEAR   = 0x01;
        const FAR    = 0x02;
        const TOP    = 0x04;
        const BOTTOM = 0x08;
        const RIGHT  = 0x10;
        const LEFT   = 0x20;
    }
}

impl Default for ClipFlags {
    fn default() -> Self {
        Self::empty()
    }
}

impl ClipFlags {
    /// Classifies a clip space position against `±w`.
    pub fn of(x: Fix64, y: Fix64, z: Fix64, w: Fix64) -> Self {
        let mut flags = Self::empty();
        flags.set(Self::LEFT, x < -w);
        flags.set(Self::RIGHT, x > w);
        flags.set(Self::BOTTOM, y < -w);
        flags.set(Self::TOP, y > w);
        flags.set(Self::FAR, z < -w);
        flags.set(Self::NEAR, z > w);
        flags
    }
}

/// A transformed vertex in clip space.
///
/// `u` and `v` are S10.5 texture coordinates, already scaled by the `G_TEXTURE` factor.
/// With fog enabled, `color.a` holds the fog factor instead of the vertex alpha.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadedVertex {
    pub x: Fix64,
    pub y: Fix64,
    pub z: Fix64,
    pub w: Fix64,
    pub u: Fix64,
    pub v: Fix64,
    pub color: Rgba32,
    pub clip_rej: ClipFlags,
}

/// Transform and lighting state.
#[derive(Debug, Clone, Derivative)]
#[derivative(Default)]
pub struct RspState {
    modelview: [Matrix; MATRIX_STACK_SIZE],
    #[derivative(Default(value = "1"))]
    modelview_len: usize,
    projection: Matrix,
    mp: Matrix,

    lights: [Light; MAX_LIGHTS + 1],
    light_coeffs: [[Fix64; 3]; MAX_LIGHTS],
    lookat_coeffs: [[Fix64; 3]; 2],
    /// Includes the ambient light.
    #[derivative(Default(value = "2"))]
    num_lights: usize,
    #[derivative(Default(value = "true"))]
    lights_changed: bool,

    pub geometry_mode: GeometryModes,
    pub fog_mul: i16,
    pub fog_offset: i16,
    /// U0.16 scale applied to incoming texture coordinates.
    pub texture_scale: [u16; 2],

    #[derivative(Default(value = "[LoadedVertex::default(); MAX_VERTICES + 4]"))]
    vertices: [LoadedVertex; MAX_VERTICES + 4],
}

impl RspState {
    /// Resets the per-frame state at the start of a display list.
    pub fn reset(&mut self) {
        self.modelview_len = 1;
        self.num_lights = 2;
        self.lights_changed = true;
    }

    /// The top of the modelview stack.
    pub fn modelview(&self) -> &Matrix {
        &self.modelview[self.modelview_len.max(1) - 1]
    }

    fn modelview_mut(&mut self) -> &mut Matrix {
        &mut self.modelview[self.modelview_len.max(1) - 1]
    }

    #[allow(missing_docs)]
    pub fn modelview_depth(&self) -> usize {
        self.modelview_len
    }

    #[allow(missing_docs)]
    pub fn projection(&self) -> &Matrix {
        &self.projection
    }

    /// Modelview times projection.
    pub fn mp(&self) -> &Matrix {
        &self.mp
    }

    fn update_mp(&mut self) {
        self.mp = self.modelview() * &self.projection;
    }

    /// Applies a `G_MTX` command.
    pub fn matrix(&mut self, params: MatrixParams, m: &Matrix) {
        if params.contains(MatrixParams::PROJECTION) {
            if params.contains(MatrixParams::LOAD) {
                self.projection = *m;
            } else {
                self.projection = m * &self.projection;
            }
        } else {
            if params.contains(MatrixParams::PUSH) && self.modelview_len < MATRIX_STACK_SIZE {
                self.modelview[self.modelview_len] = *self.modelview();
                self.modelview_len += 1;
            }
            if params.contains(MatrixParams::LOAD) {
                *self.modelview_mut() = *m;
            } else {
                let top = m * self.modelview();
                *self.modelview_mut() = top;
            }
            self.lights_changed = true;
        }
        self.update_mp();
    }

    /// Pops `count` modelview matrices. Popping past the bottom of the stack is ignored.
    pub fn pop_matrix(&mut self, count: u32) {
        for _ in 0..count {
            if self.modelview_len > 0 {
                self.modelview_len -= 1;
                if self.modelview_len > 0 {
                    self.update_mp();
                }
            }
        }
        self.lights_changed = true;
    }

    /// Stores light `index`, where the ambient light follows the directional ones.
    pub fn set_light(&mut self, index: usize, light: Light) {
        match self.lights.get_mut(index) {
            Some(slot) => {
                *slot = light;
                self.lights_changed = true;
            }
            None => log::warn!("ignoring light {}", index),
        }
    }

    /// Sets the light count, including the ambient light.
    pub fn set_num_lights(&mut self, n: u32) {
        let n = (n as usize).clamp(1, MAX_LIGHTS + 1);
        self.num_lights = n;
        self.lights_changed = true;
    }

    #[allow(missing_docs)]
    pub fn num_lights(&self) -> usize {
        self.num_lights
    }

    #[allow(missing_docs)]
    pub fn update_geometry_mode(&mut self, clear: GeometryModes, set: GeometryModes) {
        self.geometry_mode &= !clear;
        self.geometry_mode |= set;
    }

    fn normal_dir(&self, dir: [i8; 3]) -> [Fix64; 3] {
        let dir = dir.map(|d| Fix64(Fix64::from_int(d as i32).0 / 127));
        normalize(self.modelview().transposed_mul_dir(dir))
    }

    fn update_light_coeffs(&mut self) {
        for i in 0..self.num_lights - 1 {
            self.light_coeffs[i] = self.normal_dir(self.lights[i].dir);
        }
        self.lookat_coeffs = [self.normal_dir([127, 0, 0]), self.normal_dir([0, 127, 0])];
        self.lights_changed = false;
    }

    /// Transforms `vertices` into slots starting at `dest`.
    ///
    /// `fog` selects whether alpha is replaced by the fog factor.
    pub fn load_vertices(
        &mut self,
        dest: usize,
        vertices: &[Vertex],
        fog: bool,
    ) -> Result<(), GfxError> {
        if dest + vertices.len() > MAX_VERTICES {
            return Err(GfxError::InvalidVertexIndex((dest + vertices.len()) as u32));
        }
        for (i, vtx) in vertices.iter().enumerate() {
            self.vertices[dest + i] = self.transform_vertex(vtx, fog);
        }
        Ok(())
    }

    /// Transforms and lights a single vertex.
    pub fn transform_vertex(&mut self, vtx: &Vertex, fog: bool) -> LoadedVertex {
        let [x, y, z, w] = self.mp.transform_point(vtx.pos);
        let [scale_s, scale_t] = self.texture_scale.map(|s| s as i32);
        let mut u = ((vtx.uv[0] as i32 * scale_s) >> 16) as i16;
        let mut v = ((vtx.uv[1] as i32 * scale_t) >> 16) as i16;

        let mut color = Rgba32::default();
        if self.geometry_mode.contains(GeometryModes::LIGHTING) {
            if self.lights_changed {
                self.update_light_coeffs();
            }
            let n = vtx.normal().map(|c| c as i32);
            let dot = |coeffs: &[Fix64; 3]| {
                coeffs[0].scale(n[0]) + coeffs[1].scale(n[1]) + coeffs[2].scale(n[2])
            };

            let directional = self.num_lights - 1;
            let mut rgb = self.lights[directional].color.map(|c| c as i32);
            for (light, coeffs) in self.lights.iter().zip(&self.light_coeffs).take(directional) {
                let intensity = Fix64(dot(coeffs).0 / 127);
                if intensity > Fix64::ZERO {
                    for (c, &lc) in rgb.iter_mut().zip(&light.color) {
                        *c += intensity.scale(lc as i32).to_int();
                    }
                }
            }
            let [r, g, b] = rgb.map(|c| c.min(255) as u8);
            color = Rgba32::new(r, g, b, 0);

            if self.geometry_mode.contains(GeometryModes::TEXTURE_GEN) {
                let texgen = |coeffs: &[Fix64; 3], scale: i32| {
                    ((Fix64(dot(coeffs).0 / 127) + Fix64::ONE) >> 2)
                        .scale(scale)
                        .to_int() as i16
                };
                u = texgen(&self.lookat_coeffs[0], scale_s);
                v = texgen(&self.lookat_coeffs[1], scale_t);
            }
        } else {
            color.r = vtx.cn[0];
            color.g = vtx.cn[1];
            color.b = vtx.cn[2];
        }

        color.a = if fog && self.geometry_mode.contains(GeometryModes::FOG) {
            self.fog_factor(z, w)
        } else {
            vtx.cn[3]
        };

        LoadedVertex {
            x,
            y,
            z,
            w,
            u: Fix64::from_int(u as i32),
            v: Fix64::from_int(v as i32),
            color,
            clip_rej: ClipFlags::of(x, y, z, w),
        }
    }

    fn fog_factor(&self, z: Fix64, w: Fix64) -> u8 {
        let winv = if w == Fix64::ZERO {
            Fix64::from_int(1000)
        } else {
            w.inv()
        };
        let winv = if winv < Fix64::ZERO {
            Fix64::from_int(32767)
        } else {
            winv
        };
        let fog_z = (z * winv).scale(self.fog_mul as i32) + Fix64::from_int(self.fog_offset as i32);
        fog_z.clamp_to(Fix64::ZERO, Fix64::from_int(255)).to_int() as u8
    }

    /// The vertex in slot `index`, including the rectangle slots.
    pub fn vertex(&self, index: u32) -> Result<&LoadedVertex, GfxError> {
        self.vertices
            .get(index as usize)
            .ok_or(GfxError::InvalidVertexIndex(index))
    }

    /// Mutable access to a rectangle corner slot, `0..4`.
    pub fn rect_vertex_mut(&mut self, corner: usize) -> &mut LoadedVertex {
        &mut self.vertices[MAX_VERTICES + (corner & 3)]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn vertex(pos: [i16; 3], cn: [u8; 4]) -> Vertex {
        Vertex {
            pos,
            cn,
            ..Default::default()
        }
    }

    #[test]
    fn test_matrix_stack() {
        let mut rsp = RspState::default();
        let t = Matrix::translate(1.0, 2.0, 3.0);
        rsp.matrix(MatrixParams::LOAD, &Matrix::identity());
        rsp.matrix(MatrixParams::PUSH, &t);
        assert_eq!(rsp.modelview_depth(), 2);
        assert_eq!(rsp.modelview(), &t);
        assert_eq!(rsp.mp(), &t);

        rsp.matrix(MatrixParams::PROJECTION | MatrixParams::LOAD, &Matrix::scale(2.0, 2.0, 2.0));
        assert_eq!(rsp.mp(), &(&t * &Matrix::scale(2.0, 2.0, 2.0)));

        rsp.pop_matrix(1);
        assert_eq!(rsp.modelview_depth(), 1);
        assert_eq!(rsp.mp(), &Matrix::scale(2.0, 2.0, 2.0));

        // popping past the bottom is ignored
        rsp.pop_matrix(5);
        assert_eq!(rsp.modelview_depth(), 0);
    }

    #[test]
    fn test_push_is_bounded() {
        let mut rsp = RspState::default();
        for _ in 0..20 {
            rsp.matrix(MatrixParams::PUSH, &Matrix::identity());
        }
        assert_eq!(rsp.modelview_depth(), MATRIX_STACK_SIZE);
    }

    #[test]
    fn test_clip_flags() {
        let mut rsp = RspState::default();
        rsp.matrix(MatrixParams::PROJECTION | MatrixParams::LOAD, &Matrix::identity());
        rsp.matrix(MatrixParams::LOAD, &Matrix::identity());
        let v = rsp.transform_vertex(&vertex([0, 0, 0], [1, 2, 3, 4]), false);
        assert_eq!(v.clip_rej, ClipFlags::empty());
        assert_eq!(v.color, Rgba32::new(1, 2, 3, 4));

        let v = rsp.transform_vertex(&vertex([2, -2, 0], [0; 4]), false);
        assert_eq!(v.clip_rej, ClipFlags::RIGHT | ClipFlags::BOTTOM);
        let v = rsp.transform_vertex(&vertex([0, 0, 5], [0; 4]), false);
        assert_eq!(v.clip_rej, ClipFlags::NEAR);
    }

    #[test]
    fn test_lighting() {
        let mut rsp = RspState::default();
        rsp.matrix(MatrixParams::PROJECTION | MatrixParams::LOAD, &Matrix::identity());
        rsp.matrix(MatrixParams::LOAD, &Matrix::identity());
        rsp.update_geometry_mode(GeometryModes::empty(), GeometryModes::LIGHTING);
        rsp.set_num_lights(2);
        rsp.set_light(0, Light::new([200, 100, 0], [0, 0, 127]));
        rsp.set_light(1, Light::new([20, 20, 20], [0, 0, 0]));

        // facing the light
        let v = rsp.transform_vertex(&vertex([0, 0, 0], [0, 0, 127, 0xFF]), false);
        assert!((218..=220).contains(&v.color.r), "{:?}", v.color);
        assert!((118..=120).contains(&v.color.g), "{:?}", v.color);
        assert_eq!(v.color.b, 20);

        // facing away only gets the ambient light
        let v = rsp.transform_vertex(&vertex([0, 0, 0], [0, 0, 0x81, 0xFF]), false);
        assert_eq!(v.color.rgb(), [20, 20, 20]);

        rsp.set_light(5, Light::default());
        assert_eq!(rsp.num_lights(), 2);
    }

    #[test]
    fn test_texture_scale() {
        let mut rsp = RspState::default();
        rsp.texture_scale = [0x8000, 0xFFFF];
        let v = rsp.transform_vertex(
            &Vertex {
                uv: [64, -64],
                ..Default::default()
            },
            false,
        );
        assert_eq!(v.u, Fix64::from_int(32));
        assert_eq!(v.v, Fix64::from_int(-64));
    }

    #[test]
    fn test_fog_factor() {
        let mut rsp = RspState::default();
        rsp.matrix(MatrixParams::PROJECTION | MatrixParams::LOAD, &Matrix::identity());
        rsp.matrix(MatrixParams::LOAD, &Matrix::identity());
        rsp.update_geometry_mode(GeometryModes::empty(), GeometryModes::FOG);
        rsp.fog_mul = 128;
        rsp.fog_offset = 100;
        let v = rsp.transform_vertex(&vertex([0, 0, 0], [0, 0, 0, 7]), true);
        assert_eq!(v.color.a, 100);
        let v = rsp.transform_vertex(&vertex([0, 0, 1], [0, 0, 0, 7]), true);
        assert_eq!(v.color.a, 228);
        let v = rsp.transform_vertex(&vertex([0, 0, 1], [0, 0, 0, 7]), false);
        assert_eq!(v.color.a, 7);
    }

    #[test]
    fn test_vertex_bounds() {
        let mut rsp = RspState::default();
        let vs = vec![Vertex::default(); 4];
        assert!(rsp.load_vertices(60, &vs, false).is_ok());
        assert_eq!(
            rsp.load_vertices(61, &vs, false),
            Err(GfxError::InvalidVertexIndex(65))
        );
        assert!(rsp.vertex(67).is_ok());
        assert_eq!(rsp.vertex(68), Err(GfxError::InvalidVertexIndex(68)));
    }
}
