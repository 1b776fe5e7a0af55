//! Matrices and the raw in-memory structures referenced by display lists.

#![allow(missing_docs)]

use core::fmt;
use std::{mem, ops};

use bytemuck::cast_slice_mut;

use crate::{error::MemoryError, fixed::Fix64, memory::GfxMemory};

/// A 4x4 fixed-point matrix using the row vector convention (`v * M`).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Matrix(pub [[Fix64; 4]; 4]);

impl Default for Matrix {
    fn default() -> Self {
        Self::identity()
    }
}

impl Matrix {
    pub fn identity() -> Self {
        let mut m = [[Fix64::ZERO; 4]; 4];
        for (i, row) in m.iter_mut().enumerate() {
            row[i] = Fix64::ONE;
        }
        Self(m)
    }

    /// Decodes the N64 S15.16 layout: all integer halves first, then all fractional halves.
    pub fn from_fixed(m: &[u32; 16]) -> Self {
        let mut r = [[Fix64::ZERO; 4]; 4];
        for (i, row) in r.iter_mut().enumerate() {
            for j in [0, 2] {
                let idx = (i << 1) + (j >> 1);
                let int_part = m[idx];
                let frac_part = m[8 + idx];
                row[j] = Fix64::from_q16(((int_part & 0xFFFF_0000) | (frac_part >> 16)) as i32);
                row[j + 1] = Fix64::from_q16(((int_part << 16) | (frac_part & 0xFFFF)) as i32);
            }
        }
        Self(r)
    }

    /// Encodes into the N64 S15.16 layout, truncating to 16 fractional bits.
    pub fn to_fixed(&self) -> [u32; 16] {
        let mut r = [0; 16];
        for i in 0..4 {
            for j in [0, 2] {
                let idx = (i << 1) + (j >> 1);
                let v1 = (self.0[i][j].0 >> 16) as u32;
                let v2 = (self.0[i][j + 1].0 >> 16) as u32;
                r[idx] = (v1 & 0xFFFF_0000) | (v2 >> 16);
                r[8 + idx] = (v1 << 16) | (v2 & 0xFFFF);
            }
        }
        r
    }

    pub fn from_f32(m: [[f32; 4]; 4]) -> Self {
        Self(m.map(|row| row.map(Fix64::from_f32)))
    }

    /// Orthographic projection mapping the box onto `[-1, 1]^3` with the depth axis flipped.
    pub fn ortho(l: f32, r: f32, b: f32, t: f32, n: f32, f: f32) -> Self {
        Self::from_f32([
            [2.0 / (r - l), 0.0, 0.0, 0.0],
            [0.0, 2.0 / (t - b), 0.0, 0.0],
            [0.0, 0.0, -2.0 / (f - n), 0.0],
            [-(r + l) / (r - l), -(t + b) / (t - b), -(f + n) / (f - n), 1.0],
        ])
    }

    /// fov_y is in radians
    pub fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Self {
        let y_scale = (fov_y / 2.0).cos() / (fov_y / 2.0).sin();
        Self::from_f32([
            [y_scale / aspect, 0.0, 0.0, 0.0],
            [0.0, y_scale, 0.0, 0.0],
            [0.0, 0.0, (near + far) / (near - far), -1.0],
            [0.0, 0.0, 2.0 * near * far / (near - far), 0.0],
        ])
    }

    pub fn translate(x: f32, y: f32, z: f32) -> Self {
        let mut m = Self::identity();
        m.0[3] = [x, y, z, 1.0].map(Fix64::from_f32);
        m
    }

    pub fn scale(x: f32, y: f32, z: f32) -> Self {
        Self::from_f32([
            [x, 0.0, 0.0, 0.0],
            [0.0, y, 0.0, 0.0],
            [0.0, 0.0, z, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ])
    }

    /// Transforms an integer object space position (`w = 1`).
    pub fn transform_point(&self, p: [i16; 3]) -> [Fix64; 4] {
        let m = &self.0;
        let mut out = [Fix64::ZERO; 4];
        for (k, o) in out.iter_mut().enumerate() {
            *o = m[0][k].scale(p[0] as i32)
                + m[1][k].scale(p[1] as i32)
                + m[2][k].scale(p[2] as i32)
                + m[3][k];
        }
        out
    }

    /// Multiplies a direction by the transpose of the upper 3x3.
    pub fn transposed_mul_dir(&self, v: [Fix64; 3]) -> [Fix64; 3] {
        let m = &self.0;
        let mut out = [Fix64::ZERO; 3];
        for (k, o) in out.iter_mut().enumerate() {
            *o = v[0] * m[k][0] + v[1] * m[k][1] + v[2] * m[k][2];
        }
        out
    }
}

impl fmt::Debug for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Matrix [")?;
        for i in 0..4 {
            write!(f, "  [ ")?;
            for j in 0..4 {
                write!(f, "\t{:.3} ", self.0[i][j].to_f64())?;
            }
            writeln!(f, "\t]")?;
        }
        write!(f, "]")?;
        Ok(())
    }
}

impl ops::Mul<&Matrix> for &Matrix {
    type Output = Matrix;

    fn mul(self, rhs: &Matrix) -> Self::Output {
        let mut out = [[Fix64::ZERO; 4]; 4];
        for (i, row) in out.iter_mut().enumerate() {
            for (j, o) in row.iter_mut().enumerate() {
                for k in 0..4 {
                    *o += self.0[i][k] * rhs.0[k][j];
                }
            }
        }
        Matrix(out)
    }
}

/// Scales a vector to unit length. The zero vector is returned unchanged.
pub fn normalize(v: [Fix64; 3]) -> [Fix64; 3] {
    let len_sq = v[0] * v[0] + v[1] * v[1] + v[2] * v[2];
    if len_sq <= Fix64::ZERO {
        return v;
    }
    let s = Fix64::from_f32(1.0 / len_sq.to_f32().sqrt());
    v.map(|c| c * s)
}

pub fn read_matrix<M: GfxMemory>(memory: &M, addr: u32) -> Result<Matrix, MemoryError> {
    let mut m = [0; 16];
    memory.read_u32(&mut m, addr, 0)?;
    Ok(Matrix::from_fixed(&m))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Viewport {
    pub scale: [i16; 4],
    pub trans: [i16; 4],
}

pub fn read_viewport<M: GfxMemory>(memory: &M, addr: u32) -> Result<Viewport, MemoryError> {
    let mut v = Viewport::default();
    memory.read_i16(&mut v.scale, addr, 0)?;
    memory.read_i16(&mut v.trans, addr, 8)?;
    Ok(v)
}

/// A vertex as stored in memory. `cn` holds either a color or, with lighting enabled, a
/// signed normal in the first three bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Vertex {
    pub pos: [i16; 3],
    pub flag: u16,
    pub uv: [i16; 2],
    pub cn: [u8; 4],
}

impl Vertex {
    pub const SIZE: usize = 16;

    pub fn normal(&self) -> [i8; 3] {
        [self.cn[0] as i8, self.cn[1] as i8, self.cn[2] as i8]
    }

    /// Serializes to the big endian in-memory layout.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut b = [0; Self::SIZE];
        for (i, p) in self.pos.iter().enumerate() {
            b[2 * i..2 * i + 2].copy_from_slice(&p.to_be_bytes());
        }
        b[6..8].copy_from_slice(&self.flag.to_be_bytes());
        b[8..10].copy_from_slice(&self.uv[0].to_be_bytes());
        b[10..12].copy_from_slice(&self.uv[1].to_be_bytes());
        b[12..16].copy_from_slice(&self.cn);
        b
    }
}

pub fn read_vertices<M: GfxMemory>(
    memory: &M,
    addr: u32,
    count: usize,
) -> Result<Vec<Vertex>, MemoryError> {
    let stride = mem::size_of::<Vertex>();
    let mut vs = Vec::with_capacity(count);
    for i in 0..count {
        let mut v = Vertex::default();
        let voffset = i * stride;
        memory.read_i16(&mut v.pos, addr, voffset)?;
        memory.read_i16(&mut v.uv, addr, voffset + 8)?;
        memory.read_u8(&mut v.cn, addr, voffset + 12)?;
        vs.push(v);
    }
    Ok(vs)
}

/// A directional light. `dir` is a signed unit vector scaled to 127.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Light {
    pub color: [u8; 3],
    pub pad1: u8,
    pub color_copy: [u8; 3],
    pub pad2: u8,
    pub dir: [i8; 3],
    pub pad3: u8,
}

impl Light {
    pub const SIZE: usize = 16;

    pub fn new(color: [u8; 3], dir: [i8; 3]) -> Self {
        Self {
            color,
            color_copy: color,
            dir,
            ..Default::default()
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut b = [0; Self::SIZE];
        b[0..3].copy_from_slice(&self.color);
        b[4..7].copy_from_slice(&self.color_copy);
        for (i, d) in self.dir.iter().enumerate() {
            b[8 + i] = *d as u8;
        }
        b
    }
}

pub fn read_light<M: GfxMemory>(memory: &M, addr: u32) -> Result<Light, MemoryError> {
    let mut light = Light::default();
    memory.read_u8(&mut light.color, addr, 0)?;
    memory.read_u8(&mut light.color_copy, addr, 4)?;
    memory.read_u8(cast_slice_mut(&mut light.dir), addr, 8)?;
    Ok(light)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_fixed_matrix_round_trip() {
        let m = Matrix::from_f32([
            [1.5, -2.0, 0.25, 0.0],
            [0.0, 1.0, -0.5, 0.0],
            [3.0, 0.0, 1.0, 0.0],
            [10.0, -20.0, 30.5, 1.0],
        ]);
        assert_eq!(Matrix::from_fixed(&m.to_fixed()), m);
        assert_eq!(m.0[3][2], Fix64::from_f32(30.5));
    }

    #[test]
    fn test_transform_point() {
        let m = &Matrix::scale(2.0, 2.0, 2.0) * &Matrix::translate(1.0, -1.0, 0.0);
        let p = m.transform_point([3, 4, -5]);
        assert_eq!(
            p,
            [
                Fix64::from_int(7),
                Fix64::from_int(7),
                Fix64::from_int(-10),
                Fix64::ONE
            ]
        );
    }

    #[test]
    fn test_normalize() {
        let v = normalize([Fix64::from_int(3), Fix64::ZERO, Fix64::from_int(4)]);
        assert!((v[0].to_f64() - 0.6).abs() < 1e-5);
        assert!((v[2].to_f64() - 0.8).abs() < 1e-5);
        assert_eq!(normalize([Fix64::ZERO; 3]), [Fix64::ZERO; 3]);
    }
}
