//! Backface culling and frustum clipping of clip space triangles.

use crate::{
    cmd::{GeometryModes, Rgba32},
    fixed::Fix64,
    rsp::{ClipFlags, LoadedVertex},
};

/// Most vertices a clipped triangle can grow to.
pub const MAX_CLIP_VERTICES: usize = 12;

/// Plane normals in [ClipFlags] bit order. A vertex is inside a plane when
/// `n . (x, y, z) + w > 0`.
const PLANES: [[i32; 3]; 6] = [
    [0, 0, -1],
    [0, 0, 1],
    [0, -1, 0],
    [0, 1, 0],
    [-1, 0, 0],
    [1, 0, 0],
];

/// A convex polygon produced by clipping.
#[derive(Debug, Clone, Copy)]
pub struct Polygon {
    vertices: [LoadedVertex; MAX_CLIP_VERTICES],
    len: usize,
}

impl Polygon {
    #[allow(missing_docs)]
    pub fn triangle(tri: [LoadedVertex; 3]) -> Self {
        let mut p = Self::empty();
        for v in tri {
            p.push(v);
        }
        p
    }

    fn empty() -> Self {
        Self {
            vertices: [LoadedVertex::default(); MAX_CLIP_VERTICES],
            len: 0,
        }
    }

    fn push(&mut self, v: LoadedVertex) {
        if self.len < MAX_CLIP_VERTICES {
            self.vertices[self.len] = v;
            self.len += 1;
        }
    }

    #[allow(missing_docs)]
    pub fn vertices(&self) -> &[LoadedVertex] {
        &self.vertices[..self.len]
    }

    /// Triangulates as a fan around the first vertex.
    pub fn fan(&self) -> impl Iterator<Item = [LoadedVertex; 3]> + '_ {
        let vs = self.vertices();
        (1..vs.len().saturating_sub(1)).map(move |i| [vs[0], vs[i], vs[i + 1]])
    }
}

fn plane_distance(plane: &[i32; 3], v: &LoadedVertex) -> Fix64 {
    v.x.scale(plane[0]) + v.y.scale(plane[1]) + v.z.scale(plane[2]) + v.w
}

fn lerp(a: Fix64, b: Fix64, t: Fix64) -> Fix64 {
    a + (b - a) * t
}

fn lerp_color(a: Rgba32, b: Rgba32, t: Fix64) -> Rgba32 {
    let ch = |a: u8, b: u8| {
        let d = Fix64::from_int(b as i32 - a as i32) * t;
        (a as i32 + d.to_int()).clamp(0, 255) as u8
    };
    Rgba32::new(ch(a.r, b.r), ch(a.g, b.g), ch(a.b, b.b), ch(a.a, b.a))
}

/// Interpolates from `a` toward `b`. The result is not classified against any plane.
fn intersect(a: &LoadedVertex, b: &LoadedVertex, t: Fix64) -> LoadedVertex {
    LoadedVertex {
        x: lerp(a.x, b.x, t),
        y: lerp(a.y, b.y, t),
        z: lerp(a.z, b.z, t),
        w: lerp(a.w, b.w, t),
        u: lerp(a.u, b.u, t),
        v: lerp(a.v, b.v, t),
        color: lerp_color(a.color, b.color, t),
        clip_rej: ClipFlags::empty(),
    }
}

/// Clips a triangle against every plane that one of its vertices lies outside of.
///
/// Returns `None` if the triangle is trivially rejected or nothing is left. A triangle
/// with no clip flags set comes back unchanged.
pub fn clip_triangle(tri: [LoadedVertex; 3]) -> Option<Polygon> {
    let clip_or = tri[0].clip_rej | tri[1].clip_rej | tri[2].clip_rej;
    let clip_and = tri[0].clip_rej & tri[1].clip_rej & tri[2].clip_rej;
    if !clip_and.is_empty() {
        return None;
    }

    let mut poly = Polygon::triangle(tri);
    for (i, plane) in PLANES.iter().enumerate() {
        if clip_or.bits() & (1 << i) == 0 {
            continue;
        }

        let input = poly.vertices();
        let mut out = Polygon::empty();
        for (j, this) in input.iter().enumerate() {
            let next = &input[(j + 1) % input.len()];
            let d1 = plane_distance(plane, this);
            let d2 = plane_distance(plane, next);
            let this_in = d1 > Fix64::ZERO;
            let next_in = d2 > Fix64::ZERO;
            if this_in {
                out.push(*this);
            }
            if this_in != next_in {
                out.push(if this_in {
                    intersect(this, next, d1.div(d1 - d2))
                } else {
                    intersect(next, this, d2.div(d2 - d1))
                });
            }
        }

        if out.len < 3 {
            return None;
        }
        poly = out;
    }
    Some(poly)
}

/// Returns true if the geometry mode culls this triangle.
///
/// Winding is taken from the projected positions. When an odd number of vertices lie
/// behind the eye the winding is flipped.
pub fn is_culled(tri: &[LoadedVertex; 3], geometry_mode: GeometryModes) -> bool {
    let cull = geometry_mode & GeometryModes::CULL_BOTH;
    if cull.is_empty() {
        return false;
    }
    if cull == GeometryModes::CULL_BOTH {
        return true;
    }

    let ndc = |v: &LoadedVertex| (v.x.div(v.w), v.y.div(v.w));
    let (x1, y1) = ndc(&tri[0]);
    let (x2, y2) = ndc(&tri[1]);
    let (x3, y3) = ndc(&tri[2]);
    let (dx1, dy1) = ((x1 - x2).0 as i128, (y1 - y2).0 as i128);
    let (dx2, dy2) = ((x3 - x2).0 as i128, (y3 - y2).0 as i128);
    let mut cross = (dx1 * dy2).saturating_sub(dy1 * dx2).signum();

    let behind = tri.iter().filter(|v| v.w < Fix64::ZERO).count();
    if behind % 2 == 1 {
        cross = -cross;
    }

    if cull == GeometryModes::CULL_FRONT {
        cross <= 0
    } else {
        cross >= 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn vtx(x: f64, y: f64, z: f64, w: f64) -> LoadedVertex {
        let [x, y, z, w] = [x, y, z, w].map(Fix64::from_f64);
        LoadedVertex {
            x,
            y,
            z,
            w,
            color: Rgba32::new(255, 0, 0, 255),
            clip_rej: ClipFlags::of(x, y, z, w),
            ..Default::default()
        }
    }

    #[test]
    fn test_inside_triangle_is_unchanged() {
        let tri = [
            vtx(-0.5, -0.5, 0.0, 1.0),
            vtx(0.5, -0.5, 0.0, 1.0),
            vtx(0.0, 0.5, 0.0, 1.0),
        ];
        let poly = clip_triangle(tri).unwrap();
        assert_eq!(poly.vertices(), &tri[..]);
        assert_eq!(poly.fan().count(), 1);
    }

    #[test]
    fn test_trivial_reject() {
        let tri = [
            vtx(2.0, -0.5, 0.0, 1.0),
            vtx(3.0, -0.5, 0.0, 1.0),
            vtx(2.5, 0.5, 0.0, 1.0),
        ];
        assert!(clip_triangle(tri).is_none());
    }

    #[test]
    fn test_clip_right_plane() {
        let tri = [
            vtx(0.0, 0.0, 0.0, 1.0),
            vtx(2.0, 0.0, 0.0, 1.0),
            vtx(0.0, 0.5, 0.0, 1.0),
        ];
        let poly = clip_triangle(tri).unwrap();
        assert_eq!(poly.vertices().len(), 4);
        for v in poly.vertices() {
            assert!(v.x <= v.w, "{:?}", v);
        }
        // the far vertex is replaced by the intersections at x = 1
        let xs: Vec<f64> = poly.vertices().iter().map(|v| v.x.to_f64()).collect();
        assert!((xs[1] - 1.0).abs() < 1e-5);
        assert!((xs[2] - 1.0).abs() < 1e-5);
        assert_eq!(poly.fan().count(), 2);
    }

    #[test]
    fn test_clip_near_interpolates_attributes() {
        let mut a = vtx(0.0, 0.0, -0.5, 1.0);
        let mut b = vtx(0.0, 0.0, 3.0, 1.0);
        a.color = Rgba32::new(0, 0, 0, 0);
        b.color = Rgba32::new(200, 100, 50, 250);
        b.u = Fix64::from_int(64);
        let c = vtx(0.5, 0.0, -0.5, 1.0);
        let poly = clip_triangle([a, b, c]).unwrap();

        let x = poly.vertices()[1];
        assert!((x.z.to_f64() - 1.0).abs() < 1e-5);
        // t = 1.5 / 3.5
        let t = 1.5 / 3.5;
        assert!((x.u.to_f64() - 64.0 * t).abs() < 1e-3);
        assert!((x.color.r as f64 - 200.0 * t).abs() <= 1.0);
        assert!((x.color.a as f64 - 250.0 * t).abs() <= 1.0);
    }

    #[test]
    fn test_culling() {
        let ccw = [
            vtx(-0.5, -0.5, 0.0, 1.0),
            vtx(0.5, -0.5, 0.0, 1.0),
            vtx(0.0, 0.5, 0.0, 1.0),
        ];
        let cw = [ccw[0], ccw[2], ccw[1]];
        assert!(!is_culled(&ccw, GeometryModes::empty()));
        assert!(is_culled(&ccw, GeometryModes::CULL_BOTH));
        assert!(is_culled(&ccw, GeometryModes::CULL_BACK) != is_culled(&cw, GeometryModes::CULL_BACK));
        assert!(
            is_culled(&ccw, GeometryModes::CULL_FRONT) != is_culled(&ccw, GeometryModes::CULL_BACK)
        );
    }
}
