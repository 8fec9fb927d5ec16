//! 实体网格
//!
//! 构件几何统一表示为三角网格：顶点表 + 三角面索引。
//! 这里只提供构件生成需要的几种基本体（长方体、圆柱、沿路径扫掠、多边形拉伸），
//! 不做布尔运算。

use crate::error::{BuildError, BuildResult};
use crate::math::{BoundingBox3, Matrix4, Point2, Point3, Vector3, EPSILON};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// 几何哈希的量化步长（米）
const HASH_QUANTUM: f64 = 1e-6;

/// 三角网格实体
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Solid {
    pub vertices: Vec<Point3>,
    pub faces: Vec<[u32; 3]>,
}

impl Solid {
    pub fn new(vertices: Vec<Point3>, faces: Vec<[u32; 3]>) -> Self {
        Self { vertices, faces }
    }

    /// 轴对齐长方体
    pub fn cuboid(min: Point3, max: Point3) -> Self {
        let corners = vec![
            Point3::new(min.x, min.y, min.z),
            Point3::new(max.x, min.y, min.z),
            Point3::new(max.x, max.y, min.z),
            Point3::new(min.x, max.y, min.z),
            Point3::new(min.x, min.y, max.z),
            Point3::new(max.x, min.y, max.z),
            Point3::new(max.x, max.y, max.z),
            Point3::new(min.x, max.y, max.z),
        ];
        let faces = vec![
            [0, 2, 1], [0, 3, 2], // 底
            [4, 5, 6], [4, 6, 7], // 顶
            [0, 1, 5], [0, 5, 4],
            [1, 2, 6], [1, 6, 5],
            [2, 3, 7], [2, 7, 6],
            [3, 0, 4], [3, 4, 7],
        ];
        Self::new(corners, faces)
    }

    /// 以底面中心为原点、沿Z轴的长方体
    pub fn block(width: f64, depth: f64, height: f64) -> Self {
        Self::cuboid(
            Point3::new(-width / 2.0, -depth / 2.0, 0.0),
            Point3::new(width / 2.0, depth / 2.0, height),
        )
    }

    /// 底面圆心在原点、沿Z轴的圆柱
    pub fn cylinder(radius: f64, height: f64, segments: usize) -> Self {
        Self::cylinder_between(
            Point3::origin(),
            Point3::new(0.0, 0.0, height),
            radius,
            segments,
        )
        .unwrap_or_default()
    }

    /// 两点之间的圆柱（檩、椽等杆件）
    pub fn cylinder_between(a: Point3, b: Point3, radius: f64, segments: usize) -> BuildResult<Self> {
        let segments = segments.max(3);
        let profile: Vec<Point2> = (0..segments)
            .map(|i| {
                let angle = std::f64::consts::TAU * i as f64 / segments as f64;
                Point2::new(radius * angle.cos(), radius * angle.sin())
            })
            .collect();
        Self::sweep(&[a, b], &profile)
    }

    /// 截面沿折线路径扫掠
    ///
    /// 截面在局部坐标系 (side, up) 中给出，up 尽量取世界Z轴，
    /// 路径竖直时改用X轴。首尾各加封口。
    pub fn sweep(path: &[Point3], profile: &[Point2]) -> BuildResult<Self> {
        if path.len() < 2 {
            return Err(BuildError::geometry("sweep", "path needs at least 2 points"));
        }
        if profile.len() < 3 {
            return Err(BuildError::geometry("sweep", "profile needs at least 3 points"));
        }

        let n = profile.len();
        let mut vertices = Vec::with_capacity(path.len() * n + 2);
        let mut faces = Vec::new();

        let mut last_tangent: Option<Vector3> = None;
        for (i, p) in path.iter().enumerate() {
            let forward = if i + 1 < path.len() { path[i + 1] - p } else { p - path[i - 1] };
            let backward = if i > 0 { p - path[i - 1] } else { forward };
            let tangent = match (forward + backward).try_normalize(EPSILON) {
                Some(t) => t,
                None => match last_tangent {
                    Some(t) => t,
                    None => return Err(BuildError::geometry("sweep", "degenerate path segment")),
                },
            };
            last_tangent = Some(tangent);

            let helper = if tangent.z.abs() > 0.99 { Vector3::x() } else { Vector3::z() };
            let side = tangent.cross(&helper).normalize();
            let up = side.cross(&tangent);
            for q in profile {
                vertices.push(p + side * q.x + up * q.y);
            }
        }

        for ring in 0..path.len() - 1 {
            let a = (ring * n) as u32;
            let b = ((ring + 1) * n) as u32;
            for j in 0..n as u32 {
                let k = (j + 1) % n as u32;
                faces.push([a + j, a + k, b + k]);
                faces.push([a + j, b + k, b + j]);
            }
        }

        // 封口（扇形三角化，截面按凸多边形处理）
        let last = ((path.len() - 1) * n) as u32;
        for j in 1..n as u32 - 1 {
            faces.push([0, j + 1, j]);
            faces.push([last, last + j, last + j + 1]);
        }

        Ok(Self::new(vertices, faces))
    }

    /// 平面多边形沿Z轴拉伸
    pub fn extrude(outline: &[Point2], z0: f64, height: f64) -> BuildResult<Self> {
        let base: Vec<Point3> = outline.iter().map(|p| Point3::new(p.x, p.y, z0)).collect();
        Self::prism(&base, Vector3::new(0.0, 0.0, height))
    }

    /// 平面多边形沿任意方向拉伸成棱柱
    pub fn prism(base: &[Point3], offset: Vector3) -> BuildResult<Self> {
        if base.len() < 3 {
            return Err(BuildError::geometry("prism", "base needs at least 3 points"));
        }
        if offset.norm() < EPSILON {
            return Err(BuildError::geometry("prism", "prism has no thickness"));
        }
        let n = base.len() as u32;
        let mut vertices = base.to_vec();
        vertices.extend(base.iter().map(|p| p + offset));

        let mut faces = Vec::new();
        for j in 1..n - 1 {
            faces.push([0, j + 1, j]);
            faces.push([n, n + j, n + j + 1]);
        }
        for j in 0..n {
            let k = (j + 1) % n;
            faces.push([j, k, n + k]);
            faces.push([j, n + k, n + j]);
        }
        Ok(Self::new(vertices, faces))
    }

    /// 变换后的副本
    pub fn transformed(&self, m: &Matrix4) -> Self {
        Self {
            vertices: self.vertices.iter().map(|p| m.transform_point(p)).collect(),
            faces: self.faces.clone(),
        }
    }

    /// 就地缩放（斗口变化时使用）
    pub fn scale(&mut self, factor: f64) {
        for p in &mut self.vertices {
            p.coords *= factor;
        }
    }

    /// 并入另一实体
    pub fn merge(&mut self, other: &Solid) {
        let offset = self.vertices.len() as u32;
        self.vertices.extend_from_slice(&other.vertices);
        self.faces
            .extend(other.faces.iter().map(|f| [f[0] + offset, f[1] + offset, f[2] + offset]));
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn bounding_box(&self) -> BoundingBox3 {
        BoundingBox3::from_points(self.vertices.iter().copied())
    }

    /// 几何哈希：坐标量化后哈希，用于判断重建前后几何是否一致
    pub fn geometry_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.vertices.len().hash(&mut hasher);
        for p in &self.vertices {
            for c in p.iter() {
                ((c / HASH_QUANTUM).round() as i64).hash(&mut hasher);
            }
        }
        self.faces.hash(&mut hasher);
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cuboid() {
        let solid = Solid::block(2.0, 4.0, 1.0);
        assert_eq!(solid.vertices.len(), 8);
        assert_eq!(solid.faces.len(), 12);
        let bbox = solid.bounding_box();
        assert_eq!(bbox.size(), Vector3::new(2.0, 4.0, 1.0));
        assert_eq!(bbox.min.z, 0.0);
    }

    #[test]
    fn test_cylinder_between() {
        let solid = Solid::cylinder_between(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(3.0, 0.0, 0.0),
            0.5,
            12,
        )
        .unwrap();
        let bbox = solid.bounding_box();
        assert!((bbox.size().x - 3.0).abs() < 1e-9);
        assert!((bbox.size().z - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_sweep_rejects_degenerate_path() {
        let profile = [Point2::new(0.0, 0.0), Point2::new(1.0, 0.0), Point2::new(0.0, 1.0)];
        let p = Point3::new(1.0, 1.0, 1.0);
        assert!(Solid::sweep(&[p, p], &profile).is_err());
    }

    #[test]
    fn test_geometry_hash() {
        let a = Solid::block(1.0, 1.0, 1.0);
        let mut b = a.clone();
        assert_eq!(a.geometry_hash(), b.geometry_hash());
        b.scale(2.0);
        assert_ne!(a.geometry_hash(), b.geometry_hash());

        let moved = a.transformed(&crate::math::translation(Vector3::new(1e-9, 0.0, 0.0)));
        assert_eq!(a.geometry_hash(), moved.geometry_hash());
    }

    #[test]
    fn test_prism() {
        let base = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.0, 2.0, 0.0),
            Point3::new(0.0, 2.0, 1.0),
        ];
        let solid = Solid::prism(&base, Vector3::new(0.5, 0.0, 0.0)).unwrap();
        assert_eq!(solid.vertices.len(), 6);
        assert_eq!(solid.faces.len(), 8);
        assert!((solid.bounding_box().size().x - 0.5).abs() < 1e-12);
        assert!(Solid::prism(&base, Vector3::zeros()).is_err());

        let square = [
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 1.0),
        ];
        let slab = Solid::extrude(&square, 2.0, 0.5).unwrap();
        assert_eq!(slab.bounding_box().min.z, 2.0);
    }

    #[test]
    fn test_merge() {
        let mut a = Solid::block(1.0, 1.0, 1.0);
        let b = Solid::block(2.0, 2.0, 2.0);
        a.merge(&b);
        assert_eq!(a.vertices.len(), 16);
        assert_eq!(a.faces[12], [8, 10, 9]);
    }
}
