//! 投影轮廓
//!
//! 将一组实体投影到任意平面上，求出闭合的轮廓多边形：
//! 1. 由法向与平面上一点求平面方程 `Ax+By+Cz+D=0`
//! 2. 每个顶点减去其到平面的有向距离
//! 3. 转到平面局部二维坐标
//! 4. 距离阈值内的点聚成簇，每簇取平均
//! 5. 绕参考中心按极角排序，得到一个闭合环
//! 6. 可选内缩
//!
//! 投影区域不连通或非凸时，极角排序得到的环可能自交。
//! [`SilhouetteMode::Polar`] 保留这一近似（记录告警），
//! [`SilhouetteMode::ConvexHullFallback`] 改用凸包，
//! [`SilhouetteMode::ConvexHull`] 则总是取凸包。

use crate::error::{BuildError, BuildResult};
use crate::math::{cross_2d, Point2, Point3, Vector2, Vector3, EPSILON};
use crate::mesh::Solid;
use serde::{Deserialize, Serialize};

/// 斜接长度上限（相对内缩距离）
const MITER_LIMIT: f64 = 4.0;

/// 投影平面
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectionPlane {
    /// 单位法向
    pub normal: Vector3,
    /// 平面上一点
    pub origin: Point3,
}

impl ProjectionPlane {
    pub fn new(normal: Vector3, origin: Point3) -> BuildResult<Self> {
        let normal = normal
            .try_normalize(EPSILON)
            .ok_or_else(|| BuildError::geometry("projection plane", "normal has zero length"))?;
        Ok(Self { normal, origin })
    }

    /// 水平面 z = height
    pub fn horizontal(height: f64) -> Self {
        Self {
            normal: Vector3::z(),
            origin: Point3::new(0.0, 0.0, height),
        }
    }

    /// 平面方程系数 [A, B, C, D]
    pub fn equation(&self) -> [f64; 4] {
        let n = self.normal;
        [n.x, n.y, n.z, -n.dot(&self.origin.coords)]
    }

    pub fn signed_distance(&self, p: &Point3) -> f64 {
        let [a, b, c, d] = self.equation();
        a * p.x + b * p.y + c * p.z + d
    }

    pub fn project(&self, p: &Point3) -> Point3 {
        p - self.normal * self.signed_distance(p)
    }

    /// 平面内的局部坐标轴 (u, v)
    ///
    /// u 取辅助轴（通常为X，法向接近X时为Y）正交化后的方向，v = n × u。
    /// 对 z=0 平面即为 (x, y)。
    pub fn basis(&self) -> (Vector3, Vector3) {
        let n = self.normal;
        let helper = if n.x.abs() >= 0.9 { Vector3::y() } else { Vector3::x() };
        let u = (helper - n * n.dot(&helper)).normalize();
        let v = n.cross(&u);
        (u, v)
    }

    pub fn to_local(&self, p: &Point3) -> Point2 {
        let (u, v) = self.basis();
        let d = p - self.origin;
        Point2::new(d.dot(&u), d.dot(&v))
    }

    pub fn to_world(&self, q: &Point2) -> Point3 {
        let (u, v) = self.basis();
        self.origin + u * q.x + v * q.y
    }
}

/// 轮廓排序方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SilhouetteMode {
    /// 极角排序，结果可能自交
    #[default]
    Polar,
    /// 极角环自交时改用凸包
    ConvexHullFallback,
    /// 总是取凸包（由许多小构件拼成的轮廓，如檩条截面、望板）
    ConvexHull,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SilhouetteOptions {
    pub merge_distance: f64,
    pub inset: Option<f64>,
    pub mode: SilhouetteMode,
}

impl Default for SilhouetteOptions {
    fn default() -> Self {
        Self {
            merge_distance: 1e-4,
            inset: None,
            mode: SilhouetteMode::Polar,
        }
    }
}

/// 轮廓多边形（平面局部坐标）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SilhouettePolygon {
    pub points: Vec<Point2>,
    pub plane: ProjectionPlane,
    pub inset: Option<f64>,
}

impl SilhouettePolygon {
    /// 有向面积（逆时针为正）
    pub fn signed_area(&self) -> f64 {
        signed_area(&self.points)
    }

    /// 是否为简单多边形（不相邻的边互不相交）
    pub fn is_simple(&self) -> bool {
        is_simple(&self.points)
    }

    /// 世界坐标下的轮廓点
    pub fn world_points(&self) -> Vec<Point3> {
        self.points.iter().map(|q| self.plane.to_world(q)).collect()
    }

    /// 向内偏移（斜接）
    pub fn inset_by(&self, thickness: f64) -> BuildResult<Self> {
        let points = miter_inset(&self.points, thickness)?;
        Ok(Self {
            points,
            plane: self.plane,
            inset: Some(self.inset.unwrap_or(0.0) + thickness),
        })
    }

    pub fn scale(&mut self, factor: f64) {
        for p in &mut self.points {
            p.coords *= factor;
        }
        self.plane.origin.coords *= factor;
        if let Some(inset) = &mut self.inset {
            *inset *= factor;
        }
    }
}

/// 求实体在平面上的投影轮廓
///
/// `center` 为平面局部坐标下的极角排序中心。
pub fn project_silhouette<'a>(
    plane: &ProjectionPlane,
    solids: impl IntoIterator<Item = &'a Solid>,
    center: Point2,
    options: &SilhouetteOptions,
) -> BuildResult<SilhouettePolygon> {
    let projected: Vec<Point2> = solids
        .into_iter()
        .flat_map(|solid| solid.vertices.iter())
        .map(|p| plane.to_local(&plane.project(p)))
        .collect();

    let mut points = merge_points(&projected, options.merge_distance);
    if points.len() < 3 {
        return Err(BuildError::geometry(
            "silhouette",
            format!("only {} distinct points after merging", points.len()),
        ));
    }

    sort_polar(&mut points, center);

    let use_hull = match options.mode {
        SilhouetteMode::ConvexHull => true,
        _ if is_simple(&points) => false,
        SilhouetteMode::Polar => {
            tracing::warn!("Silhouette loop of {} points is self-intersecting", points.len());
            false
        }
        SilhouetteMode::ConvexHullFallback => {
            tracing::debug!("Silhouette loop is self-intersecting, using convex hull");
            true
        }
    };
    if use_hull {
        // 凸包按逆时针给出，不再重新排序
        points = convex_hull(&points);
        if points.len() < 3 {
            return Err(BuildError::geometry("silhouette", "convex hull is degenerate"));
        }
    }

    let polygon = SilhouettePolygon {
        points,
        plane: *plane,
        inset: None,
    };
    match options.inset {
        Some(thickness) if thickness.abs() > EPSILON => polygon.inset_by(thickness),
        _ => Ok(polygon),
    }
}

/// 距离种子点在阈值内的点归为一簇，每簇只取一次平均
fn merge_points(points: &[Point2], threshold: f64) -> Vec<Point2> {
    // (种子, 坐标和, 点数)
    let mut clusters: Vec<(Point2, Vector2, usize)> = Vec::new();
    for p in points {
        match clusters.iter_mut().find(|(seed, _, _)| (seed - p).norm() <= threshold) {
            Some((_, sum, count)) => {
                *sum += p.coords;
                *count += 1;
            }
            None => clusters.push((*p, p.coords, 1)),
        }
    }
    clusters
        .into_iter()
        .map(|(_, sum, count)| Point2::from(sum / count as f64))
        .collect()
}

/// 按极角排序，极角相同时近者在前
fn sort_polar(points: &mut [Point2], center: Point2) {
    points.sort_by(|a, b| {
        let da = a - center;
        let db = b - center;
        da.y.atan2(da.x)
            .total_cmp(&db.y.atan2(db.x))
            .then(da.norm().total_cmp(&db.norm()))
    });
}

fn convex_hull(points: &[Point2]) -> Vec<Point2> {
    let pts: Vec<parry2d::math::Point<f32>> = points
        .iter()
        .map(|p| parry2d::math::Point::new(p.x as f32, p.y as f32))
        .collect();
    parry2d::transformation::convex_hull_idx(&pts)
        .into_iter()
        .map(|i| points[i])
        .collect()
}

pub(crate) fn signed_area(points: &[Point2]) -> f64 {
    let n = points.len();
    (0..n)
        .map(|i| {
            let a = points[i];
            let b = points[(i + 1) % n];
            a.x * b.y - b.x * a.y
        })
        .sum::<f64>()
        * 0.5
}

fn segments_intersect(a: Point2, b: Point2, c: Point2, d: Point2) -> bool {
    let orient = |p: Point2, q: Point2, r: Point2| cross_2d(&(q - p), &(r - p));
    let d1 = orient(c, d, a);
    let d2 = orient(c, d, b);
    let d3 = orient(a, b, c);
    let d4 = orient(a, b, d);
    (d1 * d2 < -EPSILON) && (d3 * d4 < -EPSILON)
}

fn is_simple(points: &[Point2]) -> bool {
    let n = points.len();
    for i in 0..n {
        let (a, b) = (points[i], points[(i + 1) % n]);
        for j in i + 2..n {
            if i == 0 && j == n - 1 {
                continue;
            }
            if segments_intersect(a, b, points[j], points[(j + 1) % n]) {
                return false;
            }
        }
    }
    true
}

/// 斜接内缩，朝多边形内部偏移 `thickness`
fn miter_inset(points: &[Point2], thickness: f64) -> BuildResult<Vec<Point2>> {
    let n = points.len();
    let area = signed_area(points);
    if n < 3 || area.abs() < EPSILON {
        return Err(BuildError::geometry("silhouette inset", "polygon has no area"));
    }
    // 逆时针时内部在左侧
    let side = area.signum();
    let left = |d: Vector2| Vector2::new(-d.y, d.x);

    let mut result = Vec::with_capacity(n);
    for i in 0..n {
        let prev = points[(i + n - 1) % n];
        let here = points[i];
        let next = points[(i + 1) % n];
        let (Some(e0), Some(e1)) = (
            (here - prev).try_normalize(EPSILON),
            (next - here).try_normalize(EPSILON),
        ) else {
            result.push(here);
            continue;
        };
        let n0 = left(e0) * side;
        let n1 = left(e1) * side;
        let miter = (n0 + n1).try_normalize(EPSILON).unwrap_or(n0);
        let cos = miter.dot(&n0).max(1.0 / MITER_LIMIT);
        result.push(here + miter * (thickness / cos));
    }

    // 任一条边反向即说明偏移越过了对边
    let flipped = (0..n).any(|i| {
        let j = (i + 1) % n;
        (result[j] - result[i]).dot(&(points[j] - points[i])) <= 0.0
    });
    if flipped || signed_area(&result) * area <= 0.0 {
        return Err(BuildError::geometry(
            "silhouette inset",
            format!("inset of {} collapses the polygon", thickness),
        ));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_equation() {
        let plane = ProjectionPlane::new(Vector3::new(0.0, 0.0, 2.0), Point3::new(0.0, 0.0, 3.0)).unwrap();
        assert_eq!(plane.equation(), [0.0, 0.0, 1.0, -3.0]);
        assert_eq!(plane.signed_distance(&Point3::new(5.0, 5.0, 4.0)), 1.0);
        assert!(ProjectionPlane::new(Vector3::zeros(), Point3::origin()).is_err());
    }

    #[test]
    fn test_merge_points_averages_whole_cluster() {
        let near = [
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 0.0),
        ];
        let mut reversed = near;
        reversed.reverse();
        for points in [near, reversed] {
            let merged = merge_points(&points, 1.0);
            assert_eq!(merged.len(), 1);
            assert!((merged[0] - Point2::new(0.75, 0.0)).norm() < 1e-12);
        }

        let apart = merge_points(&[Point2::new(0.0, 0.0), Point2::new(0.5, 0.0), Point2::new(3.0, 0.0)], 1.0);
        assert_eq!(apart, vec![Point2::new(0.25, 0.0), Point2::new(3.0, 0.0)]);
    }

    #[test]
    fn test_unit_cube_silhouette() {
        let cube = Solid::cuboid(Point3::origin(), Point3::new(1.0, 1.0, 1.0));
        let plane = ProjectionPlane::horizontal(0.0);
        let polygon =
            project_silhouette(&plane, [&cube], Point2::origin(), &SilhouetteOptions::default()).unwrap();
        assert_eq!(
            polygon.points,
            vec![
                Point2::new(0.0, 0.0),
                Point2::new(1.0, 0.0),
                Point2::new(1.0, 1.0),
                Point2::new(0.0, 1.0),
            ]
        );
        assert!(polygon.is_simple());
        assert!((polygon.signed_area() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_side_plane_projection() {
        let cube = Solid::cuboid(Point3::new(-1.0, -1.0, 0.0), Point3::new(1.0, 1.0, 2.0));
        let plane = ProjectionPlane::new(Vector3::x(), Point3::new(5.0, 0.0, 0.0)).unwrap();
        let polygon = project_silhouette(
            &plane,
            [&cube],
            Point2::new(0.0, 1.0),
            &SilhouetteOptions::default(),
        )
        .unwrap();
        assert_eq!(polygon.points.len(), 4);
        for p in polygon.world_points() {
            assert!((p.x - 5.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_inset() {
        let cube = Solid::cuboid(Point3::new(-1.0, -1.0, 0.0), Point3::new(1.0, 1.0, 1.0));
        let options = SilhouetteOptions { inset: Some(0.25), ..Default::default() };
        let polygon =
            project_silhouette(&ProjectionPlane::horizontal(0.0), [&cube], Point2::origin(), &options)
                .unwrap();
        assert!((polygon.signed_area() - 2.25).abs() < 1e-9);
        assert_eq!(polygon.inset, Some(0.25));

        let too_thick = SilhouetteOptions { inset: Some(1.5), ..Default::default() };
        assert!(
            project_silhouette(&ProjectionPlane::horizontal(0.0), [&cube], Point2::origin(), &too_thick)
                .is_err()
        );
    }

    #[test]
    fn test_convex_hull_fallback() {
        // 参考点在点集之外，极角排序得到蝴蝶形
        let scattered = Solid::new(
            vec![
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(4.33, 2.5, 0.0),
                Point3::new(0.5, 0.866, 0.0),
                Point3::new(0.0, 5.0, 0.0),
            ],
            Vec::new(),
        );
        let plane = ProjectionPlane::horizontal(0.0);

        let polar =
            project_silhouette(&plane, [&scattered], Point2::origin(), &SilhouetteOptions::default())
                .unwrap();
        assert_eq!(polar.points.len(), 4);
        assert!(!polar.is_simple());

        let options = SilhouetteOptions { mode: SilhouetteMode::ConvexHullFallback, ..Default::default() };
        let hull = project_silhouette(&plane, [&scattered], Point2::origin(), &options).unwrap();
        assert!(hull.is_simple());
        assert!(hull.signed_area() > 0.0);

        // 两个分离的方块：极角环不自交，但只有凸包才覆盖中间的空隙
        let left = Solid::cuboid(Point3::new(-3.0, -1.0, 0.0), Point3::new(-1.0, 1.0, 1.0));
        let right = Solid::cuboid(Point3::new(1.0, -1.0, 0.0), Point3::new(3.0, 1.0, 1.0));
        let options = SilhouetteOptions { mode: SilhouetteMode::ConvexHull, ..Default::default() };
        let hull = project_silhouette(&plane, [&left, &right], Point2::origin(), &options).unwrap();
        assert!(hull.is_simple());
        assert!((hull.signed_area() - 12.0).abs() < 1e-4);
    }
}
