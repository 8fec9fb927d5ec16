//! 曲线几何
//!
//! 檐口曲线、脊线使用三次贝塞尔曲线或NURBS曲线描述。提供：
//! - 曲线求值与采样、绑定截面后扫掠成实体（连檐、瓦口板）
//! - 沿X轴的等分采样（椽头、望板定位）
//! - 圆外一点到圆的切点（檐椽搭在檐檩上的位置）
//! - 平面直线与贝塞尔曲线求交（翼角椽与檐口曲线）

use crate::error::{BuildError, BuildResult};
use crate::math::{Matrix4, Point2, Point3, Vector2, Vector3, EPSILON};
use crate::mesh::Solid;
use serde::{Deserialize, Serialize};

// === 三次贝塞尔 ===

/// 三次贝塞尔曲线：两个端点与两个切线控制柄
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CubicBezier {
    pub p0: Point3,
    pub h0: Point3,
    pub h1: Point3,
    pub p1: Point3,
}

impl CubicBezier {
    pub fn new(p0: Point3, h0: Point3, h1: Point3, p1: Point3) -> Self {
        Self { p0, h0, h1, p1 }
    }

    pub fn eval(&self, t: f64) -> Point3 {
        let s = 1.0 - t;
        let coords = self.p0.coords * (s * s * s)
            + self.h0.coords * (3.0 * s * s * t)
            + self.h1.coords * (3.0 * s * t * t)
            + self.p1.coords * (t * t * t);
        Point3::from(coords)
    }

    /// 一阶导数
    pub fn derivative(&self, t: f64) -> Vector3 {
        let s = 1.0 - t;
        (self.h0 - self.p0) * (3.0 * s * s)
            + (self.h1 - self.h0) * (6.0 * s * t)
            + (self.p1 - self.h1) * (3.0 * t * t)
    }

    fn transformed(&self, m: &Matrix4) -> Self {
        Self {
            p0: m.transform_point(&self.p0),
            h0: m.transform_point(&self.h0),
            h1: m.transform_point(&self.h1),
            p1: m.transform_point(&self.p1),
        }
    }
}

// === NURBS ===

/// NURBS曲线（夹持均匀节点向量）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NurbsCurve {
    pub degree: usize,
    pub control_points: Vec<Point3>,
    pub weights: Vec<f64>,
    pub knots: Vec<f64>,
}

impl NurbsCurve {
    /// 由控制点构造，权重均为1
    pub fn clamped_uniform(control_points: Vec<Point3>, degree: usize) -> BuildResult<Self> {
        let n = control_points.len();
        if degree == 0 || n <= degree {
            return Err(BuildError::geometry(
                "nurbs",
                format!("{} control points cannot carry a degree {} curve", n, degree),
            ));
        }
        let m = n + degree + 1;
        let interior = m - 2 * (degree + 1);
        let mut knots = vec![0.0; m];
        for knot in knots.iter_mut().skip(m - degree - 1) {
            *knot = 1.0;
        }
        for i in 1..=interior {
            knots[degree + i] = i as f64 / (interior + 1) as f64;
        }
        Ok(Self {
            degree,
            weights: vec![1.0; n],
            control_points,
            knots,
        })
    }

    fn last_index(&self) -> usize {
        self.control_points.len() - 1
    }

    /// 所在节点区间
    fn find_span(&self, t: f64) -> usize {
        let n = self.last_index();
        let p = self.degree;
        if t >= self.knots[n + 1] {
            return n;
        }
        if t <= self.knots[p] {
            return p;
        }
        let (mut low, mut high) = (p, n + 1);
        let mut mid = (low + high) / 2;
        while t < self.knots[mid] || t >= self.knots[mid + 1] {
            if t < self.knots[mid] {
                high = mid;
            } else {
                low = mid;
            }
            mid = (low + high) / 2;
        }
        mid
    }

    /// 非零基函数 N[span-p..=span]
    fn basis(&self, span: usize, t: f64) -> Vec<f64> {
        let p = self.degree;
        let mut n = vec![0.0; p + 1];
        let mut left = vec![0.0; p + 1];
        let mut right = vec![0.0; p + 1];
        n[0] = 1.0;
        for j in 1..=p {
            left[j] = t - self.knots[span + 1 - j];
            right[j] = self.knots[span + j] - t;
            let mut saved = 0.0;
            for r in 0..j {
                let denom = right[r + 1] + left[j - r];
                if denom.abs() < 1e-30 {
                    continue;
                }
                let temp = n[r] / denom;
                n[r] = saved + right[r + 1] * temp;
                saved = left[j - r] * temp;
            }
            n[j] = saved;
        }
        n
    }

    /// De Boor 求值（有理形式）
    pub fn eval(&self, t: f64) -> Point3 {
        let t = t.clamp(0.0, 1.0);
        let span = self.find_span(t);
        let basis = self.basis(span, t);
        let mut sum = Vector3::zeros();
        let mut weight = 0.0;
        for (i, b) in basis.iter().enumerate() {
            let index = span - self.degree + i;
            let w = b * self.weights[index];
            sum += self.control_points[index].coords * w;
            weight += w;
        }
        if weight.abs() < EPSILON {
            return self.control_points[0];
        }
        Point3::from(sum / weight)
    }

    /// 数值导数
    pub fn derivative(&self, t: f64) -> Vector3 {
        let h = 1e-6;
        let a = (t - h).max(0.0);
        let b = (t + h).min(1.0);
        (self.eval(b) - self.eval(a)) / (b - a)
    }

    fn transformed(&self, m: &Matrix4) -> Self {
        Self {
            control_points: self.control_points.iter().map(|p| m.transform_point(p)).collect(),
            ..self.clone()
        }
    }
}

// === 曲线描述 ===

/// 扫掠截面（矩形，宽×高，居中）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrossSection {
    pub width: f64,
    pub height: f64,
}

impl CrossSection {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn profile(&self) -> Vec<Point2> {
        let (w, h) = (self.width / 2.0, self.height / 2.0);
        vec![
            Point2::new(-w, -h),
            Point2::new(w, -h),
            Point2::new(w, h),
            Point2::new(-w, h),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CurveKind {
    Bezier(CubicBezier),
    Nurbs(NurbsCurve),
}

/// 曲线描述：几何、采样分辨率、可选截面
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveDescriptor {
    pub kind: CurveKind,
    pub resolution: usize,
    pub section: Option<CrossSection>,
}

impl CurveDescriptor {
    pub fn bezier(p0: Point3, h0: Point3, h1: Point3, p1: Point3) -> Self {
        Self {
            kind: CurveKind::Bezier(CubicBezier::new(p0, h0, h1, p1)),
            resolution: 32,
            section: None,
        }
    }

    /// 直线（退化的贝塞尔，控制柄位于三等分点）
    pub fn straight(p0: Point3, p1: Point3) -> Self {
        let d = p1 - p0;
        Self::bezier(p0, p0 + d / 3.0, p0 + d * (2.0 / 3.0), p1)
    }

    pub fn nurbs(points: Vec<Point3>, degree: usize) -> BuildResult<Self> {
        Ok(Self {
            kind: CurveKind::Nurbs(NurbsCurve::clamped_uniform(points, degree)?),
            resolution: 32,
            section: None,
        })
    }

    pub fn with_resolution(mut self, resolution: usize) -> Self {
        self.resolution = resolution.max(1);
        self
    }

    pub fn with_section(mut self, section: CrossSection) -> Self {
        self.section = Some(section);
        self
    }

    pub fn as_bezier(&self) -> Option<&CubicBezier> {
        match &self.kind {
            CurveKind::Bezier(b) => Some(b),
            CurveKind::Nurbs(_) => None,
        }
    }

    pub fn eval(&self, t: f64) -> Point3 {
        match &self.kind {
            CurveKind::Bezier(b) => b.eval(t),
            CurveKind::Nurbs(n) => n.eval(t),
        }
    }

    pub fn derivative(&self, t: f64) -> Vector3 {
        match &self.kind {
            CurveKind::Bezier(b) => b.derivative(t),
            CurveKind::Nurbs(n) => n.derivative(t),
        }
    }

    pub fn start(&self) -> Point3 {
        self.eval(0.0)
    }

    pub fn end(&self) -> Point3 {
        self.eval(1.0)
    }

    /// 按分辨率均匀采样参数，返回 resolution+1 个点
    pub fn sample(&self) -> Vec<Point3> {
        self.sample_n(self.resolution)
    }

    pub fn sample_n(&self, segments: usize) -> Vec<Point3> {
        let segments = segments.max(1);
        (0..=segments)
            .map(|i| self.eval(i as f64 / segments as f64))
            .collect()
    }

    /// 折线近似长度
    pub fn length(&self) -> f64 {
        self.sample()
            .windows(2)
            .map(|w| (w[1] - w[0]).norm())
            .sum()
    }

    /// 截面沿曲线扫掠成实体
    pub fn to_solid(&self) -> BuildResult<Solid> {
        let section = self
            .section
            .ok_or_else(|| BuildError::geometry("curve sweep", "no cross-section bound to curve"))?;
        Solid::sweep(&self.sample(), &section.profile())
    }

    /// 仿射变换控制点
    pub fn transformed(&self, m: &Matrix4) -> Self {
        let kind = match &self.kind {
            CurveKind::Bezier(b) => CurveKind::Bezier(b.transformed(m)),
            CurveKind::Nurbs(n) => CurveKind::Nurbs(n.transformed(m)),
        };
        Self { kind, ..self.clone() }
    }

    /// 等比缩放（含截面）
    pub fn scale(&mut self, factor: f64) {
        *self = self.transformed(&Matrix4::new_scaling(factor));
        if let Some(section) = &mut self.section {
            section.width *= factor;
            section.height *= factor;
        }
    }
}

/// 检查两段曲线衔接处是否连续（端点重合、切线同向）
pub fn tangents_continuous(a: &CurveDescriptor, b: &CurveDescriptor, tolerance: f64) -> bool {
    if (a.end() - b.start()).norm() > tolerance {
        return false;
    }
    match (
        a.derivative(1.0).try_normalize(EPSILON),
        b.derivative(0.0).try_normalize(EPSILON),
    ) {
        (Some(ta), Some(tb)) => 1.0 - ta.dot(&tb) <= tolerance,
        _ => false,
    }
}

// === 等分采样 ===

/// 等分时是否包含曲线端点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointMode {
    /// 不含端点（椽头）
    Exclude,
    /// 首尾加上真实端点（望板、瓦口）
    Include,
}

/// 沿X轴等分曲线
///
/// 先以 `oversample × count` 的密度采样，再对每个目标X
/// `x0 + (x1 - x0)·i/(count+1)` 取X距离最近的采样点。
/// 等分按X坐标而不是弧长。
pub fn equal_division(
    curve: &CurveDescriptor,
    count: usize,
    mode: EndpointMode,
    oversample: usize,
) -> BuildResult<Vec<Point3>> {
    let start = curve.start();
    let end = curve.end();
    let dx = end.x - start.x;
    if dx.abs() < EPSILON {
        return Err(BuildError::geometry(
            "equal division",
            "curve has no extent along the X axis",
        ));
    }

    let mut result = Vec::with_capacity(count + 2);
    if mode == EndpointMode::Include {
        result.push(start);
    }

    if count > 0 {
        let samples = curve.sample_n((oversample.max(1) * count).max(2));
        for i in 1..=count {
            let target = start.x + dx * i as f64 / (count + 1) as f64;
            let nearest = samples
                .iter()
                .min_by(|a, b| (a.x - target).abs().total_cmp(&(b.x - target).abs()))
                .copied()
                .unwrap_or(start);
            result.push(nearest);
        }
    }

    if mode == EndpointMode::Include {
        result.push(end);
    }
    Ok(result)
}

// === 切点 ===

/// 圆外一点到圆的两个切点
///
/// 点在圆内时返回空；点在圆上时两个切点重合。
pub fn tangent_points(center: Point2, radius: f64, p: Point2) -> Vec<Point2> {
    let offset = p - center;
    let d = offset.norm();
    if radius <= 0.0 || d < radius {
        return Vec::new();
    }
    let base = offset.y.atan2(offset.x);
    let alpha = (radius / d).clamp(-1.0, 1.0).acos();
    [base - alpha, base + alpha]
        .into_iter()
        .map(|angle| center + Vector2::new(angle.cos(), angle.sin()) * radius)
        .collect()
}

// === 直线与贝塞尔求交 ===

/// 平面直线（由两点确定）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Line2 {
    pub a: Point2,
    pub b: Point2,
}

impl Line2 {
    pub fn new(a: Point2, b: Point2) -> Self {
        Self { a, b }
    }

    fn is_vertical(&self) -> bool {
        (self.b.x - self.a.x).abs() < EPSILON
    }

    /// 给定X处的Y值（非竖直线）
    fn y_at(&self, x: f64) -> f64 {
        let slope = (self.b.y - self.a.y) / (self.b.x - self.a.x);
        self.a.y + slope * (x - self.a.x)
    }
}

/// 求交结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intersection {
    pub t: f64,
    pub point: Point3,
}

/// 二分法求平面直线与贝塞尔曲线XY投影的交点
///
/// 在 t∈[0,1] 上对 `curve_y(t) - line_y(curve_x(t))` 二分（竖直线改用X差），
/// 要求两端异号。
pub fn intersect_line_bezier(
    line: &Line2,
    curve: &CubicBezier,
    max_iterations: usize,
    tolerance: f64,
) -> BuildResult<Intersection> {
    if (line.b - line.a).norm() < EPSILON {
        return Err(BuildError::geometry("line intersection", "line has zero length"));
    }
    let residual = |t: f64| {
        let p = curve.eval(t);
        if line.is_vertical() {
            p.x - line.a.x
        } else {
            p.y - line.y_at(p.x)
        }
    };

    let (mut lo, mut hi) = (0.0, 1.0);
    let mut f_lo = residual(lo);
    let f_hi = residual(hi);
    if f_lo.abs() <= tolerance {
        return Ok(Intersection { t: lo, point: curve.eval(lo) });
    }
    if f_hi.abs() <= tolerance {
        return Ok(Intersection { t: hi, point: curve.eval(hi) });
    }
    if f_lo.signum() == f_hi.signum() {
        return Err(BuildError::geometry(
            "line intersection",
            "line does not cross the curve on t in [0, 1]",
        ));
    }

    for _ in 0..max_iterations {
        let mid = 0.5 * (lo + hi);
        let f_mid = residual(mid);
        if f_mid.abs() <= tolerance || (hi - lo) * 0.5 <= tolerance {
            return Ok(Intersection { t: mid, point: curve.eval(mid) });
        }
        if f_mid.signum() == f_lo.signum() {
            lo = mid;
            f_lo = f_mid;
        } else {
            hi = mid;
        }
    }

    Err(BuildError::geometry(
        "line intersection",
        format!("no convergence within {} iterations", max_iterations),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eave_curve() -> CurveDescriptor {
        CurveDescriptor::bezier(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(3.0, 0.0, 0.0),
            Point3::new(7.0, 0.5, 0.6),
            Point3::new(10.0, 1.0, 1.2),
        )
    }

    #[test]
    fn test_bezier_endpoints() {
        let curve = eave_curve();
        assert_eq!(curve.start(), Point3::new(0.0, 0.0, 0.0));
        assert_eq!(curve.end(), Point3::new(10.0, 1.0, 1.2));
        assert_eq!(curve.sample().len(), 33);
    }

    #[test]
    fn test_nurbs_clamped_endpoints() {
        let points = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 2.0, 0.0),
            Point3::new(3.0, 2.0, 0.0),
            Point3::new(4.0, 0.0, 0.0),
            Point3::new(5.0, 1.0, 0.0),
        ];
        let curve = CurveDescriptor::nurbs(points, 3).unwrap();
        assert!((curve.start() - Point3::new(0.0, 0.0, 0.0)).norm() < 1e-12);
        assert!((curve.end() - Point3::new(5.0, 1.0, 0.0)).norm() < 1e-12);
        assert!(CurveDescriptor::nurbs(vec![Point3::origin(); 2], 3).is_err());
    }

    #[test]
    fn test_equal_division_monotonic() {
        let curve = eave_curve();
        for count in [1, 2, 3, 5] {
            let points = equal_division(&curve, count, EndpointMode::Exclude, 1000).unwrap();
            assert_eq!(points.len(), count);
            for (i, p) in points.iter().enumerate() {
                let target = 10.0 * (i + 1) as f64 / (count + 1) as f64;
                assert!((p.x - target).abs() < 1e-2, "count {}: {} vs {}", count, p.x, target);
                assert!(p.x > 0.0 && p.x < 10.0);
            }
            for w in points.windows(2) {
                assert!(w[1].x > w[0].x);
            }
        }
    }

    #[test]
    fn test_equal_division_with_endpoints() {
        let curve = eave_curve();
        let points = equal_division(&curve, 3, EndpointMode::Include, 1000).unwrap();
        assert_eq!(points.len(), 5);
        assert_eq!(points[0], curve.start());
        assert_eq!(points[4], curve.end());

        let vertical = CurveDescriptor::straight(Point3::origin(), Point3::new(0.0, 0.0, 3.0));
        assert!(equal_division(&vertical, 3, EndpointMode::Exclude, 1000).is_err());
    }

    #[test]
    fn test_tangent_points() {
        let center = Point2::origin();
        let p = Point2::new(5.0, 0.0);
        let points = tangent_points(center, 2.0, p);
        assert_eq!(points.len(), 2);
        assert!((points[0].x - points[1].x).abs() < 1e-12);
        assert!((points[0].y + points[1].y).abs() < 1e-12);
        for t in &points {
            assert!(((t - center).norm() - 2.0).abs() < 1e-12);
            // 切线垂直于半径
            assert!((t - center).dot(&(p - t)).abs() < 1e-9);
        }

        assert!(tangent_points(center, 2.0, Point2::new(1.0, 0.0)).is_empty());
    }

    #[test]
    fn test_intersect_line_bezier() {
        let curve = *eave_curve().as_bezier().unwrap();
        let line = Line2::new(Point2::new(5.0, -1.0), Point2::new(5.0, 2.0));
        let hit = intersect_line_bezier(&line, &curve, 64, 1e-9).unwrap();
        assert!((hit.point.x - 5.0).abs() < 1e-6);
        assert_eq!(hit.point, curve.eval(hit.t));

        let diagonal = Line2::new(Point2::new(0.0, -2.0), Point2::new(10.0, 3.0));
        let hit = intersect_line_bezier(&diagonal, &curve, 64, 1e-9).unwrap();
        assert!((hit.point.y - diagonal.y_at(hit.point.x)).abs() < 1e-6);

        let miss = Line2::new(Point2::new(20.0, 0.0), Point2::new(20.0, 1.0));
        assert!(intersect_line_bezier(&miss, &curve, 64, 1e-9).is_err());
    }

    #[test]
    fn test_tangents_continuous() {
        let a = CurveDescriptor::straight(Point3::origin(), Point3::new(1.0, 0.0, 0.0));
        let b = CurveDescriptor::straight(Point3::new(1.0, 0.0, 0.0), Point3::new(2.0, 0.0, 0.0));
        let kink = CurveDescriptor::straight(Point3::new(1.0, 0.0, 0.0), Point3::new(1.0, 1.0, 0.0));
        assert!(tangents_continuous(&a, &b, 1e-6));
        assert!(!tangents_continuous(&a, &kink, 1e-6));
    }

    #[test]
    fn test_to_solid_requires_section() {
        let curve = eave_curve();
        assert!(curve.to_solid().is_err());
        let solid = curve.with_section(CrossSection::new(0.1, 0.2)).to_solid().unwrap();
        assert_eq!(solid.vertices.len(), 33 * 4);
    }
}
