//! 法向偏移（举折线抬升）
//!
//! 将有序的檩位折线投影到竖直平面上，沿每段的左法向推出距离 L，
//! 得到椽子上皮等与檩位平行的线。末点落在对称面上时（庑殿/攒尖的脊线汇交处），
//! 沿前两个已推出点的斜率外延到对称面，使推出的线恰好汇交于脊线。

use crate::error::{BuildError, BuildResult};
use crate::math::{Point2, Point3, Vector2, EPSILON};

/// 投影时丢弃的世界轴
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropAxis {
    /// 丢弃X，在 (y, z) 平面内计算（山面方向的坡）
    DropX,
    /// 丢弃Y，在 (x, z) 平面内计算（正面方向的坡）
    DropY,
}

impl DropAxis {
    fn project(&self, p: &Point3) -> Point2 {
        match self {
            DropAxis::DropX => Point2::new(p.y, p.z),
            DropAxis::DropY => Point2::new(p.x, p.z),
        }
    }

    /// 回到三维，保留原点被丢弃的坐标
    fn unproject(&self, q: &Point2, original: &Point3) -> Point3 {
        match self {
            DropAxis::DropX => Point3::new(original.x, q.x, q.y),
            DropAxis::DropY => Point3::new(q.x, original.y, q.y),
        }
    }
}

fn left_normal(d: &Vector2) -> Vector2 {
    Vector2::new(-d.y, d.x)
}

/// 沿左法向推出折线
///
/// - `symmetry_u`：对称面在投影平面中的横坐标
/// - `epsilon`：判定末点是否在对称面上的容差
pub fn push_along_normals(
    points: &[Point3],
    axis: DropAxis,
    distance: f64,
    symmetry_u: f64,
    epsilon: f64,
) -> BuildResult<Vec<Point3>> {
    if points.len() < 2 {
        return Err(BuildError::geometry("normal offset", "polyline needs at least 2 points"));
    }
    let flat: Vec<Point2> = points.iter().map(|p| axis.project(p)).collect();
    let last = flat.len() - 1;

    let mut normals: Vec<Vector2> = Vec::with_capacity(last);
    for i in 0..last {
        let d = flat[i + 1] - flat[i];
        let normal = match d.try_normalize(EPSILON) {
            Some(unit) => left_normal(&unit),
            // 退化段沿用上一段的法向
            None => match normals.last() {
                Some(prev) => *prev,
                None => {
                    return Err(BuildError::geometry(
                        "normal offset",
                        "first segment has zero length",
                    ))
                }
            },
        };
        normals.push(normal);
    }

    let mut pushed: Vec<Point2> = flat[..last]
        .iter()
        .zip(&normals)
        .map(|(p, n)| p + n * distance)
        .collect();

    let end = flat[last];
    let own_push = end + normals[last - 1] * distance;
    let final_point = if (end.x - symmetry_u).abs() > epsilon {
        own_push
    } else {
        // 末点在对称面上：沿已推出点的斜率外延到对称面
        let direction = if pushed.len() >= 2 {
            pushed[pushed.len() - 1] - pushed[pushed.len() - 2]
        } else {
            flat[last] - flat[last - 1]
        };
        let anchor = pushed[pushed.len() - 1];
        if direction.x.abs() < EPSILON {
            own_push
        } else {
            let slope = direction.y / direction.x;
            Point2::new(symmetry_u, anchor.y + slope * (symmetry_u - anchor.x))
        }
    };
    pushed.push(final_point);

    Ok(pushed
        .iter()
        .zip(points)
        .map(|(q, original)| axis.unproject(q, original))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_straight_segment() {
        let l = 0.25;
        let points = [Point3::new(0.0, 3.0, 0.0), Point3::new(1.0, 3.0, 0.0)];
        let pushed = push_along_normals(&points, DropAxis::DropY, l, 10.0, 1e-6).unwrap();
        assert_eq!(pushed[0], Point3::new(0.0, 3.0, l));
        assert_eq!(pushed[1], Point3::new(1.0, 3.0, l));
        // 方向不变
        let before = points[1] - points[0];
        let after = pushed[1] - pushed[0];
        assert!((before - after).norm() < 1e-12);
    }

    #[test]
    fn test_drop_x_keeps_x() {
        let points = [Point3::new(7.0, 0.0, 0.0), Point3::new(7.0, 2.0, 1.0)];
        let pushed = push_along_normals(&points, DropAxis::DropX, 1.0, 100.0, 1e-6).unwrap();
        assert!(pushed.iter().all(|p| p.x == 7.0));
        let offset = pushed[0] - points[0];
        assert!((offset.norm() - 1.0).abs() < 1e-12);
        assert!(offset.dot(&(points[1] - points[0])).abs() < 1e-12);
    }

    #[test]
    fn test_converges_on_ridge() {
        let points = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.5),
            Point3::new(2.0, 0.0, 1.2),
        ];
        let pushed = push_along_normals(&points, DropAxis::DropY, 0.1, 2.0, 1e-6).unwrap();
        let end = pushed[2];
        assert!((end.x - 2.0).abs() < 1e-12);
        // 与前两个推出点共线
        let a = Vector2::new(pushed[1].x - pushed[0].x, pushed[1].z - pushed[0].z);
        let b = Vector2::new(end.x - pushed[1].x, end.z - pushed[1].z);
        assert!(crate::math::cross_2d(&a, &b).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_segments() {
        let p = Point3::new(1.0, 0.0, 1.0);
        assert!(push_along_normals(&[p, p], DropAxis::DropY, 0.1, 5.0, 1e-6).is_err());

        let points = [Point3::new(0.0, 0.0, 0.0), p, p, Point3::new(2.0, 0.0, 2.0)];
        let pushed = push_along_normals(&points, DropAxis::DropY, 0.1, 5.0, 1e-6).unwrap();
        assert_eq!(pushed.len(), 4);
        assert!((pushed[2] - pushed[1]).norm() < 1e-12);
    }
}
