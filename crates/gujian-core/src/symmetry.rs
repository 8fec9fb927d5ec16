//! 对角镜像
//!
//! 翼角处的构件（角梁两侧的檐口曲线、翼角椽）在两个相互垂直的檐面上成对出现。
//! 只构造一侧，另一侧由沿对角竖直面的镜像得到，保证两侧严格对称。
//!
//! 镜像面为包含轴 `(1,1,0)` 的竖直面，随父节点的世界旋转一起转动（不计平移），
//! 并通过转到世界坐标系中的枢轴点：`M = T(p)·H·T(-p)`，H 为 Householder 反射。

use crate::math::{linear_part, Matrix3, Matrix4, Point3, Vector3};

/// 对角镜像变换
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiagonalMirror {
    /// 世界坐标下的镜像矩阵
    pub matrix: Matrix4,
    /// 世界坐标下的枢轴点
    pub pivot: Point3,
}

impl DiagonalMirror {
    /// - `parent_world`：父节点的世界变换
    /// - `pivot_local`：父节点局部坐标下的枢轴点
    pub fn new(parent_world: &Matrix4, pivot_local: &Point3) -> Self {
        let rotation = orthonormal_rotation(&linear_part(parent_world));
        let pivot = parent_world.transform_point(pivot_local);

        // 对角面法向：(1,-1,0)/√2 随父节点旋转
        let normal = (rotation * Vector3::new(1.0, -1.0, 0.0)).normalize();
        let householder = Matrix3::identity() - normal * normal.transpose() * 2.0;

        let mut h = Matrix4::identity();
        h.fixed_view_mut::<3, 3>(0, 0).copy_from(&householder);

        let matrix = Matrix4::new_translation(&pivot.coords) * h * Matrix4::new_translation(&-pivot.coords);
        Self { matrix, pivot }
    }

    pub fn apply_point(&self, p: &Point3) -> Point3 {
        self.matrix.transform_point(p)
    }

    pub fn apply_vector(&self, v: &Vector3) -> Vector3 {
        self.matrix.transform_vector(v)
    }

    /// 镜像一个世界变换（节点变换）
    pub fn apply_transform(&self, world: &Matrix4) -> Matrix4 {
        self.matrix * world
    }
}

/// 去掉缩放，只保留旋转
fn orthonormal_rotation(m: &Matrix3) -> Matrix3 {
    let x = m.column(0).into_owned();
    let y = m.column(1).into_owned();
    match (x.try_normalize(1e-12), y.try_normalize(1e-12)) {
        (Some(x), Some(y)) => {
            let z = x.cross(&y).normalize();
            let y = z.cross(&x);
            Matrix3::from_columns(&[x, y, z])
        }
        _ => Matrix3::identity(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::rotation_z_then_translate;

    fn approx(a: &Point3, b: &Point3) -> bool {
        (a - b).norm() < 1e-12
    }

    #[test]
    fn test_swaps_axes_about_origin() {
        let mirror = DiagonalMirror::new(&Matrix4::identity(), &Point3::origin());
        assert!(approx(&mirror.apply_point(&Point3::new(1.0, 0.0, 0.0)), &Point3::new(0.0, 1.0, 0.0)));
        assert!(approx(&mirror.apply_point(&Point3::new(2.0, 5.0, 3.0)), &Point3::new(5.0, 2.0, 3.0)));
    }

    #[test]
    fn test_is_involution() {
        let parent = rotation_z_then_translate(0.3, Vector3::new(4.0, -2.0, 1.0));
        let mirror = DiagonalMirror::new(&parent, &Point3::new(1.0, 1.0, 0.0));
        let twice = mirror.matrix * mirror.matrix;
        assert!((twice - Matrix4::identity()).norm() < 1e-12);
        assert!((linear_part(&mirror.matrix).determinant() + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_pivot_is_fixed() {
        let parent = rotation_z_then_translate(std::f64::consts::FRAC_PI_2, Vector3::new(10.0, 0.0, 0.0));
        let pivot_local = Point3::new(2.0, 3.0, 0.0);
        let mirror = DiagonalMirror::new(&parent, &pivot_local);
        let pivot_world = parent.transform_point(&pivot_local);
        assert!(approx(&mirror.apply_point(&pivot_world), &pivot_world));
    }

    #[test]
    fn test_follows_parent_rotation() {
        // 父节点绕Z转90度后，局部X轴映射到局部Y轴
        let parent = rotation_z_then_translate(std::f64::consts::FRAC_PI_2, Vector3::zeros());
        let mirror = DiagonalMirror::new(&parent, &Point3::origin());
        let local_x = parent.transform_point(&Point3::new(1.0, 0.0, 0.0));
        let local_y = parent.transform_point(&Point3::new(0.0, 1.0, 0.0));
        assert!(approx(&mirror.apply_point(&local_x), &local_y));
    }

    #[test]
    fn test_ignores_parent_scale() {
        let parent = Matrix4::new_scaling(3.0);
        let mirror = DiagonalMirror::new(&parent, &Point3::origin());
        assert!(approx(&mirror.apply_point(&Point3::new(1.0, 0.0, 0.0)), &Point3::new(0.0, 1.0, 0.0)));
    }
}
