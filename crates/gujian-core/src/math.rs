//! 数学基础类型
//!
//! 统一使用 nalgebra 的 f64 类型，并提供容差常量与包围盒。

use serde::{Deserialize, Serialize};

pub type Point2 = nalgebra::Point2<f64>;
pub type Point3 = nalgebra::Point3<f64>;
pub type Vector2 = nalgebra::Vector2<f64>;
pub type Vector3 = nalgebra::Vector3<f64>;
pub type Matrix3 = nalgebra::Matrix3<f64>;
pub type Matrix4 = nalgebra::Matrix4<f64>;

/// 通用浮点容差
pub const EPSILON: f64 = 1e-9;

/// 数值退化时的最小钳制值（近零缩放、退化法向等）
pub const MIN_SCALE: f64 = 1e-6;

/// 将近零的缩放量钳制到 [`MIN_SCALE`]，保留符号
pub fn clamp_scale(value: f64) -> f64 {
    if value.abs() < MIN_SCALE {
        if value.is_sign_negative() {
            -MIN_SCALE
        } else {
            MIN_SCALE
        }
    } else {
        value
    }
}

/// 平移矩阵
pub fn translation(v: Vector3) -> Matrix4 {
    Matrix4::new_translation(&v)
}

/// 绕Z轴旋转后平移
pub fn rotation_z_then_translate(angle: f64, v: Vector3) -> Matrix4 {
    Matrix4::new_translation(&v) * Matrix4::from_axis_angle(&Vector3::z_axis(), angle)
}

/// 取出4x4矩阵的线性部分（丢弃平移）
pub fn linear_part(m: &Matrix4) -> Matrix3 {
    m.fixed_view::<3, 3>(0, 0).into_owned()
}

/// 二维叉积（z分量）
pub fn cross_2d(a: &Vector2, b: &Vector2) -> f64 {
    a.x * b.y - a.y * b.x
}

/// 三维轴对齐包围盒
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox3 {
    pub min: Point3,
    pub max: Point3,
}

impl BoundingBox3 {
    pub fn new(min: Point3, max: Point3) -> Self {
        Self { min, max }
    }

    /// 空包围盒（min > max）
    pub fn empty() -> Self {
        Self {
            min: Point3::new(f64::MAX, f64::MAX, f64::MAX),
            max: Point3::new(f64::MIN, f64::MIN, f64::MIN),
        }
    }

    pub fn from_points(points: impl IntoIterator<Item = Point3>) -> Self {
        let mut bbox = Self::empty();
        for p in points {
            bbox.expand_to_include(&p);
        }
        bbox
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x
    }

    pub fn expand_to_include(&mut self, p: &Point3) {
        self.min = self.min.inf(p);
        self.max = self.max.sup(p);
    }

    pub fn size(&self) -> Vector3 {
        if self.is_empty() {
            Vector3::zeros()
        } else {
            self.max - self.min
        }
    }

    pub fn center(&self) -> Point3 {
        nalgebra::center(&self.min, &self.max)
    }
}
