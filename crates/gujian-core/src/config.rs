//! 构建配置
//!
//! 与参数集不同，配置描述的是算法本身的精度、容差与超时设置，
//! 不参与几何尺寸的推导。

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 构建配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// 等分采样的过采样倍数（采样点数 = 倍数 × 目标点数）
    pub oversample_factor: usize,

    /// 投影轮廓点合并距离（米）
    pub merge_distance: f64,

    /// 判断点是否落在对称面上的容差（米）
    pub symmetry_epsilon: f64,

    /// 直线与贝塞尔曲线求交的最大二分次数
    pub intersection_max_iterations: usize,

    /// 求交收敛容差
    pub intersection_tolerance: f64,

    /// 曲线扫掠时的采样分辨率
    pub curve_resolution: usize,

    /// 圆柱截面分段数
    pub cylinder_segments: usize,

    /// 进度轮询间隔（毫秒）
    pub poll_interval_ms: u64,

    /// 无信号告警阈值（毫秒）
    pub warn_after_ms: u64,

    /// 无信号超时阈值（毫秒）
    pub timeout_ms: u64,

    /// 同一阶段内的节点几何是否并行生成
    pub parallel_emission: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            oversample_factor: 1000,
            merge_distance: 1e-4,
            symmetry_epsilon: 1e-4,
            intersection_max_iterations: 64,
            intersection_tolerance: 1e-9,
            curve_resolution: 32,
            cylinder_segments: 16,
            poll_interval_ms: 100,
            warn_after_ms: 2_000,
            timeout_ms: 40_000,
            parallel_emission: true,
        }
    }
}

impl BuildConfig {
    /// 从JSON文本读取，缺省字段取默认值
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn warn_after(&self) -> Duration {
        Duration::from_millis(self.warn_after_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = BuildConfig::from_json_str(r#"{ "timeout_ms": 500 }"#).unwrap();
        assert_eq!(config.timeout_ms, 500);
        assert_eq!(config.oversample_factor, 1000);
        assert_eq!(config.warn_after(), Duration::from_secs(2));
    }
}
