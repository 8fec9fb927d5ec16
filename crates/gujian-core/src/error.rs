//! 构建错误定义

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    /// 参数超出声明的取值域，构建不会开始
    #[error("Invalid parameter `{field}`: {reason}")]
    InvalidParameter { field: String, reason: String },

    /// 曲线/求交/投影等几何例程无法给出有效结果
    #[error("Geometry failure in {context}: {reason}")]
    GeometryFailure { context: String, reason: String },

    /// 在限定时间内没有收到进度信号
    #[error("Stage timeout: no progress signal for {elapsed_ms} ms")]
    StageTimeout { elapsed_ms: u64 },

    /// 用户取消（阶段之间检查）
    #[error("Build cancelled by user")]
    CancelledByUser,
}

impl BuildError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn geometry(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::GeometryFailure {
            context: context.into(),
            reason: reason.into(),
        }
    }

    /// 是否为用户取消（取消不作为错误上报）
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::CancelledByUser)
    }
}

pub type BuildResult<T> = Result<T, BuildError>;
