//! 古建参数化构造引擎
//!
//! 由少量高层参数（斗口、开间数、屋顶形制）生成完整的古建木构装配树。
//!
//! # 架构设计
//!
//! 数据自上而下单向流动：
//! - `params` / `resolver`: 参数模式、校验与推导
//! - `builder`: 分阶段构建装配树（台基 → 柱网 → 墙体 → 屋架 → 斗栱 → 梁 → 椽 → 瓦）
//! - `curve` / `elevation` / `silhouette` / `symmetry`: 构建所用的几何算子
//! - `orchestrator` / `progress`: 异步构建、取消与进度监视
//!
//! # 示例
//!
//! ```rust,no_run
//! use gujian_core::prelude::*;
//!
//! # async fn run() -> BuildResult<()> {
//! let orchestrator = BuildOrchestrator::new(AssemblyBuilder::default());
//! let params = ParameterSet { roof_style: RoofStyle::Gable, y_rooms: 1, ..Default::default() };
//! let handle = orchestrator.submit("hall", params).await?;
//! if let BuildOutcome::Completed(report) = handle.wait().await? {
//!     println!("Built {} nodes", report.node_count);
//! }
//! # Ok(())
//! # }
//! ```

pub mod assembly;
pub mod asset;
pub mod builder;
pub mod combo;
pub mod config;
pub mod curve;
pub mod elevation;
pub mod error;
pub mod math;
pub mod mesh;
pub mod orchestrator;
pub mod params;
pub mod progress;
pub mod resolver;
pub mod silhouette;
pub mod symmetry;

pub mod prelude {
    //! 常用类型的便捷导入
    pub use crate::assembly::{AssemblyNode, AssemblyTree, InstanceRule, NodeId, NodeKind, NodeState, Payload};
    pub use crate::asset::{AssetHandle, AssetLibrary, AssetProvider, NoAssets};
    pub use crate::builder::{AssemblyBuilder, BuildReport, Stage};
    pub use crate::combo::{ComboMember, ComboRoot, SharedParams};
    pub use crate::config::BuildConfig;
    pub use crate::curve::{CrossSection, CubicBezier, CurveDescriptor, EndpointMode, NurbsCurve};
    pub use crate::error::{BuildError, BuildResult};
    pub use crate::math::{Matrix4, Point2, Point3, Vector2, Vector3};
    pub use crate::mesh::Solid;
    pub use crate::orchestrator::{BuildHandle, BuildOrchestrator, BuildOutcome, CancelToken};
    pub use crate::params::{GridCell, PaintStyle, ParameterSet, RoofStyle};
    pub use crate::progress::{BuildStatus, FileProgressSink, ProgressSink, WatchOutcome};
    pub use crate::resolver::{ConstraintResolver, RebuildPlan, ResolvedParams};
    pub use crate::silhouette::{ProjectionPlane, SilhouetteMode, SilhouettePolygon};
    pub use crate::symmetry::DiagonalMirror;
}
