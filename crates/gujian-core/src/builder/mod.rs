//! 分阶段装配构建
//!
//! 构建严格自上而下分为八个阶段：台基 → 柱网 → 墙体 → 屋架 → 斗栱 → 梁 → 椽 → 瓦。
//! 每个阶段在建筑根节点下拥有一个阶段根节点，阶段内的构件都挂在它下面。
//! 后面的阶段只从前面阶段的结果取位置（柱位从柱节点读回，屋架布局由参数纯计算）。
//!
//! 局部重建时，首个受影响阶段及其下游的阶段子树逐个替换，新子树建成后才删除旧子树，
//! 上游阶段的节点 id 与变换保持不变。

pub mod beams;
pub mod dougong;
pub mod pillars;
pub mod platform;
pub mod rafters;
pub mod roof;
pub mod tiles;
pub mod walls;

pub use pillars::PillarLayout;
pub use roof::FrameLayout;

use crate::assembly::{AssemblyNode, AssemblyTree, NodeId, NodeKind, NodeState};
use crate::asset::{AssetProvider, NoAssets};
use crate::config::BuildConfig;
use crate::error::{BuildError, BuildResult};
use crate::math::{Matrix4, Point3};
use crate::mesh::Solid;
use crate::orchestrator::CancelToken;
use crate::progress::{BuildStatus, ProgressSink};
use crate::resolver::{RebuildPlan, ResolvedParams};
use crate::symmetry::DiagonalMirror;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 构建阶段
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Stage {
    Platform,
    PillarGrid,
    Walls,
    RoofFrame,
    BucketArches,
    Beams,
    Rafters,
    Tiles,
}

impl Stage {
    /// 按构建顺序排列的全部阶段
    pub const ALL: [Stage; 8] = [
        Stage::Platform,
        Stage::PillarGrid,
        Stage::Walls,
        Stage::RoofFrame,
        Stage::BucketArches,
        Stage::Beams,
        Stage::Rafters,
        Stage::Tiles,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Stage::Platform => "台基",
            Stage::PillarGrid => "柱网",
            Stage::Walls => "墙体",
            Stage::RoofFrame => "屋架",
            Stage::BucketArches => "斗栱",
            Stage::Beams => "梁架",
            Stage::Rafters => "椽望",
            Stage::Tiles => "瓦面",
        }
    }

    /// 直接影响该阶段的参数字段
    ///
    /// 字段变化时从依赖它的最早阶段开始重建；下游阶段总是随之重建，
    /// 因此这里只列出首次引入该字段的阶段。
    pub fn dependencies(&self) -> &'static [&'static str] {
        match self {
            Stage::Platform => &[
                "x_rooms",
                "y_rooms",
                "x_widths",
                "y_depths",
                "platform_height",
                "platform_extend",
                "use_hallway",
                "hallway_depth",
                "use_railing",
            ],
            Stage::PillarGrid => &[
                "pillar_height",
                "pillar_diameter",
                "removed_pillars",
                "extra_pillars",
            ],
            Stage::Walls => &[],
            Stage::RoofFrame => &[
                "roof_style",
                "rafter_count",
                "rafter_span",
                "tuishan",
                "qiqiao",
                "chuchong",
                "use_dougong",
            ],
            Stage::BucketArches => &["dougong_spacing"],
            Stage::Beams => &[],
            Stage::Rafters => &["use_flyrafter"],
            Stage::Tiles => &["use_tile", "paint_style"],
        }
    }

    /// 阶段根节点的类型
    pub fn root_kind(&self) -> NodeKind {
        match self {
            Stage::Platform => NodeKind::Platform,
            Stage::PillarGrid => NodeKind::PillarGrid,
            Stage::Walls => NodeKind::WallGroup,
            Stage::RoofFrame => NodeKind::RoofFrame,
            Stage::BucketArches => NodeKind::BucketArchGrid,
            Stage::Beams => NodeKind::BeamGroup,
            Stage::Rafters => NodeKind::RafterGroup,
            Stage::Tiles => NodeKind::TileGroup,
        }
    }

    fn run(&self, ctx: &mut StageContext) -> BuildResult<()> {
        match self {
            Stage::Platform => platform::build(ctx),
            Stage::PillarGrid => pillars::build(ctx),
            Stage::Walls => walls::build(ctx),
            Stage::RoofFrame => roof::build(ctx),
            Stage::BucketArches => dougong::build(ctx),
            Stage::Beams => beams::build(ctx),
            Stage::Rafters => rafters::build(ctx),
            Stage::Tiles => tiles::build(ctx),
        }
    }
}

/// 单个阶段的构建上下文
pub struct StageContext<'a> {
    pub tree: &'a mut AssemblyTree,
    /// 本阶段根节点
    pub root: NodeId,
    pub params: &'a ResolvedParams,
    pub config: &'a BuildConfig,
    pub assets: &'a dyn AssetProvider,
    pub frame: &'a FrameLayout,
}

impl StageContext<'_> {
    /// 在阶段根下添加节点
    pub fn add(&mut self, node: AssemblyNode) -> BuildResult<NodeId> {
        self.tree.add_child(self.root, node)
    }

    pub fn add_to(&mut self, parent: NodeId, node: AssemblyNode) -> BuildResult<NodeId> {
        self.tree.add_child(parent, node)
    }

    /// 从柱网阶段读回柱位
    pub fn pillar_layout(&self) -> BuildResult<PillarLayout> {
        PillarLayout::read_back(&*self.tree)
    }

    pub fn segments(&self) -> usize {
        self.config.cylinder_segments
    }

    /// 阶段根局部坐标下的对角镜像矩阵
    pub fn diagonal_mirror(&self, pivot_local: &Point3) -> Matrix4 {
        let world = self.tree.world_transform(self.root);
        let mirror = DiagonalMirror::new(&world, pivot_local);
        match world.try_inverse() {
            Some(inverse) => inverse * mirror.matrix * world,
            None => mirror.matrix,
        }
    }

    /// 节点实体（含阵列实例）转到阶段根局部坐标
    pub fn local_solids(&self, ids: &[NodeId]) -> Vec<Solid> {
        let inverse = self
            .tree
            .world_transform(self.root)
            .try_inverse()
            .unwrap_or_else(Matrix4::identity);
        ids.iter()
            .flat_map(|id| self.tree.node_world_solids(*id))
            .map(|solid| solid.transformed(&inverse))
            .collect()
    }
}

/// 构建结果摘要
#[derive(Debug, Clone, PartialEq)]
pub struct BuildReport {
    /// 本次实际构建的阶段
    pub stages_built: Vec<Stage>,
    /// 仅缩放时的比例
    pub rescaled: Option<f64>,
    pub node_count: usize,
    pub elapsed: Duration,
}

/// 分阶段装配构建器
#[derive(Clone)]
pub struct AssemblyBuilder {
    config: BuildConfig,
    assets: Arc<dyn AssetProvider>,
}

impl Default for AssemblyBuilder {
    fn default() -> Self {
        Self::new(BuildConfig::default())
    }
}

impl AssemblyBuilder {
    pub fn new(config: BuildConfig) -> Self {
        Self {
            config,
            assets: Arc::new(NoAssets),
        }
    }

    pub fn with_assets(mut self, assets: Arc<dyn AssetProvider>) -> Self {
        self.assets = assets;
        self
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// 按重建方案构建装配树
    ///
    /// 阶段之间检查取消令牌；取消时已完成的阶段保持 `Built`，其余阶段不存在。
    /// 阶段失败时保留该阶段及下游的旧子树，失败阶段的根节点置为 `Failed`，
    /// 装配树标记为过期。
    pub fn build(
        &self,
        tree: &mut AssemblyTree,
        params: &ResolvedParams,
        plan: RebuildPlan,
        cancel: &CancelToken,
        sink: &dyn ProgressSink,
    ) -> BuildResult<BuildReport> {
        let started = Instant::now();
        let built = tree.built_stages();
        let complete = built.len() == Stage::ALL.len() && !tree.is_stale();
        let first_missing = Stage::ALL.into_iter().find(|stage| !built.contains(stage));

        let first = match plan {
            RebuildPlan::Nothing if complete => {
                tracing::debug!("Assembly is up to date");
                sink.report(BuildStatus::Succeeded { message: None });
                return Ok(self.report(tree, Vec::new(), None, started));
            }
            RebuildPlan::Nothing => first_missing.unwrap_or(Stage::Platform),
            RebuildPlan::Rescale(factor) if complete => {
                self.rescale(tree, factor)?;
                sink.report(BuildStatus::Succeeded {
                    message: Some(format!("rescaled by {:.4}", factor)),
                });
                return Ok(self.report(tree, Vec::new(), Some(factor), started));
            }
            // 部分阶段缺失时已有阶段的尺度与新参数不一致，只能全部重建
            RebuildPlan::Rescale(_) => Stage::Platform,
            RebuildPlan::FromStage(stage) => match first_missing {
                Some(missing) if missing < stage => missing,
                _ => stage,
            },
        };

        let frame = FrameLayout::compute(params, &self.config)?;
        let stages: Vec<Stage> = Stage::ALL.into_iter().filter(|s| *s >= first).collect();

        let total = stages.len();
        let mut done = Vec::with_capacity(total);
        for (i, stage) in stages.iter().copied().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!("Build cancelled before stage {}", stage.label());
                // 未重建的旧阶段与已重建的上游不一致
                for pending in &stages[i..] {
                    if let Some(old) = tree.stage_root(*pending) {
                        let removed = tree.remove_subtree(old);
                        tracing::debug!("Removed {} nodes of stage {}", removed, pending.label());
                    }
                }
                tree.mark_stale(true);
                return Err(BuildError::CancelledByUser);
            }
            sink.report(BuildStatus::progress(
                i as f64 / total as f64,
                format!("构建{}", stage.label()),
            ));
            self.run_stage(tree, params, &frame, stage)?;
            done.push(stage);
        }

        tree.mark_stale(false);
        let report = self.report(tree, done, None, started);
        tracing::info!(
            "Built {} stages, {} nodes in {:?}",
            report.stages_built.len(),
            report.node_count,
            report.elapsed
        );
        sink.report(BuildStatus::Succeeded { message: None });
        Ok(report)
    }

    /// 构建单个阶段
    ///
    /// 新子树建成后才删除旧子树；失败时丢弃新子树，旧子树保留并置为 `Failed`。
    fn run_stage(
        &self,
        tree: &mut AssemblyTree,
        params: &ResolvedParams,
        frame: &FrameLayout,
        stage: Stage,
    ) -> BuildResult<()> {
        let stage_started = Instant::now();
        let old = tree.stage_root(stage);
        if let Some(old) = old {
            tree.set_state(old, NodeState::Rebuilding)?;
        }
        let building = tree.root();
        let root = tree.add_child(building, AssemblyNode::new(stage.root_kind(), stage.label()))?;
        tree.set_stage_root(stage, root);
        tree.set_state(root, NodeState::Building)?;

        let result = {
            let mut ctx = StageContext {
                tree: &mut *tree,
                root,
                params,
                config: &self.config,
                assets: self.assets.as_ref(),
                frame,
            };
            stage.run(&mut ctx)
        };

        match result {
            Ok(()) => {
                tree.mark_subtree_built(root);
                if let Some(old) = old {
                    let removed = tree.remove_subtree(old);
                    tracing::debug!("Replaced {} nodes of stage {}", removed, stage.label());
                }
                tracing::debug!(
                    "Stage {} built {} nodes in {:?}",
                    stage.label(),
                    tree.descendants(root).len(),
                    stage_started.elapsed()
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!("Stage {} failed: {}", stage.label(), e);
                let failed = match old {
                    Some(old) => {
                        tree.remove_subtree(root);
                        tree.set_stage_root(stage, old);
                        old
                    }
                    None => root,
                };
                tree.set_state(failed, NodeState::Failed)?;
                tree.mark_stale(true);
                Err(e)
            }
        }
    }

    /// 只改斗口：各阶段根经 `Rebuilding` 回到 `Built`，拓扑不变
    fn rescale(&self, tree: &mut AssemblyTree, factor: f64) -> BuildResult<()> {
        let roots: Vec<NodeId> = Stage::ALL.iter().filter_map(|s| tree.stage_root(*s)).collect();
        for root in &roots {
            tree.set_state(*root, NodeState::Rebuilding)?;
        }
        tree.rescale(factor);
        for root in &roots {
            tree.set_state(*root, NodeState::Built)?;
        }
        tracing::info!("Rescaled assembly by {:.4}", factor);
        Ok(())
    }

    fn report(
        &self,
        tree: &AssemblyTree,
        stages_built: Vec<Stage>,
        rescaled: Option<f64>,
        started: Instant,
    ) -> BuildReport {
        BuildReport {
            stages_built,
            rescaled,
            node_count: tree.len(),
            elapsed: started.elapsed(),
        }
    }
}
