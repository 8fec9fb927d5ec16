//! 构建调度
//!
//! 每栋建筑同一时间只有一个构建在进行：新的构建请求先取消上一个构建的令牌，
//! 再排队等待装配树的锁。构建在 tokio 阻塞线程上同步执行，阶段之间检查取消。
//!
//! 每次构建有自己的状态通道，由 [`BuildHandle`] 持有。

use crate::assembly::AssemblyTree;
use crate::builder::{AssemblyBuilder, BuildReport, Stage};
use crate::config::BuildConfig;
use crate::error::{BuildError, BuildResult};
use crate::params::ParameterSet;
use crate::progress::{watch_status, BuildStatus, FanoutSink, FileProgressSink, ProgressSink, WatchOutcome};
use crate::resolver::{ConstraintResolver, RebuildPlan, ResolvedParams};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::{self, JoinHandle};

/// 取消令牌
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 构建结束方式
#[derive(Debug, Clone, PartialEq)]
pub enum BuildOutcome {
    Completed(BuildReport),
    Cancelled,
}

/// 一栋建筑的装配树与上一次构建所用的参数
struct BuildingState {
    tree: AssemblyTree,
    last: Option<(ParameterSet, ResolvedParams)>,
}

struct BuildingSlot {
    state: Arc<Mutex<BuildingState>>,
    current: Mutex<Option<CancelToken>>,
}

/// 构建调度器
pub struct BuildOrchestrator {
    builder: Arc<AssemblyBuilder>,
    resolver: ConstraintResolver,
    buildings: RwLock<HashMap<String, Arc<BuildingSlot>>>,
    progress_file: Option<PathBuf>,
}

impl BuildOrchestrator {
    pub fn new(builder: AssemblyBuilder) -> Self {
        Self {
            builder: Arc::new(builder),
            resolver: ConstraintResolver::new(),
            buildings: RwLock::new(HashMap::new()),
            progress_file: None,
        }
    }

    /// 同时把进度写入文件，供外部进程轮询
    pub fn with_progress_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.progress_file = Some(path.into());
        self
    }

    pub fn config(&self) -> &BuildConfig {
        self.builder.config()
    }

    /// 提交构建请求
    ///
    /// 参数在调用线程上解析，非法参数直接返回错误，不会打断正在进行的构建。
    pub async fn submit(&self, building: &str, params: ParameterSet) -> BuildResult<BuildHandle> {
        let resolved = self.resolver.resolve(&params)?;
        let slot = self.slot(building).await;

        let cancel = CancelToken::new();
        {
            let mut current = slot.current.lock().await;
            if let Some(previous) = current.replace(cancel.clone()) {
                tracing::info!("Cancelling previous build of {}", building);
                previous.cancel();
            }
        }

        let (tx, rx) = watch::channel(BuildStatus::progress(0.0, "等待构建"));
        let mut sink = FanoutSink::new().with(tx);
        if let Some(path) = &self.progress_file {
            sink = sink.with(FileProgressSink::new(path.clone()));
        }

        let builder = self.builder.clone();
        let resolver = self.resolver;
        let state = slot.state.clone();
        let token = cancel.clone();
        let name = building.to_string();
        let join = task::spawn_blocking(move || {
            let mut state = state.blocking_lock();
            // 排队期间已被更新的请求取代，不动装配树
            if token.is_cancelled() {
                tracing::info!("Build of {} superseded before start", name);
                sink.report(BuildStatus::from_error(&BuildError::CancelledByUser));
                return Err(BuildError::CancelledByUser);
            }
            let plan = match &state.last {
                Some((old_params, old_resolved)) => {
                    resolver.plan_rebuild(old_params, old_resolved, &params, &resolved)
                }
                None => RebuildPlan::FromStage(Stage::Platform),
            };
            tracing::info!("Building {} with plan {:?}", name, plan);
            let result = builder.build(&mut state.tree, &resolved, plan, &token, &sink);
            // 已保留的阶段都与本次参数一致，取消或失败后也以本次参数为准
            state.last = Some((params, resolved));
            if let Err(e) = &result {
                sink.report(BuildStatus::from_error(e));
            }
            result
        });

        Ok(BuildHandle {
            cancel,
            status: rx,
            join,
            config: self.builder.config().clone(),
        })
    }

    /// 装配树快照（等待进行中的构建结束）
    pub async fn snapshot(&self, building: &str) -> Option<AssemblyTree> {
        let slot = self.buildings.read().await.get(building).cloned()?;
        let state = slot.state.lock().await;
        Some(state.tree.clone())
    }

    /// 删除一栋建筑，取消其进行中的构建
    pub async fn remove(&self, building: &str) -> bool {
        let Some(slot) = self.buildings.write().await.remove(building) else {
            return false;
        };
        if let Some(token) = slot.current.lock().await.take() {
            token.cancel();
        }
        true
    }

    pub async fn buildings(&self) -> Vec<String> {
        let mut names: Vec<String> = self.buildings.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    async fn slot(&self, building: &str) -> Arc<BuildingSlot> {
        if let Some(slot) = self.buildings.read().await.get(building) {
            return slot.clone();
        }
        let mut buildings = self.buildings.write().await;
        buildings
            .entry(building.to_string())
            .or_insert_with(|| {
                tracing::debug!("New building slot {}", building);
                Arc::new(BuildingSlot {
                    state: Arc::new(Mutex::new(BuildingState {
                        tree: AssemblyTree::new(building),
                        last: None,
                    })),
                    current: Mutex::new(None),
                })
            })
            .clone()
    }
}

/// 一次构建的句柄
pub struct BuildHandle {
    cancel: CancelToken,
    status: watch::Receiver<BuildStatus>,
    join: JoinHandle<BuildResult<BuildReport>>,
    config: BuildConfig,
}

impl BuildHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn status(&self) -> BuildStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BuildStatus> {
        self.status.clone()
    }

    /// 等待构建结束
    ///
    /// 长时间收不到进度时取消构建并返回 `StageTimeout`；用户取消返回 `Cancelled`。
    pub async fn wait(self) -> BuildResult<BuildOutcome> {
        let watched = watch_status(self.status.clone(), &self.config).await;
        if let Err(e) = &watched {
            tracing::error!("Build stalled: {}", e);
            self.cancel.cancel();
        }

        let joined = self
            .join
            .await
            .map_err(|e| BuildError::geometry("build task", e.to_string()))?;
        watched?;

        match joined {
            Ok(report) => Ok(BuildOutcome::Completed(report)),
            Err(BuildError::CancelledByUser) => Ok(BuildOutcome::Cancelled),
            Err(e) => Err(e),
        }
    }

    /// 只看状态通道给出的终止状态，不等待构建线程
    pub async fn watch(&self) -> BuildResult<WatchOutcome> {
        watch_status(self.status.clone(), &self.config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::NodeKind;
    use crate::params::RoofStyle;

    fn gable_3x1() -> ParameterSet {
        ParameterSet {
            dk: Some(1.0),
            x_rooms: 3,
            y_rooms: 1,
            roof_style: RoofStyle::Gable,
            ..Default::default()
        }
    }

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn test_submit_and_rebuild() {
        let orchestrator = BuildOrchestrator::new(AssemblyBuilder::default());
        let handle = orchestrator.submit("hall", gable_3x1()).await.unwrap();
        let BuildOutcome::Completed(report) = handle.wait().await.unwrap() else {
            panic!("first build cancelled");
        };
        assert_eq!(report.stages_built, Stage::ALL.to_vec());

        let changed = ParameterSet { roof_style: RoofStyle::FlushGable, ..gable_3x1() };
        let handle = orchestrator.submit("hall", changed).await.unwrap();
        let BuildOutcome::Completed(report) = handle.wait().await.unwrap() else {
            panic!("rebuild cancelled");
        };
        assert_eq!(report.stages_built.first(), Some(&Stage::RoofFrame));

        let tree = orchestrator.snapshot("hall").await.unwrap();
        assert_eq!(tree.count_kind(NodeKind::Platform), 1);
        assert_eq!(orchestrator.buildings().await, vec!["hall".to_string()]);
    }

    #[tokio::test]
    async fn test_invalid_params_rejected_up_front() {
        let orchestrator = BuildOrchestrator::new(AssemblyBuilder::default());
        let params = ParameterSet { x_rooms: 0, ..gable_3x1() };
        let result = orchestrator.submit("hall", params).await;
        assert!(matches!(result, Err(BuildError::InvalidParameter { .. })));
        assert!(orchestrator.snapshot("hall").await.is_none());
    }

    #[tokio::test]
    async fn test_newer_request_wins() {
        let orchestrator = BuildOrchestrator::new(AssemblyBuilder::default());
        let first = orchestrator.submit("hall", gable_3x1()).await.unwrap();
        let pyramid = ParameterSet {
            roof_style: RoofStyle::Pyramid,
            x_rooms: 3,
            y_rooms: 3,
            x_widths: vec![66.0, 44.0],
            ..Default::default()
        };
        let second = orchestrator.submit("hall", pyramid).await.unwrap();

        // 先提交的构建可能已完成，也可能在阶段之间被取消
        let outcome = first.wait().await.unwrap();
        assert!(matches!(outcome, BuildOutcome::Completed(_) | BuildOutcome::Cancelled));
        assert!(matches!(second.wait().await.unwrap(), BuildOutcome::Completed(_)));

        let tree = orchestrator.snapshot("hall").await.unwrap();
        assert_eq!(tree.built_stages(), Stage::ALL.to_vec());
        assert!(!tree.is_stale());
        assert!(tree.find_kind(NodeKind::Ridge).iter().any(|id| tree.get(*id).is_some_and(|n| n.name == "finial")));
    }

    #[tokio::test]
    async fn test_superseded_build_reports_cancelled() {
        let orchestrator = BuildOrchestrator::new(AssemblyBuilder::default());
        let slot = orchestrator.slot("hall").await;
        // 占住装配树，让第一个请求排队时被取代
        let guard = slot.state.lock().await;
        let first = orchestrator.submit("hall", gable_3x1()).await.unwrap();
        let second = orchestrator.submit("hall", gable_3x1()).await.unwrap();
        drop(guard);

        assert_eq!(first.watch().await.unwrap(), WatchOutcome::Cancelled);
        assert!(matches!(first.status(), BuildStatus::Cancelled { .. }));
        assert_eq!(BuildStatus::parse(&first.status().to_protocol()), Some(first.status()));
        assert_eq!(first.wait().await.unwrap(), BuildOutcome::Cancelled);
        assert!(matches!(second.wait().await.unwrap(), BuildOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_remove_building() {
        let orchestrator = BuildOrchestrator::new(AssemblyBuilder::default());
        let handle = orchestrator.submit("hall", gable_3x1()).await.unwrap();
        handle.wait().await.unwrap();
        assert!(orchestrator.remove("hall").await);
        assert!(!orchestrator.remove("hall").await);
        assert!(orchestrator.buildings().await.is_empty());
    }
}
