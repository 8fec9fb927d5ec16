//! 组合建筑
//!
//! 重檐、楼阁等由多栋单体叠合而成。组合根只记录成员建筑的名称与偏移，
//! 装配树仍由调度器按单体分别持有；斗口、檐口、斗栱与彩画参数在成员间统一。

use crate::assembly::{AssemblyNode, AssemblyTree, NodeKind};
use crate::error::{BuildError, BuildResult};
use crate::math::{translation, Vector3};
use crate::mesh::Solid;
use crate::orchestrator::{BuildHandle, BuildOrchestrator};
use crate::params::{PaintStyle, ParameterSet, RoofStyle};
use crate::resolver::ConstraintResolver;
use serde::{Deserialize, Serialize};

/// 上檐金柱高与下檐柱高之比
const UPPER_PILLAR_RATIO: f64 = 0.5;
/// 柱高下限（DK）
const MIN_PILLAR_HEIGHT_DK: f64 = 20.0;

/// 成员间统一的参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedParams {
    pub dk: Option<f64>,
    pub reference_bay: Option<f64>,
    pub qiqiao: f64,
    pub chuchong: f64,
    pub use_flyrafter: bool,
    pub use_tile: bool,
    pub use_dougong: bool,
    pub dougong_spacing: f64,
    pub paint_style: PaintStyle,
}

impl SharedParams {
    pub fn from_params(params: &ParameterSet) -> Self {
        Self {
            dk: params.dk,
            reference_bay: params.reference_bay,
            qiqiao: params.qiqiao,
            chuchong: params.chuchong,
            use_flyrafter: params.use_flyrafter,
            use_tile: params.use_tile,
            use_dougong: params.use_dougong,
            dougong_spacing: params.dougong_spacing,
            paint_style: params.paint_style,
        }
    }

    /// 写入成员参数，返回是否有改动
    pub fn apply(&self, params: &mut ParameterSet) -> bool {
        let before = params.clone();
        params.dk = self.dk;
        params.reference_bay = self.reference_bay;
        params.qiqiao = self.qiqiao;
        params.chuchong = self.chuchong;
        params.use_flyrafter = self.use_flyrafter;
        params.use_tile = self.use_tile;
        params.use_dougong = self.use_dougong;
        params.dougong_spacing = self.dougong_spacing;
        params.paint_style = self.paint_style;
        *params != before
    }
}

/// 组合成员：建筑名称（引用）、相对组合根的偏移（米）与参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComboMember {
    pub building: String,
    pub offset: Vector3,
    pub params: ParameterSet,
}

/// 组合根
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComboRoot {
    pub name: String,
    shared: SharedParams,
    members: Vec<ComboMember>,
}

impl ComboRoot {
    pub fn new(name: impl Into<String>, shared: SharedParams) -> Self {
        Self {
            name: name.into(),
            shared,
            members: Vec::new(),
        }
    }

    /// 重檐：下檐为盝顶式的一圈腰檐，上檐收进一间，坐在下檐顶上
    pub fn double_eave(name: impl Into<String>, base: &ParameterSet) -> BuildResult<Self> {
        if base.x_rooms < 3 || base.y_rooms < 3 {
            return Err(BuildError::invalid(
                "x_rooms",
                format!(
                    "double eaves need at least 3x3 rooms, got {}x{}",
                    base.x_rooms, base.y_rooms
                ),
            ));
        }
        let name = name.into();
        let mut combo = Self::new(name.clone(), SharedParams::from_params(base));

        let lower = ParameterSet {
            roof_style: RoofStyle::FlatTopPyramid,
            rafter_count: None,
            rafter_span: None,
            tuishan: None,
            ..base.clone()
        };
        let resolved = ConstraintResolver::new().resolve(&lower)?;
        let lift = resolved.lifts.first().copied().unwrap_or(0.0) * resolved.rafter_span;
        let top = resolved.platform_height + resolved.pillar_height + resolved.dougong_height() + lift;

        let upper = ParameterSet {
            x_rooms: base.x_rooms - 2,
            y_rooms: base.y_rooms - 2,
            pillar_height: (base.pillar_height * UPPER_PILLAR_RATIO).max(MIN_PILLAR_HEIGHT_DK),
            platform_height: 0.0,
            platform_extend: 0.0,
            use_hallway: false,
            use_railing: false,
            removed_pillars: Default::default(),
            extra_pillars: Vec::new(),
            ..base.clone()
        };

        combo.add_member(format!("{}.lower", name), Vector3::zeros(), lower)?;
        combo.add_member(format!("{}.upper", name), Vector3::new(0.0, 0.0, top), upper)?;
        tracing::info!("Double eave {}: upper eave at {:.3} m", name, top);
        Ok(combo)
    }

    /// 楼阁：同一平面逐层叠起，只有首层带台基
    pub fn stacked(name: impl Into<String>, base: &ParameterSet, floors: u32) -> BuildResult<Self> {
        if floors == 0 {
            return Err(BuildError::invalid("floors", "at least one floor is required"));
        }
        let name = name.into();
        let mut combo = Self::new(name.clone(), SharedParams::from_params(base));
        let mut z = 0.0;
        for floor in 0..floors {
            let params = if floor == 0 {
                base.clone()
            } else {
                ParameterSet {
                    platform_height: 0.0,
                    platform_extend: 0.0,
                    use_railing: true,
                    ..base.clone()
                }
            };
            let resolved = ConstraintResolver::new().resolve(&params)?;
            combo.add_member(format!("{}.floor{}", name, floor + 1), Vector3::new(0.0, 0.0, z), params)?;
            z += resolved.platform_height + resolved.pillar_height + resolved.dougong_height();
        }
        Ok(combo)
    }

    /// 加入成员；统一参数覆盖成员自身的取值
    pub fn add_member(
        &mut self,
        building: impl Into<String>,
        offset: Vector3,
        mut params: ParameterSet,
    ) -> BuildResult<()> {
        let building = building.into();
        if self.member(&building).is_some() {
            return Err(BuildError::invalid(
                "building",
                format!("{} is already a member of {}", building, self.name),
            ));
        }
        self.shared.apply(&mut params);
        params.validate()?;
        self.members.push(ComboMember { building, offset, params });
        Ok(())
    }

    pub fn remove_member(&mut self, building: &str) -> Option<ComboMember> {
        let index = self.members.iter().position(|m| m.building == building)?;
        Some(self.members.remove(index))
    }

    pub fn members(&self) -> &[ComboMember] {
        &self.members
    }

    pub fn member(&self, building: &str) -> Option<&ComboMember> {
        self.members.iter().find(|m| m.building == building)
    }

    pub fn shared(&self) -> &SharedParams {
        &self.shared
    }

    /// 修改统一参数，返回参数有变化的成员
    pub fn set_shared(&mut self, shared: SharedParams) -> Vec<String> {
        self.shared = shared;
        self.members
            .iter_mut()
            .filter_map(|m| self.shared.apply(&mut m.params).then(|| m.building.clone()))
            .collect()
    }

    /// 以组合根为根的引用树：每个成员一个空的 `Building` 节点，变换即偏移
    pub fn reference_tree(&self) -> BuildResult<AssemblyTree> {
        let mut tree = AssemblyTree::with_root(AssemblyNode::new(NodeKind::ComboRoot, self.name.clone()));
        let root = tree.root();
        for member in &self.members {
            tree.add_child(
                root,
                AssemblyNode::new(NodeKind::Building, member.building.clone())
                    .with_transform(translation(member.offset)),
            )?;
        }
        Ok(tree)
    }

    /// 提交全部成员的构建
    pub async fn submit(&self, orchestrator: &BuildOrchestrator) -> BuildResult<Vec<BuildHandle>> {
        let mut handles = Vec::with_capacity(self.members.len());
        for member in &self.members {
            handles.push(orchestrator.submit(&member.building, member.params.clone()).await?);
        }
        Ok(handles)
    }

    /// 各成员已构建的几何，平移到组合根坐标；尚未构建的成员跳过
    pub async fn world_solids(&self, orchestrator: &BuildOrchestrator) -> Vec<Solid> {
        let mut solids = Vec::new();
        for member in &self.members {
            let Some(tree) = orchestrator.snapshot(&member.building).await else {
                tracing::warn!("Combo member {} has not been built", member.building);
                continue;
            };
            let offset = translation(member.offset);
            solids.extend(tree.world_solids().iter().map(|s| s.transformed(&offset)));
        }
        solids
    }
}
