//! 装配树
//!
//! 建筑由节点树描述：每个节点有类型标签、相对父节点的变换、几何载荷、
//! 可选的阵列/镜像规则与构建状态。节点存放在 slotmap 竞技场中，
//! 以稳定的 [`NodeId`] 引用；父子关系用 id 表示，删除节点时级联删除全部后代。

use crate::asset::AssetHandle;
use crate::builder::Stage;
use crate::curve::CurveDescriptor;
use crate::error::{BuildError, BuildResult};
use crate::math::{clamp_scale, Matrix4, Point3, Vector3};
use crate::mesh::Solid;
use crate::silhouette::SilhouettePolygon;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use slotmap::{new_key_type, SlotMap};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

new_key_type! {
    /// 装配节点键
    pub struct NodeId;
}

/// 节点类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKind {
    Building,
    ComboRoot,
    Platform,
    Step,
    Railing,
    PillarGrid,
    Pillar,
    Plinth,
    WallGroup,
    Wall,
    RoofFrame,
    Purlin,
    Ridge,
    EaveCurve,
    CornerBeam,
    GableBoard,
    BucketArchGrid,
    BucketArch,
    BeamGroup,
    Beam,
    ShortPost,
    RafterGroup,
    Rafter,
    FlyRafter,
    FanRafter,
    Fascia,
    RoofBoard,
    TileGroup,
    TileRow,
    RoofOutline,
    Asset,
}

/// 节点构建状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    Unbuilt,
    Building,
    Built,
    Rebuilding,
    Failed,
}

impl NodeState {
    /// 合法的状态迁移
    pub fn can_transition_to(self, next: NodeState) -> bool {
        use NodeState::*;
        matches!(
            (self, next),
            (Unbuilt, Building)
                | (Building, Built)
                | (Building, Failed)
                | (Built, Rebuilding)
                | (Rebuilding, Built)
                | (Rebuilding, Failed)
                | (Failed, Rebuilding)
        )
    }
}

/// 声明式阵列规则
///
/// 三个阵列维度，第 d 维有 `counts[d]` 个实例，相邻实例相差 `offsets[d]`；
/// `mirror_x` / `mirror_y` 在过 `pivot` 的 X=常数 / Y=常数 平面上再镜像一份。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InstanceRule {
    pub counts: [u32; 3],
    pub offsets: [Vector3; 3],
    pub mirror_x: bool,
    pub mirror_y: bool,
    pub pivot: Point3,
}

impl InstanceRule {
    /// 沿任意方向的线性阵列
    pub fn along(count: u32, offset: Vector3) -> Self {
        Self {
            counts: [count.max(1), 1, 1],
            offsets: [offset, Vector3::zeros(), Vector3::zeros()],
            mirror_x: false,
            mirror_y: false,
            pivot: Point3::origin(),
        }
    }

    /// 沿X方向的线性阵列
    pub fn linear_x(count: u32, spacing: f64) -> Self {
        Self::along(count, Vector3::new(spacing, 0.0, 0.0))
    }

    /// 沿Y方向的线性阵列
    pub fn linear_y(count: u32, spacing: f64) -> Self {
        Self::along(count, Vector3::new(0.0, spacing, 0.0))
    }

    /// 单个实例加镜像
    pub fn mirrored(mirror_x: bool, mirror_y: bool, pivot: Point3) -> Self {
        Self::along(1, Vector3::zeros()).with_mirror(mirror_x, mirror_y, pivot)
    }

    /// 增加第二个阵列维度
    pub fn then_along(mut self, count: u32, offset: Vector3) -> Self {
        self.counts[1] = count.max(1);
        self.offsets[1] = offset;
        self
    }

    pub fn with_mirror(mut self, mirror_x: bool, mirror_y: bool, pivot: Point3) -> Self {
        self.mirror_x = mirror_x;
        self.mirror_y = mirror_y;
        self.pivot = pivot;
        self
    }

    pub fn instance_count(&self) -> usize {
        let base: usize = self.counts.iter().map(|c| *c as usize).product();
        base * if self.mirror_x { 2 } else { 1 } * if self.mirror_y { 2 } else { 1 }
    }

    /// 展开为各实例相对节点的变换
    pub fn transforms(&self) -> Vec<Matrix4> {
        let mut result = Vec::with_capacity(self.instance_count());
        for i in 0..self.counts[0] {
            for j in 0..self.counts[1] {
                for k in 0..self.counts[2] {
                    let offset = self.offsets[0] * i as f64
                        + self.offsets[1] * j as f64
                        + self.offsets[2] * k as f64;
                    result.push(Matrix4::new_translation(&offset));
                }
            }
        }
        if self.mirror_x {
            let m = mirror_about(self.pivot, Vector3::new(-1.0, 1.0, 1.0));
            let copies: Vec<_> = result.iter().map(|t| m * t).collect();
            result.extend(copies);
        }
        if self.mirror_y {
            let m = mirror_about(self.pivot, Vector3::new(1.0, -1.0, 1.0));
            let copies: Vec<_> = result.iter().map(|t| m * t).collect();
            result.extend(copies);
        }
        result
    }

    pub fn scale(&mut self, factor: f64) {
        for offset in &mut self.offsets {
            *offset *= factor;
        }
        self.pivot.coords *= factor;
    }
}

fn mirror_about(pivot: Point3, diagonal: Vector3) -> Matrix4 {
    Matrix4::new_translation(&pivot.coords)
        * Matrix4::new_nonuniform_scaling(&diagonal)
        * Matrix4::new_translation(&-pivot.coords)
}

/// 几何载荷
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Payload {
    #[default]
    None,
    Solid(Solid),
    Curve(CurveDescriptor),
    Outline(SilhouettePolygon),
    Asset(AssetHandle),
}

impl Payload {
    pub fn as_solid(&self) -> Option<&Solid> {
        match self {
            Payload::Solid(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_curve(&self) -> Option<&CurveDescriptor> {
        match self {
            Payload::Curve(c) => Some(c),
            _ => None,
        }
    }

    fn scale(&mut self, factor: f64) {
        match self {
            Payload::None => {}
            Payload::Solid(s) => s.scale(factor),
            Payload::Curve(c) => c.scale(factor),
            Payload::Outline(o) => o.scale(factor),
            Payload::Asset(a) => a.rescale(factor),
        }
    }

    fn hash_into(&self, hasher: &mut DefaultHasher) {
        match self {
            Payload::None => 0u8.hash(hasher),
            Payload::Solid(s) => s.geometry_hash().hash(hasher),
            Payload::Curve(c) => {
                for p in c.sample() {
                    hash_coords(p.iter(), hasher);
                }
            }
            Payload::Outline(o) => {
                for p in &o.points {
                    hash_coords(p.iter(), hasher);
                }
            }
            Payload::Asset(a) => a.name.hash(hasher),
        }
    }
}

fn hash_coords<'a>(values: impl Iterator<Item = &'a f64>, hasher: &mut DefaultHasher) {
    for v in values {
        ((v / 1e-6).round() as i64).hash(hasher);
    }
}

/// 装配节点
#[derive(Debug, Clone, PartialEq)]
pub struct AssemblyNode {
    pub kind: NodeKind,
    pub name: String,
    /// 相对父节点的变换
    pub transform: Matrix4,
    pub payload: Payload,
    pub instance: Option<InstanceRule>,
    pub state: NodeState,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl AssemblyNode {
    pub fn new(kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            transform: Matrix4::identity(),
            payload: Payload::None,
            instance: None,
            state: NodeState::Unbuilt,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn with_transform(mut self, transform: Matrix4) -> Self {
        self.transform = transform;
        self
    }

    pub fn at(self, offset: Vector3) -> Self {
        self.with_transform(Matrix4::new_translation(&offset))
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_solid(self, solid: Solid) -> Self {
        self.with_payload(Payload::Solid(solid))
    }

    pub fn with_instances(mut self, rule: InstanceRule) -> Self {
        self.instance = Some(rule);
        self
    }

    /// 实例展开后的数量（无规则时为1）
    pub fn instance_count(&self) -> usize {
        self.instance.map(|r| r.instance_count()).unwrap_or(1)
    }
}

/// 装配树
#[derive(Debug, Clone)]
pub struct AssemblyTree {
    nodes: SlotMap<NodeId, AssemblyNode>,
    root: NodeId,
    stage_roots: BTreeMap<Stage, NodeId>,
    stale: bool,
}

impl AssemblyTree {
    /// 以 `Building` 节点为根创建空树
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_root(AssemblyNode::new(NodeKind::Building, name))
    }

    pub fn with_root(root: AssemblyNode) -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(root);
        Self {
            nodes,
            root,
            stage_roots: BTreeMap::new(),
            stale: false,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get(&self, id: NodeId) -> Option<&AssemblyNode> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut AssemblyNode> {
        self.nodes.get_mut(id)
    }

    fn node(&self, id: NodeId) -> BuildResult<&AssemblyNode> {
        self.nodes
            .get(id)
            .ok_or_else(|| BuildError::geometry("assembly", format!("node {:?} does not exist", id)))
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes.get(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// 添加子节点
    pub fn add_child(&mut self, parent: NodeId, mut node: AssemblyNode) -> BuildResult<NodeId> {
        self.node(parent)?;
        node.parent = Some(parent);
        let id = self.nodes.insert(node);
        if let Some(p) = self.nodes.get_mut(parent) {
            p.children.push(id);
        }
        Ok(id)
    }

    /// 删除节点及其全部后代，返回删除的节点数
    pub fn remove_subtree(&mut self, id: NodeId) -> usize {
        if id == self.root || !self.nodes.contains_key(id) {
            return 0;
        }
        let doomed = self.descendants(id);
        if let Some(parent) = self.nodes[id].parent {
            if let Some(p) = self.nodes.get_mut(parent) {
                p.children.retain(|c| *c != id);
            }
        }
        for node in &doomed {
            self.nodes.remove(*node);
        }
        self.stage_roots.retain(|_, root| !doomed.contains(root));
        doomed.len()
    }

    /// 前序遍历的后代（含自身）
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(current) {
                result.push(current);
                stack.extend(node.children.iter().rev());
            }
        }
        result
    }

    /// 世界变换：自根向下累乘
    pub fn world_transform(&self, id: NodeId) -> Matrix4 {
        let mut chain = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            match self.nodes.get(current) {
                Some(node) => {
                    chain.push(node.transform);
                    cursor = node.parent;
                }
                None => break,
            }
        }
        chain.iter().rev().fold(Matrix4::identity(), |acc, t| acc * t)
    }

    /// 迁移节点状态，非法迁移被拒绝
    pub fn set_state(&mut self, id: NodeId, next: NodeState) -> BuildResult<()> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| BuildError::geometry("assembly", format!("node {:?} does not exist", id)))?;
        if !node.state.can_transition_to(next) {
            return Err(BuildError::geometry(
                "assembly",
                format!("invalid state transition {:?} -> {:?} on '{}'", node.state, next, node.name),
            ));
        }
        node.state = next;
        Ok(())
    }

    /// 子树内全部节点直接置为 `Built`（阶段完成时调用）
    pub fn mark_subtree_built(&mut self, id: NodeId) {
        for node in self.descendants(id) {
            if let Some(n) = self.nodes.get_mut(node) {
                n.state = NodeState::Built;
            }
        }
    }

    pub fn stage_root(&self, stage: Stage) -> Option<NodeId> {
        self.stage_roots.get(&stage).copied()
    }

    pub fn set_stage_root(&mut self, stage: Stage, id: NodeId) {
        self.stage_roots.insert(stage, id);
    }

    /// 已有根节点的阶段
    pub fn built_stages(&self) -> Vec<Stage> {
        self.stage_roots
            .iter()
            .filter(|(_, id)| self.nodes.get(**id).is_some_and(|n| n.state == NodeState::Built))
            .map(|(stage, _)| *stage)
            .collect()
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn mark_stale(&mut self, stale: bool) {
        self.stale = stale;
    }

    pub fn find_kind(&self, kind: NodeKind) -> Vec<NodeId> {
        self.descendants(self.root)
            .into_iter()
            .filter(|id| self.nodes[*id].kind == kind)
            .collect()
    }

    pub fn count_kind(&self, kind: NodeKind) -> usize {
        self.nodes.values().filter(|n| n.kind == kind).count()
    }

    /// 在子树中查找第一个该类型的节点
    pub fn find_in(&self, id: NodeId, kind: NodeKind) -> Option<NodeId> {
        self.descendants(id).into_iter().find(|n| self.nodes[*n].kind == kind)
    }

    /// 斗口变化时整体缩放：平移、载荷、阵列规则同比例调整，拓扑不变
    pub fn rescale(&mut self, factor: f64) {
        let factor = clamp_scale(factor);
        for node in self.nodes.values_mut() {
            let t = node.transform.fixed_view::<3, 1>(0, 3) * factor;
            node.transform.fixed_view_mut::<3, 1>(0, 3).copy_from(&t);
            node.payload.scale(factor);
            if let Some(rule) = &mut node.instance {
                rule.scale(factor);
            }
        }
    }

    /// 子树几何哈希（变换、载荷、阵列规则）
    pub fn subtree_hash(&self, id: NodeId) -> u64 {
        let mut hasher = DefaultHasher::new();
        for node_id in self.descendants(id) {
            let node = &self.nodes[node_id];
            node.kind.hash(&mut hasher);
            hash_coords(node.transform.iter(), &mut hasher);
            node.payload.hash_into(&mut hasher);
            if let Some(rule) = &node.instance {
                for m in rule.transforms() {
                    hash_coords(m.iter(), &mut hasher);
                }
            }
        }
        hasher.finish()
    }

    /// 单个节点的实体展开到世界坐标（含阵列实例）
    pub fn node_world_solids(&self, id: NodeId) -> Vec<Solid> {
        let Some(node) = self.nodes.get(id) else {
            return Vec::new();
        };
        let Some(solid) = node.payload.as_solid() else {
            return Vec::new();
        };
        let world = self.world_transform(id);
        match node.instance {
            Some(rule) => rule
                .transforms()
                .iter()
                .map(|inst| solid.transformed(&(world * inst)))
                .collect(),
            None => vec![solid.transformed(&world)],
        }
    }

    /// 展开全部实体到世界坐标
    pub fn world_solids(&self) -> Vec<Solid> {
        let ids: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, n)| matches!(n.payload, Payload::Solid(_)))
            .map(|(id, _)| id)
            .collect();
        ids.par_iter()
            .flat_map_iter(|id| self.node_world_solids(*id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        use NodeState::*;
        assert!(Unbuilt.can_transition_to(Building));
        assert!(Building.can_transition_to(Failed));
        assert!(Built.can_transition_to(Rebuilding));
        assert!(!Unbuilt.can_transition_to(Built));
        assert!(!Failed.can_transition_to(Built));
        assert!(Failed.can_transition_to(Rebuilding));

        let mut tree = AssemblyTree::new("test");
        let root = tree.root();
        assert!(tree.set_state(root, Built).is_err());
        tree.set_state(root, Building).unwrap();
        tree.set_state(root, Built).unwrap();
    }

    #[test]
    fn test_remove_cascades() {
        let mut tree = AssemblyTree::new("test");
        let root = tree.root();
        let grid = tree.add_child(root, AssemblyNode::new(NodeKind::PillarGrid, "grid")).unwrap();
        let pillar = tree.add_child(grid, AssemblyNode::new(NodeKind::Pillar, "p")).unwrap();
        tree.add_child(pillar, AssemblyNode::new(NodeKind::Plinth, "base")).unwrap();
        let other = tree.add_child(root, AssemblyNode::new(NodeKind::Platform, "platform")).unwrap();
        tree.set_stage_root(Stage::PillarGrid, grid);

        assert_eq!(tree.remove_subtree(grid), 3);
        assert_eq!(tree.len(), 2);
        assert!(!tree.contains(pillar));
        assert!(tree.contains(other));
        assert_eq!(tree.children(root), &[other]);
        assert_eq!(tree.stage_root(Stage::PillarGrid), None);
        assert_eq!(tree.remove_subtree(root), 0);
    }

    #[test]
    fn test_world_transform() {
        let mut tree = AssemblyTree::new("test");
        let root = tree.root();
        let a = tree
            .add_child(root, AssemblyNode::new(NodeKind::RoofFrame, "a").at(Vector3::new(1.0, 0.0, 0.0)))
            .unwrap();
        let b = tree
            .add_child(a, AssemblyNode::new(NodeKind::Purlin, "b").at(Vector3::new(0.0, 2.0, 3.0)))
            .unwrap();
        let world = tree.world_transform(b);
        assert_eq!(world.transform_point(&Point3::origin()), Point3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_instance_rule() {
        let rule = InstanceRule::linear_x(3, 2.0).with_mirror(false, true, Point3::new(0.0, 1.0, 0.0));
        assert_eq!(rule.instance_count(), 6);
        let transforms = rule.transforms();
        assert_eq!(transforms.len(), 6);
        let p = transforms[4].transform_point(&Point3::new(0.0, 0.0, 0.0));
        assert_eq!(p, Point3::new(2.0, 2.0, 0.0));
    }

    #[test]
    fn test_rescale_keeps_topology() {
        let mut tree = AssemblyTree::new("test");
        let root = tree.root();
        let node = AssemblyNode::new(NodeKind::Step, "step")
            .at(Vector3::new(1.0, 2.0, 0.0))
            .with_solid(Solid::block(1.0, 1.0, 1.0))
            .with_instances(InstanceRule::linear_x(4, 0.5));
        let id = tree.add_child(root, node).unwrap();

        let before = tree.len();
        tree.rescale(2.0);
        assert_eq!(tree.len(), before);
        let node = tree.get(id).unwrap();
        assert_eq!(node.transform[(0, 3)], 2.0);
        assert_eq!(node.instance.unwrap().offsets[0].x, 1.0);
        let bbox = node.payload.as_solid().unwrap().bounding_box();
        assert_eq!(bbox.size(), Vector3::new(2.0, 2.0, 2.0));

        // 零缩放钳制到最小比例，几何不塌缩为一点
        tree.rescale(0.0);
        let node = tree.get(id).unwrap();
        assert!((node.transform[(0, 3)] - 2.0 * crate::math::MIN_SCALE).abs() < 1e-18);
        assert!(node.payload.as_solid().unwrap().bounding_box().size().x > 0.0);
    }

    #[test]
    fn test_world_solids_expands_instances() {
        let mut tree = AssemblyTree::new("test");
        let root = tree.root();
        let node = AssemblyNode::new(NodeKind::Rafter, "rafter")
            .with_solid(Solid::block(0.1, 0.1, 0.1))
            .with_instances(InstanceRule::linear_y(5, 0.3));
        tree.add_child(root, node).unwrap();
        assert_eq!(tree.world_solids().len(), 5);
    }
}
