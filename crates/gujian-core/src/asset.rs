//! 外部资产引用
//!
//! 斗栱、吻兽、栏杆望柱等静态装饰构件来自外部资产库。
//! 构建器只按名称前缀请求资产句柄，把它们作为不透明的 `Asset` 节点挂入装配树；
//! 资产网格的加载由调用方负责。

use crate::assembly::{AssemblyNode, AssemblyTree, NodeId, NodeKind, Payload};
use crate::error::BuildResult;
use crate::math::{Matrix4, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 资产句柄
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetHandle {
    /// 资产库中的名称，例如 `dougong.pingshen`
    pub name: String,
    /// 相对挂接点的变换
    pub transform: Matrix4,
    /// 统一缩放（随斗口变化）
    pub scale: f64,
    pub children: Vec<AssetHandle>,
}

impl AssetHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transform: Matrix4::identity(),
            scale: 1.0,
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: AssetHandle) -> Self {
        self.children.push(child);
        self
    }

    pub fn rescale(&mut self, factor: f64) {
        self.scale *= factor;
        let t = self.transform.fixed_view::<3, 1>(0, 3) * factor;
        self.transform.fixed_view_mut::<3, 1>(0, 3).copy_from(&t);
        for child in &mut self.children {
            child.rescale(factor);
        }
    }
}

/// 资产提供者
pub trait AssetProvider: Send + Sync {
    /// 按名称前缀请求资产，可能返回零个或多个
    fn request(&self, prefix: &str) -> Vec<AssetHandle>;
}

/// 空资产库：所有构件都走程序化生成
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAssets;

impl AssetProvider for NoAssets {
    fn request(&self, _prefix: &str) -> Vec<AssetHandle> {
        Vec::new()
    }
}

/// 内存资产目录
#[derive(Debug, Clone, Default)]
pub struct AssetLibrary {
    entries: BTreeMap<String, AssetHandle>,
}

impl AssetLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handle: AssetHandle) {
        self.entries.insert(handle.name.clone(), handle);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl AssetProvider for AssetLibrary {
    fn request(&self, prefix: &str) -> Vec<AssetHandle> {
        self.entries
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(_, handle)| handle.clone())
            .collect()
    }
}

/// 请求资产并挂到 `parent` 下，返回顶层资产节点
///
/// 资产的子层级按原样展开为子节点。
pub fn attach_assets(
    tree: &mut AssemblyTree,
    parent: NodeId,
    provider: &dyn AssetProvider,
    prefix: &str,
    offset: Vector3,
) -> BuildResult<Vec<NodeId>> {
    let handles = provider.request(prefix);
    if handles.is_empty() {
        tracing::debug!("No assets for prefix '{}'", prefix);
    }
    let mut attached = Vec::with_capacity(handles.len());
    for handle in handles {
        let transform = Matrix4::new_translation(&offset) * handle.transform;
        attached.push(attach_one(tree, parent, handle, transform)?);
    }
    Ok(attached)
}

fn attach_one(
    tree: &mut AssemblyTree,
    parent: NodeId,
    mut handle: AssetHandle,
    transform: Matrix4,
) -> BuildResult<NodeId> {
    let children = std::mem::take(&mut handle.children);
    let node = AssemblyNode::new(NodeKind::Asset, handle.name.clone())
        .with_transform(transform)
        .with_payload(Payload::Asset(handle));
    let id = tree.add_child(parent, node)?;
    for child in children {
        let child_transform = child.transform;
        attach_one(tree, id, child, child_transform)?;
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library() -> AssetLibrary {
        let mut lib = AssetLibrary::new();
        lib.register(AssetHandle::new("dougong.pingshen").with_child(AssetHandle::new("dougong.pingshen.dou")));
        lib.register(AssetHandle::new("dougong.zhutou"));
        lib.register(AssetHandle::new("chiwen"));
        lib
    }

    #[test]
    fn test_prefix_request() {
        let lib = library();
        assert_eq!(lib.request("dougong").len(), 2);
        assert_eq!(lib.request("chiwen").len(), 1);
        assert!(lib.request("railing").is_empty());
        assert!(NoAssets.request("dougong").is_empty());
    }

    #[test]
    fn test_attach_hierarchy() {
        let mut tree = AssemblyTree::new("test");
        let root = tree.root();
        let ids = attach_assets(&mut tree, root, &library(), "dougong", Vector3::new(1.0, 0.0, 0.0)).unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(tree.children(ids[0]).len(), 1);
        assert_eq!(tree.count_kind(NodeKind::Asset), 3);
        assert_eq!(tree.world_transform(ids[0])[(0, 3)], 1.0);
    }

    #[test]
    fn test_rescale_handle() {
        let mut handle = AssetHandle::new("chiwen");
        handle.transform = Matrix4::new_translation(&Vector3::new(2.0, 0.0, 1.0));
        handle.rescale(0.5);
        assert_eq!(handle.scale, 0.5);
        assert_eq!(handle.transform[(0, 3)], 1.0);
        assert_eq!(handle.transform[(2, 3)], 0.5);
    }
}
