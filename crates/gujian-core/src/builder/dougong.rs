//! 斗栱阶段
//!
//! 檐柱头上置柱头科，转角柱上置角科，两柱之间按攒当均布平身科。
//! 有斗栱资产时挂资产，没有时以斗、栱两层方块示意。

use super::StageContext;
use crate::assembly::{AssemblyNode, InstanceRule, NodeId, NodeKind, Payload};
use crate::asset::attach_assets;
use crate::error::BuildResult;
use crate::math::{Point3, Vector3};
use crate::mesh::Solid;

/// 坐斗边长（DK）
const DOU_SIZE_DK: f64 = 3.0;
/// 栱长（DK）
const GONG_LENGTH_DK: f64 = 9.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitKind {
    /// 平身科
    Intermediate,
    /// 柱头科
    Column,
    /// 角科
    Corner,
}

impl UnitKind {
    fn asset_prefix(&self) -> &'static str {
        match self {
            UnitKind::Intermediate => "dougong.pingshen",
            UnitKind::Column => "dougong.zhutou",
            UnitKind::Corner => "dougong.jiaoke",
        }
    }
}

/// 程序化斗栱：坐斗上叠一层十字栱
fn procedural_unit(dk: f64, height: f64) -> Solid {
    let dou = DOU_SIZE_DK * dk;
    let gong = GONG_LENGTH_DK * dk;
    let dou_height = height * 0.4;
    let mut unit = Solid::block(dou, dou, dou_height);
    let arm_z0 = dou_height;
    let arm_z1 = height;
    unit.merge(&Solid::cuboid(
        Point3::new(-gong / 2.0, -dou / 3.0, arm_z0),
        Point3::new(gong / 2.0, dou / 3.0, arm_z1),
    ));
    unit.merge(&Solid::cuboid(
        Point3::new(-dou / 3.0, -gong / 2.0, arm_z0),
        Point3::new(dou / 3.0, gong / 2.0, arm_z1),
    ));
    unit
}

pub fn build(ctx: &mut StageContext) -> BuildResult<()> {
    let p = ctx.params;
    let Some(layout) = &p.dougong else {
        tracing::debug!("Bucket arches disabled");
        return Ok(());
    };
    let z = p.platform_height + p.pillar_height;
    let half_w = p.total_width / 2.0;
    let half_d = p.total_depth / 2.0;
    let unit = procedural_unit(p.dk, layout.height);

    // 平身科：前檐各间（后檐镜像）与左山各间（右山镜像）
    let mut intermediate = 0;
    let runs = p
        .grid_x
        .windows(2)
        .map(|w| (Vector3::new(w[0], -half_d, z), w[1] - w[0], Vector3::x(), false, true))
        .chain(
            p.grid_y
                .windows(2)
                .map(|w| (Vector3::new(-half_w, w[0], z), w[1] - w[0], Vector3::y(), true, false)),
        )
        .collect::<Vec<_>>();
    for (i, (start, bay, direction, mirror_x, mirror_y)) in runs.into_iter().enumerate() {
        let count = ((bay / layout.spacing).round() as i64 - 1).max(0) as u32;
        if count == 0 {
            continue;
        }
        let pitch = bay / (count + 1) as f64;
        let offset = start + direction * pitch;
        let rule = InstanceRule::along(count, direction * pitch)
            .with_mirror(mirror_x, mirror_y, Point3::from(-offset));
        let node = AssemblyNode::new(NodeKind::BucketArch, format!("pingshen_{}", i))
            .at(offset)
            .with_instances(rule);
        let id = ctx.add(node)?;
        place_unit(ctx, id, UnitKind::Intermediate, &unit)?;
        intermediate += count as usize * 2;
    }

    // 柱头科与角科：按实际柱位，只取外圈
    let pillars = ctx.pillar_layout()?;
    let tolerance = p.dk * 1e-3;
    let mut columns = 0;
    for pos in &pillars.positions {
        let on_x = (pos.x.abs() - half_w).abs() <= tolerance;
        let on_y = (pos.y.abs() - half_d).abs() <= tolerance;
        let kind = match (on_x, on_y) {
            (true, true) => UnitKind::Corner,
            (true, false) | (false, true) => UnitKind::Column,
            (false, false) => continue,
        };
        let name = match kind {
            UnitKind::Corner => "jiaoke",
            _ => "zhutou",
        };
        let id = ctx.add(AssemblyNode::new(NodeKind::BucketArch, name).at(Vector3::new(pos.x, pos.y, z)))?;
        place_unit(ctx, id, kind, &unit)?;
        columns += 1;
    }

    tracing::debug!(
        "Placed {} intermediate and {} column bucket arches",
        intermediate,
        columns
    );
    Ok(())
}

fn place_unit(ctx: &mut StageContext, node: NodeId, kind: UnitKind, procedural: &Solid) -> BuildResult<()> {
    let attached = attach_assets(ctx.tree, node, ctx.assets, kind.asset_prefix(), Vector3::zeros())?;
    if attached.is_empty() {
        if let Some(n) = ctx.tree.get_mut(node) {
            n.payload = Payload::Solid(procedural.clone());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::assembly::{AssemblyTree, NodeKind};
    use crate::asset::{AssetHandle, AssetLibrary};
    use crate::builder::{AssemblyBuilder, Stage};
    use crate::orchestrator::CancelToken;
    use crate::params::{ParameterSet, RoofStyle};
    use crate::progress::NullSink;
    use crate::resolver::{ConstraintResolver, RebuildPlan};
    use std::sync::Arc;

    fn build(params: &ParameterSet, builder: AssemblyBuilder) -> AssemblyTree {
        let resolved = ConstraintResolver::new().resolve(params).unwrap();
        let mut tree = AssemblyTree::new("dougong");
        builder
            .build(&mut tree, &resolved, RebuildPlan::Nothing, &CancelToken::new(), &NullSink)
            .unwrap();
        tree
    }

    fn gable() -> ParameterSet {
        ParameterSet { dk: Some(1.0), x_rooms: 3, y_rooms: 1, roof_style: RoofStyle::Gable, ..Default::default() }
    }

    #[test]
    fn test_units_on_perimeter() {
        let tree = build(&gable(), AssemblyBuilder::default());
        let root = tree.stage_root(Stage::BucketArches).unwrap();
        let names: Vec<String> = tree
            .children(root)
            .iter()
            .filter_map(|id| tree.get(*id).map(|n| n.name.clone()))
            .collect();
        // 3x1 柱网共8柱，4角柱4柱头
        assert_eq!(names.iter().filter(|n| *n == "jiaoke").count(), 4);
        assert_eq!(names.iter().filter(|n| *n == "zhutou").count(), 4);
        assert!(names.iter().any(|n| n.starts_with("pingshen_")));
    }

    #[test]
    fn test_disabled_leaves_stage_empty() {
        let params = ParameterSet { use_dougong: false, ..gable() };
        let tree = build(&params, AssemblyBuilder::default());
        let root = tree.stage_root(Stage::BucketArches).unwrap();
        assert!(tree.children(root).is_empty());
    }

    #[test]
    fn test_assets_replace_procedural_units() {
        let mut library = AssetLibrary::new();
        library.register(AssetHandle::new("dougong.jiaoke"));
        let builder = AssemblyBuilder::default().with_assets(Arc::new(library));
        let tree = build(&gable(), builder);

        let root = tree.stage_root(Stage::BucketArches).unwrap();
        let corners: Vec<_> = tree
            .children(root)
            .iter()
            .copied()
            .filter(|id| tree.get(*id).is_some_and(|n| n.name == "jiaoke"))
            .collect();
        for id in corners {
            assert!(tree.get(id).unwrap().payload.as_solid().is_none());
            assert!(tree.find_in(id, NodeKind::Asset).is_some());
        }
    }
}
