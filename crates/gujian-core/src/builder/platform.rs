//! 台基阶段：台明、前踏跺、可选栏杆

use super::StageContext;
use crate::assembly::{AssemblyNode, InstanceRule, NodeKind, Payload};
use crate::asset::attach_assets;
use crate::error::BuildResult;
use crate::math::{Point3, Vector3, EPSILON};
use crate::mesh::Solid;

/// 踏跺每级高（DK）
const RISER_DK: f64 = 3.0;
/// 踏跺每级宽（DK）
const TREAD_DK: f64 = 6.0;
/// 望柱间距（DK）
const RAILING_SPACING_DK: f64 = 22.0;
/// 望柱截面（DK）
const RAILING_POST_DK: f64 = 2.5;
/// 望柱高（DK）
const RAILING_HEIGHT_DK: f64 = 18.0;

pub fn build(ctx: &mut StageContext) -> BuildResult<()> {
    let p = ctx.params;
    let width = p.total_width + 2.0 * p.platform_extend;
    let depth = p.total_depth + 2.0 * p.platform_extend;

    if let Some(node) = ctx.tree.get_mut(ctx.root) {
        node.payload = Payload::Solid(Solid::block(width, depth, p.platform_height.max(EPSILON)));
    }

    if p.platform_height > EPSILON {
        build_steps(ctx, depth)?;
    }
    if p.use_railing {
        build_railing(ctx, width, depth)?;
    }
    Ok(())
}

/// 前踏跺：宽同明间，自台明前沿逐级下降
fn build_steps(ctx: &mut StageContext, depth: f64) -> BuildResult<()> {
    let p = ctx.params;
    let count = ((p.platform_height / (RISER_DK * p.dk)).round() as u32).max(1);
    let riser = p.platform_height / count as f64;
    let tread = TREAD_DK * p.dk;
    let centre_bay = p.bays_x[p.bays_x.len() / 2];

    // 第一级顶面与台明平齐
    let first = Vector3::new(0.0, -depth / 2.0 - tread / 2.0, p.platform_height - riser);
    let node = AssemblyNode::new(NodeKind::Step, "step")
        .at(first)
        .with_solid(Solid::block(centre_bay, tread, riser))
        .with_instances(InstanceRule::along(count, Vector3::new(0.0, -tread, -riser)));
    ctx.add(node)?;
    tracing::debug!("Platform stair: {} steps of {:.3} m", count, riser);
    Ok(())
}

/// 台明四周的望柱，前后、左右各一组镜像阵列
fn build_railing(ctx: &mut StageContext, width: f64, depth: f64) -> BuildResult<()> {
    let p = ctx.params;
    let post = RAILING_POST_DK * p.dk;
    let spacing = RAILING_SPACING_DK * p.dk;
    let inset = post / 2.0;
    let z = p.platform_height;

    let along_x = (((width - post) / spacing).floor() as u32).max(1);
    let along_y = (((depth - post) / spacing).floor() as u32).max(1);
    let step_x = (width - post) / along_x as f64;
    let step_y = (depth - post) / along_y as f64;

    let procedural = Solid::block(post, post, RAILING_HEIGHT_DK * p.dk);
    let front = Vector3::new(-width / 2.0 + inset, -depth / 2.0 + inset, z);
    let side = Vector3::new(-width / 2.0 + inset, -depth / 2.0 + inset + step_y, z);
    // 镜像枢轴取节点局部坐标下的建筑中心
    let runs = [
        (
            "railing_front",
            front,
            InstanceRule::linear_x(along_x + 1, step_x).with_mirror(false, true, Point3::from(-front)),
        ),
        (
            "railing_side",
            side,
            InstanceRule::linear_y(along_y.saturating_sub(1).max(1), step_y)
                .with_mirror(true, false, Point3::from(-side)),
        ),
    ];

    for (name, offset, rule) in runs {
        let node = ctx.add(
            AssemblyNode::new(NodeKind::Railing, name)
                .at(offset)
                .with_instances(rule),
        )?;
        // 有望柱资产时挂资产，否则用方柱代替
        let attached = attach_assets(ctx.tree, node, ctx.assets, "railing_post", Vector3::zeros())?;
        if attached.is_empty() {
            if let Some(n) = ctx.tree.get_mut(node) {
                n.payload = Payload::Solid(procedural.clone());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::assembly::{AssemblyTree, NodeKind};
    use crate::builder::{AssemblyBuilder, Stage};
    use crate::orchestrator::CancelToken;
    use crate::params::ParameterSet;
    use crate::progress::NullSink;
    use crate::resolver::{ConstraintResolver, RebuildPlan};

    #[test]
    fn test_steps_reach_ground() {
        let params = ParameterSet { dk: Some(1.0), use_railing: true, ..Default::default() };
        let resolved = ConstraintResolver::new().resolve(&params).unwrap();
        let mut tree = AssemblyTree::new("platform");
        AssemblyBuilder::default()
            .build(&mut tree, &resolved, RebuildPlan::Nothing, &CancelToken::new(), &NullSink)
            .unwrap();

        let step = tree.find_kind(NodeKind::Step)[0];
        let lowest = tree
            .node_world_solids(step)
            .iter()
            .map(|s| s.bounding_box().min.z)
            .fold(f64::INFINITY, f64::min);
        assert!(lowest.abs() < 1e-9);
        assert_eq!(tree.get(step).unwrap().instance_count(), 4);

        assert_eq!(tree.count_kind(NodeKind::Railing), 2);
        let platform = tree.stage_root(Stage::Platform).unwrap();
        let size = tree.get(platform).unwrap().payload.as_solid().unwrap().bounding_box().size();
        assert!((size.x - (resolved.total_width + 30.0)).abs() < 1e-9);
    }
}
