//! 梁架阶段
//!
//! - 额枋：外圈相邻两柱之间，柱头下皮
//! - 梁：每一柱列、每一层檩下一根横梁，两端承托该层前后檩
//! - 瓜柱：上下两层梁之间，脊瓜柱直抵脊檩

use super::StageContext;
use crate::assembly::{AssemblyNode, InstanceRule, NodeKind};
use crate::error::BuildResult;
use crate::math::{Point3, EPSILON};
use crate::mesh::Solid;

/// 额枋高（柱径倍数）
const ARCHITRAVE_HEIGHT_RATIO: f64 = 1.0;
/// 额枋厚（柱径倍数）
const ARCHITRAVE_WIDTH_RATIO: f64 = 0.8;
/// 梁高（檩径倍数）
const BEAM_HEIGHT_RATIO: f64 = 1.2;
/// 梁厚（柱径倍数）
const BEAM_WIDTH_RATIO: f64 = 0.8;
/// 瓜柱截面（柱径倍数）
const POST_RATIO: f64 = 0.6;

pub fn build(ctx: &mut StageContext) -> BuildResult<()> {
    build_architraves(ctx)?;
    build_truss(ctx)
}

fn build_architraves(ctx: &mut StageContext) -> BuildResult<()> {
    let p = ctx.params;
    let h = p.pillar_diameter * ARCHITRAVE_HEIGHT_RATIO;
    let t = p.pillar_diameter * ARCHITRAVE_WIDTH_RATIO / 2.0;
    let z1 = p.platform_height + p.pillar_height;
    let z0 = z1 - h;
    let half_w = p.total_width / 2.0;
    let half_d = p.total_depth / 2.0;

    for (i, pair) in p.grid_x.windows(2).enumerate() {
        let solid = Solid::cuboid(
            Point3::new(pair[0], -half_d - t, z0),
            Point3::new(pair[1], -half_d + t, z1),
        );
        ctx.add(
            AssemblyNode::new(NodeKind::Beam, format!("architrave_x_{}", i))
                .with_solid(solid)
                .with_instances(InstanceRule::mirrored(false, true, Point3::origin())),
        )?;
    }
    for (i, pair) in p.grid_y.windows(2).enumerate() {
        let solid = Solid::cuboid(
            Point3::new(-half_w - t, pair[0], z0),
            Point3::new(-half_w + t, pair[1], z1),
        );
        ctx.add(
            AssemblyNode::new(NodeKind::Beam, format!("architrave_y_{}", i))
                .with_solid(solid)
                .with_instances(InstanceRule::mirrored(true, false, Point3::origin())),
        )?;
    }
    Ok(())
}

fn build_truss(ctx: &mut StageContext) -> BuildResult<()> {
    let p = ctx.params;
    let frame = ctx.frame;
    let n = frame.steps();
    let r = p.purlin_diameter / 2.0;
    let beam_h = p.purlin_diameter * BEAM_HEIGHT_RATIO;
    let beam_t = p.pillar_diameter * BEAM_WIDTH_RATIO / 2.0;
    let post = p.pillar_diameter * POST_RATIO;
    let tolerance = p.dk * 1e-3;

    let columns = ctx.pillar_layout()?.columns_x(tolerance);
    let mut beams = 0;
    let mut posts = 0;
    for (ix, x) in columns.iter().copied().enumerate() {
        for k in 0..n {
            let level = frame.levels[k];
            if x.abs() > level.half_length + tolerance {
                continue;
            }
            let top = level.z - r;
            let solid = Solid::cuboid(
                Point3::new(x - beam_t, level.y, top - beam_h),
                Point3::new(x + beam_t, -level.y, top),
            );
            ctx.add(AssemblyNode::new(NodeKind::Beam, format!("beam_{}_{}", k, ix)).with_solid(solid))?;
            beams += 1;

            // 本层梁背到上一层檩（或上一层梁）底
            let upper = frame.levels[k + 1];
            if x.abs() > upper.half_length + tolerance {
                continue;
            }
            let post_top = if k + 1 < n { upper.z - r - beam_h } else { upper.z - r };
            if post_top - top <= EPSILON {
                continue;
            }
            let solid = Solid::cuboid(
                Point3::new(x - post / 2.0, upper.y - post / 2.0, top),
                Point3::new(x + post / 2.0, upper.y + post / 2.0, post_top),
            );
            let on_ridge = upper.y.abs() <= tolerance;
            let name = if on_ridge { format!("ridge_post_{}", ix) } else { format!("short_post_{}_{}", k, ix) };
            let mut node = AssemblyNode::new(NodeKind::ShortPost, name).with_solid(solid);
            if !on_ridge {
                node = node.with_instances(InstanceRule::mirrored(false, true, Point3::origin()));
            }
            ctx.add(node)?;
            posts += 1;
        }
    }

    tracing::debug!("Placed {} beams and {} short posts", beams, posts);
    Ok(())
}
