//! 瓦面阶段
//!
//! 瓦垄沿椽望上皮扫掠，前后坡沿X排列、两山坡沿Y排列；
//! 屋面平面轮廓由望板在水平面上的投影求得，内缩半个瓦宽。
//! 正脊两端有吻兽资产时挂上。

use super::StageContext;
use crate::assembly::{AssemblyNode, InstanceRule, NodeKind, Payload};
use crate::asset::attach_assets;
use crate::curve::CrossSection;
use crate::elevation::{push_along_normals, DropAxis};
use crate::error::BuildResult;
use crate::math::{Point2, Point3, Vector3, EPSILON};
use crate::mesh::Solid;
use crate::silhouette::{project_silhouette, ProjectionPlane, SilhouetteMode, SilhouetteOptions};

/// 瓦垄宽（椽径倍数）
const TILE_WIDTH_RATIO: f64 = 3.0;
/// 瓦垄高（椽径倍数）
const TILE_HEIGHT_RATIO: f64 = 1.0;

pub fn build(ctx: &mut StageContext) -> BuildResult<()> {
    let p = ctx.params;
    if let Some(root) = ctx.tree.get_mut(ctx.root) {
        root.name = format!("{}·{}", root.name, p.paint_style.label());
    }
    if !p.use_tile {
        tracing::debug!("Tiles disabled");
        return Ok(());
    }

    build_outline(ctx)?;
    build_rows(ctx)?;
    attach_ridge_ornaments(ctx)
}

fn tile_width(ctx: &StageContext) -> f64 {
    ctx.params.rafter_diameter * TILE_WIDTH_RATIO
}

/// 屋面平面轮廓
fn build_outline(ctx: &mut StageContext) -> BuildResult<()> {
    let boards = ctx.tree.find_kind(NodeKind::RoofBoard);
    let solids = ctx.local_solids(&boards);
    if solids.is_empty() {
        return Ok(());
    }
    let options = SilhouetteOptions {
        merge_distance: ctx.config.merge_distance,
        inset: Some(tile_width(ctx) / 2.0),
        mode: SilhouetteMode::ConvexHull,
    };
    let outline = project_silhouette(&ProjectionPlane::horizontal(0.0), &solids, Point2::origin(), &options)?;
    tracing::debug!("Roof outline: {} points, area {:.3}", outline.points.len(), outline.signed_area().abs());
    ctx.add(AssemblyNode::new(NodeKind::RoofOutline, "roof_outline").with_payload(Payload::Outline(outline)))?;
    Ok(())
}

fn build_rows(ctx: &mut StageContext) -> BuildResult<()> {
    let p = ctx.params;
    let frame = ctx.frame;
    let eps = ctx.config.symmetry_epsilon;
    let tile_w = tile_width(ctx);
    let tile_h = p.rafter_diameter * TILE_HEIGHT_RATIO;
    let profile = CrossSection::new(tile_w * 0.8, tile_h).profile();
    // 椽中心之上：半椽、望板、半瓦
    let lift = frame.seat_offset + p.rafter_diameter * 0.8 + tile_h / 2.0;

    let half_w = p.total_width / 2.0;
    let half_d = p.total_depth / 2.0;
    let straight_x = match &frame.corner {
        Some(corner) => corner.eave_curve.start().x,
        None => half_w + frame.gable_overhang,
    };

    let front = push_along_normals(&frame.front_profile(), DropAxis::DropX, lift, 0.0, eps)?;
    let mut path = vec![Point3::new(0.0, front[0].y - frame.overhang, frame.eave_tip_z + lift - frame.seat_offset)];
    path.extend(front.iter().map(|q| Point3::new(0.0, q.y, q.z)));
    add_rows(
        ctx,
        "tile_row_front",
        Solid::sweep(&path, &profile)?,
        straight_x,
        Vector3::x(),
        (false, true),
        tile_w,
    )?;

    if let Some(side) = frame.side_profile() {
        let pushed = push_along_normals(&side, DropAxis::DropY, lift, 0.0, eps)?;
        let mut path = vec![Point3::new(pushed[0].x - frame.overhang, 0.0, frame.eave_tip_z + lift - frame.seat_offset)];
        path.extend(pushed.iter().map(|q| Point3::new(q.x, 0.0, q.z)));
        let straight_y = half_d - (half_w - straight_x);
        add_rows(
            ctx,
            "tile_row_side",
            Solid::sweep(&path, &profile)?,
            straight_y,
            Vector3::y(),
            (true, false),
            tile_w,
        )?;
    }
    Ok(())
}

/// 一组瓦垄：在 [-half, half] 上按瓦宽排列，再镜像到对坡
fn add_rows(
    ctx: &mut StageContext,
    name: &str,
    row: Solid,
    half: f64,
    across: Vector3,
    (mirror_x, mirror_y): (bool, bool),
    tile_w: f64,
) -> BuildResult<()> {
    if half < tile_w / 2.0 - EPSILON {
        return Ok(());
    }
    let count = (2.0 * half / tile_w).floor() as u32 + 1;
    let pitch = if count > 1 { 2.0 * half / (count - 1) as f64 } else { 0.0 };
    let offset = across * -half;
    let rule = InstanceRule::along(count, across * pitch).with_mirror(mirror_x, mirror_y, Point3::from(-offset));
    ctx.add(
        AssemblyNode::new(NodeKind::TileRow, name)
            .at(offset)
            .with_solid(row)
            .with_instances(rule),
    )?;
    tracing::debug!("{}: {} tile rows per slope", name, count);
    Ok(())
}

/// 正脊两端的吻兽
fn attach_ridge_ornaments(ctx: &mut StageContext) -> BuildResult<()> {
    let p = ctx.params;
    if !p.roof_style.has_main_ridge() {
        return Ok(());
    }
    let top = *ctx.frame.top();
    let z = top.z + p.purlin_diameter;
    for x in [-top.half_length, top.half_length] {
        attach_assets(ctx.tree, ctx.root, ctx.assets, "chiwen", Vector3::new(x, 0.0, z))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::assembly::{AssemblyTree, NodeKind, Payload};
    use crate::asset::{AssetHandle, AssetLibrary};
    use crate::builder::{AssemblyBuilder, Stage};
    use crate::orchestrator::CancelToken;
    use crate::params::{PaintStyle, ParameterSet, RoofStyle};
    use crate::progress::NullSink;
    use crate::resolver::{ConstraintResolver, RebuildPlan};
    use std::sync::Arc;

    fn build(params: &ParameterSet, builder: AssemblyBuilder) -> AssemblyTree {
        let resolved = ConstraintResolver::new().resolve(params).unwrap();
        let mut tree = AssemblyTree::new("tiles");
        builder
            .build(&mut tree, &resolved, RebuildPlan::Nothing, &CancelToken::new(), &NullSink)
            .unwrap();
        tree
    }

    fn gable() -> ParameterSet {
        ParameterSet { dk: Some(1.0), x_rooms: 3, y_rooms: 1, roof_style: RoofStyle::Gable, ..Default::default() }
    }

    #[test]
    fn test_outline_covers_plan() {
        let params = gable();
        let resolved = ConstraintResolver::new().resolve(&params).unwrap();
        let tree = build(&params, AssemblyBuilder::default());

        let outline = tree.find_kind(NodeKind::RoofOutline)[0];
        let Payload::Outline(outline) = &tree.get(outline).unwrap().payload else {
            panic!("roof outline without polygon");
        };
        assert!(outline.is_simple());
        assert!(outline.inset.is_some());
        // 屋面投影大于柱网
        let area = outline.signed_area().abs();
        assert!(area > resolved.total_width * resolved.total_depth);
        assert!(tree.count_kind(NodeKind::TileRow) >= 1);
    }

    #[test]
    fn test_no_tiles() {
        let params = ParameterSet { use_tile: false, paint_style: PaintStyle::Suzhou, ..gable() };
        let tree = build(&params, AssemblyBuilder::default());
        let root = tree.stage_root(Stage::Tiles).unwrap();
        assert!(tree.children(root).is_empty());
        assert!(tree.get(root).unwrap().name.ends_with("苏式"));
    }

    #[test]
    fn test_chiwen_at_ridge_ends() {
        let mut library = AssetLibrary::new();
        library.register(AssetHandle::new("chiwen"));
        let tree = build(&gable(), AssemblyBuilder::default().with_assets(Arc::new(library)));
        let root = tree.stage_root(Stage::Tiles).unwrap();
        let ornaments = tree
            .children(root)
            .iter()
            .filter(|id| tree.get(**id).is_some_and(|n| n.kind == NodeKind::Asset))
            .count();
        assert_eq!(ornaments, 2);
    }
}
