//! 墙体阶段
//!
//! 沿外圈柱网（有前后廊时为内圈）在相邻两柱之间砌墙：
//! 前檐明间为门，其余前檐各间为窗，后檐与两山为实墙。
//! 两端缺柱的间不设墙。

use super::StageContext;
use crate::assembly::{AssemblyNode, NodeKind};
use crate::error::BuildResult;
use crate::math::Point3;
use crate::mesh::Solid;

/// 实墙厚（柱径倍数）
const WALL_THICKNESS_RATIO: f64 = 1.2;
/// 门窗隔扇厚（柱径倍数）
const PANEL_THICKNESS_RATIO: f64 = 0.3;
/// 额枋让出的高度（柱径倍数）
const ARCHITRAVE_CLEARANCE_RATIO: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Infill {
    Door,
    Window,
    Wall,
}

impl Infill {
    fn name(&self) -> &'static str {
        match self {
            Infill::Door => "door",
            Infill::Window => "window",
            Infill::Wall => "wall",
        }
    }
}

pub fn build(ctx: &mut StageContext) -> BuildResult<()> {
    let p = ctx.params;
    let layout = ctx.pillar_layout()?;
    let tolerance = p.dk * 1e-3;

    let ring = if p.hallway_depth.is_some() { 1 } else { 0 };
    let front = p.grid_y[ring];
    let back = p.grid_y[p.grid_y.len() - 1 - ring];
    let left = p.grid_x[0];
    let right = p.grid_x[p.grid_x.len() - 1];

    let z0 = p.platform_height;
    let height = p.pillar_height - p.pillar_diameter * ARCHITRAVE_CLEARANCE_RATIO;
    let centre = p.bays_x.len() / 2;

    let mut runs: Vec<(Point3, Point3, Infill)> = Vec::new();
    for (i, pair) in p.grid_x.windows(2).enumerate() {
        let infill = if i == centre { Infill::Door } else { Infill::Window };
        runs.push((Point3::new(pair[0], front, z0), Point3::new(pair[1], front, z0), infill));
        runs.push((Point3::new(pair[0], back, z0), Point3::new(pair[1], back, z0), Infill::Wall));
    }
    let side_lines: Vec<f64> = p.grid_y[ring..p.grid_y.len() - ring].to_vec();
    for pair in side_lines.windows(2) {
        for x in [left, right] {
            runs.push((Point3::new(x, pair[0], z0), Point3::new(x, pair[1], z0), Infill::Wall));
        }
    }

    let mut placed = 0;
    for (a, b, infill) in runs {
        if !layout.has_pillar_at(a.x, a.y, tolerance) || !layout.has_pillar_at(b.x, b.y, tolerance) {
            continue;
        }
        let ratio = match infill {
            Infill::Wall => WALL_THICKNESS_RATIO,
            Infill::Door | Infill::Window => PANEL_THICKNESS_RATIO,
        };
        let thickness = p.pillar_diameter * ratio;
        let half = thickness / 2.0;
        // 两柱之间的净距，墙体不侵入柱身
        let r = p.pillar_diameter / 2.0;
        let solid = if (a.x - b.x).abs() > (a.y - b.y).abs() {
            Solid::cuboid(
                Point3::new(a.x.min(b.x) + r, a.y - half, z0),
                Point3::new(a.x.max(b.x) - r, a.y + half, z0 + height),
            )
        } else {
            Solid::cuboid(
                Point3::new(a.x - half, a.y.min(b.y) + r, z0),
                Point3::new(a.x + half, a.y.max(b.y) - r, z0 + height),
            )
        };
        ctx.add(AssemblyNode::new(NodeKind::Wall, infill.name()).with_solid(solid))?;
        placed += 1;
    }

    tracing::debug!("Placed {} wall panels", placed);
    Ok(())
}
