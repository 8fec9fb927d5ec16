//! 柱网阶段
//!
//! 每个柱网交点一根柱（减去用户删除的），另加用户添加的柱；每根柱带一个柱础。
//! 柱与柱础的网格并行生成。

use super::StageContext;
use crate::assembly::{AssemblyNode, AssemblyTree, NodeKind};
use crate::builder::Stage;
use crate::error::{BuildError, BuildResult};
use crate::math::{Point3, Vector3};
use crate::mesh::Solid;
use crate::params::GridCell;
use rayon::prelude::*;

/// 柱础边长（柱径倍数）
const PLINTH_RATIO: f64 = 2.0;
/// 柱础高（柱径倍数）
const PLINTH_HEIGHT_RATIO: f64 = 0.2;

/// 柱位表（柱底中心，建筑坐标）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PillarLayout {
    pub positions: Vec<Point3>,
}

impl PillarLayout {
    /// 从柱网阶段的柱节点读回
    pub fn read_back(tree: &AssemblyTree) -> BuildResult<Self> {
        let root = tree
            .stage_root(Stage::PillarGrid)
            .ok_or_else(|| BuildError::geometry("pillar layout", "pillar grid has not been built"))?;
        let positions = tree
            .descendants(root)
            .into_iter()
            .filter(|id| tree.get(*id).is_some_and(|n| n.kind == NodeKind::Pillar))
            .map(|id| tree.world_transform(id).transform_point(&Point3::origin()))
            .collect();
        Ok(Self { positions })
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// 平面位置 (x, y) 处是否有柱
    pub fn has_pillar_at(&self, x: f64, y: f64, tolerance: f64) -> bool {
        self.positions
            .iter()
            .any(|p| (p.x - x).abs() <= tolerance && (p.y - y).abs() <= tolerance)
    }

    /// 去重后的柱列X坐标（升序）
    pub fn columns_x(&self, tolerance: f64) -> Vec<f64> {
        let mut xs: Vec<f64> = self.positions.iter().map(|p| p.x).collect();
        xs.sort_by(f64::total_cmp);
        xs.dedup_by(|a, b| (*a - *b).abs() <= tolerance);
        xs
    }
}

struct PillarSpec {
    name: String,
    base: Point3,
}

pub fn build(ctx: &mut StageContext) -> BuildResult<()> {
    let p = ctx.params;
    let z0 = p.platform_height;

    let mut specs = Vec::new();
    for (ix, x) in p.grid_x.iter().enumerate() {
        for (iy, y) in p.grid_y.iter().enumerate() {
            if p.removed_pillars.contains(&GridCell::new(ix as u32, iy as u32)) {
                continue;
            }
            specs.push(PillarSpec {
                name: format!("pillar_{}_{}", ix, iy),
                base: Point3::new(*x, *y, z0),
            });
        }
    }
    for (i, extra) in p.extra_pillars.iter().enumerate() {
        specs.push(PillarSpec {
            name: format!("extra_pillar_{}", i),
            base: Point3::new(extra[0], extra[1], z0),
        });
    }
    if specs.is_empty() {
        return Err(BuildError::geometry("pillar grid", "every pillar has been removed"));
    }

    let radius = p.pillar_diameter / 2.0;
    let plinth_size = p.pillar_diameter * PLINTH_RATIO;
    let plinth_height = p.pillar_diameter * PLINTH_HEIGHT_RATIO;
    let segments = ctx.segments();

    let emit = |_: &PillarSpec| {
        (
            Solid::cylinder(radius, p.pillar_height, segments),
            Solid::block(plinth_size, plinth_size, plinth_height),
        )
    };
    let solids: Vec<(Solid, Solid)> = if ctx.config.parallel_emission {
        specs.par_iter().map(emit).collect()
    } else {
        specs.iter().map(emit).collect()
    };

    for (spec, (shaft, plinth)) in specs.into_iter().zip(solids) {
        let pillar = ctx.add(
            AssemblyNode::new(NodeKind::Pillar, spec.name)
                .at(spec.base.coords)
                .with_solid(shaft),
        )?;
        ctx.add_to(
            pillar,
            AssemblyNode::new(NodeKind::Plinth, "plinth")
                .at(Vector3::new(0.0, 0.0, -plinth_height))
                .with_solid(plinth),
        )?;
    }

    tracing::debug!("Placed {} pillars", ctx.tree.children(ctx.root).len());
    Ok(())
}
