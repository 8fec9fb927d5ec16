//! 椽望阶段
//!
//! 椽子中线由檩位折线沿法向推出「檩半径 + 椽半径」得到。
//! 檐椽与檐檩相切：过上金步椽位点作檐檩外包圆的切线，取上方一条，延伸到出檐。
//!
//! 翼角处的椽子自角梁呈扇形排开：椽头落在起翘的檐口曲线上（按X等分，再与曲线精确求交），
//! 椽尾沿角梁均布。对角另一侧由对角镜像得到。

use super::StageContext;
use crate::assembly::{AssemblyNode, InstanceRule, NodeKind, Payload};
use crate::config::BuildConfig;
use crate::curve::{
    equal_division, intersect_line_bezier, tangent_points, CrossSection, CurveDescriptor, EndpointMode, Line2,
};
use crate::elevation::{push_along_normals, DropAxis};
use crate::error::{BuildError, BuildResult};
use crate::math::{Point2, Point3, Vector2, Vector3, EPSILON};
use crate::mesh::Solid;

use super::roof::CornerLayout;

/// 椽当（椽径倍数，中到中）
const RAFTER_SPACING_RATIO: f64 = 2.0;
/// 望板厚（椽径倍数）
const BOARD_RATIO: f64 = 0.3;
/// 飞椽后尾压在檐椽上的比例
const FLY_TAIL_RATIO: f64 = 0.25;

/// 檐椽：与檐檩外包圆相切并过上端点的直线，延伸到 `tip_u`
///
/// 二维坐标为 (水平, 高)。返回 (椽头, 椽尾)。
pub fn eave_rafter(center: Point2, radius: f64, upper: Point2, tip_u: f64) -> BuildResult<(Point2, Point2)> {
    let tangent = tangent_points(center, radius, upper)
        .into_iter()
        .max_by(|a, b| a.y.total_cmp(&b.y))
        .ok_or_else(|| BuildError::geometry("eave rafter", "rafter seat lies inside the eave purlin"))?;
    let direction = tangent - upper;
    if direction.x.abs() < EPSILON {
        return Err(BuildError::geometry("eave rafter", "eave rafter would be vertical"));
    }
    let lambda = (tip_u - upper.x) / direction.x;
    Ok((upper + direction * lambda, upper))
}

/// 翼角椽头：檐口曲线上按X等分，再用竖线与曲线求交校正
pub fn fan_heads(curve: &CurveDescriptor, count: usize, config: &BuildConfig) -> BuildResult<Vec<Point3>> {
    let targets = equal_division(curve, count, EndpointMode::Exclude, config.oversample_factor)?;
    let Some(bezier) = curve.as_bezier() else {
        return Ok(targets);
    };
    targets
        .into_iter()
        .map(|q| {
            let line = Line2::new(Point2::new(q.x, 0.0), Point2::new(q.x, 1.0));
            intersect_line_bezier(
                &line,
                bezier,
                config.intersection_max_iterations,
                config.intersection_tolerance,
            )
            .map(|hit| hit.point)
        })
        .collect()
}

/// 一段坡上的椽（二维端点）
struct Segment {
    lower: Point2,
    upper: Point2,
    /// 椽子分布的半宽
    half_width: f64,
}

pub fn build(ctx: &mut StageContext) -> BuildResult<()> {
    let p = ctx.params;
    let frame = ctx.frame;
    let eps = ctx.config.symmetry_epsilon;

    let front = push_along_normals(&frame.front_profile(), DropAxis::DropX, frame.seat_offset, 0.0, eps)?;
    let front_uz: Vec<Point2> = front.iter().map(|q| Point2::new(q.y, q.z)).collect();
    let eave = frame.eave();
    let (tip, _) = eave_rafter(
        Point2::new(eave.y, eave.z),
        frame.seat_offset,
        front_uz[1],
        eave.y - p.eave_overhang,
    )?;

    let mut segments = Vec::with_capacity(frame.steps());
    for k in 0..frame.steps() {
        let (a, b) = (frame.levels[k], frame.levels[k + 1]);
        segments.push(Segment {
            lower: if k == 0 { tip } else { front_uz[k] },
            upper: front_uz[k + 1],
            half_width: a.half_length.min(b.half_length),
        });
    }
    let board_half = |k: usize| {
        frame.levels[k].half_length.max(frame.levels[k + 1].half_length) + frame.gable_overhang
    };
    emit_slope(ctx, Slope::Front, &segments, board_half)?;

    if let Some(side) = frame.side_profile() {
        let pushed = push_along_normals(&side, DropAxis::DropY, frame.seat_offset, 0.0, eps)?;
        let side_uz: Vec<Point2> = pushed.iter().map(|q| Point2::new(q.x, q.z)).collect();
        let (side_tip, _) = eave_rafter(
            Point2::new(-eave.half_length, eave.z),
            frame.seat_offset,
            side_uz[1],
            -eave.half_length - p.eave_overhang,
        )?;
        let mut side_segments = Vec::with_capacity(side_uz.len() - 1);
        for k in 0..side_uz.len() - 1 {
            let (a, b) = (frame.levels[k], frame.levels[k + 1]);
            side_segments.push(Segment {
                lower: if k == 0 { side_tip } else { side_uz[k] },
                upper: side_uz[k + 1],
                half_width: a.y.abs().min(b.y.abs()),
            });
        }
        let board_half = |k: usize| frame.levels[k].y.abs().max(frame.levels[k + 1].y.abs());
        emit_slope(ctx, Slope::Side, &side_segments, board_half)?;
    }

    if let Some(corner) = &frame.corner {
        build_fan(ctx, corner)?;
    }
    build_fascia(ctx)?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slope {
    /// 前后坡（椽沿Y，沿X排列）
    Front,
    /// 两山坡（椽沿X，沿Y排列）
    Side,
}

impl Slope {
    fn to_3d(&self, q: Point2) -> Point3 {
        match self {
            Slope::Front => Point3::new(0.0, q.x, q.y),
            Slope::Side => Point3::new(q.x, 0.0, q.y),
        }
    }

    /// 沿排列方向平移
    fn across(&self, offset: f64) -> Vector3 {
        match self {
            Slope::Front => Vector3::new(offset, 0.0, 0.0),
            Slope::Side => Vector3::new(0.0, offset, 0.0),
        }
    }

    fn rule(&self, count: u32, spacing: f64) -> InstanceRule {
        match self {
            Slope::Front => InstanceRule::linear_x(count, spacing).with_mirror(false, true, Point3::origin()),
            Slope::Side => InstanceRule::linear_y(count, spacing).with_mirror(true, false, Point3::origin()),
        }
    }

    fn tag(&self) -> &'static str {
        match self {
            Slope::Front => "front",
            Slope::Side => "side",
        }
    }
}

fn emit_slope(
    ctx: &mut StageContext,
    slope: Slope,
    segments: &[Segment],
    board_half: impl Fn(usize) -> f64,
) -> BuildResult<()> {
    let p = ctx.params;
    let r = p.rafter_diameter / 2.0;
    let spacing = p.rafter_diameter * RAFTER_SPACING_RATIO;
    let seg = ctx.segments();

    for (k, s) in segments.iter().enumerate() {
        if s.half_width >= spacing / 2.0 {
            let count = (2.0 * s.half_width / spacing).floor() as u32 + 1;
            let pitch = 2.0 * s.half_width / (count - 1).max(1) as f64;
            let shaft = Solid::cylinder_between(slope.to_3d(s.lower), slope.to_3d(s.upper), r, seg)?;
            ctx.add(
                AssemblyNode::new(NodeKind::Rafter, format!("rafter_{}_{}", slope.tag(), k))
                    .at(slope.across(-s.half_width))
                    .with_solid(shaft)
                    .with_instances(slope.rule(count, pitch)),
            )?;

            if k == 0 && p.use_flyrafter {
                let run = s.upper - s.lower;
                let tail = s.lower + run * FLY_TAIL_RATIO + up(p.rafter_diameter);
                let slope_ratio = if run.x.abs() > EPSILON { run.y / run.x } else { 0.0 };
                let head = Point2::new(
                    s.lower.x - p.fly_overhang,
                    s.lower.y + p.rafter_diameter - slope_ratio * p.fly_overhang * 0.5,
                );
                let fly = Solid::cylinder_between(slope.to_3d(head), slope.to_3d(tail), r, seg)?;
                ctx.add(
                    AssemblyNode::new(NodeKind::FlyRafter, format!("fly_rafter_{}", slope.tag()))
                        .at(slope.across(-s.half_width))
                        .with_solid(fly)
                        .with_instances(slope.rule(count, pitch)),
                )?;
            }
        }

        // 望板铺在椽背上
        let w = board_half(k);
        let lift = up(r);
        let (a, b) = (s.lower + lift, s.upper + lift);
        let quad = [
            slope.to_3d(a) + slope.across(-w),
            slope.to_3d(a) + slope.across(w),
            slope.to_3d(b) + slope.across(w),
            slope.to_3d(b) + slope.across(-w),
        ];
        let board = Solid::prism(&quad, Vector3::new(0.0, 0.0, p.rafter_diameter * BOARD_RATIO))?;
        let mirror = match slope {
            Slope::Front => InstanceRule::mirrored(false, true, Point3::origin()),
            Slope::Side => InstanceRule::mirrored(true, false, Point3::origin()),
        };
        ctx.add(
            AssemblyNode::new(NodeKind::RoofBoard, format!("roof_board_{}_{}", slope.tag(), k))
                .with_solid(board)
                .with_instances(mirror),
        )?;
    }
    Ok(())
}

fn up(h: f64) -> Vector2 {
    Vector2::new(0.0, h)
}

fn build_fan(ctx: &mut StageContext, corner: &CornerLayout) -> BuildResult<()> {
    let p = ctx.params;
    let frame = ctx.frame;
    let spacing = p.rafter_diameter * RAFTER_SPACING_RATIO;
    let curve = &corner.eave_curve;
    let run = curve.end().x - curve.start().x;
    let count = ((run / spacing).floor() as usize).saturating_sub(1).max(1);
    let heads = fan_heads(curve, count, ctx.config)?;

    let mirror = ctx.diagonal_mirror(&corner.pivot);
    let four = InstanceRule::mirrored(true, true, Point3::origin());
    let half_w = p.total_width / 2.0;
    let half_d = p.total_depth / 2.0;
    let span = p.rafter_span;
    let seat_z = frame.eave_z + frame.seat_offset;
    let r = p.rafter_diameter / 2.0;

    for (i, head) in heads.into_iter().enumerate() {
        // 椽尾沿角梁自内向外均布
        let f = (i + 1) as f64 / (count + 1) as f64;
        let back = span * (1.0 - f);
        let tail = Point3::new(half_w - back, half_d - back, seat_z + p.lifts[0] * back);
        let shaft = Solid::cylinder_between(tail, head, r, ctx.segments())?;
        let mirrored = shaft.transformed(&mirror);
        ctx.add(
            AssemblyNode::new(NodeKind::FanRafter, format!("fan_rafter_{}", i))
                .with_solid(shaft)
                .with_instances(four),
        )?;
        ctx.add(
            AssemblyNode::new(NodeKind::FanRafter, format!("fan_rafter_{}_mirror", i))
                .with_solid(mirrored)
                .with_instances(four),
        )?;
    }

    // 翼角望板：两侧檐口曲线与角梁根围成的扇面
    let mirrored_curve = curve.transformed(&mirror);
    let mut outline = curve.sample();
    outline.extend(mirrored_curve.sample().into_iter().rev().skip(1));
    let start = curve.start();
    outline.push(Point3::new(start.x, half_d - (half_w - start.x), seat_z));
    let board = Solid::prism(&outline, Vector3::new(0.0, 0.0, p.rafter_diameter * BOARD_RATIO))?;
    ctx.add(
        AssemblyNode::new(NodeKind::RoofBoard, "roof_board_corner")
            .with_solid(board)
            .with_instances(four),
    )?;

    tracing::debug!("Placed {} fan rafters per corner side", count);
    Ok(())
}

/// 连檐：正身为直线，翼角沿檐口曲线
fn build_fascia(ctx: &mut StageContext) -> BuildResult<()> {
    let p = ctx.params;
    let frame = ctx.frame;
    let d = p.rafter_diameter;
    let section = CrossSection::new(d, d);
    let half_w = p.total_width / 2.0;
    let half_d = p.total_depth / 2.0;
    let z = frame.eave_tip_z;
    let y = -half_d - frame.overhang;

    let x_straight = match &frame.corner {
        Some(corner) => corner.eave_curve.start().x,
        None => half_w + frame.gable_overhang,
    };
    if x_straight > EPSILON {
        let solid = Solid::sweep(
            &[Point3::new(-x_straight, y, z), Point3::new(x_straight, y, z)],
            &section.profile(),
        )?;
        ctx.add(
            AssemblyNode::new(NodeKind::Fascia, "fascia_front")
                .with_solid(solid)
                .with_instances(InstanceRule::mirrored(false, true, Point3::origin())),
        )?;
    }

    let Some(corner) = &frame.corner else {
        return Ok(());
    };
    let y_straight = half_d - (half_w - x_straight);
    if y_straight > EPSILON {
        let x = -half_w - frame.overhang;
        let solid = Solid::sweep(
            &[Point3::new(x, -y_straight, z), Point3::new(x, y_straight, z)],
            &section.profile(),
        )?;
        ctx.add(
            AssemblyNode::new(NodeKind::Fascia, "fascia_side")
                .with_solid(solid)
                .with_instances(InstanceRule::mirrored(true, false, Point3::origin())),
        )?;
    }

    let count = (ctx.config.curve_resolution / 2).max(2);
    let points = equal_division(&corner.eave_curve, count, EndpointMode::Include, ctx.config.oversample_factor)?;
    let degree = 3.min(points.len() - 1);
    let fascia = CurveDescriptor::nurbs(points, degree)?
        .with_resolution(ctx.config.curve_resolution)
        .with_section(section);
    let mirror = ctx.diagonal_mirror(&corner.pivot);
    let four = InstanceRule::mirrored(true, true, Point3::origin());
    let solid = fascia.to_solid()?;
    let mirrored = fascia.transformed(&mirror).to_solid()?;
    let node = ctx.add(
        AssemblyNode::new(NodeKind::Fascia, "fascia_corner")
            .with_payload(Payload::Curve(fascia))
            .with_instances(four),
    )?;
    ctx.add_to(
        node,
        AssemblyNode::new(NodeKind::Fascia, "fascia_corner_body")
            .with_solid(solid)
            .with_instances(four),
    )?;
    ctx.add_to(
        node,
        AssemblyNode::new(NodeKind::Fascia, "fascia_corner_mirror")
            .with_solid(mirrored)
            .with_instances(four),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::AssemblyTree;
    use crate::builder::{AssemblyBuilder, FrameLayout, Stage};
    use crate::orchestrator::CancelToken;
    use crate::params::{ParameterSet, RoofStyle};
    use crate::progress::NullSink;
    use crate::resolver::{ConstraintResolver, RebuildPlan};

    #[test]
    fn test_eave_rafter_is_tangent() {
        let center = Point2::new(0.0, 0.0);
        let upper = Point2::new(4.0, 3.0);
        let (tip, tail) = eave_rafter(center, 1.0, upper, -2.0).unwrap();
        assert_eq!(tail, upper);
        assert!((tip.x + 2.0).abs() < 1e-12);
        // 圆心到椽中线的距离等于半径
        let d = tail - tip;
        let distance = (d.x * (tip.y - center.y) - d.y * (tip.x - center.x)).abs() / d.norm();
        assert!((distance - 1.0).abs() < 1e-9);
        // 取上方切线：椽中线在圆心上方
        let at_center = tip.y + d.y / d.x * (center.x - tip.x);
        assert!(at_center > center.y);
    }

    #[test]
    fn test_eave_rafter_inside_purlin() {
        let result = eave_rafter(Point2::origin(), 2.0, Point2::new(1.0, 0.0), -3.0);
        assert!(matches!(result, Err(BuildError::GeometryFailure { .. })));
    }

    #[test]
    fn test_fan_heads_on_curve() {
        let params = ParameterSet::default();
        let resolved = ConstraintResolver::new().resolve(&params).unwrap();
        let config = BuildConfig::default();
        let frame = FrameLayout::compute(&resolved, &config).unwrap();
        let curve = &frame.corner.as_ref().unwrap().eave_curve;
        let heads = fan_heads(curve, 5, &config).unwrap();
        assert_eq!(heads.len(), 5);
        let (x0, x1) = (curve.start().x, curve.end().x);
        for (i, head) in heads.iter().enumerate() {
            let target = x0 + (x1 - x0) * (i + 1) as f64 / 6.0;
            // 等分采样的近似值经求交校正，仍在采样间距内
            assert!((head.x - target).abs() < (x1 - x0) / 1000.0);
        }
        assert!(heads.windows(2).all(|w| w[1].z >= w[0].z));
    }

    #[test]
    fn test_gable_rafters() {
        let params = ParameterSet { dk: Some(1.0), x_rooms: 3, y_rooms: 1, roof_style: RoofStyle::Gable, ..Default::default() };
        let resolved = ConstraintResolver::new().resolve(&params).unwrap();
        let mut tree = AssemblyTree::new("rafters");
        AssemblyBuilder::default()
            .build(&mut tree, &resolved, RebuildPlan::Nothing, &CancelToken::new(), &NullSink)
            .unwrap();

        let root = tree.stage_root(Stage::Rafters).unwrap();
        let count = |kind| tree.descendants(root).iter().filter(|id| tree.get(**id).is_some_and(|n| n.kind == kind)).count();
        assert_eq!(count(NodeKind::Rafter), resolved.steps_per_side());
        assert_eq!(count(NodeKind::FlyRafter), 1);
        assert_eq!(count(NodeKind::FanRafter), 0);
        assert_eq!(count(NodeKind::Fascia), 1);

        // 檐椽头伸出檐檩
        let eave_rafter = tree
            .find_kind(NodeKind::Rafter)
            .into_iter()
            .find(|id| tree.get(*id).is_some_and(|n| n.name == "rafter_front_0"))
            .unwrap();
        let lowest_y = tree
            .node_world_solids(eave_rafter)
            .iter()
            .map(|s| s.bounding_box().min.y)
            .fold(f64::INFINITY, f64::min);
        assert!(lowest_y < -resolved.total_depth / 2.0 - resolved.eave_overhang + resolved.rafter_diameter);
    }
}
