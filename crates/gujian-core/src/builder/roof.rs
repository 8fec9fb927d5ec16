//! 屋架阶段
//!
//! [`FrameLayout`] 由参数纯计算出各层檩的位置、檐口高度和翼角曲线，
//! 后面的斗栱、梁架、椽望、瓦面阶段都从它取位置，不再回读屋架节点。
//!
//! 坐标：前檐在 -Y，檩按前坡给出，后坡由Y向镜像得到；
//! 翼角只构造右后角的一侧，另一侧由对角镜像得到，四角由XY镜像得到。

use super::StageContext;
use crate::assembly::{AssemblyNode, InstanceRule, NodeId, NodeKind, Payload};
use crate::config::BuildConfig;
use crate::curve::{tangents_continuous, CrossSection, CurveDescriptor};
use crate::error::{BuildError, BuildResult};
use crate::math::{Point2, Point3, Vector3, EPSILON};
use crate::mesh::Solid;
use crate::params::RoofStyle;
use crate::resolver::ResolvedParams;
use crate::silhouette::{project_silhouette, ProjectionPlane, SilhouetteMode, SilhouetteOptions};

/// 悬山出梢（椽径倍数）
const GABLE_OVERHANG_RATIO: f64 = 6.0;
/// 角梁截面宽（檩径倍数）
const CORNER_BEAM_WIDTH_RATIO: f64 = 0.7;
/// 山花板厚（椽径倍数）
const GABLE_BOARD_RATIO: f64 = 1.0;
/// 起翘点切线连续的容差
const TANGENT_TOLERANCE: f64 = 1e-6;

/// 一层檩（前坡）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PurlinLevel {
    /// 前坡Y坐标（≤0）
    pub y: f64,
    /// 檩中心高
    pub z: f64,
    /// 沿X的半长
    pub half_length: f64,
    /// 四面交圈（两山也有檩）
    pub ring: bool,
}

/// 翼角
#[derive(Debug, Clone, PartialEq)]
pub struct CornerLayout {
    /// 右后角后檐一侧的檐口曲线（自正身檐口起翘到角梁头）
    pub eave_curve: CurveDescriptor,
    /// 对角镜像枢轴（角柱中心，落在地面）
    pub pivot: Point3,
}

impl CornerLayout {
    /// 同侧正身檐口直线段，起翘点在中线上时为 `None`
    pub fn straight_eave(&self) -> Option<CurveDescriptor> {
        let start = self.eave_curve.start();
        (start.x > EPSILON).then(|| CurveDescriptor::straight(Point3::new(-start.x, start.y, start.z), start))
    }

    /// 翼角曲线在起翘点与正身檐口相切
    pub fn check_tangent(&self) -> BuildResult<()> {
        match self.straight_eave() {
            Some(straight) if !tangents_continuous(&straight, &self.eave_curve, TANGENT_TOLERANCE) => Err(
                BuildError::geometry("eave curve", "corner curve kinks where it leaves the straight eave"),
            ),
            _ => Ok(()),
        }
    }
}

/// 屋架布局
#[derive(Debug, Clone, PartialEq)]
pub struct FrameLayout {
    /// 自檐向脊，共 `steps_per_side + 1` 层
    pub levels: Vec<PurlinLevel>,
    /// 檐檩中心高
    pub eave_z: f64,
    /// 正身檐口高（椽头上皮）
    pub eave_tip_z: f64,
    /// 檐口总出
    pub overhang: f64,
    /// 檩中心到椽中心
    pub seat_offset: f64,
    /// 悬山出梢
    pub gable_overhang: f64,
    pub corner: Option<CornerLayout>,
}

impl FrameLayout {
    pub fn compute(p: &ResolvedParams, config: &BuildConfig) -> BuildResult<Self> {
        let n = p.steps_per_side();
        if n == 0 {
            return Err(BuildError::invalid("rafter_count", "roof needs at least one step per side"));
        }
        let style = p.roof_style;
        let half_w = p.total_width / 2.0;
        let half_d = p.total_depth / 2.0;
        let span = p.rafter_span;

        let z_top = p.platform_height + p.pillar_height;
        let eave_z = z_top + p.dougong_height() + p.purlin_diameter / 2.0;

        let mut levels = Vec::with_capacity(n + 1);
        let mut z = eave_z;
        for k in 0..=n {
            if k > 0 {
                z += p.lifts[k - 1] * span;
            }
            let inset = k as f64 * span;
            let half_length = match style {
                RoofStyle::Gable | RoofStyle::FlushGable => half_w,
                RoofStyle::Hip => half_w - inset * (1.0 - p.tuishan),
                RoofStyle::HipGable if k == 0 => half_w,
                RoofStyle::HipGable => half_w - span,
                RoofStyle::Pyramid | RoofStyle::FlatTopPyramid => half_w - inset,
            };
            if half_length < -EPSILON {
                return Err(BuildError::invalid(
                    "rafter_span",
                    format!("purlin {} of the {} roof has negative length", k, style.label()),
                ));
            }
            let ring = match style {
                RoofStyle::Hip | RoofStyle::Pyramid => k < n,
                RoofStyle::HipGable => k == 0,
                RoofStyle::FlatTopPyramid => true,
                RoofStyle::Gable | RoofStyle::FlushGable => false,
            };
            levels.push(PurlinLevel {
                y: -half_d + inset,
                z,
                half_length: half_length.max(0.0),
                ring,
            });
        }
        if style == RoofStyle::FlatTopPyramid && levels[n].half_length <= EPSILON {
            return Err(BuildError::invalid("rafter_span", "flat-top roof has no flat area left"));
        }

        let seat_offset = p.purlin_diameter / 2.0 + p.rafter_diameter / 2.0;
        let overhang = p.total_overhang();
        let eave_tip_z = eave_z + seat_offset - overhang * p.lifts[0];
        let gable_overhang = if style == RoofStyle::Gable {
            GABLE_OVERHANG_RATIO * p.rafter_diameter
        } else {
            0.0
        };

        let corner = style.has_corners().then(|| {
            let x_start = (half_w - span).max(0.0);
            let p0 = Point3::new(x_start, half_d + overhang, eave_tip_z);
            let tip = Point3::new(
                half_w + overhang + p.chuchong,
                half_d + overhang + p.chuchong,
                eave_tip_z + p.qiqiao,
            );
            // 控制柄在X三等分点，曲线X随参数线性变化
            let run = tip.x - x_start;
            let h0 = Point3::new(x_start + run / 3.0, p0.y, p0.z);
            let h1 = Point3::new(
                x_start + run * 2.0 / 3.0,
                p0.y + p.chuchong / 2.0,
                p0.z + p.qiqiao / 2.0,
            );
            CornerLayout {
                eave_curve: CurveDescriptor::bezier(p0, h0, h1, tip)
                    .with_resolution(config.curve_resolution),
                pivot: Point3::new(half_w, half_d, 0.0),
            }
        });

        tracing::debug!(
            "Frame layout: {} purlin levels, eave at {:.3} m, ridge at {:.3} m",
            levels.len(),
            eave_z,
            z
        );
        Ok(Self {
            levels,
            eave_z,
            eave_tip_z,
            overhang,
            seat_offset,
            gable_overhang,
            corner,
        })
    }

    pub fn steps(&self) -> usize {
        self.levels.len() - 1
    }

    pub fn eave(&self) -> &PurlinLevel {
        &self.levels[0]
    }

    pub fn top(&self) -> &PurlinLevel {
        &self.levels[self.levels.len() - 1]
    }

    /// 前坡檩位折线 (0, y, z)，自檐向脊
    pub fn front_profile(&self) -> Vec<Point3> {
        self.levels.iter().map(|l| Point3::new(0.0, l.y, l.z)).collect()
    }

    /// 左山坡檩位折线 (-half, 0, z)，到第一层不交圈的檩为止；檐檩不交圈时为 None
    pub fn side_profile(&self) -> Option<Vec<Point3>> {
        if !self.eave().ring {
            return None;
        }
        let mut points = Vec::new();
        for level in &self.levels {
            points.push(Point3::new(-level.half_length, 0.0, level.z));
            if !level.ring {
                break;
            }
        }
        (points.len() >= 2).then_some(points)
    }

    /// 山面所在的X（无山面的形制为 None）
    pub fn gable_plane_x(&self, p: &ResolvedParams) -> Option<f64> {
        let half_w = p.total_width / 2.0;
        match p.roof_style {
            RoofStyle::Gable => Some(half_w + self.gable_overhang),
            RoofStyle::FlushGable => Some(half_w),
            RoofStyle::HipGable => Some(half_w - p.rafter_span),
            _ => None,
        }
    }
}

pub fn build(ctx: &mut StageContext) -> BuildResult<()> {
    let p = ctx.params;
    let frame = ctx.frame;
    let style = p.roof_style;
    let radius = p.purlin_diameter / 2.0;
    let segments = ctx.segments();
    let n = frame.steps();

    let mut gable_purlins: Vec<NodeId> = Vec::new();
    for (k, level) in frame.levels.iter().enumerate() {
        let is_top = k == n;
        if is_top && (style.has_main_ridge() || level.half_length <= EPSILON) {
            continue;
        }
        let reach = level.half_length + frame.gable_overhang;
        let shaft = Solid::cylinder_between(
            Point3::new(-reach, level.y, level.z),
            Point3::new(reach, level.y, level.z),
            radius,
            segments,
        )?;
        let id = ctx.add(
            AssemblyNode::new(NodeKind::Purlin, format!("purlin_{}", k))
                .with_solid(shaft)
                .with_instances(InstanceRule::mirrored(false, true, Point3::origin())),
        )?;
        let on_gable = match style {
            RoofStyle::Gable | RoofStyle::FlushGable => true,
            RoofStyle::HipGable => k >= 1,
            _ => false,
        };
        if on_gable {
            gable_purlins.push(id);
        }

        if level.ring && level.y.abs() > EPSILON {
            let side = Solid::cylinder_between(
                Point3::new(-level.half_length, level.y, level.z),
                Point3::new(-level.half_length, -level.y, level.z),
                radius,
                segments,
            )?;
            ctx.add(
                AssemblyNode::new(NodeKind::Purlin, format!("purlin_{}_side", k))
                    .with_solid(side)
                    .with_instances(InstanceRule::mirrored(true, false, Point3::origin())),
            )?;
        }
    }

    let top = *frame.top();
    if style.has_main_ridge() {
        let ridge_purlin = build_ridge(ctx, &top)?;
        gable_purlins.push(ridge_purlin);
    } else if top.half_length <= EPSILON {
        build_finial(ctx, &top)?;
    }

    if let Some(corner) = &frame.corner {
        build_corner(ctx, corner)?;
    }

    if let Some(x_gable) = frame.gable_plane_x(p) {
        build_gable_board(ctx, &gable_purlins, x_gable)?;
    }
    Ok(())
}

/// 正脊，返回脊檩节点
fn build_ridge(ctx: &mut StageContext, top: &PurlinLevel) -> BuildResult<NodeId> {
    let p = ctx.params;
    let d = p.purlin_diameter;
    let curve = CurveDescriptor::straight(
        Point3::new(-top.half_length, 0.0, top.z),
        Point3::new(top.half_length, 0.0, top.z),
    )
    .with_resolution(ctx.config.curve_resolution)
    .with_section(CrossSection::new(d, d));
    let ridge = ctx.add(AssemblyNode::new(NodeKind::Ridge, "ridge").with_payload(Payload::Curve(curve)))?;

    let reach = top.half_length + ctx.frame.gable_overhang;
    let shaft = Solid::cylinder_between(
        Point3::new(-reach, 0.0, top.z),
        Point3::new(reach, 0.0, top.z),
        d / 2.0,
        ctx.segments(),
    )?;
    ctx.add_to(ridge, AssemblyNode::new(NodeKind::Purlin, "ridge_purlin").with_solid(shaft))
}

/// 攒尖宝顶
fn build_finial(ctx: &mut StageContext, top: &PurlinLevel) -> BuildResult<()> {
    let d = ctx.params.purlin_diameter;
    let apex = Point3::new(0.0, 0.0, top.z);
    let finial = ctx.add(
        AssemblyNode::new(NodeKind::Ridge, "finial")
            .with_payload(Payload::Curve(CurveDescriptor::straight(apex, apex))),
    )?;
    ctx.add_to(
        finial,
        AssemblyNode::new(NodeKind::Ridge, "finial_body")
            .at(apex.coords)
            .with_solid(Solid::block(d * 1.5, d * 1.5, d * 3.0)),
    )?;
    Ok(())
}

/// 翼角：一对檐口曲线，加角梁与戗脊，四角镜像
fn build_corner(ctx: &mut StageContext, corner: &CornerLayout) -> BuildResult<()> {
    let p = ctx.params;
    let frame = ctx.frame;
    let four = InstanceRule::mirrored(true, true, Point3::origin());
    let mirror = ctx.diagonal_mirror(&corner.pivot);
    corner.check_tangent()?;

    ctx.add(
        AssemblyNode::new(NodeKind::EaveCurve, "eave_corner")
            .with_payload(Payload::Curve(corner.eave_curve.clone()))
            .with_instances(four),
    )?;
    ctx.add(
        AssemblyNode::new(NodeKind::EaveCurve, "eave_corner_mirror")
            .with_payload(Payload::Curve(corner.eave_curve.transformed(&mirror)))
            .with_instances(four),
    )?;

    // 角梁自翼角梁头沿交圈的檩角上行，到第一根不交圈的檩为止
    let mut points = vec![corner.eave_curve.end()];
    for level in &frame.levels {
        points.push(Point3::new(level.half_length, level.y.abs(), level.z + frame.seat_offset));
        if !level.ring {
            break;
        }
    }
    let degree = 2.min(points.len() - 1);
    let d = p.purlin_diameter;
    let hip = CurveDescriptor::nurbs(points, degree)?
        .with_resolution(ctx.config.curve_resolution)
        .with_section(CrossSection::new(d * CORNER_BEAM_WIDTH_RATIO, d));
    let beam = hip.to_solid()?;

    ctx.add(
        AssemblyNode::new(NodeKind::Ridge, "hip_ridge")
            .with_payload(Payload::Curve(hip))
            .with_instances(four),
    )?;
    ctx.add(
        AssemblyNode::new(NodeKind::CornerBeam, "corner_beam")
            .with_solid(beam)
            .with_instances(four),
    )?;
    Ok(())
}

/// 山花板：山面檩条在山面上的投影轮廓，向内拉出板厚
fn build_gable_board(ctx: &mut StageContext, purlins: &[NodeId], x_gable: f64) -> BuildResult<()> {
    let p = ctx.params;
    let frame = ctx.frame;
    let solids = ctx.local_solids(purlins);
    if solids.is_empty() {
        return Ok(());
    }

    let mid_z = (frame.eave().z + frame.top().z) / 2.0;
    let plane = ProjectionPlane::new(Vector3::x(), Point3::new(x_gable, 0.0, mid_z))?;
    let options = SilhouetteOptions {
        merge_distance: ctx.config.merge_distance,
        inset: None,
        mode: SilhouetteMode::ConvexHull,
    };
    let outline = project_silhouette(&plane, &solids, Point2::origin(), &options)?;
    let panel = Solid::prism(
        &outline.world_points(),
        Vector3::new(-GABLE_BOARD_RATIO * p.rafter_diameter, 0.0, 0.0),
    )?;

    let both = InstanceRule::mirrored(true, false, Point3::origin());
    let board = ctx.add(
        AssemblyNode::new(NodeKind::GableBoard, "gable_board")
            .with_payload(Payload::Outline(outline))
            .with_instances(both),
    )?;
    ctx.add_to(
        board,
        AssemblyNode::new(NodeKind::GableBoard, "gable_board_panel")
            .with_solid(panel)
            .with_instances(both),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::AssemblyTree;
    use crate::builder::{AssemblyBuilder, Stage};
    use crate::orchestrator::CancelToken;
    use crate::params::ParameterSet;
    use crate::progress::NullSink;
    use crate::resolver::{ConstraintResolver, RebuildPlan};

    fn resolve(params: &ParameterSet) -> ResolvedParams {
        ConstraintResolver::new().resolve(params).unwrap()
    }

    #[test]
    fn test_gable_levels() {
        let p = resolve(&ParameterSet {
            dk: Some(1.0),
            x_rooms: 3,
            y_rooms: 1,
            roof_style: RoofStyle::Gable,
            ..Default::default()
        });
        let frame = FrameLayout::compute(&p, &BuildConfig::default()).unwrap();
        assert_eq!(frame.levels.len(), p.steps_per_side() + 1);
        assert!(frame.levels.windows(2).all(|w| w[1].z > w[0].z));
        assert!(frame.top().y.abs() < 1e-9);
        assert!((frame.eave().y + p.total_depth / 2.0).abs() < 1e-9);
        assert!(frame.levels.iter().all(|l| (l.half_length - p.total_width / 2.0).abs() < 1e-9));
        assert!(frame.corner.is_none());
        assert_eq!(frame.gable_plane_x(&p), Some(p.total_width / 2.0 + frame.gable_overhang));
    }

    #[test]
    fn test_hip_tuishan_shortens_ridge() {
        let plain = resolve(&ParameterSet { roof_style: RoofStyle::Hip, tuishan: Some(0.0), ..Default::default() });
        let pushed = resolve(&ParameterSet { roof_style: RoofStyle::Hip, tuishan: Some(0.2), ..Default::default() });
        let config = BuildConfig::default();
        let a = FrameLayout::compute(&plain, &config).unwrap();
        let b = FrameLayout::compute(&pushed, &config).unwrap();
        // 推山把正脊向两山推长
        assert!(b.top().half_length > a.top().half_length);
        assert!(a.levels[..a.steps()].iter().all(|l| l.ring));
        assert!(!a.top().ring);
    }

    #[test]
    fn test_corner_curve_rises() {
        let p = resolve(&ParameterSet::default());
        let frame = FrameLayout::compute(&p, &BuildConfig::default()).unwrap();
        let corner = frame.corner.as_ref().unwrap();
        let start = corner.eave_curve.start();
        let end = corner.eave_curve.end();
        assert!((end.z - start.z - p.qiqiao).abs() < 1e-9);
        assert!((end.x - (p.total_width / 2.0 + frame.overhang + p.chuchong)).abs() < 1e-9);
        assert!((start.z - frame.eave_tip_z).abs() < 1e-12);
    }

    #[test]
    fn test_corner_curve_leaves_eave_tangentially() {
        let p = resolve(&ParameterSet::default());
        let frame = FrameLayout::compute(&p, &BuildConfig::default()).unwrap();
        let corner = frame.corner.clone().unwrap();
        assert!(corner.straight_eave().is_some());
        assert!(corner.check_tangent().is_ok());

        // 控制柄抬高后起翘点出现折角
        let start = corner.eave_curve.start();
        let end = corner.eave_curve.end();
        let kinked = CornerLayout {
            eave_curve: CurveDescriptor::bezier(start, start + Vector3::new(1.0, 0.0, 1.0), end, end),
            ..corner
        };
        assert!(matches!(kinked.check_tangent(), Err(BuildError::GeometryFailure { .. })));
    }

    #[test]
    fn test_gable_board_on_gable_plane() {
        let params = ParameterSet { dk: Some(1.0), x_rooms: 3, y_rooms: 1, roof_style: RoofStyle::FlushGable, ..Default::default() };
        let p = resolve(&params);
        let mut tree = AssemblyTree::new("roof");
        AssemblyBuilder::default()
            .build(&mut tree, &p, RebuildPlan::Nothing, &CancelToken::new(), &NullSink)
            .unwrap();

        let roof = tree.stage_root(Stage::RoofFrame).unwrap();
        let board = tree.find_in(roof, NodeKind::GableBoard).unwrap();
        let Payload::Outline(outline) = &tree.get(board).unwrap().payload else {
            panic!("gable board without outline");
        };
        assert!(outline.is_simple());
        assert!(outline.world_points().iter().all(|q| (q.x - p.total_width / 2.0).abs() < 1e-9));
        // 左右两山
        assert_eq!(tree.get(board).unwrap().instance_count(), 2);
    }
}
