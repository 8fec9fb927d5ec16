//! 参数约束解析
//!
//! 将（可能只部分指定的）参数集解析为完全确定的尺寸表：
//! - 斗口推导：显式值 → 明间实际面阔反推 → 默认值
//! - 面阔/进深按明间向外展开，缺省处取默认表
//! - 步架与举架按屋顶形制推导
//! - 推山系数仅庑殿有效，其余形制钳制为0
//!
//! 解析是纯函数：相同输入总是得到相同输出，与调用顺序无关。

use crate::builder::Stage;
use crate::error::{BuildError, BuildResult};
use crate::params::{GridCell, PaintStyle, ParameterSet, RoofStyle};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// 默认斗口（米）
pub const DEFAULT_DK: f64 = 0.08;

/// 默认面阔（DK），明间、次间、梢间、尽间
pub const DEFAULT_X_WIDTHS: [f64; 4] = [77.0, 66.0, 66.0, 22.0];

/// 默认进深（DK），中间向外
pub const DEFAULT_Y_DEPTHS: [f64; 3] = [66.0, 44.0, 44.0];

/// 标准步架（DK）
pub const STANDARD_STEP_DK: f64 = 22.0;

const PURLIN_DIAMETER_DK: f64 = 4.5;
const RAFTER_DIAMETER_DK: f64 = 1.5;
const EAVE_RAFTER_OVERHANG_DK: f64 = 14.0;
const FLY_RAFTER_OVERHANG_DK: f64 = 7.0;
const DOUGONG_HEIGHT_DK: f64 = 14.0;

/// 斗栱布局
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DougongLayout {
    /// 斗栱总高（米）
    pub height: f64,
    /// 攒距（米）
    pub spacing: f64,
}

/// 解析后的参数（全部以米为单位）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedParams {
    pub dk: f64,
    pub roof_style: RoofStyle,
    /// 面阔各间，自左向右
    pub bays_x: Vec<f64>,
    /// 进深各间，自前向后
    pub bays_y: Vec<f64>,
    /// 柱网X坐标（以建筑中心为原点）
    pub grid_x: Vec<f64>,
    /// 柱网Y坐标
    pub grid_y: Vec<f64>,
    pub total_width: f64,
    pub total_depth: f64,
    pub pillar_height: f64,
    pub pillar_diameter: f64,
    pub platform_height: f64,
    pub platform_extend: f64,
    pub purlin_diameter: f64,
    pub rafter_diameter: f64,
    /// 整个进深的步架数
    pub rafter_steps: u32,
    /// 步架宽
    pub rafter_span: f64,
    /// 每坡各步的举架系数，自檐向脊
    pub lifts: Vec<f64>,
    pub tuishan: f64,
    /// 檐椽出
    pub eave_overhang: f64,
    /// 飞椽出
    pub fly_overhang: f64,
    /// 起翘
    pub qiqiao: f64,
    /// 出冲
    pub chuchong: f64,
    pub dougong: Option<DougongLayout>,
    pub hallway_depth: Option<f64>,
    pub use_flyrafter: bool,
    pub use_tile: bool,
    pub use_railing: bool,
    pub paint_style: PaintStyle,
    pub removed_pillars: BTreeSet<GridCell>,
    pub extra_pillars: Vec<[f64; 2]>,
}

impl ResolvedParams {
    /// 每坡步数
    pub fn steps_per_side(&self) -> usize {
        self.lifts.len()
    }

    /// 檐口总出（檐椽+飞椽）
    pub fn total_overhang(&self) -> f64 {
        if self.use_flyrafter {
            self.eave_overhang + self.fly_overhang
        } else {
            self.eave_overhang
        }
    }

    /// 斗栱高度（无斗栱时为0）
    pub fn dougong_height(&self) -> f64 {
        self.dougong.as_ref().map(|dg| dg.height).unwrap_or(0.0)
    }

    /// 全部线性尺寸，按固定顺序排列
    pub fn linear_dimensions(&self) -> Vec<f64> {
        let mut dims = vec![
            self.dk,
            self.total_width,
            self.total_depth,
            self.pillar_height,
            self.pillar_diameter,
            self.platform_height,
            self.platform_extend,
            self.purlin_diameter,
            self.rafter_diameter,
            self.rafter_span,
            self.eave_overhang,
            self.fly_overhang,
            self.qiqiao,
            self.chuchong,
        ];
        dims.extend(&self.bays_x);
        dims.extend(&self.bays_y);
        dims.extend(&self.grid_x);
        dims.extend(&self.grid_y);
        if let Some(dg) = &self.dougong {
            dims.push(dg.height);
            dims.push(dg.spacing);
        }
        if let Some(hallway) = self.hallway_depth {
            dims.push(hallway);
        }
        for p in &self.extra_pillars {
            dims.extend(p);
        }
        dims
    }
}

/// 两次解析之间的重建方案
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RebuildPlan {
    /// 无变化
    Nothing,
    /// 只改变了斗口：按比例缩放现有装配树
    Rescale(f64),
    /// 从某阶段起重建（含下游全部阶段）
    FromStage(Stage),
}

/// 参数约束解析器
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstraintResolver;

impl ConstraintResolver {
    pub fn new() -> Self {
        Self
    }

    /// 解析参数集
    pub fn resolve(&self, params: &ParameterSet) -> BuildResult<ResolvedParams> {
        params.validate()?;

        let style = params.roof_style;
        let hallway = if params.use_hallway { Some(params.hallway_depth) } else { None };

        let bays_x_dk = layout_bays(params.x_rooms, &params.x_widths, &DEFAULT_X_WIDTHS, None);
        let bays_y_dk = layout_bays(params.y_rooms, &params.y_depths, &DEFAULT_Y_DEPTHS, hallway);

        let dk = derive_dk(params, &bays_x_dk);
        let total_width_dk: f64 = bays_x_dk.iter().sum();
        let total_depth_dk: f64 = bays_y_dk.iter().sum();

        match style {
            RoofStyle::Hip | RoofStyle::HipGable if total_width_dk <= total_depth_dk => {
                return Err(BuildError::invalid(
                    "roof_style",
                    format!(
                        "{} roofs need width ({} DK) greater than depth ({} DK)",
                        style.label(),
                        total_width_dk,
                        total_depth_dk
                    ),
                ));
            }
            RoofStyle::Pyramid if (total_width_dk - total_depth_dk).abs() > 1e-6 => {
                return Err(BuildError::invalid(
                    "y_depths",
                    "pyramidal roofs need equal total width and depth",
                ));
            }
            _ => {}
        }

        let (steps, span_dk) = derive_steps(params, total_depth_dk, &bays_y_dk)?;
        let steps_per_side = if style == RoofStyle::FlatTopPyramid { 1 } else { (steps / 2) as usize };
        let lifts = lift_table(steps_per_side);

        let tuishan = if style.allows_tuishan() {
            params.tuishan.unwrap_or(0.1)
        } else {
            if params.tuishan.is_some_and(|t| t != 0.0) {
                tracing::debug!("tuishan is ignored for {} roofs, clamped to 0", style.label());
            }
            0.0
        };

        let rafter_diameter = RAFTER_DIAMETER_DK * dk;
        let scale = |values: &[f64]| values.iter().map(|v| v * dk).collect::<Vec<_>>();

        let bays_x = scale(&bays_x_dk);
        let bays_y = scale(&bays_y_dk);

        Ok(ResolvedParams {
            dk,
            roof_style: style,
            grid_x: grid_lines(&bays_x),
            grid_y: grid_lines(&bays_y),
            bays_x,
            bays_y,
            total_width: total_width_dk * dk,
            total_depth: total_depth_dk * dk,
            pillar_height: params.pillar_height * dk,
            pillar_diameter: params.pillar_diameter * dk,
            platform_height: params.platform_height * dk,
            platform_extend: params.platform_extend * dk,
            purlin_diameter: PURLIN_DIAMETER_DK * dk,
            rafter_diameter,
            rafter_steps: steps,
            rafter_span: span_dk * dk,
            lifts,
            tuishan,
            eave_overhang: EAVE_RAFTER_OVERHANG_DK * dk,
            fly_overhang: FLY_RAFTER_OVERHANG_DK * dk,
            qiqiao: params.qiqiao * rafter_diameter,
            chuchong: params.chuchong * rafter_diameter,
            dougong: params.use_dougong.then(|| DougongLayout {
                height: DOUGONG_HEIGHT_DK * dk,
                spacing: params.dougong_spacing * dk,
            }),
            hallway_depth: hallway.map(|h| h * dk),
            use_flyrafter: params.use_flyrafter,
            use_tile: params.use_tile,
            use_railing: params.use_railing,
            paint_style: params.paint_style,
            removed_pillars: params.removed_pillars.clone(),
            extra_pillars: params.extra_pillars.iter().map(|p| [p[0] * dk, p[1] * dk]).collect(),
        })
    }

    /// 根据参数字段变化确定重建方案
    ///
    /// 字段与阶段的依赖关系见 [`Stage::dependencies`]；斗口单独变化时只做缩放。
    pub fn plan_rebuild(
        &self,
        old_params: &ParameterSet,
        old: &ResolvedParams,
        new_params: &ParameterSet,
        new: &ResolvedParams,
    ) -> RebuildPlan {
        let changed = old_params.changed_fields(new_params);
        if changed.is_empty() && old == new {
            return RebuildPlan::Nothing;
        }

        let structural: Vec<_> = changed
            .iter()
            .filter(|f| !matches!(**f, "dk" | "reference_bay"))
            .collect();

        if structural.is_empty() {
            if (old.dk - new.dk).abs() < f64::EPSILON {
                return RebuildPlan::Nothing;
            }
            return RebuildPlan::Rescale(new.dk / old.dk);
        }

        let stage = Stage::ALL
            .into_iter()
            .find(|stage| stage.dependencies().iter().any(|dep| structural.contains(&dep)))
            .unwrap_or(Stage::Platform);

        if (old.dk - new.dk).abs() > f64::EPSILON {
            // 斗口与结构同时变化，只能全部重建
            return RebuildPlan::FromStage(Stage::Platform);
        }
        RebuildPlan::FromStage(stage)
    }
}

/// 由明间向外展开各间尺寸（DK），返回自左向右（自前向后）的序列
fn layout_bays(rooms: u32, given: &[f64], defaults: &[f64], hallway: Option<f64>) -> Vec<f64> {
    let width_at = |ring: usize| -> f64 {
        given
            .get(ring)
            .or_else(|| defaults.get(ring))
            .or_else(|| given.last())
            .or_else(|| defaults.last())
            .copied()
            .unwrap_or(STANDARD_STEP_DK)
    };

    let rooms = rooms as usize;
    // 单侧各间（由内向外）；偶数间时明间位于中线两侧
    let mut side: Vec<f64> = if rooms % 2 == 1 {
        (1..=rooms / 2).map(width_at).collect()
    } else {
        (0..rooms / 2).map(width_at).collect()
    };
    if let (Some(h), Some(outermost)) = (hallway, side.last_mut()) {
        *outermost = h;
    }

    let mut bays: Vec<f64> = side.iter().rev().copied().collect();
    if rooms % 2 == 1 {
        bays.push(width_at(0));
    }
    bays.extend(side);
    bays
}

/// 柱网坐标：以总宽中心为原点的各间分界
fn grid_lines(bays: &[f64]) -> Vec<f64> {
    let total: f64 = bays.iter().sum();
    let mut lines = Vec::with_capacity(bays.len() + 1);
    let mut cursor = -total / 2.0;
    lines.push(cursor);
    for bay in bays {
        cursor += bay;
        lines.push(cursor);
    }
    lines
}

fn derive_dk(params: &ParameterSet, bays_x_dk: &[f64]) -> f64 {
    if let Some(dk) = params.dk {
        return dk;
    }
    if let Some(reference) = params.reference_bay {
        // 明间在序列正中
        let centre = bays_x_dk[bays_x_dk.len() / 2];
        return reference / centre;
    }
    DEFAULT_DK
}

/// 推导步架数与步架宽（DK）
fn derive_steps(params: &ParameterSet, depth_dk: f64, bays_y_dk: &[f64]) -> BuildResult<(u32, f64)> {
    if params.roof_style == RoofStyle::FlatTopPyramid {
        let span = params.rafter_span.unwrap_or(depth_dk / bays_y_dk.len() as f64);
        if span * 2.0 >= depth_dk {
            return Err(BuildError::invalid(
                "rafter_span",
                "flat-top slopes would leave no flat roof",
            ));
        }
        return Ok((2, span));
    }

    let round_even = |n: f64| -> u32 {
        let n = (n.round() as u32).max(2);
        if n % 2 == 1 {
            n + 1
        } else {
            n
        }
    };

    match (params.rafter_count, params.rafter_span) {
        (Some(count), Some(span)) => {
            if (count as f64 * span - depth_dk).abs() > 1e-6 {
                return Err(BuildError::invalid(
                    "rafter_span",
                    format!(
                        "{} steps of {} DK do not cover the depth of {} DK",
                        count, span, depth_dk
                    ),
                ));
            }
            Ok((count, span))
        }
        (Some(count), None) => Ok((count, depth_dk / count as f64)),
        (None, Some(span)) => {
            let count = round_even(depth_dk / span);
            Ok((count, depth_dk / count as f64))
        }
        (None, None) => {
            let count = round_even(depth_dk / STANDARD_STEP_DK);
            Ok((count, depth_dk / count as f64))
        }
    }
}

/// 举架系数表（自檐向脊）
pub fn lift_table(steps_per_side: usize) -> Vec<f64> {
    match steps_per_side {
        0 => Vec::new(),
        1 => vec![0.5],
        2 => vec![0.5, 0.7],
        3 => vec![0.5, 0.7, 0.9],
        4 => vec![0.5, 0.65, 0.75, 0.9],
        5 => vec![0.5, 0.6, 0.7, 0.8, 0.9],
        n => (0..n).map(|i| 0.5 + 0.4 * i as f64 / (n - 1) as f64).collect(),
    }
}
