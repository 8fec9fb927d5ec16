//! 参数集与参数模式
//!
//! 参数集是一次构建的全部输入。除 `dk` 与 `reference_bay` 以米为单位外，
//! 所有线性尺寸都以斗口（DK）的倍数表示，因此修改斗口只会等比缩放整座建筑，
//! 不会改变构件拓扑。
//!
//! 每个数值字段都在 [`schema`] 中声明了取值域，超出取值域的输入被拒绝而不是
//! 被静默钳制；唯一的例外是推山系数（非庑殿顶时钳制为0）。

use crate::error::{BuildError, BuildResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// 屋顶形制
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RoofStyle {
    /// 庑殿顶（四坡五脊，唯一允许推山）
    Hip,
    /// 歇山顶
    HipGable,
    /// 悬山顶（两坡，檩出梢）
    Gable,
    /// 硬山顶（两坡，山墙齐檩）
    FlushGable,
    /// 盝顶（四坡平顶）
    FlatTopPyramid,
    /// 攒尖顶（四坡汇于宝顶）
    Pyramid,
}

impl RoofStyle {
    pub const ALL: [RoofStyle; 6] = [
        RoofStyle::Hip,
        RoofStyle::HipGable,
        RoofStyle::Gable,
        RoofStyle::FlushGable,
        RoofStyle::FlatTopPyramid,
        RoofStyle::Pyramid,
    ];

    /// 中文名称
    pub fn label(&self) -> &'static str {
        match self {
            RoofStyle::Hip => "庑殿",
            RoofStyle::HipGable => "歇山",
            RoofStyle::Gable => "悬山",
            RoofStyle::FlushGable => "硬山",
            RoofStyle::FlatTopPyramid => "盝顶",
            RoofStyle::Pyramid => "攒尖",
        }
    }

    /// 从命令行/模板中的名称解析
    pub fn parse(name: &str) -> Option<Self> {
        let lower = name.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|style| {
            style.label() == name.trim() || format!("{:?}", style).to_ascii_lowercase() == lower
        }).or(match lower.as_str() {
            "hip-gable" | "hip_gable" => Some(RoofStyle::HipGable),
            "flush-gable" | "flush_gable" => Some(RoofStyle::FlushGable),
            "flat-top" | "luding" | "pyramidal-flat-top" => Some(RoofStyle::FlatTopPyramid),
            _ => None,
        })
    }

    /// 是否有转角（翼角、角梁、起翘曲线）
    pub fn has_corners(&self) -> bool {
        matches!(
            self,
            RoofStyle::Hip | RoofStyle::HipGable | RoofStyle::FlatTopPyramid | RoofStyle::Pyramid
        )
    }

    /// 是否有山面（山花板/博缝）
    pub fn has_gable_ends(&self) -> bool {
        matches!(self, RoofStyle::HipGable | RoofStyle::Gable | RoofStyle::FlushGable)
    }

    /// 是否有正脊
    pub fn has_main_ridge(&self) -> bool {
        matches!(
            self,
            RoofStyle::Hip | RoofStyle::HipGable | RoofStyle::Gable | RoofStyle::FlushGable
        )
    }

    /// 推山系数仅对庑殿有意义
    pub fn allows_tuishan(&self) -> bool {
        matches!(self, RoofStyle::Hip)
    }

    /// 步架数是否必须为偶数（脊檩居中）
    pub fn requires_even_steps(&self) -> bool {
        !matches!(self, RoofStyle::FlatTopPyramid)
    }
}

/// 彩画形制（仅作为组合体共享参数携带）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PaintStyle {
    /// 和玺彩画
    #[default]
    Hexi,
    /// 旋子彩画
    Xuanzi,
    /// 苏式彩画
    Suzhou,
}

impl PaintStyle {
    pub fn label(&self) -> &'static str {
        match self {
            PaintStyle::Hexi => "和玺",
            PaintStyle::Xuanzi => "旋子",
            PaintStyle::Suzhou => "苏式",
        }
    }
}

/// 柱网格坐标（从左前角起计数）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridCell {
    pub ix: u32,
    pub iy: u32,
}

impl GridCell {
    pub fn new(ix: u32, iy: u32) -> Self {
        Self { ix, iy }
    }
}

/// 参数集
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterSet {
    /// 斗口（米），为空时由 `reference_bay` 反推或取默认值
    pub dk: Option<f64>,
    /// 明间实际面阔（米），用于反推斗口
    pub reference_bay: Option<f64>,
    /// 面阔间数
    pub x_rooms: u32,
    /// 进深间数
    pub y_rooms: u32,
    /// 面阔各间宽度（DK），由明间向外依次排列
    pub x_widths: Vec<f64>,
    /// 进深各间深度（DK），由中间向外依次排列
    pub y_depths: Vec<f64>,
    /// 檐柱高（DK）
    pub pillar_height: f64,
    /// 柱径（DK）
    pub pillar_diameter: f64,
    /// 台基高（DK）
    pub platform_height: f64,
    /// 台明出（DK）
    pub platform_extend: f64,
    pub roof_style: RoofStyle,
    /// 步架数（整个进深）
    pub rafter_count: Option<u32>,
    /// 步架宽（DK）
    pub rafter_span: Option<f64>,
    /// 推山系数
    pub tuishan: Option<f64>,
    /// 起翘（椽径倍数）
    pub qiqiao: f64,
    /// 出冲（椽径倍数）
    pub chuchong: f64,
    pub use_dougong: bool,
    /// 斗栱攒距（DK）
    pub dougong_spacing: f64,
    pub use_flyrafter: bool,
    /// 前后廊
    pub use_hallway: bool,
    /// 廊深（DK）
    pub hallway_depth: f64,
    pub use_tile: bool,
    pub use_railing: bool,
    pub paint_style: PaintStyle,
    /// 用户减去的柱子
    pub removed_pillars: BTreeSet<GridCell>,
    /// 用户添加的柱子（DK，建筑中心为原点）
    pub extra_pillars: Vec<[f64; 2]>,
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self {
            dk: None,
            reference_bay: None,
            x_rooms: 3,
            y_rooms: 3,
            x_widths: Vec::new(),
            y_depths: Vec::new(),
            pillar_height: 57.0,
            pillar_diameter: 6.0,
            platform_height: 12.0,
            platform_extend: 15.0,
            roof_style: RoofStyle::HipGable,
            rafter_count: None,
            rafter_span: None,
            tuishan: None,
            qiqiao: 4.0,
            chuchong: 3.0,
            use_dougong: true,
            dougong_spacing: 11.0,
            use_flyrafter: true,
            use_hallway: false,
            hallway_depth: 22.0,
            use_tile: true,
            use_railing: false,
            paint_style: PaintStyle::Hexi,
            removed_pillars: BTreeSet::new(),
            extra_pillars: Vec::new(),
        }
    }
}

/// 参数字段声明
///
/// 每个字段有闭区间取值域，并可限定适用的屋顶形制（空表示全部适用）。
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub min: f64,
    pub max: f64,
    pub styles: &'static [RoofStyle],
    pub description: &'static str,
}

impl FieldSpec {
    /// 检查取值（超出取值域即拒绝）
    pub fn check(&self, value: f64) -> BuildResult<()> {
        if !value.is_finite() {
            return Err(BuildError::invalid(self.name, format!("value {} is not finite", value)));
        }
        if value < self.min {
            return Err(BuildError::invalid(
                self.name,
                format!("value {} is below minimum {}", value, self.min),
            ));
        }
        if value > self.max {
            return Err(BuildError::invalid(
                self.name,
                format!("value {} is above maximum {}", value, self.max),
            ));
        }
        Ok(())
    }

    /// 该字段对给定形制是否有意义
    pub fn applies_to(&self, style: RoofStyle) -> bool {
        self.styles.is_empty() || self.styles.contains(&style)
    }
}

const ALL_STYLES: &[RoofStyle] = &[];

static SCHEMA: [FieldSpec; 18] = [
    FieldSpec { name: "dk", min: 0.005, max: 1.0, styles: ALL_STYLES, description: "斗口（米）" },
    FieldSpec { name: "reference_bay", min: 0.5, max: 20.0, styles: ALL_STYLES, description: "明间面阔（米）" },
    FieldSpec { name: "x_rooms", min: 1.0, max: 11.0, styles: ALL_STYLES, description: "面阔间数" },
    FieldSpec { name: "y_rooms", min: 1.0, max: 7.0, styles: ALL_STYLES, description: "进深间数" },
    FieldSpec { name: "x_widths", min: 11.0, max: 200.0, styles: ALL_STYLES, description: "面阔（DK）" },
    FieldSpec { name: "y_depths", min: 11.0, max: 200.0, styles: ALL_STYLES, description: "进深（DK）" },
    FieldSpec { name: "pillar_height", min: 20.0, max: 150.0, styles: ALL_STYLES, description: "柱高（DK）" },
    FieldSpec { name: "pillar_diameter", min: 2.0, max: 12.0, styles: ALL_STYLES, description: "柱径（DK）" },
    FieldSpec { name: "platform_height", min: 0.0, max: 60.0, styles: ALL_STYLES, description: "台基高（DK）" },
    FieldSpec { name: "platform_extend", min: 0.0, max: 60.0, styles: ALL_STYLES, description: "台明出（DK）" },
    FieldSpec { name: "rafter_count", min: 2.0, max: 16.0, styles: ALL_STYLES, description: "步架数" },
    FieldSpec { name: "rafter_span", min: 5.0, max: 60.0, styles: ALL_STYLES, description: "步架宽（DK）" },
    FieldSpec { name: "tuishan", min: 0.0, max: 0.5, styles: &[RoofStyle::Hip], description: "推山系数" },
    FieldSpec { name: "qiqiao", min: 0.0, max: 10.0, styles: ALL_STYLES, description: "起翘（椽径）" },
    FieldSpec { name: "chuchong", min: 0.0, max: 10.0, styles: ALL_STYLES, description: "出冲（椽径）" },
    FieldSpec { name: "dougong_spacing", min: 8.0, max: 16.0, styles: ALL_STYLES, description: "攒距（DK）" },
    FieldSpec { name: "hallway_depth", min: 11.0, max: 44.0, styles: ALL_STYLES, description: "廊深（DK）" },
    FieldSpec { name: "extra_pillars", min: -1000.0, max: 1000.0, styles: ALL_STYLES, description: "加柱坐标（DK）" },
];

/// 全部字段声明
pub fn schema() -> &'static [FieldSpec] {
    &SCHEMA
}

/// 按名称查找字段声明
pub fn field(name: &str) -> Option<&'static FieldSpec> {
    SCHEMA.iter().find(|spec| spec.name == name)
}

fn check_field(name: &str, value: f64) -> BuildResult<()> {
    match field(name) {
        Some(spec) => spec.check(value),
        None => Err(BuildError::invalid(name, "field is not declared in the schema")),
    }
}

impl ParameterSet {
    /// 按参数模式校验全部字段
    ///
    /// 仅做取值域与形制合法性检查，推导规则由解析器负责。
    pub fn validate(&self) -> BuildResult<()> {
        if let Some(dk) = self.dk {
            check_field("dk", dk)?;
        }
        if let Some(bay) = self.reference_bay {
            check_field("reference_bay", bay)?;
        }
        check_field("x_rooms", self.x_rooms as f64)?;
        check_field("y_rooms", self.y_rooms as f64)?;
        for &w in &self.x_widths {
            check_field("x_widths", w)?;
        }
        for &d in &self.y_depths {
            check_field("y_depths", d)?;
        }
        check_field("pillar_height", self.pillar_height)?;
        check_field("pillar_diameter", self.pillar_diameter)?;
        check_field("platform_height", self.platform_height)?;
        check_field("platform_extend", self.platform_extend)?;
        if let Some(count) = self.rafter_count {
            check_field("rafter_count", count as f64)?;
            if self.roof_style.requires_even_steps() && count % 2 != 0 {
                return Err(BuildError::invalid(
                    "rafter_count",
                    format!("{} roofs need an even step count, got {}", self.roof_style.label(), count),
                ));
            }
            if self.roof_style == RoofStyle::FlatTopPyramid && count != 2 {
                return Err(BuildError::invalid(
                    "rafter_count",
                    "flat-top roofs carry exactly one slope step per side",
                ));
            }
        }
        if let Some(span) = self.rafter_span {
            check_field("rafter_span", span)?;
        }
        if let Some(tuishan) = self.tuishan {
            if self.roof_style.allows_tuishan() {
                check_field("tuishan", tuishan)?;
            }
        }
        check_field("qiqiao", self.qiqiao)?;
        check_field("chuchong", self.chuchong)?;
        check_field("dougong_spacing", self.dougong_spacing)?;
        check_field("hallway_depth", self.hallway_depth)?;
        for p in &self.extra_pillars {
            check_field("extra_pillars", p[0])?;
            check_field("extra_pillars", p[1])?;
        }
        for cell in &self.removed_pillars {
            if cell.ix > self.x_rooms || cell.iy > self.y_rooms {
                return Err(BuildError::invalid(
                    "removed_pillars",
                    format!("cell ({}, {}) is outside the pillar grid", cell.ix, cell.iy),
                ));
            }
        }

        if self.use_hallway && self.y_rooms < 3 {
            return Err(BuildError::invalid("use_hallway", "a hallway needs at least 3 bays in depth"));
        }
        match self.roof_style {
            RoofStyle::Pyramid if self.x_rooms != self.y_rooms => Err(BuildError::invalid(
                "roof_style",
                format!(
                    "pyramidal roofs need a square plan, got {} x {} rooms",
                    self.x_rooms, self.y_rooms
                ),
            )),
            RoofStyle::FlatTopPyramid if self.y_rooms < 3 => Err(BuildError::invalid(
                "roof_style",
                "flat-top roofs need at least 3 bays in depth",
            )),
            _ => Ok(()),
        }
    }

    /// 与另一参数集相比发生变化的字段名
    pub fn changed_fields(&self, other: &ParameterSet) -> Vec<&'static str> {
        let mut changed = Vec::new();
        macro_rules! diff {
            ($($field:ident),* $(,)?) => {
                $(
                    if self.$field != other.$field {
                        changed.push(stringify!($field));
                    }
                )*
            };
        }
        diff!(
            dk,
            reference_bay,
            x_rooms,
            y_rooms,
            x_widths,
            y_depths,
            pillar_height,
            pillar_diameter,
            platform_height,
            platform_extend,
            roof_style,
            rafter_count,
            rafter_span,
            tuishan,
            qiqiao,
            chuchong,
            use_dougong,
            dougong_spacing,
            use_flyrafter,
            use_hallway,
            hallway_depth,
            use_tile,
            use_railing,
            paint_style,
            removed_pillars,
            extra_pillars,
        );
        changed
    }
}
