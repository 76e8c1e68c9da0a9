//! 答题卡模板布局
//!
//! 坐标是静态配置：一套用于校正后的标准画布（2480×3508），
//! 一套用于未校正页面（200 DPI 渲染的 1654×2339）。

use serde::{Deserialize, Serialize};

use super::geometry::{RegionBox, RegionKind};

/// 标准画布宽度
pub const CANONICAL_WIDTH: u32 = 2480;
/// 标准画布高度
pub const CANONICAL_HEIGHT: u32 = 3508;
/// 未校正参考页面宽度
pub const REFERENCE_PAGE_WIDTH: u32 = 1654;
/// 未校正参考页面高度
pub const REFERENCE_PAGE_HEIGHT: u32 = 2339;

/// 一行等间距的数字格
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitRow {
    pub x: u32,
    pub y: u32,
    pub cell_width: u32,
    pub cell_height: u32,
    /// 相邻格左边缘的间距
    pub pitch: u32,
    pub count: u32,
}

/// 一列等间距的题目得分框
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionColumn {
    pub first_number: u32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// 相邻框上边缘的间距
    pub pitch: u32,
    pub count: u32,
}

/// 模板描述（可从 TOML 读取）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSpec {
    pub width: u32,
    pub height: u32,
    pub student_id: DigitRow,
    pub exam_id: DigitRow,
    pub question_columns: Vec<QuestionColumn>,
}

/// 模板文件：校正模式和兜底模式各一套
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSpecs {
    pub canonical: TemplateSpec,
    pub fallback: TemplateSpec,
}

const CANONICAL_SPEC: TemplateSpec = TemplateSpec {
    width: CANONICAL_WIDTH,
    height: CANONICAL_HEIGHT,
    student_id: DigitRow { x: 1180, y: 430, cell_width: 110, cell_height: 140, pitch: 120, count: 9 },
    exam_id: DigitRow { x: 1180, y: 640, cell_width: 110, cell_height: 140, pitch: 120, count: 4 },
    question_columns: Vec::new(),
};

const CANONICAL_COLUMNS: [QuestionColumn; 2] = [
    QuestionColumn { first_number: 1, x: 1450, y: 1000, width: 300, height: 160, pitch: 220, count: 10 },
    QuestionColumn { first_number: 11, x: 2050, y: 1000, width: 300, height: 160, pitch: 220, count: 10 },
];

const FALLBACK_SPEC: TemplateSpec = TemplateSpec {
    width: REFERENCE_PAGE_WIDTH,
    height: REFERENCE_PAGE_HEIGHT,
    student_id: DigitRow { x: 792, y: 358, cell_width: 65, cell_height: 86, pitch: 71, count: 9 },
    exam_id: DigitRow { x: 792, y: 487, cell_width: 65, cell_height: 86, pitch: 71, count: 4 },
    question_columns: Vec::new(),
};

const FALLBACK_COLUMNS: [QuestionColumn; 2] = [
    QuestionColumn { first_number: 1, x: 951, y: 708, width: 177, height: 98, pitch: 135, count: 10 },
    QuestionColumn { first_number: 11, x: 1305, y: 708, width: 177, height: 98, pitch: 135, count: 10 },
];

impl TemplateSpecs {
    /// 内置坐标表
    pub fn builtin() -> Self {
        Self {
            canonical: TemplateSpec {
                question_columns: CANONICAL_COLUMNS.to_vec(),
                ..CANONICAL_SPEC
            },
            fallback: TemplateSpec {
                question_columns: FALLBACK_COLUMNS.to_vec(),
                ..FALLBACK_SPEC
            },
        }
    }
}

/// 展开后的模板布局：所有区域框
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateLayout {
    pub page_width: u32,
    pub page_height: u32,
    /// 学号各位，从左到右
    pub student_id: Vec<RegionBox>,
    /// 试卷编号各位，从左到右
    pub exam_id: Vec<RegionBox>,
    pub questions: Vec<RegionBox>,
}

impl TemplateLayout {
    pub fn from_spec(spec: &TemplateSpec) -> Self {
        let questions = spec
            .question_columns
            .iter()
            .flat_map(|col| {
                (0..col.count).map(move |i| {
                    RegionBox::question(col.first_number + i, col.x, col.y + i * col.pitch, col.width, col.height)
                })
            })
            .collect();

        Self {
            page_width: spec.width,
            page_height: spec.height,
            student_id: expand_row(&spec.student_id, "sid", RegionKind::StudentIdDigit),
            exam_id: expand_row(&spec.exam_id, "eid", RegionKind::ExamIdDigit),
            questions,
        }
    }

    /// 按题号查找得分框
    pub fn question_region(&self, number: u32) -> Option<&RegionBox> {
        self.questions
            .iter()
            .find(|r| r.question_number == Some(number))
    }

    /// 按实际页面尺寸等比缩放所有区域（兜底模式下页面分辨率可能不同）
    pub fn scaled_to(&self, width: u32, height: u32) -> TemplateLayout {
        if width == self.page_width && height == self.page_height {
            return self.clone();
        }
        let sx = width as f64 / self.page_width as f64;
        let sy = height as f64 / self.page_height as f64;
        let scale_box = |r: &RegionBox| RegionBox {
            x: (r.x as f64 * sx).round() as u32,
            y: (r.y as f64 * sy).round() as u32,
            width: ((r.width as f64 * sx).round() as u32).max(1),
            height: ((r.height as f64 * sy).round() as u32).max(1),
            ..r.clone()
        };

        TemplateLayout {
            page_width: width,
            page_height: height,
            student_id: self.student_id.iter().map(scale_box).collect(),
            exam_id: self.exam_id.iter().map(scale_box).collect(),
            questions: self.questions.iter().map(scale_box).collect(),
        }
    }

    /// 所有区域是否都位于页面内
    pub fn validate(&self) -> Result<(), String> {
        self.student_id
            .iter()
            .chain(self.exam_id.iter())
            .chain(self.questions.iter())
            .find(|r| !r.fits_within(self.page_width, self.page_height) || r.width == 0 || r.height == 0)
            .map_or(Ok(()), |r| {
                Err(format!(
                    "区域 {} ({},{},{}x{}) 不在页面 {}x{} 内",
                    r.name, r.x, r.y, r.width, r.height, self.page_width, self.page_height
                ))
            })
    }
}

fn expand_row(row: &DigitRow, prefix: &str, kind: RegionKind) -> Vec<RegionBox> {
    (0..row.count)
        .map(|i| {
            RegionBox::new(
                format!("{}_{}", prefix, i),
                kind,
                row.x + i * row.pitch,
                row.y,
                row.cell_width,
                row.cell_height,
            )
        })
        .collect()
}

/// 校正模式与兜底模式的布局
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateLayouts {
    pub canonical: TemplateLayout,
    pub fallback: TemplateLayout,
}

impl TemplateLayouts {
    pub fn from_specs(specs: &TemplateSpecs) -> Self {
        Self {
            canonical: TemplateLayout::from_spec(&specs.canonical),
            fallback: TemplateLayout::from_spec(&specs.fallback),
        }
    }

    pub fn builtin() -> Self {
        Self::from_specs(&TemplateSpecs::builtin())
    }
}

impl Default for TemplateLayouts {
    fn default() -> Self {
        Self::builtin()
    }
}
