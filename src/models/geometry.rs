//! 几何数据类型：标记点、区域框

use serde::{Deserialize, Serialize};

/// 二维点（像素坐标）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point2) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// 标记点检测失败原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerFailure {
    /// 方形候选不足四个
    MarkersNotFound,
    /// 几何处理能力不可用（编译时关闭了 geometry 特性）
    VisionLibraryUnavailable,
}

/// 四个角标记点的检测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerSet {
    pub success: bool,
    /// 顺序：左上、右上、左下、右下
    pub corners: Option<[Point2; 4]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<MarkerFailure>,
}

impl MarkerSet {
    pub fn found(top_left: Point2, top_right: Point2, bottom_left: Point2, bottom_right: Point2) -> Self {
        Self {
            success: true,
            corners: Some([top_left, top_right, bottom_left, bottom_right]),
            failure_reason: None,
        }
    }

    pub fn failed(reason: MarkerFailure) -> Self {
        Self {
            success: false,
            corners: None,
            failure_reason: Some(reason),
        }
    }

    pub fn top_left(&self) -> Option<Point2> {
        self.corners.map(|c| c[0])
    }

    pub fn top_right(&self) -> Option<Point2> {
        self.corners.map(|c| c[1])
    }

    pub fn bottom_left(&self) -> Option<Point2> {
        self.corners.map(|c| c[2])
    }

    pub fn bottom_right(&self) -> Option<Point2> {
        self.corners.map(|c| c[3])
    }
}

/// 区域类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    StudentIdDigit,
    ExamIdDigit,
    QuestionScore,
}

/// 模板中的一个命名矩形区域
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionBox {
    pub name: String,
    pub kind: RegionKind,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// 仅题目区域有题号
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_number: Option<u32>,
}

impl RegionBox {
    pub fn new(name: impl Into<String>, kind: RegionKind, x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            x,
            y,
            width,
            height,
            question_number: None,
        }
    }

    pub fn question(number: u32, x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            question_number: Some(number),
            ..Self::new(format!("q{:02}", number), RegionKind::QuestionScore, x, y, width, height)
        }
    }

    /// 区域是否完整位于给定尺寸的图像内
    pub fn fits_within(&self, image_width: u32, image_height: u32) -> bool {
        let right = self.x as u64 + self.width as u64;
        let bottom = self.y as u64 + self.height as u64;
        right <= image_width as u64 && bottom <= image_height as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_bounds() {
        let region = RegionBox::new("sid_0", RegionKind::StudentIdDigit, 10, 10, 20, 20);
        assert!(region.fits_within(30, 30));
        assert!(!region.fits_within(29, 30));
        let huge = RegionBox::new("x", RegionKind::StudentIdDigit, u32::MAX, 0, 10, 10);
        assert!(!huge.fits_within(100, 100));
    }

    #[test]
    fn test_marker_set_accessors() {
        let set = MarkerSet::found(
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 0.0),
            Point2::new(0.0, 10.0),
            Point2::new(10.0, 10.0),
        );
        assert_eq!(set.bottom_right(), Some(Point2::new(10.0, 10.0)));
        let failed = MarkerSet::failed(MarkerFailure::MarkersNotFound);
        assert!(!failed.success);
        assert!(failed.top_left().is_none());
    }
}
