//! 标记点定位服务 - 业务能力层
//!
//! 在整页位图中找到印在模板四角的实心方形标记：
//! 灰度 → Otsu 二值化 → 外轮廓 → 多边形近似取四边形 → 面积/长宽比过滤 → 角点分配。

use image::DynamicImage;
use tracing::debug;

use crate::models::{MarkerFailure, MarkerSet, Point2};
use crate::models::layout::{REFERENCE_PAGE_HEIGHT, REFERENCE_PAGE_WIDTH};

/// 参考页面上标记框面积下限（px²）
pub const REFERENCE_MIN_AREA: f32 = 1600.0;
/// 参考页面上标记框面积上限（px²）
pub const REFERENCE_MAX_AREA: f32 = 3600.0;
/// 长宽比与 1 的最大偏差
pub const ASPECT_TOLERANCE: f32 = 0.3;

/// 一个通过过滤的方形候选
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerCandidate {
    /// 外接矩形中心
    pub center: Point2,
    pub width: u32,
    pub height: u32,
}

/// 标记点定位服务
#[derive(Debug, Clone)]
pub struct MarkerLocator {
    min_reference_area: f32,
    max_reference_area: f32,
    aspect_tolerance: f32,
}

impl MarkerLocator {
    pub fn new() -> Self {
        Self {
            min_reference_area: REFERENCE_MIN_AREA,
            max_reference_area: REFERENCE_MAX_AREA,
            aspect_tolerance: ASPECT_TOLERANCE,
        }
    }

    /// 相对参考页面的缩放系数
    pub fn scale_for(width: u32, height: u32) -> f32 {
        (width as f32 / REFERENCE_PAGE_WIDTH as f32).min(height as f32 / REFERENCE_PAGE_HEIGHT as f32)
    }

    /// 按页面尺寸缩放后的面积区间
    pub fn area_bounds(&self, width: u32, height: u32) -> (f32, f32) {
        let scale = Self::scale_for(width, height);
        let factor = scale * scale;
        (self.min_reference_area * factor, self.max_reference_area * factor)
    }

    /// 外接矩形是否满足面积和近似正方形条件
    pub fn accepts_box(&self, box_width: u32, box_height: u32, bounds: (f32, f32)) -> bool {
        if box_width == 0 || box_height == 0 {
            return false;
        }
        let area = box_width as f32 * box_height as f32;
        let aspect = box_width as f32 / box_height as f32;
        area >= bounds.0 && area <= bounds.1 && (aspect - 1.0).abs() <= self.aspect_tolerance
    }

    /// 定位四个角标记
    pub fn locate(&self, image: &DynamicImage) -> MarkerSet {
        let candidates = match self.find_candidates(image) {
            Ok(candidates) => candidates,
            Err(reason) => return MarkerSet::failed(reason),
        };

        debug!("方形候选数量: {}", candidates.len());

        if candidates.len() < 4 {
            return MarkerSet::failed(MarkerFailure::MarkersNotFound);
        }

        let centers: Vec<Point2> = candidates.iter().map(|c| c.center).collect();
        let (min_area, _) = self.area_bounds(image.width(), image.height());

        match select_corners(&centers) {
            Some(corners) if corners_are_separated(&corners, min_area.sqrt()) => {
                let [tl, tr, bl, br] = corners;
                MarkerSet::found(tl, tr, bl, br)
            }
            _ => MarkerSet::failed(MarkerFailure::MarkersNotFound),
        }
    }

    #[cfg(feature = "geometry")]
    fn find_candidates(&self, image: &DynamicImage) -> Result<Vec<MarkerCandidate>, MarkerFailure> {
        use imageproc::contours::{find_contours, BorderType};
        use imageproc::contrast::{otsu_level, threshold, ThresholdType};

        let gray = image.to_luma8();
        let level = otsu_level(&gray);

        // 反相二值化：墨迹为前景
        let binary = threshold(&gray, level, ThresholdType::BinaryInverted);

        let bounds = self.area_bounds(image.width(), image.height());

        let candidates = find_contours::<i32>(&binary)
            .into_iter()
            .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
            .filter(|c| quad_corner_count(&c.points) == 4)
            .filter_map(|c| {
                let (min_x, min_y, max_x, max_y) = bounding_box(&c.points)?;
                let width = (max_x - min_x + 1) as u32;
                let height = (max_y - min_y + 1) as u32;
                if !self.accepts_box(width, height, bounds) {
                    return None;
                }
                Some(MarkerCandidate {
                    center: Point2::new(
                        min_x as f32 + width as f32 / 2.0,
                        min_y as f32 + height as f32 / 2.0,
                    ),
                    width,
                    height,
                })
            })
            .collect();

        Ok(candidates)
    }

    #[cfg(not(feature = "geometry"))]
    fn find_candidates(&self, _image: &DynamicImage) -> Result<Vec<MarkerCandidate>, MarkerFailure> {
        Err(MarkerFailure::VisionLibraryUnavailable)
    }
}

impl Default for MarkerLocator {
    fn default() -> Self {
        Self::new()
    }
}

/// 按角点规则从候选中心选出四个角：左上、右上、左下、右下
///
/// - 左上：x+y 最小
/// - 右上：x 最大，相同时取 y 最小
/// - 左下：x 最小，相同时取 y 最大
/// - 右下：x+y 最大
pub fn select_corners(points: &[Point2]) -> Option<[Point2; 4]> {
    if points.len() < 4 {
        return None;
    }

    let top_left = *points.iter().min_by(|a, b| {
        (a.x + a.y)
            .total_cmp(&(b.x + b.y))
            .then(a.y.total_cmp(&b.y))
    })?;
    let top_right = *points
        .iter()
        .max_by(|a, b| a.x.total_cmp(&b.x).then(b.y.total_cmp(&a.y)))?;
    let bottom_left = *points
        .iter()
        .min_by(|a, b| a.x.total_cmp(&b.x).then(b.y.total_cmp(&a.y)))?;
    let bottom_right = *points.iter().max_by(|a, b| {
        (a.x + a.y)
            .total_cmp(&(b.x + b.y))
            .then(a.y.total_cmp(&b.y))
    })?;

    Some([top_left, top_right, bottom_left, bottom_right])
}

/// 四个角两两之间不小于最小间距
fn corners_are_separated(corners: &[Point2; 4], min_separation: f32) -> bool {
    (0..4).all(|i| (i + 1..4).all(|j| corners[i].distance(&corners[j]) >= min_separation))
}

#[cfg(feature = "geometry")]
fn bounding_box(points: &[imageproc::point::Point<i32>]) -> Option<(i32, i32, i32, i32)> {
    let first = points.first()?;
    Some(points.iter().fold(
        (first.x, first.y, first.x, first.y),
        |(min_x, min_y, max_x, max_y), p| (min_x.min(p.x), min_y.min(p.y), max_x.max(p.x), max_y.max(p.y)),
    ))
}

/// 闭合轮廓的多边形近似顶点数（epsilon = 周长的 4%）
#[cfg(feature = "geometry")]
fn quad_corner_count(points: &[imageproc::point::Point<i32>]) -> usize {
    use imageproc::geometry::{approximate_polygon_dp, arc_length};

    approximate_polygon_dp(points, 0.04 * arc_length(points, true), true).len()
}
