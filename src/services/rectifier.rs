//! 透视校正服务 - 业务能力层
//!
//! 标记点齐全时，把四个标记中心映射到标准画布四角并重采样；
//! 否则保留原始页面，改用兜底坐标表（模板坐标模式）。

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::layout::{TemplateLayout, TemplateLayouts, CANONICAL_HEIGHT, CANONICAL_WIDTH};
use crate::models::{MarkerFailure, MarkerSet, Point2};

/// 页面坐标模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageMode {
    /// 已校正到标准画布
    Rectified,
    /// 未校正，使用兜底坐标表
    TemplateFallback,
}

/// 校正后（或兜底模式下）的页面
#[derive(Debug, Clone)]
pub struct CanonicalImage {
    pub image: DynamicImage,
    pub mode: PageMode,
    /// 兜底原因（仅兜底模式）
    pub fallback_reason: Option<MarkerFailure>,
}

impl CanonicalImage {
    /// 该页面应使用的区域布局
    pub fn layout(&self, layouts: &TemplateLayouts) -> TemplateLayout {
        match self.mode {
            PageMode::Rectified => layouts.canonical.clone(),
            PageMode::TemplateFallback => layouts
                .fallback
                .scaled_to(self.image.width(), self.image.height()),
        }
    }
}

/// 透视校正服务
#[derive(Debug, Clone)]
pub struct Rectifier {
    width: u32,
    height: u32,
}

impl Rectifier {
    pub fn new() -> Self {
        Self {
            width: CANONICAL_WIDTH,
            height: CANONICAL_HEIGHT,
        }
    }

    /// 指定画布尺寸
    pub fn with_canvas(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// 校正页面（消费原始位图）
    pub fn rectify(&self, image: DynamicImage, markers: &MarkerSet) -> CanonicalImage {
        let corners = match (markers.success, markers.corners) {
            (true, Some(corners)) => corners,
            _ => {
                let reason = markers
                    .failure_reason
                    .unwrap_or(MarkerFailure::MarkersNotFound);
                return Self::fallback(image, reason);
            }
        };

        match self.warp(&image, &corners) {
            Some(warped) => {
                debug!("透视校正完成: {}x{}", self.width, self.height);
                CanonicalImage {
                    image: warped,
                    mode: PageMode::Rectified,
                    fallback_reason: None,
                }
            }
            None => {
                warn!("⚠️ 无法由标记点计算透视变换，改用模板坐标模式");
                Self::fallback(image, MarkerFailure::MarkersNotFound)
            }
        }
    }

    fn fallback(image: DynamicImage, reason: MarkerFailure) -> CanonicalImage {
        CanonicalImage {
            image,
            mode: PageMode::TemplateFallback,
            fallback_reason: Some(reason),
        }
    }

    /// 标准画布四角（与标记顺序一致：左上、右上、左下、右下）
    pub fn canvas_corners(&self) -> [Point2; 4] {
        let (w, h) = (self.width as f32, self.height as f32);
        [
            Point2::new(0.0, 0.0),
            Point2::new(w, 0.0),
            Point2::new(0.0, h),
            Point2::new(w, h),
        ]
    }

    #[cfg(feature = "geometry")]
    fn warp(&self, image: &DynamicImage, corners: &[Point2; 4]) -> Option<DynamicImage> {
        use image::{Rgb, RgbImage};
        use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};

        let src = corners.map(|p| (p.x, p.y));
        let dest = self.canvas_corners().map(|p| (p.x, p.y));
        let projection = Projection::from_control_points(src, dest)?;

        let input = image.to_rgb8();
        let mut output = RgbImage::new(self.width, self.height);
        warp_into(
            &input,
            &projection,
            Interpolation::Bilinear,
            Rgb([255u8, 255, 255]),
            &mut output,
        );

        Some(DynamicImage::ImageRgb8(output))
    }

    #[cfg(not(feature = "geometry"))]
    fn warp(&self, _image: &DynamicImage, _corners: &[Point2; 4]) -> Option<DynamicImage> {
        None
    }
}

impl Default for Rectifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn blank(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(width, height, Luma([255])))
    }

    #[test]
    fn test_failed_markers_keep_original_page() {
        let markers = MarkerSet::failed(MarkerFailure::MarkersNotFound);
        let page = Rectifier::new().rectify(blank(1654, 2339), &markers);

        assert_eq!(page.mode, PageMode::TemplateFallback);
        assert_eq!(page.fallback_reason, Some(MarkerFailure::MarkersNotFound));
        assert_eq!((page.image.width(), page.image.height()), (1654, 2339));

        let layout = page.layout(&TemplateLayouts::builtin());
        assert_eq!(layout, TemplateLayouts::builtin().fallback);
    }

    #[test]
    fn test_fallback_reason_is_preserved() {
        let markers = MarkerSet::failed(MarkerFailure::VisionLibraryUnavailable);
        let page = Rectifier::new().rectify(blank(100, 100), &markers);
        assert_eq!(
            page.fallback_reason,
            Some(MarkerFailure::VisionLibraryUnavailable)
        );
    }

    #[cfg(feature = "geometry")]
    #[test]
    fn test_markers_map_to_canvas_corners() {
        let mut source = GrayImage::from_pixel(400, 600, Luma([255]));
        // 标记中心附近的黑点，校正后应落在画布左上角
        for y in 95..=105 {
            for x in 45..=55 {
                source.put_pixel(x, y, Luma([0]));
            }
        }
        let markers = MarkerSet::found(
            Point2::new(50.0, 100.0),
            Point2::new(350.0, 100.0),
            Point2::new(50.0, 500.0),
            Point2::new(350.0, 500.0),
        );

        let page = Rectifier::with_canvas(300, 400).rectify(DynamicImage::ImageLuma8(source), &markers);
        assert_eq!(page.mode, PageMode::Rectified);
        assert_eq!((page.image.width(), page.image.height()), (300, 400));

        let out = page.image.to_luma8();
        assert!(out.get_pixel(1, 1).0[0] < 64);
        assert!(out.get_pixel(150, 200).0[0] > 192);
        assert_eq!(page.layout(&TemplateLayouts::builtin()), TemplateLayouts::builtin().canonical);
    }
}
