//! 区域裁剪服务 - 业务能力层
//!
//! 纯裁剪：给定页面和区域框，返回对应像素。越界只影响该区域本身。

use std::io::Cursor;

use image::{DynamicImage, ImageFormat};

use crate::error::{RegionError, VisionError};
use crate::models::{RegionBox, TemplateLayout};

/// 一个裁剪出的区域
#[derive(Debug, Clone)]
pub struct RegionCrop {
    pub region: RegionBox,
    pub image: DynamicImage,
}

impl RegionCrop {
    /// 编码为 PNG
    pub fn to_png(&self) -> Result<Vec<u8>, VisionError> {
        encode_png(&self.image)
    }
}

/// 单个区域的裁剪结果
pub type CropResult = Result<RegionCrop, RegionError>;

/// 裁剪一个区域
pub fn extract_region(image: &DynamicImage, region: &RegionBox) -> CropResult {
    if region.width == 0 || region.height == 0 {
        return Err(RegionError::Empty {
            name: region.name.clone(),
        });
    }
    if !region.fits_within(image.width(), image.height()) {
        return Err(RegionError::OutOfBounds {
            name: region.name.clone(),
            x: region.x,
            y: region.y,
            width: region.width,
            height: region.height,
            image_width: image.width(),
            image_height: image.height(),
        });
    }

    Ok(RegionCrop {
        region: region.clone(),
        image: image.crop_imm(region.x, region.y, region.width, region.height),
    })
}

/// 依次裁剪一组区域，各区域互不影响
pub fn extract_all(image: &DynamicImage, regions: &[RegionBox]) -> Vec<CropResult> {
    regions
        .iter()
        .map(|region| extract_region(image, region))
        .collect()
}

/// 按题号裁剪得分框；模板中没有的题号返回 `MissingQuestion`
pub fn extract_questions(
    image: &DynamicImage,
    layout: &TemplateLayout,
    question_numbers: &[u32],
) -> Vec<(u32, CropResult)> {
    question_numbers
        .iter()
        .map(|&number| {
            let result = match layout.question_region(number) {
                Some(region) => extract_region(image, region),
                None => Err(RegionError::MissingQuestion {
                    question_number: number,
                }),
            };
            (number, result)
        })
        .collect()
}

/// 把图片编码为 PNG 字节
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, VisionError> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| VisionError::Encode(e.to_string()))?;
    Ok(buf)
}
