//! 栅格化 - 基础设施层
//!
//! 把上传的文档（PDF 或图片）变成单页位图。PDF 只渲染第 1 页，
//! 渲染依赖系统中的 `pdftoppm`（poppler-utils）。

use std::path::Path;

use async_trait::async_trait;
use image::DynamicImage;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::debug;

use crate::error::{AppError, AppResult, RasterError};
use crate::models::Sheet;

/// 栅格化结果
pub struct RasterPage {
    pub image: DynamicImage,
    /// 渲染时用到的临时目录，随结果一起释放
    pub scratch: Option<TempDir>,
}

impl std::fmt::Debug for RasterPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterPage")
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .field("scratch", &self.scratch.as_ref().map(|d| d.path().to_path_buf()))
            .finish()
    }
}

/// 栅格化能力
#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn rasterize(&self, sheet: &Sheet) -> AppResult<RasterPage>;
}

/// 文档类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Image,
    Pdf,
}

/// 判断文档类型：以声明的 MIME 为准，声明缺失或过于笼统时按文件头识别
pub fn detect_kind(declared_mime: &str, bytes: &[u8]) -> Result<DocumentKind, RasterError> {
    let declared = declared_mime.trim().to_ascii_lowercase();
    let effective = if declared.is_empty() || declared == "application/octet-stream" {
        infer::get(bytes)
            .map(|t| t.mime_type().to_string())
            .unwrap_or(declared)
    } else {
        declared
    };

    if effective == "application/pdf" {
        Ok(DocumentKind::Pdf)
    } else if effective.starts_with("image/") {
        Ok(DocumentKind::Image)
    } else {
        Err(RasterError::UnsupportedType {
            mime_type: if effective.is_empty() {
                "未知".to_string()
            } else {
                effective
            },
        })
    }
}

/// 基于 pdftoppm 的栅格化实现
#[derive(Debug, Clone)]
pub struct PdftoppmRasterizer {
    dpi: u32,
    binary: String,
}

impl PdftoppmRasterizer {
    pub fn new(dpi: u32) -> Self {
        Self {
            dpi,
            binary: "pdftoppm".to_string(),
        }
    }

    /// 指定 pdftoppm 可执行文件路径
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    async fn render_first_page(&self, sheet: &Sheet) -> AppResult<RasterPage> {
        let scratch = tempfile::tempdir()
            .map_err(|e| AppError::write_failed("临时目录", e))?;
        let input = scratch.path().join("input.pdf");
        let prefix = scratch.path().join("page");

        tokio::fs::write(&input, &sheet.bytes)
            .await
            .map_err(|e| AppError::write_failed(input.display().to_string(), e))?;

        debug!("pdftoppm 渲染 {} (DPI {})", sheet.filename, self.dpi);

        let output = Command::new(&self.binary)
            .args(["-f", "1", "-l", "1", "-r"])
            .arg(self.dpi.to_string())
            .args(["-png", "-singlefile"])
            .arg(&input)
            .arg(&prefix)
            .output()
            .await;

        match output {
            Ok(out) if out.status.success() => {}
            Ok(out) => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                return Err(AppError::unreadable(&sheet.filename, stderr.trim().to_string()));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RasterError::BackendUnavailable {
                    tool: self.binary.clone(),
                }
                .into());
            }
            Err(e) => return Err(AppError::unreadable(&sheet.filename, e.to_string())),
        }

        let page_path = scratch.path().join("page.png");
        let image = decode_file(&page_path, &sheet.filename).await?;

        Ok(RasterPage {
            image,
            scratch: Some(scratch),
        })
    }
}

#[async_trait]
impl Rasterizer for PdftoppmRasterizer {
    async fn rasterize(&self, sheet: &Sheet) -> AppResult<RasterPage> {
        match detect_kind(&sheet.mime_type, &sheet.bytes)? {
            DocumentKind::Image => {
                let image = decode_bytes(&sheet.bytes, &sheet.filename)?;
                Ok(RasterPage { image, scratch: None })
            }
            DocumentKind::Pdf => self.render_first_page(sheet).await,
        }
    }
}

/// 解码内存中的图片
pub fn decode_bytes(bytes: &[u8], filename: &str) -> AppResult<DynamicImage> {
    image::load_from_memory(bytes).map_err(|e| AppError::unreadable(filename, e.to_string()))
}

async fn decode_file(path: &Path, filename: &str) -> AppResult<DynamicImage> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| AppError::unreadable(filename, format!("渲染结果缺失: {}", e)))?;
    decode_bytes(&bytes, filename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let img = RgbImage::from_pixel(8, 6, Rgb([255, 255, 255]));
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_detect_kind_uses_declared_type() {
        assert_eq!(detect_kind("application/pdf", b"junk").unwrap(), DocumentKind::Pdf);
        assert_eq!(detect_kind("image/jpeg", b"junk").unwrap(), DocumentKind::Image);
        assert!(detect_kind("text/plain", b"hello").is_err());
    }

    #[test]
    fn test_detect_kind_sniffs_generic_types() {
        assert_eq!(
            detect_kind("application/octet-stream", &png_bytes()).unwrap(),
            DocumentKind::Image
        );
        assert_eq!(detect_kind("", b"%PDF-1.7\n").unwrap(), DocumentKind::Pdf);
        assert!(matches!(
            detect_kind("", b"\x00\x01"),
            Err(RasterError::UnsupportedType { .. })
        ));
    }

    #[tokio::test]
    async fn test_image_passes_through() {
        let sheet = Sheet::new(png_bytes(), "image/png", "scan.png");
        let page = PdftoppmRasterizer::new(200).rasterize(&sheet).await.unwrap();
        assert_eq!((page.image.width(), page.image.height()), (8, 6));
        assert!(page.scratch.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_image_is_unreadable() {
        let sheet = Sheet::new(b"not an image".to_vec(), "image/png", "broken.png");
        let err = PdftoppmRasterizer::new(200).rasterize(&sheet).await.unwrap_err();
        assert!(matches!(err, AppError::Raster(RasterError::Unreadable { .. })));
    }

    #[tokio::test]
    async fn test_missing_backend_is_reported() {
        let sheet = Sheet::new(b"%PDF-1.4".to_vec(), "application/pdf", "exam.pdf");
        let rasterizer = PdftoppmRasterizer::new(200).with_binary("pdftoppm-does-not-exist");
        let err = rasterizer.rasterize(&sheet).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Raster(RasterError::BackendUnavailable { .. })
        ));
    }
}
