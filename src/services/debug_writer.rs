//! 调试裁剪写入服务 - 业务能力层
//!
//! 只负责"把裁剪图存到调试目录"能力，不关心流程。
//! 尽力而为：写入失败只记录警告，不影响评分。

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::services::region_extractor::RegionCrop;

/// 调试裁剪写入服务
///
/// 文件布局：`<目录>/<答卷ID>/<区域名>.png`
#[derive(Debug, Clone)]
pub struct DebugWriter {
    root: Option<PathBuf>,
}

impl DebugWriter {
    /// 不写任何文件
    pub fn disabled() -> Self {
        Self { root: None }
    }

    /// 写到指定目录
    pub fn with_dir(path: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(path.into()),
        }
    }

    pub fn from_option(path: Option<&Path>) -> Self {
        match path {
            Some(p) => Self::with_dir(p),
            None => Self::disabled(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.root.is_some()
    }

    /// 某张答卷的调试目录
    pub fn sheet_dir(&self, sheet_id: Uuid) -> Option<PathBuf> {
        self.root.as_ref().map(|root| root.join(sheet_id.to_string()))
    }

    /// 写入一个裁剪区域
    pub async fn write(&self, sheet_id: Uuid, crop: &RegionCrop) {
        let Some(dir) = self.sheet_dir(sheet_id) else {
            return;
        };

        let png = match crop.to_png() {
            Ok(png) => png,
            Err(e) => {
                warn!("⚠️ 调试裁剪编码失败 {}: {}", crop.region.name, e);
                return;
            }
        };

        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            warn!("⚠️ 无法创建调试目录 {}: {}", dir.display(), e);
            return;
        }

        let path = dir.join(format!("{}.png", crop.region.name));
        match tokio::fs::write(&path, png).await {
            Ok(()) => debug!("写入调试裁剪: {}", path.display()),
            Err(e) => warn!("⚠️ 写入调试裁剪失败 {}: {}", path.display(), e),
        }
    }
}

impl Default for DebugWriter {
    fn default() -> Self {
        Self::disabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RegionBox, RegionKind};
    use image::{DynamicImage, GrayImage, Luma};

    fn crop() -> RegionCrop {
        RegionCrop {
            region: RegionBox::new("sid_0", RegionKind::StudentIdDigit, 0, 0, 4, 4),
            image: DynamicImage::ImageLuma8(GrayImage::from_pixel(4, 4, Luma([0]))),
        }
    }

    #[tokio::test]
    async fn test_writes_crop_under_sheet_dir() {
        let dir = tempfile::tempdir().unwrap();
        let writer = DebugWriter::with_dir(dir.path());
        let sheet_id = Uuid::new_v4();

        writer.write(sheet_id, &crop()).await;

        let path = dir.path().join(sheet_id.to_string()).join("sid_0.png");
        let saved = image::open(path).unwrap();
        assert_eq!((saved.width(), saved.height()), (4, 4));
    }

    #[tokio::test]
    async fn test_disabled_writer_is_noop() {
        let writer = DebugWriter::disabled();
        assert!(!writer.is_enabled());
        assert!(writer.sheet_dir(Uuid::new_v4()).is_none());
        writer.write(Uuid::new_v4(), &crop()).await;
    }

    #[tokio::test]
    async fn test_unwritable_dir_only_warns() {
        let file = tempfile::NamedTempFile::new().unwrap();
        // 根路径是普通文件，无法在其下创建目录
        let writer = DebugWriter::with_dir(file.path());
        writer.write(Uuid::new_v4(), &crop()).await;
    }
}
