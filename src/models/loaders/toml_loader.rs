use std::path::{Path, PathBuf};

use tokio::fs;

use crate::error::{AppError, AppResult, ConfigError, StoreError};
use crate::models::layout::{TemplateLayouts, TemplateSpecs};
use crate::models::outcome::ReferenceData;
use crate::models::sheet::Sheet;

/// 答卷目录中接受的文件扩展名
const SHEET_EXTENSIONS: [&str; 6] = ["pdf", "png", "jpg", "jpeg", "tif", "tiff"];

/// 从 TOML 文件加载课程与试卷参考数据
pub async fn load_reference_data(path: &Path) -> AppResult<ReferenceData> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| AppError::read_failed(path.display().to_string(), e))?;

    let data: ReferenceData = toml::from_str(&content).map_err(|e| {
        AppError::Store(StoreError::TomlParseFailed {
            path: path.display().to_string(),
            source: Box::new(e),
        })
    })?;

    tracing::info!(
        "已加载参考数据: {} 门课程, {} 份试卷",
        data.courses.len(),
        data.exams.len()
    );

    Ok(data)
}

/// 从 TOML 文件加载模板布局，并校验所有区域都位于页面内
pub async fn load_template_layouts(path: &Path) -> AppResult<TemplateLayouts> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| AppError::read_failed(path.display().to_string(), e))?;

    let specs: TemplateSpecs = toml::from_str(&content).map_err(|e| ConfigError::InvalidTemplate {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let layouts = TemplateLayouts::from_specs(&specs);
    for layout in [&layouts.canonical, &layouts.fallback] {
        layout.validate().map_err(|reason| ConfigError::InvalidTemplate {
            path: path.display().to_string(),
            reason,
        })?;
    }

    Ok(layouts)
}

/// 加载目录中所有答卷文件
pub async fn load_sheets_from_folder(folder_path: &Path) -> AppResult<Vec<Sheet>> {
    let folder = PathBuf::from(folder_path);

    if !folder.exists() {
        return Err(AppError::Other(format!("文件夹不存在: {}", folder.display())));
    }

    let mut paths = Vec::new();
    let mut entries = fs::read_dir(&folder)
        .await
        .map_err(|e| AppError::read_failed(folder.display().to_string(), e))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let accepted = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|ext| SHEET_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if accepted {
            paths.push(path);
        }
    }
    paths.sort();

    let mut sheets = Vec::with_capacity(paths.len());
    for path in paths {
        let filename = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        match fs::read(&path).await {
            Ok(bytes) => {
                let mime_type = mime_guess::from_path(&path)
                    .first_or_octet_stream()
                    .essence_str()
                    .to_string();
                tracing::info!("正在加载: {} ({})", filename, mime_type);
                sheets.push(Sheet::new(bytes, mime_type, filename));
            }
            Err(e) => {
                tracing::warn!("加载文件失败 {}: {}", path.display(), e);
            }
        }
    }

    Ok(sheets)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFERENCE_TOML: &str = r#"
[[courses]]
id = "CENG301"
name = "Software Engineering"

[[courses.learning_outcomes]]
code = "LO1"
program_outcomes = ["PO1", "PO2"]

[[courses.program_outcomes]]
code = "PO1"

[[exams]]
id = "1001"
course_id = "CENG301"

[[exams.questions]]
number = 1
max_score = 10
lo_code = "LO1"
"#;

    #[tokio::test]
    async fn test_load_reference_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reference.toml");
        fs::write(&path, REFERENCE_TOML).await.unwrap();

        let data = load_reference_data(&path).await.unwrap();
        assert_eq!(data.courses.len(), 1);
        assert_eq!(data.courses[0].learning_outcomes[0].program_outcomes.len(), 2);
        assert_eq!(data.exams[0].questions[0].max_score, 10.0);
    }

    #[tokio::test]
    async fn test_template_layout_round_trip_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layout.toml");
        let text = toml::to_string(&TemplateSpecs::builtin()).unwrap();
        fs::write(&path, text).await.unwrap();

        let layouts = load_template_layouts(&path).await.unwrap();
        assert_eq!(layouts, TemplateLayouts::builtin());
    }

    #[tokio::test]
    async fn test_invalid_template_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layout.toml");
        let mut specs = TemplateSpecs::builtin();
        specs.fallback.student_id.x = 1600;
        fs::write(&path, toml::to_string(&specs).unwrap()).await.unwrap();

        let err = load_template_layouts(&path).await.unwrap_err();
        assert!(matches!(err, AppError::Config(ConfigError::InvalidTemplate { .. })));
    }

    #[tokio::test]
    async fn test_load_sheets_from_folder_filters_extensions() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.PNG"), b"png").await.unwrap();
        fs::write(dir.path().join("a.pdf"), b"%PDF").await.unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").await.unwrap();

        let sheets = load_sheets_from_folder(dir.path()).await.unwrap();
        let names: Vec<&str> = sheets.iter().map(|s| s.filename.as_str()).collect();
        assert_eq!(names, vec!["a.pdf", "b.PNG"]);
        assert_eq!(sheets[0].mime_type, "application/pdf");
        assert_eq!(sheets[1].mime_type, "image/png");
    }
}
