//! 答卷处理流程 - 流程层
//!
//! 核心职责：定义"一份答卷"的完整处理流程
//!
//! 流程顺序：
//! 1. 栅格化（失败即整卷失败）
//! 2. 标记点定位 → 透视校正（找不到标记时改用模板坐标）
//! 3. 裁剪学号/试卷编号数字格 → 多模型投票识别
//! 4. 按试卷编号查找试卷 → 裁剪各题得分框 → 识别分数
//! 5. 写入成绩记录

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{AppResult, BusinessError, RegionError};
use crate::infrastructure::{DocumentStore, Rasterizer, VisionBackend};
use crate::models::{
    MarkerSet, MarkerStatus, QuestionScore, RegionBox, ScoredResult, Sheet, SheetWarning,
    TemplateLayouts,
};
use crate::services::region_extractor::{extract_all, extract_questions};
use crate::services::vision_extractor::{assemble_digits, student_number_warning};
use crate::services::{
    CanonicalImage, DebugWriter, MarkerLocator, PageMode, Rectifier, VisionExtractor,
};
use crate::workflow::sheet_ctx::SheetCtx;

/// 答卷处理流程
///
/// - 编排单张答卷的完整处理流程
/// - 决定何时降级、何时整卷失败
/// - 区域级错误只记警告，不影响其他区域
pub struct SheetFlow {
    rasterizer: Arc<dyn Rasterizer>,
    locator: MarkerLocator,
    rectifier: Rectifier,
    layouts: Arc<TemplateLayouts>,
    vision: VisionExtractor,
    store: Arc<dyn DocumentStore>,
    debug_writer: DebugWriter,
}

impl SheetFlow {
    /// 创建新的答卷处理流程
    pub fn new(
        config: &Config,
        rasterizer: Arc<dyn Rasterizer>,
        backend: Arc<dyn VisionBackend>,
        store: Arc<dyn DocumentStore>,
        layouts: Arc<TemplateLayouts>,
    ) -> Self {
        Self {
            rasterizer,
            locator: MarkerLocator::new(),
            rectifier: Rectifier::new(),
            layouts,
            vision: VisionExtractor::new(backend, config),
            store,
            debug_writer: DebugWriter::from_option(config.debug_crops_dir.as_deref()),
        }
    }

    pub async fn run(&self, sheet: &Sheet, ctx: &SheetCtx) -> AppResult<ScoredResult> {
        let mut warnings = Vec::new();

        // ========== 1. 栅格化 ==========
        info!("{} 📄 开始栅格化 ({})", ctx, sheet.mime_type);
        let page = self.rasterizer.rasterize(sheet).await?;
        let image = page.image;

        // ========== 2. 定位 + 校正（CPU 密集，放到阻塞线程） ==========
        let locator = self.locator.clone();
        let rectifier = self.rectifier.clone();
        let (markers, canonical) = tokio::task::spawn_blocking(move || {
            let markers = locator.locate(&image);
            let canonical = rectifier.rectify(image, &markers);
            (markers, canonical)
        })
        .await?;

        self.log_markers(ctx, &markers, &canonical);
        if let Some(reason) = canonical.fallback_reason {
            warnings.push(SheetWarning::TemplateFallback { reason });
        }

        let layout = canonical.layout(&self.layouts);

        // ========== 3. 学号与试卷编号 ==========
        let student_number = self
            .read_digit_row(sheet, &canonical, &layout.student_id, &mut warnings)
            .await?;
        let exam_number = self
            .read_digit_row(sheet, &canonical, &layout.exam_id, &mut warnings)
            .await?;

        if let Some(warning) = student_number_warning(&student_number) {
            warn!("{} ⚠️ 学号位数不足: {}", ctx, student_number);
            warnings.push(warning);
        }
        info!("{} 🪪 学号 {} | 试卷编号 {}", ctx, student_number, exam_number);

        // ========== 4. 查找试卷 ==========
        let exam = self
            .store
            .find_exam(&exam_number)
            .await?
            .ok_or_else(|| BusinessError::ExamNotFound {
                exam_id: exam_number.clone(),
            })?;

        // ========== 5. 各题得分 ==========
        let numbers: Vec<u32> = exam.questions.iter().map(|q| q.number).collect();
        let mut questions = Vec::with_capacity(numbers.len());

        for (number, crop) in extract_questions(&canonical.image, &layout, &numbers) {
            let lo_code = exam
                .question(number)
                .map(|q| q.lo_code.clone())
                .unwrap_or_default();

            let score = match crop {
                Ok(crop) => {
                    self.debug_writer.write(sheet.id, &crop).await;
                    let reading = self.vision.read_score(&crop).await?;
                    warnings.extend(reading.warning);
                    reading.score
                }
                Err(RegionError::MissingQuestion { question_number }) => {
                    warn!("{} ⚠️ 模板中没有第 {} 题，按 0 分处理", ctx, question_number);
                    warnings.push(SheetWarning::MissingQuestionRegion { question_number });
                    0
                }
                Err(e) => {
                    warn!("{} ⚠️ 第 {} 题裁剪失败，按 0 分处理: {}", ctx, number, e);
                    warnings.push(SheetWarning::RegionExtraction {
                        region: format!("q{:02}", number),
                        message: e.to_string(),
                    });
                    0
                }
            };
            questions.push(QuestionScore::new(number, score, lo_code));
        }
        questions.sort_by_key(|q| q.question_number);

        // ========== 6. 写入成绩 ==========
        let result = ScoredResult {
            sheet_id: sheet.id,
            filename: sheet.filename.clone(),
            student_number,
            exam_id: exam.id.clone(),
            course_id: exam.course_id.clone(),
            questions,
            markers: MarkerStatus {
                success: markers.success,
                failure_reason: markers.failure_reason,
            },
            warnings,
            processed_at: Utc::now(),
        };

        self.store.save_result(&result).await?;

        info!(
            "{} ✓ 评分完成: {} 道题, {} 条警告",
            ctx,
            result.questions.len(),
            result.warnings.len()
        );

        Ok(result)
    }

    /// 读取一行数字格；裁剪失败的格子读作 0 并记警告，保持数字位置
    async fn read_digit_row(
        &self,
        sheet: &Sheet,
        canonical: &CanonicalImage,
        cells: &[RegionBox],
        warnings: &mut Vec<SheetWarning>,
    ) -> AppResult<String> {
        let mut digits = Vec::with_capacity(cells.len());

        for crop in extract_all(&canonical.image, cells) {
            match crop {
                Ok(crop) => {
                    self.debug_writer.write(sheet.id, &crop).await;
                    let reading = self.vision.read_digit(&crop).await?;
                    warnings.extend(reading.warning);
                    digits.push(reading.digit);
                }
                Err(e) => {
                    warn!("⚠️ 数字格裁剪失败，按 0 处理: {}", e);
                    digits.push(0);
                    warnings.push(SheetWarning::RegionExtraction {
                        region: region_name(&e),
                        message: e.to_string(),
                    });
                }
            }
        }

        Ok(assemble_digits(&digits))
    }

    fn log_markers(&self, ctx: &SheetCtx, markers: &MarkerSet, canonical: &CanonicalImage) {
        match canonical.mode {
            PageMode::Rectified => info!("{} 📐 找到四个标记点，已校正到标准画布", ctx),
            PageMode::TemplateFallback => warn!(
                "{} ⚠️ 标记点不可用 ({:?})，使用模板坐标模式",
                ctx,
                canonical.fallback_reason.or(markers.failure_reason)
            ),
        }
    }
}

fn region_name(err: &RegionError) -> String {
    match err {
        RegionError::OutOfBounds { name, .. } | RegionError::Empty { name } => name.clone(),
        RegionError::MissingQuestion { question_number } => format!("q{:02}", question_number),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, ErrorCategory, VisionError, VisionErrorKind};
    use crate::infrastructure::{InMemoryStore, PdftoppmRasterizer};
    use crate::models::{Course, Exam, ExamQuestion, MarkerFailure, ReferenceData};
    use crate::services::vision_extractor::{DIGIT_DIRECTIVE, SCORE_DIRECTIVE};
    use async_trait::async_trait;
    use image::{DynamicImage, GrayImage, ImageFormat, Luma};
    use std::io::Cursor;

    /// 数字格一律返回固定数字，得分框一律返回固定分数
    struct FixedBackend {
        digit: &'static str,
        score: &'static str,
        fail_with: Option<VisionErrorKind>,
    }

    #[async_trait]
    impl VisionBackend for FixedBackend {
        async fn complete(&self, model: &str, directive: &str, _png: &[u8]) -> Result<String, VisionError> {
            if let Some(kind) = self.fail_with {
                return Err(VisionError::service(kind, model, "fixed"));
            }
            match directive {
                DIGIT_DIRECTIVE => Ok(self.digit.to_string()),
                SCORE_DIRECTIVE => Ok(self.score.to_string()),
                _ => Ok(String::new()),
            }
        }
    }

    fn blank_png() -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::ImageLuma8(GrayImage::from_pixel(1654, 2339, Luma([255])))
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn store() -> Arc<InMemoryStore> {
        Arc::new(InMemoryStore::new(ReferenceData {
            courses: vec![Course {
                id: "C1".to_string(),
                name: String::new(),
                learning_outcomes: vec![],
                program_outcomes: vec![],
            }],
            exams: vec![Exam {
                id: "3333".to_string(),
                course_id: "C1".to_string(),
                name: String::new(),
                questions: vec![
                    ExamQuestion { number: 2, max_score: 10.0, lo_code: "LO1".to_string() },
                    ExamQuestion { number: 1, max_score: 10.0, lo_code: "LO1".to_string() },
                    ExamQuestion { number: 25, max_score: 5.0, lo_code: "LO2".to_string() },
                ],
            }],
        }))
    }

    fn flow(backend: FixedBackend, store: Arc<InMemoryStore>) -> SheetFlow {
        flow_with_layouts(backend, store, TemplateLayouts::builtin())
    }

    fn flow_with_layouts(
        backend: FixedBackend,
        store: Arc<InMemoryStore>,
        layouts: TemplateLayouts,
    ) -> SheetFlow {
        let config = Config {
            vision_models: vec!["m1".to_string(), "m2".to_string(), "m3".to_string()],
            vision_retry_base_delay_ms: 1,
            ..Config::default()
        };
        SheetFlow::new(
            &config,
            Arc::new(PdftoppmRasterizer::new(200)),
            Arc::new(backend),
            store,
            Arc::new(layouts),
        )
    }

    #[tokio::test]
    async fn test_blank_page_scores_in_template_mode() {
        let store = store();
        let flow = flow(
            FixedBackend { digit: "3", score: "7", fail_with: None },
            store.clone(),
        );
        let sheet = Sheet::new(blank_png(), "image/png", "blank.png");
        let ctx = SheetCtx::new(sheet.id, 1, &sheet.filename);

        let result = flow.run(&sheet, &ctx).await.unwrap();

        assert!(!result.markers.success);
        assert_eq!(result.markers.failure_reason, Some(MarkerFailure::MarkersNotFound));
        assert_eq!(result.student_number, "333333333");
        assert_eq!(result.exam_id, "3333");
        assert_eq!(result.course_id, "C1");

        let numbers: Vec<u32> = result.questions.iter().map(|q| q.question_number).collect();
        assert_eq!(numbers, vec![1, 2, 25]);
        assert_eq!(result.score_for(1), Some(7));
        assert_eq!(result.score_for(25), Some(0));
        assert!(result
            .warnings
            .contains(&SheetWarning::MissingQuestionRegion { question_number: 25 }));
        assert!(matches!(result.warnings[0], SheetWarning::TemplateFallback { .. }));

        assert_eq!(store.results_for_exam("3333").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_digit_cell_keeps_position() {
        let mut layouts = TemplateLayouts::builtin();
        // 学号第 3 格移出页面
        let cell = &mut layouts.fallback.student_id[2];
        cell.x = 5000;
        let cell_name = cell.name.clone();

        let flow = flow_with_layouts(
            FixedBackend { digit: "3", score: "7", fail_with: None },
            store(),
            layouts,
        );
        let sheet = Sheet::new(blank_png(), "image/png", "blank.png");
        let ctx = SheetCtx::new(sheet.id, 1, &sheet.filename);

        let result = flow.run(&sheet, &ctx).await.unwrap();

        assert_eq!(result.student_number, "330333333");
        assert!(result.warnings.iter().any(|w| matches!(
            w,
            SheetWarning::RegionExtraction { region, .. } if *region == cell_name
        )));
    }

    #[tokio::test]
    async fn test_unknown_exam_fails_sheet() {
        let flow = flow(FixedBackend { digit: "4", score: "7", fail_with: None }, store());
        let sheet = Sheet::new(blank_png(), "image/png", "blank.png");
        let ctx = SheetCtx::new(sheet.id, 1, &sheet.filename);

        let err = flow.run(&sheet, &ctx).await.unwrap_err();
        assert!(matches!(err, AppError::Business(BusinessError::ExamNotFound { .. })));
        assert_eq!(err.category(), ErrorCategory::Content);
    }

    #[tokio::test]
    async fn test_auth_failure_fails_sheet() {
        let flow = flow(
            FixedBackend { digit: "3", score: "7", fail_with: Some(VisionErrorKind::AuthInvalid) },
            store(),
        );
        let sheet = Sheet::new(blank_png(), "image/png", "blank.png");
        let ctx = SheetCtx::new(sheet.id, 1, &sheet.filename);

        let err = flow.run(&sheet, &ctx).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }

    #[tokio::test]
    async fn test_unreadable_document_fails_sheet() {
        let flow = flow(FixedBackend { digit: "3", score: "7", fail_with: None }, store());
        let sheet = Sheet::new(b"garbage".to_vec(), "image/png", "bad.png");
        let ctx = SheetCtx::new(sheet.id, 1, &sheet.filename);

        let err = flow.run(&sheet, &ctx).await.unwrap_err();
        assert!(matches!(err, AppError::Raster(_)));
    }
}
