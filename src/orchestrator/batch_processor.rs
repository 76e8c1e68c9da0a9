//! 批量答卷处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责批量答卷的处理和资源管理。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：加载模板、参考数据，创建视觉客户端和文档存储
//! 2. **单份处理**：同步返回一份答卷的评分结果
//! 3. **批量处理**：答卷进入队列，由固定数量的工作协程消费
//! 4. **进度登记**：每份答卷结束后把结果写入批次登记表
//! 5. **运行模式**：目录批处理或 HTTP 服务
//!
//! ## 设计特点
//!
//! - **有界并发**：工作协程数量即并发上限，保护外部视觉服务
//! - **故障隔离**：每份答卷在独立任务中运行，panic 只算这一份失败
//! - **不取消兄弟任务**：部分成功是常态

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppResult, BusinessError};
use crate::infrastructure::{
    DocumentStore, InMemoryStore, OpenAiVisionClient, PdftoppmRasterizer, Rasterizer,
    VisionBackend,
};
use crate::models::{
    load_reference_data, load_sheets_from_folder, load_template_layouts, BatchJob, ReferenceData,
    ScoredResult, Sheet, StatusEntry, TemplateLayouts,
};
use crate::orchestrator::batch_registry::{BatchRegistry, InMemoryBatchRegistry};
use crate::services::OutcomeAggregator;
use crate::utils::logging;
use crate::workflow::{SheetCtx, SheetFlow};

/// 目录模式下轮询批次进度的间隔
const FOLDER_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// 批量答卷处理器
pub struct BatchProcessor {
    flow: Arc<SheetFlow>,
    registry: Arc<dyn BatchRegistry>,
    workers: usize,
}

impl BatchProcessor {
    pub fn new(flow: Arc<SheetFlow>, registry: Arc<dyn BatchRegistry>, workers: usize) -> Self {
        Self {
            flow,
            registry,
            workers: workers.max(1),
        }
    }

    /// 同步处理单份答卷
    pub async fn process_sheet(&self, sheet: Sheet) -> AppResult<ScoredResult> {
        let ctx = SheetCtx::new(sheet.id, 1, &sheet.filename);
        let result = self.flow.run(&sheet, &ctx).await;
        if let Err(e) = &result {
            error!("{} ❌ 处理失败: {}", ctx, e);
        }
        result
    }

    /// 启动一个批次，立即返回批次ID
    pub async fn start_batch(&self, sheets: Vec<Sheet>) -> AppResult<Uuid> {
        let job = BatchJob::new(sheets.len());
        let batch_id = job.batch_id;
        let total = job.total_files;
        self.registry.register(job).await?;

        if total == 0 {
            info!("批次 {} 没有答卷，直接完成", batch_id);
            return Ok(batch_id);
        }

        let workers = self.workers.min(total);
        logging::log_batch_start(&batch_id.to_string(), total, workers);
        self.registry.mark_running(batch_id).await?;

        // 任务队列：一次性放入全部答卷
        let (task_tx, task_rx) = mpsc::channel::<(usize, Sheet)>(total);
        for (idx, sheet) in sheets.into_iter().enumerate() {
            task_tx
                .send((idx + 1, sheet))
                .await
                .map_err(|_| BusinessError::InvalidRequest("任务队列已关闭".to_string()))?;
        }
        drop(task_tx);

        let task_rx = Arc::new(Mutex::new(task_rx));
        let (outcome_tx, mut outcome_rx) = mpsc::channel::<StatusEntry>(total);

        let mut worker_handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let task_rx = task_rx.clone();
            let outcome_tx = outcome_tx.clone();
            let flow = self.flow.clone();
            worker_handles.push(tokio::spawn(async move {
                run_worker(worker_id, task_rx, outcome_tx, flow).await;
            }));
        }
        drop(outcome_tx);

        // 收集器：把每份答卷的结果写入登记表
        let registry = self.registry.clone();
        tokio::spawn(async move {
            while let Some(entry) = outcome_rx.recv().await {
                if let Err(e) = registry.record(batch_id, entry).await {
                    error!("批次 {} 记录结果失败: {}", batch_id, e);
                }
            }

            for result in futures::future::join_all(worker_handles).await {
                if let Err(e) = result {
                    error!("批次 {} 工作协程异常退出: {}", batch_id, e);
                }
            }

            if let Some(job) = registry.snapshot(batch_id).await {
                logging::log_batch_complete(&job);
            }
        });

        Ok(batch_id)
    }

    /// 查询批次进度
    pub async fn poll_batch(&self, batch_id: Uuid) -> AppResult<BatchJob> {
        self.registry.snapshot(batch_id).await.ok_or_else(|| {
            BusinessError::BatchNotFound {
                batch_id: batch_id.to_string(),
            }
            .into()
        })
    }

    /// 轮询直到批次完成
    pub async fn wait_for_completion(&self, batch_id: Uuid, interval: Duration) -> AppResult<BatchJob> {
        loop {
            let job = self.poll_batch(batch_id).await?;
            if job.is_completed() {
                return Ok(job);
            }
            tokio::time::sleep(interval).await;
        }
    }
}

/// 工作协程：从队列取答卷，直到队列耗尽
async fn run_worker(
    worker_id: usize,
    task_rx: Arc<Mutex<mpsc::Receiver<(usize, Sheet)>>>,
    outcome_tx: mpsc::Sender<StatusEntry>,
    flow: Arc<SheetFlow>,
) {
    loop {
        let next = task_rx.lock().await.recv().await;
        let Some((sheet_index, sheet)) = next else {
            break;
        };

        let ctx = SheetCtx::new(sheet.id, sheet_index, &sheet.filename);
        let filename = sheet.filename.clone();
        let sheet_id = sheet.id;

        let task_flow = flow.clone();
        let task_ctx = ctx.clone();
        let handle = tokio::spawn(async move { task_flow.run(&sheet, &task_ctx).await });

        let entry = match handle.await {
            Ok(Ok(result)) => StatusEntry::success(filename, sheet_id, result.student_number),
            Ok(Err(e)) => {
                error!("{} ❌ 处理过程中发生错误: {}", ctx, e);
                StatusEntry::failed(filename, sheet_id, e.to_string())
            }
            Err(e) => {
                error!("{} 任务执行失败: {}", ctx, e);
                StatusEntry::failed(filename, sheet_id, format!("任务执行失败: {}", e))
            }
        };

        if outcome_tx.send(entry).await.is_err() {
            warn!("工作协程 {} 的结果通道已关闭", worker_id);
            break;
        }
    }
}

/// 应用主结构
pub struct App {
    config: Config,
    processor: Arc<BatchProcessor>,
    aggregator: Arc<OutcomeAggregator>,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        logging::log_startup(&config);

        let layouts = match &config.template_layout_file {
            Some(path) => {
                info!("📐 加载模板布局: {}", path.display());
                load_template_layouts(path).await?
            }
            None => TemplateLayouts::builtin(),
        };

        let reference = if config.reference_data_file.exists() {
            load_reference_data(&config.reference_data_file).await?
        } else {
            warn!(
                "⚠️ 参考数据文件不存在: {}，所有答卷都会因找不到试卷而失败",
                config.reference_data_file.display()
            );
            ReferenceData::default()
        };

        let store: Arc<dyn DocumentStore> = Arc::new(
            InMemoryStore::new(reference)
                .with_results_file(&config.results_file)
                .await?,
        );

        if config.vision_api_key.trim().is_empty() {
            warn!("⚠️ 未设置 VISION_API_KEY，视觉识别将以配置错误失败");
        }
        let backend: Arc<dyn VisionBackend> = Arc::new(OpenAiVisionClient::new(&config));
        let rasterizer: Arc<dyn Rasterizer> = Arc::new(PdftoppmRasterizer::new(config.raster_dpi));

        let flow = Arc::new(SheetFlow::new(
            &config,
            rasterizer,
            backend,
            store.clone(),
            Arc::new(layouts),
        ));
        let registry: Arc<dyn BatchRegistry> = Arc::new(InMemoryBatchRegistry::new());

        Ok(Self {
            processor: Arc::new(BatchProcessor::new(
                flow,
                registry,
                config.max_concurrent_sheets,
            )),
            aggregator: Arc::new(OutcomeAggregator::new(store, config.zero_score_policy)),
            config,
        })
    }

    pub fn processor(&self) -> Arc<BatchProcessor> {
        self.processor.clone()
    }

    pub fn aggregator(&self) -> Arc<OutcomeAggregator> {
        self.aggregator.clone()
    }

    /// 运行应用主逻辑：设置了答卷目录时批处理，否则启动 HTTP 服务
    pub async fn run(&self) -> Result<()> {
        match &self.config.sheet_folder {
            Some(folder) => self.run_folder(folder).await,
            None => {
                let state = crate::server::AppState {
                    processor: self.processor(),
                    aggregator: self.aggregator(),
                    debug_crops_dir: self.config.debug_crops_dir.clone(),
                };
                crate::server::serve(state, &self.config.listen_addr).await
            }
        }
    }

    async fn run_folder(&self, folder: &std::path::Path) -> Result<()> {
        info!("📁 正在扫描待处理的答卷: {}", folder.display());
        let sheets = load_sheets_from_folder(folder).await?;

        if sheets.is_empty() {
            warn!("⚠️ 没有找到待处理的答卷，程序结束");
            return Ok(());
        }

        logging::log_sheets_loaded(sheets.len(), self.config.max_concurrent_sheets);

        let batch_id = self.processor.start_batch(sheets).await?;
        let job = self
            .processor
            .wait_for_completion(batch_id, FOLDER_POLL_INTERVAL)
            .await?;

        logging::print_final_stats(&job);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{VisionError, VisionErrorKind};
    use crate::infrastructure::InMemoryStore;
    use crate::models::{BatchState, Course, Exam, ExamQuestion, SheetOutcome};
    use crate::services::vision_extractor::DIGIT_DIRECTIVE;
    use async_trait::async_trait;
    use image::{DynamicImage, GrayImage, ImageFormat, Luma};
    use std::io::Cursor;

    struct DigitOneBackend;

    #[async_trait]
    impl VisionBackend for DigitOneBackend {
        async fn complete(&self, model: &str, directive: &str, _png: &[u8]) -> Result<String, VisionError> {
            if model == "down" {
                return Err(VisionError::service(VisionErrorKind::ModelUnavailable, model, "down"));
            }
            Ok(if directive == DIGIT_DIRECTIVE { "1" } else { "6" }.to_string())
        }
    }

    fn blank_png() -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::ImageLuma8(GrayImage::from_pixel(1654, 2339, Luma([255])))
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn processor(workers: usize) -> BatchProcessor {
        let store = Arc::new(InMemoryStore::new(ReferenceData {
            courses: vec![Course {
                id: "C1".to_string(),
                name: String::new(),
                learning_outcomes: vec![],
                program_outcomes: vec![],
            }],
            exams: vec![Exam {
                id: "1111".to_string(),
                course_id: "C1".to_string(),
                name: String::new(),
                questions: vec![ExamQuestion {
                    number: 1,
                    max_score: 10.0,
                    lo_code: "LO1".to_string(),
                }],
            }],
        }));
        let config = Config {
            vision_models: vec!["down".to_string(), "m1".to_string()],
            vision_retry_base_delay_ms: 1,
            digit_vote_count: 1,
            ..Config::default()
        };
        let flow = Arc::new(SheetFlow::new(
            &config,
            Arc::new(PdftoppmRasterizer::new(200)),
            Arc::new(DigitOneBackend),
            store,
            Arc::new(TemplateLayouts::builtin()),
        ));
        BatchProcessor::new(flow, Arc::new(InMemoryBatchRegistry::new()), workers)
    }

    #[tokio::test]
    async fn test_partial_batch_success() {
        let processor = processor(2);
        let sheets = vec![
            Sheet::new(blank_png(), "image/png", "a.png"),
            Sheet::new(b"not an image".to_vec(), "image/png", "b.png"),
            Sheet::new(blank_png(), "image/png", "c.png"),
            Sheet::new(b"hello".to_vec(), "text/plain", "d.txt"),
        ];

        let batch_id = processor.start_batch(sheets).await.unwrap();
        let job = processor
            .wait_for_completion(batch_id, Duration::from_millis(10))
            .await
            .unwrap();

        assert_eq!(job.state, BatchState::Completed);
        assert_eq!(job.processed_count, 4);
        assert_eq!(job.success_count, 2);
        assert_eq!(job.failed_count, 2);
        assert_eq!(job.statuses.len(), 4);

        let failed: Vec<&str> = job
            .statuses
            .iter()
            .filter(|s| s.outcome == SheetOutcome::Failed)
            .map(|s| s.filename.as_str())
            .collect();
        assert!(failed.contains(&"b.png") && failed.contains(&"d.txt"));
        assert!(job
            .statuses
            .iter()
            .filter(|s| s.outcome == SheetOutcome::Success)
            .all(|s| s.student_number.as_deref() == Some("111111111")));
    }

    #[tokio::test]
    async fn test_empty_batch_completes_immediately() {
        let processor = processor(4);
        let batch_id = processor.start_batch(Vec::new()).await.unwrap();
        let job = processor.poll_batch(batch_id).await.unwrap();
        assert!(job.is_completed());
        assert_eq!(job.total_files, 0);
    }

    #[tokio::test]
    async fn test_poll_unknown_batch() {
        let processor = processor(1);
        assert!(processor.poll_batch(Uuid::new_v4()).await.is_err());
    }

    #[tokio::test]
    async fn test_process_single_sheet() {
        let processor = processor(1);
        let result = processor
            .process_sheet(Sheet::new(blank_png(), "image/png", "single.png"))
            .await
            .unwrap();
        assert_eq!(result.exam_id, "1111");
        assert_eq!(result.score_for(1), Some(6));
    }
}
