//! # Exam Sheet Grader
//!
//! 扫描答卷自动评分，并按课程汇总学习成果达成度
//!
//! ## 架构设计
//!
//! 本系统采用分层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有外部资源，只暴露能力
//! - `Rasterizer` - PDF/图片 → 位图
//! - `VisionBackend` - 视觉模型调用
//! - `DocumentStore` - 课程、试卷、成绩记录
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单张图片或单组数据
//! - `MarkerLocator` / `Rectifier` - 标记点定位与透视校正
//! - `region_extractor` - 按模板裁剪区域
//! - `VisionExtractor` - 模型回退、重试、数字投票
//! - `OutcomeAggregator` - 题目 → LO → PO 汇总
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一份答卷"的完整处理流程
//! - `SheetCtx` - 上下文封装（答卷ID + 序号 + 文件名）
//! - `SheetFlow` - 栅格化 → 校正 → 裁剪 → 识别 → 保存
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 批量处理，管理并发
//! - `orchestrator/batch_registry` - 批次进度登记
//!
//! ### ⑤ 接口层
//! - `server/` - HTTP 接口
//!
//! ## 模块结构

pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod server;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult, ErrorCategory};
pub use models::{BatchJob, ScoredResult, Sheet};
pub use orchestrator::{App, BatchProcessor};
pub use services::{OutcomeAggregator, ZeroScorePolicy};
pub use workflow::{SheetCtx, SheetFlow};
