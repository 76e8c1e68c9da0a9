//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量处理和流程调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 批量答卷处理器
//! - 管理应用生命周期（初始化、运行）
//! - 答卷进入任务队列，固定数量的工作协程消费
//! - 每份答卷在独立任务中运行，失败互不影响
//! - 输出批次统计信息
//!
//! ### `batch_registry` - 批次登记表
//! - 保存批次进度，供轮询读取
//! - 成功/失败计数原子递增
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<Sheet>)
//!     ↓                ↘
//! workflow::SheetFlow   batch_registry (进度)
//!     ↓
//! services (能力层：标记点 / 校正 / 裁剪 / 视觉识别)
//!     ↓
//! infrastructure (基础设施：栅格化 / 视觉客户端 / 文档存储)
//! ```

pub mod batch_processor;
pub mod batch_registry;

// 重新导出主要类型
pub use batch_processor::{App, BatchProcessor};
pub use batch_registry::{BatchRegistry, InMemoryBatchRegistry};
