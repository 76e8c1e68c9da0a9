//! 基础设施层（Infrastructure Layer）
//!
//! 持有稀缺的外部能力，只暴露能力本身：
//! - `Rasterizer` - 文档 → 单页位图（pdftoppm）
//! - `VisionBackend` - 图片 + 指令 → 模型文本
//! - `DocumentStore` - 参考数据读取、成绩写入

pub mod document_store;
pub mod rasterizer;
pub mod vision_client;

pub use document_store::{DocumentStore, InMemoryStore};
pub use rasterizer::{PdftoppmRasterizer, RasterPage, Rasterizer};
pub use vision_client::{OpenAiVisionClient, VisionBackend};
