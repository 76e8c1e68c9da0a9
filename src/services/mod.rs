//! 业务能力层（Services）
//!
//! 每个服务只描述"我能做什么"，只处理单张页面或单个区域，不关心流程顺序。

pub mod debug_writer;
pub mod marker_locator;
pub mod outcome_aggregator;
pub mod rectifier;
pub mod region_extractor;
pub mod vision_extractor;

pub use debug_writer::DebugWriter;
pub use marker_locator::MarkerLocator;
pub use outcome_aggregator::{CourseReport, OutcomeAggregator, StudentReport, ZeroScorePolicy};
pub use rectifier::{CanonicalImage, PageMode, Rectifier};
pub use region_extractor::RegionCrop;
pub use vision_extractor::VisionExtractor;
