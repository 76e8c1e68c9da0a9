pub mod batch;
pub mod geometry;
pub mod layout;
pub mod loaders;
pub mod outcome;
pub mod sheet;

pub use batch::{BatchJob, BatchState, SheetOutcome, StatusEntry};
pub use geometry::{MarkerFailure, MarkerSet, Point2, RegionBox, RegionKind};
pub use layout::{TemplateLayout, TemplateLayouts, TemplateSpecs};
pub use loaders::{load_reference_data, load_sheets_from_folder, load_template_layouts};
pub use outcome::{Course, Exam, ExamQuestion, LearningOutcome, ProgramOutcome, ReferenceData};
pub use sheet::{MarkerStatus, QuestionScore, ScoredResult, Sheet, SheetWarning};
