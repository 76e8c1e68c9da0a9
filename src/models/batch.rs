use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 批次状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Created,
    Running,
    Completed,
}

/// 单份答卷的最终结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetOutcome {
    Success,
    Failed,
}

/// 批次中单个文件的状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub filename: String,
    pub sheet_id: Uuid,
    pub outcome: SheetOutcome,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_number: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl StatusEntry {
    pub fn success(filename: impl Into<String>, sheet_id: Uuid, student_number: impl Into<String>) -> Self {
        let student_number = student_number.into();
        Self {
            filename: filename.into(),
            sheet_id,
            outcome: SheetOutcome::Success,
            message: format!("学号 {} 评分完成", student_number),
            student_number: Some(student_number),
            finished_at: Utc::now(),
        }
    }

    pub fn failed(filename: impl Into<String>, sheet_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            sheet_id,
            outcome: SheetOutcome::Failed,
            message: message.into(),
            student_number: None,
            finished_at: Utc::now(),
        }
    }
}

/// 批次快照（轮询接口返回）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    pub batch_id: Uuid,
    pub state: BatchState,
    pub total_files: usize,
    pub processed_count: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub started_at: DateTime<Utc>,
    pub statuses: Vec<StatusEntry>,
}

impl BatchJob {
    /// 新建一个尚未开始的批次
    pub fn new(total_files: usize) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            state: if total_files == 0 {
                BatchState::Completed
            } else {
                BatchState::Created
            },
            total_files,
            processed_count: 0,
            success_count: 0,
            failed_count: 0,
            started_at: Utc::now(),
            statuses: Vec::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == BatchState::Completed
    }
}
