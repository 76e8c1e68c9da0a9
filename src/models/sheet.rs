use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::geometry::MarkerFailure;

/// 一份上传的答卷（只在一次流水线运行期间存在）
#[derive(Debug, Clone)]
pub struct Sheet {
    pub id: Uuid,
    pub bytes: Vec<u8>,
    /// 声明的 MIME 类型
    pub mime_type: String,
    /// 原始文件名
    pub filename: String,
}

impl Sheet {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            bytes,
            mime_type: mime_type.into(),
            filename: filename.into(),
        }
    }
}

/// 单题得分
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionScore {
    pub question_number: u32,
    /// 0-100，超出范围会被截断
    pub score: u32,
    pub learning_outcome_code: String,
}

impl QuestionScore {
    pub fn new(question_number: u32, score: u32, learning_outcome_code: impl Into<String>) -> Self {
        Self {
            question_number,
            score: score.min(100),
            learning_outcome_code: learning_outcome_code.into(),
        }
    }
}

/// 标记点检测结果摘要（写入成绩记录）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerStatus {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<MarkerFailure>,
}

/// 降级但继续处理时记录的警告
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SheetWarning {
    /// 未找到标记点，使用模板坐标模式
    TemplateFallback { reason: MarkerFailure },
    /// 区域裁剪失败
    RegionExtraction { region: String, message: String },
    /// 模板中没有该题的区域
    MissingQuestionRegion { question_number: u32 },
    /// 识别结果中没有数字，得分按 0 处理
    NoDigitInResponse { region: String, response: String },
    /// 没有模型给出有效数字，按 0 处理
    LowConfidenceDigit { region: String },
    /// 学号位数不足
    ShortStudentNumber { student_number: String },
}

/// 一份答卷的评分结果，创建后不可修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredResult {
    pub sheet_id: Uuid,
    pub filename: String,
    pub student_number: String,
    pub exam_id: String,
    pub course_id: String,
    /// 按题号排序
    pub questions: Vec<QuestionScore>,
    pub markers: MarkerStatus,
    #[serde(default)]
    pub warnings: Vec<SheetWarning>,
    pub processed_at: DateTime<Utc>,
}

impl ScoredResult {
    /// 某题得分
    pub fn score_for(&self, question_number: u32) -> Option<u32> {
        self.questions
            .iter()
            .find(|q| q.question_number == question_number)
            .map(|q| q.score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_score_clamped() {
        assert_eq!(QuestionScore::new(1, 250, "LO1").score, 100);
        assert_eq!(QuestionScore::new(1, 42, "LO1").score, 42);
    }

    #[test]
    fn test_warning_serialization_is_tagged() {
        let warning = SheetWarning::LowConfidenceDigit {
            region: "sid_3".to_string(),
        };
        let json = serde_json::to_value(&warning).unwrap();
        assert_eq!(json["kind"], "low_confidence_digit");
        assert_eq!(json["region"], "sid_3");
    }
}
