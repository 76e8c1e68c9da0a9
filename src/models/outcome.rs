//! 课程、试卷与学习成果（LO）/ 毕业要求（PO）定义
//!
//! 这些都是课程管理侧的参考数据，对评分核心只读

use serde::{Deserialize, Serialize};

/// 毕业要求（Program Outcome）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramOutcome {
    pub code: String,
    #[serde(default)]
    pub description: String,
}

/// 课程学习成果（Learning Outcome）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningOutcome {
    pub code: String,
    #[serde(default)]
    pub description: String,
    /// 该 LO 支撑的 PO 代码
    #[serde(default)]
    pub program_outcomes: Vec<String>,
}

/// 课程
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub learning_outcomes: Vec<LearningOutcome>,
    #[serde(default)]
    pub program_outcomes: Vec<ProgramOutcome>,
}

impl Course {
    pub fn learning_outcome(&self, code: &str) -> Option<&LearningOutcome> {
        self.learning_outcomes.iter().find(|lo| lo.code == code)
    }
}

/// 试卷中的一道题
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamQuestion {
    pub number: u32,
    pub max_score: f64,
    /// 该题对应的 LO 代码
    pub lo_code: String,
}

/// 试卷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exam {
    pub id: String,
    pub course_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub questions: Vec<ExamQuestion>,
}

impl Exam {
    pub fn question(&self, number: u32) -> Option<&ExamQuestion> {
        self.questions.iter().find(|q| q.number == number)
    }
}

/// 参考数据文件的整体结构
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenceData {
    #[serde(default)]
    pub courses: Vec<Course>,
    #[serde(default)]
    pub exams: Vec<Exam>,
}
