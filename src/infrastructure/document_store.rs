//! 文档存储 - 基础设施层
//!
//! 评分核心只通过 [`DocumentStore`] 读取课程/试卷参考数据、写入成绩记录。
//! 内置实现把参考数据放在内存里，成绩按 JSON Lines 追加到文件，
//! 启动时回放已有记录。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::models::{Course, Exam, ReferenceData, ScoredResult};

/// 文档存储能力
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// 按编号查找试卷
    async fn find_exam(&self, exam_id: &str) -> AppResult<Option<Exam>>;
    /// 按编号查找课程
    async fn find_course(&self, course_id: &str) -> AppResult<Option<Course>>;
    /// 课程下的所有试卷
    async fn exams_for_course(&self, course_id: &str) -> AppResult<Vec<Exam>>;
    /// 保存一份评分结果
    async fn save_result(&self, result: &ScoredResult) -> AppResult<()>;
    /// 某份试卷的所有评分结果
    async fn results_for_exam(&self, exam_id: &str) -> AppResult<Vec<ScoredResult>>;
}

/// 去掉前导零后的编号，全零时保留一个 "0"
fn normalize_id(id: &str) -> &str {
    let trimmed = id.trim().trim_start_matches('0');
    if trimmed.is_empty() && !id.trim().is_empty() {
        "0"
    } else {
        trimmed
    }
}

/// 内存存储（可选 JSON Lines 持久化）
pub struct InMemoryStore {
    courses: HashMap<String, Course>,
    exams: HashMap<String, Exam>,
    results: RwLock<Vec<ScoredResult>>,
    results_file: Option<PathBuf>,
}

impl InMemoryStore {
    pub fn new(reference: ReferenceData) -> Self {
        Self {
            courses: reference
                .courses
                .into_iter()
                .map(|c| (c.id.clone(), c))
                .collect(),
            exams: reference
                .exams
                .into_iter()
                .map(|e| (e.id.clone(), e))
                .collect(),
            results: RwLock::new(Vec::new()),
            results_file: None,
        }
    }

    /// 使用成绩文件持久化，并回放其中已有的记录
    pub async fn with_results_file(mut self, path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut replayed = Vec::new();

        if path.exists() {
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| AppError::read_failed(path.display().to_string(), e))?;

            for (line_no, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<ScoredResult>(line) {
                    Ok(result) => replayed.push(result),
                    Err(e) => warn!(
                        "⚠️ 成绩文件 {} 第 {} 行无法解析，已跳过: {}",
                        path.display(),
                        line_no + 1,
                        e
                    ),
                }
            }
            info!("已回放 {} 条成绩记录", replayed.len());
        }

        self.results = RwLock::new(replayed);
        self.results_file = Some(path);
        Ok(self)
    }

    async fn append_line(&self, path: &Path, result: &ScoredResult) -> AppResult<()> {
        let mut line = serde_json::to_string(result)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| AppError::write_failed(path.display().to_string(), e))?;

        file.write_all(line.as_bytes())
            .await
            .map_err(|e| AppError::write_failed(path.display().to_string(), e))?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn find_exam(&self, exam_id: &str) -> AppResult<Option<Exam>> {
        if let Some(exam) = self.exams.get(exam_id) {
            return Ok(Some(exam.clone()));
        }
        let wanted = normalize_id(exam_id);
        Ok(self
            .exams
            .values()
            .find(|e| normalize_id(&e.id) == wanted)
            .cloned())
    }

    async fn find_course(&self, course_id: &str) -> AppResult<Option<Course>> {
        Ok(self.courses.get(course_id).cloned())
    }

    async fn exams_for_course(&self, course_id: &str) -> AppResult<Vec<Exam>> {
        let mut exams: Vec<Exam> = self
            .exams
            .values()
            .filter(|e| e.course_id == course_id)
            .cloned()
            .collect();
        exams.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(exams)
    }

    async fn save_result(&self, result: &ScoredResult) -> AppResult<()> {
        // 持有写锁期间追加文件，保证文件顺序与内存顺序一致
        let mut results = self.results.write().await;
        if let Some(path) = &self.results_file {
            self.append_line(path, result).await?;
        }
        results.push(result.clone());
        debug!(
            "已保存成绩: 学号 {} 试卷 {}",
            result.student_number, result.exam_id
        );
        Ok(())
    }

    async fn results_for_exam(&self, exam_id: &str) -> AppResult<Vec<ScoredResult>> {
        Ok(self
            .results
            .read()
            .await
            .iter()
            .filter(|r| r.exam_id == exam_id)
            .cloned()
            .collect())
    }
}
