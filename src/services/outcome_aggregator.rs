//! 成果达成度计算 - 业务能力层
//!
//! 三级汇总：题目 → 课程学习成果（LO）→ 专业培养成果（PO）。
//! 结果按需从成绩记录重新计算，不落盘。
//!
//! - 第一阶段：每题取所有学生的提交分数求平均，再除以满分得到得分率
//! - 第二阶段：LO 达成度 = 所属各题得分率的算术平均
//! - 第三阶段：PO 达成度 = 支撑它的各 LO 达成度的算术平均
//!
//! 个人报告不做跨学生平均：按 LO 汇总该学生的得分与满分直接相除。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AppResult, BusinessError};
use crate::infrastructure::DocumentStore;
use crate::models::{Course, Exam, ScoredResult};

/// 零分处理策略
///
/// 零分既可能是“未作答”，也可能是真实的零分，两种理解都保留
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroScorePolicy {
    /// 零分视为未作答，不计入平均分的分母
    #[default]
    ExcludeAsUnanswered,
    /// 零分视为真实得分
    IncludeAsGraded,
}

impl ZeroScorePolicy {
    /// 解析配置值：`exclude` / `include`
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "exclude" | "exclude_as_unanswered" => Some(Self::ExcludeAsUnanswered),
            "include" | "include_as_graded" => Some(Self::IncludeAsGraded),
            _ => None,
        }
    }
}

/// 保留两位小数（四舍五入）
pub fn round2(value: f64) -> f64 {
    ((value * 100.0) + 1e-9).round() / 100.0
}

/// 单题分析
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionAnalysis {
    pub exam_id: String,
    pub question_number: u32,
    pub learning_outcome_code: String,
    pub max_score: f64,
    /// 参与平均的分数个数
    pub answered_count: usize,
    pub average_score: f64,
    /// 得分率（百分比）
    pub success_rate: f64,
}

/// 成果达成度
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeAchievement {
    pub code: String,
    /// 达成度（百分比）
    pub achieved_percentage: f64,
    /// 参与计算的下级条目数（LO 为题目数，PO 为 LO 数）
    pub contributing_count: usize,
}

impl OutcomeAchievement {
    fn from_values(code: impl Into<String>, values: &[f64]) -> Self {
        let achieved = if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        };
        Self {
            code: code.into(),
            achieved_percentage: round2(achieved),
            contributing_count: values.len(),
        }
    }
}

/// 第一阶段：题目分析
pub fn analyze_questions(
    exam: &Exam,
    results: &[&ScoredResult],
    policy: ZeroScorePolicy,
) -> Vec<QuestionAnalysis> {
    exam.questions
        .iter()
        .map(|question| {
            let scores: Vec<f64> = results
                .iter()
                .filter_map(|r| r.score_for(question.number))
                .filter(|&s| policy == ZeroScorePolicy::IncludeAsGraded || s > 0)
                .map(f64::from)
                .collect();

            let average = if scores.is_empty() {
                0.0
            } else {
                scores.iter().sum::<f64>() / scores.len() as f64
            };
            let success_rate = if question.max_score > 0.0 {
                (average / question.max_score * 100.0).min(100.0)
            } else {
                0.0
            };

            QuestionAnalysis {
                exam_id: exam.id.clone(),
                question_number: question.number,
                learning_outcome_code: question.lo_code.clone(),
                max_score: question.max_score,
                answered_count: scores.len(),
                average_score: round2(average),
                success_rate: round2(success_rate),
            }
        })
        .collect()
}

/// 课程中声明的 LO 代码，加上题目中出现但未声明的代码（按首次出现顺序）
fn lo_codes<'a>(course: &'a Course, extra: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut codes: Vec<&str> = course
        .learning_outcomes
        .iter()
        .map(|lo| lo.code.as_str())
        .collect();
    for code in extra {
        if !codes.contains(&code) {
            codes.push(code);
        }
    }
    codes
}

/// 第二阶段：LO 达成度
pub fn lo_performance(course: &Course, analyses: &[QuestionAnalysis]) -> Vec<OutcomeAchievement> {
    let codes = lo_codes(
        course,
        analyses.iter().map(|a| a.learning_outcome_code.as_str()),
    );

    codes
        .into_iter()
        .map(|code| {
            let rates: Vec<f64> = analyses
                .iter()
                .filter(|a| a.learning_outcome_code == code)
                .map(|a| a.success_rate)
                .collect();
            OutcomeAchievement::from_values(code, &rates)
        })
        .collect()
}

/// 第三阶段：PO 达成度
///
/// 一个 LO 支撑多个 PO 时，分别计入每个 PO；没有题目的 LO 不参与
pub fn po_performance(course: &Course, lo_achievements: &[OutcomeAchievement]) -> Vec<OutcomeAchievement> {
    let mut codes: Vec<&str> = course
        .program_outcomes
        .iter()
        .map(|po| po.code.as_str())
        .collect();
    for lo in &course.learning_outcomes {
        for po in &lo.program_outcomes {
            if !codes.contains(&po.as_str()) {
                codes.push(po);
            }
        }
    }

    let by_code: HashMap<&str, &OutcomeAchievement> = lo_achievements
        .iter()
        .map(|a| (a.code.as_str(), a))
        .collect();

    codes
        .into_iter()
        .map(|po_code| {
            let values: Vec<f64> = course
                .learning_outcomes
                .iter()
                .filter(|lo| lo.program_outcomes.iter().any(|p| p == po_code))
                .filter_map(|lo| by_code.get(lo.code.as_str()))
                .filter(|a| a.contributing_count > 0)
                .map(|a| a.achieved_percentage)
                .collect();
            OutcomeAchievement::from_values(po_code, &values)
        })
        .collect()
}

/// 个人 LO 达成度：按 LO 汇总得分与满分（得分不超过满分）
pub fn student_lo_performance(
    course: &Course,
    exams: &[Exam],
    results: &[&ScoredResult],
) -> Vec<OutcomeAchievement> {
    // (得分, 满分, 题数)
    let mut totals: HashMap<&str, (f64, f64, usize)> = HashMap::new();
    let mut seen_codes: Vec<&str> = Vec::new();

    for result in results {
        let Some(exam) = exams.iter().find(|e| e.id == result.exam_id) else {
            continue;
        };
        for question in &exam.questions {
            let earned = result
                .score_for(question.number)
                .map(f64::from)
                .unwrap_or(0.0)
                .min(question.max_score);
            let entry = totals.entry(question.lo_code.as_str()).or_insert((0.0, 0.0, 0));
            entry.0 += earned;
            entry.1 += question.max_score;
            entry.2 += 1;
            seen_codes.push(question.lo_code.as_str());
        }
    }

    lo_codes(course, seen_codes.into_iter())
        .into_iter()
        .map(|code| match totals.get(code) {
            Some(&(earned, max, count)) if max > 0.0 => OutcomeAchievement {
                code: code.to_string(),
                achieved_percentage: round2(earned / max * 100.0),
                contributing_count: count,
            },
            Some(&(_, _, count)) => OutcomeAchievement {
                code: code.to_string(),
                achieved_percentage: 0.0,
                contributing_count: count,
            },
            None => OutcomeAchievement::from_values(code, &[]),
        })
        .collect()
}

/// 同一学生同一试卷多次提交时只保留最新一份
pub fn latest_per_student(results: &[ScoredResult]) -> Vec<&ScoredResult> {
    let mut latest: HashMap<(&str, &str), &ScoredResult> = HashMap::new();
    for result in results {
        let key = (result.student_number.as_str(), result.exam_id.as_str());
        match latest.get(&key) {
            Some(existing) if existing.processed_at >= result.processed_at => {}
            _ => {
                latest.insert(key, result);
            }
        }
    }
    let mut kept: Vec<&ScoredResult> = latest.into_values().collect();
    kept.sort_by(|a, b| {
        a.exam_id
            .cmp(&b.exam_id)
            .then(a.student_number.cmp(&b.student_number))
    });
    kept
}

/// 课程整体报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseReport {
    pub course_id: String,
    pub course_name: String,
    pub zero_score_policy: ZeroScorePolicy,
    /// 参与统计的答卷数
    pub sheet_count: usize,
    pub questions: Vec<QuestionAnalysis>,
    pub learning_outcomes: Vec<OutcomeAchievement>,
    pub program_outcomes: Vec<OutcomeAchievement>,
    pub generated_at: DateTime<Utc>,
}

/// 学生个人报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentReport {
    pub course_id: String,
    pub student_number: String,
    /// 该学生参加的试卷
    pub exam_ids: Vec<String>,
    pub learning_outcomes: Vec<OutcomeAchievement>,
    pub program_outcomes: Vec<OutcomeAchievement>,
    pub generated_at: DateTime<Utc>,
}

/// 成果达成度报告服务
pub struct OutcomeAggregator {
    store: Arc<dyn DocumentStore>,
    policy: ZeroScorePolicy,
}

impl OutcomeAggregator {
    pub fn new(store: Arc<dyn DocumentStore>, policy: ZeroScorePolicy) -> Self {
        Self { store, policy }
    }

    async fn load_course(&self, course_id: &str) -> AppResult<(Course, Vec<Exam>, Vec<ScoredResult>)> {
        let course = self
            .store
            .find_course(course_id)
            .await?
            .ok_or_else(|| BusinessError::CourseNotFound {
                course_id: course_id.to_string(),
            })?;

        let exams = self.store.exams_for_course(course_id).await?;
        let mut results = Vec::new();
        for exam in &exams {
            results.extend(self.store.results_for_exam(&exam.id).await?);
        }
        Ok((course, exams, results))
    }

    /// 生成课程整体报告
    pub async fn course_report(&self, course_id: &str) -> AppResult<CourseReport> {
        let (course, exams, results) = self.load_course(course_id).await?;
        let latest = latest_per_student(&results);

        let questions: Vec<QuestionAnalysis> = exams
            .iter()
            .flat_map(|exam| {
                let exam_results: Vec<&ScoredResult> = latest
                    .iter()
                    .copied()
                    .filter(|r| r.exam_id == exam.id)
                    .collect();
                analyze_questions(exam, &exam_results, self.policy)
            })
            .collect();

        let learning_outcomes = lo_performance(&course, &questions);
        let program_outcomes = po_performance(&course, &learning_outcomes);

        info!(
            "📊 课程 {} 报告: {} 份答卷, {} 道题, {} 个 LO, {} 个 PO",
            course.id,
            latest.len(),
            questions.len(),
            learning_outcomes.len(),
            program_outcomes.len()
        );

        Ok(CourseReport {
            course_id: course.id.clone(),
            course_name: course.name.clone(),
            zero_score_policy: self.policy,
            sheet_count: latest.len(),
            questions,
            learning_outcomes,
            program_outcomes,
            generated_at: Utc::now(),
        })
    }

    /// 生成学生个人报告
    pub async fn student_report(&self, course_id: &str, student_number: &str) -> AppResult<StudentReport> {
        let (course, exams, results) = self.load_course(course_id).await?;
        let latest = latest_per_student(&results);
        let mine: Vec<&ScoredResult> = latest
            .into_iter()
            .filter(|r| r.student_number == student_number)
            .collect();

        debug!("学生 {} 在课程 {} 中有 {} 份答卷", student_number, course_id, mine.len());

        let learning_outcomes = student_lo_performance(&course, &exams, &mine);
        let program_outcomes = po_performance(&course, &learning_outcomes);

        Ok(StudentReport {
            course_id: course.id.clone(),
            student_number: student_number.to_string(),
            exam_ids: mine.iter().map(|r| r.exam_id.clone()).collect(),
            learning_outcomes,
            program_outcomes,
            generated_at: Utc::now(),
        })
    }
}
