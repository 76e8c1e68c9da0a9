//! 视觉识别服务 - 业务能力层
//!
//! 把裁剪出的区域交给视觉模型读数：
//! - 得分框：按模型优先级回退，限流时同一模型指数退避重试
//! - 单个数字格：图像增强后由多个不同模型独立识别，多数投票
//!
//! 凭据无效立即失败；所有模型都没有响应时报告 `Exhausted`。

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use regex::Regex;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{VisionError, VisionErrorKind};
use crate::infrastructure::VisionBackend;
use crate::models::SheetWarning;
use crate::services::region_extractor::{encode_png, RegionCrop};

/// 得分框识别指令
pub const SCORE_DIRECTIVE: &str = "图片是答题卡上的一个得分框，框内是手写的分数。\
只返回这个分数的阿拉伯数字（0 到 100 之间的整数），不要任何其他文字。\
如果框是空的或无法辨认，返回 0。";

/// 单个数字格识别指令
pub const DIGIT_DIRECTIVE: &str = "图片是答题卡上的一个数字格，格内是一个手写数字。\
只返回这一个数字（0-9），不要任何其他文字。";

/// 低于该宽度的数字格会被放大
pub const DIGIT_MIN_WIDTH: u32 = 200;

/// 得分框识别结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreReading {
    pub score: u32,
    /// 给出结果的模型
    pub model: String,
    pub warning: Option<SheetWarning>,
}

/// 数字格识别结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigitReading {
    pub digit: u8,
    /// 每个模型的识别结果（None 表示未给出有效数字）
    pub votes: Vec<Option<u8>>,
    pub warning: Option<SheetWarning>,
}

static INTEGER: OnceLock<Option<Regex>> = OnceLock::new();

/// 返回文本中的第一个整数（可能溢出时按上限处理）
fn first_integer(text: &str) -> Option<u64> {
    let re = INTEGER.get_or_init(|| Regex::new("[0-9]+").ok()).as_ref()?;
    let digits = re.find(text)?.as_str();
    Some(digits.parse::<u64>().unwrap_or(u64::MAX))
}

/// 解析得分：取第一个整数，超过 100 截断为 100
pub fn parse_score(response: &str) -> Option<u32> {
    first_integer(response).map(|n| n.min(100) as u32)
}

/// 解析单个数字：第一个整数必须在 0-9 之间
pub fn parse_digit(response: &str) -> Option<u8> {
    first_integer(response)
        .filter(|&n| n <= 9)
        .map(|n| n as u8)
}

/// 多数投票：票数最多者胜出，平票时取最先出现的
pub fn majority_vote(votes: &[u8]) -> Option<u8> {
    let mut best: Option<(u8, usize)> = None;
    for &candidate in votes {
        let count = votes.iter().filter(|&&v| v == candidate).count();
        match best {
            Some((_, best_count)) if best_count >= count => {}
            _ => best = Some((candidate, count)),
        }
    }
    best.map(|(digit, _)| digit)
}

/// 学号最短长度，不足时只记警告
pub const MIN_STUDENT_NUMBER_LEN: usize = 7;

/// 按从左到右的顺序拼接各格数字
pub fn assemble_digits(digits: &[u8]) -> String {
    digits.iter().map(|d| char::from(b'0' + (*d).min(9))).collect()
}

/// 学号过短时的警告
pub fn student_number_warning(student_number: &str) -> Option<SheetWarning> {
    (student_number.chars().count() < MIN_STUDENT_NUMBER_LEN).then(|| SheetWarning::ShortStudentNumber {
        student_number: student_number.to_string(),
    })
}

/// 数字格增强：灰度 → 放大 → 对比度拉伸 → 锐化
pub fn enhance_digit(image: &DynamicImage) -> DynamicImage {
    let mut gray = image.to_luma8();

    if gray.width() < DIGIT_MIN_WIDTH && gray.width() > 0 {
        let factor = DIGIT_MIN_WIDTH as f32 / gray.width() as f32;
        let height = ((gray.height() as f32 * factor).round() as u32).max(1);
        gray = imageops::resize(&gray, DIGIT_MIN_WIDTH, height, FilterType::CatmullRom);
    }

    stretch_contrast(&mut gray);
    DynamicImage::ImageLuma8(imageops::unsharpen(&gray, 1.0, 2))
}

/// 线性拉伸到 0-255
fn stretch_contrast(gray: &mut GrayImage) {
    let (min, max) = gray
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p.0[0]), hi.max(p.0[0])));
    if max <= min {
        return;
    }
    let range = (max - min) as f32;
    for pixel in gray.pixels_mut() {
        pixel.0[0] = (((pixel.0[0] - min) as f32 / range) * 255.0).round() as u8;
    }
}

/// 视觉识别服务
pub struct VisionExtractor {
    backend: Arc<dyn VisionBackend>,
    models: Vec<String>,
    max_retries: u32,
    retry_base_delay: Duration,
    vote_count: usize,
}

impl VisionExtractor {
    /// 创建新的视觉识别服务
    pub fn new(backend: Arc<dyn VisionBackend>, config: &Config) -> Self {
        Self {
            backend,
            models: config.vision_models.clone(),
            max_retries: config.vision_max_retries,
            retry_base_delay: config.vision_retry_base_delay(),
            vote_count: config.digit_vote_count.max(1),
        }
    }

    /// 读取得分框
    pub async fn read_score(&self, crop: &RegionCrop) -> Result<ScoreReading, VisionError> {
        let png = crop.to_png()?;
        let region = crop.region.name.as_str();
        let mut last_error = String::from("没有配置任何模型");

        for model in &self.models {
            match self.call_with_retry(model, SCORE_DIRECTIVE, &png).await {
                Ok(response) => {
                    let reading = match parse_score(&response) {
                        Some(score) => ScoreReading {
                            score,
                            model: model.clone(),
                            warning: None,
                        },
                        None => {
                            warn!("⚠️ 区域 {} 的识别结果中没有数字: {:?}", region, response);
                            ScoreReading {
                                score: 0,
                                model: model.clone(),
                                warning: Some(SheetWarning::NoDigitInResponse {
                                    region: region.to_string(),
                                    response,
                                }),
                            }
                        }
                    };
                    debug!("区域 {} 得分 {} (模型 {})", region, reading.score, model);
                    return Ok(reading);
                }
                Err(e) if e.kind() == VisionErrorKind::AuthInvalid => return Err(e),
                Err(e) => {
                    warn!("⚠️ 模型 {} 无法识别区域 {}，切换下一个模型: {}", model, region, e);
                    last_error = e.to_string();
                }
            }
        }

        Err(VisionError::Exhausted {
            region: region.to_string(),
            last_error,
        })
    }

    /// 读取单个数字格（多模型投票）
    pub async fn read_digit(&self, crop: &RegionCrop) -> Result<DigitReading, VisionError> {
        let enhanced = enhance_digit(&crop.image);
        let png = encode_png(&enhanced)?;
        let region = crop.region.name.as_str();

        let mut votes: Vec<Option<u8>> = Vec::with_capacity(self.vote_count);
        let mut last_error = String::from("没有配置任何模型");

        for model in &self.models {
            if votes.len() >= self.vote_count {
                break;
            }
            match self.call_with_retry(model, DIGIT_DIRECTIVE, &png).await {
                Ok(response) => {
                    let digit = parse_digit(&response);
                    debug!("区域 {} 模型 {} 识别为 {:?}", region, model, digit);
                    votes.push(digit);
                }
                Err(e) if e.kind() == VisionErrorKind::AuthInvalid => return Err(e),
                Err(e) => {
                    warn!("⚠️ 模型 {} 无法识别数字格 {}: {}", model, region, e);
                    last_error = e.to_string();
                }
            }
        }

        if votes.is_empty() {
            return Err(VisionError::Exhausted {
                region: region.to_string(),
                last_error,
            });
        }

        let valid: Vec<u8> = votes.iter().flatten().copied().collect();
        match majority_vote(&valid) {
            Some(digit) => Ok(DigitReading {
                digit,
                votes,
                warning: None,
            }),
            None => {
                warn!("⚠️ 数字格 {} 没有模型给出有效数字，按 0 处理", region);
                Ok(DigitReading {
                    digit: 0,
                    votes,
                    warning: Some(SheetWarning::LowConfidenceDigit {
                        region: region.to_string(),
                    }),
                })
            }
        }
    }

    /// 调用同一模型，限流时指数退避重试
    async fn call_with_retry(
        &self,
        model: &str,
        directive: &str,
        png: &[u8],
    ) -> Result<String, VisionError> {
        let mut attempt: u32 = 0;
        loop {
            match self.backend.complete(model, directive, png).await {
                Ok(response) => return Ok(response),
                Err(e) if e.kind() == VisionErrorKind::RateLimited && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.retry_delay(attempt);
                    warn!(
                        "⏳ 模型 {} 限流，第 {}/{} 次重试，等待 {:?}",
                        model, attempt, self.max_retries, delay
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 第 n 次重试前的等待时间：base · 2^(n-1)
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.retry_base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}
