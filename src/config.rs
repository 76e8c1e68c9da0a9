use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::services::outcome_aggregator::ZeroScorePolicy;

/// 默认的视觉模型列表（按优先级排序）
pub const DEFAULT_VISION_MODELS: [&str; 5] = [
    "gemini-2.5-flash",
    "gemini-2.0-flash",
    "gemini-1.5-flash",
    "gpt-4o-mini",
    "gpt-4o",
];

/// 程序配置
#[derive(Clone, Debug)]
pub struct Config {
    /// 同时处理的答卷数量
    pub max_concurrent_sheets: usize,
    // --- 视觉服务配置 ---
    pub vision_api_key: String,
    pub vision_api_base_url: String,
    /// 按优先级排序的模型列表
    pub vision_models: Vec<String>,
    /// 单次请求超时（秒）
    pub vision_request_timeout_secs: u64,
    /// 限流时同一模型的最大重试次数
    pub vision_max_retries: u32,
    /// 指数退避的基础延迟（毫秒）
    pub vision_retry_base_delay_ms: u64,
    /// 单个数字格投票的模型数量
    pub digit_vote_count: usize,
    // --- 栅格化与模板 ---
    /// PDF 渲染分辨率
    pub raster_dpi: u32,
    /// 模板布局文件，未设置时使用内置坐标表
    pub template_layout_file: Option<PathBuf>,
    // --- 数据 ---
    /// 课程/试卷参考数据（TOML）
    pub reference_data_file: PathBuf,
    /// 成绩记录文件（JSON Lines）
    pub results_file: PathBuf,
    /// 调试裁剪图目录，未设置时不保存
    pub debug_crops_dir: Option<PathBuf>,
    /// 零分题目的统计策略
    pub zero_score_policy: ZeroScorePolicy,
    // --- 运行模式 ---
    /// HTTP 监听地址
    pub listen_addr: String,
    /// 设置后以目录批处理模式运行
    pub sheet_folder: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_sheets: 4,
            vision_api_key: String::new(),
            vision_api_base_url: "https://api.openai.com/v1".to_string(),
            vision_models: DEFAULT_VISION_MODELS.iter().map(|m| m.to_string()).collect(),
            vision_request_timeout_secs: 30,
            vision_max_retries: 3,
            vision_retry_base_delay_ms: 1000,
            digit_vote_count: 3,
            raster_dpi: 200,
            template_layout_file: None,
            reference_data_file: PathBuf::from("reference_data.toml"),
            results_file: PathBuf::from("scored_results.jsonl"),
            debug_crops_dir: None,
            zero_score_policy: ZeroScorePolicy::ExcludeAsUnanswered,
            listen_addr: "127.0.0.1:8080".to_string(),
            sheet_folder: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            max_concurrent_sheets: parse_env("MAX_CONCURRENT_SHEETS", default.max_concurrent_sheets)
                .max(1),
            vision_api_key: std::env::var("VISION_API_KEY").unwrap_or(default.vision_api_key),
            vision_api_base_url: std::env::var("VISION_API_BASE_URL")
                .unwrap_or(default.vision_api_base_url),
            vision_models: std::env::var("VISION_MODELS")
                .ok()
                .map(|v| parse_model_list(&v))
                .filter(|models| !models.is_empty())
                .unwrap_or(default.vision_models),
            vision_request_timeout_secs: parse_env(
                "VISION_REQUEST_TIMEOUT_SECS",
                default.vision_request_timeout_secs,
            ),
            vision_max_retries: parse_env("VISION_MAX_RETRIES", default.vision_max_retries),
            vision_retry_base_delay_ms: parse_env(
                "VISION_RETRY_BASE_DELAY_MS",
                default.vision_retry_base_delay_ms,
            ),
            digit_vote_count: parse_env("DIGIT_VOTE_COUNT", default.digit_vote_count).max(1),
            raster_dpi: parse_env("RASTER_DPI", default.raster_dpi),
            template_layout_file: std::env::var("TEMPLATE_LAYOUT_FILE").ok().map(PathBuf::from),
            reference_data_file: std::env::var("REFERENCE_DATA_FILE")
                .map(PathBuf::from)
                .unwrap_or(default.reference_data_file),
            results_file: std::env::var("RESULTS_FILE")
                .map(PathBuf::from)
                .unwrap_or(default.results_file),
            debug_crops_dir: std::env::var("DEBUG_CROPS_DIR").ok().map(PathBuf::from),
            zero_score_policy: std::env::var("ZERO_SCORE_POLICY")
                .ok()
                .and_then(|v| ZeroScorePolicy::parse(&v))
                .unwrap_or(default.zero_score_policy),
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(default.listen_addr),
            sheet_folder: std::env::var("SHEET_FOLDER").ok().map(PathBuf::from),
        }
    }

    /// 单次视觉请求超时
    pub fn vision_request_timeout(&self) -> Duration {
        Duration::from_secs(self.vision_request_timeout_secs)
    }

    /// 退避基础延迟
    pub fn vision_retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.vision_retry_base_delay_ms)
    }
}

/// 解析逗号分隔的模型列表
pub fn parse_model_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_env<T>(var_name: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Debug,
{
    match std::env::var(var_name) {
        Ok(value) => value.trim().parse().unwrap_or_else(|_| {
            warn!(
                "环境变量 {} 的值 '{}' 无法解析，使用默认值 {:?}",
                var_name, value, default
            );
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_model_list() {
        assert_eq!(
            parse_model_list(" gpt-4o, ,gemini-2.0-flash ,"),
            vec!["gpt-4o".to_string(), "gemini-2.0-flash".to_string()]
        );
        assert!(parse_model_list("").is_empty());
    }

    #[test]
    fn test_default_has_five_models() {
        let config = Config::default();
        assert_eq!(config.vision_models.len(), 5);
        assert_eq!(config.vision_max_retries, 3);
        assert_eq!(config.vision_retry_base_delay(), Duration::from_secs(1));
    }
}
