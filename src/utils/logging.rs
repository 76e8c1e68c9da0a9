//! 日志工具模块
//!
//! 提供日志初始化和批次横幅输出的辅助函数

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::models::BatchJob;

/// 初始化日志（RUST_LOG 未设置时默认 info）
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // 重复初始化（例如测试中）时忽略
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 答题卡评分服务");
    info!("📊 最大并发数: {}", config.max_concurrent_sheets);
    info!("🤖 视觉模型: {}", config.vision_models.join(", "));
    info!("{}", "=".repeat(60));
}

/// 记录答卷加载信息
pub fn log_sheets_loaded(total: usize, workers: usize) {
    info!("✓ 找到 {} 份待处理的答卷", total);
    info!("📋 将由 {} 个工作协程并发处理", workers);
}

/// 记录批次开始信息
pub fn log_batch_start(batch_id: &str, total: usize, workers: usize) {
    info!("{}", "=".repeat(60));
    info!("📦 批次 {} 开始处理", batch_id);
    info!("📄 答卷数量: {} | 工作协程: {}", total, workers);
    info!("{}", "=".repeat(60));
}

/// 记录批次完成信息
pub fn log_batch_complete(job: &BatchJob) {
    info!("{}", "─".repeat(60));
    info!(
        "✓ 批次 {} 完成: 成功 {}/{}",
        job.batch_id, job.success_count, job.total_files
    );
    info!("{}", "─".repeat(60));
}

/// 打印最终统计信息
pub fn print_final_stats(job: &BatchJob) {
    info!("{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 成功: {}/{}", job.success_count, job.total_files);
    info!("❌ 失败: {}", job.failed_count);
    for status in job
        .statuses
        .iter()
        .filter(|s| s.outcome == crate::models::SheetOutcome::Failed)
    {
        info!("   - {}: {}", status.filename, truncate_text(&status.message, 120));
    }
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("短文本", 10), "短文本");
        assert_eq!(truncate_text("一二三四五六", 3), "一二三...");
    }
}
