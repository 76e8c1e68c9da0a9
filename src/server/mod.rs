//! HTTP 服务
//!
//! 对外暴露答卷上传、批次进度查询和学习成果报告。
//! 只做请求解析和错误映射，业务全部交给编排层和聚合服务。

mod handlers;
mod routes;

pub use routes::create_router;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use crate::orchestrator::BatchProcessor;
use crate::services::OutcomeAggregator;

/// 服务共享状态
#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<BatchProcessor>,
    pub aggregator: Arc<OutcomeAggregator>,
    /// 设置后在 `/debug/crops` 下提供调试裁剪图
    pub debug_crops_dir: Option<PathBuf>,
}

/// 启动 HTTP 服务
pub async fn serve(state: AppState, listen_addr: &str) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr: SocketAddr = listen_addr.parse()?;
    tracing::info!("🌐 服务已启动: http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
