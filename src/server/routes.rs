//! 路由配置

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, services::ServeDir};

use super::handlers;
use super::AppState;

/// 上传请求体上限（整批答卷以 base64 提交）
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// 创建路由
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(handlers::health))
        // 答卷
        .route("/api/sheets", post(handlers::score_sheet))
        .route("/api/batches", post(handlers::start_batch))
        .route("/api/batches/:batch_id", get(handlers::batch_status))
        // 报告
        .route(
            "/api/reports/courses/:course_id",
            get(handlers::course_report),
        )
        .route(
            "/api/reports/courses/:course_id/students/:student_number",
            get(handlers::student_report),
        );

    if let Some(dir) = &state.debug_crops_dir {
        router = router.nest_service("/debug/crops", ServeDir::new(dir));
    }

    router
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
