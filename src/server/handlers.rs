//! 接口处理函数

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use super::AppState;
use crate::error::{AppError, BusinessError, ErrorCategory};
use crate::models::Sheet;

/// 健康检查
pub async fn health() -> impl IntoResponse {
    StatusCode::OK
}

/// 错误响应体
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: bool,
    category: ErrorCategory,
    message: String,
}

/// 把 [`AppError`] 转成带归类的 JSON 错误响应
#[derive(Debug)]
pub struct ApiError(AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl From<BusinessError> for ApiError {
    fn from(err: BusinessError) -> Self {
        Self(err.into())
    }
}

/// 错误 → HTTP 状态码
pub fn status_for(err: &AppError) -> StatusCode {
    match err {
        AppError::Business(BusinessError::BatchNotFound { .. })
        | AppError::Business(BusinessError::CourseNotFound { .. }) => StatusCode::NOT_FOUND,
        AppError::Business(BusinessError::InvalidRequest(_)) => StatusCode::BAD_REQUEST,
        _ => match err.category() {
            ErrorCategory::Configuration => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCategory::Content => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            warn!("接口请求失败 ({}): {}", status, self.0);
        }
        let body = ErrorBody {
            error: true,
            category: self.0.category(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// 单份上传参数
#[derive(Debug, Deserialize)]
pub struct SheetUploadParams {
    pub filename: Option<String>,
}

/// 上传单份答卷（请求体为原始文件），同步返回评分结果
pub async fn score_sheet(
    State(state): State<AppState>,
    Query(params): Query<SheetUploadParams>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    if body.is_empty() {
        return Err(BusinessError::InvalidRequest("请求体为空".to_string()).into());
    }

    let filename = params.filename.unwrap_or_else(|| "upload".to_string());
    let declared = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or_default().trim().to_string());
    let mime_type = resolve_mime(declared.as_deref(), &filename);

    let sheet = Sheet::new(body.to_vec(), mime_type, filename);
    let result = state.processor.process_sheet(sheet).await?;
    Ok(Json(result))
}

/// 批量上传中的单个文件
#[derive(Debug, Deserialize)]
pub struct BatchFile {
    pub filename: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    pub data_base64: String,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub files: Vec<BatchFile>,
}

#[derive(Debug, Serialize)]
pub struct BatchAccepted {
    pub batch_id: Uuid,
}

/// 解码批量上传的文件；任何一个文件解码失败则整个请求无效
pub fn decode_batch_files(files: Vec<BatchFile>) -> Result<Vec<Sheet>, BusinessError> {
    files
        .into_iter()
        .map(|file| {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(file.data_base64.trim())
                .map_err(|e| {
                    BusinessError::InvalidRequest(format!("{} 的 base64 内容无效: {}", file.filename, e))
                })?;
            let mime_type = resolve_mime(file.mime_type.as_deref(), &file.filename);
            Ok(Sheet::new(bytes, mime_type, file.filename))
        })
        .collect()
}

/// 提交一个批次，立即返回批次ID
pub async fn start_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> ApiResult<impl IntoResponse> {
    let sheets = decode_batch_files(request.files)?;
    let batch_id = state.processor.start_batch(sheets).await?;
    Ok((StatusCode::ACCEPTED, Json(BatchAccepted { batch_id })))
}

/// 查询批次进度
pub async fn batch_status(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let batch_id = Uuid::parse_str(&batch_id)
        .map_err(|_| BusinessError::InvalidRequest(format!("批次ID格式无效: {}", batch_id)))?;
    let job = state.processor.poll_batch(batch_id).await?;
    Ok(Json(job))
}

/// 课程学习成果报告
pub async fn course_report(
    State(state): State<AppState>,
    Path(course_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let report = state.aggregator.course_report(&course_id).await?;
    Ok(Json(report))
}

/// 单个学生的学习成果报告
pub async fn student_report(
    State(state): State<AppState>,
    Path((course_id, student_number)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let report = state
        .aggregator
        .student_report(&course_id, &student_number)
        .await?;
    Ok(Json(report))
}

/// 声明的类型优先，缺失或笼统时按扩展名推断
fn resolve_mime(declared: Option<&str>, filename: &str) -> String {
    match declared.map(str::trim) {
        Some(mime) if !mime.is_empty() && mime != "application/octet-stream" => mime.to_string(),
        _ => mime_guess::from_path(filename)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    }
}
