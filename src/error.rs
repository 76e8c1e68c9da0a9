use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 栅格化错误
    #[error("栅格化错误: {0}")]
    Raster(#[from] RasterError),
    /// 视觉识别服务错误
    #[error("视觉识别错误: {0}")]
    Vision(#[from] VisionError),
    /// 区域裁剪错误
    #[error("区域裁剪错误: {0}")]
    Region(#[from] RegionError),
    /// 业务逻辑错误
    #[error("业务错误: {0}")]
    Business(#[from] BusinessError),
    /// 数据存储错误
    #[error("存储错误: {0}")]
    Store(#[from] StoreError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 其他错误（用于包装第三方库错误）
    #[error("错误: {0}")]
    Other(String),
}

/// 错误归类，用于向调用方区分“配置问题”和“内容问题”
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// 服务凭据缺失/无效、栅格化工具缺失等
    Configuration,
    /// 文档无法读取、试卷不存在等
    Content,
    /// 其他内部错误
    Internal,
}

impl AppError {
    /// 错误归类
    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::Config(_) => ErrorCategory::Configuration,
            AppError::Raster(RasterError::BackendUnavailable { .. }) => {
                ErrorCategory::Configuration
            }
            AppError::Raster(_) => ErrorCategory::Content,
            AppError::Vision(VisionError::Service { kind, .. })
                if *kind == VisionErrorKind::AuthInvalid =>
            {
                ErrorCategory::Configuration
            }
            AppError::Vision(_) => ErrorCategory::Internal,
            AppError::Region(_) | AppError::Business(_) => ErrorCategory::Content,
            AppError::Store(_) | AppError::Other(_) => ErrorCategory::Internal,
        }
    }
}

/// 栅格化错误（对单张答卷是致命的，没有兜底）
#[derive(Debug, Error)]
pub enum RasterError {
    /// 没有可用的渲染后端
    #[error("没有可用的文档渲染工具: {tool}")]
    BackendUnavailable { tool: String },
    /// 不支持的文件类型
    #[error("不支持的文件类型: {mime_type}")]
    UnsupportedType { mime_type: String },
    /// 文档无法读取或渲染失败
    #[error("文档无法读取 ({filename}): {reason}")]
    Unreadable { filename: String, reason: String },
}

/// 视觉服务返回的错误类型
///
/// 回退/重试状态机只按类型分支，不做字符串匹配
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VisionErrorKind {
    /// 模型不存在或当前不可用 → 切换下一个模型
    ModelUnavailable,
    /// 限流/过载/超时 → 同一模型指数退避重试
    RateLimited,
    /// 凭据缺失或无效 → 整张答卷立即失败
    AuthInvalid,
    /// 其他错误 → 切换下一个模型
    Other,
}

/// 视觉识别错误
#[derive(Debug, Error)]
pub enum VisionError {
    /// 单次服务调用失败
    #[error("模型 {model} 调用失败 ({kind:?}): {message}")]
    Service {
        kind: VisionErrorKind,
        model: String,
        message: String,
    },
    /// 所有模型在重试和回退后仍没有有效响应
    #[error("区域 {region} 的所有模型均无有效响应，最后错误: {last_error}")]
    Exhausted { region: String, last_error: String },
    /// 图片编码失败
    #[error("图片编码失败: {0}")]
    Encode(String),
}

impl VisionError {
    /// 构造一次服务调用错误
    pub fn service(
        kind: VisionErrorKind,
        model: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        VisionError::Service {
            kind,
            model: model.into(),
            message: message.into(),
        }
    }

    /// 服务错误类型（非服务错误归为 Other）
    pub fn kind(&self) -> VisionErrorKind {
        match self {
            VisionError::Service { kind, .. } => *kind,
            _ => VisionErrorKind::Other,
        }
    }
}

/// 区域裁剪错误（只影响单个区域）
#[derive(Debug, Error)]
pub enum RegionError {
    /// 区域超出图像范围
    #[error("区域 {name} ({x},{y},{width}x{height}) 超出图像范围 {image_width}x{image_height}")]
    OutOfBounds {
        name: String,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        image_width: u32,
        image_height: u32,
    },
    /// 区域尺寸为零
    #[error("区域 {name} 尺寸为零")]
    Empty { name: String },
    /// 模板中没有该题的区域
    #[error("模板中没有第 {question_number} 题的区域")]
    MissingQuestion { question_number: u32 },
}

/// 业务逻辑错误
#[derive(Debug, Error)]
pub enum BusinessError {
    /// 试卷不存在
    #[error("试卷不存在: {exam_id}")]
    ExamNotFound { exam_id: String },
    /// 课程不存在
    #[error("课程不存在: {course_id}")]
    CourseNotFound { course_id: String },
    /// 批次不存在
    #[error("批次不存在: {batch_id}")]
    BatchNotFound { batch_id: String },
    /// 请求内容无效
    #[error("请求无效: {0}")]
    InvalidRequest(String),
}

/// 数据存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    /// 读取失败
    #[error("读取失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 写入失败
    #[error("写入失败 ({path}): {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 缺少视觉服务凭据
    #[error("未配置视觉服务 API Key (VISION_API_KEY)")]
    MissingApiKey,
    /// 模型列表为空
    #[error("视觉模型列表为空 (VISION_MODELS)")]
    NoModels,
    /// 模板文件无效
    #[error("模板文件无效 ({path}): {reason}")]
    InvalidTemplate { path: String, reason: String },
}

// ========== 从常见错误类型转换 ==========

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Other(format!("JSON处理失败: {}", err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Store(StoreError::ReadFailed {
            path: String::new(),
            source: Box::new(err),
        })
    }
}

impl From<image::ImageError> for AppError {
    fn from(err: image::ImageError) -> Self {
        AppError::Vision(VisionError::Encode(err.to_string()))
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Other(format!("后台任务执行失败: {}", err))
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建文件读取错误
    pub fn read_failed(
        path: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Store(StoreError::ReadFailed {
            path: path.into(),
            source: Box::new(source),
        })
    }

    /// 创建文件写入错误
    pub fn write_failed(
        path: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Store(StoreError::WriteFailed {
            path: path.into(),
            source: Box::new(source),
        })
    }

    /// 创建文档无法读取错误
    pub fn unreadable(filename: impl Into<String>, reason: impl Into<String>) -> Self {
        AppError::Raster(RasterError::Unreadable {
            filename: filename.into(),
            reason: reason.into(),
        })
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
