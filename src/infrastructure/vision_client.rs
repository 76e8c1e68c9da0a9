//! 视觉推理客户端 - 基础设施层
//!
//! 只负责“把一张图片和一段指令发给模型，拿回文本”，并把服务端错误
//! 归类为 [`VisionErrorKind`]。回退、重试、投票都不在这里做。
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 兼容 OpenAI API 的服务（如 Azure, Gemini, Doubao 等）
//! - 图片以 base64 data URL 形式内联

use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
        ChatCompletionRequestMessageContentPartText, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
        ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs, ImageDetail,
        ImageUrl,
    },
    Client,
};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use phf::phf_map;
use tracing::debug;

use crate::config::Config;
use crate::error::{VisionError, VisionErrorKind};

/// 视觉推理能力
///
/// 实现方必须把失败归类为 [`VisionErrorKind`]，上层状态机只按类型分支
#[async_trait]
pub trait VisionBackend: Send + Sync {
    /// 用指定模型识别一张 PNG 图片，返回模型的原始文本
    async fn complete(
        &self,
        model: &str,
        directive: &str,
        image_png: &[u8],
    ) -> Result<String, VisionError>;
}

/// 服务端错误码 → 错误类型
static ERROR_CODE_KINDS: phf::Map<&'static str, VisionErrorKind> = phf_map! {
    "model_not_found" => VisionErrorKind::ModelUnavailable,
    "model_not_available" => VisionErrorKind::ModelUnavailable,
    "model_not_supported" => VisionErrorKind::ModelUnavailable,
    "not_found_error" => VisionErrorKind::ModelUnavailable,
    "404" => VisionErrorKind::ModelUnavailable,
    "rate_limit_exceeded" => VisionErrorKind::RateLimited,
    "rate_limit_error" => VisionErrorKind::RateLimited,
    "resource_exhausted" => VisionErrorKind::RateLimited,
    "overloaded_error" => VisionErrorKind::RateLimited,
    "server_overloaded" => VisionErrorKind::RateLimited,
    "service_unavailable" => VisionErrorKind::RateLimited,
    "429" => VisionErrorKind::RateLimited,
    "503" => VisionErrorKind::RateLimited,
    "529" => VisionErrorKind::RateLimited,
    "invalid_api_key" => VisionErrorKind::AuthInvalid,
    "invalid_authentication" => VisionErrorKind::AuthInvalid,
    "authentication_error" => VisionErrorKind::AuthInvalid,
    "permission_denied" => VisionErrorKind::AuthInvalid,
    "unauthenticated" => VisionErrorKind::AuthInvalid,
    "401" => VisionErrorKind::AuthInvalid,
    "403" => VisionErrorKind::AuthInvalid,
};

/// 按错误码、错误类型依次查表
pub fn classify_error_code(code: Option<&str>, error_type: Option<&str>) -> VisionErrorKind {
    [code, error_type]
        .into_iter()
        .flatten()
        .find_map(|key| ERROR_CODE_KINDS.get(key.to_ascii_lowercase().as_str()).copied())
        .unwrap_or(VisionErrorKind::Other)
}

fn classify_openai_error(err: &OpenAIError) -> VisionErrorKind {
    match err {
        OpenAIError::ApiError(api) => classify_error_code(api.code.as_deref(), api.r#type.as_deref()),
        OpenAIError::Reqwest(e) if e.is_timeout() => VisionErrorKind::RateLimited,
        _ => VisionErrorKind::Other,
    }
}

/// 把 PNG 编码为 data URL
pub fn png_data_url(image_png: &[u8]) -> String {
    format!("data:image/png;base64,{}", BASE64.encode(image_png))
}

/// OpenAI 兼容的视觉推理客户端
pub struct OpenAiVisionClient {
    client: Client<OpenAIConfig>,
    has_api_key: bool,
    request_timeout: Duration,
}

impl OpenAiVisionClient {
    /// 创建新的视觉客户端
    pub fn new(config: &Config) -> Self {
        // 配置 OpenAI 客户端（兼容 OpenAI API 的服务）
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.vision_api_key)
            .with_api_base(&config.vision_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            has_api_key: !config.vision_api_key.trim().is_empty(),
            request_timeout: config.vision_request_timeout(),
        }
    }

    fn build_messages(
        &self,
        directive: &str,
        image_png: &[u8],
    ) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content("你是答题卡识别助手，只输出要求的内容，不做任何解释。")
            .build()?;

        let content_parts = vec![
            ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartText {
                    text: directive.to_string(),
                },
            ),
            ChatCompletionRequestUserMessageContentPart::ImageUrl(
                ChatCompletionRequestMessageContentPartImage {
                    image_url: ImageUrl {
                        url: png_data_url(image_png),
                        detail: Some(ImageDetail::High),
                    },
                },
            ),
        ];

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(ChatCompletionRequestUserMessageContent::Array(content_parts))
            .build()?;

        Ok(vec![
            ChatCompletionRequestMessage::System(system_msg),
            ChatCompletionRequestMessage::User(user_msg),
        ])
    }
}

#[async_trait]
impl VisionBackend for OpenAiVisionClient {
    async fn complete(
        &self,
        model: &str,
        directive: &str,
        image_png: &[u8],
    ) -> Result<String, VisionError> {
        if !self.has_api_key {
            return Err(VisionError::service(
                VisionErrorKind::AuthInvalid,
                model,
                "未配置 API Key",
            ));
        }

        debug!("调用视觉模型: {}，图片 {} 字节", model, image_png.len());

        let messages = self
            .build_messages(directive, image_png)
            .map_err(|e| VisionError::service(VisionErrorKind::Other, model, e.to_string()))?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(messages)
            .temperature(0.0)
            .max_tokens(16u32)
            .build()
            .map_err(|e| VisionError::service(VisionErrorKind::Other, model, e.to_string()))?;

        let response = tokio::time::timeout(self.request_timeout, self.client.chat().create(request))
            .await
            .map_err(|_| {
                VisionError::service(
                    VisionErrorKind::RateLimited,
                    model,
                    format!("请求超时 ({:?})", self.request_timeout),
                )
            })?
            .map_err(|e| VisionError::service(classify_openai_error(&e), model, e.to_string()))?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| VisionError::service(VisionErrorKind::Other, model, "返回内容为空"))?;

        debug!("模型 {} 返回: {}", model, content.trim());

        Ok(content.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_error_codes() {
        assert_eq!(
            classify_error_code(Some("model_not_found"), None),
            VisionErrorKind::ModelUnavailable
        );
        assert_eq!(
            classify_error_code(None, Some("rate_limit_error")),
            VisionErrorKind::RateLimited
        );
        assert_eq!(
            classify_error_code(Some("INVALID_API_KEY"), Some("invalid_request_error")),
            VisionErrorKind::AuthInvalid
        );
        assert_eq!(
            classify_error_code(Some("context_length_exceeded"), Some("invalid_request_error")),
            VisionErrorKind::Other
        );
        assert_eq!(classify_error_code(None, None), VisionErrorKind::Other);
    }

    #[test]
    fn test_png_data_url() {
        assert_eq!(png_data_url(b"abc"), "data:image/png;base64,YWJj");
    }

    #[tokio::test]
    async fn test_missing_key_is_auth_failure() {
        let client = OpenAiVisionClient::new(&Config::default());
        let err = client.complete("gpt-4o", "读数", b"png").await.unwrap_err();
        assert_eq!(err.kind(), VisionErrorKind::AuthInvalid);
    }

    /// 测试真实视觉服务（需要 VISION_API_KEY）
    ///
    /// 运行方式：
    /// ```bash
    /// cargo test test_vision_service_connectivity -- --ignored --nocapture
    /// ```
    #[tokio::test]
    #[ignore]
    async fn test_vision_service_connectivity() {
        let _ = tracing_subscriber::fmt::try_init();

        let config = Config::from_env();
        let client = OpenAiVisionClient::new(&config);

        let mut png = Vec::new();
        image::DynamicImage::new_luma8(64, 64)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let result = client
            .complete(&config.vision_models[0], "图中写的数字是多少？只返回数字。", &png)
            .await;

        match result {
            Ok(response) => println!("✅ 视觉服务调用成功: {}", response),
            Err(e) => panic!("视觉服务调用失败: {}", e),
        }
    }
}
