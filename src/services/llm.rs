use crate::core::config::GeminiConfig;
use crate::core::error::GenerationError;
use crate::core::project::MediaPayload;
use crate::services::prompt;
use crate::utils::audio::{decode_base64, encode_base64};
use anyhow::Result;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

#[derive(Debug, Clone, Default)]
pub struct TextRequest {
    pub system: String,
    pub prompt: String,
    /// When set, the service is asked for JSON matching this schema.
    pub response_schema: Option<serde_json::Value>,
}

/// Raw mono 16-bit PCM as returned by the speech endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechAudio {
    pub pcm: Vec<u8>,
    pub sample_rate: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageTier {
    /// High quality, slower and billed separately.
    Primary,
    /// Faster, cheaper model used when the primary tier is unavailable.
    Fallback,
}

impl std::fmt::Display for ImageTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageTier::Primary => f.write_str("primary"),
            ImageTier::Fallback => f.write_str("fallback"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoRequest {
    pub prompt: String,
    pub seed_image: Option<MediaPayload>,
    pub aspect_ratio: String,
    pub resolution: String,
}

/// Handle of a long-running video generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoOperation {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoStatus {
    Pending,
    Ready { uri: String },
    Failed(String),
}

/// Capabilities of the external generative service.
///
/// Every call takes the already resolved API key so that per-project
/// overrides never leak into the client itself.
#[async_trait]
pub trait GenerativeClient: Send + Sync + Debug {
    async fn generate_text(&self, api_key: &str, request: &TextRequest) -> Result<String>;

    async fn synthesize_speech(&self, api_key: &str, text: &str, voice: &str) -> Result<SpeechAudio>;

    async fn generate_image(
        &self,
        api_key: &str,
        prompt: &str,
        aspect_ratio: &str,
        tier: ImageTier,
    ) -> Result<MediaPayload>;

    /// Describes the person in `image` in `language`.
    async fn analyze_image(&self, api_key: &str, image: &MediaPayload, language: &str) -> Result<String>;

    async fn start_video(&self, api_key: &str, request: &VideoRequest) -> Result<VideoOperation>;

    async fn poll_video(&self, api_key: &str, operation: &VideoOperation) -> Result<VideoStatus>;

    async fn download_video(&self, api_key: &str, uri: &str) -> Result<MediaPayload>;
}

// --- Gemini ---

#[derive(Debug)]
pub struct GeminiClient {
    config: GeminiConfig,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig) -> Self {
        Self {
            config: config.clone(),
            client: reqwest::Client::new(),
        }
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        format!(
            "{}/models/{}:{}",
            self.config.base_url.trim_end_matches('/'),
            model,
            method
        )
    }

    async fn post_json<B: Serialize, R: DeserializeOwned>(&self, url: &str, api_key: &str, body: &B) -> Result<R> {
        let resp = self
            .client
            .post(url)
            .header("x-goog-api-key", api_key)
            .json(body)
            .send()
            .await
            .map_err(GenerationError::from_reqwest)?;
        read_json(resp).await
    }

    async fn generate_content(&self, model: &str, api_key: &str, request: &GeminiRequest) -> Result<GeminiResponse> {
        let url = self.model_url(model, "generateContent");
        log::debug!("POST {}", url);
        let response: GeminiResponse = self.post_json(&url, api_key, request).await?;
        if let Some(err) = &response.error {
            return Err(GenerationError::Http {
                status: err.code.unwrap_or(500),
                message: err.message.clone(),
            }
            .into());
        }
        Ok(response)
    }
}

async fn read_json<R: DeserializeOwned>(resp: reqwest::Response) -> Result<R> {
    let status = resp.status();
    let body = resp.text().await.map_err(GenerationError::from_reqwest)?;
    if !status.is_success() {
        return Err(GenerationError::Http {
            status: status.as_u16(),
            message: error_message(&body),
        }
        .into());
    }
    serde_json::from_str(&body).map_err(|e| {
        GenerationError::Parse(format!("{}. Body: {}", e, truncate(&body, 500))).into()
    })
}

/// Pulls the human readable message out of a Google error envelope.
fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct Envelope {
        error: GeminiError,
    }
    match serde_json::from_str::<Envelope>(body) {
        Ok(envelope) => match envelope.error.status {
            Some(status) => format!("{} ({})", envelope.error.message, status),
            None => envelope.error.message,
        },
        Err(_) => truncate(body, 500).to_string(),
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Reads `rate=NNNN` out of a mime type such as `audio/L16;codec=pcm;rate=24000`.
pub fn parse_sample_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .filter_map(|p| p.trim().strip_prefix("rate="))
        .find_map(|rate| rate.trim().parse().ok())
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<GeminiInlineData>,
}

impl GeminiPart {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

impl GeminiRequest {
    fn user(parts: Vec<GeminiPart>) -> Self {
        Self {
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts,
            }],
            ..Default::default()
        }
    }
}

#[derive(Serialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speech_config: Option<SpeechConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_config: Option<ImageConfig>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ImageConfig {
    aspect_ratio: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    prompt_feedback: Option<PromptFeedback>,
    error: Option<GeminiError>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    code: Option<u16>,
    message: String,
    status: Option<String>,
}

impl GeminiResponse {
    fn first_parts(&self) -> Result<&[GeminiPart]> {
        let Some(first) = self.candidates.as_ref().and_then(|c| c.first()) else {
            let reason = self
                .prompt_feedback
                .as_ref()
                .and_then(|f| f.block_reason.as_deref())
                .unwrap_or("no candidates");
            return Err(GenerationError::EmptyResponse(format!("Gemini returned nothing: {}", reason)).into());
        };
        match &first.content {
            Some(content) if !content.parts.is_empty() => Ok(&content.parts),
            _ => {
                let reason = first.finish_reason.as_deref().unwrap_or("UNKNOWN");
                Err(GenerationError::EmptyResponse(format!("Gemini response empty. Finish reason: {}", reason)).into())
            }
        }
    }

    fn text(&self) -> Result<String> {
        let text: String = self
            .first_parts()?
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        if text.trim().is_empty() {
            return Err(GenerationError::EmptyResponse("Gemini response has no text part".to_string()).into());
        }
        Ok(text)
    }

    fn inline_data(&self) -> Result<&GeminiInlineData> {
        self.first_parts()?
            .iter()
            .find_map(|p| p.inline_data.as_ref())
            .ok_or_else(|| GenerationError::EmptyResponse("Gemini response has no inline data".to_string()).into())
    }
}

#[async_trait]
impl GenerativeClient for GeminiClient {
    async fn generate_text(&self, api_key: &str, request: &TextRequest) -> Result<String> {
        let mut body = GeminiRequest::user(vec![GeminiPart::text(&request.prompt)]);
        if !request.system.is_empty() {
            body.system_instruction = Some(GeminiContent {
                role: None,
                parts: vec![GeminiPart::text(&request.system)],
            });
        }
        if let Some(schema) = &request.response_schema {
            body.generation_config = Some(GenerationConfig {
                response_mime_type: Some("application/json".to_string()),
                response_schema: Some(schema.clone()),
                ..Default::default()
            });
        }

        let response = self.generate_content(&self.config.text_model, api_key, &body).await?;
        response.text()
    }

    async fn synthesize_speech(&self, api_key: &str, text: &str, voice: &str) -> Result<SpeechAudio> {
        let mut body = GeminiRequest::user(vec![GeminiPart::text(text)]);
        body.generation_config = Some(GenerationConfig {
            response_modalities: Some(vec!["AUDIO".to_string()]),
            speech_config: Some(SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: voice.to_string(),
                    },
                },
            }),
            ..Default::default()
        });

        let response = self.generate_content(&self.config.speech_model, api_key, &body).await?;
        let inline = response.inline_data()?;
        let pcm = decode_base64(&inline.data).map_err(|e| GenerationError::Parse(format!("{:#}", e)))?;
        Ok(SpeechAudio {
            sample_rate: parse_sample_rate(&inline.mime_type),
            pcm,
        })
    }

    async fn generate_image(
        &self,
        api_key: &str,
        prompt: &str,
        aspect_ratio: &str,
        tier: ImageTier,
    ) -> Result<MediaPayload> {
        let model = match tier {
            ImageTier::Primary => &self.config.image_model,
            ImageTier::Fallback => &self.config.fallback_image_model,
        };
        let mut body = GeminiRequest::user(vec![GeminiPart::text(prompt)]);
        body.generation_config = Some(GenerationConfig {
            response_modalities: Some(vec!["IMAGE".to_string()]),
            image_config: Some(ImageConfig {
                aspect_ratio: aspect_ratio.to_string(),
            }),
            ..Default::default()
        });

        let response = self.generate_content(model, api_key, &body).await?;
        let inline = response.inline_data()?;
        let data = decode_base64(&inline.data).map_err(|e| GenerationError::Parse(format!("{:#}", e)))?;
        Ok(MediaPayload::new(inline.mime_type.clone(), data))
    }

    async fn analyze_image(&self, api_key: &str, image: &MediaPayload, language: &str) -> Result<String> {
        let body = GeminiRequest::user(vec![
            GeminiPart {
                text: None,
                inline_data: Some(GeminiInlineData {
                    mime_type: image.mime_type.clone(),
                    data: encode_base64(&image.data),
                }),
            },
            GeminiPart::text(&prompt::character_analysis_prompt(language)),
        ]);

        let response = self.generate_content(&self.config.analysis_model, api_key, &body).await?;
        Ok(response.text()?.trim().to_string())
    }

    async fn start_video(&self, api_key: &str, request: &VideoRequest) -> Result<VideoOperation> {
        let url = self.model_url(&self.config.video_model, "predictLongRunning");
        let body = VideoPredictRequest::from_request(request);
        let op: OperationResponse = self.post_json(&url, api_key, &body).await?;
        log::info!("Started video operation {}", op.name);
        Ok(VideoOperation { name: op.name })
    }

    async fn poll_video(&self, api_key: &str, operation: &VideoOperation) -> Result<VideoStatus> {
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), operation.name);
        let resp = self
            .client
            .get(&url)
            .header("x-goog-api-key", api_key)
            .send()
            .await
            .map_err(GenerationError::from_reqwest)?;
        let op: OperationResponse = read_json(resp).await?;
        Ok(op.status())
    }

    async fn download_video(&self, api_key: &str, uri: &str) -> Result<MediaPayload> {
        let resp = self
            .client
            .get(uri)
            .header("x-goog-api-key", api_key)
            .send()
            .await
            .map_err(GenerationError::from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GenerationError::Http {
                status: status.as_u16(),
                message: error_message(&body),
            }
            .into());
        }

        let mime_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("video/mp4")
            .to_string();

        let mut data = Vec::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk.map_err(GenerationError::from_reqwest)?);
        }
        log::debug!("Downloaded {} bytes of video", data.len());
        Ok(MediaPayload::new(mime_type, data))
    }
}

// --- Veo long-running operations ---

#[derive(Serialize, Debug)]
struct VideoPredictRequest {
    instances: Vec<VideoInstance>,
    parameters: VideoParameters,
}

#[derive(Serialize, Debug)]
struct VideoInstance {
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<VideoImage>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct VideoImage {
    bytes_base64_encoded: String,
    mime_type: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct VideoParameters {
    aspect_ratio: String,
    resolution: String,
}

impl VideoPredictRequest {
    fn from_request(request: &VideoRequest) -> Self {
        // Veo only renders landscape or portrait.
        let aspect_ratio = if request.aspect_ratio == "9:16" { "9:16" } else { "16:9" };
        Self {
            instances: vec![VideoInstance {
                prompt: request.prompt.clone(),
                image: request.seed_image.as_ref().map(|img| VideoImage {
                    bytes_base64_encoded: encode_base64(&img.data),
                    mime_type: img.mime_type.clone(),
                }),
            }],
            parameters: VideoParameters {
                aspect_ratio: aspect_ratio.to_string(),
                resolution: request.resolution.clone(),
            },
        }
    }
}

#[derive(Deserialize, Debug)]
struct OperationResponse {
    name: String,
    #[serde(default)]
    done: bool,
    error: Option<GeminiError>,
    response: Option<serde_json::Value>,
}

impl OperationResponse {
    fn status(&self) -> VideoStatus {
        if let Some(err) = &self.error {
            return VideoStatus::Failed(err.message.clone());
        }
        if !self.done {
            return VideoStatus::Pending;
        }
        let uri = self
            .response
            .as_ref()
            .and_then(|r| r.pointer("/generateVideoResponse/generatedSamples/0/video/uri"))
            .and_then(|v| v.as_str());
        match uri {
            Some(uri) => VideoStatus::Ready { uri: uri.to_string() },
            None => VideoStatus::Failed("Operation finished without a video (possibly filtered)".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gemini_response_parsing_safety_block() {
        let json = r#"{
            "candidates": [
                {
                    "finishReason": "SAFETY",
                    "index": 0
                }
            ]
        }"#;

        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        let err = result.text().unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn test_gemini_response_prompt_blocked() {
        let json = r#"{ "promptFeedback": { "blockReason": "PROHIBITED_CONTENT" } }"#;
        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        assert!(result.inline_data().unwrap_err().to_string().contains("PROHIBITED_CONTENT"));
    }

    #[test]
    fn test_gemini_response_text_joins_parts() {
        let json = r#"{
            "candidates": [
                {
                    "content": {
                        "parts": [ { "text": "{\"title\":" }, { "text": " \"x\"}" } ],
                        "role": "model"
                    },
                    "finishReason": "STOP"
                }
            ]
        }"#;
        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        assert_eq!(result.text().unwrap(), "{\"title\": \"x\"}");
    }

    #[test]
    fn test_gemini_response_inline_audio() {
        let json = r#"{
            "candidates": [
                {
                    "content": {
                        "parts": [ { "inlineData": { "mimeType": "audio/L16;codec=pcm;rate=24000", "data": "AQACAA==" } } ]
                    }
                }
            ]
        }"#;
        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        let inline = result.inline_data().unwrap();
        assert_eq!(parse_sample_rate(&inline.mime_type), Some(24_000));
        assert_eq!(decode_base64(&inline.data).unwrap(), vec![1, 0, 2, 0]);
    }

    #[test]
    fn test_parse_sample_rate() {
        assert_eq!(parse_sample_rate("audio/L16;rate=16000"), Some(16_000));
        assert_eq!(parse_sample_rate("audio/L16; codec=pcm; rate=24000"), Some(24_000));
        assert_eq!(parse_sample_rate("audio/wav"), None);
        assert_eq!(parse_sample_rate("audio/L16;rate=abc"), None);
    }

    #[test]
    fn test_error_message_from_envelope() {
        let body = r#"{"error": {"code": 429, "message": "Resource has been exhausted", "status": "RESOURCE_EXHAUSTED"}}"#;
        assert_eq!(error_message(body), "Resource has been exhausted (RESOURCE_EXHAUSTED)");
        assert_eq!(error_message("<html>Bad Gateway</html>"), "<html>Bad Gateway</html>");
    }

    #[test]
    fn test_speech_request_shape() {
        let mut body = GeminiRequest::user(vec![GeminiPart::text("Hello")]);
        body.generation_config = Some(GenerationConfig {
            response_modalities: Some(vec!["AUDIO".to_string()]),
            speech_config: Some(SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: "Kore".to_string(),
                    },
                },
            }),
            ..Default::default()
        });

        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["contents"][0]["parts"][0]["text"], "Hello");
        assert_eq!(
            value["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Kore"
        );
        assert!(value.get("systemInstruction").is_none());
        assert!(value["generationConfig"].get("imageConfig").is_none());
    }

    #[test]
    fn test_video_request_shape() {
        let request = VideoRequest {
            prompt: "Slow dolly in".to_string(),
            seed_image: Some(MediaPayload::new("image/png", vec![1, 2, 3])),
            aspect_ratio: "1:1".to_string(),
            resolution: "720p".to_string(),
        };
        let value = serde_json::to_value(VideoPredictRequest::from_request(&request)).unwrap();
        assert_eq!(value["instances"][0]["image"]["bytesBase64Encoded"], "AQID");
        assert_eq!(value["parameters"]["aspectRatio"], "16:9");
        assert_eq!(value["parameters"]["resolution"], "720p");
    }

    #[test]
    fn test_operation_status() {
        let pending: OperationResponse = serde_json::from_str(r#"{"name": "models/veo/operations/1"}"#).unwrap();
        assert_eq!(pending.status(), VideoStatus::Pending);

        let ready: OperationResponse = serde_json::from_str(
            r#"{"name": "op", "done": true, "response": {"generateVideoResponse": {"generatedSamples": [{"video": {"uri": "https://files/abc"}}]}}}"#,
        )
        .unwrap();
        assert_eq!(ready.status(), VideoStatus::Ready { uri: "https://files/abc".to_string() });

        let failed: OperationResponse =
            serde_json::from_str(r#"{"name": "op", "done": true, "error": {"code": 400, "message": "bad prompt"}}"#).unwrap();
        assert_eq!(failed.status(), VideoStatus::Failed("bad prompt".to_string()));

        let filtered: OperationResponse = serde_json::from_str(r#"{"name": "op", "done": true, "response": {}}"#).unwrap();
        assert!(matches!(filtered.status(), VideoStatus::Failed(_)));
    }
}
