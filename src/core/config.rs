use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::error::GenerationError;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default = "default_archive")]
    pub archive_folder: String,

    #[serde(default)]
    pub unattended: bool,

    #[serde(default)]
    pub gemini: GeminiConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub video: VideoConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_folder: default_output(),
            archive_folder: default_archive(),
            unattended: false,
            gemini: GeminiConfig::default(),
            retry: RetryConfig::default(),
            audio: AudioConfig::default(),
            video: VideoConfig::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiConfig {
    /// Process-wide default key. Projects may override it.
    pub api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_text_model")]
    pub text_model: String,
    #[serde(default = "default_speech_model")]
    pub speech_model: String,
    #[serde(default = "default_analysis_model")]
    pub analysis_model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default = "default_fallback_image_model")]
    pub fallback_image_model: String,
    #[serde(default = "default_video_model")]
    pub video_model: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            text_model: default_text_model(),
            speech_model: default_speech_model(),
            analysis_model: default_analysis_model(),
            image_model: default_image_model(),
            fallback_image_model: default_fallback_image_model(),
            video_model: default_video_model(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_retry_count")]
    pub retry_count: usize,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_count: default_retry_count(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AudioConfig {
    /// Used when the service does not declare a rate for its PCM.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct VideoConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_resolution")]
    pub resolution: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_video_timeout")]
    pub timeout_seconds: u64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            resolution: default_resolution(),
            poll_interval_seconds: default_poll_interval(),
            timeout_seconds: default_video_timeout(),
        }
    }
}

fn default_output() -> String {
    "output".to_string()
}
fn default_archive() -> String {
    "archive".to_string()
}
fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_text_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_speech_model() -> String {
    "gemini-2.5-flash-preview-tts".to_string()
}
fn default_analysis_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_image_model() -> String {
    "gemini-3-pro-image-preview".to_string()
}
fn default_fallback_image_model() -> String {
    "gemini-2.5-flash-image".to_string()
}
fn default_video_model() -> String {
    "veo-3.1-fast-generate-preview".to_string()
}
fn default_retry_count() -> usize {
    3
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_sample_rate() -> u32 {
    crate::utils::audio::DEFAULT_SAMPLE_RATE
}
fn default_resolution() -> String {
    "720p".to_string()
}
fn default_poll_interval() -> u64 {
    10
}
fn default_video_timeout() -> u64 {
    600
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config.yml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(Path::new("config.yml"))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.output_folder)?;
        fs::create_dir_all(&self.archive_folder)?;
        Ok(())
    }

    /// Picks the project override, then the configured key, then `GEMINI_API_KEY`.
    pub fn resolve_api_key(&self, project_key: Option<&str>) -> Result<String> {
        let env_key = std::env::var("GEMINI_API_KEY").ok();
        pick_api_key(project_key, self.gemini.api_key.as_deref(), env_key.as_deref())
    }
}

fn pick_api_key(project: Option<&str>, configured: Option<&str>, env: Option<&str>) -> Result<String> {
    [project, configured, env]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|k| !k.is_empty())
        .map(str::to_string)
        .ok_or_else(|| GenerationError::MissingCredential.into())
}
