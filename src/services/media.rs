//! Per-scene media jobs and character bootstrap calls.

use crate::core::config::{AudioConfig, VideoConfig};
use crate::core::error::GenerationError;
use crate::core::project::{
    Character, ImageStyleConfig, MediaPayload, Project, Scene, StoryConfig, VoiceConfig, VoiceTimbre,
};
use crate::services::llm::{GenerativeClient, ImageTier, TextRequest, VideoRequest, VideoStatus};
use crate::services::prompt;
use crate::services::retry::RetryPolicy;
use crate::utils::audio::{encode_wav, merge_wav, pcm_from_bytes};
use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Prebuilt service voice used for each timbre.
pub fn voice_name(timbre: VoiceTimbre) -> &'static str {
    match timbre {
        VoiceTimbre::WarmFemale => "Kore",
        VoiceTimbre::BrightFemale => "Aoede",
        VoiceTimbre::CalmFemale => "Leda",
        VoiceTimbre::DeepMale => "Charon",
        VoiceTimbre::WarmMale => "Orus",
        VoiceTimbre::YouthfulMale => "Puck",
        VoiceTimbre::Neutral => "Zephyr",
    }
}

pub struct MediaGenerator {
    client: Arc<dyn GenerativeClient>,
    retry: RetryPolicy,
    sample_rate: u32,
    video_resolution: String,
    poll_interval: Duration,
    video_timeout: Duration,
}

impl MediaGenerator {
    pub fn new(client: Arc<dyn GenerativeClient>, retry: RetryPolicy, audio: &AudioConfig, video: &VideoConfig) -> Self {
        Self {
            client,
            retry,
            sample_rate: audio.sample_rate,
            video_resolution: video.resolution.clone(),
            poll_interval: Duration::from_secs(video.poll_interval_seconds),
            video_timeout: Duration::from_secs(video.timeout_seconds),
        }
    }

    pub fn with_poll_timing(mut self, interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = interval;
        self.video_timeout = timeout;
        self
    }

    /// Narration of one scene as a mono 16-bit WAV.
    pub async fn generate_audio(&self, api_key: &str, scene: &Scene, voice: &VoiceConfig) -> Result<MediaPayload> {
        if scene.narrative.trim().is_empty() {
            return Err(anyhow!("Scene {} has no narrative to read", scene.scene_number));
        }
        let text = prompt::speech_text(voice, &scene.narrative);
        let voice_id = voice_name(voice.timbre);

        let speech = self
            .retry
            .run(&format!("Scene {} audio", scene.scene_number), || {
                self.client.synthesize_speech(api_key, &text, voice_id)
            })
            .await?;
        if speech.pcm.is_empty() {
            return Err(GenerationError::EmptyResponse("Speech response carried no audio".to_string()).into());
        }

        let samples = pcm_from_bytes(&speech.pcm);
        let rate = speech.sample_rate.unwrap_or(self.sample_rate);
        Ok(MediaPayload::new("audio/wav", encode_wav(&samples, rate)))
    }

    /// Illustration of one scene anchored on the style and the scene's characters.
    ///
    /// The primary tier is tried under the retry policy first. If it still
    /// fails, the same prompt goes to the fallback tier under its own retry
    /// policy.
    pub async fn generate_image(
        &self,
        api_key: &str,
        scene: &Scene,
        characters: &[Character],
        style: &ImageStyleConfig,
    ) -> Result<MediaPayload> {
        let image_prompt = prompt::build_image_prompt(style, characters, scene);
        let label = format!("Scene {} image", scene.scene_number);

        let primary = self
            .retry
            .run(&label, || {
                self.client
                    .generate_image(api_key, &image_prompt, &style.aspect_ratio, ImageTier::Primary)
            })
            .await;

        match primary {
            Ok(image) => Ok(image),
            Err(e) => {
                warn!("{}: primary model failed, trying fallback model: {:#}", label, e);
                self.retry
                    .run(&label, || {
                        self.client
                            .generate_image(api_key, &image_prompt, &style.aspect_ratio, ImageTier::Fallback)
                    })
                    .await
            }
        }
    }

    /// Short clip animating the scene, seeded with its image when one exists.
    pub async fn generate_video(&self, api_key: &str, scene: &Scene, style: &ImageStyleConfig) -> Result<MediaPayload> {
        let label = format!("Scene {} video", scene.scene_number);
        let request = VideoRequest {
            prompt: prompt::build_video_prompt(style, scene),
            seed_image: scene.image.clone(),
            aspect_ratio: style.aspect_ratio.clone(),
            resolution: self.video_resolution.clone(),
        };

        let operation = self
            .retry
            .run(&label, || self.client.start_video(api_key, &request))
            .await?;

        let started = tokio::time::Instant::now();
        let uri = loop {
            let status = self
                .retry
                .run(&label, || self.client.poll_video(api_key, &operation))
                .await?;
            match status {
                VideoStatus::Ready { uri } => break uri,
                VideoStatus::Failed(message) => return Err(GenerationError::OperationFailed(message).into()),
                VideoStatus::Pending => {}
            }

            let waited = started.elapsed();
            if waited + self.poll_interval > self.video_timeout {
                return Err(GenerationError::Timeout { waited }.into());
            }
            log::debug!("{}: still rendering after {}s", label, waited.as_secs());
            tokio::time::sleep(self.poll_interval).await;
        };

        info!("{}: rendered, downloading", label);
        self.retry
            .run(&label, || self.client.download_video(api_key, &uri))
            .await
    }

    /// Visual signature described from the character's reference image.
    pub async fn analyze_character(&self, api_key: &str, character: &Character, language: &str) -> Result<String> {
        let image = character
            .reference_image
            .as_ref()
            .ok_or_else(|| anyhow!("{} has no reference image", character.name))?;

        let signature = self
            .retry
            .run(&format!("Analyze {}", character.name), || {
                self.client.analyze_image(api_key, image, language)
            })
            .await
            .with_context(|| format!("Character analysis failed for {}", character.name))?;
        non_empty_signature(signature)
    }

    /// Visual signature invented from the character's name, role and the story.
    pub async fn generate_signature(
        &self,
        api_key: &str,
        character: &Character,
        story: &StoryConfig,
        style: &ImageStyleConfig,
        language: &str,
    ) -> Result<String> {
        let request = TextRequest {
            system: String::new(),
            prompt: prompt::signature_prompt(character, story, style, language),
            response_schema: None,
        };

        let signature = self
            .retry
            .run(&format!("Signature for {}", character.name), || {
                self.client.generate_text(api_key, &request)
            })
            .await
            .with_context(|| format!("Signature generation failed for {}", character.name))?;
        non_empty_signature(signature)
    }
}

fn non_empty_signature(text: String) -> Result<String> {
    let text = text.trim();
    if text.is_empty() {
        return Err(GenerationError::EmptyResponse("Model returned an empty signature".to_string()).into());
    }
    Ok(text.to_string())
}

/// All scene narration joined into one WAV, in scene order. Scenes without audio are skipped.
pub fn export_narration(project: &Project) -> Result<MediaPayload> {
    let story = project
        .story
        .as_ref()
        .ok_or_else(|| anyhow!("Project has no story yet"))?;
    let clips: Vec<&[u8]> = story
        .scenes
        .iter()
        .filter_map(|s| s.audio.as_ref())
        .map(|a| a.data.as_slice())
        .collect();
    if clips.is_empty() {
        return Err(anyhow!("No scene has narration audio yet"));
    }
    let merged = merge_wav(&clips).context("Failed to merge narration")?;
    Ok(MediaPayload::new("audio/wav", merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::{classify, ErrorClass};
    use crate::core::project::{CharacterRole, StoryOutput};
    use crate::services::llm::{SpeechAudio, VideoOperation};
    use crate::utils::audio::parse_wav;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct Calls {
        speech: Vec<(String, String)>,
        images: Vec<(String, ImageTier)>,
        video_requests: Vec<VideoRequest>,
        polls: usize,
        downloads: Vec<String>,
    }

    #[derive(Debug, Default)]
    struct MockMediaClient {
        calls: Arc<Mutex<Calls>>,
        primary_status: Option<u16>,
        poll_script: Mutex<VecDeque<VideoStatus>>,
    }

    #[async_trait]
    impl GenerativeClient for MockMediaClient {
        async fn generate_text(&self, _api_key: &str, request: &TextRequest) -> Result<String> {
            Ok(format!("  Signature from: {}  ", request.prompt.lines().next().unwrap_or("")))
        }

        async fn synthesize_speech(&self, _api_key: &str, text: &str, voice: &str) -> Result<SpeechAudio> {
            self.calls.lock().unwrap().speech.push((text.to_string(), voice.to_string()));
            Ok(SpeechAudio {
                pcm: vec![1, 0, 2, 0, 3],
                sample_rate: Some(16_000),
            })
        }

        async fn generate_image(&self, _: &str, prompt: &str, _: &str, tier: ImageTier) -> Result<MediaPayload> {
            self.calls.lock().unwrap().images.push((prompt.to_string(), tier));
            match (tier, self.primary_status) {
                (ImageTier::Primary, Some(status)) => Err(GenerationError::Http {
                    status,
                    message: "Quota exceeded for metric, limit: 0".to_string(),
                }
                .into()),
                (ImageTier::Primary, None) => Ok(MediaPayload::new("image/png", vec![1])),
                (ImageTier::Fallback, _) => Ok(MediaPayload::new("image/png", vec![2])),
            }
        }

        async fn analyze_image(&self, _: &str, image: &MediaPayload, language: &str) -> Result<String> {
            Ok(format!("{} bytes described in {}\n", image.data.len(), language))
        }

        async fn start_video(&self, _: &str, request: &VideoRequest) -> Result<VideoOperation> {
            self.calls.lock().unwrap().video_requests.push(request.clone());
            Ok(VideoOperation { name: "operations/1".to_string() })
        }

        async fn poll_video(&self, _: &str, _: &VideoOperation) -> Result<VideoStatus> {
            self.calls.lock().unwrap().polls += 1;
            Ok(self.poll_script.lock().unwrap().pop_front().unwrap_or(VideoStatus::Pending))
        }

        async fn download_video(&self, _: &str, uri: &str) -> Result<MediaPayload> {
            self.calls.lock().unwrap().downloads.push(uri.to_string());
            Ok(MediaPayload::new("video/mp4", vec![0, 0, 0, 24]))
        }
    }

    fn generator(client: Arc<MockMediaClient>) -> MediaGenerator {
        MediaGenerator::new(
            client,
            RetryPolicy::new(1, Duration::from_millis(1)),
            &AudioConfig::default(),
            &VideoConfig::default(),
        )
        .with_poll_timing(Duration::from_millis(5), Duration::from_millis(50))
    }

    fn scene() -> Scene {
        Scene {
            scene_number: 2,
            narrative: "Lina dives into the canal.".to_string(),
            image_prompt: "Lina mid-dive".to_string(),
            motion_prompt: "Tracking shot following the dive".to_string(),
            character_names: vec!["Lina".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_every_timbre_has_a_voice() {
        let mut names: Vec<&str> = VoiceTimbre::ALL.iter().map(|t| voice_name(*t)).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), VoiceTimbre::ALL.len());
    }

    #[tokio::test]
    async fn test_audio_wraps_pcm_in_wav() -> Result<()> {
        let client = Arc::new(MockMediaClient::default());
        let voice = VoiceConfig {
            timbre: VoiceTimbre::DeepMale,
            ..Default::default()
        };
        let audio = generator(client.clone()).generate_audio("key", &scene(), &voice).await?;

        assert_eq!(audio.mime_type, "audio/wav");
        let info = parse_wav(&audio.data)?;
        assert_eq!(info.sample_rate, 16_000);
        assert_eq!(info.data, vec![1, 0, 2, 0]);

        let calls = client.calls.lock().unwrap();
        assert_eq!(calls.speech[0].1, "Charon");
        assert!(calls.speech[0].0.ends_with("Lina dives into the canal."));
        Ok(())
    }

    #[tokio::test]
    async fn test_audio_requires_narrative() {
        let client = Arc::new(MockMediaClient::default());
        let empty = Scene::default();
        assert!(generator(client.clone())
            .generate_audio("key", &empty, &VoiceConfig::default())
            .await
            .is_err());
        assert!(client.calls.lock().unwrap().speech.is_empty());
    }

    #[tokio::test]
    async fn test_image_falls_back_to_second_tier() -> Result<()> {
        let client = Arc::new(MockMediaClient {
            primary_status: Some(429),
            ..Default::default()
        });
        let cast = vec![Character::new("Lina", CharacterRole::Protagonist, "Silver hair")];
        let image = generator(client.clone())
            .generate_image("key", &scene(), &cast, &ImageStyleConfig::default())
            .await?;

        assert_eq!(image.data, vec![2]);
        let calls = client.calls.lock().unwrap();
        let tiers: Vec<ImageTier> = calls.images.iter().map(|(_, t)| *t).collect();
        // Capacity errors are not retried within the tier.
        assert_eq!(tiers, vec![ImageTier::Primary, ImageTier::Fallback]);
        assert_eq!(calls.images[0].0, calls.images[1].0);
        assert!(calls.images[0].0.contains("Silver hair"));
        Ok(())
    }

    #[tokio::test]
    async fn test_image_primary_success_skips_fallback() -> Result<()> {
        let client = Arc::new(MockMediaClient::default());
        let image = generator(client.clone())
            .generate_image("key", &scene(), &[], &ImageStyleConfig::default())
            .await?;
        assert_eq!(image.data, vec![1]);
        assert_eq!(client.calls.lock().unwrap().images.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_video_polls_until_ready() -> Result<()> {
        let client = Arc::new(MockMediaClient {
            poll_script: Mutex::new(VecDeque::from(vec![
                VideoStatus::Pending,
                VideoStatus::Pending,
                VideoStatus::Ready { uri: "https://files/v1".to_string() },
            ])),
            ..Default::default()
        });
        let mut scene = scene();
        scene.image = Some(MediaPayload::new("image/png", vec![7]));

        let video = generator(client.clone())
            .generate_video("key", &scene, &ImageStyleConfig::default())
            .await?;
        assert_eq!(video.mime_type, "video/mp4");

        let calls = client.calls.lock().unwrap();
        assert_eq!(calls.polls, 3);
        assert_eq!(calls.downloads, vec!["https://files/v1".to_string()]);
        assert_eq!(calls.video_requests[0].seed_image, scene.image);
        assert!(calls.video_requests[0].prompt.starts_with("Tracking shot"));
        Ok(())
    }

    #[tokio::test]
    async fn test_video_times_out() {
        let client = Arc::new(MockMediaClient::default());
        let err = generator(client.clone())
            .generate_video("key", &scene(), &ImageStyleConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GenerationError>(),
            Some(GenerationError::Timeout { .. })
        ));
        assert!(client.calls.lock().unwrap().downloads.is_empty());
    }

    #[tokio::test]
    async fn test_video_operation_failure() {
        let client = Arc::new(MockMediaClient {
            poll_script: Mutex::new(VecDeque::from(vec![VideoStatus::Failed("filtered".to_string())])),
            ..Default::default()
        });
        let err = generator(client)
            .generate_video("key", &scene(), &ImageStyleConfig::default())
            .await
            .unwrap_err();
        assert_eq!(classify(&err), ErrorClass::Permanent);
        assert!(err.to_string().contains("filtered"));
    }

    #[tokio::test]
    async fn test_character_bootstrap() -> Result<()> {
        let client = Arc::new(MockMediaClient::default());
        let generator = generator(client);
        let mut lina = Character::new("Lina", CharacterRole::Protagonist, "");

        assert!(generator.analyze_character("key", &lina, "English").await.is_err());
        lina.reference_image = Some(MediaPayload::new("image/png", vec![1, 2, 3]));
        assert_eq!(
            generator.analyze_character("key", &lina, "English").await?,
            "3 bytes described in English"
        );

        let signature = generator
            .generate_signature("key", &lina, &StoryConfig::default(), &ImageStyleConfig::default(), "English")
            .await?;
        assert!(signature.starts_with("Signature from: Invent a precise visual signature for Lina"));
        Ok(())
    }

    #[test]
    fn test_export_narration() -> Result<()> {
        let clip = |samples: &[i16]| Some(MediaPayload::new("audio/wav", encode_wav(samples, 24_000)));
        let mut project = Project::default();
        assert!(export_narration(&project).is_err());

        project.story = Some(StoryOutput {
            scenes: vec![
                Scene { scene_number: 1, audio: clip(&[1, 2]), ..Default::default() },
                Scene { scene_number: 2, ..Default::default() },
                Scene { scene_number: 3, audio: clip(&[3]), ..Default::default() },
            ],
            ..Default::default()
        });
        let merged = export_narration(&project)?;
        assert_eq!(parse_wav(&merged.data)?.data, vec![1, 0, 2, 0, 3, 0]);

        project.story.as_mut().unwrap().scenes.iter_mut().for_each(|s| s.audio = None);
        assert!(export_narration(&project).is_err());
        Ok(())
    }
}
