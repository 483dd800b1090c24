use crate::core::error::GenerationError;
use crate::core::project::{ImageStyleConfig, Scene, StoryConfig, StoryOutput, VoiceConfig};
use crate::services::llm::{GenerativeClient, TextRequest};
use crate::services::prompt;
use crate::services::retry::RetryPolicy;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::sync::Arc;

/// Script as the model returns it. Every field is required.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ScriptResponse {
    title: String,
    summary: String,
    scenes: Vec<ScriptScene>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ScriptScene {
    #[allow(dead_code)]
    scene_number: i64,
    narrative: String,
    image_prompt: String,
    motion_prompt: String,
    character_names: Vec<String>,
}

pub struct ScriptGenerator {
    client: Arc<dyn GenerativeClient>,
    retry: RetryPolicy,
}

impl ScriptGenerator {
    pub fn new(client: Arc<dyn GenerativeClient>, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    /// Writes a fresh story. Nothing is merged into an existing project here.
    pub async fn generate(
        &self,
        api_key: &str,
        story: &StoryConfig,
        voice: &VoiceConfig,
        style: &ImageStyleConfig,
    ) -> Result<StoryOutput> {
        self.generate_inner(api_key, story, voice, style)
            .await
            .context("Script generation failed")
    }

    async fn generate_inner(
        &self,
        api_key: &str,
        story: &StoryConfig,
        voice: &VoiceConfig,
        style: &ImageStyleConfig,
    ) -> Result<StoryOutput> {
        story.validate()?;
        let request = TextRequest {
            system: prompt::script_system_prompt(),
            prompt: prompt::script_user_prompt(story, voice, style),
            response_schema: Some(prompt::script_response_schema()),
        };

        log::info!("Generating a {}-scene script...", story.scene_count);
        let response = self
            .retry
            .run("Script generation", || self.client.generate_text(api_key, &request))
            .await?;

        let output = parse_script(&response, story.scene_count as usize)?;
        log::info!("Script \"{}\" ready with {} scenes", output.title, output.scenes.len());
        Ok(output)
    }
}

/// Parses the model's script and renumbers scenes 1..=n in response order.
pub fn parse_script(response: &str, expected_scenes: usize) -> Result<StoryOutput> {
    let clean_json = strip_code_blocks(response);
    let parsed: ScriptResponse = serde_json::from_str(&clean_json)
        .map_err(|e| GenerationError::Parse(format!("Script JSON is malformed: {}", e)))?;

    if parsed.scenes.len() != expected_scenes {
        return Err(GenerationError::Parse(format!(
            "Expected {} scenes, got {}",
            expected_scenes,
            parsed.scenes.len()
        ))
        .into());
    }

    let scenes = parsed
        .scenes
        .into_iter()
        .zip(1u32..)
        .map(|(s, number)| Scene {
            scene_number: number,
            narrative: s.narrative,
            image_prompt: s.image_prompt,
            motion_prompt: s.motion_prompt,
            character_names: s.character_names,
            ..Default::default()
        })
        .collect();

    Ok(StoryOutput {
        title: parsed.title,
        summary: parsed.summary,
        scenes,
    })
}

pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if s.starts_with("```json") {
        s.trim_start_matches("```json").trim_end_matches("```").trim().to_string()
    } else if s.starts_with("```") {
        s.trim_start_matches("```").trim_end_matches("```").trim().to_string()
    } else {
        s.to_string()
    }
}
