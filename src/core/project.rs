use crate::utils::audio::{decode_base64, encode_base64};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const MIN_SCENES: u8 = 1;
pub const MAX_SCENES: u8 = 10;
pub const MIN_CHARACTERS: u8 = 1;
pub const MAX_CHARACTERS: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pacing {
    Slow,
    #[default]
    Balanced,
    Fast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlotTwist {
    #[default]
    None,
    Mild,
    Shocking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CharacterRole {
    #[default]
    Protagonist,
    Antagonist,
    Supporting,
}

impl CharacterRole {
    pub fn label(&self) -> &'static str {
        match self {
            CharacterRole::Protagonist => "Protagonist",
            CharacterRole::Antagonist => "Antagonist",
            CharacterRole::Supporting => "Supporting",
        }
    }
}

/// Binary media with its declared mime type. Serialized as base64 text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaPayload {
    pub mime_type: String,
    #[serde(serialize_with = "serialize_base64", deserialize_with = "deserialize_base64")]
    pub data: Vec<u8>,
}

impl MediaPayload {
    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }

    /// File extension matching the mime type, used when exporting media.
    pub fn extension(&self) -> &'static str {
        match self.mime_type.split(';').next().unwrap_or("").trim() {
            "image/png" => "png",
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            "audio/wav" | "audio/x-wav" => "wav",
            "video/mp4" => "mp4",
            _ => "bin",
        }
    }
}

fn serialize_base64<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&encode_base64(data))
}

fn deserialize_base64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let text = String::deserialize(deserializer)?;
    decode_base64(&text).map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Character {
    pub id: String,
    pub name: String,
    pub role: CharacterRole,
    pub visual_signature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_image: Option<MediaPayload>,
}

impl Default for Character {
    fn default() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: String::new(),
            role: CharacterRole::default(),
            visual_signature: String::new(),
            reference_image: None,
        }
    }
}

impl Character {
    pub fn new(name: impl Into<String>, role: CharacterRole, visual_signature: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role,
            visual_signature: visual_signature.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoryConfig {
    pub premise: String,
    pub setting: String,
    pub category: String,
    pub pacing: Pacing,
    pub plot_twist: PlotTwist,
    pub scene_count: u8,
    pub character_count: u8,
    pub characters: Vec<Character>,
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            premise: String::new(),
            setting: String::new(),
            category: String::new(),
            pacing: Pacing::default(),
            plot_twist: PlotTwist::default(),
            scene_count: 5,
            character_count: 2,
            characters: Vec::new(),
        }
    }
}

impl StoryConfig {
    pub fn validate(&self) -> Result<()> {
        if !(MIN_SCENES..=MAX_SCENES).contains(&self.scene_count) {
            return Err(anyhow!(
                "Scene count must be between {} and {}, got {}",
                MIN_SCENES,
                MAX_SCENES,
                self.scene_count
            ));
        }
        if !(MIN_CHARACTERS..=MAX_CHARACTERS).contains(&self.character_count) {
            return Err(anyhow!(
                "Character count must be between {} and {}, got {}",
                MIN_CHARACTERS,
                MAX_CHARACTERS,
                self.character_count
            ));
        }
        if self.characters.len() > MAX_CHARACTERS as usize {
            return Err(anyhow!(
                "At most {} characters are supported, got {}",
                MAX_CHARACTERS,
                self.characters.len()
            ));
        }
        if self.premise.trim().is_empty() {
            return Err(anyhow!("Story premise is empty"));
        }
        Ok(())
    }
}

/// Voice classes offered for narration. Each maps to one fixed service voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceTimbre {
    #[default]
    WarmFemale,
    BrightFemale,
    CalmFemale,
    DeepMale,
    WarmMale,
    YouthfulMale,
    Neutral,
}

impl VoiceTimbre {
    pub const ALL: [VoiceTimbre; 7] = [
        VoiceTimbre::WarmFemale,
        VoiceTimbre::BrightFemale,
        VoiceTimbre::CalmFemale,
        VoiceTimbre::DeepMale,
        VoiceTimbre::WarmMale,
        VoiceTimbre::YouthfulMale,
        VoiceTimbre::Neutral,
    ];
}

impl std::fmt::Display for VoiceTimbre {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            VoiceTimbre::WarmFemale => "Warm female",
            VoiceTimbre::BrightFemale => "Bright female",
            VoiceTimbre::CalmFemale => "Calm female",
            VoiceTimbre::DeepMale => "Deep male",
            VoiceTimbre::WarmMale => "Warm male",
            VoiceTimbre::YouthfulMale => "Youthful male",
            VoiceTimbre::Neutral => "Neutral",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VoiceConfig {
    pub timbre: VoiceTimbre,
    pub tone: String,
    pub dialect: String,
    pub language: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            timbre: VoiceTimbre::default(),
            tone: "calm".to_string(),
            dialect: "standard".to_string(),
            language: "English".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageStyleConfig {
    pub art_style: String,
    pub camera_angle: String,
    pub lighting: String,
    pub color_grade: String,
    pub character_look: String,
    pub clothing_style: String,
    pub aspect_ratio: String,
}

impl Default for ImageStyleConfig {
    fn default() -> Self {
        Self {
            art_style: "cinematic digital painting".to_string(),
            camera_angle: "eye level".to_string(),
            lighting: "soft natural light".to_string(),
            color_grade: "natural".to_string(),
            character_look: "realistic proportions".to_string(),
            clothing_style: "consistent with the setting".to_string(),
            aspect_ratio: "16:9".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Scene {
    pub scene_number: u32,
    pub narrative: String,
    pub image_prompt: String,
    pub motion_prompt: String,
    pub character_names: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<MediaPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<MediaPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<MediaPayload>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoryOutput {
    pub title: String,
    pub summary: String,
    pub scenes: Vec<Scene>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub story_config: StoryConfig,
    pub voice_config: VoiceConfig,
    pub image_style: ImageStyleConfig,
    pub story: Option<StoryOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for Project {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: "Untitled story".to_string(),
            created_at: now,
            updated_at: now,
            story_config: StoryConfig::default(),
            voice_config: VoiceConfig::default(),
            image_style: ImageStyleConfig::default(),
            story: None,
            api_key: None,
        }
    }
}

impl Project {
    pub fn new(name: impl Into<String>, story_config: StoryConfig) -> Self {
        Self {
            name: name.into(),
            story_config,
            ..Default::default()
        }
    }

    pub fn scene(&self, index: usize) -> Option<&Scene> {
        self.story.as_ref().and_then(|s| s.scenes.get(index))
    }

    pub fn scene_count(&self) -> usize {
        self.story.as_ref().map_or(0, |s| s.scenes.len())
    }

    pub fn character(&self, id: &str) -> Option<&Character> {
        self.story_config.characters.iter().find(|c| c.id == id)
    }

    /// Same project with a new story. The previous story is dropped.
    pub fn with_story(&self, story: StoryOutput) -> Self {
        Self {
            story: Some(story),
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Same project with one character replaced, located by id.
    pub fn with_character(&self, character: Character) -> Result<Self> {
        let mut next = self.clone();
        let slot = next
            .story_config
            .characters
            .iter_mut()
            .find(|c| c.id == character.id)
            .ok_or_else(|| anyhow!("Unknown character id: {}", character.id))?;
        *slot = character;
        next.updated_at = Utc::now();
        Ok(next)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize project")
    }

    /// Parses an exported project. Missing optional fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse project JSON")
    }
}
