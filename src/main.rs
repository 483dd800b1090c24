use anyhow::{anyhow, Context, Result};
use inquire::{Select, Text};
use std::path::Path;
use std::sync::Arc;
use storyforge::core::config::Config;
use storyforge::core::io::NativeStorage;
use storyforge::core::project::{Character, CharacterRole, Project, StoryConfig, VoiceTimbre};
use storyforge::services::llm::GeminiClient;
use storyforge::services::setup;
use storyforge::services::workflow::WorkflowManager;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    // 1. Load Config, writing defaults on first run
    if !Path::new("config.yml").exists() {
        Config::default().save()?;
        println!("Created config.yml with default settings (set gemini.api_key or GEMINI_API_KEY).");
    }
    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please ensure 'config.yml' exists (an API key may also come from GEMINI_API_KEY).");
            return Err(e);
        }
    };
    config.ensure_directories()?;

    // 2. Initialize client and workflow
    let client = Arc::new(GeminiClient::new(&config.gemini));
    let storage = Arc::new(NativeStorage::new());
    let manager = WorkflowManager::new(config.clone(), client, storage);

    // 3. Pick the project
    let project = match std::env::args().nth(1) {
        Some(arg) => open_argument(&manager, &arg).await?,
        None if config.unattended => {
            return Err(anyhow!("Unattended runs need a project: storyforge <project.json | archived id>"));
        }
        None => choose_project(&manager).await?,
    };
    manager.open(project);

    // 4. Character signatures, then the generation stages
    setup::run_setup(&manager, config.unattended).await?;
    manager.run().await?;

    if let Some(message) = manager.session().dismiss_error() {
        println!("Last error: {}", message);
    }
    Ok(())
}

async fn open_argument(manager: &WorkflowManager, arg: &str) -> Result<Project> {
    if Path::new(arg).is_file() {
        let json = tokio::fs::read_to_string(arg)
            .await
            .with_context(|| format!("Failed to read {}", arg))?;
        let project = manager.archive().import_json(&json).await?;
        println!("Imported project {} ({})", project.name, project.id);
        Ok(project)
    } else {
        manager.archive().load(arg).await
    }
}

async fn choose_project(manager: &WorkflowManager) -> Result<Project> {
    const NEW_PROJECT: &str = "Start a new story";

    let saved = manager.archive().list().await?;
    if saved.is_empty() {
        return new_project();
    }

    let mut options = vec![NEW_PROJECT.to_string()];
    options.extend(saved.iter().map(|s| {
        format!(
            "{} - {} (updated {})",
            s.name,
            s.title.as_deref().unwrap_or("no script yet"),
            s.updated_at.format("%Y-%m-%d %H:%M")
        )
    }));

    let selection = Select::new("Open a project:", options.clone()).prompt()?;
    match options.iter().position(|o| *o == selection) {
        Some(0) | None => new_project(),
        Some(i) => manager.archive().load(&saved[i - 1].id).await,
    }
}

fn new_project() -> Result<Project> {
    let name = Text::new("Project name:").with_default("Untitled story").prompt()?;
    let premise = Text::new("Premise:").prompt()?;
    let setting = Text::new("Setting:").with_default("").prompt()?;
    let category = Text::new("Genre:").with_default("drama").prompt()?;
    let scene_count: u8 = Text::new("Number of scenes (1-10):")
        .with_default("5")
        .prompt()?
        .trim()
        .parse()
        .context("Scene count must be a number")?;

    let mut characters = Vec::new();
    loop {
        let name = Text::new("Character name (empty to finish):").with_default("").prompt()?;
        if name.trim().is_empty() {
            break;
        }
        let role = Select::new(
            "Role:",
            vec![CharacterRole::Protagonist, CharacterRole::Antagonist, CharacterRole::Supporting]
                .into_iter()
                .map(|r| r.label())
                .collect(),
        )
        .prompt()?;
        let role = match role {
            "Antagonist" => CharacterRole::Antagonist,
            "Supporting" => CharacterRole::Supporting,
            _ => CharacterRole::Protagonist,
        };
        let signature = Text::new("Visual signature (empty to create one later):")
            .with_default("")
            .prompt()?;
        characters.push(Character::new(name.trim(), role, signature.trim()));
    }

    let story_config = StoryConfig {
        premise,
        setting,
        category,
        scene_count,
        character_count: characters.len().max(1) as u8,
        characters,
        ..Default::default()
    };
    story_config.validate()?;

    let mut project = Project::new(name, story_config);
    project.voice_config.timbre = Select::new("Narrator voice:", VoiceTimbre::ALL.to_vec()).prompt()?;
    Ok(project)
}
