use crate::core::archive::ProjectArchive;
use crate::core::config::Config;
use crate::core::io::Storage;
use crate::core::merge::{merge_scene, SceneSlot, SceneUpdate};
use crate::core::project::{MediaPayload, Project, Scene};
use crate::core::session::{Epoch, Session};
use crate::services::batch::{BatchReport, BatchRunner};
use crate::services::llm::GenerativeClient;
use crate::services::media::{export_narration, MediaGenerator};
use crate::services::retry::RetryPolicy;
use crate::services::script::ScriptGenerator;
use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::sync::Arc;

pub struct WorkflowManager {
    config: Config,
    session: Session,
    script_generator: ScriptGenerator,
    media: MediaGenerator,
    runner: BatchRunner,
    archive: ProjectArchive,
    storage: Arc<dyn Storage>,
}

impl WorkflowManager {
    pub fn new(config: Config, client: Arc<dyn GenerativeClient>, storage: Arc<dyn Storage>) -> Self {
        let retry = RetryPolicy::from_config(&config.retry);
        let script_generator = ScriptGenerator::new(client.clone(), retry.clone());
        let media = MediaGenerator::new(client, retry, &config.audio, &config.video);
        let archive = ProjectArchive::new(storage.clone(), config.archive_folder.clone());
        let runner = BatchRunner::new().with_progress(!cfg!(test));

        Self {
            config,
            session: Session::default(),
            script_generator,
            media,
            runner,
            archive,
            storage,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn archive(&self) -> &ProjectArchive {
        &self.archive
    }

    pub fn batch_runner(&self) -> &BatchRunner {
        &self.runner
    }

    /// Makes `project` the live project. Work still running on the previous one is abandoned.
    pub fn open(&self, project: Project) -> Epoch {
        log::info!("Opened project {} ({})", project.name, project.id);
        self.session.load(project)
    }

    /// Drops the live project. Results arriving for it afterwards are ignored.
    pub fn start_over(&self) {
        let epoch = self.session.reset();
        log::info!("Started over (epoch {})", epoch);
    }

    fn api_key(&self, project: &Project) -> Result<String> {
        self.config.resolve_api_key(project.api_key.as_deref())
    }

    /// Records a failure as the session's displayable error and passes it on.
    /// Failures of work started under an older epoch are only returned.
    fn report<T>(&self, epoch: Epoch, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.session.set_error_for(epoch, format!("{:#}", e));
        }
        result
    }

    pub async fn generate_script(&self) -> Result<()> {
        let epoch = self.session.epoch();
        let result = self.generate_script_inner().await;
        self.report(epoch, result)
    }

    async fn generate_script_inner(&self) -> Result<()> {
        let (project, epoch) = self.session.snapshot()?;
        let api_key = self.api_key(&project).context("Script generation failed")?;
        let story = self
            .script_generator
            .generate(&api_key, &project.story_config, &project.voice_config, &project.image_style)
            .await?;

        if !self.session.commit(epoch, |p| Ok(p.with_story(story)))? {
            log::warn!("Script finished after the project was closed; discarded");
        }
        Ok(())
    }

    async fn scene_job(&self, api_key: &str, slot: SceneSlot, project: &Project, scene: Scene) -> Result<MediaPayload> {
        match slot {
            SceneSlot::Audio => self.media.generate_audio(api_key, &scene, &project.voice_config).await,
            SceneSlot::Image => {
                self.media
                    .generate_image(api_key, &scene, &project.story_config.characters, &project.image_style)
                    .await
            }
            SceneSlot::Video => self.media.generate_video(api_key, &scene, &project.image_style).await,
        }
    }

    /// Generates `slot` for every scene in order. One scene failing does not stop the others.
    pub async fn generate_all(&self, slot: SceneSlot) -> Result<BatchReport> {
        let (project, epoch) = self.session.snapshot()?;
        let indices: Vec<usize> = (0..project.scene_count()).collect();
        if indices.is_empty() {
            return self.report(epoch, Err(anyhow!("Generate a script before generating {}", slot)));
        }
        let api_key = self.report(epoch, self.api_key(&project))?;

        let project = &project;
        let api_key = api_key.as_str();
        self.runner
            .run(&self.session, epoch, slot, &indices, |_, scene| {
                self.scene_job(api_key, slot, project, scene)
            })
            .await
    }

    pub async fn generate_all_audio(&self) -> Result<BatchReport> {
        self.generate_all(SceneSlot::Audio).await
    }

    pub async fn generate_all_images(&self) -> Result<BatchReport> {
        self.generate_all(SceneSlot::Image).await
    }

    pub async fn generate_all_videos(&self) -> Result<BatchReport> {
        self.generate_all(SceneSlot::Video).await
    }

    /// Regenerates one slot of one scene, replacing whatever was there.
    pub async fn regenerate(&self, slot: SceneSlot, index: usize) -> Result<()> {
        let epoch = self.session.epoch();
        let result = self.regenerate_inner(slot, index).await;
        self.report(epoch, result)
    }

    async fn regenerate_inner(&self, slot: SceneSlot, index: usize) -> Result<()> {
        let (project, epoch) = self.session.snapshot()?;
        let scene = project
            .scene(index)
            .cloned()
            .ok_or_else(|| anyhow!("Scene index {} out of range", index))?;
        let api_key = self.api_key(&project)?;
        let scene_number = scene.scene_number;

        let payload = self
            .scene_job(&api_key, slot, &project, scene)
            .await
            .with_context(|| format!("Scene {} {} failed", scene_number, slot))?;

        self.session
            .commit(epoch, |p| merge_scene(p, index, SceneUpdate::set(slot, payload)))?;
        Ok(())
    }

    /// Replaces a character's signature with a description of its reference image.
    pub async fn analyze_character(&self, character_id: &str) -> Result<()> {
        let epoch = self.session.epoch();
        let result = self.update_signature(character_id, true).await;
        self.report(epoch, result)
    }

    /// Replaces a character's signature with one invented from the story.
    pub async fn generate_character_signature(&self, character_id: &str) -> Result<()> {
        let epoch = self.session.epoch();
        let result = self.update_signature(character_id, false).await;
        self.report(epoch, result)
    }

    async fn update_signature(&self, character_id: &str, from_image: bool) -> Result<()> {
        let (project, epoch) = self.session.snapshot()?;
        let character = project
            .character(character_id)
            .cloned()
            .ok_or_else(|| anyhow!("Unknown character id: {}", character_id))?;
        let api_key = self.api_key(&project)?;
        let language = &project.voice_config.language;

        let signature = if from_image {
            self.media.analyze_character(&api_key, &character, language).await?
        } else {
            self.media
                .generate_signature(&api_key, &character, &project.story_config, &project.image_style, language)
                .await?
        };

        self.session.commit(epoch, |p| {
            let mut updated = p
                .character(character_id)
                .cloned()
                .ok_or_else(|| anyhow!("Unknown character id: {}", character_id))?;
            updated.visual_signature = signature;
            p.with_character(updated)
        })?;
        Ok(())
    }

    pub async fn save_project(&self) -> Result<()> {
        match self.session.project() {
            Some(project) => self.archive.save(&project).await,
            None => Ok(()),
        }
    }

    /// Writes every generated asset plus the merged narration under `output_folder/<project id>`.
    pub async fn export_media(&self) -> Result<Vec<String>> {
        let (project, _) = self.session.snapshot()?;
        let story = project
            .story
            .as_ref()
            .ok_or_else(|| anyhow!("Project has no story yet"))?;
        let folder = Path::new(&self.config.output_folder).join(&project.id);

        let mut written = Vec::new();
        for scene in &story.scenes {
            for media in [&scene.audio, &scene.image, &scene.video].into_iter().flatten() {
                let path = folder.join(format!("scene_{:02}.{}", scene.scene_number, media.extension()));
                let path = path.to_string_lossy().to_string();
                self.storage.write(&path, &media.data).await?;
                written.push(path);
            }
        }

        if story.scenes.iter().any(|s| s.audio.is_some()) {
            let narration = export_narration(&project)?;
            let path = folder.join("narration.wav").to_string_lossy().to_string();
            self.storage.write(&path, &narration.data).await?;
            written.push(path);
        }

        log::info!("Exported {} files to {}", written.len(), folder.display());
        Ok(written)
    }

    fn confirm(&self, message: &str) -> bool {
        if self.config.unattended {
            return true;
        }
        match inquire::Confirm::new(message).with_default(true).prompt() {
            Ok(answer) => answer,
            Err(_) => {
                println!("Error reading input, stopping.");
                false
            }
        }
    }

    fn print_report(&self, report: &BatchReport) {
        println!("{}", report.summary());
        for failure in report.failures() {
            if let Err(message) = &failure.result {
                println!("  - {}", message);
            }
        }
    }

    /// Runs the remaining stages of the live project, saving after each one.
    pub async fn run(&self) -> Result<()> {
        let (project, _) = self.session.snapshot()?;

        if project.story.is_none() {
            println!("Generating script ({} scenes)...", project.story_config.scene_count);
            self.generate_script().await?;
            self.save_project().await?;
            if let Some(story) = self.session.project().and_then(|p| p.story) {
                println!("Script ready: {}", story.title);
                for scene in &story.scenes {
                    println!("  {}. {}", scene.scene_number, scene.narrative);
                }
            }
        } else {
            println!("Using existing script.");
        }

        let mut stages = vec![SceneSlot::Audio, SceneSlot::Image];
        if self.config.video.enabled {
            stages.push(SceneSlot::Video);
        }

        for slot in stages {
            if !self.confirm(&format!("Continue to {} generation?", slot)) {
                println!("Stopping as requested.");
                return Ok(());
            }
            println!("Generating {} for all scenes...", slot);
            let report = self.generate_all(slot).await?;
            self.save_project().await?;
            self.print_report(&report);
            if report.abandoned {
                return Ok(());
            }
        }

        let written = self.export_media().await?;
        println!("Wrote {} files to {}", written.len(), self.config.output_folder);
        println!("All stages complete!");
        Ok(())
    }
}
