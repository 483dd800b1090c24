//! Copy-on-write updates of a single scene slot.

use crate::core::project::{MediaPayload, Project};
use anyhow::{anyhow, Result};
use chrono::Utc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SceneSlot {
    Audio,
    Image,
    Video,
}

impl std::fmt::Display for SceneSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SceneSlot::Audio => f.write_str("audio"),
            SceneSlot::Image => f.write_str("image"),
            SceneSlot::Video => f.write_str("video"),
        }
    }
}

/// A change to exactly one media slot of one scene.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneUpdate {
    pub slot: SceneSlot,
    pub payload: Option<MediaPayload>,
}

impl SceneUpdate {
    pub fn set(slot: SceneSlot, payload: MediaPayload) -> Self {
        Self {
            slot,
            payload: Some(payload),
        }
    }

    pub fn clear(slot: SceneSlot) -> Self {
        Self { slot, payload: None }
    }
}

/// Returns a new project where only `update.slot` of scene `index` differs.
pub fn merge_scene(project: &Project, index: usize, update: SceneUpdate) -> Result<Project> {
    let mut next = project.clone();
    let story = next
        .story
        .as_mut()
        .ok_or_else(|| anyhow!("Project has no story yet"))?;
    let scene_count = story.scenes.len();
    let scene = story
        .scenes
        .get_mut(index)
        .ok_or_else(|| anyhow!("Scene index {} out of range ({} scenes)", index, scene_count))?;

    let slot = match update.slot {
        SceneSlot::Audio => &mut scene.audio,
        SceneSlot::Image => &mut scene.image,
        SceneSlot::Video => &mut scene.video,
    };
    *slot = update.payload;
    next.updated_at = Utc::now();
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::project::{Scene, StoryOutput};

    fn project_with_scenes(n: u32) -> Project {
        let scenes = (1..=n)
            .map(|i| Scene {
                scene_number: i,
                narrative: format!("Narrative {}", i),
                image_prompt: format!("Prompt {}", i),
                audio: Some(MediaPayload::new("audio/wav", vec![i as u8])),
                ..Default::default()
            })
            .collect();
        let mut project = Project::default();
        project.story = Some(StoryOutput {
            title: "T".to_string(),
            summary: "S".to_string(),
            scenes,
        });
        project
    }

    #[test]
    fn test_merge_touches_only_target_slot() -> Result<()> {
        let project = project_with_scenes(3);
        let image = MediaPayload::new("image/png", vec![9, 9]);

        let next = merge_scene(&project, 1, SceneUpdate::set(SceneSlot::Image, image.clone()))?;

        let before = &project.story.as_ref().unwrap().scenes;
        let after = &next.story.as_ref().unwrap().scenes;
        assert_eq!(after[1].image.as_ref(), Some(&image));
        assert_eq!(after[1].audio, before[1].audio);
        assert_eq!(after[1].narrative, before[1].narrative);
        assert_eq!(after[0], before[0]);
        assert_eq!(after[2], before[2]);
        assert_eq!(next.story_config, project.story_config);
        assert!(project.story.as_ref().unwrap().scenes[1].image.is_none());
        Ok(())
    }

    #[test]
    fn test_regeneration_replaces() -> Result<()> {
        let project = project_with_scenes(2);
        let first = merge_scene(&project, 0, SceneUpdate::set(SceneSlot::Audio, MediaPayload::new("audio/wav", vec![1])))?;
        let second = merge_scene(&first, 0, SceneUpdate::set(SceneSlot::Audio, MediaPayload::new("audio/wav", vec![2])))?;
        assert_eq!(second.scene(0).unwrap().audio.as_ref().unwrap().data, vec![2]);
        assert_eq!(second.scene_count(), 2);

        let cleared = merge_scene(&second, 0, SceneUpdate::clear(SceneSlot::Audio))?;
        assert!(cleared.scene(0).unwrap().audio.is_none());
        Ok(())
    }

    #[test]
    fn test_merge_out_of_range() {
        let project = project_with_scenes(2);
        let update = SceneUpdate::clear(SceneSlot::Video);
        assert!(merge_scene(&project, 2, update.clone()).is_err());
        assert!(merge_scene(&Project::default(), 0, update).is_err());
    }
}
