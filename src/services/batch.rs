use crate::core::merge::{merge_scene, SceneSlot, SceneUpdate};
use crate::core::project::{MediaPayload, Scene};
use crate::core::session::{Epoch, Session};
use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info};
use std::future::Future;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq)]
pub struct SceneOutcome {
    pub index: usize,
    pub scene_number: u32,
    pub result: Result<(), String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub slot: SceneSlot,
    pub outcomes: Vec<SceneOutcome>,
    /// The session moved on before the batch finished. Remaining scenes were skipped.
    pub abandoned: bool,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &SceneOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn summary(&self) -> String {
        let failed = self.outcomes.len() - self.succeeded();
        let mut line = format!("{}: {} succeeded, {} failed", self.slot, self.succeeded(), failed);
        if self.abandoned {
            line.push_str(" (abandoned)");
        }
        line
    }
}

/// Runs one media job per scene, strictly in the order given.
///
/// Each job sees the latest committed scene and its result is committed
/// before the next job starts. A failure is recorded and the batch moves on.
pub struct BatchRunner {
    current: watch::Sender<Option<usize>>,
    show_progress: bool,
}

impl Default for BatchRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchRunner {
    pub fn new() -> Self {
        let (current, _) = watch::channel(None);
        Self {
            current,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Index of the scene being processed, `None` while idle.
    pub fn subscribe(&self) -> watch::Receiver<Option<usize>> {
        self.current.subscribe()
    }

    pub fn current(&self) -> Option<usize> {
        *self.current.borrow()
    }

    fn progress_bar(&self, len: usize, slot: SceneSlot) -> Result<ProgressBar> {
        if !self.show_progress {
            return Ok(ProgressBar::hidden());
        }
        let pb = ProgressBar::new(len as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("#>-"),
        );
        pb.set_message(format!("{}", slot));
        Ok(pb)
    }

    pub async fn run<F, Fut>(
        &self,
        session: &Session,
        epoch: Epoch,
        slot: SceneSlot,
        indices: &[usize],
        mut job: F,
    ) -> Result<BatchReport>
    where
        F: FnMut(usize, Scene) -> Fut,
        Fut: Future<Output = Result<MediaPayload>>,
    {
        let mut indices = indices.to_vec();
        indices.sort_unstable();
        indices.dedup();

        let pb = self.progress_bar(indices.len(), slot)?;
        let mut report = BatchReport {
            slot,
            outcomes: Vec::with_capacity(indices.len()),
            abandoned: false,
        };

        for index in indices {
            let Some(scene) = self.latest_scene(session, epoch, index) else {
                report.abandoned = true;
                break;
            };
            let Some(scene) = scene else {
                let message = format!("Scene index {} does not exist", index);
                error!("{}", message);
                report.outcomes.push(SceneOutcome {
                    index,
                    scene_number: index as u32 + 1,
                    result: Err(message),
                });
                continue;
            };

            self.current.send_replace(Some(index));
            let scene_number = scene.scene_number;
            let result = job(index, scene).await;

            let result = match result {
                Ok(payload) => {
                    match session.commit(epoch, |p| merge_scene(p, index, SceneUpdate::set(slot, payload))) {
                        Ok(true) => Ok(()),
                        Ok(false) => {
                            report.abandoned = true;
                            break;
                        }
                        Err(e) => Err(e),
                    }
                }
                Err(e) => Err(e),
            };

            let result = result.map_err(|e| {
                let message = format!("Scene {} {} failed: {:#}", scene_number, slot, e);
                error!("{}", message);
                session.set_error_for(epoch, message.clone());
                message
            });
            report.outcomes.push(SceneOutcome {
                index,
                scene_number,
                result,
            });
            pb.inc(1);
        }

        self.current.send_replace(None);
        pb.finish_with_message(format!("{} done", slot));
        info!("{}", report.summary());
        Ok(report)
    }

    /// `None` once the session moved on; `Some(None)` for a missing scene.
    fn latest_scene(&self, session: &Session, epoch: Epoch, index: usize) -> Option<Option<Scene>> {
        if !session.is_current(epoch) {
            return None;
        }
        let (project, current) = session.snapshot().ok()?;
        if current != epoch {
            return None;
        }
        Some(project.scene(index).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::project::{Project, StoryOutput};
    use std::sync::{Arc, Mutex};

    fn session(scenes: u32) -> Session {
        Session::new(Project::default().with_story(StoryOutput {
            scenes: (1..=scenes)
                .map(|n| Scene {
                    scene_number: n,
                    narrative: format!("Narrative {}", n),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }))
    }

    fn wav(n: u8) -> MediaPayload {
        MediaPayload::new("audio/wav", vec![n])
    }

    #[tokio::test]
    async fn test_failing_scene_does_not_stop_batch() -> Result<()> {
        let session = session(4);
        let epoch = session.epoch();
        let runner = BatchRunner::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let report = runner
            .run(&session, epoch, SceneSlot::Audio, &[3, 0, 2, 1], |index, scene| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(index);
                    if index == 2 {
                        anyhow::bail!("The model is overloaded");
                    }
                    Ok(wav(scene.scene_number as u8))
                }
            })
            .await?;

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(report.succeeded(), 3);
        assert!(!report.abandoned);
        let failed: Vec<u32> = report.failures().map(|o| o.scene_number).collect();
        assert_eq!(failed, vec![3]);

        let project = session.project().unwrap();
        assert_eq!(project.scene(0).unwrap().audio, Some(wav(1)));
        assert!(project.scene(2).unwrap().audio.is_none());
        assert_eq!(project.scene(3).unwrap().audio, Some(wav(4)));
        assert!(session.last_error().unwrap().contains("Scene 3 audio failed"));
        assert_eq!(runner.current(), None);
        Ok(())
    }

    #[tokio::test]
    async fn test_each_job_sees_previous_commit() -> Result<()> {
        let session = session(2);
        let epoch = session.epoch();
        let observer = session.clone();

        let report = BatchRunner::new()
            .run(&session, epoch, SceneSlot::Image, &[0, 1], |index, _scene| {
                let observer = observer.clone();
                async move {
                    if index == 1 {
                        // Scene 1's image must already be committed.
                        assert!(observer.project().unwrap().scene(0).unwrap().image.is_some());
                    }
                    Ok(MediaPayload::new("image/png", vec![index as u8]))
                }
            })
            .await?;
        assert_eq!(report.succeeded(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_reset_mid_batch_discards_and_stops() -> Result<()> {
        let session = session(3);
        let epoch = session.epoch();
        let other = session.clone();
        let calls = Arc::new(Mutex::new(0));

        let report = BatchRunner::new()
            .run(&session, epoch, SceneSlot::Audio, &[0, 1, 2], |index, _scene| {
                let other = other.clone();
                let calls = calls.clone();
                async move {
                    *calls.lock().unwrap() += 1;
                    if index == 1 {
                        other.reset();
                    }
                    Ok(wav(index as u8))
                }
            })
            .await?;

        assert!(report.abandoned);
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(*calls.lock().unwrap(), 2);
        assert!(session.project().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_failure_after_reset_leaves_new_session_clean() -> Result<()> {
        let session = session(2);
        let epoch = session.epoch();
        let other = session.clone();

        let report = BatchRunner::new()
            .run(&session, epoch, SceneSlot::Audio, &[0, 1], |_, _| {
                let other = other.clone();
                async move {
                    other.reset();
                    other.load(Project::default());
                    anyhow::bail!("late failure from abandoned job")
                }
            })
            .await?;

        assert_eq!(report.failures().count(), 1);
        assert!(report.abandoned);
        assert!(session.last_error().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_scene_is_reported() -> Result<()> {
        let session = session(1);
        let epoch = session.epoch();
        let report = BatchRunner::new()
            .run(&session, epoch, SceneSlot::Video, &[0, 5], |_, _| async { Ok(wav(0)) })
            .await?;
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.summary(), "video: 1 succeeded, 1 failed");
        Ok(())
    }

    #[tokio::test]
    async fn test_current_index_signal() -> Result<()> {
        let session = session(2);
        let epoch = session.epoch();
        let runner = BatchRunner::new();
        let rx = runner.subscribe();

        runner
            .run(&session, epoch, SceneSlot::Audio, &[0, 1], |index, _| {
                let seen = *rx.borrow();
                async move {
                    assert_eq!(seen, Some(index));
                    Ok(wav(0))
                }
            })
            .await?;
        assert_eq!(*rx.borrow(), None);
        Ok(())
    }
}
