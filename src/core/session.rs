//! The live project plus the bookkeeping that keeps late results out of it.

use crate::core::project::Project;
use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex, MutexGuard};

/// Generation counter of the session. Bumped by every reset.
pub type Epoch = u64;

#[derive(Debug, Default)]
struct SessionState {
    project: Option<Project>,
    epoch: Epoch,
    last_error: Option<String>,
}

/// Shared handle to the current project.
///
/// The project is only ever replaced, never mutated in place. Every commit
/// is applied to the latest snapshot and only if the caller's epoch is still
/// current, so results that resolve after a reset are dropped.
#[derive(Debug, Clone, Default)]
pub struct Session {
    inner: Arc<Mutex<SessionState>>,
}

impl Session {
    pub fn new(project: Project) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionState {
                project: Some(project),
                ..Default::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        // A panic while holding the lock cannot leave a half-written project behind.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn epoch(&self) -> Epoch {
        self.lock().epoch
    }

    pub fn is_current(&self, epoch: Epoch) -> bool {
        self.lock().epoch == epoch
    }

    pub fn project(&self) -> Option<Project> {
        self.lock().project.clone()
    }

    /// Latest project together with the epoch it belongs to.
    pub fn snapshot(&self) -> Result<(Project, Epoch)> {
        let state = self.lock();
        let project = state
            .project
            .clone()
            .ok_or_else(|| anyhow!("No project loaded"))?;
        Ok((project, state.epoch))
    }

    /// Applies `update` to the latest project if `epoch` is still current.
    /// Returns `Ok(false)` when the result was discarded as stale.
    pub fn commit<F>(&self, epoch: Epoch, update: F) -> Result<bool>
    where
        F: FnOnce(&Project) -> Result<Project>,
    {
        let mut state = self.lock();
        if state.epoch != epoch {
            log::info!("Discarding result from abandoned session (epoch {} != {})", epoch, state.epoch);
            return Ok(false);
        }
        let current = state
            .project
            .as_ref()
            .ok_or_else(|| anyhow!("No project loaded"))?;
        let next = update(current)?;
        state.project = Some(next);
        Ok(true)
    }

    /// Replaces the project wholesale and starts a new epoch.
    pub fn load(&self, project: Project) -> Epoch {
        let mut state = self.lock();
        state.epoch += 1;
        state.project = Some(project);
        state.last_error = None;
        state.epoch
    }

    /// Abandons the project and any in-flight jobs working on it.
    pub fn reset(&self) -> Epoch {
        let mut state = self.lock();
        state.epoch += 1;
        state.project = None;
        state.last_error = None;
        state.epoch
    }

    /// Records `message` only if `epoch` is still current. Returns whether it was kept.
    pub fn set_error_for(&self, epoch: Epoch, message: impl Into<String>) -> bool {
        let mut state = self.lock();
        if state.epoch != epoch {
            log::info!("Ignoring error from abandoned session (epoch {} != {})", epoch, state.epoch);
            return false;
        }
        state.last_error = Some(message.into());
        true
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    pub fn dismiss_error(&self) -> Option<String> {
        self.lock().last_error.take()
    }
}
