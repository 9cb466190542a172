//! Application state as seen by operators.

use std::fmt;

use parking_lot::RwLock;

use crate::recording::JobStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Booting,
    Ready,
    SessionActive,
    Recording,
    Paused,
    /// At least one destination failed; others keep recording.
    Degraded,
    /// Nothing is recording.
    ErrorBlocking,
}

impl AppState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Booting => "BOOTING",
            Self::Ready => "READY",
            Self::SessionActive => "SESSION_ACTIVE",
            Self::Recording => "RECORDING",
            Self::Paused => "PAUSED",
            Self::Degraded => "DEGRADED",
            Self::ErrorBlocking => "ERROR_BLOCKING",
        }
    }
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Judge one poll snapshot.
pub fn classify(statuses: &[JobStatus]) -> AppState {
    let failed = statuses.iter().filter(|s| s.is_failed()).count();
    let active = statuses.iter().filter(|s| s.is_active()).count();

    if failed > 0 {
        AppState::Degraded
    } else if active == 0 {
        AppState::ErrorBlocking
    } else {
        AppState::Recording
    }
}

#[derive(Debug)]
pub struct StateStore {
    state: RwLock<AppState>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(AppState::Booting),
        }
    }

    pub fn get(&self) -> AppState {
        *self.state.read()
    }

    /// Replace the state, returning the previous one.
    pub fn set(&self, state: AppState) -> AppState {
        std::mem::replace(&mut *self.state.write(), state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{Job, FAILED};

    fn status(status: &str) -> JobStatus {
        JobStatus {
            job: Job {
                url: "fake:/0/worker/1".into(),
                target: "/data".into(),
            },
            status: status.into(),
            error: (status == FAILED).then(|| "timeout".into()),
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(&[status("recording"), status("ACTIVE")]), AppState::Recording);
        assert_eq!(classify(&[status("recording"), status(FAILED)]), AppState::Degraded);
        assert_eq!(classify(&[status(FAILED), status(FAILED)]), AppState::Degraded);
        assert_eq!(classify(&[status("paused")]), AppState::ErrorBlocking);
        assert_eq!(classify(&[]), AppState::ErrorBlocking);
    }

    #[test]
    fn test_only_writing_workers_are_active() {
        assert_eq!(classify(&[status("running")]), AppState::ErrorBlocking);
        assert_eq!(classify(&[status("started")]), AppState::ErrorBlocking);
        assert_eq!(classify(&[status("running"), status("ACTIVE")]), AppState::Recording);
        assert!(!status("running").is_active());
    }

    #[test]
    fn test_store_returns_previous() {
        let store = StateStore::new();
        assert_eq!(store.get(), AppState::Booting);
        assert_eq!(store.set(AppState::Ready), AppState::Booting);
        assert_eq!(store.set(AppState::Recording), AppState::Ready);
        assert_eq!(store.get(), AppState::Recording);
    }
}
