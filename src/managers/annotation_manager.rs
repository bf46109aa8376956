// AnnotationManager: Focused manager for labeling sessions
//
// Single Responsibility: Annotation session lifecycle and serialized
// mutation. All edits to one session go through this manager's lock, which
// is what preserves the non-overlap invariant when inference application
// and user corrections race on the same session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::annotation::label::ActivityLabel;
use crate::annotation::session::{AnnotationSession, LabeledRecording};
use crate::config::AnnotationConfig;
use crate::device::DeviceId;
use crate::error::{log_annotation_error, AnnotationError};
use crate::stream::SampleWindow;

/// Manages open annotation sessions
pub struct AnnotationManager {
    config: AnnotationConfig,
    sessions: Mutex<HashMap<u64, AnnotationSession>>,
    next_id: AtomicU64,
}

impl AnnotationManager {
    pub fn new(config: AnnotationConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Open a labeling session over a window snapshot
    ///
    /// # Returns
    /// The new session id
    ///
    /// # Errors
    /// - `SessionLimit` when the configured open-session cap is reached
    /// - `StatePoisoned` on lock poisoning
    pub fn open(
        &self,
        device_id: DeviceId,
        window: SampleWindow,
    ) -> Result<u64, AnnotationError> {
        let mut sessions = self.lock_sessions()?;
        if sessions.len() >= self.config.max_open_sessions {
            let err = AnnotationError::SessionLimit {
                max: self.config.max_open_sessions,
            };
            log_annotation_error(&err, "open_session");
            return Err(err);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        sessions.insert(id, AnnotationSession::new(id, device_id, window));
        log::info!("[AnnotationManager] Opened session {}", id);
        Ok(id)
    }

    /// Apply inferred labels to a session (human labels keep precedence)
    ///
    /// # Returns
    /// Number of label fragments inserted
    pub fn apply_inference(
        &self,
        session_id: u64,
        labels: &[ActivityLabel],
        model_version: &str,
    ) -> Result<usize, AnnotationError> {
        let mut sessions = self.lock_sessions()?;
        let session = Self::session_mut(&mut sessions, session_id)?;
        Ok(session.apply_inference(labels, model_version))
    }

    /// Apply one human correction to a session
    pub fn apply_correction(
        &self,
        session_id: u64,
        label: ActivityLabel,
    ) -> Result<(), AnnotationError> {
        let mut sessions = self.lock_sessions()?;
        let session = Self::session_mut(&mut sessions, session_id)?;
        session.apply_correction(label).inspect_err(|err| {
            log_annotation_error(err, "apply_correction");
        })
    }

    /// Current label sequence for UI rendering
    pub fn session_labels(&self, session_id: u64) -> Result<Vec<ActivityLabel>, AnnotationError> {
        let mut sessions = self.lock_sessions()?;
        let session = Self::session_mut(&mut sessions, session_id)?;
        Ok(session.labels().to_vec())
    }

    /// Window snapshot the session was opened over
    pub fn session_window(&self, session_id: u64) -> Result<SampleWindow, AnnotationError> {
        let mut sessions = self.lock_sessions()?;
        let session = Self::session_mut(&mut sessions, session_id)?;
        Ok(session.window().clone())
    }

    /// Export a session without closing it
    pub fn export(&self, session_id: u64) -> Result<LabeledRecording, AnnotationError> {
        let mut sessions = self.lock_sessions()?;
        let session = Self::session_mut(&mut sessions, session_id)?;
        session.export().inspect_err(|err| {
            log_annotation_error(err, "export_session");
        })
    }

    /// Export a session and remove it from the open set
    pub fn finalize(&self, session_id: u64) -> Result<LabeledRecording, AnnotationError> {
        let mut sessions = self.lock_sessions()?;
        let session = Self::session_mut(&mut sessions, session_id)?;
        let recording = session.export().inspect_err(|err| {
            log_annotation_error(err, "finalize_session");
        })?;
        sessions.remove(&session_id);
        log::info!("[AnnotationManager] Finalized session {}", session_id);
        Ok(recording)
    }

    /// Discard a session without exporting
    pub fn discard(&self, session_id: u64) -> Result<(), AnnotationError> {
        let mut sessions = self.lock_sessions()?;
        sessions.remove(&session_id);
        Ok(())
    }

    /// Number of currently open sessions
    pub fn open_count(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    fn session_mut<'a>(
        sessions: &'a mut HashMap<u64, AnnotationSession>,
        session_id: u64,
    ) -> Result<&'a mut AnnotationSession, AnnotationError> {
        sessions.get_mut(&session_id).ok_or_else(|| {
            let err = AnnotationError::UnknownSession { session_id };
            log_annotation_error(&err, "lookup_session");
            err
        })
    }

    fn lock_sessions(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<u64, AnnotationSession>>, AnnotationError> {
        self.sessions
            .lock()
            .map_err(|_| AnnotationError::StatePoisoned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::label::ActivityKind;
    use crate::codec::SensorSample;

    fn window() -> SampleWindow {
        let device = DeviceId::new("D1");
        let samples = (1..=5u32)
            .map(|i| SensorSample::new(device.clone(), i as u64, i, vec![0.0]))
            .collect();
        SampleWindow::new(device, samples)
    }

    fn manager() -> AnnotationManager {
        AnnotationManager::new(AnnotationConfig::default())
    }

    #[test]
    fn test_open_assigns_increasing_ids() {
        let manager = manager();
        let first = manager.open(DeviceId::new("D1"), window()).unwrap();
        let second = manager.open(DeviceId::new("D1"), window()).unwrap();
        assert!(second > first);
        assert_eq!(manager.open_count(), 2);
    }

    #[test]
    fn test_session_limit() {
        let manager = AnnotationManager::new(AnnotationConfig {
            max_open_sessions: 1,
        });
        manager.open(DeviceId::new("D1"), window()).unwrap();
        let err = manager.open(DeviceId::new("D1"), window()).unwrap_err();
        assert!(matches!(err, AnnotationError::SessionLimit { max: 1 }));
    }

    #[test]
    fn test_unknown_session() {
        let manager = manager();
        let err = manager.session_labels(99).unwrap_err();
        assert!(matches!(err, AnnotationError::UnknownSession { session_id: 99 }));
    }

    #[test]
    fn test_inference_and_correction_flow() {
        let manager = manager();
        let id = manager.open(DeviceId::new("D1"), window()).unwrap();

        manager
            .apply_inference(
                id,
                &[ActivityLabel::inferred(ActivityKind::Pass, 1, 3, 0.8)],
                "heuristic-v1",
            )
            .unwrap();
        manager
            .apply_correction(id, ActivityLabel::corrected(ActivityKind::Shot, 2, 4))
            .unwrap();

        let labels = manager.session_labels(id).unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[0].kind, ActivityKind::Pass);
        assert_eq!(labels[1].kind, ActivityKind::Shot);
    }

    #[test]
    fn test_finalize_removes_session() {
        let manager = manager();
        let id = manager.open(DeviceId::new("D1"), window()).unwrap();
        manager
            .apply_inference(
                id,
                &[ActivityLabel::inferred(ActivityKind::Touch, 1, 2, 0.9)],
                "heuristic-v1",
            )
            .unwrap();

        let recording = manager.finalize(id).unwrap();
        assert_eq!(recording.session_id, id);
        assert_eq!(manager.open_count(), 0);
        assert!(matches!(
            manager.export(id).unwrap_err(),
            AnnotationError::UnknownSession { .. }
        ));
    }

    #[test]
    fn test_export_keeps_session_open() {
        let manager = manager();
        let id = manager.open(DeviceId::new("D1"), window()).unwrap();
        manager
            .apply_inference(
                id,
                &[ActivityLabel::inferred(ActivityKind::Touch, 1, 2, 0.9)],
                "heuristic-v1",
            )
            .unwrap();

        manager.export(id).unwrap();
        assert_eq!(manager.open_count(), 1);
    }

    #[test]
    fn test_empty_export_blocked() {
        let manager = manager();
        let id = manager.open(DeviceId::new("D1"), window()).unwrap();
        let err = manager.export(id).unwrap_err();
        assert!(matches!(err, AnnotationError::IncompleteSession { .. }));
    }

    #[test]
    fn test_discard_without_export() {
        let manager = manager();
        let id = manager.open(DeviceId::new("D1"), window()).unwrap();
        manager.discard(id).unwrap();
        assert_eq!(manager.open_count(), 0);
    }
}
