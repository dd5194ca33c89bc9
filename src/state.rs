use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::llm::ImageDescriber;
use crate::report::{ControllerSettings, ReportController, ReportSink};

#[derive(Clone)]
pub struct AppState {
    pub describer: Arc<dyn ImageDescriber>,
    pub sink: Arc<dyn ReportSink>,
    pub settings: ControllerSettings,
    pub session_idle_timeout: Duration,
    pub sessions: Arc<Mutex<HashMap<Uuid, Arc<ReportController>>>>,
}

impl AppState {
    pub fn new(
        describer: Arc<dyn ImageDescriber>,
        sink: Arc<dyn ReportSink>,
        settings: ControllerSettings,
        session_idle_timeout: Duration,
    ) -> Self {
        AppState {
            describer,
            sink,
            settings,
            session_idle_timeout,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn create_session(&self) -> Arc<ReportController> {
        self.prune_idle_sessions();
        let id = Uuid::new_v4();
        let controller = Arc::new(ReportController::new(
            id,
            self.describer.clone(),
            self.sink.clone(),
            self.settings.clone(),
        ));
        self.sessions.lock().insert(id, controller.clone());
        info!("Opened report session {}", id);
        controller
    }

    pub fn session(&self, id: &Uuid) -> Option<Arc<ReportController>> {
        self.sessions.lock().get(id).cloned()
    }

    pub fn close_session(&self, id: &Uuid) -> bool {
        let removed = self.sessions.lock().remove(id).is_some();
        if removed {
            info!("Closed report session {}", id);
        }
        removed
    }

    /// Drops sessions idle past the timeout unless an operation is still running.
    pub fn prune_idle_sessions(&self) -> usize {
        let timeout = self.session_idle_timeout;
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, controller| controller.is_busy() || controller.idle_for() < timeout);
        let pruned = before - sessions.len();
        if pruned > 0 {
            info!("Pruned {} idle report session(s)", pruned);
        }
        pruned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{DescribeError, DescribeImageInput, ImageDescription};
    use crate::report::SimulatedDelivery;
    use async_trait::async_trait;

    struct NoopDescriber;

    #[async_trait]
    impl ImageDescriber for NoopDescriber {
        fn model_label(&self) -> String {
            "noop".to_string()
        }

        async fn describe(
            &self,
            _input: &DescribeImageInput,
        ) -> Result<ImageDescription, DescribeError> {
            Err(DescribeError::EmptyResult)
        }
    }

    fn state(idle_timeout: Duration) -> AppState {
        AppState::new(
            Arc::new(NoopDescriber),
            Arc::new(SimulatedDelivery::new(Duration::from_millis(1))),
            ControllerSettings {
                location_timeout: Duration::from_secs(1),
            },
            idle_timeout,
        )
    }

    #[test]
    fn sessions_open_and_close() {
        let state = state(Duration::from_secs(60));
        let controller = state.create_session();
        let id = controller.id();

        assert!(state.session(&id).is_some());
        assert!(state.close_session(&id));
        assert!(state.session(&id).is_none());
        assert!(!state.close_session(&id));
    }

    #[test]
    fn idle_sessions_are_pruned() {
        let state = state(Duration::ZERO);
        let first = state.create_session().id();
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(state.prune_idle_sessions(), 1);
        assert!(state.session(&first).is_none());
    }
}
