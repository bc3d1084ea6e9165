use crate::tutor::TutorSession;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The single tutor session this process drives
    pub tutor: Arc<TutorSession>,
}

impl AppState {
    pub fn new(tutor: Arc<TutorSession>) -> Self {
        Self { tutor }
    }
}
