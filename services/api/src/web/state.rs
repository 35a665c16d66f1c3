//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::error::ApiError;
use std::sync::Arc;
use visualize_core::{ports::VisionService, SessionManager};

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The single session manager of this process.
    pub sessions: Arc<SessionManager>,
    /// `None` when no credentials are configured for the vision provider.
    pub vision: Option<Arc<dyn VisionService>>,
}

impl AppState {
    pub fn new(sessions: Arc<SessionManager>, vision: Option<Arc<dyn VisionService>>) -> Self {
        Self { sessions, vision }
    }

    /// The vision service, or a configuration error when none is set up.
    pub fn vision(&self) -> Result<&dyn VisionService, ApiError> {
        self.vision.as_deref().ok_or_else(|| {
            ApiError::AiNotConfigured("no API key configured for the vision provider".to_string())
        })
    }
}
