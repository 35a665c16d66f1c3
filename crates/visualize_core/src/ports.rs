//! crates/visualize_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, keeping the core
//! independent of the concrete session store and AI provider.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Difficulty, ImageAnalysis, ImageRef, SessionRecord, SessionUpdate, TapPoint, Turn};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    /// The collaborator could not be reached or refused the request.
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    /// The collaborator is missing credentials or other required settings.
    #[error("Service not configured: {0}")]
    Configuration(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// A keyed store of session records.
///
/// Every operation is atomic per key, which is all the session manager and its
/// concurrent cleanup sweep rely on. Liveness filters take `now` from the caller
/// so the backend never consults a clock of its own.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Inserts the record, replacing any existing one with the same id.
    async fn upsert(&self, record: &SessionRecord) -> PortResult<()>;

    /// Point lookup restricted to records with `expires_at > now`.
    async fn get_live(&self, session_id: &str, now: DateTime<Utc>) -> PortResult<Option<SessionRecord>>;

    /// Applies `changes` and sets `expires_at`. Returns whether a record matched.
    async fn update(
        &self,
        session_id: &str,
        changes: &SessionUpdate,
        expires_at: DateTime<Utc>,
    ) -> PortResult<bool>;

    /// Returns whether a record was removed.
    async fn delete(&self, session_id: &str) -> PortResult<bool>;

    /// Removes every record with `expires_at <= now`, returning how many went.
    async fn delete_expired(&self, now: DateTime<Utc>) -> PortResult<usize>;

    async fn count_live(&self, now: DateTime<Utc>) -> PortResult<usize>;

    /// Removes every record regardless of expiry.
    async fn delete_all(&self) -> PortResult<usize>;
}

/// The AI collaborator that interprets images and answers questions about them.
#[async_trait]
pub trait VisionService: Send + Sync {
    /// Produces a description of the image and its labelled components.
    async fn analyze_image(&self, image: ImageRef<'_>, difficulty: Difficulty) -> PortResult<ImageAnalysis>;

    /// Answers a follow-up question given the prior conversation.
    async fn ask_follow_up(
        &self,
        image: ImageRef<'_>,
        question: &str,
        tap_point: Option<TapPoint>,
        difficulty: Difficulty,
        history: &[Turn],
    ) -> PortResult<String>;

    /// Explores a hypothetical scenario about the image.
    async fn ask_what_if(
        &self,
        image: ImageRef<'_>,
        scenario: &str,
        difficulty: Difficulty,
        history: &[Turn],
    ) -> PortResult<String>;
}
