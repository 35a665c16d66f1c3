//! crates/visualize_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or HTTP layer; their serde
//! shape (camelCase) is what gets stored in JSON columns and sent to clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Prefix marking a user turn that describes a hypothetical scenario.
pub const WHAT_IF_PREFIX: &str = "[What-If Mode] ";

//=========================================================================================
// Difficulty
//=========================================================================================

/// Explanation level, ordered from most simplified to most technical.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Difficulty {
    Novice,
    #[default]
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

impl Difficulty {
    pub const ALL: [Difficulty; 5] = [
        Difficulty::Novice,
        Difficulty::Beginner,
        Difficulty::Intermediate,
        Difficulty::Advanced,
        Difficulty::Expert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Novice => "Novice",
            Difficulty::Beginner => "Beginner",
            Difficulty::Intermediate => "Intermediate",
            Difficulty::Advanced => "Advanced",
            Difficulty::Expert => "Expert",
        }
    }

    /// 1-based position on the explanation scale (the UI slider value).
    pub fn level(&self) -> u8 {
        *self as u8 + 1
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown difficulty level: '{0}'")]
pub struct ParseDifficultyError(pub String);

impl FromStr for Difficulty {
    type Err = ParseDifficultyError;

    /// Accepts a level name (any case) or its slider position `1`..=`5`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(level) = trimmed.parse::<usize>() {
            return level
                .checked_sub(1)
                .and_then(|i| Self::ALL.get(i).copied())
                .ok_or_else(|| ParseDifficultyError(s.to_string()));
        }
        Self::ALL
            .iter()
            .copied()
            .find(|d| d.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| ParseDifficultyError(s.to_string()))
    }
}

//=========================================================================================
// Image content and analysis
//=========================================================================================

/// A normalized (percentage) coordinate on the image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TapPoint {
    pub x: f64,
    pub y: f64,
}

/// A labelled part of the image, positioned in percentage coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    pub x: f64,
    pub y: f64,
}

/// Borrowed view of the stored image handed to the vision service.
#[derive(Debug, Clone, Copy)]
pub struct ImageRef<'a> {
    /// Base64-encoded image bytes.
    pub data: &'a str,
    pub mime_type: &'a str,
}

/// Result of the initial image analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAnalysis {
    pub analysis: String,
    pub components: Vec<Component>,
}

//=========================================================================================
// Conversation
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry of the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tap_point: Option<TapPoint>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_what_if: bool,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tap_point: None,
            is_what_if: false,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tap_point: None,
            is_what_if: false,
        }
    }

    pub fn with_tap_point(mut self, tap_point: Option<TapPoint>) -> Self {
        self.tap_point = tap_point;
        self
    }

    pub fn what_if(mut self) -> Self {
        self.is_what_if = true;
        self
    }
}

//=========================================================================================
// Session Record
//=========================================================================================

/// The unit of state binding one uploaded image, its analysis and a conversation
/// to an opaque session identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub session_id: String,
    pub image_data: String,
    pub image_type: String,
    pub image_description: Option<String>,
    pub components: Vec<Component>,
    pub conversation_history: Vec<Turn>,
    pub difficulty: Difficulty,
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn image(&self) -> ImageRef<'_> {
        ImageRef {
            data: &self.image_data,
            mime_type: &self.image_type,
        }
    }

    /// Appends a direct question, optionally scoped to a tap point.
    pub fn push_question(&mut self, question: &str, tap_point: Option<TapPoint>) {
        self.conversation_history
            .push(Turn::user(question).with_tap_point(tap_point));
    }

    /// Appends a hypothetical scenario posed by the user.
    pub fn push_what_if(&mut self, scenario: &str) {
        self.conversation_history
            .push(Turn::user(format!("{WHAT_IF_PREFIX}{scenario}")).what_if());
    }

    pub fn push_answer(&mut self, answer: &str, is_what_if: bool) {
        let turn = Turn::assistant(answer);
        self.conversation_history
            .push(if is_what_if { turn.what_if() } else { turn });
    }
}

/// Fields supplied by the caller of `SessionManager::create`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSession {
    pub image_data: String,
    pub image_type: String,
    pub image_description: Option<String>,
    pub components: Vec<Component>,
    pub conversation_history: Vec<Turn>,
    pub difficulty: Difficulty,
}

impl NewSession {
    /// A session with only the image set; everything else takes its default.
    pub fn new(image_data: impl Into<String>, image_type: impl Into<String>) -> Self {
        Self {
            image_data: image_data.into(),
            image_type: image_type.into(),
            image_description: None,
            components: Vec::new(),
            conversation_history: Vec::new(),
            difficulty: Difficulty::default(),
        }
    }

    pub fn into_record(self, session_id: &str, expires_at: DateTime<Utc>) -> SessionRecord {
        SessionRecord {
            session_id: session_id.to_string(),
            image_data: self.image_data,
            image_type: self.image_type,
            image_description: self.image_description,
            components: self.components,
            conversation_history: self.conversation_history,
            difficulty: self.difficulty,
            expires_at,
        }
    }
}

/// Partial replacement of the fields that stay mutable after creation.
/// `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionUpdate {
    pub conversation_history: Option<Vec<Turn>>,
    pub components: Option<Vec<Component>>,
    pub difficulty: Option<Difficulty>,
    pub image_description: Option<String>,
}

impl SessionUpdate {
    pub fn history(conversation_history: Vec<Turn>) -> Self {
        Self {
            conversation_history: Some(conversation_history),
            ..Self::default()
        }
    }

    pub fn apply_to(&self, record: &mut SessionRecord) {
        if let Some(history) = &self.conversation_history {
            record.conversation_history = history.clone();
        }
        if let Some(components) = &self.components {
            record.components = components.clone();
        }
        if let Some(difficulty) = self.difficulty {
            record.difficulty = difficulty;
        }
        if let Some(description) = &self.image_description {
            record.image_description = Some(description.clone());
        }
    }
}
