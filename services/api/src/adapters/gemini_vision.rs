//! services/api/src/adapters/gemini_vision.rs
//!
//! This module contains the adapter for Google's Gemini models, called through
//! the `generateContent` REST endpoint. It implements the `VisionService` port
//! from `visualize_core`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};
use visualize_core::{
    domain::{Difficulty, ImageAnalysis, ImageRef, Role, TapPoint, Turn},
    ports::{PortError, PortResult, VisionService},
};

use crate::adapters::prompts;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Generous enough for a large image plus a long answer.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

//=========================================================================================
// Wire Types
//=========================================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: String },
    Image {
        #[serde(rename = "inlineData")]
        inline_data: InlineData<'a>,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateResponse {
    /// Concatenated text of the first candidate.
    fn text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

fn text_content<'a>(role: &'static str, text: impl Into<String>) -> Content<'a> {
    Content {
        role: Some(role),
        parts: vec![Part::Text { text: text.into() }],
    }
}

fn image_content<'a>(image: ImageRef<'a>, text: impl Into<String>) -> Content<'a> {
    Content {
        role: Some("user"),
        parts: vec![
            Part::Image {
                inline_data: InlineData {
                    mime_type: image.mime_type,
                    data: image.data,
                },
            },
            Part::Text { text: text.into() },
        ],
    }
}

fn gemini_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "model",
    }
}

/// The image opens the conversation, prior turns follow, `prompt` closes it.
fn conversation<'a>(
    image: ImageRef<'a>,
    difficulty: Difficulty,
    history: &[Turn],
    prompt: String,
) -> GenerateRequest<'a> {
    let mut contents = Vec::with_capacity(history.len() + 2);
    contents.push(image_content(image, prompts::IMAGE_INTRO));
    contents.extend(
        history
            .iter()
            .map(|turn| text_content(gemini_role(turn.role), turn.content.clone())),
    );
    contents.push(text_content("user", prompt));
    GenerateRequest {
        system_instruction: Content {
            role: None,
            parts: vec![Part::Text {
                text: prompts::system_instructions(difficulty),
            }],
        },
        contents,
    }
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `VisionService` using the Gemini REST API.
#[derive(Clone)]
pub struct GeminiVisionAdapter {
    client: Client,
    api_key: String,
    model: String,
}

impl GeminiVisionAdapter {
    /// Creates a new `GeminiVisionAdapter`.
    pub fn new(api_key: String, model: String) -> PortResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PortError::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_key,
            model,
        })
    }

    async fn generate(&self, request: &GenerateRequest<'_>) -> PortResult<String> {
        let url = format!("{}/models/{}:generateContent", GEMINI_API_BASE, self.model);
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| PortError::Unavailable(format!("Gemini request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, body = %body, "Gemini API returned an error");
            return Err(PortError::Unavailable(format!("Gemini API error: {}", status)));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| PortError::Unavailable(format!("Gemini response was unreadable: {}", e)))?;
        parsed
            .text()
            .ok_or_else(|| PortError::Unavailable("Gemini returned no text content.".to_string()))
    }
}

//=========================================================================================
// `VisionService` Trait Implementation
//=========================================================================================

#[async_trait]
impl VisionService for GeminiVisionAdapter {
    async fn analyze_image(&self, image: ImageRef<'_>, difficulty: Difficulty) -> PortResult<ImageAnalysis> {
        let request = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part::Text {
                    text: prompts::system_instructions(difficulty),
                }],
            },
            contents: vec![image_content(image, prompts::analysis_prompt())],
        };
        let raw = self.generate(&request).await?;
        debug!(chars = raw.len(), "Received image analysis");
        Ok(prompts::parse_analysis(&raw))
    }

    async fn ask_follow_up(
        &self,
        image: ImageRef<'_>,
        question: &str,
        tap_point: Option<TapPoint>,
        difficulty: Difficulty,
        history: &[Turn],
    ) -> PortResult<String> {
        let request = conversation(
            image,
            difficulty,
            history,
            prompts::follow_up_prompt(question, tap_point),
        );
        self.generate(&request).await
    }

    async fn ask_what_if(
        &self,
        image: ImageRef<'_>,
        scenario: &str,
        difficulty: Difficulty,
        history: &[Turn],
    ) -> PortResult<String> {
        let request = conversation(image, difficulty, history, prompts::what_if_prompt(scenario));
        self.generate(&request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_alternates_user_and_model_turns() {
        let image = ImageRef {
            data: "aW1n",
            mime_type: "image/webp",
        };
        let history = vec![Turn::assistant("A bicycle."), Turn::user("Why two wheels?")];
        let request = conversation(image, Difficulty::Novice, &history, "Question: gears?".into());
        let body = serde_json::to_value(&request).unwrap();

        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(
            body["contents"][0]["parts"][0],
            json!({"inlineData": {"mimeType": "image/webp", "data": "aW1n"}})
        );
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["contents"][2]["parts"][0]["text"], "Why two wheels?");
        assert_eq!(body["contents"][3]["parts"][0]["text"], "Question: gears?");
        assert!(body["systemInstruction"].get("role").is_none());
    }

    #[test]
    fn response_text_joins_parts_of_first_candidate() {
        let raw = json!({
            "candidates": [
                {"content": {"parts": [{"text": "Hello "}, {"text": "there"}]}},
                {"content": {"parts": [{"text": "ignored"}]}}
            ]
        });
        let parsed: GenerateResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.text().as_deref(), Some("Hello there"));
    }

    #[test]
    fn blocked_response_has_no_text() {
        let parsed: GenerateResponse =
            serde_json::from_value(json!({"promptFeedback": {"blockReason": "SAFETY"}})).unwrap();
        assert!(parsed.text().is_none());
    }
}
