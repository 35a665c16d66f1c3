//! services/api/src/adapters/openai_vision.rs
//!
//! This module contains the adapter for OpenAI's vision-capable chat models.
//! It implements the `VisionService` port from `visualize_core`.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContentPart,
        CreateChatCompletionRequestArgs, ImageDetail, ImageUrlArgs,
    },
    Client,
};
use async_trait::async_trait;
use tracing::debug;
use visualize_core::{
    domain::{Difficulty, ImageAnalysis, ImageRef, Role, TapPoint, Turn},
    ports::{PortError, PortResult, VisionService},
};

use crate::adapters::prompts;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `VisionService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiVisionAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

fn build_error(e: OpenAIError) -> PortError {
    PortError::Unexpected(e.to_string())
}

impl OpenAiVisionAdapter {
    /// Creates a new `OpenAiVisionAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }

    /// A user message carrying the image as a data URL next to `text`.
    fn image_message(image: ImageRef<'_>, text: &str) -> PortResult<ChatCompletionRequestMessage> {
        let text_part = ChatCompletionRequestMessageContentPartTextArgs::default()
            .text(text)
            .build()
            .map_err(build_error)?;
        let image_part = ChatCompletionRequestMessageContentPartImageArgs::default()
            .image_url(
                ImageUrlArgs::default()
                    .url(format!("data:{};base64,{}", image.mime_type, image.data))
                    .detail(ImageDetail::Auto)
                    .build()
                    .map_err(build_error)?,
            )
            .build()
            .map_err(build_error)?;

        let parts: Vec<ChatCompletionRequestUserMessageContentPart> =
            vec![text_part.into(), image_part.into()];
        Ok(ChatCompletionRequestUserMessageArgs::default()
            .content(parts)
            .build()
            .map_err(build_error)?
            .into())
    }

    fn text_message(role: Role, text: &str) -> PortResult<ChatCompletionRequestMessage> {
        Ok(match role {
            Role::User => ChatCompletionRequestUserMessageArgs::default()
                .content(text)
                .build()
                .map_err(build_error)?
                .into(),
            Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                .content(text)
                .build()
                .map_err(build_error)?
                .into(),
        })
    }

    /// System instructions, the image, the prior turns, then `prompt`.
    fn conversation(
        image: ImageRef<'_>,
        difficulty: Difficulty,
        history: &[Turn],
        prompt: &str,
    ) -> PortResult<Vec<ChatCompletionRequestMessage>> {
        let mut messages = Vec::with_capacity(history.len() + 3);
        messages.push(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(prompts::system_instructions(difficulty))
                .build()
                .map_err(build_error)?
                .into(),
        );
        messages.push(Self::image_message(image, prompts::IMAGE_INTRO)?);
        for turn in history {
            messages.push(Self::text_message(turn.role, &turn.content)?);
        }
        messages.push(Self::text_message(Role::User, prompt)?);
        Ok(messages)
    }

    async fn complete(&self, messages: Vec<ChatCompletionRequestMessage>) -> PortResult<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .n(1)
            .build()
            .map_err(build_error)?;

        // Call the API and manually map the error if it occurs, which respects the orphan rule.
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unavailable(e.to_string()))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| PortError::Unavailable("Vision model returned no text content.".to_string()))
    }
}

//=========================================================================================
// `VisionService` Trait Implementation
//=========================================================================================

#[async_trait]
impl VisionService for OpenAiVisionAdapter {
    async fn analyze_image(&self, image: ImageRef<'_>, difficulty: Difficulty) -> PortResult<ImageAnalysis> {
        let system: ChatCompletionRequestMessage = ChatCompletionRequestSystemMessageArgs::default()
            .content(prompts::system_instructions(difficulty))
            .build()
            .map_err(build_error)?
            .into();
        let messages = vec![system, Self::image_message(image, &prompts::analysis_prompt())?];

        let raw = self.complete(messages).await?;
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
        let prompt = prompts::follow_up_prompt(question, tap_point);
        let messages = Self::conversation(image, difficulty, history, &prompt)?;
        self.complete(messages).await
    }

    async fn ask_what_if(
        &self,
        image: ImageRef<'_>,
        scenario: &str,
        difficulty: Difficulty,
        history: &[Turn],
    ) -> PortResult<String> {
        let prompt = prompts::what_if_prompt(scenario);
        let messages = Self::conversation(image, difficulty, history, &prompt)?;
        self.complete(messages).await
    }
}
