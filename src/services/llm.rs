// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! The language model stage.
//!
//! [`LlmStage`] owns the conversation context for its lifetime and reacts to
//! transcriptions, context-editing frames, and function-call results by
//! invoking a [`LanguageModel`] adapter. Every generation is bracketed by an
//! LLM-response-start and LLM-response-end control frame; function-call
//! frames are emitted before the text frame so a downstream dispatcher can
//! start tool work while the text awaits speech synthesis.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::frames::{
    ChatMessage, Frame, FrameDirection, FramePayload, FunctionCall, ToolChoice,
};
use crate::metrics::TokenUsage;
use crate::processors::runtime::{FrameHandler, StageContext, StageError};
use crate::services::context::Conversation;

/// Configuration recognized by the language model stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider model identifier (e.g. "gpt-4o-mini").
    pub model_id: String,
    /// System prompt seeded into the conversation context.
    pub system_prompt: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    /// Whether generated text should bypass speech synthesis.
    pub skip_tts: bool,
    /// Tool definitions in provider format.
    pub tools: Vec<serde_json::Value>,
    /// Tool-choice policy.
    pub tool_choice: ToolChoice,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model_id: String::new(),
            system_prompt: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            skip_tts: false,
            tools: Vec::new(),
            tool_choice: ToolChoice::Auto,
        }
    }
}

/// One inference request handed to a [`LanguageModel`] adapter.
#[derive(Debug)]
pub struct CompletionRequest<'a> {
    /// The ordered conversation messages.
    pub messages: &'a [ChatMessage],
    /// The current tool set.
    pub tools: &'a [serde_json::Value],
    /// The current tool-choice policy.
    pub tool_choice: &'a ToolChoice,
    /// Model id and generation settings.
    pub config: &'a LlmConfig,
}

/// The adapter's answer to one inference request.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    /// Generated text; may be empty when only function calls are returned.
    pub text: String,
    /// Function calls requested by the model.
    pub function_calls: Vec<FunctionCall>,
    /// Token usage, when the provider reports it.
    pub usage: Option<TokenUsage>,
}

/// Contract a concrete language model provider implements.
#[async_trait]
pub trait LanguageModel: Send + 'static {
    /// Run inference over the given context and return the response.
    async fn complete(&mut self, request: CompletionRequest<'_>) -> Result<Completion, StageError>;
}

/// The generic language model stage.
pub struct LlmStage {
    config: LlmConfig,
    conversation: Conversation,
    tools: Vec<serde_json::Value>,
    tool_choice: ToolChoice,
    skip_tts: bool,
    adapter: Box<dyn LanguageModel>,
}

impl LlmStage {
    pub fn new<A: LanguageModel>(adapter: A, config: LlmConfig) -> Self {
        let conversation = Conversation::new(config.system_prompt.clone());
        let tools = config.tools.clone();
        let tool_choice = config.tool_choice.clone();
        let skip_tts = config.skip_tts;
        Self {
            config,
            conversation,
            tools,
            tool_choice,
            skip_tts,
            adapter: Box::new(adapter),
        }
    }

    /// The conversation context owned by this stage.
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    async fn generate(&mut self, ctx: &StageContext) -> Result<(), StageError> {
        ctx.push(
            Frame::new(FramePayload::LlmResponseStart {
                skip_tts: self.skip_tts,
            }),
            FrameDirection::Downstream,
        );

        let outcome = {
            let Self {
                adapter,
                conversation,
                tools,
                tool_choice,
                config,
                ..
            } = self;
            let request = CompletionRequest {
                messages: conversation.messages(),
                tools: tools.as_slice(),
                tool_choice: &*tool_choice,
                config: &*config,
            };
            adapter.complete(request).await
        };

        let result = match outcome {
            Ok(completion) => {
                if let Some(usage) = &completion.usage {
                    tracing::debug!(
                        prompt_tokens = usage.prompt_tokens,
                        completion_tokens = usage.completion_tokens,
                        "llm usage"
                    );
                }
                // Function calls go out before the text frame.
                for call in completion.function_calls {
                    ctx.push(
                        Frame::new(FramePayload::FunctionCall(call)),
                        FrameDirection::Downstream,
                    );
                }
                if !completion.text.trim().is_empty() {
                    self.conversation.add_assistant(&completion.text);
                    ctx.push(
                        Frame::text_with_skip(completion.text, self.skip_tts),
                        FrameDirection::Downstream,
                    );
                }
                Ok(())
            }
            Err(e) => Err(e),
        };

        // The end frame goes out on every path, adapter errors included.
        ctx.push(
            Frame::new(FramePayload::LlmResponseEnd),
            FrameDirection::Downstream,
        );
        result
    }

    fn apply_settings(&mut self, settings: &HashMap<String, serde_json::Value>) {
        for (key, value) in settings {
            match key.as_str() {
                "model_id" => {
                    if let Some(v) = value.as_str() {
                        self.config.model_id = v.to_string();
                    }
                }
                "max_tokens" => {
                    if let Some(v) = value.as_u64() {
                        self.config.max_tokens = Some(v as u32);
                    }
                }
                "temperature" => {
                    if let Some(v) = value.as_f64() {
                        self.config.temperature = Some(v as f32);
                    }
                }
                "top_p" => {
                    if let Some(v) = value.as_f64() {
                        self.config.top_p = Some(v as f32);
                    }
                }
                "frequency_penalty" => {
                    if let Some(v) = value.as_f64() {
                        self.config.frequency_penalty = Some(v as f32);
                    }
                }
                "presence_penalty" => {
                    if let Some(v) = value.as_f64() {
                        self.config.presence_penalty = Some(v as f32);
                    }
                }
                _ => {}
            }
        }
    }
}

#[async_trait]
impl FrameHandler for LlmStage {
    fn name(&self) -> &'static str {
        "LLM"
    }

    async fn handle_frame(
        &mut self,
        frame: Frame,
        direction: FrameDirection,
        ctx: &StageContext,
    ) -> Result<(), StageError> {
        match frame.payload() {
            FramePayload::Transcription(t) => {
                let text = t.text.clone();
                ctx.push(frame, direction);
                if !text.trim().is_empty() {
                    self.conversation.add_user(&text);
                    self.generate(ctx).await?;
                }
            }
            FramePayload::LlmMessagesAppend { messages, run } => {
                let (messages, run) = (messages.clone(), *run);
                self.conversation.append(messages);
                if run {
                    self.generate(ctx).await?;
                }
            }
            FramePayload::LlmMessagesReplace { messages, run } => {
                let (messages, run) = (messages.clone(), *run);
                self.conversation.replace(messages);
                if run {
                    self.generate(ctx).await?;
                }
            }
            FramePayload::LlmRun => {
                self.generate(ctx).await?;
            }
            FramePayload::LlmSetTools(tools) => {
                self.tools = tools.clone();
            }
            FramePayload::LlmSetToolChoice(choice) => {
                self.tool_choice = choice.clone();
            }
            FramePayload::LlmConfigureOutput { skip_tts } => {
                self.skip_tts = *skip_tts;
            }
            FramePayload::FunctionCallResult(result) => {
                self.conversation
                    .add_function_result(&result.call_id, &result.result);
                self.generate(ctx).await?;
            }
            FramePayload::UpdateSettings(settings) => {
                let settings = settings.clone();
                self.apply_settings(&settings);
                ctx.push(frame, direction);
            }
            _ => ctx.push(frame, direction),
        }
        Ok(())
    }
}
