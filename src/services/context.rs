// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Conversation context owned by the language model stage.

use crate::frames::{ChatMessage, ChatRole};

/// An ordered sequence of conversation messages.
///
/// If a system prompt is configured it is the first element of the context at
/// construction, and it is re-prepended after any replacement that omits a
/// system message.
#[derive(Debug, Clone)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
    system_prompt: Option<String>,
}

impl Conversation {
    /// Create a new context, seeded with the system prompt when given.
    pub fn new(system_prompt: Option<String>) -> Self {
        let mut conversation = Self {
            messages: Vec::new(),
            system_prompt,
        };
        conversation.ensure_system_prompt();
        conversation
    }

    /// The ordered messages.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Number of messages in the context.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the context holds no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append a user message.
    pub fn add_user(&mut self, text: &str) {
        self.messages.push(ChatMessage::user(text));
    }

    /// Append an assistant message.
    pub fn add_assistant(&mut self, text: &str) {
        self.messages.push(ChatMessage::assistant(text));
    }

    /// Append a function-result message.
    ///
    /// The message `name` carries the call identifier the provider uses to
    /// correlate the result with its earlier function call; the content is
    /// the JSON-encoded result value.
    pub fn add_function_result(&mut self, call_id: &str, value: &serde_json::Value) {
        self.messages
            .push(ChatMessage::function(call_id, value.to_string()));
    }

    /// Append a batch of messages.
    pub fn append(&mut self, messages: Vec<ChatMessage>) {
        self.messages.extend(messages);
    }

    /// Replace the context with the given messages.
    ///
    /// Re-prepends the configured system prompt when the replacement carries
    /// no system message of its own.
    pub fn replace(&mut self, messages: Vec<ChatMessage>) {
        self.messages = messages;
        self.ensure_system_prompt();
    }

    fn ensure_system_prompt(&mut self) {
        if let Some(prompt) = &self.system_prompt {
            let has_system = self
                .messages
                .iter()
                .any(|m| m.role == ChatRole::System);
            if !has_system {
                self.messages.insert(0, ChatMessage::system(prompt.clone()));
            }
        }
    }
}
