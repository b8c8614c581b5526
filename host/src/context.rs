// Context filtering. Intermediate tool results never reach the model's
// message history; only aggregate results from the code-execution tool are
// admitted. Per conversation, reset explicitly.

use serde_json::Value;

use crate::caller::CODE_EXECUTION_TOOL_NAME;
use crate::savings::estimate_tokens;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    ToolResult,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Set on tool-result messages.
    pub tool_name: Option<String>,
    pub tool_result: Option<Value>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_name: None,
            tool_result: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_name: None,
            tool_result: None,
        }
    }

    pub fn tool_result(tool_name: impl Into<String>, result: Value) -> Self {
        Self {
            role: Role::ToolResult,
            content: String::new(),
            tool_name: Some(tool_name.into()),
            tool_result: Some(result),
        }
    }
}

#[derive(Debug, Default)]
pub struct ContextFilter {
    tokens_saved: u64,
    suppressed_calls: u64,
}

impl ContextFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pass-through for user and assistant messages; tool results are
    /// admitted only for the code-execution tool. Dropped results add their
    /// estimated size to the running savings counter.
    pub fn admit(&mut self, message: Message) -> Option<Message> {
        match message.role {
            Role::User | Role::Assistant => Some(message),
            Role::ToolResult => {
                if message.tool_name.as_deref() == Some(CODE_EXECUTION_TOOL_NAME) {
                    return Some(message);
                }
                let estimate = match &message.tool_result {
                    Some(result) => estimate_tokens(result),
                    None => (message.content.len() as u64).div_ceil(4),
                };
                self.tokens_saved += estimate;
                self.suppressed_calls += 1;
                None
            }
        }
    }

    /// Filtered history: always a subsequence of the input.
    pub fn apply(&mut self, messages: Vec<Message>) -> Vec<Message> {
        messages.into_iter().filter_map(|m| self.admit(m)).collect()
    }

    pub fn tokens_saved(&self) -> u64 {
        self.tokens_saved
    }

    pub fn suppressed_calls(&self) -> u64 {
        self.suppressed_calls
    }

    /// Compact line for assistant narration.
    pub fn summary(&self, tool_name: &str, call_count: usize) -> String {
        format!(
            "Executed {tool_name}: {call_count} tool calls, saved {} tokens",
            self.tokens_saved
        )
    }

    pub fn reset(&mut self) {
        self.tokens_saved = 0;
        self.suppressed_calls = 0;
    }
}
