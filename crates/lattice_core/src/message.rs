//! Chat message model shared by the LLM interfaces and the memory
//! engine.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Message author role.
/// This is the CANONICAL definition - use this everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
    Function,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
            Role::Function => "function",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One typed part of a multi-part message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    ImageUrl {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    Audio {
        url: String,
    },
    File {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    /// Textual rendering of this part for prompt assembly.
    pub fn rendered(&self) -> String {
        match self {
            ContentPart::Text { text } => text.clone(),
            ContentPart::ImageUrl { url, .. } => format!("[image] {url}"),
            ContentPart::Audio { url } => format!("[audio] {url}"),
            ContentPart::File { url, name } => match name {
                Some(name) => format!("[file] {name} ({url})"),
                None => format!("[file] {url}"),
            },
        }
    }
}

/// A function invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments, kept verbatim.
    pub arguments: String,
}

/// A tool call attached to an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    /// When non-empty this supersedes `content` for prompt rendering.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub multi_content: Vec<ContentPart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Free-form markers, e.g. `summarized=true`.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            multi_content: Vec::new(),
            name: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
            metadata: Map::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }

    /// Body used for prompt rendering: `multi_content` wins when present.
    pub fn rendered_content(&self) -> String {
        if self.multi_content.is_empty() {
            return self.content.clone();
        }
        self.multi_content
            .iter()
            .map(ContentPart::rendered)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Metadata value as a bool; absent or non-bool reads as false.
    pub fn metadata_flag(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
        let role: Role = serde_json::from_str("\"tool\"").unwrap();
        assert_eq!(role, Role::Tool);
    }

    #[test]
    fn multi_content_supersedes_content() {
        let mut msg = Message::user("plain");
        assert_eq!(msg.rendered_content(), "plain");

        msg.multi_content = vec![
            ContentPart::text("part one"),
            ContentPart::ImageUrl {
                url: "https://example.com/x.png".into(),
                detail: None,
            },
        ];
        let rendered = msg.rendered_content();
        assert!(rendered.starts_with("part one"));
        assert!(rendered.contains("[image] https://example.com/x.png"));
        assert!(!rendered.contains("plain"));
    }

    #[test]
    fn message_round_trips_with_tool_calls() {
        let msg = Message::assistant("")
            .with_metadata("summarized", true);
        let mut msg = msg;
        msg.tool_calls.push(ToolCall {
            id: "call-1".into(),
            call_type: "function".into(),
            function: FunctionCall {
                name: "lookup".into(),
                arguments: "{\"q\":\"rust\"}".into(),
            },
        });

        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
        assert!(back.metadata_flag("summarized"));
    }
}
