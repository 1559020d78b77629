//! Immutable typed message envelopes.
//!
//! An [`Envelope`] is the unit of output produced by one node dispatch.
//! Constructors validate that the body shape matches the declared content
//! type; after construction an envelope never changes — the `with_*` helpers
//! return copies.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{NodeError, NodeResult};

// ================================
// ContentType
// ================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Structured,
    ConversationState,
    Error,
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContentType::Text => "text",
            ContentType::Structured => "structured",
            ContentType::ConversationState => "conversation_state",
            ContentType::Error => "error",
        };
        write!(f, "{}", s)
    }
}

// ================================
// Envelope
// ================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub produced_by: String,
    pub content_type: ContentType,
    pub body: Value,
    #[serde(default)]
    pub meta: HashMap<String, Value>,
    /// Unix milliseconds at creation.
    pub timestamp: i64,
}

impl Envelope {
    /// Create an envelope, validating the body shape against the content type.
    pub fn new(
        produced_by: impl Into<String>,
        content_type: ContentType,
        body: Value,
        meta: HashMap<String, Value>,
        timestamp: i64,
    ) -> NodeResult<Self> {
        validate_body(content_type, &body)?;
        Ok(Envelope {
            id: uuid::Uuid::new_v4().to_string(),
            produced_by: produced_by.into(),
            content_type,
            body,
            meta,
            timestamp,
        })
    }

    pub fn text(produced_by: impl Into<String>, content: impl Into<String>, timestamp: i64) -> Self {
        Envelope {
            id: uuid::Uuid::new_v4().to_string(),
            produced_by: produced_by.into(),
            content_type: ContentType::Text,
            body: Value::String(content.into()),
            meta: HashMap::new(),
            timestamp,
        }
    }

    pub fn structured(produced_by: impl Into<String>, body: Value, timestamp: i64) -> Self {
        Envelope {
            id: uuid::Uuid::new_v4().to_string(),
            produced_by: produced_by.into(),
            content_type: ContentType::Structured,
            body,
            meta: HashMap::new(),
            timestamp,
        }
    }

    /// Conversation-state envelope: body must be an object with a `messages` array.
    pub fn conversation(
        produced_by: impl Into<String>,
        state: Value,
        timestamp: i64,
    ) -> NodeResult<Self> {
        validate_body(ContentType::ConversationState, &state)?;
        Ok(Envelope {
            id: uuid::Uuid::new_v4().to_string(),
            produced_by: produced_by.into(),
            content_type: ContentType::ConversationState,
            body: state,
            meta: HashMap::new(),
            timestamp,
        })
    }

    /// Error envelope carrying a routed failure. Body is the error message;
    /// meta records the error kind so consumers can branch on it.
    pub fn error(
        produced_by: impl Into<String>,
        message: impl Into<String>,
        error_kind: &str,
        timestamp: i64,
    ) -> Self {
        let message = message.into();
        let mut meta = HashMap::new();
        meta.insert("is_error".to_string(), Value::Bool(true));
        meta.insert(
            "error_type".to_string(),
            Value::String(error_kind.to_string()),
        );
        Envelope {
            id: uuid::Uuid::new_v4().to_string(),
            produced_by: produced_by.into(),
            content_type: ContentType::Error,
            body: Value::String(message),
            meta,
            timestamp,
        }
    }

    pub fn is_error(&self) -> bool {
        self.content_type == ContentType::Error
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    pub fn with_iteration(self, iteration: u32) -> Self {
        self.with_meta("iteration", Value::from(iteration))
    }

    pub fn with_branch(self, branch: impl Into<String>) -> Self {
        self.with_meta("branch", Value::String(branch.into()))
    }

    pub fn branch(&self) -> Option<&str> {
        self.meta.get("branch").and_then(|v| v.as_str())
    }

    /// Strict text accessor.
    pub fn as_text(&self) -> NodeResult<&str> {
        match (self.content_type, &self.body) {
            (ContentType::Text, Value::String(s)) | (ContentType::Error, Value::String(s)) => {
                Ok(s)
            }
            _ => Err(NodeError::Validation(format!(
                "envelope from '{}' is not text, got {}",
                self.produced_by, self.content_type
            ))),
        }
    }

    /// Strict structured accessor.
    pub fn as_structured(&self) -> NodeResult<&Value> {
        if self.content_type != ContentType::Structured {
            return Err(NodeError::Validation(format!(
                "envelope from '{}' is not structured, got {}",
                self.produced_by, self.content_type
            )));
        }
        Ok(&self.body)
    }

    pub fn as_conversation(&self) -> NodeResult<&Value> {
        if self.content_type != ContentType::ConversationState {
            return Err(NodeError::Validation(format!(
                "envelope from '{}' is not conversation_state, got {}",
                self.produced_by, self.content_type
            )));
        }
        Ok(&self.body)
    }

    /// Lenient string rendering, used by templates and logs.
    pub fn to_display_string(&self) -> String {
        match &self.body {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => serde_json::to_string(other).unwrap_or_default(),
        }
    }
}

fn validate_body(content_type: ContentType, body: &Value) -> NodeResult<()> {
    let ok = match content_type {
        ContentType::Text | ContentType::Error => body.is_string(),
        ContentType::Structured => !body.is_null(),
        ContentType::ConversationState => body
            .as_object()
            .is_some_and(|o| o.get("messages").is_some_and(Value::is_array)),
    };
    if ok {
        Ok(())
    } else {
        Err(NodeError::Validation(format!(
            "body shape does not match content type {}",
            content_type
        )))
    }
}
