use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use uuid::Uuid;

// Represents a single role-tagged message sent to the completion service
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String, // "user" or "assistant" - consider an enum later
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

// Whether a turn carries a genuine model reply or a substituted error message
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    Success,
    Error,
}

// One completed (prompt, response) exchange. Turns are immutable once
// appended to a session's history.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ConversationTurn {
    pub prompt: String,
    pub response: String,
    pub outcome: TurnOutcome,
}

impl ConversationTurn {
    pub fn reply(prompt: impl Into<String>, response: impl Into<String>) -> Self {
        ConversationTurn {
            prompt: prompt.into(),
            response: response.into(),
            outcome: TurnOutcome::Success,
        }
    }

    // Error turns take the place a reply would have occupied, with the
    // failure message rendered in the fixed user-facing format.
    pub fn error(prompt: impl Into<String>, message: impl Display) -> Self {
        ConversationTurn {
            prompt: prompt.into(),
            response: format!("❌ Error: {message}"),
            outcome: TurnOutcome::Error,
        }
    }

    pub fn is_error(&self) -> bool {
        self.outcome == TurnOutcome::Error
    }
}

// Credentials a chat session is started with. Fixed for the session's
// lifetime; a missing key is a valid state until a send is attempted.
#[derive(Clone, Debug)]
pub struct SessionCredentials {
    pub api_key: Option<String>,
    pub model: String,
}

impl SessionCredentials {
    /// The key to authenticate with, if one is actually configured.
    /// Empty and whitespace-only values count as absent.
    pub fn effective_api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

// A stored user account
#[derive(Clone, Debug)]
pub struct UserProfile {
    pub username: String,
    pub password: String,
    // Reference to the key, or the key itself - 'keyring', 'env:MY_API_KEY', a literal, or null
    pub api_key_ref: Option<String>,
    pub model: String,
    pub theme: Option<String>,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

// Metadata for one recorded upload
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UploadRecord {
    pub id: Uuid,
    pub filename: String,
    #[serde(default = "Utc::now")]
    pub uploaded_at: DateTime<Utc>,
}
