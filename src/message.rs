use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Builds the leading system message, stamped with `today`.
pub fn system_message(today: NaiveDate) -> Message {
    Message {
        role: Role::System,
        content: format!(
            "You are ChatGPT, a large language model trained by OpenAI. Answer as concisely as possible.\n\
            Knowledge cutoff: 2021-09-01\n\
            Current date: {}",
            today.format("%Y-%m-%d")
        ),
    }
}

pub fn current_system_message() -> Message {
    system_message(chrono::Utc::now().date_naive())
}
