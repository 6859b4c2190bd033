use std::time::Duration;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use crate::{error::ChatError, message::Message, stream::read_deltas};

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
}

#[derive(Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Deserialize, Default)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Blocking client for an OpenAI-compatible API, authenticated with a bearer token.
pub struct ChatClient {
    http: Client,
    api_addr: String,
    api_key: String,
}

impl ChatClient {
    pub fn new(api_addr: &str, api_key: &str) -> Result<Self, ChatError> {
        // Completions stream for as long as the model talks.
        let http = Client::builder().timeout(None::<Duration>).build()?;
        Ok(Self {
            http,
            api_addr: api_addr.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// Lists model ids containing `filter`, in the order the API returns them.
    pub fn list_models(&self, filter: &str) -> Result<Vec<String>, ChatError> {
        let url = format!("{}/models", self.api_addr);
        log::debug!("GET {}", url);

        let res = self.http.get(&url).bearer_auth(&self.api_key).send()?;
        let status = res.status();
        let body = res.text()?;
        if !status.is_success() {
            return Err(error_from_response(status, &body));
        }

        let models: ModelList = serde_json::from_str(&body)?;
        Ok(models
            .data
            .into_iter()
            .map(|model| model.id)
            .filter(|id| id.contains(filter))
            .collect())
    }

    /// Sends the conversation with `stream: true`, calling `on_delta` with each
    /// piece of text as it arrives. Returns the complete assistant reply.
    pub fn stream_chat<F>(&self, model: &str, messages: &[Message], on_delta: F) -> Result<String, ChatError>
    where
        F: FnMut(&str),
    {
        let url = format!("{}/chat/completions", self.api_addr);
        let request = ChatRequest { model, messages, stream: true };

        if log::log_enabled!(log::Level::Debug) {
            log::debug!("[API request]\n{}", serde_json::to_string_pretty(&request)?);
        }

        let res = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()?;

        let status = res.status();
        if status != StatusCode::OK {
            let body = res.text().unwrap_or_default();
            log::debug!("[API error {}] {}", status.as_u16(), body);
            return Err(error_from_response(status, &body));
        }

        let content = read_deltas(res, on_delta)?;
        log::debug!("[API response] {} chars", content.chars().count());
        Ok(content)
    }
}

/// The remote side of a chat session.
pub trait Backend {
    /// Lists the models `api_key` may use. Also used to verify a key.
    fn list_models(&self, api_key: &str) -> Result<Vec<String>, ChatError>;

    fn stream_chat(
        &self,
        api_key: &str,
        model: &str,
        messages: &[Message],
        on_delta: &mut dyn FnMut(&str),
    ) -> Result<String, ChatError>;
}

/// [`Backend`] talking HTTP to `api_addr`.
pub struct HttpBackend {
    api_addr: String,
    model_filter: String,
}

impl HttpBackend {
    pub fn new(api_addr: &str, model_filter: &str) -> Self {
        Self { api_addr: api_addr.to_string(), model_filter: model_filter.to_string() }
    }
}

impl Backend for HttpBackend {
    fn list_models(&self, api_key: &str) -> Result<Vec<String>, ChatError> {
        verify_api_key(&self.api_addr, api_key, &self.model_filter)
    }

    fn stream_chat(
        &self,
        api_key: &str,
        model: &str,
        messages: &[Message],
        on_delta: &mut dyn FnMut(&str),
    ) -> Result<String, ChatError> {
        ChatClient::new(&self.api_addr, api_key)?.stream_chat(model, messages, on_delta)
    }
}

/// Checks a candidate key by listing models with it. On success the
/// filtered model ids are returned.
pub fn verify_api_key(api_addr: &str, candidate: &str, filter: &str) -> Result<Vec<String>, ChatError> {
    ChatClient::new(api_addr, candidate)?.list_models(filter)
}

/// Maps a failed response to the error shown to the user.
pub fn error_from_response(status: StatusCode, body: &str) -> ChatError {
    let error = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error)
        .unwrap_or_default();

    if error.code.as_deref() == Some("context_length_exceeded") {
        return ChatError::ContextLengthExceeded;
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return ChatError::RateLimited;
    }

    let message = error
        .message
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| match status.canonical_reason() {
            Some(reason) => reason.to_string(),
            None => format!("API request failed with status code: {}", status.as_u16()),
        });
    ChatError::Api { status: status.as_u16(), message }
}
