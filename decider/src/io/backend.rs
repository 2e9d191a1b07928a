//! Backend abstraction for structured text generation.
//!
//! The [`Backend`] trait decouples stage agents from the actual generator. Two
//! implementations ship: [`OfflineBackend`] synthesizes schema-conformant placeholder
//! values with no external call, and [`RemoteBackend`] calls an OpenAI-compatible chat
//! endpoint. [`FallbackBackend`] wraps a primary backend and answers from the offline
//! backend whenever the primary fails. Tests use scripted backends from `test_support`.

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{NEUTRAL_TEXT, ProviderLabel, Stage};
use crate::io::config::{DeciderConfig, Provider, RemoteConfig};

/// Parameters for one generation call.
#[derive(Debug, Clone, Copy)]
pub struct GenerateRequest<'a> {
    pub stage: Stage,
    /// Rendered prompt text.
    pub prompt: &'a str,
    /// JSON Schema the reply must satisfy.
    pub schema: &'a Value,
}

/// Raw structured output plus where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub value: Value,
    pub provider: ProviderLabel,
    /// Originating error when the offline backend stood in for a failed primary.
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("authentication rejected (HTTP {0})")]
    Auth(u16),
    #[error("unexpected HTTP status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed reply: {0}")]
    MalformedReply(String),
    #[error("reply violates schema: {}", .0.join("; "))]
    SchemaViolation(Vec<String>),
}

/// Abstraction over generation backends.
pub trait Backend: Send + Sync {
    /// Provider label recorded for successful calls.
    fn label(&self) -> ProviderLabel;

    /// Produce a JSON value for `request.schema`.
    fn generate(&self, request: &GenerateRequest<'_>) -> Result<Generation, BackendError>;
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn label(&self) -> ProviderLabel {
        (**self).label()
    }

    fn generate(&self, request: &GenerateRequest<'_>) -> Result<Generation, BackendError> {
        (**self).generate(request)
    }
}

/// Deterministic backend that walks the schema and fills in defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineBackend;

impl OfflineBackend {
    /// Synthesize a value conforming to `schema`. Total over any JSON input.
    pub fn synthesize(schema: &Value) -> Value {
        synthesize_node(schema, schema, 0)
    }
}

impl Backend for OfflineBackend {
    fn label(&self) -> ProviderLabel {
        ProviderLabel::Offline
    }

    fn generate(&self, request: &GenerateRequest<'_>) -> Result<Generation, BackendError> {
        debug!(stage = %request.stage, "offline generation");
        Ok(Generation {
            value: Self::synthesize(request.schema),
            provider: ProviderLabel::Offline,
            fallback_reason: None,
        })
    }
}

const MAX_SCHEMA_DEPTH: usize = 16;

fn synthesize_node(node: &Value, root: &Value, depth: usize) -> Value {
    if depth > MAX_SCHEMA_DEPTH {
        return Value::Null;
    }
    let Some(obj) = node.as_object() else {
        return Value::Null;
    };
    if let Some(default) = obj.get("default") {
        return default.clone();
    }
    if let Some(first) = obj
        .get("enum")
        .and_then(Value::as_array)
        .and_then(|members| members.first())
    {
        return first.clone();
    }
    if let Some(target) = obj
        .get("$ref")
        .and_then(Value::as_str)
        .and_then(|reference| reference.strip_prefix('#'))
        .and_then(|pointer| root.pointer(pointer))
    {
        return synthesize_node(target, root, depth + 1);
    }
    match schema_type(obj) {
        Some("object") => {
            let mut out = Map::new();
            if let Some(properties) = obj.get("properties").and_then(Value::as_object) {
                for (key, child) in properties {
                    out.insert(key.clone(), synthesize_node(child, root, depth + 1));
                }
            }
            Value::Object(out)
        }
        Some("array") => {
            let min_items = obj.get("minItems").and_then(Value::as_u64).unwrap_or(0);
            let item = obj.get("items").unwrap_or(&Value::Null);
            Value::Array(
                (0..min_items)
                    .map(|_| synthesize_node(item, root, depth + 1))
                    .collect(),
            )
        }
        Some("string") => Value::String(NEUTRAL_TEXT.to_string()),
        Some("integer") => Value::from(midpoint(obj).round() as i64),
        Some("number") => Value::from(midpoint(obj)),
        Some("boolean") => Value::Bool(false),
        _ => Value::Null,
    }
}

/// First non-null entry of `type`, whether given as a string or an array.
fn schema_type(obj: &Map<String, Value>) -> Option<&str> {
    match obj.get("type")? {
        Value::String(kind) => Some(kind.as_str()),
        Value::Array(kinds) => kinds
            .iter()
            .filter_map(Value::as_str)
            .find(|kind| *kind != "null")
            .or(Some("null")),
        _ => None,
    }
}

fn midpoint(obj: &Map<String, Value>) -> f64 {
    let min = obj.get("minimum").and_then(Value::as_f64);
    let max = obj.get("maximum").and_then(Value::as_f64);
    match (min, max) {
        (Some(min), Some(max)) => min + (max - min) / 2.0,
        (Some(min), None) => min,
        (None, Some(max)) => max.min(0.0),
        (None, None) => 0.0,
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

const ERROR_BODY_LIMIT: usize = 500;

/// Backend calling an OpenAI-compatible `chat/completions` endpoint.
pub struct RemoteBackend {
    client: reqwest::blocking::Client,
    url: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

impl std::fmt::Debug for RemoteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteBackend")
            .field("url", &self.url)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RemoteBackend {
    pub fn new(remote: &RemoteConfig, api_key: String) -> Result<Self> {
        let timeout = remote.timeout();
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            url: format!("{}/chat/completions", remote.endpoint.trim_end_matches('/')),
            model: remote.model.clone(),
            api_key,
            timeout,
        })
    }

    fn system_prompt(schema: &Value) -> String {
        format!(
            "Reply with exactly one JSON object that satisfies this JSON Schema. \
             No prose, no Markdown fences.\n{schema}"
        )
    }

    fn send(&self, request: &GenerateRequest<'_>) -> Result<String, BackendError> {
        let system = Self::system_prompt(request.schema);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &system,
                },
                ChatMessage {
                    role: "user",
                    content: request.prompt,
                },
            ],
            temperature: 0.2,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|err| {
                if err.is_timeout() {
                    BackendError::Timeout(self.timeout)
                } else {
                    BackendError::Transport(err.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(BackendError::Auth(status.as_u16()));
        }
        if !status.is_success() {
            let mut body = response.text().unwrap_or_default();
            truncate_at_char_boundary(&mut body, ERROR_BODY_LIMIT);
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply: ChatResponse = response
            .json()
            .map_err(|err| BackendError::MalformedReply(format!("decode response: {err}")))?;
        reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| BackendError::MalformedReply("reply has no content".to_string()))
    }
}

impl Backend for RemoteBackend {
    fn label(&self) -> ProviderLabel {
        ProviderLabel::Remote
    }

    #[instrument(skip_all, fields(stage = %request.stage, model = %self.model))]
    fn generate(&self, request: &GenerateRequest<'_>) -> Result<Generation, BackendError> {
        info!("calling remote backend");
        let content = self.send(request)?;
        let value = extract_json(&content).ok_or_else(|| {
            BackendError::MalformedReply("reply contains no JSON object".to_string())
        })?;
        let violations = schema_violations(request.schema, &value)?;
        if !violations.is_empty() {
            return Err(BackendError::SchemaViolation(violations));
        }
        debug!("remote reply validated");
        Ok(Generation {
            value,
            provider: ProviderLabel::Remote,
            fallback_reason: None,
        })
    }
}

fn truncate_at_char_boundary(text: &mut String, limit: usize) {
    if text.len() <= limit {
        return;
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

/// Parse `content` as JSON, or pull out the outermost `{...}` span when prose surrounds it.
pub(crate) fn extract_json(content: &str) -> Option<Value> {
    static OBJECT_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("object regex is valid"));

    let trimmed = content.trim();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }
    let span = OBJECT_RE.find(trimmed)?;
    match serde_json::from_str::<Value>(span.as_str()) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

fn schema_violations(schema: &Value, value: &Value) -> Result<Vec<String>, BackendError> {
    let validator = jsonschema::options()
        .with_draft(jsonschema::Draft::Draft202012)
        .build(schema)
        .map_err(|err| BackendError::MalformedReply(format!("invalid schema: {err}")))?;
    Ok(validator
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect())
}

/// Wraps a primary backend; any primary error is answered once by the offline backend.
#[derive(Debug)]
pub struct FallbackBackend<P> {
    primary: P,
    offline: OfflineBackend,
}

impl<P: Backend> FallbackBackend<P> {
    pub fn new(primary: P) -> Self {
        Self {
            primary,
            offline: OfflineBackend,
        }
    }
}

impl<P: Backend> Backend for FallbackBackend<P> {
    fn label(&self) -> ProviderLabel {
        self.primary.label()
    }

    fn generate(&self, request: &GenerateRequest<'_>) -> Result<Generation, BackendError> {
        match self.primary.generate(request) {
            Ok(generation) => Ok(generation),
            Err(err) => {
                warn!(stage = %request.stage, error = %err, "primary backend failed; using offline fallback");
                let mut generation = self.offline.generate(request)?;
                generation.fallback_reason = Some(err.to_string());
                Ok(generation)
            }
        }
    }
}

/// Build the backend selected by `cfg`, reading credentials from the environment.
pub fn select_backend(cfg: &DeciderConfig) -> Result<Box<dyn Backend>> {
    select_backend_with_key(cfg, cfg.remote.api_key())
}

/// Build the backend selected by `cfg` with an explicit credential.
///
/// A remote provider without a credential deterministically selects the offline backend.
pub fn select_backend_with_key(
    cfg: &DeciderConfig,
    api_key: Option<String>,
) -> Result<Box<dyn Backend>> {
    match (cfg.provider, api_key) {
        (Provider::Remote, Some(key)) => {
            info!(endpoint = %cfg.remote.endpoint, model = %cfg.remote.model, "using remote backend with offline fallback");
            let remote = RemoteBackend::new(&cfg.remote, key)?;
            Ok(Box::new(FallbackBackend::new(remote)))
        }
        (Provider::Remote, None) => {
            info!(
                env = %cfg.remote.api_key_env,
                "no remote credential; using offline backend"
            );
            Ok(Box::new(OfflineBackend))
        }
        (Provider::Offline, _) => Ok(Box::new(OfflineBackend)),
    }
}
