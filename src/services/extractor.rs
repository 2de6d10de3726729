//! Metadata extraction for batches of file paths
//!
//! Two implementations sit behind [`MetadataExtractor`]:
//! - [`LlmMetadataExtractor`] asks an OpenAI-compatible chat endpoint to
//!   label a whole batch in one request
//! - [`FilenameMetadataExtractor`] runs the local filename parser and never
//!   fails
//!
//! Which one is used is decided once at startup by [`create_metadata_extractor`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::filename_parser::parse_media_path;
use crate::config::Config;

/// Best-guess metadata for one file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedMetadata {
    pub file_path: String,
    pub title: String,
    pub original_title: Option<String>,
    pub season_number: Option<i32>,
    pub episode_number: Option<i32>,
    pub episode_name: Option<String>,
    pub year: Option<i32>,
}

impl ExtractedMetadata {
    /// Both season and episode are known
    pub fn is_episode(&self) -> bool {
        self.season_number.is_some() && self.episode_number.is_some()
    }

    pub fn has_title(&self) -> bool {
        !self.title.trim().is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractorError {
    #[error("extractor request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("extractor returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed extractor response: {0}")]
    MalformedResponse(String),

    #[error("failed to read system prompt: {0}")]
    Io(#[from] std::io::Error),
}

/// Batch metadata extraction
#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    /// Extract metadata for `file_paths`. Results are correlated by
    /// `file_path`; implementations may return fewer or more records.
    async fn extract(&self, file_paths: &[String]) -> Result<Vec<ExtractedMetadata>, ExtractorError>;
}

// =============================================================================
// Filename parser
// =============================================================================

/// Offline extractor backed by the filename parser
#[derive(Debug, Default, Clone, Copy)]
pub struct FilenameMetadataExtractor;

#[async_trait]
impl MetadataExtractor for FilenameMetadataExtractor {
    async fn extract(&self, file_paths: &[String]) -> Result<Vec<ExtractedMetadata>, ExtractorError> {
        Ok(file_paths
            .iter()
            .map(|path| {
                let parsed = parse_media_path(path);
                ExtractedMetadata {
                    file_path: path.clone(),
                    title: parsed.title.unwrap_or_default(),
                    original_title: None,
                    season_number: parsed.season,
                    episode_number: parsed.episode,
                    episode_name: parsed.episode_name,
                    year: parsed.year,
                }
            })
            .collect())
    }
}

// =============================================================================
// LLM
// =============================================================================

const DEFAULT_SYSTEM_PROMPT: &str = r#"You label video files from their paths.
The user sends a JSON array of absolute file paths inside a ```json fence.
Answer with a JSON array inside a ```json fence, one object per input path, in the same order:
{"FilePath": "<the input path, unchanged>", "Title": "<clean title, original language if obvious>", "OriginalTitle": null, "SeasonNumber": null, "EpisodeNumber": null, "EpisodeName": null, "Year": null}
Use null for anything not present. Numbers are plain integers. Use the folder names when the file name alone is ambiguous.
Do not add commentary outside the fence."#;

/// Settings for [`LlmMetadataExtractor`]
#[derive(Debug, Clone)]
pub struct LlmExtractorConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
    /// Optional file replacing the built-in system prompt
    pub prompt_path: Option<PathBuf>,
}

impl Default for LlmExtractorConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.groq.com/openai/v1/chat/completions".to_string(),
            api_key: None,
            model: "qwen/qwen3-32b".to_string(),
            timeout: Duration::from_secs(5 * 60),
            prompt_path: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// One record as the model writes it, keys lower-cased before decoding
#[derive(Debug, Default, Deserialize)]
struct RawRecord {
    #[serde(default, rename = "filepath", alias = "filename", alias = "path")]
    file_path: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default, rename = "originaltitle")]
    original_title: Option<String>,
    #[serde(default, rename = "seasonnumber", alias = "season", deserialize_with = "lenient_int")]
    season_number: Option<i32>,
    #[serde(default, rename = "episodenumber", alias = "episode", deserialize_with = "lenient_int")]
    episode_number: Option<i32>,
    #[serde(default, rename = "episodename")]
    episode_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_int")]
    year: Option<i32>,
}

/// Accept integers, numeric strings and null
fn lenient_int<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_i64().and_then(|v| i32::try_from(v).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

static FENCED_ARRAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```json\s*(\[\s*\{.*?\}\s*\]).*?```").expect("valid fenced json regex")
});
static THINK_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid think regex"));

/// Extractor backed by an OpenAI-compatible chat completions endpoint
pub struct LlmMetadataExtractor {
    client: reqwest::Client,
    config: LlmExtractorConfig,
    system_prompt: OnceCell<String>,
}

impl LlmMetadataExtractor {
    pub fn new(config: LlmExtractorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to create LLM HTTP client")?;

        Ok(Self {
            client,
            config,
            system_prompt: OnceCell::new(),
        })
    }

    async fn system_prompt(&self) -> Result<&str, ExtractorError> {
        let prompt = self
            .system_prompt
            .get_or_try_init(|| async {
                match &self.config.prompt_path {
                    Some(path) => tokio::fs::read_to_string(path).await,
                    None => Ok(DEFAULT_SYSTEM_PROMPT.to_string()),
                }
            })
            .await?;
        Ok(prompt.as_str())
    }

    async fn send(&self, file_paths: &[String]) -> Result<String, ExtractorError> {
        let input = serde_json::to_string(file_paths)
            .map_err(|e| ExtractorError::MalformedResponse(e.to_string()))?;

        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: self.system_prompt().await?.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: format!("```json {} ```", input),
                },
            ],
        };

        let mut builder = self.client.post(&self.config.api_url).json(&request);
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let chat: ChatResponse = response.json().await?;
        chat.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                ExtractorError::MalformedResponse("response has no choices or empty content".to_string())
            })
    }
}

#[async_trait]
impl MetadataExtractor for LlmMetadataExtractor {
    async fn extract(&self, file_paths: &[String]) -> Result<Vec<ExtractedMetadata>, ExtractorError> {
        if file_paths.is_empty() {
            return Ok(Vec::new());
        }

        debug!(count = file_paths.len(), model = %self.config.model, "Sending batch to LLM");
        let content = self.send(file_paths).await?;
        let records = parse_records(&content)?;

        info!(
            requested = file_paths.len(),
            returned = records.len(),
            "LLM extracted metadata"
        );
        Ok(records)
    }
}

/// Find the JSON array in a chat reply
fn extract_json_array(content: &str) -> Result<&str, ExtractorError> {
    if let Some(array) = FENCED_ARRAY.captures(content).and_then(|caps| caps.get(1)) {
        return Ok(array.as_str());
    }

    match (content.find('['), content.rfind(']')) {
        (Some(start), Some(end)) if start < end => Ok(&content[start..=end]),
        _ => Err(ExtractorError::MalformedResponse(
            "no JSON array found in reply".to_string(),
        )),
    }
}

fn lowercase_keys(object: Map<String, Value>) -> Map<String, Value> {
    object
        .into_iter()
        .map(|(key, value)| (key.to_lowercase().replace('_', ""), value))
        .collect()
}

/// Decode the model's reply into metadata records
fn parse_records(content: &str) -> Result<Vec<ExtractedMetadata>, ExtractorError> {
    let content = THINK_BLOCK.replace_all(content, "");
    let json = extract_json_array(&content)?;
    let values: Vec<Value> = serde_json::from_str(json)
        .map_err(|e| ExtractorError::MalformedResponse(format!("invalid JSON array: {}", e)))?;

    let mut records = Vec::with_capacity(values.len());
    for value in values {
        let Value::Object(object) = value else {
            warn!("Skipping non-object entry in LLM reply");
            continue;
        };
        let raw: RawRecord = match serde_json::from_value(Value::Object(lowercase_keys(object))) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Skipping undecodable entry in LLM reply");
                continue;
            }
        };
        let Some(file_path) = raw.file_path.filter(|p| !p.trim().is_empty()) else {
            warn!(title = ?raw.title, "Skipping LLM entry without a file path");
            continue;
        };

        records.push(ExtractedMetadata {
            file_path,
            title: raw.title.unwrap_or_default().trim().to_string(),
            original_title: raw.original_title.filter(|t| !t.trim().is_empty()),
            season_number: raw.season_number,
            episode_number: raw.episode_number,
            episode_name: raw.episode_name.filter(|n| !n.trim().is_empty()),
            year: raw.year,
        });
    }

    Ok(records)
}

// =============================================================================
// Selection
// =============================================================================

/// LLM extractor when an API key is configured, the filename parser otherwise
pub fn create_metadata_extractor(config: &Config) -> Result<Arc<dyn MetadataExtractor>> {
    match config.llm.api_key.as_deref() {
        Some(key) if !key.trim().is_empty() => {
            info!(url = %config.llm.api_url, model = %config.llm.model, "Using LLM metadata extractor");
            Ok(Arc::new(LlmMetadataExtractor::new(config.llm.clone())?))
        }
        _ => {
            info!("No LLM API key configured, using filename metadata extractor");
            Ok(Arc::new(FilenameMetadataExtractor))
        }
    }
}
