//! Application configuration management

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::services::extractor::LlmExtractorConfig;

/// `SCAN_INTERVAL_MINUTES` value that switches the scanner to a 5 second poll
pub const ACCELERATED_SCAN_INTERVAL: i64 = -666;

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Storage root scanned for video files
    pub storage_path: PathBuf,

    /// Registry JSON document
    pub database_path: PathBuf,

    /// Minutes between scan cycles (see [`Config::scan_interval`])
    pub scan_interval_minutes: i64,

    /// Files modified within this many minutes are left for a later cycle
    pub skip_modification_minutes: u64,

    /// TMDB API key
    pub tmdb_api_key: String,

    /// TMDB response language
    pub tmdb_language: String,

    /// TMDB API base URL
    pub tmdb_base_url: String,

    /// LLM metadata extractor settings
    pub llm: LlmExtractorConfig,

    /// Files per extractor call
    pub scan_batch_size: usize,

    /// Delay between extractor batches
    pub scan_batch_delay: Duration,

    /// Extractor attempts per batch
    pub extract_max_attempts: u32,

    /// Fixed delay between extractor attempts
    pub extract_retry_delay: Duration,

    /// Log output format
    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key/value source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = LlmExtractorConfig::default();

        let storage_path = var("STORAGE_PATH").unwrap_or_else(|| "./data/media".to_string());
        let database_path = var("DATABASE_PATH").unwrap_or_else(|| "./data/db.json".to_string());

        let tmdb_api_key = var("TMDB_API_KEY").context("TMDB_API_KEY is required")?;

        let llm = LlmExtractorConfig {
            api_url: var("LLM_API_URL").unwrap_or(defaults.api_url),
            api_key: var("LLM_API_KEY"),
            model: var("LLM_MODEL").unwrap_or(defaults.model),
            timeout: Duration::from_secs(
                var("LLM_TIMEOUT_MINUTES")
                    .unwrap_or_else(|| "5".to_string())
                    .parse::<u64>()
                    .context("Invalid LLM_TIMEOUT_MINUTES")?
                    * 60,
            ),
            prompt_path: var("LLM_PROMPT_PATH").map(PathBuf::from),
        };

        let scan_batch_size: usize = var("SCAN_BATCH_SIZE")
            .unwrap_or_else(|| "25".to_string())
            .parse()
            .context("Invalid SCAN_BATCH_SIZE")?;
        if scan_batch_size == 0 {
            anyhow::bail!("SCAN_BATCH_SIZE must be greater than zero");
        }

        let extract_max_attempts: u32 = var("EXTRACT_MAX_ATTEMPTS")
            .unwrap_or_else(|| "3".to_string())
            .parse()
            .context("Invalid EXTRACT_MAX_ATTEMPTS")?;
        if extract_max_attempts == 0 {
            anyhow::bail!("EXTRACT_MAX_ATTEMPTS must be at least 1");
        }

        let log_format = match var("LOG_FORMAT").as_deref() {
            None | Some("json") => LogFormat::Json,
            Some("pretty") => LogFormat::Pretty,
            Some(other) => anyhow::bail!("Invalid LOG_FORMAT: {}", other),
        };

        Ok(Self {
            storage_path: PathBuf::from(storage_path),

            database_path: PathBuf::from(database_path),

            scan_interval_minutes: var("SCAN_INTERVAL_MINUTES")
                .unwrap_or_else(|| "60".to_string())
                .parse()
                .context("Invalid SCAN_INTERVAL_MINUTES")?,

            skip_modification_minutes: var("SKIP_MODIFICATION_MINUTES")
                .unwrap_or_else(|| "60".to_string())
                .parse()
                .context("Invalid SKIP_MODIFICATION_MINUTES")?,

            tmdb_api_key,

            tmdb_language: var("TMDB_LANG").unwrap_or_else(|| "en-US".to_string()),

            tmdb_base_url: var("TMDB_BASE_URL")
                .unwrap_or_else(|| "https://api.themoviedb.org/3".to_string()),

            llm,

            scan_batch_size,

            scan_batch_delay: Duration::from_secs(
                var("SCAN_BATCH_DELAY_SECS")
                    .unwrap_or_else(|| "3".to_string())
                    .parse()
                    .context("Invalid SCAN_BATCH_DELAY_SECS")?,
            ),

            extract_max_attempts,

            extract_retry_delay: Duration::from_secs(
                var("EXTRACT_RETRY_DELAY_SECS")
                    .unwrap_or_else(|| "5".to_string())
                    .parse()
                    .context("Invalid EXTRACT_RETRY_DELAY_SECS")?,
            ),

            log_format,
        })
    }

    /// Time between scan cycles: the accelerated value polls every 5 seconds,
    /// anything else at or below zero falls back to one minute.
    pub fn scan_interval(&self) -> Duration {
        match self.scan_interval_minutes {
            ACCELERATED_SCAN_INTERVAL => Duration::from_secs(5),
            m if m <= 0 => Duration::from_secs(60),
            m => Duration::from_secs((m as u64).saturating_mul(60)),
        }
    }
}
