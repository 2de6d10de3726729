//! TMDB (The Movie Database) API client
//!
//! Base URL: https://api.themoviedb.org/3
//!
//! Rate limiting: TMDB allows ~40 requests per 10 seconds.
//! This client uses rate limiting and retry logic to handle this gracefully.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use serde::de::DeserializeOwned;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::rate_limiter::{RateLimitedClient, ResponseExt, RetryConfig, retry_async_when};
use crate::db::MediaType;

/// One search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogCandidate {
    pub id: u64,
    pub title: String,
    pub original_title: Option<String>,
    /// Release year (movies) or first-air year (series)
    pub year: Option<i32>,
    pub popularity: f64,
}

/// Canonical title details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogTitle {
    pub id: u64,
    pub title: String,
    pub original_title: Option<String>,
    pub year: Option<i32>,
}

/// Canonical episode details
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEpisode {
    pub season_number: i32,
    pub episode_number: i32,
    pub name: Option<String>,
}

/// Title search parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSearch {
    pub media_type: MediaType,
    pub title: String,
    pub year: Option<i32>,
    pub language: Option<String>,
}

/// Request/response access to an external movie/TV catalog
#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn search(&self, search: &CatalogSearch) -> Result<Vec<CatalogCandidate>>;

    /// `Ok(None)` when the catalog has no such id
    async fn details(&self, media_type: MediaType, id: u64) -> Result<Option<CatalogTitle>>;

    /// Episode details; missing data is `Ok(None)`, never an error
    async fn episode(&self, series_id: u64, season: i32, episode: i32) -> Result<Option<CatalogEpisode>>;
}

#[derive(Debug, Deserialize)]
struct TmdbSearchResponse {
    #[serde(default)]
    results: Vec<TmdbSearchItem>,
}

/// Movie and series results share one shape; movies fill `title`, series `name`
#[derive(Debug, Deserialize)]
struct TmdbSearchItem {
    id: u64,
    title: Option<String>,
    name: Option<String>,
    original_title: Option<String>,
    original_name: Option<String>,
    release_date: Option<String>,
    first_air_date: Option<String>,
    popularity: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TmdbTitleDetails {
    id: u64,
    title: Option<String>,
    name: Option<String>,
    original_title: Option<String>,
    original_name: Option<String>,
    release_date: Option<String>,
    first_air_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TmdbEpisodeDetails {
    season_number: i32,
    episode_number: i32,
    name: Option<String>,
}

/// Year of a TMDB `YYYY-MM-DD` date; empty strings are common
fn year_of(date: Option<&str>) -> Option<i32> {
    date.filter(|d| !d.is_empty())
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .map(|d| d.year())
}

impl From<TmdbSearchItem> for CatalogCandidate {
    fn from(item: TmdbSearchItem) -> Self {
        Self {
            id: item.id,
            title: item.title.or(item.name).unwrap_or_default(),
            original_title: item.original_title.or(item.original_name),
            year: year_of(item.release_date.as_deref().or(item.first_air_date.as_deref())),
            popularity: item.popularity.unwrap_or(0.0),
        }
    }
}

impl From<TmdbTitleDetails> for CatalogTitle {
    fn from(details: TmdbTitleDetails) -> Self {
        Self {
            id: details.id,
            title: details.title.or(details.name).unwrap_or_default(),
            original_title: details.original_title.or(details.original_name),
            year: year_of(
                details
                    .release_date
                    .as_deref()
                    .or(details.first_air_date.as_deref()),
            ),
        }
    }
}

/// Failure of a single TMDB request
#[derive(Debug, Error)]
enum RequestError {
    #[error("TMDB API key is invalid")]
    Unauthorized,

    #[error("TMDB request failed with status: {status}")]
    Status { status: StatusCode, transient: bool },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RequestError {
    /// Rejected keys and client errors fail the same way on every attempt
    fn is_retryable(&self) -> bool {
        match self {
            Self::Unauthorized => false,
            Self::Status { transient, .. } => *transient,
            Self::Other(_) => true,
        }
    }
}

/// TMDB API client with rate limiting and retry logic
pub struct TmdbClient {
    client: Arc<RateLimitedClient>,
    base_url: String,
    api_key: String,
    language: String,
    retry_config: RetryConfig,
}

impl TmdbClient {
    pub fn new(api_key: String, language: String, base_url: String) -> Result<Self> {
        Ok(Self {
            client: Arc::new(RateLimitedClient::for_tmdb()?),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            language,
            retry_config: RetryConfig {
                max_retries: 3,
                initial_interval: Duration::from_millis(500),
                max_interval: Duration::from_secs(10),
                multiplier: 2.0,
                ..Default::default()
            },
        })
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    /// Check if the client has a valid API key configured
    pub fn has_api_key(&self) -> bool {
        !self.api_key.is_empty()
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// GET `path` with retries. A 404 is `Ok(None)`.
    async fn get_json<T>(
        &self,
        path: &str,
        mut params: Vec<(&'static str, String)>,
        operation: &str,
    ) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        if !self.has_api_key() {
            anyhow::bail!("TMDB API key not configured");
        }

        let url = format!("{}/{}", self.base_url, path);
        params.push(("api_key", self.api_key.clone()));
        let client = self.client.clone();

        retry_async_when(
            || {
                let url = url.clone();
                let client = client.clone();
                let params = params.clone();
                async move {
                    let response = client.get_with_query(&url, &params).await?;
                    let status = response.status();

                    if status == StatusCode::NOT_FOUND {
                        return Ok(None);
                    }

                    if status == StatusCode::UNAUTHORIZED {
                        return Err(RequestError::Unauthorized);
                    }

                    if response.is_rate_limited() {
                        warn!("TMDB rate limit hit, will retry");
                    }

                    if !status.is_success() {
                        return Err(RequestError::Status {
                            status,
                            transient: response.is_transient_error(),
                        });
                    }

                    let body: T = response
                        .json()
                        .await
                        .context("Failed to parse TMDB response")?;

                    Ok(Some(body))
                }
            },
            &self.retry_config,
            operation,
            RequestError::is_retryable,
        )
        .await
        .map_err(anyhow::Error::from)
    }
}

#[async_trait]
impl CatalogClient for TmdbClient {
    async fn search(&self, search: &CatalogSearch) -> Result<Vec<CatalogCandidate>> {
        debug!(
            media_type = %search.media_type,
            title = %search.title,
            year = ?search.year,
            language = ?search.language,
            "Searching TMDB"
        );

        let mut params = vec![
            ("query", search.title.clone()),
            ("include_adult", "false".to_string()),
        ];
        if let Some(language) = &search.language {
            params.push(("language", language.clone()));
        }
        let (path, operation) = match search.media_type {
            MediaType::Movie => {
                if let Some(year) = search.year {
                    params.push(("year", year.to_string()));
                }
                ("search/movie", "tmdb_search_movies")
            }
            MediaType::Tv => {
                if let Some(year) = search.year {
                    params.push(("first_air_date_year", year.to_string()));
                }
                ("search/tv", "tmdb_search_tv")
            }
        };

        let results = self
            .get_json::<TmdbSearchResponse>(path, params, operation)
            .await?
            .map(|response| response.results)
            .unwrap_or_default();

        debug!(count = results.len(), "TMDB search returned results");
        Ok(results.into_iter().map(CatalogCandidate::from).collect())
    }

    async fn details(&self, media_type: MediaType, id: u64) -> Result<Option<CatalogTitle>> {
        let path = match media_type {
            MediaType::Movie => format!("movie/{}", id),
            MediaType::Tv => format!("tv/{}", id),
        };
        let details = self
            .get_json::<TmdbTitleDetails>(
                &path,
                vec![("language", self.language.clone())],
                "tmdb_get_details",
            )
            .await
            .with_context(|| format!("Failed to fetch TMDB details for {}:{}", media_type, id))?;

        Ok(details.map(CatalogTitle::from))
    }

    async fn episode(&self, series_id: u64, season: i32, episode: i32) -> Result<Option<CatalogEpisode>> {
        let path = format!("tv/{}/season/{}/episode/{}", series_id, season, episode);
        match self
            .get_json::<TmdbEpisodeDetails>(
                &path,
                vec![("language", self.language.clone())],
                "tmdb_get_episode",
            )
            .await
        {
            Ok(details) => Ok(details.map(|d| CatalogEpisode {
                season_number: d.season_number,
                episode_number: d.episode_number,
                name: d.name.filter(|n| !n.is_empty()),
            })),
            Err(e) => {
                warn!(
                    series_id,
                    season,
                    episode,
                    error = %e,
                    "TMDB episode lookup failed, continuing without episode details"
                );
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> TmdbClient {
        TmdbClient::new("key".to_string(), "en-US".to_string(), server.uri())
            .unwrap()
            .with_retry_config(RetryConfig::fixed(2, Duration::from_millis(10)))
    }

    #[test]
    fn test_year_of() {
        assert_eq!(year_of(Some("1999-03-31")), Some(1999));
        assert_eq!(year_of(Some("")), None);
        assert_eq!(year_of(None), None);
    }

    #[tokio::test]
    async fn test_search_tv_maps_candidates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/tv"))
            .and(query_param("query", "Show"))
            .and(query_param("first_air_date_year", "2010"))
            .and(query_param("api_key", "key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    { "id": 42, "name": "Show", "original_name": "Show", "first_air_date": "2010-05-01", "popularity": 12.5 },
                    { "id": 7, "name": "Show Again", "first_air_date": "", "popularity": 1.0 }
                ]
            })))
            .mount(&server)
            .await;

        let results = client(&server)
            .search(&CatalogSearch {
                media_type: MediaType::Tv,
                title: "Show".to_string(),
                year: Some(2010),
                language: Some("en-US".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, 42);
        assert_eq!(results[0].year, Some(2010));
        assert_eq!(results[1].year, None);
    }

    #[tokio::test]
    async fn test_details_not_found_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/movie/5"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let details = client(&server).details(MediaType::Movie, 5).await.unwrap();
        assert!(details.is_none());
    }

    #[tokio::test]
    async fn test_server_error_is_retried_then_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tv/1"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        assert!(client(&server).details(MediaType::Tv, 1).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_key_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/movie/603"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server)
            .details(MediaType::Movie, 603)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("TMDB API key is invalid"));
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tv/1"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        assert!(client(&server).details(MediaType::Tv, 1).await.is_err());
    }

    #[tokio::test]
    async fn test_episode_failure_is_soft() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tv/1/season/1/episode/2"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let episode = client(&server).episode(1, 1, 2).await.unwrap();
        assert!(episode.is_none());
    }
}
