//! Recognition pipeline and external service integrations

pub mod catalog_mapper;
pub mod extractor;
pub mod filename_parser;
pub mod library_search;
pub mod quality;
pub mod rate_limiter;
pub mod scanner;
pub mod text_utils;
pub mod title_matcher;
pub mod tmdb;

pub use catalog_mapper::{CatalogMapper, CatalogMapping, TmdbCatalogMapper};
pub use extractor::{
    ExtractedMetadata, ExtractorError, FilenameMetadataExtractor, LlmExtractorConfig,
    LlmMetadataExtractor, MetadataExtractor, create_metadata_extractor,
};
pub use filename_parser::{ParsedMediaName, parse_media_name, parse_media_path};
pub use library_search::{EpisodeMatch, LibrarySearch, MovieMatch, SearchQuery};
pub use quality::Quality;
pub use rate_limiter::RetryConfig;
pub use scanner::{RegistryScanner, ScanPhase, ScanSummary, ScannerConfig};
pub use title_matcher::NormalizedTitles;
pub use tmdb::{CatalogCandidate, CatalogClient, CatalogEpisode, CatalogSearch, CatalogTitle, TmdbClient};
