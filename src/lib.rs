//! Media registry - local media-library recognition and indexing engine
//!
//! Scans a directory tree of video files, recognizes each one against an
//! external catalog and keeps the classification in a JSON registry.

pub mod cli;
pub mod config;
pub mod db;
pub mod jobs;
pub mod services;
