//! File-backed admin backend for an AI news portal: daily news archival,
//! a word-cloud keyword set with weekly LLM regeneration, an AI tool catalog,
//! a streaming chat proxy with IP rate limiting, and visitor statistics.
//!
//! All state lives in pretty-printed JSON documents under the data directory;
//! there is no database.

pub mod ai;
pub mod archive;
pub mod auth;
pub mod config;
pub mod jobs;
pub mod models;
pub mod security;
pub mod store;
pub mod web;
