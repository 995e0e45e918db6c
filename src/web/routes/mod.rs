//! Route handlers, one module per resource.

pub mod ai;
pub mod archive;
pub mod auth;
pub mod keywords;
pub mod misc;
pub mod news;
pub mod reports;
pub mod security;
pub mod tools;
pub mod visit;
