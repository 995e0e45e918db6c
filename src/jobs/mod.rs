//! Background jobs.

pub mod weekly_keywords;
