//! Common utilities and helper functions
//!
//! This module provides shared utilities used across the application.

pub mod retry;

use anyhow::{Context, Result};
use url::Url;

/// Extract domain from URL, without a leading `www.`
pub fn extract_domain(url: &str) -> Result<String> {
    let parsed = Url::parse(url.trim()).context("Invalid URL")?;

    parsed
        .host_str()
        .map(|s| s.trim_start_matches("www.").to_lowercase())
        .filter(|s| !s.is_empty())
        .context("No host in URL")
}

/// Ratio `part / whole`, zero when `whole` is zero
pub fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}
