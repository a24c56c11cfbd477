pub mod rate_limiter;
pub mod retry;

use alloy_primitives::{Address, B256, hex};
use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use crate::models::common::Config;

/// Lowercase, 0x-prefixed address. Every address crossing into an entity goes through here.
pub fn normalize_address(address: &Address) -> String {
    hex::encode_prefixed(address.as_slice())
}

pub fn hash_to_string(hash: &B256) -> String {
    hex::encode_prefixed(hash.as_slice())
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    info!("Config path: {}", path.to_string_lossy());

    // YAML file first, then ETL__* environment overrides (e.g. ETL__RPC_URL, ETL__RPC__MAX_RETRIES)
    let config: Config = config::Config::builder()
        .add_source(config::File::from(path).format(config::FileFormat::Yaml))
        .add_source(config::Environment::with_prefix("ETL").separator("__"))
        .build()
        .context("failed to read config file")?
        .try_deserialize()
        .context("failed to parse config")?;

    config.validate()?;

    Ok(config)
}

pub(crate) fn strip_html(error: &str) -> String {
    // If the error contains HTML tags, extract just the text content
    if error.contains("<!doctype html>") || error.contains("<html>") {
        // Remove all HTML tags and return the first non-empty line of text
        error
            .lines()
            .map(|line| line.trim())
            .find(|line| {
                !line.starts_with('<')
                    && !line.ends_with('>')
                    && !line.is_empty()
                    && !line.starts_with("<!")
                    && *line != "html"
                    && *line != "body"
            })
            .unwrap_or(error)
            .to_string()
    } else {
        // Return original error if no HTML
        error.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[test]
    fn test_normalize_address_is_lowercase() {
        let checksummed = address!("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");
        assert_eq!(
            normalize_address(&checksummed),
            "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"
        );
    }

    #[test]
    fn test_strip_html() {
        let body = "<!doctype html>\n<html>\n<body>\nBad Gateway\n</body>\n</html>";
        assert_eq!(strip_html(body), "Bad Gateway");
        assert_eq!(strip_html("plain error"), "plain error");
    }
}
