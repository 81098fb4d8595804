//! Git smart-HTTP push protocol
//!
//! pkt-line framing, the `info/refs` advertisement, receive-pack commands
//! and the status report, and the HTTP session tying them together.

pub mod http;
pub mod pkt_line;
pub mod refs;
pub mod report;

use anyhow::Result;
pub use http::SmartHttpClient;
pub use refs::{parse_advertisement, Ref, RefAdvertisement};
pub use report::{encode_commands, parse_report, PushReport, RefReport, RefStatus, UpdateCommand};
use reqwest::Url;

use crate::{config::PushConfig, error::Error};

/// Check that `url` is something we can push to over smart HTTP
pub fn parse_remote_url(url: &str) -> Result<Url> {
    let lower = url.trim().to_ascii_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return Err(Error::UnsupportedProtocol(url.to_string()).into());
    }

    let parsed = Url::parse(url.trim())
        .map_err(|e| Error::Config(format!("invalid remote URL {:?}: {}", url, e)))?;
    Ok(parsed)
}

/// Open a push session for `url`
pub fn for_url(url: &str, config: &PushConfig) -> Result<SmartHttpClient> {
    let parsed = parse_remote_url(url)?;
    SmartHttpClient::new(parsed, config)
}
