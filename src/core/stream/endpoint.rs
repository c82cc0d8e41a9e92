use url::Url;

use crate::core::error::{ConnectorError, ConnectorResult};

/// Rewrite an `http(s)://` service URL to its `ws(s)://` counterpart.
pub fn fixup_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else {
        url.to_string()
    }
}

/// Build the socket URL for `base + path` with url-encoded `query` pairs.
pub fn build_stream_url(base: &str, path: &str, query: &[(&str, &str)]) -> ConnectorResult<String> {
    let raw = format!("{}{}", fixup_url(base.trim_end_matches('/')), path);
    let mut url = Url::parse(&raw)
        .map_err(|e| ConnectorError::Configuration(format!("Invalid stream URL {raw}: {e}")))?;

    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(ConnectorError::Configuration(format!(
            "Stream URL must use ws or wss: {raw}"
        )));
    }

    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }

    Ok(url.to_string())
}
