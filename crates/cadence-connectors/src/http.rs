//! HTTP port shared by all connectors.
//!
//! One place maps vendor responses into the error taxonomy: 401/403 →
//! `Auth`, 429 and 5xx → `Transient`, other 4xx → `Permanent`, network and
//! timeout → `Transient`.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;

use crate::{ConnectorError, Result};

const DEFAULT_VENDOR_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_VENDOR_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConnectorError::Config(format!("http client: {e}")))?;
        Ok(Self { client })
    }

    /// GET, expecting a JSON body.
    pub async fn get_json(
        &self,
        url: &str,
        headers: &[(&str, String)],
    ) -> Result<serde_json::Value> {
        let (value, _) = self.get_json_with_next(url, headers).await?;
        Ok(value)
    }

    /// GET returning the JSON body plus the `Link: rel="next"` target when
    /// the vendor paginates by link header (GitHub).
    pub async fn get_json_with_next(
        &self,
        url: &str,
        headers: &[(&str, String)],
    ) -> Result<(serde_json::Value, Option<String>)> {
        let resp = self
            .client
            .get(url)
            .headers(build_headers(headers)?)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let next = resp
            .headers()
            .get("link")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_link_next);

        let value = check_and_parse(resp).await?;
        Ok((value, next))
    }

    /// POST a JSON body, expecting JSON back.
    pub async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, String)],
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let resp = self
            .client
            .post(url)
            .headers(build_headers(headers)?)
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        check_and_parse(resp).await
    }

    /// POST a form body (OAuth token refresh).
    pub async fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
    ) -> Result<serde_json::Value> {
        let resp = self
            .client
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        check_and_parse(resp).await
    }
}

fn build_headers(pairs: &[(&str, String)]) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in pairs {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ConnectorError::Config(format!("bad header name: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ConnectorError::Config(format!("bad header value: {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

async fn check_and_parse(resp: reqwest::Response) -> Result<serde_json::Value> {
    let status = resp.status();
    if status.is_success() {
        return resp
            .json()
            .await
            .map_err(|e| ConnectorError::Permanent(format!("invalid JSON body: {e}")));
    }

    let body = resp.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(200).collect();
    Err(classify_status(status, &snippet))
}

pub(crate) fn classify_status(status: StatusCode, body: &str) -> ConnectorError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ConnectorError::Auth(format!("{status}: {body}"))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            ConnectorError::Transient(format!("{status}: {body}"))
        }
        s if s.is_server_error() => ConnectorError::Transient(format!("{s}: {body}")),
        s => ConnectorError::Permanent(format!("{s}: {body}")),
    }
}

fn map_reqwest_error(err: reqwest::Error) -> ConnectorError {
    if err.is_timeout() || err.is_connect() {
        ConnectorError::Transient(err.to_string())
    } else {
        ConnectorError::Permanent(err.to_string())
    }
}

/// Pull the `rel="next"` target out of an RFC 5988 Link header.
fn parse_link_next(header: &str) -> Option<String> {
    for part in header.split(',') {
        let mut sections = part.split(';');
        let url = sections.next()?.trim();
        let is_next = sections.any(|s| s.trim() == "rel=\"next\"");
        if is_next {
            return Some(url.trim_start_matches('<').trim_end_matches('>').to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_header_next_extraction() {
        let header = "<https://api.github.com/repos/o/r/pulls?page=2>; rel=\"next\", \
                      <https://api.github.com/repos/o/r/pulls?page=9>; rel=\"last\"";
        assert_eq!(
            parse_link_next(header).as_deref(),
            Some("https://api.github.com/repos/o/r/pulls?page=2")
        );
        assert!(parse_link_next("<https://x>; rel=\"last\"").is_none());
    }

    #[test]
    fn status_classification_matches_taxonomy() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, ""),
            ConnectorError::Auth(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, ""),
            ConnectorError::Auth(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, ""),
            ConnectorError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, ""),
            ConnectorError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, ""),
            ConnectorError::Permanent(_)
        ));
    }
}
