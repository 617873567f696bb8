//! WHIP signaling over HTTP
//!
//! `POST <base>/<path>/whip` with the offer as `application/sdp`; the
//! response body is the answer and the `Location` header names the publish
//! resource, which is removed again with `DELETE`.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, LOCATION};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Result, WhipcastError};
use crate::identity::SessionId;

const SDP_CONTENT_TYPE: &str = "application/sdp";

/// Outcome of a successful offer exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalingAnswer {
    /// Answer SDP
    pub sdp: String,
    /// Publish resource, already resolved against the publish URL
    pub location: Option<Url>,
}

/// Offer/answer exchange with an ingest server
#[async_trait]
pub trait Signaling: Send + Sync {
    /// Send the offer, returning the answer and resource locator
    async fn publish(&self, url: &Url, offer: &str) -> Result<SignalingAnswer>;

    /// Remove a publish resource
    async fn delete(&self, locator: &Url) -> Result<()>;
}

/// Publish URL for a session: `<base>/<percent-encoded id>/whip`
pub fn publish_url(base: &Url, id: &SessionId) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| WhipcastError::config(format!("Ingest URL cannot be a base: {}", base)))?
        .pop_if_empty()
        .push(id.as_str())
        .push("whip");
    Ok(url)
}

/// Resolve a `Location` header value against the URL it was returned for
pub fn resolve_locator(publish_url: &Url, location: &str) -> Result<Url> {
    publish_url
        .join(location)
        .map_err(|e| WhipcastError::negotiation(format!("Invalid Location header {:?}: {}", location, e)))
}

/// `reqwest`-backed signaling client
#[derive(Debug, Clone, Default)]
pub struct HttpSignaling {
    client: reqwest::Client,
}

impl HttpSignaling {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an existing client (shared connection pool)
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Signaling for HttpSignaling {
    async fn publish(&self, url: &Url, offer: &str) -> Result<SignalingAnswer> {
        debug!("POST {}", url);
        let response = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
            .header(ACCEPT, SDP_CONTENT_TYPE)
            .body(offer.to_string())
            .send()
            .await
            .map_err(|e| WhipcastError::signaling(format!("POST {} failed: {}", url, e)))?;

        let status = response.status();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(WhipcastError::negotiation(format!(
                "Ingest server answered {}: {}",
                status,
                body.trim()
            )));
        }

        // The server already holds the resource; a bad Location only costs the DELETE
        let location = match location {
            Some(value) => match resolve_locator(url, &value) {
                Ok(locator) => Some(locator),
                Err(e) => {
                    warn!("Ignoring unusable Location '{}': {}", value, e);
                    None
                }
            },
            None => {
                warn!("Ingest server returned no Location header, nothing to delete on stop");
                None
            }
        };

        info!("Offer accepted ({})", status);
        Ok(SignalingAnswer {
            sdp: body,
            location,
        })
    }

    async fn delete(&self, locator: &Url) -> Result<()> {
        debug!("DELETE {}", locator);
        let response = self
            .client
            .delete(locator.clone())
            .send()
            .await
            .map_err(|e| WhipcastError::teardown(format!("DELETE {} failed: {}", locator, e)))?;

        if response.status().is_success() {
            info!("Publish resource removed: {}", locator);
            Ok(())
        } else {
            Err(WhipcastError::teardown(format!(
                "DELETE {} returned {}",
                locator,
                response.status()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("http://localhost:8889/").unwrap()
    }

    #[test]
    fn test_publish_url() {
        let id = SessionId::normalize("room-1").unwrap();
        assert_eq!(
            publish_url(&base(), &id).unwrap().as_str(),
            "http://localhost:8889/room-1/whip"
        );
    }

    #[test]
    fn test_publish_url_encodes_path() {
        let id = SessionId::normalize("my room/a b").unwrap();
        assert_eq!(
            publish_url(&base(), &id).unwrap().as_str(),
            "http://localhost:8889/my%20room%2Fa%20b/whip"
        );
    }

    #[test]
    fn test_publish_url_keeps_base_path() {
        let base = Url::parse("http://ingest.local/live").unwrap();
        let id = SessionId::normalize("cam").unwrap();
        assert_eq!(
            publish_url(&base, &id).unwrap().as_str(),
            "http://ingest.local/live/cam/whip"
        );
    }

    #[test]
    fn test_resolve_relative_locator() {
        let url = Url::parse("http://localhost:8889/room-1/whip").unwrap();
        let resolved = resolve_locator(&url, "/room-1/whip/abc").unwrap();
        assert_eq!(resolved.as_str(), "http://localhost:8889/room-1/whip/abc");

        let absolute = resolve_locator(&url, "http://other:9000/res/1").unwrap();
        assert_eq!(absolute.as_str(), "http://other:9000/res/1");
    }
}
