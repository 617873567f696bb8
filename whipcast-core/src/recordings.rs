//! Recordings server client
//!
//! Lists recorded segments of a session and builds playback URLs for them.

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{Result, WhipcastError};
use crate::identity::SessionId;

/// One recorded segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingSegment {
    /// Segment start, as reported by the server (RFC 3339)
    pub start: String,
    /// Length in seconds
    pub duration: f64,
}

/// HTTP client for the recordings server
#[derive(Debug, Clone)]
pub struct RecordingsClient {
    client: reqwest::Client,
    base: Url,
}

impl RecordingsClient {
    pub fn new(base: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            base,
        }
    }

    /// `GET /list?path=<id>`, in server order
    pub async fn list(&self, id: &SessionId) -> Result<Vec<RecordingSegment>> {
        let mut url = self.base.join("list")?;
        url.query_pairs_mut().append_pair("path", id.as_str());
        debug!("GET {}", url);

        let response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(WhipcastError::signaling(format!(
                "GET {} returned {}",
                url,
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    /// MP4 playback URL for a segment
    pub fn clip_url(&self, id: &SessionId, segment: &RecordingSegment) -> Result<Url> {
        let mut url = self.base.join("get")?;
        url.query_pairs_mut()
            .append_pair("path", id.as_str())
            .append_pair("start", &segment.start)
            .append_pair("duration", &segment.duration.to_string())
            .append_pair("format", "mp4");
        Ok(url)
    }
}
