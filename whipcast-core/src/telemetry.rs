//! Keystroke timing telemetry
//!
//! Collects key press/release times, reduces each report window to per-metric
//! mean and standard deviation, and posts the result to a collector at a
//! fixed interval. Metrics, for a keystroke relative to the one before it:
//!
//! | metric | from            | to             |
//! |--------|-----------------|----------------|
//! | `du1`  | down            | up (hold time) |
//! | `ud`   | previous up     | down           |
//! | `dd`   | previous down   | down           |
//! | `uu`   | previous up     | up             |
//! | `du2`  | previous down   | up             |
//!
//! The first keystroke of a session has no predecessor, so only `du1` exists
//! for it.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::TelemetryConfig;
use crate::error::{Result, WhipcastError};
use crate::identity::SessionId;

/// One completed key press; times in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keystroke {
    pub key: String,
    pub pressed_at: f64,
    pub released_at: f64,
}

/// Timing metrics of one keystroke; `None` when there is no predecessor
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct KeystrokeTimings {
    pub du1: Option<f64>,
    pub ud: Option<f64>,
    pub dd: Option<f64>,
    pub uu: Option<f64>,
    pub du2: Option<f64>,
}

impl KeystrokeTimings {
    /// Metrics of `current` following `previous`
    pub fn between(previous: Option<&Keystroke>, current: &Keystroke) -> Self {
        let mut timings = Self {
            du1: Some(current.released_at - current.pressed_at),
            ..Default::default()
        };
        if let Some(prev) = previous {
            timings.ud = Some(current.pressed_at - prev.released_at);
            timings.dd = Some(current.pressed_at - prev.pressed_at);
            timings.uu = Some(current.released_at - prev.released_at);
            timings.du2 = Some(current.released_at - prev.pressed_at);
        }
        timings
    }
}

/// Mean and population standard deviation, rounded to integers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeatureStats {
    pub mean: i64,
    pub std_dev: i64,
}

impl FeatureStats {
    /// Statistics over the present samples; absent samples are skipped
    pub fn from_samples(samples: &[Option<f64>]) -> Self {
        let present: Vec<f64> = samples.iter().flatten().copied().collect();
        if present.is_empty() {
            return Self::default();
        }

        let n = present.len() as f64;
        let mean = present.iter().sum::<f64>() / n;
        let variance = present.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Self {
            mean: mean.round() as i64,
            std_dev: variance.sqrt().round() as i64,
        }
    }

    /// Statistics for producers that encode "absent" as zero
    pub fn from_sentinel_samples(samples: &[f64]) -> Self {
        let samples: Vec<Option<f64>> = samples
            .iter()
            .map(|&v| (v != 0.0).then_some(v))
            .collect();
        Self::from_samples(&samples)
    }
}

/// Statistics for every metric over one window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WindowStats {
    pub ud: FeatureStats,
    pub du1: FeatureStats,
    pub dd: FeatureStats,
    pub uu: FeatureStats,
    pub du2: FeatureStats,
}

impl WindowStats {
    /// Reduce timings to statistics
    pub fn from_timings(timings: &[KeystrokeTimings]) -> Self {
        let column = |f: fn(&KeystrokeTimings) -> Option<f64>| {
            FeatureStats::from_samples(&timings.iter().map(f).collect::<Vec<_>>())
        };
        Self {
            ud: column(|t| t.ud),
            du1: column(|t| t.du1),
            dd: column(|t| t.dd),
            uu: column(|t| t.uu),
            du2: column(|t| t.du2),
        }
    }
}

/// Body of `POST /telemetry`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryPayload {
    pub user_id: String,
    pub stats: WindowStats,
}

/// Keystrokes collected since the last report
#[derive(Debug)]
pub struct TelemetryWindow {
    capacity: usize,
    pressed: HashMap<String, f64>,
    keystrokes: VecDeque<Keystroke>,
    previous: Option<Keystroke>,
}

impl TelemetryWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            pressed: HashMap::new(),
            keystrokes: VecDeque::new(),
            previous: None,
        }
    }

    /// Record a key press. Auto-repeat presses keep the first time.
    pub fn key_down(&mut self, key: &str, at: f64) {
        self.pressed.entry(key.to_string()).or_insert(at);
    }

    /// Record a key release; ignored without a matching press
    pub fn key_up(&mut self, key: &str, at: f64) {
        let Some(pressed_at) = self.pressed.remove(key) else {
            return;
        };
        self.push(Keystroke {
            key: key.to_string(),
            pressed_at,
            released_at: at,
        });
    }

    /// Add a completed keystroke, dropping the oldest when full
    pub fn push(&mut self, keystroke: Keystroke) {
        if self.keystrokes.len() == self.capacity {
            self.keystrokes.pop_front();
        }
        self.keystrokes.push_back(keystroke);
    }

    pub fn len(&self) -> usize {
        self.keystrokes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keystrokes.is_empty()
    }

    /// Reduce and clear the window; `None` if nothing was typed.
    ///
    /// The last keystroke is remembered as the predecessor of the next
    /// window's first keystroke.
    pub fn take_stats(&mut self) -> Option<WindowStats> {
        if self.keystrokes.is_empty() {
            return None;
        }

        let mut timings = Vec::with_capacity(self.keystrokes.len());
        let mut previous = self.previous.take();
        for keystroke in self.keystrokes.drain(..) {
            timings.push(KeystrokeTimings::between(previous.as_ref(), &keystroke));
            previous = Some(keystroke);
        }
        self.previous = previous;

        Some(WindowStats::from_timings(&timings))
    }

    /// Forget everything, including the predecessor
    pub fn reset(&mut self) {
        self.pressed.clear();
        self.keystrokes.clear();
        self.previous = None;
    }
}

/// HTTP client for the telemetry collector
#[derive(Debug, Clone)]
pub struct TelemetryClient {
    client: reqwest::Client,
    base: Url,
}

impl TelemetryClient {
    pub fn new(base: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            base,
        }
    }

    /// `POST /telemetry`
    pub async fn post(&self, payload: &TelemetryPayload) -> Result<()> {
        let url = self.base.join("telemetry")?;
        let response = self.client.post(url.clone()).json(payload).send().await?;
        if !response.status().is_success() {
            return Err(WhipcastError::signaling(format!(
                "POST {} returned {}",
                url,
                response.status()
            )));
        }
        Ok(())
    }

    /// `GET /profile/<id>`
    pub async fn profile(&self, id: &SessionId) -> Result<serde_json::Value> {
        let mut url = self.base.join("profile/")?;
        url.path_segments_mut()
            .map_err(|_| WhipcastError::config(format!("Telemetry URL cannot be a base: {}", self.base)))?
            .pop_if_empty()
            .push(id.as_str());

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
}

/// Post the window's statistics every `config.interval` until aborted.
///
/// Empty windows are skipped. Failed posts are logged and the window's data
/// is dropped.
pub fn spawn_reporter(
    client: TelemetryClient,
    id: SessionId,
    window: Arc<Mutex<TelemetryWindow>>,
    config: &TelemetryConfig,
) -> JoinHandle<()> {
    let interval = config.interval.max(Duration::from_millis(10));
    info!("Reporting keystroke telemetry for '{}' every {:?}", id, interval);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let stats = window.lock().take_stats();
            let Some(stats) = stats else {
                continue;
            };
            let payload = TelemetryPayload {
                user_id: id.to_string(),
                stats,
            };
            match client.post(&payload).await {
                Ok(()) => debug!("Telemetry window sent"),
                Err(e) => warn!("Telemetry post failed: {}", e),
            }
        }
    })
}
