//! Playback telemetry collaborator.
//!
//! The tracking library itself is external; this module fixes the contract
//! the rest of the crate relies on. A [`TrackingSession`] starts tracking at
//! most once, stops only after a successful start, stops at most once, and
//! never lets a stop failure escape teardown.

use serde::Serialize;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_data1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_data2: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_data3: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_data4: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_data5: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingOptions {
    pub cloud_name: String,
    pub public_id: String,
    pub custom_data: CustomData,
}

#[derive(Debug, thiserror::Error)]
pub enum TrackingError {
    #[error("Tracker failed to start: {0}")]
    Start(String),

    #[error("Tracker failed to stop: {0}")]
    Stop(String),
}

pub trait Tracker {
    fn start(&mut self, options: &TrackingOptions) -> Result<(), TrackingError>;

    /// Only valid after a successful `start`.
    fn stop(&mut self) -> Result<(), TrackingError>;
}

pub struct TrackingSession<T: Tracker> {
    tracker: T,
    active: bool,
}

impl<T: Tracker> TrackingSession<T> {
    /// Start tracking. A failed start is logged and leaves the session inactive.
    pub fn begin(mut tracker: T, options: &TrackingOptions) -> Self {
        let active = match tracker.start(options) {
            Ok(()) => {
                info!("Tracking started for {}", options.public_id);
                true
            }
            Err(e) => {
                error!("Video analytics tracking failed to start: {}", e);
                false
            }
        };
        Self { tracker, active }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn end(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Err(e) = self.tracker.stop() {
            warn!("Ignoring tracker stop failure during teardown: {}", e);
        }
    }
}

impl<T: Tracker> Drop for TrackingSession<T> {
    fn drop(&mut self) {
        self.end();
    }
}
