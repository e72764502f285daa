//! View records returned by the Cloudinary analytics API, plus the
//! dedupe/merge and aggregation rules the dashboard renders from.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::config::HIGH_DROP_OFF_SECS;

/// One playback-engagement observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewRecord {
    #[serde(default, deserialize_with = "null_as_default")]
    pub video_public_id: String,
    #[serde(default)]
    pub video_duration: Option<f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub viewer_application_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub viewer_location_country_code: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub viewer_os_identifier: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub view_watch_time: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub view_ended_at: String,
}

/// Upstream rows carry explicit nulls for unknown values.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Attributes that identify the same observation across overlapping polls.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey {
    pub video_public_id: String,
    pub view_ended_at: String,
    pub viewer_application_name: String,
    pub viewer_location_country_code: String,
    pub viewer_os_identifier: String,
}

impl ViewRecord {
    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey {
            video_public_id: self.video_public_id.clone(),
            view_ended_at: self.view_ended_at.clone(),
            viewer_application_name: self.viewer_application_name.clone(),
            viewer_location_country_code: self.viewer_location_country_code.clone(),
            viewer_os_identifier: self.viewer_os_identifier.clone(),
        }
    }

    pub fn ended_at(&self) -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339(&self.view_ended_at).ok()
    }
}

/// Collapse records sharing an identity key and order them most recent first.
///
/// The record with the larger watch time survives a collision; equal watch
/// times keep the one seen last. Records whose timestamp does not parse sort
/// after every dated record. Remaining ties are broken by identity key, so
/// the output order never depends on input order.
pub fn dedupe(records: impl IntoIterator<Item = ViewRecord>) -> Vec<ViewRecord> {
    let mut by_key: HashMap<IdentityKey, ViewRecord> = HashMap::new();

    for record in records {
        let key = record.identity_key();
        match by_key.get(&key) {
            Some(prev) if record.view_watch_time < prev.view_watch_time => {}
            _ => {
                by_key.insert(key, record);
            }
        }
    }

    let mut keyed: Vec<(IdentityKey, Option<DateTime<FixedOffset>>, ViewRecord)> = by_key
        .into_iter()
        .map(|(key, record)| {
            let ended = record.ended_at();
            (key, ended, record)
        })
        .collect();

    keyed.sort_by(|(ka, ta, _), (kb, tb, _)| newest_first(ta, tb).then_with(|| ka.cmp(kb)));
    keyed.into_iter().map(|(_, _, record)| record).collect()
}

/// Fold a freshly polled batch into the accumulated set.
pub fn merge(accumulated: &[ViewRecord], incoming: Vec<ViewRecord>) -> Vec<ViewRecord> {
    dedupe(accumulated.iter().cloned().chain(incoming))
}

fn newest_first(
    a: &Option<DateTime<FixedOffset>>,
    b: &Option<DateTime<FixedOffset>>,
) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.cmp(a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Aggregates {
    pub total_views: usize,
    pub avg_watch_secs: u64,
    pub countries: usize,
}

impl Aggregates {
    pub fn from_records(records: &[ViewRecord]) -> Self {
        Self {
            total_views: records.len(),
            avg_watch_secs: average_watch_time(records),
            countries: country_count(records),
        }
    }
}

/// Mean watch time in whole seconds, 0 for an empty set.
pub fn average_watch_time(records: &[ViewRecord]) -> u64 {
    if records.is_empty() {
        return 0;
    }
    let total: f64 = records.iter().map(|r| r.view_watch_time.max(0.0)).sum();
    (total / records.len() as f64).round() as u64
}

pub fn country_count(records: &[ViewRecord]) -> usize {
    records
        .iter()
        .map(|r| r.viewer_location_country_code.as_str())
        .filter(|cc| !cc.is_empty())
        .collect::<HashSet<_>>()
        .len()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementVerdict {
    HighDropOff,
    Good,
}

impl EngagementVerdict {
    pub fn from_average(avg_watch_secs: u64) -> Self {
        if avg_watch_secs < HIGH_DROP_OFF_SECS {
            EngagementVerdict::HighDropOff
        } else {
            EngagementVerdict::Good
        }
    }

    pub fn advice(&self) -> &'static str {
        match self {
            EngagementVerdict::HighDropOff => {
                "High drop-off. Put your key message in the first 3 seconds."
            }
            EngagementVerdict::Good => "Good engagement. Keep this style and pacing.",
        }
    }
}

/// One point of the engagement chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelinePoint {
    pub n: usize,
    pub watch_secs: f64,
    pub ended_at: String,
}

/// Chart series oldest-first from a most-recent-first record list.
pub fn timeline(records: &[ViewRecord]) -> Vec<TimelinePoint> {
    records
        .iter()
        .rev()
        .enumerate()
        .map(|(n, r)| TimelinePoint {
            n,
            watch_secs: r.view_watch_time,
            ended_at: r.view_ended_at.clone(),
        })
        .collect()
}
