use crate::config::DEFAULT_PUBLIC_ID;
use crate::records::{dedupe, ViewRecord};

// (ended_at, app, country, os, watch seconds)
const DEMO_VIEWS: &[(&str, &str, &str, &str, f64)] = &[
    ("2025-06-02T14:05:11Z", "Chrome", "US", "Mac OS X", 48.0),
    ("2025-06-02T13:41:52Z", "Safari", "GB", "iOS", 15.0),
    ("2025-06-02T12:17:03Z", "Firefox", "DE", "Windows", 58.0),
    ("2025-06-02T11:58:40Z", "Chrome", "US", "Android", 22.0),
    ("2025-06-02T10:22:19Z", "Edge", "CA", "Windows", 35.0),
    ("2025-06-02T09:03:56Z", "Chrome", "", "Linux", 9.0),
];

/// Fixed illustrative dataset shown while demo mode is on.
pub fn demo_records() -> Vec<ViewRecord> {
    dedupe(DEMO_VIEWS.iter().map(|(ended, app, cc, os, watch)| ViewRecord {
        video_public_id: DEFAULT_PUBLIC_ID.to_string(),
        video_duration: Some(60.0),
        viewer_application_name: app.to_string(),
        viewer_location_country_code: cc.to_string(),
        viewer_os_identifier: os.to_string(),
        view_watch_time: *watch,
        view_ended_at: ended.to_string(),
    }))
}
