use std::fmt::Write;

use crate::dashboard::{DashboardSnapshot, ViewStatus};
use crate::records::timeline;

const TIMELINE_WIDTH: usize = 40;

/// Plain-text rendering of a snapshot for the `watch` command.
pub fn render_snapshot(snap: &DashboardSnapshot, poll_secs: u64) -> String {
    let mut out = String::new();

    match snap.view {
        ViewStatus::Loading => {
            let _ = writeln!(out, "Loading analytics for {}...", snap.public_id);
            return out;
        }
        ViewStatus::Blocked(status) => {
            let _ = writeln!(out, "Analytics Error");
            let _ = writeln!(out, "Could not load analytics. Status: {status}.");
            let _ = writeln!(out, "Press r to retry or d for demo data.");
            return out;
        }
        _ => {}
    }

    let badge = if snap.demo { "Demo Mode" } else { "Live Feed" };
    let _ = writeln!(out, "Video Analytics [{badge}]  {}", snap.public_id);
    let _ = writeln!(out, "Updates every {poll_secs}s.");
    if let ViewStatus::Stale(status) = snap.view {
        let _ = writeln!(out, "Last refresh failed: {status}.");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "Watch Quality: {}", snap.verdict.advice());
    let _ = writeln!(
        out,
        "Total Views: {}   Avg Watch: {}s   Countries: {}",
        snap.aggregates.total_views, snap.aggregates.avg_watch_secs, snap.aggregates.countries
    );

    let points = timeline(&snap.records);
    if points.is_empty() {
        return out;
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "Engagement Timeline");
    let peak = points
        .iter()
        .map(|p| p.watch_secs)
        .fold(0.0_f64, f64::max)
        .max(1.0);
    for point in &points {
        let bar = ((point.watch_secs.max(0.0) / peak) * TIMELINE_WIDTH as f64).round() as usize;
        let _ = writeln!(
            out,
            "{:>25} {:>6.1}s {}",
            point.ended_at,
            point.watch_secs,
            "#".repeat(bar)
        );
    }
    out
}
