//! Human-readable status and activity reports built from SharedState copies.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::BTreeMap;
use watchpost_common::utils::{format_ago, format_uptime};

use crate::state::SharedState;

pub struct StatsReport<'a> {
    state: &'a SharedState,
}

impl<'a> StatsReport<'a> {
    pub fn new(state: &'a SharedState) -> Self {
        Self { state }
    }

    pub fn status_short(&self) -> String {
        self.status_short_at(Utc::now())
    }

    pub fn status_short_at(&self, now: DateTime<Utc>) -> String {
        let stats = self.state.stats();
        let last_seen = stats
            .last_detection
            .map(|then| format_ago(then, now))
            .unwrap_or_else(|| "Never".to_string());

        format!(
            "System Online\n\
             Uptime: {}\n\
             Total Events: {}\n\
             Last Activity: {}\n\
             Camera: {}",
            format_uptime(stats.uptime),
            stats.total_events,
            last_seen,
            stats.source_state,
        )
    }

    pub fn summary(&self, hours: u32) -> String {
        self.summary_at(hours, Utc::now())
    }

    /// Confirmed events per class among history entries of the last `hours`.
    pub fn summary_at(&self, hours: u32, now: DateTime<Utc>) -> String {
        let stats = self.state.stats();
        let history = self.state.history_snapshot();
        let cutoff = now - ChronoDuration::hours(i64::from(hours));

        let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
        let mut last_sighting: Option<(&str, DateTime<Utc>)> = None;
        for entry in history.iter().filter(|e| e.recorded_at >= cutoff) {
            let frame = &entry.detections;
            for detection in &frame.detections {
                if frame.newly_confirmed.contains(&detection.token) {
                    *counts.entry(detection.label.as_str()).or_insert(0) += 1;
                }
            }
            if let Some(label) = frame.labels().next() {
                last_sighting = Some((label, entry.recorded_at));
            }
        }

        let uptime = format_uptime(stats.uptime);
        if counts.is_empty() {
            return format!(
                "Status Report\n\
                 Uptime: {}\n\
                 No detections in last {}h",
                uptime, hours
            );
        }

        let total: u64 = counts.values().sum();
        let breakdown = counts
            .iter()
            .map(|(label, count)| format!("- {}: {}", label, count))
            .collect::<Vec<_>>()
            .join("\n");
        let last = last_sighting
            .map(|(label, at)| format!("{} at {}", label, at.format("%H:%M:%S")))
            .unwrap_or_else(|| "None".to_string());

        format!(
            "Activity Report (Last {}h)\n\
             Uptime: {}\n\
             Total Detections: {}\n\n\
             Breakdown:\n{}\n\n\
             Last Sighted: {}",
            hours, uptime, total, breakdown, last
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use watchpost_common::{BBox, Detection, HistoryEntry, StabilizedDetections, TrackToken};

    fn entry(label: &str, id: u64, newly: bool, recorded_at: DateTime<Utc>) -> HistoryEntry {
        let token = TrackToken::Upstream { id, label: label.to_string() };
        HistoryEntry {
            recorded_at,
            detections: StabilizedDetections {
                sequence: id,
                detections: vec![Detection {
                    token: token.clone(),
                    label: label.to_string(),
                    confidence: 0.8,
                    bbox: BBox::new(0.0, 0.0, 1.0, 1.0),
                    consecutive_hits: 2,
                    first_seen: 1,
                }],
                newly_confirmed: if newly { vec![token] } else { vec![] },
                malformed: 0,
            },
        }
    }

    #[test]
    fn test_status_short_before_any_detection() {
        let state = SharedState::new(10);
        let text = StatsReport::new(&state).status_short();
        assert!(text.contains("Total Events: 0"));
        assert!(text.contains("Last Activity: Never"));
        assert!(text.contains("Camera: active"));
    }

    #[test]
    fn test_summary_counts_confirmations_in_window() {
        let state = SharedState::new(10);
        let now = Utc::now();
        state.append_history(entry("person", 1, true, now - ChronoDuration::hours(30)));
        state.append_history(entry("person", 2, true, now - ChronoDuration::hours(2)));
        state.append_history(entry("person", 2, false, now - ChronoDuration::hours(2)));
        state.append_history(entry("car", 3, true, now - ChronoDuration::minutes(5)));

        let text = StatsReport::new(&state).summary_at(24, now);
        assert!(text.contains("Total Detections: 2"), "{}", text);
        assert!(text.contains("- person: 1"));
        assert!(text.contains("- car: 1"));
        assert!(text.contains("Last Sighted: car at"));
    }

    #[test]
    fn test_summary_with_empty_window() {
        let state = SharedState::new(10);
        let now = Utc::now();
        state.append_history(entry("person", 1, true, now - ChronoDuration::hours(5)));
        let text = StatsReport::new(&state).summary_at(1, now);
        assert!(text.contains("No detections in last 1h"));
    }
}
