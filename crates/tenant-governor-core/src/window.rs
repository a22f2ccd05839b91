// crates/tenant-governor-core/src/window.rs
// ============================================================================
// Module: Usage Window
// Description: Oldest-first queue of admission timestamps.
// Purpose: Count admissions inside a trailing window with lazy front eviction.
// Dependencies: std
// ============================================================================

//! ## Overview
//! A [`UsageWindow`] stores the instants at which calls were admitted, in
//! chronological order. Stale entries are only removed when the window is
//! consulted; there is no background timer per window.
//!
//! A timestamp is live while its age is strictly below the window length, so
//! the live set is the half-open interval `(now - window, now]`.

use std::collections::VecDeque;
use std::time::Duration;
use std::time::Instant;

/// Chronological queue of admission instants for one key.
///
/// # Invariants
/// - Entries are non-decreasing from front to back.
/// - After [`UsageWindow::purge`], every entry is younger than the window.
#[derive(Debug, Clone, Default)]
pub struct UsageWindow {
    /// Admission instants, oldest at the front.
    stamps: VecDeque<Instant>,
}

impl UsageWindow {
    /// Creates an empty window.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every entry whose age is at least `window`; returns how many were dropped.
    pub fn purge(&mut self, now: Instant, window: Duration) -> usize {
        let mut dropped = 0;
        while let Some(oldest) = self.stamps.front() {
            if now.saturating_duration_since(*oldest) < window {
                break;
            }
            self.stamps.pop_front();
            dropped += 1;
        }
        dropped
    }

    /// Appends an admission instant.
    ///
    /// An instant older than the newest entry is clamped forward so the
    /// queue stays ordered.
    pub fn record(&mut self, now: Instant) {
        let stamp = self.stamps.back().map_or(now, |latest| now.max(*latest));
        self.stamps.push_back(stamp);
    }

    /// Counts live entries without mutating the window.
    #[must_use]
    pub fn live_count(&self, now: Instant, window: Duration) -> usize {
        self.stamps.iter().filter(|stamp| now.saturating_duration_since(**stamp) < window).count()
    }

    /// Time until the oldest entry leaves the window.
    #[must_use]
    pub fn retry_after(&self, now: Instant, window: Duration) -> Duration {
        self.stamps
            .front()
            .map_or(Duration::ZERO, |oldest| (*oldest + window).saturating_duration_since(now))
    }

    /// Newest recorded instant.
    #[must_use]
    pub fn latest(&self) -> Option<Instant> {
        self.stamps.back().copied()
    }

    /// Number of stored entries (live or not yet purged).
    #[must_use]
    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    /// Returns true when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purge_removes_only_expired_front_entries() {
        let start = Instant::now();
        let mut window = UsageWindow::new();
        window.record(start);
        window.record(start + Duration::from_secs(30));
        window.record(start + Duration::from_secs(59));
        let dropped = window.purge(start + Duration::from_secs(60), Duration::from_secs(60));
        assert_eq!(dropped, 1);
        assert_eq!(window.len(), 2);
        let retry = window.retry_after(start + Duration::from_secs(60), Duration::from_secs(60));
        assert_eq!(retry, Duration::from_secs(30));
    }

    #[test]
    fn retry_after_tracks_oldest_expiry() {
        let start = Instant::now();
        let mut window = UsageWindow::new();
        window.record(start);
        window.record(start + Duration::from_secs(2));
        let retry = window.retry_after(start + Duration::from_secs(3), Duration::from_secs(60));
        assert_eq!(retry, Duration::from_secs(57));
    }

    #[test]
    fn out_of_order_record_is_clamped() {
        let start = Instant::now();
        let mut window = UsageWindow::new();
        window.record(start + Duration::from_secs(5));
        window.record(start);
        assert_eq!(window.latest(), Some(start + Duration::from_secs(5)));
        assert_eq!(window.len(), 2);
        let retry = window.retry_after(start + Duration::from_secs(5), Duration::from_secs(60));
        assert_eq!(retry, Duration::from_secs(60));
    }
}
