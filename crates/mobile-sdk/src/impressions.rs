//! In-memory impression log: occurrence timestamps per message id.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::display::ImpressionRecorder;

#[derive(Debug, Default)]
pub struct ImpressionLog {
    messages: DashMap<String, Vec<DateTime<Utc>>>,
    chained_actions: DashMap<String, Vec<DateTime<Utc>>>,
}

impl ImpressionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message_impressions(&self, message_id: &str) -> usize {
        self.messages.get(message_id).map_or(0, |v| v.len())
    }

    pub fn chained_action_impressions(&self, message_id: &str) -> usize {
        self.chained_actions.get(message_id).map_or(0, |v| v.len())
    }

    pub fn last_message_impression(&self, message_id: &str) -> Option<DateTime<Utc>> {
        self.messages
            .get(message_id)
            .and_then(|v| v.last().copied())
    }

    /// Impressions of the message since `since`, for frequency caps like "2 per hour".
    pub fn message_impressions_since(&self, message_id: &str, since: DateTime<Utc>) -> usize {
        self.messages
            .get(message_id)
            .map_or(0, |v| v.iter().filter(|t| **t >= since).count())
    }
}

impl ImpressionRecorder for ImpressionLog {
    fn record_message_impression(&self, message_id: &str) -> anyhow::Result<()> {
        debug!(message_id = %message_id, "Recording message impression");
        self.messages
            .entry(message_id.to_string())
            .or_default()
            .push(Utc::now());
        Ok(())
    }

    fn record_chained_action_impression(&self, message_id: &str) -> anyhow::Result<()> {
        debug!(message_id = %message_id, "Recording chained action impression");
        self.chained_actions
            .entry(message_id.to_string())
            .or_default()
            .push(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_are_separate() {
        let log = ImpressionLog::new();
        log.record_message_impression("m1").unwrap();
        log.record_message_impression("m1").unwrap();
        log.record_chained_action_impression("m1").unwrap();

        assert_eq!(log.message_impressions("m1"), 2);
        assert_eq!(log.chained_action_impressions("m1"), 1);
        assert_eq!(log.message_impressions("m2"), 0);
        assert!(log.last_message_impression("m1").is_some());
        assert!(log.last_message_impression("m2").is_none());
    }

    #[test]
    fn test_impressions_since() {
        let log = ImpressionLog::new();
        let before = Utc::now() - chrono::Duration::hours(1);
        log.record_message_impression("m1").unwrap();
        assert_eq!(log.message_impressions_since("m1", before), 1);
        let after = Utc::now() + chrono::Duration::hours(1);
        assert_eq!(log.message_impressions_since("m1", after), 0);
    }
}
