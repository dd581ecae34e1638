//! Liveness tracking over the presence store.
//!
//! Presence records are leases: a record counts as "here" only while its
//! heartbeat is younger than the staleness threshold. Staleness is computed
//! at read time, every time a store snapshot arrives; nothing is deleted
//! server-side.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use signal_bus::{PeerId, PresenceRecord, PresenceStore};
use tokio::task::JoinHandle;
use tracing::warn;

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

/// Fresh peers as of `now_ms`: everyone but us whose lease is still inside
/// the threshold. Sorted by join time (then id) so consumers get a stable
/// ordering.
pub fn compute_roster(
    records: &[PresenceRecord],
    self_id: &PeerId,
    now_ms: i64,
    stale_threshold: Duration,
) -> Vec<PresenceRecord> {
    let threshold_ms = stale_threshold.as_millis() as i64;
    let mut roster: Vec<PresenceRecord> = records
        .iter()
        .filter(|record| &record.id != self_id && now_ms - record.last_seen_at < threshold_ms)
        .cloned()
        .collect();
    roster.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)));
    roster
}

/// Republish our own presence lease on a fixed period.
///
/// Best effort: a failed write is logged and retried on the next tick,
/// never fatal. The first upsert happens immediately so other peers see us
/// without waiting a full period.
pub(crate) fn spawn_heartbeat(
    presence: Arc<dyn PresenceStore>,
    self_id: PeerId,
    display_name: String,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let joined_at = now_millis();
        loop {
            let record = PresenceRecord {
                id: self_id.clone(),
                display_name: display_name.clone(),
                last_seen_at: now_millis(),
                joined_at,
            };
            if let Err(err) = presence.upsert(record).await {
                warn!(error = %err, "heartbeat write failed, retrying next tick");
            }
            tokio::time::sleep(interval).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: Duration = Duration::from_millis(15_000);

    fn record(id: &str, last_seen_at: i64) -> PresenceRecord {
        PresenceRecord {
            id: PeerId::from(id),
            display_name: id.to_string(),
            last_seen_at,
            joined_at: last_seen_at,
        }
    }

    #[test]
    fn filters_exactly_at_the_staleness_boundary() {
        let now = 1_000_000;
        let threshold_ms = THRESHOLD.as_millis() as i64;
        let records = vec![
            record("fresh", now - (threshold_ms - 1)),
            record("stale", now - (threshold_ms + 1)),
            record("edge", now - threshold_ms),
        ];

        let roster = compute_roster(&records, &PeerId::from("self"), now, THRESHOLD);
        let ids: Vec<&str> = roster.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["fresh"]);
    }

    #[test]
    fn excludes_self_even_when_fresh() {
        let now = 1_000_000;
        let records = vec![record("self", now), record("other", now)];

        let roster = compute_roster(&records, &PeerId::from("self"), now, THRESHOLD);
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].id.as_str(), "other");
    }

    #[test]
    fn orders_by_join_time_then_id() {
        let now = 1_000_000;
        let mut early = record("zeta", now);
        early.joined_at = 1;
        let mut late = record("alpha", now);
        late.joined_at = 2;
        let mut tie = record("beta", now);
        tie.joined_at = 2;

        let roster = compute_roster(
            &[late.clone(), tie.clone(), early.clone()],
            &PeerId::from("self"),
            now,
            THRESHOLD,
        );
        let ids: Vec<&str> = roster.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["zeta", "alpha", "beta"]);
    }
}
