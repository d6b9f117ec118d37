//! Per-event-id dedup cache (spec §4.9 "deduped-by-uuid"), grounded in the
//! original's `cache.add("uuid" + event_id.hex, True)` idiom and in
//! `faultline_harness::throttle::ThrottleGate`'s DashMap+TTL shape.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use uuid::Uuid;

pub struct EventDedup {
    seen: DashMap<Uuid, Instant>,
    ttl: Duration,
}

impl EventDedup {
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            ttl,
        }
    }

    /// `true` the first time `id` is claimed within the TTL window; `false`
    /// on every repeat, mirroring `cache.add`'s "only succeeds once" return.
    pub fn try_claim(&self, id: Uuid) -> bool {
        let now = Instant::now();
        if let Some(mut entry) = self.seen.get_mut(&id) {
            if now.duration_since(*entry) < self.ttl {
                return false;
            }
            *entry = now;
            return true;
        }
        self.seen.insert(id, now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_claim_succeeds_repeat_fails() {
        let dedup = EventDedup::new(Duration::from_secs(60));
        let id = Uuid::new_v4();
        assert!(dedup.try_claim(id));
        assert!(!dedup.try_claim(id));
    }

    #[test]
    fn distinct_ids_both_succeed() {
        let dedup = EventDedup::new(Duration::from_secs(60));
        assert!(dedup.try_claim(Uuid::new_v4()));
        assert!(dedup.try_claim(Uuid::new_v4()));
    }

    #[test]
    fn claim_succeeds_again_after_ttl() {
        let dedup = EventDedup::new(Duration::from_millis(1));
        let id = Uuid::new_v4();
        assert!(dedup.try_claim(id));
        std::thread::sleep(Duration::from_millis(5));
        assert!(dedup.try_claim(id));
    }
}
