use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::Rng;

/// Mirrors the original's one-letter block-cache codes (`v`, `t:<org>:<proj>`):
/// a present entry short-circuits the request before any database access
/// (spec §4.2 step 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockEntry {
    InvalidDsn,
    Throttled { org_pct: u8, project_pct: u8 },
}

#[derive(Debug, thiserror::Error)]
pub enum ThrottleError {
    #[error("invalid DSN")]
    InvalidDsn,
    #[error("throttled, retry after {retry_after_secs}s")]
    Throttled { retry_after_secs: u64 },
    #[error("events are not currently being accepted due to maintenance")]
    MaintenanceFreeze,
}

/// `ceil(0.02 * pct^2.3)`, with a 600s floor once either throttle hits 100%
/// (spec §4.2 step 3).
pub fn calculate_retry_after(pct: u8) -> u64 {
    if pct >= 100 {
        return 600;
    }
    (0.02 * (pct as f64).powf(2.3)).ceil() as u64
}

/// `true` unless a random roll falls within the throttled percentage
/// (spec §4.2 step 3, `authentication.py::is_accepting_events`).
fn is_accepting_events(pct: u8) -> bool {
    if pct == 0 {
        return true;
    }
    rand::thread_rng().gen_range(0..=100) > pct as i32
}

/// In-process block cache keyed by project id, TTL-bounded: single writer
/// per key, last write wins.
pub struct ThrottleGate {
    cache: DashMap<i64, (BlockEntry, Instant)>,
    ttl: Duration,
    audit_probability_denominator: u32,
}

impl ThrottleGate {
    pub fn new(ttl: Duration, audit_probability_denominator: u32) -> Self {
        Self {
            cache: DashMap::new(),
            ttl,
            audit_probability_denominator,
        }
    }

    /// Fast-path lookup before any database access. Returns `Err` when the
    /// cached entry is still fresh and denies the request, `Ok(())` when
    /// there is no cached decision (or it expired) and a lookup should
    /// proceed.
    pub fn check_cached(&self, project_id: i64) -> Result<(), ThrottleError> {
        let Some(entry) = self.cache.get(&project_id) else {
            return Ok(());
        };
        let (block, set_at) = *entry;
        if set_at.elapsed() >= self.ttl {
            drop(entry);
            self.cache.remove(&project_id);
            return Ok(());
        }
        match block {
            BlockEntry::InvalidDsn => Err(ThrottleError::InvalidDsn),
            BlockEntry::Throttled {
                org_pct,
                project_pct,
            } => {
                if !is_accepting_events(org_pct) || !is_accepting_events(project_pct) {
                    Err(ThrottleError::Throttled {
                        retry_after_secs: calculate_retry_after(org_pct.max(project_pct)),
                    })
                } else {
                    Ok(())
                }
            }
        }
    }

    pub fn record_invalid_dsn(&self, project_id: i64) {
        self.cache
            .insert(project_id, (BlockEntry::InvalidDsn, Instant::now()));
    }

    /// Applies the full decision from a fresh project lookup (spec §4.2
    /// step 3). Returns `Ok(())` if the request is admitted.
    pub fn decide(
        &self,
        project_id: i64,
        org_accepting_events: bool,
        org_pct: u8,
        project_pct: u8,
    ) -> Result<(), ThrottleError> {
        if !org_accepting_events || org_pct == 100 || project_pct == 100 {
            self.cache.insert(
                project_id,
                (
                    BlockEntry::Throttled {
                        org_pct,
                        project_pct,
                    },
                    Instant::now(),
                ),
            );
            return Err(ThrottleError::Throttled {
                retry_after_secs: 600,
            });
        }
        if org_pct > 0 || project_pct > 0 {
            self.cache.insert(
                project_id,
                (
                    BlockEntry::Throttled {
                        org_pct,
                        project_pct,
                    },
                    Instant::now(),
                ),
            );
            if !is_accepting_events(org_pct) || !is_accepting_events(project_pct) {
                return Err(ThrottleError::Throttled {
                    retry_after_secs: calculate_retry_after(org_pct.max(project_pct)),
                });
            }
        }
        Ok(())
    }

    /// With probability `1/audit_probability_denominator`, the caller should
    /// enqueue a background throttle re-evaluation (spec §4.2 step 4).
    pub fn should_audit(&self) -> bool {
        if self.audit_probability_denominator == 0 {
            return false;
        }
        rand::thread_rng().gen_range(0..self.audit_probability_denominator) == 0
    }
}

/// Checked first, ahead of DSN resolution (spec §6.7 maintenance-mode gate).
pub fn check_maintenance_freeze(frozen: bool) -> Result<(), ThrottleError> {
    if frozen {
        Err(ThrottleError::MaintenanceFreeze)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_floors_at_600_when_fully_throttled() {
        assert_eq!(calculate_retry_after(100), 600);
        assert_eq!(calculate_retry_after(101), 600);
    }

    #[test]
    fn retry_after_matches_power_curve() {
        // ceil(0.02 * 50^2.3) = ceil(0.02 * 7166.6...) = 144
        assert_eq!(calculate_retry_after(50), 144);
        assert_eq!(calculate_retry_after(0), 0);
    }

    #[test]
    fn cached_invalid_dsn_short_circuits() {
        let gate = ThrottleGate::new(Duration::from_secs(30), 5000);
        gate.record_invalid_dsn(42);
        assert!(matches!(
            gate.check_cached(42),
            Err(ThrottleError::InvalidDsn)
        ));
    }

    #[test]
    fn cached_entry_expires_after_ttl() {
        let gate = ThrottleGate::new(Duration::from_millis(1), 5000);
        gate.record_invalid_dsn(42);
        std::thread::sleep(Duration::from_millis(5));
        assert!(gate.check_cached(42).is_ok());
    }

    #[test]
    fn fully_throttled_org_always_rejects() {
        let gate = ThrottleGate::new(Duration::from_secs(30), 5000);
        let result = gate.decide(1, true, 100, 0);
        assert!(matches!(
            result,
            Err(ThrottleError::Throttled {
                retry_after_secs: 600
            })
        ));
    }

    #[test]
    fn org_not_accepting_events_always_rejects() {
        let gate = ThrottleGate::new(Duration::from_secs(30), 5000);
        let result = gate.decide(1, false, 0, 0);
        assert!(matches!(
            result,
            Err(ThrottleError::Throttled {
                retry_after_secs: 600
            })
        ));
    }

    #[test]
    fn zero_throttle_never_rejects() {
        let gate = ThrottleGate::new(Duration::from_secs(30), 5000);
        for _ in 0..50 {
            assert!(gate.decide(1, true, 0, 0).is_ok());
        }
    }

    #[test]
    fn maintenance_freeze_blocks_before_anything_else() {
        assert!(matches!(
            check_maintenance_freeze(true),
            Err(ThrottleError::MaintenanceFreeze)
        ));
        assert!(check_maintenance_freeze(false).is_ok());
    }
}
