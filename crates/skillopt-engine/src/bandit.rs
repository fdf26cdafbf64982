//! Arm selection and update serialization
//!
//! UCB1 over the arms of one partition, with a cold-start sweep that pulls
//! every unplayed arm before any scoring happens. Concurrent stat updates on
//! the same arm are serialized through an in-process lock registry so a
//! read-modify-write never loses an observation.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use skillopt_core::Arm;

/// Pick the arm to serve next from a partition's arm set.
///
/// Arms must be given in insertion order. Returns `None` on an empty set.
///
/// Unplayed arms win outright, earliest first. Otherwise UCB1:
/// `mean + c * sqrt(2 ln T / n)` with `T` the partition-wide pull count.
/// Score ties fall back to the higher mean, then to insertion order.
pub fn select_arm<'a>(arms: &'a [Arm], exploration: f64) -> Option<&'a Arm> {
    if arms.is_empty() {
        return None;
    }

    // Cold-start sweep
    if let Some(unplayed) = arms.iter().find(|a| a.stats.pulls == 0) {
        return Some(unplayed);
    }

    let total_pulls: u64 = arms.iter().map(|a| a.stats.pulls).sum();
    let ln_total = (total_pulls as f64).ln();

    let mut best: Option<(&Arm, f64)> = None;
    for arm in arms {
        let bonus = exploration * (2.0 * ln_total / arm.stats.pulls as f64).sqrt();
        let score = arm.stats.mean + bonus;

        best = match best {
            None => Some((arm, score)),
            Some((current, current_score)) => {
                if score > current_score
                    || (score == current_score && arm.stats.mean > current.stats.mean)
                {
                    Some((arm, score))
                } else {
                    Some((current, current_score))
                }
            }
        };
    }

    best.map(|(arm, _)| arm)
}

/// Highest-mean arm of a set, ties to the earliest.
pub fn best_arm<'a>(arms: &'a [Arm]) -> Option<&'a Arm> {
    arms.iter().reduce(|best, arm| {
        if arm.stats.mean > best.stats.mean {
            arm
        } else {
            best
        }
    })
}

/// Lowest-mean arm of a set, ties to the latest.
pub fn worst_arm<'a>(arms: &'a [Arm]) -> Option<&'a Arm> {
    arms.iter().reduce(|worst, arm| {
        if arm.stats.mean <= worst.stats.mean {
            arm
        } else {
            worst
        }
    })
}

/// In-process lock registry keyed by arm id.
///
/// `record_outcome` holds the arm's lock across its read-modify-write so two
/// concurrent rewards for the same arm serialize in some order rather than
/// clobbering each other.
#[derive(Default)]
pub struct ArmLockRegistry {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ArmLockRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for an arm id, created on first use.
    pub async fn lock_for(&self, arm_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(arm_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock entry for an arm that no longer exists.
    pub async fn forget(&self, arm_id: &str) {
        self.locks.lock().await.remove(arm_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skillopt_core::ArmParams;

    fn arm_with_stats(prompt: &str, pulls: u64, total_reward: f64) -> Arm {
        let mut arm = Arm::new("p1", "s1", ArmParams::new("model", prompt));
        for _ in 0..pulls {
            arm.stats.record(total_reward / pulls as f64);
        }
        arm
    }

    #[test]
    fn test_empty_set() {
        assert!(select_arm(&[], 1.0).is_none());
    }

    #[test]
    fn test_cold_start_sweep_in_insertion_order() {
        let arms = vec![
            arm_with_stats("a", 1, 0.9),
            arm_with_stats("b", 0, 0.0),
            arm_with_stats("c", 0, 0.0),
        ];
        let selected = select_arm(&arms, 1.0).unwrap();
        assert_eq!(selected.id, arms[1].id);
    }

    #[test]
    fn test_ucb_prefers_high_mean_when_counts_equal() {
        let arms = vec![arm_with_stats("a", 5, 1.0), arm_with_stats("b", 5, 4.0)];
        let selected = select_arm(&arms, 1.0).unwrap();
        assert_eq!(selected.id, arms[1].id);
    }

    #[test]
    fn test_ucb_explores_underplayed_arm() {
        // Arm a has a slightly better mean but far more pulls; the
        // exploration bonus should route to b.
        let arms = vec![arm_with_stats("a", 100, 60.0), arm_with_stats("b", 2, 1.0)];
        let selected = select_arm(&arms, 1.0).unwrap();
        assert_eq!(selected.id, arms[1].id);
    }

    #[test]
    fn test_exact_tie_falls_back_to_insertion_order() {
        let arms = vec![arm_with_stats("a", 3, 1.5), arm_with_stats("b", 3, 1.5)];
        let selected = select_arm(&arms, 1.0).unwrap();
        assert_eq!(selected.id, arms[0].id);
    }

    #[test]
    fn test_best_and_worst() {
        let arms = vec![
            arm_with_stats("a", 2, 1.0),
            arm_with_stats("b", 2, 1.8),
            arm_with_stats("c", 2, 0.4),
        ];
        assert_eq!(best_arm(&arms).unwrap().id, arms[1].id);
        assert_eq!(worst_arm(&arms).unwrap().id, arms[2].id);
    }

    #[tokio::test]
    async fn test_lock_registry_returns_same_lock() {
        let registry = ArmLockRegistry::new();
        let first = registry.lock_for("arm-1").await;
        let second = registry.lock_for("arm-1").await;
        assert!(Arc::ptr_eq(&first, &second));

        registry.forget("arm-1").await;
        let third = registry.lock_for("arm-1").await;
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[tokio::test]
    async fn test_serialized_updates_do_not_lose_increments() {
        use std::sync::atomic::{AtomicU64, Ordering};

        let registry = Arc::new(ArmLockRegistry::new());
        let counter = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let registry = registry.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                let lock = registry.lock_for("arm").await;
                let _guard = lock.lock().await;
                // Non-atomic read-modify-write, protected by the arm lock
                let value = counter.load(Ordering::SeqCst);
                tokio::task::yield_now().await;
                counter.store(value + 1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }
}
