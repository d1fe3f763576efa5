//! Per-account reliability ranking.
//!
//! Scores are an exponentially decayed success ratio in [0.01, 1.0],
//! stored as scaled integers so concurrent ingestion calls can report
//! outcomes without lost updates and without holding a lock across I/O.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Fixed-point scale: a score of 1.0 is stored as `SCALE`.
const SCALE: u32 = 1_000_000;
/// Scores never fall below this floor, so a bad account keeps receiving a
/// trickle of traffic and can recover.
const FLOOR: u32 = SCALE / 100;
/// Weight of the newest observation, as a fraction (1/WEIGHT_DIV).
const WEIGHT_DIV: u32 = 5;

/// Reliability scores for every account in the current resource set.
#[derive(Debug, Default)]
pub struct AccountRanker {
    scores: RwLock<HashMap<String, Arc<AtomicU32>>>,
}

impl AccountRanker {
    /// Create an empty ranker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one ingestion attempt against an account.
    ///
    /// Unknown accounts are added at full score first, so feedback arriving
    /// before the next snapshot publication is not dropped.
    pub fn report(&self, account: &str, success: bool) {
        let cell = self.cell(account);
        let observation = if success { SCALE } else { 0 };
        // Lock-free decayed update; contention retries via compare-exchange.
        let mut current = cell.load(Ordering::Relaxed);
        loop {
            let next = (current / WEIGHT_DIV * (WEIGHT_DIV - 1) + observation / WEIGHT_DIV)
                .clamp(FLOOR, SCALE);
            match cell.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    /// Current score of an account; unknown accounts score 1.0.
    pub fn score(&self, account: &str) -> f64 {
        self.scores
            .read()
            .get(account)
            .map(|cell| cell.load(Ordering::Relaxed) as f64 / SCALE as f64)
            .unwrap_or(1.0)
    }

    /// Replace the tracked account set with the accounts of a new snapshot.
    ///
    /// Accounts that survive keep their scores; new accounts start at full
    /// score; departed accounts are dropped.
    pub fn sync_accounts(&self, accounts: &[String]) {
        let mut scores = self.scores.write();
        scores.retain(|name, _| accounts.iter().any(|a| a == name));
        for account in accounts {
            scores
                .entry(account.clone())
                .or_insert_with(|| Arc::new(AtomicU32::new(SCALE)));
        }
    }

    /// The given accounts ordered by descending score; ties keep their
    /// input order.
    pub fn order_by_rank(&self, accounts: &[String]) -> Vec<String> {
        let scores = self.scores.read();
        let mut ordered: Vec<(String, u32)> = accounts
            .iter()
            .map(|name| {
                let score = scores
                    .get(name)
                    .map(|cell| cell.load(Ordering::Relaxed))
                    .unwrap_or(SCALE);
                (name.clone(), score)
            })
            .collect();
        ordered.sort_by(|a, b| b.1.cmp(&a.1));
        ordered.into_iter().map(|(name, _)| name).collect()
    }

    fn cell(&self, account: &str) -> Arc<AtomicU32> {
        if let Some(cell) = self.scores.read().get(account) {
            return cell.clone();
        }
        self.scores
            .write()
            .entry(account.to_string())
            .or_insert_with(|| Arc::new(AtomicU32::new(SCALE)))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_account_scores_full() {
        let ranker = AccountRanker::new();
        assert_eq!(ranker.score("fresh"), 1.0);
    }

    #[test]
    fn test_failure_lowers_success_raises() {
        let ranker = AccountRanker::new();
        ranker.report("acc1", false);
        let after_failure = ranker.score("acc1");
        assert!(after_failure < 1.0);

        ranker.report("acc1", true);
        let after_success = ranker.score("acc1");
        assert!(after_success > after_failure);
        assert!(after_success <= 1.0);
    }

    #[test]
    fn test_score_is_floored() {
        let ranker = AccountRanker::new();
        for _ in 0..200 {
            ranker.report("acc1", false);
        }
        assert!(ranker.score("acc1") >= 0.01 - f64::EPSILON);
    }

    #[test]
    fn test_score_is_capped() {
        let ranker = AccountRanker::new();
        for _ in 0..200 {
            ranker.report("acc1", true);
        }
        assert!(ranker.score("acc1") <= 1.0);
    }

    #[test]
    fn test_order_by_rank_prefers_reliable_accounts() {
        let ranker = AccountRanker::new();
        let accounts = vec!["acc1".to_string(), "acc2".to_string(), "acc3".to_string()];
        ranker.sync_accounts(&accounts);

        ranker.report("acc2", false);
        ranker.report("acc2", false);
        ranker.report("acc3", false);

        let ordered = ranker.order_by_rank(&accounts);
        assert_eq!(ordered[0], "acc1");
        assert_eq!(ordered[1], "acc3");
        assert_eq!(ordered[2], "acc2");
    }

    #[test]
    fn test_sync_accounts_keeps_surviving_scores() {
        let ranker = AccountRanker::new();
        ranker.sync_accounts(&["acc1".to_string(), "acc2".to_string()]);
        ranker.report("acc1", false);
        let degraded = ranker.score("acc1");

        ranker.sync_accounts(&["acc1".to_string(), "acc3".to_string()]);
        assert_eq!(ranker.score("acc1"), degraded);
        assert_eq!(ranker.score("acc3"), 1.0);
        // acc2 was dropped; it reads as an unknown account again.
        assert_eq!(ranker.score("acc2"), 1.0);
    }

    #[test]
    fn test_concurrent_reports_are_not_lost() {
        use std::sync::Arc;
        let ranker = Arc::new(AccountRanker::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let ranker = ranker.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    ranker.report("acc1", false);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        // Heavy failure traffic pins the score at the floor.
        assert!(ranker.score("acc1") < 0.02);
    }
}
