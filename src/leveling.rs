//! Levels and leaderboards derived from ledger totals.
//!
//! Nothing here keeps state of its own. [`LevelScale`] is a pure step
//! function over point totals, and [`Leaderboard`] ranks whatever standings
//! snapshot the store returns.

use std::collections::HashMap;

use crate::error::{LedgerError, Result};
use crate::models::*;
use crate::store::Store;

/// Default level thresholds: level `i + 1` starts at `DEFAULT_THRESHOLDS[i]` points.
pub const DEFAULT_THRESHOLDS: &[i64] = &[0, 250, 1300, 1800, 2400];

/// Points per level past the end of the threshold table.
pub const DEFAULT_LEVEL_STEP: i64 = 600;

/// Monotonic mapping from point totals to levels.
///
/// `threshold(1)` is always 0. Past the explicit table each further level
/// costs `step` more points than the last one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelScale {
    thresholds: Vec<i64>,
    step: i64,
}

impl Default for LevelScale {
    fn default() -> Self {
        Self {
            thresholds: DEFAULT_THRESHOLDS.to_vec(),
            step: DEFAULT_LEVEL_STEP,
        }
    }
}

impl LevelScale {
    pub fn new(thresholds: Vec<i64>, step: i64) -> Result<Self> {
        if thresholds.first() != Some(&0) {
            return Err(LedgerError::Validation(
                "level thresholds must start at 0".to_string(),
            ));
        }
        if thresholds.windows(2).any(|w| w[0] >= w[1]) {
            return Err(LedgerError::Validation(
                "level thresholds must be strictly increasing".to_string(),
            ));
        }
        if step <= 0 {
            return Err(LedgerError::Validation(
                "level step must be positive".to_string(),
            ));
        }
        Ok(Self { thresholds, step })
    }

    /// Points required to reach `level`. Levels start at 1.
    ///
    /// Saturates at `i64::MAX` for levels no total can reach.
    pub fn threshold(&self, level: u64) -> i64 {
        let level = level.max(1);
        let table = self.thresholds.len() as u64;
        if level <= table {
            self.thresholds[(level - 1) as usize]
        } else {
            let last = self.thresholds[self.thresholds.len() - 1];
            let steps = i64::try_from(level - table).unwrap_or(i64::MAX);
            last.saturating_add(self.step.saturating_mul(steps))
        }
    }

    /// Greatest level whose threshold is at or below `total`.
    ///
    /// Negative totals (only reachable through reversals) are level 1.
    /// Levels are `u64`, so every `i64` total has an exact level even with a step of 1.
    pub fn level_for(&self, total: i64) -> u64 {
        let table = self.thresholds.len();
        let last = self.thresholds[table - 1];
        if total >= last {
            // total - last cannot overflow: last >= 0 and total >= last.
            let extra = ((total - last) / self.step) as u64;
            return table as u64 + extra;
        }
        let reached = self.thresholds.partition_point(|&t| t <= total);
        reached.max(1) as u64
    }

    /// Points still needed for the next level. Never negative.
    pub fn points_to_next_level(&self, total: i64) -> i64 {
        let level = self.level_for(total);
        (self.threshold(level.saturating_add(1)) - total).max(0)
    }

    pub fn progress(&self, total: i64) -> LevelProgress {
        LevelProgress {
            total,
            level: self.level_for(total),
            points_to_next_level: self.points_to_next_level(total),
        }
    }
}

/// Fold a ledger, in id order, into one [`UserTotal`] per user.
///
/// `reached_seq` is the first entry after which the user's running total
/// equalled the final total. Profile fields are left empty.
pub fn standings_from_entries(entries: &[LedgerEntry]) -> Vec<UserTotal> {
    let mut finals: HashMap<&str, i64> = HashMap::new();
    for entry in entries {
        *finals.entry(entry.user_id.as_str()).or_insert(0) += entry.points;
    }

    let mut running: HashMap<&str, i64> = HashMap::new();
    let mut reached: HashMap<&str, &LedgerEntry> = HashMap::new();
    for entry in entries {
        let user = entry.user_id.as_str();
        let sum = running.entry(user).or_insert(0);
        *sum += entry.points;
        if *sum == finals[user] {
            reached.entry(user).or_insert(entry);
        }
    }

    let mut totals: Vec<UserTotal> = reached
        .into_iter()
        .map(|(user, entry)| UserTotal {
            user_id: user.to_string(),
            total: finals[user],
            reached_seq: entry.id,
            reached_at: entry.created_at,
            display_name: None,
            cohort: None,
        })
        .collect();
    totals.sort_by_key(|t| t.reached_seq);
    totals
}

/// Order totals into a leaderboard: highest total first, earlier
/// `reached_seq` wins ties. Ranks run 1..=n with no gaps.
pub fn rank_totals(mut totals: Vec<UserTotal>, scale: &LevelScale) -> Vec<RankedUser> {
    totals.sort_by(|a, b| {
        b.total
            .cmp(&a.total)
            .then_with(|| a.reached_seq.cmp(&b.reached_seq))
    });
    totals
        .into_iter()
        .enumerate()
        .map(|(i, t)| RankedUser {
            rank: i + 1,
            level: scale.level_for(t.total),
            user_id: t.user_id,
            display_name: t.display_name,
            cohort: t.cohort,
            total: t.total,
        })
        .collect()
}

/// Leveling and ranking over a store's ledger.
#[derive(Debug, Clone)]
pub struct Leaderboard<S> {
    store: S,
    scale: LevelScale,
}

impl<S: Store> Leaderboard<S> {
    pub fn new(store: S, scale: LevelScale) -> Self {
        Self { store, scale }
    }

    pub fn scale(&self) -> &LevelScale {
        &self.scale
    }

    /// Rank every user with ledger activity, optionally within one cohort.
    pub fn rank_all(&self, cohort: Option<&str>, limit: Option<usize>) -> Result<Vec<RankedUser>> {
        let totals = self.store.standings(cohort)?;
        let mut ranked = rank_totals(totals, &self.scale);
        if let Some(limit) = limit {
            ranked.truncate(limit);
        }
        tracing::debug!(cohort = ?cohort, rows = ranked.len(), "Ranked standings");
        Ok(ranked)
    }

    /// Total, level and global position for one user, from a single snapshot.
    pub fn summary_for(&self, user_id: &str) -> Result<UserPointsSummary> {
        let ranked = rank_totals(self.store.standings(None)?, &self.scale);
        let position = ranked.iter().position(|r| r.user_id == user_id);

        let total = position.map_or(0, |i| ranked[i].total);
        let points_to_next_rank = position
            .filter(|&i| i > 0)
            .map(|i| ranked[i - 1].total - total + 1);

        Ok(UserPointsSummary {
            user_id: user_id.to_string(),
            total,
            level: self.scale.level_for(total),
            points_to_next_level: self.scale.points_to_next_level(total),
            rank: position.map(|i| i + 1),
            points_to_next_rank,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn entry(id: EntryId, user: &str, points: i64) -> LedgerEntry {
        LedgerEntry {
            id,
            user_id: user.to_string(),
            task_id: Uuid::nil(),
            points,
            dedupe_key: None,
            reverses: None,
            reason: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn default_scale_matches_sample_leaderboard() {
        let scale = LevelScale::default();
        for (points, level) in [
            (2450, 5),
            (2100, 4),
            (1850, 4),
            (1700, 3),
            (1350, 3),
            (1200, 2),
            (1000, 2),
            (350, 2),
            (0, 1),
        ] {
            assert_eq!(scale.level_for(points), level, "points = {}", points);
        }
    }

    #[test]
    fn level_continues_past_table_by_step() {
        let scale = LevelScale::default();
        assert_eq!(scale.threshold(6), 3000);
        assert_eq!(scale.threshold(7), 3600);
        assert_eq!(scale.level_for(2999), 5);
        assert_eq!(scale.level_for(3000), 6);
        assert_eq!(scale.level_for(3650), 7);
    }

    #[test]
    fn level_is_monotonic() {
        let scale = LevelScale::default();
        let mut previous = scale.level_for(-500);
        for total in -500..5000 {
            let level = scale.level_for(total);
            assert!(level >= previous, "level dropped at {}", total);
            previous = level;
        }
    }

    #[test]
    fn negative_totals_are_level_one() {
        let scale = LevelScale::default();
        assert_eq!(scale.level_for(-50), 1);
        assert_eq!(scale.points_to_next_level(-50), 300);
    }

    #[test]
    fn points_to_next_level_is_never_negative() {
        let scale = LevelScale::default();
        for total in -100..4000 {
            assert!(scale.points_to_next_level(total) > 0);
        }
        assert_eq!(scale.points_to_next_level(250), 1050);
        assert_eq!(scale.points_to_next_level(249), 1);
    }

    #[test]
    fn unit_step_keeps_exact_levels_for_large_totals() {
        let scale = LevelScale::new(vec![0], 1).unwrap();
        let total = 5_000_000_000;
        assert_eq!(scale.level_for(total), 5_000_000_001);
        assert_eq!(scale.points_to_next_level(total), 1);
        assert!(scale.points_to_next_level(i64::MAX - 1) > 0);
    }

    #[test]
    fn rejects_invalid_scales() {
        assert!(LevelScale::new(vec![], 10).is_err());
        assert!(LevelScale::new(vec![10, 20], 10).is_err());
        assert!(LevelScale::new(vec![0, 20, 20], 10).is_err());
        assert!(LevelScale::new(vec![0, 20], 0).is_err());
        assert!(LevelScale::new(vec![0], 100).is_ok());
    }

    #[test]
    fn standings_track_first_time_total_was_reached() {
        // user 1: 10 -> 60 -> 10 (reversal); first reached 10 at entry 1
        let entries = vec![
            entry(1, "1", 10),
            entry(2, "2", 10),
            entry(3, "1", 50),
            entry(4, "1", -50),
        ];
        let totals = standings_from_entries(&entries);
        assert_eq!(totals.len(), 2);
        let one = totals.iter().find(|t| t.user_id == "1").unwrap();
        assert_eq!(one.total, 10);
        assert_eq!(one.reached_seq, 1);
        let two = totals.iter().find(|t| t.user_id == "2").unwrap();
        assert_eq!(two.reached_seq, 2);
    }

    #[test]
    fn ties_go_to_whoever_reached_the_total_first() {
        let entries = vec![
            entry(1, "late", 5),
            entry(2, "early", 20),
            entry(3, "late", 15),
            entry(4, "top", 100),
        ];
        let ranked = rank_totals(standings_from_entries(&entries), &LevelScale::default());
        let order: Vec<_> = ranked.iter().map(|r| r.user_id.as_str()).collect();
        assert_eq!(order, vec!["top", "early", "late"]);
        let ranks: Vec<_> = ranked.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
    }
}
