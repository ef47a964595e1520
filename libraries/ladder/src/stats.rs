//! Summaries for the progress page.

use serde::{Deserialize, Serialize};

use crate::{
    level::{ItemId, MasteryLevel},
    snapshot::Snapshot,
};

/// Counts over the records that exist in a snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressStats {
    /// Items with a level set. Records that are only archived don't count.
    pub total: usize,
    pub completed: usize,
    /// Past locked but not mastered yet.
    pub in_progress: usize,
}

impl ProgressStats {
    pub fn of(snapshot: &Snapshot) -> Self {
        snapshot
            .leveled()
            .fold(ProgressStats::default(), |mut stats, (_, level)| {
                stats.total += 1;
                match level {
                    MasteryLevel::Mastered => stats.completed += 1,
                    MasteryLevel::Locked => {}
                    _ => stats.in_progress += 1,
                }
                stats
            })
    }
}

/// How many items sit on each step of the ladder, out of a given set of items.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
    pub all: usize,
    pub locked: usize,
    pub discovered: usize,
    pub equipped: usize,
    pub skilled: usize,
    pub mastered: usize,
}

impl CategoryCounts {
    /// Archived items are left out entirely, including from `all`.
    pub fn tally(
        items: impl IntoIterator<Item = ItemId>,
        level_of: impl Fn(ItemId) -> MasteryLevel,
        is_archived: impl Fn(ItemId) -> bool,
    ) -> Self {
        let mut counts = CategoryCounts::default();
        for item_id in items.into_iter().filter(|item_id| !is_archived(*item_id)) {
            counts.all += 1;
            *counts.get_mut(level_of(item_id)) += 1;
        }
        counts
    }

    pub fn get(&self, level: MasteryLevel) -> usize {
        match level {
            MasteryLevel::Locked => self.locked,
            MasteryLevel::Discovered => self.discovered,
            MasteryLevel::Equipped => self.equipped,
            MasteryLevel::Skilled => self.skilled,
            MasteryLevel::Mastered => self.mastered,
        }
    }

    fn get_mut(&mut self, level: MasteryLevel) -> &mut usize {
        match level {
            MasteryLevel::Locked => &mut self.locked,
            MasteryLevel::Discovered => &mut self.discovered,
            MasteryLevel::Equipped => &mut self.equipped,
            MasteryLevel::Skilled => &mut self.skilled,
            MasteryLevel::Mastered => &mut self.mastered,
        }
    }
}

/// Which items the progress grid shows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressFilter {
    #[default]
    All,
    Level(MasteryLevel),
}

impl ProgressFilter {
    /// Parses the `filter` query parameter (`locked`, `discovered`, ...). Anything unknown means all.
    pub fn from_query(value: &str) -> Self {
        MasteryLevel::ALL
            .into_iter()
            .find(|level| level.label().eq_ignore_ascii_case(value))
            .map(ProgressFilter::Level)
            .unwrap_or(ProgressFilter::All)
    }

    /// Non-archived items matching the filter, in the order given.
    pub fn filter_items(
        self,
        items: impl IntoIterator<Item = ItemId>,
        level_of: impl Fn(ItemId) -> MasteryLevel,
        is_archived: impl Fn(ItemId) -> bool,
    ) -> Vec<ItemId> {
        items
            .into_iter()
            .filter(|item_id| !is_archived(*item_id))
            .filter(|item_id| match self {
                ProgressFilter::All => true,
                ProgressFilter::Level(level) => level_of(*item_id) == level,
            })
            .collect()
    }
}

/// Sum of every level in the snapshot divided by `total_items`, rounded to two decimals.
pub fn overall_progress(snapshot: &Snapshot, total_items: usize) -> f64 {
    if total_items == 0 {
        return 0.0;
    }
    let points: u64 = snapshot
        .levels()
        .map(|(_, level)| u64::from(level.value()))
        .sum();
    let percentage = points as f64 / total_items as f64;
    (percentage * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Snapshot {
        Snapshot::from_parts(
            [
                (1, MasteryLevel::Mastered),
                (2, MasteryLevel::Discovered),
                (3, MasteryLevel::Skilled),
                (4, MasteryLevel::Locked),
            ],
            [3],
        )
    }

    #[test]
    fn stats_count_existing_records() {
        assert_eq!(
            ProgressStats::of(&sample()),
            ProgressStats {
                total: 4,
                completed: 1,
                in_progress: 2,
            }
        );
    }

    #[test]
    fn archive_only_records_are_not_counted() {
        let mut snapshot = sample();
        snapshot.set_archived(9, true);
        assert_eq!(ProgressStats::of(&snapshot).total, 4);
    }

    #[test]
    fn category_counts_skip_archived() {
        let snapshot = sample();
        let counts = CategoryCounts::tally(
            1..=6,
            |item_id| snapshot.level_of(item_id),
            |item_id| snapshot.is_archived(item_id),
        );
        assert_eq!(counts.all, 5);
        assert_eq!(counts.mastered, 1);
        assert_eq!(counts.discovered, 1);
        assert_eq!(counts.skilled, 0);
        assert_eq!(counts.locked, 3);
        assert_eq!(counts.get(MasteryLevel::Locked), 3);
    }

    #[test]
    fn filter_parses_query_and_keeps_order() {
        let snapshot = sample();
        assert_eq!(
            ProgressFilter::from_query("mastered"),
            ProgressFilter::Level(MasteryLevel::Mastered)
        );
        assert_eq!(ProgressFilter::from_query("everything"), ProgressFilter::All);

        let shown = ProgressFilter::from_query("locked").filter_items(
            [6, 4, 3, 5],
            |item_id| snapshot.level_of(item_id),
            |item_id| snapshot.is_archived(item_id),
        );
        assert_eq!(shown, vec![6, 4, 5]);
    }

    #[test]
    fn overall_progress_rounds_to_two_decimals() {
        // 100 + 20 + 80 + 0 = 200 points over 3 items
        assert_eq!(overall_progress(&sample(), 3), 66.67);
        assert_eq!(overall_progress(&sample(), 0), 0.0);
    }
}
