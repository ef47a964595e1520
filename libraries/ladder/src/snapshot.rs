use std::collections::{BTreeMap, BTreeSet};

use im::OrdMap;

use crate::{
    backend::ProgressRow,
    level::{ItemId, MasteryLevel, MasteryRecord},
    session::UserId,
};

/// One scope's worth of records, held in memory by a tab.
///
/// Backed by a persistent map so handing a copy to another tab or keeping one around for a rollback
/// doesn't copy every record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    records: OrdMap<ItemId, MasteryRecord>,
}

impl Snapshot {
    pub fn from_parts(
        levels: impl IntoIterator<Item = (ItemId, MasteryLevel)>,
        archived_ids: impl IntoIterator<Item = ItemId>,
    ) -> Self {
        let mut snapshot = Snapshot::default();
        for (item_id, level) in levels {
            snapshot.set_level(item_id, level);
        }
        for item_id in archived_ids {
            snapshot.set_archived(item_id, true);
        }
        snapshot
    }

    pub fn from_rows(rows: impl IntoIterator<Item = ProgressRow>) -> Self {
        Snapshot {
            records: rows
                .into_iter()
                .map(|row| (row.kanji_id, row.record()))
                .collect(),
        }
    }

    pub fn to_rows(&self, user_id: &UserId) -> Vec<ProgressRow> {
        self.records
            .iter()
            .map(|(item_id, record)| ProgressRow::new(user_id, *item_id, *record))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn record(&self, item_id: ItemId) -> Option<MasteryRecord> {
        self.records.get(&item_id).copied()
    }

    pub fn level_of(&self, item_id: ItemId) -> MasteryLevel {
        self.record(item_id).unwrap_or_default().level
    }

    pub fn is_archived(&self, item_id: ItemId) -> bool {
        self.record(item_id).unwrap_or_default().archived
    }

    /// Returns the record as it is after the write.
    pub fn set_level(&mut self, item_id: ItemId, level: MasteryLevel) -> MasteryRecord {
        let record = self.records.entry(item_id).or_insert_with(MasteryRecord::default);
        record.level = level;
        *record
    }

    pub fn set_archived(&mut self, item_id: ItemId, archived: bool) -> MasteryRecord {
        let record = self.records.entry(item_id).or_insert_with(MasteryRecord::default);
        record.archived = archived;
        *record
    }

    /// Put a record back exactly as it was, including "never written".
    pub fn restore(&mut self, item_id: ItemId, record: Option<MasteryRecord>) {
        match record {
            Some(record) => {
                self.records.insert(item_id, record);
            }
            None => {
                self.records.remove(&item_id);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ItemId, MasteryRecord)> + '_ {
        self.records
            .iter()
            .map(|(item_id, record)| (*item_id, *record))
    }

    pub fn levels(&self) -> impl Iterator<Item = (ItemId, MasteryLevel)> + '_ {
        self.iter().map(|(item_id, record)| (item_id, record.level))
    }

    /// Records that carry a level, leaving out ones that are only archived (locked and archived).
    pub fn leveled(&self) -> impl Iterator<Item = (ItemId, MasteryLevel)> + '_ {
        self.iter()
            .filter(|(_, record)| !(record.archived && record.level == MasteryLevel::Locked))
            .map(|(item_id, record)| (item_id, record.level))
    }

    pub fn archived_ids(&self) -> BTreeSet<ItemId> {
        self.iter()
            .filter(|(_, record)| record.archived)
            .map(|(item_id, _)| item_id)
            .collect()
    }

    /// The `{"<item id>": <level>}` device blob.
    pub fn levels_blob(&self) -> String {
        let levels: BTreeMap<ItemId, u8> = self
            .leveled()
            .map(|(item_id, level)| (item_id, level.value()))
            .collect();
        // a map with integer keys and integer values always serializes
        serde_json::to_string(&levels).unwrap_or_else(|_| "{}".to_string())
    }

    /// The `[<item id>, ...]` device blob.
    pub fn archived_blob(&self) -> String {
        serde_json::to_string(&self.archived_ids()).unwrap_or_else(|_| "[]".to_string())
    }
}

/// Parse the levels blob. Values that are not ladder steps are bucketed.
pub fn parse_levels_blob(blob: &str) -> Result<BTreeMap<ItemId, MasteryLevel>, serde_json::Error> {
    let raw: BTreeMap<ItemId, i64> = serde_json::from_str(blob)?;
    Ok(raw
        .into_iter()
        .map(|(item_id, level)| (item_id, MasteryLevel::from_stored(item_id, level)))
        .collect())
}

pub fn parse_archived_blob(blob: &str) -> Result<BTreeSet<ItemId>, serde_json::Error> {
    serde_json::from_str(blob)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blobs_match_the_legacy_layout() {
        let mut snapshot = Snapshot::default();
        snapshot.set_level(12, MasteryLevel::Equipped);
        snapshot.set_level(3, MasteryLevel::Mastered);
        snapshot.set_archived(40, true);

        assert_eq!(snapshot.levels_blob(), r#"{"3":100,"12":60}"#);
        assert_eq!(snapshot.archived_blob(), "[40]");
    }

    #[test]
    fn archive_only_records_stay_out_of_the_levels_blob() {
        let mut snapshot = Snapshot::default();
        snapshot.set_level(5, MasteryLevel::Locked);
        snapshot.set_archived(6, true);
        snapshot.set_level(7, MasteryLevel::Discovered);
        snapshot.set_archived(7, true);

        assert_eq!(snapshot.levels_blob(), r#"{"5":0,"7":20}"#);

        let reread = Snapshot::from_parts(
            parse_levels_blob(&snapshot.levels_blob()).unwrap(),
            parse_archived_blob(&snapshot.archived_blob()).unwrap(),
        );
        assert_eq!(reread, snapshot);
    }

    #[test]
    fn parses_legacy_blobs() {
        let levels = parse_levels_blob(r#"{"1": 20, "7": 100, "8": 33}"#).unwrap();
        assert_eq!(levels[&1], MasteryLevel::Discovered);
        assert_eq!(levels[&7], MasteryLevel::Mastered);
        assert_eq!(levels[&8], MasteryLevel::Equipped);

        let archived = parse_archived_blob("[5, 2, 5]").unwrap();
        assert_eq!(archived.into_iter().collect::<Vec<_>>(), vec![2, 5]);

        assert!(parse_levels_blob("{not json").is_err());
        assert!(parse_archived_blob(r#"{"5": true}"#).is_err());
    }

    #[test]
    fn level_and_archive_are_independent() {
        let mut snapshot = Snapshot::default();
        snapshot.set_level(9, MasteryLevel::Skilled);
        snapshot.set_archived(9, true);
        assert_eq!(snapshot.level_of(9), MasteryLevel::Skilled);
        snapshot.set_level(9, MasteryLevel::Discovered);
        assert!(snapshot.is_archived(9));
    }

    #[test]
    fn restore_removes_records_that_never_existed() {
        let mut snapshot = Snapshot::default();
        snapshot.set_level(4, MasteryLevel::Skilled);
        snapshot.restore(4, None);
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.level_of(4), MasteryLevel::Locked);
    }
}
