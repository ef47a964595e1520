use serde::{Deserialize, Serialize};

use crate::error::ProgressError;

/// Identifier of a learning item (a kanji).
pub type ItemId = u32;

/// The five steps of the progress ladder. The discriminant is the percentage shown in the UI and stored
/// in `progress_level`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum MasteryLevel {
    #[default]
    Locked = 0,
    Discovered = 20,
    Equipped = 60,
    Skilled = 80,
    Mastered = 100,
}

impl MasteryLevel {
    pub const ALL: [MasteryLevel; 5] = [
        MasteryLevel::Locked,
        MasteryLevel::Discovered,
        MasteryLevel::Equipped,
        MasteryLevel::Skilled,
        MasteryLevel::Mastered,
    ];

    pub fn value(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            MasteryLevel::Locked => "Locked",
            MasteryLevel::Discovered => "Discovered",
            MasteryLevel::Equipped => "Equipped",
            MasteryLevel::Skilled => "Skilled",
            MasteryLevel::Mastered => "Mastered",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            MasteryLevel::Locked => "Word not learned yet",
            MasteryLevel::Discovered => "You've seen it, but can't really use it",
            MasteryLevel::Equipped => "You can recognize and sometimes use it",
            MasteryLevel::Skilled => "You can actively use it, though not flawlessly",
            MasteryLevel::Mastered => "Word fully part of your arsenal",
        }
    }

    /// Snap an arbitrary stored percentage onto the ladder.
    ///
    /// Older rows and hand-edited blobs can contain values that are not one of the five steps. They are
    /// bucketed the same way the progress page groups them.
    pub fn bucket(raw: i64) -> MasteryLevel {
        match raw {
            i64::MIN..=0 => MasteryLevel::Locked,
            1..=25 => MasteryLevel::Discovered,
            26..=50 => MasteryLevel::Equipped,
            51..=99 => MasteryLevel::Skilled,
            _ => MasteryLevel::Mastered,
        }
    }

    /// Like [`MasteryLevel::try_from`], but logs and buckets values that are off the ladder instead of
    /// failing. Used for data we read back, never for writes.
    pub(crate) fn from_stored(item_id: ItemId, raw: i64) -> MasteryLevel {
        MasteryLevel::try_from(raw).unwrap_or_else(|_| {
            let level = MasteryLevel::bucket(raw);
            log::warn!(
                "Stored level {raw} for item {item_id} is not a ladder step, treating it as {}",
                level.label()
            );
            level
        })
    }
}

impl TryFrom<i64> for MasteryLevel {
    type Error = ProgressError;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        MasteryLevel::ALL
            .into_iter()
            .find(|level| i64::from(level.value()) == raw)
            .ok_or(ProgressError::InvalidLevel(raw))
    }
}

impl From<MasteryLevel> for i64 {
    fn from(level: MasteryLevel) -> Self {
        i64::from(level.value())
    }
}

impl Serialize for MasteryLevel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.value())
    }
}

impl<'de> Deserialize<'de> for MasteryLevel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;

        let raw = i64::deserialize(deserializer)?;
        MasteryLevel::try_from(raw).map_err(D::Error::custom)
    }
}

/// What we know about one item in one scope. An item nobody has touched is `MasteryRecord::default()`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasteryRecord {
    pub level: MasteryLevel,
    pub archived: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_ladder_steps_convert() {
        for level in MasteryLevel::ALL {
            assert_eq!(MasteryLevel::try_from(i64::from(level)).unwrap(), level);
        }
        for raw in [-1, 1, 19, 21, 50, 99, 101] {
            assert!(matches!(
                MasteryLevel::try_from(raw),
                Err(ProgressError::InvalidLevel(r)) if r == raw
            ));
        }
    }

    #[test]
    fn bucket_matches_progress_page_groups() {
        assert_eq!(MasteryLevel::bucket(-5), MasteryLevel::Locked);
        assert_eq!(MasteryLevel::bucket(0), MasteryLevel::Locked);
        assert_eq!(MasteryLevel::bucket(1), MasteryLevel::Discovered);
        assert_eq!(MasteryLevel::bucket(25), MasteryLevel::Discovered);
        assert_eq!(MasteryLevel::bucket(26), MasteryLevel::Equipped);
        assert_eq!(MasteryLevel::bucket(50), MasteryLevel::Equipped);
        assert_eq!(MasteryLevel::bucket(60), MasteryLevel::Skilled);
        assert_eq!(MasteryLevel::bucket(99), MasteryLevel::Skilled);
        assert_eq!(MasteryLevel::bucket(100), MasteryLevel::Mastered);
        assert_eq!(MasteryLevel::bucket(250), MasteryLevel::Mastered);
    }

    #[test]
    fn serializes_as_percentage() {
        assert_eq!(serde_json::to_string(&MasteryLevel::Skilled).unwrap(), "80");
        assert_eq!(
            serde_json::from_str::<MasteryLevel>("60").unwrap(),
            MasteryLevel::Equipped
        );
        assert!(serde_json::from_str::<MasteryLevel>("61").is_err());
    }
}
