use crate::loader::FileRecord;
use log;

pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;
pub const WEEK_MS: i64 = 7 * DAY_MS;

/// Files split by age so the rarely-changing ones can sit in the earliest
/// cached prompt segment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecencyBuckets {
    pub today: Vec<FileRecord>,
    pub last_week: Vec<FileRecord>,
    pub before: Vec<FileRecord>,
}

impl RecencyBuckets {
    pub fn len(&self) -> usize {
        self.today.len() + self.last_week.len() + self.before.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn partition(records: Vec<FileRecord>, now_ms: i64) -> RecencyBuckets {
    let mut buckets = RecencyBuckets::default();
    for record in records {
        let age = now_ms - record.last_modified_ms;
        if age < DAY_MS {
            buckets.today.push(record);
        } else if age < WEEK_MS {
            buckets.last_week.push(record);
        } else {
            buckets.before.push(record);
        }
    }
    log::debug!(
        "Recency buckets: {} today, {} last week, {} before",
        buckets.today.len(),
        buckets.last_week.len(),
        buckets.before.len()
    );
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR_MS: i64 = 60 * 60 * 1000;
    const NOW: i64 = 1_760_000_000_000;

    fn record(path: &str, last_modified_ms: i64) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            last_modified_ms,
            content: String::new(),
            rendered_block: String::new(),
            estimated_tokens: 0,
        }
    }

    fn names(records: &[FileRecord]) -> Vec<&str> {
        records.iter().map(|r| r.path.as_str()).collect()
    }

    #[test]
    fn ages_land_in_expected_buckets() {
        let buckets = partition(
            vec![
                record("fresh", NOW - 23 * HOUR_MS),
                record("recent", NOW - 25 * HOUR_MS),
                record("old", NOW - 8 * DAY_MS),
            ],
            NOW,
        );
        assert_eq!(names(&buckets.today), vec!["fresh"]);
        assert_eq!(names(&buckets.last_week), vec!["recent"]);
        assert_eq!(names(&buckets.before), vec!["old"]);
    }

    #[test]
    fn boundaries_follow_strict_less_than() {
        let buckets = partition(
            vec![
                record("just_under_day", NOW - DAY_MS + 1),
                record("exactly_day", NOW - DAY_MS),
                record("just_under_week", NOW - WEEK_MS + 1),
                record("exactly_week", NOW - WEEK_MS),
                record("future", NOW + HOUR_MS),
            ],
            NOW,
        );
        assert_eq!(names(&buckets.today), vec!["just_under_day", "future"]);
        assert_eq!(names(&buckets.last_week), vec!["exactly_day", "just_under_week"]);
        assert_eq!(names(&buckets.before), vec!["exactly_week"]);
    }

    #[test]
    fn every_record_lands_exactly_once() {
        let input: Vec<FileRecord> = (0..50)
            .map(|i| record(&format!("f{i}"), NOW - i * 5 * HOUR_MS))
            .collect();
        let buckets = partition(input.clone(), NOW);
        assert_eq!(buckets.len(), input.len());
        let mut seen: Vec<String> = buckets
            .today
            .iter()
            .chain(&buckets.last_week)
            .chain(&buckets.before)
            .map(|r| r.path.clone())
            .collect();
        seen.sort();
        let mut expected: Vec<String> = input.into_iter().map(|r| r.path).collect();
        expected.sort();
        assert_eq!(seen, expected);
    }
}
