//! In-memory vocabulary table grouped by word.
//!
//! A [`RecordStore`] is built from a [`RawTable`]: required columns are
//! checked, records are stably sorted by their sequence number, partitioned
//! into [`Group`]s by key, and the groups are ordered by the smallest
//! sequence number they contain. Stores are immutable; edits produce a new
//! store through [`RecordStore::with_group`].

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::{EditorError, Result};
use crate::loader::{self, RawTable};
use crate::schema::{FIELD_COUNT, Field, split_multi};

/// One row of the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    values: Vec<String>,
    /// Values of non-schema columns, aligned with [`RecordStore::extra_headers`].
    extras: Vec<String>,
}

impl Record {
    /// Build a record from schema values; missing trailing values become empty.
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut values: Vec<String> = values.into_iter().map(Into::into).collect();
        values.resize(FIELD_COUNT, String::new());
        Record {
            values,
            extras: Vec::new(),
        }
    }

    pub fn get(&self, field: Field) -> &str {
        &self.values[field.index()]
    }

    pub fn set(&mut self, field: Field, value: impl Into<String>) {
        self.values[field.index()] = value.into();
    }

    /// Entries of a multi-valued field.
    pub fn list(&self, field: Field) -> Vec<String> {
        split_multi(self.get(field))
    }

    pub fn key(&self) -> &str {
        self.get(Field::KEY)
    }

    pub fn sequence(&self) -> SequenceKey {
        SequenceKey::parse(self.get(Field::SEQUENCE))
    }

    pub fn extras(&self) -> &[String] {
        &self.extras
    }
}

// Serialized as a map of schema column name to value.
impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(FIELD_COUNT))?;
        for field in Field::ALL {
            map.serialize_entry(field.name(), self.get(field))?;
        }
        map.end()
    }
}

/// Ordering key derived from the sequence column.
///
/// Numeric values sort numerically and before any text; text values sort
/// lexicographically.
#[derive(Debug, Clone)]
pub enum SequenceKey {
    Number(f64),
    Text(String),
}

impl SequenceKey {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.parse::<f64>() {
            Ok(n) if n.is_finite() => SequenceKey::Number(n),
            _ => SequenceKey::Text(trimmed.to_string()),
        }
    }
}

impl Ord for SequenceKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SequenceKey::Number(a), SequenceKey::Number(b)) => a.total_cmp(b),
            (SequenceKey::Number(_), SequenceKey::Text(_)) => Ordering::Less,
            (SequenceKey::Text(_), SequenceKey::Number(_)) => Ordering::Greater,
            (SequenceKey::Text(a), SequenceKey::Text(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for SequenceKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SequenceKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SequenceKey {}

/// Records sharing one key, in ascending sequence order.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Group {
    pub key: String,
    pub records: Vec<Record>,
}

impl Group {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecordStore {
    extra_headers: Vec<String>,
    /// Groups in index order.
    groups: Vec<Group>,
}

impl RecordStore {
    /// Load and group the table stored at `path`.
    ///
    /// The file is read as is; callers that share it with other sessions
    /// wrap this in [`PersistenceGuard::with_lock`](crate::PersistenceGuard::with_lock).
    ///
    /// # Returns
    /// * `Ok(RecordStore)` - The grouped table
    /// * `Err(EditorError::Load)` - The file is unreadable or not valid CSV
    /// * `Err(EditorError::Schema)` - Required columns are missing
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let table = loader::read_table(path)?;
        Self::from_table(table)
    }

    /// Validate columns, normalize values and group a parsed table.
    ///
    /// # Arguments
    /// * `table` - Header and rows as produced by [`loader::parse_csv`]
    ///
    /// # Returns
    /// * `Ok(RecordStore)` - Records grouped by word, groups ordered by their
    ///   smallest number
    /// * `Err(EditorError::Schema)` - Every missing required column, by name
    ///
    /// # Examples
    /// ```
    /// use vocab_editor::loader::parse_csv;
    /// use vocab_editor::{Field, RecordStore};
    ///
    /// let table = parse_csv(
    ///     "word,number,old_definition,translation,definition,example_sentences,part_of_speech,collocations\ndog,3,,,,,,\ncat,2,,,,,,\ncat,1,,,,,,\n",
    /// )
    /// .unwrap();
    /// let store = RecordStore::from_table(table).unwrap();
    /// assert_eq!(store.group_index(), vec!["cat", "dog"]);
    /// assert_eq!(store.groups()[0].records[0].get(Field::Number), "1");
    ///
    /// let partial = parse_csv("word,number\ncat,1\n").unwrap();
    /// assert!(RecordStore::from_table(partial).is_err());
    /// ```
    pub fn from_table(table: RawTable) -> Result<Self> {
        let mut positions = [0usize; FIELD_COUNT];
        let mut missing = Vec::new();
        for field in Field::ALL {
            match table.headers.iter().position(|h| h == field.name()) {
                Some(pos) => positions[field.index()] = pos,
                None => missing.push(field.name().to_string()),
            }
        }
        if !missing.is_empty() {
            return Err(EditorError::Schema { missing });
        }

        let extra_columns: Vec<usize> = (0..table.headers.len())
            .filter(|pos| !positions.contains(pos))
            .collect();
        let extra_headers = extra_columns
            .iter()
            .map(|&pos| table.headers[pos].clone())
            .collect();

        let records = table
            .rows
            .into_iter()
            .map(|row| Record {
                values: Field::ALL
                    .into_iter()
                    .map(|field| field.normalize(&row[positions[field.index()]]))
                    .collect(),
                extras: extra_columns.iter().map(|&pos| row[pos].clone()).collect(),
            })
            .collect();

        Ok(Self::from_records(extra_headers, records))
    }

    /// Group records by key. Group order follows the smallest sequence value
    /// of each group, ties broken by first appearance after sorting.
    ///
    /// # Arguments
    /// * `extra_headers` - Names of non-schema columns carried by each record
    /// * `records` - Rows in any order
    pub fn from_records(extra_headers: Vec<String>, mut records: Vec<Record>) -> Self {
        records.sort_by_cached_key(Record::sequence);

        let mut slots: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<Group> = Vec::new();
        for record in records {
            match slots.get(record.key()) {
                Some(&slot) => groups[slot].records.push(record),
                None => {
                    slots.insert(record.key().to_string(), groups.len());
                    groups.push(Group {
                        key: record.key().to_string(),
                        records: vec![record],
                    });
                }
            }
        }

        // Records are already sorted, so first appearance order is the
        // order of each group's minimum sequence value.
        RecordStore {
            extra_headers,
            groups,
        }
    }

    pub fn extra_headers(&self) -> &[String] {
        &self.extra_headers
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn group(&self, index: usize) -> Option<&Group> {
        self.groups.get(index)
    }

    /// Group keys in navigation order.
    pub fn group_index(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.key.as_str()).collect()
    }

    /// Number of groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.groups.iter().map(Group::len).sum()
    }

    /// All records, group after group in index order.
    pub fn flatten(&self) -> Vec<Record> {
        self.groups
            .iter()
            .flat_map(|g| g.records.iter().cloned())
            .collect()
    }

    /// All records stably sorted by sequence; this is the on-disk order.
    pub fn sorted_records(&self) -> Vec<Record> {
        let mut records = self.flatten();
        records.sort_by_cached_key(Record::sequence);
        records
    }

    /// A copy of this store with the group at `index` replaced.
    ///
    /// Out-of-range indices return an unchanged copy.
    pub fn with_group(&self, index: usize, group: Group) -> Self {
        let mut next = self.clone();
        if let Some(slot) = next.groups.get_mut(index) {
            *slot = group;
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::parse_csv;

    const HEADER: &str = "word,number,old_definition,translation,definition,example_sentences,part_of_speech,collocations";

    fn store(rows: &[&str]) -> RecordStore {
        let text = format!("{}\n{}\n", HEADER, rows.join("\n"));
        RecordStore::from_table(parse_csv(&text).unwrap()).unwrap()
    }

    #[test]
    fn groups_by_word_ordered_by_min_sequence() {
        let store = store(&[
            "dog,3,,,,,,",
            "cat,2,,,,,,",
            "bird,10,,,,,,",
            "cat,1,,,,,,",
            "dog,4,,,,,,",
        ]);
        assert_eq!(store.group_index(), vec!["cat", "dog", "bird"]);
        let cat: Vec<&str> = store.groups()[0]
            .records
            .iter()
            .map(|r| r.get(Field::Number))
            .collect();
        assert_eq!(cat, vec!["1", "2"]);
        assert_eq!(store.record_count(), 5);
    }

    #[test]
    fn sequence_sorts_numerically_then_text() {
        let store = store(&["a,10,,,,,,", "a,9,,,,,,", "a,x,,,,,,", "a,2.5,,,,,,"]);
        let seq: Vec<&str> = store.groups()[0]
            .records
            .iter()
            .map(|r| r.get(Field::Number))
            .collect();
        assert_eq!(seq, vec!["2.5", "9", "10", "x"]);
    }

    #[test]
    fn sequence_within_groups_is_non_decreasing() {
        let store = store(&["b,5,,,,,,", "a,3,,,,,,", "b,1,,,,,,", "a,3,,,,,,", "a,0,,,,,,"]);
        for group in store.groups() {
            let keys: Vec<SequenceKey> = group.records.iter().map(Record::sequence).collect();
            assert!(keys.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn missing_columns_are_all_named() {
        let table = parse_csv("word,number,definition\ncat,1,x\n").unwrap();
        match RecordStore::from_table(table) {
            Err(EditorError::Schema { missing }) => {
                assert!(missing.contains(&"translation".to_string()));
                assert!(missing.contains(&"collocations".to_string()));
                assert!(!missing.contains(&"word".to_string()));
            }
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn extra_columns_are_carried_and_nan_cleared() {
        let text = format!("notes,{}\nkeep me,cat,1,NaN,,nan,,,\n", HEADER);
        let store = RecordStore::from_table(parse_csv(&text).unwrap()).unwrap();
        assert_eq!(store.extra_headers(), &["notes".to_string()]);
        let record = &store.groups()[0].records[0];
        assert_eq!(record.extras(), &["keep me".to_string()]);
        assert_eq!(record.get(Field::OldDefinition), "");
        assert_eq!(record.get(Field::Definition), "");
    }

    #[test]
    fn empty_table_has_empty_index() {
        let store = RecordStore::from_table(parse_csv(&format!("{}\n", HEADER)).unwrap()).unwrap();
        assert!(store.is_empty());
        assert!(store.group_index().is_empty());
        assert!(store.flatten().is_empty());
    }

    #[test]
    fn regrouping_flattened_records_is_stable() {
        let store = store(&["dog,1,,,,,,", "cat,1,,,,,,", "cat,0,,,,,,", "dog,2,,,,,,"]);
        let again = RecordStore::from_records(Vec::new(), store.sorted_records());
        assert_eq!(again, store);
    }

    #[test]
    fn record_serializes_as_named_fields() {
        let record = Record::new(["cat", "1", "", "Katze"]);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["word"], "cat");
        assert_eq!(json["translation"], "Katze");
        assert_eq!(json["collocations"], "");
    }

    #[test]
    fn with_group_leaves_original_untouched() {
        let original = store(&["cat,1,,,,,,"]);
        let mut group = original.groups()[0].clone();
        group.records[0].set(Field::Translation, "Katze");
        let edited = original.with_group(0, group);
        assert_eq!(original.groups()[0].records[0].get(Field::Translation), "");
        assert_eq!(edited.groups()[0].records[0].get(Field::Translation), "Katze");
    }
}
