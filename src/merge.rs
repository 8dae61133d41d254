use std::collections::BTreeMap;

use crate::schema::{Field, FieldKind, MULTI_VALUE_SEPARATOR};
use crate::store::Group;

/// A submitted value for one field of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Single(String),
    List(Vec<String>),
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Single(value.to_string())
    }
}

impl From<Vec<&str>> for FieldValue {
    fn from(values: Vec<&str>) -> Self {
        FieldValue::List(values.into_iter().map(str::to_string).collect())
    }
}

/// Edited values for the records of the current group, by record position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Submission {
    records: BTreeMap<usize, BTreeMap<Field, FieldValue>>,
}

impl Submission {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, position: usize, field: Field, value: impl Into<FieldValue>) {
        self.records
            .entry(position)
            .or_default()
            .insert(field, value.into());
    }

    pub fn with(mut self, position: usize, field: Field, value: impl Into<FieldValue>) -> Self {
        self.set(position, field, value);
        self
    }

    pub fn get(&self, position: usize, field: Field) -> Option<&FieldValue> {
        self.records.get(&position)?.get(&field)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Build a submission from urlencoded form pairs named `<field>-<position>`.
    ///
    /// Repeated names accumulate into the list of a multi-valued field.
    /// Read-only fields and unknown names are ignored.
    ///
    /// # Examples
    /// ```
    /// use vocab_editor::{Field, FieldValue, Submission};
    ///
    /// let pairs = [
    ///     ("translation-0", "Katze"),
    ///     ("collocations-0", "fat cat"),
    ///     ("collocations-0", "cat nap"),
    ///     ("word-0", "ignored"),
    /// ];
    /// let submission = Submission::from_form_pairs(&pairs);
    /// assert_eq!(
    ///     submission.get(0, Field::Collocations),
    ///     Some(&FieldValue::List(vec!["fat cat".into(), "cat nap".into()]))
    /// );
    /// assert_eq!(submission.get(0, Field::Word), None);
    /// ```
    pub fn from_form_pairs<K, V>(pairs: &[(K, V)]) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut submission = Submission::new();
        for (name, value) in pairs {
            let Some((field, position)) = parse_input_name(name.as_ref()) else {
                continue;
            };
            let value = value.as_ref().to_string();
            let slot = submission.records.entry(position).or_default();
            match field.kind() {
                FieldKind::ReadOnly => {}
                FieldKind::Scalar => {
                    slot.entry(field).or_insert(FieldValue::Single(value));
                }
                FieldKind::MultiValued => {
                    match slot
                        .entry(field)
                        .or_insert_with(|| FieldValue::List(Vec::new()))
                    {
                        FieldValue::List(values) => values.push(value),
                        FieldValue::Single(_) => {}
                    }
                }
            }
        }
        submission.records.retain(|_, fields| !fields.is_empty());
        submission
    }
}

/// Form input name for a field of the record at `position`.
pub fn input_name(field: Field, position: usize) -> String {
    format!("{}-{}", field.name(), position)
}

fn parse_input_name(name: &str) -> Option<(Field, usize)> {
    let (field, position) = name.rsplit_once('-')?;
    Some((Field::from_name(field)?, position.parse().ok()?))
}

/// Trim a scalar value.
pub fn clean_scalar(value: &str) -> String {
    value.trim().to_string()
}

/// Trim entries, drop blank ones and join the rest with the separator.
pub fn clean_multi<S: AsRef<str>>(values: &[S]) -> String {
    values
        .iter()
        .map(|v| v.as_ref().trim())
        .filter(|v| !v.is_empty())
        .collect::<Vec<_>>()
        .join(MULTI_VALUE_SEPARATOR)
}

fn clean(field: Field, value: &FieldValue) -> String {
    match (field.kind(), value) {
        (FieldKind::MultiValued, FieldValue::List(values)) => clean_multi(values),
        (FieldKind::MultiValued, FieldValue::Single(text)) => {
            clean_multi(&text.lines().collect::<Vec<_>>())
        }
        (_, FieldValue::Single(text)) => clean_scalar(text),
        (_, FieldValue::List(values)) => values
            .first()
            .map(|v| clean_scalar(v))
            .unwrap_or_default(),
    }
}

/// Apply a submission to a group, returning the edited copy.
///
/// Only editable fields present in the submission change. Keys, sequence
/// numbers, record count and order are preserved, so merging the same
/// submission twice gives the same group as merging it once.
///
/// # Arguments
/// * `group` - The stored group; it is not modified
/// * `submission` - Values by record position within the group
///
/// # Returns
/// The edited copy. Positions past the end of the group are ignored.
///
/// # Examples
/// ```
/// use vocab_editor::merge::merge;
/// use vocab_editor::{Field, Record, RecordStore, Submission};
///
/// let store = RecordStore::from_records(Vec::new(), vec![Record::new(["cat", "1"])]);
/// let edits = Submission::new().with(0, Field::Translation, "  Katze ");
/// let merged = merge(&store.groups()[0], &edits);
/// assert_eq!(merged.records[0].get(Field::Translation), "Katze");
/// assert_eq!(merged.records[0].get(Field::Word), "cat");
/// ```
pub fn merge(group: &Group, submission: &Submission) -> Group {
    let mut merged = group.clone();
    for (position, record) in merged.records.iter_mut().enumerate() {
        let Some(fields) = submission.records.get(&position) else {
            continue;
        };
        for (&field, value) in fields {
            if field.is_editable() {
                record.set(field, clean(field, value));
            }
        }
    }
    merged
}
