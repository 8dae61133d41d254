use serde::{Deserialize, Serialize};

/// Separator used to join the entries of a multi-valued field on disk.
pub const MULTI_VALUE_SEPARATOR: &str = " / ";

/// Number of columns in the vocabulary schema.
pub const FIELD_COUNT: usize = 8;

/// Values a spreadsheet export may use for "no value"; read as empty text.
const NAN_LIKE: &[&str] = &[
    "nan", "NaN", "-nan", "-NaN", "NA", "N/A", "n/a", "<NA>", "#N/A", "NULL", "null", "None",
];

/// How a column may be edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    ReadOnly,
    Scalar,
    MultiValued,
}

/// A column of the vocabulary table, in file order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Word,
    Number,
    OldDefinition,
    Translation,
    Definition,
    ExampleSentences,
    PartOfSpeech,
    Collocations,
}

impl Field {
    pub const ALL: [Field; FIELD_COUNT] = [
        Field::Word,
        Field::Number,
        Field::OldDefinition,
        Field::Translation,
        Field::Definition,
        Field::ExampleSentences,
        Field::PartOfSpeech,
        Field::Collocations,
    ];

    /// Records sharing this value form one group.
    pub const KEY: Field = Field::Word;

    /// Orders records inside a group and groups inside the index.
    pub const SEQUENCE: Field = Field::Number;

    pub fn name(self) -> &'static str {
        match self {
            Field::Word => "word",
            Field::Number => "number",
            Field::OldDefinition => "old_definition",
            Field::Translation => "translation",
            Field::Definition => "definition",
            Field::ExampleSentences => "example_sentences",
            Field::PartOfSpeech => "part_of_speech",
            Field::Collocations => "collocations",
        }
    }

    pub fn from_name(name: &str) -> Option<Field> {
        Field::ALL.into_iter().find(|field| field.name() == name)
    }

    pub fn kind(self) -> FieldKind {
        match self {
            Field::Word | Field::Number => FieldKind::ReadOnly,
            Field::ExampleSentences | Field::Collocations => FieldKind::MultiValued,
            _ => FieldKind::Scalar,
        }
    }

    pub fn is_editable(self) -> bool {
        self.kind() != FieldKind::ReadOnly
    }

    /// Position of the column in `Field::ALL`.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn editable() -> impl Iterator<Item = Field> {
        Field::ALL.into_iter().filter(|field| field.is_editable())
    }

    /// Normalize a raw cell read from disk.
    ///
    /// Editable columns hold free text, so NaN-like placeholders become the
    /// empty string. Read-only columns are kept verbatim.
    pub fn normalize(self, raw: &str) -> String {
        if self.is_editable() && NAN_LIKE.contains(&raw.trim()) {
            String::new()
        } else {
            raw.to_string()
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Split a stored multi-valued cell into its entries.
pub fn split_multi(value: &str) -> Vec<String> {
    value
        .split(MULTI_VALUE_SEPARATOR)
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}
