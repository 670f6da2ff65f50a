//! Records, their field values and the schema new records are seeded from.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{ClientId, RecordId};

/// Field holding a record's display name.
pub const NAME_FIELD: &str = "name";

/// Display name used when a record has no usable name field.
pub const UNTITLED: &str = "Untitled";

/// The value of a single record field: free text or a checkbox.
///
/// In human-readable formats (the export document, the file store) values are plain JSON
/// strings and booleans. Binary formats (the bus codec) use an explicit tag, since they
/// cannot infer the variant from the data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldValue {
    /// A text input or text area.
    Text(String),
    /// A checkbox.
    Flag(bool),
}

impl FieldValue {
    /// Returns the text, if this is a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Flag(_) => None,
        }
    }

    /// Returns the flag, if this is a checkbox value.
    #[must_use]
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(flag) => Some(*flag),
            Self::Text(_) => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum PlainValue {
    Text(String),
    Flag(bool),
}

#[derive(Serialize, Deserialize)]
enum TaggedValue {
    Text(String),
    Flag(bool),
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            match self {
                Self::Text(text) => serializer.serialize_str(text),
                Self::Flag(flag) => serializer.serialize_bool(*flag),
            }
        } else {
            match self {
                Self::Text(text) => TaggedValue::Text(text.clone()).serialize(serializer),
                Self::Flag(flag) => TaggedValue::Flag(*flag).serialize(serializer),
            }
        }
    }
}

impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            Ok(match PlainValue::deserialize(deserializer)? {
                PlainValue::Text(text) => Self::Text(text),
                PlainValue::Flag(flag) => Self::Flag(flag),
            })
        } else {
            Ok(match TaggedValue::deserialize(deserializer)? {
                TaggedValue::Text(text) => Self::Text(text),
                TaggedValue::Flag(flag) => Self::Flag(flag),
            })
        }
    }
}

/// A record's fields, keyed by field name.
pub type Fields = BTreeMap<String, FieldValue>;

/// A full record. Lives only in its owner's private store and in bus payloads addressed to a
/// viewer; never in the shared index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Opaque identifier, stable for the record's lifetime.
    pub id: RecordId,
    /// Identity of the only client allowed to read, mutate or delete the record.
    pub owner_id: ClientId,
    /// The owner's display name at creation or import time.
    pub owner_display_name: String,
    /// Creation time in milliseconds since the Unix epoch.
    pub created_at: u64,
    /// The record's contents.
    pub fields: Fields,
}

impl Record {
    /// Creates an empty record.
    #[must_use]
    pub fn new(
        id: RecordId,
        owner_id: ClientId,
        owner_display_name: impl Into<String>,
        created_at: u64,
    ) -> Self {
        Self {
            id,
            owner_id,
            owner_display_name: owner_display_name.into(),
            created_at,
            fields: Fields::new(),
        }
    }

    /// The record's display name: its `name` text field, or `"Untitled"`.
    ///
    /// ```
    /// use record_relay::{ClientId, Record, RecordId};
    ///
    /// let mut record = Record::new(RecordId::from("r1"), ClientId::from("p1"), "Ana", 0);
    /// assert_eq!(record.display_name(), "Untitled");
    /// record.fields.insert("name".into(), "Kaya".into());
    /// assert_eq!(record.display_name(), "Kaya");
    /// ```
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.fields
            .get(NAME_FIELD)
            .and_then(FieldValue::as_text)
            .filter(|name| !name.is_empty())
            .unwrap_or(UNTITLED)
    }

    /// Overwrites the given fields, keeping the ones not mentioned.
    pub fn merge_fields(&mut self, fields: Fields) {
        self.fields.extend(fields);
    }
}

/// Whether a schema field is rendered as text or as a checkbox.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// Free text; blank value is the empty string.
    Text,
    /// Checkbox; blank value is `false`.
    Flag,
}

/// The fields a new record starts with.
///
/// The front-end renders one input per schema field; a new record is seeded with the blank
/// value of each so viewers always receive a complete set of keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    fields: Vec<(String, FieldKind)>,
}

impl FieldSchema {
    /// A schema with no fields.
    #[must_use]
    pub fn empty() -> Self {
        Self { fields: Vec::new() }
    }

    /// Appends a field to the schema.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push((name.into(), kind));
        self
    }

    /// The character sheet layout: identity, ability scores with modifiers, vitals,
    /// free-form notes, saving throws (checkboxes) and ability checks (checkboxes).
    #[must_use]
    pub fn character_sheet() -> Self {
        const TEXT: &[&str] = &[
            "name", "race", "class", "level", "sp", "str", "str_mod", "dex", "dex_mod", "con",
            "con_mod", "int", "int_mod", "wis", "wis_mod", "cha", "cha_mod", "hp_max", "hp_cur",
            "ac", "speed", "init", "psionic", "attacks", "inventory", "notes",
        ];
        const FLAGS: &[&str] = &[
            "save_fort",
            "save_ref",
            "save_will",
            "save_death",
            "str_chk",
            "dex_chk",
            "con_chk",
            "int_chk",
            "wis_chk",
            "cha_chk",
        ];
        let text = TEXT.iter().map(|name| ((*name).to_owned(), FieldKind::Text));
        let flags = FLAGS.iter().map(|name| ((*name).to_owned(), FieldKind::Flag));
        Self {
            fields: text.chain(flags).collect(),
        }
    }

    /// Iterates over `(name, kind)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, FieldKind)> {
        self.fields.iter().map(|(name, kind)| (name.as_str(), *kind))
    }

    /// Number of fields in the schema.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if the schema has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The blank value of every schema field.
    #[must_use]
    pub fn blank_fields(&self) -> Fields {
        self.iter()
            .map(|(name, kind)| {
                let value = match kind {
                    FieldKind::Text => FieldValue::Text(String::new()),
                    FieldKind::Flag => FieldValue::Flag(false),
                };
                (name.to_owned(), value)
            })
            .collect()
    }
}

impl Default for FieldSchema {
    fn default() -> Self {
        Self::character_sheet()
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::network::codec;
    use crate::BusMessage;

    fn record() -> Record {
        let mut record = Record::new(RecordId::from("r1"), ClientId::from("p1"), "Ana", 1_700);
        record.fields.insert("name".into(), "Kaya".into());
        record.fields.insert("save_fort".into(), true.into());
        record
    }

    #[test]
    fn json_uses_plain_values_and_camel_case() {
        let json = serde_json::to_value(record()).unwrap();
        assert_eq!(json["ownerId"], "p1");
        assert_eq!(json["ownerDisplayName"], "Ana");
        assert_eq!(json["createdAt"], 1_700);
        assert_eq!(json["fields"]["name"], "Kaya");
        assert_eq!(json["fields"]["save_fort"], true);
    }

    #[test]
    fn json_rejects_numeric_field_values() {
        let result: Result<Fields, _> = serde_json::from_str(r#"{"level": 3}"#);
        assert!(result.is_err());
    }

    #[test]
    fn bus_codec_keeps_value_variants() {
        let original = record();
        let message =
            BusMessage::update(original.id.clone(), original.owner_id.clone(), original.fields.clone());
        let decoded = codec::decode_message(&codec::encode_message(&message).unwrap()).unwrap();
        let fields = decoded.fields.unwrap();
        assert_eq!(fields, original.fields);
        assert_eq!(fields["save_fort"], FieldValue::Flag(true));
        assert_eq!(fields["name"], FieldValue::Text("Kaya".into()));
    }

    #[test]
    fn display_name_ignores_empty_and_flag_names() {
        let mut record = record();
        record.fields.insert("name".into(), "".into());
        assert_eq!(record.display_name(), UNTITLED);
        record.fields.insert("name".into(), false.into());
        assert_eq!(record.display_name(), UNTITLED);
    }

    #[test]
    fn merge_fields_overwrites_and_keeps() {
        let mut record = record();
        let mut patch = Fields::new();
        patch.insert("name".into(), "Kaya the Bold".into());
        patch.insert("hp_cur".into(), "12".into());
        record.merge_fields(patch);
        assert_eq!(record.display_name(), "Kaya the Bold");
        assert_eq!(record.fields["save_fort"], FieldValue::Flag(true));
        assert_eq!(record.fields["hp_cur"].as_text(), Some("12"));
    }

    #[test]
    fn character_sheet_blank_fields_cover_every_key() {
        let schema = FieldSchema::character_sheet();
        let blank = schema.blank_fields();
        assert_eq!(blank.len(), schema.len());
        assert_eq!(blank["name"], FieldValue::Text(String::new()));
        assert_eq!(blank["cha_chk"], FieldValue::Flag(false));
    }

    #[test]
    fn custom_schema_preserves_declaration_order() {
        let schema = FieldSchema::empty()
            .with_field("b", FieldKind::Text)
            .with_field("a", FieldKind::Flag);
        let names: Vec<&str> = schema.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}
