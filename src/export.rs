//! The self-describing export document used to move a record between clients.
//!
//! ```json
//! {
//!   "kind": "record-export",
//!   "version": 1,
//!   "data": { "id": "…", "ownerId": "p1", "ownerDisplayName": "Ana", "createdAt": 1700000000000, "fields": { "name": "Kaya" } }
//! }
//! ```
//!
//! Only `data.fields` is required on import. Ownership is always rebound to the importing
//! client, so `ownerId` and `ownerDisplayName` are informational.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ClientId, Fields, Record, RecordId, RelayError};

/// The `kind` tag of an export document.
pub const EXPORT_KIND: &str = "record-export";

/// The newest document version this crate writes and reads.
pub const EXPORT_VERSION: u32 = 1;

/// An exported record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportDocument {
    /// Always [`EXPORT_KIND`].
    pub kind: String,
    /// Document version, at most [`EXPORT_VERSION`].
    pub version: u32,
    /// The record as it was stored by its owner.
    pub data: Record,
}

/// A record read from an export document, before ownership is rebound.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedRecord {
    /// The exported id, if the document had one.
    #[serde(default)]
    pub id: Option<RecordId>,
    /// The exporting owner.
    #[serde(default)]
    pub owner_id: Option<ClientId>,
    /// The exporting owner's display name.
    #[serde(default)]
    pub owner_display_name: Option<String>,
    /// The original creation time.
    #[serde(default)]
    pub created_at: Option<u64>,
    /// The record's fields.
    pub fields: Fields,
}

impl ImportedRecord {
    /// Turns the import into a record owned by `owner`, keeping the exported id and creation
    /// time when present.
    #[must_use]
    pub fn into_record(
        self,
        fallback_id: impl FnOnce() -> RecordId,
        owner_id: ClientId,
        owner_display_name: String,
        now: u64,
    ) -> Record {
        Record {
            id: self.id.unwrap_or_else(fallback_id),
            owner_id,
            owner_display_name,
            created_at: self.created_at.unwrap_or(now),
            fields: self.fields,
        }
    }
}

impl ExportDocument {
    /// Wraps a record in a current-version document.
    #[must_use]
    pub fn new(record: Record) -> Self {
        Self {
            kind: EXPORT_KIND.to_owned(),
            version: EXPORT_VERSION,
            data: record,
        }
    }

    /// Renders the document as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::SerializationError`] if the record cannot be encoded.
    pub fn to_json(&self) -> Result<String, RelayError> {
        serde_json::to_string_pretty(self).map_err(|err| RelayError::SerializationError {
            context: format!("encoding export document: {err}"),
        })
    }

    /// Parses and validates an export document.
    ///
    /// ```
    /// use record_relay::ExportDocument;
    ///
    /// let text = r#"{"kind":"record-export","version":1,"data":{"fields":{"name":"Kaya"}}}"#;
    /// let imported = ExportDocument::parse(text).unwrap();
    /// assert!(imported.id.is_none());
    ///
    /// assert!(ExportDocument::parse(r#"{"kind":"something-else","version":1,"data":{}}"#).is_err());
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::MalformedImport`] for text that is not JSON, a mismatched `kind`,
    /// a version newer than [`EXPORT_VERSION`], or a `data` object that is not record shaped.
    pub fn parse(text: &str) -> Result<ImportedRecord, RelayError> {
        let document: Value = serde_json::from_str(text)
            .map_err(|err| RelayError::malformed(format!("not valid JSON: {err}")))?;
        let document = document
            .as_object()
            .ok_or_else(|| RelayError::malformed("document is not a JSON object"))?;

        match document.get("kind").and_then(Value::as_str) {
            Some(EXPORT_KIND) => {},
            Some(other) => {
                return Err(RelayError::malformed(format!(
                    "expected kind \"{EXPORT_KIND}\", found \"{other}\""
                )))
            },
            None => return Err(RelayError::malformed("document has no kind")),
        }

        let version = document
            .get("version")
            .and_then(Value::as_u64)
            .ok_or_else(|| RelayError::malformed("document has no integer version"))?;
        if version == 0 || version > u64::from(EXPORT_VERSION) {
            return Err(RelayError::malformed(format!(
                "unsupported version {version} (newest supported is {EXPORT_VERSION})"
            )));
        }

        let data = document
            .get("data")
            .cloned()
            .ok_or_else(|| RelayError::malformed("document has no data"))?;
        serde_json::from_value(data)
            .map_err(|err| RelayError::malformed(format!("data is not a record: {err}")))
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
    use crate::FieldValue;

    fn sample() -> Record {
        let mut record = Record::new(RecordId::from("r1"), ClientId::from("p1"), "Ana", 42);
        record.fields.insert("name".into(), "Kaya".into());
        record.fields.insert("save_ref".into(), true.into());
        record
    }

    #[test]
    fn export_then_parse_keeps_everything() {
        let text = ExportDocument::new(sample()).to_json().unwrap();
        assert!(text.contains("\"kind\": \"record-export\""));

        let imported = ExportDocument::parse(&text).unwrap();
        assert_eq!(imported.id, Some(RecordId::from("r1")));
        assert_eq!(imported.owner_id, Some(ClientId::from("p1")));
        assert_eq!(imported.created_at, Some(42));
        assert_eq!(imported.fields["save_ref"], FieldValue::Flag(true));
    }

    #[test]
    fn into_record_rebinds_owner_and_fills_gaps() {
        let imported = ExportDocument::parse(
            r#"{"kind":"record-export","version":1,"data":{"fields":{"name":"Kaya"}}}"#,
        )
        .unwrap();
        let record = imported.into_record(
            || RecordId::from("fresh"),
            ClientId::from("p2"),
            "Ben".into(),
            7,
        );
        assert_eq!(record.id, RecordId::from("fresh"));
        assert_eq!(record.owner_id, ClientId::from("p2"));
        assert_eq!(record.created_at, 7);
        assert_eq!(record.display_name(), "Kaya");
    }

    #[test]
    fn rejects_malformed_documents() {
        let cases = [
            "not json at all",
            "[1, 2]",
            r#"{"version":1,"data":{"fields":{}}}"#,
            r#"{"kind":"sheet","version":1,"data":{"fields":{}}}"#,
            r#"{"kind":"record-export","data":{"fields":{}}}"#,
            r#"{"kind":"record-export","version":2,"data":{"fields":{}}}"#,
            r#"{"kind":"record-export","version":1}"#,
            r#"{"kind":"record-export","version":1,"data":{"fields":{"level":3}}}"#,
            r#"{"kind":"record-export","version":1,"data":{"id":"r1"}}"#,
        ];
        for case in cases {
            let result = ExportDocument::parse(case);
            assert!(
                matches!(result, Err(RelayError::MalformedImport { .. })),
                "accepted {case}"
            );
        }
    }
}
