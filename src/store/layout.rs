// On-disk layout of a collection file

use serde::Deserialize;
use serde_json::{Map, Value};

use super::record::Record;

/// Shape of the JSON document holding a collection
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FileLayout {
    /// The file is a bare array of records
    #[default]
    Array,
    /// The file is an object with the records under `field`
    Wrapped { field: String },
}

/// A decoded collection file
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub records: Vec<Record>,
    /// Wrapping object for `Wrapped` layouts, kept so sibling keys survive rewrites
    envelope: Map<String, Value>,
}

impl FileLayout {
    pub fn decode(&self, value: Value) -> Result<Document, String> {
        match self {
            Self::Array => Ok(Document {
                records: decode_records(value)?,
                envelope: Map::new(),
            }),
            Self::Wrapped { field } => {
                let Value::Object(mut envelope) = value else {
                    return Err(format!("expected an object with a '{field}' array"));
                };
                let records = match envelope.get_mut(field).map(Value::take) {
                    Some(inner) => decode_records(inner)
                        .map_err(|e| format!("field '{field}': {e}"))?,
                    None => Vec::new(),
                };
                Ok(Document { records, envelope })
            }
        }
    }

    pub fn encode(&self, document: Document) -> Value {
        let records = Value::Array(document.records.into_iter().map(Value::Object).collect());
        match self {
            Self::Array => records,
            Self::Wrapped { field } => {
                let mut envelope = document.envelope;
                envelope.insert(field.clone(), records);
                Value::Object(envelope)
            }
        }
    }
}

fn decode_records(value: Value) -> Result<Vec<Record>, String> {
    let Value::Array(items) = value else {
        return Err("expected a JSON array of records".to_string());
    };
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(record) => Ok(record),
            _ => Err(format!("element {index} is not an object")),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wrapped(field: &str) -> FileLayout {
        FileLayout::Wrapped {
            field: field.to_string(),
        }
    }

    #[test]
    fn test_array_layout() {
        let doc = FileLayout::Array
            .decode(json!([{"id": 1}, {"id": 2}]))
            .unwrap();
        assert_eq!(doc.records.len(), 2);
        assert_eq!(FileLayout::Array.encode(doc), json!([{"id": 1}, {"id": 2}]));
    }

    #[test]
    fn test_array_layout_rejects_object() {
        assert!(FileLayout::Array.decode(json!({"todos": []})).is_err());
        assert!(FileLayout::Array.decode(json!([1, 2])).is_err());
    }

    #[test]
    fn test_wrapped_layout_keeps_sibling_keys() {
        let layout = wrapped("todos");
        let mut doc = layout
            .decode(json!({"owner": "me", "todos": [{"id": 1}]}))
            .unwrap();
        doc.records.clear();
        assert_eq!(layout.encode(doc), json!({"owner": "me", "todos": []}));
    }

    #[test]
    fn test_wrapped_layout_missing_field_is_empty() {
        let layout = wrapped("todos");
        let doc = layout.decode(json!({})).unwrap();
        assert!(doc.records.is_empty());
        assert_eq!(layout.encode(doc), json!({"todos": []}));
    }

    #[test]
    fn test_wrapped_layout_rejects_non_array_field() {
        assert!(wrapped("todos").decode(json!({"todos": {}})).is_err());
        assert!(wrapped("todos").decode(json!([])).is_err());
    }

    #[test]
    fn test_empty_document_encodes_per_layout() {
        assert_eq!(FileLayout::Array.encode(Document::default()), json!([]));
        assert_eq!(
            wrapped("users").encode(Document::default()),
            json!({"users": []})
        );
    }
}
