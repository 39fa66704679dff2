use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The single generated record served to readers.
///
/// A `Value` is never mutated after construction; a refresh replaces it
/// wholesale, so readers always see a matching `id` and `generated_at`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Value {
    id: String,
    generated_at: DateTime<Utc>,
}

impl Value {
    pub fn new(id: impl Into<String>, generated_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            generated_at,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.id, self.generated_at.to_rfc3339())
    }
}

/// JSON body returned by the REST front-end.
///
/// Field names are kept stable for existing clients: `uuid` and `datatime`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueResponse {
    #[serde(rename = "uuid")]
    pub id: String,
    #[serde(rename = "datatime")]
    pub generated_at: DateTime<Utc>,
}

impl From<Value> for ValueResponse {
    fn from(value: Value) -> Self {
        Self {
            id: value.id,
            generated_at: value.generated_at,
        }
    }
}
