//! PocketBase REST API types.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

use crate::error::{StoreError, StoreResult};

/// Field map sent in create and patch requests.
pub type Fields = serde_json::Map<String, Value>;

/// A record as returned by the store.
///
/// Records are kept as raw JSON objects so callers decode only the fields
/// they model; system fields (`collectionId`, `expand`, ...) pass through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(pub Fields);

impl Record {
    pub fn id(&self) -> Option<&str> {
        self.get_str("id")
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    /// Numeric field as i64. JSON numbers come back as floats from some
    /// PocketBase versions, so whole floats are accepted too.
    pub fn get_i64(&self, field: &str) -> Option<i64> {
        match self.0.get(field)? {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            _ => None,
        }
    }

    /// Decode the record into a typed model.
    pub fn decode<T: DeserializeOwned>(&self) -> StoreResult<T> {
        serde_json::from_value(Value::Object(self.0.clone())).map_err(|e| {
            StoreError::invalid_response(format!(
                "record {} does not match model: {}",
                self.id().unwrap_or("<no id>"),
                e
            ))
        })
    }

    /// Merge `fields` into this record, last writer wins.
    pub fn merge(&mut self, fields: &Fields) {
        for (k, v) in fields {
            self.0.insert(k.clone(), v.clone());
        }
    }
}

impl From<Fields> for Record {
    fn from(fields: Fields) -> Self {
        Self(fields)
    }
}

/// Paginated list response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse<T> {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub per_page: u32,
    #[serde(default)]
    pub total_items: i64,
    #[serde(default)]
    pub total_pages: i64,
    pub items: Vec<T>,
}

impl<T> ListResponse<T> {
    pub fn empty() -> Self {
        Self {
            page: 1,
            per_page: 0,
            total_items: 0,
            total_pages: 0,
            items: Vec::new(),
        }
    }
}

/// Parameters of a list request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    /// Filter expression, see [`crate::filter`]
    pub filter: Option<String>,
    /// Sort expression, e.g. `created,id` or `-updated`
    pub sort: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    /// Skip the total count query; PocketBase answers faster without it
    pub skip_total: bool,
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    pub fn per_page(mut self, per_page: u32) -> Self {
        self.per_page = Some(per_page);
        self
    }

    pub fn skip_total(mut self) -> Self {
        self.skip_total = true;
        self
    }

    /// Query string pairs in the order PocketBase documents them.
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(page) = self.page {
            params.push(("page", page.to_string()));
        }
        if let Some(per_page) = self.per_page {
            params.push(("perPage", per_page.to_string()));
        }
        if let Some(sort) = &self.sort {
            params.push(("sort", sort.clone()));
        }
        if let Some(filter) = &self.filter {
            params.push(("filter", filter.clone()));
        }
        if self.skip_total {
            params.push(("skipTotal", "1".to_string()));
        }
        params
    }
}

/// Condition a conditional patch must satisfy against the stored record.
#[derive(Debug, Clone, PartialEq)]
pub struct Precondition {
    pub field: String,
    pub equals: Value,
}

impl Precondition {
    pub fn field_equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            equals: value.into(),
        }
    }

    pub fn holds_for(&self, record: &Record) -> bool {
        record.get(&self.field) == Some(&self.equals)
    }
}

/// A local file attached to a multipart patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    /// Record field the file is stored in
    pub field: String,
    pub path: PathBuf,
    pub mime: String,
}

impl FileUpload {
    pub fn new(field: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            field: field.into(),
            path: path.into(),
            mime: "video/mp4".to_string(),
        }
    }

    /// File name sent to the store.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload.bin".to_string())
    }
}

/// Response of `auth-with-password`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AuthResponse {
    pub token: String,
}
