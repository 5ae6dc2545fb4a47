//! Processed rows and the pre-commit validation model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{deserialize_id, DbId};

/// Error signal the server returns when a commit would not change anything.
pub const NO_CHANGES_DETECTED: &str = "NO_CHANGES_DETECTED";

/// Largest page the server will return.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Page size used when the caller does not pick one.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Names of the user-editable record fields, in display order.
pub const EDITABLE_FIELDS: [&str; 6] = ["name", "phone", "date", "province", "city", "district"];

/// Outcome of cleaning one row: either clean or tagged with an error kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RecordStatus {
    Clean,
    /// Any status other than `Clean`, kept verbatim (usually `"Error"`).
    Error(String),
}

impl RecordStatus {
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Clean)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Clean => "Clean",
            Self::Error(tag) => tag,
        }
    }
}

impl From<String> for RecordStatus {
    fn from(value: String) -> Self {
        if value.eq_ignore_ascii_case("clean") {
            Self::Clean
        } else {
            Self::Error(value)
        }
    }
}

impl From<RecordStatus> for String {
    fn from(value: RecordStatus) -> Self {
        match value {
            RecordStatus::Clean => "Clean".to_string(),
            RecordStatus::Error(tag) => tag,
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The structured, editable fields of a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFields {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub province: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub district: String,
}

impl RecordFields {
    /// Look a field up by its wire name.
    pub fn get(&self, field: &str) -> Option<&str> {
        match field {
            "name" => Some(&self.name),
            "phone" => Some(&self.phone),
            "date" => Some(&self.date),
            "province" => Some(&self.province),
            "city" => Some(&self.city),
            "district" => Some(&self.district),
            _ => None,
        }
    }
}

/// One row of a batch after processing. Owned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: DbId,
    #[serde(default)]
    pub batch_id: Option<DbId>,
    /// 1-based position in the source file.
    #[serde(default)]
    pub row_index: u64,
    #[serde(flatten)]
    pub fields: RecordFields,
    /// Original full address; informational only.
    #[serde(default)]
    pub address: String,
    pub status: RecordStatus,
    #[serde(default)]
    pub error_message: String,
}

/// A proposed edit. Absent fields are left untouched by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub province: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub district: Option<String>,
}

impl RecordPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.phone.is_none()
            && self.date.is_none()
            && self.province.is_none()
            && self.city.is_none()
            && self.district.is_none()
    }

    /// Set a field by its wire name. Unknown names are a validation error.
    pub fn set(&mut self, field: &str, value: impl Into<String>) -> Result<(), crate::error::CoreError> {
        let slot = match field {
            "name" => &mut self.name,
            "phone" => &mut self.phone,
            "date" => &mut self.date,
            "province" => &mut self.province,
            "city" => &mut self.city,
            "district" => &mut self.district,
            other => {
                return Err(crate::error::CoreError::Validation(format!(
                    "Unknown field '{other}'. Must be one of: {}",
                    EDITABLE_FIELDS.join(", ")
                )))
            }
        };
        *slot = Some(value.into());
        Ok(())
    }
}

/// Dry-run result of `POST /records/{id}/validate`. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub current_status: RecordStatus,
    pub new_status: RecordStatus,
    #[serde(default)]
    pub new_error: String,
    pub has_changes: bool,
    /// Normalized values the cleaning rules would store, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleaned_values: Option<BTreeMap<String, String>>,
}

impl ValidationResult {
    /// The edit would leave (or put) the record in an error state.
    pub fn still_failing(&self) -> bool {
        !self.new_status.is_clean()
    }
}

/// Row filter accepted by the records listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RecordFilter {
    #[default]
    All,
    Clean,
    Error,
}

impl RecordFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Clean => "clean",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for RecordFilter {
    type Err = crate::error::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "clean" => Ok(Self::Clean),
            "error" => Ok(Self::Error),
            other => Err(crate::error::CoreError::Validation(format!(
                "Invalid record filter '{other}'. Must be one of: all, clean, error"
            ))),
        }
    }
}

/// Parameters of `GET /batches/{id}/records`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordQuery {
    /// 1-based page number.
    pub page: u32,
    pub page_size: u32,
    pub filter: RecordFilter,
    pub search: String,
}

impl Default for RecordQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            filter: RecordFilter::All,
            search: String::new(),
        }
    }
}

impl RecordQuery {
    /// Clamp page and page size into the range the server honours.
    pub fn normalized(mut self) -> Self {
        self.page = self.page.max(1);
        self.page_size = self.page_size.clamp(1, MAX_PAGE_SIZE);
        self.search = self.search.trim().to_string();
        self
    }

    /// Query-string pairs in the server's parameter spelling.
    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("page", self.page.to_string()),
            ("pageSize", self.page_size.to_string()),
            ("filter", self.filter.as_str().to_string()),
            ("search", self.search.clone()),
        ]
    }
}

/// One page of records plus the total number of matching rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordPage {
    #[serde(default)]
    pub data: Vec<Record>,
    #[serde(default)]
    pub total: u64,
}
