//! Column cleaning rules sent as upload metadata.
//!
//! The client never evaluates these; it only serializes them into the
//! `rules` multipart field so the server knows how to clean each column.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Kind of check or transformation applied to a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Regex,
    Replace,
    Length,
    Required,
    Date,
    Address,
}

/// One rule. Which optional parameters matter depends on `rule_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleaningRule {
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<String>,
    /// Address component (`province`, `city`, `district`) for address rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comp: Option<String>,
}

impl CleaningRule {
    fn bare(rule_type: RuleType) -> Self {
        Self {
            rule_type,
            pattern: None,
            min: None,
            max: None,
            old: None,
            new: None,
            comp: None,
        }
    }

    pub fn required() -> Self {
        Self::bare(RuleType::Required)
    }

    pub fn date() -> Self {
        Self::bare(RuleType::Date)
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Self {
            pattern: Some(pattern.into()),
            ..Self::bare(RuleType::Regex)
        }
    }

    pub fn replace(old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            old: Some(old.into()),
            new: Some(new.into()),
            ..Self::bare(RuleType::Replace)
        }
    }

    pub fn length(min: u32, max: u32) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
            ..Self::bare(RuleType::Length)
        }
    }

    pub fn address(comp: impl Into<String>) -> Self {
        Self {
            comp: Some(comp.into()),
            ..Self::bare(RuleType::Address)
        }
    }

    /// Reject rules missing the parameters their type needs.
    pub fn validate(&self) -> Result<(), CoreError> {
        let missing = |what: &str| {
            Err(CoreError::Validation(format!(
                "{:?} rule requires '{what}'",
                self.rule_type
            )))
        };
        match self.rule_type {
            RuleType::Regex if self.pattern.as_deref().unwrap_or("").is_empty() => {
                missing("pattern")
            }
            RuleType::Replace if self.old.is_none() => missing("old"),
            RuleType::Length => match (self.min, self.max) {
                (Some(min), Some(max)) if min > max => Err(CoreError::Validation(format!(
                    "length rule has min {min} greater than max {max}"
                ))),
                (None, None) => missing("min or max"),
                _ => Ok(()),
            },
            RuleType::Address if self.comp.is_none() => missing("comp"),
            _ => Ok(()),
        }
    }
}

/// Rules for a single source column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRules {
    pub column: String,
    pub rules: Vec<CleaningRule>,
}

/// Parse and check a rules document (a JSON array of [`ColumnRules`]).
pub fn parse_rules(json: &str) -> Result<Vec<ColumnRules>, CoreError> {
    let rules: Vec<ColumnRules> = serde_json::from_str(json)
        .map_err(|e| CoreError::Validation(format!("invalid rules document: {e}")))?;
    for column in &rules {
        if column.column.trim().is_empty() {
            return Err(CoreError::Validation("rule column name is empty".into()));
        }
        for rule in &column.rules {
            rule.validate()?;
        }
    }
    Ok(rules)
}

/// Rules the server applies out of the box, keyed by conventional column names.
pub fn default_rules() -> Vec<ColumnRules> {
    vec![
        ColumnRules {
            column: "phone".into(),
            rules: vec![
                CleaningRule::replace(" ", ""),
                CleaningRule::regex(r"^1[3-9]\d{9}$"),
            ],
        },
        ColumnRules {
            column: "name".into(),
            rules: vec![CleaningRule::required(), CleaningRule::length(2, 20)],
        },
        ColumnRules {
            column: "date".into(),
            rules: vec![CleaningRule::date()],
        },
        ColumnRules {
            column: "address_province".into(),
            rules: vec![CleaningRule::address("province")],
        },
        ColumnRules {
            column: "address_city".into(),
            rules: vec![CleaningRule::address("city")],
        },
        ColumnRules {
            column: "address_district".into(),
            rules: vec![CleaningRule::address("district")],
        },
    ]
}
