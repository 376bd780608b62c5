//! Deal and stage shapes as they travel over the wire.
//!
//! These are transport projections. The host keeps a richer deal entity in
//! its own store and maps to and from these shapes at the bridge boundary.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// A deal as exchanged between host and remote.
///
/// `id` is the only identity key. Two payloads describing the same logical
/// deal are never merged by any other field.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDeal {
    pub id: String,
    pub title: String,
    pub value: f64,

    /// Id of the [`PipelineStage`] the deal currently sits in.
    pub stage: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub contact_id: Option<String>,

    /// Display decoration filled in by the host from its contact lookup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub contact_name: Option<String>,

    /// Display decoration filled in by the host from its contact lookup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub company: Option<String>,

    /// Win probability in percent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub probability: Option<f64>,

    #[serde(
        default,
        deserialize_with = "close_date::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    #[ts(optional)]
    pub expected_close_date: Option<NaiveDate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub notes: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl PipelineDeal {
    /// A deal with only the required fields set.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        value: f64,
        stage: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            value,
            stage: stage.into(),
            contact_id: None,
            contact_name: None,
            company: None,
            probability: None,
            expected_close_date: None,
            notes: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// The changes that turn an empty deal into this one.
    pub fn as_changes(&self) -> DealChanges {
        DealChanges {
            title: Some(self.title.clone()),
            value: Some(self.value),
            stage: Some(self.stage.clone()),
            contact_id: self.contact_id.clone(),
            contact_name: self.contact_name.clone(),
            company: self.company.clone(),
            probability: self.probability,
            expected_close_date: self.expected_close_date,
            notes: self.notes.clone(),
            updated_at: self.updated_at,
        }
    }

    /// Overwrite every field present in `changes`.
    pub fn apply_changes(&mut self, changes: &DealChanges) {
        if let Some(title) = &changes.title {
            self.title = title.clone();
        }
        if let Some(value) = changes.value {
            self.value = value;
        }
        if let Some(stage) = &changes.stage {
            self.stage = stage.clone();
        }
        if let Some(contact_id) = &changes.contact_id {
            self.contact_id = Some(contact_id.clone());
        }
        if let Some(contact_name) = &changes.contact_name {
            self.contact_name = Some(contact_name.clone());
        }
        if let Some(company) = &changes.company {
            self.company = Some(company.clone());
        }
        if let Some(probability) = changes.probability {
            self.probability = Some(probability);
        }
        if let Some(date) = changes.expected_close_date {
            self.expected_close_date = Some(date);
        }
        if let Some(notes) = &changes.notes {
            self.notes = Some(notes.clone());
        }
        if let Some(updated_at) = changes.updated_at {
            self.updated_at = Some(updated_at);
        }
    }
}

/// A partial deal: every field that is `Some` was changed.
///
/// A `null` on the wire means "unchanged", not "cleared".
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct DealChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub value: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub stage: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub contact_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub contact_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub company: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub probability: Option<f64>,

    #[serde(
        default,
        deserialize_with = "close_date::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    #[ts(optional)]
    pub expected_close_date: Option<NaiveDate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub notes: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Lenient reading of `expectedCloseDate`.
///
/// Browsers usually send `Date.toISOString()` output rather than a bare
/// date, so both `2024-06-30` and `2024-06-30T00:00:00.000Z` are accepted.
/// A timestamp keeps the calendar date written in its own offset.
pub mod close_date {
    use chrono::{DateTime, NaiveDate};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    pub fn parse(raw: &str) -> Option<NaiveDate> {
        let raw = raw.trim();
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|at| at.date_naive()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|raw| {
                parse(&raw).ok_or_else(|| {
                    D::Error::custom(format!(
                        "invalid date `{raw}`, expected YYYY-MM-DD or an RFC 3339 timestamp"
                    ))
                })
            })
            .transpose()
    }
}

/// One column of the pipeline board.
///
/// Stages are defined by the host, sent once during the handshake and never
/// modified by the remote side.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
pub struct PipelineStage {
    pub id: String,
    pub name: String,

    /// Position on the board, ascending left to right.
    pub order: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub color: Option<String>,
}

impl PipelineStage {
    pub fn new(id: impl Into<String>, name: impl Into<String>, order: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            order,
            color: None,
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }
}

/// The stage vocabulary used when a project does not define its own.
pub fn default_stages() -> Vec<PipelineStage> {
    vec![
        PipelineStage::new("lead", "Lead", 0).with_color("#94a3b8"),
        PipelineStage::new("qualified", "Qualified", 1).with_color("#60a5fa"),
        PipelineStage::new("proposal", "Proposal", 2).with_color("#a78bfa"),
        PipelineStage::new("negotiation", "Negotiation", 3).with_color("#fbbf24"),
        PipelineStage::new("won", "Won", 4).with_color("#34d399"),
        PipelineStage::new("lost", "Lost", 5).with_color("#f87171"),
    ]
}
