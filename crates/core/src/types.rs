use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier for a registered user acting as the owning principal.
pub type UserId = i64;

/// Pipeline status of an application.
///
/// The enumeration is closed; stats views zero-fill across [`ApplicationStatus::ALL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Saved,
    Applied,
    Oa,
    Tech,
    Hr,
    Final,
    Offer,
    Reject,
    Accept,
}

impl ApplicationStatus {
    /// Every valid status, in pipeline order.
    pub const ALL: [ApplicationStatus; 9] = [
        Self::Saved,
        Self::Applied,
        Self::Oa,
        Self::Tech,
        Self::Hr,
        Self::Final,
        Self::Offer,
        Self::Reject,
        Self::Accept,
    ];

    /// Canonical database representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Saved => "saved",
            Self::Applied => "applied",
            Self::Oa => "oa",
            Self::Tech => "tech",
            Self::Hr => "hr",
            Self::Final => "final",
            Self::Offer => "offer",
            Self::Reject => "reject",
            Self::Accept => "accept",
        }
    }

    pub fn parse(value: &str) -> Result<Self, InvalidEnumValue> {
        match value {
            "saved" => Ok(Self::Saved),
            "applied" => Ok(Self::Applied),
            "oa" => Ok(Self::Oa),
            "tech" => Ok(Self::Tech),
            "hr" => Ok(Self::Hr),
            "final" => Ok(Self::Final),
            "offer" => Ok(Self::Offer),
            "reject" => Ok(Self::Reject),
            "accept" => Ok(Self::Accept),
            other => Err(InvalidEnumValue {
                kind: "status",
                value: other.to_string(),
            }),
        }
    }
}

/// Kind of an interview stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Oa,
    Tech,
    Hr,
    Final,
    Other,
}

impl StageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Oa => "oa",
            Self::Tech => "tech",
            Self::Hr => "hr",
            Self::Final => "final",
            Self::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Result<Self, InvalidEnumValue> {
        match value {
            "oa" => Ok(Self::Oa),
            "tech" => Ok(Self::Tech),
            "hr" => Ok(Self::Hr),
            "final" => Ok(Self::Final),
            "other" => Ok(Self::Other),
            other => Err(InvalidEnumValue {
                kind: "stage kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Kind of a stored document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Resume,
    Cover,
    Es,
    Offer,
    Other,
}

impl DocumentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Resume => "resume",
            Self::Cover => "cover",
            Self::Es => "es",
            Self::Offer => "offer",
            Self::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Result<Self, InvalidEnumValue> {
        match value {
            "resume" => Ok(Self::Resume),
            "cover" => Ok(Self::Cover),
            "es" => Ok(Self::Es),
            "offer" => Ok(Self::Offer),
            "other" => Ok(Self::Other),
            other => Err(InvalidEnumValue {
                kind: "document kind",
                value: other.to_string(),
            }),
        }
    }
}

/// A string value outside one of the closed enumerations.
#[derive(Debug, Clone, Error)]
#[error("invalid {kind}: {value}")]
pub struct InvalidEnumValue {
    pub kind: &'static str,
    pub value: String,
}

/// A company applications point at through their role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub id: i64,
    pub name: String,
    pub website: String,
    pub country: String,
    pub city: String,
}

/// A role posted by a company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub id: i64,
    pub company_id: i64,
    pub title: String,
    pub level: String,
    pub job_url: String,
    pub stack_tags: Vec<String>,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub currency: String,
}

/// A user's application for a role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: i64,
    pub user_id: UserId,
    pub role_id: i64,
    pub status: ApplicationStatus,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline_at: Option<DateTime<Utc>>,
    pub priority: i64,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An interview stage attached to an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub id: i64,
    pub application_id: i64,
    pub kind: StageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    pub result: String,
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

impl Stage {
    /// A stage counts as open until a non-empty result other than "pending" lands.
    pub fn is_unresolved(&self) -> bool {
        self.result.is_empty() || self.result == "pending"
    }
}

/// A document attached to an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub application_id: i64,
    pub kind: DocumentKind,
    pub storage_key: String,
    pub created_at: DateTime<Utc>,
}

/// A reminder owned by a user, optionally tied to an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: i64,
    pub user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_id: Option<i64>,
    pub due_at: DateTime<Utc>,
    pub message: String,
    pub done: bool,
    pub created_at: DateTime<Utc>,
}
