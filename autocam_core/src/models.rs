use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Suffix an attachment must carry to count as a design artifact.
pub const DESIGN_ATTACHMENT_SUFFIX: &str = ".step";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ThicknessParseError {
    #[error("thickness is not a decimal: {0:?}")]
    NotDecimal(String),
    #[error("thickness must be a finite positive value: {0:?}")]
    NotPositive(String),
}

/// Generated id of a `part_categories` row.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct CategoryId(pub i64);

impl fmt::Display for CategoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Generated id of a `parts` row.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct PartId(pub i64);

impl fmt::Display for PartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Tracker issue key (e.g. `HW-1`); the reconciliation key between a work item and a part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ticket(pub String);

impl Ticket {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Ticket {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Ticket {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Sheet thickness of a category.
///
/// The tracker stores thickness as free text; it is coerced to a decimal with
/// [`Thickness::parse`]. Only finite positive values can be constructed, which
/// makes bitwise equality and hashing sound.
#[derive(Debug, Copy, Clone, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Thickness(f64);

impl Thickness {
    pub fn parse(raw: &str) -> std::result::Result<Self, ThicknessParseError> {
        let value: f64 = raw
            .trim()
            .parse()
            .map_err(|_| ThicknessParseError::NotDecimal(raw.to_string()))?;
        Self::new(value).ok_or_else(|| ThicknessParseError::NotPositive(raw.to_string()))
    }

    pub fn new(value: f64) -> Option<Self> {
        (value.is_finite() && value > 0.0).then_some(Self(value))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl Eq for Thickness {}

impl Hash for Thickness {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl fmt::Display for Thickness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl<'de> Deserialize<'de> for Thickness {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = f64::deserialize(deserializer)?;
        Self::new(value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid thickness {value}")))
    }
}

/// A binary attachment on a work item. The body is fetched on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub filename: String,
    pub content_url: String,
    pub size: Option<u64>,
}

/// Read-only view of a qualifying tracker issue.
///
/// Field values are kept as the tracker rendered them; validation and
/// coercion belong to the field extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub ticket: Ticket,
    pub summary: Option<String>,
    pub epic_ref: Option<String>,
    pub quantity: Option<String>,
    pub material: Option<String>,
    pub thickness: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl WorkItem {
    pub fn new(ticket: impl Into<Ticket>) -> Self {
        Self {
            ticket: ticket.into(),
            summary: None,
            epic_ref: None,
            quantity: None,
            material: None,
            thickness: None,
            attachments: Vec::new(),
        }
    }

    /// First-`.step`-wins: the design artifact is the first attachment whose
    /// filename ends in `.step`; any later ones are ignored.
    pub fn design_attachment(&self) -> Option<&Attachment> {
        self.attachments
            .iter()
            .find(|a| a.filename.ends_with(DESIGN_ATTACHMENT_SUFFIX))
    }
}

/// A validated work item, ready to be written to the stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartRecord {
    pub name: String,
    pub epic: String,
    pub ticket: Ticket,
    pub quantity: i32,
    pub material: String,
    pub thickness: Thickness,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub material: String,
    pub thickness: Thickness,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub id: PartId,
    pub name: String,
    pub epic: String,
    pub ticket: Ticket,
    pub quantity: i32,
    pub category_id: CategoryId,
}

/// Insert payload for the `parts` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPart {
    pub name: String,
    pub epic: String,
    pub ticket: Ticket,
    pub quantity: i32,
    pub category_id: CategoryId,
}

impl NewPart {
    pub fn from_record(record: &PartRecord, category_id: CategoryId) -> Self {
        Self {
            name: record.name.clone(),
            epic: record.epic.clone(),
            ticket: record.ticket.clone(),
            quantity: record.quantity,
            category_id,
        }
    }
}

/// Result of an insert-if-absent write.
///
/// Rows are never updated once created: `AlreadyExists` carries the stored
/// row unchanged, even when the incoming values differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "row", rename_all = "snake_case")]
pub enum UpsertOutcome<T> {
    Created(T),
    AlreadyExists(T),
}

impl<T> UpsertOutcome<T> {
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }

    pub fn row(&self) -> &T {
        match self {
            Self::Created(row) | Self::AlreadyExists(row) => row,
        }
    }

    pub fn into_row(self) -> T {
        match self {
            Self::Created(row) | Self::AlreadyExists(row) => row,
        }
    }
}

/// Tickets whose parts survive a cleanup pass. Never empty.
///
/// An empty read from the tracker must not be interpreted as "delete
/// everything", so a deletion set can only be built from at least one ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetainedTickets(BTreeSet<Ticket>);

impl RetainedTickets {
    pub fn new(tickets: BTreeSet<Ticket>) -> Option<Self> {
        (!tickets.is_empty()).then_some(Self(tickets))
    }

    pub fn contains(&self, ticket: &Ticket) -> bool {
        self.0.contains(ticket)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(|t| t.0.clone()).collect()
    }
}
