use crate::models::{PartRecord, Thickness, ThicknessParseError, WorkItem};
use crate::reconcile::traits::SourceClient;
use crate::{Error, Result};
use std::sync::Arc;

/// Reasons a work item cannot become a [`PartRecord`] this cycle.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("{field} is missing")]
    Missing { field: &'static str },

    #[error("{field} is malformed: {value:?}")]
    Malformed { field: &'static str, value: String },

    #[error("{field} must be positive: {value:?}")]
    NotPositive { field: &'static str, value: String },

    #[error("epic {epic_ref} has an empty summary")]
    EmptyEpic { epic_ref: String },

    #[error("epic {epic_ref} does not exist")]
    UnknownEpic { epic_ref: String },
}

/// Outcome of extracting one item: a record, or the reason it was rejected.
pub type Extraction = std::result::Result<PartRecord, ExtractionError>;

/// Turns a raw [`WorkItem`] into a validated [`PartRecord`].
///
/// Local fields are checked before the epic is resolved, so incomplete items
/// never cost a tracker round-trip. Tracker failures during the epic lookup
/// are returned as the outer `Err`; only a missing epic rejects the item.
pub struct FieldExtractor {
    source: Arc<dyn SourceClient>,
}

impl FieldExtractor {
    pub fn new(source: Arc<dyn SourceClient>) -> Self {
        Self { source }
    }

    #[tracing::instrument(level = "debug", skip(self, item), fields(ticket = %item.ticket))]
    pub async fn extract(&self, item: &WorkItem) -> Result<Extraction> {
        let fields = match local_fields(item) {
            Ok(fields) => fields,
            Err(e) => return Ok(Err(e)),
        };

        let epic = match self.source.resolve_epic_summary(fields.epic_ref).await {
            Ok(epic) => epic,
            Err(Error::NotFound(_)) => {
                return Ok(Err(ExtractionError::UnknownEpic {
                    epic_ref: fields.epic_ref.to_string(),
                }));
            }
            Err(e) => return Err(e),
        };
        let epic = epic.trim();
        if epic.is_empty() {
            return Ok(Err(ExtractionError::EmptyEpic {
                epic_ref: fields.epic_ref.to_string(),
            }));
        }

        Ok(Ok(PartRecord {
            name: fields.name.to_string(),
            epic: epic.to_string(),
            ticket: item.ticket.clone(),
            quantity: fields.quantity,
            material: fields.material.to_string(),
            thickness: fields.thickness,
        }))
    }
}

struct LocalFields<'a> {
    name: &'a str,
    epic_ref: &'a str,
    quantity: i32,
    material: &'a str,
    thickness: Thickness,
}

fn local_fields(item: &WorkItem) -> std::result::Result<LocalFields<'_>, ExtractionError> {
    Ok(LocalFields {
        name: required_text("summary", item.summary.as_deref())?,
        epic_ref: required_text("epic", item.epic_ref.as_deref())?,
        quantity: parse_quantity(required_text("quantity", item.quantity.as_deref())?)?,
        material: required_text("material", item.material.as_deref())?,
        thickness: parse_thickness(required_text("thickness", item.thickness.as_deref())?)?,
    })
}

fn required_text<'a>(
    field: &'static str,
    value: Option<&'a str>,
) -> std::result::Result<&'a str, ExtractionError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ExtractionError::Missing { field })
}

/// Quantity arrives as `3` or `3.0`; integral values only.
fn parse_quantity(raw: &str) -> std::result::Result<i32, ExtractionError> {
    let malformed = || ExtractionError::Malformed {
        field: "quantity",
        value: raw.to_string(),
    };
    let value: i64 = match raw.parse::<i64>() {
        Ok(v) => v,
        Err(_) => {
            let f: f64 = raw.parse().map_err(|_| malformed())?;
            if !f.is_finite() || f.fract() != 0.0 || f.abs() > i64::MAX as f64 {
                return Err(malformed());
            }
            f as i64
        }
    };
    if value <= 0 {
        return Err(ExtractionError::NotPositive {
            field: "quantity",
            value: raw.to_string(),
        });
    }
    i32::try_from(value).map_err(|_| malformed())
}

fn parse_thickness(raw: &str) -> std::result::Result<Thickness, ExtractionError> {
    Thickness::parse(raw).map_err(|e| match e {
        ThicknessParseError::NotDecimal(value) => ExtractionError::Malformed {
            field: "thickness",
            value,
        },
        ThicknessParseError::NotPositive(value) => ExtractionError::NotPositive {
            field: "thickness",
            value,
        },
    })
}
