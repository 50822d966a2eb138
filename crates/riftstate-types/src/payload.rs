//! Schema-validated state payloads, one variant per [`StateType`].
//!
//! The engine never interprets payload contents beyond this schema check:
//! a payload is validated once at the transaction boundary (before any log
//! append) and is opaque bytes from there on. Validation failures are
//! permanent errors -- the submitting collaborator must fix the payload,
//! the engine never coerces it.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::enums::StateType;

// ---------------------------------------------------------------------------
// Validation errors
// ---------------------------------------------------------------------------

/// Errors raised when a payload fails its category schema check.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A required string field was empty.
    #[error("field `{field}` must not be empty")]
    EmptyField {
        /// Name of the offending field.
        field: &'static str,
    },

    /// A bounded scalar fell outside the closed interval [0, 1].
    #[error("field `{field}` must be within [0, 1], got {value}")]
    OutOfUnitRange {
        /// Name of the offending field.
        field: &'static str,
        /// The rejected value.
        value: Decimal,
    },

    /// A ritual declared zero total stages.
    #[error("ritual must declare at least one stage")]
    ZeroStages,

    /// A ritual's current stage exceeded its declared total.
    #[error("ritual stage {stage} exceeds declared total of {total}")]
    StageOutOfBounds {
        /// The out-of-bounds stage.
        stage: u32,
        /// The declared stage count.
        total: u32,
    },

    /// The payload variant does not match the transaction's declared
    /// state category.
    #[error("payload is {found} but the transaction declared {expected}")]
    CategoryMismatch {
        /// The category the transaction declared.
        expected: StateType,
        /// The category the payload actually carries.
        found: StateType,
    },
}

// ---------------------------------------------------------------------------
// Payload union
// ---------------------------------------------------------------------------

/// The state carried by one scope key, tagged by category.
///
/// Serialized with an external `category`/`state` tag pair so log records
/// and checkpoints remain readable and the category survives replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "category", content = "state", rename_all = "snake_case")]
pub enum StatePayload {
    /// A celestial phenomenon and its progression.
    Celestial {
        /// Name of the phenomenon (e.g. "crimson_eclipse").
        phenomenon: String,
        /// Current phase index within the phenomenon's cycle.
        phase: u32,
        /// Observed intensity in [0, 1].
        intensity: Decimal,
        /// Whether the phenomenon is fading.
        waning: bool,
    },

    /// A rite in progress at some site.
    Ritual {
        /// Name of the rite (e.g. "sealing_of_the_maw").
        rite: String,
        /// Completed stage count.
        stage: u32,
        /// Declared total stage count; at least 1.
        total_stages: u32,
        /// Number of participating celebrants.
        celebrants: u32,
        /// Whether the rite has been disrupted.
        disrupted: bool,
    },

    /// A dimensional tear and its containment state.
    Anomaly {
        /// Classification label (e.g. "umbral_rift").
        anomaly_class: String,
        /// Planar flux level in [0, 1].
        flux: Decimal,
        /// Whether wards currently contain the anomaly.
        contained: bool,
    },

    /// Control of a named territory.
    Territory {
        /// The faction holding the territory, if any.
        controlling_faction: Option<String>,
        /// Whether control is actively contested.
        contested: bool,
        /// Strength of the stationed garrison.
        garrison: u32,
    },

    /// Standing of a named faction.
    Faction {
        /// Reputation score; unbounded, may go negative.
        reputation: i64,
        /// Political influence in [0, 1].
        influence: Decimal,
        /// Whether the faction is at war.
        at_war: bool,
    },
}

impl StatePayload {
    /// The state category this payload belongs to.
    pub const fn state_type(&self) -> StateType {
        match self {
            Self::Celestial { .. } => StateType::CelestialEvent,
            Self::Ritual { .. } => StateType::Ritual,
            Self::Anomaly { .. } => StateType::DimensionalAnomaly,
            Self::Territory { .. } => StateType::TerritoryState,
            Self::Faction { .. } => StateType::FactionState,
        }
    }

    /// Check this payload against its category schema.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] encountered.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Celestial {
                phenomenon,
                intensity,
                ..
            } => {
                require_nonempty("phenomenon", phenomenon)?;
                require_unit_range("intensity", *intensity)
            }
            Self::Ritual {
                rite,
                stage,
                total_stages,
                ..
            } => {
                require_nonempty("rite", rite)?;
                if *total_stages == 0 {
                    return Err(ValidationError::ZeroStages);
                }
                if stage > total_stages {
                    return Err(ValidationError::StageOutOfBounds {
                        stage: *stage,
                        total: *total_stages,
                    });
                }
                Ok(())
            }
            Self::Anomaly {
                anomaly_class,
                flux,
                ..
            } => {
                require_nonempty("anomaly_class", anomaly_class)?;
                require_unit_range("flux", *flux)
            }
            Self::Territory {
                controlling_faction,
                ..
            } => match controlling_faction {
                Some(faction) => require_nonempty("controlling_faction", faction),
                None => Ok(()),
            },
            Self::Faction { influence, .. } => require_unit_range("influence", *influence),
        }
    }

    /// Validate this payload and check it matches the declared category.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::CategoryMismatch`] on a category
    /// mismatch, or any schema violation from [`Self::validate`].
    pub fn validate_for(&self, expected: StateType) -> Result<(), ValidationError> {
        let found = self.state_type();
        if found != expected {
            return Err(ValidationError::CategoryMismatch { expected, found });
        }
        self.validate()
    }
}

/// Reject empty string fields.
fn require_nonempty(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField { field });
    }
    Ok(())
}

/// Reject scalars outside the closed interval [0, 1].
fn require_unit_range(field: &'static str, value: Decimal) -> Result<(), ValidationError> {
    if value < Decimal::ZERO || value > Decimal::ONE {
        return Err(ValidationError::OutOfUnitRange { field, value });
    }
    Ok(())
}
