//! Caller-owned inputs to a recommendation run.
//!
//! Lead storage and preference storage live outside this crate. These
//! traits are the only view the orchestrator has of them.

use async_trait::async_trait;
use canvass_area_models::{LeadLocation, TargetPreferences, ValidationError};
use thiserror::Error;

/// Errors from loading caller inputs.
#[derive(Debug, Error)]
pub enum InputError {
    /// Reading the underlying storage failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stored data could not be parsed.
    #[error("Failed to parse {what}: {message}")]
    Parse {
        /// What was being parsed (e.g., `"leads.csv line 4"`).
        what: String,
        /// Parser message.
        message: String,
    },

    /// Stored preferences are not usable for scoring.
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Yields the caller's leads with their coordinates and outcomes.
#[async_trait]
pub trait LeadLocationSource: Send + Sync {
    /// Returns every lead to consider.
    ///
    /// # Errors
    ///
    /// Returns [`InputError`] if the leads cannot be read.
    async fn lead_locations(&self) -> Result<Vec<LeadLocation>, InputError>;
}

/// Supplies the caller's target preferences.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Returns the preferences to score against.
    ///
    /// # Errors
    ///
    /// Returns [`InputError`] if the preferences cannot be read.
    async fn preferences(&self) -> Result<TargetPreferences, InputError>;
}

#[async_trait]
impl LeadLocationSource for Vec<LeadLocation> {
    async fn lead_locations(&self) -> Result<Vec<LeadLocation>, InputError> {
        Ok(self.clone())
    }
}

#[async_trait]
impl PreferenceStore for TargetPreferences {
    async fn preferences(&self) -> Result<TargetPreferences, InputError> {
        Ok(self.clone())
    }
}
