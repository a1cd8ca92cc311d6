#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Tract scoring.
//!
//! [`engine::score`] combines one tract's demographics, the caller's
//! target preferences, and the caller's own lead performance into a
//! 0-100 [`ScoreBreakdown`](canvass_area_models::ScoreBreakdown).
//! [`performance`] derives the per-tract lead statistics it consumes.
//! Everything here is pure and synchronous.

pub mod engine;
pub mod performance;

pub use engine::{ScoreWeights, score};
pub use performance::{aggregate, aggregate_all};
