//! Quick-profile presets and preference resolution.
//!
//! Preferences are assembled from three layers, later ones winning:
//! a named preset, an optional TOML file, then individual command-line
//! flags.
//!
//! ```toml
//! profile = "suburban"
//! income_min = 90000
//! homeownership = 0.6
//! ```

use std::path::PathBuf;

use async_trait::async_trait;
use canvass_area_models::TargetPreferences;
use canvass_recommend::sources::{InputError, PreferenceStore};
use serde::Deserialize;

/// Preset used when neither a flag nor the file names one.
pub const DEFAULT_PROFILE: &str = "suburban";

/// Named presets, in display order.
pub const PROFILES: &[(&str, &str, TargetPreferences)] = &[
    (
        "starter",
        "First-time buyers and entry-level homes",
        TargetPreferences::new(40_000.0, 75_000.0, 100_000.0, 250_000.0),
    ),
    (
        "suburban",
        "Established middle-income neighborhoods",
        TargetPreferences::new(75_000.0, 150_000.0, 250_000.0, 500_000.0),
    ),
    (
        "affluent",
        "Upper-middle-income owner-occupied areas",
        TargetPreferences::new(150_000.0, 300_000.0, 500_000.0, 1_000_000.0)
            .with_homeownership_preference(0.6),
    ),
    (
        "luxury",
        "High-income areas with premium homes",
        TargetPreferences::new(250_000.0, 500_000.0, 1_000_000.0, 2_000_000.0)
            .with_homeownership_preference(0.7),
    ),
];

/// Looks up a preset by name, ignoring case.
#[must_use]
pub fn profile(name: &str) -> Option<TargetPreferences> {
    PROFILES
        .iter()
        .find(|(n, _, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, _, prefs)| prefs.clone())
}

/// Partial preferences from a file or flags.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PreferenceOverrides {
    pub profile: Option<String>,
    pub income_min: Option<f64>,
    pub income_max: Option<f64>,
    pub home_value_min: Option<f64>,
    pub home_value_max: Option<f64>,
    pub homeownership: Option<f64>,
}

impl PreferenceOverrides {
    fn apply(&self, prefs: &mut TargetPreferences) {
        if let Some(v) = self.income_min {
            prefs.income_min = v;
        }
        if let Some(v) = self.income_max {
            prefs.income_max = v;
        }
        if let Some(v) = self.home_value_min {
            prefs.home_value_min = v;
        }
        if let Some(v) = self.home_value_max {
            prefs.home_value_max = v;
        }
        if let Some(v) = self.homeownership {
            prefs.homeownership_weight_preference = Some(v);
        }
    }
}

/// [`PreferenceStore`] combining a preset, a TOML file, and flags.
#[derive(Debug, Clone, Default)]
pub struct LayeredPreferences {
    pub file: Option<PathBuf>,
    pub flags: PreferenceOverrides,
}

impl LayeredPreferences {
    /// Resolves the layers without touching the filesystem.
    ///
    /// # Errors
    ///
    /// Returns [`InputError::Parse`] if a named profile does not exist.
    pub fn resolve(
        file: Option<&PreferenceOverrides>,
        flags: &PreferenceOverrides,
    ) -> Result<TargetPreferences, InputError> {
        let name = flags
            .profile
            .as_deref()
            .or_else(|| file.and_then(|f| f.profile.as_deref()))
            .unwrap_or(DEFAULT_PROFILE);

        let mut prefs = profile(name).ok_or_else(|| InputError::Parse {
            what: "profile".to_string(),
            message: format!(
                "unknown profile '{name}' (expected one of: {})",
                PROFILES
                    .iter()
                    .map(|(n, _, _)| *n)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        })?;

        if let Some(file) = file {
            file.apply(&mut prefs);
        }
        flags.apply(&mut prefs);

        Ok(prefs.validated()?)
    }
}

/// Parses a preferences TOML document.
///
/// # Errors
///
/// Returns [`InputError::Parse`] on malformed TOML or unknown keys.
pub fn parse_overrides(what: &str, contents: &str) -> Result<PreferenceOverrides, InputError> {
    toml::from_str(contents).map_err(|e| InputError::Parse {
        what: what.to_string(),
        message: e.to_string(),
    })
}

#[async_trait]
impl PreferenceStore for LayeredPreferences {
    async fn preferences(&self) -> Result<TargetPreferences, InputError> {
        let file = match &self.file {
            Some(path) => {
                let contents = tokio::fs::read_to_string(path).await?;
                Some(parse_overrides(&path.display().to_string(), &contents)?)
            }
            None => None,
        };

        let prefs = Self::resolve(file.as_ref(), &self.flags)?;
        log::debug!("Resolved preferences: {prefs:?}");
        Ok(prefs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_profile_validates() {
        for (name, _, prefs) in PROFILES {
            assert!(prefs.validate().is_ok(), "profile {name} is invalid");
        }
    }

    #[test]
    fn profile_lookup_ignores_case() {
        assert_eq!(profile("Luxury"), Some(PROFILES[3].2.clone()));
        assert_eq!(profile("mansion"), None);
    }

    #[test]
    fn defaults_to_suburban() {
        let prefs = LayeredPreferences::resolve(None, &PreferenceOverrides::default()).unwrap();
        assert_eq!(prefs, profile(DEFAULT_PROFILE).unwrap());
    }

    #[test]
    fn flags_override_file_override_profile() {
        let file = parse_overrides(
            "prefs.toml",
            "profile = \"starter\"\nincome_max = 90000\nhome_value_max = 300000\n",
        )
        .unwrap();
        let flags = PreferenceOverrides {
            income_max: Some(95_000.0),
            homeownership: Some(0.5),
            ..PreferenceOverrides::default()
        };

        let prefs = LayeredPreferences::resolve(Some(&file), &flags).unwrap();
        assert!((prefs.income_min - 40_000.0).abs() < f64::EPSILON);
        assert!((prefs.income_max - 95_000.0).abs() < f64::EPSILON);
        assert!((prefs.home_value_max - 300_000.0).abs() < f64::EPSILON);
        assert_eq!(prefs.homeownership_weight_preference, Some(0.5));
    }

    #[test]
    fn rejects_inverted_override() {
        let flags = PreferenceOverrides {
            income_min: Some(200_000.0),
            ..PreferenceOverrides::default()
        };
        assert!(matches!(
            LayeredPreferences::resolve(None, &flags),
            Err(InputError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_unknown_profile_and_keys() {
        let flags = PreferenceOverrides {
            profile: Some("mansion".to_string()),
            ..PreferenceOverrides::default()
        };
        assert!(LayeredPreferences::resolve(None, &flags).is_err());
        assert!(parse_overrides("prefs.toml", "income = 5").is_err());
    }
}
