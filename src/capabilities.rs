// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Capability resolution.
//!
//! The cloud directory describes what an appliance can do with a loose list of
//! vendor tokens (`"extendedAQ"`, `"heating"`, `"hp"`, ...) and a category tag.
//! This module turns that list into a typed [`CapabilitySet`].
//!
//! Matching is driven by an explicit [`CapabilityTable`]: each [`Feature`] has
//! exact aliases, substrings, and optionally a category gate. Tokens that
//! match no rule are kept in [`CapabilitySet::unknown_tokens`] so new firmware
//! vocabulary shows up in diagnostics, but they never grant a feature.
//!
//! # Examples
//!
//! ```
//! use airstate::capabilities::{CapabilityResolver, Feature};
//!
//! let resolver = CapabilityResolver::default();
//! let caps = resolver.resolve(["extendedAQ", "heating"], ["ec"]);
//!
//! assert!(caps.extended_air_quality());
//! assert!(caps.heating());
//! assert!(caps.wifi_diagnostics());
//! assert!(!caps.has(Feature::Humidifier));
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::types::DeviceCategory;

/// A typed device feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// PM2.5, PM10, VOC and NO2 sensors.
    ExtendedAirQuality,
    /// Heating element with target temperature.
    Heating,
    /// Humidifier with target humidity.
    Humidifier,
    /// Basic on/off oscillation.
    Oscillation,
    /// Configurable oscillation sweep angles.
    AdvancedOscillation,
    /// Formaldehyde sensor.
    Formaldehyde,
    /// Connectivity diagnostics, available on connected product families.
    WifiDiagnostics,
}

impl Feature {
    /// Every known feature.
    pub const ALL: [Self; 7] = [
        Self::ExtendedAirQuality,
        Self::Heating,
        Self::Humidifier,
        Self::Oscillation,
        Self::AdvancedOscillation,
        Self::Formaldehyde,
        Self::WifiDiagnostics,
    ];

    /// Returns the snake-case feature name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ExtendedAirQuality => "extended_air_quality",
            Self::Heating => "heating",
            Self::Humidifier => "humidifier",
            Self::Oscillation => "oscillation",
            Self::AdvancedOscillation => "advanced_oscillation",
            Self::Formaldehyde => "formaldehyde",
            Self::WifiDiagnostics => "wifi_diagnostics",
        }
    }

    /// Returns the live-state properties that only exist when the device has
    /// this feature.
    ///
    /// When a rediscovery drops a feature, these properties are pruned from
    /// the device's live state.
    #[must_use]
    pub const fn owned_properties(self) -> &'static [&'static str] {
        match self {
            Self::ExtendedAirQuality => &["pm25", "pm10", "voc", "no2"],
            Self::Heating => &["heating", "target_temperature"],
            Self::Humidifier => &["humidification", "target_humidity"],
            Self::Oscillation => &["oscillation"],
            Self::AdvancedOscillation => &["oscillation_angle_low", "oscillation_angle_high"],
            Self::Formaldehyde => &["hcho"],
            Self::WifiDiagnostics => &[],
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Matching rule for a single feature.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureRule {
    aliases: BTreeSet<String>,
    substrings: BTreeSet<String>,
    category_gated: bool,
}

impl FeatureRule {
    /// Creates a rule from exact aliases and substrings.
    #[must_use]
    pub fn new(aliases: &[&str], substrings: &[&str]) -> Self {
        Self {
            aliases: aliases.iter().map(|a| normalize(a)).collect(),
            substrings: substrings.iter().map(|s| normalize(s)).collect(),
            category_gated: false,
        }
    }

    /// Requires a connected category in addition to the token gate.
    #[must_use]
    pub fn category_gated(mut self) -> Self {
        self.category_gated = true;
        self
    }

    /// Returns true if the rule has no aliases and no substrings, so its token
    /// gate is always satisfied.
    #[must_use]
    pub fn is_token_free(&self) -> bool {
        self.aliases.is_empty() && self.substrings.is_empty()
    }

    /// Returns true if the feature also needs a connected category.
    #[must_use]
    pub const fn is_category_gated(&self) -> bool {
        self.category_gated
    }

    /// Returns true if a normalized token satisfies this rule.
    #[must_use]
    pub fn matches(&self, token: &str) -> bool {
        self.aliases.contains(token) || self.substrings.iter().any(|s| token.contains(s.as_str()))
    }
}

/// The table of feature rules used by [`CapabilityResolver`].
///
/// The default table carries the known vendor vocabulary. It can be extended
/// at runtime when a new firmware introduces a token.
///
/// # Examples
///
/// ```
/// use airstate::capabilities::{CapabilityResolver, CapabilityTable, Feature};
///
/// let table = CapabilityTable::default().with_alias(Feature::Humidifier, "hu2");
/// let caps = CapabilityResolver::new(table).resolve(["HU2"], ["ec"]);
/// assert!(caps.humidifier());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityTable {
    rules: BTreeMap<Feature, FeatureRule>,
    connected_categories: BTreeSet<String>,
}

impl Default for CapabilityTable {
    fn default() -> Self {
        let rules = BTreeMap::from([
            (
                Feature::ExtendedAirQuality,
                FeatureRule::new(&["eaq"], &["extendedaq", "extended_aq", "extended-aq"]),
            ),
            (
                Feature::Heating,
                FeatureRule::new(&["hp", "heat"], &["heating", "heater"]),
            ),
            (Feature::Humidifier, FeatureRule::new(&["ph"], &["humidif"])),
            (Feature::Oscillation, FeatureRule::new(&["osc"], &["oscillation"])),
            (
                Feature::AdvancedOscillation,
                FeatureRule::new(&[], &["advanceoscillation", "advancedoscillation"]),
            ),
            (
                Feature::Formaldehyde,
                FeatureRule::new(&[], &["formaldehyde", "hcho"]),
            ),
            (
                Feature::WifiDiagnostics,
                FeatureRule::new(&[], &[]).category_gated(),
            ),
        ]);
        let connected_categories = ["ec", "flrc", "robot", "light"]
            .into_iter()
            .map(String::from)
            .collect();
        Self {
            rules,
            connected_categories,
        }
    }
}

impl CapabilityTable {
    /// Creates a table with no rules and no connected categories.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            rules: BTreeMap::new(),
            connected_categories: BTreeSet::new(),
        }
    }

    /// Sets the rule for a feature, replacing any existing one.
    #[must_use]
    pub fn with_rule(mut self, feature: Feature, rule: FeatureRule) -> Self {
        self.rules.insert(feature, rule);
        self
    }

    /// Adds an exact alias for a feature.
    #[must_use]
    pub fn with_alias(mut self, feature: Feature, alias: &str) -> Self {
        self.rules
            .entry(feature)
            .or_default()
            .aliases
            .insert(normalize(alias));
        self
    }

    /// Adds a substring for a feature.
    #[must_use]
    pub fn with_substring(mut self, feature: Feature, substring: &str) -> Self {
        self.rules
            .entry(feature)
            .or_default()
            .substrings
            .insert(normalize(substring));
        self
    }

    /// Adds a category that satisfies category gates.
    #[must_use]
    pub fn with_connected_category(mut self, category: &str) -> Self {
        self.connected_categories.insert(normalize(category));
        self
    }

    /// Returns the rule for a feature, if any.
    #[must_use]
    pub fn rule(&self, feature: Feature) -> Option<&FeatureRule> {
        self.rules.get(&feature)
    }

    /// Returns true if the category satisfies category gates.
    #[must_use]
    pub fn is_connected_category(&self, category: &DeviceCategory) -> bool {
        self.connected_categories.contains(category.as_str())
    }
}

/// Turns raw capability tokens into a [`CapabilitySet`].
///
/// Resolution is pure and total: it never fails and never panics.
#[derive(Debug, Clone, Default)]
pub struct CapabilityResolver {
    table: CapabilityTable,
}

impl CapabilityResolver {
    /// Creates a resolver using the given table.
    #[must_use]
    pub fn new(table: CapabilityTable) -> Self {
        Self { table }
    }

    /// Returns the table in use.
    #[must_use]
    pub fn table(&self) -> &CapabilityTable {
        &self.table
    }

    /// Resolves tokens and category tags into a capability set.
    ///
    /// A feature is granted when its token gate is satisfied and, for
    /// category-gated features, when at least one category is in the
    /// connected set. Tokens matching no rule end up in `unknown_tokens`.
    pub fn resolve<T, C>(
        &self,
        tokens: impl IntoIterator<Item = T>,
        categories: impl IntoIterator<Item = C>,
    ) -> CapabilitySet
    where
        T: AsRef<str>,
        C: AsRef<str>,
    {
        let tokens: BTreeSet<String> = tokens
            .into_iter()
            .map(|t| normalize(t.as_ref()))
            .filter(|t| !t.is_empty())
            .collect();
        let categories: BTreeSet<DeviceCategory> = categories
            .into_iter()
            .map(|c| DeviceCategory::new(c.as_ref()))
            .filter(|c| !c.as_str().is_empty())
            .collect();

        let connected = categories
            .iter()
            .any(|c| self.table.is_connected_category(c));

        let features = self
            .table
            .rules
            .iter()
            .filter(|(_, rule)| {
                let token_gate = rule.is_token_free() || tokens.iter().any(|t| rule.matches(t));
                let category_gate = !rule.category_gated || connected;
                token_gate && category_gate
            })
            .map(|(feature, _)| *feature)
            .collect();

        let unknown_tokens = tokens
            .into_iter()
            .filter(|t| !self.table.rules.values().any(|rule| rule.matches(t)))
            .collect();

        CapabilitySet {
            features,
            categories,
            unknown_tokens,
        }
    }
}

fn normalize(token: &str) -> String {
    token.trim().to_lowercase()
}

/// Immutable, deduplicated set of features a device supports.
///
/// A device's set is replaced wholesale on rediscovery; it is never mutated
/// in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CapabilitySet {
    features: BTreeSet<Feature>,
    categories: BTreeSet<DeviceCategory>,
    unknown_tokens: BTreeSet<String>,
}

impl CapabilitySet {
    /// Returns true if the set contains the feature.
    #[must_use]
    pub fn has(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    /// Iterates over the granted features in a stable order.
    pub fn features(&self) -> impl Iterator<Item = Feature> + '_ {
        self.features.iter().copied()
    }

    /// Returns the category tags the set was resolved with.
    #[must_use]
    pub fn categories(&self) -> &BTreeSet<DeviceCategory> {
        &self.categories
    }

    /// Returns tokens that matched no rule.
    #[must_use]
    pub fn unknown_tokens(&self) -> &BTreeSet<String> {
        &self.unknown_tokens
    }

    /// Returns true if no feature is granted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Returns the features present in `self` but absent from `other`.
    pub fn missing_from<'a>(&'a self, other: &'a Self) -> impl Iterator<Item = Feature> + 'a {
        self.features.difference(&other.features).copied()
    }

    /// Extended air quality sensors.
    #[must_use]
    pub fn extended_air_quality(&self) -> bool {
        self.has(Feature::ExtendedAirQuality)
    }

    /// Heating element.
    #[must_use]
    pub fn heating(&self) -> bool {
        self.has(Feature::Heating)
    }

    /// Humidifier.
    #[must_use]
    pub fn humidifier(&self) -> bool {
        self.has(Feature::Humidifier)
    }

    /// Oscillation.
    #[must_use]
    pub fn oscillation(&self) -> bool {
        self.has(Feature::Oscillation)
    }

    /// Configurable oscillation angles.
    #[must_use]
    pub fn advanced_oscillation(&self) -> bool {
        self.has(Feature::AdvancedOscillation)
    }

    /// Formaldehyde sensor.
    #[must_use]
    pub fn formaldehyde(&self) -> bool {
        self.has(Feature::Formaldehyde)
    }

    /// Connectivity diagnostics.
    #[must_use]
    pub fn wifi_diagnostics(&self) -> bool {
        self.has(Feature::WifiDiagnostics)
    }
}

/// Builder for capability sets that do not come from the cloud directory.
///
/// # Examples
///
/// ```
/// use airstate::capabilities::{CapabilitySetBuilder, Feature};
///
/// let caps = CapabilitySetBuilder::new()
///     .with_feature(Feature::Heating)
///     .with_category("ec")
///     .build();
/// assert!(caps.heating());
/// ```
#[derive(Debug, Default)]
pub struct CapabilitySetBuilder {
    inner: CapabilitySet,
}

impl CapabilitySetBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants a feature.
    #[must_use]
    pub fn with_feature(mut self, feature: Feature) -> Self {
        self.inner.features.insert(feature);
        self
    }

    /// Records a category tag.
    #[must_use]
    pub fn with_category(mut self, category: &str) -> Self {
        self.inner.categories.insert(DeviceCategory::new(category));
        self
    }

    /// Records an unknown token.
    #[must_use]
    pub fn with_unknown_token(mut self, token: &str) -> Self {
        self.inner.unknown_tokens.insert(normalize(token));
        self
    }

    /// Builds the set.
    #[must_use]
    pub fn build(self) -> CapabilitySet {
        self.inner
    }
}
