use crate::compat::CompatMode;
use crate::errors::PatchError;
use crate::rules::op::Feature;
use serde::Deserialize;
use std::fmt;

/// Feature flags selecting which rule groups are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeatureSet {
    pub resi: bool,
    pub bypass: bool,
}

impl Default for FeatureSet {
    fn default() -> Self {
        Self {
            resi: true,
            bypass: true,
        }
    }
}

impl FeatureSet {
    pub fn enabled(&self, feature: Feature) -> bool {
        match feature {
            Feature::Resi => self.resi,
            Feature::Bypass => self.bypass,
        }
    }

    /// Parse a comma-separated feature list, e.g. `resi,bypass`.
    /// An empty string enables everything.
    pub fn parse(csv: &str) -> Result<Self, PatchError> {
        let raw = csv.trim();
        if raw.is_empty() {
            return Ok(Self::default());
        }
        let mut set = Self {
            resi: false,
            bypass: false,
        };
        for part in raw.split(',') {
            match part.trim().to_ascii_lowercase().as_str() {
                "" => {}
                "resi" => set.resi = true,
                "bypass" => set.bypass = true,
                other => {
                    return Err(PatchError::UnknownFeature {
                        name: other.to_string(),
                    })
                }
            }
        }
        Ok(set)
    }

    /// Stable rendering for status lines, e.g. `resi,bypass` or `(none)`.
    pub fn names(&self) -> String {
        let mut parts = Vec::new();
        if self.resi {
            parts.push("resi");
        }
        if self.bypass {
            parts.push("bypass");
        }
        if parts.is_empty() {
            "(none)".to_string()
        } else {
            parts.join(",")
        }
    }
}

/// The full configuration surface of one run.
///
/// An explicit value object: no process-wide defaults, no environment
/// lookups. Deserialized from a TOML profile file, overridable from the
/// CLI, or built in code for tests.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Profile {
    pub compat: CompatMode,
    pub features: FeatureSet,
    pub resi: ResiConfig,
    pub bypass: BypassConfig,
}

impl Profile {
    /// Structural sanity checks before a profile is used for a run.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.resi.proxy_name.trim().is_empty() {
            issues.push(ValidationIssue::MissingValue {
                field: "resi.proxy_name",
            });
        }
        if self.resi.dialer_group.trim().is_empty() {
            issues.push(ValidationIssue::MissingValue {
                field: "resi.dialer_group",
            });
        }
        if self.resi.entry_group.trim().is_empty() {
            issues.push(ValidationIssue::MissingValue {
                field: "resi.entry_group",
            });
        }
        if self.features.resi
            && self.resi.node_patterns.is_empty()
            && self.resi.node_fallback.is_empty()
        {
            issues.push(ValidationIssue::InvalidCombo {
                message: "resi needs node_patterns or node_fallback to build the dialer group"
                    .to_string(),
            });
        }
        if self.resi.dialer_group == self.resi.entry_group {
            issues.push(ValidationIssue::InvalidCombo {
                message: "resi.dialer_group and resi.entry_group must differ".to_string(),
            });
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }
}

/// Residential-chain settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResiConfig {
    /// Name of the engine-owned SOCKS5 node.
    pub proxy_name: String,
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Top-level client port the patched document must expose.
    pub listen_port: u16,
    /// Engine-owned url-test group the node dials through.
    pub dialer_group: String,
    /// Engine-owned select group exposed to the operator.
    pub entry_group: String,
    /// Operator selector group to surface the entry group in. When unset
    /// (or missing from the document) well-known names are tried instead.
    pub selector_group: Option<String>,
    /// Patterns selecting dialer candidates from the node snapshot.
    pub node_patterns: Vec<String>,
    /// Substituted verbatim when no pattern matches any node.
    pub node_fallback: Vec<String>,
    pub healthcheck: HealthCheck,
}

impl Default for ResiConfig {
    fn default() -> Self {
        Self {
            proxy_name: "Residential SOCKS5".to_string(),
            server: "resi.example.net".to_string(),
            port: 443,
            username: "username".to_string(),
            password: "password".to_string(),
            listen_port: 7891,
            dialer_group: "US Auto".to_string(),
            entry_group: "Residential Exit".to_string(),
            selector_group: None,
            node_patterns: vec![
                "US-*".to_string(),
                "US *".to_string(),
                "United States *".to_string(),
                "🇺🇸 *".to_string(),
            ],
            node_fallback: Vec::new(),
            healthcheck: HealthCheck::default(),
        }
    }
}

/// Health-check parameters for engine-created url-test groups.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthCheck {
    pub url: String,
    pub interval: u32,
    pub tolerance: u32,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            url: "http://www.gstatic.com/generate_204".to_string(),
            interval: 300,
            tolerance: 50,
        }
    }
}

/// Always-DIRECT bypass settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BypassConfig {
    /// CIDRs that must never enter the proxy chain.
    pub cidrs: Vec<String>,
    /// Domains kept DIRECT (also excluded from fake-ip).
    pub domains: Vec<String>,
    /// Resolvers for the bypass domains; empty disables nameserver-policy.
    pub internal_dns: Vec<String>,
}

impl Default for BypassConfig {
    fn default() -> Self {
        Self {
            cidrs: vec![
                "10.0.0.0/8".to_string(),
                "172.16.0.0/12".to_string(),
                "192.168.0.0/16".to_string(),
            ],
            domains: Vec::new(),
            internal_dns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone)]
pub enum ValidationIssue {
    MissingValue { field: &'static str },
    InvalidCombo { message: String },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::MissingValue { field } => {
                write!(f, "profile is missing a value for '{field}'")
            }
            ValidationIssue::InvalidCombo { message } => {
                write!(f, "invalid profile configuration: {message}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_is_valid() {
        assert!(Profile::default().validate().is_ok());
    }

    #[test]
    fn feature_csv_round_trips() {
        let set = FeatureSet::parse("bypass").unwrap();
        assert!(!set.resi);
        assert!(set.bypass);
        assert_eq!(set.names(), "bypass");
        assert_eq!(FeatureSet::parse("").unwrap(), FeatureSet::default());
    }

    #[test]
    fn feature_csv_rejects_unknown_names() {
        let err = FeatureSet::parse("resi,turbo").unwrap_err();
        assert!(matches!(err, PatchError::UnknownFeature { name } if name == "turbo"));
    }

    #[test]
    fn validation_catches_empty_candidate_sources() {
        let mut profile = Profile::default();
        profile.resi.node_patterns.clear();
        profile.resi.node_fallback.clear();
        let err = profile.validate().unwrap_err();
        assert_eq!(err.issues.len(), 1);
    }

    #[test]
    fn validation_catches_colliding_group_names() {
        let mut profile = Profile::default();
        profile.resi.entry_group = profile.resi.dialer_group.clone();
        assert!(profile.validate().is_err());
    }
}
