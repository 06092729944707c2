//! Compatibility-profile resolution.
//!
//! Some target cores (mihomo / Clash.Meta lineage) accept fields that older
//! cores reject outright, `dialer-proxy` and the `tun` section among them.
//! Writing those fields into a document consumed by an older core breaks
//! the whole config, so rules that emit them are gated on the resolved
//! profile.

use crate::doc::Document;
use serde::Deserialize;
use serde_yaml::Value;
use std::fmt;
use std::str::FromStr;

/// Operator-selected compatibility mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompatMode {
    /// Infer the profile from document content.
    #[default]
    Auto,
    Mihomo,
    Classic,
}

impl fmt::Display for CompatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompatMode::Auto => "auto",
            CompatMode::Mihomo => "mihomo",
            CompatMode::Classic => "classic",
        };
        write!(f, "{name}")
    }
}

impl FromStr for CompatMode {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(CompatMode::Auto),
            "mihomo" => Ok(CompatMode::Mihomo),
            "classic" => Ok(CompatMode::Classic),
            other => Err(format!(
                "invalid compat mode '{other}' (use: auto | mihomo | classic)"
            )),
        }
    }
}

/// The capability set of the core consuming the patched document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompatProfile {
    pub allow_mihomo_only_fields: bool,
}

impl CompatProfile {
    pub const MIHOMO: Self = Self {
        allow_mihomo_only_fields: true,
    };
    pub const CLASSIC: Self = Self {
        allow_mihomo_only_fields: false,
    };

    pub fn name(&self) -> &'static str {
        if self.allow_mihomo_only_fields {
            "mihomo"
        } else {
            "classic"
        }
    }
}

/// A resolved profile plus the warning (if any) the resolution produced.
#[derive(Debug, Clone)]
pub struct CompatResolution {
    pub profile: CompatProfile,
    pub warning: Option<String>,
}

/// Top-level keys whose presence marks a mihomo-class document.
const TOP_LEVEL_HINTS: [&str; 3] = ["sniffer", "geodata-mode", "external-controller"];

/// Resolve the compatibility profile for one run.
///
/// Explicit modes are returned verbatim. `auto` is a best-effort heuristic:
/// any mihomo signal classifies the document as mihomo; no signal at all
/// defaults to the conservative classic profile and surfaces a warning,
/// since the guess may under-patch a capable core.
pub fn resolve(mode: CompatMode, document: &Document) -> CompatResolution {
    match mode {
        CompatMode::Mihomo => CompatResolution {
            profile: CompatProfile::MIHOMO,
            warning: None,
        },
        CompatMode::Classic => CompatResolution {
            profile: CompatProfile::CLASSIC,
            warning: None,
        },
        CompatMode::Auto => {
            if has_mihomo_signal(document) {
                CompatResolution {
                    profile: CompatProfile::MIHOMO,
                    warning: None,
                }
            } else {
                CompatResolution {
                    profile: CompatProfile::CLASSIC,
                    warning: Some(
                        "compat: no mihomo signal found; assuming classic core \
                         (mihomo-only rules skipped, override with compat=mihomo)"
                            .to_string(),
                    ),
                }
            }
        }
    }
}

fn has_mihomo_signal(document: &Document) -> bool {
    let root = document.root();

    if root.contains_key(&Value::from("tun")) {
        return true;
    }
    if TOP_LEVEL_HINTS
        .iter()
        .any(|key| root.contains_key(&Value::from(*key)))
    {
        return true;
    }
    if let Some(dns) = root.get(&Value::from("dns")).and_then(Value::as_mapping) {
        if dns.contains_key(&Value::from("nameserver-policy")) {
            return true;
        }
    }
    root.get(&Value::from("proxies"))
        .and_then(Value::as_sequence)
        .is_some_and(|nodes| {
            nodes.iter().any(|node| {
                node.as_mapping()
                    .is_some_and(|map| map.contains_key(&Value::from("dialer-proxy")))
            })
        })
}
