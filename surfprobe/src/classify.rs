use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::manifest::ManifestResolver;
use crate::model::ActivityRecord;
use crate::{Exported, Manifest};

/// Level reported for a permission that is declared but whose level was never
/// learned; it isn't `normal`, so it doesn't make an activity reachable
pub const UNKNOWN_LEVEL: &str = "unknown";

/// Source of permission protection levels
///
/// `None` means the permission isn't declared anywhere the lookup knows
/// about, making it a free-floating permission. A declared permission with
/// no known level is [UNKNOWN_LEVEL], not `None`.
pub trait ProtectionLookup {
    fn protection_level(&self, permission: &str) -> Option<String>;
}

impl ProtectionLookup for HashMap<String, String> {
    fn protection_level(&self, permission: &str) -> Option<String> {
        self.get(permission).cloned()
    }
}

impl<T: ProtectionLookup + ?Sized> ProtectionLookup for &T {
    fn protection_level(&self, permission: &str) -> Option<String> {
        (**self).protection_level(permission)
    }
}

/// Tries each lookup in order and returns the first hit
pub struct ChainedLookup<'a> {
    lookups: Vec<&'a dyn ProtectionLookup>,
}

impl<'a> ChainedLookup<'a> {
    pub fn new(lookups: Vec<&'a dyn ProtectionLookup>) -> Self {
        Self { lookups }
    }
}

impl<'a> ProtectionLookup for ChainedLookup<'a> {
    fn protection_level(&self, permission: &str) -> Option<String> {
        self.lookups
            .iter()
            .find_map(|it| it.protection_level(permission))
    }
}

/// Collect the `<permission>` declarations of a manifest into a lookup
///
/// A package declaring the permission it protects its activities with is the
/// common case, and that permission is not free-floating even if the device
/// database has never seen it.
pub fn declared_permissions(
    manifest: &Manifest,
    resolver: &dyn ManifestResolver,
) -> HashMap<String, String> {
    manifest
        .get_permissions()
        .iter()
        .map(|p| {
            (
                p.name(resolver).into_owned(),
                p.protection_level(resolver).into_owned(),
            )
        })
        .collect()
}

/// Which rule decides whether an activity is reachable by other apps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportPolicy {
    /// Only `android:exported="true"` is reachable
    #[default]
    Explicit,
    /// An unset `android:exported` with at least one intent filter is also
    /// reachable, as on platforms before Android 12
    Legacy,
}

impl ExportPolicy {
    pub fn is_exported(&self, record: &ActivityRecord) -> bool {
        match record.exported {
            Exported::True => true,
            Exported::False => false,
            Exported::Unset => match self {
                Self::Explicit => false,
                Self::Legacy => record.has_intent_filters(),
            },
        }
    }
}

impl FromStr for ExportPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "explicit" => Ok(Self::Explicit),
            "legacy" => Ok(Self::Legacy),
            _ => Err(format!("invalid export policy `{}`", s)),
        }
    }
}

impl Display for ExportPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Explicit => "explicit",
            Self::Legacy => "legacy",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Verdict {
    pub is_surface: bool,
    pub protection_level: Option<String>,
    pub used_free_permission: bool,
}

fn is_normal_level(level: &str) -> bool {
    level.to_ascii_lowercase().contains("normal")
}

/// Classify an activity with [ExportPolicy::Explicit]
pub fn classify(record: &ActivityRecord, lookup: &dyn ProtectionLookup) -> Verdict {
    classify_with_policy(record, lookup, ExportPolicy::Explicit)
}

pub fn classify_with_policy(
    record: &ActivityRecord,
    lookup: &dyn ProtectionLookup,
    policy: ExportPolicy,
) -> Verdict {
    let permission = match &record.permission {
        None => {
            return Verdict {
                is_surface: policy.is_exported(record),
                ..Default::default()
            }
        }
        Some(v) => v,
    };

    let protection_level = lookup.protection_level(permission);

    if !policy.is_exported(record) {
        return Verdict {
            is_surface: false,
            protection_level,
            used_free_permission: false,
        };
    }

    match protection_level {
        None => {
            log::debug!(
                "{} is protected by undeclared permission {}",
                record.name,
                permission
            );
            Verdict {
                is_surface: true,
                protection_level: None,
                used_free_permission: true,
            }
        }
        Some(level) => Verdict {
            is_surface: is_normal_level(&level),
            protection_level: Some(level),
            used_free_permission: false,
        },
    }
}
