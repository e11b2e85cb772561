use serde::{Deserialize, Serialize};

use crate::Exported;

/// The `<data>` attributes of an intent filter
///
/// Every field is optional; a filter without any `<data>` element is
/// represented by a single [DataSpec::default] so downstream consumers always
/// have one entry to work with.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct DataSpec {
    pub scheme: Option<String>,
    pub host: Option<String>,
    pub port: Option<String>,
    pub path: Option<String>,
    pub path_prefix: Option<String>,
    pub path_pattern: Option<String>,
    pub mime_type: Option<String>,
}

impl DataSpec {
    /// True if no attribute is set
    pub fn is_placeholder(&self) -> bool {
        self == &Self::default()
    }

    pub fn to_json(&self) -> String {
        // A struct of strings can't fail to serialize
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IntentFilter {
    pub actions: Vec<String>,
    pub categories: Vec<String>,
    #[serde(rename = "datas")]
    pub data: Vec<DataSpec>,
}

impl IntentFilter {
    /// The action used when launching against this filter, if any
    pub fn first_action(&self) -> Option<&str> {
        self.actions.first().map(|it| it.as_str())
    }
}

/// A normalized `<activity>` from a manifest
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ActivityRecord {
    /// Fully qualified class name
    pub name: String,
    pub exported: Exported,
    pub permission: Option<String>,
    pub intent_filters: Vec<IntentFilter>,
}

impl ActivityRecord {
    pub fn has_intent_filters(&self) -> bool {
        !self.intent_filters.is_empty()
    }

    /// JSON array of this activity's intent filters in the stored column format
    pub fn filters_json(&self) -> String {
        filters_to_json(&self.intent_filters)
    }
}

pub fn filters_to_json(filters: &[IntentFilter]) -> String {
    serde_json::to_string(filters).unwrap_or_else(|_| String::from("[]"))
}

pub fn filters_from_json(raw: &str) -> serde_json::Result<Vec<IntentFilter>> {
    serde_json::from_str(raw)
}
