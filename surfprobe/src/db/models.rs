use diesel::prelude::*;

use super::schema::*;
use crate::adb::DevicePermission;
use crate::model::{filters_from_json, filters_to_json, ActivityRecord, IntentFilter};
use crate::{Exported, Verdict};

/// One row of `activity_info`
///
/// The first five columns keep the format older tools wrote: `exported` is the
/// raw attribute text and `intent_filters` is a JSON array, `NULL` when the
/// activity has no filters. The analysis columns are `NULL` until a verdict
/// has been recorded.
#[derive(Queryable, Insertable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = activity_info)]
pub struct ActivityInfo {
    pub package_name: String,
    pub activity_name: String,
    pub exported: Option<String>,
    pub permission: Option<String>,
    pub intent_filters: Option<String>,
    pub is_attack_surface: Option<bool>,
    pub protection_level: Option<String>,
    pub used_free_permission: Option<bool>,
}

impl ActivityInfo {
    pub fn new(package: &str, record: &ActivityRecord, verdict: Option<&Verdict>) -> Self {
        let intent_filters = if record.has_intent_filters() {
            Some(filters_to_json(&record.intent_filters))
        } else {
            None
        };

        Self {
            package_name: package.into(),
            activity_name: record.name.clone(),
            exported: record.exported.as_raw().map(String::from),
            permission: record.permission.clone(),
            intent_filters,
            is_attack_surface: verdict.map(|v| v.is_surface),
            protection_level: verdict.and_then(|v| v.protection_level.clone()),
            used_free_permission: verdict.map(|v| v.used_free_permission),
        }
    }

    pub fn exported(&self) -> Exported {
        Exported::parse(self.exported.as_deref())
    }

    pub fn get_intent_filters(&self) -> crate::Result<Vec<IntentFilter>> {
        match self.intent_filters.as_deref() {
            None | Some("") => Ok(Vec::new()),
            Some(raw) => filters_from_json(raw).map_err(|e| {
                crate::Error::Generic(format!(
                    "invalid intent_filters for {}: {}",
                    self.activity_name, e
                ))
            }),
        }
    }

    pub fn to_record(&self) -> crate::Result<ActivityRecord> {
        Ok(ActivityRecord {
            name: self.activity_name.clone(),
            exported: self.exported(),
            permission: self.permission.clone(),
            intent_filters: self.get_intent_filters()?,
        })
    }

    /// The stored verdict, if this row has been classified
    pub fn verdict(&self) -> Option<Verdict> {
        Some(Verdict {
            is_surface: self.is_attack_surface?,
            protection_level: self.protection_level.clone(),
            used_free_permission: self.used_free_permission.unwrap_or(false),
        })
    }
}

#[derive(Queryable, Insertable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = permissions)]
pub struct PermissionRow {
    pub name: String,
    pub protection_level: Option<String>,
}

impl PermissionRow {
    pub fn new(name: &str, protection_level: Option<&str>) -> Self {
        Self {
            name: name.into(),
            protection_level: protection_level.map(String::from),
        }
    }
}

impl From<DevicePermission> for PermissionRow {
    fn from(value: DevicePermission) -> Self {
        Self {
            name: value.name,
            protection_level: value.protection_level,
        }
    }
}
