//! Turns a parsed [Manifest] into [ActivityRecord]s

use std::borrow::Cow;

use crate::manifest::{self, ManifestResolver, NoopManifestResolver};
use crate::model::{ActivityRecord, DataSpec, IntentFilter};
use crate::{Exported, Manifest};

/// Qualify a possibly relative activity name against the package
///
/// - `.Foo` becomes `<package>.Foo`
/// - `Foo` (no dot at all) becomes `<package>.Foo`
/// - anything else is already fully qualified
pub fn normalize_activity_name(raw: &str, package: &str) -> String {
    if raw.starts_with('.') {
        format!("{}{}", package, raw)
    } else if !raw.contains('.') {
        format!("{}.{}", package, raw)
    } else {
        raw.to_string()
    }
}

/// Normalize all `<activity>` elements of the manifest, in declaration order
pub fn normalize(manifest: &Manifest, package: &str) -> Vec<ActivityRecord> {
    normalize_with_resolver(manifest, package, &NoopManifestResolver)
}

pub fn normalize_with_resolver(
    manifest: &Manifest,
    package: &str,
    resolver: &dyn ManifestResolver,
) -> Vec<ActivityRecord> {
    manifest
        .get_activities()
        .iter()
        .map(|act| normalize_activity(act, package, resolver))
        .collect()
}

fn non_empty(value: Option<Cow<'_, str>>) -> Option<String> {
    value.filter(|it| !it.is_empty()).map(Cow::into_owned)
}

fn normalize_activity(
    act: &manifest::Activity,
    package: &str,
    resolver: &dyn ManifestResolver,
) -> ActivityRecord {
    let raw_name = act.name(resolver);
    let name = normalize_activity_name(&raw_name, package);
    let exported = Exported::parse(act.raw_exported(resolver).as_deref());
    let permission = non_empty(act.permission(resolver));

    let intent_filters = act
        .get_intent_filters()
        .iter()
        .map(|f| normalize_filter(f, resolver))
        .collect::<Vec<IntentFilter>>();

    log::trace!(
        "activity {} exported={:?} filters={}",
        name,
        exported,
        intent_filters.len()
    );

    ActivityRecord {
        name,
        exported,
        permission,
        intent_filters,
    }
}

fn normalize_filter(filter: &manifest::IntentFilter, resolver: &dyn ManifestResolver) -> IntentFilter {
    let actions = filter
        .get_actions()
        .iter()
        .filter_map(|a| non_empty(a.name(resolver)))
        .collect();

    let categories = filter
        .get_categories()
        .iter()
        .filter_map(|c| non_empty(c.name(resolver)))
        .collect();

    let mut data = filter
        .get_data()
        .iter()
        .map(|d| DataSpec {
            scheme: non_empty(d.scheme(resolver)),
            host: non_empty(d.host(resolver)),
            port: non_empty(d.port(resolver)),
            path: non_empty(d.path(resolver)),
            path_prefix: non_empty(d.path_prefix(resolver)),
            path_pattern: non_empty(d.path_pattern(resolver)),
            mime_type: non_empty(d.mime_type(resolver)),
        })
        .collect::<Vec<DataSpec>>();

    if data.is_empty() {
        data.push(DataSpec::default());
    }

    IntentFilter {
        actions,
        categories,
        data,
    }
}
