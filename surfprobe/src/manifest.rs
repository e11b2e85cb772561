use quick_xml::events::{BytesStart, Event};
use serde::Deserialize;
use std::{
    borrow::Cow,
    collections::{HashMap, HashSet},
    io::BufReader,
    path::Path,
};

use crate::utils::{open_file, path_str};

pub trait ManifestResolver {
    /// Convert a manifest value into a string, resolving all references
    ///
    /// If the given value is not a reference, returns the value itself
    fn resolve_string<'v>(&self, value: &'v str) -> Cow<'v, str>;
}

impl<T: ManifestResolver> ManifestResolver for Option<T> {
    fn resolve_string<'v>(&self, value: &'v str) -> Cow<'v, str> {
        match self {
            Some(v) => v.resolve_string(value),
            None => Cow::Borrowed(value),
        }
    }
}

/// Implementation of ManifestResolver that doesn't do anything
#[derive(Default)]
pub struct NoopManifestResolver;

impl ManifestResolver for NoopManifestResolver {
    fn resolve_string<'v>(&self, value: &'v str) -> Cow<'v, str> {
        Cow::Borrowed(value)
    }
}

/// Resource kinds that can show up in the attributes we care about
const RESOLVED_KINDS: &[&str] = &["string", "bool"];

/// Holds the kind and name of a reference
#[cfg_attr(test, derive(Debug, PartialEq))]
struct ValueReference<'a> {
    kind: &'a str,
    name: &'a str,
}

impl<'a> ValueReference<'a> {
    fn parse(from: &'a str) -> Option<Self> {
        let rest = from.strip_prefix('@')?;
        let (kind, name) = rest.split_once('/')?;
        // @android:string/foo references the framework, which we don't have
        if kind.contains(':') {
            return None;
        }
        Some(Self { kind, name })
    }
}

/// A ManifestResolver that uses the `res/values` directory of apktool output
///
/// The `strings.xml` and `bools.xml` files are read once up front; references
/// are then followed through the loaded values, including chains like
/// `@string/a -> @string/b -> value`.
pub struct ApktoolManifestResolver {
    values: HashMap<(String, String), String>,
}

impl ApktoolManifestResolver {
    /// Load the values from an apktool output directory
    ///
    /// Missing value files are not an error, the references they would hold
    /// just won't resolve.
    pub fn new(base_dir: &Path) -> Self {
        let mut values = HashMap::new();
        for kind in RESOLVED_KINDS {
            let path = base_dir.join(format!("res/values/{}s.xml", kind));
            if !path.exists() {
                continue;
            }
            if let Err(e) = load_values(&path, kind, &mut values) {
                log::warn!("failed to load values from {}: {}", path_str(&path), e);
            }
        }
        log::debug!(
            "loaded {} resource values from {}",
            values.len(),
            path_str(base_dir)
        );
        Self { values }
    }

    fn lookup(&self, reference: &ValueReference) -> Option<&str> {
        self.values
            .get(&(reference.kind.to_string(), reference.name.to_string()))
            .map(|it| it.as_str())
    }
}

impl ManifestResolver for ApktoolManifestResolver {
    fn resolve_string<'v>(&self, value: &'v str) -> Cow<'v, str> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut current: &str = value;

        loop {
            let reference = match ValueReference::parse(current) {
                Some(v) => v,
                None => break,
            };
            if !seen.insert(current) {
                log::warn!("circular resource reference starting at {}", value);
                break;
            }
            match self.lookup(&reference) {
                Some(v) => current = v,
                None => {
                    log::debug!("unresolved resource reference {}", current);
                    break;
                }
            }
        }

        if std::ptr::eq(current, value) {
            Cow::Borrowed(value)
        } else {
            Cow::Owned(current.to_string())
        }
    }
}

fn get_attribute_value(bs: &BytesStart, name: &str) -> Option<String> {
    bs.attributes()
        .filter_map(|it| it.ok())
        .find(|att| att.key.local_name().as_ref() == name.as_bytes())
        .map(|att| String::from_utf8_lossy(&att.value).into_owned())
}

/// Read every `<$kind name="...">value</$kind>` entry of a values file
fn load_values(
    path: &Path,
    kind: &str,
    into: &mut HashMap<(String, String), String>,
) -> crate::Result<()> {
    let file = open_file(path)?;
    let mut xml = quick_xml::Reader::from_reader(BufReader::new(file));
    let mut buf = Vec::new();
    let mut pending: Option<String> = None;

    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(Event::Start(bs)) if bs.local_name().as_ref() == kind.as_bytes() => {
                pending = get_attribute_value(&bs, "name");
            }
            Ok(Event::Text(bt)) => {
                if let Some(name) = pending.take() {
                    match bt.unescape() {
                        Ok(txt) => {
                            into.insert((kind.to_string(), name), txt.into_owned());
                        }
                        Err(e) => log::warn!("invalid escape for {}: {}", name, e),
                    }
                }
            }
            Ok(Event::End(_)) => pending = None,
            Err(e) => return Err(crate::Error::new_parse(&e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}

#[derive(Deserialize)]
pub struct Action {
    #[serde(rename = "@name")]
    name: Option<String>,
}

#[derive(Deserialize)]
pub struct Category {
    #[serde(rename = "@name")]
    name: Option<String>,
}

macro_rules! maybe_cow_getter {
    ($field:ident) => {
        pub fn $field<'s>(&'s self, resolver: &dyn ManifestResolver) -> Option<Cow<'s, str>> {
            self.$field.as_ref().map(|v| resolver.resolve_string(v))
        }
    };
}

impl Action {
    maybe_cow_getter!(name);
}

impl Category {
    maybe_cow_getter!(name);
}

#[derive(Deserialize)]
pub struct Data {
    #[serde(rename = "@scheme")]
    scheme: Option<String>,
    #[serde(rename = "@host")]
    host: Option<String>,
    #[serde(rename = "@port")]
    port: Option<String>,
    #[serde(rename = "@path")]
    path: Option<String>,
    #[serde(rename = "@pathPrefix")]
    path_prefix: Option<String>,
    #[serde(rename = "@pathPattern")]
    path_pattern: Option<String>,
    #[serde(rename = "@mimeType")]
    mime_type: Option<String>,
}

impl Data {
    maybe_cow_getter!(scheme);
    maybe_cow_getter!(host);
    maybe_cow_getter!(port);
    maybe_cow_getter!(path);
    maybe_cow_getter!(path_prefix);
    maybe_cow_getter!(path_pattern);
    maybe_cow_getter!(mime_type);
}

#[derive(Deserialize)]
pub struct IntentFilter {
    #[serde(rename = "action", default = "Vec::new")]
    actions: Vec<Action>,

    #[serde(rename = "category", default = "Vec::new")]
    categories: Vec<Category>,

    #[serde(default = "Vec::new")]
    data: Vec<Data>,
}

impl IntentFilter {
    pub fn get_actions(&self) -> &[Action] {
        self.actions.as_slice()
    }

    pub fn get_categories(&self) -> &[Category] {
        self.categories.as_slice()
    }

    pub fn get_data(&self) -> &[Data] {
        self.data.as_slice()
    }
}

#[derive(Deserialize)]
pub struct Activity {
    #[serde(rename = "@name")]
    name: String,

    #[serde(rename = "@exported")]
    exported: Option<String>,

    #[serde(rename = "@permission")]
    permission: Option<String>,

    #[serde(rename = "intent-filter", default = "Vec::new")]
    intent_filters: Vec<IntentFilter>,
}

impl Activity {
    /// The raw, possibly relative, class name of the activity
    pub fn name<'s>(&'s self, resolver: &dyn ManifestResolver) -> Cow<'s, str> {
        resolver.resolve_string(&self.name)
    }

    /// The `android:exported` attribute exactly as written (after reference
    /// resolution), `None` if it wasn't present
    pub fn raw_exported<'s>(&'s self, resolver: &dyn ManifestResolver) -> Option<Cow<'s, str>> {
        self.exported.as_ref().map(|v| resolver.resolve_string(v))
    }

    pub fn permission<'s>(&'s self, resolver: &dyn ManifestResolver) -> Option<Cow<'s, str>> {
        self.permission.as_ref().map(|v| resolver.resolve_string(v))
    }

    pub fn get_intent_filters(&self) -> &[IntentFilter] {
        self.intent_filters.as_slice()
    }
}

#[derive(Deserialize, Default)]
pub struct Application {
    #[serde(rename = "activity", default = "Vec::new")]
    pub activities: Vec<Activity>,
}

#[cfg_attr(test, derive(Debug, PartialEq))]
#[derive(Deserialize)]
pub struct Permission {
    #[serde(rename = "@name")]
    name: String,

    #[serde(rename = "@protectionLevel")]
    protection_level: Option<String>,
}

impl Permission {
    pub fn name<'s>(&'s self, resolver: &dyn ManifestResolver) -> Cow<'s, str> {
        resolver.resolve_string(&self.name)
    }

    /// The declared protection level, `normal` when unspecified as the
    /// platform does
    pub fn protection_level<'s>(&'s self, resolver: &dyn ManifestResolver) -> Cow<'s, str> {
        match &self.protection_level {
            Some(v) => resolver.resolve_string(v),
            None => Cow::Borrowed("normal"),
        }
    }
}

/// The parts of an `AndroidManifest.xml` that matter for activity surface
/// analysis
///
/// This stores the raw strings found in the manifest; fields that may hold
/// `@kind/name` references are read through methods taking a
/// [ManifestResolver].
#[derive(Deserialize)]
pub struct Manifest {
    #[serde(rename = "@package")]
    package: String,
    #[serde(rename = "permission", default = "Vec::new")]
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub application: Application,
}

impl Manifest {
    /// Parse an AndroidManifest.xml file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let file = open_file(path).map_err(|e| {
            log::error!("failed to open {}: {}", path_str(path), e);
            e
        })?;
        let mut br = BufReader::new(file);
        quick_xml::de::from_reader(&mut br).map_err(|e| {
            log::error!("failed to deserialize {}: {}", path_str(path), e);
            e.into()
        })
    }

    pub fn from_str(raw: &str) -> crate::Result<Self> {
        Ok(quick_xml::de::from_str(raw)?)
    }

    pub fn package<'s>(&'s self, resolver: &dyn ManifestResolver) -> Cow<'s, str> {
        resolver.resolve_string(&self.package)
    }

    pub fn get_activities(&self) -> &[Activity] {
        self.application.activities.as_slice()
    }

    pub fn get_permissions(&self) -> &[Permission] {
        self.permissions.as_slice()
    }
}

#[cfg(test)]
mod test {
    use crate::testing::{tmp_dir, TmpDir};
    use rstest::*;

    use super::*;

    fn parse(s: &str) -> Manifest {
        match Manifest::from_str(s) {
            Ok(v) => v,
            Err(e) => panic!("failed to parse raw manifest {}:\n{}", s, e),
        }
    }

    #[test]
    fn test_simple_manifest() {
        let as_str = r#"<?xml version="1.0" encoding="utf-8"?>
<manifest xmlns:android="http://schemas.android.com/apk/res/android"
    package="t.s.t">

    <uses-permission android:name="android.permission.INTERNET" />

    <permission android:name="t.s.t.PERMISSIONA" />
    <permission
        android:name="t.s.t.PERMISSIONB"
        android:protectionLevel="signature" />

    <application android:label="@string/app_name">
        <activity
            android:name="t.s.t.MainActivity"
            android:exported="false" />

        <service
            android:name="t.s.t.MyService"
            android:exported="true" />

        <activity
            android:name=".WebActivity"
            android:exported="true"
            android:permission="t.s.t.PERMISSIONA">
            <intent-filter>
                <action android:name="android.intent.action.VIEW" />
                <category android:name="android.intent.category.DEFAULT" />
                <category android:name="android.intent.category.BROWSABLE" />
                <data android:scheme="neato" android:host="t.s.t" />
                <data android:scheme="https" />
            </intent-filter>
            <intent-filter>
                <action />
            </intent-filter>
        </activity>

        <activity-alias
            android:name=".Alias"
            android:targetActivity=".WebActivity" />
    </application>

</manifest>
"#;

        let man = parse(as_str);
        let resolve = NoopManifestResolver::default();

        assert_eq!(man.package(&resolve), "t.s.t");
        assert_eq!(
            man.permissions,
            vec![
                Permission {
                    name: "t.s.t.PERMISSIONA".into(),
                    protection_level: None,
                },
                Permission {
                    name: "t.s.t.PERMISSIONB".into(),
                    protection_level: Some("signature".into()),
                },
            ]
        );
        assert_eq!(man.permissions[0].protection_level(&resolve), "normal");

        let activities = man.get_activities();
        assert_eq!(activities.len(), 2, "services and aliases aren't activities");
        assert_eq!(activities[0].name(&resolve), "t.s.t.MainActivity");
        assert_eq!(
            activities[0].raw_exported(&resolve).as_deref(),
            Some("false")
        );
        assert!(activities[0].get_intent_filters().is_empty());

        let web = &activities[1];
        assert_eq!(web.name(&resolve), ".WebActivity");
        assert_eq!(web.permission(&resolve).as_deref(), Some("t.s.t.PERMISSIONA"));
        let filters = web.get_intent_filters();
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].get_actions().len(), 1);
        assert_eq!(filters[0].get_categories().len(), 2);
        assert_eq!(filters[0].get_data().len(), 2);
        assert_eq!(
            filters[0].get_data()[0].host(&resolve).as_deref(),
            Some("t.s.t")
        );
        assert_eq!(filters[0].get_data()[1].host(&resolve), None);
        assert_eq!(filters[1].get_actions()[0].name(&resolve), None);
    }

    #[test]
    fn test_missing_activity_name_is_parse_error() {
        let raw = r#"<manifest package="a.b"><application><activity /></application></manifest>"#;
        assert!(matches!(
            Manifest::from_str(raw),
            Err(crate::Error::Parse(_))
        ));
    }

    #[test]
    fn test_no_application() {
        let man = parse(r#"<manifest package="a.b"></manifest>"#);
        assert!(man.get_activities().is_empty());
    }

    #[rstest]
    fn test_apktool_resolver(tmp_dir: TmpDir) {
        let base = tmp_dir.create_dir("decoded");
        base.create_file_name(
            "res/values/strings.xml",
            Some(
                r#"<?xml version="1.0" encoding="utf-8"?>
<resources>
    <string name="neverused">neverused</string>
    <string name="perm">com.example.permission.&lt;SPECIAL&gt;</string>
    <string name="ref1">@string/perm</string>
    <string name="ref2">@string/ref1</string>
    <string name="loop_a">@string/loop_b</string>
    <string name="loop_b">@string/loop_a</string>
</resources>
"#,
            ),
        );
        base.create_file_name(
            "res/values/bools.xml",
            Some(
                r#"<?xml version="1.0" encoding="utf-8"?>
<resources>
    <bool name="is_exported">true</bool>
</resources>
"#,
            ),
        );

        let res = ApktoolManifestResolver::new(base.get_path());

        assert_eq!(
            res.resolve_string("@string/perm"),
            "com.example.permission.<SPECIAL>"
        );
        assert_eq!(
            res.resolve_string("@string/ref2"),
            "com.example.permission.<SPECIAL>"
        );
        assert_eq!(res.resolve_string("@bool/is_exported"), "true");
        assert_eq!(res.resolve_string("not a reference"), "not a reference");
        assert_eq!(res.resolve_string("@string/missing"), "@string/missing");
        assert!(res.resolve_string("@string/loop_a").starts_with("@string/loop_"));
    }

    #[test]
    fn test_value_reference() {
        assert_eq!(
            ValueReference::parse("@string/name"),
            Some(ValueReference {
                kind: "string",
                name: "name"
            })
        );
        assert_eq!(ValueReference::parse("@android:string/ok"), None);
        assert_eq!(ValueReference::parse("plain"), None);
    }
}
