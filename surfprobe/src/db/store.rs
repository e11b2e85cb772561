use std::collections::HashMap;
use std::path::Path;

use diesel::prelude::*;
use diesel::replace_into;
use diesel_migrations::{embed_migrations, EmbeddedMigrations};

use super::common::*;
use super::models::*;
use super::schema::*;
use crate::classify::{ProtectionLookup, UNKNOWN_LEVEL};
use crate::model::ActivityRecord;
use crate::Verdict;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Everything the analysis keeps between runs
pub trait Database: Send + Sync {
    /// Insert or replace the row keyed by `(package, record.name)`
    fn upsert_activity(
        &self,
        package: &str,
        record: &ActivityRecord,
        verdict: Option<&Verdict>,
    ) -> Result<()>;
    fn get_activities_by_package(&self, package: &str) -> Result<Vec<ActivityInfo>>;

    fn upsert_permission(&self, name: &str, protection_level: Option<&str>) -> Result<()>;
    /// Upsert all permissions in a single transaction
    fn upsert_permissions(&self, perms: &[PermissionRow]) -> Result<()>;
    /// `Ok(None)` when the permission was never recorded, [UNKNOWN_LEVEL] when
    /// it was recorded without a level
    fn get_protection_level(&self, name: &str) -> Result<Option<String>>;
    fn get_permissions(&self) -> Result<Vec<PermissionRow>>;
}

/// The sqlite backed [Database]
pub struct ProbeStore {
    db_thread: DBThread,
}

impl ProbeStore {
    /// Open the database at `path`, creating it and bringing the schema up to
    /// date as needed
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            db_thread: DBThread::new_from_path(path, MIGRATIONS)?,
        })
    }

    #[inline]
    fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        T: Send,
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send,
    {
        self.db_thread.with_connection(f)
    }
}

impl Database for ProbeStore {
    fn upsert_activity(
        &self,
        package: &str,
        record: &ActivityRecord,
        verdict: Option<&Verdict>,
    ) -> Result<()> {
        let row = ActivityInfo::new(package, record, verdict);
        self.with_connection(|conn| {
            query!(replace_into(activity_info::table).values(&row)).execute(conn)?;
            Ok(())
        })
    }

    impl_get_multi_by!(
        get_activities_by_package,
        &str,
        ActivityInfo,
        activity_info,
        package_name.eq
    );

    fn upsert_permission(&self, name: &str, protection_level: Option<&str>) -> Result<()> {
        let row = PermissionRow::new(name, protection_level);
        self.with_connection(|conn| {
            query!(replace_into(permissions::table).values(&row)).execute(conn)?;
            Ok(())
        })
    }

    fn upsert_permissions(&self, perms: &[PermissionRow]) -> Result<()> {
        self.db_thread.transaction(|conn| {
            for row in perms {
                query!(replace_into(permissions::table).values(row)).execute(conn)?;
            }
            Ok(())
        })
    }

    fn get_protection_level(&self, name: &str) -> Result<Option<String>> {
        self.with_connection(|conn| {
            let level = query!(permissions::table
                .filter(permissions::name.eq(name))
                .select(permissions::protection_level))
            .first::<Option<String>>(conn)
            .optional()?;
            Ok(level.map(|it| it.unwrap_or_else(|| UNKNOWN_LEVEL.into())))
        })
    }

    impl_get_all!(get_permissions, PermissionRow, permissions, name);
}

/// Every level in the `permissions` table, read once so lookups can't fail
/// halfway through a classification
pub struct StoredLevels {
    levels: HashMap<String, String>,
}

impl StoredLevels {
    pub fn load(db: &dyn Database) -> Result<Self> {
        let levels: HashMap<String, String> = db
            .get_permissions()?
            .into_iter()
            .map(|row| {
                let level = row.protection_level.unwrap_or_else(|| UNKNOWN_LEVEL.into());
                (row.name, level)
            })
            .collect();
        log::debug!("loaded {} stored protection levels", levels.len());
        Ok(Self { levels })
    }
}

impl ProtectionLookup for StoredLevels {
    fn protection_level(&self, permission: &str) -> Option<String> {
        self.levels.get(permission).cloned()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{DataSpec, IntentFilter};
    use crate::testing::{tmp_dir, TmpDir};
    use crate::Exported;
    use diesel::connection::SimpleConnection;
    use rstest::*;

    const LEGACY_TABLE: &str = "CREATE TABLE activity_info (
        package_name TEXT NOT NULL,
        activity_name TEXT NOT NULL,
        exported TEXT,
        permission TEXT,
        intent_filters TEXT,
        PRIMARY KEY (package_name, activity_name)
    );";

    const LEGACY_TABLE_WITH_SURFACE: &str = "CREATE TABLE activity_info (
        package_name TEXT NOT NULL,
        activity_name TEXT NOT NULL,
        exported TEXT,
        permission TEXT,
        intent_filters TEXT,
        is_attack_surface TEXT,
        PRIMARY KEY (package_name, activity_name)
    );";

    /// Write a database the way the older tooling did, before any migration
    fn seed_database(path: &Path, create: &str) {
        let url = path.to_string_lossy();
        let mut conn = SqliteConnection::establish(&url).expect("failed to create legacy db");
        conn.batch_execute(create).expect("failed to create legacy table");
        conn.batch_execute(
            r#"INSERT INTO activity_info (package_name, activity_name, exported, permission, intent_filters)
            VALUES ('com.legacy', 'com.legacy.Deep', 'true', NULL,
            '[{"actions": ["android.intent.action.VIEW"], "categories": [], "datas": [{"scheme": "legacy", "host": null, "port": null, "path": null, "pathPrefix": null, "pathPattern": null, "mimeType": null}]}]');"#,
        )
        .expect("failed to seed legacy row");
    }

    fn record(name: &str, exported: Exported, filters: usize) -> ActivityRecord {
        ActivityRecord {
            name: name.into(),
            exported,
            permission: None,
            intent_filters: (0..filters)
                .map(|i| IntentFilter {
                    actions: vec![format!("com.example.ACTION_{}", i)],
                    categories: vec!["android.intent.category.DEFAULT".into()],
                    data: vec![DataSpec {
                        scheme: Some("https".into()),
                        ..Default::default()
                    }],
                })
                .collect(),
        }
    }

    #[rstest]
    fn test_upsert_activity_replaces(tmp_dir: TmpDir) {
        let store = ProbeStore::open(&tmp_dir.child_path("probe.db")).unwrap();
        let first = record("com.example.Main", Exported::Unset, 0);
        store.upsert_activity("com.example", &first, None).unwrap();

        let rows = store.get_activities_by_package("com.example").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].exported, None);
        assert_eq!(rows[0].intent_filters, None);
        assert_eq!(rows[0].verdict(), None);

        let second = record("com.example.Main", Exported::True, 2);
        let verdict = Verdict {
            is_surface: true,
            protection_level: None,
            used_free_permission: false,
        };
        store
            .upsert_activity("com.example", &second, Some(&verdict))
            .unwrap();
        // Same data again must not add a row
        store
            .upsert_activity("com.example", &second, Some(&verdict))
            .unwrap();

        let rows = store.get_activities_by_package("com.example").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].exported.as_deref(), Some("true"));
        assert_eq!(rows[0].to_record().unwrap(), second);
        assert_eq!(rows[0].verdict(), Some(verdict));

        assert!(store
            .get_activities_by_package("com.other")
            .unwrap()
            .is_empty());
    }

    #[rstest]
    fn test_same_activity_different_packages(tmp_dir: TmpDir) {
        let store = ProbeStore::open(&tmp_dir.child_path("probe.db")).unwrap();
        let rec = record("com.shared.Activity", Exported::False, 1);
        store.upsert_activity("com.one", &rec, None).unwrap();
        store.upsert_activity("com.two", &rec, None).unwrap();
        assert_eq!(store.get_activities_by_package("com.one").unwrap().len(), 1);
        assert_eq!(store.get_activities_by_package("com.two").unwrap().len(), 1);
    }

    #[rstest]
    #[case::original_columns(LEGACY_TABLE)]
    #[case::partial_analysis_columns(LEGACY_TABLE_WITH_SURFACE)]
    fn test_migrates_legacy_table(tmp_dir: TmpDir, #[case] create: &str) {
        let path = tmp_dir.child_path("apk_info.db");
        seed_database(&path, create);

        let store = ProbeStore::open(&path).unwrap();
        let rows = store.get_activities_by_package("com.legacy").unwrap();
        assert_eq!(rows.len(), 1);

        let row = &rows[0];
        assert_eq!(row.activity_name, "com.legacy.Deep");
        assert_eq!(row.exported(), Exported::True);
        assert_eq!(row.verdict(), None);

        let filters = row.get_intent_filters().unwrap();
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].first_action(), Some("android.intent.action.VIEW"));
        assert_eq!(filters[0].data[0].scheme.as_deref(), Some("legacy"));

        // Upserts keep working against the migrated table
        store
            .upsert_activity(
                "com.legacy",
                &record("com.legacy.Deep", Exported::False, 0),
                Some(&Verdict::default()),
            )
            .unwrap();
        let rows = store.get_activities_by_package("com.legacy").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].is_attack_surface, Some(false));
    }

    #[rstest]
    fn test_permissions(tmp_dir: TmpDir) {
        let store = ProbeStore::open(&tmp_dir.child_path("probe.db")).unwrap();
        assert_eq!(store.get_protection_level("com.example.P").unwrap(), None);

        store
            .upsert_permission("com.example.P", Some("signature"))
            .unwrap();
        store
            .upsert_permissions(&[
                PermissionRow::new("android.permission.INTERNET", Some("normal")),
                PermissionRow::new("com.example.P", Some("normal")),
                PermissionRow::new("com.vendor.UNKNOWN", None),
            ])
            .unwrap();

        assert_eq!(
            store.get_protection_level("com.example.P").unwrap(),
            Some("normal".into())
        );
        assert_eq!(
            store.get_protection_level("com.vendor.UNKNOWN").unwrap(),
            Some(UNKNOWN_LEVEL.into())
        );

        let names: Vec<String> = store
            .get_permissions()
            .unwrap()
            .into_iter()
            .map(|it| it.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "android.permission.INTERNET",
                "com.example.P",
                "com.vendor.UNKNOWN"
            ]
        );

        let lookup = StoredLevels::load(&store).unwrap();
        assert_eq!(
            lookup.protection_level("android.permission.INTERNET"),
            Some("normal".into())
        );
        assert_eq!(
            lookup.protection_level("com.vendor.UNKNOWN").as_deref(),
            Some(UNKNOWN_LEVEL)
        );
        assert_eq!(lookup.protection_level("missing"), None);
    }

    #[rstest]
    fn test_recorded_without_level_is_not_free(tmp_dir: TmpDir) {
        let store = ProbeStore::open(&tmp_dir.child_path("probe.db")).unwrap();
        store
            .upsert_permission("android.permission.KNOWN", None)
            .unwrap();
        let lookup = StoredLevels::load(&store).unwrap();

        let mut activity = record("com.x.Main", Exported::True, 1);
        activity.permission = Some("android.permission.KNOWN".into());
        let verdict = crate::classify::classify(&activity, &lookup);
        assert_eq!(
            verdict,
            Verdict {
                is_surface: false,
                protection_level: Some(UNKNOWN_LEVEL.into()),
                used_free_permission: false,
            }
        );
    }
}
