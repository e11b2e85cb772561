use crate::adb::Adb;
use crate::db::{Database, PermissionRow};

/// Load every permission the device knows into the store, returning how many
/// were imported
pub fn import_permissions(adb: &dyn Adb, db: &dyn Database) -> crate::Result<usize> {
    let perms: Vec<PermissionRow> = adb
        .list_permissions()?
        .into_iter()
        .map(PermissionRow::from)
        .collect();

    let missing = perms.iter().filter(|p| p.protection_level.is_none()).count();
    if missing > 0 {
        log::warn!("{} permissions reported without a protection level", missing);
    }

    db.upsert_permissions(&perms)?;
    log::info!("imported {} permissions", perms.len());
    Ok(perms.len())
}
