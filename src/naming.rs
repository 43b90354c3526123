// naming.rs
// Name validation and canonical dataset / mount / container paths

/// Root of everything this agent creates inside a pool
pub const STAGDB_ROOT: &str = "stagdb";

/// Host directory under which database datasets are mounted
pub const MOUNT_ROOT: &str = "/stagdb/data";

const CONTAINER_PREFIX: &str = "stagdb_db_";
const MAX_ZFS_NAME: usize = 255;

/// Validate a dataset name component (not a full path)
pub fn validate_dataset_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Dataset name cannot be empty".to_string());
    }
    if name.len() > MAX_ZFS_NAME {
        return Err(format!("Dataset name too long (max {} characters)", MAX_ZFS_NAME));
    }
    if name.starts_with('-') || name.starts_with('.') {
        return Err("Dataset name cannot start with '-' or '.'".to_string());
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-' || *c == '.'))
    {
        return Err(format!("Dataset name contains invalid character '{}'", bad));
    }
    Ok(())
}

/// Validate the part after `@` in a snapshot path. Anything else zfs
/// dislikes is reported by zfs itself.
pub fn validate_snapshot_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_ZFS_NAME && !name.contains(['@', '/'])
}

/// User-facing database name rules: 3-63 chars, ASCII alphanumeric or
/// underscore, no leading or trailing underscore. Uniqueness is checked
/// separately against the store.
pub fn validate_database_name_format(name: &str) -> Result<(), String> {
    if name.len() < 3 {
        return Err("Database name must be at least 3 characters".to_string());
    }
    if name.len() > 63 {
        return Err("Database name must be at most 63 characters".to_string());
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(
            "Database name can only contain letters, numbers, and underscores".to_string(),
        );
    }
    if name.starts_with('_') || name.ends_with('_') {
        return Err("Database name cannot start or end with an underscore".to_string());
    }
    Ok(())
}

/// `{pool}/stagdb`
pub fn stagdb_dataset(pool: &str) -> String {
    format!("{}/{}", pool, STAGDB_ROOT)
}

/// `{pool}/stagdb/databases`
pub fn databases_dataset(pool: &str) -> String {
    format!("{}/{}/databases", pool, STAGDB_ROOT)
}

/// `{pool}/stagdb/databases/{name}`
pub fn dataset_path(pool: &str, name: &str) -> String {
    format!("{}/{}", databases_dataset(pool), name)
}

/// `/stagdb/data/{name}`
pub fn mount_path(name: &str) -> String {
    format!("{}/{}", MOUNT_ROOT, name)
}

/// `{dataset}@{snapshot}`
pub fn snapshot_path(dataset: &str, snapshot: &str) -> String {
    format!("{}@{}", dataset, snapshot)
}

/// Split `dataset@snapshot`; None unless both halves are non-empty
pub fn split_snapshot_path(path: &str) -> Option<(&str, &str)> {
    match path.split_once('@') {
        Some((dataset, snap)) if !dataset.is_empty() && !snap.is_empty() => Some((dataset, snap)),
        _ => None,
    }
}

pub fn container_name(database_name: &str) -> String {
    format!("{}{}", CONTAINER_PREFIX, database_name.to_lowercase())
}

/// Name of the throwaway snapshot taken on the source of a clone
pub fn clone_snapshot_name(target_name: &str, unix_time: i64) -> String {
    format!("clone-{}-{}", target_name, unix_time)
}

/// Parent datasets of `path`, nearest first: `a/b/c` -> [`a/b`, `a`]
pub fn ancestors(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = path;
    while let Some(idx) = current.rfind('/') {
        current = &current[..idx];
        out.push(current.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_name_rules() {
        assert!(validate_dataset_name("orders_db").is_ok());
        assert!(validate_dataset_name("a.b-c_1").is_ok());
        assert!(validate_dataset_name("").is_err());
        assert!(validate_dataset_name("-lead").is_err());
        assert!(validate_dataset_name(".hidden").is_err());
        assert!(validate_dataset_name("has space").is_err());
        assert!(validate_dataset_name("slash/inside").is_err());
        assert!(validate_dataset_name(&"x".repeat(256)).is_err());
        assert!(validate_dataset_name(&"x".repeat(255)).is_ok());
    }

    #[test]
    fn test_snapshot_name_rules() {
        assert!(validate_snapshot_name("root"));
        assert!(validate_snapshot_name("clone-copy-1700000000"));
        assert!(!validate_snapshot_name(""));
        assert!(!validate_snapshot_name("a@b"));
        assert!(!validate_snapshot_name("a/b"));
        assert!(validate_snapshot_name("before upgrade"));
        assert!(validate_snapshot_name(&"s".repeat(255)));
        assert!(!validate_snapshot_name(&"s".repeat(256)));
    }

    #[test]
    fn test_database_name_rules() {
        for ok in ["abc", "orders_db", "Orders2024", "a_b", &"x".repeat(63)] {
            assert!(validate_database_name_format(ok).is_ok(), "{} should pass", ok);
        }
        for bad in ["ab", "_abc", "abc_", "has-dash", "has space", "émoji", &"x".repeat(64)] {
            assert!(validate_database_name_format(bad).is_err(), "{} should fail", bad);
        }
    }

    #[test]
    fn test_canonical_paths() {
        assert_eq!(dataset_path("tank", "orders_db"), "tank/stagdb/databases/orders_db");
        assert_eq!(mount_path("orders_db"), "/stagdb/data/orders_db");
        assert_eq!(
            snapshot_path("tank/stagdb/databases/orders_db", "root"),
            "tank/stagdb/databases/orders_db@root"
        );
        assert_eq!(container_name("Orders_DB"), "stagdb_db_orders_db");
        assert_eq!(clone_snapshot_name("copy", 1700000000), "clone-copy-1700000000");
    }

    #[test]
    fn test_split_snapshot_path() {
        assert_eq!(split_snapshot_path("tank/a@s"), Some(("tank/a", "s")));
        assert_eq!(split_snapshot_path("tank/a"), None);
        assert_eq!(split_snapshot_path("@s"), None);
        assert_eq!(split_snapshot_path("tank/a@"), None);
    }

    #[test]
    fn test_ancestors_nearest_first() {
        assert_eq!(
            ancestors("tank/stagdb/databases/x"),
            vec!["tank/stagdb/databases", "tank/stagdb", "tank"]
        );
        assert!(ancestors("tank").is_empty());
    }
}
