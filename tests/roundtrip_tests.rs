use kdb1::{path_lookup, Database, DatabaseKey, PathMatch};
use std::sync::atomic::{AtomicU32, Ordering};

fn temp_path(label: &str) -> std::path::PathBuf {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("kdb1-inttest-{label}-{}-{n}.kdb", std::process::id()))
}

#[test]
fn empty_database_round_trips() {
    let path = temp_path("empty");
    let mut db = Database::new();
    db.write(&path, &DatabaseKey::new("123")).unwrap();

    let reread = Database::read(&path, &DatabaseKey::new("123")).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(reread.groups().len(), 0);
    assert_eq!(reread.entries().len(), 0);
    assert_eq!(reread.header().ngroups, 0);
    assert_eq!(reread.header().nentries, 0);
}

#[test]
fn nested_entry_round_trips_and_resolves_by_path() {
    let path = temp_path("nested");
    let mut db = Database::new();
    db.add_entry(
        "Secrets/Terrible",
        "Gonk",
        "foo",
        "bar",
        "https://example.org/",
        "some notes",
        1,
    )
    .unwrap();

    db.write(&path, &DatabaseKey::new("123")).unwrap();
    let reread = Database::read(&path, &DatabaseKey::new("123")).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(reread.groups().len(), 2);
    assert_eq!(reread.entries().len(), 1);

    let tree = reread.hierarchy();
    assert_eq!(tree.level(), -1, "virtual root should be at level -1");

    match path_lookup(&tree, "Secrets/Terrible/Gonk") {
        Ok(PathMatch::Entry(e)) => {
            assert_eq!(e.title(), "Gonk");
            assert_eq!(e.username(), "foo");
            assert_eq!(e.password(), "bar");
            assert_eq!(e.url(), "https://example.org/");
        }
        _ => panic!("expected the nested entry to resolve by path"),
    }
}

#[test]
fn wrong_passphrase_is_rejected() {
    let path = temp_path("wrongpass");
    let mut db = Database::new();
    db.add_entry("Work", "vpn", "bob", "s3cr3t", "", "", 0).unwrap();
    db.write(&path, &DatabaseKey::new("correct horse")).unwrap();

    let result = Database::read(&path, &DatabaseKey::new("wrong"));
    std::fs::remove_file(&path).ok();
    assert!(result.is_err());
}

#[test]
fn truncated_file_is_rejected() {
    let path = temp_path("truncated");
    let mut db = Database::new();
    db.add_entry("Work", "vpn", "bob", "s3cr3t", "", "", 0).unwrap();
    db.write(&path, &DatabaseKey::new("123")).unwrap();

    let mut bytes = std::fs::read(&path).unwrap();
    bytes.truncate(bytes.len() / 2);
    let truncated_path = temp_path("truncated-copy");
    std::fs::write(&truncated_path, &bytes).unwrap();

    let result = Database::read(&truncated_path, &DatabaseKey::new("123"));
    std::fs::remove_file(&path).ok();
    std::fs::remove_file(&truncated_path).ok();
    assert!(result.is_err());
}

#[test]
fn removing_a_group_deletes_its_entries() {
    let mut db = Database::new();
    db.add_entry("Work/VPN", "vpn", "bob", "s3cr3t", "", "", 0).unwrap();
    db.add_entry("Work/Email", "mail", "bob", "hunter2", "", "", 0).unwrap();

    assert_eq!(db.entries().len(), 2);
    assert!(db.remove_group("Work/VPN", None));
    assert_eq!(db.entries().len(), 1);
    assert_eq!(db.entries()[0].username(), "bob");
    assert_eq!(db.entries()[0].password(), "hunter2");
}
