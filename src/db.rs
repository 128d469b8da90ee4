//! The database facade binding the header, block, crypto and hierarchy modules into the
//! single stable API this crate exposes.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::warn;

use crate::block::{EntryInfo, GroupInfo};
use crate::crypt;
use crate::error::{OpenError, SaveError};
use crate::header::{CipherId, Header};
use crate::hierarchy::{self, Node};
use crate::key::DatabaseKey;

const MAX_GROUPID_ATTEMPTS: u32 = 10_000;

/// A decrypted `.kdb` database: the fixed header plus the flat group and entry lists the
/// payload carries.
///
/// The group/entry hierarchy is not stored directly; it is reconstructed on demand by
/// [`Database::hierarchy`] from the flat lists, and mutation helpers that need tree
/// structure (`add_entry`, `add_group`, `remove_group`) rebuild a tree, mutate it, and
/// flatten it back into these lists before returning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Database {
    header: Header,
    groups: Vec<GroupInfo>,
    entries: Vec<EntryInfo>,
}

impl Database {
    /// A new, empty database: fresh random seeds/IV, `Rijndael`+`SHA2` flags, 50000 KDF
    /// rounds, no groups or entries.
    pub fn new() -> Self {
        Database {
            header: Header::new(),
            groups: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// Reads and decrypts a database from `path` using `key`.
    pub fn read(path: impl AsRef<Path>, key: &DatabaseKey) -> Result<Self, OpenError> {
        let data = std::fs::read(path)?;
        Self::parse(&data, key)
    }

    /// Decrypts a database already loaded into memory.
    pub fn parse(data: &[u8], key: &DatabaseKey) -> Result<Self, OpenError> {
        if data.len() < crate::header::HEADER_SIZE {
            return Err(OpenError::BadSignature);
        }
        let header = Header::decode(&data[..crate::header::HEADER_SIZE])?;
        match header.encryption_type() {
            CipherId::Rijndael => {}
            other => return Err(OpenError::UnsupportedCipher(format!("{other:?}"))),
        }

        let ciphertext = &data[crate::header::HEADER_SIZE..];
        let final_key = crypt::derive_final_key(
            key.as_bytes(),
            &header.master_seed,
            &header.master_seed2,
            header.key_enc_rounds,
        );
        let payload =
            crypt::decrypt_payload(ciphertext, &final_key, &header.encryption_iv, Some(&header))?;

        let mut pos = 0usize;
        let mut groups = Vec::with_capacity(header.ngroups as usize);
        for _ in 0..header.ngroups {
            let (group, n) = GroupInfo::decode(&payload[pos..])?;
            pos += n;
            groups.push(group);
        }
        let mut entries = Vec::with_capacity(header.nentries as usize);
        for _ in 0..header.nentries {
            let (entry, n) = EntryInfo::decode(&payload[pos..])?;
            pos += n;
            entries.push(entry);
        }

        Ok(Database {
            header,
            groups,
            entries,
        })
    }

    /// Encrypts and writes the database to `path` using `key`.
    ///
    /// Group/entry counts and the content hash are recomputed from the current in-memory
    /// state; the header's random seeds and IV are regenerated so a saved file never
    /// reuses the ones it was opened with. The write goes to a temporary file in the same
    /// directory as `path`, which is then renamed into place, so a crash mid-write never
    /// corrupts an existing database file.
    pub fn write(&mut self, path: impl AsRef<Path>, key: &DatabaseKey) -> Result<(), SaveError> {
        let path = path.as_ref();

        self.header.ngroups = self.groups.len() as u32;
        self.header.nentries = self.entries.len() as u32;

        let mut payload = Vec::new();
        for group in &mut self.groups {
            payload.extend_from_slice(&group.encode());
        }
        for entry in &mut self.entries {
            payload.extend_from_slice(&entry.encode());
        }
        self.header.contents_hash = crypt::content_hash(&payload);
        self.header.reset_random_fields();

        let final_key = crypt::derive_final_key(
            key.as_bytes(),
            &self.header.master_seed,
            &self.header.master_seed2,
            self.header.key_enc_rounds,
        );
        let ciphertext = crypt::encrypt_payload(&payload, &final_key, &self.header.encryption_iv);

        let mut out = Vec::with_capacity(crate::header::HEADER_SIZE + ciphertext.len());
        out.extend_from_slice(&self.header.encode());
        out.extend_from_slice(&ciphertext);

        let tmp_path = sibling_tmp_path(path);
        {
            use std::io::Write as _;
            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(&out)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, path)?;

        Ok(())
    }

    /// All groups, in the flat pre-order form the file format stores them in.
    pub fn groups(&self) -> &[GroupInfo] {
        &self.groups
    }

    /// All entries, in file order.
    pub fn entries(&self) -> &[EntryInfo] {
        &self.entries
    }

    /// The database's 124-byte header, including cipher flags and KDF rounds.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Builds a fresh hierarchy view from the current flat group/entry lists. Does not
    /// mutate the database; the returned tree is a snapshot.
    pub fn hierarchy(&self) -> Node {
        hierarchy::build_tree(&self.groups, &self.entries)
    }

    /// Entries where case-folded `key` appears in title, URL, username, or group path, and
    /// also in the password when `include_passwords` is set.
    pub fn search(&self, key: &str, include_passwords: bool) -> Vec<&EntryInfo> {
        let needle = key.to_lowercase();
        let paths = self.groupid_paths();
        self.entries
            .iter()
            .filter(|entry| {
                let path = paths.get(&entry.groupid()).map(String::as_str).unwrap_or("");
                entry.title().to_lowercase().contains(&needle)
                    || entry.url().to_lowercase().contains(&needle)
                    || entry.username().to_lowercase().contains(&needle)
                    || path.to_lowercase().contains(&needle)
                    || (include_passwords && entry.password().to_lowercase().contains(&needle))
            })
            .collect()
    }

    fn groupid_paths(&self) -> std::collections::HashMap<u32, String> {
        let tree = hierarchy::build_tree(&self.groups, &[]);
        let mut map = std::collections::HashMap::new();
        fn walk(node: &Node, prefix: &str, map: &mut std::collections::HashMap<u32, String>) {
            for child in &node.children {
                if let Some(group) = &child.group {
                    let path = if prefix.is_empty() {
                        group.group_name().to_string()
                    } else {
                        format!("{prefix}/{}", group.group_name())
                    };
                    map.insert(group.groupid(), path.clone());
                    walk(child, &path, map);
                }
            }
        }
        walk(&tree, "", &mut map);
        map
    }

    /// Creates (or reuses) the group named by the slash-delimited `path`, then appends a
    /// new entry under it.
    #[allow(clippy::too_many_arguments)]
    pub fn add_entry(
        &mut self,
        path: &str,
        title: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        url: impl Into<String>,
        notes: impl Into<String>,
        image_id: u32,
    ) -> Result<(), SaveError> {
        let mut tree = self.hierarchy();
        let mut used: HashSet<u32> = self.groups.iter().map(GroupInfo::groupid).collect();
        let mut error = None;
        let leaf = hierarchy::mkdir(&mut tree, path, || match gen_groupid_once(&mut used) {
            Ok(id) => id,
            Err(e) => {
                error = Some(e);
                0
            }
        });

        let groupid = leaf.group.as_ref().map(GroupInfo::groupid).unwrap_or(0);
        let mut entry = EntryInfo::new(groupid);
        entry.set_title(title);
        entry.set_username(username);
        entry.set_password(password);
        entry.set_url(url);
        entry.set_notes(notes);
        entry.set_imageid(image_id);
        leaf.entries.push(entry);

        if let Some(e) = error {
            return Err(e);
        }

        let (groups, entries) = hierarchy::flatten(&tree);
        self.groups = groups;
        self.entries = entries;
        Ok(())
    }

    /// Updates the first entry matching every given (non-`None`) criterion. Matched fields
    /// left as `None` in `new_*` are left unchanged; `last_mod_time` is always bumped to
    /// now on a match. Returns whether an entry was updated.
    #[allow(clippy::too_many_arguments)]
    pub fn update_entry(
        &mut self,
        match_title: Option<&str>,
        match_username: Option<&str>,
        match_url: Option<&str>,
        new_title: Option<String>,
        new_username: Option<String>,
        new_password: Option<String>,
        new_url: Option<String>,
        new_notes: Option<String>,
    ) -> bool {
        let now = chrono::Local::now().naive_local();
        for entry in &mut self.entries {
            let matches = match_title.is_none_or(|t| entry.title() == t)
                && match_username.is_none_or(|u| entry.username() == u)
                && match_url.is_none_or(|u| entry.url() == u);
            if !matches {
                continue;
            }
            if let Some(title) = new_title {
                entry.set_title(title);
            }
            if let Some(username) = new_username {
                entry.set_username(username);
            }
            if let Some(password) = new_password {
                entry.set_password(password);
            }
            if let Some(url) = new_url {
                entry.set_url(url);
            }
            if let Some(notes) = new_notes {
                entry.set_notes(notes);
            }
            entry.set_last_mod_time(now);
            return true;
        }
        false
    }

    /// Updates the first group matching every given (non-`None`) criterion, bumping its
    /// `last_mod_time`. `new_name`/`new_groupid`/`new_level` left as `None` are left
    /// unchanged. Returns whether a group was updated.
    #[allow(clippy::too_many_arguments)]
    pub fn update_group(
        &mut self,
        match_name: &str,
        match_groupid: Option<u32>,
        match_level: Option<u16>,
        new_name: Option<String>,
        new_groupid: Option<u32>,
        new_level: Option<u16>,
    ) -> bool {
        let now = chrono::Local::now().naive_local();
        for group in &mut self.groups {
            let matches = group.group_name() == match_name
                && match_groupid.is_none_or(|id| group.groupid() == id)
                && match_level.is_none_or(|lv| group.level() == lv);
            if !matches {
                continue;
            }
            if let Some(name) = new_name {
                group.set_group_name(name);
            }
            if let Some(groupid) = new_groupid {
                group.set_groupid(groupid);
            }
            if let Some(level) = new_level {
                group.set_level(level);
            }
            group.set_last_mod_time(now);
            return true;
        }
        false
    }

    /// Removes every entry whose username and URL both match. Returns the number removed.
    pub fn remove_entry(&mut self, username: &str, url: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|entry| !(entry.username() == username && entry.url() == url));
        before - self.entries.len()
    }

    /// Creates the group named by the slash-delimited `path`, reusing any existing prefix.
    pub fn add_group(&mut self, path: &str) -> Result<(), SaveError> {
        let mut tree = self.hierarchy();
        let mut used: HashSet<u32> = self.groups.iter().map(GroupInfo::groupid).collect();
        let mut error = None;
        hierarchy::mkdir(&mut tree, path, || match gen_groupid_once(&mut used) {
            Ok(id) => id,
            Err(e) => {
                error = Some(e);
                0
            }
        });
        if let Some(e) = error {
            return Err(e);
        }

        let (groups, entries) = hierarchy::flatten(&tree);
        self.groups = groups;
        self.entries = entries;
        Ok(())
    }

    /// Removes the group named by the slash-delimited `path` (optionally only if its depth
    /// equals `level`), along with every descendant group and entry. Returns whether
    /// anything was removed.
    pub fn remove_group(&mut self, path: &str, level: Option<u16>) -> bool {
        let mut tree = self.hierarchy();
        let removed = remove_group_at_path(&mut tree, path, level);
        if removed {
            let (groups, entries) = hierarchy::flatten(&tree);
            self.groups = groups;
            self.entries = entries;
        }
        removed
    }

    /// A uniformly random group id in `[1, 0xFFFFFFFE]` not already used in this database.
    pub fn gen_groupid(&self) -> Result<u32, SaveError> {
        let mut used: HashSet<u32> = self.groups.iter().map(GroupInfo::groupid).collect();
        gen_groupid_once(&mut used)
    }
}

impl Default for Database {
    fn default() -> Self {
        Database::new()
    }
}

fn gen_groupid_once(used: &mut HashSet<u32>) -> Result<u32, SaveError> {
    for _ in 0..MAX_GROUPID_ATTEMPTS {
        let mut buf = [0u8; 4];
        #[allow(clippy::expect_used)]
        getrandom::fill(&mut buf).expect("system CSPRNG unavailable");
        let candidate = u32::from_le_bytes(buf);
        if candidate == 0 || candidate == 0xFFFF_FFFF || used.contains(&candidate) {
            continue;
        }
        used.insert(candidate);
        return Ok(candidate);
    }
    Err(SaveError::GroupIdSpaceExhausted)
}

fn remove_group_at_path(root: &mut Node, path: &str, level: Option<u16>) -> bool {
    let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
    remove_group_rec(root, &components, level)
}

fn remove_group_rec(node: &mut Node, path: &[&str], level: Option<u16>) -> bool {
    let Some((head, rest)) = path.split_first() else {
        return false;
    };
    if rest.is_empty() {
        let idx = node
            .children
            .iter()
            .position(|c| c.name() == Some(*head) && level.is_none_or(|lv| c.level() as u16 == lv));
        return match idx {
            Some(idx) => {
                node.children.remove(idx);
                true
            }
            None => {
                warn!("remove_group: no group named '{head}' under the resolved parent");
                false
            }
        };
    }
    match node.children.iter_mut().find(|c| c.name() == Some(*head)) {
        Some(child) => remove_group_rec(child, rest, level),
        None => {
            warn!("remove_group: path component '{head}' not found");
            false
        }
    }
}

fn sibling_tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(name),
        _ => PathBuf::from(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn key() -> DatabaseKey {
        DatabaseKey::new("hunter2")
    }

    fn temp_path(label: &str) -> PathBuf {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("kdb1-test-{label}-{}-{n}.kdb", std::process::id()))
    }

    #[test]
    fn new_database_is_empty() {
        let db = Database::new();
        assert_eq!(db.groups().len(), 0);
        assert_eq!(db.entries().len(), 0);
        assert_eq!(db.header().ngroups, 0);
    }

    #[test]
    fn write_then_read_round_trips() {
        let path = temp_path("roundtrip");
        let mut db = Database::new();
        db.add_entry(
            "Secrets/Terrible",
            "Gonk",
            "foo",
            "bar",
            "https://example.org/",
            "",
            1,
        )
        .unwrap();

        db.write(&path, &key()).unwrap();
        let reread = Database::read(&path, &key()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(reread.groups().len(), db.groups().len());
        assert_eq!(reread.entries().len(), 1);
        assert_eq!(reread.entries()[0].title(), "Gonk");
        assert_eq!(reread.entries()[0].username(), "foo");
        assert_eq!(reread.entries()[0].password(), "bar");
        assert_eq!(reread.entries()[0].url(), "https://example.org/");

        let tree = reread.hierarchy();
        match hierarchy::path_lookup(&tree, "Secrets/Terrible/Gonk") {
            Ok(hierarchy::PathMatch::Entry(e)) => assert_eq!(e.title(), "Gonk"),
            _ => panic!("expected to resolve the newly written entry by path"),
        }
    }

    #[test]
    fn wrong_passphrase_fails_to_decrypt() {
        let path = temp_path("wrongpass");
        let mut db = Database::new();
        db.add_entry("Work", "vpn", "bob", "s3cr3t", "", "", 0).unwrap();
        db.write(&path, &key()).unwrap();

        let result = Database::read(&path, &DatabaseKey::new("wrong"));
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(OpenError::Cryptography(_))));
    }

    #[test]
    fn search_is_case_insensitive() {
        let mut db = Database::new();
        db.add_entry("Internet", "Example Site", "alice", "pw", "https://example.org", "", 0)
            .unwrap();
        assert_eq!(db.search("example", false).len(), 1);
        assert_eq!(db.search("EXAMPLE", false).len(), 1);
        assert_eq!(db.search("Example", false).len(), 1);
    }

    #[test]
    fn remove_entry_matches_username_and_url() {
        let mut db = Database::new();
        db.add_entry("Work", "vpn", "bob", "s3cr3t", "https://vpn.example", "", 0)
            .unwrap();
        assert_eq!(db.remove_entry("bob", "https://vpn.example"), 1);
        assert_eq!(db.entries().len(), 0);
    }

    #[test]
    fn remove_group_cascades_to_entries() {
        let mut db = Database::new();
        db.add_entry("Work/VPN", "vpn", "bob", "s3cr3t", "", "", 0).unwrap();
        assert!(db.remove_group("Work/VPN", None));
        assert_eq!(db.entries().len(), 0);
        // "Work" itself remains; only the VPN subgroup was removed.
        assert_eq!(db.groups().len(), 1);
    }

    #[test]
    fn update_entry_bumps_last_mod_time() {
        let mut db = Database::new();
        db.add_entry("Work", "vpn", "bob", "old", "", "", 0).unwrap();
        let original_mod_time = db.entries()[0].last_mod_time();

        let updated = db.update_entry(
            Some("vpn"),
            None,
            None,
            None,
            None,
            Some("new".to_string()),
            None,
            None,
        );
        assert!(updated);
        assert_eq!(db.entries()[0].password(), "new");
        assert!(db.entries()[0].last_mod_time() >= original_mod_time);
    }

    #[test]
    fn gen_groupid_avoids_existing_ids() {
        let mut db = Database::new();
        db.add_group("Only").unwrap();
        let existing = db.groups()[0].groupid();
        for _ in 0..50 {
            let id = db.gen_groupid().unwrap();
            assert_ne!(id, existing);
            assert_ne!(id, 0);
            assert_ne!(id, 0xFFFF_FFFF);
        }
    }
}
