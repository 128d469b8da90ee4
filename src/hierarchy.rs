//! Reconstructing and walking the group/entry tree.
//!
//! The payload stores groups as a flat, pre-order list where each group only knows its
//! own depth (`level`); entries reference a `groupid` rather than sitting in the list
//! near their group. [`build_tree`] turns that flat representation into an owned tree;
//! [`flatten`] is its inverse.

use log::warn;

use crate::block::{EntryInfo, GroupInfo};

/// One node of the reconstructed hierarchy. The virtual root has no group of its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub group: Option<GroupInfo>,
    pub children: Vec<Node>,
    pub entries: Vec<EntryInfo>,
}

impl Node {
    fn root() -> Self {
        Node {
            group: None,
            children: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// This node's depth: -1 for the virtual root, otherwise the group's own `level`.
    pub fn level(&self) -> i32 {
        match &self.group {
            Some(g) => g.level() as i32,
            None => -1,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.group.as_ref().map(GroupInfo::group_name)
    }
}

/// Rebuilds the tree from the flat pre-order group list and the entry list.
///
/// Groups are attached by walking a stack of currently open ancestors: a group at depth
/// `level` closes (pops) every open ancestor at depth `>= level`, then becomes a child of
/// whatever remains open (or of the root, if nothing does). A group whose level skips more
/// than one step past the open stack has no valid parent in the file; rather than fail the
/// whole read, it is attached as a child of the current deepest open group with a warning,
/// since real-world files occasionally carry such off-by-one corruption harmlessly.
///
/// Entries are attached afterward by locating the tree node whose group id matches
/// `entry.groupid()`; an entry naming a group id that does not exist is dropped with a
/// warning rather than failing the read.
pub fn build_tree(groups: &[GroupInfo], entries: &[EntryInfo]) -> Node {
    let mut root = Node::root();
    let mut branch: Vec<Node> = Vec::new();

    for group in groups {
        let level = group.level() as usize;
        while level < branch.len() {
            #[allow(clippy::expect_used)]
            let leaf = branch.pop().expect("level < branch.len() implies branch is non-empty");
            attach(&mut branch, &mut root, leaf);
        }
        if level > branch.len() {
            warn!(
                "group '{}' (id {}) has level {} with no open ancestor at level {}; attaching at current depth",
                group.group_name(),
                group.groupid(),
                level,
                branch.len(),
            );
        }
        branch.push(Node {
            group: Some(group.clone()),
            children: Vec::new(),
            entries: Vec::new(),
        });
    }
    while let Some(leaf) = branch.pop() {
        attach(&mut branch, &mut root, leaf);
    }

    for entry in entries {
        match find_group_mut(&mut root, entry.groupid()) {
            Some(node) => node.entries.push(entry.clone()),
            None => warn!(
                "entry '{}' references missing group id {}; dropping",
                entry.title(),
                entry.groupid()
            ),
        }
    }

    root
}

fn attach(branch: &mut Vec<Node>, root: &mut Node, leaf: Node) {
    match branch.last_mut() {
        Some(parent) => parent.children.push(leaf),
        None => root.children.push(leaf),
    }
}

fn find_group_mut(node: &mut Node, groupid: u32) -> Option<&mut Node> {
    for child in &mut node.children {
        if child.group.as_ref().map(GroupInfo::groupid) == Some(groupid) {
            return Some(child);
        }
        if let Some(found) = find_group_mut(child, groupid) {
            return Some(found);
        }
    }
    None
}

/// Flattens the tree back into the pre-order group list and entry list the payload
/// format requires: a node's own group first, then its children (recursively), then its
/// own entries last.
pub fn flatten(root: &Node) -> (Vec<GroupInfo>, Vec<EntryInfo>) {
    let mut groups = Vec::new();
    let mut entries = Vec::new();
    flatten_into(root, &mut groups, &mut entries);
    (groups, entries)
}

fn flatten_into(node: &Node, groups: &mut Vec<GroupInfo>, entries: &mut Vec<EntryInfo>) {
    if let Some(g) = &node.group {
        groups.push(g.clone());
    }
    for child in &node.children {
        flatten_into(child, groups, entries);
    }
    entries.extend(node.entries.iter().cloned());
}

/// What a [`visit`] callback is given at each step.
pub enum Visited<'a> {
    Group(Option<&'a GroupInfo>),
    Entry(&'a EntryInfo),
}

/// Depth-first walk of the tree. `visitor` returns `(Some(value), _)` to stop the walk and
/// yield `value`, or `(None, true)` to skip this node's subtree/remaining entries without
/// stopping the overall walk, or `(None, false)` to continue normally.
pub fn visit<'a, T>(
    node: &'a Node,
    visitor: &mut impl FnMut(Visited<'a>) -> (Option<T>, bool),
) -> Option<T> {
    let (value, bail) = visitor(Visited::Group(node.group.as_ref()));
    if value.is_some() || bail {
        return value;
    }
    for child in &node.children {
        if let Some(value) = visit(child, visitor) {
            return Some(value);
        }
    }
    for entry in &node.entries {
        let (value, bail) = visitor(Visited::Entry(entry));
        if value.is_some() || bail {
            return value;
        }
    }
    None
}

/// Either half of a [`path_lookup`] result.
pub enum PathMatch<'a> {
    Group(&'a GroupInfo),
    Entry(&'a EntryInfo),
}

/// Resolves a `/`-delimited path by exact-name equality: interior components must match a
/// child group's name, the final component may match either a child group's name or a
/// child entry's title.
///
/// On success returns the matched group or entry. On failure returns the deepest group
/// successfully matched (`None` if not even the first component matched) along with the
/// remaining, unmatched path components.
pub fn path_lookup<'a>(
    root: &'a Node,
    path: &str,
) -> Result<PathMatch<'a>, (Option<&'a GroupInfo>, Vec<String>)> {
    let components: Vec<String> = path
        .split('/')
        .filter(|c| !c.is_empty())
        .map(String::from)
        .collect();
    lookup_rec(root, &components, None)
}

fn lookup_rec<'a>(
    node: &'a Node,
    path: &[String],
    best: Option<&'a GroupInfo>,
) -> Result<PathMatch<'a>, (Option<&'a GroupInfo>, Vec<String>)> {
    let best = node.group.as_ref().or(best);

    let (head, rest) = match path.split_first() {
        Some(parts) => parts,
        None => return Err((best, Vec::new())),
    };

    if rest.is_empty() {
        for child in &node.children {
            if let Some(g) = &child.group {
                if g.group_name() == head {
                    return Ok(PathMatch::Group(g));
                }
            }
        }
        for entry in &node.entries {
            if entry.title() == head {
                return Ok(PathMatch::Entry(entry));
            }
        }
        return Err((best, path.to_vec()));
    }

    for child in &node.children {
        if let Some(g) = &child.group {
            if g.group_name() == head {
                return lookup_rec(child, rest, best);
            }
        }
    }
    Err((best, path.to_vec()))
}

/// Resolves the longest existing prefix of `path`, then creates the remaining components
/// as new, empty groups (each one level deeper than its parent, with a fresh group id
/// minted by `gen_id`). Returns the leaf group's node.
///
/// Mutating the tree this way and then [`flatten`]ing it back is the only correct way to
/// insert a new group: appending a `GroupInfo` to the flat list directly would only be
/// positioned correctly by luck, since the flat format's parent/child relationship is
/// implied purely by pre-order position and `level`, not by any explicit pointer.
pub fn mkdir<'a>(
    root: &'a mut Node,
    path: &str,
    mut gen_id: impl FnMut() -> u32,
) -> &'a mut Node {
    let mut current = root;
    for component in path.split('/').filter(|c| !c.is_empty()) {
        let existing = current
            .children
            .iter()
            .position(|c| c.name() == Some(component));
        let idx = match existing {
            Some(i) => i,
            None => {
                let level = (current.level() + 1) as u16;
                let group = GroupInfo::new(component, gen_id(), level);
                current.children.push(Node {
                    group: Some(group),
                    children: Vec::new(),
                    entries: Vec::new(),
                });
                current.children.len() - 1
            }
        };
        current = &mut current.children[idx];
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_groups() -> Vec<GroupInfo> {
        vec![
            GroupInfo::new("Internet", 1, 0),
            GroupInfo::new("Email", 2, 1),
            GroupInfo::new("Work", 3, 0),
        ]
    }

    #[test]
    fn build_tree_respects_level_nesting() {
        let groups = sample_groups();
        let tree = build_tree(&groups, &[]);
        assert_eq!(tree.children.len(), 2);
        assert_eq!(tree.children[0].name(), Some("Internet"));
        assert_eq!(tree.children[0].children.len(), 1);
        assert_eq!(tree.children[0].children[0].name(), Some("Email"));
        assert_eq!(tree.children[1].name(), Some("Work"));
    }

    #[test]
    fn build_tree_drops_orphaned_entries() {
        let groups = sample_groups();
        let mut orphan = EntryInfo::new(999);
        orphan.set_title("orphan");
        let tree = build_tree(&groups, &[orphan]);
        assert_eq!(tree.children[0].entries.len(), 0);
        assert_eq!(tree.children[0].children[0].entries.len(), 0);
    }

    #[test]
    fn flatten_is_the_inverse_of_build_tree() {
        let groups = sample_groups();
        let mut entry = EntryInfo::new(2);
        entry.set_title("gmail");
        let entries = vec![entry];

        let tree = build_tree(&groups, &entries);
        let (flat_groups, flat_entries) = flatten(&tree);

        assert_eq!(flat_groups.len(), groups.len());
        for (a, b) in flat_groups.iter().zip(groups.iter()) {
            assert_eq!(a.groupid(), b.groupid());
            assert_eq!(a.level(), b.level());
        }
        assert_eq!(flat_entries.len(), 1);
        assert_eq!(flat_entries[0].title(), "gmail");
    }

    #[test]
    fn path_lookup_finds_nested_entry() {
        let groups = sample_groups();
        let mut entry = EntryInfo::new(2);
        entry.set_title("gmail");
        let tree = build_tree(&groups, &[entry]);

        match path_lookup(&tree, "Internet/Email/gmail") {
            Ok(PathMatch::Entry(e)) => assert_eq!(e.title(), "gmail"),
            _ => panic!("expected to find the gmail entry"),
        }
    }

    #[test]
    fn path_lookup_reports_best_match_and_suffix() {
        let groups = sample_groups();
        let tree = build_tree(&groups, &[]);

        match path_lookup(&tree, "Internet/Chat/bot") {
            Err((Some(best), suffix)) => {
                assert_eq!(best.group_name(), "Internet");
                assert_eq!(suffix, vec!["Chat".to_string(), "bot".to_string()]);
            }
            _ => panic!("expected a partial match under Internet"),
        }
    }

    #[test]
    fn mkdir_creates_missing_components_and_reuses_existing() {
        let mut root = Node::root();
        let mut next_id = 10u32;
        {
            let leaf = mkdir(&mut root, "Internet/Banking", || {
                next_id += 1;
                next_id
            });
            assert_eq!(leaf.name(), Some("Banking"));
            assert_eq!(leaf.level(), 1);
        }
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].children.len(), 1);

        // Looking up the same path again must not create a duplicate.
        mkdir(&mut root, "Internet/Banking", || {
            next_id += 1;
            next_id
        });
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].children.len(), 1);
    }
}
