//! Inode tree
//!
//! An arena of inodes keyed by id. Paths are resolved by walking the
//! children maps down from the root; the path of an inode is rebuilt by
//! following parent ids up.

use super::inode::Inode;
use std::collections::HashMap;
use tessera_common::{Error, FsPath, InodeId, Result};

/// Arena of inodes
#[derive(Debug)]
pub struct InodeTree {
    inodes: HashMap<InodeId, Inode>,
    root_id: InodeId,
    /// Next sequence of the directory id generator; 0 is the root
    next_directory_sequence: u64,
}

impl InodeTree {
    /// Tree holding only `root`
    pub fn new(root: Inode) -> Self {
        let root_id = root.id;
        let mut inodes = HashMap::new();
        inodes.insert(root_id, root);
        Self {
            inodes,
            root_id,
            next_directory_sequence: 1,
        }
    }

    pub const fn root_id(&self) -> InodeId {
        self.root_id
    }

    pub fn root(&self) -> &Inode {
        &self.inodes[&self.root_id]
    }

    pub fn len(&self) -> usize {
        self.inodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inodes.is_empty()
    }

    pub fn get(&self, id: InodeId) -> Option<&Inode> {
        self.inodes.get(&id)
    }

    pub fn get_mut(&mut self, id: InodeId) -> Option<&mut Inode> {
        self.inodes.get_mut(&id)
    }

    pub(crate) fn get_or_corrupt(&mut self, id: InodeId) -> Result<&mut Inode> {
        self.inodes
            .get_mut(&id)
            .ok_or_else(|| Error::internal(format!("inode {id} does not exist")))
    }

    /// Id of the inode at `path`
    pub fn resolve(&self, path: &FsPath) -> Option<InodeId> {
        let mut current = self.root_id;
        for component in path.components() {
            let dir = self.inodes.get(&current)?.as_directory()?;
            current = *dir.children.get(component)?;
        }
        Some(current)
    }

    /// Number of leading components of `path` that exist, the root not
    /// counted. Equals `path.depth()` when the whole path exists.
    pub fn existing_depth(&self, path: &FsPath) -> usize {
        let mut current = self.root_id;
        let mut depth = 0;
        for component in path.components() {
            let next = self
                .inodes
                .get(&current)
                .and_then(Inode::as_directory)
                .and_then(|dir| dir.children.get(component));
            match next {
                Some(id) => {
                    current = *id;
                    depth += 1;
                }
                None => break,
            }
        }
        depth
    }

    /// Path of an inode, rebuilt from parent links
    pub fn path_of(&self, id: InodeId) -> Option<FsPath> {
        let mut names = Vec::new();
        let mut current = self.inodes.get(&id)?;
        while let Some(parent_id) = current.parent_id {
            names.push(current.name.as_str());
            current = self.inodes.get(&parent_id)?;
        }

        let mut path = FsPath::root();
        for name in names.iter().rev() {
            path = path.join(name).ok()?;
        }
        Some(path)
    }

    /// `id` and every inode below it, parents before children
    pub fn descendants(&self, id: InodeId) -> Vec<InodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(inode) = self.inodes.get(&current) else {
                continue;
            };
            out.push(current);
            if let Some(dir) = inode.as_directory() {
                // Reverse so children come out in name order
                stack.extend(dir.children.values().rev());
            }
        }
        out
    }

    /// Children of a directory in name order
    pub fn children(&self, id: InodeId) -> Vec<&Inode> {
        self.inodes
            .get(&id)
            .and_then(Inode::as_directory)
            .map(|dir| {
                dir.children
                    .values()
                    .filter_map(|child| self.inodes.get(child))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub const fn next_directory_sequence(&self) -> u64 {
        self.next_directory_sequence
    }

    /// Reserve `count` directory ids, returning the first sequence. The
    /// generator only moves forward, so reserved ids are never reissued
    /// even when the operation that reserved them fails.
    pub fn reserve_directory_ids(&mut self, count: u64) -> u64 {
        let first = self.next_directory_sequence;
        self.next_directory_sequence += count;
        first
    }

    pub fn advance_directory_sequence(&mut self, next_sequence: u64) {
        self.next_directory_sequence = self.next_directory_sequence.max(next_sequence);
    }

    /// Link a new inode under its parent
    pub fn insert(&mut self, inode: Inode) -> Result<()> {
        let parent_id = inode
            .parent_id
            .ok_or_else(|| Error::internal(format!("inode {} has no parent", inode.id)))?;
        if self.inodes.contains_key(&inode.id) {
            return Err(Error::internal(format!("inode {} already exists", inode.id)));
        }

        let creation_time_ms = inode.creation_time_ms;
        let parent = self.get_or_corrupt(parent_id)?;
        parent.last_modification_time_ms = parent.last_modification_time_ms.max(creation_time_ms);
        let dir = parent
            .as_directory_mut()
            .ok_or_else(|| Error::internal(format!("parent {parent_id} is not a directory")))?;
        if dir.children.contains_key(&inode.name) {
            return Err(Error::internal(format!(
                "{} already exists under {parent_id}",
                inode.name
            )));
        }
        dir.children.insert(inode.name.clone(), inode.id);
        self.inodes.insert(inode.id, inode);
        Ok(())
    }

    /// Unlink `id` and drop it with all its descendants
    pub fn remove_subtree(&mut self, id: InodeId, op_time_ms: u64) -> Result<Vec<Inode>> {
        if id == self.root_id {
            return Err(Error::internal("the root cannot be removed"));
        }
        let inode = self
            .inodes
            .get(&id)
            .ok_or_else(|| Error::internal(format!("inode {id} does not exist")))?;
        let name = inode.name.clone();
        let parent_id = inode.parent_id;
        if let Some(parent_id) = parent_id {
            let parent = self.get_or_corrupt(parent_id)?;
            parent.last_modification_time_ms = parent.last_modification_time_ms.max(op_time_ms);
            if let Some(dir) = parent.as_directory_mut() {
                dir.children.remove(&name);
            }
        }

        Ok(self
            .descendants(id)
            .into_iter()
            .filter_map(|id| self.inodes.remove(&id))
            .collect())
    }

    /// Move `id` under `new_parent_id` as `new_name`
    pub fn relink(
        &mut self,
        id: InodeId,
        new_parent_id: InodeId,
        new_name: &str,
        op_time_ms: u64,
    ) -> Result<()> {
        let inode = self
            .inodes
            .get(&id)
            .ok_or_else(|| Error::internal(format!("inode {id} does not exist")))?;
        let old_parent_id = inode
            .parent_id
            .ok_or_else(|| Error::internal("the root cannot be moved"))?;
        let old_name = inode.name.clone();

        // Refuse to create a cycle
        let mut ancestor = Some(new_parent_id);
        while let Some(current) = ancestor {
            if current == id {
                return Err(Error::internal(format!("{id} would become its own ancestor")));
            }
            ancestor = self.inodes.get(&current).and_then(|i| i.parent_id);
        }

        let new_parent = self.get_or_corrupt(new_parent_id)?;
        let new_dir = new_parent
            .as_directory_mut()
            .ok_or_else(|| Error::internal(format!("{new_parent_id} is not a directory")))?;
        if new_dir.children.contains_key(new_name) {
            return Err(Error::internal(format!(
                "{new_name} already exists under {new_parent_id}"
            )));
        }
        new_dir.children.insert(new_name.to_string(), id);
        new_parent.last_modification_time_ms =
            new_parent.last_modification_time_ms.max(op_time_ms);

        let old_parent = self.get_or_corrupt(old_parent_id)?;
        if let Some(dir) = old_parent.as_directory_mut() {
            dir.children.remove(&old_name);
        }
        old_parent.last_modification_time_ms =
            old_parent.last_modification_time_ms.max(op_time_ms);

        let inode = self.get_or_corrupt(id)?;
        inode.parent_id = Some(new_parent_id);
        inode.name = new_name.to_string();
        Ok(())
    }

    /// Every inode, parents before children
    pub fn iter_preorder(&self) -> impl Iterator<Item = &Inode> {
        self.descendants(self.root_id)
            .into_iter()
            .filter_map(|id| self.inodes.get(&id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::inode::{DirState, FileState, InodeKind};

    fn directory(id: InodeId, parent: Option<InodeId>, name: &str) -> Inode {
        Inode {
            id,
            parent_id: parent,
            name: name.to_string(),
            creation_time_ms: 10,
            last_modification_time_ms: 10,
            owner: String::new(),
            group: String::new(),
            mode: 0o755,
            ttl: None,
            persisted: false,
            pinned: false,
            kind: InodeKind::Directory(DirState::default()),
        }
    }

    fn file(id: InodeId, parent: InodeId, name: &str) -> Inode {
        Inode {
            kind: InodeKind::File(FileState {
                block_size_bytes: 1024,
                length: 0,
                completed: false,
                cacheable: true,
                block_ids: Vec::new(),
            }),
            ..directory(id, Some(parent), name)
        }
    }

    fn path(p: &str) -> FsPath {
        FsPath::new(p).unwrap()
    }

    /// / -> a -> b -> f
    fn sample() -> (InodeTree, InodeId, InodeId, InodeId) {
        let root = InodeId::for_directory(0);
        let mut tree = InodeTree::new(directory(root, None, ""));
        let a = InodeId::for_directory(1);
        let b = InodeId::for_directory(2);
        let f = InodeId::for_container(0);
        tree.insert(directory(a, Some(root), "a")).unwrap();
        tree.insert(directory(b, Some(a), "b")).unwrap();
        tree.insert(file(f, b, "f")).unwrap();
        (tree, a, b, f)
    }

    #[test]
    fn test_resolve_and_path_of() {
        let (tree, a, _, f) = sample();
        assert_eq!(tree.resolve(&path("/a")), Some(a));
        assert_eq!(tree.resolve(&path("/a/b/f")), Some(f));
        assert_eq!(tree.resolve(&path("/a/b/f/x")), None);
        assert_eq!(tree.resolve(&FsPath::root()), Some(tree.root_id()));
        assert_eq!(tree.path_of(f), Some(path("/a/b/f")));
        assert_eq!(tree.path_of(tree.root_id()), Some(FsPath::root()));
    }

    #[test]
    fn test_existing_depth() {
        let (tree, ..) = sample();
        assert_eq!(tree.existing_depth(&path("/a/b/f")), 3);
        assert_eq!(tree.existing_depth(&path("/a/x/y")), 1);
        assert_eq!(tree.existing_depth(&path("/z")), 0);
    }

    #[test]
    fn test_sibling_names_are_unique() {
        let (mut tree, a, ..) = sample();
        let dup = directory(InodeId::for_directory(9), Some(a), "b");
        assert!(tree.insert(dup).is_err());
    }

    #[test]
    fn test_remove_subtree() {
        let (mut tree, a, b, f) = sample();
        let removed = tree.remove_subtree(a, 99).unwrap();
        let ids: Vec<InodeId> = removed.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![a, b, f]);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.root().last_modification_time_ms, 99);
        assert!(tree.remove_subtree(tree.root_id(), 100).is_err());
    }

    #[test]
    fn test_relink_rejects_cycles() {
        let (mut tree, a, b, f) = sample();
        assert!(tree.relink(a, b, "a", 20).is_err());

        tree.relink(f, tree.root_id(), "g", 20).unwrap();
        assert_eq!(tree.resolve(&path("/g")), Some(f));
        assert_eq!(tree.resolve(&path("/a/b/f")), None);
        assert_eq!(tree.get(b).unwrap().last_modification_time_ms, 20);
    }

    #[test]
    fn test_parent_mtime_never_goes_back() {
        let (mut tree, a, b, f) = sample();
        let g = InodeId::for_container(1);
        tree.insert(file(g, b, "g")).unwrap();

        // Applied out of timestamp order
        tree.remove_subtree(f, 50).unwrap();
        tree.remove_subtree(g, 40).unwrap();
        assert_eq!(tree.get(b).unwrap().last_modification_time_ms, 50);

        tree.relink(b, tree.root_id(), "b", 30).unwrap();
        assert_eq!(tree.get(a).unwrap().last_modification_time_ms, 30);
        tree.relink(b, a, "b", 20).unwrap();
        assert_eq!(tree.get(a).unwrap().last_modification_time_ms, 30);
        assert_eq!(tree.root().last_modification_time_ms, 30);
    }

    #[test]
    fn test_directory_ids_only_move_forward() {
        let (mut tree, ..) = sample();
        assert_eq!(tree.reserve_directory_ids(2), 1);
        assert_eq!(tree.next_directory_sequence(), 3);
        tree.advance_directory_sequence(2);
        assert_eq!(tree.next_directory_sequence(), 3);
        tree.advance_directory_sequence(7);
        assert_eq!(tree.reserve_directory_ids(1), 7);
    }

    #[test]
    fn test_preorder_lists_parents_first() {
        let (tree, a, b, f) = sample();
        let ids: Vec<InodeId> = tree.iter_preorder().map(|i| i.id).collect();
        assert_eq!(ids, vec![tree.root_id(), a, b, f]);
    }
}
