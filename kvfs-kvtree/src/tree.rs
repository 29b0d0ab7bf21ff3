//! KV-Tree: dentry links between nodes
//!
//! A tree is one KV index plus a well-known root id. Dentries are single
//! KV records `(parent, name) -> child`; attach, detach, lookup and
//! iteration are each one KV operation and carry no cross-operation
//! invariants. Higher layers compose them inside transactions.

use std::sync::Arc;

use kvfs_api::{NodeId, Result, Str256};
use kvfs_kvstore::{KvsDriver, KvsIndex};

use crate::key;
use crate::node::KvNode;
use crate::ns::NsInfo;

/// A persistent tree of nodes in one KV index.
pub struct KvTree {
    index: Arc<dyn KvsIndex>,
    root_id: NodeId,
}

impl KvTree {
    /// Creates the tree on a fresh namespace: opens its index and writes
    /// the root node with the supplied attributes.
    pub fn create(driver: &dyn KvsDriver, ns: &NsInfo, root_attr: &[u8]) -> Result<Self> {
        let index = driver.index_open(&ns.fid)?;
        let tree = Self {
            index,
            root_id: NodeId::ROOT,
        };
        let root = KvNode::init(&tree, &NodeId::ROOT, root_attr)?;
        root.dump(&tree)?;
        log::debug!("kvtree created, root {}", tree.root_id);
        Ok(tree)
    }

    /// Deletes the root node record; run before the namespace index goes
    /// away.
    pub fn delete(self) -> Result<()> {
        let root = KvNode::load(&self, &self.root_id)?;
        root.delete(&self)
    }

    /// Reopens an already-created tree (process restart).
    pub fn init(driver: &dyn KvsDriver, ns: &NsInfo) -> Result<Self> {
        let index = driver.index_open(&ns.fid)?;
        Ok(Self {
            index,
            root_id: NodeId::ROOT,
        })
    }

    /// Drops the index handle.
    pub fn fini(self) {}

    pub fn root_id(&self) -> &NodeId {
        &self.root_id
    }

    /// The tree's KV index; per-node record families (oid map, xattrs,
    /// inode counter) share it.
    pub fn index(&self) -> &Arc<dyn KvsIndex> {
        &self.index
    }

    /// Links `child` under `parent` as `name`. Does not touch either
    /// node's basic attributes.
    pub fn attach(&self, parent: &NodeId, child: &NodeId, name: &Str256) -> Result<()> {
        self.index
            .set(&key::child_key(parent, name), &child.to_bytes())?;
        log::trace!("attach {} -> {} '{}'", parent, child, name);
        Ok(())
    }

    /// Removes the dentry `(parent, name)`. `NotFound` when absent.
    pub fn detach(&self, parent: &NodeId, name: &Str256) -> Result<()> {
        self.index.del(&key::child_key(parent, name))?;
        log::trace!("detach {} '{}'", parent, name);
        Ok(())
    }

    /// Resolves `(parent, name)` to the child id. `NotFound` when absent.
    pub fn lookup(&self, parent: &NodeId, name: &Str256) -> Result<NodeId> {
        let value = self.index.get(&key::child_key(parent, name))?;
        NodeId::from_bytes(&value)
    }

    /// Whether `parent` has at least one dentry.
    pub fn has_children(&self, parent: &NodeId) -> Result<bool> {
        let prefix = key::child_prefix(parent);
        let iter = self.index.iter(&prefix)?;
        Ok(match iter.get() {
            Some((k, _)) => k.starts_with(&prefix),
            None => false,
        })
    }

    /// Iterates the dentries of `parent` in byte-lexicographic order,
    /// invoking `cb(name, child)` per entry. The callback returns whether
    /// to continue; early stop is not an error.
    pub fn iter_children<F>(&self, parent: &NodeId, mut cb: F) -> Result<()>
    where
        F: FnMut(&str, &KvNode) -> bool,
    {
        let prefix = key::child_prefix(parent);
        let mut iter = self.index.iter(&prefix)?;
        loop {
            let (name, child) = match iter.get() {
                Some((k, v)) if k.starts_with(&prefix) => {
                    let (_, name) = key::parse_child_key(k)?;
                    let child = KvNode::unloaded(NodeId::from_bytes(v)?);
                    (name, child)
                }
                // Off the end of this parent's dentries.
                _ => break,
            };
            debug_assert!(!name.is_empty());
            log::trace!("iter child '{}' = {}", name, child.id());
            if !cb(name.as_str(), &child) {
                break;
            }
            iter.advance();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ns::NsStore;
    use kvfs_api::FsError;
    use kvfs_kvstore::MemKvsDriver;

    fn tree() -> KvTree {
        let driver = MemKvsDriver::new();
        let store = NsStore::open(driver.clone()).unwrap();
        let ns = store.ns_create(&Str256::new("t").unwrap()).unwrap();
        KvTree::create(driver.as_ref(), &ns, b"root").unwrap()
    }

    fn name(s: &str) -> Str256 {
        Str256::new(s).unwrap()
    }

    #[test]
    fn test_attach_lookup_detach() {
        let tree = tree();
        let child = NodeId::new(10, 0);
        tree.attach(&NodeId::ROOT, &child, &name("a")).unwrap();
        assert_eq!(tree.lookup(&NodeId::ROOT, &name("a")).unwrap(), child);
        tree.detach(&NodeId::ROOT, &name("a")).unwrap();
        assert!(matches!(
            tree.lookup(&NodeId::ROOT, &name("a")),
            Err(FsError::NotFound)
        ));
        assert!(matches!(
            tree.detach(&NodeId::ROOT, &name("a")),
            Err(FsError::NotFound)
        ));
    }

    #[test]
    fn test_has_children() {
        let tree = tree();
        assert!(!tree.has_children(&NodeId::ROOT).unwrap());
        tree.attach(&NodeId::ROOT, &NodeId::new(10, 0), &name("x"))
            .unwrap();
        assert!(tree.has_children(&NodeId::ROOT).unwrap());
        // A sibling parent with a higher id must not be mistaken for a child.
        assert!(!tree.has_children(&NodeId::new(10, 0)).unwrap());
    }

    #[test]
    fn test_iter_children_ordered_and_stoppable() {
        let tree = tree();
        for (i, n) in ["b", "a", "c"].iter().enumerate() {
            tree.attach(&NodeId::ROOT, &NodeId::new(10 + i as u64, 0), &name(n))
                .unwrap();
        }
        let mut seen = Vec::new();
        tree.iter_children(&NodeId::ROOT, |n, _| {
            seen.push(n.to_string());
            true
        })
        .unwrap();
        assert_eq!(seen, vec!["a", "b", "c"]);

        let mut first_only = Vec::new();
        tree.iter_children(&NodeId::ROOT, |n, _| {
            first_only.push(n.to_string());
            false
        })
        .unwrap();
        assert_eq!(first_only, vec!["a"]);
    }

    #[test]
    fn test_iter_children_yields_lookup_results() {
        let tree = tree();
        let child = NodeId::new(42, 0);
        tree.attach(&NodeId::ROOT, &child, &name("f")).unwrap();
        let mut found = None;
        tree.iter_children(&NodeId::ROOT, |n, node| {
            if n == "f" {
                found = Some(*node.id());
            }
            true
        })
        .unwrap();
        assert_eq!(found, Some(child));
        assert_eq!(tree.lookup(&NodeId::ROOT, &name("f")).unwrap(), child);
    }
}
