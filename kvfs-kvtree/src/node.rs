//! KV-Node: per-node attributes
//!
//! A node is a 128-bit id plus one basic-attribute record and any number
//! of sub-typed system attributes (symlink target, for instance). The
//! in-memory object holds a copy of the basic attributes; the tree it
//! belongs to is passed explicitly into every persistent operation, so
//! nodes never point back at their tree.
//!
//! Constructors:
//! - `init` builds a node from caller data without touching the store
//! - `load` deserializes an existing node (`NotFound` when absent)
//!
//! `dump` writes the basic attributes back, `delete` removes them.

use kvfs_api::{FsError, NodeId, Result};

use crate::key::{self, KeyType};
use crate::tree::KvTree;

/// In-memory representation of one tree node.
#[derive(Debug, Clone)]
pub struct KvNode {
    id: NodeId,
    attr: Vec<u8>,
}

impl KvNode {
    /// Builds a node from an id and an attribute buffer; the buffer is
    /// copied. `Invalid` when the buffer is empty.
    pub fn init(_tree: &KvTree, id: &NodeId, attr: &[u8]) -> Result<Self> {
        if attr.is_empty() {
            return Err(FsError::Invalid);
        }
        Ok(Self {
            id: *id,
            attr: attr.to_vec(),
        })
    }

    /// A node produced by child iteration: the id is known, the basic
    /// attributes have not been read yet.
    pub(crate) fn unloaded(id: NodeId) -> Self {
        Self {
            id,
            attr: Vec::new(),
        }
    }

    /// Reads the basic attributes of `id` from the store.
    pub fn load(tree: &KvTree, id: &NodeId) -> Result<Self> {
        let attr = tree.index().get(&key::node_key(KeyType::BasicAttr, id))?;
        log::trace!("node load {}", id);
        Ok(Self { id: *id, attr })
    }

    /// Writes the basic attributes to the store.
    pub fn dump(&self, tree: &KvTree) -> Result<()> {
        debug_assert!(!self.attr.is_empty());
        tree.index()
            .set(&key::node_key(KeyType::BasicAttr, &self.id), &self.attr)?;
        log::trace!("node dump {}", self.id);
        Ok(())
    }

    /// Removes the basic-attribute record.
    pub fn delete(&self, tree: &KvTree) -> Result<()> {
        tree.index()
            .del(&key::node_key(KeyType::BasicAttr, &self.id))
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Basic-attribute bytes; empty for nodes produced by iteration.
    pub fn basic_attr(&self) -> &[u8] {
        &self.attr
    }

    /// Replaces the in-memory attribute buffer (persist with `dump`).
    pub fn set_basic_attr(&mut self, attr: Vec<u8>) {
        debug_assert!(!attr.is_empty());
        self.attr = attr;
    }

    /// Writes one system attribute of this node.
    pub fn set_sys_attr(&self, tree: &KvTree, sub_type: u8, value: &[u8]) -> Result<()> {
        if value.is_empty() {
            return Err(FsError::Invalid);
        }
        tree.index()
            .set(&key::sys_attr_key(&self.id, sub_type), value)
    }

    /// Reads one system attribute; `NotFound` when absent.
    pub fn get_sys_attr(&self, tree: &KvTree, sub_type: u8) -> Result<Vec<u8>> {
        tree.index().get(&key::sys_attr_key(&self.id, sub_type))
    }

    /// Deletes one system attribute; `NotFound` when absent.
    pub fn del_sys_attr(&self, tree: &KvTree, sub_type: u8) -> Result<()> {
        tree.index().del(&key::sys_attr_key(&self.id, sub_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ns::NsStore;
    use kvfs_api::Str256;
    use kvfs_kvstore::MemKvsDriver;

    fn tree() -> KvTree {
        let driver = MemKvsDriver::new();
        let store = NsStore::open(driver.clone()).unwrap();
        let ns = store.ns_create(&Str256::new("t").unwrap()).unwrap();
        KvTree::create(driver.as_ref(), &ns, b"root-attr").unwrap()
    }

    #[test]
    fn test_init_rejects_empty_attr() {
        let tree = tree();
        assert!(KvNode::init(&tree, &NodeId::new(5, 0), b"").is_err());
    }

    #[test]
    fn test_dump_then_load() {
        let tree = tree();
        let id = NodeId::new(5, 0);
        let node = KvNode::init(&tree, &id, b"stat-bytes").unwrap();
        node.dump(&tree).unwrap();
        let got = KvNode::load(&tree, &id).unwrap();
        assert_eq!(got.basic_attr(), b"stat-bytes");
    }

    #[test]
    fn test_load_absent_is_not_found() {
        let tree = tree();
        assert!(matches!(
            KvNode::load(&tree, &NodeId::new(99, 0)),
            Err(FsError::NotFound)
        ));
    }

    #[test]
    fn test_delete_removes_record() {
        let tree = tree();
        let id = NodeId::new(6, 0);
        let node = KvNode::init(&tree, &id, b"x").unwrap();
        node.dump(&tree).unwrap();
        node.delete(&tree).unwrap();
        assert!(KvNode::load(&tree, &id).is_err());
    }

    #[test]
    fn test_sys_attrs_are_independent() {
        let tree = tree();
        let id = NodeId::new(7, 0);
        let node = KvNode::init(&tree, &id, b"x").unwrap();
        node.set_sys_attr(&tree, 1, b"target").unwrap();
        node.set_sys_attr(&tree, 2, b"other").unwrap();
        assert_eq!(node.get_sys_attr(&tree, 1).unwrap(), b"target");
        node.del_sys_attr(&tree, 1).unwrap();
        assert!(node.get_sys_attr(&tree, 1).is_err());
        assert_eq!(node.get_sys_attr(&tree, 2).unwrap(), b"other");
    }
}
