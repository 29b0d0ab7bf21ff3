//! KV key schema
//!
//! Every key starts with a 2-byte metadata prefix `(type, version)`.
//! The dentry key is variable-sized: its stored length is the fixed
//! prefix plus the dynamic form of the name (length byte, bytes, NUL),
//! so iteration scans by the fixed prefix only and no uninitialized
//! trailing bytes ever reach the store.

use static_assertions::const_assert_eq;

use kvfs_api::{FsError, FsId, NodeId, ObjId, Result, Str256};

/// Version byte carried by every key.
pub const VERSION_0: u8 = 0;

/// Recognized key families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyType {
    /// `(parent_id, name) -> child node id`
    Child = 1,
    /// `node_id -> basic attributes`
    BasicAttr = 2,
    /// `(node_id, sub type) -> system attribute`
    SysAttr = 3,
    /// `node_id -> object id`
    InodeOid = 4,
    /// namespace records in the meta index
    Ns = 5,
    /// `(obj_id, name) -> xattr value`
    Xattr = 6,
    /// `root node_id -> next inode number`
    InoGen = 7,
}

/// Size of the `(type, version)` metadata prefix.
pub const KEY_MD_SIZE: usize = 2;
/// Fixed part of a dentry key: metadata prefix + parent id.
pub const CHILD_KEY_PREFIX_SIZE: usize = KEY_MD_SIZE + NodeId::WIRE_SIZE;
const_assert_eq!(CHILD_KEY_PREFIX_SIZE, 18);

fn push_md(out: &mut Vec<u8>, ktype: KeyType) {
    out.push(ktype as u8);
    out.push(VERSION_0);
}

fn check_md(bytes: &[u8], ktype: KeyType) -> Result<()> {
    if bytes.len() < KEY_MD_SIZE || bytes[0] != ktype as u8 || bytes[1] != VERSION_0 {
        return Err(FsError::Invalid);
    }
    Ok(())
}

/// Dentry key for `(parent, name)`; dynamic length.
pub fn child_key(parent: &NodeId, name: &Str256) -> Vec<u8> {
    let mut out = Vec::with_capacity(CHILD_KEY_PREFIX_SIZE + name.wire_len());
    push_md(&mut out, KeyType::Child);
    out.extend_from_slice(&parent.to_bytes());
    name.encode(&mut out);
    out
}

/// Scan prefix covering every dentry of `parent`.
pub fn child_prefix(parent: &NodeId) -> Vec<u8> {
    let mut out = Vec::with_capacity(CHILD_KEY_PREFIX_SIZE);
    push_md(&mut out, KeyType::Child);
    out.extend_from_slice(&parent.to_bytes());
    out
}

/// Splits a dentry key back into parent id and name.
pub fn parse_child_key(bytes: &[u8]) -> Result<(NodeId, Str256)> {
    check_md(bytes, KeyType::Child)?;
    if bytes.len() <= CHILD_KEY_PREFIX_SIZE {
        return Err(FsError::Invalid);
    }
    let parent = NodeId::from_bytes(&bytes[KEY_MD_SIZE..CHILD_KEY_PREFIX_SIZE])?;
    let (name, used) = Str256::decode(&bytes[CHILD_KEY_PREFIX_SIZE..])?;
    if CHILD_KEY_PREFIX_SIZE + used != bytes.len() {
        return Err(FsError::Invalid);
    }
    Ok((parent, name))
}

/// Fixed-size key addressing a per-node record.
pub fn node_key(ktype: KeyType, node: &NodeId) -> Vec<u8> {
    let mut out = Vec::with_capacity(KEY_MD_SIZE + NodeId::WIRE_SIZE);
    push_md(&mut out, ktype);
    out.extend_from_slice(&node.to_bytes());
    out
}

/// Key of one sub-typed system attribute.
pub fn sys_attr_key(node: &NodeId, sub_type: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(KEY_MD_SIZE + NodeId::WIRE_SIZE + 1);
    push_md(&mut out, KeyType::SysAttr);
    out.extend_from_slice(&node.to_bytes());
    out.push(sub_type);
    out
}

/// Key of the per-filesystem inode counter, addressed by the root node.
pub fn ino_gen_key(root: &NodeId) -> Vec<u8> {
    node_key(KeyType::InoGen, root)
}

/// Xattr key `(obj_id, name)`.
pub fn xattr_key(oid: &ObjId, name: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(KEY_MD_SIZE + ObjId::WIRE_SIZE + name.len());
    push_md(&mut out, KeyType::Xattr);
    out.extend_from_slice(&oid.to_bytes());
    out.extend_from_slice(name);
    out
}

/// Scan prefix covering every xattr of one object.
pub fn xattr_prefix(oid: &ObjId) -> Vec<u8> {
    xattr_key(oid, &[])
}

/// Extracts the xattr name from a key produced by `xattr_key`.
pub fn parse_xattr_key(bytes: &[u8]) -> Result<(ObjId, Vec<u8>)> {
    check_md(bytes, KeyType::Xattr)?;
    let fixed = KEY_MD_SIZE + ObjId::WIRE_SIZE;
    if bytes.len() <= fixed {
        return Err(FsError::Invalid);
    }
    let oid = ObjId::from_bytes(&bytes[KEY_MD_SIZE..fixed])?;
    Ok((oid, bytes[fixed..].to_vec()))
}

// Namespace-record keys live in the meta index and carry a discriminator
// byte after the metadata prefix.
const NS_REC_COUNTER: u8 = 0;
const NS_REC_NAME: u8 = 1;
const NS_REC_ID: u8 = 2;
const NS_REC_ENDPOINT: u8 = 3;

fn ns_key(rec: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(KEY_MD_SIZE + 1 + body.len());
    push_md(&mut out, KeyType::Ns);
    out.push(rec);
    out.extend_from_slice(body);
    out
}

/// Key of the next-fs-id counter.
pub fn ns_counter_key() -> Vec<u8> {
    ns_key(NS_REC_COUNTER, &[])
}

/// Namespace record addressed by filesystem name.
pub fn ns_name_key(name: &Str256) -> Vec<u8> {
    let mut body = Vec::with_capacity(name.wire_len());
    name.encode(&mut body);
    ns_key(NS_REC_NAME, &body)
}

/// Scan prefix over all by-name namespace records.
pub fn ns_name_prefix() -> Vec<u8> {
    ns_key(NS_REC_NAME, &[])
}

/// Namespace record addressed by filesystem id.
pub fn ns_id_key(fs_id: FsId) -> Vec<u8> {
    ns_key(NS_REC_ID, &fs_id.to_le_bytes())
}

/// Endpoint record addressed by filesystem name.
pub fn endpoint_key(name: &Str256) -> Vec<u8> {
    let mut body = Vec::with_capacity(name.wire_len());
    name.encode(&mut body);
    ns_key(NS_REC_ENDPOINT, &body)
}

/// Scan prefix over all endpoint records.
pub fn endpoint_prefix() -> Vec<u8> {
    ns_key(NS_REC_ENDPOINT, &[])
}
