//! Persistent namespace tree over an ordered KV store
//!
//! All namespace state is a set of typed records in one KV index per
//! filesystem:
//! - `key`: the exhaustive key schema (2-byte metadata prefix + body)
//! - `node`: per-node basic attributes and sub-typed system attributes
//! - `tree`: parent->child dentry links, lookup and child iteration
//! - `ns`: the filesystem-name <-> fs-id <-> index-fid mapping and
//!   persisted endpoint records, kept in a dedicated meta index

pub mod key;
pub mod node;
pub mod ns;
pub mod tree;

pub use key::KeyType;
pub use node::KvNode;
pub use ns::{NsInfo, NsStore};
pub use tree::KvTree;
