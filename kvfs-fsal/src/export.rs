//! Endpoint (export) configuration
//!
//! Each exported filesystem carries a JSON endpoint record with a fixed
//! set of recognized fields. The records are validated on entry, stored
//! as opaque blobs next to the namespace records, and rendered into the
//! host server's config file on every change. Rendering is staged: the
//! new text must re-validate before it replaces the previous file.

use std::fs;
use std::path::PathBuf;

use regex::Regex;
use serde::{Deserialize, Serialize};

use kvfs_api::{FsError, FsId, Result};
use kvfs_core::CfsRegistry;

const SQUASH_VALUES: &[&str] = &[
    "root",
    "root_squash",
    "rootsquash",
    "rootid",
    "root_id_squash",
    "rootidsquash",
    "all",
    "all_squash",
    "allsquash",
    "all_anonymous",
    "allanonymous",
    "no_root_squash",
    "none",
    "noidsquash",
];

const ACCESS_TYPE_VALUES: &[&str] = &["None", "RW", "RO", "MDONLY", "MDONLY_RO"];
const PROTOCOL_VALUES: &[&str] = &["4", "NFS4", "V4", "NFSv4"];
const SEC_TYPE_VALUES: &[&str] = &["none", "sys", "krb5", "krb5i", "krb5p"];

/// Recognized fields of one endpoint record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub clients: String,
    #[serde(rename = "Squash")]
    pub squash: String,
    pub access_type: String,
    pub protocols: String,
    #[serde(rename = "secType")]
    pub sec_type: String,
    #[serde(rename = "Filesystem_id")]
    pub filesystem_id: String,
}

impl EndpointConfig {
    /// Parses and validates a JSON endpoint blob.
    pub fn parse(blob: &[u8]) -> Result<Self> {
        let config: EndpointConfig = serde_json::from_slice(blob).map_err(|err| {
            log::error!("endpoint blob is not valid JSON: {}", err);
            FsError::Invalid
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.clients.is_empty() {
            log::error!("endpoint config: empty client list");
            return Err(FsError::Invalid);
        }
        if !SQUASH_VALUES.contains(&self.squash.as_str()) {
            log::error!("endpoint config: bad Squash '{}'", self.squash);
            return Err(FsError::Invalid);
        }
        if !ACCESS_TYPE_VALUES.contains(&self.access_type.as_str()) {
            log::error!("endpoint config: bad access_type '{}'", self.access_type);
            return Err(FsError::Invalid);
        }
        if !PROTOCOL_VALUES.contains(&self.protocols.as_str()) {
            log::error!("endpoint config: bad protocols '{}'", self.protocols);
            return Err(FsError::Invalid);
        }
        if !SEC_TYPE_VALUES.contains(&self.sec_type.as_str()) {
            log::error!("endpoint config: bad secType '{}'", self.sec_type);
            return Err(FsError::Invalid);
        }
        let fsid = Regex::new(r"^[0-9]+\.[0-9]+$").expect("fsid pattern");
        if !fsid.is_match(&self.filesystem_id) {
            log::error!("endpoint config: bad Filesystem_id '{}'", self.filesystem_id);
            return Err(FsError::Invalid);
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|_| FsError::Invalid)
    }
}

/// The host server config file, re-rendered on every endpoint change.
pub struct ExportConfigFile {
    path: PathBuf,
}

impl ExportConfigFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Renders one export block.
    fn render_block(out: &mut String, name: &str, fs_id: FsId, config: &EndpointConfig) {
        use std::fmt::Write;
        let _ = write!(
            out,
            "EXPORT {{\n\
             \tExport_Id = {fs_id};\n\
             \tPath = /{name};\n\
             \tPseudo = /{name};\n\
             \tFSAL {{\n\
             \t\tName = KVFS;\n\
             \t}}\n\
             \tSecType = {sec};\n\
             \tFilesystem_id = {fsid};\n\
             \tclient {{\n\
             \t\tclients = {clients};\n\
             \t\tSquash = {squash};\n\
             \t\taccess_type = {access};\n\
             \t\tprotocols = {protocols};\n\
             \t}}\n\
             }}\n\n",
            fs_id = fs_id,
            name = name,
            sec = config.sec_type,
            fsid = config.filesystem_id,
            clients = config.clients,
            squash = config.squash,
            access = config.access_type,
            protocols = config.protocols,
        );
    }

    /// Renders every exported filesystem of `registry` into one config
    /// text.
    pub fn render(registry: &CfsRegistry) -> Result<String> {
        let mut out = String::new();
        let mut bad = None;
        registry.endpoint_scan(|ns, blob| {
            match EndpointConfig::parse(blob) {
                Ok(config) => Self::render_block(&mut out, ns.name.as_str(), ns.id, &config),
                Err(err) => bad = Some(err),
            }
        });
        match bad {
            Some(err) => Err(err),
            None => Ok(out),
        }
    }

    /// Checks that a rendered text is structurally sound: balanced
    /// braces and the keys every block needs.
    fn validate_rendered(text: &str) -> Result<()> {
        let mut depth: i32 = 0;
        for ch in text.chars() {
            match ch {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(FsError::Invalid);
                    }
                }
                _ => {}
            }
        }
        if depth != 0 {
            return Err(FsError::Invalid);
        }
        let blocks = text.matches("EXPORT {").count();
        for keyword in ["Export_Id", "Path", "Pseudo", "Filesystem_id"] {
            if text.matches(keyword).count() < blocks {
                return Err(FsError::Invalid);
            }
        }
        Ok(())
    }

    /// Re-renders and swaps the config file in place. A rendering that
    /// fails validation leaves the previous file untouched.
    pub fn update(&self, registry: &CfsRegistry) -> Result<()> {
        let text = Self::render(registry)?;
        Self::validate_rendered(&text)?;

        let staged = self.path.with_extension("tmp");
        fs::write(&staged, &text)?;
        fs::rename(&staged, &self.path)?;
        log::info!("export config updated: {:?}", self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EndpointConfig {
        EndpointConfig {
            clients: "*".to_string(),
            squash: "root_squash".to_string(),
            access_type: "RW".to_string(),
            protocols: "4".to_string(),
            sec_type: "sys".to_string(),
            filesystem_id: "192.1".to_string(),
        }
    }

    #[test]
    fn test_json_round_trip() {
        let config = sample();
        let blob = config.to_json().unwrap();
        assert_eq!(EndpointConfig::parse(&blob).unwrap(), config);
    }

    #[test]
    fn test_field_sets_enforced() {
        let mut config = sample();
        config.squash = "sometimes".to_string();
        assert!(config.validate().is_err());

        let mut config = sample();
        config.protocols = "3".to_string();
        assert!(config.validate().is_err());

        let mut config = sample();
        config.sec_type = "krb6".to_string();
        assert!(config.validate().is_err());

        let mut config = sample();
        config.access_type = "rw".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_filesystem_id_pattern() {
        for bad in ["1", "a.1", "1.", ".1", "1.2.3", ""] {
            let mut config = sample();
            config.filesystem_id = bad.to_string();
            assert!(config.validate().is_err(), "accepted '{}'", bad);
        }
        let mut config = sample();
        config.filesystem_id = "42.0".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rendered_text_validates() {
        let mut out = String::new();
        ExportConfigFile::render_block(&mut out, "vol", 3, &sample());
        assert!(ExportConfigFile::validate_rendered(&out).is_ok());
        assert!(out.contains("Export_Id = 3;"));
        assert!(out.contains("Path = /vol;"));

        // A mangled render is refused.
        let broken = out.replace('}', "");
        assert!(ExportConfigFile::validate_rendered(&broken).is_err());
    }

    #[test]
    fn test_update_stages_then_swaps() {
        use kvfs_core::CfsRegistry;
        use kvfs_dstore::{Dstore, DstoreConfig};
        use kvfs_kvstore::MemKvsDriver;

        let reg = CfsRegistry::new(MemKvsDriver::new(), Dstore::init(DstoreConfig::mem()).unwrap())
            .unwrap();
        reg.fs_create("vol").unwrap();
        reg.endpoint_create("vol", &sample().to_json().unwrap()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exports.conf");
        let file = ExportConfigFile::new(path.clone());
        file.update(&reg).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("Pseudo = /vol;"));

        // A registry holding a bad blob leaves the file alone.
        reg.endpoint_delete("vol").unwrap();
        reg.endpoint_create("vol", b"{\"clients\":\"*\"}").unwrap();
        assert!(file.update(&reg).is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), text);
    }
}
