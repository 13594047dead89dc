//! The config file: node options plus key material.
//!
//! JSON at `~/.godless/config.json` by default. Because it holds private
//! keys, the file is written with mode 0400.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, Result};
use godless_crdt::{Identity, IdentityId};
use godless_store::KeyStore;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::node::Options;

pub const CONFIG_DIR: &str = ".godless";
pub const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Web service bind address; empty disables the web service.
    pub web_addr: String,
    /// Seconds between replication announcements.
    pub replicate_interval_secs: u64,
    /// Pub/sub topics shared with peers.
    pub topics: Vec<String>,
    /// Simultaneous query workers.
    pub api_query_limit: usize,
    /// Admission queue capacity.
    pub buffer_size: usize,
    /// Per-request deadline in seconds.
    pub request_timeout_secs: u64,
    /// Encoded chunk size threshold in bytes.
    pub chunk_size_limit: usize,
    /// Abort startup when the content store is unreachable.
    pub early: bool,
    /// Optional index hash to restore the head from.
    pub index_hash: Option<String>,
    /// Private identities, base32.
    pub private_keys: Vec<String>,
    /// Trusted public ids, base32.
    pub public_keys: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        let defaults = Options::default();
        Config {
            web_addr: "127.0.0.1:8085".to_string(),
            replicate_interval_secs: defaults.replicate_interval.as_secs(),
            topics: Vec::new(),
            api_query_limit: defaults.api_query_limit,
            buffer_size: defaults.buffer_size,
            request_timeout_secs: defaults.request_timeout.as_secs(),
            chunk_size_limit: defaults.chunk_size_limit,
            early: false,
            index_hash: None,
            private_keys: Vec::new(),
            public_keys: Vec::new(),
        }
    }
}

impl Config {
    /// The default config location under the user's home directory.
    pub fn default_path() -> Option<PathBuf> {
        Some(dirs::home_dir()?.join(CONFIG_DIR).join(CONFIG_FILE_NAME))
    }

    /// Read the config at `path`, or at the default location, falling back
    /// to defaults when no file exists.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => return Ok(Config::default()),
            },
        };
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Config::default());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config at {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("parsing config at {}", path.display()))
    }

    /// Write the config to `path`, read-only for the owner afterwards.
    pub fn store(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        // A previous init leaves the file read-only; relax that before
        // overwriting.
        #[cfg(unix)]
        if path.exists() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        let text = serde_json::to_string_pretty(self).context("encoding config")?;
        std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o400))?;
        }
        Ok(())
    }

    /// Build the key store from the configured keys.
    pub fn key_store(&self) -> Result<KeyStore> {
        let keys = KeyStore::new();
        for text in &self.private_keys {
            let identity: Identity = text.parse().context("parsing private key")?;
            keys.insert_identity(identity);
        }
        for text in &self.public_keys {
            let id: IdentityId = text.parse().context("parsing public key")?;
            keys.insert_public(id);
        }
        Ok(keys)
    }

    /// Record an identity in the config (private key and public id).
    pub fn add_identity(&mut self, identity: &Identity) {
        self.private_keys.push(identity.to_string());
        self.public_keys.push(identity.id().to_string());
    }

    /// Node options from this config.
    pub fn options(&self) -> Result<Options> {
        let web_addr = if self.web_addr.is_empty() {
            None
        } else {
            Some(
                self.web_addr
                    .parse::<SocketAddr>()
                    .with_context(|| format!("invalid web address {:?}", self.web_addr))?,
            )
        };
        Ok(Options {
            web_addr,
            index_hash: self.index_hash.clone(),
            fail_early: self.early,
            replicate_interval: Duration::from_secs(self.replicate_interval_secs.max(1)),
            topics: self.topics.clone(),
            api_query_limit: self.api_query_limit.max(1),
            buffer_size: self.buffer_size.max(1),
            request_timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
            chunk_size_limit: self.chunk_size_limit.max(1024),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        let mut config = Config::default();
        config.topics = vec!["godless".to_string()];
        config.add_identity(&Identity::generate(&mut OsRng));
        config.store(&path).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.key_store().unwrap().identities().len(), 1);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o400);
        }

        // Re-initialising over a read-only file works.
        config.add_identity(&Identity::generate(&mut OsRng));
        config.store(&path).unwrap();
        let reloaded = Config::load(Some(&path)).unwrap();
        assert_eq!(reloaded.private_keys.len(), 2);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Config::load(Some(&dir.path().join("nope.json"))).unwrap();
        assert_eq!(loaded, Config::default());
    }

    #[test]
    fn options_reject_a_bad_address() {
        let config = Config {
            web_addr: "not an address".to_string(),
            ..Default::default()
        };
        assert!(config.options().is_err());

        let disabled = Config {
            web_addr: String::new(),
            ..Default::default()
        };
        assert_eq!(disabled.options().unwrap().web_addr, None);
    }
}
