//! The keyring: local identity and per-circle sync bindings.
//!
//! The keyring is a UTF-8 JSON file holding the identity and a map of
//! circle bindings. Local-only is the safe default everywhere: an absent
//! binding or unknown circle never syncs. Encryption keys are stored as
//! opaque base64 — a human reading the file cannot lift raw key material
//! without a decode step.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ChoraError, Result};

/// Current keyring file format version.
pub const KEYRING_VERSION: u32 = 1;

/// Where an entity's changes may travel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPolicy {
    /// Never leaves this machine.
    #[default]
    #[serde(rename = "local-only")]
    LocalOnly,
    /// Eligible for cloud sync.
    #[serde(rename = "cloud")]
    Cloud,
}

/// The local identity block.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Identity {
    /// Opaque user id; authentication is the front end's business.
    pub user_id: String,
    /// Optional path to a signing key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_key_path: Option<PathBuf>,
}

/// One circle's binding.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CircleBinding {
    /// Sync policy for this circle.
    pub sync_policy: SyncPolicy,
    /// Circle encryption key, base64-encoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption_key_b64: Option<String>,
    /// Whether this is the default circle.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub default: bool,
}

/// The keyring document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Keyring {
    /// File format version.
    pub version: u32,
    /// The local identity.
    pub identity: Identity,
    /// Circle id -> binding.
    #[serde(default)]
    pub bindings: BTreeMap<String, CircleBinding>,
    /// The default circle id, when one is chosen.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_circle: Option<String>,
}

impl Keyring {
    /// Creates an empty keyring for a user.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            version: KEYRING_VERSION,
            identity: Identity {
                user_id: user_id.into(),
                signing_key_path: None,
            },
            bindings: BTreeMap::new(),
            default_circle: None,
        }
    }

    /// Loads a keyring from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        let keyring: Keyring = serde_json::from_slice(&bytes)?;
        if keyring.version != KEYRING_VERSION {
            return Err(ChoraError::crypto(format!(
                "unsupported keyring version {}",
                keyring.version
            )));
        }
        Ok(keyring)
    }

    /// Saves the keyring as pretty JSON, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        info!(path = %path.display(), "Keyring saved");
        Ok(())
    }

    /// The sync policy for a circle. Absent or unknown circles are
    /// local-only.
    pub fn policy_for(&self, circle_id: &str) -> SyncPolicy {
        self.bindings
            .get(circle_id)
            .map(|b| b.sync_policy)
            .unwrap_or_default()
    }

    /// All circle ids bound with the cloud policy, sorted.
    pub fn cloud_circles(&self) -> Vec<String> {
        self.bindings
            .iter()
            .filter(|(_, b)| b.sync_policy == SyncPolicy::Cloud)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Binds a circle with a policy and an optional raw encryption key
    /// (stored base64-encoded).
    pub fn bind(&mut self, circle_id: impl Into<String>, policy: SyncPolicy, key: Option<&[u8]>) {
        self.bindings.insert(
            circle_id.into(),
            CircleBinding {
                sync_policy: policy,
                encryption_key_b64: key.map(|k| BASE64.encode(k)),
                default: false,
            },
        );
    }

    /// Decodes the stored encryption key for a circle.
    pub fn circle_key(&self, circle_id: &str) -> Result<Option<Vec<u8>>> {
        match self
            .bindings
            .get(circle_id)
            .and_then(|b| b.encryption_key_b64.as_deref())
        {
            Some(encoded) => BASE64
                .decode(encoded)
                .map(Some)
                .map_err(|e| ChoraError::crypto(format!("bad key encoding: {}", e))),
            None => Ok(None),
        }
    }

    /// Marks a bound circle as the default.
    pub fn set_default_circle(&mut self, circle_id: &str) -> Result<()> {
        if !self.bindings.contains_key(circle_id) {
            return Err(ChoraError::crypto(format!(
                "cannot default to unbound circle '{}'",
                circle_id
            )));
        }
        for (id, binding) in &mut self.bindings {
            binding.default = id == circle_id;
        }
        self.default_circle = Some(circle_id.to_string());
        Ok(())
    }
}
