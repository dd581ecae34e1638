use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use signal_bus::PeerId;
use tracing::debug;
use uuid::Uuid;

const IDENTITY_FILE: &str = "peer-id";

/// Locally persisted participant identity.
///
/// Created once per device on first use and reused for every later call, so
/// signaling addresses and the initiator tie-break stay stable across
/// reconnects. Never rotated while the storage survives.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    pub peer_id: PeerId,
}

impl DeviceIdentity {
    pub fn new(peer_id: impl Into<PeerId>) -> Self {
        Self {
            peer_id: peer_id.into(),
        }
    }

    /// Read the identity from `path`, generating and persisting a fresh one
    /// if the file is missing or empty.
    pub fn load_or_create(path: &Path) -> io::Result<Self> {
        if let Ok(contents) = fs::read_to_string(path) {
            let trimmed = contents.trim();
            if !trimmed.is_empty() {
                return Ok(Self::new(trimmed));
            }
        }
        let peer_id = Uuid::new_v4().to_string();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, &peer_id)?;
        debug!(peer_id, path = %path.display(), "generated device identity");
        Ok(Self::new(peer_id))
    }

    /// `load_or_create` against the per-user data directory.
    pub fn load_or_create_default() -> io::Result<Self> {
        Self::load_or_create(&default_identity_path()?)
    }
}

fn default_identity_path() -> io::Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "conference-mesh")
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no home directory"))?;
    Ok(dirs.data_dir().join(IDENTITY_FILE))
}

/// Tie-break for who sends the offer in a peer pair: the side whose id
/// sorts lexicographically smaller initiates, so exactly one side calls.
pub fn should_initiate(self_id: &PeerId, other: &PeerId) -> bool {
    self_id < other
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smaller_id_initiates() {
        let alpha = PeerId::from("alpha");
        let beta = PeerId::from("beta");
        assert!(should_initiate(&alpha, &beta));
        assert!(!should_initiate(&beta, &alpha));
        assert!(!should_initiate(&alpha, &alpha));
    }

    #[test]
    fn identity_survives_reload() {
        let path = std::env::temp_dir()
            .join(format!("conference-mesh-test-{}", Uuid::new_v4()))
            .join(IDENTITY_FILE);

        let first = DeviceIdentity::load_or_create(&path).unwrap();
        let second = DeviceIdentity::load_or_create(&path).unwrap();
        assert_eq!(first.peer_id, second.peer_id);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
