//! Trust-on-first-use host key store
//!
//! Short-lived hosts have no pre-distributed keys, so a strict known-hosts
//! check would reject every first connection. Instead the key presented on
//! the first successful handshake is pinned into a per-user cache file; any
//! later change is treated as a potential man-in-the-middle and rejected.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::errors::{HolodeckError, Result};

/// Pin store backed by `<cache-root>/holodeck/known_hosts`.
///
/// Line format: `<host> <key-type> <base64-key>`. The read-modify-write is
/// serialised by a process-wide mutex; concurrent node provisioning shares
/// one store instance.
#[derive(Debug)]
pub struct KnownHostsStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl KnownHostsStore {
    /// Open the store under the user cache directory (or an explicit root).
    pub fn open(cache_root: Option<&Path>) -> Result<Self> {
        let root = match cache_root {
            Some(root) => root.to_path_buf(),
            None => dirs::cache_dir().ok_or_else(|| {
                HolodeckError::ConfigInvalid("cannot determine user cache directory".to_string())
            })?,
        };
        Ok(Self {
            path: root.join("holodeck").join("known_hosts"),
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// TOFU check: pin `key_line` for `host` on first sight; afterwards the
    /// pinned line must match byte-for-byte after whitespace trimming.
    pub fn verify_or_pin(&self, host: &str, key_line: &str) -> Result<()> {
        let _guard = self.lock.lock().expect("known-hosts mutex poisoned");
        let key_line = key_line.trim();

        if let Some(pinned) = self.lookup(host)? {
            if pinned == key_line {
                tracing::debug!(host = %host, "host key matches pinned key");
                return Ok(());
            }
            tracing::error!(host = %host, "host key changed since first connection");
            return Err(HolodeckError::HostKeyMismatch {
                host: host.to_string(),
            });
        }

        self.append(host, key_line)?;
        tracing::info!(host = %host, "pinned host key on first use");
        Ok(())
    }

    fn lookup(&self, host: &str) -> Result<Option<String>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(HolodeckError::io(self.path.clone(), e)),
        };
        for line in content.lines() {
            if let Some(rest) = line.strip_prefix(host) {
                if let Some(key) = rest.strip_prefix(' ') {
                    return Ok(Some(key.trim().to_string()));
                }
            }
        }
        Ok(None)
    }

    fn append(&self, host: &str, key_line: &str) -> Result<()> {
        let parent = self
            .path
            .parent()
            .expect("known-hosts path always has a parent directory");
        fs::create_dir_all(parent).map_err(|e| HolodeckError::io(parent.to_path_buf(), e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o700);
            fs::set_permissions(parent, perms)
                .map_err(|e| HolodeckError::io(parent.to_path_buf(), e))?;
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| HolodeckError::io(self.path.clone(), e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            file.set_permissions(perms)
                .map_err(|e| HolodeckError::io(self.path.clone(), e))?;
        }

        writeln!(file, "{host} {key_line}").map_err(|e| HolodeckError::io(self.path.clone(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, KnownHostsStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = KnownHostsStore::open(Some(dir.path())).unwrap();
        (dir, store)
    }

    #[test]
    fn test_first_use_pins_then_matches() {
        let (_dir, store) = store();
        store
            .verify_or_pin("10.0.0.1", "ssh-ed25519 AAAAC3Nza")
            .unwrap();
        store
            .verify_or_pin("10.0.0.1", "ssh-ed25519 AAAAC3Nza")
            .unwrap();

        let content = fs::read_to_string(store.path()).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[test]
    fn test_key_change_is_a_mismatch_and_cache_unchanged() {
        let (_dir, store) = store();
        store
            .verify_or_pin("10.0.0.1", "ssh-ed25519 AAAAC3Nza")
            .unwrap();

        let before = fs::read_to_string(store.path()).unwrap();
        let err = store
            .verify_or_pin("10.0.0.1", "ssh-ed25519 DIFFERENT")
            .unwrap_err();
        assert!(matches!(err, HolodeckError::HostKeyMismatch { .. }));
        assert_eq!(before, fs::read_to_string(store.path()).unwrap());
    }

    #[test]
    fn test_hosts_are_independent() {
        let (_dir, store) = store();
        store.verify_or_pin("10.0.0.1", "ssh-ed25519 KEY1").unwrap();
        store.verify_or_pin("10.0.0.2", "ssh-ed25519 KEY2").unwrap();
        store.verify_or_pin("10.0.0.1", "ssh-ed25519 KEY1").unwrap();
        store.verify_or_pin("10.0.0.2", "ssh-ed25519 KEY2").unwrap();
    }

    #[test]
    fn test_trailing_whitespace_is_ignored() {
        let (_dir, store) = store();
        store
            .verify_or_pin("10.0.0.1", "ssh-rsa AAAAB3Nza \n")
            .unwrap();
        store.verify_or_pin("10.0.0.1", "ssh-rsa AAAAB3Nza").unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_store_file_modes() {
        use std::os::unix::fs::PermissionsExt;
        let (_dir, store) = store();
        store.verify_or_pin("10.0.0.1", "ssh-ed25519 KEY").unwrap();

        let file_mode = fs::metadata(store.path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = fs::metadata(store.path().parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }
}
