use std::fmt;
use std::path::{Path, PathBuf};

use keyring::Entry;
use tracing::{debug, warn};

/// Keychain service name used by [`KeyringCredentialStore`]
const SERVICE_NAME: &str = "sessionkeeper";

/// File name of the durable credential key in the cache directory
const CREDENTIAL_FILE: &str = "token";

/// Number of leading characters shown when a credential is logged
const DEBUG_PREFIX_LEN: usize = 8;

/// An opaque signed bearer token.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl From<String> for Credential {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for Credential {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

// Never print a whole bearer token into logs
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(DEBUG_PREFIX_LEN).collect();
        write!(f, "Credential({}…, {} bytes)", prefix, self.0.len())
    }
}

/// Holder of the current credential.
///
/// No validation happens here. Operations are total: durable backends log
/// I/O failures and keep their in-process view authoritative, so a credential
/// is always either entirely present or entirely absent.
pub trait CredentialStore: Send {
    fn get(&self) -> Option<Credential>;
    fn set(&mut self, credential: Credential);
    fn clear(&mut self);
}

/// Process-local store, forgotten on exit.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    current: Option<Credential>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            current: Some(credential),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Option<Credential> {
        self.current.clone()
    }

    fn set(&mut self, credential: Credential) {
        self.current = Some(credential);
    }

    fn clear(&mut self) {
        self.current = None;
    }
}

/// Store backed by exactly one file in the cache directory.
///
/// Absence of the file means unauthenticated. Writes go through a temporary
/// file and a rename so a crash never leaves half a token on disk.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    current: Option<Credential>,
}

impl FileCredentialStore {
    /// Open the store in `cache_dir`, loading any credential already on disk
    pub fn open(cache_dir: impl AsRef<Path>) -> Self {
        let path = cache_dir.as_ref().join(CREDENTIAL_FILE);
        let current = Self::read(&path);
        debug!(path = %path.display(), present = current.is_some(), "Credential file loaded");
        Self { path, current }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(path: &Path) -> Option<Credential> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let token = contents.trim();
                if token.is_empty() {
                    None
                } else {
                    Some(Credential::new(token))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Failed to read credential file");
                None
            }
        }
    }

    fn write(&self, credential: &Credential) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, credential.as_str())?;
        std::fs::rename(&tmp, &self.path)
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Option<Credential> {
        self.current.clone()
    }

    fn set(&mut self, credential: Credential) {
        if let Err(e) = self.write(&credential) {
            warn!(error = %e, path = %self.path.display(), "Failed to persist credential");
        }
        self.current = Some(credential);
    }

    fn clear(&mut self) {
        self.current = None;
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, path = %self.path.display(), "Failed to remove credential file"),
        }
    }
}

/// Store backed by a single OS keychain entry.
pub struct KeyringCredentialStore {
    entry: Entry,
    current: Option<Credential>,
}

impl KeyringCredentialStore {
    /// Open the keychain entry for `account`, loading any stored credential
    pub fn open(account: &str) -> anyhow::Result<Self> {
        use anyhow::Context;

        let entry = Entry::new(SERVICE_NAME, account).context("Failed to create keyring entry")?;
        let current = match entry.get_password() {
            Ok(token) if !token.is_empty() => Some(Credential::new(token)),
            Ok(_) | Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                warn!(error = %e, "Failed to read credential from keychain");
                None
            }
        };
        Ok(Self { entry, current })
    }
}

impl fmt::Debug for KeyringCredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyringCredentialStore")
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn get(&self) -> Option<Credential> {
        self.current.clone()
    }

    fn set(&mut self, credential: Credential) {
        if let Err(e) = self.entry.set_password(credential.as_str()) {
            warn!(error = %e, "Failed to store credential in keychain");
        }
        self.current = Some(credential);
    }

    fn clear(&mut self) {
        self.current = None;
        match self.entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => {}
            Err(e) => warn!(error = %e, "Failed to delete credential from keychain"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_set_get_clear() {
        let mut store = MemoryCredentialStore::new();
        assert!(store.get().is_none());

        store.set(Credential::from("abc"));
        assert_eq!(store.get(), Some(Credential::from("abc")));

        store.set(Credential::from("def"));
        assert_eq!(store.get(), Some(Credential::from("def")));

        store.clear();
        assert!(store.get().is_none());
    }

    #[test]
    fn test_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");

        let mut store = FileCredentialStore::open(dir.path());
        assert!(store.get().is_none());
        store.set(Credential::from("header.payload.sig"));

        let reopened = FileCredentialStore::open(dir.path());
        assert_eq!(reopened.get(), Some(Credential::from("header.payload.sig")));
        assert!(!dir.path().join("token.tmp").exists());
    }

    #[test]
    fn test_file_store_clear_removes_key() {
        let dir = tempfile::tempdir().expect("tempdir");

        let mut store = FileCredentialStore::open(dir.path());
        store.set(Credential::from("abc"));
        assert!(store.path().exists());

        store.clear();
        assert!(!store.path().exists());
        assert!(FileCredentialStore::open(dir.path()).get().is_none());

        // Clearing an absent key is fine
        store.clear();
    }

    #[test]
    fn test_file_store_ignores_blank_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(CREDENTIAL_FILE), "  \n").expect("write");

        assert!(FileCredentialStore::open(dir.path()).get().is_none());
    }

    fn mock_keyring() {
        keyring::set_default_credential_builder(keyring::mock::default_credential_builder());
    }

    #[test]
    fn test_keyring_store_set_get_clear() {
        mock_keyring();

        let mut store = KeyringCredentialStore::open("reader-1").expect("open keyring store");
        assert!(store.get().is_none());

        store.set(Credential::from("header.payload.sig"));
        assert_eq!(store.get(), Some(Credential::from("header.payload.sig")));
        assert_eq!(
            store.entry.get_password().expect("entry written"),
            "header.payload.sig"
        );

        store.clear();
        assert!(store.get().is_none());
        assert!(matches!(store.entry.get_password(), Err(keyring::Error::NoEntry)));
    }

    #[test]
    fn test_keyring_store_clear_on_absent_entry() {
        mock_keyring();

        let mut store = KeyringCredentialStore::open("reader-2").expect("open keyring store");
        store.clear();
        store.clear();
        assert!(store.get().is_none());
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let credential = Credential::from("eyJhbGciOiJIUzI1NiJ9.secret-payload.signature");
        let printed = format!("{:?}", credential);
        assert!(printed.starts_with("Credential(eyJhbGci"));
        assert!(!printed.contains("secret-payload"));
    }
}
