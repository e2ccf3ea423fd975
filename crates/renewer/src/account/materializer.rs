//! Account materialization
//!
//! Reproduces the on-disk shape certbot keeps for an already registered
//! account so the run reuses it instead of registering a new one:
//!
//! ```text
//! <config dir>/accounts/<ca host>/directory/<key fingerprint>/
//! ├── regr.json          # {"body": {}, "uri": <registration id>}
//! ├── meta.json          # {"creation_dt": <rfc3339>, "creation_host": <label>}
//! └── private_key.json   # account key as a private JWK
//! ```
//!
//! The account directory only ever appears complete. Artifacts are
//! written into a staging directory beside it and renamed into place.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use certkeeper_config::AccountConfig;

use super::key::AccountKey;
use crate::errors::ResourceError;

const REGISTRATION_FILE: &str = "regr.json";
const META_FILE: &str = "meta.json";
const PRIVATE_KEY_FILE: &str = "private_key.json";

/// A materialized account directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountIdentity {
    /// Directory holding the account files
    pub directory: PathBuf,
    /// Fingerprint naming the directory
    pub fingerprint: String,
    /// CA host namespacing the directory
    pub ca_host: String,
}

#[derive(Serialize)]
struct AccountMeta<'a> {
    creation_dt: String,
    creation_host: &'a str,
}

/// Writes account identities under a CA client configuration directory
#[derive(Debug, Clone)]
pub struct AccountMaterializer {
    creation_host: String,
}

impl AccountMaterializer {
    pub fn new(creation_host: impl Into<String>) -> Self {
        Self {
            creation_host: creation_host.into(),
        }
    }

    /// Materialize the account under `config_dir`.
    ///
    /// Rerunning with the same key yields the same directory; an existing
    /// directory is replaced as a whole.
    ///
    /// # Errors
    ///
    /// Returns a [`ResourceError`] if any directory or file cannot be
    /// created. Nothing is visible at the account path in that case other
    /// than what was there before.
    pub fn materialize(
        &self,
        account: &AccountConfig,
        key: &AccountKey,
        config_dir: &Path,
    ) -> Result<AccountIdentity, ResourceError> {
        self.materialize_with_writer(account, key, config_dir, Utc::now(), write_private_file)
    }

    pub(crate) fn materialize_with_writer<W>(
        &self,
        account: &AccountConfig,
        key: &AccountKey,
        config_dir: &Path,
        now: DateTime<Utc>,
        mut write: W,
    ) -> Result<AccountIdentity, ResourceError>
    where
        W: FnMut(&Path, &[u8]) -> io::Result<()>,
    {
        let fingerprint = key.fingerprint();
        let ca_host = account.ca_host().to_string();
        let parent = account_parent_dir(config_dir, &ca_host);
        let directory = parent.join(&fingerprint);

        // Everything that can fail without touching the disk happens first
        let artifacts = [
            (REGISTRATION_FILE, registration_record(account)?),
            (META_FILE, self.meta_record(now)?),
            (PRIVATE_KEY_FILE, to_json(&key.to_jwk(), &directory)?),
        ];

        create_private_dir_all(&parent)?;

        let staging = parent.join(format!(".staging-{}", Uuid::new_v4()));
        create_private_dir(&staging)?;

        for (name, contents) in &artifacts {
            let path = staging.join(name);
            if let Err(source) = write(&path, contents) {
                discard(&staging);
                return Err(ResourceError::Write { path, source });
            }
            debug!(path = %path.display(), "Staged account artifact");
        }

        if let Err(e) = swap_into_place(&staging, &directory) {
            discard(&staging);
            return Err(e);
        }

        info!(
            ca_host = %ca_host,
            fingerprint = %fingerprint,
            path = %directory.display(),
            "Materialized ACME account"
        );

        Ok(AccountIdentity {
            directory,
            fingerprint,
            ca_host,
        })
    }

    fn meta_record(&self, now: DateTime<Utc>) -> Result<Vec<u8>, ResourceError> {
        let meta = AccountMeta {
            creation_dt: now.to_rfc3339_opts(SecondsFormat::Secs, false),
            creation_host: &self.creation_host,
        };
        to_json(&meta, Path::new(META_FILE))
    }
}

/// `<config dir>/accounts/<ca host>/directory`
pub fn account_parent_dir(config_dir: &Path, ca_host: &str) -> PathBuf {
    config_dir.join("accounts").join(ca_host).join("directory")
}

fn registration_record(account: &AccountConfig) -> Result<Vec<u8>, ResourceError> {
    let record = json!({
        "body": {},
        "uri": account.registration_id(),
    });
    to_json(&record, Path::new(REGISTRATION_FILE))
}

fn to_json<T: Serialize>(value: &T, path: &Path) -> Result<Vec<u8>, ResourceError> {
    serde_json::to_vec(value).map_err(|e| ResourceError::Write {
        path: path.to_path_buf(),
        source: io::Error::other(e),
    })
}

fn swap_into_place(staging: &Path, directory: &Path) -> Result<(), ResourceError> {
    let retired = match fs::symlink_metadata(directory) {
        Ok(_) => {
            let retired = staging.with_file_name(format!(".retired-{}", Uuid::new_v4()));
            fs::rename(directory, &retired).map_err(|source| ResourceError::Rename {
                from: directory.to_path_buf(),
                to: retired.clone(),
                source,
            })?;
            Some(retired)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(source) => {
            return Err(ResourceError::Write {
                path: directory.to_path_buf(),
                source,
            })
        }
    };

    if let Err(source) = fs::rename(staging, directory) {
        // Put the previous account back
        if let Some(retired) = &retired {
            if let Err(e) = fs::rename(retired, directory) {
                warn!(path = %directory.display(), error = %e, "Failed to restore previous account");
            }
        }
        return Err(ResourceError::Rename {
            from: staging.to_path_buf(),
            to: directory.to_path_buf(),
            source,
        });
    }

    if let Some(retired) = retired {
        discard(&retired);
    }

    Ok(())
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_dir_all(path) {
        warn!(path = %path.display(), error = %e, "Failed to remove staging directory");
    }
}

fn create_private_dir_all(path: &Path) -> Result<(), ResourceError> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }

    builder.create(path).map_err(|source| ResourceError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

fn create_private_dir(path: &Path) -> Result<(), ResourceError> {
    let mut builder = fs::DirBuilder::new();

    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }

    builder.create(path).map_err(|source| ResourceError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

/// Create a new owner-only file (0600 on Unix) holding `contents`
pub(crate) fn write_private_file(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    const P384_SEC1: &str = include_str!("../../tests/fixtures/account-p384-sec1.pem");
    const FINGERPRINT: &str = "a5a85d01e753f6be0659136fc25a42be";

    fn account() -> AccountConfig {
        AccountConfig::new("https://ca.example/dir", "ops@example.com", "acct-123").unwrap()
    }

    fn key() -> AccountKey {
        AccountKey::from_pem(P384_SEC1.as_bytes().to_vec()).unwrap()
    }

    fn read_json(path: &Path) -> serde_json::Value {
        serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_materialize_layout() {
        let config_dir = TempDir::new().unwrap();
        let identity = AccountMaterializer::new("certkeeper")
            .materialize(&account(), &key(), config_dir.path())
            .unwrap();

        let expected = config_dir
            .path()
            .join("accounts/ca.example/directory")
            .join(FINGERPRINT);
        assert_eq!(identity.directory, expected);
        assert_eq!(identity.fingerprint, FINGERPRINT);
        assert_eq!(identity.ca_host, "ca.example");
        assert_eq!(
            entries(&expected),
            vec!["meta.json", "private_key.json", "regr.json"]
        );
    }

    #[test]
    fn test_artifact_contents() {
        let config_dir = TempDir::new().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        let identity = AccountMaterializer::new("runner-7")
            .materialize_with_writer(&account(), &key(), config_dir.path(), now, write_private_file)
            .unwrap();

        let regr = read_json(&identity.directory.join("regr.json"));
        assert_eq!(regr, json!({"body": {}, "uri": "acct-123"}));

        let meta = read_json(&identity.directory.join("meta.json"));
        assert_eq!(meta["creation_dt"], "2024-03-01T12:00:00+00:00");
        assert_eq!(meta["creation_host"], "runner-7");

        let jwk = read_json(&identity.directory.join("private_key.json"));
        assert_eq!(jwk["kty"], "EC");
        assert_eq!(jwk["crv"], "P-384");
        assert_eq!(
            jwk["d"],
            "LKinkI8T_rnL8fka3d6VxhKG7O7NU9XQic0byHXtbu1nFPdwPoyMSNYDkNBnQ_X0"
        );
    }

    #[test]
    fn test_rerun_reuses_directory() {
        let config_dir = TempDir::new().unwrap();
        let materializer = AccountMaterializer::new("certkeeper");

        let first = materializer
            .materialize(&account(), &key(), config_dir.path())
            .unwrap();
        let second = materializer
            .materialize(&account(), &key(), config_dir.path())
            .unwrap();

        assert_eq!(first, second);
        let parent = account_parent_dir(config_dir.path(), "ca.example");
        assert_eq!(entries(&parent), vec![FINGERPRINT.to_string()]);
    }

    #[test]
    fn test_failure_mid_write_exposes_nothing() {
        let config_dir = TempDir::new().unwrap();
        let mut writes = 0;

        let err = AccountMaterializer::new("certkeeper")
            .materialize_with_writer(&account(), &key(), config_dir.path(), Utc::now(), |path, contents| {
                writes += 1;
                if path.ends_with(PRIVATE_KEY_FILE) {
                    return Err(io::Error::other("disk full"));
                }
                write_private_file(path, contents)
            })
            .unwrap_err();

        assert!(matches!(err, ResourceError::Write { .. }));
        assert_eq!(writes, 3);

        let parent = account_parent_dir(config_dir.path(), "ca.example");
        assert!(!parent.join(FINGERPRINT).exists());
        assert!(entries(&parent).is_empty());
    }

    #[test]
    fn test_failed_rerun_keeps_previous_account() {
        let config_dir = TempDir::new().unwrap();
        let materializer = AccountMaterializer::new("certkeeper");
        let identity = materializer
            .materialize(&account(), &key(), config_dir.path())
            .unwrap();

        let err = materializer
            .materialize_with_writer(&account(), &key(), config_dir.path(), Utc::now(), |path, contents| {
                if path.ends_with(META_FILE) {
                    return Err(io::Error::other("interrupted"));
                }
                write_private_file(path, contents)
            })
            .unwrap_err();

        assert!(matches!(err, ResourceError::Write { .. }));
        assert_eq!(
            entries(&identity.directory),
            vec!["meta.json", "private_key.json", "regr.json"]
        );
        assert_eq!(
            entries(&account_parent_dir(config_dir.path(), "ca.example")),
            vec![FINGERPRINT.to_string()]
        );
    }

    #[test]
    fn test_unwritable_config_dir() {
        let not_a_dir = tempfile::NamedTempFile::new().unwrap();
        let err = AccountMaterializer::new("certkeeper")
            .materialize(&account(), &key(), &not_a_dir.path().join("config"))
            .unwrap_err();
        assert!(matches!(err, ResourceError::CreateDir { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_artifacts_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let config_dir = TempDir::new().unwrap();
        let identity = AccountMaterializer::new("certkeeper")
            .materialize(&account(), &key(), config_dir.path())
            .unwrap();

        let mode = fs::metadata(identity.directory.join("private_key.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
