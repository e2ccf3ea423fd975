//! Per-run working area
//!
//! Every run gets a fresh directory tree that certbot treats as its whole
//! world:
//!
//! ```text
//! certkeeper-<run id>/
//! ├── config/            # --config-dir (materialized account lives here)
//! ├── work/              # --work-dir
//! ├── logs/              # --logs-dir
//! └── certificates/
//!     └── <identifier>/  # created on first use
//!         ├── key
//!         ├── csr
//!         ├── cert
//!         ├── chain
//!         └── fullchain
//! ```
//!
//! The tree holds private keys, so it is created with restrictive
//! permissions and removed when the [`WorkingArea`] is dropped, on every
//! exit path, unless it was allocated with `retain` for post-mortem
//! inspection.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use certkeeper_common::{CertificateId, RunId};

use crate::errors::ResourceError;

const CONFIG_DIR: &str = "config";
const WORK_DIR: &str = "work";
const LOGS_DIR: &str = "logs";
const CERTIFICATES_DIR: &str = "certificates";

/// Ephemeral directory tree for one run
#[derive(Debug)]
pub struct WorkingArea {
    root: PathBuf,
    retain: bool,
    disposed: bool,
}

impl WorkingArea {
    /// Create a fresh working area under `parent`.
    ///
    /// The root is named after the run, so two runs never share a tree;
    /// an existing directory of the same name is a collision, not reused.
    ///
    /// # Errors
    ///
    /// Returns a [`ResourceError`] if any directory cannot be created.
    /// A partially created tree is removed before returning.
    pub fn allocate(parent: &Path, run_id: &RunId, retain: bool) -> Result<Self, ResourceError> {
        let root = parent.join(format!("certkeeper-{}", run_id));
        create_fresh_dir(&root)?;

        // From here on Drop cleans up if a subdirectory fails
        let area = Self {
            root,
            retain,
            disposed: false,
        };

        for name in [CONFIG_DIR, WORK_DIR, LOGS_DIR, CERTIFICATES_DIR] {
            create_fresh_dir(&area.root.join(name))?;
        }

        info!(
            path = %area.root.display(),
            retain = area.retain,
            "Allocated working area"
        );

        Ok(area)
    }

    /// Root of the tree
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// certbot `--config-dir`
    pub fn config_dir(&self) -> PathBuf {
        self.root.join(CONFIG_DIR)
    }

    /// certbot `--work-dir`
    pub fn work_dir(&self) -> PathBuf {
        self.root.join(WORK_DIR)
    }

    /// certbot `--logs-dir`
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS_DIR)
    }

    /// Directory a certificate's files live in (not created)
    pub fn certificate_dir(&self, id: &CertificateId) -> PathBuf {
        self.root.join(CERTIFICATES_DIR).join(id.as_str())
    }

    /// Create the certificate's directory on first use.
    ///
    /// # Errors
    ///
    /// [`ResourceError::Collision`] if the directory already exists,
    /// [`ResourceError::CreateDir`] if the filesystem refuses.
    pub fn scope(&self, id: &CertificateId) -> Result<PathBuf, ResourceError> {
        let dir = self.certificate_dir(id);
        create_fresh_dir(&dir)?;
        debug!(identifier = %id, path = %dir.display(), "Created certificate working directory");
        Ok(dir)
    }

    /// Remove the tree now and report failures instead of logging them.
    ///
    /// A retained area is left in place.
    pub fn dispose(mut self) -> Result<(), ResourceError> {
        self.disposed = true;

        if self.retain {
            info!(path = %self.root.display(), "Retaining working area");
            return Ok(());
        }

        fs::remove_dir_all(&self.root).map_err(|source| ResourceError::Remove {
            path: self.root.clone(),
            source,
        })?;

        debug!(path = %self.root.display(), "Removed working area");
        Ok(())
    }
}

impl Drop for WorkingArea {
    fn drop(&mut self) {
        if self.disposed {
            return;
        }

        if self.retain {
            info!(path = %self.root.display(), "Retaining working area");
            return;
        }

        match fs::remove_dir_all(&self.root) {
            Ok(()) => debug!(path = %self.root.display(), "Removed working area"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.root.display(),
                error = %e,
                "Failed to remove working area"
            ),
        }
    }
}

/// Create exactly one directory that must not exist yet, owner-only on Unix
fn create_fresh_dir(path: &Path) -> Result<(), ResourceError> {
    let mut builder = fs::DirBuilder::new();

    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }

    builder.create(path).map_err(|source| {
        if source.kind() == io::ErrorKind::AlreadyExists {
            ResourceError::Collision {
                path: path.to_path_buf(),
            }
        } else {
            ResourceError::CreateDir {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn id(s: &str) -> CertificateId {
        CertificateId::new(s).unwrap()
    }

    #[test]
    fn test_allocate_creates_layout() {
        let parent = TempDir::new().unwrap();
        let area = WorkingArea::allocate(parent.path(), &RunId::new(), false).unwrap();

        assert!(area.config_dir().is_dir());
        assert!(area.work_dir().is_dir());
        assert!(area.logs_dir().is_dir());
        assert!(area.path().join("certificates").is_dir());
        assert_eq!(
            fs::read_dir(area.path().join("certificates")).unwrap().count(),
            0
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_allocate_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let parent = TempDir::new().unwrap();
        let area = WorkingArea::allocate(parent.path(), &RunId::new(), false).unwrap();

        let mode = fs::metadata(area.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0);
    }

    #[test]
    fn test_allocate_collision() {
        let parent = TempDir::new().unwrap();
        let run_id = RunId::from_string("fixed");
        let _area = WorkingArea::allocate(parent.path(), &run_id, false).unwrap();

        let err = WorkingArea::allocate(parent.path(), &run_id, false).unwrap_err();
        assert!(matches!(err, ResourceError::Collision { .. }));
    }

    #[test]
    fn test_allocate_missing_parent() {
        let err = WorkingArea::allocate(Path::new("/nonexistent/parent"), &RunId::new(), false)
            .unwrap_err();
        assert!(matches!(err, ResourceError::CreateDir { .. }));
    }

    #[test]
    fn test_scope_creates_once() {
        let parent = TempDir::new().unwrap();
        let area = WorkingArea::allocate(parent.path(), &RunId::new(), false).unwrap();

        let dir = area.scope(&id("alpha")).unwrap();
        assert!(dir.is_dir());
        assert_eq!(dir, area.certificate_dir(&id("alpha")));

        let err = area.scope(&id("alpha")).unwrap_err();
        assert!(matches!(err, ResourceError::Collision { .. }));
    }

    #[test]
    fn test_scope_does_not_clash_with_shared_dirs() {
        let parent = TempDir::new().unwrap();
        let area = WorkingArea::allocate(parent.path(), &RunId::new(), false).unwrap();

        // A certificate named like a shared directory gets its own subtree
        let dir = area.scope(&id("config")).unwrap();
        assert_ne!(dir, area.config_dir());
    }

    #[test]
    fn test_drop_removes_tree() {
        let parent = TempDir::new().unwrap();
        let area = WorkingArea::allocate(parent.path(), &RunId::new(), false).unwrap();
        let root = area.path().to_path_buf();
        area.scope(&id("alpha")).unwrap();
        fs::write(area.certificate_dir(&id("alpha")).join("key"), "secret").unwrap();

        drop(area);

        assert!(!root.exists());
    }

    #[test]
    fn test_retained_tree_survives() {
        let parent = TempDir::new().unwrap();
        let area = WorkingArea::allocate(parent.path(), &RunId::new(), true).unwrap();
        let root = area.path().to_path_buf();

        area.dispose().unwrap();

        assert!(root.is_dir());
    }

    #[test]
    fn test_dispose_removes_tree() {
        let parent = TempDir::new().unwrap();
        let area = WorkingArea::allocate(parent.path(), &RunId::new(), false).unwrap();
        let root = area.path().to_path_buf();

        area.dispose().unwrap();

        assert!(!root.exists());
    }
}
