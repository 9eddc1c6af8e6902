//! Workspace directory convention and artifact persistence.
//!
//! ```text
//! <workspace>/
//!   pki.toml
//!   root/          <name>.key  <name>.crt
//!   intermediate/  <name>.key  <name>.crt  <name>.chain.pem
//!   server/        <name>.key  <name>.crt
//!   client/        <name>.key  <name>.crt
//!   csr/           <name>.csr
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::cert::CertRole;
use crate::error::{PkiError, Result};

const CSR_DIR: &str = "csr";
pub const CONFIG_FILE: &str = "pki.toml";

/// A file-based PKI workspace rooted at one directory.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

/// One file to be written as part of an issuance.
#[derive(Debug)]
pub struct Artifact {
    pub path: PathBuf,
    pub contents: Vec<u8>,
    /// Private artifacts are readable by the owner only.
    pub private: bool,
}

impl Artifact {
    pub fn public(path: PathBuf, contents: Vec<u8>) -> Self {
        Self {
            path,
            contents,
            private: false,
        }
    }

    pub fn private(path: PathBuf, contents: Vec<u8>) -> Self {
        Self {
            path,
            contents,
            private: true,
        }
    }
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn role_dir(&self, role: CertRole) -> PathBuf {
        self.root.join(role.dir_name())
    }

    pub fn csr_dir(&self) -> PathBuf {
        self.root.join(CSR_DIR)
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// Create the role and CSR directories. Safe to call repeatedly.
    pub fn init(&self) -> Result<()> {
        for role in CertRole::ALL {
            let dir = self.role_dir(role);
            fs::create_dir_all(&dir).map_err(|e| {
                PkiError::encoding(format!("failed to create {}: {}", dir.display(), e))
            })?;
        }
        let csr_dir = self.csr_dir();
        fs::create_dir_all(&csr_dir).map_err(|e| {
            PkiError::encoding(format!("failed to create {}: {}", csr_dir.display(), e))
        })?;
        Ok(())
    }

    /// Whether any artifact named `name` exists under any role or the CSR directory.
    ///
    /// Only the artifact files of `name` itself count: `web.key` does not
    /// take the name `web.example.com`, nor the other way round.
    pub fn name_exists(&self, name: &str) -> Result<bool> {
        let file_names = artifact_file_names(name);
        let dirs = CertRole::ALL
            .iter()
            .map(|role| self.role_dir(*role))
            .chain(std::iter::once(self.csr_dir()));
        for dir in dirs {
            for file_name in &file_names {
                let path = dir.join(file_name);
                match fs::symlink_metadata(&path) {
                    Ok(_) => return Ok(true),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(PkiError::encoding(format!(
                            "failed to inspect {}: {}",
                            path.display(),
                            e
                        )))
                    }
                }
            }
        }
        Ok(false)
    }

    /// Fail with `NameCollision` if `name` is already taken.
    pub fn ensure_name_free(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        if self.name_exists(name)? {
            return Err(PkiError::NameCollision(format!(
                "'{}' already exists in {}",
                name,
                self.root.display()
            )));
        }
        Ok(())
    }
}

/// Reject names that would place artifacts outside their role directory.
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name.contains("..")
        || name.contains(&['/', '\\', '\0'][..]);
    if invalid {
        return Err(PkiError::InvalidName(format!(
            "'{}' cannot be used as an artifact name",
            name
        )));
    }
    Ok(())
}

/// Every file name an artifact called `name` may occupy.
fn artifact_file_names(name: &str) -> [String; 4] {
    [
        format!("{}.key", name),
        format!("{}.crt", name),
        format!("{}.csr", name),
        format!("{}.chain.pem", name),
    ]
}

/// Write every artifact or none of them.
///
/// Each file is written to a temporary file in its target directory and then
/// renamed into place. If any write fails, the files already placed by this
/// call are removed again.
pub fn write_artifacts(artifacts: &[Artifact]) -> Result<()> {
    let mut placed: Vec<&Path> = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        if let Err(e) = write_atomic(artifact) {
            for path in placed {
                let _ = fs::remove_file(path);
            }
            return Err(e);
        }
        tracing::debug!(path = %artifact.path.display(), "wrote artifact");
        placed.push(&artifact.path);
    }
    Ok(())
}

fn write_atomic(artifact: &Artifact) -> Result<()> {
    let path = &artifact.path;
    let dir = path
        .parent()
        .ok_or_else(|| PkiError::encoding(format!("{} has no parent", path.display())))?;
    fs::create_dir_all(dir)
        .map_err(|e| PkiError::encoding(format!("failed to create {}: {}", dir.display(), e)))?;

    // NamedTempFile is created with mode 0600
    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|e| PkiError::encoding(format!("failed to create temp file: {}", e)))?;
    tmp.write_all(&artifact.contents)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| PkiError::encoding(format!("failed to write {}: {}", path.display(), e)))?;

    #[cfg(unix)]
    if !artifact.private {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o644))
            .map_err(|e| PkiError::encoding(e.to_string()))?;
    }

    tmp.persist(path)
        .map_err(|e| PkiError::encoding(format!("failed to place {}: {}", path.display(), e)))?;
    Ok(())
}
