//! Fail-directory management for files that could not be loaded.
//!
//! Name collisions in the fail directory are resolved by content: an incoming
//! file identical to the one already there is dropped, a different one is
//! stored under `<stem>-<digest prefix>.<ext>`. Nothing is ever overwritten
//! by a file with different content of the same name.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::QuarantineError;

/// Sidecar suffixes moved alongside every data file.
pub const SIDECAR_SUFFIXES: [&str; 2] = [".resource", ".mods"];

/// Hex characters of the digest appended on rename.
const DIGEST_PREFIX_LEN: usize = 16;

/// What happened to one file during quarantine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum QuarantineAction {
    /// Source did not exist; nothing to do.
    Missing,
    Moved { target: PathBuf },
    /// Identical content already quarantined; the source was deleted.
    DeletedDuplicate { existing: PathBuf },
    /// Same name, different content; stored under a digest-suffixed name.
    Renamed { target: PathBuf },
    /// I/O error; the source is left where it was.
    Failed { error: String },
}

/// Per-variant results of quarantining a data file and its sidecars.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QuarantineReport {
    pub entries: Vec<(PathBuf, QuarantineAction)>,
}

impl QuarantineReport {
    pub fn action_for(&self, path: &Path) -> Option<&QuarantineAction> {
        self.entries
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, action)| action)
    }

    pub fn has_failures(&self) -> bool {
        self.entries
            .iter()
            .any(|(_, a)| matches!(a, QuarantineAction::Failed { .. }))
    }
}

/// Moves failed files into the fail directory.
#[derive(Debug, Clone)]
pub struct QuarantineManager {
    fail_dir: PathBuf,
}

impl QuarantineManager {
    pub fn new(fail_dir: impl Into<PathBuf>) -> Self {
        Self {
            fail_dir: fail_dir.into(),
        }
    }

    pub fn fail_dir(&self) -> &Path {
        &self.fail_dir
    }

    /// Create the fail directory if it does not exist yet.
    pub fn ensure_dir(&self) -> Result<(), QuarantineError> {
        fs::create_dir_all(&self.fail_dir)?;
        Ok(())
    }

    /// Quarantine `path`, `path.resource` and `path.mods` independently.
    ///
    /// Errors are logged per variant and never stop the remaining variants.
    pub fn quarantine_with_sidecars(&self, path: &Path) -> QuarantineReport {
        let mut report = QuarantineReport::default();
        let variants = std::iter::once(path.to_path_buf())
            .chain(SIDECAR_SUFFIXES.iter().map(|suffix| with_suffix(path, suffix)));

        for variant in variants {
            let action = match self.move_to_fail_directory(&variant) {
                Ok(action) => action,
                Err(e) => {
                    warn!(
                        path = %variant.display(),
                        fail_dir = %self.fail_dir.display(),
                        error = %e,
                        "error occurred while moving file to fail directory"
                    );
                    QuarantineAction::Failed { error: e.to_string() }
                }
            };
            report.entries.push((variant, action));
        }
        report
    }

    /// Move a single file into the fail directory, resolving name collisions
    /// by content digest.
    pub fn move_to_fail_directory(&self, source: &Path) -> Result<QuarantineAction, QuarantineError> {
        if !source.exists() {
            return Ok(QuarantineAction::Missing);
        }

        let file_name = source
            .file_name()
            .ok_or_else(|| QuarantineError::InvalidPath(source.to_path_buf()))?;
        self.ensure_dir()?;
        let target = self.fail_dir.join(file_name);

        match move_no_replace(source, &target) {
            Ok(()) => {
                info!(
                    file = %source.display(),
                    fail_dir = %self.fail_dir.display(),
                    "moved file to fail directory"
                );
                return Ok(QuarantineAction::Moved { target });
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound && !source.exists() => {
                return Ok(QuarantineAction::Missing);
            }
            Err(e) => return Err(e.into()),
        }

        if have_same_digest(source, &target) {
            fs::remove_file(source)?;
            info!(
                file = %source.display(),
                fail_dir = %self.fail_dir.display(),
                "deleted file because an identical copy already exists in the fail directory"
            );
            return Ok(QuarantineAction::DeletedDuplicate { existing: target });
        }

        let digest = file_digest(source)?;
        let renamed = self.fail_dir.join(digest_suffixed_name(source, &digest)?);
        match move_no_replace(source, &renamed) {
            Ok(()) => {
                info!(
                    file = %source.display(),
                    target = %renamed.display(),
                    fail_dir = %self.fail_dir.display(),
                    "renamed file because a different file with the same name exists in the fail directory"
                );
                Ok(QuarantineAction::Renamed { target: renamed })
            }
            // Same name and digest prefix: the same file was quarantined before.
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && have_same_digest(source, &renamed) => {
                fs::remove_file(source)?;
                info!(
                    file = %source.display(),
                    existing = %renamed.display(),
                    "deleted file because an identical copy already exists in the fail directory"
                );
                Ok(QuarantineAction::DeletedDuplicate { existing: renamed })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Count regular files anywhere under the fail directory.
    pub fn count_quarantined_files(&self) -> Result<u64, QuarantineError> {
        let mut count = 0u64;
        for entry in walkdir::WalkDir::new(&self.fail_dir) {
            if entry?.file_type().is_file() {
                count += 1;
            }
        }
        Ok(count)
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// `<base>-<first 16 hex chars>.<ext>`, split at the last dot of the file
/// name, or `<name>-<16 hex>` when there is no dot. A dotfile such as
/// `.hidden` has an empty base: `-<16 hex>.hidden`.
fn digest_suffixed_name(source: &Path, digest: &str) -> Result<String, QuarantineError> {
    let name = source
        .file_name()
        .ok_or_else(|| QuarantineError::InvalidPath(source.to_path_buf()))?
        .to_string_lossy();
    let prefix = &digest[..DIGEST_PREFIX_LEN.min(digest.len())];
    Ok(match name.rfind('.') {
        Some(dot) => format!("{}-{}.{}", &name[..dot], prefix, &name[dot + 1..]),
        None => format!("{}-{}", name, prefix),
    })
}

/// Hex SHA-256 of a file's contents, streamed.
pub(crate) fn file_digest(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Any read error counts as "different", which routes the file to the rename path.
fn have_same_digest(a: &Path, b: &Path) -> bool {
    match (file_digest(a), file_digest(b)) {
        (Ok(da), Ok(db)) => da == db,
        (Err(e), _) | (_, Err(e)) => {
            debug!(error = %e, "digest comparison failed, treating files as different");
            false
        }
    }
}

/// Move `source` to `target`, failing with `AlreadyExists` instead of
/// replacing an existing target.
///
/// A hard link claims the target name atomically. Where linking is not
/// possible (another filesystem, no link support) the content is streamed
/// into a target opened with `create_new`.
fn move_no_replace(source: &Path, target: &Path) -> io::Result<()> {
    match fs::hard_link(source, target) {
        Ok(()) => fs::remove_file(source),
        Err(e) if matches!(e.kind(), io::ErrorKind::AlreadyExists | io::ErrorKind::NotFound) => Err(e),
        Err(link_err) => {
            debug!(
                source = %source.display(),
                target = %target.display(),
                error = %link_err,
                "hard link failed, falling back to copy"
            );
            copy_no_replace(source, target)?;
            fs::remove_file(source)
        }
    }
}

fn copy_no_replace(source: &Path, target: &Path) -> io::Result<()> {
    let mut input = File::open(source)?;
    let mut output = OpenOptions::new().write(true).create_new(true).open(target)?;
    let copied = io::copy(&mut input, &mut output).and_then(|_| output.sync_all());
    if let Err(e) = copied {
        // Only remove what this call created; the source is untouched.
        let _ = fs::remove_file(target);
        return Err(e);
    }
    Ok(())
}
