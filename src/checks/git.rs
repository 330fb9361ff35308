use self::remote::shorthash;
use super::{Check, CheckError};
use crate::sync::{sync_directories, IgnoreRules, SyncError};
use log::{debug, info, warn};
use std::path::PathBuf;
use thiserror::Error;

mod credentials;
mod remote;

pub use credentials::CredentialAuth;
pub use remote::{GitRemote, Remote};

/// Repository metadata in the checkout, never mirrored or touched in the destination.
const GIT_DIRECTORY_RULE: &str = "/.git/";

/// A check to mirror a folder of a remote git repository.
///
/// It asks the remote for the revision of the tracked branch, and only if it
/// differs from the last mirrored one, downloads it and synchronizes the
/// folder into the destination directory.
pub struct GitCheck {
    remote: Box<dyn Remote>,
    destination: PathBuf,
    ignore_patterns: Vec<String>,
    last_revision: Option<String>,
}

/// A custom error describing the error cases for the GitCheck.
#[derive(Debug, Error)]
pub enum GitError {
    /// The remote URL cannot be parsed.
    #[error("{0} is not a valid remote ({1})")]
    InvalidUrl(String, String),
    /// Cannot connect to the remote. This can be a network failure, authentication error or many other things.
    #[error("cannot connect to remote ({0})")]
    ConnectFailed(String),
    /// The tracked branch doesn't exist on the remote.
    #[error("branch {0} doesn't exist on the remote")]
    BranchNotFound(String),
    /// Cannot clone the remote into the scratch directory.
    #[error("cannot clone ({0})")]
    CloneFailed(String),
    /// The revision is not in the clone, the branch probably moved since.
    #[error("revision {0} is not on the branch anymore")]
    RevisionNotFound(String),
    /// Cannot check out the revision.
    #[error("cannot check out revision ({0})")]
    CheckoutFailed(String),
    /// The mirrored folder doesn't exist in the revision.
    #[error("folder {0} doesn't exist in revision {1}")]
    MissingSubpath(String, String),
    /// The mirrored folder points outside of the repository.
    #[error("folder {0} is outside of the repository")]
    SubpathOutsideRepository(String),
    /// Cannot create the scratch directory for the download.
    #[error("cannot create scratch directory ({0})")]
    ScratchFailed(std::io::Error),
    /// Cannot synchronize the downloaded folder to the destination.
    #[error("cannot synchronize ({0})")]
    SyncFailed(#[from] SyncError),
}

impl From<GitError> for CheckError {
    fn from(value: GitError) -> Self {
        match value {
            GitError::InvalidUrl(_, _)
            | GitError::BranchNotFound(_)
            | GitError::MissingSubpath(_, _)
            | GitError::SubpathOutsideRepository(_) => CheckError::Misconfigured(value.to_string()),
            GitError::ScratchFailed(_) => CheckError::PermissionDenied(value.to_string()),
            GitError::ConnectFailed(_)
            | GitError::CloneFailed(_)
            | GitError::RevisionNotFound(_)
            | GitError::CheckoutFailed(_)
            | GitError::SyncFailed(_) => CheckError::FailedUpdate(value.to_string()),
        }
    }
}

impl GitCheck {
    /// Mirror the remote into the destination directory.
    pub fn new(remote: Box<dyn Remote>, destination: impl Into<PathBuf>) -> Self {
        GitCheck {
            remote,
            destination: destination.into(),
            ignore_patterns: vec![String::from(GIT_DIRECTORY_RULE)],
            last_revision: None,
        }
    }

    /// Never touch the paths matching these gitignore patterns in the destination,
    /// in addition to the `.gitignore` of the mirrored folder.
    pub fn with_ignores(mut self, patterns: Vec<String>) -> Self {
        self.ignore_patterns.extend(patterns);
        self
    }

    /// The revision that is currently mirrored, if any.
    pub fn last_revision(&self) -> Option<&str> {
        self.last_revision.as_deref()
    }

    fn check_inner(&mut self) -> Result<bool, GitError> {
        let revision = self.remote.head_revision()?;
        if self.last_revision.as_deref() == Some(revision.as_str()) {
            debug!("Revision {} is already mirrored.", shorthash(&revision));
            return Ok(false);
        }

        info!(
            "Mirroring revision {} to {}.",
            shorthash(&revision),
            self.destination.display()
        );

        // The scratch directory is removed when dropped, even on errors.
        let scratch = tempfile::Builder::new()
            .prefix("git-sidecar-")
            .tempdir()
            .map_err(GitError::ScratchFailed)?;
        let folder = self.remote.materialize(&revision, scratch.path())?;
        let rules = IgnoreRules::from_source(&folder, &self.ignore_patterns)?;
        sync_directories(&folder, &self.destination, &rules)?;

        if let Err(err) = scratch.close() {
            warn!("Cannot remove scratch directory: {err}.");
        }

        self.last_revision = Some(revision);
        Ok(true)
    }
}

impl Check for GitCheck {
    /// Probe the remote branch and mirror it if it changed since the last check.
    /// It returns true if a new revision was mirrored.
    fn check(&mut self) -> Result<bool, CheckError> {
        let update_successful = self.check_inner()?;

        Ok(update_successful)
    }
}
