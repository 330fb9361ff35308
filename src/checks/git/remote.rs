use super::{credentials::CredentialHandler, CredentialAuth, GitError};
use git2::{
    build::{CheckoutBuilder, RepoBuilder},
    AutotagOption, Direction, FetchOptions, Oid, RemoteCallbacks,
};
use log::{debug, trace};
use mockall::automock;
use std::path::{Component, Path, PathBuf};

/// The remote side of the mirror.
#[automock]
pub trait Remote {
    /// Get the current revision of the tracked branch, without downloading any content.
    fn head_revision(&self) -> Result<String, GitError>;

    /// Download exactly the given revision into the scratch directory and return
    /// the path of the mirrored folder inside it.
    fn materialize(&self, revision: &str, scratch: &Path) -> Result<PathBuf, GitError>;
}

/// A branch of a remote git repository, accessed with libgit2.
pub struct GitRemote {
    url: String,
    branch: String,
    subpath: PathBuf,
    auth: Option<CredentialAuth>,
}

impl GitRemote {
    /// Track a branch of the repository at the URL. The subpath is the folder
    /// inside the repository to mirror, "." or "/" means the whole repository.
    pub fn new(url: String, branch: String, subpath: &str) -> Self {
        GitRemote {
            url,
            branch,
            subpath: normalize_subpath(subpath),
            auth: None,
        }
    }

    pub fn set_auth(&mut self, auth: CredentialAuth) {
        self.auth = Some(auth);
    }

    fn callbacks(&self) -> RemoteCallbacks<'static> {
        let mut callbacks = RemoteCallbacks::new();
        let mut handler = CredentialHandler::new(self.auth.clone());
        callbacks.credentials(move |url, username, allowed| {
            handler.try_next_credential(url, username, allowed)
        });
        callbacks
    }

    fn branch_ref(&self) -> String {
        format!("refs/heads/{}", self.branch)
    }
}

impl Remote for GitRemote {
    /// List the references of the remote (like `git ls-remote`) and find the branch.
    fn head_revision(&self) -> Result<String, GitError> {
        trace!("Listing references of {}.", self.url);
        let mut remote = git2::Remote::create_detached(self.url.as_str())
            .map_err(|err| GitError::InvalidUrl(self.url.clone(), err.message().to_string()))?;
        let connection = remote
            .connect_auth(Direction::Fetch, Some(self.callbacks()), None)
            .map_err(|err| GitError::ConnectFailed(err.message().to_string()))?;

        let branch_ref = self.branch_ref();
        let revision = connection
            .list()
            .map_err(|err| GitError::ConnectFailed(err.message().to_string()))?
            .iter()
            .find(|head| head.name() == branch_ref)
            .map(|head| head.oid().to_string())
            .ok_or_else(|| GitError::BranchNotFound(self.branch.clone()))?;

        debug!(
            "Last revision in branch {} of {}: {}.",
            self.branch,
            self.url,
            shorthash(&revision)
        );
        Ok(revision)
    }

    /// Clone only the tip of the branch into the scratch directory and check out the revision.
    fn materialize(&self, revision: &str, scratch: &Path) -> Result<PathBuf, GitError> {
        if escapes_repository(&self.subpath) {
            return Err(GitError::SubpathOutsideRepository(
                self.subpath.display().to_string(),
            ));
        }

        debug!(
            "Fetching revision {} of {}.",
            shorthash(revision),
            self.url
        );

        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(self.callbacks());
        fetch_options.download_tags(AutotagOption::None);
        if supports_shallow(&self.url) {
            fetch_options.depth(1);
        }

        let mut builder = RepoBuilder::new();
        builder.branch(&self.branch).fetch_options(fetch_options);
        let repo = builder
            .clone(&self.url, scratch)
            .map_err(|err| GitError::CloneFailed(err.message().to_string()))?;

        let oid =
            Oid::from_str(revision).map_err(|_| GitError::RevisionNotFound(revision.to_string()))?;
        let commit = repo
            .find_commit(oid)
            .map_err(|_| GitError::RevisionNotFound(revision.to_string()))?;
        repo.checkout_tree(commit.as_object(), Some(CheckoutBuilder::new().force()))
            .map_err(|err| GitError::CheckoutFailed(err.message().to_string()))?;
        repo.set_head_detached(oid)
            .map_err(|err| GitError::CheckoutFailed(err.message().to_string()))?;

        let folder = scratch.join(&self.subpath);
        if !folder.is_dir() {
            return Err(GitError::MissingSubpath(
                self.subpath.display().to_string(),
                shorthash(revision),
            ));
        }

        Ok(folder)
    }
}

/// Get the first 7 characters of a commit hash.
pub fn shorthash(sha: &str) -> String {
    sha.chars().take(7).collect()
}

fn normalize_subpath(subpath: &str) -> PathBuf {
    let trimmed = subpath.trim_start_matches('/');
    if trimmed.is_empty() || trimmed == "." {
        PathBuf::new()
    } else {
        PathBuf::from(trimmed)
    }
}

fn escapes_repository(subpath: &Path) -> bool {
    subpath
        .components()
        .any(|component| component == Component::ParentDir)
}

/// The local transport of libgit2 cannot fetch shallow, only network remotes can.
fn supports_shallow(url: &str) -> bool {
    if let Some((scheme, _)) = url.split_once("://") {
        return scheme != "file";
    }

    // scp-like syntax, e.g. git@github.com:user/repo.git
    match url.split_once(':') {
        Some((host, _)) => host.len() > 1 && !host.contains('/'),
        None => false,
    }
}
