use log::{debug, trace};
#[cfg(not(unix))]
use log::warn;
use std::{
    fs::{self, File, FileType, Metadata, OpenOptions},
    io,
    path::Path,
};
use thiserror::Error;
use walkdir::WalkDir;

mod rules;

pub use self::rules::IgnoreRules;

#[cfg(unix)]
const DIRECTORY_MODE: u32 = 0o775;
#[cfg(unix)]
const USER_EXECUTE: u32 = 0o100;
#[cfg(unix)]
const ANY_EXECUTE: u32 = 0o111;

/// A custom error describing the error cases of a synchronization.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The source directory does not exist or is not a directory.
    #[error("source directory {0} does not exist")]
    MissingSource(String),
    /// Reading a directory failed while walking one of the trees.
    #[error("cannot walk directory ({0})")]
    Walk(#[from] walkdir::Error),
    /// Cannot read the metadata of a path.
    #[error("cannot read metadata of {0} ({1})")]
    Metadata(String, io::Error),
    /// Cannot remove a stale file or directory from the destination.
    #[error("cannot remove {0} ({1})")]
    Remove(String, io::Error),
    /// Cannot create a directory in the destination.
    #[error("cannot create directory {0} ({1})")]
    CreateDir(String, io::Error),
    /// Cannot copy a file from the source to the destination.
    #[error("cannot copy {0} to {1} ({2})")]
    Copy(String, String, io::Error),
    /// Cannot set the executable bit of a copied file.
    #[error("cannot set permissions of {0} ({1})")]
    Permissions(String, io::Error),
    /// One of the ignore rules is not a valid pattern.
    #[error("invalid ignore rule ({0})")]
    InvalidIgnore(#[from] ::ignore::Error),
}

/// Synchronize the destination directory with the source directory.
///
/// First, delete everything in the destination that doesn't match the source: paths
/// that don't exist in the source, that are files, directories or symlinks on one side
/// and something else on the other, or that are executable on one side only. Then walk
/// the source, creating every directory, overwriting every file and recreating every
/// symlink in the destination. Symlinks are never followed on either side.
///
/// Paths matched by the ignore rules are left alone in the destination, even if the
/// source doesn't have them. Inside a directory that is missing from the source the
/// ignored paths are kept, but a directory that has to become a file or a symlink is
/// deleted with everything in it.
///
/// An error aborts the synchronization midway. Running it again converges, because
/// both passes only depend on the current state of the trees.
pub fn sync_directories(
    source: &Path,
    destination: &Path,
    ignore: &IgnoreRules,
) -> Result<(), SyncError> {
    if !source.is_dir() {
        return Err(SyncError::MissingSource(source.display().to_string()));
    }

    debug!(
        "Synchronizing {} to {}.",
        source.display(),
        destination.display()
    );

    if destination.exists() {
        prune(source, destination, ignore)?;
    }
    copy(source, destination, ignore)?;

    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Kind {
    File,
    Directory,
    Symlink,
}

impl Kind {
    fn of(file_type: FileType) -> Self {
        if file_type.is_symlink() {
            Kind::Symlink
        } else if file_type.is_dir() {
            Kind::Directory
        } else {
            Kind::File
        }
    }
}

/// Check whether the destination entry can stay as it is. Neither path is followed.
fn matches_source(
    source_path: &Path,
    source_metadata: &Metadata,
    path: &Path,
    metadata: &Metadata,
) -> bool {
    let kind = Kind::of(metadata.file_type());
    if Kind::of(source_metadata.file_type()) != kind {
        return false;
    }

    match kind {
        Kind::File => is_executable(source_metadata) == is_executable(metadata),
        Kind::Symlink => fs::read_link(source_path).ok() == fs::read_link(path).ok(),
        Kind::Directory => true,
    }
}

fn prune(source: &Path, destination: &Path, ignore: &IgnoreRules) -> Result<(), SyncError> {
    let mut entries = WalkDir::new(destination).min_depth(1).into_iter();
    while let Some(entry) = entries.next() {
        let entry = entry?;
        let Ok(relative) = entry.path().strip_prefix(destination) else {
            continue;
        };
        let is_dir = entry.file_type().is_dir();

        if ignore.is_ignored(relative, is_dir) {
            trace!("Keeping ignored {}.", entry.path().display());
            if is_dir {
                entries.skip_current_dir();
            }
            continue;
        }

        let metadata = entry.metadata()?;
        let source_path = source.join(relative);
        match fs::symlink_metadata(&source_path) {
            Ok(source_metadata) => {
                if !matches_source(&source_path, &source_metadata, entry.path(), &metadata) {
                    if is_dir {
                        entries.skip_current_dir();
                    }
                    remove_all(entry.path(), is_dir)?;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                if is_dir {
                    entries.skip_current_dir();
                }
                remove(entry.path(), relative, is_dir, ignore)?;
            }
            Err(err) => {
                return Err(SyncError::Metadata(
                    source_path.display().to_string(),
                    err,
                ))
            }
        }
    }

    Ok(())
}

/// Remove a file or a directory with everything in it, to make place for the source.
fn remove_all(path: &Path, is_dir: bool) -> Result<(), SyncError> {
    trace!("Removing {}.", path.display());
    let result = if is_dir {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    result.map_err(|err| SyncError::Remove(path.display().to_string(), err))
}

/// Remove a file or a directory recursively, sparing the ignored paths inside.
/// Returns false if something had to be kept.
fn remove(
    path: &Path,
    relative: &Path,
    is_dir: bool,
    ignore: &IgnoreRules,
) -> Result<bool, SyncError> {
    let remove_error = |err| SyncError::Remove(path.display().to_string(), err);

    if !is_dir {
        trace!("Removing {}.", path.display());
        fs::remove_file(path).map_err(remove_error)?;
        return Ok(true);
    }

    let mut is_empty = true;
    for child in fs::read_dir(path).map_err(remove_error)? {
        let child = child.map_err(remove_error)?;
        let child_relative = relative.join(child.file_name());
        let child_is_dir = child.file_type().map_err(remove_error)?.is_dir();

        if ignore.is_ignored(&child_relative, child_is_dir) {
            trace!("Keeping ignored {}.", child.path().display());
            is_empty = false;
        } else if !remove(&child.path(), &child_relative, child_is_dir, ignore)? {
            is_empty = false;
        }
    }

    if is_empty {
        trace!("Removing {}.", path.display());
        fs::remove_dir(path).map_err(remove_error)?;
    }

    Ok(is_empty)
}

fn copy(source: &Path, destination: &Path, ignore: &IgnoreRules) -> Result<(), SyncError> {
    let mut entries = WalkDir::new(source).into_iter();
    while let Some(entry) = entries.next() {
        let entry = entry?;
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        let kind = Kind::of(entry.file_type());

        if ignore.is_ignored(relative, kind == Kind::Directory) {
            if kind == Kind::Directory {
                entries.skip_current_dir();
            }
            continue;
        }

        let target = if relative.as_os_str().is_empty() {
            destination.to_path_buf()
        } else {
            destination.join(relative)
        };

        match kind {
            Kind::Directory => create_dir(&target)?,
            Kind::File => copy_file(entry.path(), &target)?,
            Kind::Symlink => copy_symlink(entry.path(), &target)?,
        }
    }

    Ok(())
}

fn create_dir(path: &Path) -> Result<(), SyncError> {
    if path.is_dir() {
        return Ok(());
    }

    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DIRECTORY_MODE);
    }

    builder
        .create(path)
        .map_err(|err| SyncError::CreateDir(path.display().to_string(), err))
}

/// Copy a file byte-for-byte. New files get the permissions of the source,
/// existing files keep their own, except that the user executable bit is
/// always carried over.
fn copy_file(source: &Path, target: &Path) -> Result<(), SyncError> {
    let copy_error = |err| {
        SyncError::Copy(
            source.display().to_string(),
            target.display().to_string(),
            err,
        )
    };

    let source_metadata = fs::metadata(source)
        .map_err(|err| SyncError::Metadata(source.display().to_string(), err))?;

    if target.exists() {
        let mut reader = File::open(source).map_err(copy_error)?;
        let mut writer = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(target)
            .map_err(copy_error)?;
        io::copy(&mut reader, &mut writer).map_err(copy_error)?;
    } else {
        fs::copy(source, target).map_err(copy_error)?;
    }

    if is_user_executable(&source_metadata) {
        set_user_executable(target)?;
    }

    Ok(())
}

#[cfg(unix)]
fn is_executable(metadata: &Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & ANY_EXECUTE != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &Metadata) -> bool {
    false
}

#[cfg(unix)]
fn is_user_executable(metadata: &Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & USER_EXECUTE != 0
}

#[cfg(not(unix))]
fn is_user_executable(_metadata: &Metadata) -> bool {
    false
}

#[cfg(unix)]
fn set_user_executable(path: &Path) -> Result<(), SyncError> {
    use std::os::unix::fs::PermissionsExt;

    let permission_error = |err| SyncError::Permissions(path.display().to_string(), err);
    let mut permissions = fs::metadata(path).map_err(permission_error)?.permissions();
    let mode = permissions.mode();
    if mode & USER_EXECUTE != 0 {
        return Ok(());
    }

    permissions.set_mode(mode | USER_EXECUTE);
    fs::set_permissions(path, permissions).map_err(permission_error)
}

#[cfg(not(unix))]
fn set_user_executable(_path: &Path) -> Result<(), SyncError> {
    Ok(())
}

/// Recreate the symlink with the same target, without following it.
#[cfg(unix)]
fn copy_symlink(source: &Path, target: &Path) -> Result<(), SyncError> {
    let link = fs::read_link(source)
        .map_err(|err| SyncError::Metadata(source.display().to_string(), err))?;
    if fs::read_link(target).ok().as_ref() == Some(&link) {
        return Ok(());
    }

    std::os::unix::fs::symlink(&link, target).map_err(|err| {
        SyncError::Copy(
            source.display().to_string(),
            target.display().to_string(),
            err,
        )
    })
}

#[cfg(not(unix))]
fn copy_symlink(source: &Path, _target: &Path) -> Result<(), SyncError> {
    warn!("Skipping symlink {}.", source.display());
    Ok(())
}
