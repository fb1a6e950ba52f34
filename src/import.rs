use std::ffi::OsStr;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use bevy_ecs::prelude::*;
use bevy_log::{error, info};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::{FilePicked, ImportSettings};

/// What the importer does when the storage root already holds a file with the
/// picked file's name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Replace the existing file with the new copy.
    #[default]
    Overwrite,
    /// Keep the existing file and import as `name (1).ext`, `name (2).ext`, ...
    Rename,
    /// Keep the existing file and fail the import.
    Reject,
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("{} has no file name", .0.display())]
    NoFileName(PathBuf),
    #[error("cannot read {}: {source}", .path.display())]
    Source { path: PathBuf, source: io::Error },
    #[error("cannot create storage directory {}: {source}", .path.display())]
    StorageRoot { path: PathBuf, source: io::Error },
    #[error("{} already exists", .0.display())]
    AlreadyExists(PathBuf),
    #[error("{} is not a regular file", .0.display())]
    NotAFile(PathBuf),
    #[error("cannot replace {}: {source}", .path.display())]
    Replace { path: PathBuf, source: io::Error },
    #[error("cannot copy {} to {}: {source}", .from.display(), .to.display())]
    CopyFile {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },
}

/// Event that gets sent when a picked file got copied into the storage root.
#[derive(Event, Debug, Clone)]
pub struct FileImported {
    /// Path the file was picked from.
    pub source: PathBuf,

    /// Path of the imported copy.
    pub destination: PathBuf,
}

/// Event that gets sent when a picked file could not be imported. Nothing
/// gets displayed for it.
#[derive(Event, Debug)]
pub struct ImportFailed {
    /// Path the file was picked from.
    pub source: PathBuf,

    /// Why the import failed.
    pub error: ImportError,
}

/// Imports waiting for the next frame to be dispatched.
#[derive(Resource, Default)]
pub(crate) struct PendingDispatch(pub(crate) Vec<PathBuf>);

/// Copy `source` into `storage_root` keeping its file name and return the
/// path of the copy. Name collisions are resolved with `policy`.
///
/// The copy is written to a temporary file in `storage_root` and renamed over
/// the destination once complete. An existing copy is only ever replaced by a
/// complete one. Importing a file that already lives at its destination is a
/// no-op.
pub fn import_file(
    source: &Path,
    storage_root: &Path,
    policy: ConflictPolicy,
) -> Result<PathBuf, ImportError> {
    let file_name = source
        .file_name()
        .ok_or_else(|| ImportError::NoFileName(source.to_path_buf()))?;
    let source_error = |err: io::Error| ImportError::Source {
        path: source.to_path_buf(),
        source: err,
    };
    let mut reader = File::open(source).map_err(source_error)?;
    let metadata = reader.metadata().map_err(source_error)?;
    if !metadata.is_file() {
        return Err(ImportError::NotAFile(source.to_path_buf()));
    }
    fs::create_dir_all(storage_root).map_err(|source| ImportError::StorageRoot {
        path: storage_root.to_path_buf(),
        source,
    })?;

    let mut destination = storage_root.join(file_name);
    if same_file(source, &destination) {
        return Ok(destination);
    }

    if destination.exists() {
        match policy {
            ConflictPolicy::Overwrite => {}
            ConflictPolicy::Rename => destination = free_name(storage_root, file_name),
            ConflictPolicy::Reject => return Err(ImportError::AlreadyExists(destination)),
        }
    }

    let copy_error = |err: io::Error| ImportError::CopyFile {
        from: source.to_path_buf(),
        to: destination.clone(),
        source: err,
    };
    let mut partial = NamedTempFile::new_in(storage_root).map_err(copy_error)?;
    io::copy(&mut reader, &mut partial).map_err(copy_error)?;
    fs::set_permissions(partial.path(), metadata.permissions()).map_err(copy_error)?;
    partial
        .persist(&destination)
        .map_err(|err| ImportError::Replace {
            path: destination.clone(),
            source: err.error,
        })?;

    Ok(destination)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn free_name(root: &Path, file_name: &OsStr) -> PathBuf {
    let name = Path::new(file_name);
    let stem = name.file_stem().unwrap_or(file_name).to_string_lossy();
    let extension = name.extension().map(OsStr::to_string_lossy);

    let mut n = 1u32;
    loop {
        let candidate = match &extension {
            Some(extension) => root.join(format!("{stem} ({n}).{extension}")),
            None => root.join(format!("{stem} ({n})")),
        };
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

pub(crate) fn import_picked_files(
    mut ev_picked: EventReader<FilePicked>,
    settings: Res<ImportSettings>,
    mut pending: ResMut<PendingDispatch>,
    mut ev_imported: EventWriter<FileImported>,
    mut ev_failed: EventWriter<ImportFailed>,
) {
    for FilePicked { path } in ev_picked.read() {
        match import_file(path, &settings.storage_root, settings.conflict_policy) {
            Ok(destination) => {
                info!("File saved to: {}", destination.display());
                pending.0.push(destination.clone());
                ev_imported.send(FileImported {
                    source: path.clone(),
                    destination,
                });
            }
            Err(error) => {
                error!("Failed to import {}: {error}", path.display());
                ev_failed.send(ImportFailed {
                    source: path.clone(),
                    error,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, contents: &[u8]) {
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn keeps_file_name_under_storage_root() {
        let src = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let source = src.path().join("photo.jpg");
        write(&source, b"jpeg bytes");

        let destination = import_file(&source, root.path(), ConflictPolicy::Overwrite).unwrap();

        assert_eq!(destination, root.path().join("photo.jpg"));
        assert_eq!(fs::read(&destination).unwrap(), b"jpeg bytes");
    }

    #[test]
    fn overwrite_replaces_existing_content() {
        let src = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let source = src.path().join("song.mp3");
        write(&source, b"new");
        write(&root.path().join("song.mp3"), b"old and longer");

        let destination = import_file(&source, root.path(), ConflictPolicy::Overwrite).unwrap();

        assert_eq!(fs::read(destination).unwrap(), b"new");
    }

    #[test]
    fn rename_picks_first_free_name() {
        let src = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let source = src.path().join("clip.mp4");
        write(&source, b"third");
        write(&root.path().join("clip.mp4"), b"first");
        write(&root.path().join("clip (1).mp4"), b"second");

        let destination = import_file(&source, root.path(), ConflictPolicy::Rename).unwrap();

        assert_eq!(destination, root.path().join("clip (2).mp4"));
        assert_eq!(fs::read(root.path().join("clip.mp4")).unwrap(), b"first");
        assert_eq!(fs::read(destination).unwrap(), b"third");
    }

    #[test]
    fn rename_without_extension() {
        let root = tempfile::tempdir().unwrap();
        write(&root.path().join("notes"), b"");

        assert_eq!(
            free_name(root.path(), OsStr::new("notes")),
            root.path().join("notes (1)")
        );
    }

    #[test]
    fn reject_leaves_existing_file() {
        let src = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let source = src.path().join("photo.png");
        write(&source, b"new");
        write(&root.path().join("photo.png"), b"old");

        let err = import_file(&source, root.path(), ConflictPolicy::Reject).unwrap_err();

        assert!(matches!(err, ImportError::AlreadyExists(_)));
        assert_eq!(fs::read(root.path().join("photo.png")).unwrap(), b"old");
    }

    #[test]
    fn missing_source_keeps_destination() {
        let src = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        write(&root.path().join("gone.png"), b"old");

        let err = import_file(
            &src.path().join("gone.png"),
            root.path(),
            ConflictPolicy::Overwrite,
        )
        .unwrap_err();

        assert!(matches!(err, ImportError::Source { .. }));
        assert_eq!(fs::read(root.path().join("gone.png")).unwrap(), b"old");
    }

    #[test]
    fn directory_source_keeps_existing_copy() {
        let src = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let source = src.path().join("album.mp3");
        fs::create_dir(&source).unwrap();
        write(&root.path().join("album.mp3"), b"old");

        let err = import_file(&source, root.path(), ConflictPolicy::Overwrite).unwrap_err();

        assert!(matches!(err, ImportError::NotAFile(_)));
        assert_eq!(fs::read(root.path().join("album.mp3")).unwrap(), b"old");
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 1);
    }

    #[test]
    fn importing_from_storage_root_is_noop() {
        let root = tempfile::tempdir().unwrap();
        let source = root.path().join("photo.png");
        write(&source, b"keep me");

        let destination = import_file(&source, root.path(), ConflictPolicy::Overwrite).unwrap();

        assert_eq!(destination, source);
        assert_eq!(fs::read(source).unwrap(), b"keep me");
    }

    #[test]
    fn creates_missing_storage_root() {
        let src = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a").join("b");
        let source = src.path().join("photo.png");
        write(&source, b"x");

        let destination = import_file(&source, &nested, ConflictPolicy::Overwrite).unwrap();

        assert_eq!(destination, nested.join("photo.png"));
    }

    #[test]
    fn path_without_file_name_fails() {
        let root = tempfile::tempdir().unwrap();
        let err = import_file(Path::new("/"), root.path(), ConflictPolicy::Overwrite).unwrap_err();
        assert!(matches!(err, ImportError::NoFileName(_)));
    }
}
