//! Zip packaging of download artifacts under a per-connection scratch path.
//!
//! Every download is zipped, single files included. Archives live at
//! `<root>/<connection>/<project>/<experiment>/<aspect>/<name>.zip` and the
//! connection's directory is removed when the session closes.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use marionette_core::{ConnectionId, ExperimentId, ProjectId};
use tracing::debug;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Failure while building an archive.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// Filesystem failure.
    #[error("archive I/O failed: {0}")]
    Io(#[from] io::Error),
    /// Zip encoding failure.
    #[error("zip encoding failed: {0}")]
    Zip(#[from] zip::result::ZipError),
    /// Directory traversal failure.
    #[error("cannot walk artifact directory: {0}")]
    Walk(#[from] walkdir::Error),
    /// The artifact does not exist.
    #[error("artifact {0} does not exist")]
    MissingSource(PathBuf),
    /// The blocking task panicked or was cancelled.
    #[error("archive task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A finished archive.
#[derive(Clone, Debug)]
pub struct PackagedArchive {
    /// Where the archive was written.
    pub path: PathBuf,
    /// Archive contents.
    pub bytes: Bytes,
}

impl PackagedArchive {
    /// File name of the archive.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Replace anything outside `[A-Za-z0-9._-]` so a value is safe as one path segment.
pub fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.trim_matches('.') {
        "" => "_".to_owned(),
        s => s.to_owned(),
    }
}

/// Scratch directory of one connection.
pub fn connection_dir(root: &Path, connection: &ConnectionId) -> PathBuf {
    root.join(sanitize_segment(connection.as_str()))
}

/// Directory receiving archives for one aspect of one experiment.
pub fn archive_location(
    root: &Path,
    connection: &ConnectionId,
    project: ProjectId,
    experiment: ExperimentId,
    aspect_path: &str,
) -> PathBuf {
    connection_dir(root, connection)
        .join(project.to_string())
        .join(experiment.to_string())
        .join(sanitize_segment(aspect_path))
}

/// Zip a file or directory into `dest_dir/<archive_name>.zip`.
pub async fn package_path(
    source: PathBuf,
    dest_dir: PathBuf,
    archive_name: String,
) -> Result<PackagedArchive, ArchiveError> {
    tokio::task::spawn_blocking(move || {
        if !source.exists() {
            return Err(ArchiveError::MissingSource(source));
        }
        write_archive(&dest_dir, &archive_name, |writer, options| {
            if source.is_dir() {
                add_directory(writer, options, &source)
            } else {
                let entry = entry_name(&source);
                writer.start_file(entry, options)?;
                let _ = io::copy(&mut File::open(&source)?, writer)?;
                Ok(())
            }
        })
    })
    .await?
}

/// Zip in-memory content as a single entry.
pub async fn package_bytes(
    entry: String,
    content: Bytes,
    dest_dir: PathBuf,
    archive_name: String,
) -> Result<PackagedArchive, ArchiveError> {
    tokio::task::spawn_blocking(move || {
        write_archive(&dest_dir, &archive_name, |writer, options| {
            writer.start_file(entry, options)?;
            io::Write::write_all(writer, &content)?;
            Ok(())
        })
    })
    .await?
}

fn write_archive<F>(
    dest_dir: &Path,
    archive_name: &str,
    fill: F,
) -> Result<PackagedArchive, ArchiveError>
where
    F: FnOnce(&mut ZipWriter<File>, SimpleFileOptions) -> Result<(), ArchiveError>,
{
    std::fs::create_dir_all(dest_dir)?;
    let path = dest_dir.join(format!("{}.zip", sanitize_segment(archive_name)));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut writer = ZipWriter::new(File::create(&path)?);
    fill(&mut writer, options)?;
    let _ = writer.finish()?;

    let bytes = Bytes::from(std::fs::read(&path)?);
    debug!(path = %path.display(), size = bytes.len(), "archive written");
    Ok(PackagedArchive { path, bytes })
}

fn add_directory(
    writer: &mut ZipWriter<File>,
    options: SimpleFileOptions,
    root: &Path,
) -> Result<(), ArchiveError> {
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| io::Error::other(e.to_string()))?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        if entry.file_type().is_dir() {
            writer.add_directory(name, options)?;
        } else {
            writer.start_file(name, options)?;
            let _ = io::copy(&mut File::open(entry.path())?, writer)?;
        }
    }
    Ok(())
}

fn entry_name(source: &Path) -> String {
    source
        .file_name()
        .map_or_else(|| "artifact".to_owned(), |n| n.to_string_lossy().into_owned())
}
