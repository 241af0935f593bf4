use crate::error::ArchiveError;
use filetime::{set_file_mtime, FileTime};
use std::{
    fs::{self, File},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    time::SystemTime,
};
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};
use walkdir::WalkDir;
use zip::{write::SimpleFileOptions, CompressionMethod, ZipArchive, ZipWriter};

/// Removes a file or directory tree on drop unless disarmed.
pub struct CleanupGuard {
    path: PathBuf,
    armed: bool,
}

impl CleanupGuard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if self.path.is_dir() {
            let _ = fs::remove_dir_all(&self.path);
        } else {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Extracts every entry of `archive` under `dest`. Entries escaping `dest`
/// are skipped.
pub fn extract_zip(archive: &Path, dest: &Path) -> Result<usize, ArchiveError> {
    let file = File::open(archive).map_err(|source| io_error("open archive", archive, source))?;
    let mut zip = ZipArchive::new(file).map_err(|err| corrupt(archive, err))?;
    fs::create_dir_all(dest).map_err(|source| io_error("create directory", dest, source))?;

    let mut extracted = 0usize;
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(|err| corrupt(archive, err))?;
        let Some(relative) = entry.enclosed_name() else {
            continue;
        };
        let out_path = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)
                .map_err(|source| io_error("create directory", &out_path, source))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| io_error("create directory", parent, source))?;
        }
        let mut out_file = File::create(&out_path)
            .map_err(|source| io_error("create file", &out_path, source))?;
        copy_entry(&mut entry, &mut out_file, archive, &out_path)?;
        drop(out_file);

        if let Some(mtime) = entry.last_modified().and_then(entry_mtime) {
            let _ = set_file_mtime(&out_path, mtime);
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                let _ = fs::set_permissions(&out_path, fs::Permissions::from_mode(mode & 0o7777));
            }
        }
        extracted += 1;
    }

    Ok(extracted)
}

/// Archives the contents of `source` into `archive`, storing paths relative
/// to `source`. The archive only appears at its final path once fully
/// written. Trees containing symlinks are refused before anything is kept.
pub fn zip_dir(source: &Path, archive: &Path) -> Result<usize, ArchiveError> {
    if let Some(parent) = archive.parent() {
        fs::create_dir_all(parent).map_err(|err| io_error("create directory", parent, err))?;
    }
    let temp = archive.with_extension("zip.tmp");
    let mut guard = CleanupGuard::new(&temp);

    let file = File::create(&temp).map_err(|err| io_error("create archive", &temp, err))?;
    let mut writer = ZipWriter::new(file);
    let base_options =
        SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut written = 0usize;

    let walker = WalkDir::new(source)
        .follow_links(false)
        .sort_by_file_name()
        .min_depth(1);
    for entry in walker {
        let entry = entry.map_err(|err| {
            let path = err.path().unwrap_or(source).to_path_buf();
            io_error("walk directory", &path, io::Error::from(err))
        })?;
        let path = entry.path();
        if entry.path_is_symlink() {
            return Err(ArchiveError::Unsupported {
                path: path.to_path_buf(),
                message: "symbolic links cannot be archived".to_string(),
            });
        }
        let relative = path
            .strip_prefix(source)
            .map_err(|_| io_error("relativize", path, io::ErrorKind::InvalidInput.into()))?;
        let name = archive_name(relative);
        let metadata = entry
            .metadata()
            .map_err(|err| io_error("read metadata", path, io::Error::from(err)))?;

        let mut options = base_options;
        if let Some(stamp) = metadata.modified().ok().and_then(to_zip_time) {
            options = options.last_modified_time(stamp);
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            options = options.unix_permissions(metadata.permissions().mode() & 0o7777);
        }

        if entry.file_type().is_dir() {
            writer
                .add_directory(format!("{name}/"), options)
                .map_err(|err| zip_write_error(&temp, err))?;
        } else if entry.file_type().is_file() {
            writer
                .start_file(name, options)
                .map_err(|err| zip_write_error(&temp, err))?;
            let mut input = File::open(path).map_err(|err| io_error("open file", path, err))?;
            io::copy(&mut input, &mut writer).map_err(|err| io_error("archive file", path, err))?;
            written += 1;
        }
    }

    let mut file = writer.finish().map_err(|err| zip_write_error(&temp, err))?;
    file.flush()
        .and_then(|_| file.sync_all())
        .map_err(|err| io_error("flush archive", &temp, err))?;
    drop(file);

    fs::rename(&temp, archive).map_err(|err| io_error("finalize archive", archive, err))?;
    guard.disarm();
    Ok(written)
}

fn copy_entry(
    entry: &mut impl Read,
    out: &mut File,
    archive: &Path,
    out_path: &Path,
) -> Result<(), ArchiveError> {
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = match entry.read(&mut buffer) {
            Ok(0) => return Ok(()),
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(corrupt(archive, err)),
        };
        out.write_all(&buffer[..read])
            .map_err(|source| io_error("write file", out_path, source))?;
    }
}

fn archive_name(relative: &Path) -> String {
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Zip timestamps carry no zone; they are read back as UTC, matching `to_zip_time`.
fn entry_mtime(stamp: zip::DateTime) -> Option<FileTime> {
    let date = Date::from_calendar_date(
        i32::from(stamp.year()),
        Month::try_from(stamp.month()).ok()?,
        stamp.day(),
    )
    .ok()?;
    let clock = Time::from_hms(stamp.hour(), stamp.minute(), stamp.second()).ok()?;
    let seconds = PrimitiveDateTime::new(date, clock).assume_utc().unix_timestamp();
    Some(FileTime::from_unix_time(seconds, 0))
}

fn to_zip_time(modified: SystemTime) -> Option<zip::DateTime> {
    let stamp = OffsetDateTime::from(modified);
    let year = u16::try_from(stamp.year()).ok()?;
    zip::DateTime::from_date_and_time(
        year,
        u8::from(stamp.month()),
        stamp.day(),
        stamp.hour(),
        stamp.minute(),
        stamp.second(),
    )
    .ok()
}

fn corrupt(archive: &Path, err: impl std::fmt::Display) -> ArchiveError {
    ArchiveError::Corrupt {
        path: archive.to_path_buf(),
        message: err.to_string(),
    }
}

fn zip_write_error(archive: &Path, err: zip::result::ZipError) -> ArchiveError {
    match err {
        zip::result::ZipError::Io(source) => io_error("write archive", archive, source),
        other => io_error(
            "write archive",
            archive,
            io::Error::new(io::ErrorKind::Other, other.to_string()),
        ),
    }
}

fn io_error(action: &'static str, path: &Path, source: io::Error) -> ArchiveError {
    ArchiveError::Io {
        action,
        path: path.to_path_buf(),
        source,
    }
}
