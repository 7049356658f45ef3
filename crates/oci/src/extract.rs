//! Layer extraction.
//!
//! Unpacks a (usually gzip-compressed) tar layer into a destination tree.
//! Entries are applied in archive order with permissions, mtimes and
//! extended attributes preserved. Entry paths are sanitized before anything
//! touches the filesystem:
//! - `.`, leading `/` and drive prefixes are dropped
//! - any entry containing `..` is skipped
//!
//! OCI whiteouts are honoured so layers can be stacked:
//! - `.wh.<name>` removes `<name>` left by a lower layer
//! - `.wh..wh..opq` empties the directory it sits in of lower-layer content
//!
//! Entries written by the same archive are never hidden by its own whiteouts.
//! Directory mtimes are restored after the last entry.

use filetime::FileTime;
use flate2::read::GzDecoder;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use tar::Archive;
use tracing::{debug, trace, warn};

use crate::{Error, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const WHITEOUT_PREFIX: &str = ".wh.";
const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

/// Counters for one extracted archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractReport {
    /// Entries read from the archive.
    pub entries: usize,
    /// Entries refused because their path would leave the destination.
    pub skipped: usize,
    /// Entries that could not be written.
    pub failed: usize,
    /// Whiteout markers applied.
    pub whiteouts: usize,
}

impl ExtractReport {
    /// Whether every entry was applied.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.skipped == 0 && self.failed == 0
    }
}

/// Extract a layer archive into `dest`.
///
/// Fails without touching `dest` when `source` cannot be opened, and fails
/// when the archive stream itself is corrupt. Failures of individual entries
/// are logged and counted in the report instead.
pub fn extract_tar_gz(source: &Path, dest: &Path) -> Result<ExtractReport> {
    debug!(?source, ?dest, "Extracting layer");

    let mut file = File::open(source).map_err(|e| Error::archive_open(source, e))?;
    let compressed = sniff_gzip(&mut file).map_err(|e| Error::archive_open(source, e))?;

    fs::create_dir_all(dest)?;

    let reader = BufReader::new(file);
    let report = if compressed {
        unpack(Archive::new(GzDecoder::new(reader)), source, dest)?
    } else {
        trace!(?source, "Layer is not gzip-compressed, reading as plain tar");
        unpack(Archive::new(reader), source, dest)?
    };

    debug!(
        ?source,
        entries = report.entries,
        skipped = report.skipped,
        failed = report.failed,
        whiteouts = report.whiteouts,
        "Extracted layer"
    );
    Ok(report)
}

/// Run [`extract_tar_gz`] on the blocking thread pool.
pub async fn extract_layer(source: PathBuf, dest: PathBuf) -> Result<ExtractReport> {
    tokio::task::spawn_blocking(move || extract_tar_gz(&source, &dest))
        .await
        .map_err(|e| Error::Join(e.to_string()))?
}

fn sniff_gzip(file: &mut File) -> io::Result<bool> {
    let mut magic = Vec::with_capacity(GZIP_MAGIC.len());
    file.by_ref().take(GZIP_MAGIC.len() as u64).read_to_end(&mut magic)?;
    file.seek(SeekFrom::Start(0))?;
    Ok(magic == GZIP_MAGIC)
}

fn unpack<R: Read>(mut archive: Archive<R>, source: &Path, dest: &Path) -> Result<ExtractReport> {
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    archive.set_unpack_xattrs(true);
    archive.set_overwrite(true);

    let mut report = ExtractReport::default();
    let mut layer = LayerPaths::default();
    let mut directories = Vec::new();
    let entries = archive
        .entries()
        .map_err(|e| Error::archive(source, e.to_string()))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| Error::archive(source, e.to_string()))?;
        report.entries += 1;

        let stored = match entry.path() {
            Ok(path) => path.into_owned(),
            Err(e) => {
                warn!(?source, error = %e, "Unreadable entry path");
                report.failed += 1;
                continue;
            }
        };

        let Some(relative) = sanitize_entry_path(&stored) else {
            warn!(path = %stored.display(), "Skipping entry that escapes the destination");
            report.skipped += 1;
            continue;
        };

        if let Some(whiteout) = Whiteout::parse(&relative) {
            match whiteout.apply(dest, &layer) {
                Ok(()) => report.whiteouts += 1,
                Err(e) => {
                    warn!(path = %relative.display(), error = %e, "Failed to apply whiteout");
                    report.failed += 1;
                }
            }
            continue;
        }

        trace!(path = %relative.display(), "Unpacking entry");
        match entry.unpack_in(dest) {
            Ok(true) => {
                if entry.header().entry_type().is_dir() {
                    if let Ok(mtime) = entry.header().mtime() {
                        directories.push((relative.clone(), mtime));
                    }
                }
                layer.insert(relative);
            }
            Ok(false) => {
                warn!(path = %stored.display(), "Entry refused by unpacker");
                report.skipped += 1;
            }
            Err(e) => {
                warn!(path = %stored.display(), error = %e, "Failed to unpack entry");
                report.failed += 1;
            }
        }
    }

    restore_directory_mtimes(dest, directories);
    Ok(report)
}

/// Set directory mtimes once nothing more is written below them.
///
/// Children are written after their directory entry, which bumps the
/// directory's mtime, so the archived value is applied last, deepest first.
fn restore_directory_mtimes(dest: &Path, mut directories: Vec<(PathBuf, u64)>) {
    directories.sort_by_key(|(path, _)| std::cmp::Reverse(path.components().count()));
    for (relative, mtime) in directories {
        let path = dest.join(&relative);
        let time = FileTime::from_unix_time(i64::try_from(mtime).unwrap_or(i64::MAX), 0);
        if let Err(e) = filetime::set_file_mtime(&path, time) {
            warn!(path = %relative.display(), error = %e, "Failed to restore directory mtime");
        }
    }
}

/// Paths written by the archive currently being extracted.
///
/// Whiteouts only hide content of lower layers, so anything recorded here
/// survives them.
#[derive(Debug, Default)]
struct LayerPaths {
    written: HashSet<PathBuf>,
    ancestors: HashSet<PathBuf>,
}

impl LayerPaths {
    fn insert(&mut self, relative: PathBuf) {
        let mut parent = relative.parent();
        while let Some(dir) = parent.filter(|p| !p.as_os_str().is_empty()) {
            if !self.ancestors.insert(dir.to_path_buf()) {
                break;
            }
            parent = dir.parent();
        }
        self.written.insert(relative);
    }

    fn contains(&self, relative: &Path) -> bool {
        self.written.contains(relative) || self.ancestors.contains(relative)
    }
}

/// Reduce an archive path to a path relative to the destination.
///
/// Returns `None` if the path contains a `..` component. An entry naming the
/// archive root (`./`) maps to the empty path.
#[must_use]
pub fn sanitize_entry_path(path: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => return None,
        }
    }
    Some(clean)
}

#[derive(Debug, PartialEq, Eq)]
enum Whiteout {
    /// Remove everything below this directory.
    Opaque(PathBuf),
    /// Remove this path.
    Remove(PathBuf),
}

impl Whiteout {
    fn parse(relative: &Path) -> Option<Self> {
        let name = relative.file_name()?.to_str()?;
        let parent = relative.parent().unwrap_or_else(|| Path::new(""));

        if name == OPAQUE_WHITEOUT {
            return Some(Self::Opaque(parent.to_path_buf()));
        }
        let target = name.strip_prefix(WHITEOUT_PREFIX)?;
        if matches!(target, "" | "." | "..") {
            return None;
        }
        Some(Self::Remove(parent.join(target)))
    }

    fn apply(&self, dest: &Path, layer: &LayerPaths) -> io::Result<()> {
        match self {
            Self::Opaque(dir) => {
                let full = dest.join(dir);
                if !full.is_dir() || !is_within(dest, &full)? {
                    return Ok(());
                }
                clear_lower(dest, dir, layer)
            }
            Self::Remove(target) => {
                if layer.contains(target) {
                    return Ok(());
                }
                let full = dest.join(target);
                let Some(parent) = full.parent() else {
                    return Ok(());
                };
                if !parent.is_dir() || !is_within(dest, parent)? {
                    return Ok(());
                }
                match remove_path(&full) {
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                    other => other,
                }
            }
        }
    }
}

/// Remove everything below `dir` that the current layer did not write.
fn clear_lower(dest: &Path, dir: &Path, layer: &LayerPaths) -> io::Result<()> {
    for child in fs::read_dir(dest.join(dir))? {
        let child = child?;
        let relative = dir.join(child.file_name());
        if !layer.contains(&relative) {
            remove_path(&child.path())?;
        } else if child.file_type()?.is_dir() {
            clear_lower(dest, &relative, layer)?;
        }
    }
    Ok(())
}

// Symlinks left by lower layers must not redirect a whiteout outside `dest`.
fn is_within(dest: &Path, dir: &Path) -> io::Result<bool> {
    Ok(dir.canonicalize()?.starts_with(dest.canonicalize()?))
}

fn remove_path(path: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tar::{Builder, EntryType, Header};
    use tempfile::TempDir;

    enum Fixture<'a> {
        File(&'a str, &'a [u8]),
        Dir(&'a str),
        Symlink(&'a str, &'a str),
        // Name written straight into the header, bypassing the builder's checks.
        RawFile(&'a [u8], &'a [u8]),
    }

    fn build_tar(entries: &[Fixture<'_>]) -> Vec<u8> {
        let mut builder = Builder::new(Vec::new());
        for entry in entries {
            let mut header = Header::new_gnu();
            match entry {
                Fixture::File(path, content) => {
                    header.set_path(path).unwrap();
                    header.set_size(content.len() as u64);
                    header.set_mode(0o640);
                    header.set_mtime(1_600_000_000);
                    header.set_cksum();
                    builder.append(&header, *content).unwrap();
                }
                Fixture::Dir(path) => {
                    header.set_path(path).unwrap();
                    header.set_entry_type(EntryType::Directory);
                    header.set_size(0);
                    header.set_mode(0o755);
                    header.set_mtime(1_500_000_000);
                    header.set_cksum();
                    builder.append(&header, io::empty()).unwrap();
                }
                Fixture::Symlink(path, target) => {
                    header.set_path(path).unwrap();
                    header.set_entry_type(EntryType::Symlink);
                    header.set_link_name(target).unwrap();
                    header.set_size(0);
                    header.set_mode(0o777);
                    header.set_cksum();
                    builder.append(&header, io::empty()).unwrap();
                }
                Fixture::RawFile(name, content) => {
                    header.as_old_mut().name[..name.len()].copy_from_slice(name);
                    header.set_size(content.len() as u64);
                    header.set_mode(0o644);
                    header.set_cksum();
                    builder.append(&header, *content).unwrap();
                }
            }
        }
        builder.into_inner().unwrap()
    }

    fn write_layer(dir: &Path, name: &str, entries: &[Fixture<'_>]) -> PathBuf {
        let path = dir.join(name);
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        io::Write::write_all(&mut encoder, &build_tar(entries)).unwrap();
        encoder.finish().unwrap();
        path
    }

    #[test]
    fn test_extract_layer_files() -> Result<()> {
        let temp = TempDir::new()?;
        let layer = write_layer(
            temp.path(),
            "layer-0.tar.gz",
            &[
                Fixture::Dir("usr/"),
                Fixture::Dir("usr/bin/"),
                Fixture::File("usr/bin/app", b"binary"),
                Fixture::File("etc/config", b"key=value"),
            ],
        );
        let dest = temp.path().join("rootfs");

        let report = extract_tar_gz(&layer, &dest)?;

        assert_eq!(report.entries, 4);
        assert!(report.is_clean());
        assert_eq!(fs::read(dest.join("usr/bin/app"))?, b"binary");
        assert_eq!(fs::read_to_string(dest.join("etc/config"))?, "key=value");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_preserves_mode_and_mtime() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new()?;
        let layer = write_layer(temp.path(), "l.tar.gz", &[Fixture::File("data", b"x")]);
        let dest = temp.path().join("out");

        extract_tar_gz(&layer, &dest)?;

        let metadata = fs::metadata(dest.join("data"))?;
        assert_eq!(metadata.permissions().mode() & 0o777, 0o640);
        let mtime = metadata.modified()?.duration_since(std::time::UNIX_EPOCH).unwrap();
        assert_eq!(mtime.as_secs(), 1_600_000_000);
        Ok(())
    }

    #[test]
    fn test_extract_missing_source_creates_nothing() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("output");

        let result = extract_tar_gz(Path::new("/non/existent/file.tar.gz"), &dest);

        assert!(matches!(result, Err(Error::ArchiveOpen { .. })));
        assert!(!dest.exists());
    }

    #[test]
    fn test_extract_corrupt_archive_fails() {
        let temp = TempDir::new().unwrap();
        let layer = temp.path().join("corrupt.tar.gz");
        fs::write(&layer, [0x1f, 0x8b, 0x08, 0x00, 0xde, 0xad, 0xbe, 0xef]).unwrap();

        let result = extract_tar_gz(&layer, &temp.path().join("out"));

        assert!(matches!(result, Err(Error::Archive { .. })));
    }

    #[test]
    fn test_extract_plain_tar() -> Result<()> {
        let temp = TempDir::new()?;
        let layer = temp.path().join("layer.tar");
        fs::write(&layer, build_tar(&[Fixture::File("hello.txt", b"plain")]))?;
        let dest = temp.path().join("out");

        let report = extract_tar_gz(&layer, &dest)?;

        assert_eq!(report.entries, 1);
        assert_eq!(fs::read(dest.join("hello.txt"))?, b"plain");
        Ok(())
    }

    #[test]
    fn test_extract_rejects_parent_traversal() -> Result<()> {
        let temp = TempDir::new()?;
        let layer = write_layer(
            temp.path(),
            "evil.tar.gz",
            &[
                Fixture::RawFile(b"../escaped.txt", b"evil"),
                Fixture::RawFile(b"ok/../../also-escaped.txt", b"evil"),
                Fixture::File("safe.txt", b"fine"),
            ],
        );
        let dest = temp.path().join("out");

        let report = extract_tar_gz(&layer, &dest)?;

        assert_eq!(report.entries, 3);
        assert_eq!(report.skipped, 2);
        assert!(!temp.path().join("escaped.txt").exists());
        assert!(!temp.path().join("also-escaped.txt").exists());
        assert!(dest.join("safe.txt").exists());
        Ok(())
    }

    #[test]
    fn test_extract_strips_absolute_paths() -> Result<()> {
        let temp = TempDir::new()?;
        let layer = write_layer(
            temp.path(),
            "abs.tar.gz",
            &[Fixture::RawFile(b"/etc/absolute.conf", b"rooted")],
        );
        let dest = temp.path().join("out");

        let report = extract_tar_gz(&layer, &dest)?;

        assert!(report.is_clean());
        assert_eq!(fs::read(dest.join("etc/absolute.conf"))?, b"rooted");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_symlink() -> Result<()> {
        let temp = TempDir::new()?;
        let layer = write_layer(
            temp.path(),
            "link.tar.gz",
            &[
                Fixture::File("bin/busybox", b"bb"),
                Fixture::Symlink("bin/sh", "busybox"),
            ],
        );
        let dest = temp.path().join("out");

        extract_tar_gz(&layer, &dest)?;

        assert_eq!(fs::read_link(dest.join("bin/sh"))?, PathBuf::from("busybox"));
        assert_eq!(fs::read(dest.join("bin/sh"))?, b"bb");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_refuses_write_through_escaping_symlink() -> Result<()> {
        let temp = TempDir::new()?;
        let outside = temp.path().join("outside");
        fs::create_dir_all(&outside)?;
        let outside_str = outside.to_string_lossy().to_string();
        let layer = write_layer(
            temp.path(),
            "escape.tar.gz",
            &[
                Fixture::Symlink("escape", &outside_str),
                Fixture::File("escape/pwned", b"gotcha"),
            ],
        );
        let dest = temp.path().join("out");

        let report = extract_tar_gz(&layer, &dest)?;

        assert_eq!(report.entries, 2);
        assert_eq!(report.failed, 1);
        assert!(!outside.join("pwned").exists());
        Ok(())
    }

    #[test]
    fn test_whiteouts_remove_lower_layer_content() -> Result<()> {
        let temp = TempDir::new()?;
        let lower = write_layer(
            temp.path(),
            "layer-0.tar.gz",
            &[
                Fixture::File("etc/keep", b"k"),
                Fixture::File("etc/drop", b"d"),
                Fixture::File("var/cache/a", b"a"),
                Fixture::File("var/cache/b", b"b"),
            ],
        );
        let upper = write_layer(
            temp.path(),
            "layer-1.tar.gz",
            &[
                Fixture::File("etc/.wh.drop", b""),
                Fixture::File("var/cache/.wh..wh..opq", b""),
                Fixture::File("var/cache/c", b"c"),
            ],
        );
        let dest = temp.path().join("rootfs");

        extract_tar_gz(&lower, &dest)?;
        let report = extract_tar_gz(&upper, &dest)?;

        assert_eq!(report.whiteouts, 2);
        assert!(dest.join("etc/keep").exists());
        assert!(!dest.join("etc/drop").exists());
        assert!(!dest.join("etc/.wh.drop").exists());
        assert!(!dest.join("var/cache/a").exists());
        assert!(!dest.join("var/cache/b").exists());
        assert!(dest.join("var/cache/c").exists());
        assert!(!dest.join("var/cache/.wh..wh..opq").exists());
        Ok(())
    }

    #[test]
    fn test_opaque_whiteout_keeps_same_layer_entries() -> Result<()> {
        let temp = TempDir::new()?;
        let lower = write_layer(
            temp.path(),
            "layer-0.tar.gz",
            &[Fixture::File("var/old", b"o"), Fixture::File("var/lib/stale", b"s")],
        );
        let upper = write_layer(
            temp.path(),
            "layer-1.tar.gz",
            &[
                Fixture::File("var/new", b"n"),
                Fixture::Dir("var/lib/"),
                Fixture::File("var/lib/fresh", b"f"),
                Fixture::File("var/.wh..wh..opq", b""),
            ],
        );
        let dest = temp.path().join("rootfs");

        extract_tar_gz(&lower, &dest)?;
        let report = extract_tar_gz(&upper, &dest)?;

        assert_eq!(report.whiteouts, 1);
        assert!(report.is_clean());
        assert_eq!(fs::read(dest.join("var/new"))?, b"n");
        assert_eq!(fs::read(dest.join("var/lib/fresh"))?, b"f");
        assert!(!dest.join("var/old").exists());
        assert!(!dest.join("var/lib/stale").exists());
        Ok(())
    }

    #[test]
    fn test_whiteout_after_same_layer_sibling_keeps_it() -> Result<()> {
        let temp = TempDir::new()?;
        let lower = write_layer(temp.path(), "layer-0.tar.gz", &[Fixture::File("etc/old", b"o")]);
        let upper = write_layer(
            temp.path(),
            "layer-1.tar.gz",
            &[
                Fixture::File("etc/motd", b"hello"),
                Fixture::File("etc/.wh.motd", b""),
                Fixture::File("etc/.wh.old", b""),
            ],
        );
        let dest = temp.path().join("rootfs");

        extract_tar_gz(&lower, &dest)?;
        let report = extract_tar_gz(&upper, &dest)?;

        assert_eq!(report.whiteouts, 2);
        assert_eq!(fs::read(dest.join("etc/motd"))?, b"hello");
        assert!(!dest.join("etc/old").exists());
        Ok(())
    }

    #[test]
    fn test_directory_mtime_survives_children() -> Result<()> {
        let temp = TempDir::new()?;
        let layer = write_layer(
            temp.path(),
            "l.tar.gz",
            &[
                Fixture::Dir("usr/"),
                Fixture::Dir("usr/bin/"),
                Fixture::File("usr/bin/app", b"binary"),
                Fixture::File("usr/readme", b"r"),
            ],
        );
        let dest = temp.path().join("out");

        extract_tar_gz(&layer, &dest)?;

        for dir in ["usr", "usr/bin"] {
            let mtime = fs::metadata(dest.join(dir))?
                .modified()?
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap();
            assert_eq!(mtime.as_secs(), 1_500_000_000, "{dir}");
        }
        Ok(())
    }

    #[test]
    fn test_dot_whiteout_names_are_not_whiteouts() -> Result<()> {
        let temp = TempDir::new()?;
        let layer = write_layer(
            temp.path(),
            "l.tar.gz",
            &[Fixture::File("etc/keep", b"k"), Fixture::File("etc/.wh..", b"")],
        );
        let dest = temp.path().join("out");

        let report = extract_tar_gz(&layer, &dest)?;

        assert_eq!(report.whiteouts, 0);
        assert!(report.is_clean());
        assert!(dest.join("etc/keep").exists());
        Ok(())
    }

    #[test]
    fn test_whiteout_for_missing_target_is_harmless() -> Result<()> {
        let temp = TempDir::new()?;
        let layer = write_layer(
            temp.path(),
            "l.tar.gz",
            &[Fixture::Dir("etc/"), Fixture::File("etc/.wh.never-existed", b"")],
        );

        let report = extract_tar_gz(&layer, &temp.path().join("out"))?;

        assert_eq!(report.whiteouts, 1);
        assert!(report.is_clean());
        Ok(())
    }

    #[tokio::test]
    async fn test_extract_layer_async() -> Result<()> {
        let temp = TempDir::new()?;
        let layer = write_layer(temp.path(), "l.tar.gz", &[Fixture::File("a", b"1")]);
        let dest = temp.path().join("out");

        let report = extract_layer(layer, dest.clone()).await?;

        assert_eq!(report.entries, 1);
        assert!(dest.join("a").exists());
        Ok(())
    }

    #[test]
    fn test_sanitize_entry_path() {
        assert_eq!(
            sanitize_entry_path(Path::new("./usr/bin/app")),
            Some(PathBuf::from("usr/bin/app"))
        );
        assert_eq!(
            sanitize_entry_path(Path::new("/etc/passwd")),
            Some(PathBuf::from("etc/passwd"))
        );
        assert_eq!(sanitize_entry_path(Path::new("./")), Some(PathBuf::new()));
        assert_eq!(sanitize_entry_path(Path::new("a/../b")), None);
        assert_eq!(sanitize_entry_path(Path::new("../x")), None);
    }

    #[test]
    fn test_whiteout_parse() {
        assert_eq!(
            Whiteout::parse(Path::new("etc/.wh.hosts")),
            Some(Whiteout::Remove(PathBuf::from("etc/hosts")))
        );
        assert_eq!(
            Whiteout::parse(Path::new("var/.wh..wh..opq")),
            Some(Whiteout::Opaque(PathBuf::from("var")))
        );
        assert_eq!(
            Whiteout::parse(Path::new(".wh.top")),
            Some(Whiteout::Remove(PathBuf::from("top")))
        );
        assert_eq!(Whiteout::parse(Path::new("etc/hosts")), None);
        assert_eq!(Whiteout::parse(Path::new("etc/.wh.")), None);
        assert_eq!(Whiteout::parse(Path::new("etc/.wh..")), None);
        assert_eq!(Whiteout::parse(Path::new("etc/.wh...")), None);
    }
}
