//! Archive extraction for downloaded artifacts.
//!
//! These are blocking functions; installers run them on the blocking pool.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use xz2::read::XzDecoder;

use crate::resource::ArchiveType;

/// Unpacks `archive` into `dest` according to its type. A `Raw` artifact
/// is copied into `dest` under `binary_name` and marked executable.
pub fn extract(
    archive: &Path,
    dest: &Path,
    archive_type: ArchiveType,
    binary_name: &str,
) -> std::io::Result<()> {
    std::fs::create_dir_all(dest)?;
    match archive_type {
        ArchiveType::TarGz => {
            let file = BufReader::new(File::open(archive)?);
            tar::Archive::new(GzDecoder::new(file)).unpack(dest)
        }
        ArchiveType::TarXz => {
            let file = BufReader::new(File::open(archive)?);
            tar::Archive::new(XzDecoder::new(file)).unpack(dest)
        }
        ArchiveType::Zip => {
            let file = File::open(archive)?;
            let mut zip = zip::ZipArchive::new(file)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            zip.extract(dest)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        }
        ArchiveType::Raw => {
            let target = dest.join(binary_name);
            std::fs::copy(archive, &target)?;
            mark_executable(&target)
        }
    }
}

/// Finds an extracted binary by name: directly under `root`, under
/// `root/bin`, under a single top-level directory (the common
/// `name-version/` archive layout), or anywhere below as a last resort.
pub fn find_binary(root: &Path, name: &str) -> Option<PathBuf> {
    let direct = root.join(name);
    if direct.is_file() {
        return Some(direct);
    }
    let under_bin = root.join("bin").join(name);
    if under_bin.is_file() {
        return Some(under_bin);
    }
    search_below(root, name, 4)
}

fn search_below(dir: &Path, name: &str, depth: usize) -> Option<PathBuf> {
    if depth == 0 {
        return None;
    }
    let entries = std::fs::read_dir(dir).ok()?;
    let mut subdirs = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() && path.file_name().is_some_and(|f| f == name) {
            return Some(path);
        }
        if path.is_dir() {
            subdirs.push(path);
        }
    }
    subdirs.sort();
    for sub in subdirs {
        if let Some(found) = search_below(&sub, name, depth - 1) {
            return Some(found);
        }
    }
    None
}

/// Replaces `link` with a symlink to `target`.
pub fn place_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    if let Some(parent) = link.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::symlink_metadata(link) {
        Ok(_) => std::fs::remove_file(link)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(target, link)
    }
    #[cfg(not(unix))]
    {
        std::fs::copy(target, link).map(|_| ())
    }
}

pub fn mark_executable(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path)?.permissions();
        perms.set_mode(perms.mode() | 0o755);
        std::fs::set_permissions(path, perms)?;
    }
    let _ = path;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tar_gz(dest: &Path, entries: &[(&str, &str)]) {
        let file = File::create(dest).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, body) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append_data(&mut header, name, body.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn extracts_tar_gz_and_finds_nested_binary() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("rg.tar.gz");
        write_tar_gz(&archive, &[("ripgrep-14.0.0/rg", "#!/bin/sh\necho rg\n")]);

        let dest = dir.path().join("out");
        extract(&archive, &dest, ArchiveType::TarGz, "rg").unwrap();

        let found = find_binary(&dest, "rg").unwrap();
        assert!(found.ends_with("ripgrep-14.0.0/rg"));
    }

    #[test]
    fn raw_artifacts_are_copied_and_executable() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("download");
        let mut f = File::create(&artifact).unwrap();
        f.write_all(b"#!/bin/sh\n").unwrap();

        let dest = dir.path().join("out");
        extract(&artifact, &dest, ArchiveType::Raw, "rg").unwrap();
        let placed = dest.join("rg");
        assert!(placed.is_file());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            assert_ne!(std::fs::metadata(&placed).unwrap().permissions().mode() & 0o111, 0);
        }
    }

    #[test]
    fn symlinks_replace_existing_links() {
        let dir = tempfile::tempdir().unwrap();
        let target_a = dir.path().join("a");
        let target_b = dir.path().join("b");
        std::fs::write(&target_a, "a").unwrap();
        std::fs::write(&target_b, "b").unwrap();

        let link = dir.path().join("bin").join("tool");
        place_symlink(&target_a, &link).unwrap();
        place_symlink(&target_b, &link).unwrap();
        assert_eq!(std::fs::read_to_string(&link).unwrap(), "b");
    }
}
