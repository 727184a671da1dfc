//! Locating and validating database dump files.

use std::fs::File;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use glob::Pattern;
use tracing::debug;

use crate::error::{OpsError, Result};

/// Dumps below the search root are only picked up this many directories deep.
const MAX_SEARCH_DEPTH: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

impl DumpFile {
    fn from_path(path: PathBuf) -> Option<Self> {
        let meta = path.metadata().ok()?;
        if !meta.is_file() {
            return None;
        }
        Some(Self {
            size: meta.len(),
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            path,
        })
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    pub fn modified_date(&self) -> String {
        DateTime::<Local>::from(self.modified)
            .format("%Y-%m-%d")
            .to_string()
    }
}

/// Finds `<prefix>*.db` under `root` (at most three directories deep) and
/// directly inside `home`, newest first.
pub fn find_dump_files(prefix: &str, root: &Path, home: Option<&Path>) -> Result<Vec<DumpFile>> {
    let file_pattern = format!("{}*.db", Pattern::escape(prefix));
    let mut found: Vec<DumpFile> = Vec::new();

    let recursive = format!(
        "{}/**/{file_pattern}",
        Pattern::escape(&root.to_string_lossy())
    );
    for entry in glob::glob(&recursive).map_err(|err| OpsError::InvalidInput(err.to_string()))? {
        let path = match entry {
            Ok(path) => path,
            Err(err) => {
                debug!(error = %err, "Skipping unreadable path during dump search");
                continue;
            }
        };
        let depth = path
            .strip_prefix(root)
            .map(|rel| rel.components().filter(|c| matches!(c, Component::Normal(_))).count())
            .unwrap_or(usize::MAX);
        if depth > MAX_SEARCH_DEPTH + 1 {
            continue;
        }
        if let Some(dump) = DumpFile::from_path(path) {
            found.push(dump);
        }
    }

    if let Some(home) = home {
        let flat = format!("{}/{file_pattern}", Pattern::escape(&home.to_string_lossy()));
        for path in glob::glob(&flat)
            .map_err(|err| OpsError::InvalidInput(err.to_string()))?
            .flatten()
        {
            if let Some(dump) = DumpFile::from_path(path) {
                found.push(dump);
            }
        }
    }

    found.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.path.cmp(&b.path)));
    found.dedup_by(|a, b| same_file(&a.path, &b.path));
    Ok(found)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Resolves a user-supplied dump path: absolute paths are used as is,
/// relative ones are tried against `cwd` and then `home`. The result must
/// exist and be readable.
pub fn resolve_dump_path(input: &Path, cwd: &Path, home: Option<&Path>) -> Result<PathBuf> {
    let resolved = if input.is_absolute() {
        input.to_path_buf()
    } else if cwd.join(input).exists() {
        let joined = cwd.join(input);
        joined.canonicalize().unwrap_or(joined)
    } else if let Some(candidate) = home.map(|home| home.join(input)).filter(|p| p.exists()) {
        candidate
    } else {
        return Err(OpsError::NotFound(format!(
            "cannot find file '{}' in current directory or home directory",
            input.display()
        )));
    };

    if !resolved.exists() {
        return Err(OpsError::NotFound(format!(
            "file '{}' does not exist",
            resolved.display()
        )));
    }
    if File::open(&resolved).is_err() {
        return Err(OpsError::InvalidInput(format!(
            "file '{}' is not readable",
            resolved.display()
        )));
    }
    Ok(resolved)
}

/// Human-readable size with one decimal: `512.0B`, `1.5KB`, ... `2.0TB`.
pub fn human_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{size:.1}{unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1}TB")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    fn touch(path: &Path, bytes: usize, age_secs: u64) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, vec![0u8; bytes]).unwrap();
        let mtime = SystemTime::now() - Duration::from_secs(age_secs);
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();
    }

    #[test]
    fn finds_prefixed_dumps_newest_first_within_depth() {
        let root = tempfile::tempdir().unwrap();
        let home = tempfile::tempdir().unwrap();
        let r = root.path();

        touch(&r.join("wd3-stage-dump-202401010000.db"), 10, 300);
        touch(&r.join("a/b/c/wd3-stage-dump-deep.db"), 10, 200);
        touch(&r.join("a/b/c/d/wd3-stage-dump-too-deep.db"), 10, 100);
        touch(&r.join("billsen-stage-dump-1.db"), 10, 50);
        touch(&r.join("wd3-stage-dump-notes.txt"), 10, 50);
        touch(&home.path().join("wd3-stage-dump-home.db"), 10, 10);

        let found = find_dump_files("wd3-stage-dump", r, Some(home.path())).unwrap();
        let names: Vec<String> = found.iter().map(DumpFile::file_name).collect();
        assert_eq!(
            names,
            vec![
                "wd3-stage-dump-home.db",
                "wd3-stage-dump-deep.db",
                "wd3-stage-dump-202401010000.db",
            ]
        );
    }

    #[test]
    fn same_directory_as_home_is_not_listed_twice() {
        let root = tempfile::tempdir().unwrap();
        touch(&root.path().join("wd3-stage-dump-x.db"), 1, 1);
        let found = find_dump_files("wd3-stage-dump", root.path(), Some(root.path())).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn resolves_relative_paths_against_cwd_then_home() {
        let cwd = tempfile::tempdir().unwrap();
        let home = tempfile::tempdir().unwrap();
        touch(&home.path().join("only-home.db"), 1, 1);
        touch(&cwd.path().join("both.db"), 1, 1);
        touch(&home.path().join("both.db"), 1, 1);

        let resolved =
            resolve_dump_path(Path::new("only-home.db"), cwd.path(), Some(home.path())).unwrap();
        assert_eq!(resolved, home.path().join("only-home.db"));

        let resolved = resolve_dump_path(Path::new("both.db"), cwd.path(), Some(home.path())).unwrap();
        assert!(resolved.starts_with(cwd.path().canonicalize().unwrap()));

        let err = resolve_dump_path(Path::new("missing.db"), cwd.path(), Some(home.path()))
            .unwrap_err();
        assert!(matches!(err, OpsError::NotFound(_)));

        let err = resolve_dump_path(&cwd.path().join("absent.db"), cwd.path(), None).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn human_size_steps_through_units() {
        assert_eq!(human_size(512), "512.0B");
        assert_eq!(human_size(1536), "1.5KB");
        assert_eq!(human_size(5 * 1024 * 1024), "5.0MB");
        assert_eq!(human_size(3 * 1024u64.pow(4)), "3.0TB");
    }
}
