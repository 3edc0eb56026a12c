use std::fs::File;
use std::io::Read;
use std::path::{Component, Path};

use flate2::read::GzDecoder;
use tar::Archive;
use walkdir::WalkDir;

use crate::rules::errors::RuleError;

const MODULE_EXTENSION: &str = "rego";
const DATA_FILE: &str = "data.json";

/// Raw contents of one bundle, not yet parsed.
#[derive(Debug, Default)]
pub(crate) struct Bundle {
    /// `(relative path, source)` of every module, in path order.
    pub modules: Vec<(String, String)>,
    /// `(directory segments, JSON text)` of every `data.json`.
    pub data: Vec<(Vec<String>, String)>,
}

impl Bundle {
    fn add(&mut self, segments: Vec<String>, contents: String) {
        let Some((file_name, dirs)) = segments.split_last() else {
            return;
        };
        if file_name == DATA_FILE {
            self.data.push((dirs.to_vec(), contents));
        } else if file_name.ends_with(&format!(".{MODULE_EXTENSION}")) {
            self.modules.push((segments.join("/"), contents));
        }
    }
}

/// Read a bundle from a directory (walked recursively), a `.tar.gz` /
/// `.tgz` archive or a single `.rego` file.
pub(crate) fn read_bundle(path: &Path) -> Result<Bundle, RuleError> {
    if path.is_dir() {
        return read_dir(path);
    }
    if !path.is_file() {
        return Err(RuleError::bundle(path.display(), "no such file or directory"));
    }
    let name = path.to_string_lossy();
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        return read_archive(path);
    }
    if path.extension().is_some_and(|ext| ext == MODULE_EXTENSION) {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| RuleError::bundle(path.display(), e.to_string()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        return Ok(Bundle {
            modules: vec![(name, contents)],
            data: Vec::new(),
        });
    }
    Err(RuleError::bundle(
        path.display(),
        "expected a directory, a .tar.gz archive or a .rego file",
    ))
}

fn read_dir(root: &Path) -> Result<Bundle, RuleError> {
    let mut bundle = Bundle::default();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| RuleError::bundle(root.display(), e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let segments = normal_segments(relative);
        if !is_bundle_file(&segments) {
            continue;
        }
        let contents = std::fs::read_to_string(entry.path())
            .map_err(|e| RuleError::bundle(entry.path().display(), e.to_string()))?;
        bundle.add(segments, contents);
    }
    bundle.data.sort();
    Ok(bundle)
}

fn read_archive(path: &Path) -> Result<Bundle, RuleError> {
    let fail = |e: std::io::Error| RuleError::bundle(path.display(), e.to_string());

    let file = File::open(path).map_err(fail)?;
    let mut archive = Archive::new(GzDecoder::new(file));

    let mut files = Vec::new();
    for entry in archive.entries().map_err(fail)? {
        let mut entry = entry.map_err(fail)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let segments = normal_segments(&entry.path().map_err(fail)?);
        if !is_bundle_file(&segments) {
            continue;
        }
        let mut contents = String::new();
        entry.read_to_string(&mut contents).map_err(fail)?;
        files.push((segments, contents));
    }
    files.sort();

    let mut bundle = Bundle::default();
    for (segments, contents) in files {
        bundle.add(segments, contents);
    }
    Ok(bundle)
}

/// Path segments with `.`, `..` and root components dropped, so
/// `./a/b.rego` and `/a/b.rego` both read as `a/b.rego`.
fn normal_segments(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

fn is_bundle_file(segments: &[String]) -> bool {
    match segments.last() {
        Some(name) => {
            name == DATA_FILE || name.ends_with(&format!(".{MODULE_EXTENSION}"))
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;

    #[test]
    fn test_read_directory_bundle() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("app/roles")).unwrap();
        std::fs::write(dir.path().join("app/policy.rego"), "package app\nallow := true").unwrap();
        std::fs::write(dir.path().join("app/roles/data.json"), r#"{"admin": true}"#).unwrap();
        std::fs::write(dir.path().join("data.json"), r#"{"top": 1}"#).unwrap();
        std::fs::write(dir.path().join("README.md"), "ignored").unwrap();

        let bundle = read_bundle(dir.path()).unwrap();
        assert_eq!(bundle.modules.len(), 1);
        assert_eq!(bundle.modules[0].0, "app/policy.rego");
        let dirs: Vec<_> = bundle.data.iter().map(|(d, _)| d.join("/")).collect();
        assert_eq!(dirs, vec!["", "app/roles"]);
    }

    #[test]
    fn test_read_archive_bundle() {
        let dir = TempDir::new().unwrap();
        let archive_path = dir.path().join("bundle.tar.gz");
        {
            let file = File::create(&archive_path).unwrap();
            let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
            for (name, body) in [
                ("./x/policy.rego", "package x\np := 1"),
                ("./x/data.json", r#"{"k": "v"}"#),
            ] {
                let mut header = tar::Header::new_gnu();
                header.set_size(body.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder.append_data(&mut header, name, body.as_bytes()).unwrap();
            }
            builder.into_inner().unwrap().finish().unwrap();
        }

        let bundle = read_bundle(&archive_path).unwrap();
        assert_eq!(bundle.modules, vec![("x/policy.rego".to_string(), "package x\np := 1".to_string())]);
        assert_eq!(bundle.data, vec![(vec!["x".to_string()], r#"{"k": "v"}"#.to_string())]);
    }

    #[test]
    fn test_missing_path() {
        let err = read_bundle(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, RuleError::Bundle { .. }));
    }
}
