use std::fs::File;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};
use tempfile::TempDir;

/// Builder for bundle directories and archives
pub struct BundleBuilder {
    files: Vec<(String, String)>,
}

impl BundleBuilder {
    pub fn new() -> Self {
        Self { files: Vec::new() }
    }

    pub fn with_module(mut self, path: &str, source: &str) -> Self {
        self.files.push((path.to_string(), source.to_string()));
        self
    }

    /// `data.json` under the relative directory `dir` ("" for the root)
    pub fn with_data(mut self, dir: &str, data: Value) -> Self {
        let path = if dir.is_empty() {
            "data.json".to_string()
        } else {
            format!("{dir}/data.json")
        };
        self.files.push((path, data.to_string()));
        self
    }

    /// Write the bundle as a directory `name` under `root`.
    pub fn write_dir(&self, root: &TempDir, name: &str) -> PathBuf {
        let base = root.path().join(name);
        for (path, contents) in &self.files {
            let target = base.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).expect("Failed to create bundle directory");
            }
            std::fs::write(&target, contents).expect("Failed to write bundle file");
        }
        base
    }

    /// Write the bundle as `name` (a .tar.gz archive) under `root`.
    pub fn write_archive(&self, root: &TempDir, name: &str) -> PathBuf {
        let target = root.path().join(name);
        let file = File::create(&target).expect("Failed to create archive");
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for (path, contents) in &self.files {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            builder
                .append_data(&mut header, Path::new(".").join(path), contents.as_bytes())
                .expect("Failed to append archive entry");
        }
        builder
            .into_inner()
            .and_then(|gz| gz.finish())
            .expect("Failed to finish archive");
        target
    }
}

/// Builder for entries of the JSON entity format
pub struct EntityBuilder {
    entity_type: String,
    id: String,
    attrs: serde_json::Map<String, Value>,
    parents: Vec<Value>,
}

impl EntityBuilder {
    pub fn new(entity_type: &str, id: &str) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
            attrs: serde_json::Map::new(),
            parents: Vec::new(),
        }
    }

    pub fn with_attr(mut self, name: &str, value: Value) -> Self {
        self.attrs.insert(name.to_string(), value);
        self
    }

    pub fn with_parent(mut self, entity_type: &str, id: &str) -> Self {
        self.parents.push(json!({"type": entity_type, "id": id}));
        self
    }

    pub fn build(self) -> Value {
        json!({
            "uid": {"type": self.entity_type, "id": self.id},
            "attrs": self.attrs,
            "parents": self.parents,
        })
    }
}

/// Serialize entities into the document `add_entities` expects
pub fn entities_json(entities: Vec<EntityBuilder>) -> String {
    Value::Array(entities.into_iter().map(EntityBuilder::build).collect()).to_string()
}
