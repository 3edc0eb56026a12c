use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::PaplError;
use crate::store::StoreKind;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub store: Store,
    pub rules: Rules,
    pub authz: Authz,
    pub logging: Logging,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    pub kind: StoreKind,
    /// SQLite file used when `kind = "file"`. Default: data/papl.db
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rules {
    /// Bundles (directories or .tar.gz archives) loaded at startup
    #[serde(default)]
    pub bundles: Vec<PathBuf>,
    /// JSON documents merged into `data` at startup
    #[serde(default)]
    pub data: Vec<PathBuf>,
    /// Raise builtin failures as errors instead of treating them as undefined
    #[serde(default = "default_strict")]
    pub strict: bool,
}

fn default_strict() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Authz {
    /// A .cedar file or a directory of them
    pub policies: Option<PathBuf>,
    /// Entity store in the JSON entity format
    pub entities: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    /// Default filter when RUST_LOG is unset
    pub level: String,
}

impl Default for Store {
    fn default() -> Self {
        Self {
            kind: StoreKind::Memory,
            path: PathBuf::from("data/papl.db"),
        }
    }
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            bundles: Vec::new(),
            data: Vec::new(),
            strict: default_strict(),
        }
    }
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Settings {
    pub fn load(path: &str) -> Result<Self, PaplError> {
        let mut builder = config::Config::builder()
            .set_default("store.kind", Store::default().kind.to_string())?
            .set_default(
                "store.path",
                Store::default().path.to_string_lossy().to_string(),
            )?
            .set_default("rules.strict", Rules::default().strict)?
            .set_default("logging.level", Logging::default().level)?;

        // Optional file
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment overrides: PAPL__STORE__KIND=file, etc.
        builder = builder.add_source(config::Environment::with_prefix("PAPL").separator("__"));

        let cfg = builder.build()?;
        let mut s: Settings = cfg.try_deserialize()?;

        let cwd = std::env::current_dir()?;
        let absolute = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = cwd.join(&*p);
            }
        };
        absolute(&mut s.store.path);
        s.rules.bundles.iter_mut().for_each(absolute);
        s.rules.data.iter_mut().for_each(absolute);
        if let Some(p) = s.authz.policies.as_mut() {
            absolute(p);
        }
        if let Some(p) = s.authz.entities.as_mut() {
            absolute(p);
        }

        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_settings_load_defaults() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("nonexistent.toml");

        let settings = Settings::load(config_path.to_str().unwrap())
            .expect("Failed to load settings");

        assert_eq!(settings.store.kind, StoreKind::Memory);
        assert!(settings.store.path.ends_with("data/papl.db"));
        assert!(settings.rules.strict);
        assert!(settings.rules.bundles.is_empty());
        assert_eq!(settings.authz.policies, None);
    }

    #[test]
    fn test_settings_load_from_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("test_config.toml");

        let config_content = r#"
[store]
kind = "file"
path = "/var/lib/papl/store.db"

[rules]
bundles = ["/srv/bundles/main", "/srv/bundles/extra.tar.gz"]
strict = false

[authz]
policies = "/etc/papl/policies"

[logging]
level = "debug"
"#;
        fs::write(&config_path, config_content).expect("Failed to write config");

        let settings = Settings::load(config_path.to_str().unwrap())
            .expect("Failed to load settings");

        assert_eq!(settings.store.kind, StoreKind::File);
        assert_eq!(settings.store.path, PathBuf::from("/var/lib/papl/store.db"));
        assert_eq!(settings.rules.bundles.len(), 2);
        assert!(!settings.rules.strict);
        assert_eq!(settings.authz.policies, Some(PathBuf::from("/etc/papl/policies")));
    }

    #[test]
    fn test_settings_env_override() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("test_config.toml");

        let config_content = r#"
[logging]
level = "warn"
"#;
        fs::write(&config_path, config_content).expect("Failed to write config");

        env::set_var("PAPL__LOGGING__LEVEL", "trace");

        // Env should override file
        let settings = Settings::load(config_path.to_str().unwrap())
            .expect("Failed to load settings");

        assert_eq!(settings.logging.level, "trace");

        env::remove_var("PAPL__LOGGING__LEVEL");
    }

    #[test]
    fn test_settings_path_normalization() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("test_config.toml");

        let config_content = r#"
[store]
kind = "file"
path = "relative/store.db"

[authz]
entities = "relative/entities.json"
"#;
        fs::write(&config_path, config_content).expect("Failed to write config");

        let settings = Settings::load(config_path.to_str().unwrap())
            .expect("Failed to load settings");

        assert!(settings.store.path.is_absolute());
        assert!(settings.store.path.ends_with("relative/store.db"));
        let entities = settings.authz.entities.expect("entities path");
        assert!(entities.is_absolute());
        assert!(entities.ends_with("relative/entities.json"));
    }
}
