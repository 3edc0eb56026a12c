use std::path::{Path, PathBuf};

use crate::authz::errors::AuthzError;
use crate::authz::AuthorizationEngine;

const POLICY_EXTENSION: &str = "cedar";

/// Load policies from a single `.cedar` file or from every `.cedar` file in
/// a directory (sorted by path, non-recursive). Each file is one
/// `add_policy` call; returns the number of policies added.
pub fn load_policies(engine: &mut AuthorizationEngine, path: &Path) -> Result<usize, AuthzError> {
    let files = policy_files(path)?;

    let mut added = 0;
    for file in &files {
        let contents = read(file)?;
        added += engine.add_policy(&contents).map_err(|e| {
            tracing::warn!(file = %file.display(), error = %e, "Rejected policy file");
            e
        })?;
    }

    tracing::info!(
        files = files.len(),
        policies = added,
        path = %path.display(),
        "Loaded authorization policies"
    );

    Ok(added)
}

/// Replace the engine's entity store with the JSON document at `path`.
pub fn load_entities(engine: &mut AuthorizationEngine, path: &Path) -> Result<usize, AuthzError> {
    let contents = read(path)?;
    engine.add_entities(&contents)?;
    let count = engine.entities().len();
    tracing::info!(entities = count, path = %path.display(), "Loaded entities");
    Ok(count)
}

fn policy_files(path: &Path) -> Result<Vec<PathBuf>, AuthzError> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(AuthzError::PolicyLoadError {
            path: path.display().to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no such file or directory",
            ),
        });
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(path)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension()
                .map(|ext| ext == POLICY_EXTENSION)
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

fn read(path: &Path) -> Result<String, AuthzError> {
    std::fs::read_to_string(path).map_err(|source| AuthzError::PolicyLoadError {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::Decision;

    #[test]
    fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("10-permit.cedar"),
            r#"permit(principal, action == Action::"view", resource);"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("20-forbid.cedar"),
            r#"forbid(principal == User::"mallory", action, resource);"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("README.md"), "not a policy").unwrap();

        let mut engine = AuthorizationEngine::new();
        let count = load_policies(&mut engine, dir.path()).unwrap();
        assert_eq!(count, 2);
        assert_eq!(engine.policies()[0].id, "policy0");
        assert_eq!(engine.policies()[1].id, "policy1");

        let d = engine
            .decide_request(r#"User::"alice""#, r#"Action::"view""#, r#"Doc::"1""#, "{}")
            .unwrap();
        assert_eq!(d, Decision::Allow);
        let d = engine
            .decide_request(r#"User::"mallory""#, r#"Action::"view""#, r#"Doc::"1""#, "{}")
            .unwrap();
        assert_eq!(d, Decision::Deny);
    }

    #[test]
    fn test_load_single_file_and_entities() {
        let dir = tempfile::tempdir().unwrap();
        let policy = dir.path().join("admins.cedar");
        std::fs::write(&policy, r#"permit(principal in Group::"admins", action, resource);"#)
            .unwrap();
        let entities = dir.path().join("entities.json");
        std::fs::write(
            &entities,
            r#"[{"uid": {"type": "User", "id": "alice"}, "parents": [{"type": "Group", "id": "admins"}]}]"#,
        )
        .unwrap();

        let mut engine = AuthorizationEngine::new();
        assert_eq!(load_policies(&mut engine, &policy).unwrap(), 1);
        assert_eq!(load_entities(&mut engine, &entities).unwrap(), 1);
        let d = engine
            .decide_request(r#"User::"alice""#, r#"Action::"x""#, r#"Doc::"1""#, "{}")
            .unwrap();
        assert_eq!(d, Decision::Allow);
    }

    #[test]
    fn test_load_nonexistent_path() {
        let mut engine = AuthorizationEngine::new();
        let err = load_policies(&mut engine, Path::new("/nonexistent/path/policies")).unwrap_err();
        assert!(matches!(err, AuthzError::PolicyLoadError { .. }));
    }

    #[test]
    fn test_bad_file_keeps_earlier_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.cedar"), "permit(principal, action, resource);")
            .unwrap();
        std::fs::write(dir.path().join("b.cedar"), "permit(principal, action").unwrap();

        let mut engine = AuthorizationEngine::new();
        assert!(load_policies(&mut engine, dir.path()).is_err());
        assert_eq!(engine.policies().len(), 1);
    }
}
