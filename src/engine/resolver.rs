//! Module path resolution
//!
//! Maps a loose module reference (directory, extension-less stem or file)
//! onto one existing source file. Only filesystem reads happen here.

use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;

use super::error::ResolutionError;

/// Recognized source extensions, in lookup order
pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["ts", "js", "mjs", "cjs"];

/// Base names tried inside a directory when no manifest entry applies
const CONVENTIONAL_ENTRYPOINTS: [&str; 3] = ["index", "user", "main"];

const MANIFEST_FILE: &str = "package.json";

#[derive(Deserialize)]
struct Manifest {
    main: Option<serde_json::Value>,
}

/// Resolve `input` to an absolute path of an existing module file.
pub fn resolve(input: &Path) -> Result<PathBuf, ResolutionError> {
    let absolute = absolutize(input);

    if !path_exists(&absolute) {
        return resolve_with_extensions(&absolute);
    }

    let metadata = fs::metadata(&absolute).map_err(|source| ResolutionError::Io {
        path: absolute.clone(),
        source,
    })?;

    if metadata.is_dir() {
        resolve_directory_entrypoint(&absolute)
    } else {
        Ok(absolute)
    }
}

/// Extension inference for a path that may be a bare stem.
///
/// A candidate that already carries an extension must exist as written.
pub fn resolve_with_extensions(candidate: &Path) -> Result<PathBuf, ResolutionError> {
    if candidate.extension().is_some() {
        if is_file(candidate) {
            return Ok(candidate.to_path_buf());
        }
        return Err(ResolutionError::NotFound(candidate.to_path_buf()));
    }

    SUPPORTED_EXTENSIONS
        .iter()
        .map(|ext| append_extension(candidate, ext))
        .find(|path| is_file(path))
        .ok_or_else(|| ResolutionError::NoExtensionMatch(candidate.to_path_buf()))
}

fn resolve_directory_entrypoint(dir: &Path) -> Result<PathBuf, ResolutionError> {
    if let Some(main) = manifest_main(dir) {
        if let Ok(path) = resolve_with_extensions(&normalize(&dir.join(main))) {
            return Ok(path);
        }
    }

    for base in CONVENTIONAL_ENTRYPOINTS {
        if let Ok(path) = resolve_with_extensions(&dir.join(base)) {
            return Ok(path);
        }
    }

    first_supported_file(dir)?.ok_or_else(|| ResolutionError::EmptyDirectory(dir.to_path_buf()))
}

/// `main` of the directory manifest, if present, well-formed and non-blank
fn manifest_main(dir: &Path) -> Option<String> {
    let raw = fs::read(dir.join(MANIFEST_FILE)).ok()?;
    let manifest: Manifest = serde_json::from_slice(&raw).ok()?;
    match manifest.main? {
        serde_json::Value::String(main) if !main.trim().is_empty() => Some(main),
        _ => None,
    }
}

fn first_supported_file(dir: &Path) -> Result<Option<PathBuf>, ResolutionError> {
    let entries = fs::read_dir(dir).map_err(|source| ResolutionError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| has_supported_extension(Path::new(name)))
        .collect();
    names.sort();

    Ok(names.into_iter().next().map(|name| dir.join(name)))
}

pub fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext))
}

fn append_extension(stem: &Path, ext: &str) -> PathBuf {
    let mut raw = stem.as_os_str().to_os_string();
    raw.push(".");
    raw.push(ext);
    PathBuf::from(raw)
}

/// Existence without following the final symlink
pub fn path_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

fn is_file(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|m| m.is_file())
}

pub fn is_dir(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|m| m.is_dir())
}

/// Absolute, lexically normalized form of `path`
pub fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return normalize(path);
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
    normalize(&cwd.join(path))
}

/// Collapse `.` and `..` without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, "export default () => ({ status: 200 });").unwrap();
        path
    }

    #[test]
    fn test_existing_file_returned_as_is() {
        let tmp = TempDir::new().unwrap();
        let file = touch(tmp.path(), "handler.js");
        assert_eq!(resolve(&file).unwrap(), file);
    }

    #[test]
    fn test_existing_file_without_extension_returned_as_is() {
        let tmp = TempDir::new().unwrap();
        let file = touch(tmp.path(), "Handler");
        assert_eq!(resolve(&file).unwrap(), file);
    }

    #[test]
    fn test_stem_tries_extensions_in_order() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "handler.mjs");
        let js = touch(tmp.path(), "handler.js");
        assert_eq!(resolve(&tmp.path().join("handler")).unwrap(), js);

        let ts = touch(tmp.path(), "handler.ts");
        assert_eq!(resolve(&tmp.path().join("handler")).unwrap(), ts);
    }

    #[test]
    fn test_stem_resolution_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "handler.cjs");
        let stem = tmp.path().join("handler");
        let first = resolve(&stem).unwrap();
        let second = resolve(&stem).unwrap();
        assert_eq!(first, second);
        assert!(!path_exists(&stem));
    }

    #[test]
    fn test_unknown_stem_fails() {
        let tmp = TempDir::new().unwrap();
        let err = resolve(&tmp.path().join("missing")).unwrap_err();
        assert!(matches!(err, ResolutionError::NoExtensionMatch(_)));
        assert!(err
            .to_string()
            .starts_with("Could not resolve module with supported extensions:"));
    }

    #[test]
    fn test_missing_file_with_extension_fails() {
        let tmp = TempDir::new().unwrap();
        let err = resolve(&tmp.path().join("missing.js")).unwrap_err();
        assert!(matches!(err, ResolutionError::NotFound(_)));
        assert!(err.to_string().starts_with("Module file does not exist:"));
    }

    #[test]
    fn test_directory_uses_manifest_main() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "index.js");
        let entry = touch(tmp.path(), "lib/entry.ts");
        fs::write(tmp.path().join("package.json"), r#"{"main": "lib/entry"}"#).unwrap();
        assert_eq!(resolve(tmp.path()).unwrap(), entry);
    }

    #[test]
    fn test_manifest_main_with_dot_prefix() {
        let tmp = TempDir::new().unwrap();
        let entry = touch(tmp.path(), "src/app.js");
        fs::write(tmp.path().join("package.json"), r#"{"main": "./src/app.js"}"#).unwrap();
        assert_eq!(resolve(tmp.path()).unwrap(), entry);
    }

    #[test]
    fn test_manifest_main_pointing_nowhere_falls_through() {
        let tmp = TempDir::new().unwrap();
        let user = touch(tmp.path(), "user.js");
        fs::write(tmp.path().join("package.json"), r#"{"main": "gone.js"}"#).unwrap();
        assert_eq!(resolve(tmp.path()).unwrap(), user);
    }

    #[test]
    fn test_malformed_manifest_is_ignored() {
        let tmp = TempDir::new().unwrap();
        let index = touch(tmp.path(), "index.ts");
        fs::write(tmp.path().join("package.json"), "{ not json").unwrap();
        assert_eq!(resolve(tmp.path()).unwrap(), index);
    }

    #[test]
    fn test_blank_or_non_string_main_is_ignored() {
        let tmp = TempDir::new().unwrap();
        let main = touch(tmp.path(), "main.js");
        fs::write(tmp.path().join("package.json"), r#"{"main": "   "}"#).unwrap();
        assert_eq!(resolve(tmp.path()).unwrap(), main);

        fs::write(tmp.path().join("package.json"), r#"{"main": 42}"#).unwrap();
        assert_eq!(resolve(tmp.path()).unwrap(), main);
    }

    #[test]
    fn test_conventional_names_in_order() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "main.js");
        let user = touch(tmp.path(), "user.js");
        assert_eq!(resolve(tmp.path()).unwrap(), user);

        let index = touch(tmp.path(), "index.mjs");
        assert_eq!(resolve(tmp.path()).unwrap(), index);
    }

    #[test]
    fn test_falls_back_to_lexicographic_first() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "zeta.js");
        let alpha = touch(tmp.path(), "alpha.ts");
        touch(tmp.path(), "README.md");
        fs::create_dir(tmp.path().join("aaa.js")).unwrap();
        assert_eq!(resolve(tmp.path()).unwrap(), alpha);
    }

    #[test]
    fn test_empty_directory_fails() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "notes.txt");
        let err = resolve(tmp.path()).unwrap_err();
        assert!(matches!(err, ResolutionError::EmptyDirectory(_)));
        assert!(err.to_string().starts_with("No supported module files found in"));
    }

    #[test]
    fn test_normalize_collapses_dots() {
        assert_eq!(
            normalize(Path::new("/userfunc/./a/../handlers")),
            PathBuf::from("/userfunc/handlers")
        );
        assert_eq!(normalize(Path::new("/../x")), PathBuf::from("/x"));
    }

    #[test]
    fn test_relative_input_is_absolutized() {
        let abs = absolutize(Path::new("some/dir"));
        assert!(abs.is_absolute());
        assert!(abs.ends_with("some/dir"));
    }
}
