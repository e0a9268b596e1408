//! Specialization request shapes
//!
//! Turns the legacy and structured specialize bodies into a
//! [`ModuleReference`] the specializer can resolve.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::error::SpecializeError;
use super::resolver;

/// Separator between a file prefix and an export name in `functionName`
const EXPORT_SEPARATOR: char = '.';

/// What to load and, optionally, which export to call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleReference {
    pub path: PathBuf,
    pub export_name: Option<String>,
}

impl ModuleReference {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            export_name: None,
        }
    }

    #[must_use]
    pub fn with_export(mut self, name: impl Into<String>) -> Self {
        self.export_name = Some(name.into());
        self
    }
}

#[derive(Debug, Default, Deserialize)]
struct V2Body {
    #[serde(default)]
    filepath: Option<String>,
    #[serde(default, rename = "functionName")]
    function_name: Option<String>,
}

/// Legacy specialization always targets the default module.
pub fn parse_v1(default_module: &Path) -> ModuleReference {
    ModuleReference::new(default_module)
}

/// Parse a structured `{filepath?, functionName?}` specialize body.
pub fn parse_v2(body: &[u8], function_root: &Path) -> Result<ModuleReference, SpecializeError> {
    let parsed: V2Body = serde_json::from_slice(body)
        .map_err(|e| SpecializeError::InvalidRequest(format!("Invalid specialize request: {e}")))?;

    let filepath = parsed
        .filepath
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map_or_else(|| function_root.to_path_buf(), PathBuf::from);

    let Some(function_name) = parsed
        .function_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
    else {
        return Ok(ModuleReference::new(filepath));
    };

    if let Some((prefix, export)) = function_name.rsplit_once(EXPORT_SEPARATOR) {
        if !prefix.is_empty() {
            return Ok(ModuleReference {
                path: join_lexically(&filepath, prefix),
                export_name: Some(export.to_string()).filter(|e| !e.is_empty()),
            });
        }
    }

    let absolute = resolver::absolutize(&filepath);
    if resolver::path_exists(&absolute) && resolver::is_dir(&absolute) {
        if let Ok(file) = resolver::resolve_with_extensions(&join_lexically(&absolute, function_name))
        {
            return Ok(ModuleReference::new(file));
        }
    }

    Ok(ModuleReference::new(filepath).with_export(function_name))
}

/// Segment-wise join that never lets an absolute `tail` replace `base`
fn join_lexically(base: &Path, tail: &str) -> PathBuf {
    let tail = tail.trim_start_matches('/');
    resolver::normalize(&base.join(tail))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn parse(body: &str, root: &Path) -> ModuleReference {
        parse_v2(body.as_bytes(), root).unwrap()
    }

    #[test]
    fn test_v1_targets_default_module() {
        let reference = parse_v1(Path::new("/userfunc/user"));
        assert_eq!(reference, ModuleReference::new("/userfunc/user"));
    }

    #[test]
    fn test_empty_body_uses_function_root() {
        let reference = parse("{}", Path::new("/userfunc"));
        assert_eq!(reference, ModuleReference::new("/userfunc"));

        let reference = parse(r#"{"filepath": "  ", "functionName": " "}"#, Path::new("/userfunc"));
        assert_eq!(reference, ModuleReference::new("/userfunc"));
    }

    #[test]
    fn test_dotted_name_splits_at_last_separator() {
        let reference = parse(
            r#"{"filepath": "/userfunc", "functionName": "handlers.greet"}"#,
            Path::new("/unused"),
        );
        assert_eq!(
            reference,
            ModuleReference::new("/userfunc/handlers").with_export("greet")
        );

        let reference = parse(
            r#"{"filepath": "/userfunc", "functionName": "api/v1.routes.list"}"#,
            Path::new("/unused"),
        );
        assert_eq!(
            reference,
            ModuleReference::new("/userfunc/api/v1.routes").with_export("list")
        );
    }

    #[test]
    fn test_trailing_separator_drops_export() {
        let reference = parse(
            r#"{"filepath": "/userfunc", "functionName": "handlers."}"#,
            Path::new("/unused"),
        );
        assert_eq!(reference, ModuleReference::new("/userfunc/handlers"));
    }

    #[test]
    fn test_leading_separator_is_not_split() {
        let reference = parse(
            r#"{"filepath": "/nonexistent-root", "functionName": ".hidden"}"#,
            Path::new("/unused"),
        );
        assert_eq!(
            reference,
            ModuleReference::new("/nonexistent-root").with_export(".hidden")
        );
    }

    #[test]
    fn test_plain_name_designating_file() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("greeter.js");
        fs::write(&file, "export default () => ({ status: 200 });").unwrap();

        let body = format!(
            r#"{{"filepath": "{}", "functionName": "greeter"}}"#,
            tmp.path().display()
        );
        assert_eq!(parse(&body, Path::new("/unused")), ModuleReference::new(file));
    }

    #[test]
    fn test_plain_name_is_export_otherwise() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("index.js"), "export const greet = () => 1;").unwrap();

        let body = format!(
            r#"{{"filepath": "{}", "functionName": "greet"}}"#,
            tmp.path().display()
        );
        assert_eq!(
            parse(&body, Path::new("/unused")),
            ModuleReference::new(tmp.path()).with_export("greet")
        );
    }

    #[test]
    fn test_invalid_json_is_rejected() {
        let err = parse_v2(b"not json", Path::new("/userfunc")).unwrap_err();
        assert!(matches!(err, SpecializeError::InvalidRequest(_)));

        let err = parse_v2(b"null", Path::new("/userfunc")).unwrap_err();
        assert!(matches!(err, SpecializeError::InvalidRequest(_)));
    }
}
