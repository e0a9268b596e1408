//! `import` resolution for user modules
//!
//! Relative and absolute specifiers go through the same extension inference
//! as specialization. Bare specifiers are looked up in `node_modules`
//! directories above the importer, then in the shared modules directory.

use std::path::{Path, PathBuf};

use rquickjs::loader::{Loader, Resolver};
use rquickjs::module::Declared;
use rquickjs::{Ctx, Error, Module};

use crate::engine::resolver::{self, path_exists};

const NODE_MODULES: &str = "node_modules";

pub struct ImportResolver {
    shared_modules: PathBuf,
}

impl ImportResolver {
    pub fn new(shared_modules: PathBuf) -> Self {
        Self { shared_modules }
    }

    fn locate(&self, base: &str, name: &str) -> PathBuf {
        let importer_dir = Path::new(base).parent().unwrap_or_else(|| Path::new("/"));

        if is_path_specifier(name) {
            return resolver::normalize(&importer_dir.join(name));
        }

        importer_dir
            .ancestors()
            .map(|dir| dir.join(NODE_MODULES).join(name))
            .find(|candidate| path_exists(candidate) || has_inferable_file(candidate))
            .unwrap_or_else(|| self.shared_modules.join(name))
    }
}

impl Resolver for ImportResolver {
    fn resolve<'js>(&mut self, _ctx: &Ctx<'js>, base: &str, name: &str) -> rquickjs::Result<String> {
        resolver::resolve(&self.locate(base, name))
            .map(|path| path.to_string_lossy().into_owned())
            .map_err(|e| Error::new_resolving_message(base, name, e.to_string()))
    }
}

pub struct ImportLoader;

impl Loader for ImportLoader {
    fn load<'js>(&mut self, ctx: &Ctx<'js>, name: &str) -> rquickjs::Result<Module<'js, Declared>> {
        let source = std::fs::read(name)?;
        Module::declare(ctx.clone(), name, source)
    }
}

fn is_path_specifier(name: &str) -> bool {
    name.starts_with("./") || name.starts_with("../") || Path::new(name).is_absolute()
}

fn has_inferable_file(candidate: &Path) -> bool {
    resolver::resolve_with_extensions(candidate).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_relative_specifier_joins_importer_dir() {
        let resolver = ImportResolver::new(PathBuf::from("/shared"));
        assert_eq!(
            resolver.locate("/userfunc/lib/index.js", "./util"),
            PathBuf::from("/userfunc/lib/util")
        );
        assert_eq!(
            resolver.locate("/userfunc/lib/index.js", "/abs/mod.js"),
            PathBuf::from("/abs/mod.js")
        );
    }

    #[test]
    fn test_bare_specifier_prefers_nearest_node_modules() {
        let tmp = TempDir::new().unwrap();
        let app = tmp.path().join("app");
        let local = app.join("node_modules/left-pad");
        fs::create_dir_all(&local).unwrap();
        fs::write(local.join("index.js"), "export default 1;").unwrap();

        let resolver = ImportResolver::new(tmp.path().join("shared"));
        let importer = app.join("src/handler.js");
        assert_eq!(
            resolver.locate(&importer.to_string_lossy(), "left-pad"),
            local
        );
    }

    #[test]
    fn test_bare_specifier_falls_back_to_shared_modules() {
        let tmp = TempDir::new().unwrap();
        let shared = tmp.path().join("shared");
        let resolver = ImportResolver::new(shared.clone());
        let importer = tmp.path().join("app/handler.js");
        assert_eq!(
            resolver.locate(&importer.to_string_lossy(), "missing-pkg"),
            shared.join("missing-pkg")
        );
    }
}
