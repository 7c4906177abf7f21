//! Lazy ingestion of type stubs into the abstract object model.
//!
//! Each stub module is parsed at most once per process; every declared
//! entity is interned by its fully-qualified name, so repeated parses and
//! re-export resolution return identity-equal objects.

mod parser;
mod refine;

pub use parser::parse_typeshed_module;
pub use refine::{
    eval_type_expr, refine_function_call, refine_typeshed, resolve_typeshed_value,
};

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, AnalysisResult};
use crate::objects::ObjId;

/// The active stub corpus root, analyzed language version and platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchContext {
    /// Directory holding the `stdlib/` stubs and the `VERSIONS` manifest.
    pub typeshed: PathBuf,
    pub version: (u32, u32),
    pub platform: String,
}

impl SearchContext {
    pub fn new(typeshed: PathBuf, version: (u32, u32), platform: impl Into<String>) -> Self {
        Self {
            typeshed,
            version,
            platform: platform.into(),
        }
    }
}

/// A declared type expression, kept in the shape the refinement visitor
/// evaluates: names resolve in the enclosing stub module, unions join, and
/// subscripted generics collapse to Any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeExpr {
    Name(String),
    /// A dotted reference; only `builtins.*` resolves, the rest is Any.
    Attribute(Vec<String>),
    Union(Vec<TypeExpr>),
    Subscript,
    NoneLit,
    Ellipsis,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionWindow {
    pub min: (u32, u32),
    pub max: Option<(u32, u32)>,
}

#[derive(Debug, Clone)]
pub enum StubModuleState {
    Parsed(ObjId),
    Missing,
}

/// Process-lifetime stub tables: parsed modules, interned objects by
/// qualified name, and the parsed `VERSIONS` manifest.
#[derive(Debug)]
pub struct TypeshedTables {
    pub search: SearchContext,
    pub modules: IndexMap<String, StubModuleState>,
    pub interned: IndexMap<String, ObjId>,
    versions: Option<IndexMap<String, VersionWindow>>,
}

impl TypeshedTables {
    pub fn new(search: SearchContext) -> Self {
        Self {
            search,
            modules: IndexMap::new(),
            interned: IndexMap::new(),
            versions: None,
        }
    }

    /// The `VERSIONS` manifest, parsed on first use. Lines are
    /// `package: min[-max]` with versions as `major.minor`.
    pub fn versions(&mut self) -> AnalysisResult<&IndexMap<String, VersionWindow>> {
        if self.versions.is_none() {
            let path = self.search.typeshed.join("VERSIONS");
            let text = std::fs::read_to_string(&path)?;
            let mut versions = IndexMap::new();
            for line in text.lines() {
                let line = line.split('#').next().unwrap_or("").trim();
                if line.is_empty() {
                    continue;
                }
                let Some((package, window)) = line.split_once(':') else {
                    continue;
                };
                let Some(window) = parse_window(window.trim()) else {
                    continue;
                };
                versions.insert(package.trim().to_string(), window);
            }
            self.versions = Some(versions);
        }
        Ok(self.versions.as_ref().expect("versions parsed above"))
    }

    /// Locate the stub file for a qualified module name, enforcing the
    /// version gate for its top-level package.
    pub fn stub_path(&mut self, module: &str) -> AnalysisResult<PathBuf> {
        let top_level = module.split('.').next().unwrap_or(module).to_string();
        let version = self.search.version;
        if let Some(window) = self.versions()?.get(&top_level).copied() {
            if version < window.min || window.max.is_some_and(|max| version > max) {
                return Err(AnalysisError::VersionOutOfRange {
                    module: module.to_string(),
                    major: version.0,
                    minor: version.1,
                });
            }
        }

        let components: Vec<&str> = module.split('.').collect();
        find_stub_in_dir(&self.search.typeshed, &components).ok_or_else(|| {
            AnalysisError::StubMissing {
                module: module.to_string(),
            }
        })
    }
}

fn parse_window(text: &str) -> Option<VersionWindow> {
    let (min_text, max_text) = match text.split_once('-') {
        Some((min, max)) => (min.trim(), Some(max.trim())),
        None => (text, None),
    };
    let min = parse_version(min_text)?;
    let max = match max_text {
        Some("") | None => None,
        Some(max) => Some(parse_version(max)?),
    };
    Some(VersionWindow { min, max })
}

fn parse_version(text: &str) -> Option<(u32, u32)> {
    let (major, minor) = text.split_once('.')?;
    Some((major.trim().parse().ok()?, minor.trim().parse().ok()?))
}

fn find_stub_in_dir(dir: &Path, components: &[&str]) -> Option<PathBuf> {
    match components {
        [] => {
            let init = dir.join("__init__.pyi");
            init.exists().then_some(init)
        }
        [name] => {
            let flat = dir.join(format!("{name}.pyi"));
            if flat.exists() {
                return Some(flat);
            }
            let nested = dir.join(name);
            nested.exists().then(|| find_stub_in_dir(&nested, &[])).flatten()
        }
        [next, rest @ ..] => {
            let nested = dir.join(next);
            nested
                .exists()
                .then(|| find_stub_in_dir(&nested, rest))
                .flatten()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_version_windows() {
        assert_eq!(
            parse_window("2.7-3.9"),
            Some(VersionWindow {
                min: (2, 7),
                max: Some((3, 9)),
            })
        );
        assert_eq!(
            parse_window("3.6"),
            Some(VersionWindow {
                min: (3, 6),
                max: None,
            })
        );
        assert_eq!(
            parse_window("3.6-"),
            Some(VersionWindow {
                min: (3, 6),
                max: None,
            })
        );
    }
}
