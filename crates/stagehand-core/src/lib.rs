//! # Stagehand Core
//!
//! A multi-language script execution host for storyboard authoring.
//!
//! User scripts, written in any of the embedded languages (Lua, Rhai, and
//! optionally Python behind the `python` feature), declare timeline elements
//! through one uniform host API. The runtime compiles and runs them in a
//! deterministic order, isolates each script's failures, and captures
//! everything they declare into a layered [`Storyboard`] document.
//!
//! The moving parts:
//! - [`ScriptRuntime`] drives a pass: load, perform, capture, report.
//! - [`LanguageAdapter`]s own the per-language script caches.
//! - [`BindingTable`] describes the host API once, engine-neutrally.
//! - [`register_storyboard_api`] installs the standard storyboard surface.

pub mod bindings;
pub mod document;
pub mod element;
pub mod errors;
pub mod host;
pub mod languages;
pub mod runtime;
pub mod script;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::instrument;

pub use bindings::{Binding, BindingTable, HostFn, ScriptValue, TypeDescriptor};
pub use document::{Group, SharedStoryboard, Storyboard};
pub use element::{ElementKind, Layer, LoopKind, Origin, ScriptedElement};
pub use errors::{ElementError, HostError, ScriptError, ScriptFailure, Severity};
pub use host::{register_storyboard_api, HostConfig, HostContext};
#[cfg(feature = "python")]
pub use languages::PythonAdapter;
pub use languages::{Language, LanguageAdapter, LuaAdapter, RhaiAdapter};
pub use runtime::{RunResult, ScriptRuntime, SourceChange};
pub use script::{Script, ScriptCache, ScriptState};

/// Where script sources come from.
///
/// The runtime never walks the filesystem itself; anything that can
/// enumerate and read sources works, including in-memory stores for tests
/// and editors with unsaved buffers.
pub trait ScriptSource: Send + Sync {
    /// Candidate script paths carrying one of `extensions` (lower case,
    /// without the dot). Order is not significant; callers sort.
    fn list_paths(&self, extensions: &[&str]) -> Result<Vec<PathBuf>>;

    /// Full text of one script source.
    fn read_source(&self, path: &Path) -> Result<String>;
}

/// Reads scripts from a project directory, non-recursively.
#[derive(Debug, Clone)]
pub struct FsScriptSource {
    root: PathBuf,
}

impl FsScriptSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsScriptSource { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ScriptSource for FsScriptSource {
    #[instrument(level = "debug", skip(self), fields(root = %self.root.display()))]
    fn list_paths(&self, extensions: &[&str]) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("listing scripts in {}", self.root.display()))?;
        let mut paths = Vec::new();
        for entry in entries {
            let path = entry
                .with_context(|| format!("reading an entry of {}", self.root.display()))?
                .path();
            if !path.is_file() {
                continue;
            }
            let claimed = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| extensions.iter().any(|known| known.eq_ignore_ascii_case(ext)))
                .unwrap_or(false);
            if claimed {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    #[instrument(level = "debug", skip(self), fields(path = %path.display()))]
    fn read_source(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).with_context(|| format!("reading script {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn lists_only_claimed_extensions_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.lua", "a.lua", "c.rhai", "notes.txt"] {
            let mut file = fs::File::create(dir.path().join(name)).unwrap();
            writeln!(file, "-- {name}").unwrap();
        }
        fs::create_dir(dir.path().join("sub.lua")).unwrap();

        let source = FsScriptSource::new(dir.path());
        let paths = source.list_paths(&["lua"]).unwrap();
        let names: Vec<_> = paths
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
            .collect();
        assert_eq!(names, vec!["a.lua", "b.lua"]);
    }

    #[test]
    fn read_source_reports_the_path_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let source = FsScriptSource::new(dir.path());
        let missing = dir.path().join("ghost.lua");
        let err = source.read_source(&missing).unwrap_err();
        assert!(format!("{err:#}").contains("ghost.lua"));
    }
}
