//! The script runtime: owns the language adapters, drives the lifecycle of
//! every cached script and produces one capture document per run pass.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::bindings::BindingTable;
use crate::document::Storyboard;
use crate::errors::{ScriptError, ScriptFailure, Severity};
use crate::host::HostContext;
use crate::languages::{Language, LanguageAdapter};
use crate::script::{Script, ScriptState};
use crate::ScriptSource;

/// A file-change notification from whatever watches the project directory.
/// The runtime does no watching of its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceChange {
    Added(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
}

/// Outcome of one run pass. Always carries the document, even when every
/// script failed; partial output is the whole point of failure isolation.
#[derive(Debug)]
pub struct RunResult {
    pub document: Storyboard,
    pub failures: Vec<ScriptFailure>,
}

impl RunResult {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Orchestrates language adapters over a single-threaded run pass.
///
/// Execution order is fixed and observable: adapters in registration order,
/// scripts in cache insertion order within each adapter. Two passes over the
/// same caches visit scripts identically, which keeps output stable for
/// deterministic script bodies.
pub struct ScriptRuntime {
    adapters: Vec<Box<dyn LanguageAdapter>>,
    bindings: BindingTable,
    context: HostContext,
}

impl ScriptRuntime {
    pub fn new() -> Self {
        ScriptRuntime {
            adapters: Vec::new(),
            bindings: BindingTable::new(),
            context: HostContext::new(),
        }
    }

    /// Shared state behind the host API; clone it before registering the
    /// standard surface into [`ScriptRuntime::bindings_mut`].
    pub fn context(&self) -> &HostContext {
        &self.context
    }

    pub fn bindings(&self) -> &BindingTable {
        &self.bindings
    }

    /// The table applied to every script at load time. Changes affect scripts
    /// loaded afterwards; already-loaded scripts keep the environment they
    /// were built with.
    pub fn bindings_mut(&mut self) -> &mut BindingTable {
        &mut self.bindings
    }

    /// Adapter registration order is execution order, and it is fixed for the
    /// life of the runtime.
    pub fn register_adapter(&mut self, adapter: Box<dyn LanguageAdapter>) {
        info!(language = %adapter.language(), "registered language adapter");
        self.adapters.push(adapter);
    }

    pub fn adapter_mut(&mut self, language: Language) -> Option<&mut dyn LanguageAdapter> {
        self.adapters
            .iter_mut()
            .find(|adapter| adapter.language() == language)
            .map(|adapter| &mut **adapter as &mut dyn LanguageAdapter)
    }

    /// Snapshot of every cached script, in execution order.
    pub fn compile(&self) -> impl Iterator<Item = &dyn Script> {
        self.adapters
            .iter()
            .flat_map(|adapter| adapter.cache().compile())
    }

    pub fn script_count(&self) -> usize {
        self.adapters.iter().map(|adapter| adapter.cache().len()).sum()
    }

    /// Rebuilds every adapter's cache from `source`: enumerate by extension,
    /// then clear and re-create. A listing failure leaves every cache as it
    /// was. Old scripts are disposed; nothing of their engine state survives
    /// into the new instances.
    pub fn reload(&mut self, source: &dyn ScriptSource) -> anyhow::Result<usize> {
        let mut listings = Vec::with_capacity(self.adapters.len());
        for adapter in &self.adapters {
            let mut paths = source.list_paths(adapter.extensions())?;
            paths.sort();
            listings.push(paths);
        }

        let mut total = 0;
        for (adapter, paths) in self.adapters.iter_mut().zip(listings) {
            adapter.cache_mut().clear();
            let mut scripts = Vec::with_capacity(paths.len());
            for path in &paths {
                scripts.push(adapter.create_script(&script_name(path), path));
            }
            total += scripts.len();
            debug!(
                language = %adapter.language(),
                scripts = scripts.len(),
                "cache rebuilt"
            );
            adapter.cache_mut().add_range(scripts);
        }
        info!(scripts = total, "script caches reloaded");
        Ok(total)
    }

    /// Applies one change notification to the adapter claiming the path.
    /// Additions and modifications both land as a wholesale replace; removal
    /// drops the cache entry. Unclaimed paths are ignored with a log line.
    pub fn apply_change(&mut self, change: &SourceChange) {
        match change {
            SourceChange::Added(path) | SourceChange::Modified(path) => {
                let name = script_name(path);
                match self.adapters.iter_mut().find(|adapter| adapter.claims(path)) {
                    Some(adapter) => {
                        let script = adapter.create_script(&name, path);
                        adapter.cache_mut().add(script);
                    }
                    None => warn!(path = %path.display(), "change to unclaimed file ignored"),
                }
            }
            SourceChange::Removed(path) => {
                let mut removed = false;
                for adapter in &mut self.adapters {
                    if adapter.claims(path) {
                        removed |= adapter.cache_mut().remove(path);
                    }
                }
                if !removed {
                    debug!(path = %path.display(), "removal of uncached file ignored");
                }
            }
        }
    }

    /// One run pass over every cached script.
    ///
    /// Unloaded scripts are loaded first (a load failure is recorded and the
    /// script skipped), then each script performs. A failing script is
    /// recorded and the pass moves on; the pass itself always completes and
    /// always yields the elements captured before any fault.
    pub fn run(&mut self) -> RunResult {
        self.context.reset();
        let mut failures = Vec::new();
        let mut performed = 0usize;

        for adapter in &mut self.adapters {
            for script in adapter.cache_mut().scripts_mut() {
                self.context.set_current_script(script.name());

                if script.state() == ScriptState::Unloaded {
                    if let Err(error) = script.load(&self.bindings) {
                        warn!(script = script.name(), error = %error, "script failed to load");
                        failures.push(failure_for(script.as_ref(), &error));
                        continue;
                    }
                }

                performed += 1;
                match script.perform() {
                    Ok(()) => debug!(script = script.name(), "script performed"),
                    Err(error) => {
                        warn!(script = script.name(), error = %error, "script failed");
                        failures.push(failure_for(script.as_ref(), &error));
                    }
                }
            }
        }

        let document = self.context.take_document();
        info!(
            performed,
            failures = failures.len(),
            elements = document.element_count(),
            "run pass complete"
        );
        RunResult { document, failures }
    }

    /// Disposes every cached script and empties all caches.
    pub fn clear(&mut self) {
        for adapter in &mut self.adapters {
            adapter.cache_mut().clear();
        }
    }
}

impl Default for ScriptRuntime {
    fn default() -> Self {
        ScriptRuntime::new()
    }
}

fn script_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn failure_for(script: &dyn Script, error: &ScriptError) -> ScriptFailure {
    ScriptFailure {
        script: script.name().to_string(),
        path: script.path().to_path_buf(),
        severity: Severity::Error,
        message: error.to_string(),
        stack: error.stack().map(str::to_string),
    }
}
