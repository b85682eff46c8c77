//! Script lifecycle contract and per-adapter cache.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::bindings::BindingTable;
use crate::errors::ScriptError;
use crate::languages::Language;

/// Lifecycle state of a cached script.
///
/// `Unloaded -> Loaded -> Ran | Faulted`, and any state may move to
/// `Disposed`. A faulted script stays in the cache and is attempted again on
/// the next pass; only replacement or removal gets rid of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptState {
    /// Created; no engine state exists yet.
    Unloaded,
    /// Bindings installed, ready to perform.
    Loaded,
    /// Last perform completed without error.
    Ran,
    /// Last perform raised; engine state is kept for the retry.
    Faulted,
    /// Engine state released. Terminal.
    Disposed,
}

/// One user script held by a language adapter.
///
/// Construction never fails, whatever the state of the source on disk; every
/// problem is deferred and surfaces as an error from [`Script::perform`]. The
/// editor keeps broken scripts around on purpose, so a half-written file is a
/// diagnostic, not a crash.
pub trait Script {
    /// Display name, normally the file stem.
    fn name(&self) -> &str;

    /// Source path. Doubles as the cache key.
    fn path(&self) -> &Path;

    fn language(&self) -> Language;

    fn state(&self) -> ScriptState;

    /// Builds the engine environment and installs `bindings`, in table order.
    ///
    /// Must precede [`Script::perform`]. On failure the script stays
    /// [`ScriptState::Unloaded`] and the next pass retries from scratch.
    fn load(&mut self, bindings: &BindingTable) -> Result<(), ScriptError>;

    /// Runs the script body to completion, blocking.
    ///
    /// Every engine-native failure comes back as a [`ScriptError`]; the call
    /// never panics on user input.
    fn perform(&mut self) -> Result<(), ScriptError>;

    /// Releases engine state. Idempotent; a second call is a no-op.
    fn dispose(&mut self) -> Result<(), ScriptError>;
}

/// Path-keyed, insertion-ordered script store.
///
/// Iteration order is insertion order, which makes run passes deterministic.
/// Replacing a script keeps its position, so editing a file does not shuffle
/// the execution order of everything after it.
#[derive(Default)]
pub struct ScriptCache {
    scripts: Vec<Box<dyn Script>>,
}

impl ScriptCache {
    pub fn new() -> Self {
        ScriptCache::default()
    }

    /// Adds a script, or replaces the entry with the same path in place.
    /// The replaced script is disposed before it is dropped.
    pub fn add(&mut self, script: Box<dyn Script>) {
        match self.position(script.path()) {
            Some(index) => {
                debug!(script = script.name(), "replacing cached script");
                dispose_quietly(&mut self.scripts[index]);
                self.scripts[index] = script;
            }
            None => self.scripts.push(script),
        }
    }

    pub fn add_range(&mut self, scripts: Vec<Box<dyn Script>>) {
        for script in scripts {
            self.add(script);
        }
    }

    /// Disposes and removes the entry for `path`. Returns whether one existed.
    pub fn remove(&mut self, path: &Path) -> bool {
        match self.position(path) {
            Some(index) => {
                dispose_quietly(&mut self.scripts[index]);
                self.scripts.remove(index);
                true
            }
            None => false,
        }
    }

    /// Disposes every script and empties the cache.
    pub fn clear(&mut self) {
        for script in &mut self.scripts {
            dispose_quietly(script);
        }
        self.scripts.clear();
    }

    /// Snapshot of the cache contents, in insertion order.
    pub fn compile(&self) -> impl Iterator<Item = &dyn Script> {
        self.scripts.iter().map(|script| script.as_ref())
    }

    pub fn scripts_mut(&mut self) -> &mut [Box<dyn Script>] {
        &mut self.scripts
    }

    pub fn get(&self, path: &Path) -> Option<&dyn Script> {
        self.position(path).map(|index| self.scripts[index].as_ref())
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.scripts
            .iter()
            .map(|script| script.path().to_path_buf())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    fn position(&self, path: &Path) -> Option<usize> {
        self.scripts.iter().position(|script| script.path() == path)
    }
}

/// Disposal failures are logged, never propagated: they must not block a
/// replacement or teardown.
fn dispose_quietly(script: &mut Box<dyn Script>) {
    if let Err(error) = script.dispose() {
        warn!(
            script = script.name(),
            error = %error,
            "script disposal failed"
        );
    }
}
