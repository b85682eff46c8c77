//! Language adapters, one per embedded engine technology.
//!
//! An adapter owns the scripts of its language and knows how to wrap a source
//! file into a [`Script`]. The Lua and Rhai adapters are always available;
//! the Python adapter sits behind the `python` feature because it links
//! against a real CPython.
//!
//! What survives between performs is per engine: Lua and Python scripts keep
//! their globals from one perform to the next, while a Rhai script runs
//! against a fresh scope every time. Only replacement or removal resets a
//! script completely, so script bodies portable across languages must not
//! rely on leftover state.

use std::fmt;
use std::path::Path;

use crate::script::{Script, ScriptCache};

pub mod lua;
#[cfg(feature = "python")]
pub mod python;
pub mod rhai;

pub use self::lua::LuaAdapter;
#[cfg(feature = "python")]
pub use self::python::PythonAdapter;
pub use self::rhai::RhaiAdapter;

/// The supported embedded languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Lua,
    Rhai,
    Python,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Lua => "lua",
            Language::Rhai => "rhai",
            Language::Python => "python",
        }
    }

    /// File extensions claimed by the language, lower case, without the dot.
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Language::Lua => &["lua"],
            Language::Rhai => &["rhai"],
            Language::Python => &["py"],
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A language backend: a script factory plus the cache of its products.
///
/// `create_script` never fails. An unreadable or broken source still produces
/// a script object; the problem is reported when that script performs.
pub trait LanguageAdapter {
    fn language(&self) -> Language;

    /// Extensions this adapter claims when scanning a project.
    fn extensions(&self) -> &'static [&'static str] {
        self.language().extensions()
    }

    /// Wraps one source file. `name` is the display name, usually the stem.
    fn create_script(&self, name: &str, path: &Path) -> Box<dyn Script>;

    fn cache(&self) -> &ScriptCache;

    fn cache_mut(&mut self) -> &mut ScriptCache;

    /// Whether this adapter claims `path`, judged by extension.
    fn claims(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                self.extensions()
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }
}
