//! Lua support, built on an embedded Lua 5.4 via `mlua`.
//!
//! Each script owns a private interpreter. The environment is sandboxed
//! before any user code runs: filesystem, process and bytecode-loading
//! entry points are removed, and `print` is rerouted to the structured log.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use mlua::{Lua, MultiValue, Value};
use tracing::info;

use crate::bindings::{Binding, BindingTable, ScriptValue};
use crate::errors::{HostError, ScriptError};
use crate::languages::{Language, LanguageAdapter};
use crate::script::{Script, ScriptCache, ScriptState};
use crate::ScriptSource;

/// Globals removed from every script environment before user code runs.
const BLOCKED_GLOBALS: [&str; 8] = [
    "os", "io", "debug", "package", "require", "loadfile", "dofile", "load",
];

pub struct LuaAdapter {
    source: Arc<dyn ScriptSource>,
    cache: ScriptCache,
}

impl LuaAdapter {
    pub fn new(source: Arc<dyn ScriptSource>) -> Self {
        LuaAdapter {
            source,
            cache: ScriptCache::new(),
        }
    }
}

impl LanguageAdapter for LuaAdapter {
    fn language(&self) -> Language {
        Language::Lua
    }

    fn create_script(&self, name: &str, path: &Path) -> Box<dyn Script> {
        Box::new(LuaScript::new(name, path, self.source.read_source(path)))
    }

    fn cache(&self) -> &ScriptCache {
        &self.cache
    }

    fn cache_mut(&mut self) -> &mut ScriptCache {
        &mut self.cache
    }
}

struct LuaScript {
    name: String,
    path: PathBuf,
    source: String,
    /// Set when the source could not be read at creation time. Reported as a
    /// compile error on the first perform, never at creation.
    read_error: Option<String>,
    lua: Option<Lua>,
    state: ScriptState,
}

impl LuaScript {
    fn new(name: &str, path: &Path, source: anyhow::Result<String>) -> Self {
        let (source, read_error) = match source {
            Ok(text) => (text, None),
            Err(error) => (String::new(), Some(format!("{error:#}"))),
        };
        LuaScript {
            name: name.to_string(),
            path: path.to_path_buf(),
            source,
            read_error,
            lua: None,
            state: ScriptState::Unloaded,
        }
    }

    fn apply_binding(&self, lua: &Lua, name: &str, binding: &Binding) -> mlua::Result<()> {
        let globals = lua.globals();
        match binding {
            Binding::Field(value) => globals.set(name, value_to_lua(lua, value)?),
            Binding::Type(descriptor) => {
                let table = lua.create_table()?;
                for (constant, value) in descriptor.constants() {
                    table.set(constant.as_str(), value_to_lua(lua, value)?)?;
                }
                globals.set(name, table)
            }
            Binding::Method { func, arity } => {
                let func = Arc::clone(func);
                let arity = *arity;
                let fname = name.to_string();
                let wrapped = lua.create_function(move |lua, args: MultiValue| {
                    if args.len() != arity {
                        let error = HostError::Arity {
                            name: fname.clone(),
                            expected: arity,
                            got: args.len(),
                        };
                        return Err(mlua::Error::RuntimeError(error.to_string()));
                    }
                    let mut values = Vec::with_capacity(args.len());
                    for arg in args.iter() {
                        values.push(lua_to_value(arg)?);
                    }
                    let result = func(&values)
                        .map_err(|error| mlua::Error::RuntimeError(error.to_string()))?;
                    value_to_lua(lua, &result)
                })?;
                globals.set(name, wrapped)
            }
        }
    }

    fn sandbox(&self, lua: &Lua) -> mlua::Result<()> {
        let globals = lua.globals();
        let script = self.name.clone();
        let print = lua.create_function(move |_, args: MultiValue| {
            let line = args
                .iter()
                .map(display_value)
                .collect::<Vec<_>>()
                .join("\t");
            info!(script = script.as_str(), "{line}");
            Ok(())
        })?;
        globals.set("print", print)?;
        for name in BLOCKED_GLOBALS {
            globals.set(name, Value::Nil)?;
        }
        Ok(())
    }
}

impl Script for LuaScript {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn language(&self) -> Language {
        Language::Lua
    }

    fn state(&self) -> ScriptState {
        self.state
    }

    fn load(&mut self, bindings: &BindingTable) -> Result<(), ScriptError> {
        if self.state == ScriptState::Disposed {
            return Err(ScriptError::registration("script is disposed"));
        }
        let lua = Lua::new();
        self.sandbox(&lua)
            .map_err(|error| ScriptError::registration(error.to_string()))?;
        for (name, binding) in bindings.entries() {
            self.apply_binding(&lua, name, binding)
                .map_err(|error| {
                    ScriptError::registration(format!("binding '{name}': {error}"))
                })?;
        }
        self.lua = Some(lua);
        self.state = ScriptState::Loaded;
        Ok(())
    }

    fn perform(&mut self) -> Result<(), ScriptError> {
        if let Some(message) = &self.read_error {
            self.state = ScriptState::Faulted;
            return Err(ScriptError::compile(message.clone()));
        }
        let lua = match &self.lua {
            Some(lua) => lua,
            None => return Err(ScriptError::runtime("perform called before load")),
        };
        match lua.load(&self.source).exec() {
            Ok(()) => {
                self.state = ScriptState::Ran;
                Ok(())
            }
            Err(error) => {
                self.state = ScriptState::Faulted;
                Err(classify_error(error))
            }
        }
    }

    fn dispose(&mut self) -> Result<(), ScriptError> {
        // Dropping the interpreter closes it; a second call finds nothing.
        self.lua = None;
        self.state = ScriptState::Disposed;
        Ok(())
    }
}

fn classify_error(error: mlua::Error) -> ScriptError {
    match &error {
        mlua::Error::SyntaxError { message, .. } => ScriptError::compile(strip_chunk_prefix(message)),
        mlua::Error::RuntimeError(message) => {
            let (message, stack) = split_traceback(message);
            ScriptError::Runtime { message, stack }
        }
        mlua::Error::CallbackError { cause, .. } => classify_error((**cause).clone()),
        other => ScriptError::runtime(other.to_string()),
    }
}

/// Lua prefixes messages with the chunk id, `[string "..."]:LINE:`. The chunk
/// id is noise here; the line number is worth keeping.
fn strip_chunk_prefix(message: &str) -> String {
    match message
        .strip_prefix("[string \"")
        .and_then(|rest| rest.split_once("\"]:"))
    {
        Some((_, tail)) => format!("line {tail}"),
        None => message.to_string(),
    }
}

fn split_traceback(message: &str) -> (String, Option<String>) {
    match message.split_once("\nstack traceback:") {
        Some((head, tail)) => (
            strip_chunk_prefix(head.trim_end()),
            Some(format!("stack traceback:{tail}")),
        ),
        None => (strip_chunk_prefix(message), None),
    }
}

fn value_to_lua(lua: &Lua, value: &ScriptValue) -> mlua::Result<Value> {
    Ok(match value {
        ScriptValue::Unit => Value::Nil,
        ScriptValue::Bool(value) => Value::Boolean(*value),
        ScriptValue::Int(value) => Value::Integer(*value),
        ScriptValue::Float(value) => Value::Number(*value),
        ScriptValue::Str(value) => Value::String(lua.create_string(value)?),
        ScriptValue::List(items) => {
            let table = lua.create_table()?;
            for (index, item) in items.iter().enumerate() {
                table.set(index + 1, value_to_lua(lua, item)?)?;
            }
            Value::Table(table)
        }
    })
}

fn lua_to_value(value: &Value) -> mlua::Result<ScriptValue> {
    match value {
        Value::Nil => Ok(ScriptValue::Unit),
        Value::Boolean(value) => Ok(ScriptValue::Bool(*value)),
        Value::Integer(value) => Ok(ScriptValue::Int(*value)),
        Value::Number(value) => Ok(ScriptValue::Float(*value)),
        Value::String(value) => Ok(ScriptValue::Str(value.to_str()?.to_string())),
        Value::Table(table) => {
            let mut items = Vec::new();
            for item in table.clone().sequence_values::<Value>() {
                items.push(lua_to_value(&item?)?);
            }
            Ok(ScriptValue::List(items))
        }
        other => Err(mlua::Error::RuntimeError(format!(
            "unsupported value of type '{}' crossing the host boundary",
            other.type_name()
        ))),
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(value) => value.to_string(),
        Value::Integer(value) => value.to_string(),
        Value::Number(value) => value.to_string(),
        Value::String(value) => value
            .to_str()
            .map(|s| s.to_string())
            .unwrap_or_else(|_| "<invalid utf-8>".to_string()),
        other => format!("<{}>", other.type_name()),
    }
}
