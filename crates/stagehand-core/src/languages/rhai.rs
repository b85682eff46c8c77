//! Rhai support.
//!
//! Each script owns its own `Engine` plus a compiled `AST`, kept across
//! passes. Performs run against a fresh `Scope` every time, so host constants
//! cannot be clobbered between runs; anything else a script leaves behind in
//! its own globals is its own business.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rhai::{Dynamic, Engine, EvalAltResult, Map, Position, Scope, AST};
use tracing::{debug, info};

use crate::bindings::{Binding, BindingTable, HostFn, ScriptValue};
use crate::errors::{HostError, ScriptError};
use crate::languages::{Language, LanguageAdapter};
use crate::script::{Script, ScriptCache, ScriptState};
use crate::ScriptSource;

pub struct RhaiAdapter {
    source: Arc<dyn ScriptSource>,
    cache: ScriptCache,
}

impl RhaiAdapter {
    pub fn new(source: Arc<dyn ScriptSource>) -> Self {
        RhaiAdapter {
            source,
            cache: ScriptCache::new(),
        }
    }
}

impl LanguageAdapter for RhaiAdapter {
    fn language(&self) -> Language {
        Language::Rhai
    }

    fn create_script(&self, name: &str, path: &Path) -> Box<dyn Script> {
        Box::new(RhaiScript::new(name, path, self.source.read_source(path)))
    }

    fn cache(&self) -> &ScriptCache {
        &self.cache
    }

    fn cache_mut(&mut self) -> &mut ScriptCache {
        &mut self.cache
    }
}

struct RhaiScript {
    name: String,
    path: PathBuf,
    source: String,
    read_error: Option<String>,
    engine: Option<Engine>,
    /// Compiled lazily on the first perform, then reused.
    ast: Option<AST>,
    /// Fields and type namespaces, pushed into the scope of every perform.
    constants: Vec<(String, Dynamic)>,
    state: ScriptState,
}

impl RhaiScript {
    fn new(name: &str, path: &Path, source: anyhow::Result<String>) -> Self {
        let (source, read_error) = match source {
            Ok(text) => (text, None),
            Err(error) => (String::new(), Some(format!("{error:#}"))),
        };
        RhaiScript {
            name: name.to_string(),
            path: path.to_path_buf(),
            source,
            read_error,
            engine: None,
            ast: None,
            constants: Vec::new(),
            state: ScriptState::Unloaded,
        }
    }
}

impl Script for RhaiScript {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn language(&self) -> Language {
        Language::Rhai
    }

    fn state(&self) -> ScriptState {
        self.state
    }

    fn load(&mut self, bindings: &BindingTable) -> Result<(), ScriptError> {
        if self.state == ScriptState::Disposed {
            return Err(ScriptError::registration("script is disposed"));
        }
        let mut engine = Engine::new();
        engine.set_max_expr_depths(0, 0);

        let script = self.name.clone();
        engine.on_print(move |text| info!(script = script.as_str(), "{text}"));
        let script = self.name.clone();
        engine.on_debug(move |text, _source, position| {
            debug!(script = script.as_str(), "{text} @ {position}");
        });

        let mut constants = Vec::new();
        for (name, binding) in bindings.entries() {
            match binding {
                Binding::Method { func, arity } => {
                    register_host_fn(&mut engine, name, Arc::clone(func), *arity)?;
                }
                Binding::Field(value) => {
                    constants.push((name.clone(), value_to_dynamic(value)));
                }
                Binding::Type(descriptor) => {
                    let mut map = Map::new();
                    for (constant, value) in descriptor.constants() {
                        map.insert(constant.as_str().into(), value_to_dynamic(value));
                    }
                    constants.push((name.clone(), Dynamic::from(map)));
                }
            }
        }

        self.engine = Some(engine);
        self.constants = constants;
        self.ast = None;
        self.state = ScriptState::Loaded;
        Ok(())
    }

    fn perform(&mut self) -> Result<(), ScriptError> {
        if let Some(message) = &self.read_error {
            self.state = ScriptState::Faulted;
            return Err(ScriptError::compile(message.clone()));
        }
        let Some(engine) = &self.engine else {
            return Err(ScriptError::runtime("perform called before load"));
        };
        if self.ast.is_none() {
            match engine.compile(&self.source) {
                Ok(ast) => self.ast = Some(ast),
                Err(error) => {
                    self.state = ScriptState::Faulted;
                    return Err(ScriptError::compile(error.to_string()));
                }
            }
        }
        let Some(ast) = &self.ast else {
            return Err(ScriptError::runtime("compiled state missing"));
        };

        let mut scope = Scope::new();
        for (name, value) in &self.constants {
            scope.push_constant_dynamic(name.as_str(), value.clone());
        }
        match engine.run_ast_with_scope(&mut scope, ast) {
            Ok(()) => {
                self.state = ScriptState::Ran;
                Ok(())
            }
            Err(error) => {
                self.state = ScriptState::Faulted;
                Err(classify_error(*error))
            }
        }
    }

    fn dispose(&mut self) -> Result<(), ScriptError> {
        self.engine = None;
        self.ast = None;
        self.constants.clear();
        self.state = ScriptState::Disposed;
        Ok(())
    }
}

/// Bridges one host method into the engine at its declared arity. Rhai
/// dispatches by argument count, so the registration must match exactly.
fn register_host_fn(
    engine: &mut Engine,
    name: &str,
    func: HostFn,
    arity: usize,
) -> Result<(), ScriptError> {
    let fname = name.to_string();
    let call = move |args: Vec<Dynamic>| -> Result<Dynamic, Box<EvalAltResult>> {
        let mut values = Vec::with_capacity(args.len());
        for (index, arg) in args.iter().enumerate() {
            values.push(dynamic_to_value(arg).map_err(|got| {
                host_error(HostError::Argument {
                    name: fname.clone(),
                    index,
                    expected: "a host-representable value",
                    got: got.to_string(),
                })
            })?);
        }
        func(&values)
            .map(|value| value_to_dynamic(&value))
            .map_err(host_error)
    };
    match arity {
        0 => {
            engine.register_fn(name, move || call(Vec::new()));
        }
        1 => {
            engine.register_fn(name, move |a: Dynamic| call(vec![a]));
        }
        2 => {
            engine.register_fn(name, move |a: Dynamic, b: Dynamic| call(vec![a, b]));
        }
        3 => {
            engine.register_fn(name, move |a: Dynamic, b: Dynamic, c: Dynamic| {
                call(vec![a, b, c])
            });
        }
        4 => {
            engine.register_fn(name, move |a: Dynamic, b: Dynamic, c: Dynamic, d: Dynamic| {
                call(vec![a, b, c, d])
            });
        }
        5 => {
            engine.register_fn(
                name,
                move |a: Dynamic, b: Dynamic, c: Dynamic, d: Dynamic, e: Dynamic| {
                    call(vec![a, b, c, d, e])
                },
            );
        }
        6 => {
            engine.register_fn(
                name,
                move |a: Dynamic, b: Dynamic, c: Dynamic, d: Dynamic, e: Dynamic, f: Dynamic| {
                    call(vec![a, b, c, d, e, f])
                },
            );
        }
        7 => {
            engine.register_fn(
                name,
                move |a: Dynamic,
                      b: Dynamic,
                      c: Dynamic,
                      d: Dynamic,
                      e: Dynamic,
                      f: Dynamic,
                      g: Dynamic| call(vec![a, b, c, d, e, f, g]),
            );
        }
        8 => {
            engine.register_fn(
                name,
                move |a: Dynamic,
                      b: Dynamic,
                      c: Dynamic,
                      d: Dynamic,
                      e: Dynamic,
                      f: Dynamic,
                      g: Dynamic,
                      h: Dynamic| call(vec![a, b, c, d, e, f, g, h]),
            );
        }
        9 => {
            engine.register_fn(
                name,
                move |a: Dynamic,
                      b: Dynamic,
                      c: Dynamic,
                      d: Dynamic,
                      e: Dynamic,
                      f: Dynamic,
                      g: Dynamic,
                      h: Dynamic,
                      i: Dynamic| call(vec![a, b, c, d, e, f, g, h, i]),
            );
        }
        10 => {
            engine.register_fn(
                name,
                move |a: Dynamic,
                      b: Dynamic,
                      c: Dynamic,
                      d: Dynamic,
                      e: Dynamic,
                      f: Dynamic,
                      g: Dynamic,
                      h: Dynamic,
                      i: Dynamic,
                      j: Dynamic| call(vec![a, b, c, d, e, f, g, h, i, j]),
            );
        }
        _ => {
            return Err(ScriptError::registration(format!(
                "host method '{name}' has unsupported arity {arity}"
            )))
        }
    }
    Ok(())
}

fn host_error(error: impl ToString) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(
        error.to_string().into(),
        Position::NONE,
    ))
}

fn classify_error(error: EvalAltResult) -> ScriptError {
    let position = error.position();
    let stack = if position.is_none() {
        None
    } else {
        Some(format!("at {position}"))
    };
    ScriptError::Runtime {
        message: error.to_string(),
        stack,
    }
}

fn value_to_dynamic(value: &ScriptValue) -> Dynamic {
    match value {
        ScriptValue::Unit => Dynamic::UNIT,
        ScriptValue::Bool(value) => (*value).into(),
        ScriptValue::Int(value) => (*value).into(),
        ScriptValue::Float(value) => (*value).into(),
        ScriptValue::Str(value) => value.clone().into(),
        ScriptValue::List(items) => {
            let array: rhai::Array = items.iter().map(value_to_dynamic).collect();
            Dynamic::from(array)
        }
    }
}

fn dynamic_to_value(value: &Dynamic) -> Result<ScriptValue, &'static str> {
    if value.is::<()>() {
        return Ok(ScriptValue::Unit);
    }
    if let Ok(b) = value.as_bool() {
        return Ok(ScriptValue::Bool(b));
    }
    if let Ok(i) = value.as_int() {
        return Ok(ScriptValue::Int(i));
    }
    if let Ok(f) = value.as_float() {
        return Ok(ScriptValue::Float(f));
    }
    if let Ok(s) = value.clone().into_string() {
        return Ok(ScriptValue::Str(s));
    }
    if let Ok(array) = value.clone().into_array() {
        let mut items = Vec::with_capacity(array.len());
        for item in &array {
            items.push(dynamic_to_value(item)?);
        }
        return Ok(ScriptValue::List(items));
    }
    Err(value.type_name())
}
