//! Python support, built on PyO3. Behind the `python` feature: it links
//! against a real CPython, which not every install wants to carry.
//!
//! CPython allows one interpreter per process, so unlike the Lua and Rhai
//! backends, isolation here is a dedicated globals namespace per script
//! rather than a whole engine per script.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pyo3::exceptions::{PyRuntimeError, PySyntaxError};
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyCFunction, PyDict, PyList, PyTuple};

use crate::bindings::{Binding, BindingTable, ScriptValue};
use crate::errors::{HostError, ScriptError};
use crate::languages::{Language, LanguageAdapter};
use crate::script::{Script, ScriptCache, ScriptState};
use crate::ScriptSource;

pub struct PythonAdapter {
    source: Arc<dyn ScriptSource>,
    cache: ScriptCache,
}

impl PythonAdapter {
    pub fn new(source: Arc<dyn ScriptSource>) -> Self {
        PythonAdapter {
            source,
            cache: ScriptCache::new(),
        }
    }
}

impl LanguageAdapter for PythonAdapter {
    fn language(&self) -> Language {
        Language::Python
    }

    fn create_script(&self, name: &str, path: &Path) -> Box<dyn Script> {
        Box::new(PythonScript::new(name, path, self.source.read_source(path)))
    }

    fn cache(&self) -> &ScriptCache {
        &self.cache
    }

    fn cache_mut(&mut self) -> &mut ScriptCache {
        &mut self.cache
    }
}

struct PythonScript {
    name: String,
    path: PathBuf,
    source: String,
    read_error: Option<String>,
    /// The script's private globals dict; host bindings live in here, not in
    /// the interpreter-wide namespace.
    globals: Option<Py<PyDict>>,
    state: ScriptState,
}

impl PythonScript {
    fn new(name: &str, path: &Path, source: anyhow::Result<String>) -> Self {
        let (source, read_error) = match source {
            Ok(text) => (text, None),
            Err(error) => (String::new(), Some(format!("{error:#}"))),
        };
        PythonScript {
            name: name.to_string(),
            path: path.to_path_buf(),
            source,
            read_error,
            globals: None,
            state: ScriptState::Unloaded,
        }
    }
}

impl Script for PythonScript {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn language(&self) -> Language {
        Language::Python
    }

    fn state(&self) -> ScriptState {
        self.state
    }

    fn load(&mut self, bindings: &BindingTable) -> Result<(), ScriptError> {
        if self.state == ScriptState::Disposed {
            return Err(ScriptError::registration("script is disposed"));
        }
        let globals = Python::with_gil(|py| -> PyResult<Py<PyDict>> {
            let globals = PyDict::new_bound(py);
            for (name, binding) in bindings.entries() {
                apply_binding(py, &globals, name, binding)?;
            }
            Ok(globals.unbind())
        })
        .map_err(|error| ScriptError::registration(error.to_string()))?;

        self.globals = Some(globals);
        self.state = ScriptState::Loaded;
        Ok(())
    }

    fn perform(&mut self) -> Result<(), ScriptError> {
        if let Some(message) = &self.read_error {
            self.state = ScriptState::Faulted;
            return Err(ScriptError::compile(message.clone()));
        }
        let Some(globals) = &self.globals else {
            return Err(ScriptError::runtime("perform called before load"));
        };
        let outcome = Python::with_gil(|py| {
            let globals = globals.bind(py);
            py.run_bound(&self.source, Some(globals), None)
                .map_err(|error| classify_error(py, error))
        });
        match outcome {
            Ok(()) => {
                self.state = ScriptState::Ran;
                Ok(())
            }
            Err(error) => {
                self.state = ScriptState::Faulted;
                Err(error)
            }
        }
    }

    fn dispose(&mut self) -> Result<(), ScriptError> {
        if let Some(globals) = self.globals.take() {
            // Decref under the GIL so teardown happens now, not at some later
            // GIL acquisition.
            Python::with_gil(|py| drop(globals.into_bound(py)));
        }
        self.state = ScriptState::Disposed;
        Ok(())
    }
}

fn apply_binding(
    py: Python<'_>,
    globals: &Bound<'_, PyDict>,
    name: &str,
    binding: &Binding,
) -> PyResult<()> {
    match binding {
        Binding::Field(value) => globals.set_item(name, value_to_py(py, value)?),
        Binding::Type(descriptor) => {
            let fields = PyDict::new_bound(py);
            for (constant, value) in descriptor.constants() {
                fields.set_item(constant, value_to_py(py, value)?)?;
            }
            let namespace = py
                .import_bound("types")?
                .getattr("SimpleNamespace")?
                .call((), Some(&fields))?;
            globals.set_item(name, namespace)
        }
        Binding::Method { func, arity } => {
            let func = Arc::clone(func);
            let arity = *arity;
            let fname = name.to_string();
            let wrapped = PyCFunction::new_closure_bound(
                py,
                None,
                None,
                move |args: &Bound<'_, PyTuple>, _kwargs: Option<&Bound<'_, PyDict>>| {
                    let py = args.py();
                    if args.len() != arity {
                        let error = HostError::Arity {
                            name: fname.clone(),
                            expected: arity,
                            got: args.len(),
                        };
                        return Err(PyRuntimeError::new_err(error.to_string()));
                    }
                    let mut values = Vec::with_capacity(args.len());
                    for arg in args.iter() {
                        values.push(py_to_value(&arg)?);
                    }
                    let result = func(&values)
                        .map_err(|error| PyRuntimeError::new_err(error.to_string()))?;
                    value_to_py(py, &result)
                },
            )?;
            globals.set_item(name, wrapped)
        }
    }
}

fn classify_error(py: Python<'_>, error: PyErr) -> ScriptError {
    let stack = error
        .traceback_bound(py)
        .and_then(|traceback| traceback.format().ok());
    if error.is_instance_of::<PySyntaxError>(py) {
        ScriptError::compile(error.to_string())
    } else {
        ScriptError::Runtime {
            message: error.to_string(),
            stack,
        }
    }
}

fn value_to_py(py: Python<'_>, value: &ScriptValue) -> PyResult<PyObject> {
    Ok(match value {
        ScriptValue::Unit => py.None(),
        ScriptValue::Bool(value) => (*value).into_py(py),
        ScriptValue::Int(value) => (*value).into_py(py),
        ScriptValue::Float(value) => (*value).into_py(py),
        ScriptValue::Str(value) => value.as_str().into_py(py),
        ScriptValue::List(items) => {
            let list = PyList::empty_bound(py);
            for item in items {
                list.append(value_to_py(py, item)?)?;
            }
            list.into_py(py)
        }
    })
}

fn py_to_value(value: &Bound<'_, PyAny>) -> PyResult<ScriptValue> {
    if value.is_none() {
        return Ok(ScriptValue::Unit);
    }
    // bool subclasses int in Python, so it must be checked first.
    if let Ok(b) = value.downcast::<PyBool>() {
        return Ok(ScriptValue::Bool(b.is_true()));
    }
    if let Ok(i) = value.extract::<i64>() {
        return Ok(ScriptValue::Int(i));
    }
    if let Ok(f) = value.extract::<f64>() {
        return Ok(ScriptValue::Float(f));
    }
    if let Ok(s) = value.extract::<String>() {
        return Ok(ScriptValue::Str(s));
    }
    if let Ok(list) = value.downcast::<PyList>() {
        let mut items = Vec::with_capacity(list.len());
        for item in list.iter() {
            items.push(py_to_value(&item)?);
        }
        return Ok(ScriptValue::List(items));
    }
    Err(PyRuntimeError::new_err(format!(
        "unsupported value of type {} crossing the host boundary",
        value.get_type()
    )))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::bindings::TypeDescriptor;

    fn script(source: &str) -> PythonScript {
        PythonScript::new("test", Path::new("test.py"), Ok(source.to_string()))
    }

    fn loaded(source: &str, bindings: &BindingTable) -> PythonScript {
        let mut script = script(source);
        script.load(bindings).unwrap();
        script
    }

    #[test]
    fn bindings_live_in_private_globals() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let mut bindings = BindingTable::new();
        bindings
            .register_method("take", 1, move |args| {
                sink.lock().unwrap().push(args[0].clone());
                Ok(ScriptValue::Unit)
            })
            .unwrap();
        bindings.register_field("width", 640_i64).unwrap();
        bindings
            .register_type(TypeDescriptor::new("Layer").constant("Background", "Background"))
            .unwrap();

        let source = "assert width == 640\ntake(Layer.Background)\ntake(2.5)\n";
        let mut script = loaded(source, &bindings);
        script.perform().unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], ScriptValue::Str("Background".into()));
        assert_eq!(seen[1], ScriptValue::Float(2.5));
    }

    #[test]
    fn scripts_do_not_share_globals() {
        let mut first = loaded("leak = 'yes'\n", &BindingTable::new());
        first.perform().unwrap();

        let mut second = loaded(
            "try:\n    leak\n    raise RuntimeError('leaked')\nexcept NameError:\n    pass\n",
            &BindingTable::new(),
        );
        second.perform().unwrap();
    }

    #[test]
    fn syntax_errors_classify_as_compile() {
        let mut script = loaded("def broken(:\n", &BindingTable::new());
        let err = script.perform().unwrap_err();
        assert!(matches!(err, ScriptError::Compile { .. }), "got {err}");
        assert_eq!(script.state(), ScriptState::Faulted);
    }

    #[test]
    fn exceptions_classify_as_runtime_with_traceback() {
        let mut script = loaded("raise ValueError('kaboom')\n", &BindingTable::new());
        let err = script.perform().unwrap_err();
        match &err {
            ScriptError::Runtime { message, stack } => {
                assert!(message.contains("kaboom"));
                assert!(stack.is_some());
            }
            other => panic!("expected runtime error, got {other}"),
        }
        assert_eq!(script.state(), ScriptState::Faulted);
    }

    #[test]
    fn host_errors_are_catchable_as_exceptions() {
        let mut bindings = BindingTable::new();
        bindings
            .register_method("fail", 0, |_| Err(HostError::Other("host says no".into())))
            .unwrap();

        let source = "\
try:
    fail()
except RuntimeError as e:
    caught = str(e)
assert 'host says no' in caught
";
        let mut script = loaded(source, &bindings);
        script.perform().unwrap();
    }

    #[test]
    fn dispose_is_idempotent() {
        let mut script = loaded("x = 1\n", &BindingTable::new());
        script.perform().unwrap();
        script.dispose().unwrap();
        script.dispose().unwrap();
        assert_eq!(script.state(), ScriptState::Disposed);
        assert!(script.perform().is_err());
    }
}
