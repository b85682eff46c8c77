//! Engine-neutral host bindings.
//!
//! The host describes its API once, as a [`BindingTable`], and every language
//! adapter projects that table into its engine's native environment. Values
//! crossing the boundary travel as [`ScriptValue`], the common denominator
//! all three engines can represent losslessly.

use std::fmt;
use std::sync::Arc;

use crate::errors::{HostError, ScriptError};

/// A value crossing the host / script boundary, in either direction.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ScriptValue>),
}

impl ScriptValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ScriptValue::Unit => "unit",
            ScriptValue::Bool(_) => "bool",
            ScriptValue::Int(_) => "int",
            ScriptValue::Float(_) => "float",
            ScriptValue::Str(_) => "string",
            ScriptValue::List(_) => "list",
        }
    }

    /// Numeric read. Integers widen to `f64`, so scripts may write `0` where
    /// the host expects `0.0`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScriptValue::Int(value) => Some(*value as f64),
            ScriptValue::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// Integer read. Floats are accepted only when the conversion is exact;
    /// Lua has a single number type and `3` often arrives as `3.0`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ScriptValue::Int(value) => Some(*value),
            ScriptValue::Float(value) if value.fract() == 0.0 && value.is_finite() => {
                Some(*value as i64)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptValue::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScriptValue::Bool(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptValue::Unit => f.write_str("()"),
            ScriptValue::Bool(value) => write!(f, "{value}"),
            ScriptValue::Int(value) => write!(f, "{value}"),
            ScriptValue::Float(value) => write!(f, "{value}"),
            ScriptValue::Str(value) => f.write_str(value),
            ScriptValue::List(items) => {
                f.write_str("[")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<bool> for ScriptValue {
    fn from(value: bool) -> Self {
        ScriptValue::Bool(value)
    }
}

impl From<i64> for ScriptValue {
    fn from(value: i64) -> Self {
        ScriptValue::Int(value)
    }
}

impl From<f64> for ScriptValue {
    fn from(value: f64) -> Self {
        ScriptValue::Float(value)
    }
}

impl From<&str> for ScriptValue {
    fn from(value: &str) -> Self {
        ScriptValue::Str(value.to_string())
    }
}

impl From<String> for ScriptValue {
    fn from(value: String) -> Self {
        ScriptValue::Str(value)
    }
}

/// The one callable shape every engine can wrap.
///
/// `Send + Sync` because the Python closures capture it across a `'static`
/// boundary; the host functions themselves hold only shared state.
pub type HostFn = Arc<dyn Fn(&[ScriptValue]) -> Result<ScriptValue, HostError> + Send + Sync>;

/// A named constant namespace, installed for scripts as a table / object with
/// one field per constant. Used for the `Layer`, `Origin` and `Loop` sets.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    name: String,
    constants: Vec<(String, ScriptValue)>,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        TypeDescriptor {
            name: name.into(),
            constants: Vec::new(),
        }
    }

    pub fn constant(mut self, name: impl Into<String>, value: impl Into<ScriptValue>) -> Self {
        self.constants.push((name.into(), value.into()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn constants(&self) -> &[(String, ScriptValue)] {
        &self.constants
    }
}

/// One installed binding.
#[derive(Clone)]
pub enum Binding {
    /// A callable with a fixed argument count.
    Method { func: HostFn, arity: usize },
    /// A plain value.
    Field(ScriptValue),
    /// A constant namespace.
    Type(TypeDescriptor),
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Method { arity, .. } => write!(f, "Method {{ arity: {arity} }}"),
            Binding::Field(value) => write!(f, "Field({value:?})"),
            Binding::Type(descriptor) => write!(f, "Type({:?})", descriptor.name),
        }
    }
}

/// Ordered, name-keyed table of host bindings.
///
/// Adapters apply entries in insertion order, so every language observes the
/// same environment built the same way. Names must be plain identifiers
/// (valid in all three languages) and must be unique; a duplicate is a
/// registration error rather than a silent override.
#[derive(Debug, Clone, Default)]
pub struct BindingTable {
    entries: Vec<(String, Binding)>,
}

impl BindingTable {
    pub fn new() -> Self {
        BindingTable::default()
    }

    /// Registers a callable. `arity` is the exact argument count scripts must
    /// supply; adapters enforce it at call time.
    pub fn register_method<F>(&mut self, name: &str, arity: usize, func: F) -> Result<(), ScriptError>
    where
        F: Fn(&[ScriptValue]) -> Result<ScriptValue, HostError> + Send + Sync + 'static,
    {
        self.insert(
            name,
            Binding::Method {
                func: Arc::new(func),
                arity,
            },
        )
    }

    pub fn register_field(
        &mut self,
        name: &str,
        value: impl Into<ScriptValue>,
    ) -> Result<(), ScriptError> {
        self.insert(name, Binding::Field(value.into()))
    }

    pub fn register_type(&mut self, descriptor: TypeDescriptor) -> Result<(), ScriptError> {
        for (constant, _) in descriptor.constants() {
            if !is_identifier(constant) {
                return Err(ScriptError::registration(format!(
                    "constant '{constant}' of type '{}' is not a valid identifier",
                    descriptor.name()
                )));
            }
        }
        let name = descriptor.name().to_string();
        self.insert(&name, Binding::Type(descriptor))
    }

    fn insert(&mut self, name: &str, binding: Binding) -> Result<(), ScriptError> {
        if !is_identifier(name) {
            return Err(ScriptError::registration(format!(
                "binding name '{name}' is not a valid identifier"
            )));
        }
        if self.contains(name) {
            return Err(ScriptError::registration(format!(
                "binding name '{name}' is already registered"
            )));
        }
        self.entries.push((name.to_string(), binding));
        Ok(())
    }

    /// Entries in insertion order. This *is* the application order.
    pub fn entries(&self) -> &[(String, Binding)] {
        &self.entries
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(entry, _)| entry == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}
