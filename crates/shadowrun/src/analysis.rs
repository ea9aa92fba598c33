//! # Remote Analyses
//!
//! Pluggable handlers on the server side, and the registry that binds wire method ids
//! to them.
//!
//! An analysis is installed under a prefix. A `RegisterMethod` frame for
//! `"{prefix}.{method}"` binds its id to that analysis; every record carrying the id
//! is then delivered to `handle` with the method name attached.

use std::collections::HashMap;
use std::sync::Arc;

use shadowpack::TypedValue;
use shadowwire::MethodId;

use crate::heap;
use crate::heap::ShadowHeap;
use crate::heap::ShadowObject;
use crate::registration::RegistrationError;
use crate::registration::split_method_name;

/// A failure raised by analysis code. Fatal to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    /// An argument was missing or of the wrong kind.
    BadArgument { index: usize, expected: &'static str },
    /// The analysis has no handler for a method it accepted.
    UnhandledMethod(String),
    Failed(String),
}

impl AnalysisError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

impl std::fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadArgument { index, expected } => {
                write!(f, "argument {} is not {}", index, expected)
            }
            Self::UnhandledMethod(m) => write!(f, "no handler for method {:?}", m),
            Self::Failed(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for AnalysisError {}

/// One decoded argument, with heap references resolved.
#[derive(Debug, Clone)]
pub enum Argument {
    Bool(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
    Bytes(Vec<u8>),
    /// A live object reference. `None` is the null reference.
    Object(Option<Arc<ShadowObject>>),
}

impl Argument {
    /// Converts a wire value, resolving object references through the heap.
    pub fn resolve(value: TypedValue, heap: &ShadowHeap) -> heap::Result<Self> {
        Ok(match value {
            TypedValue::Bool(v) => Argument::Bool(v),
            TypedValue::Byte(v) => Argument::Byte(v),
            TypedValue::Char(v) => Argument::Char(v),
            TypedValue::Short(v) => Argument::Short(v),
            TypedValue::Int(v) => Argument::Int(v),
            TypedValue::Long(v) => Argument::Long(v),
            TypedValue::Float(v) => Argument::Float(v),
            TypedValue::Double(v) => Argument::Double(v),
            TypedValue::Str(v) => Argument::Str(v),
            TypedValue::Bytes(v) => Argument::Bytes(v),
            TypedValue::Object(r) | TypedValue::ObjectWithData(r) => {
                Argument::Object(heap.resolve(r)?)
            }
        })
    }
}

/// A single event as seen by an analysis.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// The method part of the registered name (`onAdd` for `X.onAdd`).
    pub method: Arc<str>,
    pub method_id: MethodId,
    pub ordering_id: u64,
    pub args: Vec<Argument>,
}

impl Invocation {
    pub fn arg(&self, index: usize) -> Option<&Argument> {
        self.args.get(index)
    }

    /// The object at `index`; `Ok(None)` for a null reference.
    pub fn object(&self, index: usize) -> Result<Option<&Arc<ShadowObject>>, AnalysisError> {
        match self.args.get(index) {
            Some(Argument::Object(o)) => Ok(o.as_ref()),
            _ => Err(AnalysisError::BadArgument { index, expected: "an object" }),
        }
    }

    pub fn int(&self, index: usize) -> Result<i32, AnalysisError> {
        match self.args.get(index) {
            Some(Argument::Int(v)) => Ok(*v),
            _ => Err(AnalysisError::BadArgument { index, expected: "an int" }),
        }
    }

    pub fn long(&self, index: usize) -> Result<i64, AnalysisError> {
        match self.args.get(index) {
            Some(Argument::Long(v)) => Ok(*v),
            _ => Err(AnalysisError::BadArgument { index, expected: "a long" }),
        }
    }

    pub fn str(&self, index: usize) -> Result<&str, AnalysisError> {
        match self.args.get(index) {
            Some(Argument::Str(v)) => Ok(v),
            _ => Err(AnalysisError::BadArgument { index, expected: "a string" }),
        }
    }
}

/// A pluggable analysis running in the server.
///
/// Callbacks run on the single dispatch task, in stream order. A handler that blocks
/// stalls the whole session.
pub trait RemoteAnalysis: Send {
    fn name(&self) -> &str;

    /// Whether this analysis handles `method`. Checked once, at registration.
    fn accepts(&self, _method: &str) -> bool {
        true
    }

    fn handle(&mut self, invocation: &Invocation) -> Result<(), AnalysisError>;

    /// The object no longer exists in the instrumented process. Called at most once
    /// per shadow object.
    fn on_free(&mut self, _object: &ShadowObject) {}

    /// The session has ended. Called exactly once after the last event.
    fn on_exit(&mut self) {}
}

struct Installed {
    prefix: String,
    analysis: Box<dyn RemoteAnalysis>,
}

/// A method id bound to an analysis.
#[derive(Debug, Clone)]
pub struct Binding {
    pub name: Arc<str>,
    pub method: Arc<str>,
    analysis: usize,
}

/// The analyses of one session and the method ids bound to them.
#[derive(Default)]
pub struct AnalysisRegistry {
    installed: Vec<Installed>,
    prefixes: HashMap<String, usize>,
    bindings: HashMap<MethodId, Binding>,
}

impl AnalysisRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `analysis` under `prefix`. Installation order is `on_exit` order.
    pub fn install(
        &mut self,
        prefix: impl Into<String>,
        analysis: Box<dyn RemoteAnalysis>,
    ) -> Result<(), RegistrationError> {
        let prefix = prefix.into();
        if self.prefixes.contains_key(&prefix) {
            return Err(RegistrationError::DuplicatePrefix(prefix));
        }
        self.prefixes.insert(prefix.clone(), self.installed.len());
        self.installed.push(Installed { prefix, analysis });
        Ok(())
    }

    /// Chainable form of `install` for building a registry up front.
    pub fn with(
        mut self,
        prefix: impl Into<String>,
        analysis: Box<dyn RemoteAnalysis>,
    ) -> Result<Self, RegistrationError> {
        self.install(prefix, analysis)?;
        Ok(self)
    }

    /// Binds a wire id to the analysis named by the prefix of `name`.
    ///
    /// Rebinding an id to the name it already has is accepted.
    pub fn bind(&mut self, id: MethodId, name: &str) -> Result<(), RegistrationError> {
        if id.0 == 0 {
            return Err(RegistrationError::ReservedId);
        }
        if let Some(existing) = self.bindings.get(&id) {
            if &*existing.name == name {
                return Ok(());
            }
            return Err(RegistrationError::Conflict {
                id,
                existing: existing.name.to_string(),
                requested: name.to_string(),
            });
        }

        let (prefix, method) = split_method_name(name)?;
        let Some(&index) = self.prefixes.get(prefix) else {
            return Err(RegistrationError::UnknownAnalysis(name.to_string()));
        };
        if !self.installed[index].analysis.accepts(method) {
            return Err(RegistrationError::Unsupported(name.to_string()));
        }

        self.bindings.insert(id, Binding {
            name: Arc::from(name),
            method: Arc::from(method),
            analysis: index,
        });
        Ok(())
    }

    pub fn binding(&self, id: MethodId) -> Option<&Binding> {
        self.bindings.get(&id)
    }

    /// Delivers an invocation to the analysis its id is bound to.
    pub(crate) fn deliver(&mut self, binding: &Binding, invocation: &Invocation) -> Result<(), AnalysisError> {
        self.installed[binding.analysis].analysis.handle(invocation)
    }

    /// Calls `f` on every analysis in installation order.
    pub fn for_each(&mut self, mut f: impl FnMut(&mut dyn RemoteAnalysis)) {
        for installed in &mut self.installed {
            f(installed.analysis.as_mut());
        }
    }

    /// Installed prefixes in installation order.
    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.installed.iter().map(|i| i.prefix.as_str())
    }

    pub fn len(&self) -> usize {
        self.installed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.installed.is_empty()
    }
}
