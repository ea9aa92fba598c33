//! # Method Registration
//!
//! Both sides agree on method names at build time; ids are assigned by the client
//! at run time and announced with `RegisterMethod` frames.
//!
//! ## Invariants
//! - **Sequential**: ids start at 1 and increase by one per new name. Id 0 is never
//!   handed out.
//! - **Idempotent**: a name registered twice gets the same id both times.

use std::collections::HashMap;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use shadowwire::MethodId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// All 65535 usable ids are taken.
    TooMany,
    /// Id 0 cannot be bound.
    ReservedId,
    /// An id already bound to one name was announced again with another.
    Conflict { id: MethodId, existing: String, requested: String },
    /// The name is not of the form `prefix.method`.
    MalformedName(String),
    /// No analysis is installed under the name's prefix.
    UnknownAnalysis(String),
    /// The analysis under the prefix does not handle this method.
    Unsupported(String),
    /// Two analyses were installed under the same prefix.
    DuplicatePrefix(String),
}

impl std::fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooMany => write!(f, "method id space exhausted"),
            Self::ReservedId => write!(f, "method id 0 is reserved"),
            Self::Conflict { id, existing, requested } => write!(
                f,
                "{} is bound to {:?}, cannot rebind to {:?}",
                id, existing, requested
            ),
            Self::MalformedName(name) => write!(f, "malformed method name {:?}", name),
            Self::UnknownAnalysis(name) => write!(f, "no analysis installed for {:?}", name),
            Self::Unsupported(name) => write!(f, "analysis does not handle {:?}", name),
            Self::DuplicatePrefix(prefix) => {
                write!(f, "an analysis is already installed under {:?}", prefix)
            }
        }
    }
}

impl std::error::Error for RegistrationError {}

pub type Result<T> = std::result::Result<T, RegistrationError>;

/// Splits `"a.b.Analysis.onAdd"` into `("a.b.Analysis", "onAdd")`.
pub fn split_method_name(name: &str) -> Result<(&str, &str)> {
    match name.rsplit_once('.') {
        Some((prefix, method)) if !prefix.is_empty() && !method.is_empty() => Ok((prefix, method)),
        _ => Err(RegistrationError::MalformedName(name.to_string())),
    }
}

/// The client's name to id table.
#[derive(Debug, Default)]
pub struct MethodTable {
    names: Mutex<HashMap<String, MethodId>>,
    registered: AtomicU32,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id for `name`, assigning the next one if the name is new.
    ///
    /// `announce` runs under the table lock for new names only, so announcements
    /// leave in id order and a concurrent caller with the same name does not return
    /// before the id has been announced. If it fails the id is not assigned.
    pub fn register<E>(
        &self,
        name: &str,
        announce: impl FnOnce(MethodId) -> std::result::Result<(), E>,
    ) -> std::result::Result<MethodId, E>
    where
        E: From<RegistrationError>,
    {
        let mut names = self.names.lock();
        if let Some(id) = names.get(name) {
            return Ok(*id);
        }

        let next = self.registered.load(Ordering::Acquire) + 1;
        let id = u16::try_from(next).map_err(|_| RegistrationError::TooMany)?;
        let id = MethodId(id);

        announce(id)?;
        names.insert(name.to_string(), id);
        self.registered.store(next, Ordering::Release);
        Ok(id)
    }

    /// True if `id` was handed out by this table. Lock-free.
    pub fn contains(&self, id: MethodId) -> bool {
        id.0 != 0 && u32::from(id.0) <= self.registered.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.registered.load(Ordering::Acquire) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
