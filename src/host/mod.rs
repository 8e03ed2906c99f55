//! # Host
//!
//! This module covers the collaborators the host process provides: function lookup, body access,
//! instrumentation and domain object tables. The lifecycle only ever talks to a [`Host`].

#[cfg(target_arch = "x86_64")]
pub mod native;

use std::collections::HashMap;
use std::fmt::{self, Display};

use thiserror::Error;

use crate::domain::ObjectTables;
use crate::instrument::Instrumentation;

/// Errors when a target function or domain object can't be found
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnresolvedTarget {
    /// No function is registered under the identifier
    #[error("function `{id}` is not registered")]
    FunctionMissing {
        /// Stable identifier that was looked up
        id: String,
    },
    /// The function's body is not mapped or not readable
    #[error("body at {address:#x} ({size} bytes) is not readable")]
    BodyUnreadable {
        /// Start of the body
        address: usize,
        /// Length of the body
        size: usize,
    },
    /// No domain object carries the identifier
    #[error("domain object `{id}` was not found")]
    ObjectMissing {
        /// Stable identifier that was looked up
        id: String,
    },
}

/// Opaque reference to a function in the host process.
///
/// Identity is the load address; the size bounds the body that gets fingerprinted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionHandle {
    /// Address the function was loaded at
    address: usize,
    /// Length of the compiled body in bytes
    size: usize,
}
impl FunctionHandle {
    /// Creates a handle for the body at `address`
    pub const fn new(address: usize, size: usize) -> Self {
        Self { address, size }
    }
    /// Address the function was loaded at
    pub const fn address(&self) -> usize {
        self.address
    }
    /// Length of the compiled body
    pub const fn size(&self) -> usize {
        self.size
    }
    /// Whether `target` falls inside this function's body
    pub fn contains(&self, target: u64) -> bool {
        let start = self.address as u64;
        target >= start && target < start + self.size as u64
    }
}
impl Display for FunctionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}+{:#x}", self.address, self.size)
    }
}

/// Resolves functions by a stable identifier
pub trait Functions {
    /// Looks up the function registered under `id`
    fn function(&self, id: &str) -> Option<FunctionHandle>;
}

/// Gives read access to compiled function bodies
pub trait BodyAccess {
    /// Reads the compiled body of `handle`
    fn read_body(&self, handle: &FunctionHandle) -> Result<Vec<u8>, UnresolvedTarget>;
}

/// Everything a patch needs from the host process
pub trait Host: Functions + BodyAccess + Instrumentation + ObjectTables {}
impl<T> Host for T where T: Functions + BodyAccess + Instrumentation + ObjectTables {}

/// Lookup table of function handles, built once at startup
#[derive(Debug, Default)]
pub struct FunctionTable {
    /// Registered handles keyed by their stable identifier
    functions: HashMap<String, FunctionHandle>,
}
impl FunctionTable {
    /// Creates an empty table
    pub fn new() -> Self {
        Self::default()
    }
    /// Registers `handle` under `id`, returning the handle it replaced
    pub fn register(&mut self, id: impl Into<String>, handle: FunctionHandle) -> Option<FunctionHandle> {
        self.functions.insert(id.into(), handle)
    }
    /// Whether `handle` was registered under any identifier
    pub fn is_registered(&self, handle: &FunctionHandle) -> bool {
        self.functions.values().any(|registered| registered == handle)
    }
    /// Number of registered functions
    pub fn len(&self) -> usize {
        self.functions.len()
    }
    /// Whether nothing has been registered
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}
impl Functions for FunctionTable {
    fn function(&self, id: &str) -> Option<FunctionHandle> {
        self.functions.get(id).copied()
    }
}
