//! Method registry
//!
//! Built once at startup and then moved into a `Dispatcher`, after which it is only read. Lookups
//! need no locking even when many connections dispatch concurrently.

use std::collections::HashMap;

use serde_json::Value;

use crate::{
    envelope::Params,
    errors::{MethodError, RegistryError},
};

/// A named operation the dispatcher can invoke.
///
/// Implementations validate `params` themselves and report a shape mismatch as
/// [`MethodError::InvalidParams`]. Calls are synchronous and must not block indefinitely.
pub trait Method: Send + Sync {
    fn call(&self, params: Option<&Params>) -> Result<Value, MethodError>;
}

impl<F> Method for F
where
    F: Fn(Option<&Params>) -> Result<Value, MethodError> + Send + Sync,
{
    fn call(&self, params: Option<&Params>) -> Result<Value, MethodError> {
        self(params)
    }
}

#[derive(Default)]
pub struct MethodRegistry {
    methods: HashMap<String, Box<dyn Method>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<M>(&mut self, name: impl Into<String>, method: M) -> Result<(), RegistryError>
    where
        M: Method + 'static,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.methods.contains_key(&name) {
            return Err(RegistryError::DuplicateMethod(name));
        }

        self.methods.insert(name, Box::new(method));
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<&dyn Method> {
        self.methods.get(name).map(Box::as_ref)
    }

    /// Registered method names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl std::fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("methods", &self.names())
            .finish()
    }
}
