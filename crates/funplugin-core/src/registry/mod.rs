//! Name-to-function registry.
//!
//! The registry is an explicit object built before serving and shared with
//! the server behind an `Arc`. Registration is last-write-wins and never
//! fails; signature checks happen at call time.
//!
//! # Thread Safety
//!
//! Entries live behind a `RwLock`, so `list_names` always reflects the live
//! registry. Registering while a server is running is permitted but not
//! coordinated with in-flight calls.

mod function;

pub use function::{Arity, CallFn, IntoCallResult, IntoPluginFunction, RegisteredFunction};

use crate::codec::ReturnValue;
use crate::{PluginError, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;

/// Registry of remotely invocable functions.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    functions: RwLock<HashMap<String, RegisteredFunction>>,
}

impl FunctionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed function with a fixed number of parameters.
    ///
    /// ```
    /// use funplugin::FunctionRegistry;
    ///
    /// let registry = FunctionRegistry::new();
    /// registry.register("sum_two_int", |a: i64, b: i64| a + b);
    /// assert!(registry.contains("sum_two_int"));
    /// ```
    pub fn register<M>(&self, name: impl Into<String>, f: impl IntoPluginFunction<M>) {
        let (arity, func) = f.into_parts();
        self.insert(RegisteredFunction::new(name, arity, func));
    }

    /// Register a function over any number of arguments, each converted to `T`.
    ///
    /// Use `serde_json::Value` as `T` to accept mixed argument types.
    pub fn register_variadic<T, F, R>(&self, name: impl Into<String>, f: F)
    where
        T: DeserializeOwned,
        F: Fn(Vec<T>) -> R + Send + Sync + 'static,
        R: IntoCallResult,
    {
        self.insert(RegisteredFunction::new(
            name,
            Arity::Variadic,
            function::variadic(f),
        ));
    }

    /// Register a function that works on the raw JSON arguments.
    pub fn register_raw<F>(&self, name: impl Into<String>, arity: Arity, f: F)
    where
        F: Fn(&[Value]) -> anyhow::Result<ReturnValue> + Send + Sync + 'static,
    {
        self.insert(RegisteredFunction::new(name, arity, Arc::new(f)));
    }

    fn insert(&self, function: RegisteredFunction) {
        info!(
            "register function: {} (arity {})",
            function.name(),
            function.arity()
        );
        let name = function.name().to_string();
        self.write().insert(name, function);
    }

    /// Remove a function. Returns whether it was registered.
    pub fn unregister(&self, name: &str) -> bool {
        self.write().remove(name).is_some()
    }

    /// All registered names, in no particular order.
    pub fn list_names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Look up a function by name.
    pub fn resolve(&self, name: &str) -> Result<RegisteredFunction> {
        self.read()
            .get(name)
            .cloned()
            .ok_or_else(|| PluginError::NotRegistered {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // A panicking registration cannot leave the map half-written, so a
    // poisoned lock is still safe to use.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, RegisteredFunction>> {
        self.functions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, RegisteredFunction>> {
        self.functions.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_and_resolve() {
        let registry = FunctionRegistry::new();
        assert!(registry.is_empty());

        registry.register("sum_two_int", |a: i64, b: i64| a + b);
        let f = registry.resolve("sum_two_int").unwrap();
        assert_eq!(f.invoke(&[json!(3), json!(4)]).unwrap(), ReturnValue::Integer(7));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_unknown_name() {
        let registry = FunctionRegistry::new();
        match registry.resolve("nonexistent") {
            Err(PluginError::NotRegistered { name }) => assert_eq!(name, "nonexistent"),
            other => panic!("Expected NotRegistered, got: {:?}", other),
        }
    }

    #[test]
    fn test_register_same_name_overwrites() {
        let registry = FunctionRegistry::new();
        registry.register("f", |a: i64| a + 1);
        registry.register("f", |a: i64| a * 10);

        assert_eq!(registry.list_names(), vec!["f".to_string()]);
        let f = registry.resolve("f").unwrap();
        assert_eq!(f.invoke(&[json!(5)]).unwrap(), ReturnValue::Integer(50));
    }

    #[test]
    fn test_overwrite_may_change_arity() {
        let registry = FunctionRegistry::new();
        registry.register("f", |a: i64| a);
        registry.register_variadic("f", |args: Vec<i64>| args.len() as u64);

        let f = registry.resolve("f").unwrap();
        assert_eq!(f.arity(), Arity::Variadic);
        assert_eq!(
            f.invoke(&[json!(1), json!(2), json!(3)]).unwrap(),
            ReturnValue::Integer(3)
        );
    }

    #[test]
    fn test_list_names_reflects_live_registry() {
        let registry = FunctionRegistry::new();
        registry.register("a", || 1);
        registry.register("b", || 2);

        let mut names = registry.list_names();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);

        assert!(registry.unregister("a"));
        assert!(!registry.unregister("a"));
        assert_eq!(registry.list_names(), vec!["b"]);
    }

    #[test]
    fn test_register_raw() {
        let registry = FunctionRegistry::new();
        registry.register_raw("first", Arity::Exact(1), |args: &[Value]| {
            Ok(ReturnValue::from_json(args[0].clone()))
        });

        let f = registry.resolve("first").unwrap();
        assert_eq!(f.invoke(&[json!("x")]).unwrap(), ReturnValue::Text("x".into()));
        assert!(f.invoke(&[]).is_err());
    }
}
