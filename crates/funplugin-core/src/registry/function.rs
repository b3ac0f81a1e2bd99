//! Registered function entries and the conversions that build them.
//!
//! Every registered function is stored in one uniform shape,
//! `Fn(&[Value]) -> anyhow::Result<ReturnValue>`, tagged with its arity.
//! Typed closures are adapted to that shape by deserializing each positional
//! argument with serde.

use crate::codec::ReturnValue;
use crate::{PluginError, Result};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Uniform callable shape stored in the registry.
pub type CallFn = dyn Fn(&[Value]) -> anyhow::Result<ReturnValue> + Send + Sync;

/// Number of positional arguments a function accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    Variadic,
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match self {
            Arity::Exact(n) => *n == count,
            Arity::Variadic => true,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{}", n),
            Arity::Variadic => write!(f, "any"),
        }
    }
}

/// A positional argument that could not be converted to the parameter type.
#[derive(Debug, thiserror::Error)]
#[error("argument {index}: {message}")]
pub(crate) struct ArgumentError {
    pub index: usize,
    pub message: String,
}

/// A function entry: its name, declared arity and callable.
#[derive(Clone)]
pub struct RegisteredFunction {
    name: String,
    arity: Arity,
    func: Arc<CallFn>,
}

impl fmt::Debug for RegisteredFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredFunction")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

impl RegisteredFunction {
    pub(crate) fn new(name: impl Into<String>, arity: Arity, func: Arc<CallFn>) -> Self {
        Self {
            name: name.into(),
            arity,
            func,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> Arity {
        self.arity
    }

    /// Check the argument count, then call the function.
    ///
    /// Argument conversion failures become `ArgumentType`; any other error
    /// raised by the function becomes `InvocationFailed`.
    pub fn invoke(&self, args: &[Value]) -> Result<ReturnValue> {
        if let Arity::Exact(expected) = self.arity {
            if expected != args.len() {
                return Err(PluginError::ArityMismatch {
                    name: self.name.clone(),
                    expected,
                    got: args.len(),
                });
            }
        }

        (self.func)(args).map_err(|err| self.classify_error(err))
    }

    fn classify_error(&self, err: anyhow::Error) -> PluginError {
        let err = match err.downcast::<ArgumentError>() {
            Ok(arg) => {
                return PluginError::ArgumentType {
                    name: self.name.clone(),
                    index: arg.index,
                    message: arg.message,
                }
            }
            Err(err) => err,
        };
        match err.downcast::<PluginError>() {
            Ok(plugin_err) => plugin_err,
            Err(err) => PluginError::InvocationFailed {
                name: self.name.clone(),
                message: format!("{:#}", err),
            },
        }
    }
}

/// Conversion of a function's return type into a call result.
pub trait IntoCallResult {
    fn into_call_result(self) -> anyhow::Result<ReturnValue>;
}

macro_rules! impl_into_call_result {
    ($($t:ty),*) => {
        $(
            impl IntoCallResult for $t {
                fn into_call_result(self) -> anyhow::Result<ReturnValue> {
                    Ok(self.into())
                }
            }
        )*
    };
}

impl_into_call_result!(
    i8, i16, i32, i64, u8, u16, u32, u64, f32, f64, bool, (),
    String, &'static str, Value, Map<String, Value>, ReturnValue
);

impl<T: Into<Value>> IntoCallResult for Vec<T> {
    fn into_call_result(self) -> anyhow::Result<ReturnValue> {
        Ok(self.into())
    }
}

impl<T: Into<Value>> IntoCallResult for HashMap<String, T> {
    fn into_call_result(self) -> anyhow::Result<ReturnValue> {
        Ok(self.into())
    }
}

impl<T: Into<Value>> IntoCallResult for BTreeMap<String, T> {
    fn into_call_result(self) -> anyhow::Result<ReturnValue> {
        Ok(self.into())
    }
}

impl<T: Into<ReturnValue>> IntoCallResult for Option<T> {
    fn into_call_result(self) -> anyhow::Result<ReturnValue> {
        Ok(self.into())
    }
}

impl<T, E> IntoCallResult for std::result::Result<T, E>
where
    T: Into<ReturnValue>,
    E: Into<anyhow::Error>,
{
    fn into_call_result(self) -> anyhow::Result<ReturnValue> {
        self.map(Into::into).map_err(Into::into)
    }
}

/// Deserialize the positional argument at `index`.
pub(crate) fn parse_arg<T: DeserializeOwned>(args: &[Value], index: usize) -> anyhow::Result<T> {
    let value = args.get(index).cloned().unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|e| {
        anyhow::Error::new(ArgumentError {
            index,
            message: e.to_string(),
        })
    })
}

/// A typed closure with a fixed number of parameters.
///
/// `Marker` is the parameter tuple; it only exists so that one closure type
/// picks exactly one implementation.
pub trait IntoPluginFunction<Marker>: Send + Sync + 'static {
    fn into_parts(self) -> (Arity, Arc<CallFn>);
}

macro_rules! impl_plugin_function {
    ($n:expr; $($arg:ident : $idx:tt),*) => {
        impl<F, R, $($arg,)*> IntoPluginFunction<($($arg,)*)> for F
        where
            F: Fn($($arg),*) -> R + Send + Sync + 'static,
            R: IntoCallResult,
            $($arg: DeserializeOwned,)*
        {
            #[allow(unused_variables)]
            fn into_parts(self) -> (Arity, Arc<CallFn>) {
                let f = self;
                let call = move |args: &[Value]| -> anyhow::Result<ReturnValue> {
                    f($(parse_arg::<$arg>(args, $idx)?),*).into_call_result()
                };
                (Arity::Exact($n), Arc::new(call))
            }
        }
    };
}

impl_plugin_function!(0;);
impl_plugin_function!(1; A: 0);
impl_plugin_function!(2; A: 0, B: 1);
impl_plugin_function!(3; A: 0, B: 1, C: 2);
impl_plugin_function!(4; A: 0, B: 1, C: 2, D: 3);

/// Adapt a closure over all arguments, each converted to `T`.
pub(crate) fn variadic<T, F, R>(f: F) -> Arc<CallFn>
where
    T: DeserializeOwned,
    F: Fn(Vec<T>) -> R + Send + Sync + 'static,
    R: IntoCallResult,
{
    Arc::new(move |args: &[Value]| -> anyhow::Result<ReturnValue> {
        let parsed = (0..args.len())
            .map(|index| parse_arg::<T>(args, index))
            .collect::<anyhow::Result<Vec<T>>>()?;
        f(parsed).into_call_result()
    })
}
