//! Example functions served by the plugin binary.

use funplugin::{FunctionRegistry, ReturnValue};
use serde_json::{Number, Value};
use tracing::warn;

/// Register the example function set.
pub fn register_all(registry: &FunctionRegistry) {
    registry.register_variadic("sum", sum);
    registry.register_variadic("sum_ints", sum_ints);
    registry.register_variadic("concatenate", concatenate);
    registry.register("sum_two_int", sum_two_int);
    registry.register("sum_two_string", |a: String, b: String| a + &b);
    registry.register_variadic("sum_strings", |args: Vec<String>| args.concat());
    registry.register("setup_hook_example", setup_hook_example);
    registry.register("teardown_hook_example", teardown_hook_example);
}

/// Sum any numbers. Stays integral unless a float is involved.
fn sum(args: Vec<Number>) -> ReturnValue {
    let ints: Option<Vec<i64>> = args.iter().map(Number::as_i64).collect();
    match ints {
        Some(ints) => ReturnValue::Integer(ints.into_iter().map(i128::from).sum()),
        None => ReturnValue::Float(args.iter().filter_map(Number::as_f64).sum()),
    }
}

fn sum_ints(args: Vec<i64>) -> ReturnValue {
    ReturnValue::Integer(args.into_iter().map(i128::from).sum())
}

fn sum_two_int(a: i64, b: i64) -> ReturnValue {
    ReturnValue::Integer(i128::from(a) + i128::from(b))
}

fn concatenate(args: Vec<Value>) -> String {
    args.iter().map(display).collect()
}

fn setup_hook_example(name: Value) -> String {
    warn!("setup_hook_example");
    format!("setup_hook_example: {}", display(&name))
}

fn teardown_hook_example(name: Value) -> String {
    warn!("teardown_hook_example");
    format!("teardown_hook_example: {}", display(&name))
}

// Strings render bare. Everything else renders as its JSON text, so booleans
// and null come out as `true`, `false` and `null`.
fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
