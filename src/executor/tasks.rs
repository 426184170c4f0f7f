//! Built-in task handlers shipped with `taskd`.

use super::registry::{HandlerError, HandlerResult, TaskHandler, TaskRegistry, TaskRegistryBuilder};

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Divides the first argument by the second. Integer inputs that divide evenly
/// stay integers; everything else is computed as floating point.
pub struct Divide;

#[async_trait]
impl TaskHandler for Divide {
    async fn execute(&self, args: Vec<Value>) -> HandlerResult {
        let (x, y) = two_numbers("divide", &args)?;

        if let (Some(a), Some(b)) = (x.as_i64(), y.as_i64()) {
            if b == 0 {
                return Err(HandlerError::Arithmetic("division by zero".to_string()));
            }
            let quotient = a
                .checked_div(b)
                .ok_or_else(|| HandlerError::Arithmetic("integer overflow".to_string()))?;
            if a % b == 0 {
                return Ok(Value::from(quotient));
            }
        }

        let (a, b) = (as_f64(x), as_f64(y));
        if b == 0.0 {
            return Err(HandlerError::Arithmetic("division by zero".to_string()));
        }
        Ok(Value::from(a / b))
    }
}

/// Adds two numbers.
pub struct Add;

#[async_trait]
impl TaskHandler for Add {
    async fn execute(&self, args: Vec<Value>) -> HandlerResult {
        let (x, y) = two_numbers("add", &args)?;

        if let (Some(a), Some(b)) = (x.as_i64(), y.as_i64()) {
            return a
                .checked_add(b)
                .map(Value::from)
                .ok_or_else(|| HandlerError::Arithmetic("integer overflow".to_string()));
        }
        Ok(Value::from(as_f64(x) + as_f64(y)))
    }
}

/// Sleeps for the given number of seconds, then returns them. Stands in for
/// long-running work.
pub struct Sleep;

#[async_trait]
impl TaskHandler for Sleep {
    async fn execute(&self, args: Vec<Value>) -> HandlerResult {
        let seconds = args
            .first()
            .and_then(Value::as_f64)
            .filter(|s| s.is_finite() && *s >= 0.0)
            .ok_or_else(|| {
                HandlerError::InvalidArguments(
                    "sleep expects one non-negative number of seconds".to_string(),
                )
            })?;

        let duration = Duration::try_from_secs_f64(seconds).map_err(|e| {
            HandlerError::InvalidArguments(format!("sleep duration {} is out of range: {}", seconds, e))
        })?;

        tokio::time::sleep(duration).await;
        Ok(Value::from(seconds))
    }
}

/// Registers every built-in handler.
pub fn register_builtin(builder: TaskRegistryBuilder) -> TaskRegistryBuilder {
    builder
        .register("divide", Divide)
        .register("add", Add)
        .register("sleep", Sleep)
}

/// A registry holding only the built-in handlers.
pub fn builtin_registry() -> TaskRegistry {
    register_builtin(TaskRegistry::builder()).build()
}

fn two_numbers<'a>(task: &str, args: &'a [Value]) -> Result<(&'a Value, &'a Value), HandlerError> {
    match args {
        [x, y] if x.is_number() && y.is_number() => Ok((x, y)),
        _ => Err(HandlerError::InvalidArguments(format!(
            "{} expects two numbers, got {}",
            task,
            Value::from(args.to_vec())
        ))),
    }
}

fn as_f64(value: &Value) -> f64 {
    value.as_f64().unwrap_or(f64::NAN)
}
