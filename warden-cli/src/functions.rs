//! Built-in work functions
//!
//! The `warden` binary registers these in every role, so the watcher and
//! worker processes it re-launches resolve the same names as the parent.

use anyhow::{bail, Result};
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use warden_core::{FunctionRegistry, RegistryError, TaskArgs};

const BYTES_PER_GIB: f64 = (1u64 << 30) as f64;

/// Build the registry of built-in functions
pub fn builtin_registry() -> Result<FunctionRegistry, RegistryError> {
    FunctionRegistry::new()
        .with("double", double)?
        .with("echo", echo)?
        .with("sleep", sleep)?
        .with("fail", fail)?
        .with("panic", panic)?
        .with("abort", abort)?
        .with("allocate", allocate)?
        .with("large_output", large_output)
}

fn message_or_boom(args: &TaskArgs<'_>) -> Result<String> {
    if args.positional().is_empty() {
        args.kwarg_or("message", "boom".to_string())
    } else {
        args.arg(0)
    }
}

/// `double(x)`: `x * 2`
fn double(args: TaskArgs<'_>) -> Result<JsonValue> {
    let x: i64 = args.arg(0)?;
    Ok(json!(x * 2))
}

/// `echo(...)`: the arguments it was called with
fn echo(args: TaskArgs<'_>) -> Result<JsonValue> {
    Ok(json!({
        "args": args.positional(),
        "kwargs": args.named(),
    }))
}

/// `sleep(seconds)`: block, then return `seconds`
fn sleep(args: TaskArgs<'_>) -> Result<JsonValue> {
    let seconds: f64 = args.arg(0)?;
    std::thread::sleep(Duration::try_from_secs_f64(seconds)?);
    Ok(json!(seconds))
}

/// `fail(message = "boom")`: return an error
fn fail(args: TaskArgs<'_>) -> Result<JsonValue> {
    let message = message_or_boom(&args)?;
    bail!("{}", message)
}

/// `panic(message = "boom")`: panic inside the work function
fn panic(args: TaskArgs<'_>) -> Result<JsonValue> {
    let message = message_or_boom(&args)?;
    panic!("{}", message)
}

/// `abort()`: take the whole worker process down without a result
fn abort(_args: TaskArgs<'_>) -> Result<JsonValue> {
    std::process::abort()
}

/// `allocate(gib, hold_seconds = 5.0)`: keep `gib` of touched memory resident for a while
fn allocate(args: TaskArgs<'_>) -> Result<JsonValue> {
    let gib: f64 = args.arg(0)?;
    let hold_seconds: f64 = args.kwarg_or("hold_seconds", 5.0)?;
    if !gib.is_finite() || gib < 0.0 {
        bail!("cannot allocate {} GiB", gib);
    }

    // Non-zero fill so every page is written and counted as resident
    let buffer = vec![1u8; (gib * BYTES_PER_GIB) as usize];
    std::thread::sleep(Duration::try_from_secs_f64(hold_seconds)?);
    Ok(json!(std::hint::black_box(&buffer).len()))
}

/// `large_output(bytes)`: a string of `bytes` characters
fn large_output(args: TaskArgs<'_>) -> Result<JsonValue> {
    let bytes: usize = args.arg(0)?;
    Ok(json!("x".repeat(bytes)))
}
