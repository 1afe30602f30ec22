//! Entries served by the bundled worker executable.

use std::time::Duration;

use outpost_core::{OperationTable, Registry, Scope, arg};
use serde_json::{Value, json};

/// Every entry this executable can serve.
pub fn registry() -> Registry {
    Registry::new()
        .register("math", math)
        .register("timing", timing)
        .register("captures", captures)
        .register("echo", echo)
        .register("faults", faults)
}

fn math(_: &Scope) -> OperationTable {
    OperationTable::new()
        .with_sync("square", |args| {
            let x: i64 = arg(&args, 0)?;
            Ok(json!(x * x))
        })
        .with_sync("add", |args| {
            let a: i64 = arg(&args, 0)?;
            let b: i64 = arg(&args, 1)?;
            Ok(json!(a + b))
        })
        .with_sync("fail", |_| Err("boom".to_string()))
}

fn timing(_: &Scope) -> OperationTable {
    OperationTable::new()
        .with_async("sleep", |args| async move {
            let ms: u64 = arg(&args, 0)?;
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok::<_, String>(args.get(1).cloned().unwrap_or(json!(ms)))
        })
        .with_async("hang", |_| std::future::pending())
}

fn captures(scope: &Scope) -> OperationTable {
    let config = scope.value("config").cloned().unwrap_or(Value::Null);
    let log = scope.function("log");

    OperationTable::new()
        .with_sync("config", move |_| Ok(config.clone()))
        .with_sync("log_n", move |args| {
            let n: usize = arg(&args, 0)?;
            let log = log.as_ref().ok_or("log was not captured")?;
            for i in 0..n {
                log.call(vec![json!(i)]);
            }
            Ok(json!(n))
        })
}

fn echo(_: &Scope) -> OperationTable {
    OperationTable::new().with_sync("echo", |args| Ok(Value::Array(args)))
}

/// Misbehaving operations, for exercising failure handling.
fn faults(_: &Scope) -> OperationTable {
    OperationTable::new()
        .with_sync("panic", |_| panic!("deliberate panic"))
        .with_sync("exit", |args| {
            let code: i32 = arg(&args, 0).unwrap_or(1);
            std::process::exit(code)
        })
}
