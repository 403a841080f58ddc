//! Context served by `ferry serve`.

use std::sync::Arc;
use std::time::Duration;

use ferry::host::{Buffer, Class, Date, Set};
use ferry::{Args, Error, Function, Local, Record, Value};

pub(crate) fn context() -> Record {
    let counter = Arc::new(Record::new().with("value", 0));
    let inc = {
        let counter = Arc::clone(&counter);
        Function::sync("inc", move |args| {
            let by = args.get(0).as_i64().unwrap_or(1);
            let next = counter.lookup("value").and_then(|v| v.as_i64()).unwrap_or(0) + by;
            counter.insert("value", next);
            Ok(Value::from(next))
        })
    };
    counter.insert("inc", Value::local(inc));

    Record::new()
        .with(
            "config",
            Value::from_json(serde_json::json!({
                "name": "ferry",
                "version": env!("CARGO_PKG_VERSION"),
                "features": ["direct", "chain"],
            })),
        )
        .with("add", Value::local(Function::sync("add", add)))
        .with(
            "greet",
            Value::local(Function::new("greet", |args: Args| async move {
                Ok(Value::from(format!("Hello, {}!", args.get(0).display())))
            })),
        )
        .with(
            "sleep",
            Value::local(Function::new("sleep", |args: Args| async move {
                let ms = args.get(0).as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(Value::from(ms))
            })),
        )
        .with("Point", Value::local(point()))
        .with("counter", Value::Local(Local::shared(counter)))
        .with(
            "tags",
            Value::local(Set::new(["rpc", "proxy"].map(Value::from))),
        )
        .with("started", Value::local(Date::now()))
        .with("magic", Value::local(Buffer::new(&b"ferry"[..])))
}

fn add(args: Args) -> ferry::Result<Value> {
    let mut sum = 0.0;
    for v in &args.positional {
        sum += v
            .as_f64()
            .ok_or_else(|| Error::type_error(format!("{} is not a number", v.repr())))?;
    }
    Ok(Value::from(sum))
}

/// `new Point(x, y)` with a `norm()` method.
fn point() -> Class {
    let norm = Function::method("norm", |this: Option<Value>, _: Args| async move {
        let this = this.unwrap_or_default();
        let x = this.member(&"x".into())?.as_f64().unwrap_or(0.0);
        let y = this.member(&"y".into())?.as_f64().unwrap_or(0.0);
        Ok(Value::from(x.hypot(y)))
    });
    let norm = Value::local(norm);
    Class::new("Point", move |args: Args| {
        let norm = norm.clone();
        async move {
            let x = args.get(0).as_f64().unwrap_or(0.0);
            let y = args.get(1).as_f64().unwrap_or(0.0);
            let p = Record::new().with("x", x).with("y", y).with("norm", norm);
            Ok(Value::local(p))
        }
    })
    .with_static("dimensions", 2)
}
