//! Example: Request-scoped context across deferred work
//!
//! This example demonstrates:
//! - Publishing a default context scope
//! - Handling several concurrent "requests", each with its own user id
//! - Reading the user id from deferred callbacks and spawned tasks without
//!   passing it around
//! - Chaining a component that keeps its own context
//! - Containing a failing callback in the request's boundary

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use taskctx::{
    chain, create_context, current_context, run_in_context, Chainable, Context, ContextExt,
};

fn log_line(message: &str) {
    let user = current_context().and_then(|ctx| ctx.get_i64("user_id"));
    match user {
        Some(user) => println!("[user {user}] {message}"),
        None => println!("[no context] {message}"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging (RUST_LOG=taskctx=debug shows registry activity)
    taskctx::logging::init_logging();

    println!("=== Request Context Example ===\n");

    let audit_store = taskctx::Registry::global().namespace("audit")?;
    let audit = Chainable::with_provider("audit", Arc::new(audit_store.clone()));
    let app = create_context("app", &[])?;
    audit_store.run(|| chain(&audit));

    let mut handles = Vec::new();
    for user_id in [7, 42, 1001] {
        let handle = run_in_context(
            |store, domain| {
                store.set("user_id", json!(user_id))?;
                log_line("request received");

                domain.on_error(|err| log_line(&format!("request failed: {err}")));

                let report = domain.bind(|| log_line("deferred report"));
                let failing = domain.bind_fallible(|| {
                    Err::<(), _>(anyhow::anyhow!("quota exceeded"))
                });

                Ok::<_, taskctx::ContextError>(domain.spawn(async move {
                    tokio::time::sleep(Duration::from_millis(10 * (user_id % 3) as u64)).await;
                    report();
                    failing();
                    log_line("spawned work finished");
                }))
            },
            Some(Arc::clone(&app)),
        );
        if let Some(handle) = handle {
            handles.push(handle?);
        }
    }

    log_line("all requests dispatched");
    for handle in handles {
        handle.await?;
    }

    println!("\n=== Chained component ===\n");
    run_in_context(
        |store, _| {
            store.set("request_id", json!("r-1")).ok();
            if let Some(ctx) = audit.current_context() {
                println!("audit sees request_id = {:?}", ctx.get_str("request_id"));
            }
        },
        None,
    );

    Ok(())
}
