//! Socket client talking to the `001_server` demo.
//!
//! Demonstrates:
//! - Connecting with handshake parameters
//! - Serving a function the server calls back
//! - Calling server functions with positional and named arguments
//!
//! Usage:
//!   cargo run --example 002_client
//!   cargo run --example 002_client -- --no-wait

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use common::{Args, SERVER_ADDR, SERVER_PATH, TOKEN};
use serde_json::{Value, json};
use websignals::{Call, Client, Reply, Result};

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    common::init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    println!("=== 002: Client ===\n");

    // ========================================================================
    // Connect
    // ========================================================================

    let url = format!("ws://{SERVER_ADDR}{SERVER_PATH}");
    println!("[1] Connecting to {url}...");

    let client = Client::connect(&url, [("token", TOKEN)]).await?;
    client.define(|root| {
        root.child("client")
            .child("hello")
            .define_terminal(|args, _, _| {
                let from = args
                    .get("hello")
                    .and_then(|bucket| bucket.get("from"))
                    .cloned()
                    .unwrap_or(Value::Null);
                Reply::ready(json!({"greeting": "hello", "to": from}))
            })
            .map(|_| ())
    })?;

    println!("    ✓ Connected\n");

    // ========================================================================
    // Calls
    // ========================================================================

    println!("[2] Calling tests.echo...");
    let echo = client
        .call(Call::to("tests.echo").named("msg", "hi"))
        .await?;
    println!("    ✓ {echo}\n");

    println!("[3] Calling product.get...");
    let product = client
        .call_with_timeout(
            Call::new().at("product").arg(42).at("get"),
            Duration::from_secs(5),
        )
        .await?;
    println!("    ✓ {product}\n");

    println!("[4] Calling an unknown function...");
    let missing = client.call(Call::to("tests.missing")).await?;
    println!("    ✓ {missing}\n");

    common::wait_for_exit(args.no_wait).await;

    client.disconnect().await;
    println!("\n=== Done ===");
    Ok(())
}
