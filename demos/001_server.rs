//! Server with both transports enabled.
//!
//! Demonstrates:
//! - Token authentication with claims
//! - A nested dispatch tree with declared arguments and a passthrough
//! - Calling a client back once it connects
//!
//! Usage:
//!   cargo run --example 001_server
//!   cargo run --example 001_server -- --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use common::{Args, SERVER_ADDR, SERVER_PATH, TOKEN};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::OnceCell;
use websignals::{
    AuthContext, Call, ConnectionId, Mode, Params, Reply, Result, Server, ServerHooks,
};

// ============================================================================
// Hooks
// ============================================================================

/// Accepts the demo token and greets every client.
struct DemoHooks {
    server: Arc<OnceCell<Weak<Server>>>,
}

#[async_trait]
impl ServerHooks for DemoHooks {
    async fn authenticate(&self, _: &ConnectionId, params: &Params) -> Option<Value> {
        let token = params.get("token")?;
        (token == TOKEN).then(|| json!({"user": "demo"}))
    }

    async fn on_client(&self, auth: &AuthContext) {
        println!("[+] Client {} connected", auth.connection_id);

        let Some(server) = self.server.get().and_then(Weak::upgrade) else {
            return;
        };
        let connection_id = auth.connection_id.clone();
        tokio::spawn(async move {
            let call = Call::to("client.hello").named("from", "server");
            match server
                .call_with_timeout(&connection_id, call, Duration::from_secs(5))
                .await
            {
                Ok(answer) => println!("    Client answered: {answer}"),
                Err(e) => println!("    Client call failed: {e}"),
            }
        });
    }

    async fn on_client_closed(&self, auth: &AuthContext) {
        println!("[-] Client {} disconnected", auth.connection_id);
    }
}

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
    println!("=== 001: Server ===\n");

    let slot = Arc::new(OnceCell::new());
    let server = Arc::new(
        Server::builder()
            .path(SERVER_PATH)
            .modes([Mode::Socket, Mode::Http])
            .keep_alive(Duration::from_secs(10))
            .hooks(DemoHooks {
                server: Arc::clone(&slot),
            })
            .build()?,
    );
    let _ = slot.set(Arc::downgrade(&server));

    // ========================================================================
    // Dispatch Tree
    // ========================================================================

    server.define(|root| -> Result<()> {
        root.child("tests")
            .child("echo")
            .define_terminal(|args, _, _| {
                Reply::ready(args.get("echo").cloned().unwrap_or(Value::Null))
            })?;

        root.child("product")
            .define_positional_args(["id"])?
            .define_passthrough(|args, _| {
                if args.contains_key("id") {
                    Reply::pass()
                } else {
                    Reply::stop(json!({"error": "Missing product id"}))
                }
            })?
            .child("get")
            .define_terminal(|args, auth, _| {
                Reply::ready(json!({
                    "id": args.get("id").cloned().unwrap_or(Value::Null),
                    "user": auth.claim("user").cloned().unwrap_or(Value::Null),
                }))
            })?;

        Ok(())
    })?;

    println!("Functions:\n{}", server.engine().render());

    // ========================================================================
    // Serve
    // ========================================================================

    let addr = server.start(TcpListener::bind(SERVER_ADDR).await?).await?;
    println!("Listening on http://{addr}{SERVER_PATH}\n");

    common::wait_for_exit(args.no_wait).await;

    server.stop().await;
    println!("\n=== Done ===");
    Ok(())
}
