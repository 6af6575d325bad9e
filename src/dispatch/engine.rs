//! Address resolution and handler invocation.
//!
//! # Resolution
//!
//! For an address `a.b.c` the engine walks the tree one segment at a time,
//! mapping each segment's argument bucket into a shared flat map:
//!
//! 1. Unknown segment: `Invalid function`.
//! 2. Map the segment's arguments.
//! 3. Intermediate segment with a passthrough: run it. `None` continues,
//!    `Some(value)` ends resolution with `value`.
//! 4. Last segment: run the terminal, or fail with `Invalid function` if
//!    there is none.
//!
//! Every failure is returned as `{"error": message}` data.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, trace};

use crate::auth::AuthContext;
use crate::error::DispatchError;
use crate::protocol::{Envelope, split_address};

use super::node::{Args, DeclaredArg, Node, PassthroughFn, TerminalFn, map_segment};
use super::reply::{Completion, settle};

// ============================================================================
// Step
// ============================================================================

/// Handlers and declarations of one resolved segment, detached from the tree.
struct Step {
    args: Option<Arc<[DeclaredArg]>>,
    passthrough: Option<Arc<PassthroughFn>>,
    terminal: Option<Arc<TerminalFn>>,
}

impl Step {
    fn of(node: &Node) -> Self {
        Self {
            args: node.shared_args(),
            passthrough: node.passthrough(),
            terminal: node.terminal(),
        }
    }
}

// ============================================================================
// DispatchEngine
// ============================================================================

/// Resolves envelopes against a registered tree of handlers.
///
/// The tree can be extended at any time through [`define`](Self::define);
/// calls already in flight keep the handlers they resolved.
pub struct DispatchEngine {
    root: RwLock<Node>,
}

impl Default for DispatchEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DispatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchEngine")
            .field("root", &*self.root.read())
            .finish()
    }
}

impl DispatchEngine {
    /// Creates an engine with an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: RwLock::new(Node::root()),
        }
    }

    /// Edits the tree.
    ///
    /// The closure runs under the tree's write lock; keep it to definitions.
    pub fn define<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Node) -> R,
    {
        f(&mut self.root.write())
    }

    /// Describes the tree as JSON. See [`Node::describe`].
    #[must_use]
    pub fn describe(&self) -> Value {
        self.root.read().describe()
    }

    /// Renders the tree as text. See [`Node::render`].
    #[must_use]
    pub fn render(&self) -> String {
        self.root.read().render()
    }
}

// ============================================================================
// DispatchEngine - Dispatch
// ============================================================================

impl DispatchEngine {
    /// Dispatches a raw request body and returns the response value.
    ///
    /// Never fails: dispatch errors become `{"error": message}`.
    pub async fn dispatch(&self, body: &str, auth: &AuthContext) -> Value {
        debug!(connection_id = %auth.connection_id, body, "Incoming message body");

        let result = match Envelope::parse(body) {
            Ok(envelope) => self.resolve(envelope, auth).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(value) => {
                trace!(result = %value, "Final result");
                value
            }
            Err(e) => {
                debug!(error = %e, "Dispatch failed");
                e.to_value()
            }
        }
    }

    /// Dispatches a raw request body and returns the serialized response.
    pub async fn respond(&self, body: &str, auth: &AuthContext) -> String {
        let value = self.dispatch(body, auth).await;
        serde_json::to_string(&value)
            .unwrap_or_else(|_| DispatchError::UnserializableResult.to_value().to_string())
    }

    async fn resolve(&self, envelope: Envelope, auth: &AuthContext) -> Result<Value, DispatchError> {
        let Envelope { func, args } = envelope;
        let path = split_address(&func);
        let Some(last) = path.len().checked_sub(1) else {
            return Err(DispatchError::UnknownFunction);
        };

        let steps = self.snapshot(&path);
        let mut buckets = args;
        let mut mapped = Args::new();

        for (index, segment) in path.iter().enumerate() {
            let Some(step) = steps.get(index) else {
                debug!(segment, "Unknown segment");
                return Err(DispatchError::UnknownFunction);
            };

            map_segment(segment, step.args.as_deref(), buckets.remove(*segment), &mut mapped);

            if index < last {
                let Some(passthrough) = &step.passthrough else {
                    trace!(segment, "No passthrough");
                    continue;
                };

                trace!(segment, "Passthrough");
                let (completion, rx) = Completion::channel();
                let reply = passthrough(&mut mapped, completion);
                if let Some(answer) = settle(reply, rx).await?.flatten() {
                    debug!(segment, "Short-circuited by passthrough");
                    return Ok(answer);
                }
            } else {
                let Some(terminal) = &step.terminal else {
                    debug!(segment, "No terminal");
                    return Err(DispatchError::UnknownFunction);
                };

                trace!(segment, "Final call");
                let (completion, rx) = Completion::channel();
                let reply = terminal(mapped, auth.clone(), completion);
                return settle(reply, rx).await?.ok_or(DispatchError::NoResult);
            }
        }

        Err(DispatchError::UnknownFunction)
    }

    /// Collects the steps of `path` up to the first unknown segment.
    fn snapshot(&self, path: &[&str]) -> Vec<Step> {
        let root = self.root.read();
        let mut steps = Vec::with_capacity(path.len());
        let mut node = &*root;

        for segment in path {
            let Some(child) = node.get(segment) else {
                break;
            };
            steps.push(Step::of(child));
            node = child;
        }

        steps
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use proptest::prelude::*;
    use serde_json::json;

    use crate::dispatch::Reply;
    use crate::identifiers::ConnectionId;

    fn auth() -> AuthContext {
        AuthContext::new(ConnectionId::from("c1"), json!({"user": "Joe"}))
    }

    fn body(func: &str, args: Value) -> String {
        json!({"func": func, "args": args}).to_string()
    }

    fn echo_engine() -> DispatchEngine {
        let engine = DispatchEngine::new();
        engine.define(|root| {
            root.child("tests")
                .define_args([("msg", crate::dispatch::ArgPlacement::Rename("msg".into()))])
                .expect("define args")
                .child("echo")
                .define_terminal(|args, _, _| {
                    Reply::ready(args.get("msg").cloned().unwrap_or(Value::Null))
                })
                .expect("define terminal");
        });
        engine
    }

    #[tokio::test]
    async fn test_terminal_value() {
        let engine = echo_engine();
        let out = engine
            .dispatch(&body("tests.echo", json!({"tests": {"msg": "hi"}})), &auth())
            .await;
        assert_eq!(out, json!("hi"));
    }

    #[tokio::test]
    async fn test_respond_serializes() {
        let engine = echo_engine();
        let out = engine
            .respond(&body("tests.echo", json!({"tests": {"msg": "hi"}})), &auth())
            .await;
        assert_eq!(out, "\"hi\"");
    }

    #[tokio::test]
    async fn test_unknown_leading_and_trailing_segment() {
        let engine = echo_engine();
        for func in ["nope.echo", "tests.nope", "tests.echo.deeper", "", "..."] {
            let out = engine.dispatch(&body(func, json!({})), &auth()).await;
            assert_eq!(out, json!({"error": "Invalid function"}), "func = {func:?}");
        }
    }

    #[tokio::test]
    async fn test_intermediate_node_without_terminal() {
        let engine = echo_engine();
        let out = engine.dispatch(&body("tests", json!({})), &auth()).await;
        assert_eq!(out, json!({"error": "Invalid function"}));
    }

    #[tokio::test]
    async fn test_envelope_errors() {
        let engine = echo_engine();
        assert_eq!(
            engine.dispatch("{oops", &auth()).await,
            json!({"error": "Invalid message body"})
        );
        assert_eq!(
            engine.dispatch(r#"{"func": ["tests"]}"#, &auth()).await,
            json!({"error": "Function address must be string"})
        );
    }

    #[tokio::test]
    async fn test_undeclared_args_surface_verbatim() {
        let engine = DispatchEngine::new();
        engine.define(|root| {
            root.child("reflect")
                .define_terminal(|args, _, _| Reply::Ready(Value::Object(args)))
                .expect("define");
        });

        let payload = json!({"obj": {"deep": [1, {"x": null}]}, "n": 1.5});
        let out = engine
            .dispatch(&body("reflect", json!({"reflect": payload.clone()})), &auth())
            .await;
        assert_eq!(out, json!({"reflect": payload}));
    }

    #[tokio::test]
    async fn test_passthrough_continue_and_transform() {
        let engine = DispatchEngine::new();
        engine.define(|root| {
            let product = root.child("product");
            product
                .define_positional_args(["id"])
                .expect("args")
                .define_passthrough(|args, _| {
                    args.insert("product".into(), json!({"name": "kettle"}));
                    Reply::pass()
                })
                .expect("passthrough");
            product
                .child("get")
                .define_terminal(|args, _, _| {
                    Reply::ready(json!({
                        "id": args.get("id").cloned(),
                        "product": args.get("product").cloned(),
                    }))
                })
                .expect("terminal");
        });

        let out = engine
            .dispatch(&body("product.get", json!({"product": {"0": 7}})), &auth())
            .await;
        assert_eq!(out, json!({"id": 7, "product": {"name": "kettle"}}));
    }

    #[tokio::test]
    async fn test_passthrough_short_circuit_skips_terminal() {
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = DispatchEngine::new();
        let counter = Arc::clone(&calls);
        engine.define(move |root| {
            let guarded = root.child("guarded");
            guarded
                .define_passthrough(|_, _| Reply::stop(json!({"error": "denied"})))
                .expect("passthrough");
            guarded
                .child("secret")
                .define_terminal(move |_, _, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Reply::ready("secret")
                })
                .expect("terminal");
        });

        let out = engine.dispatch(&body("guarded.secret", json!({})), &auth()).await;
        assert_eq!(out, json!({"error": "denied"}));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_passthrough_null_answer_short_circuits() {
        let engine = DispatchEngine::new();
        engine.define(|root| {
            let node = root.child("a");
            node.define_passthrough(|_, _| Reply::Ready(Some(Value::Null)))
                .expect("passthrough");
            node.child("b")
                .define_terminal(|_, _, _| Reply::ready("terminal"))
                .expect("terminal");
        });

        let out = engine.dispatch(&body("a.b", json!({})), &auth()).await;
        assert_eq!(out, Value::Null);
    }

    #[tokio::test]
    async fn test_passthrough_via_completion_and_future() {
        let engine = DispatchEngine::new();
        engine.define(|root| {
            let a = root.child("a");
            a.define_passthrough(|_, done| {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    done.pass();
                });
                Reply::Callback
            })
            .expect("a");
            let b = a.child("b");
            b.define_passthrough(|_, _| Reply::deferred(async { None }))
                .expect("b");
            b.child("c")
                .define_terminal(|_, _, _| Reply::deferred(async { json!("reached") }))
                .expect("c");
        });

        let out = engine.dispatch(&body("a.b.c", json!({})), &auth()).await;
        assert_eq!(out, json!("reached"));
    }

    #[tokio::test]
    async fn test_dropped_passthrough_completion_continues() {
        let engine = DispatchEngine::new();
        engine.define(|root| {
            let a = root.child("a");
            a.define_passthrough(|_, done| {
                drop(done);
                Reply::Callback
            })
            .expect("a");
            a.child("b")
                .define_terminal(|_, _, _| Reply::ready(1))
                .expect("b");
        });

        assert_eq!(engine.dispatch(&body("a.b", json!({})), &auth()).await, json!(1));
    }

    #[tokio::test]
    async fn test_terminal_callback_and_auth() {
        let engine = DispatchEngine::new();
        engine.define(|root| {
            root.child("whoami")
                .define_terminal(|_, auth, done| {
                    let user = auth.claim("user").cloned().unwrap_or(Value::Null);
                    tokio::spawn(async move {
                        done.complete(user.clone());
                        done.complete(json!("ignored"));
                    });
                    Reply::Callback
                })
                .expect("define");
        });

        assert_eq!(engine.dispatch(&body("whoami", json!({})), &auth()).await, json!("Joe"));
    }

    #[tokio::test]
    async fn test_terminal_dropping_completion_reports_no_result() {
        let engine = DispatchEngine::new();
        engine.define(|root| {
            root.child("silent")
                .define_terminal(|_, _, _| Reply::Callback)
                .expect("define");
        });

        assert_eq!(
            engine.dispatch(&body("silent", json!({})), &auth()).await,
            json!({"error": "Function produced no result"})
        );
    }

    #[tokio::test]
    async fn test_unserializable_result() {
        let engine = DispatchEngine::new();
        engine.define(|root| {
            root.child("bad")
                .define_terminal(|_, _, _| {
                    let mut map = std::collections::HashMap::new();
                    map.insert(vec![1u8], 1);
                    Reply::json(&map)
                })
                .expect("define");
        });

        assert_eq!(
            engine.dispatch(&body("bad", json!({})), &auth()).await,
            json!({"error": "Unable to compile response!"})
        );
    }

    #[tokio::test]
    async fn test_definitions_added_after_first_dispatch() {
        let engine = echo_engine();
        let call = body("late", json!({}));
        assert_eq!(
            engine.dispatch(&call, &auth()).await,
            json!({"error": "Invalid function"})
        );

        engine.define(|root| {
            root.child("late")
                .define_terminal(|_, _, _| Reply::ready(true))
                .expect("define");
        });
        assert_eq!(engine.dispatch(&call, &auth()).await, json!(true));
    }

    #[test]
    fn test_describe_and_render() {
        let engine = echo_engine();
        assert_eq!(engine.describe(), json!({"tests": {"echo": {"_func": true}}}));
        assert!(engine.render().contains("──> echo"));
    }

    proptest! {
        #[test]
        fn prop_unregistered_addresses_never_panic(func in "[a-z.]{0,16}") {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");
            let engine = echo_engine();
            let out = rt.block_on(engine.dispatch(&body(&func, json!({})), &auth()));
            if split_address(&func) != ["tests", "echo"] {
                prop_assert_eq!(out, json!({"error": "Invalid function"}));
            }
        }
    }
}
