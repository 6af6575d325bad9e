//! Dispatch tree nodes.
//!
//! The tree is built with ordinary method calls. Each call returns the node
//! it was made on, so definitions chain:
//!
//! ```
//! use serde_json::{Value, json};
//! use websignals::dispatch::{Node, Reply};
//!
//! # fn main() -> websignals::Result<()> {
//! let mut root = Node::root();
//! root.child("product")
//!     .define_positional_args(["id"])?
//!     .child("sub")
//!     .define_positional_args([".Id", ".Prod"])?
//!     .child("get")
//!     .define_terminal(|args, _auth, _done| {
//!         Reply::ready(args.get("subId").cloned().unwrap_or(Value::Null))
//!     })?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::auth::AuthContext;
use crate::error::{Error, Result};

use super::reply::{Completion, Reply};

// ============================================================================
// Types
// ============================================================================

/// Flat argument map handed to handlers.
pub type Args = Map<String, Value>;

/// Terminal handler: `(args, auth, completion) -> reply`.
pub type TerminalFn =
    dyn Fn(Args, AuthContext, Completion<Value>) -> Reply<Value> + Send + Sync;

/// Passthrough handler: `(&mut args, completion) -> reply`.
///
/// `None` continues resolution; `Some(value)` ends it with `value`.
pub type PassthroughFn =
    dyn Fn(&mut Args, Completion<Option<Value>>) -> Reply<Option<Value>> + Send + Sync;

/// Name of the tree root.
const ROOT_NAME: &str = "root";

// ============================================================================
// ArgPlacement
// ============================================================================

/// Where a declared argument lands in the flat argument map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgPlacement {
    /// Stored under the given key.
    Rename(String),

    /// Stored under the segment name followed by the suffix.
    ///
    /// Segment `sub` with suffix `Id` yields key `subId`.
    Suffix(String),
}

impl ArgPlacement {
    /// Parses a positional declaration: `.Id` is a suffix, anything else a rename.
    #[must_use]
    pub fn parse(target: &str) -> Self {
        match target.strip_prefix('.') {
            Some(suffix) => Self::Suffix(suffix.to_owned()),
            None => Self::Rename(target.to_owned()),
        }
    }

    /// Resolves the flat key for an argument of `segment`.
    #[must_use]
    pub fn target(&self, segment: &str) -> String {
        match self {
            Self::Rename(key) => key.clone(),
            Self::Suffix(suffix) => format!("{segment}{suffix}"),
        }
    }
}

/// One declared argument: input key plus placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredArg {
    /// Key in the segment's input bucket.
    pub key: String,
    /// Where the value goes.
    pub placement: ArgPlacement,
}

// ============================================================================
// Node
// ============================================================================

/// A named node in the dispatch tree.
pub struct Node {
    name: String,
    args: Option<Arc<[DeclaredArg]>>,
    passthrough: Option<Arc<PassthroughFn>>,
    terminal: Option<Arc<TerminalFn>>,
    children: BTreeMap<String, Node>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("args", &self.args)
            .field("passthrough", &self.passthrough.is_some())
            .field("terminal", &self.terminal.is_some())
            .field("children", &self.children)
            .finish()
    }
}

// ============================================================================
// Node - Construction
// ============================================================================

impl Node {
    /// Creates an empty tree root.
    #[must_use]
    pub fn root() -> Self {
        Self::named(ROOT_NAME)
    }

    fn named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            args: None,
            passthrough: None,
            terminal: None,
            children: BTreeMap::new(),
        }
    }

    /// Returns the child named `name`, creating it if needed.
    pub fn child(&mut self, name: &str) -> &mut Self {
        self.children
            .entry(name.to_owned())
            .or_insert_with(|| Self::named(name))
    }

    /// Declares this segment's arguments.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Definition`] if arguments were already declared.
    pub fn define_args<I, K>(&mut self, args: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = (K, ArgPlacement)>,
        K: Into<String>,
    {
        if self.args.is_some() {
            return Err(Error::definition(format!(
                "arguments of '{}' already defined",
                self.name
            )));
        }

        let declared: Vec<DeclaredArg> = args
            .into_iter()
            .map(|(key, placement)| DeclaredArg {
                key: key.into(),
                placement,
            })
            .collect();
        self.args = Some(declared.into());
        Ok(self)
    }

    /// Declares positional arguments: input keys `"0"`, `"1"`, ... map to
    /// the given targets, parsed with [`ArgPlacement::parse`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Definition`] if arguments were already declared.
    pub fn define_positional_args<I, S>(&mut self, targets: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<(String, ArgPlacement)> = targets
            .into_iter()
            .enumerate()
            .map(|(index, target)| (index.to_string(), ArgPlacement::parse(target.as_ref())))
            .collect();
        self.define_args(args)
    }

    /// Sets the handler run when this node is an intermediate segment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Definition`] if a passthrough is already set.
    pub fn define_passthrough<F>(&mut self, handler: F) -> Result<&mut Self>
    where
        F: Fn(&mut Args, Completion<Option<Value>>) -> Reply<Option<Value>>
            + Send
            + Sync
            + 'static,
    {
        if self.passthrough.is_some() {
            return Err(Error::definition(format!(
                "passthrough of '{}' already defined",
                self.name
            )));
        }
        self.passthrough = Some(Arc::new(handler));
        Ok(self)
    }

    /// Sets the handler run when this node is the last segment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Definition`] if a terminal is already set.
    pub fn define_terminal<F>(&mut self, handler: F) -> Result<&mut Self>
    where
        F: Fn(Args, AuthContext, Completion<Value>) -> Reply<Value> + Send + Sync + 'static,
    {
        if self.terminal.is_some() {
            return Err(Error::definition(format!(
                "terminal of '{}' already defined",
                self.name
            )));
        }
        self.terminal = Some(Arc::new(handler));
        Ok(self)
    }
}

// ============================================================================
// Node - Accessors
// ============================================================================

impl Node {
    /// Returns the segment name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the child named `name`, if any.
    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Self> {
        self.children.get(name)
    }

    /// Returns the declared arguments, if any.
    #[inline]
    #[must_use]
    pub fn declared_args(&self) -> Option<&[DeclaredArg]> {
        self.args.as_deref()
    }

    /// Returns `true` if a terminal is set.
    #[inline]
    #[must_use]
    pub fn has_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    /// Returns `true` if a passthrough is set.
    #[inline]
    #[must_use]
    pub fn has_passthrough(&self) -> bool {
        self.passthrough.is_some()
    }

    pub(crate) fn passthrough(&self) -> Option<Arc<PassthroughFn>> {
        self.passthrough.clone()
    }

    pub(crate) fn terminal(&self) -> Option<Arc<TerminalFn>> {
        self.terminal.clone()
    }

    pub(crate) fn shared_args(&self) -> Option<Arc<[DeclaredArg]>> {
        self.args.clone()
    }
}

// ============================================================================
// Argument Mapping
// ============================================================================

/// Maps one segment's input bucket into the flat argument map.
///
/// Declared keys are moved to their placement; leftover keys are kept
/// verbatim under the segment name. A missing or non-object bucket maps
/// nothing.
pub(crate) fn map_segment(
    segment: &str,
    declared: Option<&[DeclaredArg]>,
    bucket: Option<Value>,
    mapped: &mut Args,
) {
    let Some(Value::Object(mut rest)) = bucket else {
        return;
    };

    for arg in declared.unwrap_or_default() {
        if let Some(value) = rest.remove(&arg.key) {
            mapped.insert(arg.placement.target(segment), value);
        }
    }

    if !rest.is_empty() {
        mapped.insert(segment.to_owned(), Value::Object(rest));
    }
}

impl Node {
    /// Maps a segment bucket using this node's declarations.
    pub fn map_args(&self, bucket: Option<Value>, mapped: &mut Args) {
        map_segment(&self.name, self.args.as_deref(), bucket, mapped);
    }
}

// ============================================================================
// Description
// ============================================================================

impl Node {
    /// Describes the subtree as JSON for sharing with peers.
    ///
    /// Every child becomes an object of its own children; nodes with a
    /// terminal carry `"_func": true`.
    #[must_use]
    pub fn describe(&self) -> Value {
        let mut map = Map::new();
        for (name, child) in &self.children {
            map.insert(name.clone(), child.describe());
        }
        if self.terminal.is_some() {
            map.insert("_func".to_owned(), Value::Bool(true));
        }
        Value::Object(map)
    }

    /// Renders the subtree as indented text.
    ///
    /// ```text
    /// ──> root
    ///     ├──> product
    ///     │    └──> add
    ///     └──> tests
    /// ```
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "──> {}", self.name);
        self.render_children("    ", &mut out);
        out
    }

    fn render_children(&self, prefix: &str, out: &mut String) {
        let count = self.children.len();
        for (index, child) in self.children.values().enumerate() {
            let last = index + 1 == count;
            let branch = if last { "└" } else { "├" };
            let _ = writeln!(out, "{prefix}{branch}──> {}", child.name);

            let next = if last {
                format!("{prefix}     ")
            } else {
                format!("{prefix}│    ")
            };
            child.render_children(&next, out);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
