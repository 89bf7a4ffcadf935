//! Per-run variable scoping.
//!
//! A [`Context`] is an ordered stack of scopes threaded through a single
//! interpreter run. It owns no synchronization primitives: per §4.2/§5 of
//! the specification, a `Context` is only ever touched by the one task
//! running its interpreter, so there is nothing to lock.

use serde_json::{Map, Value};

/// Scoped variable map with LIFO frame push/pop, inner scopes shadowing
/// outer ones.
#[derive(Debug, Clone, Default)]
pub struct Context {
    scopes: Vec<Map<String, Value>>,
}

impl Context {
    /// A context with a single, empty root scope.
    pub fn new() -> Self {
        Self {
            scopes: vec![Map::new()],
        }
    }

    /// A context whose root scope is pre-populated, e.g. with workflow
    /// input variables.
    pub fn with_root(root: Map<String, Value>) -> Self {
        Self { scopes: vec![root] }
    }

    /// Push a new innermost scope.
    pub fn push(&mut self, frame: Map<String, Value>) {
        self.scopes.push(frame);
    }

    /// Pop the innermost scope. No-op (and returns `None`) if only the root
    /// scope remains, since the root scope is never popped.
    pub fn pop(&mut self) -> Option<Map<String, Value>> {
        if self.scopes.len() > 1 {
            self.scopes.pop()
        } else {
            None
        }
    }

    /// Search scopes inner-to-outer for `key`.
    pub fn lookup(&self, key: &str) -> Option<&Value> {
        self.scopes.iter().rev().find_map(|scope| scope.get(key))
    }

    /// Write `key` into the innermost scope, shadowing any outer binding.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let innermost = self
            .scopes
            .last_mut()
            .expect("context always has at least one scope");
        innermost.insert(key.into(), value);
    }

    /// A flattened view of every binding visible right now, outer values
    /// overwritten by shadowing inner ones. Used when passing context to a
    /// condition evaluator or a sub-interpreter.
    pub fn snapshot(&self) -> Map<String, Value> {
        let mut flattened = Map::new();
        for scope in &self.scopes {
            for (k, v) in scope {
                flattened.insert(k.clone(), v.clone());
            }
        }
        flattened
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }
}

/// Build the frame pushed for each `Loop[count]`/`Loop[for_each]` iteration.
pub fn loop_frame(index: usize, total: Option<usize>, item: Option<Value>) -> Map<String, Value> {
    let mut frame = Map::new();
    frame.insert("loop_index".into(), Value::from(index));
    frame.insert("loop_iteration".into(), Value::from(index + 1));
    if let Some(total) = total {
        frame.insert("loop_total".into(), Value::from(total));
    }
    if let Some(item) = item {
        frame.insert("loop_item".into(), item);
    }
    frame
}

/// Build the frame pushed when entering an `ErrorHandling` catch block.
pub fn catch_frame(error_message: impl Into<String>, error_type: impl Into<String>) -> Map<String, Value> {
    let mut frame = Map::new();
    frame.insert("try_block_error_message".into(), Value::from(error_message.into()));
    frame.insert("try_block_error_type".into(), Value::from(error_type.into()));
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_searches_inner_to_outer() {
        let mut ctx = Context::new();
        ctx.set("x", json!(1));
        ctx.push(Map::new());
        assert_eq!(ctx.lookup("x"), Some(&json!(1)));
        ctx.set("x", json!(2));
        assert_eq!(ctx.lookup("x"), Some(&json!(2)));
        ctx.pop();
        assert_eq!(ctx.lookup("x"), Some(&json!(1)));
    }

    #[test]
    fn pop_never_drops_root_scope() {
        let mut ctx = Context::new();
        assert_eq!(ctx.depth(), 1);
        assert!(ctx.pop().is_none());
        assert_eq!(ctx.depth(), 1);
    }

    #[test]
    fn snapshot_flattens_with_shadowing() {
        let mut ctx = Context::new();
        ctx.set("a", json!(1));
        ctx.set("b", json!(1));
        ctx.push(Map::new());
        ctx.set("b", json!(2));
        let snap = ctx.snapshot();
        assert_eq!(snap.get("a"), Some(&json!(1)));
        assert_eq!(snap.get("b"), Some(&json!(2)));
    }

    #[test]
    fn loop_frame_for_each_includes_item() {
        let frame = loop_frame(2, Some(5), Some(json!("c")));
        assert_eq!(frame.get("loop_index"), Some(&json!(2)));
        assert_eq!(frame.get("loop_iteration"), Some(&json!(3)));
        assert_eq!(frame.get("loop_total"), Some(&json!(5)));
        assert_eq!(frame.get("loop_item"), Some(&json!("c")));
    }

    #[test]
    fn missing_variable_absent_from_snapshot() {
        let ctx = Context::new();
        assert!(ctx.lookup("nope").is_none());
    }
}
