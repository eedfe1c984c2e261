//! Spec tree compilation.
//!
//! A depth-first walk flattens a built spec tree into the ordered list of
//! leaf tests the executor runs, each paired with its resolved hook
//! cascade and focus/exclude flags. Compilation owns no state: compiling
//! the same tree twice yields identical lists.

use crate::spec::{Body, Modifier, NodeKind, SpecNode};
use std::sync::Arc;

/// Separator between describe names in a test's full name.
const NAME_SEPARATOR: &str = " ";

/// One executable leaf test with its resolved setup and teardown.
#[derive(Clone)]
pub struct CompiledTest {
    /// Enclosing describe names plus the test name.
    pub full_name: String,
    /// True iff the test or any ancestor describe is focused.
    pub is_focused: bool,
    /// True iff the test or any ancestor describe is excluded.
    pub is_excluded: bool,
    pub(crate) body: Arc<Body>,
    /// Every enclosing describe's before-each hooks, outermost first.
    pub(crate) before_each: Vec<Arc<Body>>,
    /// Every enclosing describe's after-each hooks, innermost first.
    pub(crate) after_each: Vec<Arc<Body>>,
    /// Before-all hooks that become due just before this test.
    pub(crate) enter_block: Vec<Arc<Body>>,
    /// After-all hooks that become due just after this test.
    pub(crate) exit_block: Vec<Arc<Body>>,
}

/// Flatten `root` into the ordered test list.
///
/// Test order follows registration order; describes nest strictly, so a
/// hook registered earlier runs earlier in setup and later in teardown.
pub fn compile(root: &SpecNode) -> Vec<CompiledTest> {
    let mut tests = Vec::new();
    let mut scope = Scope {
        names: Vec::new(),
        befores: Vec::new(),
        afters: Vec::new(),
    };
    compile_describe(root, &mut scope, false, false, &mut tests);
    tests
}

struct Scope {
    names: Vec<String>,
    befores: Vec<Vec<Arc<Body>>>,
    afters: Vec<Vec<Arc<Body>>>,
}

fn compile_describe(
    node: &SpecNode,
    scope: &mut Scope,
    focused: bool,
    excluded: bool,
    out: &mut Vec<CompiledTest>,
) {
    let focused = focused || node.modifier == Modifier::Focused;
    let excluded = excluded || node.modifier == Modifier::Excluded;

    scope.names.push(node.name.clone());
    scope.befores.push(node.hooks(NodeKind::BeforeEach));
    scope.afters.push(node.hooks(NodeKind::AfterEach));

    let first = out.len();
    for child in &node.children {
        match child.kind {
            NodeKind::Test => out.push(compile_test(child, scope, focused, excluded)),
            NodeKind::Describe => compile_describe(child, scope, focused, excluded, out),
            _ => {}
        }
    }
    let last = out.len();

    // Block hooks wrap the describe's compiled range: outer before-alls run
    // before inner ones, outer after-alls run after inner ones. A block
    // whose every test is excluded can never run, so its hooks are elided;
    // focus skipping is a run-time property and does not elide them.
    if out[first..last].iter().any(|t| !t.is_excluded) {
        let mut enters = node.hooks(NodeKind::BeforeAll);
        if !enters.is_empty() {
            enters.extend(out[first].enter_block.drain(..));
            out[first].enter_block = enters;
        }
        let exits = node.hooks(NodeKind::AfterAll);
        out[last - 1].exit_block.extend(exits);
    }

    scope.names.pop();
    scope.befores.pop();
    scope.afters.pop();
}

fn compile_test(node: &SpecNode, scope: &Scope, focused: bool, excluded: bool) -> CompiledTest {
    let is_focused = focused || node.modifier == Modifier::Focused;
    let is_excluded = excluded || node.modifier == Modifier::Excluded;

    let mut parts: Vec<&str> = scope.names.iter().map(String::as_str).collect();
    parts.push(&node.name);

    CompiledTest {
        full_name: parts.join(NAME_SEPARATOR),
        is_focused,
        is_excluded,
        body: node
            .body
            .clone()
            .expect("test nodes always carry a body"),
        before_each: scope.befores.iter().flatten().cloned().collect(),
        after_each: scope.afters.iter().rev().flatten().cloned().collect(),
        enter_block: Vec::new(),
        exit_block: Vec::new(),
    }
}
