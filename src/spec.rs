//! Spec tree registration.
//!
//! Specs are declared as nested describes with tests and hooks:
//!
//! ```
//! use spekt::{describe, expect};
//!
//! let spec = describe("stack", |s| {
//!     s.before_each(|| Ok(()));
//!     s.describe("push", |s| {
//!         s.it("grows the stack", || expect(1 + 1).to_equal(2));
//!     });
//! });
//! assert_eq!(spec.children().len(), 2);
//! ```
//!
//! Registration is purely structural: no body runs while the tree is
//! built. Bodies may be synchronous or asynchronous; the executor awaits
//! the async arm.

use crate::error::TestError;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// A hook or test body: synchronous, or asynchronous and awaited by the
/// executor.
pub(crate) enum Body {
    Sync(Box<dyn Fn() -> Result<(), TestError> + Send + Sync>),
    Async(Box<dyn Fn() -> BoxFuture<'static, Result<(), TestError>> + Send + Sync>),
}

impl Body {
    fn sync<F>(f: F) -> Arc<Body>
    where
        F: Fn() -> Result<(), TestError> + Send + Sync + 'static,
    {
        Arc::new(Body::Sync(Box::new(f)))
    }

    fn from_async<F, Fut>(f: F) -> Arc<Body>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TestError>> + Send + 'static,
    {
        Arc::new(Body::Async(Box::new(move || f().boxed())))
    }
}

/// What a node in the spec tree is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Describe,
    Test,
    BeforeEach,
    AfterEach,
    BeforeAll,
    AfterAll,
}

/// Focus/exclude marker on a describe or test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Modifier {
    #[default]
    None,
    Focused,
    Excluded,
}

/// One node of a built spec tree.
///
/// Only describes have children; only tests are executable leaves; hooks
/// attach to their nearest enclosing describe.
pub struct SpecNode {
    pub(crate) kind: NodeKind,
    pub(crate) name: String,
    pub(crate) modifier: Modifier,
    pub(crate) body: Option<Arc<Body>>,
    pub(crate) children: Vec<SpecNode>,
}

impl SpecNode {
    fn describe_node(name: &str, modifier: Modifier) -> SpecNode {
        SpecNode {
            kind: NodeKind::Describe,
            name: name.to_string(),
            modifier,
            body: None,
            children: Vec::new(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn modifier(&self) -> Modifier {
        self.modifier
    }

    pub fn children(&self) -> &[SpecNode] {
        &self.children
    }

    /// Bodies of this describe's hooks of `kind`, in registration order.
    pub(crate) fn hooks(&self, kind: NodeKind) -> Vec<Arc<Body>> {
        self.children
            .iter()
            .filter(|child| child.kind == kind)
            .filter_map(|child| child.body.clone())
            .collect()
    }
}

/// Build a spec tree rooted at a named describe.
pub fn describe(name: &str, f: impl FnOnce(&mut SpecBuilder)) -> SpecNode {
    build_root(name, Modifier::None, f)
}

/// Build a spec tree whose root describe is focused.
pub fn f_describe(name: &str, f: impl FnOnce(&mut SpecBuilder)) -> SpecNode {
    build_root(name, Modifier::Focused, f)
}

/// Build a spec tree whose root describe is excluded.
pub fn x_describe(name: &str, f: impl FnOnce(&mut SpecBuilder)) -> SpecNode {
    build_root(name, Modifier::Excluded, f)
}

fn build_root(name: &str, modifier: Modifier, f: impl FnOnce(&mut SpecBuilder)) -> SpecNode {
    let mut builder = SpecBuilder {
        stack: vec![SpecNode::describe_node(name, modifier)],
    };
    f(&mut builder);
    builder
        .stack
        .pop()
        .expect("builder stack holds the root while building")
}

/// Records registrations into the currently-open describe.
///
/// Maintains the stack of open describes; each `describe` call pushes,
/// runs its registration closure, then pops back to the parent.
pub struct SpecBuilder {
    stack: Vec<SpecNode>,
}

impl SpecBuilder {
    fn current(&mut self) -> &mut SpecNode {
        self.stack
            .last_mut()
            .expect("builder stack holds the root while building")
    }

    fn push_describe(&mut self, name: &str, modifier: Modifier, f: impl FnOnce(&mut SpecBuilder)) {
        self.stack.push(SpecNode::describe_node(name, modifier));
        f(self);
        let node = self
            .stack
            .pop()
            .expect("builder stack holds the root while building");
        self.current().children.push(node);
    }

    fn push_test(&mut self, name: &str, modifier: Modifier, body: Arc<Body>) {
        self.current().children.push(SpecNode {
            kind: NodeKind::Test,
            name: name.to_string(),
            modifier,
            body: Some(body),
            children: Vec::new(),
        });
    }

    fn push_hook(&mut self, kind: NodeKind, body: Arc<Body>) {
        self.current().children.push(SpecNode {
            kind,
            name: String::new(),
            modifier: Modifier::None,
            body: Some(body),
            children: Vec::new(),
        });
    }

    /// Open a nested describe.
    pub fn describe(&mut self, name: &str, f: impl FnOnce(&mut SpecBuilder)) {
        self.push_describe(name, Modifier::None, f);
    }

    /// Open a nested, focused describe.
    pub fn f_describe(&mut self, name: &str, f: impl FnOnce(&mut SpecBuilder)) {
        self.push_describe(name, Modifier::Focused, f);
    }

    /// Open a nested, excluded describe.
    pub fn x_describe(&mut self, name: &str, f: impl FnOnce(&mut SpecBuilder)) {
        self.push_describe(name, Modifier::Excluded, f);
    }

    /// Register a test under the current describe.
    pub fn it<F>(&mut self, name: &str, body: F)
    where
        F: Fn() -> Result<(), TestError> + Send + Sync + 'static,
    {
        self.push_test(name, Modifier::None, Body::sync(body));
    }

    /// Register a focused test.
    pub fn f_it<F>(&mut self, name: &str, body: F)
    where
        F: Fn() -> Result<(), TestError> + Send + Sync + 'static,
    {
        self.push_test(name, Modifier::Focused, Body::sync(body));
    }

    /// Register an excluded test.
    pub fn x_it<F>(&mut self, name: &str, body: F)
    where
        F: Fn() -> Result<(), TestError> + Send + Sync + 'static,
    {
        self.push_test(name, Modifier::Excluded, Body::sync(body));
    }

    /// Register a test with an asynchronous body.
    pub fn it_async<F, Fut>(&mut self, name: &str, body: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TestError>> + Send + 'static,
    {
        self.push_test(name, Modifier::None, Body::from_async(body));
    }

    /// Register a focused test with an asynchronous body.
    pub fn f_it_async<F, Fut>(&mut self, name: &str, body: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TestError>> + Send + 'static,
    {
        self.push_test(name, Modifier::Focused, Body::from_async(body));
    }

    /// Register an excluded test with an asynchronous body.
    pub fn x_it_async<F, Fut>(&mut self, name: &str, body: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TestError>> + Send + 'static,
    {
        self.push_test(name, Modifier::Excluded, Body::from_async(body));
    }

    /// Run before every test in this describe and its descendants.
    pub fn before_each<F>(&mut self, body: F)
    where
        F: Fn() -> Result<(), TestError> + Send + Sync + 'static,
    {
        self.push_hook(NodeKind::BeforeEach, Body::sync(body));
    }

    pub fn before_each_async<F, Fut>(&mut self, body: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TestError>> + Send + 'static,
    {
        self.push_hook(NodeKind::BeforeEach, Body::from_async(body));
    }

    /// Run after every test in this describe and its descendants.
    pub fn after_each<F>(&mut self, body: F)
    where
        F: Fn() -> Result<(), TestError> + Send + Sync + 'static,
    {
        self.push_hook(NodeKind::AfterEach, Body::sync(body));
    }

    pub fn after_each_async<F, Fut>(&mut self, body: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TestError>> + Send + 'static,
    {
        self.push_hook(NodeKind::AfterEach, Body::from_async(body));
    }

    /// Run once before the first test belonging to this describe.
    pub fn before_all<F>(&mut self, body: F)
    where
        F: Fn() -> Result<(), TestError> + Send + Sync + 'static,
    {
        self.push_hook(NodeKind::BeforeAll, Body::sync(body));
    }

    pub fn before_all_async<F, Fut>(&mut self, body: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TestError>> + Send + 'static,
    {
        self.push_hook(NodeKind::BeforeAll, Body::from_async(body));
    }

    /// Run once after the last test belonging to this describe.
    pub fn after_all<F>(&mut self, body: F)
    where
        F: Fn() -> Result<(), TestError> + Send + Sync + 'static,
    {
        self.push_hook(NodeKind::AfterAll, Body::sync(body));
    }

    pub fn after_all_async<F, Fut>(&mut self, body: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TestError>> + Send + 'static,
    {
        self.push_hook(NodeKind::AfterAll, Body::from_async(body));
    }
}
