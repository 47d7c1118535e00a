//! Workflow execution engine — the refactor-test-fix traversal loop.
//!
//! The graph is built explicitly: a handler and a transition are registered
//! per node id, and the engine walks from the entry node until a transition
//! yields the terminal marker. Nothing is registered implicitly and nodes
//! never run concurrently.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;

use remorph_types::{RemorphError, Result};

use crate::nodes::{CodegenNode, SynthesizeNode, TestPhaseNode};
use crate::state::{RunContext, RunResult, RunState};

// ---------------------------------------------------------------------------
// Graph vocabulary
// ---------------------------------------------------------------------------

/// The five nodes of the refactoring graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeId {
    GenerateTests,
    ValidateTests,
    Refactor,
    Test,
    Fix,
}

impl NodeId {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeId::GenerateTests => "generate_tests",
            NodeId::ValidateTests => "validate_tests",
            NodeId::Refactor => "refactor",
            NodeId::Test => "test",
            NodeId::Fix => "fix",
        }
    }
}

/// What a transition resolves to once the state is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Next(NodeId),
    Terminal,
}

/// Where to go after a node: a fixed successor, or a decision over the
/// current state.
pub enum Transition {
    Goto(NodeId),
    Decide(fn(&RunState) -> Step),
}

/// One node's work. Handlers mutate the state record; the context carries
/// the per-run handles. A returned error aborts the whole run, so handlers
/// absorb everything the graph is supposed to survive.
#[async_trait]
pub trait WorkflowNode: Send + Sync {
    async fn run(&self, ctx: &RunContext, state: &mut RunState) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// The only decision point in the refactoring graph, taken after each test
/// phase. Terminal when there is nothing to repair (no report), nothing left
/// to fix (all passed), or no budget left (`iteration` has reached
/// `max_retries`); otherwise route to the fix node.
pub fn decide_after_test(state: &RunState) -> Step {
    let Some(report) = &state.test_report else {
        return Step::Terminal;
    };
    if report.all_passed {
        return Step::Terminal;
    }
    if state.iteration >= state.max_retries {
        return Step::Terminal;
    }
    Step::Next(NodeId::Fix)
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// An explicit node graph plus its entry point.
pub struct Workflow {
    handlers: HashMap<NodeId, Box<dyn WorkflowNode>>,
    routes: HashMap<NodeId, Transition>,
    entry: NodeId,
}

impl Workflow {
    pub fn new(entry: NodeId) -> Self {
        Self {
            handlers: HashMap::new(),
            routes: HashMap::new(),
            entry,
        }
    }

    pub fn register(mut self, id: NodeId, node: impl WorkflowNode + 'static) -> Self {
        self.handlers.insert(id, Box::new(node));
        self
    }

    pub fn route(mut self, id: NodeId, transition: Transition) -> Self {
        self.routes.insert(id, transition);
        self
    }

    /// The standard five-node refactoring graph:
    ///
    /// ```text
    /// generate_tests -> validate_tests -> refactor -> test -(decide)-> fix
    ///                                                  ^________________|
    /// ```
    ///
    /// `refactor` and `fix` are the same operation; the two ids exist so the
    /// first generation call is distinguishable in routes and logs.
    pub fn refactoring() -> Self {
        Self::new(NodeId::GenerateTests)
            .register(NodeId::GenerateTests, SynthesizeNode)
            .register(NodeId::ValidateTests, TestPhaseNode)
            .register(NodeId::Refactor, CodegenNode)
            .register(NodeId::Test, TestPhaseNode)
            .register(NodeId::Fix, CodegenNode)
            .route(NodeId::GenerateTests, Transition::Goto(NodeId::ValidateTests))
            .route(NodeId::ValidateTests, Transition::Goto(NodeId::Refactor))
            .route(NodeId::Refactor, Transition::Goto(NodeId::Test))
            .route(NodeId::Test, Transition::Decide(decide_after_test))
            .route(NodeId::Fix, Transition::Goto(NodeId::Test))
    }

    /// Walk the graph to its terminal marker and hand back the final code,
    /// the last report, and the generation-call count.
    ///
    /// The optional run budget is checked before every node; exceeding it
    /// aborts with a deadline error. A node id with no registered handler or
    /// route is a construction mistake and fails as a configuration error.
    pub async fn run(&self, ctx: &RunContext, mut state: RunState) -> Result<RunResult> {
        // A budget too large for the clock to represent never expires.
        let deadline = ctx
            .run_budget()
            .and_then(|budget| Instant::now().checked_add(budget).map(|at| (at, budget)));

        let mut current = self.entry;
        loop {
            if let Some((at, budget)) = deadline {
                if Instant::now() >= at {
                    tracing::error!(
                        run = %ctx.run_id,
                        node = current.as_str(),
                        "run budget exhausted"
                    );
                    return Err(RemorphError::DeadlineExceeded {
                        budget_ms: budget.as_millis() as u64,
                    });
                }
            }

            let handler = self.handlers.get(&current).ok_or_else(|| {
                RemorphError::Config(format!("no handler registered for node {}", current.as_str()))
            })?;
            tracing::debug!(run = %ctx.run_id, node = current.as_str(), "entering node");
            handler.run(ctx, &mut state).await?;

            let transition = self.routes.get(&current).ok_or_else(|| {
                RemorphError::Config(format!("no route registered for node {}", current.as_str()))
            })?;
            match transition {
                Transition::Goto(next) => current = *next,
                Transition::Decide(decide) => match decide(&state) {
                    Step::Next(next) => current = next,
                    Step::Terminal => break,
                },
            }
        }

        let result = RunResult {
            code: state
                .refactored_code
                .unwrap_or_else(|| state.original_code.clone()),
            report: state.test_report,
            iterations: state.iteration,
        };
        tracing::info!(
            run = %ctx.run_id,
            iterations = result.iterations,
            all_passed = result.all_passed(),
            "run finished"
        );
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
