//! Plan-graph execution engine
//!
//! Turns high-level artifact requests into executable plan graphs and
//! drives them to completion:
//!
//! - **Intent resolution**: classify a free-form request into a target
//!   artifact kind and an ordered transition chain; never fails,
//!   degrades to a clarification round instead
//! - **Planning**: build a validated DAG of skill and subagent steps
//!   from the resolved intent and the subagent registry
//! - **Execution**: walk the plan in topological order with provider
//!   fallback, subagent failure isolation, and verification gates
//! - **Pause/resume**: freeze a run when a subagent asks for human
//!   approval and pick it up exactly where it stopped
//!
//! Every state transition is appended to the durable workspace event
//! log before it is mirrored to the outward progress stream.

pub mod controller;
pub mod error;
pub mod intent;
pub mod invocation;
pub mod plan;
pub mod planner;
pub mod skills;
pub mod types;
pub mod verify;

pub use controller::GraphController;
pub use error::{PlanError, RunError};
pub use intent::{
    ArtifactIntent, Classification, ClarificationReason, Classifier, ClassifierError,
    IntentResolver, IntentStatus, Transition,
};
pub use invocation::{
    invoke_with_retry, InvocationError, InvocationSettings, ModelInvoker, ModelRequest,
    ModelResponse, RetryPolicy, ToolSpec,
};
pub use plan::{NodeId, NodeStatus, NodeTask, PlanGraph, PlanId, PlanNode};
pub use planner::{Planner, ANALYZE_NODE, ASSEMBLE_NODE, CLARIFY_NODE};
pub use skills::{
    SectionSkill, SkillCatalog, SkillError, SkillInvocation, SkillResponse, SkillResult,
    SkillRunner, ANALYZE_SKILL, ASSEMBLE_SKILL, CLARIFY_SKILL,
};
pub use types::{
    BlockedSubagent, ChannelProgressSink, FailureStage, NullProgressSink, ProgressEvent,
    ProgressSink, RunContext, RunRequest, RunSettings, RunState, RunStatus, RunSummary,
    SubagentFailure, SubagentResult,
};
pub use verify::{
    aggregate, VerificationIssue, VerificationReport, VerificationStatus, Verifier, VerifyError,
};
