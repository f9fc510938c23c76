// src/lib.rs

//! `livedag` is an incremental pipeline engine.
//!
//! A pipeline is described as a [`Term`]: a lazy, compositional description
//! of a computation whose leaves are live [`Input`]s. Evaluating a term
//! yields a tri-valued [`Output`] plus an [`Analysis`], a dependency graph
//! recording which components produced the result and which are blocked on
//! which inputs. The [`Engine`] re-evaluates the pipeline whenever any
//! depended-on input signals a change.
//!
//! The crate is wired together from:
//! - [`output`]: the `Ok / Active / Error` result carrier
//! - [`input`]: subscribable value cells with stable identity
//! - [`monitor`]: a generic read + watch driver that turns external state
//!   into an input
//! - [`term`]: the DSL and its evaluation interpreter
//! - [`analysis`]: the dependency-graph snapshot and its DOT rendering
//! - [`cache`]: a deduplicating, at-most-one-in-flight publisher for
//!   side-effecting operations
//! - [`engine`]: the evaluation loop and webhook broadcaster

pub mod analysis;
pub mod cache;
pub mod digest;
pub mod engine;
pub mod errors;
pub mod input;
pub mod logging;
pub mod monitor;
pub mod output;
pub mod term;

pub use analysis::{
    Analysis, AnalysisEdge, AnalysisNode, AnalysisStats, NodeId, NodeKind, NodeState, RunResult,
};
pub use cache::store::{CacheStore, EntryRecord, MemoryStore, RecordedOutcome};
pub use cache::{Drainable, EntrySnapshot, Job, Operation, OutputCache, Schedule, Switch};
pub use engine::{Broadcaster, Engine, EngineConfig, EngineState};
pub use errors::{EngineError, Result};
pub use input::{Input, InputId, JobId, RefreshFn, Subscription};
pub use monitor::{monitor, MonitorBuilder, MonitorConfig, WatchHandle};
pub use output::{ActiveReason, Msg, Output};
pub use term::eval::{evaluate, Evaluated};
pub use term::{all, list_map, Term};
