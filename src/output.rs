// src/output.rs

//! The tri-valued result carrier used throughout the engine.
//!
//! Every evaluated component produces an [`Output`]: either a value, a
//! marker that work is still in flight, or an error message. Outputs move
//! freely between the three cases as inputs change; nothing about them is
//! monotonic.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::digest;
use crate::errors::Result;

/// Why a component is currently `Active` rather than settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActiveReason {
    /// Work is running right now.
    Running,
    /// Work is due to run again (e.g. a rebuild was requested or a
    /// validity window expired) but has not started yet.
    ReadyToRerun,
}

impl fmt::Display for ActiveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActiveReason::Running => write!(f, "running"),
            ActiveReason::ReadyToRerun => write!(f, "ready to re-run"),
        }
    }
}

/// A human-readable failure message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Msg(pub String);

impl Msg {
    pub fn new(msg: impl Into<String>) -> Self {
        Msg(msg.into())
    }
}

impl fmt::Display for Msg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Msg {
    fn from(s: &str) -> Self {
        Msg(s.to_string())
    }
}

impl From<String> for Msg {
    fn from(s: String) -> Self {
        Msg(s)
    }
}

/// Current result of a component: success, in flight, or failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Output<T> {
    Ok(T),
    Active(ActiveReason),
    Error(Msg),
}

impl<T> Output<T> {
    pub fn error(msg: impl Into<Msg>) -> Self {
        Output::Error(msg.into())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Output::Ok(_))
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Output::Active(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Output::Error(_))
    }

    /// Apply `f` to the success value; `Active` and `Error` pass through.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Output<U> {
        match self {
            Output::Ok(v) => Output::Ok(f(v)),
            Output::Active(r) => Output::Active(r),
            Output::Error(m) => Output::Error(m),
        }
    }

    /// Combine two outputs into one carrying both values.
    ///
    /// `Ok` iff both are `Ok`. Otherwise the left error wins, then the
    /// right error, then `Active` (preferring `Running` over
    /// `ReadyToRerun` so a burst of mixed reasons reads as "in flight").
    pub fn pair<U>(a: Output<T>, b: Output<U>) -> Output<(T, U)> {
        match (a, b) {
            (Output::Ok(x), Output::Ok(y)) => Output::Ok((x, y)),
            (Output::Error(m), _) => Output::Error(m),
            (_, Output::Error(m)) => Output::Error(m),
            (Output::Active(ra), Output::Active(rb)) => {
                Output::Active(combine_reasons(ra, rb))
            }
            (Output::Active(r), _) => Output::Active(r),
            (_, Output::Active(r)) => Output::Active(r),
        }
    }

    /// Short label for the case, independent of the value type.
    pub fn status_label(&self) -> &'static str {
        match self {
            Output::Ok(_) => "ok",
            Output::Active(ActiveReason::Running) => "active (running)",
            Output::Active(ActiveReason::ReadyToRerun) => "active (ready to re-run)",
            Output::Error(_) => "error",
        }
    }
}

impl<T: fmt::Debug> Output<T> {
    /// Diagnostic rendering including the value.
    pub fn pp(&self) -> String {
        match self {
            Output::Ok(v) => format!("Ok: {v:?}"),
            Output::Active(r) => format!("Active: {r}"),
            Output::Error(m) => format!("Error: {m}"),
        }
    }
}

impl<T: Serialize> Output<T> {
    /// Digest of the canonical-JSON rendering, for diagnostics and
    /// persisted records.
    pub fn digest(&self) -> Result<String> {
        digest::digest_value(self)
    }
}

pub(crate) fn combine_reasons(a: ActiveReason, b: ActiveReason) -> ActiveReason {
    if a == ActiveReason::Running || b == ActiveReason::Running {
        ActiveReason::Running
    } else {
        ActiveReason::ReadyToRerun
    }
}
