// src/term/mod.rs

//! The pipeline description DSL.
//!
//! A [`Term`] is an immutable description of a computation, not a value:
//! nothing happens until the engine evaluates it. Terms compose
//! applicatively ([`Term::map`], [`Term::pair`], [`all`], [`list_map`])
//! and monadically ([`Term::bind`], [`Term::bind_input`]); leaves read
//! live [`Input`]s via [`Term::primitive`].
//!
//! Each term carries a stable identity assigned at construction, so a
//! sub-term shared between two branches is evaluated once per pass and
//! shows up as a single analysis node.

pub mod eval;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::input::Input;
use crate::output::{ActiveReason, Msg, Output};

use self::eval::EvalNode;

static NEXT_TERM_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a term, allocated at construction. Clones share it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TermId(u64);

fn next_term_id() -> TermId {
    TermId(NEXT_TERM_ID.fetch_add(1, Ordering::Relaxed))
}

/// A lazy description of a computation yielding a `T`.
pub struct Term<T> {
    pub(crate) id: TermId,
    pub(crate) node: Arc<dyn EvalNode<T>>,
}

impl<T> Clone for Term<T> {
    fn clone(&self) -> Self {
        Term {
            id: self.id,
            node: Arc::clone(&self.node),
        }
    }
}

impl<T> fmt::Debug for Term<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Term").field("id", &self.id.0).finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Term<T> {
    fn from_node(node: Arc<dyn EvalNode<T>>) -> Self {
        Term {
            id: next_term_id(),
            node,
        }
    }

    /// A constant, labeled with its debug rendering.
    pub fn pure(value: T) -> Self
    where
        T: fmt::Debug,
    {
        let label = format!("{value:?}");
        Self::pure_labelled(label, value)
    }

    /// A constant with an explicit label for the analysis node.
    pub fn pure_labelled(label: impl Into<String>, value: T) -> Self {
        Self::from_node(Arc::new(ReturnTerm {
            value,
            label: label.into(),
        }))
    }

    /// A term that always fails with the given message.
    pub fn fail(msg: impl Into<Msg>) -> Self {
        Self::from_node(Arc::new(FailTerm { msg: msg.into() }))
    }

    /// A term that is permanently in flight (useful as a placeholder).
    pub fn active(reason: ActiveReason) -> Self {
        Self::from_node(Arc::new(ActiveTerm { reason }))
    }

    /// Lift a literal output into a term.
    pub fn of_output(label: impl Into<String>, output: Output<T>) -> Self {
        match output {
            Output::Ok(v) => Self::pure_labelled(label, v),
            Output::Active(r) => Self::active(r),
            Output::Error(m) => Self::fail(m),
        }
    }

    /// Lift an option: `None` becomes a labeled failure.
    pub fn option(label: impl Into<String>, opt: Option<T>) -> Self {
        let label = label.into();
        match opt {
            Some(v) => Self::pure_labelled(label, v),
            None => Self::fail(format!("{label}: none")),
        }
    }

    /// A leaf reading the given input. The description labels the
    /// analysis node; the input's job id is attached to it.
    pub fn primitive(desc: impl Into<String>, input: &Input<T>) -> Self {
        Self::from_node(Arc::new(PrimitiveTerm {
            input: input.clone(),
            desc: desc.into(),
        }))
    }

    /// Apply a pure function to the result.
    pub fn map<U>(&self, f: impl Fn(T) -> U + Send + Sync + 'static) -> Term<U>
    where
        U: Clone + Send + Sync + 'static,
    {
        Term::from_node(Arc::new(MapTerm {
            inner: self.clone(),
            f: Arc::new(f),
        }))
    }

    /// Evaluate two terms and combine their results.
    ///
    /// `Ok` iff both are `Ok`; otherwise the left error wins, then the
    /// right error, then `Active`.
    pub fn pair<U>(&self, other: &Term<U>) -> Term<(T, U)>
    where
        U: Clone + Send + Sync + 'static,
    {
        Term::from_node(Arc::new(PairTerm {
            left: self.clone(),
            right: other.clone(),
        }))
    }

    /// Monadic composition: once this term is `Ok v`, evaluate `f(v)`.
    ///
    /// Until then the analysis shows a placeholder labeled `desc` in the
    /// `Blocked` state; `f` is not called. After resolution the produced
    /// term's nodes appear as dynamic children.
    pub fn bind<U>(
        &self,
        desc: impl Into<String>,
        f: impl Fn(T) -> Term<U> + Send + Sync + 'static,
    ) -> Term<U>
    where
        U: Clone + Send + Sync + 'static,
    {
        Term::from_node(Arc::new(BindTerm {
            inner: self.clone(),
            f: Arc::new(f),
            desc: desc.into(),
        }))
    }

    /// Like [`bind`], but `f` produces an [`Input`], which is read and
    /// registered as a dependency of the evaluation.
    ///
    /// [`bind`]: Term::bind
    pub fn bind_input<U>(
        &self,
        desc: impl Into<String>,
        f: impl Fn(T) -> Input<U> + Send + Sync + 'static,
    ) -> Term<U>
    where
        U: Clone + Send + Sync + 'static,
    {
        Term::from_node(Arc::new(BindInputTerm {
            inner: self.clone(),
            f: Arc::new(f),
            desc: desc.into(),
        }))
    }

    /// The value of this term, but `Active`/`Error` until `ctrl` is `Ok`.
    ///
    /// Both halves are evaluated regardless, so the analysis stays
    /// complete while gated.
    pub fn gate(&self, ctrl: &Term<()>) -> Term<T> {
        Term::from_node(Arc::new(GateTerm {
            ctrl: ctrl.clone(),
            inner: self.clone(),
        }))
    }

    /// An always-`Ok` term carrying the inner term's whole output.
    pub fn state(&self) -> Term<Output<T>> {
        Term::from_node(Arc::new(StateTerm {
            inner: self.clone(),
        }))
    }

    /// Promote failures into values: `Ok v` becomes `Ok(Ok v)`, `Error m`
    /// becomes `Ok(Err m)`, `Active` stays `Active`.
    pub fn catch(&self) -> Term<Result<T, Msg>> {
        Term::from_node(Arc::new(CatchTerm {
            inner: self.clone(),
        }))
    }

    /// Label the analysis node this term produces.
    ///
    /// Useful for naming structure hidden behind a [`bind`] before the
    /// bound value resolves.
    ///
    /// [`bind`]: Term::bind
    pub fn component(&self, desc: impl Into<String>) -> Term<T> {
        Term::from_node(Arc::new(ComponentTerm {
            inner: self.clone(),
            desc: desc.into(),
        }))
    }
}

/// Succeeds when every term in the list succeeds.
///
/// Failure messages are concatenated (the first few shown); `Active` if
/// anything is still in flight and nothing failed.
pub fn all(items: Vec<Term<()>>) -> Term<()> {
    Term::from_node(Arc::new(AllTerm { items }))
}

/// Map a term-producing function over a list term, collecting results in
/// input order. Each element gets its own analysis child labeled by
/// `pp_item`.
pub fn list_map<A, B>(
    desc: impl Into<String>,
    pp_item: impl Fn(&A) -> String + Send + Sync + 'static,
    items: &Term<Vec<A>>,
    f: impl Fn(&A) -> Term<B> + Send + Sync + 'static,
) -> Term<Vec<B>>
where
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
{
    Term::from_node(Arc::new(ListMapTerm {
        desc: desc.into(),
        pp_item: Arc::new(pp_item),
        items: items.clone(),
        f: Arc::new(f),
    }))
}

// Variant payloads. Construction lives above; evaluation lives in `eval`.

pub(crate) struct ReturnTerm<T> {
    pub(crate) value: T,
    pub(crate) label: String,
}

pub(crate) struct FailTerm {
    pub(crate) msg: Msg,
}

pub(crate) struct ActiveTerm {
    pub(crate) reason: ActiveReason,
}

pub(crate) struct MapTerm<U, T> {
    pub(crate) inner: Term<U>,
    pub(crate) f: Arc<dyn Fn(U) -> T + Send + Sync>,
}

pub(crate) struct PairTerm<A, B> {
    pub(crate) left: Term<A>,
    pub(crate) right: Term<B>,
}

pub(crate) struct BindTerm<U, T> {
    pub(crate) inner: Term<U>,
    pub(crate) f: Arc<dyn Fn(U) -> Term<T> + Send + Sync>,
    pub(crate) desc: String,
}

pub(crate) struct BindInputTerm<U, T> {
    pub(crate) inner: Term<U>,
    pub(crate) f: Arc<dyn Fn(U) -> Input<T> + Send + Sync>,
    pub(crate) desc: String,
}

pub(crate) struct PrimitiveTerm<T> {
    pub(crate) input: Input<T>,
    pub(crate) desc: String,
}

pub(crate) struct StateTerm<T> {
    pub(crate) inner: Term<T>,
}

pub(crate) struct CatchTerm<T> {
    pub(crate) inner: Term<T>,
}

pub(crate) struct GateTerm<T> {
    pub(crate) ctrl: Term<()>,
    pub(crate) inner: Term<T>,
}

pub(crate) struct ListMapTerm<A, B> {
    pub(crate) desc: String,
    pub(crate) pp_item: Arc<dyn Fn(&A) -> String + Send + Sync>,
    pub(crate) items: Term<Vec<A>>,
    pub(crate) f: Arc<dyn Fn(&A) -> Term<B> + Send + Sync>,
}

pub(crate) struct AllTerm {
    pub(crate) items: Vec<Term<()>>,
}

pub(crate) struct ComponentTerm<T> {
    pub(crate) inner: Term<T>,
    pub(crate) desc: String,
}
