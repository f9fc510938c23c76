// src/term/eval.rs

//! The evaluation interpreter.
//!
//! Evaluation walks a term tree against a context carrying the analysis
//! graph under construction, a memo table keyed by term identity, and the
//! accumulated set of depended-on inputs. It is pure with respect to the
//! inputs: two passes over the same structure with the same input outputs
//! produce equal outputs and structurally equal analyses.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use petgraph::graph::DiGraph;

use crate::analysis::{
    Analysis, AnalysisEdge, AnalysisNode, NodeId, NodeKind, NodeState, RunResult,
};
use crate::input::{AnySource, Input, InputId, JobId};
use crate::output::{combine_reasons, ActiveReason, Msg, Output};
use crate::term::{
    ActiveTerm, AllTerm, BindInputTerm, BindTerm, CatchTerm, ComponentTerm, FailTerm, GateTerm,
    ListMapTerm, MapTerm, PairTerm, PrimitiveTerm, ReturnTerm, StateTerm, Term, TermId,
};

/// One evaluated variant. Implementations add their node to the context's
/// graph and return the node index along with the output.
pub(crate) trait EvalNode<T>: Send + Sync {
    fn eval(&self, ctx: &mut EvalCtx) -> (Output<T>, NodeId);
}

struct MemoEntry {
    node: NodeId,
    output: Box<dyn Any + Send>,
}

/// A dependency recorded during evaluation, with the version observed at
/// read time so the engine can detect writes that raced the pass.
pub(crate) struct DepEntry {
    pub(crate) source: Arc<dyn AnySource>,
    pub(crate) seen_version: u64,
}

/// Mutable state threaded through one evaluation pass.
pub(crate) struct EvalCtx {
    graph: DiGraph<AnalysisNode, AnalysisEdge>,
    memo: HashMap<TermId, MemoEntry>,
    deps: Vec<DepEntry>,
    dep_ids: HashSet<InputId>,
}

impl EvalCtx {
    fn new() -> Self {
        EvalCtx {
            graph: DiGraph::new(),
            memo: HashMap::new(),
            deps: Vec::new(),
            dep_ids: HashSet::new(),
        }
    }

    fn add_node(
        &mut self,
        kind: NodeKind,
        label: impl Into<String>,
        state: NodeState,
        job_id: Option<JobId>,
    ) -> NodeId {
        self.graph.add_node(AnalysisNode {
            kind,
            label: label.into(),
            state,
            job_id,
        })
    }

    fn add_edge(&mut self, from: NodeId, to: NodeId, static_dep: bool) {
        self.graph.add_edge(from, to, AnalysisEdge { static_dep });
    }

    fn set_label(&mut self, node: NodeId, label: &str) {
        if let Some(weight) = self.graph.node_weight_mut(node) {
            weight.label = label.to_string();
        }
    }

    /// Read an input, registering it as a dependency of this pass.
    /// Reading the same input twice records it once.
    fn read_input<T: Clone + Send + Sync + 'static>(
        &mut self,
        input: &Input<T>,
    ) -> (Output<T>, Option<JobId>) {
        // Version before the read: if the value changes after this point
        // the engine's post-subscribe check still catches it.
        let seen_version = input.version();
        let (output, job_id) = input.get();
        if self.dep_ids.insert(input.id()) {
            self.deps.push(DepEntry {
                source: input.as_source(),
                seen_version,
            });
        }
        (output, job_id)
    }

    fn lookup<T: Clone + 'static>(&self, id: TermId) -> Option<(Output<T>, NodeId)> {
        let entry = self.memo.get(&id)?;
        let output = entry.output.downcast_ref::<Output<T>>()?.clone();
        Some((output, entry.node))
    }

    fn remember<T: Clone + Send + 'static>(&mut self, id: TermId, node: NodeId, output: Output<T>) {
        self.memo.insert(
            id,
            MemoEntry {
                node,
                output: Box::new(output),
            },
        );
    }
}

impl<T: Clone + Send + Sync + 'static> Term<T> {
    /// Evaluate within a context, sharing nodes with any earlier
    /// evaluation of the same term in this pass.
    pub(crate) fn eval_in(&self, ctx: &mut EvalCtx) -> (Output<T>, NodeId) {
        if let Some(hit) = ctx.lookup::<T>(self.id) {
            return hit;
        }
        let (output, node) = self.node.eval(ctx);
        ctx.remember(self.id, node, output.clone());
        (output, node)
    }
}

/// Result of one evaluation pass.
pub struct Evaluated<T> {
    pub output: Output<T>,
    pub analysis: Analysis,
    pub(crate) sources: Vec<DepEntry>,
}

impl<T> Evaluated<T> {
    /// Identities of every input this pass read.
    pub fn depends_on(&self) -> Vec<InputId> {
        self.sources.iter().map(|d| d.source.id()).collect()
    }
}

/// Evaluate a term from scratch.
pub fn evaluate<T: Clone + Send + Sync + 'static>(term: &Term<T>) -> Evaluated<T> {
    let mut ctx = EvalCtx::new();
    let (output, root) = term.eval_in(&mut ctx);
    let EvalCtx { graph, deps, .. } = ctx;
    Evaluated {
        output,
        analysis: Analysis::from_graph(graph, Some(root)),
        sources: deps,
    }
}

fn state_of<T>(output: &Output<T>) -> NodeState {
    match output {
        Output::Ok(_) => NodeState::Ready(RunResult::Ok),
        Output::Error(_) => NodeState::Ready(RunResult::Err),
        Output::Active(r) => NodeState::Active(*r),
    }
}

impl<T: Clone + Send + Sync + 'static> EvalNode<T> for ReturnTerm<T> {
    fn eval(&self, ctx: &mut EvalCtx) -> (Output<T>, NodeId) {
        let node = ctx.add_node(
            NodeKind::Constant,
            self.label.clone(),
            NodeState::Ready(RunResult::Ok),
            None,
        );
        (Output::Ok(self.value.clone()), node)
    }
}

impl<T: Clone + Send + Sync + 'static> EvalNode<T> for FailTerm {
    fn eval(&self, ctx: &mut EvalCtx) -> (Output<T>, NodeId) {
        let node = ctx.add_node(
            NodeKind::Failed,
            self.msg.0.clone(),
            NodeState::Ready(RunResult::Err),
            None,
        );
        (Output::Error(self.msg.clone()), node)
    }
}

impl<T: Clone + Send + Sync + 'static> EvalNode<T> for ActiveTerm {
    fn eval(&self, ctx: &mut EvalCtx) -> (Output<T>, NodeId) {
        let node = ctx.add_node(
            NodeKind::Active,
            self.reason.to_string(),
            NodeState::Active(self.reason),
            None,
        );
        (Output::Active(self.reason), node)
    }
}

impl<U, T> EvalNode<T> for MapTerm<U, T>
where
    U: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn eval(&self, ctx: &mut EvalCtx) -> (Output<T>, NodeId) {
        let (inner_out, inner_node) = self.inner.eval_in(ctx);
        let output = inner_out.map(|v| (self.f)(v));
        let node = ctx.add_node(NodeKind::Map, "map", state_of(&output), None);
        ctx.add_edge(node, inner_node, false);
        (output, node)
    }
}

impl<A, B> EvalNode<(A, B)> for PairTerm<A, B>
where
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
{
    fn eval(&self, ctx: &mut EvalCtx) -> (Output<(A, B)>, NodeId) {
        let (left_out, left_node) = self.left.eval_in(ctx);
        let (right_out, right_node) = self.right.eval_in(ctx);
        let output = Output::pair(left_out, right_out);
        let node = ctx.add_node(NodeKind::Pair, "pair", state_of(&output), None);
        ctx.add_edge(node, left_node, false);
        ctx.add_edge(node, right_node, false);
        (output, node)
    }
}

impl<U, T> EvalNode<T> for BindTerm<U, T>
where
    U: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn eval(&self, ctx: &mut EvalCtx) -> (Output<T>, NodeId) {
        let (inner_out, inner_node) = self.inner.eval_in(ctx);
        match inner_out {
            Output::Ok(v) => {
                let produced = (self.f)(v);
                let (out, produced_node) = produced.eval_in(ctx);
                let node = ctx.add_node(NodeKind::Bind, self.desc.clone(), state_of(&out), None);
                ctx.add_edge(node, inner_node, true);
                ctx.add_edge(node, produced_node, false);
                (out, node)
            }
            Output::Active(r) => {
                let node =
                    ctx.add_node(NodeKind::Bind, self.desc.clone(), NodeState::Blocked, None);
                ctx.add_edge(node, inner_node, true);
                (Output::Active(r), node)
            }
            Output::Error(m) => {
                let node =
                    ctx.add_node(NodeKind::Bind, self.desc.clone(), NodeState::Blocked, None);
                ctx.add_edge(node, inner_node, true);
                (Output::Error(m), node)
            }
        }
    }
}

impl<U, T> EvalNode<T> for BindInputTerm<U, T>
where
    U: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn eval(&self, ctx: &mut EvalCtx) -> (Output<T>, NodeId) {
        let (inner_out, inner_node) = self.inner.eval_in(ctx);
        match inner_out {
            Output::Ok(v) => {
                let input = (self.f)(v);
                let (out, job_id) = ctx.read_input(&input);
                let child = ctx.add_node(
                    NodeKind::Primitive,
                    input.label(),
                    state_of(&out),
                    job_id,
                );
                let node = ctx.add_node(NodeKind::Bind, self.desc.clone(), state_of(&out), None);
                ctx.add_edge(node, inner_node, true);
                ctx.add_edge(node, child, false);
                (out, node)
            }
            Output::Active(r) => {
                let node =
                    ctx.add_node(NodeKind::Bind, self.desc.clone(), NodeState::Blocked, None);
                ctx.add_edge(node, inner_node, true);
                (Output::Active(r), node)
            }
            Output::Error(m) => {
                let node =
                    ctx.add_node(NodeKind::Bind, self.desc.clone(), NodeState::Blocked, None);
                ctx.add_edge(node, inner_node, true);
                (Output::Error(m), node)
            }
        }
    }
}

impl<T: Clone + Send + Sync + 'static> EvalNode<T> for PrimitiveTerm<T> {
    fn eval(&self, ctx: &mut EvalCtx) -> (Output<T>, NodeId) {
        let (output, job_id) = ctx.read_input(&self.input);
        let node = ctx.add_node(
            NodeKind::Primitive,
            self.desc.clone(),
            state_of(&output),
            job_id,
        );
        (output, node)
    }
}

impl<T: Clone + Send + Sync + 'static> EvalNode<Output<T>> for StateTerm<T> {
    fn eval(&self, ctx: &mut EvalCtx) -> (Output<Output<T>>, NodeId) {
        let (inner_out, inner_node) = self.inner.eval_in(ctx);
        let node = ctx.add_node(
            NodeKind::State,
            "state",
            NodeState::Ready(RunResult::Ok),
            None,
        );
        ctx.add_edge(node, inner_node, false);
        (Output::Ok(inner_out), node)
    }
}

impl<T: Clone + Send + Sync + 'static> EvalNode<Result<T, Msg>> for CatchTerm<T> {
    fn eval(&self, ctx: &mut EvalCtx) -> (Output<Result<T, Msg>>, NodeId) {
        let (inner_out, inner_node) = self.inner.eval_in(ctx);
        let output = match inner_out {
            Output::Ok(v) => Output::Ok(Ok(v)),
            Output::Error(m) => Output::Ok(Err(m)),
            Output::Active(r) => Output::Active(r),
        };
        let node = ctx.add_node(NodeKind::Catch, "catch", state_of(&output), None);
        ctx.add_edge(node, inner_node, false);
        (output, node)
    }
}

impl<T: Clone + Send + Sync + 'static> EvalNode<T> for GateTerm<T> {
    fn eval(&self, ctx: &mut EvalCtx) -> (Output<T>, NodeId) {
        let (ctrl_out, ctrl_node) = self.ctrl.eval_in(ctx);
        let (inner_out, inner_node) = self.inner.eval_in(ctx);
        let (output, state) = match ctrl_out {
            Output::Ok(()) => {
                let state = state_of(&inner_out);
                (inner_out, state)
            }
            Output::Active(r) => (Output::Active(r), NodeState::Blocked),
            Output::Error(m) => (Output::Error(m), NodeState::Blocked),
        };
        let node = ctx.add_node(NodeKind::Gate, "gate", state, None);
        ctx.add_edge(node, ctrl_node, true);
        ctx.add_edge(node, inner_node, false);
        (output, node)
    }
}

impl<A, B> EvalNode<Vec<B>> for ListMapTerm<A, B>
where
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
{
    fn eval(&self, ctx: &mut EvalCtx) -> (Output<Vec<B>>, NodeId) {
        let (items_out, items_node) = self.items.eval_in(ctx);
        match items_out {
            Output::Ok(items) => {
                let mut outputs = Vec::with_capacity(items.len());
                let mut children = Vec::with_capacity(items.len());
                for item in &items {
                    let label = (self.pp_item)(item);
                    let per_item = (self.f)(item).component(label);
                    let (out, child) = per_item.eval_in(ctx);
                    outputs.push(out);
                    children.push(child);
                }
                let output = combine_list(outputs);
                let node =
                    ctx.add_node(NodeKind::ListMap, self.desc.clone(), state_of(&output), None);
                ctx.add_edge(node, items_node, true);
                for child in children {
                    ctx.add_edge(node, child, false);
                }
                (output, node)
            }
            Output::Active(r) => {
                let node =
                    ctx.add_node(NodeKind::ListMap, self.desc.clone(), NodeState::Blocked, None);
                ctx.add_edge(node, items_node, true);
                (Output::Active(r), node)
            }
            Output::Error(m) => {
                let node =
                    ctx.add_node(NodeKind::ListMap, self.desc.clone(), NodeState::Blocked, None);
                ctx.add_edge(node, items_node, true);
                (Output::Error(m), node)
            }
        }
    }
}

impl EvalNode<()> for AllTerm {
    fn eval(&self, ctx: &mut EvalCtx) -> (Output<()>, NodeId) {
        let mut errors: Vec<Msg> = Vec::new();
        let mut active: Option<ActiveReason> = None;
        let mut children = Vec::with_capacity(self.items.len());

        for item in &self.items {
            let (out, child) = item.eval_in(ctx);
            children.push(child);
            match out {
                Output::Ok(()) => {}
                Output::Error(m) => errors.push(m),
                Output::Active(r) => {
                    active = Some(match active {
                        Some(prev) => combine_reasons(prev, r),
                        None => r,
                    });
                }
            }
        }

        let output = if !errors.is_empty() {
            Output::Error(summarize_errors(&errors))
        } else if let Some(r) = active {
            Output::Active(r)
        } else {
            Output::Ok(())
        };

        let node = ctx.add_node(NodeKind::All, "all", state_of(&output), None);
        for child in children {
            ctx.add_edge(node, child, false);
        }
        (output, node)
    }
}

impl<T: Clone + Send + Sync + 'static> EvalNode<T> for ComponentTerm<T> {
    fn eval(&self, ctx: &mut EvalCtx) -> (Output<T>, NodeId) {
        // Pure labeling: no node of its own, just a name on the child's
        // root node.
        let (output, node) = self.inner.eval_in(ctx);
        ctx.set_label(node, &self.desc);
        (output, node)
    }
}

fn combine_list<B>(outputs: Vec<Output<B>>) -> Output<Vec<B>> {
    let mut values = Vec::with_capacity(outputs.len());
    let mut active: Option<ActiveReason> = None;
    for out in outputs {
        match out {
            Output::Ok(v) => values.push(v),
            Output::Error(m) => return Output::Error(m),
            Output::Active(r) => {
                active = Some(match active {
                    Some(prev) => combine_reasons(prev, r),
                    None => r,
                });
            }
        }
    }
    match active {
        Some(r) => Output::Active(r),
        None => Output::Ok(values),
    }
}

const MAX_SHOWN_ERRORS: usize = 3;

fn summarize_errors(errors: &[Msg]) -> Msg {
    let shown: Vec<&str> = errors
        .iter()
        .take(MAX_SHOWN_ERRORS)
        .map(|m| m.0.as_str())
        .collect();
    let mut text = shown.join("; ");
    if errors.len() > MAX_SHOWN_ERRORS {
        text.push_str(&format!(" (+{} more)", errors.len() - MAX_SHOWN_ERRORS));
    }
    Msg(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::NodeKind;
    use crate::input::Input;
    use crate::term::{all, list_map};

    #[test]
    fn constant_evaluates_to_single_labeled_node() {
        let term = Term::pure(42u32);
        let evaluated = evaluate(&term);
        assert_eq!(evaluated.output, Output::Ok(42));
        assert_eq!(evaluated.analysis.node_count(), 1);
        let root = evaluated.analysis.root().unwrap();
        let node = evaluated.analysis.node(root).unwrap();
        assert_eq!(node.kind, NodeKind::Constant);
        assert_eq!(node.label, "42");
    }

    #[test]
    fn map_applies_to_ok_only() {
        let ok = Term::pure(2u32).map(|n| n * 10);
        assert_eq!(evaluate(&ok).output, Output::Ok(20));

        let failing: Term<u32> = Term::fail("nope");
        let mapped = failing.map(|n| n * 10);
        assert_eq!(evaluate(&mapped).output, Output::error("nope"));
    }

    #[test]
    fn pair_is_ok_iff_both_ok() {
        let a = Term::pure(1u8);
        let b = Term::pure(2u8);
        assert_eq!(evaluate(&a.pair(&b)).output, Output::Ok((1, 2)));

        let failing: Term<u8> = Term::fail("left broke");
        assert_eq!(
            evaluate(&failing.pair(&b)).output,
            Output::error("left broke")
        );
    }

    #[test]
    fn bind_is_not_called_until_ok() {
        let ctrl: Term<bool> = Term::active(ActiveReason::Running);
        let bound = ctrl.bind("pick branch", |flag| {
            if flag {
                Term::pure_labelled("one", 1u8)
            } else {
                Term::pure_labelled("two", 2u8)
            }
        });
        let evaluated = evaluate(&bound);
        assert_eq!(evaluated.output, Output::Active(ActiveReason::Running));

        let root = evaluated.analysis.root().unwrap();
        let node = evaluated.analysis.node(root).unwrap();
        assert_eq!(node.kind, NodeKind::Bind);
        assert_eq!(node.label, "pick branch");
        assert_eq!(node.state, NodeState::Blocked);
        // Static edge to the control only; no dynamic children yet.
        assert_eq!(evaluated.analysis.deps_of(root).len(), 1);
    }

    #[test]
    fn bind_shows_dynamic_children_after_resolution() {
        let ctrl = Term::pure(true);
        let bound = ctrl.bind("pick branch", |flag| {
            if flag {
                Term::pure_labelled("one", 1u8)
            } else {
                Term::pure_labelled("two", 2u8)
            }
        });
        let evaluated = evaluate(&bound);
        assert_eq!(evaluated.output, Output::Ok(1));
        let root = evaluated.analysis.root().unwrap();
        assert_eq!(evaluated.analysis.deps_of(root).len(), 2);
    }

    #[test]
    fn primitive_registers_dependency() {
        let input = Input::new("branch head", Output::Ok("abc".to_string()));
        let term = Term::primitive("branch head", &input);
        let evaluated = evaluate(&term);
        assert_eq!(evaluated.output, Output::Ok("abc".to_string()));
        assert_eq!(evaluated.depends_on(), vec![input.id()]);
    }

    #[test]
    fn reading_an_input_twice_records_it_once() {
        let input = Input::new("head", Output::Ok(7u32));
        let a = Term::primitive("head (a)", &input);
        let b = Term::primitive("head (b)", &input);
        let evaluated = evaluate(&a.pair(&b));
        assert_eq!(evaluated.depends_on(), vec![input.id()]);
    }

    #[test]
    fn shared_subterm_shares_its_node() {
        let shared = Term::pure(5u8);
        let left = shared.map(|n| n + 1);
        let right = shared.map(|n| n + 2);
        let evaluated = evaluate(&left.pair(&right));
        // constant, two maps, pair
        assert_eq!(evaluated.analysis.node_count(), 4);
    }

    #[test]
    fn state_is_always_ok() {
        let failing: Term<u8> = Term::fail("broken");
        let state = failing.state();
        assert_eq!(
            evaluate(&state).output,
            Output::Ok(Output::error("broken"))
        );
    }

    #[test]
    fn catch_law() {
        let ok = Term::pure(3u8);
        assert_eq!(evaluate(&ok.catch()).output, Output::Ok(Ok(3)));

        let failing: Term<u8> = Term::fail("boom");
        assert_eq!(
            evaluate(&failing.catch()).output,
            Output::Ok(Err(Msg::new("boom")))
        );

        let active: Term<u8> = Term::active(ActiveReason::ReadyToRerun);
        assert_eq!(
            evaluate(&active.catch()).output,
            Output::Active(ActiveReason::ReadyToRerun)
        );
    }

    #[test]
    fn gate_law() {
        let value = Term::pure(9u8);

        let open = Term::pure_labelled("switch", ());
        assert_eq!(evaluate(&value.gate(&open)).output, Output::Ok(9));

        let waiting: Term<()> = Term::active(ActiveReason::Running);
        assert_eq!(
            evaluate(&value.gate(&waiting)).output,
            Output::Active(ActiveReason::Running)
        );

        let broken: Term<()> = Term::fail("no access");
        assert_eq!(
            evaluate(&value.gate(&broken)).output,
            Output::error("no access")
        );
    }

    #[test]
    fn gate_still_evaluates_the_gated_side() {
        let input = Input::new("deploy target", Output::Ok(1u8));
        let gated = Term::primitive("deploy target", &input)
            .gate(&Term::active(ActiveReason::Running));
        let evaluated = evaluate(&gated);
        // Blocked, but the dependency is still tracked and visible.
        assert_eq!(evaluated.depends_on(), vec![input.id()]);
        assert!(evaluated.output.is_active());
    }

    #[test]
    fn all_concatenates_first_few_errors() {
        let items: Vec<Term<()>> = vec![
            Term::fail("e1"),
            Term::fail("e2"),
            Term::fail("e3"),
            Term::fail("e4"),
            Term::fail("e5"),
        ];
        let evaluated = evaluate(&all(items));
        assert_eq!(
            evaluated.output,
            Output::error("e1; e2; e3 (+2 more)")
        );
    }

    #[test]
    fn all_active_if_any_active_and_no_error() {
        let items: Vec<Term<()>> = vec![
            Term::pure_labelled("done", ()),
            Term::active(ActiveReason::Running),
        ];
        assert_eq!(
            evaluate(&all(items)).output,
            Output::Active(ActiveReason::Running)
        );
    }

    #[test]
    fn all_of_empty_list_is_ok() {
        assert_eq!(evaluate(&all(Vec::new())).output, Output::Ok(()));
    }

    #[test]
    fn list_map_preserves_order() {
        let items = Term::pure_labelled("ids", vec![3u32, 1, 2]);
        let doubled = list_map(
            "double each",
            |n: &u32| format!("id {n}"),
            &items,
            |n| Term::pure(*n * 2),
        );
        let evaluated = evaluate(&doubled);
        assert_eq!(evaluated.output, Output::Ok(vec![6, 2, 4]));
    }

    #[test]
    fn list_map_propagates_non_ok_source() {
        let items: Term<Vec<u32>> = Term::fail("cannot list");
        let mapped = list_map("noop", |n: &u32| n.to_string(), &items, |n| Term::pure(*n));
        let evaluated = evaluate(&mapped);
        assert_eq!(evaluated.output, Output::error("cannot list"));
        let root = evaluated.analysis.root().unwrap();
        assert_eq!(
            evaluated.analysis.node(root).unwrap().state,
            NodeState::Blocked
        );
    }

    #[test]
    fn list_map_labels_each_child() {
        let items = Term::pure_labelled("ids", vec![1u32, 2]);
        let mapped = list_map(
            "children",
            |n: &u32| format!("child {n}"),
            &items,
            |n| Term::pure(*n),
        );
        let evaluated = evaluate(&mapped);
        let labels: Vec<String> = evaluated
            .analysis
            .nodes()
            .map(|(_, n)| n.label.clone())
            .collect();
        assert!(labels.contains(&"child 1".to_string()));
        assert!(labels.contains(&"child 2".to_string()));
    }

    #[test]
    fn component_relabels_without_adding_a_node() {
        let plain = Term::pure(1u8);
        let labeled = plain.component("the one");
        let evaluated = evaluate(&labeled);
        assert_eq!(evaluated.analysis.node_count(), 1);
        let root = evaluated.analysis.root().unwrap();
        assert_eq!(evaluated.analysis.node(root).unwrap().label, "the one");
    }

    #[test]
    fn bind_input_registers_dynamic_dependency() {
        let selector = Term::pure(true);
        let input_a = Input::new("registry a", Output::Ok(10u32));
        let input_b = Input::new("registry b", Output::Ok(20u32));
        let a = input_a.clone();
        let b = input_b.clone();
        let bound = selector.bind_input("select registry", move |flag| {
            if flag {
                a.clone()
            } else {
                b.clone()
            }
        });
        let evaluated = evaluate(&bound);
        assert_eq!(evaluated.output, Output::Ok(10));
        assert_eq!(evaluated.depends_on(), vec![input_a.id()]);
    }

    #[test]
    fn re_evaluation_is_deterministic() {
        let input = Input::new("head", Output::Ok("abc".to_string()));
        let term = Term::primitive("head", &input)
            .bind("build", |commit| {
                Term::pure_labelled(format!("image for {commit}"), commit.len())
            })
            .map(|n| n + 1)
            .state()
            .map(|_| ());

        let first = evaluate(&term);
        let second = evaluate(&term);
        assert_eq!(first.output, second.output);
        assert_eq!(first.analysis, second.analysis);
    }
}
