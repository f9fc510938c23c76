// tests/term_laws.rs

mod common;
use crate::common::init_tracing;

use proptest::prelude::*;

use livedag::{evaluate, ActiveReason, Msg, Output, Term};

/// A model of term trees over `i64`, small enough to enumerate semantics
/// by hand. Gate controls are models mapped to `()`.
#[derive(Debug, Clone)]
enum Model {
    Pure(i64),
    Fail(String),
    Active(bool),
    Map(Box<Model>, i64),
    Pair(Box<Model>, Box<Model>),
    Gate(Box<Model>, Box<Model>),
}

fn model_strategy() -> impl Strategy<Value = Model> {
    let leaf = prop_oneof![
        (-100i64..100).prop_map(Model::Pure),
        "[a-z]{1,8}".prop_map(Model::Fail),
        any::<bool>().prop_map(Model::Active),
    ];
    leaf.prop_recursive(4, 32, 2, |inner| {
        prop_oneof![
            (inner.clone(), -100i64..100).prop_map(|(m, k)| Model::Map(Box::new(m), k)),
            (inner.clone(), inner.clone())
                .prop_map(|(a, b)| Model::Pair(Box::new(a), Box::new(b))),
            (inner.clone(), inner)
                .prop_map(|(ctrl, x)| Model::Gate(Box::new(ctrl), Box::new(x))),
        ]
    })
}

fn build(model: &Model) -> Term<i64> {
    match model {
        Model::Pure(n) => Term::pure(*n),
        Model::Fail(msg) => Term::fail(msg.as_str()),
        Model::Active(true) => Term::active(ActiveReason::Running),
        Model::Active(false) => Term::active(ActiveReason::ReadyToRerun),
        Model::Map(inner, k) => {
            let k = *k;
            build(inner).map(move |n| n.wrapping_add(k))
        }
        Model::Pair(a, b) => build(a).pair(&build(b)).map(|(x, y)| x.wrapping_add(y)),
        Model::Gate(ctrl, x) => build(x).gate(&build(ctrl).map(|_| ())),
    }
}

/// Reference semantics, written directly over `Output`.
fn expected(model: &Model) -> Output<i64> {
    match model {
        Model::Pure(n) => Output::Ok(*n),
        Model::Fail(msg) => Output::error(msg.as_str()),
        Model::Active(true) => Output::Active(ActiveReason::Running),
        Model::Active(false) => Output::Active(ActiveReason::ReadyToRerun),
        Model::Map(inner, k) => expected(inner).map(|n| n.wrapping_add(*k)),
        Model::Pair(a, b) => {
            Output::pair(expected(a), expected(b)).map(|(x, y)| x.wrapping_add(y))
        }
        Model::Gate(ctrl, x) => match expected(ctrl) {
            Output::Ok(_) => expected(x),
            Output::Active(r) => Output::Active(r),
            Output::Error(m) => Output::Error(m),
        },
    }
}

proptest! {
    #[test]
    fn evaluation_matches_reference_semantics(model in model_strategy()) {
        let term = build(&model);
        prop_assert_eq!(evaluate(&term).output, expected(&model));
    }

    #[test]
    fn catch_law(model in model_strategy()) {
        let term = build(&model);
        let caught = evaluate(&term.catch()).output;
        let plain = evaluate(&term).output;
        match plain {
            Output::Ok(v) => prop_assert_eq!(caught, Output::Ok(Ok(v))),
            Output::Error(m) => prop_assert_eq!(caught, Output::Ok(Err(m))),
            Output::Active(r) => prop_assert_eq!(caught, Output::Active(r)),
        }
    }

    #[test]
    fn state_is_always_ok(model in model_strategy()) {
        let term = build(&model);
        let stated = evaluate(&term.state()).output;
        let plain = evaluate(&term).output;
        prop_assert_eq!(stated, Output::Ok(plain));
    }

    #[test]
    fn gate_law(ctrl in model_strategy(), value in model_strategy()) {
        let value_term = build(&value);
        let ctrl_term = build(&ctrl).map(|_| ());
        let gated = evaluate(&value_term.gate(&ctrl_term)).output;
        match evaluate(&ctrl_term).output {
            Output::Ok(()) => prop_assert_eq!(gated, evaluate(&value_term).output),
            Output::Active(r) => prop_assert_eq!(gated, Output::Active(r)),
            Output::Error(m) => prop_assert_eq!(gated, Output::Error(m)),
        }
    }

    #[test]
    fn list_map_preserves_input_order(values in proptest::collection::vec(-100i64..100, 0..16)) {
        let items = Term::pure_labelled("values", values.clone());
        let mapped = livedag::list_map(
            "triple",
            |n: &i64| format!("item {n}"),
            &items,
            |n| Term::pure(n.wrapping_mul(3)),
        );
        let expected: Vec<i64> = values.iter().map(|n| n.wrapping_mul(3)).collect();
        prop_assert_eq!(evaluate(&mapped).output, Output::Ok(expected));
    }

    #[test]
    fn re_evaluation_is_structurally_deterministic(model in model_strategy()) {
        let term = build(&model);
        let first = evaluate(&term);
        let second = evaluate(&term);
        prop_assert_eq!(first.output, second.output);
        prop_assert_eq!(first.analysis, second.analysis);
    }
}

#[test]
fn error_messages_survive_catch() {
    init_tracing();
    let term: Term<i64> = Term::fail("fetch quota exhausted");
    let caught = evaluate(&term.catch()).output;
    assert_eq!(caught, Output::Ok(Err(Msg::new("fetch quota exhausted"))));
}
