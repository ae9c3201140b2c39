use policy_engine::runtime::{Runtime, ACTION_THEORY, CLASSIFY_THEORY};
use policy_syntax::{atom, fact, var, Formula, Literal, Rule};
use pretty_assertions::assert_eq;

fn p(table: &str, args: Vec<policy_syntax::Term>) -> policy_syntax::Atom {
    atom(table, args)
}

#[test]
fn scenario_base_fact_and_rule() {
    let mut rt = Runtime::new();
    let rule: Formula = Rule::new(p("p", vec![var("x")]), vec![Literal::positive(p("q", vec![var("x")]))]).into();
    rt.insert(rule, CLASSIFY_THEORY).unwrap();

    rt.insert(Formula::Atom(fact("q", vec![1i64.into()])), CLASSIFY_THEORY).unwrap();
    assert_eq!(
        rt.select(&p("p", vec![var("x")]), CLASSIFY_THEORY).unwrap(),
        vec![fact("p", vec![1i64.into()])]
    );

    rt.delete(Formula::Atom(fact("q", vec![1i64.into()])), CLASSIFY_THEORY).unwrap();
    assert!(rt.select(&p("p", vec![var("x")]), CLASSIFY_THEORY).unwrap().is_empty());
}

#[test]
fn scenario_recursive_transitive_closure() {
    let mut rt = Runtime::new();
    let base: Formula = Rule::new(
        p("r", vec![var("x"), var("y")]),
        vec![Literal::positive(p("e", vec![var("x"), var("y")]))],
    )
    .into();
    let chained: Formula = Rule::new(
        p("r", vec![var("x"), var("z")]),
        vec![
            Literal::positive(p("r", vec![var("x"), var("y")])),
            Literal::positive(p("e", vec![var("y"), var("z")])),
        ],
    )
    .into();
    rt.insert(base, CLASSIFY_THEORY).unwrap();
    rt.insert(chained, CLASSIFY_THEORY).unwrap();

    for (a, b) in [(1, 2), (2, 3), (3, 4)] {
        rt.insert(Formula::Atom(fact("e", vec![a.into(), b.into()])), CLASSIFY_THEORY)
            .unwrap();
    }

    let mut results = rt.select(&p("r", vec![1i64.into(), var("y")]), CLASSIFY_THEORY).unwrap();
    results.sort_by_key(|a| format!("{:?}", a));
    assert_eq!(
        results,
        vec![
            fact("r", vec![1i64.into(), 2i64.into()]),
            fact("r", vec![1i64.into(), 3i64.into()]),
            fact("r", vec![1i64.into(), 4i64.into()]),
        ]
    );
}

#[test]
fn scenario_negation_as_failure() {
    let mut rt = Runtime::new();
    let rule: Formula = Rule::new(
        p("s", vec![var("x")]),
        vec![
            Literal::positive(p("t", vec![var("x")])),
            Literal::negative(p("u", vec![var("x")])),
        ],
    )
    .into();
    rt.insert(rule, CLASSIFY_THEORY).unwrap();

    for t in [1, 2] {
        rt.insert(Formula::Atom(fact("t", vec![t.into()])), CLASSIFY_THEORY).unwrap();
    }
    rt.insert(Formula::Atom(fact("u", vec![1i64.into()])), CLASSIFY_THEORY).unwrap();

    assert_eq!(
        rt.select(&p("s", vec![var("x")]), CLASSIFY_THEORY).unwrap(),
        vec![fact("s", vec![2i64.into()])]
    );

    rt.insert(Formula::Atom(fact("u", vec![2i64.into()])), CLASSIFY_THEORY).unwrap();
    assert!(rt.select(&p("s", vec![var("x")]), CLASSIFY_THEORY).unwrap().is_empty());
}

#[test]
fn scenario_proof_based_deletion_keeps_fact_alive_until_last_proof_removed() {
    let mut rt = Runtime::new();
    let from_q: Formula = Rule::new(p("p", vec![var("x")]), vec![Literal::positive(p("q", vec![var("x")]))]).into();
    let from_r: Formula = Rule::new(p("p", vec![var("x")]), vec![Literal::positive(p("r", vec![var("x")]))]).into();
    rt.insert(from_q, CLASSIFY_THEORY).unwrap();
    rt.insert(from_r, CLASSIFY_THEORY).unwrap();

    rt.insert(Formula::Atom(fact("q", vec![1i64.into()])), CLASSIFY_THEORY).unwrap();
    rt.insert(Formula::Atom(fact("r", vec![1i64.into()])), CLASSIFY_THEORY).unwrap();
    assert_eq!(
        rt.select(&p("p", vec![var("x")]), CLASSIFY_THEORY).unwrap(),
        vec![fact("p", vec![1i64.into()])]
    );

    rt.delete(Formula::Atom(fact("q", vec![1i64.into()])), CLASSIFY_THEORY).unwrap();
    assert_eq!(
        rt.select(&p("p", vec![var("x")]), CLASSIFY_THEORY).unwrap(),
        vec![fact("p", vec![1i64.into()])],
        "p(1) is still supported by r(1)"
    );

    rt.delete(Formula::Atom(fact("r", vec![1i64.into()])), CLASSIFY_THEORY).unwrap();
    assert!(rt.select(&p("p", vec![var("x")]), CLASSIFY_THEORY).unwrap().is_empty());
}

#[test]
fn scenario_abduction_via_remediate() {
    let mut rt = Runtime::new();
    rt.insert(Formula::Atom(fact("action", vec!["enable".into()])), ACTION_THEORY)
        .unwrap();
    let action_rule: Formula = Rule::new(
        p("g+", vec![var("x")]),
        vec![Literal::positive(p("enable", vec![var("x")]))],
    )
    .into();
    rt.insert(action_rule, ACTION_THEORY).unwrap();

    let goal = Literal::negative(fact("g", vec![1i64.into()]));
    let rules = rt.remediate(&goal).unwrap();
    assert!(!rules.is_empty());
    assert!(rules
        .iter()
        .all(|rule| rule.body.iter().any(|literal| literal.table() == "enable")));
}

#[test]
fn scenario_simulate_with_rollback() {
    let mut rt = Runtime::new();
    rt.insert(Formula::Atom(fact("b", vec![2i64.into()])), CLASSIFY_THEORY).unwrap();

    let before_a = rt.select(&p("a", vec![var("x")]), CLASSIFY_THEORY).unwrap();
    let before_b = rt.select(&p("b", vec![var("x")]), CLASSIFY_THEORY).unwrap();

    let sequence = vec![
        Formula::Atom(fact("a+", vec![1i64.into()])),
        Formula::Atom(fact("b-", vec![2i64.into()])),
    ];
    let simulated = rt.simulate(&p("a", vec![var("x")]), &sequence).unwrap();
    assert_eq!(simulated, vec![fact("a", vec![1i64.into()])]);

    assert_eq!(rt.select(&p("a", vec![var("x")]), CLASSIFY_THEORY).unwrap(), before_a);
    assert_eq!(rt.select(&p("b", vec![var("x")]), CLASSIFY_THEORY).unwrap(), before_b);
}
