use std::collections::HashSet as StdHashSet;

use policy_syntax::{Atom, Formula, Literal, Program, Query, Rule, TypedValue};

use crate::engine::proof::{Proof, ProofCollection};
use crate::engine::theory::{handle, TheoryHandle, TheoryNode};
use crate::engine::topdown::{abduce, consequences, select};
use crate::error::{Result, RuntimeError};
use crate::tracer::ExecutionLogger;
use crate::unify::skolemize;

pub const DATABASE: &str = "database";
pub const CLASSIFY_THEORY: &str = "classification";
pub const ENFORCEMENT_THEORY: &str = "enforcement";
pub const ACTION_THEORY: &str = "action";
pub const SERVICE_THEORY: &str = "service";

/// `project`'s notion of an update atom (spec §6/§9 suffix convention).
fn table_is_update(table: &str) -> bool {
    table.ends_with('+') || table.ends_with('-')
}

/// `project`'s notion of a derived result atom (spec §6 "_result" tables).
fn table_is_result(table: &str) -> bool {
    table.ends_with("_result")
}

/// The registry and routing logic tying the engine's theories together
/// into the policy runtime a caller actually talks to (spec §4.8). Wires
/// the fixed `includes` DAG once, then exposes `insert`/`delete`/`select`/
/// `explain`/`simulate`/`remediate`/`execute` as the only public surface.
pub struct Runtime {
    database: TheoryHandle,
    classify: TheoryHandle,
    enforcement: TheoryHandle,
    action: TheoryHandle,
    service: TheoryHandle,
    logger: ExecutionLogger,
    next_call_id: u64,
}

impl Runtime {
    pub fn new() -> Self {
        let database = handle(TheoryNode::database(DATABASE));
        let classify = handle(TheoryNode::materialized(CLASSIFY_THEORY));
        classify.borrow_mut().includes.push(database.clone());
        let enforcement = handle(TheoryNode::materialized(ENFORCEMENT_THEORY));
        enforcement.borrow_mut().includes.push(classify.clone());
        let action = handle(TheoryNode::nonrecursive(ACTION_THEORY));
        action.borrow_mut().includes.push(classify.clone());
        let service = handle(TheoryNode::nonrecursive(SERVICE_THEORY));

        Runtime {
            database,
            classify,
            enforcement,
            action,
            service,
            logger: ExecutionLogger::new(),
            next_call_id: 0,
        }
    }

    fn theory(&self, name: &str) -> Result<&TheoryHandle> {
        match name {
            DATABASE => Ok(&self.database),
            CLASSIFY_THEORY => Ok(&self.classify),
            ENFORCEMENT_THEORY => Ok(&self.enforcement),
            ACTION_THEORY => Ok(&self.action),
            SERVICE_THEORY => Ok(&self.service),
            other => Err(RuntimeError::UnknownTheory(other.to_string())),
        }
    }

    /// A ground atom `x` such that `action(x)` holds in ACTION_THEORY
    /// (spec §4.8 "react_to_changes"). Recomputed on every call since
    /// actions can be (de)registered at runtime.
    pub fn get_action_names(&self) -> StdHashSet<String> {
        let query = policy_syntax::atom("action", vec![policy_syntax::var("x")]);
        select(&self.action, &query)
            .into_iter()
            .filter_map(|a| match a.argument_names().into_iter().next() {
                Some(TypedValue::Str(name)) => Some(name),
                _ => None,
            })
            .collect()
    }

    /// A direct insert/delete of an atom targeting CLASSIFY or DATABASE is
    /// rerouted to ENFORCEMENT so its derivations run (spec §4.8
    /// "compute_route"). Rule modifications, and anything already
    /// targeting ACTION/SERVICE/ENFORCEMENT, keep their declared target.
    fn compute_route<'a>(&'a self, formula: &Formula, target: &'a str) -> &'a str {
        if formula.is_atom() && (target == CLASSIFY_THEORY || target == DATABASE) {
            ENFORCEMENT_THEORY
        } else {
            target
        }
    }

    pub fn insert(&mut self, formula: Formula, target: &str) -> Result<Vec<(Atom, bool)>> {
        let routed = self.compute_route(&formula, target).to_string();
        let proof = Proof::leaf(formula.head().clone(), routed.clone());
        let theory = self.theory(&routed)?.clone();
        let changes = theory.borrow_mut().modify(&formula, true, proof)?;
        self.react_to_changes(&changes);
        Ok(changes)
    }

    pub fn delete(&mut self, formula: Formula, target: &str) -> Result<Vec<(Atom, bool)>> {
        let routed = self.compute_route(&formula, target).to_string();
        let proof = Proof::leaf(formula.head().clone(), routed.clone());
        let theory = self.theory(&routed)?.clone();
        let changes = theory.borrow_mut().modify(&formula, false, proof)?;
        self.react_to_changes(&changes);
        Ok(changes)
    }

    pub fn select(&self, query: &Atom, target: &str) -> Result<Vec<Atom>> {
        let theory = self.theory(target)?;
        Ok(select(theory, query))
    }

    /// As [`Runtime::select`], built from a [`Query`] (spec §6) instead of
    /// a bare [`Atom`] — the positional interface a surface caller builds
    /// from user input via [`policy_syntax::QueryBuilder`] without having
    /// to invent its own variable names.
    pub fn select_query(&self, query: Query, target: &str) -> Result<Vec<Atom>> {
        self.select(&query.into_atom(), target)
    }

    /// Insert every formula of `program` into `target`, in order, folding
    /// the changes each one produces (spec §6 "load a policy file" as a
    /// single call instead of one insert per line).
    pub fn load_program(&mut self, program: Program, target: &str) -> Result<Vec<(Atom, bool)>> {
        let mut changes = vec![];
        for formula in program.formulas {
            changes.extend(self.insert(formula, target)?);
        }
        Ok(changes)
    }

    /// One explanation of `atom` in terms of CLASSIFY's stored proofs
    /// (spec §4.6 "explain"): whichever proof the database happens to
    /// hold for it, not a re-derivation.
    pub fn explain(&self, atom: &Atom) -> Result<ProofCollection> {
        match &self.classify.borrow().kind {
            crate::engine::theory::TheoryKind::Materialized(view) => {
                Ok(view.explain(atom).cloned().unwrap_or_default())
            }
            _ => unreachable!("CLASSIFY_THEORY is always materialized"),
        }
    }

    /// After every modification, any newly-inserted ground atom whose
    /// table is a registered action name is executed (spec §4.8
    /// "react_to_changes").
    fn react_to_changes(&mut self, changes: &[(Atom, bool)]) {
        let actions = self.get_action_names();
        let to_run: Vec<Atom> = changes
            .iter()
            .filter(|(atom, is_insert)| *is_insert && actions.contains(&atom.table))
            .map(|(atom, _)| atom.clone())
            .collect();
        if !to_run.is_empty() {
            self.execute(&to_run);
        }
    }

    /// Ground action atoms are logged, not actually executed (spec §6
    /// "execute", "side effects delegated to an execute hook, default:
    /// log"). An unground action is logged and skipped rather than erroring
    /// (spec §7).
    pub fn execute(&mut self, actions: &[Atom]) {
        for action in actions {
            if action.is_ground() {
                self.logger.info(format!("{:?}", action));
            } else {
                self.logger.warn(format!("refusing to execute unground action {:?}", action));
            }
        }
    }

    pub fn execution_log(&self) -> &[String] {
        self.logger.messages()
    }

    pub fn debug_mode(&mut self) {
        for theory in [&self.database, &self.classify, &self.enforcement, &self.action, &self.service] {
            theory.borrow_mut().tracer.trace("*");
        }
    }

    pub fn production_mode(&mut self) {
        for theory in [&self.database, &self.classify, &self.enforcement, &self.action, &self.service] {
            theory.borrow_mut().tracer = Default::default();
        }
    }

    /// Drop `p-(x)` from `atoms` whenever `p+(x)` is also present (spec
    /// §4.8 "resolve_conflicts"): an insert always wins over a delete of
    /// the same fact derived in the same round.
    pub fn resolve_conflicts(atoms: Vec<Atom>) -> Vec<Atom> {
        let inserts: StdHashSet<Atom> = atoms
            .iter()
            .filter(|a| a.is_insert_update())
            .map(|a| a.drop_update())
            .collect();
        atoms
            .into_iter()
            .filter(|a| a.is_insert_update() || !inserts.contains(&a.drop_update()))
            .collect()
    }

    /// Strip the `+`/`-` suffix and apply the corresponding insert/delete
    /// to CLASSIFY, returning the inverted update to undo it with if
    /// something actually changed (spec §4.8 "update_classifier").
    pub fn update_classifier(&mut self, update: &Atom) -> Result<Option<Atom>> {
        let target = update.drop_update();
        let formula = Formula::Atom(target);
        let changed = if update.is_insert_update() {
            !self.insert(formula, CLASSIFY_THEORY)?.is_empty()
        } else {
            !self.delete(formula, CLASSIFY_THEORY)?.is_empty()
        };
        Ok(if changed { Some(update.invert_update()) } else { None })
    }

    /// Apply a sequence of direct updates and action invocations against
    /// ACTION_THEORY/CLASSIFY, returning the undo-sequence to restore the
    /// prior state (spec §4.8 "project", the core of `simulate`).
    fn project(&mut self, sequence: &[Formula]) -> Result<Vec<Atom>> {
        self.next_call_id += 1;
        let call_id = self.next_call_id;

        let scratch_name = format!("__project_scratch_{}", call_id);
        let scratch = handle(TheoryNode::nonrecursive(&scratch_name));
        self.action.borrow_mut().includes.push(scratch.clone());

        let action_names = self.get_action_names();
        let mut undo = vec![];
        let mut last_results: Vec<Formula> = vec![];

        for formula in sequence {
            let is_action = action_names.contains(&formula.tablename().to_string());
            if !is_action {
                self.apply_one_update(formula, &mut undo)?;
                last_results.clear();
                continue;
            }

            {
                let mut scratch_mut = scratch.borrow_mut();
                match &mut scratch_mut.kind {
                    crate::engine::theory::TheoryKind::Nonrecursive(contents) => {
                        for prior in &last_results {
                            contents.insert(prior);
                        }
                        contents.insert(formula);
                    }
                    _ => unreachable!("scratch theory is always nonrecursive"),
                }
            }

            let ground_heads = if let Formula::Rule(rule) = formula {
                let vars = rule.variables();
                let mut unifier = crate::unify::BiUnifier::new();
                let bindings = crate::engine::topdown::top_down_evaluation(
                    &self.action,
                    &vars,
                    &rule.body,
                    &mut unifier,
                    0,
                    false,
                );
                bindings
                    .first()
                    .map(|b| {
                        let plugged = crate::engine::topdown::plug_with_result(&rule.head, b);
                        if plugged.is_ground() {
                            vec![plugged]
                        } else {
                            vec![]
                        }
                    })
                    .unwrap_or_default()
            } else if formula.is_ground() {
                vec![formula.head().clone()]
            } else {
                vec![]
            };
            for head in ground_heads {
                let proof = Proof::leaf(head.clone(), scratch_name.clone());
                scratch.borrow_mut().modify(&Formula::Atom(head), true, proof)?;
            }

            let updates = consequences(&self.action, table_is_update);
            let updates = Self::resolve_conflicts(updates);
            let updates = skolemize(updates, call_id);
            for update in &updates {
                if let Some(inverse) = self.update_classifier(update)? {
                    undo.push(inverse);
                }
            }

            last_results = consequences(&self.action, table_is_result)
                .into_iter()
                .map(Formula::Atom)
                .collect();
        }

        self.action.borrow_mut().includes.retain(|h| !std::rc::Rc::ptr_eq(h, &scratch));
        undo.reverse();
        Ok(undo)
    }

    fn apply_one_update(&mut self, formula: &Formula, undo: &mut Vec<Atom>) -> Result<()> {
        let Formula::Atom(atom) = formula else {
            return Err(RuntimeError::MalformedInput(
                "direct project update must be a ground atom".into(),
            ));
        };
        if !atom.is_update() {
            return Err(RuntimeError::MalformedInput(format!(
                "project sequence element `{:?}` is neither an action nor a table+/table- update",
                atom
            )));
        }
        if let Some(inverse) = self.update_classifier(atom)? {
            undo.push(inverse);
        }
        Ok(())
    }

    /// Apply `sequence` against a scratch action context, query CLASSIFY,
    /// then roll back (spec §4.8 "simulate"). Theory contents are
    /// byte-for-byte restored afterward.
    pub fn simulate(&mut self, query: &Atom, sequence: &[Formula]) -> Result<Vec<Atom>> {
        let undo = self.project(sequence)?;
        let result = select(&self.classify, query);
        let undo_sequence: Vec<Formula> = undo.into_iter().map(Formula::Atom).collect();
        self.project(&undo_sequence)?;
        Ok(result)
    }

    /// One explanation of `goal` in terms of CLASSIFY's base tables, turned
    /// into the actions that would establish it (spec §4.8 "remediate").
    /// `goal` carries its own polarity (`remediate(not g(1))` in spec §8
    /// scenario 5 asks how to make `g(1)` become true).
    ///
    /// A leaf's polarity within the underlying proof tree is not tracked
    /// by [`Proof`] (only the top fact each node proves is); this applies
    /// `goal`'s own polarity uniformly to every leaf rather than per-leaf,
    /// which is exact whenever the proof is a single positive conjunction
    /// (true for the rule shapes spec.md's examples use) but an
    /// approximation for proofs that mix polarities across literals.
    pub fn remediate(&self, goal: &Literal) -> Result<Vec<Rule>> {
        let proofs = self.explain(&goal.atom)?;
        let leaves: Vec<Atom> = match proofs.iter().next() {
            Some(proof) => proof.leaves(),
            None => vec![goal.atom.clone()],
        };

        let action_names: Vec<String> = self.get_action_names().into_iter().collect();

        let mut rules = vec![];
        for leaf in leaves {
            let is_base = match &self.classify.borrow().kind {
                crate::engine::theory::TheoryKind::Materialized(view) => !view.is_view(&leaf.table),
                _ => unreachable!(),
            };
            if !is_base {
                continue;
            }
            let mut update_goal = leaf;
            update_goal.table.push(if goal.is_negated() { '+' } else { '-' });
            rules.extend(abduce(&self.action, &update_goal, &action_names, false));
        }
        Ok(rules)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy_syntax::{atom, fact, var, QueryBuilder};

    fn p(name: &str, args: Vec<policy_syntax::Term>) -> Atom {
        atom(name, args)
    }

    #[test]
    fn base_fact_and_rule_through_enforcement_routing() {
        let mut rt = Runtime::new();
        let rule: Formula = Rule::new(p("p", vec![var("x")]), vec![Literal::positive(p("q", vec![var("x")]))]).into();
        rt.insert(rule, CLASSIFY_THEORY).unwrap();

        rt.insert(Formula::Atom(fact("q", vec![1i64.into()])), CLASSIFY_THEORY).unwrap();
        let results = rt.select(&p("p", vec![var("x")]), CLASSIFY_THEORY).unwrap();
        assert_eq!(results, vec![fact("p", vec![1i64.into()])]);

        rt.delete(Formula::Atom(fact("q", vec![1i64.into()])), CLASSIFY_THEORY).unwrap();
        let results = rt.select(&p("p", vec![var("x")]), CLASSIFY_THEORY).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn load_program_inserts_every_formula_in_order() {
        let mut rt = Runtime::new();
        let program = Program::new(vec![
            Formula::Atom(fact("q", vec![1i64.into()])),
            Rule::new(p("p", vec![var("x")]), vec![Literal::positive(p("q", vec![var("x")]))]).into(),
        ]);
        rt.load_program(program, CLASSIFY_THEORY).unwrap();

        let query: Query = QueryBuilder::new("p").with_any().into();
        let results = rt.select_query(query, CLASSIFY_THEORY).unwrap();
        assert_eq!(results, vec![fact("p", vec![1i64.into()])]);
    }

    #[test]
    fn resolve_conflicts_drops_delete_when_insert_also_present() {
        let atoms = vec![fact("p+", vec!["a".into()]), fact("p-", vec!["a".into()])];
        let resolved = Runtime::resolve_conflicts(atoms);
        assert_eq!(resolved, vec![fact("p+", vec!["a".into()])]);
    }

    #[test]
    fn update_classifier_inserts_and_returns_inverse() {
        let mut rt = Runtime::new();
        let undo = rt.update_classifier(&fact("p+", vec!["a".into()])).unwrap();
        assert_eq!(undo, Some(fact("p-", vec!["a".into()])));
        assert!(rt.select(&p("p", vec![var("x")]), CLASSIFY_THEORY).unwrap().contains(&fact("p", vec!["a".into()])));

        let noop = rt.update_classifier(&fact("p+", vec!["a".into()])).unwrap();
        assert_eq!(noop, None);
    }

    #[test]
    fn simulate_restores_classify_state_after_direct_updates() {
        let mut rt = Runtime::new();
        rt.insert(Formula::Atom(fact("b", vec![2i64.into()])), CLASSIFY_THEORY).unwrap();

        let before = rt.select(&p("a", vec![var("x")]), CLASSIFY_THEORY).unwrap();
        assert!(before.is_empty());

        let sequence = vec![
            Formula::Atom(fact("a+", vec![1i64.into()])),
            Formula::Atom(fact("b-", vec![2i64.into()])),
        ];
        let simulated = rt.simulate(&p("a", vec![var("x")]), &sequence).unwrap();
        assert_eq!(simulated, vec![fact("a", vec![1i64.into()])]);

        let after = rt.select(&p("a", vec![var("x")]), CLASSIFY_THEORY).unwrap();
        assert!(after.is_empty());
        let b_after = rt.select(&p("b", vec![var("x")]), CLASSIFY_THEORY).unwrap();
        assert_eq!(b_after, vec![fact("b", vec![2i64.into()])]);
    }

    #[test]
    fn remediate_abduces_action_for_unsupported_goal() {
        let mut rt = Runtime::new();
        rt.insert(Formula::Atom(fact("action", vec!["do_g".into()])), ACTION_THEORY)
            .unwrap();
        let action_rule: Formula = Rule::new(
            p("g+", vec![var("x")]),
            vec![Literal::positive(p("do_g", vec![var("x")]))],
        )
        .into();
        rt.insert(action_rule, ACTION_THEORY).unwrap();

        let goal = Literal::negative(fact("g", vec![1i64.into()]));
        let rules = rt.remediate(&goal).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].head, fact("g+", vec![1i64.into()]));
        assert!(rules[0].body.iter().any(|l| l.table() == "do_g"));
    }
}
