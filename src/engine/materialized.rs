use ahash::HashMap;
use policy_syntax::{Atom, Formula, Literal, Rule};

use crate::error::{Result, RuntimeError};
use crate::unify::{bi_unify_atoms, BiUnifier};

use super::database::Database;
use super::delta::{eliminate_self_joins, DeltaRule, DeltaRuleTheory};
use super::event::{Event, EventQueue};
use super::proof::Proof;
use super::theory::{handle, TheoryHandle, TheoryKind, TheoryNode};
use super::topdown::{plug_with_result, top_down_evaluation, TopDownResult};

/// A theory whose view contents are computed and stored up front, kept in
/// sync incrementally as base facts change, rather than recomputed on
/// every query (spec §4.6). Owns its own [`Database`] of derived tuples
/// and a [`DeltaRuleTheory`] describing how base-table events propagate
/// into it. Recursive rules are allowed, unlike [`NonrecursiveRuleTheory`].
///
/// Delta-rule bodies are evaluated against a snapshot of this theory's
/// own database only, not the surrounding `includes` DAG: resolving them
/// through the live theory tree would need a `TheoryHandle` back-reference
/// to this node while a mutable borrow of it is already held by the
/// caller driving the event queue, which `RefCell` rightly refuses at
/// runtime. Facts produced in an included theory reach this one the same
/// way they do in the original's `Runtime.react_to_changes`: an explicit
/// top-level push, not an implicit read-through.
pub struct MaterializedViewTheory {
    pub name: String,
    queue: EventQueue,
    database: Database,
    delta_rules: DeltaRuleTheory,
}

impl MaterializedViewTheory {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        MaterializedViewTheory {
            database: Database::new(format!("{}Database", name)),
            delta_rules: DeltaRuleTheory::new(format!("{}Delta", name)),
            name,
            queue: EventQueue::new(),
        }
    }

    pub fn head_index(&self, table: &str) -> Vec<Rule> {
        self.database
            .tuples(table)
            .iter()
            .map(|t| Rule::fact(Atom::from_ground(table, t.values.clone())))
            .collect()
    }

    pub fn defined_table_names(&self) -> Vec<String> {
        self.database.tables().cloned().collect()
    }

    pub fn is_view(&self, table: &str) -> bool {
        self.delta_rules.is_view(table)
    }

    pub fn is_known(&self, table: &str) -> bool {
        self.delta_rules.is_known(table)
    }

    pub fn base_tables(&self) -> Vec<String> {
        self.delta_rules.base_tables()
    }

    pub fn explain(&self, atom: &Atom) -> Option<&super::proof::ProofCollection> {
        self.database.explain(atom)
    }

    /// Insert/delete `formula`, running the event queue to completion
    /// (spec §4.6, "modify"). A direct write to a table this theory
    /// computes from its own rules is rejected: views only change because
    /// their base tables did (spec §7 precondition).
    pub fn modify(&mut self, formula: &Formula, is_insert: bool, proof: Proof) -> Result<Vec<(Atom, bool)>> {
        match formula {
            Formula::Atom(atom) => {
                if self.is_view(&atom.table) {
                    return Err(RuntimeError::ViewDirectWrite(atom.table.clone()));
                }
                self.enqueue(Event::new(atom.clone(), vec![proof], is_insert));
            }
            Formula::Rule(rule) => {
                self.enqueue_rule(rule, is_insert);
            }
        }
        Ok(self.process_queue())
    }

    fn enqueue(&mut self, event: Event) {
        self.queue.enqueue(event);
    }

    /// Drain `events` through the queue without the direct-write /
    /// view-table checks `modify` applies: used by [`TheoryNode::modify`]
    /// once it has already forwarded an atom through `includes` and
    /// wrapped each of their changes in a proof local to this theory.
    pub fn ingest(&mut self, events: Vec<(Atom, bool, Proof)>) -> Vec<(Atom, bool)> {
        for (atom, insert, proof) in events {
            self.enqueue(Event::new(atom, vec![proof], insert));
        }
        self.process_queue()
    }

    /// A rule change can itself generate base-table-shaped events before
    /// the rule is actually (de)registered, so that any already-derivable
    /// data gets counted (spec §4.6, "enqueue_with_included" for rules).
    fn enqueue_rule(&mut self, rule: &Rule, is_insert: bool) {
        for expanded in eliminate_self_joins(vec![rule.clone()]) {
            let mut unifier = BiUnifier::new();
            let scope = unifier.fresh_scope();
            let vars = expanded.variables();
            let snapshot = self.snapshot_handle();
            let bindings = top_down_evaluation(&snapshot, &vars, &expanded.body, &mut unifier, scope, true);
            if is_insert {
                self.delta_rules.insert(expanded.clone());
                self.emit_bindings(&bindings, &expanded.head, &expanded.body, &[], is_insert);
            } else {
                self.emit_bindings(&bindings, &expanded.head, &expanded.body, &[], is_insert);
                self.delta_rules.delete(&expanded);
            }
        }
    }

    fn snapshot_handle(&self) -> TheoryHandle {
        handle(TheoryNode {
            name: self.name.clone(),
            includes: vec![],
            tracer: Default::default(),
            kind: TheoryKind::Database(self.database.clone()),
        })
    }

    /// Turn each binding a delta rule (or a freshly (de)registered rule)
    /// proved into an event carrying a real proof tree, not just the head
    /// atom: `extra` is the triggering event's own proofs (empty when
    /// there is no trigger, i.e. a rule insert/delete re-deriving what is
    /// already provable), and every positive body literal contributes its
    /// own subproof, recursively, via whatever this theory already has on
    /// file for it (spec §4.6, "Explain... recurse over each body literal").
    fn emit_bindings(
        &mut self,
        bindings: &[TopDownResult],
        head: &Atom,
        body: &[Literal],
        extra: &[Proof],
        insert: bool,
    ) {
        let mut grouped: HashMap<Atom, Vec<Proof>> = HashMap::default();
        for binding in bindings {
            let plugged = plug_with_result(head, binding);
            let mut subproofs = extra.to_vec();
            subproofs.extend(self.body_subproofs(body, binding));
            let proof = Proof::new(plugged.clone(), self.name.clone(), subproofs);
            grouped.entry(plugged).or_default().push(proof);
        }
        for (atom, proofs) in grouped {
            for proof in proofs {
                self.enqueue(Event::new(atom.clone(), vec![proof], insert));
            }
        }
    }

    /// One subproof per positive body literal, grounded by `binding` and
    /// looked up against this theory's own database (where delta-rule
    /// bodies are always resolved, see the struct doc). A literal with no
    /// stored proof yet (the tuple is about to be inserted in this same
    /// queue pass, just not processed yet) falls back to a leaf naming
    /// this theory, rather than losing the literal from the tree entirely.
    /// Negative literals contribute no subproof: there is no fact to point
    /// to for an absence.
    fn body_subproofs(&self, body: &[Literal], binding: &TopDownResult) -> Vec<Proof> {
        body.iter()
            .filter(|literal| !literal.is_negated())
            .map(|literal| {
                let grounded = plug_with_result(&literal.atom, binding);
                self.database
                    .explain(&grounded)
                    .and_then(|proofs| proofs.iter().next().cloned())
                    .unwrap_or_else(|| Proof::leaf(grounded, self.name.clone()))
            })
            .collect()
    }

    /// Drain the event queue, folding each event into the delta-rule
    /// theory or the database, and propagating the further events that
    /// produces (spec §4.6, "process_queue"/"propagate").
    fn process_queue(&mut self) -> Vec<(Atom, bool)> {
        let mut history = vec![];
        while let Some(event) = self.queue.dequeue() {
            self.propagate(&event);
            for proof in event.proofs {
                let changed = if event.insert {
                    self.database.insert(&event.atom, proof)
                } else {
                    self.database.delete(&event.atom, &proof)
                };
                if changed {
                    history.push((event.atom.clone(), event.insert));
                }
            }
        }
        history
    }

    fn propagate(&mut self, event: &Event) {
        let rules: Vec<DeltaRule> = self.delta_rules.rules_with_trigger(&event.atom.table).to_vec();
        for delta_rule in rules {
            self.propagate_rule(event, &delta_rule);
        }
    }

    fn propagate_rule(&mut self, event: &Event, delta_rule: &DeltaRule) {
        let mut unifier = BiUnifier::new();
        let trigger_scope = unifier.fresh_scope();
        let event_scope = unifier.fresh_scope();
        let Some(changes) =
            bi_unify_atoms(&delta_rule.trigger.atom, trigger_scope, &event.atom, event_scope, &mut unifier)
        else {
            return;
        };
        let vars = delta_rule.variables();
        let snapshot = self.snapshot_handle();
        let results = top_down_evaluation(&snapshot, &vars, &delta_rule.body, &mut unifier, trigger_scope, true);
        unifier.undo_all(changes);

        let insert = if delta_rule.trigger.is_negated() {
            !event.insert
        } else {
            event.insert
        };
        self.emit_bindings(&results, &delta_rule.head, &delta_rule.body, &event.proofs, insert);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::theory::{handle as node_handle, TheoryNode as TestTheoryNode};
    use policy_syntax::{atom, fact, var, Formula, Rule};

    fn leaf_proof(a: &Atom) -> Proof {
        Proof::leaf(a.clone(), "test")
    }

    #[test]
    fn direct_write_to_view_table_is_rejected() {
        let mut view = MaterializedViewTheory::new("classify");
        let rule: Formula = Rule::new(
            atom("q", vec![var("x")]),
            vec![policy_syntax::Literal::positive(atom("p", vec![var("x")]))],
        )
        .into();
        view.modify(&rule, true, leaf_proof(&atom("q", vec![var("x")]))).unwrap();

        let write = Formula::Atom(fact("q", vec!["a".into()]));
        let err = view.modify(&write, true, leaf_proof(&fact("q", vec!["a".into()])));
        assert!(err.is_err());
    }

    #[test]
    fn inserting_base_fact_propagates_through_view_rule() {
        let mut view = MaterializedViewTheory::new("classify");
        let rule: Formula = Rule::new(
            atom("q", vec![var("x")]),
            vec![policy_syntax::Literal::positive(atom("p", vec![var("x")]))],
        )
        .into();
        view.modify(&rule, true, leaf_proof(&atom("q", vec![var("x")]))).unwrap();

        let fact_p = fact("p", vec!["a".into()]);
        let changes = view
            .modify(&Formula::Atom(fact_p.clone()), true, leaf_proof(&fact_p))
            .unwrap();
        assert!(changes.iter().any(|(a, insert)| a.table == "q" && *insert));
        assert!(view.head_index("q").iter().any(|r| r.head == fact("q", vec!["a".into()])));

        let changes = view
            .modify(&Formula::Atom(fact_p.clone()), false, leaf_proof(&fact_p))
            .unwrap();
        assert!(changes.iter().any(|(a, insert)| a.table == "q" && !*insert));
        assert!(view.head_index("q").is_empty());
    }

    #[test]
    fn snapshot_handle_sees_own_database_only() {
        let mut view = MaterializedViewTheory::new("classify");
        let fact_p = fact("p", vec!["a".into()]);
        view.modify(&Formula::Atom(fact_p.clone()), true, leaf_proof(&fact_p)).unwrap();
        let snapshot = view.snapshot_handle();
        assert!(node_handle(TestTheoryNode::database("unused")).borrow().head_index("p").is_empty());
        assert_eq!(snapshot.borrow().head_index("p").len(), 1);
    }
}
