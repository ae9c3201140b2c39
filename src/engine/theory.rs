use std::cell::RefCell;
use std::rc::Rc;

use policy_syntax::{Atom, Formula, Rule};

use crate::error::{Result, RuntimeError};
use crate::tracer::Tracer;

use super::database::Database;
use super::materialized::MaterializedViewTheory;
use super::nonrecursive::NonrecursiveRuleTheory;
use super::proof::Proof;

/// A shared handle to a theory. `Rc<RefCell<_>>` instead of ownership
/// because the `includes` relation is a DAG, not a tree: the same theory
/// (e.g. the database, or the classification rules) is reachable from
/// more than one including theory, exactly as in the underlying engine
/// where theory objects are aliased by reference.
pub type TheoryHandle = Rc<RefCell<TheoryNode>>;

pub fn handle(node: TheoryNode) -> TheoryHandle {
    Rc::new(RefCell::new(node))
}

/// One of the three concrete theory kinds a policy can be built from
/// (spec §4.3/§4.4/§4.5/§4.6). Shared bookkeeping (name, included
/// theories, tracer) lives on [`TheoryNode`]; kind-specific storage lives
/// in the variant.
pub enum TheoryKind {
    Database(Database),
    Nonrecursive(NonrecursiveRuleTheory),
    Materialized(MaterializedViewTheory),
}

pub struct TheoryNode {
    pub name: String,
    pub includes: Vec<TheoryHandle>,
    pub tracer: Tracer,
    pub kind: TheoryKind,
}

impl TheoryNode {
    pub fn database(name: impl Into<String>) -> Self {
        let name = name.into();
        TheoryNode {
            kind: TheoryKind::Database(Database::new(name.clone())),
            name,
            includes: vec![],
            tracer: Tracer::new(),
        }
    }

    pub fn nonrecursive(name: impl Into<String>) -> Self {
        let name = name.into();
        TheoryNode {
            kind: TheoryKind::Nonrecursive(NonrecursiveRuleTheory::new(name.clone())),
            name,
            includes: vec![],
            tracer: Tracer::new(),
        }
    }

    pub fn materialized(name: impl Into<String>) -> Self {
        let name = name.into();
        TheoryNode {
            kind: TheoryKind::Materialized(MaterializedViewTheory::new(name.clone())),
            name,
            includes: vec![],
            tracer: Tracer::new(),
        }
    }

    pub fn log(&self, table: &str, msg: &str, depth: usize) {
        self.tracer.log(table, msg, depth);
    }

    /// `(head, body)` pairs relevant to resolving `table` in this theory
    /// alone, not its includes (spec §4.1 "head_index"). A ground fact in
    /// a [`Database`] is represented as a headless fact: head = the fact
    /// itself, body = empty.
    pub fn head_index(&self, table: &str) -> Vec<Rule> {
        match &self.kind {
            TheoryKind::Database(db) => db
                .tuples(table)
                .iter()
                .map(|t| Rule::fact(Atom::from_ground(table, t.values.clone())))
                .collect(),
            TheoryKind::Nonrecursive(theory) => theory.head_index(table).to_vec(),
            TheoryKind::Materialized(theory) => theory.head_index(table),
        }
    }

    pub fn is_view(&self, table: &str) -> bool {
        match &self.kind {
            TheoryKind::Database(_) => false,
            TheoryKind::Nonrecursive(_) => false,
            TheoryKind::Materialized(theory) => theory.is_view(table),
        }
    }

    /// Insert/delete a [`Formula`] directly into this theory (spec §4.4's
    /// "modify"), producing the events (if any) that should be forwarded
    /// to theories that include this one.
    pub fn modify(&mut self, formula: &Formula, is_insert: bool, proof: Proof) -> Result<Vec<(Atom, bool)>> {
        match &mut self.kind {
            TheoryKind::Database(db) => {
                let Formula::Atom(atom) = formula else {
                    return Err(RuntimeError::MalformedInput(
                        "database theory only accepts ground atoms".into(),
                    ));
                };
                let changed = if is_insert {
                    !db.is_noop_insert(atom, &proof) && {
                        db.insert(atom, proof);
                        true
                    }
                } else {
                    !db.is_noop_delete(atom, &proof) && {
                        db.delete(atom, &proof);
                        true
                    }
                };
                Ok(if changed { vec![(atom.clone(), is_insert)] } else { vec![] })
            }
            TheoryKind::Nonrecursive(theory) => {
                let changed = if is_insert {
                    theory.insert(formula)
                } else {
                    theory.delete(formula)
                };
                Ok(if changed {
                    vec![(formula.head().clone(), is_insert)]
                } else {
                    vec![]
                })
            }
            TheoryKind::Materialized(_) => match formula {
                // A base-table atom must reach every included theory before
                // this one stores or propagates it: each include keeps its
                // own materialized copy, so ENFORCEMENT inserting into its
                // base tables only actually updates CLASSIFY (and through
                // it, the database) by forwarding down first (spec §4.8,
                // "enforcement theory passes that insert into classify_theory").
                Formula::Atom(atom) => {
                    let is_view = match &self.kind {
                        TheoryKind::Materialized(view) => view.is_view(&atom.table),
                        _ => unreachable!(),
                    };
                    if is_view {
                        return Err(RuntimeError::ViewDirectWrite(atom.table.clone()));
                    }
                    let includes = self.includes.clone();
                    let mut events = vec![];
                    if includes.is_empty() {
                        events.push((atom.clone(), is_insert, proof.clone()));
                    } else {
                        for included in &includes {
                            let changes = included.borrow_mut().modify(formula, is_insert, proof.clone())?;
                            for (changed_atom, changed_insert) in changes {
                                let wrapped = Proof::new(changed_atom.clone(), self.name.clone(), vec![proof.clone()]);
                                events.push((changed_atom, changed_insert, wrapped));
                            }
                        }
                    }
                    let view = match &mut self.kind {
                        TheoryKind::Materialized(view) => view,
                        _ => unreachable!(),
                    };
                    Ok(view.ingest(events))
                }
                Formula::Rule(_) => {
                    let view = match &mut self.kind {
                        TheoryKind::Materialized(view) => view,
                        _ => unreachable!(),
                    };
                    view.modify(formula, is_insert, proof)
                }
            },
        }
    }

    pub fn defined_table_names(&self) -> Vec<String> {
        match &self.kind {
            TheoryKind::Database(db) => db.tables().cloned().collect(),
            TheoryKind::Nonrecursive(theory) => theory.defined_table_names().cloned().collect(),
            TheoryKind::Materialized(theory) => theory.defined_table_names(),
        }
    }

    pub fn arity(&self, table: &str) -> Option<usize> {
        self.head_index(table).first().map(|r| r.head.arity())
    }
}
