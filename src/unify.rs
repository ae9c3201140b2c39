use ahash::HashMap;
use policy_syntax::{Atom, Term, TypedValue, Variable};

pub type ScopeId = u64;

/// Two-scope unification (spec §3/§4.1). A single `BiUnifier` holds the
/// whole substitution built up over one top-down evaluation; `ScopeId`
/// distinguishes the variable namespace a binding belongs to, so that a
/// rule's own variables (one scope) and a goal literal's variables
/// (another scope) can share the same table without renaming apart.
#[derive(Default)]
pub struct BiUnifier {
    bindings: HashMap<(Variable, ScopeId), (Term, ScopeId)>,
    next_scope: ScopeId,
}

/// A single addition to a [`BiUnifier`], returned by [`BiUnifier::add`] so
/// that it can be undone later via [`BiUnifier::undo_all`].
#[derive(Debug)]
pub struct Change(Variable, ScopeId);

impl BiUnifier {
    pub fn new() -> Self {
        BiUnifier {
            bindings: HashMap::default(),
            next_scope: 1,
        }
    }

    /// Allocate a fresh scope, e.g. one per rule trial.
    pub fn fresh_scope(&mut self) -> ScopeId {
        let scope = self.next_scope;
        self.next_scope += 1;
        scope
    }

    /// Resolve `term` (interpreted in `scope`) through chained bindings to
    /// a fixed point: either a ground constant, or an unbound variable and
    /// the scope it lives in.
    pub fn apply_full(&self, term: &Term, scope: ScopeId) -> (Term, ScopeId) {
        let mut current = (term.clone(), scope);
        loop {
            match &current.0 {
                Term::Constant(_) => return current,
                Term::Variable(v) => match self.bindings.get(&(v.clone(), current.1)) {
                    Some(next) => current = next.clone(),
                    None => return current,
                },
            }
        }
    }

    pub fn apply(&self, var: &Variable, scope: ScopeId) -> Term {
        self.apply_full(&Term::Variable(var.clone()), scope).0
    }

    /// Record `var@scope ↦ term@other_scope`.
    pub fn add(&mut self, var: Variable, scope: ScopeId, term: Term, other_scope: ScopeId) -> Change {
        self.bindings.insert((var.clone(), scope), (term, other_scope));
        Change(var, scope)
    }

    /// Undo a list of changes in reverse order, restoring the unifier to
    /// its state before they were made (spec §8, "Undo correctness").
    pub fn undo_all(&mut self, changes: Vec<Change>) {
        for change in changes.into_iter().rev() {
            self.bindings.remove(&(change.0, change.1));
        }
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }
}

/// Bi-unify two atoms living in (possibly different) scopes. On success,
/// returns the list of changes made (undo them via [`BiUnifier::undo_all`]
/// to backtrack); on failure, returns `None` and leaves the unifier
/// unchanged (spec §4.1).
pub fn bi_unify_atoms(
    a1: &Atom,
    scope1: ScopeId,
    a2: &Atom,
    scope2: ScopeId,
    unifier: &mut BiUnifier,
) -> Option<Vec<Change>> {
    if a1.table != a2.table || a1.arity() != a2.arity() {
        return None;
    }
    let mut changes = vec![];
    for (t1, t2) in a1.arguments.iter().zip(a2.arguments.iter()) {
        let (r1, s1) = unifier.apply_full(t1, scope1);
        let (r2, s2) = unifier.apply_full(t2, scope2);
        match (&r1, &r2) {
            (Term::Constant(c1), Term::Constant(c2)) => {
                if c1 != c2 {
                    unifier.undo_all(changes);
                    return None;
                }
            }
            (Term::Variable(v1), Term::Variable(v2)) => {
                if v1 == v2 && s1 == s2 {
                    continue;
                }
                changes.push(unifier.add(v1.clone(), s1, r2.clone(), s2));
            }
            (Term::Variable(v1), Term::Constant(_)) => {
                changes.push(unifier.add(v1.clone(), s1, r2.clone(), s2));
            }
            (Term::Constant(_), Term::Variable(v2)) => {
                changes.push(unifier.add(v2.clone(), s2, r1.clone(), s1));
            }
        }
    }
    Some(changes)
}

/// Substitute every variable of `atom` (interpreted in `scope`) with its
/// resolved value under `unifier`. Variables left unbound stay as
/// variables (this happens only for atoms built from partial bindings;
/// a fully resolved query result has none left).
pub fn plug_atom(atom: &Atom, unifier: &BiUnifier, scope: ScopeId) -> Atom {
    Atom {
        table: atom.table.clone(),
        arguments: atom
            .arguments
            .iter()
            .map(|t| unifier.apply_full(t, scope).0)
            .collect(),
    }
}

/// Replace every distinct free variable across `atoms` with a fresh
/// constant unique to this call (spec §9, "Skolemization"). Used by
/// `project` to ground any variables left over in derived update atoms.
pub fn skolemize(atoms: Vec<Atom>, call_id: u64) -> Vec<Atom> {
    let mut assigned: HashMap<Variable, TypedValue> = HashMap::default();
    atoms
        .into_iter()
        .map(|atom| {
            let arguments = atom
                .arguments
                .into_iter()
                .map(|term| match term {
                    Term::Variable(v) => {
                        let value = assigned
                            .entry(v.clone())
                            .or_insert_with(|| {
                                TypedValue::Str(format!("_skolem_{}_{}", call_id, v))
                            })
                            .clone();
                        Term::Constant(value)
                    }
                    other => other,
                })
                .collect();
            Atom {
                table: atom.table,
                arguments,
            }
        })
        .collect()
}
