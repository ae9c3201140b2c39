use std::cell::Cell;
use std::collections::HashSet;

use policy_syntax::{Atom, Literal, Rule, Term, Variable};

use crate::unify::{bi_unify_atoms, plug_atom, BiUnifier};

use super::theory::TheoryHandle;

/// One binding the top-down search proved, restricted to the query's own
/// variables, plus whatever literals an abduction call asked to save
/// along that proof (spec §4.1/§4.2).
#[derive(Debug, Clone)]
pub struct TopDownResult {
    pub bindings: Vec<(Variable, Term)>,
    pub support: Vec<Atom>,
}

impl TopDownResult {
    pub fn get(&self, var: &str) -> Option<&Term> {
        self.bindings.iter().find(|(v, _)| v == var).map(|(_, t)| t)
    }
}

/// Predicate deciding whether a literal should be "saved" as part of an
/// abductive explanation instead of being proven (spec §4.2 "abduction").
pub type SavePredicate<'a> = &'a dyn Fn(&Literal) -> bool;

/// A remaining goal list plus where to resume once it is exhausted,
/// mirroring the original's `TopDownContext`/`previous` chain: proving a
/// rule's body pushes a new context whose `previous` is the context that
/// triggered it, so success there resumes the outer search exactly where
/// it left off.
struct Context<'a> {
    literals: &'a [Literal],
    index: Cell<usize>,
    scope: u64,
    previous: Option<&'a Context<'a>>,
}

struct Search<'a> {
    root: &'a TheoryHandle,
    variables: &'a HashSet<Variable>,
    top_scope: u64,
    find_all: bool,
    save: Option<SavePredicate<'a>>,
    support: Vec<Atom>,
    results: Vec<TopDownResult>,
}

/// Find all (or, if `find_all` is false, at most one) ways to prove
/// `literals` true against `root` and its included theories, returning
/// the resulting bindings of `variables` (spec §4.1 "top_down_evaluation").
pub fn top_down_evaluation(
    root: &TheoryHandle,
    variables: &HashSet<Variable>,
    literals: &[Literal],
    unifier: &mut BiUnifier,
    scope: u64,
    find_all: bool,
) -> Vec<TopDownResult> {
    top_down_abduction(root, variables, literals, unifier, scope, find_all, None)
}

/// As [`top_down_evaluation`], but literals for which `save` returns true
/// are recorded in each result's `support` instead of being proven (spec
/// §4.2). Passing `save: None` degenerates to plain evaluation.
pub fn top_down_abduction<'a>(
    root: &'a TheoryHandle,
    variables: &'a HashSet<Variable>,
    literals: &[Literal],
    unifier: &mut BiUnifier,
    scope: u64,
    find_all: bool,
    save: Option<SavePredicate<'a>>,
) -> Vec<TopDownResult> {
    let mut search = Search {
        root,
        variables,
        top_scope: scope,
        find_all,
        save,
        support: vec![],
        results: vec![],
    };
    if literals.is_empty() {
        top_down_finish(None, &mut search, unifier, true);
    } else {
        let context = Context {
            literals,
            index: Cell::new(0),
            scope,
            previous: None,
        };
        top_down_eval(&context, &mut search, unifier);
    }
    search.results
}

fn record(search: &mut Search, unifier: &BiUnifier) {
    let bindings = search
        .variables
        .iter()
        .map(|v| (v.clone(), unifier.apply(v, search.top_scope)))
        .collect();
    search.results.push(TopDownResult {
        bindings,
        support: search.support.clone(),
    });
}

/// Prove the literal at `context`'s current position (spec §4.1
/// "top_down_eval"): abduction save, negation-as-failure, the `true`/
/// `false` pseudo-tables, or ordinary resolution against the theory tree.
fn top_down_eval(context: &Context, search: &mut Search, unifier: &mut BiUnifier) -> bool {
    let lit = &context.literals[context.index.get()];

    if let Some(save) = search.save {
        if !lit.is_negated() && save(lit) {
            let plugged = plug_atom(&lit.atom, unifier, context.scope);
            search.support.push(plugged);
            let success = top_down_finish(Some(context), search, unifier, true);
            search.support.pop();
            return success;
        }
    }

    if lit.is_negated() {
        let plugged = plug_atom(&lit.atom, unifier, context.scope);
        debug_assert!(plugged.is_ground(), "negated literal must be ground when evaluated");
        let naf_literals = [Literal::positive(plugged)];
        let naf_context = Context {
            literals: &naf_literals,
            index: Cell::new(0),
            scope: context.scope,
            previous: None,
        };
        let empty_vars = HashSet::new();
        let mut naf_search = Search {
            root: search.root,
            variables: &empty_vars,
            top_scope: context.scope,
            find_all: false,
            save: None,
            support: vec![],
            results: vec![],
        };
        let found = top_down_includes(search.root, &naf_context, &mut naf_search, unifier);
        return if found {
            false
        } else {
            top_down_finish(Some(context), search, unifier, false)
        };
    }

    match lit.table() {
        "true" => top_down_finish(Some(context), search, unifier, false),
        "false" => false,
        _ => top_down_includes(search.root, context, search, unifier),
    }
}

/// Resolve against `theory` itself, then every theory it includes (spec
/// §4.1 "top_down_includes"). Stops as soon as one succeeds when
/// `find_all` is false.
fn top_down_includes(theory: &TheoryHandle, context: &Context, search: &mut Search, unifier: &mut BiUnifier) -> bool {
    if top_down_th(theory, context, search, unifier) && !search.find_all {
        return true;
    }
    let includes = theory.borrow().includes.clone();
    for included in includes {
        if top_down_includes(&included, context, search, unifier) && !search.find_all {
            return true;
        }
    }
    false
}

/// Resolve the current literal against `theory`'s own rules/facts only
/// (spec §4.1 "top_down_th").
fn top_down_th(theory: &TheoryHandle, context: &Context, search: &mut Search, unifier: &mut BiUnifier) -> bool {
    let lit = &context.literals[context.index.get()];
    let rules = theory.borrow().head_index(lit.table());
    for rule in rules {
        let rule_scope = unifier.fresh_scope();
        let Some(changes) = bi_unify_atoms(&rule.head, rule_scope, &lit.atom, context.scope, unifier) else {
            continue;
        };
        let success = if rule.body.is_empty() {
            top_down_finish(Some(context), search, unifier, true)
        } else {
            let new_context = Context {
                literals: &rule.body,
                index: Cell::new(0),
                scope: rule_scope,
                previous: Some(context),
            };
            top_down_eval(&new_context, search, unifier)
        };
        unifier.undo_all(changes);
        if success && !search.find_all {
            return true;
        }
    }
    false
}

/// Called once a literal has been proved: either record a full answer
/// (context exhausted all the way up), or move on to the next literal —
/// in this context, or, once this context is exhausted, in whichever
/// context triggered it (spec §4.1 "top_down_finish").
fn top_down_finish(context: Option<&Context>, search: &mut Search, unifier: &mut BiUnifier, _redo: bool) -> bool {
    match context {
        None => {
            record(search, unifier);
            true
        }
        Some(ctx) => {
            if ctx.index.get() + 1 < ctx.literals.len() {
                ctx.index.set(ctx.index.get() + 1);
                let finished = top_down_eval(ctx, search, unifier);
                ctx.index.set(ctx.index.get() - 1);
                finished
            } else {
                top_down_finish(ctx.previous, search, unifier, true)
            }
        }
    }
}

/// Substitute a [`TopDownResult`]'s bindings into `atom`, leaving any
/// argument the result left unbound as-is (spec §4.1/§4.8: query results
/// and delta-rule heads are both plugged this way).
pub fn plug_with_result(atom: &Atom, result: &TopDownResult) -> Atom {
    let arguments = atom
        .arguments
        .iter()
        .map(|term| match term {
            Term::Variable(v) => result.get(v).cloned().unwrap_or_else(|| term.clone()),
            other => other.clone(),
        })
        .collect();
    Atom {
        table: atom.table.clone(),
        arguments,
    }
}

/// All ground instances of `atom` provable against `theory` (spec §4.1
/// "select"): every variable of `atom` is a query variable. De-duplicated
/// by structural equality (spec §4.2), since two distinct rules can prove
/// the same ground instance.
pub fn select(theory: &TheoryHandle, atom: &Atom) -> Vec<Atom> {
    let vars = atom.variables();
    let mut unifier = BiUnifier::new();
    let results = top_down_evaluation(
        theory,
        &vars,
        &[Literal::positive(atom.clone())],
        &mut unifier,
        0,
        true,
    );
    let mut seen = HashSet::new();
    results
        .iter()
        .map(|r| plug_with_result(atom, r))
        .filter(|instance| seen.insert(instance.clone()))
        .collect()
}

/// Every true instance of every table `theory` defines directly, filtered
/// by `filter` (spec §11 "consequences", used by `project` to collect
/// update/result atoms out of ACTION_THEORY).
pub fn consequences(theory: &TheoryHandle, filter: impl Fn(&str) -> bool) -> Vec<Atom> {
    let tables = theory.borrow().defined_table_names();
    let mut seen = HashSet::new();
    let mut results = vec![];
    for table in tables {
        if !filter(&table) {
            continue;
        }
        let Some(arity) = theory.borrow().arity(&table) else {
            continue;
        };
        let args: Vec<Term> = (0..arity).map(|i| Term::Variable(format!("x{}", i))).collect();
        let query = Atom::new(table, args);
        for instance in select(theory, &query) {
            if seen.insert(instance.clone()) {
                results.push(instance);
            }
        }
    }
    results
}

/// Derive rules `query :- save_1, save_2, ...` whose bodies are literals
/// drawn from `tablenames`, explaining how `query` could be made to hold
/// (spec §4.2 "abduction", used by `remediate`). Literals resolved under
/// negation are never saved (spec §4.2 "Restriction"), regardless of
/// whether their table is in `tablenames`. De-duplicated by structural
/// equality, same as [`select`].
pub fn abduce(theory: &TheoryHandle, query: &Atom, tablenames: &[String], find_all: bool) -> Vec<Rule> {
    let save_tables: HashSet<String> = tablenames.iter().cloned().collect();
    let save: SavePredicate = &move |lit: &Literal| save_tables.contains(lit.table());
    let vars = query.variables();
    let mut unifier = BiUnifier::new();
    let results = top_down_abduction(
        theory,
        &vars,
        &[Literal::positive(query.clone())],
        &mut unifier,
        0,
        find_all,
        Some(save),
    );
    let mut seen = HashSet::new();
    results
        .iter()
        .map(|r| {
            let head = plug_with_result(query, r);
            let body = r.support.iter().cloned().map(Literal::positive).collect();
            Rule::new(head, body)
        })
        .filter(|rule| seen.insert(rule.clone()))
        .collect()
}
