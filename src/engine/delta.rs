use ahash::HashMap;
use policy_syntax::{atom, var, Atom, Literal, Rule, Term};
use std::collections::HashSet;

/// One body literal lifted out of a rule: `trigger` fires the rule,
/// `head`/`body` are what remains to prove once it has (spec §4.6,
/// "bottom-up delta rules": one delta rule per body literal of a
/// materialized-view rule). `original` is kept for proof construction.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeltaRule {
    pub trigger: Literal,
    pub head: Atom,
    pub body: Vec<Literal>,
    pub original: Rule,
}

impl DeltaRule {
    pub fn variables(&self) -> HashSet<String> {
        let mut vars = self.trigger.variables();
        for lit in &self.body {
            vars.extend(lit.variables());
        }
        vars
    }

    pub fn tables(&self) -> HashSet<String> {
        let mut tables: HashSet<String> = HashSet::new();
        tables.insert(self.trigger.table().to_string());
        tables.insert(self.head.table.clone());
        for lit in &self.body {
            tables.insert(lit.table().to_string());
        }
        tables
    }
}

fn self_join_table_name(name: &str, arity: usize, index: usize) -> String {
    format!("___{}_{}_{}", name, arity, index)
}

fn n_variables(n: usize) -> Vec<Term> {
    (0..n).map(|i| var(&format!("x{}", i))).collect()
}

/// Rewrite a rule body so that no table occurs twice (spec §4.6): the
/// second and later occurrences of a `(table, arity)` pair are renamed to
/// a synthetic `___table_arity_k` table, and a defining rule
/// `___table_arity_k(args) :- table(args)` is appended so the renamed
/// table still means the same thing.
pub fn eliminate_self_joins(rules: Vec<Rule>) -> Vec<Rule> {
    let mut global_self_joins: HashMap<(String, usize), usize> = HashMap::default();
    let mut results = Vec::with_capacity(rules.len());

    for mut rule in rules {
        let mut occurrences: HashMap<(String, usize), usize> = HashMap::default();
        for literal in rule.body.iter_mut() {
            let key = (literal.atom.table.clone(), literal.atom.arity());
            let count = occurrences.entry(key.clone()).or_insert(0);
            if *count == 0 {
                *count = 1;
            } else {
                literal.atom.table = self_join_table_name(&key.0, key.1, *count);
                *count += 1;
                let max = global_self_joins.entry(key).or_insert(0);
                *max = (*max).max(*count - 1);
            }
        }
        results.push(rule);
    }

    for ((table, arity), max_extra) in global_self_joins {
        for i in 1..=max_extra {
            let newtable = self_join_table_name(&table, arity, i);
            let args = n_variables(arity);
            let head = atom(&newtable, args.clone());
            let body = vec![Literal::positive(atom(&table, args))];
            results.push(Rule::new(head, body));
        }
    }
    results
}

/// Split each rule into one delta rule per body literal (spec §4.6).
pub fn compute_delta_rules(rules: Vec<Rule>) -> Vec<DeltaRule> {
    let rules = eliminate_self_joins(rules);
    let mut deltas = vec![];
    for rule in rules {
        for (index, literal) in rule.body.iter().enumerate() {
            let new_body: Vec<Literal> = rule
                .body
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != index)
                .map(|(_, l)| l.clone())
                .collect();
            deltas.push(DeltaRule {
                trigger: literal.clone(),
                head: rule.head.clone(),
                body: new_body,
                original: rule.clone(),
            });
        }
    }
    deltas
}

/// Index of delta rules by triggering table, plus view/base-table
/// bookkeeping (spec §4.6). Ref-counted per distinct original rule so
/// that inserting the same view rule twice, then deleting it once, does
/// not lose the other copy's events.
#[derive(Default)]
pub struct DeltaRuleTheory {
    pub name: String,
    contents: HashMap<String, Vec<DeltaRule>>,
    originals: Vec<Rule>,
    views: HashMap<String, usize>,
    all_tables: HashMap<String, usize>,
}

impl DeltaRuleTheory {
    pub fn new(name: impl Into<String>) -> Self {
        DeltaRuleTheory {
            name: name.into(),
            contents: HashMap::default(),
            originals: vec![],
            views: HashMap::default(),
            all_tables: HashMap::default(),
        }
    }

    /// Returns `true` iff the theory actually changed (the rule was not
    /// already present).
    pub fn insert(&mut self, rule: Rule) -> bool {
        if self.originals.contains(&rule) {
            return false;
        }
        for delta in compute_delta_rules(vec![rule.clone()]) {
            self.insert_delta(delta);
        }
        self.originals.push(rule);
        true
    }

    pub fn delete(&mut self, rule: &Rule) -> bool {
        let Some(pos) = self.originals.iter().position(|r| r == rule) else {
            return false;
        };
        for delta in compute_delta_rules(vec![rule.clone()]) {
            self.delete_delta(&delta);
        }
        self.originals.remove(pos);
        true
    }

    fn insert_delta(&mut self, delta: DeltaRule) {
        *self.views.entry(delta.head.table.clone()).or_insert(0) += 1;
        for table in delta.tables() {
            *self.all_tables.entry(table).or_insert(0) += 1;
        }
        self.contents
            .entry(delta.trigger.table().to_string())
            .or_default()
            .push(delta);
    }

    fn delete_delta(&mut self, delta: &DeltaRule) {
        if let Some(count) = self.views.get_mut(&delta.head.table) {
            *count -= 1;
            if *count == 0 {
                self.views.remove(&delta.head.table);
            }
        }
        for table in delta.tables() {
            if let Some(count) = self.all_tables.get_mut(&table) {
                *count -= 1;
                if *count == 0 {
                    self.all_tables.remove(&table);
                }
            }
        }
        if let Some(bucket) = self.contents.get_mut(delta.trigger.table()) {
            if let Some(pos) = bucket.iter().position(|d| d == delta) {
                bucket.remove(pos);
            }
        }
    }

    pub fn rules_with_trigger(&self, table: &str) -> &[DeltaRule] {
        self.contents.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_view(&self, table: &str) -> bool {
        self.views.contains_key(table)
    }

    pub fn is_known(&self, table: &str) -> bool {
        self.all_tables.contains_key(table)
    }

    pub fn base_tables(&self) -> Vec<String> {
        self.all_tables
            .keys()
            .filter(|t| !self.views.contains_key(*t))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy_syntax::{atom, var};

    #[test]
    fn self_join_renames_second_occurrence() {
        let rule = Rule::new(
            atom("ancestor", vec![var("x"), var("z")]),
            vec![
                Literal::positive(atom("ancestor", vec![var("x"), var("y")])),
                Literal::positive(atom("ancestor", vec![var("y"), var("z")])),
            ],
        );
        let rewritten = eliminate_self_joins(vec![rule]);
        assert_eq!(rewritten.len(), 2);
        assert_eq!(rewritten[0].body[1].atom.table, "___ancestor_2_1");
        assert_eq!(rewritten[1].head.table, "___ancestor_2_1");
    }

    #[test]
    fn delta_rules_one_per_body_literal() {
        let rule = Rule::new(
            atom("q", vec![var("x")]),
            vec![
                Literal::positive(atom("p", vec![var("x")])),
                Literal::positive(atom("r", vec![var("x")])),
            ],
        );
        let deltas = compute_delta_rules(vec![rule]);
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].trigger.table(), "p");
        assert_eq!(deltas[1].trigger.table(), "r");
    }

    #[test]
    fn insert_tracks_views_and_base_tables() {
        let mut theory = DeltaRuleTheory::new("delta");
        let rule = Rule::new(atom("q", vec![var("x")]), vec![Literal::positive(atom("p", vec![var("x")]))]);
        assert!(theory.insert(rule.clone()));
        assert!(!theory.insert(rule.clone()));
        assert!(theory.is_view("q"));
        assert!(!theory.is_view("p"));
        assert_eq!(theory.base_tables(), vec!["p".to_string()]);

        assert!(theory.delete(&rule));
        assert!(!theory.is_known("q"));
    }
}
