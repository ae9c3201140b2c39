use ahash::HashMap;
use policy_syntax::{Formula, Rule};

/// A bag of rules and facts indexed by head table, with no recursion
/// support of its own (spec §4.5 "NonrecursiveRuleTheory"). Used directly
/// for `CLASSIFY_THEORY`/`ENFORCEMENT_THEORY`/`ACTION_THEORY`, whose rules
/// are evaluated top-down and are assumed non-recursive.
#[derive(Default)]
pub struct NonrecursiveRuleTheory {
    pub name: String,
    contents: HashMap<String, Vec<Rule>>,
}

impl NonrecursiveRuleTheory {
    pub fn new(name: impl Into<String>) -> Self {
        NonrecursiveRuleTheory {
            name: name.into(),
            contents: HashMap::default(),
        }
    }

    /// Adds `formula`, returning `false` if it was already present
    /// (spec §4.4's insert-is-noop rule applies here too: re-asserting an
    /// identical rule changes nothing).
    pub fn insert(&mut self, formula: &Formula) -> bool {
        let rule = to_rule(formula);
        let bucket = self.contents.entry(rule.tablename().to_string()).or_default();
        if bucket.contains(&rule) {
            return false;
        }
        bucket.push(rule);
        true
    }

    pub fn delete(&mut self, formula: &Formula) -> bool {
        let rule = to_rule(formula);
        let Some(bucket) = self.contents.get_mut(rule.tablename()) else {
            return false;
        };
        let Some(pos) = bucket.iter().position(|r| r == &rule) else {
            return false;
        };
        bucket.remove(pos);
        true
    }

    pub fn head_index(&self, table: &str) -> &[Rule] {
        self.contents.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn defined_table_names(&self) -> impl Iterator<Item = &String> {
        self.contents.keys()
    }

}

fn to_rule(formula: &Formula) -> Rule {
    match formula {
        Formula::Atom(a) => Rule::fact(a.clone()),
        Formula::Rule(r) => r.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy_syntax::{atom, var};

    #[test]
    fn duplicate_insert_is_noop() {
        let mut theory = NonrecursiveRuleTheory::new("classification");
        let rule: Formula = Rule::new(atom("q", vec![var("x")]), vec![atom("p", vec![var("x")]).into()]).into();
        assert!(theory.insert(&rule));
        assert!(!theory.insert(&rule));
        assert_eq!(theory.head_index("q").len(), 1);
    }

    #[test]
    fn delete_removes_matching_rule_only() {
        let mut theory = NonrecursiveRuleTheory::new("classification");
        let r1: Formula = Rule::new(atom("q", vec![var("x")]), vec![atom("p", vec![var("x")]).into()]).into();
        let r2: Formula = Rule::fact(atom("q", vec!["a".into()])).into();
        theory.insert(&r1);
        theory.insert(&r2);
        assert!(theory.delete(&r1));
        assert_eq!(theory.head_index("q").len(), 1);
        assert!(!theory.delete(&r1));
    }
}
