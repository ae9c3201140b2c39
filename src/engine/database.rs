use ahash::HashMap;
use policy_syntax::{Atom, TypedValue};

use super::proof::{Proof, ProofCollection};

/// A ground tuple plus the set of distinct proofs that currently justify
/// it (spec §4.4 "Database"). A tuple disappears only when its last proof
/// is removed, which is how multiple independently-derived updates to the
/// same fact survive any one of their sources being retracted.
#[derive(Clone, Debug)]
pub struct DbTuple {
    pub values: Vec<TypedValue>,
    pub proofs: ProofCollection,
}

impl DbTuple {
    pub fn new(values: Vec<TypedValue>, proofs: ProofCollection) -> Self {
        DbTuple { values, proofs }
    }
}

/// Ground-fact storage for one theory, keyed by table name (spec §4.4).
/// Tuple identity is the value vector; a `Database` never stores rules.
#[derive(Default, Clone)]
pub struct Database {
    pub name: String,
    data: HashMap<String, Vec<DbTuple>>,
}

impl Database {
    pub fn new(name: impl Into<String>) -> Self {
        Database {
            name: name.into(),
            data: HashMap::default(),
        }
    }

    pub fn tables(&self) -> impl Iterator<Item = &String> {
        self.data.keys()
    }

    pub fn tuples(&self, table: &str) -> &[DbTuple] {
        self.data.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    fn find_mut(&mut self, table: &str, values: &[TypedValue]) -> Option<&mut DbTuple> {
        self.data
            .get_mut(table)?
            .iter_mut()
            .find(|t| t.values == values)
    }

    /// `true` iff inserting `atom` with `proof` would change nothing
    /// observable (spec §4.4, "is_noop"): the tuple already exists and
    /// already carries an equal proof.
    pub fn is_noop_insert(&self, atom: &Atom, proof: &Proof) -> bool {
        let values = atom.argument_names();
        match self.data.get(&atom.table).and_then(|rows| rows.iter().find(|t| t.values == values)) {
            Some(existing) => existing.proofs.iter().any(|p| p == proof),
            None => false,
        }
    }

    pub fn is_noop_delete(&self, atom: &Atom, proof: &Proof) -> bool {
        let values = atom.argument_names();
        match self.data.get(&atom.table).and_then(|rows| rows.iter().find(|t| t.values == values)) {
            Some(existing) => !existing.proofs.iter().any(|p| p == proof),
            None => true,
        }
    }

    /// Insert `atom` justified by `proof`. Returns whether this is the
    /// tuple's very first proof (i.e. it is newly visible, not merely
    /// re-justified), mirroring the original's event generation rule:
    /// `Database.insert` only emits downstream events the first time a
    /// tuple appears. A no-op (the tuple already carries an equal proof,
    /// spec §4.4 "Insert") leaves the database byte-identical rather than
    /// pushing a duplicate into its `ProofCollection` (spec §8 "Noop
    /// fidelity") — checked here, not just by callers that happen to
    /// pre-check, so every write path through this `Database` gets it.
    pub fn insert(&mut self, atom: &Atom, proof: Proof) -> bool {
        if self.is_noop_insert(atom, &proof) {
            return false;
        }
        let values = atom.argument_names();
        if let Some(existing) = self.find_mut(&atom.table, &values) {
            let was_empty = existing.proofs.is_empty();
            existing.proofs.push(proof);
            return was_empty;
        }
        self.data
            .entry(atom.table.clone())
            .or_default()
            .push(DbTuple::new(values, ProofCollection::singleton(proof)));
        true
    }

    /// Remove `proof` from `atom`'s justifications. Returns whether the
    /// tuple's last proof was just removed (it is now gone for good). A
    /// no-op (the proof isn't one of the tuple's justifications, or the
    /// tuple doesn't exist) leaves the database untouched, same rationale
    /// as [`Database::insert`].
    pub fn delete(&mut self, atom: &Atom, proof: &Proof) -> bool {
        if self.is_noop_delete(atom, proof) {
            return false;
        }
        let values = atom.argument_names();
        let Some(rows) = self.data.get_mut(&atom.table) else {
            return false;
        };
        let Some(pos) = rows.iter().position(|t| t.values == values) else {
            return false;
        };
        rows[pos].proofs.remove_one(proof);
        if rows[pos].proofs.is_empty() {
            rows.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, atom: &Atom) -> bool {
        let values = atom.argument_names();
        self.data
            .get(&atom.table)
            .map(|rows| rows.iter().any(|t| t.values == values))
            .unwrap_or(false)
    }

    pub fn explain(&self, atom: &Atom) -> Option<&ProofCollection> {
        let values = atom.argument_names();
        self.data
            .get(&atom.table)
            .and_then(|rows| rows.iter().find(|t| t.values == values))
            .map(|t| &t.proofs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy_syntax::fact;

    fn db_proof(atom: &Atom) -> Proof {
        Proof::leaf(atom.clone(), "database")
    }

    #[test]
    fn first_insert_is_not_noop_second_is() {
        let mut db = Database::new("database");
        let a = fact("p", vec!["x".into()]);
        let proof = db_proof(&a);
        assert!(!db.is_noop_insert(&a, &proof));
        let newly_visible = db.insert(&a, proof.clone());
        assert!(newly_visible);
        assert!(db.is_noop_insert(&a, &proof));
    }

    #[test]
    fn tuple_survives_until_last_proof_removed() {
        let mut db = Database::new("database");
        let a = fact("p", vec!["x".into()]);
        let p1 = Proof::leaf(a.clone(), "database");
        let p2 = Proof::new(a.clone(), "classification", vec![]);

        db.insert(&a, p1.clone());
        db.insert(&a, p2.clone());
        assert!(db.contains(&a));

        let removed_for_good = db.delete(&a, &p1);
        assert!(!removed_for_good);
        assert!(db.contains(&a));

        let removed_for_good = db.delete(&a, &p2);
        assert!(removed_for_good);
        assert!(!db.contains(&a));
    }
}
