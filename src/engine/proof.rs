use ahash::HashMap;
use policy_syntax::Atom;

/// One resolution step: `root` was derived in `theory`, justified by
/// `subproofs` (empty for a fact taken directly from a database). Mirrors
/// the original's `Proof` class, minus its `node_id` bookkeeping which
/// existed only to number trace output.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Proof {
    pub root: Atom,
    pub theory: String,
    pub subproofs: Vec<Proof>,
}

impl Proof {
    pub fn new(root: Atom, theory: impl Into<String>, subproofs: Vec<Proof>) -> Self {
        Proof {
            root,
            theory: theory.into(),
            subproofs,
        }
    }

    pub fn leaf(root: Atom, theory: impl Into<String>) -> Self {
        Proof::new(root, theory, vec![])
    }

    /// The ground facts a proof ultimately rests on (spec §4.7,
    /// "Proof::leaves"): facts with no subproofs of their own.
    pub fn leaves(&self) -> Vec<Atom> {
        if self.subproofs.is_empty() {
            vec![self.root.clone()]
        } else {
            self.subproofs.iter().flat_map(Proof::leaves).collect()
        }
    }
}

/// A bag of distinct derivations for the same fact. Equality is by
/// multiset contents, not list order (spec §4.7): two collections built
/// by evaluating the same rules in a different order must still compare
/// equal.
#[derive(Clone, Debug, Default)]
pub struct ProofCollection(Vec<Proof>);

impl ProofCollection {
    pub fn new() -> Self {
        ProofCollection(vec![])
    }

    pub fn singleton(proof: Proof) -> Self {
        ProofCollection(vec![proof])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Proof> {
        self.0.iter()
    }

    pub fn push(&mut self, proof: Proof) {
        self.0.push(proof);
    }

    pub fn remove_one(&mut self, proof: &Proof) -> bool {
        if let Some(pos) = self.0.iter().position(|p| p == proof) {
            self.0.remove(pos);
            true
        } else {
            false
        }
    }

    fn counts(&self) -> HashMap<&Proof, usize> {
        let mut counts: HashMap<&Proof, usize> = HashMap::default();
        for proof in &self.0 {
            *counts.entry(proof).or_insert(0) += 1;
        }
        counts
    }
}

impl PartialEq for ProofCollection {
    fn eq(&self, other: &Self) -> bool {
        self.counts() == other.counts()
    }
}
impl Eq for ProofCollection {}

impl FromIterator<Proof> for ProofCollection {
    fn from_iter<T: IntoIterator<Item = Proof>>(iter: T) -> Self {
        ProofCollection(iter.into_iter().collect())
    }
}
