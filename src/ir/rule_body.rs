//! `RuleBody`: a disjunctive-normal-form builder over literal lists.
//!
//! Represented as a list of conjunctions (each a `Vec<Literal>`); the list
//! itself is the disjunction. `conjunct`/`disjunct` are quadratic in body
//! size. Insertion of a
//! conjunction removes duplicate literals within it and drops it if an
//! existing conjunction is a subset of it (i.e. strictly more general);
//! conversely, inserting a more general conjunction evicts existing
//! conjunctions it subsumes.

use super::{ConstraintOp, Literal};

#[derive(Debug, Clone, PartialEq)]
pub struct RuleBody {
    /// Disjunction of conjunctions; `disjuncts == []` means `false`,
    /// `disjuncts == [[]]` means `true`.
    disjuncts: Vec<Vec<Literal>>,
}

impl RuleBody {
    pub fn r#true() -> Self {
        RuleBody {
            disjuncts: vec![Vec::new()],
        }
    }

    pub fn r#false() -> Self {
        RuleBody { disjuncts: Vec::new() }
    }

    pub fn atom(atom: super::Atom) -> Self {
        RuleBody {
            disjuncts: vec![vec![Literal::Atom(atom)]],
        }
    }

    pub fn negated_atom(atom: super::Atom) -> Self {
        RuleBody {
            disjuncts: vec![vec![Literal::Negation(atom)]],
        }
    }

    pub fn constraint(lit: Literal) -> Self {
        debug_assert!(matches!(lit, Literal::Constraint { .. }));
        RuleBody {
            disjuncts: vec![vec![lit]],
        }
    }

    fn dedup_conjunct(mut conjunct: Vec<Literal>) -> Vec<Literal> {
        let mut out: Vec<Literal> = Vec::with_capacity(conjunct.len());
        for lit in conjunct.drain(..) {
            if !out.contains(&lit) {
                out.push(lit);
            }
        }
        out
    }

    fn is_subset(a: &[Literal], b: &[Literal]) -> bool {
        a.iter().all(|lit| b.contains(lit))
    }

    /// Inserts `conjunct` into `self.disjuncts`, deduping it and applying
    /// the subset-subsumption rule described above.
    fn insert(&mut self, conjunct: Vec<Literal>) {
        let conjunct = Self::dedup_conjunct(conjunct);
        if self.disjuncts.iter().any(|existing| Self::is_subset(existing, &conjunct)) {
            return; // an existing, more general conjunction already subsumes this one
        }
        self.disjuncts.retain(|existing| !Self::is_subset(&conjunct, existing));
        self.disjuncts.push(conjunct);
    }

    pub fn conjunct(self, other: Self) -> Self {
        let mut result = RuleBody::r#false();
        for a in &self.disjuncts {
            for b in &other.disjuncts {
                let mut merged = a.clone();
                merged.extend(b.iter().cloned());
                result.insert(merged);
            }
        }
        result
    }

    pub fn disjunct(mut self, other: Self) -> Self {
        for conjunct in other.disjuncts {
            self.insert(conjunct);
        }
        self
    }

    /// De Morgan negation: `!(A | B) == !A & !B`, `!(l1 & l2 & ...) ==
    /// !l1 | !l2 | ...`. Negating a positive atom yields a negated atom and
    /// vice versa; negating a constraint flips its operator.
    pub fn negate(self) -> Self {
        self.disjuncts
            .into_iter()
            .map(|conjunct| {
                conjunct
                    .into_iter()
                    .map(Self::negate_literal)
                    .fold(RuleBody::r#false(), RuleBody::disjunct)
            })
            .fold(RuleBody::r#true(), RuleBody::conjunct)
    }

    fn negate_literal(lit: Literal) -> Self {
        match lit {
            Literal::Atom(a) => RuleBody::negated_atom(a),
            Literal::Negation(a) => RuleBody::atom(a),
            Literal::Constraint { op, lhs, rhs, loc } => RuleBody::constraint(Literal::Constraint {
                op: negate_op(op),
                lhs,
                rhs,
                loc,
            }),
        }
    }

    /// Converts to a list of concrete clause bodies, one per disjunct.
    pub fn into_clause_bodies(self) -> Vec<Vec<Literal>> {
        self.disjuncts
    }

    pub fn is_false(&self) -> bool {
        self.disjuncts.is_empty()
    }

    pub fn is_true(&self) -> bool {
        self.disjuncts.len() == 1 && self.disjuncts[0].is_empty()
    }

    pub fn num_disjuncts(&self) -> usize {
        self.disjuncts.len()
    }
}

fn negate_op(op: ConstraintOp) -> ConstraintOp {
    op.negated()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loc::{Point, QualifiedName, SourceLocation};

    fn loc() -> SourceLocation {
        SourceLocation::new("t.dl", Point::new(1, 1), Point::new(1, 1))
    }

    fn atom(name: &str) -> super::super::Atom {
        super::super::Atom::new(QualifiedName::new(name), vec![], loc())
    }

    #[test]
    fn true_and_false_are_identities_for_conjunct() {
        let a = RuleBody::atom(atom("p"));
        assert_eq!(a.clone().conjunct(RuleBody::r#true()), a);
        assert!(a.conjunct(RuleBody::r#false()).is_false());
    }

    #[test]
    fn disjunct_drops_subsumed_conjunctions() {
        let p = RuleBody::atom(atom("p"));
        let pq = p.clone().conjunct(RuleBody::atom(atom("q")));
        // p | (p & q) == p, since p is more general than p & q
        let combined = p.clone().disjunct(pq);
        assert_eq!(combined.num_disjuncts(), 1);
        assert_eq!(combined, p);
    }

    #[test]
    fn insert_dedups_literals_within_a_conjunct() {
        let p = RuleBody::atom(atom("p"));
        let doubled = p.clone().conjunct(p.clone());
        assert_eq!(doubled.into_clause_bodies()[0].len(), 1);
    }

    #[test]
    fn negate_is_involutive_on_a_single_atom() {
        let p = RuleBody::atom(atom("p"));
        assert_eq!(p.clone().negate().negate(), p);
    }

    #[test]
    fn negate_distributes_over_conjunction() {
        let p = RuleBody::atom(atom("p"));
        let q = RuleBody::atom(atom("q"));
        let conj = p.clone().conjunct(q.clone());
        let negated = conj.negate();
        // !(p & q) == !p | !q -> two disjuncts
        assert_eq!(negated.num_disjuncts(), 2);
    }
}
