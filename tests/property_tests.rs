//! Property-based tests for the universal properties of the front-end:
//! clone/equality, subtype lattice laws, grounding monotonicity.

use std::collections::HashSet;

use proptest::prelude::*;

use stratalog::checker;
use stratalog::diagnostics::ErrorReport;
use stratalog::ir::{Argument, Atom, Attribute, BinaryOp, Clause, Literal, Qualifier, Relation, UnaryOp};
use stratalog::loc::{Point, QualifiedName, SourceLocation};
use stratalog::types::TypeEnvironment;

fn loc() -> SourceLocation {
    SourceLocation::new("prop.dl", Point::new(1, 1), Point::new(1, 1))
}

/// A small recursive strategy for `Argument` trees, bounded in depth so
/// shrinking stays fast: leaves are variables/constants, the one level of
/// recursion covers the two functor shapes that nest other arguments.
fn arg_strategy() -> impl Strategy<Value = Argument> {
    let leaf = prop_oneof![
        "[a-z]".prop_map(|n| Argument::variable(n, loc())),
        any::<i32>().prop_map(|v| Argument::NumberConst { value: v as i64, loc: loc() }),
        "[a-z]{1,4}".prop_map(|v| Argument::StringConst { value: v, loc: loc() }),
    ];
    leaf.prop_recursive(3, 16, 4, |inner| {
        prop_oneof![
            inner.clone().prop_map(|a| Argument::UnaryFun { op: UnaryOp::Neg, arg: Box::new(a), loc: loc() }),
            (inner.clone(), inner).prop_map(|(l, r)| Argument::BinaryFun {
                op: BinaryOp::Add,
                lhs: Box::new(l),
                rhs: Box::new(r),
                loc: loc(),
            }),
        ]
    })
}

proptest! {
    /// `clone(n) == n` structurally, and for boxed children the clone is a
    /// fresh allocation (spec §8, clone/equality).
    #[test]
    fn argument_clone_is_structurally_equal(arg in arg_strategy()) {
        let cloned = arg.clone();
        prop_assert_eq!(&arg, &cloned);

        if let (Argument::BinaryFun { lhs: a, .. }, Argument::BinaryFun { lhs: b, .. }) = (&arg, &cloned) {
            prop_assert!(!std::ptr::eq(a.as_ref(), b.as_ref()));
        }
    }

    /// `print()` never panics on an arbitrary argument tree and is
    /// deterministic (printing twice yields the same text), a weaker stand-in
    /// for the parser round-trip property since the surface parser itself is
    /// out of scope for this crate.
    #[test]
    fn argument_print_is_deterministic(arg in arg_strategy()) {
        prop_assert_eq!(arg.print(), arg.print());
    }
}

/// Builds a type environment with a chain of `depth` primitive aliases atop
/// `number`, plus a union of all of them, to exercise the subtype lattice
/// over a randomly sized hierarchy.
fn chained_environment(depth: u8) -> (TypeEnvironment, Vec<String>) {
    let mut env = TypeEnvironment::new();
    let mut names = Vec::new();
    let mut base = "number".to_string();
    for i in 0..depth {
        let name = format!("T{i}");
        env.create_primitive(name.clone(), base.clone());
        base = name.clone();
        names.push(name);
    }
    if !names.is_empty() {
        env.create_union("U", names.clone());
    }
    (env, names)
}

proptest! {
    /// Subtype lattice laws (spec §8): reflexive, and every primitive in a
    /// chain is a subtype of every later (more general) link, including the
    /// union built over the whole chain.
    #[test]
    fn subtype_chain_is_reflexive_and_transitive(depth in 0u8..6) {
        let (env, names) = chained_environment(depth);
        prop_assert!(env.is_subtype_of("number", "number"));
        for (i, name) in names.iter().enumerate() {
            prop_assert!(env.is_subtype_of(name, name));
            for later in &names[i + 1..] {
                prop_assert!(env.is_subtype_of(name, later));
            }
            prop_assert!(env.is_subtype_of(name, "number"));
            if !names.is_empty() {
                prop_assert!(env.is_subtype_of(name, "U"));
            }
        }
    }

    /// `gcs(A, B) ⊑ A` and `⊑ B`; `A ⊑ lcs(A, B)` and `B ⊑ lcs(A, B)`
    /// (spec §8), checked over randomly sized chains split into two halves.
    #[test]
    fn gcs_and_lcs_respect_lattice_laws(depth in 1u8..6, split in 0u8..6) {
        let (env, names) = chained_environment(depth);
        let split = (split as usize).min(names.len());
        let a: HashSet<String> = names[..split].iter().cloned().collect();
        let b: HashSet<String> = names[split..].iter().cloned().collect();
        if a.is_empty() || b.is_empty() {
            return Ok(());
        }

        let gcs = env.greatest_common_subtypes(&a, &b);
        for t in &gcs {
            prop_assert!(a.iter().any(|x| env.is_subtype_of(t, x)));
            prop_assert!(b.iter().any(|x| env.is_subtype_of(t, x)));
        }

        let lcs = env.least_common_supertypes(&a, &b);
        for x in a.iter().chain(b.iter()) {
            prop_assert!(lcs.iter().any(|t| env.is_subtype_of(x, t)));
        }
    }
}

fn relation(name: &str, attrs: Vec<Attribute>, qualifier: Option<Qualifier>) -> Relation {
    let mut r = Relation::new(QualifiedName::new(name), attrs, loc());
    if let Some(q) = qualifier {
        r.qualifiers.insert(q);
    }
    r
}

fn attr(name: &str) -> Attribute {
    Attribute { name: name.to_string(), type_name: "number".to_string() }
}

/// Runs the checker over a two-relation program `r(x) :- s(x_0), ..., s(x_{n-1})`
/// where the head variable is `x_k` for some `k < n`, and returns whether an
/// "ungrounded variable" diagnostic was raised.
fn ungrounded_with_n_body_atoms(n: usize, head_index: usize) -> bool {
    let mut program = stratalog::Program::new();
    let mut s = relation("s", vec![attr("v")], None);
    s.clauses.push(Clause::fact(
        Atom::new(QualifiedName::new("s"), vec![Argument::NumberConst { value: 1, loc: loc() }], loc()),
        loc(),
    ));
    let mut r = relation("r", vec![attr("v")], Some(Qualifier::Output));

    let head_var = format!("x{head_index}");
    let body: Vec<Literal> = (0..n)
        .map(|i| Literal::Atom(Atom::new(QualifiedName::new("s"), vec![Argument::variable(format!("x{i}"), loc())], loc())))
        .collect();
    r.clauses.push(Clause::rule(
        Atom::new(QualifiedName::new("r"), vec![Argument::variable(head_var, loc())], loc()),
        body,
        loc(),
    ));

    program.relations.insert(s.name.clone(), s);
    program.relations.insert(r.name.clone(), r);

    let mut errors = ErrorReport::new();
    checker::check(&program, &TypeEnvironment::new(), &mut errors);
    errors.iter().any(|d| d.primary.text.contains("ungrounded"))
}

proptest! {
    /// Grounding monotonicity (spec §8): adding a positive body atom that
    /// binds the head variable never *re-introduces* an ungrounded-variable
    /// diagnostic that a larger body already resolved -- checked by
    /// comparing a body of `n` atoms (head variable unbound, since it only
    /// names `x0`) against a body of `n + 1` atoms that adds the exact atom
    /// binding the head's variable.
    #[test]
    fn adding_the_binding_atom_removes_the_ungrounded_diagnostic(n in 1usize..5) {
        prop_assert!(ungrounded_with_n_body_atoms(n, n));
        prop_assert!(!ungrounded_with_n_body_atoms(n + 1, n));
    }
}
