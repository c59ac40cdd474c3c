//! Type analysis: a per-clause monotone constraint propagation solver. Each
//! variable starts bound to every known type name (the top of the
//! "possible types" lattice, ordered by subset) and constraints from atom
//! positions, functor operand kinds, equality, and record field types
//! narrow it down. An empty final type-set is a type error; result sets
//! are otherwise left non-singleton on purpose -- the analysis stays
//! monotone and does not require principal types.
//!
//! One constraint-table arm per argument kind, with type recursion handled
//! via name+env lookup and a "seen" set, reusing [`crate::types`].

use std::collections::{HashMap, HashSet};

use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticMessage, ErrorReport};
use crate::ir::{Argument, BinaryOp, Clause, Literal, Program, UnaryOp};
use crate::types::{TypeDecl, TypeEnvironment};

/// Per-variable candidate type-sets for one clause.
pub type TypeAssignment = HashMap<String, HashSet<String>>;

/// Runs the solver over every clause in `program`, pushing a diagnostic for
/// each variable whose type-set collapses to empty. Returns the per-clause
/// assignments keyed by clause index within the owning relation's iteration
/// order (callers that need a stable handle should key by `(&Clause as
/// *const _)` instead; the index is adequate for single-pass reporting).
pub fn analyze(program: &Program, env: &TypeEnvironment, errors: &mut ErrorReport) -> Vec<TypeAssignment> {
    let numeric = numeric_type_names(env);
    let symbolic = symbolic_type_names(env);
    let record = record_type_names(env);
    let universe = env.all_types();

    let mut results = Vec::new();
    for relation in program.relations.values() {
        for clause in &relation.clauses {
            let assignment = solve_clause(clause, program, env, &numeric, &symbolic, &record, &universe);
            for (name, types) in &assignment {
                if types.is_empty() {
                    errors.add(Diagnostic::error(
                        DiagnosticKind::Semantic,
                        DiagnosticMessage::at(
                            format!("variable '{name}' has no valid type in this clause"),
                            clause.loc.clone(),
                        ),
                    ));
                }
            }
            results.push(assignment);
        }
    }
    results
}

fn numeric_type_names(env: &TypeEnvironment) -> HashSet<String> {
    env.names().filter(|n| matches!(env.base_kind(n), Some(crate::types::BaseKind::Number))).cloned().collect()
}

fn symbolic_type_names(env: &TypeEnvironment) -> HashSet<String> {
    env.names().filter(|n| matches!(env.base_kind(n), Some(crate::types::BaseKind::Symbol))).cloned().collect()
}

fn record_type_names(env: &TypeEnvironment) -> HashSet<String> {
    env.names().filter(|n| env.is_record(n)).cloned().collect()
}

#[allow(clippy::too_many_arguments)]
fn solve_clause(
    clause: &Clause,
    program: &Program,
    env: &TypeEnvironment,
    numeric: &HashSet<String>,
    symbolic: &HashSet<String>,
    record: &HashSet<String>,
    universe: &HashSet<String>,
) -> TypeAssignment {
    let mut sets: TypeAssignment = HashMap::new();
    for name in clause_variable_names(clause) {
        sets.entry(name).or_insert_with(|| universe.clone());
    }

    loop {
        let mut changed = false;

        if let Some(head) = &clause.head {
            if let Some(relation) = program.relation(&head.name) {
                narrow_atom_args(&head.args, &relation.attributes, env, &mut sets, &mut changed);
            }
        }
        for lit in &clause.body {
            match lit {
                Literal::Atom(a) | Literal::Negation(a) => {
                    if let Some(relation) = program.relation(&a.name) {
                        narrow_atom_args(&a.args, &relation.attributes, env, &mut sets, &mut changed);
                    }
                }
                Literal::Constraint { lhs, rhs, .. } => {
                    let lhs_types = expr_types(lhs, env, numeric, symbolic, record, universe, &sets);
                    let rhs_types = expr_types(rhs, env, numeric, symbolic, record, universe, &sets);
                    let combined = env.greatest_common_subtypes(&lhs_types, &rhs_types);
                    let combined = if combined.is_empty() {
                        lhs_types.intersection(&rhs_types).cloned().collect()
                    } else {
                        combined
                    };
                    narrow_term(lhs, &combined, env, &mut sets, &mut changed);
                    narrow_term(rhs, &combined, env, &mut sets, &mut changed);
                    narrow_functor_operands(lhs, numeric, symbolic, &mut sets, &mut changed);
                    narrow_functor_operands(rhs, numeric, symbolic, &mut sets, &mut changed);
                }
            }
        }
        if let Some(head) = &clause.head {
            for arg in &head.args {
                narrow_functor_operands(arg, numeric, symbolic, &mut sets, &mut changed);
            }
        }

        if !changed {
            break;
        }
    }
    sets
}

fn clause_variable_names(clause: &Clause) -> HashSet<String> {
    let mut names = HashSet::new();
    if let Some(head) = &clause.head {
        for arg in &head.args {
            names.extend(arg.variable_names());
        }
    }
    for lit in &clause.body {
        match lit {
            Literal::Atom(a) | Literal::Negation(a) => {
                for arg in &a.args {
                    names.extend(arg.variable_names());
                }
            }
            Literal::Constraint { lhs, rhs, .. } => {
                names.extend(lhs.variable_names());
                names.extend(rhs.variable_names());
            }
        }
    }
    names
}

fn narrow(name: &str, candidates: &HashSet<String>, sets: &mut TypeAssignment) -> bool {
    let entry = sets.entry(name.to_string()).or_insert_with(|| candidates.clone());
    let before = entry.len();
    let narrowed: HashSet<String> = entry.intersection(candidates).cloned().collect();
    *entry = narrowed;
    entry.len() != before
}

fn narrow_atom_args(
    args: &[Argument],
    attributes: &[crate::ir::Attribute],
    env: &TypeEnvironment,
    sets: &mut TypeAssignment,
    changed: &mut bool,
) {
    for (arg, attr) in args.iter().zip(attributes.iter()) {
        let expected: HashSet<String> = std::iter::once(attr.type_name.clone()).collect();
        narrow_term(arg, &expected, env, sets, changed);
    }
}

/// Narrows the immediate variable/record-field positions of `term` toward
/// `expected`. Does not descend into functor operands — those are
/// constrained separately by [`narrow_functor_operands`], since a functor's
/// operand type does not follow from the functor's own result type.
fn narrow_term(term: &Argument, expected: &HashSet<String>, env: &TypeEnvironment, sets: &mut TypeAssignment, changed: &mut bool) {
    match term {
        Argument::Variable { name, .. } => {
            if narrow(name, expected, sets) {
                *changed = true;
            }
        }
        Argument::RecordInit { args, .. } => {
            let candidates: Vec<&String> = expected.iter().filter(|t| env.is_record(t)).collect();
            for (i, arg) in args.iter().enumerate() {
                let mut field_types = HashSet::new();
                for rt in &candidates {
                    if let Some(TypeDecl::Record { fields }) = env.get(rt) {
                        if let Some((_, field_type)) = fields.get(i) {
                            field_types.insert(field_type.clone());
                        }
                    }
                }
                if !field_types.is_empty() {
                    narrow_term(arg, &field_types, env, sets, changed);
                }
            }
        }
        Argument::TypeCast { value, type_name, .. } => {
            let narrowed: HashSet<String> = std::iter::once(type_name.clone()).collect();
            narrow_term(value, &narrowed, env, sets, changed);
        }
        _ => {}
    }
}

/// Constrains a functor's operands to the base kind its operator requires,
/// independent of whatever the functor's own result is being narrowed to.
fn narrow_functor_operands(term: &Argument, numeric: &HashSet<String>, symbolic: &HashSet<String>, sets: &mut TypeAssignment, changed: &mut bool) {
    match term {
        Argument::UnaryFun { op, arg, .. } => {
            let expected = if matches!(op, UnaryOp::Ord) { symbolic } else { numeric };
            if let Argument::Variable { name, .. } = arg.as_ref() {
                if narrow(name, expected, sets) {
                    *changed = true;
                }
            }
            narrow_functor_operands(arg, numeric, symbolic, sets, changed);
        }
        Argument::BinaryFun { op, lhs, rhs, .. } => {
            let expected = if matches!(op, BinaryOp::Cat) { symbolic } else { numeric };
            for side in [lhs.as_ref(), rhs.as_ref()] {
                if let Argument::Variable { name, .. } = side {
                    if narrow(name, expected, sets) {
                        *changed = true;
                    }
                }
                narrow_functor_operands(side, numeric, symbolic, sets, changed);
            }
        }
        Argument::TernaryFun { a, b, c, .. } => {
            for side in [a.as_ref(), b.as_ref(), c.as_ref()] {
                narrow_functor_operands(side, numeric, symbolic, sets, changed);
            }
        }
        Argument::RecordInit { args, .. } => {
            for arg in args {
                narrow_functor_operands(arg, numeric, symbolic, sets, changed);
            }
        }
        Argument::TypeCast { value, .. } => narrow_functor_operands(value, numeric, symbolic, sets, changed),
        _ => {}
    }
}

/// The current best estimate of `term`'s type-set, used on each side of an
/// equality constraint before narrowing.
fn expr_types(
    term: &Argument,
    env: &TypeEnvironment,
    numeric: &HashSet<String>,
    symbolic: &HashSet<String>,
    record: &HashSet<String>,
    universe: &HashSet<String>,
    sets: &TypeAssignment,
) -> HashSet<String> {
    match term {
        Argument::Variable { name, .. } => sets.get(name).cloned().unwrap_or_else(|| universe.clone()),
        Argument::Unnamed { .. } | Argument::Counter { .. } => numeric.clone(),
        Argument::NumberConst { .. } => numeric.clone(),
        Argument::StringConst { .. } => symbolic.clone(),
        Argument::NullConst { .. } => record.clone(),
        // every unary functor (including `ord`, which maps a symbol to its
        // ordinal) produces a number
        Argument::UnaryFun { .. } => numeric.clone(),
        Argument::BinaryFun { op, .. } => {
            if matches!(op, BinaryOp::Cat) {
                symbolic.clone()
            } else {
                numeric.clone()
            }
        }
        Argument::TernaryFun { .. } => universe.clone(),
        Argument::RecordInit { args, .. } => record
            .iter()
            .filter(|rt| matches!(env.get(rt), Some(TypeDecl::Record { fields }) if fields.len() == args.len()))
            .cloned()
            .collect(),
        Argument::TypeCast { type_name, .. } => std::iter::once(type_name.clone()).collect(),
        Argument::Aggregator { .. } => numeric.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Atom, Attribute, Relation};
    use crate::loc::{Point, QualifiedName, SourceLocation};

    fn loc() -> SourceLocation {
        SourceLocation::new("t.dl", Point::new(1, 1), Point::new(1, 1))
    }

    #[test]
    fn atom_position_narrows_variable_to_declared_type() {
        let mut env = TypeEnvironment::new();
        env.create_primitive("Age", "number");
        let mut program = Program::new();
        let mut r = Relation::new(
            QualifiedName::new("r"),
            vec![Attribute { name: "a".into(), type_name: "Age".into() }],
            loc(),
        );
        r.clauses.push(Clause::fact(
            Atom::new(QualifiedName::new("r"), vec![Argument::NumberConst { value: 1, loc: loc() }], loc()),
        loc()));
        let mut s = Relation::new(QualifiedName::new("s"), vec![Attribute { name: "a".into(), type_name: "Age".into() }], loc());
        s.clauses.push(Clause::rule(
            Atom::new(QualifiedName::new("s"), vec![Argument::variable("x", loc())], loc()),
            vec![Literal::Atom(Atom::new(QualifiedName::new("r"), vec![Argument::variable("x", loc())], loc()))],
            loc(),
        ));
        program.relations.insert(r.name.clone(), r);
        program.relations.insert(s.name.clone(), s);

        let mut errors = ErrorReport::new();
        let results = analyze(&program, &env, &mut errors);
        let solved = results.iter().find(|a| a.contains_key("x")).unwrap();
        assert_eq!(solved["x"], std::iter::once("Age".to_string()).collect::<HashSet<_>>());
        assert!(!errors.has_errors());
    }

    #[test]
    fn conflicting_numeric_and_symbolic_constraints_yield_empty_set() {
        let env = TypeEnvironment::new();
        let mut program = Program::new();
        let mut r = Relation::new(
            QualifiedName::new("r"),
            vec![Attribute { name: "a".into(), type_name: "symbol".into() }],
            loc(),
        );
        r.clauses.push(Clause::rule(
            Atom::new(QualifiedName::new("r"), vec![Argument::variable("x", loc())], loc()),
            vec![Literal::Constraint {
                op: crate::ir::ConstraintOp::Eq,
                lhs: Argument::variable("x", loc()),
                rhs: Argument::BinaryFun {
                    op: BinaryOp::Add,
                    lhs: Box::new(Argument::NumberConst { value: 1, loc: loc() }),
                    rhs: Box::new(Argument::NumberConst { value: 2, loc: loc() }),
                    loc: loc(),
                },
                loc: loc(),
            }],
            loc(),
        ));
        program.relations.insert(r.name.clone(), r);

        let mut errors = ErrorReport::new();
        let _ = analyze(&program, &env, &mut errors);
        assert!(errors.has_errors());
    }

    #[test]
    fn record_destructuring_narrows_field_variables() {
        let mut env = TypeEnvironment::new();
        env.create_record("Point", vec![("x".into(), "number".into()), ("y".into(), "number".into())]);
        let mut program = Program::new();
        let mut r = Relation::new(
            QualifiedName::new("r"),
            vec![Attribute { name: "p".into(), type_name: "Point".into() }],
            loc(),
        );
        r.clauses.push(Clause::rule(
            Atom::new(QualifiedName::new("r"), vec![Argument::variable("p", loc())], loc()),
            vec![Literal::Atom(Atom::new(
                QualifiedName::new("r"),
                vec![Argument::RecordInit {
                    args: vec![Argument::variable("a", loc()), Argument::variable("b", loc())],
                    loc: loc(),
                }],
                loc(),
            ))],
            loc(),
        ));
        program.relations.insert(r.name.clone(), r);

        let mut errors = ErrorReport::new();
        let results = analyze(&program, &env, &mut errors);
        let solved = results.iter().find(|a| a.contains_key("a")).unwrap();
        assert!(solved["a"].contains("number"));
    }
}
