//! Semantic checker: structural and semantic validation run twice -- once
//! on the freshly-instantiated program, once again after desugaring has
//! rewritten it.
//!
//! Covers types, relation shape, clause and atom arity, facts, unnamed
//! head variables, variable groundedness (by fixpoint), execution-plan
//! permutation validity, recursive-counter use, namespace uniqueness,
//! cyclic component bases, and stratification. Every problem found here is
//! a [`Diagnostic`] pushed into the report, never a hard abort.

use std::collections::{HashMap, HashSet};

use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticMessage, ErrorReport};
use crate::ir::{Argument, Atom, Clause, Literal, Program};
use crate::loc::QualifiedName;
use crate::schedule::{build_precedence_graph, compute_sccs, EdgeKind};
use crate::types::TypeEnvironment;

/// Runs every check against `program`, pushing diagnostics into `errors`.
/// Safe to call twice in the same pipeline run (before and after
/// desugaring); each call is independent and idempotent.
pub fn check(program: &Program, types: &TypeEnvironment, errors: &mut ErrorReport) {
    tracing::debug!(relations = program.relations.len(), "running semantic checker");
    check_type_references(program, types, errors);
    check_relation_shape(program, errors);
    for relation in program.relations.values() {
        for clause in &relation.clauses {
            check_clause_arity(clause, program, errors);
            check_facts(clause, errors);
            check_unnamed_in_head(clause, errors);
            check_grounding(clause, errors);
            check_execution_plan(clause, errors);
        }
    }
    check_recursive_counters(program, errors);
    check_namespaces(program, errors);
    check_cyclic_components(program, errors);
    check_stratification(program, errors);
    tracing::debug!(errors = errors.num_errors(), warnings = errors.num_warnings(), "semantic check complete");
}

fn undefined_type(name: &str) -> Diagnostic {
    Diagnostic::error(
        DiagnosticKind::Structural,
        DiagnosticMessage::new(format!("reference to undefined type '{name}'")),
    )
}

fn check_type_references(program: &Program, types: &TypeEnvironment, errors: &mut ErrorReport) {
    for relation in program.relations.values() {
        for attr in &relation.attributes {
            if !types.contains(&attr.type_name) {
                errors.add(undefined_type(&attr.type_name));
            }
        }
    }
    for (name, decl) in &program.types {
        match decl {
            crate::types::TypeDecl::Primitive { base } if !types.contains(base) => {
                errors.add(undefined_type(base));
            }
            crate::types::TypeDecl::Union { members } => {
                for member in members {
                    if !types.contains(member) {
                        errors.add(undefined_type(member));
                    }
                }
            }
            crate::types::TypeDecl::Record { fields } => {
                for (_, field_type) in fields {
                    if !types.contains(field_type) {
                        errors.add(undefined_type(field_type));
                    }
                }
            }
            _ => {}
        }
        if types.base_kind(name).is_none() && !types.is_record(name) {
            if let crate::types::TypeDecl::Primitive { .. } = decl {
                errors.add(Diagnostic::error(
                    DiagnosticKind::Semantic,
                    DiagnosticMessage::new(format!("type '{name}' has a cyclic alias chain")),
                ));
            }
        }
    }
}

fn check_relation_shape(program: &Program, errors: &mut ErrorReport) {
    for relation in program.relations.values() {
        let mut seen = HashSet::new();
        for attr in &relation.attributes {
            if !seen.insert(&attr.name) {
                errors.add(
                    Diagnostic::error(
                        DiagnosticKind::Structural,
                        DiagnosticMessage::at(
                            format!("relation '{}' declares attribute '{}' more than once", relation.name, attr.name),
                            relation.loc.clone(),
                        ),
                    ),
                );
            }
        }
    }
}

fn check_atom_arity(atom: &Atom, program: &Program, errors: &mut ErrorReport) {
    match program.relation(&atom.name) {
        Some(relation) if relation.arity() != atom.arity() => {
            errors.add(Diagnostic::error(
                DiagnosticKind::Structural,
                DiagnosticMessage::at(
                    format!(
                        "'{}' expects {} argument(s), found {}",
                        atom.name,
                        relation.arity(),
                        atom.arity()
                    ),
                    atom.loc.clone(),
                ),
            ));
        }
        None => {
            errors.add(Diagnostic::error(
                DiagnosticKind::Structural,
                DiagnosticMessage::at(format!("reference to undefined relation '{}'", atom.name), atom.loc.clone()),
            ));
        }
        _ => {}
    }
}

fn check_clause_arity(clause: &Clause, program: &Program, errors: &mut ErrorReport) {
    if let Some(head) = &clause.head {
        check_atom_arity(head, program, errors);
    }
    for lit in &clause.body {
        if let Literal::Atom(a) | Literal::Negation(a) = lit {
            check_atom_arity(a, program, errors);
        }
    }
}

fn check_facts(clause: &Clause, errors: &mut ErrorReport) {
    if !clause.is_fact() {
        return;
    }
    if let Some(head) = &clause.head {
        for arg in &head.args {
            if matches!(arg, Argument::Counter { .. }) || !arg.is_constant() {
                errors.add(Diagnostic::error(
                    DiagnosticKind::Semantic,
                    DiagnosticMessage::at("a fact's arguments must all be constants".to_string(), arg.loc().clone()),
                ));
            }
        }
    }
}

fn check_unnamed_in_head(clause: &Clause, errors: &mut ErrorReport) {
    if let Some(head) = &clause.head {
        for arg in &head.args {
            let mut found = false;
            crate::ir::visitor::walk_argument_pre(arg, &mut |a| {
                if matches!(a, Argument::Unnamed { .. }) {
                    found = true;
                }
            });
            if found {
                errors.add(Diagnostic::error(
                    DiagnosticKind::Semantic,
                    DiagnosticMessage::at("'_' is not allowed in a clause head".to_string(), arg.loc().clone()),
                ));
            }
        }
    }
}

/// A variable is grounded once it occurs anywhere inside a direct argument
/// of a positive body atom (atom arguments are patterns, so nested
/// variables count), or once an equality constraint lets it inherit
/// groundedness from an already-ground other side. Fixpoint over the
/// clause body; any variable still free at the head or elsewhere in the
/// body afterwards is ungrounded.
fn check_grounding(clause: &Clause, errors: &mut ErrorReport) {
    if clause.is_fact() {
        return;
    }
    let mut grounded: HashSet<String> = HashSet::new();
    for atom in clause.positive_atoms() {
        for arg in &atom.args {
            grounded.extend(arg.variable_names());
        }
    }

    loop {
        let mut changed = false;
        for lit in &clause.body {
            if let Literal::Constraint {
                op: crate::ir::ConstraintOp::Eq,
                lhs,
                rhs,
                ..
            } = lit
            {
                changed |= ground_if_equated(lhs, rhs, &mut grounded);
                changed |= ground_if_equated(rhs, lhs, &mut grounded);
            }
        }
        if !changed {
            break;
        }
    }

    let mut report_ungrounded = |arg: &Argument| {
        if let Argument::Variable { name, loc } = arg {
            if !grounded.contains(name) {
                errors.add(Diagnostic::error(
                    DiagnosticKind::Semantic,
                    DiagnosticMessage::at(format!("ungrounded variable '{name}'"), loc.clone()),
                ));
            }
        }
    };
    if let Some(head) = &clause.head {
        for arg in &head.args {
            crate::ir::visitor::walk_argument_pre(arg, &mut report_ungrounded);
        }
    }
    for lit in &clause.body {
        match lit {
            Literal::Negation(a) => {
                for arg in &a.args {
                    crate::ir::visitor::walk_argument_pre(arg, &mut report_ungrounded);
                }
            }
            Literal::Constraint { lhs, rhs, .. } => {
                crate::ir::visitor::walk_argument_pre(lhs, &mut report_ungrounded);
                crate::ir::visitor::walk_argument_pre(rhs, &mut report_ungrounded);
            }
            Literal::Atom(_) => {}
        }
    }
}

fn ground_if_equated(target: &Argument, source: &Argument, grounded: &mut HashSet<String>) -> bool {
    if let Argument::Variable { name, .. } = target {
        if !grounded.contains(name) && source.variable_names().iter().all(|v| grounded.contains(v)) {
            grounded.insert(name.clone());
            return true;
        }
    }
    false
}

fn check_execution_plan(clause: &Clause, errors: &mut ErrorReport) {
    let Some(plan) = &clause.plan else { return };
    let n = clause.body.len();
    for (version, order) in plan {
        let mut seen = HashSet::new();
        let valid = order.len() == n && order.iter().all(|&i| i < n && seen.insert(i));
        if !valid {
            errors.add(Diagnostic::error(
                DiagnosticKind::Structural,
                DiagnosticMessage::at(
                    format!("execution plan version {version} is not a permutation of the clause's {n} body atom(s)"),
                    clause.loc.clone(),
                ),
            ));
        }
    }
}

/// Forbids `$` (the counter functor) in any clause defining a relation
/// that participates in recursion (a non-trivial SCC or a self-loop):
/// semi-naive evaluation re-runs such clauses per iteration, so `$` would
/// not yield a stable per-fact value.
fn check_recursive_counters(program: &Program, errors: &mut ErrorReport) {
    let graph = build_precedence_graph(program);
    let sccs = compute_sccs(&graph);
    let recursive: HashSet<&QualifiedName> = sccs
        .iter()
        .filter(|scc| scc.len() > 1 || scc.iter().any(|r| graph.has_self_loop(r)))
        .flatten()
        .collect();

    for relation in program.relations.values() {
        if !recursive.contains(&relation.name) {
            continue;
        }
        for clause in &relation.clauses {
            let mut found = false;
            let mut check_arg = |arg: &Argument| {
                crate::ir::visitor::walk_argument_pre(arg, &mut |a| {
                    if matches!(a, Argument::Counter { .. }) {
                        found = true;
                    }
                });
            };
            if let Some(head) = &clause.head {
                for arg in &head.args {
                    check_arg(arg);
                }
            }
            for lit in &clause.body {
                if let Literal::Constraint { lhs, rhs, .. } = lit {
                    check_arg(lhs);
                    check_arg(rhs);
                }
            }
            if found {
                errors.add(Diagnostic::error(
                    DiagnosticKind::Semantic,
                    DiagnosticMessage::at(
                        "the counter functor '$' is not allowed in a recursive clause".to_string(),
                        clause.loc.clone(),
                    ),
                ));
            }
        }
    }
}

fn check_namespaces(program: &Program, errors: &mut ErrorReport) {
    let mut component_names = HashSet::new();
    for component in &program.components {
        if !component_names.insert(&component.component_type.name) {
            errors.add(Diagnostic::error(
                DiagnosticKind::Structural,
                DiagnosticMessage::at(
                    format!("component '{}' is declared more than once", component.component_type.name),
                    component.loc.clone(),
                ),
            ));
        }
    }

    let mut instance_names = HashSet::new();
    for inst in &program.instantiations {
        if !instance_names.insert(&inst.instance_name) {
            errors.add(Diagnostic::error(
                DiagnosticKind::Structural,
                DiagnosticMessage::at(
                    format!("instance name '{}' is declared more than once", inst.instance_name),
                    inst.loc.clone(),
                ),
            ));
        }
    }
}

fn check_cyclic_components(program: &Program, errors: &mut ErrorReport) {
    let bases: HashMap<&str, Vec<&str>> = program
        .components
        .iter()
        .map(|c| (c.component_type.name.as_str(), c.bases.iter().map(|b| b.name.as_str()).collect()))
        .collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }
    let mut marks: HashMap<&str, Mark> = bases.keys().map(|&k| (k, Mark::Unvisited)).collect();
    let mut cyclic = HashSet::new();

    fn visit<'a>(
        name: &'a str,
        bases: &HashMap<&'a str, Vec<&'a str>>,
        marks: &mut HashMap<&'a str, Mark>,
        cyclic: &mut HashSet<&'a str>,
    ) {
        match marks.get(name) {
            Some(Mark::Done) | None => return,
            Some(Mark::InProgress) => {
                cyclic.insert(name);
                return;
            }
            Some(Mark::Unvisited) => {}
        }
        marks.insert(name, Mark::InProgress);
        if let Some(parents) = bases.get(name) {
            for parent in parents {
                visit(parent, bases, marks, cyclic);
                if cyclic.contains(parent) {
                    cyclic.insert(name);
                }
            }
        }
        marks.insert(name, Mark::Done);
    }

    for name in bases.keys().copied().collect::<Vec<_>>() {
        visit(name, &bases, &mut marks, &mut cyclic);
    }

    for component in &program.components {
        if cyclic.contains(component.component_type.name.as_str()) {
            errors.add(Diagnostic::error(
                DiagnosticKind::Semantic,
                DiagnosticMessage::at(
                    format!("component '{}' has a cyclic base-component chain", component.component_type.name),
                    component.loc.clone(),
                ),
            ));
        }
    }
}

/// A negation or aggregation edge may not stay within a non-trivial SCC
/// (size > 1, or a self-loop): the program would not be stratifiable.
fn check_stratification(program: &Program, errors: &mut ErrorReport) {
    let graph = build_precedence_graph(program);
    let sccs = compute_sccs(&graph);
    let mut scc_of: HashMap<&QualifiedName, usize> = HashMap::new();
    for (i, scc) in sccs.iter().enumerate() {
        for r in scc {
            scc_of.insert(r, i);
        }
    }

    for (r, edges) in &graph.edges {
        let Some(&r_scc) = scc_of.get(r) else { continue };
        for edge in edges {
            if matches!(edge.kind, EdgeKind::Positive) {
                continue;
            }
            if scc_of.get(&edge.target) == Some(&r_scc) {
                let kind = if matches!(edge.kind, EdgeKind::Negative) { "negation" } else { "aggregation" };
                let members = sccs[r_scc].iter().map(QualifiedName::to_string).collect::<Vec<_>>().join(", ");
                errors.add(Diagnostic::error(
                    DiagnosticKind::Stratification,
                    DiagnosticMessage::at(
                        format!(
                            "'{}' reaches '{}' through {} within a recursive cycle {{{}}}; the program is not stratifiable",
                            r, edge.target, kind, members
                        ),
                        edge.loc.clone(),
                    ),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Attribute, Relation};
    use crate::loc::{Point, SourceLocation};

    fn loc() -> SourceLocation {
        SourceLocation::new("t.dl", Point::new(1, 1), Point::new(1, 1))
    }

    #[test]
    fn arity_mismatch_is_reported() {
        let mut program = Program::new();
        let mut r = Relation::new(
            QualifiedName::new("r"),
            vec![Attribute { name: "x".into(), type_name: "number".into() }],
            loc(),
        );
        let head = Atom::new(
            QualifiedName::new("r"),
            vec![Argument::NumberConst { value: 1, loc: loc() }, Argument::NumberConst { value: 2, loc: loc() }],
            loc(),
        );
        r.clauses.push(Clause::fact(head, loc()));
        program.relations.insert(r.name.clone(), r);

        let mut errors = ErrorReport::new();
        check(&program, &TypeEnvironment::new(), &mut errors);
        assert!(errors.has_errors());
    }

    #[test]
    fn undefined_relation_reference_is_reported() {
        let mut program = Program::new();
        let mut r = Relation::new(QualifiedName::new("r"), vec![], loc());
        r.clauses.push(Clause::rule(
            Atom::new(QualifiedName::new("r"), vec![], loc()),
            vec![Literal::Atom(Atom::new(QualifiedName::new("missing"), vec![], loc()))],
            loc(),
        ));
        program.relations.insert(r.name.clone(), r);

        let mut errors = ErrorReport::new();
        check(&program, &TypeEnvironment::new(), &mut errors);
        assert!(errors.iter().any(|d| d.primary.text.contains("undefined relation")));
    }

    #[test]
    fn ungrounded_head_variable_is_reported() {
        let mut program = Program::new();
        let mut r = Relation::new(
            QualifiedName::new("r"),
            vec![Attribute { name: "x".into(), type_name: "number".into() }],
            loc(),
        );
        let mut s = Relation::new(QualifiedName::new("s"), vec![], loc());
        s.clauses.push(Clause::fact(Atom::new(QualifiedName::new("s"), vec![], loc()), loc()));
        r.clauses.push(Clause::rule(
            Atom::new(QualifiedName::new("r"), vec![Argument::variable("y", loc())], loc()),
            vec![Literal::Atom(Atom::new(QualifiedName::new("s"), vec![], loc()))],
            loc(),
        ));
        program.relations.insert(r.name.clone(), r);
        program.relations.insert(s.name.clone(), s);

        let mut errors = ErrorReport::new();
        check(&program, &TypeEnvironment::new(), &mut errors);
        assert!(errors.iter().any(|d| d.primary.text.contains("ungrounded variable 'y'")));
    }

    #[test]
    fn positive_atom_argument_grounds_its_variable() {
        let mut program = Program::new();
        let mut s = Relation::new(QualifiedName::new("s"), vec![], loc());
        s.clauses.push(Clause::fact(
            Atom::new(QualifiedName::new("s"), vec![Argument::NumberConst { value: 1, loc: loc() }], loc()),
            loc(),
        ));
        let mut r = Relation::new(QualifiedName::new("r"), vec![], loc());
        r.clauses.push(Clause::rule(
            Atom::new(QualifiedName::new("r"), vec![Argument::variable("x", loc())], loc()),
            vec![Literal::Atom(Atom::new(QualifiedName::new("s"), vec![Argument::variable("x", loc())], loc()))],
            loc(),
        ));
        program.relations.insert(r.name.clone(), r);
        program.relations.insert(s.name.clone(), s);

        let mut errors = ErrorReport::new();
        check(&program, &TypeEnvironment::new(), &mut errors);
        assert!(!errors.iter().any(|d| d.primary.text.contains("ungrounded")));
    }

    #[test]
    fn negation_inside_a_recursive_cycle_fails_stratification() {
        let mut program = Program::new();
        let mut p = Relation::new(QualifiedName::new("p"), vec![], loc());
        p.clauses.push(Clause::rule(
            Atom::new(QualifiedName::new("p"), vec![], loc()),
            vec![Literal::Negation(Atom::new(QualifiedName::new("p"), vec![], loc()))],
            loc(),
        ));
        program.relations.insert(p.name.clone(), p);

        let mut errors = ErrorReport::new();
        check(&program, &TypeEnvironment::new(), &mut errors);
        let diag = errors
            .iter()
            .find(|d| d.kind == DiagnosticKind::Stratification)
            .expect("stratification error reported");
        assert!(diag.primary.location.is_some(), "diagnostic should carry the offending literal's location");
        assert!(diag.primary.text.contains('p'), "diagnostic should name the SCC's relation(s): {}", diag.primary.text);
    }

    #[test]
    fn cyclic_component_bases_are_reported() {
        use crate::ir::{Component, ComponentRef, ComponentType};
        let mut program = Program::new();
        let mut a = Component::new(ComponentType { name: "A".into(), type_params: vec![] }, loc());
        a.bases.push(ComponentRef { name: "B".into(), actual_params: vec![] });
        let mut b = Component::new(ComponentType { name: "B".into(), type_params: vec![] }, loc());
        b.bases.push(ComponentRef { name: "A".into(), actual_params: vec![] });
        program.components.push(a);
        program.components.push(b);

        let mut errors = ErrorReport::new();
        check(&program, &TypeEnvironment::new(), &mut errors);
        assert!(errors.iter().any(|d| d.primary.text.contains("cyclic base-component")));
    }
}
