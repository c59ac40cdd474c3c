//! Component instantiation: expands `.comp`/`.init` into concrete relations
//! and clauses, honouring inheritance, type parameters, and `.override`.
//!
//! Structured as a small pass with a single entry function consuming a
//! `Program` in place, same shape as the rest of the pipeline's stages.

use std::collections::HashMap;

use crate::diagnostics::{DiagnosticKind, DiagnosticMessage, ErrorReport};
use crate::ir::{Argument, Atom, Clause, Component, Instantiation, Literal, Relation};
use crate::loc::QualifiedName;

/// Default bound on recursive nested-`.init` expansion.
pub const DEFAULT_MAX_INSTANTIATION_DEPTH: usize = 1000;

/// Expands every top-level `.init` in `program` into concrete, fully
/// qualified relations, merges them into `program.relations`, and rebinds
/// any orphan clause whose head now resolves to a produced relation.
pub fn instantiate_components(
    program: &mut crate::ir::Program,
    max_depth: usize,
    errors: &mut ErrorReport,
) {
    let components = program.components.clone();
    let instantiations = program.instantiations.clone();
    tracing::debug!(
        components = components.len(),
        instantiations = instantiations.len(),
        "instantiating components"
    );
    let mut produced: HashMap<QualifiedName, Relation> = HashMap::new();

    for init in &instantiations {
        let Some(relations) = instantiate_init(&components, &[], init, &HashMap::new(), 0, max_depth, errors)
        else {
            continue;
        };
        for (name, relation) in relations {
            if produced.contains_key(&name) {
                errors.error(
                    DiagnosticKind::Structural,
                    DiagnosticMessage::at(
                        format!("relation '{name}' redefined across component instantiations"),
                        init.loc.clone(),
                    ),
                );
                continue;
            }
            produced.insert(name, relation);
        }
    }

    let mut remaining_orphans = Vec::new();
    for clause in std::mem::take(&mut program.orphan_clauses) {
        match &clause.head {
            Some(head) if produced.contains_key(&head.name) => {
                produced.get_mut(&head.name).expect("checked above").clauses.push(clause);
            }
            _ => remaining_orphans.push(clause),
        }
    }
    program.orphan_clauses = remaining_orphans;
    program.relations.extend(produced);
}

fn lookup_component<'a>(local: &'a [Component], global: &'a [Component], name: &str) -> Option<&'a Component> {
    local
        .iter()
        .find(|c| c.component_type.name == name)
        .or_else(|| global.iter().find(|c| c.component_type.name == name))
}

/// Expands a single `.init`, returning the relations it produces, fully
/// qualified and instance-prefixed. `active_binding` is the type-parameter
/// binding already in scope (from an enclosing `.init`, when this call is
/// itself a nested instantiation).
fn instantiate_init(
    global: &[Component],
    local: &[Component],
    init: &Instantiation,
    active_binding: &HashMap<String, String>,
    depth: usize,
    max_depth: usize,
    errors: &mut ErrorReport,
) -> Option<HashMap<QualifiedName, Relation>> {
    if depth > max_depth {
        tracing::warn!(instance = %init.instance_name, depth, max_depth, "instantiation depth limit exceeded, skipping");
        errors.error(
            DiagnosticKind::Limits,
            DiagnosticMessage::at(
                format!(
                    "component instantiation depth limit ({max_depth}) exceeded while instantiating '{}'",
                    init.instance_name
                ),
                init.loc.clone(),
            ),
        );
        return None;
    }

    let Some(component) = lookup_component(local, global, &init.component_type) else {
        tracing::warn!(component = %init.component_type, "referenced component not found, skipping instantiation");
        errors.error(
            DiagnosticKind::Structural,
            DiagnosticMessage::at(format!("no component named '{}'", init.component_type), init.loc.clone()),
        );
        return None;
    };

    if component.component_type.type_params.len() != init.actual_params.len() {
        errors.error(
            DiagnosticKind::Semantic,
            DiagnosticMessage::at(
                format!(
                    "component '{}' expects {} type parameter(s), got {}",
                    init.component_type,
                    component.component_type.type_params.len(),
                    init.actual_params.len()
                ),
                init.loc.clone(),
            ),
        );
        return None;
    }

    let binding = bind_params(&component.component_type.type_params, &init.actual_params, active_binding);
    let relations = collect_component_relations(global, component, &binding, depth, max_depth, errors)?;

    let mut prefix_map: HashMap<String, QualifiedName> = HashMap::new();
    let mut staged: Vec<(QualifiedName, Relation)> = Vec::with_capacity(relations.len());
    for (local_name, rel) in relations {
        let prefixed_name = QualifiedName::from(local_name.as_str()).prefixed(&init.instance_name);
        prefix_map.insert(local_name, prefixed_name.clone());
        staged.push((prefixed_name, rel));
    }

    let mut result = HashMap::with_capacity(staged.len());
    for (prefixed_name, mut rel) in staged {
        rel.name = prefixed_name.clone();
        for clause in &mut rel.clauses {
            rewrite_clause_names(clause, &prefix_map);
        }
        result.insert(prefixed_name, rel);
    }
    Some(result)
}

/// Extends `formal[i] -> actual[i]`, resolving each actual one step through
/// `active_binding` first (a forwarded parameter is followed only once, to
/// avoid chasing an arbitrarily long forwarding chain).
fn bind_params(formals: &[String], actuals: &[String], active_binding: &HashMap<String, String>) -> HashMap<String, String> {
    formals
        .iter()
        .zip(actuals)
        .map(|(formal, actual)| {
            let resolved = active_binding.get(actual).cloned().unwrap_or_else(|| actual.clone());
            (formal.clone(), resolved)
        })
        .collect()
}

/// Collects the relations a component body produces, keyed by their local
/// (unqualified) name: bases first (recursively), then nested `.init`
/// expansions (already instance-prefixed, keyed by dotted name), then the
/// component's own declared relations, with `.override` applied last.
fn collect_component_relations(
    global: &[Component],
    component: &Component,
    binding: &HashMap<String, String>,
    depth: usize,
    max_depth: usize,
    errors: &mut ErrorReport,
) -> Option<HashMap<String, Relation>> {
    if depth > max_depth {
        errors.error(
            DiagnosticKind::Limits,
            DiagnosticMessage::at(
                format!("component instantiation depth limit ({max_depth}) exceeded"),
                component.loc.clone(),
            ),
        );
        return None;
    }

    let mut relations: HashMap<String, Relation> = HashMap::new();

    for base_ref in &component.bases {
        let Some(base_component) = lookup_component(&component.nested_components, global, &base_ref.name) else {
            errors.error(
                DiagnosticKind::Structural,
                DiagnosticMessage::at(format!("no component named '{}'", base_ref.name), component.loc.clone()),
            );
            continue;
        };
        if base_component.component_type.type_params.len() != base_ref.actual_params.len() {
            errors.error(
                DiagnosticKind::Semantic,
                DiagnosticMessage::at(
                    format!("base component '{}' type parameter count mismatch", base_ref.name),
                    component.loc.clone(),
                ),
            );
            continue;
        }
        let base_binding = bind_params(&base_component.component_type.type_params, &base_ref.actual_params, binding);
        if let Some(base_relations) =
            collect_component_relations(global, base_component, &base_binding, depth + 1, max_depth, errors)
        {
            relations.extend(base_relations);
        }
    }

    for nested_init in &component.nested_instantiations {
        if let Some(nested_relations) =
            instantiate_init(global, &component.nested_components, nested_init, binding, depth + 1, max_depth, errors)
        {
            for (qname, rel) in nested_relations {
                relations.insert(qname.to_dotted(), rel);
            }
        }
    }

    for rel in &component.relations {
        let mut rewritten = rel.clone();
        for attr in &mut rewritten.attributes {
            if let Some(resolved) = binding.get(&attr.type_name) {
                attr.type_name = resolved.clone();
            }
        }
        let short = rel.name.last().to_string();
        match relations.get(&short) {
            Some(_) if component.overridden.contains(&short) => {
                relations.insert(short, rewritten);
            }
            Some(existing) => {
                errors.error(
                    DiagnosticKind::Structural,
                    DiagnosticMessage::at(
                        format!(
                            "relation '{short}' redefined in component '{}' without .override (base declared at {})",
                            component.component_type.name, existing.loc
                        ),
                        rel.loc.clone(),
                    ),
                );
            }
            None => {
                relations.insert(short, rewritten);
            }
        }
    }

    Some(relations)
}

fn rewrite_clause_names(clause: &mut Clause, prefix_map: &HashMap<String, QualifiedName>) {
    if let Some(head) = &mut clause.head {
        rewrite_atom_name(head, prefix_map);
        for arg in &mut head.args {
            rewrite_arg_names(arg, prefix_map);
        }
    }
    for lit in &mut clause.body {
        rewrite_literal_names(lit, prefix_map);
    }
}

fn rewrite_literal_names(lit: &mut Literal, prefix_map: &HashMap<String, QualifiedName>) {
    match lit {
        Literal::Atom(a) | Literal::Negation(a) => {
            rewrite_atom_name(a, prefix_map);
            for arg in &mut a.args {
                rewrite_arg_names(arg, prefix_map);
            }
        }
        Literal::Constraint { lhs, rhs, .. } => {
            rewrite_arg_names(lhs, prefix_map);
            rewrite_arg_names(rhs, prefix_map);
        }
    }
}

fn rewrite_atom_name(atom: &mut Atom, prefix_map: &HashMap<String, QualifiedName>) {
    if let Some(mapped) = prefix_map.get(&atom.name.to_dotted()) {
        atom.name = mapped.clone();
    }
}

fn rewrite_arg_names(arg: &mut Argument, prefix_map: &HashMap<String, QualifiedName>) {
    match arg {
        Argument::UnaryFun { arg, .. } => rewrite_arg_names(arg, prefix_map),
        Argument::BinaryFun { lhs, rhs, .. } => {
            rewrite_arg_names(lhs, prefix_map);
            rewrite_arg_names(rhs, prefix_map);
        }
        Argument::TernaryFun { a, b, c, .. } => {
            rewrite_arg_names(a, prefix_map);
            rewrite_arg_names(b, prefix_map);
            rewrite_arg_names(c, prefix_map);
        }
        Argument::RecordInit { args, .. } => {
            for a in args {
                rewrite_arg_names(a, prefix_map);
            }
        }
        Argument::TypeCast { value, .. } => rewrite_arg_names(value, prefix_map),
        Argument::Aggregator { target, body, .. } => {
            if let Some(target) = target {
                rewrite_arg_names(target, prefix_map);
            }
            for lit in body {
                rewrite_literal_names(lit, prefix_map);
            }
        }
        Argument::Variable { .. }
        | Argument::Unnamed { .. }
        | Argument::Counter { .. }
        | Argument::NumberConst { .. }
        | Argument::StringConst { .. }
        | Argument::NullConst { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Attribute, ComponentType, Program};
    use crate::loc::{Point, SourceLocation};

    fn loc() -> SourceLocation {
        SourceLocation::new("t.dl", Point::new(1, 1), Point::new(1, 1))
    }

    /// `.comp C<T> { .decl r(x:T)  r("k"). } .init i = C<symbol>`
    /// produces one relation `i.r` of arity one typed `symbol` with a
    /// single fact clause.
    #[test]
    fn simple_instantiation_produces_prefixed_relation_and_fact() {
        let mut comp = Component::new(
            ComponentType {
                name: "C".to_string(),
                type_params: vec!["T".to_string()],
            },
            loc(),
        );
        let r_name = QualifiedName::new("r");
        let mut relation = Relation::new(r_name.clone(), vec![Attribute { name: "x".into(), type_name: "T".into() }], loc());
        relation.clauses.push(Clause::fact(
            Atom::new(r_name, vec![Argument::StringConst { value: "k".into(), loc: loc() }], loc()),
            loc(),
        ));
        comp.relations.push(relation);

        let mut program = Program::new();
        program.components.push(comp);
        program.instantiations.push(Instantiation {
            instance_name: "i".to_string(),
            component_type: "C".to_string(),
            actual_params: vec!["symbol".to_string()],
            loc: loc(),
        });

        let mut errors = ErrorReport::new();
        instantiate_components(&mut program, DEFAULT_MAX_INSTANTIATION_DEPTH, &mut errors);

        assert!(!errors.has_errors());
        let produced = program.relation(&QualifiedName::from("i.r")).expect("i.r produced");
        assert_eq!(produced.arity(), 1);
        assert_eq!(produced.attributes[0].type_name, "symbol");
        assert_eq!(produced.clauses.len(), 1);
    }

    #[test]
    fn override_drops_base_clauses() {
        let mut base = Component::new(ComponentType { name: "Base".into(), type_params: vec![] }, loc());
        let r_name = QualifiedName::new("r");
        let mut base_relation = Relation::new(r_name.clone(), vec![Attribute { name: "x".into(), type_name: "number".into() }], loc());
        base_relation
            .clauses
            .push(Clause::fact(Atom::new(r_name.clone(), vec![Argument::NumberConst { value: 1, loc: loc() }], loc()), loc()));
        base.relations.push(base_relation);

        let mut derived = Component::new(ComponentType { name: "Derived".into(), type_params: vec![] }, loc());
        derived.bases.push(crate::ir::ComponentRef { name: "Base".into(), actual_params: vec![] });
        derived.overridden.insert("r".to_string());
        let mut derived_relation = Relation::new(r_name.clone(), vec![Attribute { name: "x".into(), type_name: "number".into() }], loc());
        derived_relation
            .clauses
            .push(Clause::fact(Atom::new(r_name, vec![Argument::NumberConst { value: 2, loc: loc() }], loc()), loc()));
        derived.relations.push(derived_relation);

        let mut program = Program::new();
        program.components.push(base);
        program.components.push(derived);
        program.instantiations.push(Instantiation {
            instance_name: "d".into(),
            component_type: "Derived".into(),
            actual_params: vec![],
            loc: loc(),
        });

        let mut errors = ErrorReport::new();
        instantiate_components(&mut program, DEFAULT_MAX_INSTANTIATION_DEPTH, &mut errors);
        assert!(!errors.has_errors());
        let produced = program.relation(&QualifiedName::from("d.r")).unwrap();
        assert_eq!(produced.clauses.len(), 1);
        if let Argument::NumberConst { value, .. } = &produced.clauses[0].head.as_ref().unwrap().args[0] {
            assert_eq!(*value, 2);
        } else {
            unreachable!();
        }
    }

    #[test]
    fn missing_component_is_reported_and_skipped() {
        let mut program = Program::new();
        program.instantiations.push(Instantiation {
            instance_name: "i".into(),
            component_type: "Missing".into(),
            actual_params: vec![],
            loc: loc(),
        });
        let mut errors = ErrorReport::new();
        instantiate_components(&mut program, DEFAULT_MAX_INSTANTIATION_DEPTH, &mut errors);
        assert!(errors.has_errors());
    }

    #[test]
    fn depth_limit_is_enforced() {
        // A component that instantiates itself nested inside its own body
        // recurses without bound; depth bound must stop it.
        let mut comp = Component::new(ComponentType { name: "C".into(), type_params: vec![] }, loc());
        comp.nested_instantiations.push(Instantiation {
            instance_name: "inner".into(),
            component_type: "C".into(),
            actual_params: vec![],
            loc: loc(),
        });
        let mut program = Program::new();
        program.components.push(comp);
        program.instantiations.push(Instantiation {
            instance_name: "i".into(),
            component_type: "C".into(),
            actual_params: vec![],
            loc: loc(),
        });
        let mut errors = ErrorReport::new();
        instantiate_components(&mut program, 5, &mut errors);
        assert!(errors.has_errors());
    }
}
