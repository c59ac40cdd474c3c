//! Lowering (component H): the last stage before a downstream evaluator,
//! turning the scheduled IR into a small, language-neutral relational
//! algebra. No full `CodeGenerator` survives in the corpus this crate
//! learns from (the original module is import-and-struct-only in the
//! retrieval pack); this module is built fresh from the algebra shape
//! described for lowering, using this crate's own `ir`/`schedule` tree
//! shapes, `print()` convention, and test style as its model instead.
//!
//! Per-clause lowering builds a *value index*: each positive body atom gets
//! a scan level in clause order; each argument position records the
//! `(level, column)` at which a variable is first bound. Later references
//! to the same variable become an equality condition instead of a new
//! binding. The operation tree nests innermost-first: a `Project` at the
//! bottom, aggregates wrapped around it, then atom scans wrapped outward in
//! clause order.
//!
//! Recursive strongly-connected components lower to the semi-naive
//! fixpoint shape: `delta_r`/`new_r` auxiliary tables, one delta rule
//! version per in-SCC body atom ("fingerprint"), and an update block run
//! after each loop iteration.

use std::collections::{HashMap, HashSet};

use crate::ir::{AggregateOp, Argument, Atom, BinaryOp, Clause, ConstraintOp, Literal, Program, Qualifier, Relation, UnaryOp};
use crate::loc::{QualifiedName, SourceLocation};
use crate::schedule::ScheduleStep;

// ---------------------------------------------------------------------
// Relational algebra value types
// ---------------------------------------------------------------------

/// A scalar expression evaluated against the current row of bound scan
/// levels.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The value bound at `column` of the row currently scanned at `level`.
    Element { level: usize, column: usize },
    Number(i64),
    Symbol(String),
    /// A fresh auto-increment value (`Argument::Counter`).
    AutoIncrement,
    Unary(UnaryOp, Box<Value>),
    Binary(BinaryOp, Box<Value>, Box<Value>),
    RecordPack(Vec<Value>),
}

impl Value {
    pub fn print(&self) -> String {
        match self {
            Value::Element { level, column } => format!("t{level}.{column}"),
            Value::Number(n) => n.to_string(),
            Value::Symbol(s) => format!("\"{s}\""),
            Value::AutoIncrement => "$".to_string(),
            Value::Unary(op, v) => format!("{}{}", crate::ir::unary_symbol(*op), v.print()),
            Value::Binary(op, l, r) => format!("({} {} {})", l.print(), crate::ir::binary_symbol(*op), r.print()),
            Value::RecordPack(vs) => format!("[{}]", vs.iter().map(Value::print).collect::<Vec<_>>().join(", ")),
        }
    }
}

/// A condition attached to a scan/lookup/aggregate wrapper.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Constant equality on a scanned column, or cross-level variable
    /// equality (first occurrence = subsequent occurrence).
    ColumnEq(Value, Value),
    /// A constraint literal from the clause body.
    Constraint(ConstraintOp, Value, Value),
    /// Negation of an atom: no row of `relation` matches the bound column
    /// values (`None` entries are unconstrained, i.e. an unnamed argument).
    NotExists { relation: QualifiedName, args: Vec<Option<Value>> },
    /// Emptiness test, used only inside loop `Exit` conditions.
    Empty(QualifiedName),
    And(Vec<Condition>),
}

impl Condition {
    pub fn print(&self) -> String {
        match self {
            Condition::ColumnEq(a, b) => format!("{} = {}", a.print(), b.print()),
            Condition::Constraint(op, a, b) => format!("{} {} {}", a.print(), crate::ir::constraint_symbol(*op), b.print()),
            Condition::NotExists { relation, args } => format!(
                "!exists {}({})",
                relation,
                args.iter().map(|a| a.as_ref().map(Value::print).unwrap_or_else(|| "_".to_string())).collect::<Vec<_>>().join(", ")
            ),
            Condition::Empty(r) => format!("empty({r})"),
            Condition::And(cs) => cs.iter().map(Condition::print).collect::<Vec<_>>().join(" and "),
        }
    }
}

/// The nested operation tree of a single `Insert`.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Iterates every row of `relation`, binding it at `level`.
    Scan {
        relation: QualifiedName,
        level: usize,
        conditions: Vec<Condition>,
        child: Box<Op>,
    },
    /// Like `Scan` but the relation's rows are only checked for existence;
    /// used when the atom introduces no binding consumed further down and
    /// feeds no aggregate.
    ExistsCheck {
        relation: QualifiedName,
        level: usize,
        conditions: Vec<Condition>,
    },
    /// Unpacks a record value into a fresh level, one column per field.
    Lookup {
        level: usize,
        source: Value,
        conditions: Vec<Condition>,
        child: Box<Op>,
    },
    /// Reduces every row of `relation` with `fun` over `value`, binding the
    /// single-column result at `level`.
    Aggregate {
        op: AggregateOp,
        value: Value,
        relation: QualifiedName,
        level: usize,
        conditions: Vec<Condition>,
        child: Box<Op>,
    },
    /// Emits one tuple of `values` into `relation`.
    Project { relation: QualifiedName, values: Vec<Value> },
}

impl Op {
    pub fn print(&self, depth: usize) -> String {
        let pad = "  ".repeat(depth);
        match self {
            Op::Scan { relation, level, conditions, child } => {
                format!("{pad}scan {relation} as t{level}{}\n{}", cond_suffix(conditions), child.print(depth + 1))
            }
            Op::ExistsCheck { relation, level, conditions } => {
                format!("{pad}exists {relation} as t{level}{}", cond_suffix(conditions))
            }
            Op::Lookup { level, source, conditions, child } => {
                format!("{pad}lookup {} as t{level}{}\n{}", source.print(), cond_suffix(conditions), child.print(depth + 1))
            }
            Op::Aggregate { op, value, relation, level, conditions, child } => {
                format!(
                    "{pad}aggregate {} {} over {relation} as t{level}{}\n{}",
                    aggregate_symbol(*op),
                    value.print(),
                    cond_suffix(conditions),
                    child.print(depth + 1)
                )
            }
            Op::Project { relation, values } => {
                format!("{pad}project {relation}({})", values.iter().map(Value::print).collect::<Vec<_>>().join(", "))
            }
        }
    }
}

fn cond_suffix(conditions: &[Condition]) -> String {
    if conditions.is_empty() {
        String::new()
    } else {
        format!(" if {}", conditions.iter().map(Condition::print).collect::<Vec<_>>().join(" and "))
    }
}

fn aggregate_symbol(op: AggregateOp) -> &'static str {
    match op {
        AggregateOp::Min => "min",
        AggregateOp::Max => "max",
        AggregateOp::Count => "count",
        AggregateOp::Sum => "sum",
    }
}

/// One lowered clause: the op tree plus the location it was lowered from,
/// kept for diagnostics/tracing, not for re-entry into the IR.
#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub clause_origin: SourceLocation,
    pub op: Op,
}

/// A relation-level statement in the emitted plan.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Create(QualifiedName),
    Load(QualifiedName),
    Store(QualifiedName),
    PrintSize(QualifiedName),
    Drop(QualifiedName),
    Clear(QualifiedName),
    Merge(QualifiedName, QualifiedName),
    Swap(QualifiedName, QualifiedName),
    Insert(Insert),
    Sequence(Vec<Statement>),
    /// No data dependence among the enclosed statements; a downstream
    /// evaluator may run them concurrently.
    Parallel(Vec<Statement>),
    Loop { body: Box<Statement>, exit: Box<Statement>, update: Box<Statement> },
    Exit(Condition),
}

impl Statement {
    pub fn print(&self, depth: usize) -> String {
        let pad = "  ".repeat(depth);
        match self {
            Statement::Create(r) => format!("{pad}create {r}"),
            Statement::Load(r) => format!("{pad}load {r}"),
            Statement::Store(r) => format!("{pad}store {r}"),
            Statement::PrintSize(r) => format!("{pad}printsize {r}"),
            Statement::Drop(r) => format!("{pad}drop {r}"),
            Statement::Clear(r) => format!("{pad}clear {r}"),
            Statement::Merge(dst, src) => format!("{pad}merge {dst} <- {src}"),
            Statement::Swap(a, b) => format!("{pad}swap {a}, {b}"),
            Statement::Insert(ins) => format!("{pad}insert\n{}", ins.op.print(depth + 1)),
            Statement::Sequence(stmts) => stmts.iter().map(|s| s.print(depth)).collect::<Vec<_>>().join("\n"),
            Statement::Parallel(stmts) => {
                format!("{pad}parallel\n{}", stmts.iter().map(|s| s.print(depth + 1)).collect::<Vec<_>>().join("\n"))
            }
            Statement::Loop { body, exit, update } => {
                format!(
                    "{pad}loop\n{}\n{}\n{pad}update\n{}",
                    body.print(depth + 1),
                    exit.print(depth + 1),
                    update.print(depth + 1)
                )
            }
            Statement::Exit(cond) => format!("{pad}exit {}", cond.print()),
        }
    }

    fn contains_relation_named(&self, target: &QualifiedName) -> bool {
        match self {
            Statement::Create(r) | Statement::Load(r) | Statement::Store(r) | Statement::PrintSize(r) | Statement::Drop(r) | Statement::Clear(r) => r == target,
            Statement::Merge(a, b) | Statement::Swap(a, b) => a == target || b == target,
            Statement::Insert(_) => false,
            Statement::Sequence(stmts) | Statement::Parallel(stmts) => stmts.iter().any(|s| s.contains_relation_named(target)),
            Statement::Loop { body, exit, update } => body.contains_relation_named(target) || exit.contains_relation_named(target) || update.contains_relation_named(target),
            Statement::Exit(_) => false,
        }
    }
}

// ---------------------------------------------------------------------
// Value index and per-clause lowering
// ---------------------------------------------------------------------

/// Maps a variable name to the `(level, column)` of its first (binding)
/// occurrence in a clause.
#[derive(Debug, Default)]
struct ValueIndex {
    bindings: HashMap<String, (usize, usize)>,
}

impl ValueIndex {
    fn bind_if_new(&mut self, name: &str, level: usize, column: usize) -> Option<(usize, usize)> {
        if let Some(existing) = self.bindings.get(name) {
            Some(*existing)
        } else {
            self.bindings.insert(name.to_string(), (level, column));
            None
        }
    }
}

/// Reorders `body` by the clause's declared plan for `version`, if any;
/// otherwise returns it unchanged. Plan indices are 1-based in surface
/// syntax and already stored 0-based internally (see `ir::ExecutionPlan`).
fn ordered_body<'a>(clause: &'a Clause, version: u32) -> Vec<&'a Literal> {
    if let Some(plan) = &clause.plan {
        if let Some(permutation) = plan.get(&version) {
            return permutation.iter().filter_map(|&i| clause.body.get(i)).collect();
        }
    }
    clause.body.iter().collect()
}

/// Builds the op tree for `clause`'s body and head, reordering atoms by the
/// clause's plan for `version` if one is declared.
pub fn lower_clause(clause: &Clause, version: u32) -> Insert {
    let Some(head) = &clause.head else {
        return Insert {
            clause_origin: clause.loc.clone(),
            op: Op::Project { relation: QualifiedName::new("_"), values: Vec::new() },
        };
    };

    let body = ordered_body(clause, version);
    let mut index = ValueIndex::default();

    // Pass 1: bind positive atoms in order, collecting their conditions and
    // any record-lookup children.
    struct AtomFrame {
        relation: QualifiedName,
        level: usize,
        conditions: Vec<Condition>,
        lookups: Vec<(usize, Value, Vec<Condition>)>,
        introduces_binding: bool,
    }
    let mut atom_frames = Vec::new();
    let mut next_level = 0usize;

    for lit in &body {
        if let Literal::Atom(atom) = lit {
            let level = next_level;
            next_level += 1;
            let mut conditions = Vec::new();
            let mut lookups = Vec::new();
            let mut introduces_binding = false;
            for (col, arg) in atom.args.iter().enumerate() {
                introduces_binding |= bind_atom_arg(arg, level, col, &mut index, &mut conditions, &mut lookups, &mut next_level);
            }
            atom_frames.push(AtomFrame { relation: atom.name.clone(), level, conditions, lookups, introduces_binding });
        }
    }

    // Pass 2: negated atoms become NotExists conditions attached to the
    // innermost wrapper (there is no dedicated scan level for a negation).
    let mut trailing_conditions = Vec::new();
    for lit in &body {
        match lit {
            Literal::Negation(atom) => {
                let args = atom
                    .args
                    .iter()
                    .map(|a| match a {
                        Argument::Variable { name, .. } => index.bindings.get(name).map(|&(l, c)| Value::Element { level: l, column: c }),
                        Argument::NumberConst { value, .. } => Some(Value::Number(*value)),
                        Argument::StringConst { value, .. } => Some(Value::Symbol(value.clone())),
                        _ => None,
                    })
                    .collect();
                trailing_conditions.push(Condition::NotExists { relation: atom.name.clone(), args });
            }
            Literal::Constraint { op, lhs, rhs, .. } => {
                let lv = term_to_value(lhs, &index);
                let rv = term_to_value(rhs, &index);
                trailing_conditions.push(Condition::Constraint(*op, lv, rv));
            }
            Literal::Atom(_) => {}
        }
    }

    // Pass 3: aggregators, in first-encounter order across head then body.
    let mut aggregates = Vec::new();
    collect_aggregators_clause(clause, &mut aggregates);
    let mut agg_frames = Vec::new();
    for agg in &aggregates {
        let Argument::Aggregator { op, target, body: agg_body, .. } = agg else { unreachable!() };
        let level = next_level;
        next_level += 1;
        let Some(Literal::Atom(inner)) = agg_body.first() else {
            agg_frames.push((level, *op, Value::Number(1), QualifiedName::new("_"), Vec::new()));
            continue;
        };
        let mut local = ValueIndex::default();
        let mut conditions = Vec::new();
        for (col, arg) in inner.args.iter().enumerate() {
            if let Argument::Variable { name, .. } = arg {
                local.bindings.entry(name.clone()).or_insert((level, col));
            } else if let Argument::NumberConst { value, .. } = arg {
                conditions.push(Condition::ColumnEq(Value::Element { level, column: col }, Value::Number(*value)));
            }
        }
        let value = match target {
            Some(t) => term_to_value(t, &local),
            None => Value::Number(1),
        };
        agg_frames.push((level, *op, value, inner.name.clone(), conditions));
    }

    let head_values: Vec<Value> = head.args.iter().map(|arg| term_to_value(arg, &index)).collect();
    let mut op = Op::Project { relation: head.name.clone(), values: head_values };

    for (level, agg_op, value, relation, conditions) in agg_frames.into_iter().rev() {
        op = Op::Aggregate { op: agg_op, value, relation, level, conditions, child: Box::new(op) };
    }

    for (i, frame) in atom_frames.into_iter().enumerate().rev() {
        for (level, source, conditions) in frame.lookups.into_iter().rev() {
            op = Op::Lookup { level, source, conditions, child: Box::new(op) };
        }
        let is_last_positive_atom = i == next_positive_count(&body) - 1;
        let mut conditions = frame.conditions;
        if is_last_positive_atom {
            conditions.extend(trailing_conditions.drain(..));
        }
        if is_last_positive_atom && !frame.introduces_binding && aggregates.is_empty() {
            op = Op::ExistsCheck { relation: frame.relation, level: frame.level, conditions };
        } else {
            op = Op::Scan { relation: frame.relation, level: frame.level, conditions, child: Box::new(op) };
        }
    }

    Insert { clause_origin: clause.loc.clone(), op }
}

fn next_positive_count(body: &[&Literal]) -> usize {
    body.iter().filter(|l| matches!(l, Literal::Atom(_))).count()
}

/// Binds or conditions a single atom argument at `(level, column)`. Returns
/// whether this position introduced a fresh binding (as opposed to only
/// constraining an already-bound value or a constant).
fn bind_atom_arg(
    arg: &Argument,
    level: usize,
    column: usize,
    index: &mut ValueIndex,
    conditions: &mut Vec<Condition>,
    lookups: &mut Vec<(usize, Value, Vec<Condition>)>,
    next_level: &mut usize,
) -> bool {
    match arg {
        Argument::Variable { name, .. } => match index.bind_if_new(name, level, column) {
            None => true,
            Some((l, c)) => {
                conditions.push(Condition::ColumnEq(Value::Element { level, column }, Value::Element { level: l, column: c }));
                false
            }
        },
        Argument::Unnamed { .. } => false,
        Argument::NumberConst { value, .. } => {
            conditions.push(Condition::ColumnEq(Value::Element { level, column }, Value::Number(*value)));
            false
        }
        Argument::StringConst { value, .. } => {
            conditions.push(Condition::ColumnEq(Value::Element { level, column }, Value::Symbol(value.clone())));
            false
        }
        Argument::RecordInit { args, .. } => {
            let lookup_level = *next_level;
            *next_level += 1;
            let mut lookup_conditions = Vec::new();
            for (i, inner) in args.iter().enumerate() {
                bind_atom_arg(inner, lookup_level, i, index, &mut lookup_conditions, lookups, next_level);
            }
            lookups.push((lookup_level, Value::Element { level, column }, lookup_conditions));
            true
        }
        _ => false,
    }
}

fn collect_aggregators_clause<'a>(clause: &'a Clause, out: &mut Vec<&'a Argument>) {
    if let Some(head) = &clause.head {
        for arg in &head.args {
            collect_aggregators_arg(arg, out);
        }
    }
    for lit in &clause.body {
        if let Literal::Constraint { lhs, rhs, .. } = lit {
            collect_aggregators_arg(lhs, out);
            collect_aggregators_arg(rhs, out);
        }
    }
}

fn collect_aggregators_arg<'a>(arg: &'a Argument, out: &mut Vec<&'a Argument>) {
    if let Argument::Aggregator { .. } = arg {
        out.push(arg);
        return;
    }
    crate::ir::visitor::walk_argument_children(arg, &mut |child| collect_aggregators_arg(child, out));
}

fn term_to_value(arg: &Argument, index: &ValueIndex) -> Value {
    match arg {
        Argument::Variable { name, .. } => index
            .bindings
            .get(name)
            .map(|&(level, column)| Value::Element { level, column })
            .unwrap_or(Value::Number(0)),
        Argument::Unnamed { .. } => Value::Number(0),
        Argument::Counter { .. } => Value::AutoIncrement,
        Argument::NumberConst { value, .. } => Value::Number(*value),
        Argument::StringConst { value, .. } => Value::Symbol(value.clone()),
        Argument::NullConst { .. } => Value::RecordPack(Vec::new()),
        Argument::UnaryFun { op, arg, .. } => Value::Unary(*op, Box::new(term_to_value(arg, index))),
        Argument::BinaryFun { op, lhs, rhs, .. } => Value::Binary(*op, Box::new(term_to_value(lhs, index)), Box::new(term_to_value(rhs, index))),
        Argument::TernaryFun { a, .. } => term_to_value(a, index),
        Argument::RecordInit { args, .. } => Value::RecordPack(args.iter().map(|a| term_to_value(a, index)).collect()),
        Argument::TypeCast { value, .. } => term_to_value(value, index),
        Argument::Aggregator { .. } => Value::Number(0),
    }
}

// ---------------------------------------------------------------------
// Relation and schedule-step lowering
// ---------------------------------------------------------------------

fn delta_name(r: &QualifiedName) -> QualifiedName {
    QualifiedName::new(format!("delta_{}", r.to_dotted()))
}

fn new_name(r: &QualifiedName) -> QualifiedName {
    QualifiedName::new(format!("new_{}", r.to_dotted()))
}

/// Renames every `Unnamed` argument inside a recursive clause to a unique
/// synthetic variable name, since unnamed positions must stay live across
/// delta-rule versions. Mirrors `desugar::materialize_aggregation_queries`'s
/// unnamed-promotion helper, generalised to a whole clause.
fn name_unnamed_variables(clause: &mut Clause, counter: &mut u64) {
    if let Some(head) = &mut clause.head {
        for arg in &mut head.args {
            name_unnamed_arg(arg, counter);
        }
    }
    for lit in &mut clause.body {
        match lit {
            Literal::Atom(a) | Literal::Negation(a) => {
                for arg in &mut a.args {
                    name_unnamed_arg(arg, counter);
                }
            }
            Literal::Constraint { lhs, rhs, .. } => {
                name_unnamed_arg(lhs, counter);
                name_unnamed_arg(rhs, counter);
            }
        }
    }
}

fn name_unnamed_arg(arg: &mut Argument, counter: &mut u64) {
    if let Argument::Unnamed { loc } = arg {
        *counter += 1;
        *arg = Argument::Variable { name: format!("__recur_unnamed{counter}"), loc: loc.clone() };
        return;
    }
    match arg {
        Argument::UnaryFun { arg, .. } => name_unnamed_arg(arg, counter),
        Argument::BinaryFun { lhs, rhs, .. } => {
            name_unnamed_arg(lhs, counter);
            name_unnamed_arg(rhs, counter);
        }
        Argument::TernaryFun { a, b, c, .. } => {
            name_unnamed_arg(a, counter);
            name_unnamed_arg(b, counter);
            name_unnamed_arg(c, counter);
        }
        Argument::RecordInit { args, .. } => {
            for a in args {
                name_unnamed_arg(a, counter);
            }
        }
        Argument::TypeCast { value, .. } => name_unnamed_arg(value, counter),
        _ => {}
    }
}

/// Builds one delta-rule version of `clause` for the in-SCC atom at body
/// position `fingerprint`: that atom is replaced by a scan of its delta
/// table, every later in-SCC positive atom is rewritten to a negation on
/// its own delta, the head is renamed to `new_r`, and a negation of the
/// original head is appended to keep only genuinely new tuples.
fn delta_rule_version(clause: &Clause, fingerprint: usize, scc: &HashSet<QualifiedName>) -> Clause {
    let mut rewritten = clause.clone();
    let original_head = rewritten.head.clone();

    for (i, lit) in rewritten.body.iter_mut().enumerate() {
        let Literal::Atom(atom) = lit else { continue };
        if !scc.contains(&atom.name) {
            continue;
        }
        if i == fingerprint {
            atom.name = delta_name(&atom.name);
        } else if i > fingerprint {
            let negated = Atom { name: delta_name(&atom.name), args: atom.args.clone(), loc: atom.loc.clone() };
            *lit = Literal::Negation(negated);
        }
    }

    if let Some(head) = &mut rewritten.head {
        head.name = new_name(&head.name);
    }
    if let Some(original) = original_head {
        rewritten.body.push(Literal::Negation(original));
    }
    rewritten.generated = true;
    rewritten
}

/// Lowers every non-recursive clause of `relation` into one `Insert` each.
fn lower_nonrecursive_clauses(relation: &Relation) -> Vec<Statement> {
    relation
        .clauses
        .iter()
        .filter(|c| !c.is_fact())
        .map(|c| Statement::Insert(lower_clause(c, 1)))
        .chain(relation.clauses.iter().filter(|c| c.is_fact()).map(|c| Statement::Insert(lower_clause(c, 1))))
        .collect()
}

/// Lowers one recursive strongly-connected component into its semi-naive
/// preamble, loop, and postamble.
fn lower_recursive_scc(program: &Program, members: &[QualifiedName]) -> Statement {
    let scc: HashSet<QualifiedName> = members.iter().cloned().collect();
    let mut preamble = Vec::new();
    let mut loop_body = Vec::new();
    let mut update = Vec::new();
    let mut postamble = Vec::new();
    let mut unnamed_counter: u64 = 0;

    for r in members {
        preamble.push(Statement::Create(r.clone()));
        preamble.push(Statement::Create(delta_name(r)));
        preamble.push(Statement::Create(new_name(r)));
    }

    for r in members {
        let Some(relation) = program.relation(r) else { continue };
        for clause in &relation.clauses {
            let in_scc_positions: Vec<usize> = clause
                .body
                .iter()
                .enumerate()
                .filter_map(|(i, lit)| match lit {
                    Literal::Atom(a) if scc.contains(&a.name) => Some(i),
                    _ => None,
                })
                .collect();

            if in_scc_positions.is_empty() {
                preamble.push(Statement::Insert(lower_clause(clause, 1)));
                continue;
            }

            for &fingerprint in &in_scc_positions {
                let mut version = delta_rule_version(clause, fingerprint, &scc);
                name_unnamed_variables(&mut version, &mut unnamed_counter);
                loop_body.push(Statement::Insert(lower_clause(&version, (fingerprint + 1) as u32)));
            }
        }
    }

    for r in members {
        preamble.push(Statement::Merge(delta_name(r), r.clone()));
    }

    for r in members {
        update.push(Statement::Merge(r.clone(), new_name(r)));
        update.push(Statement::Swap(delta_name(r), new_name(r)));
        update.push(Statement::Clear(new_name(r)));
    }

    let exit_condition = if members.len() == 1 {
        Condition::Empty(new_name(&members[0]))
    } else {
        Condition::And(members.iter().map(|r| Condition::Empty(new_name(r))).collect())
    };

    for r in members {
        postamble.push(Statement::Drop(delta_name(r)));
        postamble.push(Statement::Drop(new_name(r)));
    }

    Statement::Sequence(vec![
        Statement::Sequence(preamble),
        Statement::Loop {
            body: Box::new(Statement::Parallel(loop_body)),
            exit: Box::new(Statement::Exit(exit_condition)),
            update: Box::new(Statement::Sequence(update)),
        },
        Statement::Sequence(postamble),
    ])
}

/// Lowers the whole scheduled program into one top-level plan: creates
/// every relation, loads every input, runs each schedule step in order
/// (dropping relations right after they expire), and stores/printsizes
/// every output relation at the end.
pub fn lower(program: &Program, schedule: &[ScheduleStep]) -> Statement {
    let mut top = Vec::new();

    for name in program.relations.keys() {
        top.push(Statement::Create(name.clone()));
    }
    for relation in program.relations.values() {
        if relation.is_input() {
            top.push(Statement::Load(relation.name.clone()));
        }
    }

    let mut deferred_output = Vec::new();

    for step in schedule {
        if step.is_recursive {
            top.push(lower_recursive_scc(program, &step.computed));
        } else {
            for name in &step.computed {
                let Some(relation) = program.relation(name) else { continue };
                if !relation.is_input() {
                    top.extend(lower_nonrecursive_clauses(relation));
                }
            }
        }

        for name in &step.expired {
            let Some(relation) = program.relation(name) else { continue };
            if relation.is_computed() {
                deferred_output.push(relation_output_statement(relation));
            }
            top.push(Statement::Drop(name.clone()));
        }
    }

    for relation in program.relations.values() {
        if relation.is_computed() && !top.iter().any(|s| matches!(s, Statement::Drop(n) if n == &relation.name)) {
            deferred_output.push(relation_output_statement(relation));
        }
    }

    top.extend(deferred_output);
    Statement::Sequence(top)
}

fn relation_output_statement(relation: &Relation) -> Statement {
    if relation.qualifiers.contains(&Qualifier::PrintSize) {
        Statement::PrintSize(relation.name.clone())
    } else {
        Statement::Store(relation.name.clone())
    }
}
