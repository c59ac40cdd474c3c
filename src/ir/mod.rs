//! The typed IR node tree: programs, relations, clauses, literals,
//! arguments. Structural equality and deep clone fall directly out of
//! `#[derive(PartialEq, Clone)]` on owned, tree-shaped (no `Rc`/`Arc`)
//! node types: a closed set of variants in place of an open-ended
//! inheritance hierarchy, with tagged enums, `Box` children, and a
//! `print` method on each node.

pub mod rule_body;
pub mod visitor;

use std::collections::{HashMap, HashSet};

use crate::loc::{QualifiedName, SourceLocation};
use crate::types::TypeDecl;

pub use rule_body::RuleBody;
pub use visitor::{Mapper, Visitor};

/// Unary functors. `Ord` maps symbol to number; the rest are numeric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum UnaryOp {
    Ord,
    Neg,
    BNot,
    LNot,
}

/// Binary functors, numeric unless noted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Mod,
    BAnd,
    BOr,
    BXor,
    LAnd,
    LOr,
    /// String concatenation; the sole non-numeric binary functor.
    Cat,
}

impl BinaryOp {
    pub fn is_numeric(self) -> bool {
        !matches!(self, BinaryOp::Cat)
    }
}

/// Constraint (comparison) operators, including their negated forms so
/// `RuleBody::negate` can flip in place without synthesising a wrapper node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ConstraintOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Match,
    NotMatch,
    Contains,
    NotContains,
}

impl ConstraintOp {
    pub fn negated(self) -> Self {
        match self {
            ConstraintOp::Eq => ConstraintOp::Ne,
            ConstraintOp::Ne => ConstraintOp::Eq,
            ConstraintOp::Lt => ConstraintOp::Ge,
            ConstraintOp::Ge => ConstraintOp::Lt,
            ConstraintOp::Le => ConstraintOp::Gt,
            ConstraintOp::Gt => ConstraintOp::Le,
            ConstraintOp::Match => ConstraintOp::NotMatch,
            ConstraintOp::NotMatch => ConstraintOp::Match,
            ConstraintOp::Contains => ConstraintOp::NotContains,
            ConstraintOp::NotContains => ConstraintOp::Contains,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum AggregateOp {
    Min,
    Max,
    Count,
    Sum,
}

/// Expression-level nodes: variables, constants, functor applications,
/// record constructors, casts, and aggregates.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Argument {
    Variable {
        name: String,
        loc: SourceLocation,
    },
    /// A fresh existential (`_`). Never unified with another `Unnamed` —
    /// call sites that need to treat one as a bindable variable (e.g.
    /// recursive-clause lowering, record destructuring) must first rename
    /// it to a unique synthetic variable name.
    Unnamed {
        loc: SourceLocation,
    },
    /// Forbidden in recursive clauses and in facts.
    Counter {
        loc: SourceLocation,
    },
    NumberConst {
        value: i64,
        loc: SourceLocation,
    },
    StringConst {
        value: String,
        loc: SourceLocation,
    },
    /// The null record.
    NullConst {
        loc: SourceLocation,
    },
    UnaryFun {
        op: UnaryOp,
        arg: Box<Argument>,
        loc: SourceLocation,
    },
    BinaryFun {
        op: BinaryOp,
        lhs: Box<Argument>,
        rhs: Box<Argument>,
        loc: SourceLocation,
    },
    /// No ternary functor is named in the operator catalogue; `op` is an
    /// opaque name reserved for a future surface extension.
    TernaryFun {
        op: String,
        a: Box<Argument>,
        b: Box<Argument>,
        c: Box<Argument>,
        loc: SourceLocation,
    },
    RecordInit {
        args: Vec<Argument>,
        loc: SourceLocation,
    },
    TypeCast {
        value: Box<Argument>,
        type_name: String,
        loc: SourceLocation,
    },
    Aggregator {
        op: AggregateOp,
        target: Option<Box<Argument>>,
        body: Vec<Literal>,
        loc: SourceLocation,
    },
}

impl Argument {
    pub fn loc(&self) -> &SourceLocation {
        match self {
            Argument::Variable { loc, .. }
            | Argument::Unnamed { loc }
            | Argument::Counter { loc }
            | Argument::NumberConst { loc, .. }
            | Argument::StringConst { loc, .. }
            | Argument::NullConst { loc }
            | Argument::UnaryFun { loc, .. }
            | Argument::BinaryFun { loc, .. }
            | Argument::TernaryFun { loc, .. }
            | Argument::RecordInit { loc, .. }
            | Argument::TypeCast { loc, .. }
            | Argument::Aggregator { loc, .. } => loc,
        }
    }

    pub fn variable(name: impl Into<String>, loc: SourceLocation) -> Self {
        Argument::Variable { name: name.into(), loc }
    }

    pub fn is_constant(&self) -> bool {
        matches!(
            self,
            Argument::NumberConst { .. } | Argument::StringConst { .. } | Argument::NullConst { .. }
        ) || matches!(self, Argument::RecordInit { args, .. } if args.iter().all(Argument::is_constant))
    }

    /// Every variable name occurring anywhere inside this argument, in
    /// left-to-right order (duplicates included).
    pub fn variable_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut collect = |arg: &Argument| {
            if let Argument::Variable { name, .. } = arg {
                names.push(name.clone());
            }
        };
        visitor::walk_argument_pre(self, &mut collect);
        names
    }

    /// Renders syntax that would re-parse back to an equivalent node.
    pub fn print(&self) -> String {
        match self {
            Argument::Variable { name, .. } => name.clone(),
            Argument::Unnamed { .. } => "_".to_string(),
            Argument::Counter { .. } => "$".to_string(),
            Argument::NumberConst { value, .. } => value.to_string(),
            Argument::StringConst { value, .. } => format!("\"{value}\""),
            Argument::NullConst { .. } => "nil".to_string(),
            Argument::UnaryFun { op, arg, .. } => format!("{}{}", unary_symbol(*op), arg.print()),
            Argument::BinaryFun { op, lhs, rhs, .. } => {
                format!("({} {} {})", lhs.print(), binary_symbol(*op), rhs.print())
            }
            Argument::TernaryFun { op, a, b, c, .. } => {
                format!("{op}({}, {}, {})", a.print(), b.print(), c.print())
            }
            Argument::RecordInit { args, .. } => {
                format!("[{}]", args.iter().map(Argument::print).collect::<Vec<_>>().join(", "))
            }
            Argument::TypeCast { value, type_name, .. } => format!("as({}, {type_name})", value.print()),
            Argument::Aggregator { op, target, body, .. } => {
                let op_name = match op {
                    AggregateOp::Min => "min",
                    AggregateOp::Max => "max",
                    AggregateOp::Count => "count",
                    AggregateOp::Sum => "sum",
                };
                let target = target.as_ref().map(|t| format!("{} : ", t.print())).unwrap_or_default();
                let body = body.iter().map(Literal::print).collect::<Vec<_>>().join(", ");
                format!("{op_name} : {target}{{ {body} }}")
            }
        }
    }
}

pub fn unary_symbol(op: UnaryOp) -> &'static str {
    match op {
        UnaryOp::Ord => "ord ",
        UnaryOp::Neg => "-",
        UnaryOp::BNot => "bnot ",
        UnaryOp::LNot => "lnot ",
    }
}

pub fn binary_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Pow => "^",
        BinaryOp::Mod => "%",
        BinaryOp::BAnd => "band",
        BinaryOp::BOr => "bor",
        BinaryOp::BXor => "bxor",
        BinaryOp::LAnd => "land",
        BinaryOp::LOr => "lor",
        BinaryOp::Cat => "cat",
    }
}

/// A relation reference, `r(t1, ..., tn)`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Atom {
    pub name: QualifiedName,
    pub args: Vec<Argument>,
    pub loc: SourceLocation,
}

impl Atom {
    pub fn new(name: QualifiedName, args: Vec<Argument>, loc: SourceLocation) -> Self {
        Atom { name, args, loc }
    }

    pub fn arity(&self) -> usize {
        self.args.len()
    }

    pub fn print(&self) -> String {
        format!(
            "{}({})",
            self.name,
            self.args.iter().map(Argument::print).collect::<Vec<_>>().join(", ")
        )
    }
}

/// Body literals: positive atoms, negated atoms, and constraints.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Literal {
    Atom(Atom),
    Negation(Atom),
    Constraint {
        op: ConstraintOp,
        lhs: Argument,
        rhs: Argument,
        loc: SourceLocation,
    },
}

impl Literal {
    pub fn loc(&self) -> &SourceLocation {
        match self {
            Literal::Atom(a) | Literal::Negation(a) => &a.loc,
            Literal::Constraint { loc, .. } => loc,
        }
    }

    pub fn as_atom(&self) -> Option<&Atom> {
        match self {
            Literal::Atom(a) => Some(a),
            _ => None,
        }
    }

    /// The referenced relation name, for positive and negated atoms.
    pub fn relation_name(&self) -> Option<&QualifiedName> {
        match self {
            Literal::Atom(a) | Literal::Negation(a) => Some(&a.name),
            Literal::Constraint { .. } => None,
        }
    }

    pub fn is_negative(&self) -> bool {
        matches!(self, Literal::Negation(_))
    }

    pub fn print(&self) -> String {
        match self {
            Literal::Atom(a) => a.print(),
            Literal::Negation(a) => format!("!{}", a.print()),
            Literal::Constraint { op, lhs, rhs, .. } => {
                format!("{} {} {}", lhs.print(), constraint_symbol(*op), rhs.print())
            }
        }
    }
}

pub fn constraint_symbol(op: ConstraintOp) -> &'static str {
    match op {
        ConstraintOp::Eq => "=",
        ConstraintOp::Ne => "!=",
        ConstraintOp::Lt => "<",
        ConstraintOp::Le => "<=",
        ConstraintOp::Gt => ">",
        ConstraintOp::Ge => ">=",
        ConstraintOp::Match => "match",
        ConstraintOp::NotMatch => "!match",
        ConstraintOp::Contains => "contains",
        ConstraintOp::NotContains => "!contains",
    }
}

/// An execution plan: rule-version number -> permutation of body-atom
/// indices (0-based internally; 1-based in surface syntax).
pub type ExecutionPlan = HashMap<u32, Vec<usize>>;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Clause {
    pub head: Option<Atom>,
    pub body: Vec<Literal>,
    pub plan: Option<ExecutionPlan>,
    pub fixed_plan: bool,
    /// Set on clauses synthesised by desugaring; suppresses the
    /// singleton-variable warning.
    pub generated: bool,
    pub loc: SourceLocation,
}

impl Clause {
    pub fn fact(head: Atom, loc: SourceLocation) -> Self {
        Clause {
            head: Some(head),
            body: Vec::new(),
            plan: None,
            fixed_plan: false,
            generated: false,
            loc,
        }
    }

    pub fn rule(head: Atom, body: Vec<Literal>, loc: SourceLocation) -> Self {
        Clause {
            head: Some(head),
            body,
            plan: None,
            fixed_plan: false,
            generated: false,
            loc,
        }
    }

    pub fn is_fact(&self) -> bool {
        self.head.is_some() && self.body.is_empty() && !self.contains_aggregator()
    }

    pub fn is_rule(&self) -> bool {
        self.head.is_some() && !self.body.is_empty()
    }

    pub fn contains_aggregator(&self) -> bool {
        let mut found = false;
        for lit in &self.body {
            if let Literal::Constraint { lhs, rhs, .. } = lit {
                found |= contains_aggregator_arg(lhs) || contains_aggregator_arg(rhs);
            }
        }
        if let Some(head) = &self.head {
            for arg in &head.args {
                found |= contains_aggregator_arg(arg);
            }
        }
        found
    }

    pub fn positive_atoms(&self) -> impl Iterator<Item = &Atom> {
        self.body.iter().filter_map(|l| match l {
            Literal::Atom(a) => Some(a),
            _ => None,
        })
    }

    pub fn negated_atoms(&self) -> impl Iterator<Item = &Atom> {
        self.body.iter().filter_map(|l| match l {
            Literal::Negation(a) => Some(a),
            _ => None,
        })
    }

    /// Every relation name referenced anywhere in the body, including
    /// inside nested aggregator bodies.
    pub fn referenced_relations(&self) -> HashSet<QualifiedName> {
        let mut out = HashSet::new();
        for lit in &self.body {
            collect_referenced_relations_literal(lit, &mut out);
        }
        out
    }
}

fn contains_aggregator_arg(arg: &Argument) -> bool {
    let mut found = false;
    visitor::walk_argument_pre(arg, &mut |a| {
        if matches!(a, Argument::Aggregator { .. }) {
            found = true;
        }
    });
    found
}

fn collect_referenced_relations_literal(lit: &Literal, out: &mut HashSet<QualifiedName>) {
    match lit {
        Literal::Atom(a) | Literal::Negation(a) => {
            out.insert(a.name.clone());
            for arg in &a.args {
                collect_referenced_relations_arg(arg, out);
            }
        }
        Literal::Constraint { lhs, rhs, .. } => {
            collect_referenced_relations_arg(lhs, out);
            collect_referenced_relations_arg(rhs, out);
        }
    }
}

fn collect_referenced_relations_arg(arg: &Argument, out: &mut HashSet<QualifiedName>) {
    if let Argument::Aggregator { body, .. } = arg {
        for lit in body {
            collect_referenced_relations_literal(lit, out);
        }
    }
    visitor::walk_argument_children(arg, &mut |child| collect_referenced_relations_arg(child, out));
}

/// Relation qualifiers; a relation may carry several at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Qualifier {
    Input,
    Output,
    PrintSize,
    Overridable,
    Eqrel,
    Btree,
    Brie,
    Data,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Attribute {
    pub name: String,
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Relation {
    pub name: QualifiedName,
    pub attributes: Vec<Attribute>,
    pub qualifiers: HashSet<Qualifier>,
    pub clauses: Vec<Clause>,
    pub loc: SourceLocation,
}

impl Relation {
    pub fn new(name: QualifiedName, attributes: Vec<Attribute>, loc: SourceLocation) -> Self {
        Relation {
            name,
            attributes,
            qualifiers: HashSet::new(),
            clauses: Vec::new(),
            loc,
        }
    }

    pub fn arity(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_input(&self) -> bool {
        self.qualifiers.contains(&Qualifier::Input)
    }

    pub fn is_computed(&self) -> bool {
        self.qualifiers.contains(&Qualifier::Output) || self.qualifiers.contains(&Qualifier::PrintSize)
    }

    pub fn is_eqrel(&self) -> bool {
        self.qualifiers.contains(&Qualifier::Eqrel)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum IoKind {
    Input,
    Output,
    PrintSize,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct IoDirective {
    pub kind: IoKind,
    pub relation: QualifiedName,
    pub params: Vec<(String, String)>,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ComponentType {
    pub name: String,
    pub type_params: Vec<String>,
}

/// A base reference with actual parameters, e.g. `Base<symbol>`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ComponentRef {
    pub name: String,
    pub actual_params: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Component {
    pub component_type: ComponentType,
    pub bases: Vec<ComponentRef>,
    pub nested_types: Vec<(String, TypeDecl)>,
    pub relations: Vec<Relation>,
    pub io_directives: Vec<IoDirective>,
    pub nested_components: Vec<Component>,
    pub nested_instantiations: Vec<Instantiation>,
    /// Short relation names declared with `.override` inside this component.
    pub overridden: HashSet<String>,
    pub loc: SourceLocation,
}

impl Component {
    pub fn new(component_type: ComponentType, loc: SourceLocation) -> Self {
        Component {
            component_type,
            bases: Vec::new(),
            nested_types: Vec::new(),
            relations: Vec::new(),
            io_directives: Vec::new(),
            nested_components: Vec::new(),
            nested_instantiations: Vec::new(),
            overridden: HashSet::new(),
            loc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Instantiation {
    pub instance_name: String,
    pub component_type: String,
    pub actual_params: Vec<String>,
    pub loc: SourceLocation,
}

/// The whole program: declared types, relations, components,
/// instantiations, and clauses/directives not yet bound to a relation
/// (orphans produced by component instantiation, rebound in a later step).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Program {
    pub types: HashMap<String, TypeDecl>,
    pub relations: HashMap<QualifiedName, Relation>,
    pub components: Vec<Component>,
    pub instantiations: Vec<Instantiation>,
    pub orphan_clauses: Vec<Clause>,
    pub orphan_io: Vec<IoDirective>,
}

impl Program {
    pub fn new() -> Self {
        Program::default()
    }

    pub fn relation(&self, name: &QualifiedName) -> Option<&Relation> {
        self.relations.get(name)
    }

    pub fn relation_mut(&mut self, name: &QualifiedName) -> Option<&mut Relation> {
        self.relations.get_mut(name)
    }

    pub fn all_clauses(&self) -> impl Iterator<Item = &Clause> {
        self.relations.values().flat_map(|r| r.clauses.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loc::Point;

    fn loc() -> SourceLocation {
        SourceLocation::new("t.dl", Point::new(1, 1), Point::new(1, 1))
    }

    #[test]
    fn deep_clone_is_structurally_equal_but_a_fresh_allocation() {
        let arg = Argument::BinaryFun {
            op: BinaryOp::Add,
            lhs: Box::new(Argument::variable("x", loc())),
            rhs: Box::new(Argument::NumberConst { value: 1, loc: loc() }),
            loc: loc(),
        };
        let cloned = arg.clone();
        assert_eq!(arg, cloned);
        if let (Argument::BinaryFun { lhs: a, .. }, Argument::BinaryFun { lhs: b, .. }) = (&arg, &cloned) {
            assert!(!std::ptr::eq(a.as_ref(), b.as_ref()));
        } else {
            unreachable!();
        }
    }

    #[test]
    fn constraint_negation_is_involutive() {
        for op in [
            ConstraintOp::Eq,
            ConstraintOp::Lt,
            ConstraintOp::Le,
            ConstraintOp::Match,
            ConstraintOp::Contains,
        ] {
            assert_eq!(op.negated().negated(), op);
        }
    }

    #[test]
    fn fact_has_no_body_and_no_aggregator() {
        let head = Atom::new(QualifiedName::new("r"), vec![Argument::NumberConst { value: 1, loc: loc() }], loc());
        let clause = Clause::fact(head, loc());
        assert!(clause.is_fact());
        assert!(!clause.is_rule());
    }

    #[test]
    fn referenced_relations_includes_nested_aggregator_bodies() {
        let inner_atom = Atom::new(QualifiedName::new("e"), vec![], loc());
        let agg = Argument::Aggregator {
            op: AggregateOp::Count,
            target: None,
            body: vec![Literal::Atom(inner_atom)],
            loc: loc(),
        };
        let head = Atom::new(QualifiedName::new("out"), vec![agg.clone()], loc());
        let clause = Clause::rule(
            head,
            vec![Literal::Constraint {
                op: ConstraintOp::Eq,
                lhs: Argument::variable("n", loc()),
                rhs: agg,
                loc: loc(),
            }],
            loc(),
        );
        let refs = clause.referenced_relations();
        assert!(refs.contains(&QualifiedName::new("e")));
    }

    #[test]
    fn print_round_trips_a_simple_rule_body() {
        let atom = Atom::new(
            QualifiedName::new("r"),
            vec![Argument::variable("x", loc()), Argument::variable("y", loc())],
            loc(),
        );
        assert_eq!(atom.print(), "r(x, y)");
    }
}
