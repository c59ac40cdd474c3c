//! Depth-first visitation and the substitution mapper.
//!
//! The source's `Visitor` uses RTTI dispatch lifted by category (Literal,
//! Argument, Functor); here that becomes exhaustive `match` over the closed
//! `Argument`/`Literal` enums, driven by free `walk_*` functions so callers
//! can plug in pre-order or post-order callbacks without implementing a
//! trait for one-off traversals, and a `Visitor`/`Mapper` trait pair for
//! stateful passes that need to recurse themselves.

use super::{Argument, Atom, Clause, Literal};

/// Pre-order: call `f` on every argument node, parent before children.
pub fn walk_argument_pre(arg: &Argument, f: &mut impl FnMut(&Argument)) {
    f(arg);
    walk_argument_children(arg, &mut |child| walk_argument_pre(child, f));
}

/// Post-order: call `f` on every argument node, children before parent.
pub fn walk_argument_post(arg: &Argument, f: &mut impl FnMut(&Argument)) {
    walk_argument_children(arg, &mut |child| walk_argument_post(child, f));
    f(arg);
}

/// Invokes `f` once per immediate child argument (one level, non-recursive);
/// used by both traversal orders above and by call sites that only need
/// direct children (e.g. relation collection in the aggregator desugaring).
pub fn walk_argument_children(arg: &Argument, f: &mut impl FnMut(&Argument)) {
    match arg {
        Argument::Variable { .. }
        | Argument::Unnamed { .. }
        | Argument::Counter { .. }
        | Argument::NumberConst { .. }
        | Argument::StringConst { .. }
        | Argument::NullConst { .. } => {}
        Argument::UnaryFun { arg, .. } => f(arg),
        Argument::BinaryFun { lhs, rhs, .. } => {
            f(lhs);
            f(rhs);
        }
        Argument::TernaryFun { a, b, c, .. } => {
            f(a);
            f(b);
            f(c);
        }
        Argument::RecordInit { args, .. } => {
            for a in args {
                f(a);
            }
        }
        Argument::TypeCast { value, .. } => f(value),
        Argument::Aggregator { target, .. } => {
            if let Some(target) = target {
                f(target);
            }
            // Aggregator body literals are a different category (Literal,
            // not Argument); callers that need them use
            // `walk_literal_pre`/`post` on each body literal directly.
        }
    }
}

pub fn walk_literal_pre(lit: &Literal, f: &mut impl FnMut(&Literal)) {
    f(lit);
    if let Literal::Atom(a) | Literal::Negation(a) = lit {
        for arg in &a.args {
            walk_argument_pre(arg, &mut |_| {});
        }
    }
}

/// A stateful visitor trait; override the category method you care about,
/// the default implementations recurse into children.
pub trait Visitor {
    fn visit_argument(&mut self, arg: &Argument) {
        walk_argument_children(arg, &mut |child| self.visit_argument(child));
        if let Argument::Aggregator { body, .. } = arg {
            for lit in body {
                self.visit_literal(lit);
            }
        }
    }

    fn visit_literal(&mut self, lit: &Literal) {
        match lit {
            Literal::Atom(a) | Literal::Negation(a) => {
                for arg in &a.args {
                    self.visit_argument(arg);
                }
            }
            Literal::Constraint { lhs, rhs, .. } => {
                self.visit_argument(lhs);
                self.visit_argument(rhs);
            }
        }
    }

    fn visit_clause(&mut self, clause: &Clause) {
        if let Some(head) = &clause.head {
            for arg in &head.args {
                self.visit_argument(arg);
            }
        }
        for lit in &clause.body {
            self.visit_literal(lit);
        }
    }
}

/// A rewriting mapper: consumes an owned node, returns an owned
/// (possibly different) node in its place. `apply` recurses into children
/// first (bottom-up) then lets `rewrite_*` replace the node itself.
pub trait Mapper {
    fn rewrite_argument(&mut self, arg: Argument) -> Argument {
        arg
    }

    fn apply_argument(&mut self, arg: Argument) -> Argument {
        let arg = map_argument_children(arg, self);
        self.rewrite_argument(arg)
    }

    fn apply_literal(&mut self, lit: Literal) -> Literal {
        match lit {
            Literal::Atom(a) => Literal::Atom(self.apply_atom(a)),
            Literal::Negation(a) => Literal::Negation(self.apply_atom(a)),
            Literal::Constraint { op, lhs, rhs, loc } => Literal::Constraint {
                op,
                lhs: self.apply_argument(lhs),
                rhs: self.apply_argument(rhs),
                loc,
            },
        }
    }

    fn apply_atom(&mut self, atom: Atom) -> Atom {
        Atom {
            name: atom.name,
            args: atom.args.into_iter().map(|a| self.apply_argument(a)).collect(),
            loc: atom.loc,
        }
    }

    fn apply_clause(&mut self, clause: Clause) -> Clause {
        Clause {
            head: clause.head.map(|h| self.apply_atom(h)),
            body: clause.body.into_iter().map(|l| self.apply_literal(l)).collect(),
            ..clause
        }
    }
}

fn map_argument_children<M: Mapper + ?Sized>(arg: Argument, m: &mut M) -> Argument {
    match arg {
        Argument::UnaryFun { op, arg, loc } => Argument::UnaryFun {
            op,
            arg: Box::new(m.apply_argument(*arg)),
            loc,
        },
        Argument::BinaryFun { op, lhs, rhs, loc } => Argument::BinaryFun {
            op,
            lhs: Box::new(m.apply_argument(*lhs)),
            rhs: Box::new(m.apply_argument(*rhs)),
            loc,
        },
        Argument::TernaryFun { op, a, b, c, loc } => Argument::TernaryFun {
            op,
            a: Box::new(m.apply_argument(*a)),
            b: Box::new(m.apply_argument(*b)),
            c: Box::new(m.apply_argument(*c)),
            loc,
        },
        Argument::RecordInit { args, loc } => Argument::RecordInit {
            args: args.into_iter().map(|a| m.apply_argument(a)).collect(),
            loc,
        },
        Argument::TypeCast { value, type_name, loc } => Argument::TypeCast {
            value: Box::new(m.apply_argument(*value)),
            type_name,
            loc,
        },
        Argument::Aggregator { op, target, body, loc } => Argument::Aggregator {
            op,
            target: target.map(|t| Box::new(m.apply_argument(*t))),
            body: body.into_iter().map(|l| m.apply_literal(l)).collect(),
            loc,
        },
        other @ (Argument::Variable { .. }
        | Argument::Unnamed { .. }
        | Argument::Counter { .. }
        | Argument::NumberConst { .. }
        | Argument::StringConst { .. }
        | Argument::NullConst { .. }) => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loc::{Point, SourceLocation};

    fn loc() -> SourceLocation {
        SourceLocation::new("t.dl", Point::new(1, 1), Point::new(1, 1))
    }

    struct CountVariables(usize);
    impl Visitor for CountVariables {
        fn visit_argument(&mut self, arg: &Argument) {
            if matches!(arg, Argument::Variable { .. }) {
                self.0 += 1;
            }
            walk_argument_children(arg, &mut |child| self.visit_argument(child));
        }
    }

    #[test]
    fn visitor_counts_nested_variables() {
        let arg = Argument::BinaryFun {
            op: super::super::BinaryOp::Add,
            lhs: Box::new(Argument::variable("x", loc())),
            rhs: Box::new(Argument::variable("y", loc())),
            loc: loc(),
        };
        let mut counter = CountVariables(0);
        counter.visit_argument(&arg);
        assert_eq!(counter.0, 2);
    }

    struct RenameX;
    impl Mapper for RenameX {
        fn rewrite_argument(&mut self, arg: Argument) -> Argument {
            match arg {
                Argument::Variable { name, loc } if name == "x" => Argument::Variable {
                    name: "x_renamed".to_string(),
                    loc,
                },
                other => other,
            }
        }
    }

    #[test]
    fn mapper_rewrites_nested_nodes_bottom_up() {
        let arg = Argument::UnaryFun {
            op: super::super::UnaryOp::Neg,
            arg: Box::new(Argument::variable("x", loc())),
            loc: loc(),
        };
        let rewritten = RenameX.apply_argument(arg);
        if let Argument::UnaryFun { arg, .. } = rewritten {
            assert_eq!(*arg, Argument::variable("x_renamed", loc()));
        } else {
            unreachable!();
        }
    }

    #[test]
    fn substitution_commutes_with_clone() {
        let original = Argument::variable("x", loc());
        let mut m1 = RenameX;
        let mut m2 = RenameX;
        let applied_then_cloned = m1.apply_argument(original.clone());
        let cloned_then_applied = m2.apply_argument(original.clone());
        assert_eq!(applied_then_cloned, cloned_then_applied);
    }
}
