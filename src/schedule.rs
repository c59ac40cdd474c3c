//! Precedence graph, SCC computation (Gabow's algorithm), topological
//! order, and the per-SCC evaluation schedule.
//!
//! SCC computation follows the standard two-stack Gabow presentation.
//! Schedule liveness expires a relation at the latest step after all its
//! uses, rather than the reverse-iteration bookkeeping of a straight
//! line-for-line port.

use std::collections::{HashMap, HashSet};

use crate::ir::Program;
use crate::loc::{QualifiedName, SourceLocation};

/// Why an edge `r -> s` exists: some clause defining `r` references `s`
/// positively, negatively, or inside an aggregator body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Positive,
    Negative,
    Aggregation,
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub target: QualifiedName,
    pub kind: EdgeKind,
    /// Location of the literal (atom or aggregator body atom) that
    /// introduced this edge, for diagnostics that need to point at the
    /// offending reference rather than just name the relations involved.
    pub loc: SourceLocation,
}

/// `nodes = relations; an edge r -> s iff some clause defining r has s in
/// its body`.
#[derive(Debug, Clone, Default)]
pub struct PrecedenceGraph {
    pub edges: HashMap<QualifiedName, Vec<Edge>>,
}

impl PrecedenceGraph {
    pub fn relations(&self) -> HashSet<QualifiedName> {
        let mut out: HashSet<QualifiedName> = self.edges.keys().cloned().collect();
        for edges in self.edges.values() {
            out.extend(edges.iter().map(|e| e.target.clone()));
        }
        out
    }

    pub fn has_self_loop(&self, r: &QualifiedName) -> bool {
        self.edges.get(r).is_some_and(|es| es.iter().any(|e| &e.target == r))
    }
}

pub fn build_precedence_graph(program: &Program) -> PrecedenceGraph {
    let mut graph = PrecedenceGraph::default();
    for relation in program.relations.values() {
        let entry = graph.edges.entry(relation.name.clone()).or_default();
        for clause in &relation.clauses {
            for lit in &clause.body {
                collect_edges(lit, entry);
            }
            if let Some(head) = &clause.head {
                for arg in &head.args {
                    collect_aggregator_edges_in_arg(arg, entry);
                }
            }
        }
    }
    graph
}

fn collect_edges(lit: &crate::ir::Literal, out: &mut Vec<Edge>) {
    use crate::ir::Literal;
    match lit {
        Literal::Atom(a) => out.push(Edge { target: a.name.clone(), kind: EdgeKind::Positive, loc: a.loc.clone() }),
        Literal::Negation(a) => out.push(Edge { target: a.name.clone(), kind: EdgeKind::Negative, loc: a.loc.clone() }),
        Literal::Constraint { lhs, rhs, .. } => {
            collect_aggregator_edges_in_arg(lhs, out);
            collect_aggregator_edges_in_arg(rhs, out);
        }
    }
}

fn collect_aggregator_edges_in_arg(arg: &crate::ir::Argument, out: &mut Vec<Edge>) {
    use crate::ir::Argument;
    if let Argument::Aggregator { body, .. } = arg {
        for lit in body {
            match lit {
                crate::ir::Literal::Atom(a) | crate::ir::Literal::Negation(a) => {
                    out.push(Edge { target: a.name.clone(), kind: EdgeKind::Aggregation, loc: a.loc.clone() });
                }
                crate::ir::Literal::Constraint { lhs, rhs, .. } => {
                    collect_aggregator_edges_in_arg(lhs, out);
                    collect_aggregator_edges_in_arg(rhs, out);
                }
            }
        }
    }
    crate::ir::visitor::walk_argument_children(arg, &mut |child| collect_aggregator_edges_in_arg(child, out));
}

/// An SCC of the precedence graph; relations are recorded in discovery
/// order (not meaningful beyond determinism).
pub type Scc = Vec<QualifiedName>;

/// Gabow's two-stack SCC algorithm: `path` holds the current DFS path,
/// `boundaries` holds candidate SCC roots annotated implicitly by their
/// position (we look up `preorder` to compare), `preorder` assigns a
/// strictly increasing discovery index to each vertex the first time it is
/// visited.
pub struct Gabow<'a> {
    graph: &'a PrecedenceGraph,
    preorder: HashMap<QualifiedName, usize>,
    counter: usize,
    path: Vec<QualifiedName>,
    boundaries: Vec<QualifiedName>,
    assigned: HashSet<QualifiedName>,
    sccs: Vec<Scc>,
}

impl<'a> Gabow<'a> {
    pub fn new(graph: &'a PrecedenceGraph) -> Self {
        Gabow {
            graph,
            preorder: HashMap::new(),
            counter: 0,
            path: Vec::new(),
            boundaries: Vec::new(),
            assigned: HashSet::new(),
            sccs: Vec::new(),
        }
    }

    pub fn run(mut self) -> Vec<Scc> {
        let mut nodes: Vec<QualifiedName> = self.graph.relations().into_iter().collect();
        nodes.sort();
        for node in nodes {
            if !self.preorder.contains_key(&node) {
                self.visit(&node);
            }
        }
        self.sccs
    }

    fn visit(&mut self, v: &QualifiedName) {
        self.preorder.insert(v.clone(), self.counter);
        self.counter += 1;
        self.path.push(v.clone());
        self.boundaries.push(v.clone());

        if let Some(edges) = self.graph.edges.get(v) {
            let targets: Vec<QualifiedName> = edges.iter().map(|e| e.target.clone()).collect();
            for w in targets {
                if !self.preorder.contains_key(&w) {
                    self.visit(&w);
                } else if !self.assigned.contains(&w) {
                    let w_order = self.preorder[&w];
                    while let Some(top) = self.boundaries.last() {
                        if self.preorder[top] > w_order {
                            self.boundaries.pop();
                        } else {
                            break;
                        }
                    }
                }
            }
        }

        if self.boundaries.last() == Some(v) {
            let mut scc = Vec::new();
            while let Some(w) = self.path.pop() {
                self.assigned.insert(w.clone());
                let is_v = w == *v;
                scc.push(w);
                if is_v {
                    break;
                }
            }
            self.sccs.push(scc);
            self.boundaries.pop();
        }
    }
}

pub fn compute_sccs(graph: &PrecedenceGraph) -> Vec<Scc> {
    Gabow::new(graph).run()
}

/// DFS post-order of the SCC condensation graph: the condensation edge
/// `i -> j` means SCC `i` depends on SCC `j` (a use-before-def edge), so a
/// plain post-order already visits `j` before `i` and is dependency-first
/// -- safe to evaluate left to right as returned.
///
/// # Panics
/// Panics if the condensation graph is not a DAG (a gray-on-gray revisit),
/// which would indicate a bug in SCC computation, not malformed input.
pub fn topological_order(graph: &PrecedenceGraph, sccs: &[Scc]) -> Vec<usize> {
    let mut scc_of: HashMap<QualifiedName, usize> = HashMap::new();
    for (i, scc) in sccs.iter().enumerate() {
        for r in scc {
            scc_of.insert(r.clone(), i);
        }
    }

    let n = sccs.len();
    let mut condensation: Vec<HashSet<usize>> = vec![HashSet::new(); n];
    for (i, scc) in sccs.iter().enumerate() {
        for r in scc {
            if let Some(edges) = graph.edges.get(r) {
                for edge in edges {
                    if let Some(&j) = scc_of.get(&edge.target) {
                        if j != i {
                            condensation[i].insert(j);
                        }
                    }
                }
            }
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        White,
        Gray,
        Black,
    }
    let mut marks = vec![Mark::White; n];
    let mut order = Vec::with_capacity(n);

    fn visit(u: usize, condensation: &[HashSet<usize>], marks: &mut [Mark], order: &mut Vec<usize>) {
        marks[u] = Mark::Gray;
        let mut targets: Vec<usize> = condensation[u].iter().copied().collect();
        targets.sort_unstable();
        for v in targets {
            match marks[v] {
                Mark::White => visit(v, condensation, marks, order),
                Mark::Gray => panic!("precedence condensation graph is not a DAG"),
                Mark::Black => {}
            }
        }
        marks[u] = Mark::Black;
        order.push(u);
    }

    for u in 0..n {
        if marks[u] == Mark::White {
            visit(u, &condensation, &mut marks, &mut order);
        }
    }
    // `order` is already dependency-first: condensation edge i -> j means
    // i depends on j, and post-order visits j (the dependency) before i.
    order
}

#[derive(Debug, Clone)]
pub struct ScheduleStep {
    pub computed: Vec<QualifiedName>,
    pub expired: Vec<QualifiedName>,
    pub is_recursive: bool,
}

/// Builds the per-SCC schedule in evaluation order.
pub fn build_schedule(graph: &PrecedenceGraph, sccs: &[Scc], order: &[usize]) -> Vec<ScheduleStep> {
    let ordered_sccs: Vec<&Scc> = order.iter().map(|&i| &sccs[i]).collect();

    let mut last_use: HashMap<QualifiedName, usize> = HashMap::new();
    for (step, scc) in ordered_sccs.iter().enumerate() {
        for r in scc.iter() {
            last_use.entry(r.clone()).or_insert(step);
        }
        for r in scc.iter() {
            if let Some(edges) = graph.edges.get(r) {
                for edge in edges {
                    let entry = last_use.entry(edge.target.clone()).or_insert(step);
                    if step > *entry {
                        *entry = step;
                    }
                }
            }
        }
    }

    ordered_sccs
        .iter()
        .enumerate()
        .map(|(step, scc)| {
            let is_recursive = scc.len() > 1 || scc.iter().any(|r| graph.has_self_loop(r));
            let expired = last_use
                .iter()
                .filter(|(_, &last)| last == step)
                .map(|(r, _)| r.clone())
                .collect();
            ScheduleStep {
                computed: (*scc).clone(),
                expired,
                is_recursive,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Atom, Clause, Literal, Relation};
    use crate::loc::{Point, SourceLocation};

    fn loc() -> SourceLocation {
        SourceLocation::new("t.dl", Point::new(1, 1), Point::new(1, 1))
    }

    fn rel(name: &str) -> QualifiedName {
        QualifiedName::new(name)
    }

    /// `e` is non-recursive, `r` is a self-recursive SCC of size one
    ///.
    fn transitive_closure_program() -> Program {
        let mut program = Program::new();
        let e = Relation::new(rel("e"), vec![], loc());
        let mut r = Relation::new(rel("r"), vec![], loc());
        r.clauses.push(Clause::rule(
            Atom::new(rel("r"), vec![], loc()),
            vec![Literal::Atom(Atom::new(rel("e"), vec![], loc()))],
            loc(),
        ));
        r.clauses.push(Clause::rule(
            Atom::new(rel("r"), vec![], loc()),
            vec![
                Literal::Atom(Atom::new(rel("r"), vec![], loc())),
                Literal::Atom(Atom::new(rel("e"), vec![], loc())),
            ],
            loc(),
        ));
        program.relations.insert(e.name.clone(), e);
        program.relations.insert(r.name.clone(), r);
        program
    }

    #[test]
    fn self_recursive_relation_forms_its_own_scc_marked_recursive() {
        let program = transitive_closure_program();
        let graph = build_precedence_graph(&program);
        let sccs = compute_sccs(&graph);
        let order = topological_order(&graph, &sccs);
        let schedule = build_schedule(&graph, &sccs, &order);

        let r_step = schedule.iter().find(|s| s.computed.contains(&rel("r"))).unwrap();
        assert!(r_step.is_recursive);
        let e_step = schedule.iter().find(|s| s.computed.contains(&rel("e"))).unwrap();
        assert!(!e_step.is_recursive);
    }

    #[test]
    fn e_is_scheduled_before_r() {
        let program = transitive_closure_program();
        let graph = build_precedence_graph(&program);
        let sccs = compute_sccs(&graph);
        let order = topological_order(&graph, &sccs);
        let schedule = build_schedule(&graph, &sccs, &order);

        let e_pos = schedule.iter().position(|s| s.computed.contains(&rel("e"))).unwrap();
        let r_pos = schedule.iter().position(|s| s.computed.contains(&rel("r"))).unwrap();
        assert!(e_pos < r_pos);
    }

    #[test]
    fn negation_and_aggregation_edges_are_distinguished_from_positive() {
        let mut program = Program::new();
        let mut p = Relation::new(rel("p"), vec![], loc());
        p.clauses.push(Clause::rule(
            Atom::new(rel("p"), vec![], loc()),
            vec![
                Literal::Atom(Atom::new(rel("q"), vec![], loc())),
                Literal::Negation(Atom::new(rel("p"), vec![], loc())),
            ],
            loc(),
        ));
        program.relations.insert(p.name.clone(), p);
        program.relations.insert(rel("q"), Relation::new(rel("q"), vec![], loc()));

        let graph = build_precedence_graph(&program);
        let edges = &graph.edges[&rel("p")];
        assert!(edges.iter().any(|e| e.target == rel("q") && matches!(e.kind, EdgeKind::Positive)));
        assert!(edges.iter().any(|e| e.target == rel("p") && matches!(e.kind, EdgeKind::Negative)));
    }

    #[test]
    fn every_relation_expires_exactly_once_at_its_last_use() {
        let program = transitive_closure_program();
        let graph = build_precedence_graph(&program);
        let sccs = compute_sccs(&graph);
        let order = topological_order(&graph, &sccs);
        let schedule = build_schedule(&graph, &sccs, &order);

        let total_expired: usize = schedule.iter().map(|s| s.expired.len()).sum();
        assert_eq!(total_expired, graph.relations().len());
    }
}
