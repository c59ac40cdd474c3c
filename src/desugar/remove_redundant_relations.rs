//! Desugaring pass 6 of 6: removes every relation that cannot contribute
//! to a computed relation's output. Reachability is computed backwards
//! from each `output`/`printsize` relation over the relations referenced
//! by its clause bodies, transitively; anything never reached is dead and
//! is dropped along with its clauses.

use std::collections::HashSet;

use crate::ir::Program;
use crate::loc::QualifiedName;

pub fn run(program: &mut Program) {
    let mut reachable: HashSet<QualifiedName> = HashSet::new();
    let mut frontier: Vec<QualifiedName> = program
        .relations
        .values()
        .filter(|r| r.is_computed())
        .map(|r| r.name.clone())
        .collect();

    while let Some(name) = frontier.pop() {
        if !reachable.insert(name.clone()) {
            continue;
        }
        if let Some(relation) = program.relation(&name) {
            for clause in &relation.clauses {
                for referenced in clause.referenced_relations() {
                    if !reachable.contains(&referenced) {
                        frontier.push(referenced);
                    }
                }
            }
        }
    }

    program.relations.retain(|name, _| reachable.contains(name));
}
