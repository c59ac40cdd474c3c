//! Desugaring transforms: a fixed sequence of IR-to-IR rewrites that run
//! between component instantiation and type analysis, simplifying the
//! program into a shape the later stages don't need special cases for.
//!
//! Applied in this order, each building on the last:
//! 1. [`unique_aggregation_variables`]
//! 2. [`resolve_aliases`]
//! 3. [`remove_relation_copies`]
//! 4. [`materialize_aggregation_queries`]
//! 5. [`remove_empty_relations`]
//! 6. [`remove_redundant_relations`]

mod materialize_aggregation_queries;
mod remove_empty_relations;
mod remove_redundant_relations;
mod remove_relation_copies;
mod resolve_aliases;
mod unique_aggregation_variables;

use crate::cache::AnalysisCache;
use crate::ir::Program;

/// Runs all six transforms in order, invalidating the analysis cache after
/// each one since every pass rewrites the IR that cached analyses were
/// computed against.
pub fn run(program: &mut Program, cache: &mut AnalysisCache) {
    tracing::debug!(relations = program.relations.len(), "desugaring: unique aggregation variables");
    unique_aggregation_variables::run(program);
    cache.invalidate_all();

    tracing::debug!("desugaring: resolve aliases");
    resolve_aliases::run(program);
    cache.invalidate_all();

    tracing::debug!("desugaring: remove relation copies");
    remove_relation_copies::run(program);
    cache.invalidate_all();

    tracing::debug!("desugaring: materialize aggregation queries");
    materialize_aggregation_queries::run(program);
    cache.invalidate_all();

    tracing::debug!("desugaring: remove empty relations");
    remove_empty_relations::run(program);
    cache.invalidate_all();

    tracing::debug!("desugaring: remove redundant relations");
    remove_redundant_relations::run(program);
    cache.invalidate_all();
    tracing::debug!(relations = program.relations.len(), "desugaring complete");
}
