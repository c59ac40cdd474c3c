//! `stratalog` -- the middle end of a Datalog-family compiler.
//!
//! Covers the pipeline between the surface parser (an external
//! collaborator; see [`ir::Program`] for the shape it must produce) and a
//! downstream relational-algebra evaluator: component instantiation, the
//! type environment and type inference, semantic checking, syntactic-sugar
//! desugaring, precedence/SCC/schedule construction, and lowering to a
//! relational-algebra plan with a semi-naive fixpoint for recursive strata.
//!
//! ## Pipeline
//!
//! ```text
//! Program (IR)                          -- from the external parser
//!     |
//!     v
//! component instantiation   (components::instantiate_components)
//!     |
//!     v
//! semantic check #1         (checker::check)
//!     |
//!     v
//! desugaring                (desugar::run)
//!     |
//!     v
//! type analysis              (type_analysis::analyze)
//!     |
//!     v
//! semantic check #2         (checker::check)
//!     |
//!     v
//! precedence graph -> SCCs -> schedule   (schedule::*)
//!     |
//!     v
//! lowering to relational plan            (lower::lower)
//! ```
//!
//! [`pipeline::Pipeline::run`] sequences all of the above and returns a
//! [`pipeline::TranslationUnit`] carrying the (possibly rewritten) program,
//! its type environment, the accumulated [`diagnostics::ErrorReport`], the
//! shared [`cache::AnalysisCache`], and the lowered plan (absent if the run
//! stopped early on errors).
//!
//! Everything the purpose statement calls an external collaborator --
//! the surface parser, the symbol table, I/O directive evaluation, the
//! downstream evaluator/codegen, CLI/logging/report tooling -- is out of
//! scope here and lives outside this crate.

pub mod cache;
pub mod checker;
pub mod components;
pub mod config;
pub mod desugar;
pub mod diagnostics;
pub mod ir;
pub mod loc;
pub mod lower;
pub mod pipeline;
pub mod schedule;
pub mod type_analysis;
pub mod types;

pub use cache::{AnalysisCache, AnalysisKey};
pub use config::CompilerConfig;
pub use diagnostics::{Diagnostic, DiagnosticKind, ErrorReport, Severity};
pub use ir::Program;
pub use pipeline::{Pipeline, TranslationUnit};
pub use types::TypeEnvironment;
