//! # RamLayer: Datalog Middle-End
//!
//! Lowers a semantically-checked rule program into a relational abstract
//! machine (RAM) program suitable for an interpreter or code generator.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! Rule AST (+ analyses)
//!     ↓
//! [Type Finalisation]    → numeric constants stamped with final types
//!     ↓
//! [Sum-Type Erasure]     → constructors become tagged records
//!     ↓
//! [Analyses]             → SCC graph, liveness schedule, recursive clauses
//!     ↓
//! [SCC Driver]           → semi-naive fixpoint skeleton per stratum
//!     ↓  [Clause Translator] → one Query per clause firing
//!     ↓  [Join Planner]      → Selinger DP over estimated sizes
//!     ↓
//! [Program Assembler]    → RAM program (relations, strata, calls)
//!     ↓
//! [Shadow Nodes]         → type-tagged dispatch tree for the interpreter
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use ramlayer::ast::builders::{ClauseBuilder, ProgramBuilder};
//! use ramlayer::{translate, TranslatorConfig};
//!
//! let program = ProgramBuilder::new()
//!     .relation("edge", 2)
//!     .relation("path", 2)
//!     .input("edge")
//!     .output("path")
//!     .clause(
//!         ClauseBuilder::new("path")
//!             .head_vars(["x", "y"])
//!             .body_atom("edge", ["x", "y"])
//!             .build(),
//!     )
//!     .clause(
//!         ClauseBuilder::new("path")
//!             .head_vars(["x", "z"])
//!             .body_atom("path", ["x", "y"])
//!             .body_atom("edge", ["y", "z"])
//!             .build(),
//!     )
//!     .build();
//!
//! let unit = translate(program, TranslatorConfig::default()).unwrap();
//! assert!(unit.program.relation("@delta_path").is_some());
//! ```

// Front matter: the rule AST and its analyses
pub mod ast;
pub mod analysis;

// The RAM IR and the shadow node model over it
pub mod ram;
pub mod shadow;

// Translation passes
pub mod adt_erasure;
pub mod clause_translator;
pub mod join_planner;
pub mod translator;
pub mod value_translator;

// Supporting infrastructure
pub mod config;
pub mod error;
pub mod names;
pub mod report;
pub mod symbols;
pub mod value_index;

// Re-export the common entry points
pub use analysis::{Analyses, SchedulerStatistics};
pub use config::{SipsStrategy, TranslatorConfig};
pub use error::{TranslateError, TranslateResult};
pub use report::{DebugReport, ErrorReport};
pub use symbols::SymbolTable;
pub use translator::{translate_unit, RamTranslationUnit, TranslationUnit};

/// Translate a rule program under the given configuration.
///
/// Convenience wrapper around [`translate_unit`] for drivers that have no
/// report sinks or scheduler statistics to pass in.
pub fn translate(
    program: ast::Program,
    config: TranslatorConfig,
) -> TranslateResult<RamTranslationUnit> {
    translate_unit(TranslationUnit::new(program, config))
}
