//! Core of the Typox whole-program type analyzer: the abstract value
//! lattice, the object model with C3 linearization and the descriptor
//! protocol, typeshed ingestion, the heap and stack model, the built-in
//! library, and the context-sensitive dataflow engine.
//!
//! The usual entry point:
//!
//! ```no_run
//! use std::path::Path;
//! use typox_core::context::{AnalysisContext, AnalysisMode};
//! use typox_core::engine::Analysis;
//! use typox_core::typeshed::SearchContext;
//!
//! let search = SearchContext::new("stubs/stdlib".into(), (3, 9), "linux");
//! let mut ctx = AnalysisContext::new(search, AnalysisMode::Crude)
//!     .with_project_root("project".into());
//! let mut analysis = Analysis::new(&mut ctx, Path::new("project/main.py")).unwrap();
//! analysis.compute_fixed_point().unwrap();
//! let report = analysis.report();
//! println!("{}", serde_json::to_string_pretty(&report).unwrap());
//! ```

pub mod attr;
pub mod builtins;
pub mod context;
pub mod engine;
pub mod error;
pub mod heap;
pub mod mro;
pub mod namespace;
pub mod objects;
pub mod output;
pub mod state;
pub mod typeshed;
pub mod value;

pub use context::{AnalysisContext, AnalysisMode};
pub use engine::{Analysis, ProgramPoint};
pub use error::{AnalysisError, AnalysisResult};
pub use output::{AnalysisReport, ObjectRepr, PrimTag, ValueRepr};
pub use typeshed::SearchContext;
pub use value::Value;
