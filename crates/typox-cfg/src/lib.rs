//! CFG lowering for the Typox analyzer.
//!
//! Transforms a parsed module into a control-flow graph of three-address
//! basic blocks with distinguished inter-procedural edge families. The
//! dataflow engine in `typox-core` consumes these graphs and grows them
//! on the fly as call targets become known.

pub mod bridge;
pub mod cfg;
pub mod error;
pub mod hir;
pub mod lowering;

pub use cfg::{
    BasicBlock, CallReturnFlow, Cfg, ClassdefFlow, Label, LabelGenerator, TempNames, TripleFlow,
};
pub use error::{LoweringError, LoweringResult};
pub use lowering::lower_module;

/// Parse and lower a module source in one step.
pub fn lower_source(
    name: &str,
    source: &str,
    path: &str,
    labels: &mut LabelGenerator,
    temps: &mut TempNames,
) -> LoweringResult<Cfg> {
    let body = bridge::parse_module(source, path)?;
    lowering::lower_module(name, body, labels, temps)
}
