//! Static analyses over a parsed procedure
//!
//! Analysers only read the tree; each returns its own findings.

pub mod unassigned;
pub mod unreachable;

use crate::frontend::Procedure;

pub use unassigned::{UnassignedVariable, UnassignedVariables};
pub use unreachable::UnreachableCode;

/// Analysis pass trait
pub trait Analyser<'p> {
    type Finding;

    /// Name of the analysis
    fn name(&self) -> &'static str;

    /// Run the analysis over a procedure
    fn analyse(&mut self, procedure: &'p Procedure) -> Vec<Self::Finding>;
}

/// Statements that can never execute, in source order
pub fn unreachable_statements(procedure: &Procedure) -> Vec<&crate::frontend::ast::Statement> {
    UnreachableCode::new().analyse(procedure)
}

/// Reads of variables that may not have been assigned, in source order
pub fn unassigned_variables(procedure: &Procedure) -> Vec<UnassignedVariable<'_>> {
    UnassignedVariables::new().analyse(procedure)
}
