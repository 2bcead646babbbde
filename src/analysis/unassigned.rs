//! Definite-assignment analysis
//!
//! Forward walk over each statement list. A list carries the names that are
//! certainly assigned at the current point (checked against every read) and
//! the names it assigns before control leaves it normally, which the caller
//! merges according to the branch rules below.
//!
//! - `then`/`else`: intersection when neither arm returns, the other arm when
//!   one returns; when both return the enclosing list stops.
//! - `case` arms, `for` and `loop` bodies are walked but never merged.
//! - `gosub` inlines the target's statements up to its first `return`.

use std::collections::HashSet;

use log::debug;

use crate::analysis::Analyser;
use crate::frontend::ast::{Block, Ident, JumpKind, Procedure, Statement, StatementKind, ThenElse};
use crate::frontend::symbols::{SymbolKind, VariableScope};
use crate::frontend::token::is_system_variable;
use crate::utils::Span;

/// Names defined by the environment before any statement runs
const ENVIRONMENT: &[&str] = &["true$", "false$"];

/// A read of a variable that may be unassigned at that point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnassignedVariable<'p> {
    pub name: &'p str,
    /// Location of the read
    pub span: Span,
    pub statement: &'p Statement,
}

/// Outcome of walking one statement list
#[derive(Debug, Default)]
struct Flow {
    /// Assigned before control leaves the list normally
    assigned: HashSet<String>,
    returns: bool,
}

#[derive(Debug, Default)]
pub struct UnassignedVariables<'p> {
    /// Variables defined before the first statement
    seeds: HashSet<String>,
    /// Labels currently being inlined
    active: Vec<String>,
    /// Reads already reported, by location
    reported: HashSet<Span>,
    findings: Vec<UnassignedVariable<'p>>,
}

impl<'p> UnassignedVariables<'p> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parameters, commons, matrices, equates and system variables
    fn seed(&mut self, procedure: &Procedure) {
        self.seeds = ENVIRONMENT.iter().map(|s| s.to_string()).collect();
        for symbol in procedure.symbols.iter() {
            let seeded = match symbol.kind {
                SymbolKind::Equate => true,
                SymbolKind::Variable => {
                    symbol.is_matrix()
                        || matches!(
                            symbol.scope,
                            Some(VariableScope::Parameter | VariableScope::Common | VariableScope::System)
                        )
                }
                _ => false,
            };
            if seeded {
                self.seeds.insert(symbol.name.to_lowercase());
            }
        }
    }

    fn is_defined(&self, ident: &Ident, local: &HashSet<String>) -> bool {
        let name = ident.folded();
        local.contains(&name) || self.seeds.contains(&name) || is_system_variable(&name)
    }

    fn check_reads(&mut self, stmt: &'p Statement, local: &HashSet<String>) {
        for ident in stmt.referenced_variables() {
            if self.is_defined(ident, local) {
                continue;
            }
            if self.reported.insert(ident.span) {
                self.findings.push(UnassignedVariable { name: &ident.name, span: ident.span, statement: stmt });
            }
        }
    }

    /// Walk a list; with `stop_at_return` the walk ends at the first `return`
    fn walk(
        &mut self,
        procedure: &'p Procedure,
        block: &'p [Statement],
        entering: &HashSet<String>,
        stop_at_return: bool,
    ) -> Flow {
        let mut local = entering.clone();
        let mut flow = Flow::default();

        for stmt in block {
            let assigned = stmt.assigned_variables();
            if let StatementKind::For { var, .. } = &stmt.kind {
                // `next i` reads the loop variable
                local.insert(var.folded());
            }
            self.check_reads(stmt, &local);
            for name in assigned {
                if !flow.returns {
                    flow.assigned.insert(name.clone());
                }
                local.insert(name);
            }

            match &stmt.kind {
                StatementKind::Return { .. } => {
                    flow.returns = true;
                    if stop_at_return {
                        break;
                    }
                }
                StatementKind::Case { arms } => {
                    for arm in arms {
                        self.walk(procedure, &arm.body, &local, false);
                    }
                }
                StatementKind::For { body, .. } | StatementKind::Loop { body } => {
                    self.walk(procedure, body, &local, false);
                }
                StatementKind::Gosub { label } => {
                    let proven = self.inline(procedure, &label.name, &local);
                    Self::merge(&mut local, &mut flow, proven);
                }
                StatementKind::OnJump { kind: JumpKind::Gosub, labels, .. } => {
                    // only one target runs, so nothing is proven
                    for label in labels {
                        self.inline(procedure, &label.name, &local);
                    }
                }
                kind => {
                    if let Some(branches) = kind.branches() {
                        match self.branches(procedure, branches, &local) {
                            Some(proven) => Self::merge(&mut local, &mut flow, proven),
                            None => {
                                flow.returns = true;
                                if stop_at_return {
                                    break;
                                }
                                return flow;
                            }
                        }
                    }
                }
            }
        }
        flow
    }

    fn merge(local: &mut HashSet<String>, flow: &mut Flow, proven: HashSet<String>) {
        if !flow.returns {
            flow.assigned.extend(proven.iter().cloned());
        }
        local.extend(proven);
    }

    /// Names proven by a then/else pair, or `None` when both arms return
    fn branches(
        &mut self,
        procedure: &'p Procedure,
        branches: &'p ThenElse,
        local: &HashSet<String>,
    ) -> Option<HashSet<String>> {
        let mut arm = |block: &'p Option<Block>| match block {
            Some(block) => self.walk(procedure, block, local, false),
            None => Flow::default(),
        };
        let then_flow = arm(&branches.then_block);
        let else_flow = arm(&branches.else_block);

        match (then_flow.returns, else_flow.returns) {
            (true, true) => None,
            (false, false) => Some(then_flow.assigned.intersection(&else_flow.assigned).cloned().collect()),
            (true, false) => Some(else_flow.assigned),
            (false, true) => Some(then_flow.assigned),
        }
    }

    /// Walk an internal subroutine from its label to its first `return`
    fn inline(&mut self, procedure: &'p Procedure, label: &str, local: &HashSet<String>) -> HashSet<String> {
        let key = label.to_lowercase();
        if self.active.contains(&key) {
            return HashSet::new();
        }
        let Some(body) = procedure.statements_after_label(label) else {
            return HashSet::new();
        };
        self.active.push(key);
        let flow = self.walk(procedure, body, local, true);
        self.active.pop();
        flow.assigned
    }
}

impl<'p> Analyser<'p> for UnassignedVariables<'p> {
    type Finding = UnassignedVariable<'p>;

    fn name(&self) -> &'static str {
        "unassigned-variables"
    }

    fn analyse(&mut self, procedure: &'p Procedure) -> Vec<UnassignedVariable<'p>> {
        self.seed(procedure);
        self.active.clear();
        self.reported.clear();
        self.findings.clear();

        self.walk(procedure, &procedure.statements, &HashSet::new(), false);

        let mut out = std::mem::take(&mut self.findings);
        out.sort_by_key(|f| (f.span.line, f.span.col));
        debug!("{}: {} findings", self.name(), out.len());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parse;
    use pretty_assertions::assert_eq;

    fn unassigned(source: &str) -> Vec<(String, usize)> {
        let proc = parse(source, 0);
        assert!(!proc.has_errors(), "unexpected diagnostics: {:?}", proc.diagnostics);
        UnassignedVariables::new()
            .analyse(&proc)
            .iter()
            .map(|f| (f.name.to_string(), f.statement.span.line))
            .collect()
    }

    fn pairs(items: &[(&str, usize)]) -> Vec<(String, usize)> {
        items.iter().map(|(n, l)| (n.to_string(), *l)).collect()
    }

    #[test]
    fn test_then_only_assignment_is_not_definite() {
        assert_eq!(unassigned("if cond then a = 1\nb = a\nend\n"), pairs(&[("cond", 1), ("a", 2)]));
    }

    #[test]
    fn test_both_arms_assign() {
        assert_eq!(unassigned("if cond then a = 1 else a = 2\nb = a\nend\n"), pairs(&[("cond", 1)]));
    }

    #[test]
    fn test_returning_arm_uses_other_arm() {
        let source = "x = 1\nif x then\n  return\nend else\n  a = 1\nend\nb = a\n";
        assert_eq!(unassigned(source), Vec::new());
    }

    #[test]
    fn test_both_arms_return_stops_block() {
        let source = "x = 1\nif x then return else return\nb = a\n";
        assert_eq!(unassigned(source), Vec::new());
    }

    #[test]
    fn test_self_reference_and_compound_assignment() {
        assert_eq!(unassigned("x = x + 1\ny += 1\n"), pairs(&[("x", 1), ("y", 2)]));
    }

    #[test]
    fn test_seeds() {
        let source = "function f(p, mat m)\ncommon c\nequ max$ to 3\ndim d(2)\nx = p : m(1) : c : max$ : d(1) : @fm : true$\n";
        assert_eq!(unassigned(source), Vec::new());
    }

    #[test]
    fn test_loop_body_is_not_merged() {
        let source = "for i = 1 to 3\n  a = i\nnext i\nb = a\nc = i\n";
        assert_eq!(unassigned(source), pairs(&[("a", 4)]));
    }

    #[test]
    fn test_case_arms_are_not_merged() {
        let source = "x = 1\nbegin case\n  case x\n    a = 1\n  case 1\n    a = 2\nend case\nb = a\n";
        assert_eq!(unassigned(source), pairs(&[("a", 8)]));
    }

    #[test]
    fn test_gosub_inlines_assignments() {
        let source = "gosub init\nb = a\nreturn\n\ninit:\n  a = 1\nreturn\n";
        assert_eq!(unassigned(source), Vec::new());
    }

    #[test]
    fn test_recursive_gosub_terminates() {
        let source = "gosub again\nreturn\nagain:\n  gosub again\n  a = 1\nreturn\n";
        assert_eq!(unassigned(source), Vec::new());
    }

    #[test]
    fn test_read_target_is_assigned() {
        let source = "open 'T' to f else return\nread rec from f, 'k' else rec = ''\nx = rec\n";
        assert_eq!(unassigned(source), Vec::new());
    }

    #[test]
    fn test_each_read_reported_once() {
        let source = "gosub show\ngosub show\nreturn\nshow:\n  y = z\nreturn\n";
        assert_eq!(unassigned(source), pairs(&[("z", 5)]));
    }
}
