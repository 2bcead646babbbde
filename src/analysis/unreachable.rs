//! Unreachable code detection
//!
//! A single walk over the statement tree builds a graph whose nodes are
//! internal-subroutine labels plus a synthetic start node. Statements after a
//! `return` or `goto` in the same list are flagged on the spot; labels that a
//! depth-first search from the start node never visits are flagged through
//! their declaring statement.

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::analysis::Analyser;
use crate::frontend::ast::{Procedure, Statement, StatementKind};
use crate::frontend::symbols::SymbolKind;

const START: &str = "";

#[derive(Debug, Default)]
pub struct UnreachableCode {
    /// label -> labels it may transfer control to
    edges: HashMap<String, Vec<String>>,
}

impl UnreachableCode {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_edge(&mut self, from: &str, to: String) {
        self.edges.entry(from.to_string()).or_default().push(to);
    }

    /// Walk one statement list; nested lists get their own reachability
    fn walk<'p>(&mut self, block: &'p [Statement], label: &str, out: &mut Vec<&'p Statement>) {
        let mut current = label.to_string();
        let mut reachable = true;

        for stmt in block {
            if let StatementKind::InternalSub { label } = &stmt.kind {
                let name = label.folded();
                if reachable {
                    // fall through into the label
                    self.add_edge(&current, name.clone());
                }
                current = name;
                reachable = true;
                continue;
            }
            if !reachable {
                if !matches!(stmt.kind, StatementKind::End | StatementKind::Empty) {
                    out.push(stmt);
                }
                continue;
            }

            match &stmt.kind {
                StatementKind::Goto { label } | StatementKind::Gosub { label } => {
                    self.add_edge(&current, label.folded());
                }
                StatementKind::OnJump { labels, .. } => {
                    for label in labels {
                        self.add_edge(&current, label.folded());
                    }
                }
                _ => {}
            }
            for nested in stmt.kind.blocks() {
                self.walk(nested, &current, out);
            }
            if matches!(stmt.kind, StatementKind::Return { .. } | StatementKind::Goto { .. }) {
                reachable = false;
            }
        }
    }

    /// Labels reachable from the start node
    fn reachable_labels(&self) -> HashSet<&str> {
        let mut visited = HashSet::new();
        let mut worklist = vec![START];
        while let Some(label) = worklist.pop() {
            if !visited.insert(label) {
                continue;
            }
            if let Some(targets) = self.edges.get(label) {
                worklist.extend(targets.iter().map(String::as_str));
            }
        }
        visited
    }
}

impl<'p> Analyser<'p> for UnreachableCode {
    type Finding = &'p Statement;

    fn name(&self) -> &'static str {
        "unreachable-code"
    }

    fn analyse(&mut self, procedure: &'p Procedure) -> Vec<&'p Statement> {
        self.edges.clear();

        // label statements are never flagged by the walk, only below
        let mut out = Vec::new();
        self.walk(&procedure.statements, START, &mut out);

        let visited: HashSet<String> = self.reachable_labels().into_iter().map(str::to_string).collect();
        for symbol in procedure.symbols.iter() {
            if symbol.kind != SymbolKind::Label || !symbol.is_declared() {
                continue;
            }
            if visited.contains(&symbol.name.to_lowercase()) {
                continue;
            }
            if let Some(stmt) = procedure.label_statement(&symbol.name) {
                out.push(stmt);
            }
        }

        out.sort_by_key(|s| (s.span.line, s.span.col));
        debug!("{}: {} unreachable statements", self.name(), out.len());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parse;
    use pretty_assertions::assert_eq;

    fn unreachable_lines(source: &str) -> Vec<usize> {
        let proc = parse(source, 0);
        assert!(!proc.has_errors(), "unexpected diagnostics: {:?}", proc.diagnostics);
        UnreachableCode::new().analyse(&proc).iter().map(|s| s.span.line).collect()
    }

    #[test]
    fn test_statement_after_return() {
        let proc = parse("return\nx = 1\nend\n", 0);
        let found = UnreachableCode::new().analyse(&proc);
        assert_eq!(found.len(), 1);
        assert!(matches!(found[0].kind, StatementKind::Assignment { .. }));
        assert_eq!(found[0].span.line, 2);
    }

    #[test]
    fn test_straight_line_code_is_reachable() {
        assert_eq!(unreachable_lines("x = 1\ny = x\nreturn\n"), Vec::<usize>::new());
    }

    #[test]
    fn test_code_after_goto() {
        assert_eq!(unreachable_lines("goto done\nx = 1\ndone:\nreturn\n"), vec![2]);
    }

    #[test]
    fn test_gosub_target_is_reachable() {
        let source = "gosub work\nreturn\n\nwork:\n  x = 1\nreturn\n";
        assert_eq!(unreachable_lines(source), Vec::<usize>::new());
    }

    #[test]
    fn test_unused_label_is_flagged() {
        let source = "x = 1\nreturn\n\nunused:\n  y = 2\nreturn\n";
        assert_eq!(unreachable_lines(source), vec![4]);
    }

    #[test]
    fn test_labels_reached_transitively() {
        let source = "gosub a\nreturn\na:\n  gosub B\nreturn\nb:\nreturn\nc:\n  gosub a\nreturn\n";
        assert_eq!(unreachable_lines(source), vec![8]);
    }

    #[test]
    fn test_fall_through_into_label() {
        let source = "x = 1\nlater:\n  y = x\nreturn\n";
        assert_eq!(unreachable_lines(source), Vec::<usize>::new());
    }

    #[test]
    fn test_return_inside_branch_is_local() {
        let source = "if x then\n  return\n  y = 1\nend\nz = 2\nreturn\n";
        assert_eq!(unreachable_lines(source), vec![3]);
    }

    #[test]
    fn test_case_arms_do_not_end_the_block() {
        let source = "begin case\n  case x\n    return\n  case 1\n    y = 1\nend case\nz = 1\n";
        assert_eq!(unreachable_lines(source), Vec::<usize>::new());
    }

    #[test]
    fn test_jump_from_unreachable_code_adds_no_edge() {
        let source = "return\ngosub sub\nsub:\nreturn\n";
        assert_eq!(unreachable_lines(source), vec![2, 3]);
    }

    #[test]
    fn test_unreached_label_flagged_once() {
        let source = "return\nx = 1\nlost:\n  y = 2\nreturn\n";
        assert_eq!(unreachable_lines(source), vec![2, 3]);
    }

    #[test]
    fn test_end_statement_never_flagged() {
        assert_eq!(unreachable_lines("return\nend\n"), Vec::<usize>::new());
    }
}
