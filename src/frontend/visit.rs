//! Child enumeration for statements and expressions
//!
//! Every statement variant lists its own expressions, nested blocks and
//! named identifiers here. The analysers derive assigned and referenced
//! variable sets from these lists, so a new variant only has to be wired in
//! once and the compiler checks that every variant is covered.

use crate::frontend::ast::*;

impl Expr {
    /// Call `f` on every identifier in this expression, depth first
    pub fn for_each_ident<'a>(&'a self, f: &mut impl FnMut(&'a Ident)) {
        match self {
            Expr::Variable(ident) => f(ident),
            Expr::Number { .. } | Expr::Str { .. } => {}
            Expr::Binary { left, right, .. } => {
                left.for_each_ident(f);
                right.for_each_ident(f);
            }
            Expr::Negate { expr, .. } => expr.for_each_ident(f),
            Expr::ArrayIndex { base, indexes, .. } | Expr::Substring { base, indexes, .. } => {
                base.for_each_ident(f);
                for index in indexes {
                    index.for_each_ident(f);
                }
            }
            Expr::MatrixIndex { name, row, col, .. } => {
                f(name);
                row.for_each_ident(f);
                if let Some(col) = col {
                    col.for_each_ident(f);
                }
            }
            Expr::Call { name, args, .. } => {
                f(name);
                for arg in args {
                    arg.for_each_ident(f);
                }
            }
            Expr::Conditional { cond, then_expr, else_expr, .. } => {
                cond.for_each_ident(f);
                then_expr.for_each_ident(f);
                else_expr.for_each_ident(f);
            }
            Expr::Member { object, member, args, .. } => {
                object.for_each_ident(f);
                f(member);
                for arg in args.iter().flatten() {
                    arg.for_each_ident(f);
                }
            }
        }
    }
}

fn branch_blocks(branches: &ThenElse) -> Vec<&Block> {
    branches.then_block.iter().chain(branches.else_block.iter()).collect()
}

fn push_opt<'a>(out: &mut Vec<&'a Expr>, expr: &'a Option<Expr>) {
    if let Some(expr) = expr {
        out.push(expr);
    }
}

impl StatementKind {
    /// Expressions owned directly by this statement, in source order.
    /// Expressions inside nested blocks are not included.
    pub fn expressions(&self) -> Vec<&Expr> {
        let mut out = Vec::new();
        match self {
            StatementKind::Assignment { target, value, .. } => {
                out.push(target);
                out.push(value);
            }
            StatementKind::MatrixAssignment { row, col, value, .. } => {
                out.push(row);
                push_opt(&mut out, col);
                out.push(value);
            }
            StatementKind::Mat { value, .. } => out.push(value),
            StatementKind::If { cond, .. } => out.push(cond),
            StatementKind::For { start, end, step, .. } => {
                out.push(start);
                out.push(end);
                push_opt(&mut out, step);
            }
            StatementKind::LoopCondition { cond, .. } => out.push(cond),
            StatementKind::Case { arms } => out.extend(arms.iter().map(|arm| &arm.cond)),
            StatementKind::OnJump { selector, .. } => out.push(selector),
            StatementKind::Return { value } => push_opt(&mut out, value),
            StatementKind::Call { args, .. } | StatementKind::SubroutineCall { args, .. } => {
                out.extend(args.iter())
            }
            StatementKind::OleCall { target } => out.push(target),
            StatementKind::Equate { value, .. } => out.push(value),
            StatementKind::Common { vars, .. } => {
                for dims in vars.iter().filter_map(|v| v.dims.as_ref()) {
                    out.push(&dims.rows);
                    push_opt(&mut out, &dims.cols);
                }
            }
            StatementKind::Dim { matrices } => {
                for dims in matrices {
                    out.push(&dims.rows);
                    push_opt(&mut out, &dims.cols);
                }
            }
            StatementKind::Read { target, file, key, column, .. } => {
                out.push(target);
                out.push(file);
                out.push(key);
                push_opt(&mut out, column);
            }
            StatementKind::MatRead { file, key, .. } | StatementKind::MatWrite { file, key, .. } => {
                out.push(file);
                out.push(key);
            }
            StatementKind::ReadNext { target, cursor, .. } => {
                out.push(target);
                push_opt(&mut out, cursor);
            }
            StatementKind::Write { value, file, key, column, .. } => {
                out.push(value);
                out.push(file);
                out.push(key);
                push_opt(&mut out, column);
            }
            StatementKind::Open { dict, table, handle, .. } => {
                push_opt(&mut out, dict);
                out.push(table);
                out.push(handle);
            }
            StatementKind::Delete { file, key, .. }
            | StatementKind::Lock { file, key, .. }
            | StatementKind::Unlock { file, key, .. } => {
                out.push(file);
                out.push(key);
            }
            StatementKind::Locate { needle, haystack, using, by, position, .. } => {
                out.push(needle);
                out.push(haystack);
                push_opt(&mut out, using);
                push_opt(&mut out, by);
                out.push(position);
            }
            StatementKind::Swap { old, new, target } => {
                out.push(old);
                out.push(new);
                out.push(target);
            }
            StatementKind::Convert { from, to, target } => {
                out.push(from);
                out.push(to);
                out.push(target);
            }
            StatementKind::Transfer { source, target } => {
                out.push(source);
                out.push(target);
            }
            StatementKind::Remove { target, source, position, flag } => {
                out.push(target);
                out.push(source);
                out.push(position);
                out.push(flag);
            }
            StatementKind::Select { source } => out.push(source),
            StatementKind::ClearSelect { cursor } => push_opt(&mut out, cursor),
            StatementKind::OsRead { target, path, .. } => {
                out.push(target);
                out.push(path);
            }
            StatementKind::OsWrite { value, path } => {
                out.push(value);
                out.push(path);
            }
            StatementKind::OsOpen { path, handle, .. } => {
                out.push(path);
                out.push(handle);
            }
            StatementKind::OsBRead { target, handle, position, length } => {
                out.push(target);
                out.push(handle);
                out.push(position);
                out.push(length);
            }
            StatementKind::OsBWrite { value, handle, position } => {
                out.push(value);
                out.push(handle);
                out.push(position);
            }
            StatementKind::OsClose { handle } => out.push(handle),
            StatementKind::OsDelete { path } => out.push(path),
            StatementKind::MatParse { source, delimiter, .. } => {
                out.push(source);
                push_opt(&mut out, delimiter);
            }
            StatementKind::InitRnd { seed } => out.push(seed),
            StatementKind::Loop { .. }
            | StatementKind::Gosub { .. }
            | StatementKind::Goto { .. }
            | StatementKind::InternalSub { .. }
            | StatementKind::Declare { .. }
            | StatementKind::Insert { .. }
            | StatementKind::Flush
            | StatementKind::GarbageCollect
            | StatementKind::Null
            | StatementKind::Debug
            | StatementKind::Stop
            | StatementKind::End
            | StatementKind::Empty => {}
        }
        out
    }

    /// Nested statement lists, in source order
    pub fn blocks(&self) -> Vec<&Block> {
        match self {
            StatementKind::If { branches, .. }
            | StatementKind::Read { branches, .. }
            | StatementKind::MatRead { branches, .. }
            | StatementKind::ReadNext { branches, .. }
            | StatementKind::Write { branches, .. }
            | StatementKind::MatWrite { branches, .. }
            | StatementKind::Open { branches, .. }
            | StatementKind::Delete { branches, .. }
            | StatementKind::Lock { branches, .. }
            | StatementKind::Unlock { branches, .. }
            | StatementKind::Locate { branches, .. }
            | StatementKind::OsRead { branches, .. }
            | StatementKind::OsOpen { branches, .. } => branch_blocks(branches),
            StatementKind::For { body, .. } | StatementKind::Loop { body } => vec![body],
            StatementKind::Case { arms } => arms.iter().map(|arm| &arm.body).collect(),
            _ => Vec::new(),
        }
    }

    /// The `then`/`else` arms, for statements that carry them
    pub fn branches(&self) -> Option<&ThenElse> {
        match self {
            StatementKind::If { branches, .. }
            | StatementKind::Read { branches, .. }
            | StatementKind::MatRead { branches, .. }
            | StatementKind::ReadNext { branches, .. }
            | StatementKind::Write { branches, .. }
            | StatementKind::MatWrite { branches, .. }
            | StatementKind::Open { branches, .. }
            | StatementKind::Delete { branches, .. }
            | StatementKind::Lock { branches, .. }
            | StatementKind::Unlock { branches, .. }
            | StatementKind::Locate { branches, .. }
            | StatementKind::OsRead { branches, .. }
            | StatementKind::OsOpen { branches, .. } => Some(branches),
            _ => None,
        }
    }

    /// Identifiers named by the statement outside any expression
    pub fn names(&self) -> Vec<&Ident> {
        match self {
            StatementKind::MatrixAssignment { name, .. }
            | StatementKind::Mat { name, .. }
            | StatementKind::MatRead { name, .. }
            | StatementKind::MatWrite { name, .. }
            | StatementKind::MatParse { name, .. }
            | StatementKind::Equate { name, .. }
            | StatementKind::Insert { name }
            | StatementKind::Call { name, .. }
            | StatementKind::SubroutineCall { name, .. } => vec![name],
            StatementKind::For { var, next_var, .. } => {
                let mut out = vec![var];
                out.extend(next_var.iter());
                out
            }
            StatementKind::Gosub { label } | StatementKind::Goto { label } | StatementKind::InternalSub { label } => {
                vec![label]
            }
            StatementKind::OnJump { labels, .. } => labels.iter().collect(),
            StatementKind::Declare { names, .. } => names.iter().collect(),
            StatementKind::Common { label, vars } => {
                label.iter().chain(vars.iter().map(|v| &v.name)).collect()
            }
            StatementKind::Dim { matrices } => matrices.iter().map(|d| &d.name).collect(),
            _ => Vec::new(),
        }
    }

    /// Targets that are read before being written
    pub fn updated_targets(&self) -> Vec<&Expr> {
        match self {
            StatementKind::Assignment { target, op, .. } if op.is_compound() => vec![target],
            StatementKind::Swap { target, .. } | StatementKind::Convert { target, .. } => vec![target],
            StatementKind::Remove { position, .. } => vec![position],
            _ => Vec::new(),
        }
    }
}

impl Statement {
    /// Every identifier owned by this statement, nested blocks excluded
    pub fn idents(&self) -> Vec<&Ident> {
        let mut out = self.kind.names();
        for expr in self.kind.expressions() {
            expr.for_each_ident(&mut |ident| out.push(ident));
        }
        out
    }

    /// Case-folded names of the variables this statement assigns
    pub fn assigned_variables(&self) -> Vec<String> {
        self.idents()
            .into_iter()
            .filter(|ident| ident.role == IdentRole::Assignment)
            .map(|ident| ident.folded())
            .collect()
    }

    /// Variables read by this statement
    pub fn referenced_variables(&self) -> Vec<&Ident> {
        let mut out: Vec<&Ident> = self
            .idents()
            .into_iter()
            .filter(|ident| ident.role == IdentRole::Reference)
            .collect();
        out.extend(self.kind.updated_targets().into_iter().filter_map(|t| t.base_ident()));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::Span;
    use pretty_assertions::assert_eq;

    fn var(name: &str, role: IdentRole) -> Expr {
        Expr::Variable(Ident::new(name, role, Span::dummy()))
    }

    fn stmt(kind: StatementKind) -> Statement {
        Statement { kind, span: Span::dummy() }
    }

    #[test]
    fn test_assignment_sets() {
        let s = stmt(StatementKind::Assignment {
            target: Expr::ArrayIndex {
                base: Box::new(var("Rec", IdentRole::Assignment)),
                indexes: vec![var("i", IdentRole::Reference)],
                span: Span::dummy(),
            },
            op: AssignOp::Assign,
            value: var("x", IdentRole::Reference),
        });
        assert_eq!(s.assigned_variables(), vec!["rec".to_string()]);
        let refs: Vec<_> = s.referenced_variables().iter().map(|i| i.name.clone()).collect();
        assert_eq!(refs, vec!["i".to_string(), "x".to_string()]);
    }

    #[test]
    fn test_compound_assignment_reads_target() {
        let s = stmt(StatementKind::Assignment {
            target: var("total", IdentRole::Assignment),
            op: AssignOp::Add,
            value: Expr::Number { text: "1".into(), span: Span::dummy() },
        });
        assert_eq!(s.assigned_variables(), vec!["total".to_string()]);
        assert_eq!(s.referenced_variables().len(), 1);
    }

    #[test]
    fn test_nested_blocks_not_included() {
        let s = stmt(StatementKind::If {
            cond: var("c", IdentRole::Reference),
            branches: ThenElse {
                then_block: Some(vec![stmt(StatementKind::Assignment {
                    target: var("a", IdentRole::Assignment),
                    op: AssignOp::Assign,
                    value: var("b", IdentRole::Reference),
                })]),
                else_block: None,
            },
        });
        assert!(s.assigned_variables().is_empty());
        assert_eq!(s.referenced_variables().len(), 1);
        assert_eq!(s.kind.blocks().len(), 1);
    }

    #[test]
    fn test_for_binds_loop_variable() {
        let s = stmt(StatementKind::For {
            var: Ident::new("I", IdentRole::Assignment, Span::dummy()),
            start: Expr::Number { text: "1".into(), span: Span::dummy() },
            end: var("n", IdentRole::Reference),
            step: None,
            body: vec![],
            next_var: None,
        });
        assert_eq!(s.assigned_variables(), vec!["i".to_string()]);
        assert_eq!(s.referenced_variables()[0].name, "n");
    }
}
