//! Bridge from the `rustpython-ast` surface syntax into the owned HIR the
//! lowering works on. The conversion is structural; desugaring happens later
//! in `lowering`.

use rustpython_ast::{self as ast};

use crate::error::{LoweringError, LoweringResult};
use crate::hir::{
    BinOp, BoolOpKind, CmpOpKind, Comprehension, ExceptClause, HirExpr, HirStmt, Literal, Param,
    Params, UnaryOpKind, WithItem,
};

/// Parse a module source into HIR statements.
pub fn parse_module(source: &str, path: &str) -> LoweringResult<Vec<HirStmt>> {
    use rustpython_parser::Parse;

    let suite = ast::Suite::parse(source, path).map_err(|e| LoweringError::Parse {
        path: path.to_string(),
        message: e.to_string(),
    })?;
    convert_body(suite)
}

pub fn convert_body(body: Vec<ast::Stmt>) -> LoweringResult<Vec<HirStmt>> {
    let mut out = Vec::with_capacity(body.len());
    for stmt in body {
        convert_stmt(stmt, &mut out)?;
    }
    Ok(out)
}

fn convert_stmt(stmt: ast::Stmt, out: &mut Vec<HirStmt>) -> LoweringResult<()> {
    match stmt {
        ast::Stmt::FunctionDef(f) => {
            out.push(HirStmt::FunctionDef {
                name: f.name.to_string(),
                params: convert_params(*f.args)?,
                body: convert_body(f.body)?,
                decorators: convert_exprs(f.decorator_list)?,
            });
        }
        ast::Stmt::ClassDef(c) => {
            out.push(HirStmt::ClassDef {
                name: c.name.to_string(),
                bases: convert_exprs(c.bases)?,
                body: convert_body(c.body)?,
                decorators: convert_exprs(c.decorator_list)?,
            });
        }
        ast::Stmt::Return(r) => {
            out.push(HirStmt::Return {
                value: r.value.map(|v| convert_expr(*v)).transpose()?,
            });
        }
        ast::Stmt::Delete(d) => {
            out.push(HirStmt::Delete {
                targets: convert_exprs(d.targets)?,
            });
        }
        ast::Stmt::Assign(a) => {
            out.push(HirStmt::Assign {
                targets: convert_exprs(a.targets)?,
                value: convert_expr(*a.value)?,
            });
        }
        ast::Stmt::AugAssign(a) => {
            out.push(HirStmt::AugAssign {
                target: convert_expr(*a.target)?,
                op: convert_operator(a.op),
                value: convert_expr(*a.value)?,
            });
        }
        ast::Stmt::AnnAssign(a) => {
            out.push(HirStmt::AnnAssign {
                target: convert_expr(*a.target)?,
                annotation: convert_expr(*a.annotation)?,
                value: a.value.map(|v| convert_expr(*v)).transpose()?,
            });
        }
        ast::Stmt::For(f) => {
            out.push(HirStmt::For {
                target: convert_expr(*f.target)?,
                iter: convert_expr(*f.iter)?,
                body: convert_body(f.body)?,
                orelse: convert_body(f.orelse)?,
            });
        }
        ast::Stmt::While(w) => {
            out.push(HirStmt::While {
                test: convert_expr(*w.test)?,
                body: convert_body(w.body)?,
                orelse: convert_body(w.orelse)?,
            });
        }
        ast::Stmt::If(i) => {
            out.push(HirStmt::If {
                test: convert_expr(*i.test)?,
                body: convert_body(i.body)?,
                orelse: convert_body(i.orelse)?,
            });
        }
        ast::Stmt::With(w) => {
            let mut items = Vec::with_capacity(w.items.len());
            for item in w.items {
                items.push(WithItem {
                    context_expr: convert_expr(item.context_expr)?,
                    optional_vars: item.optional_vars.map(|v| convert_expr(*v)).transpose()?,
                });
            }
            out.push(HirStmt::With {
                items,
                body: convert_body(w.body)?,
            });
        }
        ast::Stmt::Raise(r) => {
            out.push(HirStmt::Raise {
                exc: r.exc.map(|e| convert_expr(*e)).transpose()?,
                cause: r.cause.map(|c| convert_expr(*c)).transpose()?,
            });
        }
        ast::Stmt::Try(t) => {
            let mut handlers = Vec::with_capacity(t.handlers.len());
            for handler in t.handlers {
                let ast::ExceptHandler::ExceptHandler(h) = handler;
                handlers.push(ExceptClause {
                    typ: h.type_.map(|e| convert_expr(*e)).transpose()?,
                    name: h.name.map(|n| n.to_string()),
                    body: convert_body(h.body)?,
                });
            }
            out.push(HirStmt::Try {
                body: convert_body(t.body)?,
                handlers,
                orelse: convert_body(t.orelse)?,
                finalbody: convert_body(t.finalbody)?,
            });
        }
        ast::Stmt::Assert(a) => {
            out.push(HirStmt::Assert {
                test: convert_expr(*a.test)?,
                msg: a.msg.map(|m| convert_expr(*m)).transpose()?,
            });
        }
        ast::Stmt::Import(i) => {
            // one statement per alias, matching the lowering's one-block rule
            for alias in i.names {
                out.push(HirStmt::Import {
                    module: alias.name.to_string(),
                    asname: alias.asname.map(|a| a.to_string()),
                });
            }
        }
        ast::Stmt::ImportFrom(i) => {
            let mut names = Vec::with_capacity(i.names.len());
            for alias in i.names {
                names.push((alias.name.to_string(), alias.asname.map(|a| a.to_string())));
            }
            out.push(HirStmt::ImportFrom {
                module: i.module.map(|m| m.to_string()),
                names,
                level: i.level.map(|l| l.to_u32()).unwrap_or(0),
            });
        }
        ast::Stmt::Global(g) => {
            out.push(HirStmt::Global {
                names: g.names.into_iter().map(|n| n.to_string()).collect(),
            });
        }
        ast::Stmt::Nonlocal(n) => {
            out.push(HirStmt::Nonlocal {
                names: n.names.into_iter().map(|n| n.to_string()).collect(),
            });
        }
        ast::Stmt::Expr(e) => {
            out.push(HirStmt::Expr {
                value: convert_expr(*e.value)?,
            });
        }
        ast::Stmt::Pass(_) => out.push(HirStmt::Pass),
        ast::Stmt::Break(_) => out.push(HirStmt::Break),
        ast::Stmt::Continue(_) => out.push(HirStmt::Continue),
        other => {
            return Err(LoweringError::unsupported(stmt_kind_name(&other)));
        }
    }
    Ok(())
}

fn stmt_kind_name(stmt: &ast::Stmt) -> String {
    let name = match stmt {
        ast::Stmt::AsyncFunctionDef(_) => "async function definition",
        ast::Stmt::AsyncFor(_) => "async for",
        ast::Stmt::AsyncWith(_) => "async with",
        ast::Stmt::Match(_) => "match statement",
        _ => "statement",
    };
    name.to_string()
}

fn convert_exprs(exprs: Vec<ast::Expr>) -> LoweringResult<Vec<HirExpr>> {
    exprs.into_iter().map(convert_expr).collect()
}

fn convert_generators(
    generators: Vec<ast::Comprehension>,
) -> LoweringResult<Vec<Comprehension>> {
    let mut out = Vec::with_capacity(generators.len());
    for generator in generators {
        if generator.is_async {
            return Err(LoweringError::unsupported("async comprehension"));
        }
        out.push(Comprehension {
            target: convert_expr(generator.target)?,
            iter: convert_expr(generator.iter)?,
            ifs: convert_exprs(generator.ifs)?,
        });
    }
    Ok(out)
}

pub fn convert_expr(expr: ast::Expr) -> LoweringResult<HirExpr> {
    Ok(match expr {
        ast::Expr::BoolOp(b) => HirExpr::BoolOp {
            op: match b.op {
                ast::BoolOp::And => BoolOpKind::And,
                ast::BoolOp::Or => BoolOpKind::Or,
            },
            values: convert_exprs(b.values)?,
        },
        ast::Expr::NamedExpr(_) => {
            return Err(LoweringError::unsupported("assignment expression"));
        }
        ast::Expr::BinOp(b) => HirExpr::BinOp {
            left: Box::new(convert_expr(*b.left)?),
            op: convert_operator(b.op),
            right: Box::new(convert_expr(*b.right)?),
        },
        ast::Expr::UnaryOp(u) => HirExpr::UnaryOp {
            op: match u.op {
                ast::UnaryOp::Invert => UnaryOpKind::Invert,
                ast::UnaryOp::Not => UnaryOpKind::Not,
                ast::UnaryOp::UAdd => UnaryOpKind::UAdd,
                ast::UnaryOp::USub => UnaryOpKind::USub,
            },
            operand: Box::new(convert_expr(*u.operand)?),
        },
        ast::Expr::Lambda(l) => HirExpr::Lambda {
            params: convert_params(*l.args)?,
            body: Box::new(convert_expr(*l.body)?),
        },
        ast::Expr::IfExp(i) => HirExpr::IfExp {
            test: Box::new(convert_expr(*i.test)?),
            body: Box::new(convert_expr(*i.body)?),
            orelse: Box::new(convert_expr(*i.orelse)?),
        },
        ast::Expr::Dict(d) => HirExpr::Dict {
            keys: d
                .keys
                .into_iter()
                .map(|k| k.map(convert_expr).transpose())
                .collect::<LoweringResult<_>>()?,
            values: convert_exprs(d.values)?,
        },
        ast::Expr::Set(s) => HirExpr::Set {
            elts: convert_exprs(s.elts)?,
        },
        ast::Expr::ListComp(c) => HirExpr::ListComp {
            elt: Box::new(convert_expr(*c.elt)?),
            generators: convert_generators(c.generators)?,
        },
        ast::Expr::SetComp(c) => HirExpr::SetComp {
            elt: Box::new(convert_expr(*c.elt)?),
            generators: convert_generators(c.generators)?,
        },
        ast::Expr::DictComp(c) => HirExpr::DictComp {
            key: Box::new(convert_expr(*c.key)?),
            value: Box::new(convert_expr(*c.value)?),
            generators: convert_generators(c.generators)?,
        },
        ast::Expr::GeneratorExp(g) => HirExpr::GeneratorExp {
            elt: Box::new(convert_expr(*g.elt)?),
            generators: convert_generators(g.generators)?,
        },
        ast::Expr::Await(_) => return Err(LoweringError::unsupported("await expression")),
        ast::Expr::Yield(y) => HirExpr::Yield {
            value: y.value.map(|v| convert_expr(*v).map(Box::new)).transpose()?,
        },
        ast::Expr::YieldFrom(y) => HirExpr::YieldFrom {
            value: Box::new(convert_expr(*y.value)?),
        },
        ast::Expr::Compare(c) => HirExpr::Compare {
            left: Box::new(convert_expr(*c.left)?),
            ops: c.ops.into_iter().map(convert_cmpop).collect(),
            comparators: convert_exprs(c.comparators)?,
        },
        ast::Expr::Call(c) => {
            let mut keywords = Vec::with_capacity(c.keywords.len());
            for kw in c.keywords {
                keywords.push((kw.arg.map(|a| a.to_string()), convert_expr(kw.value)?));
            }
            HirExpr::Call {
                func: Box::new(convert_expr(*c.func)?),
                args: convert_exprs(c.args)?,
                keywords,
            }
        }
        ast::Expr::FormattedValue(f) => HirExpr::FormattedValue {
            value: Box::new(convert_expr(*f.value)?),
            format_spec: f
                .format_spec
                .map(|s| convert_expr(*s).map(Box::new))
                .transpose()?,
        },
        ast::Expr::JoinedStr(j) => HirExpr::JoinedStr {
            values: convert_exprs(j.values)?,
        },
        ast::Expr::Constant(c) => convert_constant(c.value),
        ast::Expr::Attribute(a) => HirExpr::Attribute {
            value: Box::new(convert_expr(*a.value)?),
            attr: a.attr.to_string(),
        },
        ast::Expr::Subscript(s) => HirExpr::Subscript {
            value: Box::new(convert_expr(*s.value)?),
            slice: Box::new(convert_expr(*s.slice)?),
        },
        ast::Expr::Starred(s) => HirExpr::Starred {
            value: Box::new(convert_expr(*s.value)?),
        },
        ast::Expr::Name(n) => HirExpr::Name(n.id.to_string()),
        ast::Expr::List(l) => HirExpr::List {
            elts: convert_exprs(l.elts)?,
        },
        ast::Expr::Tuple(t) => HirExpr::Tuple {
            elts: convert_exprs(t.elts)?,
        },
        ast::Expr::Slice(s) => HirExpr::Slice {
            lower: s.lower.map(|e| convert_expr(*e).map(Box::new)).transpose()?,
            upper: s.upper.map(|e| convert_expr(*e).map(Box::new)).transpose()?,
            step: s.step.map(|e| convert_expr(*e).map(Box::new)).transpose()?,
        },
    })
}

fn convert_constant(value: ast::Constant) -> HirExpr {
    match value {
        ast::Constant::None => HirExpr::Literal(Literal::None),
        ast::Constant::Bool(b) => HirExpr::Literal(Literal::Bool(b)),
        ast::Constant::Str(s) => HirExpr::Literal(Literal::Str(s)),
        ast::Constant::Bytes(_) => HirExpr::Literal(Literal::Bytes),
        ast::Constant::Int(_) => HirExpr::Literal(Literal::Int),
        ast::Constant::Float(_) => HirExpr::Literal(Literal::Float),
        ast::Constant::Complex { .. } => HirExpr::Literal(Literal::Complex),
        ast::Constant::Ellipsis => HirExpr::Literal(Literal::Ellipsis),
        ast::Constant::Tuple(elts) => HirExpr::Tuple {
            elts: elts.into_iter().map(convert_constant).collect(),
        },
    }
}

fn convert_cmpop(op: ast::CmpOp) -> CmpOpKind {
    match op {
        ast::CmpOp::Eq => CmpOpKind::Eq,
        ast::CmpOp::NotEq => CmpOpKind::NotEq,
        ast::CmpOp::Lt => CmpOpKind::Lt,
        ast::CmpOp::LtE => CmpOpKind::LtE,
        ast::CmpOp::Gt => CmpOpKind::Gt,
        ast::CmpOp::GtE => CmpOpKind::GtE,
        ast::CmpOp::Is => CmpOpKind::Is,
        ast::CmpOp::IsNot => CmpOpKind::IsNot,
        ast::CmpOp::In => CmpOpKind::In,
        ast::CmpOp::NotIn => CmpOpKind::NotIn,
    }
}

fn convert_operator(op: ast::Operator) -> BinOp {
    match op {
        ast::Operator::Add => BinOp::Add,
        ast::Operator::Sub => BinOp::Sub,
        ast::Operator::Mult => BinOp::Mult,
        ast::Operator::MatMult => BinOp::MatMult,
        ast::Operator::Div => BinOp::Div,
        ast::Operator::Mod => BinOp::Mod,
        ast::Operator::Pow => BinOp::Pow,
        ast::Operator::LShift => BinOp::LShift,
        ast::Operator::RShift => BinOp::RShift,
        ast::Operator::BitOr => BinOp::BitOr,
        ast::Operator::BitXor => BinOp::BitXor,
        ast::Operator::BitAnd => BinOp::BitAnd,
        ast::Operator::FloorDiv => BinOp::FloorDiv,
    }
}

fn convert_params(args: ast::Arguments) -> LoweringResult<Params> {
    let mut params = Params::default();
    for arg in args.posonlyargs.into_iter().chain(args.args) {
        params.args.push(Param {
            name: arg.def.arg.to_string(),
            default: arg.default.map(|d| convert_expr(*d)).transpose()?.map(Box::new),
        });
    }
    params.vararg = args.vararg.map(|a| a.arg.to_string());
    for arg in args.kwonlyargs {
        params.kwonlyargs.push(Param {
            name: arg.def.arg.to_string(),
            default: arg.default.map(|d| convert_expr(*d)).transpose()?.map(Box::new),
        });
    }
    params.kwarg = args.kwarg.map(|a| a.arg.to_string());
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridges_simple_module() {
        let hir = parse_module("x = 1\ny = x\n", "<test>").unwrap();
        assert_eq!(hir.len(), 2);
        assert!(matches!(&hir[0], HirStmt::Assign { targets, value }
            if targets.len() == 1 && matches!(value, HirExpr::Literal(Literal::Int))));
    }

    #[test]
    fn splits_multi_alias_imports() {
        let hir = parse_module("import os, sys\n", "<test>").unwrap();
        assert_eq!(hir.len(), 2);
    }

    #[test]
    fn rejects_match_statement() {
        let err = parse_module("match x:\n    case 1:\n        pass\n", "<test>").unwrap_err();
        assert!(matches!(err, LoweringError::Unsupported { .. }));
    }

    #[test]
    fn keeps_defaults_on_params() {
        let hir = parse_module("def f(a, b=1):\n    return a\n", "<test>").unwrap();
        let HirStmt::FunctionDef { params, .. } = &hir[0] else {
            panic!("expected function definition");
        };
        assert_eq!(params.args.len(), 2);
        assert!(params.args[1].default.is_some());
    }
}
