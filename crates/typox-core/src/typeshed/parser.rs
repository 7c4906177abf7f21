//! Stub-module parsing: a visitor over the declaration grammar of `.pyi`
//! files, building a namespace of typeshed objects.
//!
//! `if sys.version_info …` / `if sys.platform …` tests are evaluated at
//! ingestion time against the active search context; only the selected
//! branch is ingested. Constructs outside the recognized grammar discard
//! the stub (*invalid-stub* policy).

use rustpython_ast::{self as ast};
use tracing::{debug, warn};

use crate::context::AnalysisContext;
use crate::error::{AnalysisError, AnalysisResult};
use crate::namespace::NsId;
use crate::objects::{
    AbstractObject, ObjId, TypeshedAssign, TypeshedClass, TypeshedFunction,
    TypeshedImportedModule, TypeshedImportedName, TypeshedModule,
};
use crate::typeshed::{SearchContext, StubModuleState, TypeExpr};
use crate::value::Value;

/// Parse (at most once) the stub for a fully-qualified module name.
pub fn parse_typeshed_module(ctx: &mut AnalysisContext, module: &str) -> AnalysisResult<ObjId> {
    if let Some(state) = ctx.typeshed.modules.get(module) {
        return match state {
            StubModuleState::Parsed(id) => Ok(*id),
            StubModuleState::Missing => Err(AnalysisError::StubMissing {
                module: module.to_string(),
            }),
        };
    }

    let path = match ctx.typeshed.stub_path(module) {
        Ok(path) => path,
        Err(err) => {
            ctx.typeshed
                .modules
                .insert(module.to_string(), StubModuleState::Missing);
            return Err(err);
        }
    };
    debug!(module, path = %path.display(), "parsing stub");

    // read once, closed before parsing begins
    let source = std::fs::read_to_string(&path)?;
    let suite = {
        use rustpython_parser::Parse;
        ast::Suite::parse(&source, &path.display().to_string()).map_err(|e| {
            AnalysisError::InvalidStub {
                module: module.to_string(),
                message: e.to_string(),
            }
        })?
    };

    let is_init = path
        .file_name()
        .is_some_and(|name| name == "__init__.pyi");

    // pre-register the module so re-export cycles terminate
    let ns = ctx.spaces.fresh();
    let module_obj = intern(
        ctx,
        module,
        AbstractObject::TypeshedModule(TypeshedModule {
            name: module.rsplit('.').next().unwrap_or(module).to_string(),
            qualname: module.to_string(),
            dict: ns,
        }),
    );
    ctx.typeshed
        .modules
        .insert(module.to_string(), StubModuleState::Parsed(module_obj));

    let visited = {
        let mut visitor = StubVisitor {
            ctx,
            module: module.to_string(),
            qualname: module.to_string(),
            is_init,
            ns,
        };
        visitor.visit_body(&suite)
    };
    if let Err(err) = visited {
        // the offending stub is discarded
        warn!(module, %err, "discarding invalid stub");
        ctx.typeshed
            .modules
            .insert(module.to_string(), StubModuleState::Missing);
        return Err(err);
    }

    Ok(module_obj)
}

fn intern(ctx: &mut AnalysisContext, qualname: &str, obj: AbstractObject) -> ObjId {
    if let Some(id) = ctx.typeshed.interned.get(qualname) {
        return *id;
    }
    let id = ctx.arena.alloc(obj);
    ctx.typeshed.interned.insert(qualname.to_string(), id);
    id
}

struct StubVisitor<'a> {
    ctx: &'a mut AnalysisContext,
    module: String,
    qualname: String,
    is_init: bool,
    ns: NsId,
}

impl StubVisitor<'_> {
    fn invalid(&self, message: impl Into<String>) -> AnalysisError {
        AnalysisError::InvalidStub {
            module: self.module.clone(),
            message: message.into(),
        }
    }

    fn bind(&mut self, name: &str, obj: ObjId) {
        let value = Value::of(obj);
        self.ctx
            .spaces
            .get_mut(self.ns)
            .write_local(name, value);
    }

    fn visit_body(&mut self, body: &[ast::Stmt]) -> AnalysisResult<()> {
        for stmt in body {
            self.visit_stmt(stmt)?;
        }
        Ok(())
    }

    fn visit_stmt(&mut self, stmt: &ast::Stmt) -> AnalysisResult<()> {
        match stmt {
            ast::Stmt::FunctionDef(f) => self.visit_function(f),
            ast::Stmt::AsyncFunctionDef(_) => Ok(()),
            ast::Stmt::ClassDef(c) => self.visit_class(c),
            ast::Stmt::Assign(a) => self.visit_assign(a),
            ast::Stmt::AnnAssign(a) => self.visit_ann_assign(a),
            ast::Stmt::If(i) => self.visit_if(i),
            ast::Stmt::Import(i) => self.visit_import(i),
            ast::Stmt::ImportFrom(i) => self.visit_import_from(i),
            ast::Stmt::Expr(e) => match e.value.as_ref() {
                ast::Expr::Constant(_) => Ok(()),
                other => Err(self.invalid(format!("unexpected expression {other:?}"))),
            },
            ast::Stmt::Pass(_) => Ok(()),
            // overload machinery and aliases we model as opaque
            _ => Ok(()),
        }
    }

    fn visit_function(&mut self, node: &ast::StmtFunctionDef) -> AnalysisResult<()> {
        let name = node.name.to_string();
        let qualname = format!("{}.{}", self.qualname, name);
        let returns = node
            .returns
            .as_deref()
            .map_or(TypeExpr::Unknown, convert_annotation);

        let existing = self
            .ctx
            .spaces
            .get(self.ns)
            .read_value(&name)
            .and_then(Value::single);
        let func_id = match existing {
            Some(id)
                if matches!(
                    self.ctx.arena.get(id),
                    AbstractObject::TypeshedFunction(_)
                ) =>
            {
                id
            }
            _ => {
                let id = intern(
                    self.ctx,
                    &qualname,
                    AbstractObject::TypeshedFunction(TypeshedFunction {
                        name: name.clone(),
                        module: self.module.clone(),
                        qualname: qualname.clone(),
                        returns: Vec::new(),
                        getters: Vec::new(),
                        setters: Vec::new(),
                        deleters: Vec::new(),
                    }),
                );
                self.bind(&name, id);
                id
            }
        };

        // decorators classify accessors; anything else stays an ordinary
        // overload
        let mut bucket = Bucket::Ordinary;
        for decorator in &node.decorator_list {
            match decorator {
                ast::Expr::Name(n) if n.id.as_str() == "property" => {
                    bucket = Bucket::Getter;
                    break;
                }
                ast::Expr::Attribute(a) if a.attr.as_str() == "setter" => {
                    bucket = Bucket::Setter;
                    break;
                }
                ast::Expr::Attribute(a) if a.attr.as_str() == "deleter" => {
                    bucket = Bucket::Deleter;
                    break;
                }
                _ => {}
            }
        }

        if let AbstractObject::TypeshedFunction(f) = self.ctx.arena.get_mut(func_id) {
            match bucket {
                Bucket::Ordinary => f.returns.push(returns),
                Bucket::Getter => f.getters.push(returns),
                Bucket::Setter => f.setters.push(returns),
                Bucket::Deleter => f.deleters.push(returns),
            }
        }
        Ok(())
    }

    fn visit_class(&mut self, node: &ast::StmtClassDef) -> AnalysisResult<()> {
        let name = node.name.to_string();
        let qualname = format!("{}.{}", self.qualname, name);

        let class_ns = self.ctx.spaces.fresh();
        let mut child = StubVisitor {
            ctx: &mut *self.ctx,
            module: self.module.clone(),
            qualname: qualname.clone(),
            is_init: self.is_init,
            ns: class_ns,
        };
        child.visit_body(&node.body)?;

        let class_id = intern(
            self.ctx,
            &qualname.clone(),
            AbstractObject::TypeshedClass(TypeshedClass {
                name: name.clone(),
                module: self.module.clone(),
                qualname,
                dict: class_ns,
            }),
        );
        self.bind(&name, class_id);
        Ok(())
    }

    fn visit_assign(&mut self, node: &ast::StmtAssign) -> AnalysisResult<()> {
        for target in &node.targets {
            let ast::Expr::Name(target) = target else {
                return Err(self.invalid("assignment to a non-name"));
            };
            let name = target.id.to_string();
            let qualname = format!("{}.{}", self.qualname, name);
            let id = intern(
                self.ctx,
                &qualname.clone(),
                AbstractObject::TypeshedAssign(TypeshedAssign {
                    name: name.clone(),
                    module: self.module.clone(),
                    qualname,
                    expr: convert_annotation(&node.value),
                    is_annotated: false,
                }),
            );
            self.bind(&name, id);
        }
        Ok(())
    }

    fn visit_ann_assign(&mut self, node: &ast::StmtAnnAssign) -> AnalysisResult<()> {
        let ast::Expr::Name(target) = node.target.as_ref() else {
            return Err(self.invalid("annotated assignment to a non-name"));
        };
        let name = target.id.to_string();
        let qualname = format!("{}.{}", self.qualname, name);
        let id = intern(
            self.ctx,
            &qualname.clone(),
            AbstractObject::TypeshedAssign(TypeshedAssign {
                name: name.clone(),
                module: self.module.clone(),
                qualname,
                expr: convert_annotation(&node.annotation),
                is_annotated: true,
            }),
        );
        self.bind(&name, id);
        Ok(())
    }

    fn visit_if(&mut self, node: &ast::StmtIf) -> AnalysisResult<()> {
        let test = eval_literal(&self.ctx.typeshed.search, &node.test)
            .map_err(|message| self.invalid(message))?;
        if test.truthy() {
            self.visit_body(&node.body)
        } else {
            self.visit_body(&node.orelse)
        }
    }

    fn visit_import(&mut self, node: &ast::StmtImport) -> AnalysisResult<()> {
        for alias in &node.names {
            let (bound, imported) = match &alias.asname {
                Some(asname) => (asname.to_string(), alias.name.to_string()),
                // `import a.b` just binds `a`
                None => {
                    let top = alias
                        .name
                        .split('.')
                        .next()
                        .unwrap_or(alias.name.as_str())
                        .to_string();
                    (top.clone(), top)
                }
            };
            let qualname = format!("{}%{}", self.qualname, bound);
            let id = intern(
                self.ctx,
                &qualname,
                AbstractObject::TypeshedImportedModule(TypeshedImportedModule {
                    name: bound.clone(),
                    module: self.module.clone(),
                    imported_module: imported,
                }),
            );
            self.bind(&bound, id);
        }
        Ok(())
    }

    fn resolve_relative(&self, node: &ast::StmtImportFrom) -> AnalysisResult<String> {
        let level = node.level.map(|l| l.to_u32()).unwrap_or(0) as usize;
        let named = node.module.as_ref().map(|m| m.to_string());
        if level == 0 {
            return named.ok_or_else(|| self.invalid("import from nowhere"));
        }
        let mut components: Vec<&str> = self.module.split('.').collect();
        let keep = if self.is_init {
            components.len().saturating_sub(level - 1)
        } else {
            components.len().saturating_sub(level)
        };
        components.truncate(keep);
        if components.is_empty() && named.is_none() {
            return Err(self.invalid("relative import beyond top-level package"));
        }
        let mut path = components.join(".");
        if let Some(named) = named {
            if path.is_empty() {
                path = named;
            } else {
                path = format!("{path}.{named}");
            }
        }
        Ok(path)
    }

    fn visit_import_from(&mut self, node: &ast::StmtImportFrom) -> AnalysisResult<()> {
        let source_module = self.resolve_relative(node)?;

        for alias in &node.names {
            if alias.name.as_str() == "*" {
                self.visit_star_import(&source_module)?;
                continue;
            }
            let bound = alias
                .asname
                .as_ref()
                .map_or_else(|| alias.name.to_string(), ToString::to_string);
            let qualname = format!("{}%{}", self.qualname, bound);
            let id = intern(
                self.ctx,
                &qualname,
                AbstractObject::TypeshedImportedName(TypeshedImportedName {
                    name: bound.clone(),
                    module: self.module.clone(),
                    imported_module: source_module.clone(),
                    imported_name: alias.name.to_string(),
                }),
            );
            self.bind(&bound, id);
        }
        Ok(())
    }

    fn visit_star_import(&mut self, source_module: &str) -> AnalysisResult<()> {
        let Ok(module_obj) = parse_typeshed_module(self.ctx, source_module) else {
            warn!(module = source_module, "star import from unavailable stub");
            return Ok(());
        };
        let Some(source_ns) = self.ctx.arena.dict_of(module_obj) else {
            return Ok(());
        };
        let exported: Vec<String> = self
            .ctx
            .spaces
            .get(source_ns)
            .names()
            .filter(|name| !name.starts_with('_'))
            .map(ToString::to_string)
            .collect();
        for name in exported {
            let qualname = format!("{}%{}", self.qualname, name);
            let id = intern(
                self.ctx,
                &qualname,
                AbstractObject::TypeshedImportedName(TypeshedImportedName {
                    name: name.clone(),
                    module: self.module.clone(),
                    imported_module: source_module.to_string(),
                    imported_name: name.clone(),
                }),
            );
            self.bind(&name, id);
        }
        Ok(())
    }
}

enum Bucket {
    Ordinary,
    Getter,
    Setter,
    Deleter,
}

/// Convert a declared type expression into the evaluable form.
pub(crate) fn convert_annotation(expr: &ast::Expr) -> TypeExpr {
    match expr {
        ast::Expr::Name(n) => TypeExpr::Name(n.id.to_string()),
        ast::Expr::Constant(c) => match &c.value {
            ast::Constant::None => TypeExpr::NoneLit,
            ast::Constant::Ellipsis => TypeExpr::Ellipsis,
            // forward reference
            ast::Constant::Str(s) => TypeExpr::Name(s.clone()),
            _ => TypeExpr::Unknown,
        },
        ast::Expr::BinOp(b) if matches!(b.op, ast::Operator::BitOr) => {
            let mut parts = Vec::new();
            flatten_union(expr, &mut parts);
            TypeExpr::Union(parts)
        }
        ast::Expr::Subscript(_) => TypeExpr::Subscript,
        ast::Expr::Attribute(_) => {
            let mut path = Vec::new();
            let mut cursor = expr;
            loop {
                match cursor {
                    ast::Expr::Attribute(a) => {
                        path.push(a.attr.to_string());
                        cursor = &a.value;
                    }
                    ast::Expr::Name(n) => {
                        path.push(n.id.to_string());
                        break;
                    }
                    _ => return TypeExpr::Unknown,
                }
            }
            path.reverse();
            TypeExpr::Attribute(path)
        }
        _ => TypeExpr::Unknown,
    }
}

fn flatten_union(expr: &ast::Expr, out: &mut Vec<TypeExpr>) {
    match expr {
        ast::Expr::BinOp(b) if matches!(b.op, ast::Operator::BitOr) => {
            flatten_union(&b.left, out);
            flatten_union(&b.right, out);
        }
        other => out.push(convert_annotation(other)),
    }
}

// ---------------------------------------------------------------------
// compile-time evaluation of stub conditionals
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum LitVal {
    Int(i64),
    Str(String),
    Bool(bool),
    Tuple(Vec<LitVal>),
}

impl LitVal {
    fn truthy(&self) -> bool {
        match self {
            LitVal::Int(i) => *i != 0,
            LitVal::Str(s) => !s.is_empty(),
            LitVal::Bool(b) => *b,
            LitVal::Tuple(t) => !t.is_empty(),
        }
    }
}

type LitResult = Result<LitVal, String>;

fn eval_literal(search: &SearchContext, expr: &ast::Expr) -> LitResult {
    match expr {
        ast::Expr::Constant(c) => match &c.value {
            ast::Constant::Int(i) => Ok(LitVal::Int(i.try_into().unwrap_or(0))),
            ast::Constant::Str(s) => Ok(LitVal::Str(s.clone())),
            ast::Constant::Bool(b) => Ok(LitVal::Bool(*b)),
            other => Err(format!("constant {other:?} in stub conditional")),
        },
        ast::Expr::Tuple(t) => {
            let elts: Result<Vec<LitVal>, String> = t
                .elts
                .iter()
                .map(|e| eval_literal(search, e))
                .collect();
            Ok(LitVal::Tuple(elts?))
        }
        ast::Expr::Attribute(a) => {
            let ast::Expr::Name(base) = a.value.as_ref() else {
                return Err("attribute access not on sys".to_string());
            };
            if base.id.as_str() != "sys" {
                return Err(format!("attribute access on {}", base.id));
            }
            match a.attr.as_str() {
                "platform" => Ok(LitVal::Str(search.platform.clone())),
                "version_info" => Ok(LitVal::Tuple(vec![
                    LitVal::Int(i64::from(search.version.0)),
                    LitVal::Int(i64::from(search.version.1)),
                ])),
                other => Err(format!("unknown sys attribute {other}")),
            }
        }
        ast::Expr::Name(n) if n.id.as_str() == "TYPE_CHECKING" => Ok(LitVal::Bool(true)),
        ast::Expr::Subscript(s) => {
            let value = eval_literal(search, &s.value)?;
            let index = eval_literal(search, &s.slice)?;
            match (value, index) {
                (LitVal::Tuple(elts), LitVal::Int(i)) => elts
                    .get(usize::try_from(i).map_err(|_| "negative index".to_string())?)
                    .cloned()
                    .ok_or_else(|| "index out of range".to_string()),
                _ => Err("unsupported subscript in stub conditional".to_string()),
            }
        }
        ast::Expr::Compare(c) => {
            if c.ops.len() != 1 || c.comparators.len() != 1 {
                return Err("chained comparison in stub conditional".to_string());
            }
            let left = eval_literal(search, &c.left)?;
            let right = eval_literal(search, &c.comparators[0])?;
            compare(&c.ops[0], &left, &right)
        }
        ast::Expr::BoolOp(b) => {
            let mut last = LitVal::Bool(matches!(b.op, ast::BoolOp::And));
            for value in &b.values {
                last = eval_literal(search, value)?;
                match b.op {
                    ast::BoolOp::Or if last.truthy() => return Ok(last),
                    ast::BoolOp::And if !last.truthy() => return Ok(last),
                    _ => {}
                }
            }
            Ok(last)
        }
        ast::Expr::UnaryOp(u) if matches!(u.op, ast::UnaryOp::Not) => {
            let operand = eval_literal(search, &u.operand)?;
            Ok(LitVal::Bool(!operand.truthy()))
        }
        other => Err(format!("unsupported stub conditional {other:?}")),
    }
}

fn compare(op: &ast::CmpOp, left: &LitVal, right: &LitVal) -> LitResult {
    use std::cmp::Ordering;

    let ordering = partial_order(left, right)?;
    let result = match op {
        ast::CmpOp::Eq => ordering == Ordering::Equal,
        ast::CmpOp::NotEq => ordering != Ordering::Equal,
        ast::CmpOp::Lt => ordering == Ordering::Less,
        ast::CmpOp::LtE => ordering != Ordering::Greater,
        ast::CmpOp::Gt => ordering == Ordering::Greater,
        ast::CmpOp::GtE => ordering != Ordering::Less,
        other => return Err(format!("unsupported comparison {other:?}")),
    };
    Ok(LitVal::Bool(result))
}

fn partial_order(left: &LitVal, right: &LitVal) -> Result<std::cmp::Ordering, String> {
    use std::cmp::Ordering;

    match (left, right) {
        (LitVal::Int(a), LitVal::Int(b)) => Ok(a.cmp(b)),
        (LitVal::Str(a), LitVal::Str(b)) => Ok(a.cmp(b)),
        (LitVal::Bool(a), LitVal::Bool(b)) => Ok(a.cmp(b)),
        (LitVal::Tuple(a), LitVal::Tuple(b)) => {
            for (x, y) in a.iter().zip(b.iter()) {
                match partial_order(x, y)? {
                    Ordering::Equal => continue,
                    other => return Ok(other),
                }
            }
            Ok(a.len().cmp(&b.len()))
        }
        _ => Err("comparison between mismatched literal kinds".to_string()),
    }
}
