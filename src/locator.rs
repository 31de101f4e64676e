//! Finds the function nodes a [`FunctionQuery`] can select.
//!
//! One [`Visit`] pass records every named function-like node as a
//! [`FunctionSite`], in depth-first source order. Queries are then answered
//! against that list, so a file is walked once no matter how many configs
//! are bound to it.

use std::collections::HashMap;

use swc_core::{
    common::{BytePos, Spanned},
    ecma::{
        ast::*,
        visit::{Visit, VisitWith},
    },
};

use crate::config::{FunctionKind, FunctionQuery, QueryTarget};

// -----------------------------------------------------------------------------
// Sites
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteShape {
    Constructor,
    ClassMethod,
    ObjectMethod,
    FunctionDeclaration,
    FunctionExpression,
    ArrowFunction,
}

/// Byte offsets are relative to the start of the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteBody {
    /// `open` is the offset of `{`, `close` the offset of `}`. `inner` is
    /// where wrapper code may start: after `{` and any directive prologue.
    Block { open: u32, close: u32, inner: u32 },
    /// Arrow function with an expression body.
    Expr { start: u32, end: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SiteParams {
    /// From the start of the first parameter to the end of the last.
    pub span: Option<(u32, u32)>,
    /// Set when every parameter is a plain identifier or `...ident`; the rest
    /// parameter keeps its `...` prefix.
    pub simple: Option<Vec<String>>,
    /// The function's `length`: parameters before the first default or rest.
    pub arity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSite {
    pub shape: SiteShape,
    pub kind: FunctionKind,
    /// Every name the function answers to: its own identifier plus the
    /// binding it was assigned to.
    pub names: Vec<String>,
    /// Assigned to an object member, so `this` is meaningful.
    pub member_bound: bool,
    pub is_static: bool,
    /// Names of the immediately enclosing class (own name and binding).
    pub class_names: Vec<String>,
    /// Primary names of all enclosing classes, outermost first.
    pub class_chain: Vec<String>,
    /// Names of enclosing functions, outermost first.
    pub scope: Vec<String>,
    /// Offset of the node itself.
    pub start: u32,
    /// Key of a class method.
    pub key: Option<(u32, u32)>,
    /// The body refers to `super` outside any nested function or class.
    pub uses_super: bool,
    pub body: SiteBody,
    pub params: SiteParams,
}

impl FunctionSite {
    pub fn name(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or("<anonymous>")
    }

    /// Whether the generated payload carries `self: this`.
    pub fn has_receiver(&self) -> bool {
        match self.shape {
            SiteShape::Constructor | SiteShape::ClassMethod | SiteShape::ObjectMethod => true,
            SiteShape::FunctionExpression => self.member_bound,
            SiteShape::FunctionDeclaration | SiteShape::ArrowFunction => false,
        }
    }

    fn answers_to(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    fn in_class(&self, class: &str) -> bool {
        self.class_names.iter().any(|n| n == class)
    }

    pub fn matches(&self, query: &FunctionQuery) -> bool {
        if !query.accepts_kind(self.kind) {
            return false;
        }
        match query.target() {
            Some(QueryTarget::Constructor { class }) => {
                self.shape == SiteShape::Constructor && self.in_class(class)
            }
            Some(QueryTarget::ClassMethod { class, method }) => {
                self.shape == SiteShape::ClassMethod && self.in_class(class) && self.answers_to(method)
            }
            Some(QueryTarget::ObjectMethod { method }) => {
                let method_like = match self.shape {
                    SiteShape::ObjectMethod => true,
                    SiteShape::FunctionExpression | SiteShape::ArrowFunction => self.member_bound,
                    _ => false,
                };
                method_like && self.answers_to(method)
            }
            Some(QueryTarget::Function { name }) => {
                matches!(
                    self.shape,
                    SiteShape::FunctionDeclaration
                        | SiteShape::FunctionExpression
                        | SiteShape::ArrowFunction
                ) && self.answers_to(name)
            }
            None => false,
        }
    }
}

/// The `query.index`-th matching site in traversal order.
pub fn locate<'s>(sites: &'s [FunctionSite], query: &FunctionQuery) -> Option<&'s FunctionSite> {
    sites.iter().filter(|site| site.matches(query)).nth(query.index)
}

/// Walk the whole program, nested functions and class bodies included.
pub fn collect_sites(program: &Program, base: BytePos) -> Vec<FunctionSite> {
    let mut collector = SiteCollector {
        base,
        sites: vec![],
        classes: vec![],
        scope: vec![],
        pending: HashMap::new(),
    };
    program.visit_with(&mut collector);
    collector.sites
}

// -----------------------------------------------------------------------------
// Collector
// -----------------------------------------------------------------------------

struct PendingBinding {
    names: Vec<String>,
    member: bool,
}

struct SiteCollector {
    base: BytePos,
    sites: Vec<FunctionSite>,
    classes: Vec<Vec<String>>,
    scope: Vec<String>,
    // Names for function/class expressions, keyed by the expression's start.
    pending: HashMap<BytePos, PendingBinding>,
}

fn unwrap_parens(mut e: &Expr) -> &Expr {
    while let Expr::Paren(p) = e {
        e = &p.expr;
    }
    e
}

fn is_nameable(e: &Expr) -> bool {
    matches!(e, Expr::Fn(_) | Expr::Arrow(_) | Expr::Class(_))
}

fn prop_name(key: &PropName) -> Option<String> {
    match key {
        PropName::Ident(i) => Some(i.sym.to_string()),
        PropName::Str(s) => Some(s.value.to_string()),
        _ => None,
    }
}

// "module.exports" for `module.exports = ...`; None once anything is dynamic.
fn member_path(m: &MemberExpr) -> Option<String> {
    let root = match &*m.obj {
        Expr::Ident(i) => i.sym.to_string(),
        Expr::Member(inner) => member_path(inner)?,
        _ => return None,
    };
    match &m.prop {
        MemberProp::Ident(p) => Some(format!("{root}.{}", p.sym)),
        _ => None,
    }
}

fn simple_param_names<'p>(pats: impl Iterator<Item = &'p Pat>) -> Option<Vec<String>> {
    pats.map(|pat| match pat {
        Pat::Ident(b) => Some(b.id.sym.to_string()),
        Pat::Rest(r) => match &*r.arg {
            Pat::Ident(b) => Some(format!("...{}", b.id.sym)),
            _ => None,
        },
        _ => None,
    })
    .collect()
}

fn arity<'p>(pats: impl Iterator<Item = &'p Pat>) -> usize {
    pats.take_while(|pat| !matches!(pat, Pat::Assign(_) | Pat::Rest(_)))
        .count()
}

/// Looks for `super` in one function body. Nested functions, classes and
/// accessors have their own home object and are skipped; arrows are not.
#[derive(Default)]
struct SuperFinder {
    found: bool,
}

impl Visit for SuperFinder {
    fn visit_super(&mut self, _: &Super) {
        self.found = true;
    }

    fn visit_function(&mut self, _: &Function) {}

    fn visit_class(&mut self, _: &Class) {}

    fn visit_getter_prop(&mut self, _: &GetterProp) {}

    fn visit_setter_prop(&mut self, _: &SetterProp) {}
}

fn uses_super<N: VisitWith<SuperFinder>>(body: &N) -> bool {
    let mut finder = SuperFinder::default();
    body.visit_with(&mut finder);
    finder.found
}

impl SiteCollector {
    fn off(&self, pos: BytePos) -> u32 {
        pos.0.saturating_sub(self.base.0)
    }

    fn block_body(&self, block: &BlockStmt) -> SiteBody {
        let open = self.off(block.span.lo);
        let directives = block
            .stmts
            .iter()
            .take_while(|stmt| match stmt {
                Stmt::Expr(e) => matches!(&*e.expr, Expr::Lit(Lit::Str(_))),
                _ => false,
            })
            .last();
        SiteBody::Block {
            open,
            close: self.off(block.span.hi).saturating_sub(1),
            inner: directives.map_or(open + 1, |d| self.off(d.span().hi)),
        }
    }

    fn params_of<'p>(&self, pats: &[&'p Pat]) -> SiteParams {
        let span = match (pats.first(), pats.last()) {
            (Some(first), Some(last)) => {
                Some((self.off(first.span().lo), self.off(last.span().hi)))
            }
            _ => None,
        };
        SiteParams {
            span,
            simple: simple_param_names(pats.iter().copied()),
            arity: arity(pats.iter().copied()),
        }
    }

    fn current_class(&self) -> Vec<String> {
        self.classes.last().cloned().unwrap_or_default()
    }

    fn class_chain(&self) -> Vec<String> {
        self.classes
            .iter()
            .filter_map(|names| names.first().cloned())
            .collect()
    }

    fn remember_binding(&mut self, value: &Expr, names: Vec<String>, member: bool) {
        let value = unwrap_parens(value);
        if is_nameable(value) && !names.is_empty() {
            self.pending
                .insert(value.span().lo, PendingBinding { names, member });
        }
    }

    fn take_binding(&mut self, lo: BytePos) -> PendingBinding {
        self.pending.remove(&lo).unwrap_or(PendingBinding {
            names: vec![],
            member: false,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn push_site(
        &mut self,
        shape: SiteShape,
        kind: FunctionKind,
        names: Vec<String>,
        member_bound: bool,
        is_static: bool,
        start: BytePos,
        body: SiteBody,
        params: SiteParams,
        uses_super: bool,
    ) {
        let (class_names, class_chain) = match shape {
            SiteShape::Constructor | SiteShape::ClassMethod => {
                (self.current_class(), self.class_chain())
            }
            _ => (vec![], self.class_chain()),
        };
        self.sites.push(FunctionSite {
            shape,
            kind,
            names,
            member_bound,
            is_static,
            class_names,
            class_chain,
            scope: self.scope.clone(),
            start: self.off(start),
            key: None,
            uses_super,
            body,
            params,
        });
    }

    fn walk_scoped<N: VisitWith<Self>>(&mut self, name: Option<String>, node: &N) {
        let pushed = name.is_some();
        if let Some(name) = name {
            self.scope.push(name);
        }
        node.visit_children_with(self);
        if pushed {
            self.scope.pop();
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn function_site(
        &mut self,
        shape: SiteShape,
        names: Vec<String>,
        member_bound: bool,
        is_static: bool,
        start: BytePos,
        function: &Function,
    ) {
        let Some(block) = &function.body else {
            return;
        };
        let pats: Vec<&Pat> = function.params.iter().map(|p| &p.pat).collect();
        let params = self.params_of(&pats);
        let body = self.block_body(block);
        self.push_site(
            shape,
            FunctionKind::from_flags(function.is_async, function.is_generator),
            names,
            member_bound,
            is_static,
            start,
            body,
            params,
            uses_super(block),
        );
    }
}

impl Visit for SiteCollector {
    // ---------- bindings that name expressions ----------

    fn visit_var_declarator(&mut self, d: &VarDeclarator) {
        if let (Pat::Ident(name), Some(init)) = (&d.name, &d.init) {
            self.remember_binding(init, vec![name.id.sym.to_string()], false);
        }
        d.visit_children_with(self);
    }

    fn visit_assign_expr(&mut self, n: &AssignExpr) {
        if n.op == AssignOp::Assign {
            match &n.left {
                AssignTarget::Simple(SimpleAssignTarget::Ident(b)) => {
                    self.remember_binding(&n.right, vec![b.id.sym.to_string()], false);
                }
                AssignTarget::Simple(SimpleAssignTarget::Member(m)) => {
                    if let MemberProp::Ident(prop) = &m.prop {
                        let mut names = vec![prop.sym.to_string()];
                        if let Some(path) = member_path(m) {
                            names.push(path);
                        }
                        self.remember_binding(&n.right, names, true);
                    }
                }
                _ => {}
            }
        }
        n.visit_children_with(self);
    }

    fn visit_key_value_prop(&mut self, n: &KeyValueProp) {
        if let Some(key) = prop_name(&n.key) {
            self.remember_binding(&n.value, vec![key], true);
        }
        n.visit_children_with(self);
    }

    // ---------- classes ----------

    fn visit_class_decl(&mut self, n: &ClassDecl) {
        self.classes.push(vec![n.ident.sym.to_string()]);
        n.visit_children_with(self);
        self.classes.pop();
    }

    fn visit_class_expr(&mut self, n: &ClassExpr) {
        let binding = self.take_binding(n.class.span.lo);
        let mut names: Vec<String> = n.ident.iter().map(|i| i.sym.to_string()).collect();
        names.extend(binding.names);
        self.classes.push(names);
        n.visit_children_with(self);
        self.classes.pop();
    }

    fn visit_constructor(&mut self, n: &Constructor) {
        if let Some(body) = &n.body {
            let pats: Vec<&Pat> = n
                .params
                .iter()
                .filter_map(|p| match p {
                    ParamOrTsParamProp::Param(p) => Some(&p.pat),
                    ParamOrTsParamProp::TsParamProp(_) => None,
                })
                .collect();
            let params = self.params_of(&pats);
            self.push_site(
                SiteShape::Constructor,
                FunctionKind::Sync,
                vec!["constructor".to_string()],
                false,
                false,
                n.span.lo,
                self.block_body(body),
                params,
                false,
            );
        }
        self.walk_scoped(Some("constructor".to_string()), n);
    }

    fn visit_class_method(&mut self, n: &ClassMethod) {
        let name = prop_name(&n.key);
        if let (Some(name), MethodKind::Method) = (&name, n.kind) {
            self.function_site(
                SiteShape::ClassMethod,
                vec![name.clone()],
                false,
                n.is_static,
                n.span.lo,
                &n.function,
            );
            let key = n.key.span();
            let key = (self.off(key.lo), self.off(key.hi));
            if n.function.body.is_some() {
                if let Some(site) = self.sites.last_mut() {
                    site.key = Some(key);
                }
            }
        }
        self.walk_scoped(name, n);
    }

    // ---------- functions ----------

    fn visit_method_prop(&mut self, n: &MethodProp) {
        let name = prop_name(&n.key);
        if let Some(name) = &name {
            self.function_site(
                SiteShape::ObjectMethod,
                vec![name.clone()],
                true,
                false,
                n.key.span().lo,
                &n.function,
            );
        }
        self.walk_scoped(name, n);
    }

    fn visit_fn_decl(&mut self, n: &FnDecl) {
        let name = n.ident.sym.to_string();
        self.function_site(
            SiteShape::FunctionDeclaration,
            vec![name.clone()],
            false,
            false,
            n.span().lo,
            &n.function,
        );
        self.walk_scoped(Some(name), n);
    }

    fn visit_fn_expr(&mut self, n: &FnExpr) {
        let binding = self.take_binding(n.function.span.lo);
        let mut names = binding.names;
        if let Some(ident) = &n.ident {
            names.push(ident.sym.to_string());
        }
        let scope_name = names.first().cloned();
        if !names.is_empty() {
            self.function_site(
                SiteShape::FunctionExpression,
                names,
                binding.member,
                false,
                n.function.span.lo,
                &n.function,
            );
        }
        self.walk_scoped(scope_name, n);
    }

    fn visit_arrow_expr(&mut self, n: &ArrowExpr) {
        let binding = self.take_binding(n.span.lo);
        let scope_name = binding.names.first().cloned();
        if !binding.names.is_empty() {
            let pats: Vec<&Pat> = n.params.iter().collect();
            let params = self.params_of(&pats);
            let body = match &*n.body {
                BlockStmtOrExpr::BlockStmt(block) => self.block_body(block),
                BlockStmtOrExpr::Expr(expr) => {
                    let span = expr.span();
                    SiteBody::Expr {
                        start: self.off(span.lo),
                        end: self.off(span.hi),
                    }
                }
            };
            let uses_super = uses_super(&*n.body);
            self.push_site(
                SiteShape::ArrowFunction,
                FunctionKind::from_flags(n.is_async, false),
                binding.names,
                binding.member,
                false,
                n.span.lo,
                body,
                params,
                uses_super,
            );
        }
        self.walk_scoped(scope_name, n);
    }
}
