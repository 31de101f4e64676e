//! Emits the text edits that instrument each planned injection point.
//!
//! Every wrapper is built from the original body text, which stays in place;
//! only the surrounding boilerplate is inserted. Nested layers on the same
//! node wrap each other, first config outermost.

use std::collections::HashMap;

use crate::config::FunctionKind;
use crate::locator::{FunctionSite, SiteBody, SiteShape};
use crate::planner::{ChannelDecl, InjectionPlan, InjectionPoint};
use crate::rewrite::{Edit, Side};

const TRACING_CHANNEL: &str = "tr_ch_tracingChannel";
const IMPL_PREFIX: &str = "tr_ch_impl$";
const ARGS: &str = "__tr$args";
const PARAM: &str = "__tr$p";
const REST: &str = "__tr$rest";
const TRACED: &str = "__tr$traced";
const WRAPPED: &str = "__tr$wrapped";
const CTX: &str = "__tr$ctx";
const ERR: &str = "__tr$err";
const REF_ERR: &str = "__tr$refErr";

const INDENT: &str = "    ";

/// Where the channel prologue goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrologueSlot {
    pub offset: u32,
    /// Source offset prologue lines are attributed to.
    pub anchor: u32,
    /// The slot follows a statement on the same line (a directive).
    pub after_statement: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    pub esm: bool,
    pub dc_module: &'a str,
    /// Added to every payload as `moduleVersion` when set.
    pub module_version: Option<&'a str>,
    pub prologue: PrologueSlot,
}

// JS string literal; JSON escaping is a valid subset.
fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{s}\""))
}

/// Symbol-keyed method that keeps a generator body using `super`.
struct HiddenMethod {
    ident: String,
    description: String,
}

fn prologue(target: &Target<'_>, channels: &[ChannelDecl], hidden: &[&HiddenMethod]) -> String {
    let dc = js_string(target.dc_module);
    let mut out = if target.esm {
        format!("import {{ tracingChannel as {TRACING_CHANNEL} }} from {dc};\n")
    } else {
        format!("const {{ tracingChannel: {TRACING_CHANNEL} }} = require({dc});\n")
    };
    for decl in channels {
        out.push_str(&format!(
            "const {} = {TRACING_CHANNEL}({});\n",
            decl.ident,
            js_string(&decl.channel)
        ));
    }
    for method in hidden {
        out.push_str(&format!(
            "const {} = Symbol({});\n",
            method.ident,
            js_string(&method.description)
        ));
    }
    out
}

fn line_indent(source: &str, offset: u32) -> &str {
    let offset = (offset as usize).min(source.len());
    let line_start = source[..offset].rfind('\n').map_or(0, |i| i + 1);
    let line = &source[line_start..];
    let width = line.len() - line.trim_start_matches([' ', '\t']).len();
    &line[..width]
}

/// Joins template lines either one per line at a given indent or inline.
struct Layout {
    sep: String,
    tail: String,
}

impl Layout {
    fn block(source: &str, open: u32, close: u32) -> Self {
        Self {
            sep: format!("\n{}{INDENT}", line_indent(source, open)),
            tail: format!("\n{}", line_indent(source, close)),
        }
    }

    fn inline() -> Self {
        Self {
            sep: " ".to_string(),
            tail: " ".to_string(),
        }
    }

    fn opening(&self, lines: &[String]) -> String {
        let mut out = String::new();
        for line in lines {
            out.push_str(&self.sep);
            out.push_str(line);
        }
        out
    }

    fn closing(&self, lines: &[String]) -> String {
        let mut out = lines.join(&self.sep);
        out.push_str(&self.tail);
        out
    }
}

fn params_text<'a>(source: &'a str, site: &FunctionSite) -> &'a str {
    site.params
        .span
        .and_then(|(lo, hi)| source.get(lo as usize..hi as usize))
        .unwrap_or("")
}

// Past a trailing comma after the last parameter, if there is one.
fn params_end(source: &str, hi: u32) -> u32 {
    let rest = source.get(hi as usize..).unwrap_or("");
    let trimmed = rest.trim_start();
    if trimmed.starts_with(',') {
        hi + (rest.len() - trimmed.len()) as u32 + 1
    } else {
        hi
    }
}

/// `__tr$p0, __tr$p1, ...`: one plain parameter per counted parameter, so the
/// outer function keeps its `length` and evaluates no defaults.
fn placeholders(arity: usize) -> Vec<String> {
    (0..arity).map(|i| format!("{PARAM}{i}")).collect()
}

fn arrow_placeholders(arity: usize) -> Vec<String> {
    let mut names = placeholders(arity);
    names.push(format!("...{REST}"));
    names
}

fn payload(site: &FunctionSite, module_version: Option<&str>) -> String {
    let mut fields = vec![match site.shape {
        SiteShape::ArrowFunction => format!("arguments: {ARGS}"),
        _ => "arguments".to_string(),
    }];
    if site.has_receiver() && site.shape != SiteShape::Constructor {
        fields.push("self: this".to_string());
    }
    if let Some(version) = module_version {
        fields.push(format!("moduleVersion: {}", js_string(version)));
    }
    format!("{{ {} }}", fields.join(", "))
}

fn async_prefix(kind: FunctionKind) -> &'static str {
    if kind.is_async() {
        "async "
    } else {
        ""
    }
}

/// Parameter list for a layer's inner implementation. Outer layers forward
/// whatever they are applied with; only the innermost rebinds the originals.
fn wrapped_params(source: &str, point: &InjectionPoint<'_>) -> String {
    if point.is_innermost() {
        params_text(source, point.site).to_string()
    } else if point.site.shape == SiteShape::ArrowFunction {
        format!("...{ARGS}")
    } else {
        String::new()
    }
}

fn function_lines(
    source: &str,
    point: &InjectionPoint<'_>,
    module_version: Option<&str>,
) -> (Vec<String>, Vec<String>) {
    let site = point.site;
    let ch = &point.channel_ident;
    let op = site.kind.tracing_operator();
    let params = wrapped_params(source, point);
    let asyncness = async_prefix(site.kind);

    let mut pre = Vec::new();
    match site.shape {
        SiteShape::ArrowFunction => {
            if point.layer == 0 {
                let names = match &site.params.simple {
                    Some(names) => names.clone(),
                    None => arrow_placeholders(site.params.arity),
                };
                pre.push(format!("const {ARGS} = [{}];", names.join(", ")));
            }
        }
        _ => pre.push(format!("const {ARGS} = arguments;")),
    }
    pre.push(format!("const {TRACED} = () => {{"));
    pre.push(format!("const {WRAPPED} = {asyncness}({params}) => {{"));

    let post = vec![
        "};".to_string(),
        format!("return {WRAPPED}.apply(null, {ARGS});"),
        "};".to_string(),
        format!("if (!{ch}.hasSubscribers) return {TRACED}();"),
        format!("return {ch}.{op}({TRACED}, {});", payload(site, module_version)),
    ];
    (pre, post)
}

fn generator_lines(
    point: &InjectionPoint<'_>,
    params: &str,
    module_version: Option<&str>,
) -> (Vec<String>, Vec<String>) {
    let site = point.site;
    let ch = &point.channel_ident;
    let pre = vec![
        format!("const {ARGS} = arguments;"),
        format!(
            "const {WRAPPED} = {}function* ({params}) {{",
            async_prefix(site.kind)
        ),
    ];
    let post = vec![
        "};".to_string(),
        format!("const {TRACED} = () => {WRAPPED}.apply(this, {ARGS});"),
        format!("if (!{ch}.hasSubscribers) return yield* {TRACED}();"),
        format!(
            "return yield* {ch}.{}({TRACED}, {});",
            site.kind.tracing_operator(),
            payload(site, module_version)
        ),
    ];
    (pre, post)
}

fn constructor_lines(
    point: &InjectionPoint<'_>,
    module_version: Option<&str>,
) -> (Vec<String>, Vec<String>) {
    let ch = &point.channel_ident;
    let attach_self = format!("try {{ {CTX}.self = this; }} catch ({REF_ERR}) {{}}");
    let pre = vec![
        format!("const {CTX} = {};", payload(point.site, module_version)),
        "try {".to_string(),
        format!("if ({ch}.hasSubscribers) {ch}.start.publish({CTX});"),
    ];
    let post = vec![
        format!("}} catch ({ERR}) {{"),
        format!("if ({ch}.hasSubscribers) {{"),
        format!("{CTX}.error = {ERR};"),
        attach_self.clone(),
        format!("{ch}.error.publish({CTX});"),
        "}".to_string(),
        format!("throw {ERR};"),
        "} finally {".to_string(),
        format!("if ({ch}.hasSubscribers) {{"),
        attach_self,
        format!("{ch}.end.publish({CTX});"),
        "}".to_string(),
        "}".to_string(),
    ];
    (pre, post)
}

fn site_scope(site: &FunctionSite) -> i64 {
    i64::from(site.start)
}

/// Class generator methods whose body uses `super` keep that body in a
/// method; a function expression would lose the home object.
fn needs_hidden_method(site: &FunctionSite) -> bool {
    site.shape == SiteShape::ClassMethod
        && site.kind.is_generator()
        && site.uses_super
        && site.key.is_some()
}

// Layers sit between the header and the delegating call; closings follow it,
// innermost first.
const CORE_SEQ: i64 = 1 << 40;

/// A public method is inserted before the original, which is re-keyed to
/// `[tr_ch_impl$N]`. The public method runs the layers and delegates with
/// `yield*`.
fn hidden_method_edits(
    source: &str,
    point: &InjectionPoint<'_>,
    hidden: &HiddenMethod,
    module_version: Option<&str>,
    edits: &mut Vec<Edit>,
) {
    let site = point.site;
    let anchor = site.start;
    let scope = site_scope(site);
    let layer = point.layer as i64;
    let layout = Layout::block(source, site.start, site.start);
    let (pre, post) = generator_lines(point, "", module_version);

    if point.layer == 0 {
        let key = site
            .key
            .and_then(|(lo, hi)| source.get(lo as usize..hi as usize))
            .unwrap_or_default();
        let header = format!(
            "{}{}*{key}({}) {{",
            if site.is_static { "static " } else { "" },
            async_prefix(site.kind),
            placeholders(site.params.arity).join(", ")
        );
        edits.push(Edit::insert(site.start, header, anchor, Side::Open, scope, i64::MIN));
        edits.push(Edit::insert(
            site.start,
            format!("{}}}{}", layout.tail, layout.tail),
            anchor,
            Side::Open,
            scope,
            i64::MAX,
        ));
        if let Some((lo, hi)) = site.key {
            edits.push(Edit {
                side: Side::Close,
                scope: i64::MAX,
                ..Edit::replace(lo, hi, format!("[{}]", hidden.ident), anchor)
            });
        }
    }
    if point.is_innermost() {
        let core = format!("return yield* this[{}].apply(this, arguments);", hidden.ident);
        edits.push(Edit::insert(site.start, layout.opening(&[core]), anchor, Side::Open, scope, CORE_SEQ));
    }
    let closing_seq = CORE_SEQ + (point.layers - point.layer) as i64;
    edits.push(Edit::insert(site.start, layout.opening(&pre), anchor, Side::Open, scope, layer));
    edits.push(Edit::insert(site.start, layout.opening(&post), anchor, Side::Open, scope, closing_seq));
}

fn point_edits(
    source: &str,
    point: &InjectionPoint<'_>,
    module_version: Option<&str>,
    edits: &mut Vec<Edit>,
) {
    let site = point.site;
    let anchor = site.start;
    let scope = site_scope(site);
    let layer = point.layer as i64;

    let (pre, post) = match (site.shape, site.kind.is_generator()) {
        (SiteShape::Constructor, _) => constructor_lines(point, module_version),
        (_, true) => generator_lines(point, &wrapped_params(source, point), module_version),
        _ => function_lines(source, point, module_version),
    };

    // Parameters with defaults or patterns are evaluated once, by the inner
    // implementation; the outer list becomes plain placeholders.
    if point.layer == 0 && site.shape != SiteShape::Constructor && site.params.simple.is_none() {
        if let Some((lo, hi)) = site.params.span {
            let names = match site.shape {
                SiteShape::ArrowFunction => arrow_placeholders(site.params.arity),
                _ => placeholders(site.params.arity),
            };
            edits.push(Edit::replace(lo, params_end(source, hi), names.join(", "), anchor));
        }
    }

    match site.body {
        SiteBody::Block { open, close, inner } => {
            let layout = Layout::block(source, open, close);
            edits.push(Edit::insert(inner, layout.opening(&pre), anchor, Side::Open, scope, layer));
            edits.push(Edit::insert(close, layout.closing(&post), anchor, Side::Close, -scope, -layer - 1));
        }
        SiteBody::Expr { start, end } => {
            let layout = Layout::inline();
            if point.layer == 0 {
                edits.push(Edit::insert(start, "{".to_string(), anchor, Side::Open, scope, i64::MIN));
                edits.push(Edit::insert(start, " return (".to_string(), anchor, Side::Open, scope, i64::MAX));
                edits.push(Edit::insert(end, "); ".to_string(), anchor, Side::Close, -scope, i64::MIN));
                edits.push(Edit::insert(end, "}".to_string(), anchor, Side::Close, -scope, i64::MAX));
            }
            edits.push(Edit::insert(start, layout.opening(&pre), anchor, Side::Open, scope, layer));
            edits.push(Edit::insert(end, layout.closing(&post), anchor, Side::Close, -scope, -layer - 1));
        }
    }
}

/// All edits for one file: the channel prologue plus one wrapper per point.
pub fn generate(source: &str, plan: &InjectionPlan<'_>, target: &Target<'_>) -> Vec<Edit> {
    let mut edits = Vec::with_capacity(plan.points.len() * 2 + 1);

    let mut hidden: HashMap<u32, HiddenMethod> = HashMap::new();
    let mut hidden_order = Vec::new();
    for point in &plan.points {
        if point.layer == 0 && needs_hidden_method(point.site) {
            hidden_order.push(point.site.start);
            hidden.insert(
                point.site.start,
                HiddenMethod {
                    ident: format!("{IMPL_PREFIX}{}", hidden_order.len()),
                    description: point.site.name().to_string(),
                },
            );
        }
    }
    let declared: Vec<&HiddenMethod> = hidden_order.iter().filter_map(|at| hidden.get(at)).collect();

    let mut text = prologue(target, &plan.channels, &declared);
    if target.prologue.after_statement {
        text.pop();
        text.insert(0, '\n');
    }
    edits.push(Edit::insert(
        target.prologue.offset,
        text,
        target.prologue.anchor,
        Side::Open,
        i64::MIN,
        0,
    ));

    for point in &plan.points {
        match hidden.get(&point.site.start) {
            Some(method) => {
                hidden_method_edits(source, point, method, target.module_version, &mut edits)
            }
            None => point_edits(source, point, target.module_version, &mut edits),
        }
    }
    edits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FunctionQuery, InstrumentationConfig, ModuleMatcher};
    use crate::locator::collect_sites;
    use crate::planner::plan;
    use crate::rewrite::apply;
    use crate::transformer::{parse, ModuleFormat};
    use std::sync::Arc;

    fn instrument(src: &str, queries: &[(&str, FunctionQuery)]) -> String {
        instrument_with_version(src, queries, None)
    }

    fn instrument_with_version(
        src: &str,
        queries: &[(&str, FunctionQuery)],
        module_version: Option<&str>,
    ) -> String {
        let parsed = parse(src, ModuleFormat::Cjs).unwrap();
        let sites = collect_sites(&parsed.program, parsed.base);
        let configs: Vec<_> = queries
            .iter()
            .map(|(ch, q)| {
                Arc::new(InstrumentationConfig::new(
                    ch,
                    ModuleMatcher::new("m", "*", "i.js"),
                    q.clone(),
                ))
            })
            .collect();
        let planned = plan(&configs, &sites).unwrap();
        let target = Target {
            esm: false,
            dc_module: "diagnostics_channel",
            module_version,
            prologue: PrologueSlot {
                offset: 0,
                anchor: 0,
                after_statement: false,
            },
        };
        let out = apply(src, generate(src, &planned, &target)).code;
        parse(&out, ModuleFormat::Cjs).unwrap();
        out
    }

    #[test]
    fn prologue_declares_each_channel() {
        let out = instrument(
            "function f() {}",
            &[("f", FunctionQuery::function("f", FunctionKind::Sync))],
        );
        assert!(out.starts_with(
            "const { tracingChannel: tr_ch_tracingChannel } = require(\"diagnostics_channel\");\nconst tr_ch$f = tr_ch_tracingChannel(\"orchestrion:m:f\");\n"
        ));
    }

    #[test]
    fn sync_function_keeps_body_inside_wrapper() {
        let out = instrument(
            "function add(a, b) {\n  return a + b;\n}\n",
            &[("add", FunctionQuery::function("add", FunctionKind::Sync))],
        );
        assert!(out.contains("const __tr$wrapped = (a, b) => {\n  return a + b;\n};"));
        assert!(out.contains("if (!tr_ch$add.hasSubscribers) return __tr$traced();"));
        assert!(out.contains("return tr_ch$add.traceSync(__tr$traced, { arguments });"));
    }

    #[test]
    fn async_method_uses_trace_promise_with_self() {
        let out = instrument(
            "class A {\n  async get(url) {\n    return url;\n  }\n}\n",
            &[("get", FunctionQuery::class_method("A", "get", FunctionKind::Async))],
        );
        assert!(out.contains("const __tr$wrapped = async (url) => {"));
        assert!(out.contains("tr_ch$get.tracePromise(__tr$traced, { arguments, self: this });"));
    }

    #[test]
    fn constructor_guards_self_in_catch_and_finally() {
        let out = instrument(
            "class B extends A {\n  constructor() {\n    super();\n  }\n}\n",
            &[("b", FunctionQuery::class_constructor("B"))],
        );
        assert!(out.contains("const __tr$ctx = { arguments };"));
        assert!(out.contains("if (tr_ch$b.hasSubscribers) tr_ch$b.start.publish(__tr$ctx);"));
        assert_eq!(out.matches("try { __tr$ctx.self = this; } catch (__tr$refErr) {}").count(), 2);
        assert!(out.contains("throw __tr$err;"));
    }

    #[test]
    fn generators_delegate_with_yield_star() {
        let out = instrument(
            "function* gen(n) { yield n; }",
            &[("gen", FunctionQuery::function("gen", FunctionKind::SyncGenerator))],
        );
        assert!(out.contains("const __tr$wrapped = function* (n) {"));
        assert!(out.contains("return yield* tr_ch$gen.traceSync(__tr$traced, { arguments });"));
    }

    #[test]
    fn expression_arrow_becomes_block() {
        let out = instrument(
            "const double = (x) => x * 2;",
            &[("double", FunctionQuery::function("double", FunctionKind::Sync))],
        );
        assert!(out.contains("(x) => { const __tr$args = [x];"));
        assert!(out.contains("const __tr$wrapped = (x) => { return (x * 2); };"));
        assert!(out.contains("{ arguments: __tr$args }"));
    }

    #[test]
    fn destructuring_arrow_takes_rest_parameter() {
        let out = instrument(
            "const pick = ({ a }, b = 1) => { return a + b; };",
            &[("pick", FunctionQuery::function("pick", FunctionKind::Sync))],
        );
        assert!(out.contains("const pick = (__tr$p0, ...__tr$rest) => {"));
        assert!(out.contains("const __tr$args = [__tr$p0, ...__tr$rest];"));
        assert!(out.contains("const __tr$wrapped = ({ a }, b = 1) => {"));
    }

    #[test]
    fn defaults_move_to_the_inner_implementation() {
        let out = instrument(
            "function f(a, b = side(),) {\n  return [a, b];\n}\n",
            &[("f", FunctionQuery::function("f", FunctionKind::Sync))],
        );
        assert!(out.contains("function f(__tr$p0) {"));
        assert!(out.contains("const __tr$wrapped = (a, b = side()) => {"));
        assert_eq!(out.matches("side()").count(), 1);
    }

    #[test]
    fn directives_stay_ahead_of_the_wrapper() {
        let out = instrument(
            "function f() {\n  'use strict';\n  return this;\n}\n",
            &[("f", FunctionQuery::function("f", FunctionKind::Sync))],
        );
        assert!(out.contains("function f() {\n  'use strict';\n    const __tr$args = arguments;"));
    }

    #[test]
    fn generator_method_using_super_keeps_a_home_object() {
        let out = instrument(
            "class B extends A {\n  *items(n) {\n    yield* super.items(n);\n  }\n}\n",
            &[("items", FunctionQuery::class_method("B", "items", FunctionKind::SyncGenerator))],
        );
        assert!(out.contains("const tr_ch_impl$1 = Symbol(\"items\");\n"));
        assert!(out.contains("  *items(__tr$p0) {\n      const __tr$args = arguments;"));
        assert!(out.contains("return yield* this[tr_ch_impl$1].apply(this, arguments);"));
        assert!(out.contains("\n  }\n  *[tr_ch_impl$1](n) {\n    yield* super.items(n);\n  }"));
        assert_eq!(out.matches("function* ()").count(), 1);
    }

    #[test]
    fn static_async_generator_with_super_and_two_layers() {
        let q = FunctionQuery::class_method("B", "pages", FunctionKind::AsyncGenerator);
        let out = instrument(
            "class B extends A {\n  static async *pages() {\n    yield* super.pages();\n  }\n}\n",
            &[("outer", q.clone()), ("inner", q)],
        );
        assert!(out.contains("  static async *pages() {"));
        assert!(out.contains("  static async *[tr_ch_impl$1]() {"));
        assert_eq!(out.matches("Symbol(").count(), 1);
        let outer = out.find("tr_ch$outer.traceSync").unwrap();
        let inner = out.find("tr_ch$inner.traceSync").unwrap();
        assert!(inner < outer);
    }

    #[test]
    fn module_version_joins_every_payload() {
        let out = instrument_with_version(
            "class A {\n  constructor() {}\n  get() {}\n}\nconst f = (x) => x;\n",
            &[
                ("ctor", FunctionQuery::class_constructor("A")),
                ("get", FunctionQuery::class_method("A", "get", FunctionKind::Sync)),
                ("f", FunctionQuery::function("f", FunctionKind::Sync)),
            ],
            Some("1.2.3"),
        );
        assert!(out.contains("const __tr$ctx = { arguments, moduleVersion: \"1.2.3\" };"));
        assert!(out.contains("{ arguments, self: this, moduleVersion: \"1.2.3\" }"));
        assert!(out.contains("{ arguments: __tr$args, moduleVersion: \"1.2.3\" }"));
    }

    #[test]
    fn two_channels_on_one_function_nest() {
        let q = FunctionQuery::function("f", FunctionKind::Sync);
        let out = instrument("function f(x) { return x; }", &[("outer", q.clone()), ("inner", q)]);
        let outer = out.find("tr_ch$outer.traceSync").unwrap();
        let inner = out.find("tr_ch$inner.traceSync").unwrap();
        assert!(inner < outer);
        assert!(out.contains("const __tr$wrapped = () => {"));
        assert!(out.contains("const __tr$wrapped = (x) => {"));
    }
}
