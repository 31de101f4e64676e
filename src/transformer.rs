use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use swc_core::{
    common::{sync::Lrc, BytePos, FileName, SourceMap, Spanned},
    ecma::{
        ast::{EsVersion, Expr, Lit, Program, Stmt},
        parser::{lexer::Lexer, EsSyntax, Parser, StringInput, Syntax},
    },
};

use crate::codegen::{self, PrologueSlot, Target};
use crate::config::InstrumentationConfig;
use crate::error::{TransformError, UnknownModuleFormat};
use crate::locator::collect_sites;
use crate::planner;
use crate::rewrite::{self, Edit};
use crate::source_map;

// -----------------------------------------------------------------------------
// Module format
// -----------------------------------------------------------------------------

/// How the source is parsed and which channel import form is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ModuleFormat {
    /// ES module: `import { tracingChannel } from ...`.
    Esm,
    /// CommonJS script: `require(...)`. Top-level `return` is allowed.
    Cjs,
    /// Detect from the source; emits per the detected kind.
    #[default]
    Unknown,
}

impl From<bool> for ModuleFormat {
    fn from(esm: bool) -> Self {
        if esm {
            ModuleFormat::Esm
        } else {
            ModuleFormat::Cjs
        }
    }
}

impl FromStr for ModuleFormat {
    type Err = UnknownModuleFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "esm" | "module" | "mjs" => Ok(ModuleFormat::Esm),
            "cjs" | "commonjs" | "script" => Ok(ModuleFormat::Cjs),
            "unknown" | "auto" => Ok(ModuleFormat::Unknown),
            _ => Err(UnknownModuleFormat(s.to_string())),
        }
    }
}

impl fmt::Display for ModuleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ModuleFormat::Esm => "esm",
            ModuleFormat::Cjs => "cjs",
            ModuleFormat::Unknown => "unknown",
        })
    }
}

// -----------------------------------------------------------------------------
// Parsing
// -----------------------------------------------------------------------------

pub(crate) struct Parsed {
    pub program: Program,
    /// Position of the first source byte; spans are offset by it.
    pub base: BytePos,
}

impl Parsed {
    pub fn is_module(&self) -> bool {
        matches!(self.program, Program::Module(_))
    }

    fn offset(&self, pos: BytePos) -> u32 {
        pos.0.saturating_sub(self.base.0)
    }

    /// After a hashbang line, and for scripts after the directive prologue.
    fn prologue_slot(&self, source: &str) -> PrologueSlot {
        let mut slot = PrologueSlot {
            offset: 0,
            anchor: 0,
            after_statement: false,
        };
        if source.starts_with("#!") {
            slot.offset = source.find('\n').map_or(source.len(), |i| i + 1) as u32;
        }

        match &self.program {
            Program::Module(module) => {
                if let Some(first) = module.body.first() {
                    slot.anchor = self.offset(first.span().lo);
                }
            }
            Program::Script(script) => {
                if let Some(first) = script.body.first() {
                    slot.anchor = self.offset(first.span().lo);
                }
                let last_directive = script
                    .body
                    .iter()
                    .take_while(|stmt| match stmt {
                        Stmt::Expr(e) => matches!(&*e.expr, Expr::Lit(Lit::Str(_))),
                        _ => false,
                    })
                    .last();
                if let Some(directive) = last_directive {
                    slot.offset = self.offset(directive.span().hi);
                    slot.after_statement = true;
                }
            }
        }
        slot
    }
}

pub(crate) fn parse(source: &str, format: ModuleFormat) -> Result<Parsed, TransformError> {
    let cm: Lrc<SourceMap> = Default::default();
    let fm = cm.new_source_file(
        Lrc::new(FileName::Custom("input.js".into())),
        source.to_string(),
    );
    let lexer = Lexer::new(
        Syntax::Es(EsSyntax {
            decorators: true,
            import_attributes: true,
            explicit_resource_management: true,
            allow_return_outside_function: format == ModuleFormat::Cjs,
            ..Default::default()
        }),
        EsVersion::latest(),
        StringInput::from(&*fm),
        None,
    );
    let mut parser = Parser::new_from(lexer);
    let result = match format {
        ModuleFormat::Esm => parser.parse_module().map(Program::Module),
        ModuleFormat::Cjs => parser.parse_script().map(Program::Script),
        ModuleFormat::Unknown => parser.parse_program(),
    };

    let parse_error = |err: swc_core::ecma::parser::error::Error| {
        let lo = err.span().lo.max(fm.start_pos).min(fm.end_pos);
        let loc = cm.lookup_char_pos(lo);
        TransformError::Parse {
            line: loc.line,
            column: loc.col.0 + 1,
            message: err.kind().msg().to_string(),
        }
    };

    let program = result.map_err(parse_error)?;
    if let Some(err) = parser.take_errors().into_iter().next() {
        return Err(parse_error(err));
    }
    Ok(Parsed {
        program,
        base: fm.start_pos,
    })
}

// -----------------------------------------------------------------------------
// Transformer
// -----------------------------------------------------------------------------

/// Output of [`Transformer::transform`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutput {
    pub code: String,
    /// JSON source map, absent when source maps are disabled.
    pub map: Option<String>,
}

impl TransformOutput {
    /// The code with its map appended as a base64 `sourceMappingURL` comment.
    pub fn to_inline_code(&self) -> String {
        match &self.map {
            Some(map) => source_map::inline(&self.code, map),
            None => self.code.clone(),
        }
    }
}

/// Instruments source files of one module instance. Obtained from
/// [`InstrumentationMatcher::get_transformer`](crate::InstrumentationMatcher::get_transformer);
/// holds no state between calls.
#[derive(Debug, Clone)]
pub struct Transformer {
    module_name: Arc<str>,
    file_path: Arc<str>,
    configs: Vec<Arc<InstrumentationConfig>>,
    dc_module: Arc<str>,
    source_maps: bool,
    module_version: Option<Arc<str>>,
}

impl Transformer {
    pub(crate) fn new(
        module_name: &str,
        file_path: &str,
        configs: Vec<Arc<InstrumentationConfig>>,
        dc_module: Arc<str>,
        source_maps: bool,
    ) -> Self {
        Self {
            module_name: module_name.into(),
            file_path: file_path.into(),
            configs,
            dc_module,
            source_maps,
            module_version: None,
        }
    }

    /// Adds `moduleVersion: <version>` to every published payload.
    pub fn with_module_version(mut self, version: &str) -> Self {
        self.module_version = Some(version.into());
        self
    }

    pub fn module_version(&self) -> Option<&str> {
        self.module_version.as_deref()
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    pub fn configs(&self) -> &[Arc<InstrumentationConfig>] {
        &self.configs
    }

    /// Instrument `source`. Either every bound config is applied or the call
    /// fails; nothing is partially instrumented.
    ///
    /// `input_map` is the JSON source map of an upstream compile step. When it
    /// is absent, a trailing inline base64 map in `source` is used instead.
    pub fn transform(
        &self,
        source: &str,
        format: impl Into<ModuleFormat>,
        input_map: Option<&str>,
    ) -> Result<TransformOutput, TransformError> {
        let parsed = parse(source, format.into())?;
        let sites = collect_sites(&parsed.program, parsed.base);
        let plan = planner::plan(&self.configs, &sites)?;

        let mut edits: Vec<Edit> = Vec::new();
        let input = if !self.source_maps {
            None
        } else if let Some(raw) = input_map {
            Some(source_map::parse_input_map(raw)?)
        } else if let Some(inline) = source_map::find_inline_map(source) {
            tracing::debug!(file = %self.file_path, "using inline input source map");
            edits.push(Edit::replace(
                inline.start as u32,
                inline.end as u32,
                String::new(),
                inline.start as u32,
            ));
            Some(inline.map)
        } else {
            None
        };

        let target = Target {
            esm: parsed.is_module(),
            dc_module: &self.dc_module,
            module_version: self.module_version.as_deref(),
            prologue: parsed.prologue_slot(source),
        };
        edits.extend(codegen::generate(source, &plan, &target));
        let rewritten = rewrite::apply(source, edits);

        let map = if self.source_maps {
            Some(source_map::compose(
                &self.file_path,
                source,
                &rewritten.mappings,
                input.as_ref(),
            )?)
        } else {
            None
        };

        Ok(TransformOutput {
            code: rewritten.code,
            map,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FunctionKind, FunctionQuery, ModuleMatcher};

    fn transformer(query: FunctionQuery, source_maps: bool) -> Transformer {
        Transformer::new(
            "m",
            "index.js",
            vec![Arc::new(InstrumentationConfig::new(
                "ch",
                ModuleMatcher::new("m", "*", "index.js"),
                query,
            ))],
            "diagnostics_channel".into(),
            source_maps,
        )
    }

    #[test]
    fn module_format_spellings() {
        assert_eq!("ESM".parse::<ModuleFormat>().unwrap(), ModuleFormat::Esm);
        assert_eq!("commonjs".parse::<ModuleFormat>().unwrap(), ModuleFormat::Cjs);
        assert_eq!("auto".parse::<ModuleFormat>().unwrap(), ModuleFormat::Unknown);
        assert!("amd".parse::<ModuleFormat>().is_err());
        assert_eq!(ModuleFormat::from(true), ModuleFormat::Esm);
        assert_eq!(ModuleFormat::from(false), ModuleFormat::Cjs);
    }

    #[test]
    fn parse_errors_carry_position() {
        let err = parse("let x = ;\n", ModuleFormat::Cjs).err().unwrap();
        match err {
            TransformError::Parse { line, column, .. } => {
                assert_eq!(line, 1);
                assert!(column > 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn top_level_return_only_in_commonjs() {
        assert!(parse("return;", ModuleFormat::Cjs).is_ok());
        assert!(parse("return;", ModuleFormat::Esm).is_err());
    }

    #[test]
    fn unknown_format_detects_modules() {
        assert!(parse("import x from 'y';", ModuleFormat::Unknown).unwrap().is_module());
        assert!(!parse("var x = require('y');", ModuleFormat::Unknown).unwrap().is_module());
    }

    #[test]
    fn prologue_follows_hashbang_and_directives() {
        let t = transformer(FunctionQuery::function("f", FunctionKind::Sync), false);
        let out = t
            .transform("#!/usr/bin/env node\n'use strict';\nfunction f() {}\n", false, None)
            .unwrap();
        assert!(out.code.starts_with(
            "#!/usr/bin/env node\n'use strict';\nconst { tracingChannel: tr_ch_tracingChannel } = require(\"diagnostics_channel\");\n"
        ));
        assert!(out.map.is_none());
    }

    #[test]
    fn esm_uses_import() {
        let t = transformer(FunctionQuery::function("f", FunctionKind::Sync), true);
        let out = t.transform("export function f() {}", ModuleFormat::Esm, None).unwrap();
        assert!(out
            .code
            .starts_with("import { tracingChannel as tr_ch_tracingChannel } from \"diagnostics_channel\";\n"));
        assert!(out.map.is_some());
        assert!(out.to_inline_code().contains("//# sourceMappingURL=data:application/json;charset=utf-8;base64,"));
    }

    #[test]
    fn inline_input_map_is_consumed_and_stripped() {
        let upstream = r#"{"version":3,"sources":["f.ts"],"names":[],"mappings":"AAAA"}"#;
        let src = source_map::inline("function f() {}", upstream);
        let t = transformer(FunctionQuery::function("f", FunctionKind::Sync), true);
        let out = t.transform(src.as_str(), false, None).unwrap();
        assert!(!out.code.contains("sourceMappingURL"));
        assert!(out.map.unwrap().contains("f.ts"));
    }

    #[test]
    fn bad_input_map_is_its_own_error() {
        let t = transformer(FunctionQuery::function("f", FunctionKind::Sync), true);
        let err = t.transform("function f() {}", false, Some("not json")).unwrap_err();
        assert!(matches!(err, TransformError::InputSourceMap(_)));
    }
}
