#![allow(dead_code)]

use orchestrion_transform::{
    create, FunctionQuery, InstrumentationConfig, InstrumentationMatcher, ModuleMatcher, Transformer,
};
use swc_core::common::{sync::Lrc, FileName, SourceMap};
use swc_core::ecma::parser::{lexer::Lexer, EsSyntax, Parser, StringInput, Syntax};

pub const MODULE: &str = "undici";
pub const VERSION: &str = "1.0.0";
pub const FILE: &str = "index.js";

pub fn config(channel: &str, query: FunctionQuery) -> InstrumentationConfig {
    InstrumentationConfig::new(channel, ModuleMatcher::new(MODULE, ">=0.0.1", FILE), query)
}

pub fn matcher(configs: Vec<InstrumentationConfig>) -> InstrumentationMatcher {
    create(configs, None).unwrap()
}

pub fn transformer(configs: Vec<InstrumentationConfig>) -> Transformer {
    matcher(configs).get_transformer(MODULE, VERSION, FILE).unwrap()
}

/// Panics unless `code` is valid JavaScript of the given kind.
pub fn assert_valid_js(code: &str, esm: bool) {
    let cm: Lrc<SourceMap> = Default::default();
    let fm = cm.new_source_file(Lrc::new(FileName::Custom("out.js".into())), code.to_string());
    let lexer = Lexer::new(
        Syntax::Es(EsSyntax {
            allow_return_outside_function: !esm,
            ..Default::default()
        }),
        Default::default(),
        StringInput::from(&*fm),
        None,
    );
    let mut parser = Parser::new_from(lexer);
    let parsed = if esm {
        parser.parse_module().map(|_| ())
    } else {
        parser.parse_script().map(|_| ())
    };
    if let Err(err) = parsed {
        panic!("generated code does not parse: {:?}\n{code}", err.kind().msg());
    }
    let errors = parser.take_errors();
    assert!(errors.is_empty(), "recoverable parse errors in:\n{code}");
}

/// Zero-based line and UTF-16 column of the first occurrence of `needle`.
pub fn position_of(code: &str, needle: &str) -> (u32, u32) {
    let at = code.find(needle).unwrap();
    let before = &code[..at];
    let line = before.matches('\n').count() as u32;
    let line_start = before.rfind('\n').map_or(0, |i| i + 1);
    (line, before[line_start..].encode_utf16().count() as u32)
}
