//! Output maps, with and without an upstream compile step.

mod common;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::*;
use orchestrion_transform::{FunctionKind, FunctionQuery};
use sourcemap::{SourceMap, SourceMapBuilder};

// What a TypeScript compile of up.ts might emit: the class starts three lines
// further down in the original because of imports and an interface.
const COMPILED: &str = "class Up {\n    fetch(url) {\n        return url;\n    }\n}\nmodule.exports = Up;\n";
const ORIGINAL_TS: &str = "import { x } from './x';\ninterface Opts {}\n\nclass Up {\n    fetch(url: string): string {\n        return url;\n    }\n}\nexport = Up;\n";

fn compiled_map() -> String {
    let mut builder = SourceMapBuilder::new(Some("up.js"));
    let src = builder.add_source("up.ts");
    builder.set_source_contents(src, Some(ORIGINAL_TS));
    for (line, text) in COMPILED.lines().enumerate() {
        let line = line as u32;
        let indent = (text.len() - text.trim_start().len()) as u32;
        builder.add_raw(line, 0, line + 3, 0, Some(src), None, false);
        if indent > 0 {
            builder.add_raw(line, indent, line + 3, indent, Some(src), None, false);
        }
    }
    let mut out = Vec::new();
    builder.into_sourcemap().to_writer(&mut out).unwrap();
    String::from_utf8(out).unwrap()
}

fn up_fetch() -> orchestrion_transform::Transformer {
    transformer(vec![config(
        "up:fetch",
        FunctionQuery::class_method("Up", "fetch", FunctionKind::Sync),
    )])
}

#[test]
fn instrumented_function_maps_back_to_typescript() {
    let out = up_fetch()
        .transform(COMPILED, false, Some(&compiled_map()))
        .unwrap();
    let map = SourceMap::from_slice(out.map.unwrap().as_bytes()).unwrap();

    let (line, col) = position_of(&out.code, "fetch(url)");
    let token = map.lookup_token(line, col).unwrap();
    assert_eq!(token.get_source(), Some("up.ts"));
    assert_eq!((token.get_src_line(), token.get_src_col()), (4, 4));
    assert_eq!(map.get_source_contents(0), Some(ORIGINAL_TS));
}

#[test]
fn copied_lines_map_to_their_original_lines() {
    let out = up_fetch().transform(COMPILED, false, None).unwrap();
    let map = SourceMap::from_slice(out.map.unwrap().as_bytes()).unwrap();

    let (line, col) = position_of(&out.code, "return url;");
    let token = map.lookup_token(line, col).unwrap();
    assert_eq!(token.get_source(), Some(FILE));
    assert_eq!((token.get_src_line(), token.get_src_col()), (2, 8));

    let (line, col) = position_of(&out.code, "module.exports");
    let token = map.lookup_token(line, col).unwrap();
    assert_eq!((token.get_src_line(), token.get_src_col()), (5, 0));
}

#[test]
fn generated_wrapper_maps_to_enclosing_node() {
    let out = up_fetch().transform(COMPILED, false, None).unwrap();
    let map = SourceMap::from_slice(out.map.unwrap().as_bytes()).unwrap();

    let (line, col) = position_of(&out.code, "if (!tr_ch$up_fetch.hasSubscribers)");
    let token = map.lookup_token(line, col).unwrap();
    assert_eq!((token.get_src_line(), token.get_src_col()), (1, 4));

    let (line, col) = position_of(&out.code, "const tr_ch$up_fetch");
    let token = map.lookup_token(line, col).unwrap();
    assert_eq!((token.get_src_line(), token.get_src_col()), (0, 0));
}

#[test]
fn trailing_inline_map_is_used_when_none_is_passed() {
    let src = format!(
        "{COMPILED}//# sourceMappingURL=data:application/json;base64,{}\n",
        STANDARD.encode(compiled_map())
    );
    let out = up_fetch().transform(&src, false, None).unwrap();
    assert!(!out.code.contains("sourceMappingURL"));

    let map = SourceMap::from_slice(out.map.as_deref().unwrap().as_bytes()).unwrap();
    let (line, col) = position_of(&out.code, "return url;");
    let token = map.lookup_token(line, col).unwrap();
    assert_eq!(token.get_source(), Some("up.ts"));
    assert_eq!((token.get_src_line(), token.get_src_col()), (5, 8));

    let inline = out.to_inline_code();
    let (_, encoded) = inline.rsplit_once("base64,").unwrap();
    assert_eq!(STANDARD.decode(encoded).unwrap(), out.map.unwrap().into_bytes());
}
