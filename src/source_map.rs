//! Source map output, chained through an optional upstream map.

use std::collections::HashMap;
use std::sync::OnceLock;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use regex::Regex;
use sourcemap::{SourceMap, SourceMapBuilder};

use crate::error::TransformError;
use crate::rewrite::Mapping;

fn inline_map_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?m)^[ \t]*//[#@][ \t]+sourceMappingURL=data:application/json(?:;charset=[^;,]+)?;base64,([A-Za-z0-9+/=]+)[ \t]*$",
        )
        .expect("inline source map pattern is valid")
    })
}

/// A decoded `//# sourceMappingURL=data:...` comment.
#[derive(Debug)]
pub struct InlineMap {
    pub map: SourceMap,
    /// Byte range of the comment line, for removal.
    pub start: usize,
    pub end: usize,
}

/// The last inline base64 source map comment in `source`, if it decodes.
pub fn find_inline_map(source: &str) -> Option<InlineMap> {
    let caps = inline_map_re().captures_iter(source).last()?;
    let whole = caps.get(0)?;
    let payload = caps.get(1)?.as_str();
    let bytes = match STANDARD.decode(payload) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(error = %e, "ignoring inline source map with bad base64");
            return None;
        }
    };
    match SourceMap::from_slice(&bytes) {
        Ok(map) => Some(InlineMap {
            map,
            start: whole.start(),
            end: whole.end(),
        }),
        Err(e) => {
            tracing::debug!(error = %e, "ignoring undecodable inline source map");
            None
        }
    }
}

pub fn parse_input_map(raw: &str) -> Result<SourceMap, TransformError> {
    SourceMap::from_slice(raw.as_bytes()).map_err(TransformError::InputSourceMap)
}

/// `code` followed by `map` as an inline base64 comment.
pub fn inline(code: &str, map: &str) -> String {
    let mut out = String::with_capacity(code.len() + map.len() * 4 / 3 + 64);
    out.push_str(code);
    if !code.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("//# sourceMappingURL=data:application/json;charset=utf-8;base64,");
    out.push_str(&STANDARD.encode(map));
    out
}

/// Serialize `mappings` (output position to position in `source`) as a v3
/// map. With `input`, each position is resolved once more through it so the
/// result points at the upstream original.
pub fn compose(
    file: &str,
    source: &str,
    mappings: &[Mapping],
    input: Option<&SourceMap>,
) -> Result<String, TransformError> {
    let mut builder = SourceMapBuilder::new(Some(file));

    match input {
        None => {
            let src_id = builder.add_source(file);
            builder.set_source_contents(src_id, Some(source));
            for m in mappings {
                builder.add_raw(m.gen_line, m.gen_col, m.src_line, m.src_col, Some(src_id), None, false);
            }
        }
        Some(input) => {
            let mut sources: HashMap<u32, u32> = HashMap::new();
            let mut names: HashMap<String, u32> = HashMap::new();
            for m in mappings {
                let Some(token) = input.lookup_token(m.src_line, m.src_col) else {
                    continue;
                };
                if token.get_dst_line() != m.src_line || !token.has_source() {
                    continue;
                }
                let upstream_id = token.get_src_id();
                let src_id = match sources.get(&upstream_id) {
                    Some(&id) => id,
                    None => {
                        let id = builder.add_source(token.get_source().unwrap_or(file));
                        builder.set_source_contents(id, input.get_source_contents(upstream_id));
                        sources.insert(upstream_id, id);
                        id
                    }
                };
                let name_id = token.get_name().map(|name| match names.get(name) {
                    Some(&id) => id,
                    None => {
                        let id = builder.add_name(name);
                        names.insert(name.to_string(), id);
                        id
                    }
                });
                builder.add_raw(
                    m.gen_line,
                    m.gen_col,
                    token.get_src_line(),
                    token.get_src_col(),
                    Some(src_id),
                    name_id,
                    false,
                );
            }
        }
    }

    let mut out = Vec::new();
    builder
        .into_sourcemap()
        .to_writer(&mut out)
        .map_err(TransformError::SourceMap)?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}
