//! Source-to-source instrumentation for JavaScript modules.
//!
//! Build an [`InstrumentationMatcher`] once from every
//! [`InstrumentationConfig`], ask it for a [`Transformer`] whenever a module
//! file is loaded, and run [`Transformer::transform`] on that file's source.
//! Each matched function is rewritten so that calls publish `start`, `end`,
//! `asyncStart`, `asyncEnd` and `error` events on a
//! `diagnostics_channel` tracing channel named
//! `orchestrion:<module>:<channelName>`.
//!
//! ```no_run
//! use orchestrion_transform::{create, FunctionQuery, InstrumentationConfig, ModuleMatcher};
//!
//! let matcher = create(
//!     vec![InstrumentationConfig::new(
//!         "up:constructor",
//!         ModuleMatcher::new("one", ">=1", "index.js"),
//!         FunctionQuery::class_constructor("Up"),
//!     )],
//!     None,
//! )?;
//! if let Some(transformer) = matcher.get_transformer("one", "1.0.0", "index.js") {
//!     let out = transformer.transform("export class Up { constructor() {} }", true, None)?;
//!     println!("{}", out.code);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # What the rewrite changes
//!
//! - Parameters with defaults or patterns are replaced by plain placeholders
//!   in the outer function and rebound once by the inner implementation.
//!   Defaults run once per call and `length` is unchanged.
//! - A class generator method whose body uses `super` is split in two: the
//!   original body moves to a method keyed by a module-private `Symbol`, and
//!   the public method traces and delegates to it through `this`.
//! - The same shape in an object literal cannot be split and is rejected
//!   with [`TransformError::UnsupportedTarget`].
//! - Setting `moduleVersionInPayload` adds `moduleVersion` to every payload.

mod codegen;
pub mod config;
pub mod error;
mod locator;
mod matcher;
mod planner;
mod rewrite;
mod source_map;
mod transformer;

pub use config::{
    Config, FunctionKind, FunctionQuery, InstrumentationConfig, ModuleMatcher, DEFAULT_DC_MODULE,
};
pub use error::{ConfigError, TransformError, UnknownModuleFormat};
pub use matcher::{create, InstrumentationMatcher};
pub use transformer::{ModuleFormat, TransformOutput, Transformer};
