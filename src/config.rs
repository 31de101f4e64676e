use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_DC_MODULE: &str = "diagnostics_channel";

// -----------------------------------------------------------------------------
// Module selector
// -----------------------------------------------------------------------------

/// Selects the module file a config applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleMatcher {
    /// Package name, compared exactly.
    pub name: String,
    /// npm-style semver range, e.g. `>=1.0.0 <3` or `^2`.
    pub version_range: String,
    /// Path of the file relative to the package root.
    pub file_path: String,
}

impl ModuleMatcher {
    pub fn new(name: &str, version_range: &str, file_path: &str) -> Self {
        Self {
            name: name.to_string(),
            version_range: version_range.to_string(),
            file_path: file_path.to_string(),
        }
    }
}

/// Normalize loader-supplied paths so `lib\index.js`, `./lib/index.js` and
/// `lib/index.js` compare equal. Case is preserved.
pub(crate) fn normalize_file_path(path: &str) -> String {
    let mut s = path.replace('\\', "/");
    if let Some(rest) = s.strip_prefix("file:///") {
        s = rest.to_string();
    } else if let Some(rest) = s.strip_prefix("file://") {
        s = rest.to_string();
    }
    while let Some(rest) = s.strip_prefix("./") {
        s = rest.to_string();
    }
    s
}

// -----------------------------------------------------------------------------
// Function query
// -----------------------------------------------------------------------------

/// Syntactic kind of a function, read off the parsed node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionKind {
    Sync,
    Async,
    SyncGenerator,
    AsyncGenerator,
}

impl FunctionKind {
    pub fn from_flags(is_async: bool, is_generator: bool) -> Self {
        match (is_async, is_generator) {
            (false, false) => FunctionKind::Sync,
            (true, false) => FunctionKind::Async,
            (false, true) => FunctionKind::SyncGenerator,
            (true, true) => FunctionKind::AsyncGenerator,
        }
    }

    pub fn is_async(self) -> bool {
        matches!(self, FunctionKind::Async | FunctionKind::AsyncGenerator)
    }

    pub fn is_generator(self) -> bool {
        matches!(self, FunctionKind::SyncGenerator | FunctionKind::AsyncGenerator)
    }

    /// Name of the `TracingChannel` helper the wrapper calls. Generators are
    /// traced around creation of the generator object.
    pub fn tracing_operator(self) -> &'static str {
        match self {
            FunctionKind::Async => "tracePromise",
            FunctionKind::Sync | FunctionKind::SyncGenerator | FunctionKind::AsyncGenerator => {
                "traceSync"
            }
        }
    }
}

/// Identifies which function within a module a config targets.
///
/// * `className` alone: the class constructor.
/// * `className` + `methodName`: a class method.
/// * `methodName` alone: an object method or member-assigned function.
/// * `functionName`: a declaration, or a function/arrow expression bound to that name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    /// `None` matches any kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<FunctionKind>,
    /// Zero-based position among all matches, in traversal order.
    #[serde(default)]
    pub index: usize,
}

/// What a [`FunctionQuery`] resolves to once its optional fields are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryTarget<'a> {
    Constructor { class: &'a str },
    ClassMethod { class: &'a str, method: &'a str },
    ObjectMethod { method: &'a str },
    Function { name: &'a str },
}

impl FunctionQuery {
    pub fn class_constructor(class_name: &str) -> Self {
        Self {
            class_name: Some(class_name.to_string()),
            ..Default::default()
        }
    }

    pub fn class_method(class_name: &str, method_name: &str, kind: FunctionKind) -> Self {
        Self {
            class_name: Some(class_name.to_string()),
            method_name: Some(method_name.to_string()),
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn object_method(method_name: &str, kind: FunctionKind) -> Self {
        Self {
            method_name: Some(method_name.to_string()),
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn function(function_name: &str, kind: FunctionKind) -> Self {
        Self {
            function_name: Some(function_name.to_string()),
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    pub fn any_kind(mut self) -> Self {
        self.kind = None;
        self
    }

    /// `None` only for queries that failed validation.
    pub fn target(&self) -> Option<QueryTarget<'_>> {
        match (
            self.class_name.as_deref(),
            self.method_name.as_deref(),
            self.function_name.as_deref(),
        ) {
            (Some(class), None, None) => Some(QueryTarget::Constructor { class }),
            (Some(class), Some(method), None) => Some(QueryTarget::ClassMethod { class, method }),
            (None, Some(method), _) => Some(QueryTarget::ObjectMethod { method }),
            (None, None, Some(name)) => Some(QueryTarget::Function { name }),
            _ => None,
        }
    }

    /// Name reported when the target cannot be found.
    pub fn target_name(&self) -> &str {
        match self.target() {
            Some(QueryTarget::Constructor { .. }) => "constructor",
            Some(QueryTarget::ClassMethod { method, .. } | QueryTarget::ObjectMethod { method }) => {
                method
            }
            Some(QueryTarget::Function { name }) => name,
            None => "",
        }
    }

    pub fn accepts_kind(&self, kind: FunctionKind) -> bool {
        self.kind.map_or(true, |k| k == kind)
    }
}

// -----------------------------------------------------------------------------
// Instrumentation config
// -----------------------------------------------------------------------------

/// One instrumentation point: where to look and which channel to publish on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentationConfig {
    pub channel_name: String,
    pub module: ModuleMatcher,
    pub function_query: FunctionQuery,
}

impl InstrumentationConfig {
    pub fn new(channel_name: &str, module: ModuleMatcher, function_query: FunctionQuery) -> Self {
        Self {
            channel_name: channel_name.to_string(),
            module,
            function_query,
        }
    }

    /// Full channel string subscribers listen on.
    pub fn full_channel_name(&self) -> String {
        format!("orchestrion:{}:{}", self.module.name, self.channel_name)
    }

    /// Shape checks that do not need the semver parser.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let missing = |field| ConfigError::MissingField {
            channel: self.channel_name.clone(),
            field,
        };
        if self.channel_name.trim().is_empty() {
            return Err(missing("channelName"));
        }
        if self.module.name.trim().is_empty() {
            return Err(missing("module.name"));
        }
        if self.module.version_range.trim().is_empty() {
            return Err(missing("module.versionRange"));
        }
        if self.module.file_path.trim().is_empty() {
            return Err(missing("module.filePath"));
        }

        let q = &self.function_query;
        let blank = |v: &Option<String>| v.as_deref().is_some_and(|s| s.trim().is_empty());
        if blank(&q.class_name) || blank(&q.method_name) || blank(&q.function_name) {
            return Err(ConfigError::EmptyQuery {
                channel: self.channel_name.clone(),
            });
        }
        if q.class_name.is_some() && q.function_name.is_some() {
            return Err(ConfigError::ConflictingQuery {
                channel: self.channel_name.clone(),
            });
        }
        if q.target().is_none() {
            return Err(ConfigError::EmptyQuery {
                channel: self.channel_name.clone(),
            });
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Top-level config document
// -----------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

/// The serialized form accepted by [`Config::from_json`] and [`Config::from_yaml`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub instrumentations: Vec<InstrumentationConfig>,
    /// Module the `tracingChannel` import is read from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dc_module: Option<String>,
    #[serde(default = "default_true")]
    pub source_maps: bool,
    /// Publish the matched module version as `moduleVersion` in payloads.
    #[serde(default)]
    pub module_version_in_payload: bool,
}

impl Config {
    pub fn new(instrumentations: Vec<InstrumentationConfig>, dc_module: Option<String>) -> Self {
        Self {
            instrumentations,
            dc_module,
            source_maps: true,
            module_version_in_payload: false,
        }
    }

    pub fn new_single(instrumentation: InstrumentationConfig) -> Self {
        Self::new(vec![instrumentation], None)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yml::from_str(yaml)?)
    }

    pub fn dc_module(&self) -> &str {
        self.dc_module.as_deref().unwrap_or(DEFAULT_DC_MODULE)
    }
}
