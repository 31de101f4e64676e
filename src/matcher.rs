use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use nodejs_semver::{Range, Version};

use crate::config::{normalize_file_path, Config, InstrumentationConfig};
use crate::error::ConfigError;
use crate::transformer::Transformer;

struct Entry {
    config: Arc<InstrumentationConfig>,
    range: Range,
    file_path: String,
}

impl Entry {
    fn matches(&self, version: &Version, file_path: &str) -> bool {
        self.file_path == file_path && version.satisfies(&self.range)
    }
}

/// Built once from the full config list; hands out a [`Transformer`] per
/// loaded module file. Read-only after construction, so it can be shared
/// across threads.
pub struct InstrumentationMatcher {
    entries: Vec<Entry>,
    by_module: HashMap<String, Vec<usize>>,
    dc_module: Arc<str>,
    source_maps: bool,
    module_version_in_payload: bool,
}

impl InstrumentationMatcher {
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        let dc_module: Arc<str> = config.dc_module().into();
        let mut entries = Vec::with_capacity(config.instrumentations.len());
        let mut by_module: HashMap<String, Vec<usize>> = HashMap::new();

        for instr in config.instrumentations {
            instr.validate()?;
            let range = Range::parse(instr.module.version_range.trim()).map_err(|e| {
                ConfigError::InvalidVersionRange {
                    channel: instr.channel_name.clone(),
                    range: instr.module.version_range.clone(),
                    reason: e.to_string(),
                }
            })?;
            by_module
                .entry(instr.module.name.clone())
                .or_default()
                .push(entries.len());
            entries.push(Entry {
                file_path: normalize_file_path(&instr.module.file_path),
                range,
                config: Arc::new(instr),
            });
        }

        Ok(Self {
            entries,
            by_module,
            dc_module,
            source_maps: config.source_maps,
            module_version_in_payload: config.module_version_in_payload,
        })
    }

    pub fn dc_module(&self) -> &str {
        &self.dc_module
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configs whose module selector matches, in the order they were supplied.
    pub fn matching_configs(
        &self,
        module_name: &str,
        version: &str,
        file_path: &str,
    ) -> Vec<Arc<InstrumentationConfig>> {
        let Some(candidates) = self.by_module.get(module_name) else {
            return Vec::new();
        };
        let version = match Version::parse(version.trim()) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(module = module_name, version, error = %e, "unparseable module version; not instrumenting");
                return Vec::new();
            }
        };
        let file_path = normalize_file_path(file_path);

        candidates
            .iter()
            .map(|&i| &self.entries[i])
            .filter(|entry| entry.matches(&version, &file_path))
            .map(|entry| entry.config.clone())
            .collect()
    }

    /// `None` means nothing in this module file is instrumented.
    pub fn get_transformer(
        &self,
        module_name: &str,
        version: &str,
        file_path: &str,
    ) -> Option<Transformer> {
        let configs = self.matching_configs(module_name, version, file_path);
        if configs.is_empty() {
            return None;
        }
        tracing::debug!(
            module = module_name,
            version,
            file = file_path,
            count = configs.len(),
            "resolved transformer"
        );
        let transformer = Transformer::new(
            module_name,
            &normalize_file_path(file_path),
            configs,
            self.dc_module.clone(),
            self.source_maps,
        );
        Some(if self.module_version_in_payload {
            transformer.with_module_version(version.trim())
        } else {
            transformer
        })
    }
}

impl FromStr for InstrumentationMatcher {
    type Err = ConfigError;

    /// Accepts the YAML (or JSON) form of [`Config`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(Config::from_yaml(s)?)
    }
}

/// Build a matcher from configs, optionally overriding the module the
/// `tracingChannel` primitive is imported from.
pub fn create(
    configs: Vec<InstrumentationConfig>,
    channel_module_specifier: Option<&str>,
) -> Result<InstrumentationMatcher, ConfigError> {
    InstrumentationMatcher::new(Config::new(
        configs,
        channel_module_specifier.map(str::to_string),
    ))
}
