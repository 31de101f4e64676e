//! Turns a transformer's bound configs into concrete injection points for one
//! parsed file.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::InstrumentationConfig;
use crate::error::TransformError;
use crate::locator::{locate, FunctionSite, SiteShape};

/// One distinct channel handle the generated file declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDecl {
    /// JS identifier the handle is bound to.
    pub ident: String,
    /// `orchestrion:<module>:<channel>`.
    pub channel: String,
}

#[derive(Debug, Clone)]
pub struct InjectionPoint<'s> {
    pub site: &'s FunctionSite,
    /// Identifier of the channel handle this point publishes on.
    pub channel_ident: String,
    /// Position among the points on the same site; 0 wraps outermost.
    pub layer: usize,
    /// Number of points on the same site.
    pub layers: usize,
}

impl InjectionPoint<'_> {
    pub fn is_innermost(&self) -> bool {
        self.layer + 1 == self.layers
    }
}

#[derive(Debug, Clone)]
pub struct InjectionPlan<'s> {
    pub points: Vec<InjectionPoint<'s>>,
    pub channels: Vec<ChannelDecl>,
}

const HANDLE_PREFIX: &str = "tr_ch$";

fn handle_ident(channel_name: &str) -> String {
    let body: String = channel_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '$' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{HANDLE_PREFIX}{body}")
}

// A generator body moves into a function expression, which has no home
// object. Class methods get a hidden sibling method instead; object literals
// have nowhere to put one.
fn can_wrap(site: &FunctionSite) -> bool {
    !(site.shape == SiteShape::ObjectMethod && site.kind.is_generator() && site.uses_super)
}

/// Resolve every config against `sites`. Fails without a partial plan when any
/// config has no match; missing targets are reported in config order.
pub fn plan<'s>(
    configs: &[Arc<InstrumentationConfig>],
    sites: &'s [FunctionSite],
) -> Result<InjectionPlan<'s>, TransformError> {
    let mut found = Vec::with_capacity(configs.len());
    let mut missing = Vec::new();
    for config in configs {
        match locate(sites, &config.function_query) {
            Some(site) => found.push((config, site)),
            None => missing.push(config.function_query.target_name().to_string()),
        }
    }
    if !missing.is_empty() {
        return Err(TransformError::InjectionMatchFailure(missing));
    }
    if let Some((config, site)) = found.iter().find(|(_, site)| !can_wrap(site)) {
        return Err(TransformError::UnsupportedTarget {
            channel: config.channel_name.clone(),
            name: site.name().to_string(),
            reason: "object literal generator methods that use `super`",
        });
    }

    let mut channels: Vec<ChannelDecl> = Vec::new();
    let mut ident_by_channel: HashMap<String, String> = HashMap::new();
    let mut taken: HashSet<String> = HashSet::new();
    let mut seen: HashSet<(u32, String)> = HashSet::new();
    let mut per_site: HashMap<u32, usize> = HashMap::new();
    let mut points = Vec::with_capacity(found.len());

    for (config, site) in found {
        let channel = config.full_channel_name();
        let ident = match ident_by_channel.get(&channel) {
            Some(ident) => ident.clone(),
            None => {
                let base = handle_ident(&config.channel_name);
                let mut ident = base.clone();
                let mut n = 2;
                while !taken.insert(ident.clone()) {
                    ident = format!("{base}${n}");
                    n += 1;
                }
                ident_by_channel.insert(channel.clone(), ident.clone());
                channels.push(ChannelDecl {
                    ident: ident.clone(),
                    channel: channel.clone(),
                });
                ident
            }
        };

        if !seen.insert((site.start, channel.clone())) {
            continue;
        }
        let layer = per_site.entry(site.start).or_default();
        tracing::debug!(
            channel = %channel,
            shape = ?site.shape,
            name = site.name(),
            classes = ?site.class_chain,
            scope = ?site.scope,
            is_static = site.is_static,
            layer = *layer,
            "planned injection point"
        );
        points.push(InjectionPoint {
            site,
            channel_ident: ident,
            layer: *layer,
            layers: 0,
        });
        *layer += 1;
    }

    for point in &mut points {
        point.layers = per_site.get(&point.site.start).copied().unwrap_or(1);
    }

    Ok(InjectionPlan { points, channels })
}
