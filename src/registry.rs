//! Reporter allow-listing
//!
//! A reporter is acted upon only if it is known: listed in the static
//! configuration, matched by one of the configured SQL `LIKE` patterns, or
//! confirmed by an external [`Registry`].

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, trace};

/// Everything a registry needs to know about a reporter that just checked in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReporterContact {
    pub reporter_id: String,
    pub agent_id: Option<String>,
    pub partition: String,
    pub source_ip: String,
    pub seen_at: DateTime<Utc>,
}

/// External service registry used for auto-registration of reporters.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn is_known(&self, reporter_id: &str) -> bool;

    async fn record_heartbeat(&self, contact: &ReporterContact) -> anyhow::Result<()>;

    async fn register(&self, contact: &ReporterContact) -> anyhow::Result<()>;
}

/// A compiled SQL `LIKE` pattern (`%` matches any run, `_` one character).
#[derive(Debug, Clone)]
pub struct ReporterPattern {
    raw: String,
    regex: Regex,
}

impl ReporterPattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let mut expr = String::with_capacity(pattern.len() + 2);
        expr.push('^');
        for c in pattern.chars() {
            match c {
                '%' => expr.push_str(".*"),
                '_' => expr.push('.'),
                other => expr.push_str(&regex::escape(&other.to_string())),
            }
        }
        expr.push('$');

        Ok(Self {
            raw: pattern.to_string(),
            regex: Regex::new(&expr)?,
        })
    }

    pub fn matches(&self, reporter_id: &str) -> bool {
        self.regex.is_match(reporter_id)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Compile a list of raw patterns.
pub fn compile_patterns(patterns: &[String]) -> Result<Vec<ReporterPattern>, regex::Error> {
    patterns.iter().map(|p| ReporterPattern::new(p)).collect()
}

/// `true` if `reporter_id` matches one of `patterns`; an empty list matches everything.
pub fn matches_any(patterns: &[ReporterPattern], reporter_id: &str) -> bool {
    patterns.is_empty() || patterns.iter().any(|p| p.matches(reporter_id))
}

pub struct AllowList {
    known: BTreeSet<String>,
    raw_patterns: Vec<String>,
    patterns: Vec<ReporterPattern>,
    registry: Option<Arc<dyn Registry>>,
}

impl AllowList {
    pub fn new(
        known: impl IntoIterator<Item = String>,
        patterns: Vec<String>,
        registry: Option<Arc<dyn Registry>>,
    ) -> Result<Self, regex::Error> {
        let compiled = compile_patterns(&patterns)?;

        Ok(Self {
            known: known.into_iter().collect(),
            raw_patterns: patterns,
            patterns: compiled,
            registry,
        })
    }

    pub async fn is_known(&self, reporter_id: &str) -> bool {
        if self.known.contains(reporter_id) {
            trace!("{reporter_id}: found in static allow-list");
            return true;
        }

        if !self.patterns.is_empty() && matches_any(&self.patterns, reporter_id) {
            trace!("{reporter_id}: matched allow-list pattern");
            return true;
        }

        match &self.registry {
            Some(registry) => {
                let known = registry.is_known(reporter_id).await;
                debug!("{reporter_id}: registry lookup -> {known}");
                known
            }
            None => false,
        }
    }

    /// The static allow-list, sorted.
    pub fn static_ids(&self) -> impl Iterator<Item = &str> {
        self.known.iter().map(String::as_str)
    }

    pub fn is_static(&self, reporter_id: &str) -> bool {
        self.known.contains(reporter_id)
    }

    pub fn has_static_entries(&self) -> bool {
        !self.known.is_empty()
    }

    /// Raw patterns, as handed to a [`crate::storage::StatusStore`].
    pub fn patterns(&self) -> &[String] {
        &self.raw_patterns
    }

    pub fn registry(&self) -> Option<&Arc<dyn Registry>> {
        self.registry.as_ref()
    }
}
