//! Policy gate deciding whether an event ever reaches a broker.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::config::FilterConfig;
use crate::error::ConfigError;

use super::record::{EventRecord, EventType, Target};

/// What happens to events not named by an explicit rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPolicy {
    /// Publish everything not explicitly excluded (`DO_NOT_FILTER`).
    IncludeAll,
    /// Drop everything not explicitly included (`DO_FILTER`).
    ExcludeAll,
}

impl FromStr for FilterPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DO_NOT_FILTER" | "INCLUDE_ALL" => Ok(FilterPolicy::IncludeAll),
            "DO_FILTER" | "EXCLUDE_ALL" => Ok(FilterPolicy::ExcludeAll),
            _ => Err(ConfigError::InvalidFilterPolicy(s.to_string())),
        }
    }
}

/// A `(type, target)` pair written as `TYPE-TARGET`, e.g. `CREATED-CONSUMER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterRule {
    pub event_type: EventType,
    pub target: Target,
}

impl FilterRule {
    pub fn new(event_type: EventType, target: Target) -> Self {
        Self { event_type, target }
    }

    fn of(event: &EventRecord) -> Self {
        Self::new(event.event_type, event.target)
    }
}

impl fmt::Display for FilterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.event_type, self.target)
    }
}

impl FromStr for FilterRule {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidFilterRule(s.to_string());
        // Targets may contain underscores but never dashes, so split once.
        let (event_type, target) = s.trim().split_once('-').ok_or_else(invalid)?;
        let event_type = event_type.parse().map_err(|_| invalid())?;
        let target = target.parse().map_err(|_| invalid())?;
        Ok(FilterRule::new(event_type, target))
    }
}

/// Decides whether an event is dropped before it reaches the outbox.
///
/// An explicit include always wins, including over an explicit exclude of
/// the same pair.
#[derive(Debug, Clone)]
pub struct EventFilter {
    enabled: bool,
    default_policy: FilterPolicy,
    always_include: HashSet<FilterRule>,
    always_exclude: HashSet<FilterRule>,
}

impl EventFilter {
    /// Build from configuration, failing on any malformed policy or rule.
    pub fn from_config(config: &FilterConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            enabled: config.enabled,
            default_policy: config.policy.parse()?,
            always_include: parse_rules(&config.do_not_filter)?,
            always_exclude: parse_rules(&config.do_filter)?,
        })
    }

    pub fn new(
        default_policy: FilterPolicy,
        always_include: impl IntoIterator<Item = FilterRule>,
        always_exclude: impl IntoIterator<Item = FilterRule>,
    ) -> Self {
        Self {
            enabled: true,
            default_policy,
            always_include: always_include.into_iter().collect(),
            always_exclude: always_exclude.into_iter().collect(),
        }
    }

    /// A filter that lets everything through.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            default_policy: FilterPolicy::IncludeAll,
            always_include: HashSet::new(),
            always_exclude: HashSet::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// True when the event must not be published.
    pub fn should_filter(&self, event: &EventRecord) -> bool {
        if !self.enabled {
            return false;
        }

        let rule = FilterRule::of(event);
        if self.always_include.contains(&rule) {
            return false;
        }
        if self.always_exclude.contains(&rule) {
            return true;
        }
        self.default_policy == FilterPolicy::ExcludeAll
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::disabled()
    }
}

fn parse_rules(rules: &[String]) -> Result<HashSet<FilterRule>, ConfigError> {
    rules
        .iter()
        .filter(|r| !r.trim().is_empty())
        .map(|r| r.parse())
        .collect()
}
