//! Routing rules
//!
//! A rule pins matching requests to an explicit set of target services. Rules
//! are tried in descending priority order and the first enabled rule whose
//! conditions all hold wins. A winning rule with no targets leaves the
//! candidates untouched.

use super::criteria::{MeshMember, SelectionCriteria};
use crate::error::{MeshError, MeshResult};
use chrono::{Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

/// Extra condition a request must satisfy for a rule to apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleCondition {
    /// Request made on behalf of this user
    UserId { value: String },
    /// Current UTC hour within `start..=end`
    HourRange { start: u32, end: u32 },
}

impl RuleCondition {
    fn holds(&self, criteria: &SelectionCriteria, hour: u32) -> bool {
        match self {
            RuleCondition::UserId { value } => criteria.user_id.as_deref() == Some(value.as_str()),
            RuleCondition::HourRange { start, end } => (*start..=*end).contains(&hour),
        }
    }
}

/// Narrows candidates to `target_services` when a request matches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub rule_id: String,
    /// Only requests for this service type
    #[serde(default)]
    pub service_type: Option<String>,
    /// Only requests asking for this capability
    #[serde(default)]
    pub capability: Option<String>,
    /// Caller pattern; `*` alone matches everything, one inner `*` is a wildcard
    #[serde(default)]
    pub source_pattern: Option<String>,
    #[serde(default)]
    pub target_services: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,
    /// Higher priorities are tried first
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl RoutingRule {
    pub fn new(rule_id: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.into(),
            service_type: None,
            capability: None,
            source_pattern: None,
            target_services: Vec::new(),
            conditions: Vec::new(),
            priority: 0,
            enabled: true,
        }
    }

    pub fn for_type(mut self, service_type: impl Into<String>) -> Self {
        self.service_type = Some(service_type.into());
        self
    }

    pub fn for_capability(mut self, capability: impl Into<String>) -> Self {
        self.capability = Some(capability.into());
        self
    }

    pub fn from_source(mut self, pattern: impl Into<String>) -> Self {
        self.source_pattern = Some(pattern.into());
        self
    }

    pub fn targeting(mut self, service_id: impl Into<String>) -> Self {
        self.target_services.push(service_id.into());
        self
    }

    pub fn when(mut self, condition: RuleCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn validate(&self) -> MeshResult<()> {
        if self.rule_id.trim().is_empty() {
            return Err(MeshError::validation("rule_id", "routing rule id must not be empty"));
        }
        for condition in &self.conditions {
            if let RuleCondition::HourRange { start, end } = condition {
                if *start > 23 || *end > 23 || start > end {
                    return Err(MeshError::validation(
                        "conditions",
                        format!("rule '{}' has invalid hour range {start}..={end}", self.rule_id),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Whether this rule applies to `criteria` at UTC `hour`
    pub fn matches_at(&self, criteria: &SelectionCriteria, hour: u32) -> bool {
        if !self.enabled {
            return false;
        }
        if let Some(service_type) = &self.service_type {
            if criteria.service_type.as_deref() != Some(service_type.as_str()) {
                return false;
            }
        }
        if let Some(capability) = &self.capability {
            if !criteria
                .capabilities
                .iter()
                .any(|c| c.eq_ignore_ascii_case(capability))
            {
                return false;
            }
        }
        if let Some(pattern) = &self.source_pattern {
            let source = criteria.source_service.as_deref().unwrap_or_default();
            if !matches_pattern(source, pattern) {
                return false;
            }
        }
        self.conditions.iter().all(|c| c.holds(criteria, hour))
    }
}

/// Match `text` against a pattern with at most one `*`
pub fn matches_pattern(text: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.split_once('*') {
        Some((prefix, suffix)) if !suffix.contains('*') => {
            text.len() >= prefix.len() + suffix.len()
                && text.starts_with(prefix)
                && text.ends_with(suffix)
        }
        _ => text == pattern,
    }
}

/// Priority-ordered rule set
#[derive(Debug, Default)]
pub struct RoutingTable {
    rules: RwLock<Vec<RoutingRule>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table holding `rules`, validated and ordered
    pub fn with_rules(rules: impl IntoIterator<Item = RoutingRule>) -> MeshResult<Self> {
        let table = Self::new();
        for rule in rules {
            table.add(rule)?;
        }
        Ok(table)
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<RoutingRule>> {
        self.rules.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<RoutingRule>> {
        self.rules.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a rule, replacing any rule with the same id
    pub fn add(&self, rule: RoutingRule) -> MeshResult<()> {
        rule.validate()?;
        let mut rules = self.write();
        rules.retain(|r| r.rule_id != rule.rule_id);
        info!(rule_id = %rule.rule_id, priority = rule.priority, "Routing rule added");
        rules.push(rule);
        // Stable: equal priorities keep insertion order
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(())
    }

    pub fn remove(&self, rule_id: &str) -> bool {
        let mut rules = self.write();
        let before = rules.len();
        rules.retain(|r| r.rule_id != rule_id);
        let removed = rules.len() != before;
        if removed {
            info!(rule_id, "Routing rule removed");
        }
        removed
    }

    /// Rules in evaluation order
    pub fn rules(&self) -> Vec<RoutingRule> {
        self.read().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// First rule applying to `criteria` at UTC `hour`
    pub fn matching_rule_at(&self, criteria: &SelectionCriteria, hour: u32) -> Option<RoutingRule> {
        self.read().iter().find(|r| r.matches_at(criteria, hour)).cloned()
    }

    /// Narrow `candidates` by the first matching rule
    pub fn apply<T: MeshMember>(&self, candidates: Vec<T>, criteria: &SelectionCriteria) -> Vec<T> {
        self.apply_at(candidates, criteria, Utc::now().hour())
    }

    pub fn apply_at<T: MeshMember>(
        &self,
        candidates: Vec<T>,
        criteria: &SelectionCriteria,
        hour: u32,
    ) -> Vec<T> {
        let Some(rule) = self.matching_rule_at(criteria, hour) else {
            return candidates;
        };
        if rule.target_services.is_empty() {
            return candidates;
        }
        debug!(rule_id = %rule.rule_id, targets = rule.target_services.len(), "Routing rule applied");
        candidates
            .into_iter()
            .filter(|c| rule.target_services.iter().any(|t| t == c.member_id()))
            .collect()
    }
}
