//! Router Component
//!
//! Maps request paths to either the forwarder or a local handler

use crate::config::{LocalHandler, RouteRule, RouteTarget, RoutingConfig};
use crate::error::GatewayError;
use std::collections::HashSet;

/// Where a request goes after matching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Forward,
    Local(LocalHandler),
    /// Fallback for `/`
    Index,
    /// Fallback for every other unmatched path
    NotFound,
}

/// Body served for the root path
pub const INDEX_BODY: &str = "index";
pub const NOT_FOUND_BODY: &str = "404 page not found";

/// Immutable prefix table, longest prefix first
#[derive(Debug, Clone)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
}

impl RouteTable {
    /// Build a table from routing configuration
    pub fn new(config: RoutingConfig) -> Result<Self, GatewayError> {
        Self::validate_routing_config(&config)?;

        let mut rules = config.rules;
        // Longer prefixes are more specific; ties cannot happen after validation
        rules.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));

        for rule in &rules {
            tracing::debug!(prefix = %rule.prefix, target = ?rule.target, "Registered route");
        }

        Ok(RouteTable { rules })
    }

    /// Resolve a request path to a dispatch decision
    pub fn match_path(&self, path: &str) -> Dispatch {
        for rule in &self.rules {
            if path.starts_with(&rule.prefix) {
                return match rule.target.local_handler() {
                    Some(handler) => Dispatch::Local(handler),
                    None => Dispatch::Forward,
                };
            }
        }

        if path == "/" {
            Dispatch::Index
        } else {
            Dispatch::NotFound
        }
    }

    /// Service names exposed by this table, sorted
    pub fn advertised_services(&self) -> Vec<String> {
        let mut services: Vec<String> = self
            .rules
            .iter()
            .map(|rule| rule.prefix.trim_matches('/').to_string())
            .collect();
        services.sort();
        services
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    pub fn has_forward_routes(&self) -> bool {
        self.rules.iter().any(|rule| rule.target == RouteTarget::Forward)
    }

    /// Check a single prefix
    pub fn validate_prefix(prefix: &str) -> Result<(), GatewayError> {
        if prefix == "/" {
            return Err(GatewayError::config("Route prefix '/' is reserved for the fallback"));
        }
        if !prefix.starts_with('/') || !prefix.ends_with('/') {
            return Err(GatewayError::config(format!(
                "Invalid route prefix '{}': must start and end with '/'",
                prefix
            )));
        }
        if prefix.contains("//") {
            return Err(GatewayError::config(format!(
                "Invalid route prefix '{}': empty path segment",
                prefix
            )));
        }
        Ok(())
    }

    /// Validate the entire routing configuration
    pub fn validate_routing_config(config: &RoutingConfig) -> Result<(), GatewayError> {
        let mut seen_prefixes = HashSet::new();
        for (index, rule) in config.rules.iter().enumerate() {
            Self::validate_prefix(&rule.prefix)
                .map_err(|e| GatewayError::config(format!("Rule {}: {}", index, e)))?;
            if !seen_prefixes.insert(rule.prefix.as_str()) {
                return Err(GatewayError::config(format!("Duplicate route prefix: {}", rule.prefix)));
            }
        }
        Ok(())
    }

    /// Get routing statistics for monitoring and debugging
    pub fn get_routing_stats(&self) -> RoutingStats {
        let local_rules = self.rules.iter().filter(|r| r.target.local_handler().is_some()).count();
        RoutingStats {
            total_rules: self.rules.len(),
            forward_rules: self.rules.len() - local_rules,
            local_rules,
        }
    }
}

/// Statistics about the routing configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingStats {
    pub total_rules: usize,
    pub forward_rules: usize,
    pub local_rules: usize,
}
