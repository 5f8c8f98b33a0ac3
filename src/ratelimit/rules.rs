//! Rate limit rules configuration.
//!
//! Each rule binds one limiter to one route path. Rules are usually part of
//! the main configuration file but can also be parsed from a standalone YAML
//! document.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::key::HeaderKeySpec;
use super::limiter::LimiterConfig;
use super::window::{Algorithm, TimeWindow};
use crate::error::{GatekeeperError, Result};

/// A set of rate limit rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

/// One rate limit rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Name used in logs; defaults to the path
    #[serde(default)]
    pub name: Option<String>,
    /// Route path the rule protects
    pub path: String,
    /// Maximum requests admitted per window
    pub limit: u64,
    /// Window length in seconds; takes precedence over `unit`
    #[serde(default)]
    pub window_secs: Option<u64>,
    /// Named window length
    #[serde(default)]
    pub unit: Option<TimeWindow>,
    /// Counting algorithm
    #[serde(default)]
    pub algorithm: Algorithm,
    /// Header-qualified keys
    #[serde(default)]
    pub header: Option<HeaderRuleConfig>,
    /// Replacement responses for denials
    #[serde(default)]
    pub responses: ResponsesConfig,
}

/// Header part of a rule's key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderRuleConfig {
    pub name: String,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default = "default_require_not_empty")]
    pub require_not_empty: bool,
}

fn default_require_not_empty() -> bool {
    true
}

/// A fixed response declared in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseConfig {
    pub status: u16,
    #[serde(default)]
    pub body: serde_json::Value,
}

/// Per-outcome response overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponsesConfig {
    #[serde(default)]
    pub rate_limited: Option<ResponseConfig>,
    #[serde(default)]
    pub missing_header: Option<ResponseConfig>,
    #[serde(default)]
    pub empty_header: Option<ResponseConfig>,
    #[serde(default)]
    pub invalid_header_value: Option<ResponseConfig>,
    #[serde(default)]
    pub blacklisted: Option<ResponseConfig>,
}

impl RulesConfig {
    /// Load rules from a YAML string.
    ///
    /// Accepts either a `rules:` mapping or a bare list of rules.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if let Ok(rules) = serde_yaml::from_str::<Vec<RuleConfig>>(yaml) {
            return Ok(Self { rules });
        }

        serde_yaml::from_str(yaml).map_err(|e| {
            GatekeeperError::Config(format!("Failed to parse rate limit rules: {}", e))
        })
    }
}

impl RuleConfig {
    /// Name of the rule, falling back to its path.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.path)
    }

    /// The configured window length.
    pub fn window(&self) -> Result<Duration> {
        match (self.window_secs, self.unit) {
            (Some(secs), _) => Ok(Duration::from_secs(secs)),
            (None, Some(unit)) => Ok(unit.duration()),
            (None, None) => Err(GatekeeperError::Config(format!(
                "rule {:?} needs either window_secs or unit",
                self.display_name()
            ))),
        }
    }

    /// Convert into a validated limiter configuration.
    pub fn to_limiter_config(&self) -> Result<LimiterConfig> {
        if !self.path.starts_with('/') {
            return Err(GatekeeperError::Config(format!(
                "rule {:?} has path {:?}, which must start with '/'",
                self.display_name(),
                self.path
            )));
        }

        let mut config = LimiterConfig::new(self.limit, self.window()?)
            .name(self.display_name())
            .algorithm(self.algorithm);

        if let Some(header) = &self.header {
            let mut spec = HeaderKeySpec::new(header.name.clone())
                .require_not_empty(header.require_not_empty);
            if let Some(pattern) = &header.pattern {
                spec = spec.pattern(pattern.clone());
            }
            config = config.key(spec);
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_rules() {
        let yaml = r#"
rules:
  - path: /api
    limit: 100
    unit: minute
"#;
        let config = RulesConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.rules.len(), 1);

        let limiter = config.rules[0].to_limiter_config().unwrap();
        assert_eq!(limiter.name, "/api");
        assert_eq!(limiter.limit, 100);
        assert_eq!(limiter.window, Duration::from_secs(60));
        assert_eq!(limiter.algorithm, Algorithm::Fixed);
        assert!(limiter.key.is_none());
    }

    #[test]
    fn test_parse_bare_list() {
        let yaml = r#"
- path: /a
  limit: 1
  window_secs: 5
- path: /b
  limit: 2
  unit: second
  algorithm: sliding
"#;
        let config = RulesConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.rules.len(), 2);
        assert_eq!(config.rules[1].algorithm, Algorithm::Sliding);
    }

    #[test]
    fn test_window_secs_overrides_unit() {
        let yaml = r#"
- path: /a
  limit: 1
  window_secs: 5
  unit: hour
"#;
        let config = RulesConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.rules[0].window().unwrap(), Duration::from_secs(5));
    }

    #[test]
    fn test_header_rule() {
        let yaml = r#"
- name: api-keys
  path: /keyed
  limit: 10
  window_secs: 30
  header:
    name: X-Api-Key
    pattern: "[a-f0-9]{32}"
  responses:
    missing_header:
      status: 401
      body:
        error: "API key required"
"#;
        let config = RulesConfig::from_yaml(yaml).unwrap();
        let rule = &config.rules[0];

        let limiter = rule.to_limiter_config().unwrap();
        assert_eq!(limiter.name, "api-keys");
        let key = limiter.key.unwrap();
        assert_eq!(key.header_name, "X-Api-Key");
        assert_eq!(key.pattern.as_deref(), Some("[a-f0-9]{32}"));
        assert!(key.require_not_empty);

        let missing = rule.responses.missing_header.as_ref().unwrap();
        assert_eq!(missing.status, 401);
        assert_eq!(missing.body["error"], "API key required");
        assert!(rule.responses.rate_limited.is_none());
    }

    #[test]
    fn test_rule_without_window_is_rejected() {
        let yaml = r#"
- path: /a
  limit: 1
"#;
        let config = RulesConfig::from_yaml(yaml).unwrap();
        assert!(matches!(
            config.rules[0].to_limiter_config(),
            Err(GatekeeperError::Config(_))
        ));
    }

    #[test]
    fn test_zero_limit_is_rejected() {
        let yaml = r#"
- path: /a
  limit: 0
  window_secs: 1
"#;
        let config = RulesConfig::from_yaml(yaml).unwrap();
        assert!(matches!(
            config.rules[0].to_limiter_config(),
            Err(GatekeeperError::InvalidLimit)
        ));
    }

    #[test]
    fn test_oversized_window_is_rejected() {
        let yaml = r#"
- path: /a
  limit: 1
  window_secs: 18446744073709551615
"#;
        let config = RulesConfig::from_yaml(yaml).unwrap();
        assert!(matches!(
            config.rules[0].to_limiter_config(),
            Err(GatekeeperError::InvalidWindow)
        ));
    }

    #[test]
    fn test_parse_all_response_overrides() {
        let yaml = r#"
- path: /a
  limit: 1
  window_secs: 1
  responses:
    empty_header:
      status: 422
      body: { error: "empty" }
    invalid_header_value:
      status: 401
      body: { error: "bad key" }
    blacklisted:
      status: 404
      body: { error: "not found" }
"#;
        let config = RulesConfig::from_yaml(yaml).unwrap();
        let responses = &config.rules[0].responses;

        assert_eq!(responses.empty_header.as_ref().unwrap().status, 422);
        assert_eq!(responses.invalid_header_value.as_ref().unwrap().status, 401);
        let blacklisted = responses.blacklisted.as_ref().unwrap();
        assert_eq!(blacklisted.status, 404);
        assert_eq!(blacklisted.body["error"], "not found");
        assert!(responses.missing_header.is_none());
    }

    #[test]
    fn test_relative_path_is_rejected() {
        let yaml = r#"
- path: api
  limit: 1
  window_secs: 1
"#;
        let config = RulesConfig::from_yaml(yaml).unwrap();
        assert!(config.rules[0].to_limiter_config().is_err());
    }

    #[test]
    fn test_malformed_yaml() {
        let result = RulesConfig::from_yaml("rules: [unterminated");
        assert!(matches!(result, Err(GatekeeperError::Config(_))));
    }
}
