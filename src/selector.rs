//! Label queries used to pick a pod by its metadata
//!
//! Formatting follows the Kubernetes selector grammar so that the string can
//! be handed straight to the API server and quoted in error messages.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};

use crate::errors::TunnelError;

/// Set-based selector operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

impl LabelOperator {
    fn takes_values(self) -> bool {
        matches!(self, LabelOperator::In | LabelOperator::NotIn)
    }
}

impl FromStr for LabelOperator {
    type Err = TunnelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "In" => Ok(LabelOperator::In),
            "NotIn" => Ok(LabelOperator::NotIn),
            "Exists" => Ok(LabelOperator::Exists),
            "DoesNotExist" => Ok(LabelOperator::DoesNotExist),
            other => Err(TunnelError::InvalidSpec(format!(
                "unknown label selector operator: {}", other
            ))),
        }
    }
}

impl fmt::Display for LabelOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LabelOperator::In => "In",
            LabelOperator::NotIn => "NotIn",
            LabelOperator::Exists => "Exists",
            LabelOperator::DoesNotExist => "DoesNotExist",
        };
        f.write_str(s)
    }
}

/// A single set-based constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelExpression {
    pub key: String,
    pub operator: LabelOperator,
    pub values: Vec<String>,
}

impl LabelExpression {
    pub fn new(key: impl Into<String>, operator: LabelOperator, values: &[&str]) -> Self {
        Self {
            key: key.into(),
            operator,
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    fn render(&self) -> String {
        let mut values: Vec<&str> = self.values.iter().map(String::as_str).collect();
        values.sort_unstable();
        match self.operator {
            LabelOperator::In => format!("{} in ({})", self.key, values.join(",")),
            LabelOperator::NotIn => format!("{} notin ({})", self.key, values.join(",")),
            LabelOperator::Exists => self.key.clone(),
            LabelOperator::DoesNotExist => format!("!{}", self.key),
        }
    }
}

/// Exact-match labels plus set-based expressions, all of which must hold
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelQuery {
    pub match_labels: BTreeMap<String, String>,
    pub match_expressions: Vec<LabelExpression>,
}

impl LabelQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an exact-match label
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.match_labels.insert(key.into(), value.into());
        self
    }

    /// Add a set-based expression
    pub fn expression(mut self, expression: LabelExpression) -> Self {
        self.match_expressions.push(expression);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }

    /// Parse a single `key=value` flag and add it as an exact-match label
    pub fn insert_flag(&mut self, flag: &str) -> Result<(), TunnelError> {
        let (key, value) = flag.split_once('=')
            .ok_or_else(|| TunnelError::InvalidSpec("labels must include equal sign".to_string()))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(TunnelError::InvalidSpec(format!("label key is empty in '{}'", flag)));
        }
        self.match_labels.insert(key.to_string(), value.trim().to_string());
        Ok(())
    }

    /// Check that every expression is well formed for its operator
    pub fn validate(&self) -> Result<(), TunnelError> {
        for expr in &self.match_expressions {
            if expr.key.is_empty() {
                return Err(TunnelError::InvalidSpec("label expression key is empty".to_string()));
            }
            match (expr.operator.takes_values(), expr.values.is_empty()) {
                (true, true) => {
                    return Err(TunnelError::InvalidSpec(format!(
                        "operator {} on '{}' requires at least one value",
                        expr.operator, expr.key
                    )));
                }
                (false, false) => {
                    return Err(TunnelError::InvalidSpec(format!(
                        "operator {} on '{}' does not take values",
                        expr.operator, expr.key
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl fmt::Display for LabelQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut requirements: Vec<(&str, String)> = self.match_labels.iter()
            .map(|(k, v)| (k.as_str(), format!("{}={}", k, v)))
            .chain(self.match_expressions.iter().map(|e| (e.key.as_str(), e.render())))
            .collect();

        if requirements.is_empty() {
            return f.write_str("<none>");
        }

        requirements.sort_by(|a, b| a.0.cmp(b.0));
        let rendered: Vec<String> = requirements.into_iter().map(|(_, r)| r).collect();
        f.write_str(&rendered.join(","))
    }
}

/// Parses a comma-separated list of `key=value` labels
impl FromStr for LabelQuery {
    type Err = TunnelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut query = LabelQuery::new();
        for flag in s.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            query.insert_flag(flag)?;
        }
        Ok(query)
    }
}

impl TryFrom<LabelSelector> for LabelQuery {
    type Error = TunnelError;

    fn try_from(selector: LabelSelector) -> Result<Self, Self::Error> {
        let match_expressions = selector.match_expressions.unwrap_or_default()
            .into_iter()
            .map(|req| {
                Ok(LabelExpression {
                    operator: req.operator.parse()?,
                    key: req.key,
                    values: req.values.unwrap_or_default(),
                })
            })
            .collect::<Result<Vec<_>, TunnelError>>()?;

        Ok(Self {
            match_labels: selector.match_labels.unwrap_or_default(),
            match_expressions,
        })
    }
}

impl From<&LabelQuery> for LabelSelector {
    fn from(query: &LabelQuery) -> Self {
        let expressions: Vec<LabelSelectorRequirement> = query.match_expressions.iter()
            .map(|e| LabelSelectorRequirement {
                key: e.key.clone(),
                operator: e.operator.to_string(),
                values: if e.operator.takes_values() { Some(e.values.clone()) } else { None },
            })
            .collect();

        LabelSelector {
            match_labels: (!query.match_labels.is_empty()).then(|| query.match_labels.clone()),
            match_expressions: (!expressions.is_empty()).then_some(expressions),
        }
    }
}
