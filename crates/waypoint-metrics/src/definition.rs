//! Metric definitions and template validation.
//!
//! A template's `metrics_definition` column holds an ordered JSON list of
//! [`MetricDefinition`]s. Validation runs at save time: names must be
//! unique, computed expressions must parse, the computed reference graph
//! must be acyclic, and external sources must look like `pluginId.fieldId`.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::expr::Expr;

/// How a metric's value originates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// Entered by the user
    Input,
    /// Derived from other metrics by an expression
    Computed,
    /// Written by a plugin sync
    External,
}

/// Input widget hint for input metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Number,
    Time,
    Text,
    Boolean,
}

/// One metric in a template, in display order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricDefinition {
    /// Stable key, unique within the template
    pub name: String,
    /// Display label
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub metric_type: MetricType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_type: Option<InputType>,
    /// `pluginId.fieldId` for external metrics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Expression text for computed metrics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

/// Template validation failure, reported against one definition.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DefinitionError {
    #[error("metric name {0:?} is duplicated")]
    DuplicateName(String),
    #[error("metric {0:?}: {1}")]
    Invalid(String, String),
    #[error("computed metrics form a reference cycle involving {0:?}")]
    Cycle(String),
}

/// Parse the definition JSON column.
///
/// # Errors
/// Returns an error if the JSON is not a definition list.
pub fn parse_definitions(json: &str) -> Result<Vec<MetricDefinition>, serde_json::Error> {
    serde_json::from_str(json)
}

/// Validate a definition list for saving.
///
/// # Errors
/// Returns the first violated rule.
pub fn validate_definitions(defs: &[MetricDefinition]) -> Result<(), DefinitionError> {
    let mut seen = HashSet::new();
    for def in defs {
        if !seen.insert(def.name.as_str()) {
            return Err(DefinitionError::DuplicateName(def.name.clone()));
        }
        if def.name.trim().is_empty() {
            return Err(DefinitionError::Invalid(
                def.name.clone(),
                "name must not be empty".into(),
            ));
        }

        match def.metric_type {
            MetricType::Input => {
                if def.input_type.is_none() {
                    return Err(DefinitionError::Invalid(
                        def.name.clone(),
                        "input metrics need an inputType".into(),
                    ));
                }
            }
            MetricType::External => {
                let valid = def
                    .source
                    .as_deref()
                    .map_or(false, |source| {
                        matches!(source.split_once('.'),
                                 Some((plugin, field)) if !plugin.is_empty() && !field.is_empty())
                    });
                if !valid {
                    return Err(DefinitionError::Invalid(
                        def.name.clone(),
                        "external metrics need a pluginId.fieldId source".into(),
                    ));
                }
            }
            MetricType::Computed => {
                let Some(expression) = def.expression.as_deref() else {
                    return Err(DefinitionError::Invalid(
                        def.name.clone(),
                        "computed metrics need an expression".into(),
                    ));
                };
                if let Err(e) = Expr::parse(expression) {
                    return Err(DefinitionError::Invalid(def.name.clone(), e.to_string()));
                }
            }
        }
    }

    check_acyclic(defs)
}

/// Computed definitions in dependency order (referenced metrics first).
///
/// Non-computed references are leaves and impose no ordering. Assumes the
/// list already passed [`validate_definitions`]; a cycle encountered here
/// is still reported rather than looping.
///
/// # Errors
/// Returns `Cycle` if the computed references loop.
pub fn topological_computed(
    defs: &[MetricDefinition],
) -> Result<Vec<&MetricDefinition>, DefinitionError> {
    let computed: HashMap<&str, &MetricDefinition> = defs
        .iter()
        .filter(|def| def.metric_type == MetricType::Computed)
        .map(|def| (def.name.as_str(), def))
        .collect();

    let mut ordered = Vec::with_capacity(computed.len());
    let mut state: HashMap<&str, VisitState> = HashMap::new();

    for name in computed.keys() {
        visit(name, &computed, &mut state, &mut ordered)?;
    }

    Ok(ordered)
}

#[derive(Clone, Copy, PartialEq)]
enum VisitState {
    InProgress,
    Done,
}

fn visit<'a>(
    name: &'a str,
    computed: &HashMap<&'a str, &'a MetricDefinition>,
    state: &mut HashMap<&'a str, VisitState>,
    ordered: &mut Vec<&'a MetricDefinition>,
) -> Result<(), DefinitionError> {
    let Some(def) = computed.get(name) else {
        return Ok(()); // input/external leaf
    };
    match state.get(name) {
        Some(VisitState::Done) => return Ok(()),
        Some(VisitState::InProgress) => return Err(DefinitionError::Cycle(name.to_string())),
        None => {}
    }
    state.insert(name, VisitState::InProgress);

    // Expression parsed at save time; unparsable text has no references.
    if let Some(expr) = def.expression.as_deref().and_then(|e| Expr::parse(e).ok()) {
        for reference in expr.references() {
            if let Some((key, _)) = computed.get_key_value(reference.as_str()) {
                visit(key, computed, state, ordered)?;
            }
        }
    }

    state.insert(name, VisitState::Done);
    ordered.push(def);
    Ok(())
}

fn check_acyclic(defs: &[MetricDefinition]) -> Result<(), DefinitionError> {
    topological_computed(defs).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(name: &str) -> MetricDefinition {
        MetricDefinition {
            name: name.into(),
            label: name.into(),
            unit: None,
            metric_type: MetricType::Input,
            input_type: Some(InputType::Number),
            source: None,
            expression: None,
        }
    }

    fn computed(name: &str, expression: &str) -> MetricDefinition {
        MetricDefinition {
            name: name.into(),
            label: name.into(),
            unit: None,
            metric_type: MetricType::Computed,
            input_type: None,
            source: None,
            expression: Some(expression.into()),
        }
    }

    fn external(name: &str, source: &str) -> MetricDefinition {
        MetricDefinition {
            name: name.into(),
            label: name.into(),
            unit: None,
            metric_type: MetricType::External,
            input_type: None,
            source: Some(source.into()),
            expression: None,
        }
    }

    #[test]
    fn test_valid_template() {
        let defs = vec![
            input("sleep"),
            external("steps", "fitbit.steps"),
            computed("sleepHours", "parseTime(sleep) / 60"),
            computed("active", "steps > 10000 ? 1 : 0"),
        ];
        assert!(validate_definitions(&defs).is_ok());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let defs = vec![input("sleep"), input("sleep")];
        assert!(matches!(
            validate_definitions(&defs),
            Err(DefinitionError::DuplicateName(_))
        ));
    }

    #[test]
    fn test_bad_external_source_rejected() {
        for source in ["steps", "fitbit.", ".steps"] {
            let defs = vec![external("steps", source)];
            assert!(
                matches!(validate_definitions(&defs), Err(DefinitionError::Invalid(_, _))),
                "source {source:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_unparsable_expression_rejected() {
        let defs = vec![computed("x", "1 +")];
        assert!(matches!(
            validate_definitions(&defs),
            Err(DefinitionError::Invalid(_, _))
        ));
    }

    #[test]
    fn test_cycle_rejected() {
        let defs = vec![computed("a", "b + 1"), computed("b", "a + 1")];
        assert!(matches!(
            validate_definitions(&defs),
            Err(DefinitionError::Cycle(_))
        ));

        let defs = vec![computed("selfref", "selfref + 1")];
        assert!(matches!(
            validate_definitions(&defs),
            Err(DefinitionError::Cycle(_))
        ));
    }

    #[test]
    fn test_topological_order() {
        let defs = vec![
            input("sleep"),
            // Defined out of dependency order on purpose.
            computed("score", "sleepHours * quality"),
            computed("quality", "sleepHours >= 7 ? 1 : 0.5"),
            computed("sleepHours", "parseTime(sleep) / 60"),
        ];
        let ordered = topological_computed(&defs).expect("topo order");
        let names: Vec<&str> = ordered.iter().map(|def| def.name.as_str()).collect();

        let position = |name: &str| names.iter().position(|n| *n == name).expect("present");
        assert!(position("sleepHours") < position("quality"));
        assert!(position("quality") < position("score"));
    }

    #[test]
    fn test_definition_json_round_trip() {
        let defs = vec![input("sleep"), computed("sleepHours", "parseTime(sleep) / 60")];
        let json = serde_json::to_string(&defs).expect("serialize");
        assert!(json.contains("\"metricType\":\"input\""));
        let back = parse_definitions(&json).expect("parse");
        assert_eq!(back.len(), 2);
        assert_eq!(back[1].expression.as_deref(), Some("parseTime(sleep) / 60"));
    }
}
