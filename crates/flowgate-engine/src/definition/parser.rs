//! Definition document parsing and design-time validation.

use std::collections::{HashSet, VecDeque};

use serde::Serialize;

use crate::condition::ConditionEvaluator;
use crate::definition::types::{
    ActionKind, AssignTarget, Channel, DelayType, NodeKind, WorkflowDefinition,
};
use crate::error::{EngineError, EngineResult};

/// Parse a JSON definition document.
pub fn parse_definition_json(content: &str) -> EngineResult<WorkflowDefinition> {
    let definition: WorkflowDefinition =
        serde_json::from_str(content).map_err(|e| EngineError::Parse(e.to_string()))?;
    Ok(normalize(definition))
}

/// Parse a YAML definition document.
pub fn parse_definition_yaml(content: &str) -> EngineResult<WorkflowDefinition> {
    let definition: WorkflowDefinition =
        serde_yaml::from_str(content).map_err(|e| EngineError::Parse(e.to_string()))?;
    Ok(normalize(definition))
}

/// Nodes may omit `id`; it defaults to the map key.
fn normalize(mut definition: WorkflowDefinition) -> WorkflowDefinition {
    for (key, node) in definition.nodes.iter_mut() {
        if node.id.is_empty() {
            node.id = key.clone();
        }
    }
    definition
}

/// Outcome of [`validate_definition`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Convert into a result, joining all errors into one definition error.
    pub fn into_result(self) -> EngineResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Definition(self.errors.join("; ")))
        }
    }
}

/// Check a definition for authoring mistakes without running it.
pub fn validate_definition(definition: &WorkflowDefinition) -> ValidationReport {
    let mut report = ValidationReport::default();
    let evaluator = ConditionEvaluator::new();

    if !definition.nodes.contains_key(&definition.root_node_id) {
        report.errors.push(format!(
            "root node '{}' is not defined",
            definition.root_node_id
        ));
    }

    // Sort for a stable report order
    let mut keys: Vec<&String> = definition.nodes.keys().collect();
    keys.sort();

    for key in keys {
        let node = &definition.nodes[key];

        if &node.id != key {
            report.errors.push(format!(
                "node key '{}' does not match node id '{}'",
                key, node.id
            ));
        }

        for target in node.successors() {
            if !definition.nodes.contains_key(target) {
                report.errors.push(format!(
                    "node '{}' references undefined node '{}'",
                    key, target
                ));
            }
        }

        match &node.kind {
            NodeKind::Decision(config) => {
                if let Err(e) = evaluator.validate(&config.condition) {
                    report.errors.push(format!("node '{}': {}", key, e));
                }
                if config.true_node_id.is_none() || config.false_node_id.is_none() {
                    report.errors.push(format!(
                        "decision node '{}' must declare both trueNodeId and falseNodeId",
                        key
                    ));
                }
            }
            NodeKind::Action(config) => {
                if let Err(e) = config.action.parse::<ActionKind>() {
                    report.errors.push(format!("node '{}': {}", key, e));
                }
            }
            NodeKind::Assignment(config) => {
                if let Err(e) = config.assign_to.parse::<AssignTarget>() {
                    report.errors.push(format!("node '{}': {}", key, e));
                }
                if let Some(escalate_to) = &config.escalate_to {
                    if let Err(e) = escalate_to.parse::<AssignTarget>() {
                        report.errors.push(format!("node '{}' escalateTo: {}", key, e));
                    }
                }
                if config.sla_hours.is_some_and(|h| h < 0.0) {
                    report
                        .errors
                        .push(format!("node '{}': slaHours must not be negative", key));
                }
            }
            NodeKind::Notification(config) => {
                if let Err(e) = config.channel.parse::<Channel>() {
                    report.errors.push(format!("node '{}': {}", key, e));
                }
            }
            NodeKind::Delay(config) => match config.delay_type.parse::<DelayType>() {
                Ok(DelayType::Until) if config.delay_until.is_none() => report
                    .errors
                    .push(format!("delay node '{}' requires delayUntil", key)),
                Ok(DelayType::Hours | DelayType::Days) if config.delay_value.is_none() => report
                    .errors
                    .push(format!("delay node '{}' requires delayValue", key)),
                Ok(_) => {}
                Err(e) => report.errors.push(format!("node '{}': {}", key, e)),
            },
            NodeKind::Integration(config) => {
                if reqwest::Method::from_bytes(config.method.to_ascii_uppercase().as_bytes())
                    .is_err()
                {
                    report.errors.push(format!(
                        "node '{}': invalid HTTP method '{}'",
                        key, config.method
                    ));
                }
                if config.url.trim().is_empty() {
                    report.errors.push(format!("node '{}': url is empty", key));
                }
            }
        }
    }

    let reachable = reachable_from_root(definition);
    let mut unreachable: Vec<&String> = definition
        .nodes
        .keys()
        .filter(|k| !reachable.contains(k.as_str()))
        .collect();
    unreachable.sort();
    for key in unreachable {
        report
            .warnings
            .push(format!("node '{}' is unreachable from the root", key));
    }

    report
}

fn reachable_from_root(definition: &WorkflowDefinition) -> HashSet<&str> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(definition.root_node_id.as_str());

    while let Some(id) = queue.pop_front() {
        let Some(node) = definition.nodes.get(id) else {
            continue;
        };
        if !seen.insert(id) {
            continue;
        }
        queue.extend(node.successors());
    }

    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO_YAML: &str = r#"
id: purchase-approval
name: Purchase approval
triggerType: REQUEST_CREATED
rootNodeId: root
isDefault: true
nodes:
  root:
    type: decision
    config:
      condition: "request.priority == 'URGENT'"
      trueNodeId: approve
      falseNodeId: assign
  approve:
    type: action
    config:
      action: AUTO_APPROVE
  assign:
    type: assignment
    config:
      assignTo: "role:site-manager"
      slaHours: 24
    next: done
"#;

    #[test]
    fn test_parse_yaml_fills_node_ids() {
        let definition = parse_definition_yaml(SCENARIO_YAML).unwrap();
        assert_eq!(definition.id, "purchase-approval");
        assert_eq!(definition.version, 1);
        assert!(definition.is_active);
        assert!(definition.is_default);
        assert_eq!(definition.nodes["assign"].id, "assign");
        assert_eq!(definition.nodes["assign"].next.as_deref(), Some("done"));
    }

    #[test]
    fn test_parse_json() {
        let definition = parse_definition_json(
            r#"{
                "id": "wf-1",
                "rootNodeId": "wait",
                "isActive": false,
                "nodes": {
                    "wait": {"id": "wait", "type": "DELAY", "config": {"delayType": "hours", "delayValue": 2}}
                }
            }"#,
        )
        .unwrap();
        assert!(!definition.is_active);
        assert!(validate_definition(&definition).is_valid());
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        let err = parse_definition_json(
            r#"{"id": "x", "rootNodeId": "a", "nodes": {"a": {"type": "loop", "config": {}}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Parse(_)));
    }

    #[test]
    fn test_validation_reports_dangling_reference() {
        let definition = parse_definition_yaml(SCENARIO_YAML).unwrap();
        let report = validate_definition(&definition);

        assert_eq!(
            report.errors,
            vec!["node 'assign' references undefined node 'done'".to_string()]
        );
        assert!(report.warnings.is_empty());
        assert!(report.into_result().is_err());
    }

    #[test]
    fn test_validation_collects_all_problems() {
        let definition = parse_definition_yaml(
            r#"
id: broken
rootNodeId: start
nodes:
  first:
    type: decision
    config:
      condition: "a =="
      trueNodeId: first
  act:
    id: other
    type: action
    config:
      action: SELF_DESTRUCT
  ping:
    type: notification
    config:
      channel: fax
"#,
        )
        .unwrap();

        let report = validate_definition(&definition);
        let joined = report.errors.join("\n");
        assert!(joined.contains("root node 'start' is not defined"));
        assert!(joined.contains("does not match node id 'other'"));
        assert!(joined.contains("unknown action 'SELF_DESTRUCT'"));
        assert!(joined.contains("unknown notification channel 'fax'"));
        assert!(joined.contains("Condition syntax error"));
        assert!(joined.contains("must declare both trueNodeId and falseNodeId"));
        assert_eq!(report.warnings.len(), 3);
    }
}
