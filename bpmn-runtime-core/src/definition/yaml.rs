use super::dto::ProcessModel;
use crate::error::Result;

/// Parse a YAML string into a ProcessModel.
///
/// Validation is NOT performed here; `compile()` and
/// `DefinitionRepository::deploy()` validate before building the definition.
pub fn parse_process_yaml(yaml_str: &str) -> Result<ProcessModel> {
    let model: ProcessModel = serde_yaml::from_str(yaml_str)?;
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::dto::*;
    use crate::error::EngineError;

    #[test]
    fn test_basic_yaml_parse() {
        let yaml = r#"
key: order
nodes:
  - kind: Start
    id: start
  - kind: UserTask
    id: review
    name: Review order
  - kind: End
    id: end
edges:
  - from: start
    to: review
  - from: review
    to: end
"#;
        let model = parse_process_yaml(yaml).unwrap();
        assert_eq!(model.key, "order");
        assert_eq!(model.nodes.len(), 3);
        assert_eq!(model.edges.len(), 2);
        assert!(matches!(
            &model.nodes[1],
            NodeDto::UserTask { name: Some(n), parent: None, .. } if n == "Review order"
        ));
    }

    #[test]
    fn test_yaml_with_conditions_and_boundaries() {
        let yaml = r#"
key: approval
nodes:
  - kind: Start
    id: start
  - kind: ExclusiveGateway
    id: gw
  - kind: ReceiveTask
    id: wait
  - kind: Boundary
    id: on_cancel
    host: wait
    cancel_activity: false
    trigger:
      type: Message
      message: cancel
  - kind: End
    id: end
edges:
  - from: start
    to: gw
  - from: gw
    to: wait
    condition:
      variable: amount
      op: ">"
      value: 100
  - from: gw
    to: end
    is_default: true
  - from: wait
    to: end
  - from: on_cancel
    to: end
"#;
        let model = parse_process_yaml(yaml).unwrap();
        let cond = model.edges[1].condition.as_ref().unwrap();
        assert_eq!(cond.variable, "amount");
        assert_eq!(cond.op, ConditionOp::Gt);
        assert_eq!(cond.value, serde_json::json!(100));
        assert!(model.edges[2].is_default);

        match &model.nodes[3] {
            NodeDto::Boundary {
                host,
                trigger: BoundaryTrigger::Message { message },
                cancel_activity,
                ..
            } => {
                assert_eq!(host, "wait");
                assert_eq!(message, "cancel");
                assert!(!cancel_activity);
            }
            other => panic!("unexpected node: {other:?}"),
        }
    }

    #[test]
    fn test_boundary_interrupting_by_default() {
        let yaml = r#"
key: p
nodes:
  - kind: Boundary
    id: b
    host: t
    trigger:
      type: Signal
      signal: alert
"#;
        let model = parse_process_yaml(yaml).unwrap();
        assert!(matches!(
            model.nodes[0],
            NodeDto::Boundary {
                cancel_activity: true,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_kind_is_yaml_error() {
        let yaml = "key: p\nnodes:\n  - kind: Teleport\n    id: x\n";
        assert!(matches!(
            parse_process_yaml(yaml),
            Err(EngineError::Yaml(_))
        ));
    }
}
