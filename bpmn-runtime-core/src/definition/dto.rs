use serde::{Deserialize, Serialize};

// ── Helper defaults for serde ──

fn default_true() -> bool {
    true
}

fn is_false(v: &bool) -> bool {
    !v
}

// ── Top-level DTO ──

/// Structured process model as handed over by the deployment side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessModel {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub nodes: Vec<NodeDto>,
    #[serde(default)]
    pub edges: Vec<EdgeDto>,
}

// ── Edge ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDto {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<VariableCondition>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_default: bool,
}

impl EdgeDto {
    pub fn new(from: &str, to: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            condition: None,
            is_default: false,
        }
    }
}

/// `variable op value` over the process variables visible to the token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableCondition {
    pub variable: String,
    pub op: ConditionOp,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Neq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
}

impl VariableCondition {
    /// Evaluate against the resolved variable. A missing variable only
    /// satisfies `!=`. Ordering operators compare numbers, then strings.
    pub fn holds(&self, actual: Option<&serde_json::Value>) -> bool {
        let Some(actual) = actual else {
            return self.op == ConditionOp::Neq;
        };
        match self.op {
            ConditionOp::Eq => values_equal(actual, &self.value),
            ConditionOp::Neq => !values_equal(actual, &self.value),
            ConditionOp::Lt => {
                compare(actual, &self.value) == Some(std::cmp::Ordering::Less)
            }
            ConditionOp::Gt => {
                compare(actual, &self.value) == Some(std::cmp::Ordering::Greater)
            }
        }
    }
}

fn values_equal(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(a: &serde_json::Value, b: &serde_json::Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (serde_json::Value::Number(_), serde_json::Value::Number(_)) => {
            a.as_f64()?.partial_cmp(&b.as_f64()?)
        }
        (serde_json::Value::String(x), serde_json::Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

// ── Node (tagged enum) ──

/// Every node carries an optional `parent`: the id of the sub-process or
/// event sub-process it is nested in. `None` = process level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum NodeDto {
    Start {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
    },
    /// Start event of an event sub-process.
    MessageStart {
        id: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
    },
    End {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
    },
    UserTask {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
    },
    ReceiveTask {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
    },
    /// Automatic activity. With `for_compensation` it is a compensation
    /// handler: never reached through sequence flows and without a body of
    /// its own. Running it means one compensate event from a fresh execution
    /// under the compensated scope, which ends right away.
    ServiceTask {
        id: String,
        #[serde(default, skip_serializing_if = "is_false")]
        for_compensation: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
    },
    CatchSignal {
        id: String,
        signal: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
    },
    CatchMessage {
        id: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
    },
    ThrowSignal {
        id: String,
        signal: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
    },
    /// Compensates `activity`, or every completed compensable activity of
    /// the enclosing scope when absent. Handlers run most recent first and
    /// have no body, so each one is reported by its compensate event only.
    ThrowCompensation {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        activity: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
    },
    ExclusiveGateway {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
    },
    ParallelGateway {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
    },
    SubProcess {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
    },
    EventSubProcess {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
    },
    Boundary {
        id: String,
        host: String,
        trigger: BoundaryTrigger,
        #[serde(default = "default_true")]
        cancel_activity: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BoundaryTrigger {
    Signal { signal: String },
    Message { message: String },
    /// Associates the host with its compensation handler.
    Compensation { handler: String },
}

// ── NodeDto helpers ──

impl NodeDto {
    /// Returns the id regardless of variant.
    pub fn id(&self) -> &str {
        match self {
            NodeDto::Start { id, .. }
            | NodeDto::MessageStart { id, .. }
            | NodeDto::End { id, .. }
            | NodeDto::UserTask { id, .. }
            | NodeDto::ReceiveTask { id, .. }
            | NodeDto::ServiceTask { id, .. }
            | NodeDto::CatchSignal { id, .. }
            | NodeDto::CatchMessage { id, .. }
            | NodeDto::ThrowSignal { id, .. }
            | NodeDto::ThrowCompensation { id, .. }
            | NodeDto::ExclusiveGateway { id, .. }
            | NodeDto::ParallelGateway { id, .. }
            | NodeDto::SubProcess { id, .. }
            | NodeDto::EventSubProcess { id, .. }
            | NodeDto::Boundary { id, .. } => id,
        }
    }

    /// Enclosing sub-process id, `None` at process level.
    pub fn parent(&self) -> Option<&str> {
        match self {
            NodeDto::Start { parent, .. }
            | NodeDto::MessageStart { parent, .. }
            | NodeDto::End { parent, .. }
            | NodeDto::UserTask { parent, .. }
            | NodeDto::ReceiveTask { parent, .. }
            | NodeDto::ServiceTask { parent, .. }
            | NodeDto::CatchSignal { parent, .. }
            | NodeDto::CatchMessage { parent, .. }
            | NodeDto::ThrowSignal { parent, .. }
            | NodeDto::ThrowCompensation { parent, .. }
            | NodeDto::ExclusiveGateway { parent, .. }
            | NodeDto::ParallelGateway { parent, .. }
            | NodeDto::SubProcess { parent, .. }
            | NodeDto::EventSubProcess { parent, .. }
            | NodeDto::Boundary { parent, .. } => parent.as_deref(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            NodeDto::Start { .. } => "Start",
            NodeDto::MessageStart { .. } => "MessageStart",
            NodeDto::End { .. } => "End",
            NodeDto::UserTask { .. } => "UserTask",
            NodeDto::ReceiveTask { .. } => "ReceiveTask",
            NodeDto::ServiceTask { .. } => "ServiceTask",
            NodeDto::CatchSignal { .. } => "CatchSignal",
            NodeDto::CatchMessage { .. } => "CatchMessage",
            NodeDto::ThrowSignal { .. } => "ThrowSignal",
            NodeDto::ThrowCompensation { .. } => "ThrowCompensation",
            NodeDto::ExclusiveGateway { .. } => "ExclusiveGateway",
            NodeDto::ParallelGateway { .. } => "ParallelGateway",
            NodeDto::SubProcess { .. } => "SubProcess",
            NodeDto::EventSubProcess { .. } => "EventSubProcess",
            NodeDto::Boundary { .. } => "Boundary",
        }
    }

    /// Activities a boundary event may be attached to.
    pub fn can_host_boundary(&self) -> bool {
        matches!(
            self,
            NodeDto::UserTask { .. }
                | NodeDto::ReceiveTask { .. }
                | NodeDto::ServiceTask {
                    for_compensation: false,
                    ..
                }
                | NodeDto::SubProcess { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cond(op: ConditionOp, value: serde_json::Value) -> VariableCondition {
        VariableCondition {
            variable: "amount".to_string(),
            op,
            value,
        }
    }

    #[test]
    fn test_condition_numeric_compare() {
        assert!(cond(ConditionOp::Gt, json!(100)).holds(Some(&json!(250))));
        assert!(!cond(ConditionOp::Gt, json!(100)).holds(Some(&json!(100))));
        assert!(cond(ConditionOp::Lt, json!(1.5)).holds(Some(&json!(1))));
        assert!(cond(ConditionOp::Eq, json!(2)).holds(Some(&json!(2.0))));
    }

    #[test]
    fn test_condition_missing_variable() {
        assert!(!cond(ConditionOp::Eq, json!(true)).holds(None));
        assert!(cond(ConditionOp::Neq, json!(true)).holds(None));
        assert!(!cond(ConditionOp::Lt, json!(1)).holds(None));
    }

    #[test]
    fn test_condition_mismatched_types_never_order() {
        assert!(!cond(ConditionOp::Lt, json!(1)).holds(Some(&json!("0"))));
        assert!(!cond(ConditionOp::Gt, json!(1)).holds(Some(&json!("2"))));
        assert!(cond(ConditionOp::Neq, json!(1)).holds(Some(&json!("1"))));
    }

    #[test]
    fn test_node_accessors() {
        let node = NodeDto::Boundary {
            id: "onAlert".to_string(),
            host: "shipOrder".to_string(),
            trigger: BoundaryTrigger::Signal {
                signal: "alert".to_string(),
            },
            cancel_activity: true,
            parent: Some("fulfilment".to_string()),
        };
        assert_eq!(node.id(), "onAlert");
        assert_eq!(node.parent(), Some("fulfilment"));
        assert_eq!(node.kind_name(), "Boundary");
        assert!(!node.can_host_boundary());
    }
}
