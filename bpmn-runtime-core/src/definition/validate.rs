use super::dto::*;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub rule: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.rule, self.message)
    }
}

fn err(rule: &str, message: String) -> ValidationError {
    ValidationError {
        rule: rule.to_string(),
        message,
    }
}

/// Validate a ProcessModel before compilation. Returns all errors found.
pub fn validate_model(model: &ProcessModel) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let mut node_map: HashMap<&str, &NodeDto> = HashMap::new();
    let mut outgoing: HashMap<&str, Vec<&EdgeDto>> = HashMap::new();
    let mut incoming: HashMap<&str, Vec<&EdgeDto>> = HashMap::new();

    // V1: Node ids must be unique
    for node in &model.nodes {
        let id = node.id();
        if node_map.contains_key(id) {
            errors.push(err("V1", format!("Duplicate node id: {}", id)));
        } else {
            node_map.insert(id, node);
        }
    }

    // V2: Edges reference known nodes
    for edge in &model.edges {
        for (field, reference) in [("from", &edge.from), ("to", &edge.to)] {
            if !node_map.contains_key(reference.as_str()) {
                errors.push(err(
                    "V2",
                    format!("Edge references unknown node: {} ({})", reference, field),
                ));
            }
        }
        outgoing.entry(edge.from.as_str()).or_default().push(edge);
        incoming.entry(edge.to.as_str()).or_default().push(edge);
    }
    let out_count = |id: &str| outgoing.get(id).map(|v| v.len()).unwrap_or(0);
    let in_count = |id: &str| incoming.get(id).map(|v| v.len()).unwrap_or(0);

    // V4: parent references a SubProcess or EventSubProcess
    for node in &model.nodes {
        if let Some(parent) = node.parent() {
            let valid = node_map.get(parent).is_some_and(|p| {
                matches!(
                    p,
                    NodeDto::SubProcess { .. } | NodeDto::EventSubProcess { .. }
                )
            });
            if !valid {
                errors.push(err(
                    "V4",
                    format!(
                        "{} {}: parent '{}' is not a SubProcess or EventSubProcess",
                        node.kind_name(),
                        node.id(),
                        parent
                    ),
                ));
            }
        }
    }

    // V3: one Start per scope; one MessageStart per event sub-process
    let starts_in = |scope: Option<&str>| {
        model
            .nodes
            .iter()
            .filter(|n| matches!(n, NodeDto::Start { .. }) && n.parent() == scope)
            .count()
    };
    let message_starts_in = |scope: &str| {
        model
            .nodes
            .iter()
            .filter(|n| matches!(n, NodeDto::MessageStart { .. }) && n.parent() == Some(scope))
            .count()
    };
    let process_starts = starts_in(None);
    if process_starts != 1 {
        errors.push(err(
            "V3",
            format!(
                "Expected exactly one process-level Start node, found {}",
                process_starts
            ),
        ));
    }
    for node in &model.nodes {
        match node {
            NodeDto::SubProcess { id, .. } => {
                let count = starts_in(Some(id.as_str()));
                if count != 1 {
                    errors.push(err(
                        "V3",
                        format!(
                            "SubProcess {}: expected exactly one Start node, found {}",
                            id, count
                        ),
                    ));
                }
            }
            NodeDto::EventSubProcess { id, .. } => {
                let count = message_starts_in(id);
                if count != 1 || starts_in(Some(id.as_str())) != 0 {
                    errors.push(err(
                        "V3",
                        format!(
                            "EventSubProcess {}: expected exactly one MessageStart and no Start, \
                             found {} MessageStart",
                            id, count
                        ),
                    ));
                }
            }
            _ => {}
        }
    }

    // V5: Boundary events
    for node in &model.nodes {
        let NodeDto::Boundary {
            id,
            host,
            trigger,
            parent,
            ..
        } = node
        else {
            continue;
        };
        match node_map.get(host.as_str()) {
            Some(h) if h.can_host_boundary() => {
                if h.parent() != parent.as_deref() {
                    errors.push(err(
                        "V5",
                        format!(
                            "Boundary {}: must be declared in the scope of host '{}'",
                            id, host
                        ),
                    ));
                }
            }
            _ => errors.push(err(
                "V5",
                format!("Boundary {}: host '{}' is not a task or sub-process", id, host),
            )),
        }
        if in_count(id) != 0 {
            errors.push(err(
                "V5",
                format!("Boundary {}: must not have incoming edges", id),
            ));
        }
        let outs = out_count(id);
        match trigger {
            BoundaryTrigger::Compensation { .. } => {
                if outs != 0 {
                    errors.push(err(
                        "V5",
                        format!(
                            "Boundary {}: compensation boundary must not have outgoing edges",
                            id
                        ),
                    ));
                }
            }
            _ => {
                if outs != 1 {
                    errors.push(err(
                        "V5",
                        format!(
                            "Boundary {}: must have exactly one outgoing edge, found {}",
                            id, outs
                        ),
                    ));
                }
            }
        }
    }

    // V6: Compensation handlers
    let mut compensation_hosts: HashMap<&str, usize> = HashMap::new();
    for node in &model.nodes {
        if let NodeDto::Boundary {
            id,
            host,
            trigger: BoundaryTrigger::Compensation { handler },
            ..
        } = node
        {
            *compensation_hosts.entry(host.as_str()).or_default() += 1;
            let valid = node_map.get(handler.as_str()).is_some_and(|h| {
                matches!(
                    h,
                    NodeDto::ServiceTask {
                        for_compensation: true,
                        ..
                    }
                )
            });
            if !valid {
                errors.push(err(
                    "V6",
                    format!(
                        "Boundary {}: handler '{}' is not a ServiceTask marked for_compensation",
                        id, handler
                    ),
                ));
            }
        }
    }
    for (host, count) in &compensation_hosts {
        if *count > 1 {
            errors.push(err(
                "V6",
                format!("Activity {}: more than one compensation boundary", host),
            ));
        }
    }
    for node in &model.nodes {
        if let NodeDto::ServiceTask {
            id,
            for_compensation: true,
            ..
        } = node
        {
            if in_count(id) + out_count(id) != 0 {
                errors.push(err(
                    "V6",
                    format!("Compensation handler {}: must not have sequence flows", id),
                ));
            }
        }
    }

    // V7: Exclusive gateway defaults and conditions
    for edge in &model.edges {
        let from_xor = node_map
            .get(edge.from.as_str())
            .is_some_and(|n| matches!(n, NodeDto::ExclusiveGateway { .. }));
        if (edge.condition.is_some() || edge.is_default) && !from_xor {
            errors.push(err(
                "V7",
                format!(
                    "Edge {}→{}: condition or is_default only allowed on \
                     ExclusiveGateway outgoing edges",
                    edge.from, edge.to
                ),
            ));
        }
        if edge.condition.is_some() && edge.is_default {
            errors.push(err(
                "V7",
                format!(
                    "Edge {}→{}: condition and is_default are mutually exclusive",
                    edge.from, edge.to
                ),
            ));
        }
    }
    for node in &model.nodes {
        if let NodeDto::ExclusiveGateway { id, .. } = node {
            let defaults = outgoing
                .get(id.as_str())
                .map(|v| v.iter().filter(|e| e.is_default).count())
                .unwrap_or(0);
            if defaults > 1 {
                errors.push(err(
                    "V7",
                    format!(
                        "ExclusiveGateway {}: at most one default outgoing edge, found {}",
                        id, defaults
                    ),
                ));
            }
        }
    }

    // V8: Edges stay within one scope
    for edge in &model.edges {
        if let (Some(from), Some(to)) = (
            node_map.get(edge.from.as_str()),
            node_map.get(edge.to.as_str()),
        ) {
            if from.parent() != to.parent() {
                errors.push(err(
                    "V8",
                    format!("Edge {}→{}: crosses a sub-process boundary", edge.from, edge.to),
                ));
            }
        }
    }

    // V10: ThrowCompensation target is compensable
    for node in &model.nodes {
        if let NodeDto::ThrowCompensation {
            id,
            activity: Some(target),
            parent,
        } = node
        {
            let in_scope = node_map
                .get(target.as_str())
                .is_some_and(|t| t.parent() == parent.as_deref());
            if !compensation_hosts.contains_key(target.as_str()) || !in_scope {
                errors.push(err(
                    "V10",
                    format!(
                        "ThrowCompensation {}: '{}' is not a compensable activity \
                         of the same scope",
                        id, target
                    ),
                ));
            }
        }
    }

    // V11: Flow shape of start, end and event sub-process nodes
    for node in &model.nodes {
        let id = node.id();
        match node {
            NodeDto::Start { .. } if in_count(id) != 0 => {
                errors.push(err("V11", format!("Start {}: must not have incoming edges", id)));
            }
            NodeDto::MessageStart { parent, .. } => {
                if in_count(id) != 0 {
                    errors.push(err(
                        "V11",
                        format!("MessageStart {}: must not have incoming edges", id),
                    ));
                }
                let in_event_sub = parent
                    .as_deref()
                    .and_then(|p| node_map.get(p))
                    .is_some_and(|p| matches!(p, NodeDto::EventSubProcess { .. }));
                if !in_event_sub {
                    errors.push(err(
                        "V11",
                        format!("MessageStart {}: must be nested in an EventSubProcess", id),
                    ));
                }
            }
            NodeDto::End { .. } if out_count(id) != 0 => {
                errors.push(err("V11", format!("End {}: must not have outgoing edges", id)));
            }
            NodeDto::EventSubProcess { .. } if in_count(id) + out_count(id) != 0 => {
                errors.push(err(
                    "V11",
                    format!("EventSubProcess {}: must not have sequence flows", id),
                ));
            }
            _ => {}
        }
    }

    // V9: Every node reachable from the process start
    if errors.is_empty() {
        errors.extend(check_reachability(model));
    }

    errors
}

/// Reachability over sequence flows plus the implicit containment links
/// (sub-process → its start and event sub-processes, host → boundaries,
/// compensation boundary → handler, event sub-process → message start).
fn check_reachability(model: &ProcessModel) -> Vec<ValidationError> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut index: HashMap<&str, NodeIndex> = HashMap::new();
    for node in &model.nodes {
        index.insert(node.id(), graph.add_node(node.id()));
    }
    let link = |graph: &mut DiGraph<&str, ()>, from: &str, to: &str| {
        if let (Some(&a), Some(&b)) = (index.get(from), index.get(to)) {
            graph.add_edge(a, b, ());
        }
    };

    for edge in &model.edges {
        link(&mut graph, &edge.from, &edge.to);
    }

    let mut roots: Vec<&str> = Vec::new();
    for node in &model.nodes {
        match node {
            NodeDto::Start { id, parent: None } => roots.push(id),
            NodeDto::EventSubProcess { id, parent: None } => roots.push(id),
            NodeDto::Start {
                id,
                parent: Some(parent),
            }
            | NodeDto::MessageStart {
                id,
                parent: Some(parent),
                ..
            }
            | NodeDto::EventSubProcess {
                id,
                parent: Some(parent),
            } => link(&mut graph, parent, id),
            NodeDto::Boundary {
                id, host, trigger, ..
            } => {
                link(&mut graph, host, id);
                if let BoundaryTrigger::Compensation { handler } = trigger {
                    link(&mut graph, id, handler);
                }
            }
            _ => {}
        }
    }

    let Some(first) = roots.first().and_then(|r| index.get(r)) else {
        return Vec::new();
    };
    let mut dfs = Dfs::new(&graph, *first);
    let mut reached = vec![false; graph.node_count()];
    for root in &roots {
        if let Some(&start) = index.get(root) {
            dfs.move_to(start);
            while let Some(nx) = dfs.next(&graph) {
                reached[nx.index()] = true;
            }
        }
    }

    graph
        .node_indices()
        .filter(|nx| !reached[nx.index()])
        .map(|nx| err("V9", format!("Node {} is unreachable", graph[nx])))
        .collect()
}
