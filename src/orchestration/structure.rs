use super::node::{split_qualified, Directive, EffectKind, Node};
use super::process::ProcessGraph;
use super::subgraph::SubGraph;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubGraphCounts {
    pub nodes: usize,
    pub steps_tool: usize,
    pub steps_transform: usize,
    pub steps_custom: usize,
    pub conds: usize,
}

impl SubGraphCounts {
    fn add(&mut self, node: &Node) {
        self.nodes += 1;
        match node {
            Node::Cond(_) => self.conds += 1,
            Node::Step(step) => match step.effect_kind() {
                EffectKind::Tool => self.steps_tool += 1,
                EffectKind::Transform => self.steps_transform += 1,
                EffectKind::Custom => self.steps_custom += 1,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StructuralCounts {
    pub nodes: usize,
    pub steps_tool: usize,
    pub steps_transform: usize,
    pub steps_custom: usize,
    pub conds: usize,
    pub per_subgraph: BTreeMap<String, SubGraphCounts>,
}

pub fn structural_counts(graph: &ProcessGraph) -> StructuralCounts {
    let mut counts = StructuralCounts::default();
    for (part, subgraph) in &graph.subgraphs {
        let mut local = SubGraphCounts::default();
        for node in subgraph.nodes.values() {
            local.add(node);
        }
        counts.nodes += local.nodes;
        counts.steps_tool += local.steps_tool;
        counts.steps_transform += local.steps_transform;
        counts.steps_custom += local.steps_custom;
        counts.conds += local.conds;
        counts.per_subgraph.insert(part.clone(), local);
    }
    counts
}

/// Topological order of a subgraph's nodes over its local `next` edges.
/// Ready nodes are taken in name order; nodes left on a cycle are appended in
/// name order.
pub fn subgraph_order(subgraph: &SubGraph) -> Vec<String> {
    let mut indegree = subgraph
        .nodes
        .keys()
        .map(|name| (name.as_str(), 0usize))
        .collect::<BTreeMap<_, _>>();
    let mut edges = BTreeMap::<&str, BTreeSet<String>>::new();
    for (name, node) in &subgraph.nodes {
        for route in node.routes() {
            let Directive::Next(target) = route else {
                continue;
            };
            if split_qualified(&target).is_some() || target == *name {
                continue;
            }
            if !subgraph.nodes.contains_key(&target) {
                continue;
            }
            if edges.entry(name.as_str()).or_default().insert(target.clone()) {
                if let Some(count) = indegree.get_mut(target.as_str()) {
                    *count += 1;
                }
            }
        }
    }

    let mut ready = indegree
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(name, _)| name.to_string())
        .collect::<BTreeSet<_>>();
    let mut order = Vec::with_capacity(subgraph.nodes.len());
    while let Some(name) = ready.pop_first() {
        if let Some(targets) = edges.get(name.as_str()) {
            for target in targets {
                if let Some(count) = indegree.get_mut(target.as_str()) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(target.clone());
                    }
                }
            }
        }
        order.push(name);
    }
    let placed = order.iter().cloned().collect::<BTreeSet<_>>();
    order.extend(
        subgraph
            .nodes
            .keys()
            .filter(|name| !placed.contains(*name))
            .cloned(),
    );
    order
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepProgress {
    /// 1-based position of the node in `order`.
    pub index: usize,
    pub total: usize,
    pub order: Vec<String>,
    pub entry: String,
}

/// Progress of a qualified `SG::NODE` within its subgraph.
pub fn progress_for(graph: &ProcessGraph, qualified: &str) -> Option<StepProgress> {
    let (part, node) = split_qualified(qualified)?;
    let subgraph = graph.subgraph(part)?;
    let order = subgraph_order(subgraph);
    let index = order.iter().position(|name| name == node)? + 1;
    Some(StepProgress {
        index,
        total: order.len(),
        order,
        entry: subgraph.entry.clone(),
    })
}
