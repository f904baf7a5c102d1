use serde::{Deserialize, Serialize};
use shared_types::{ApplicationModel, ErrorHandler, Flow, FlowCategory, Processor};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::config::FlowRefRule;

/// Reference edges of one flow
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowLinks {
    pub references: BTreeSet<String>,
    pub referenced_by: BTreeSet<String>,
}

/// A flow reference whose target is not in the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DanglingReference {
    pub from_flow: String,
    pub target: String,
    pub file_name: String,
    /// Closest existing flow id, when one is near enough to be a likely typo
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowStatistics {
    pub total_flows: usize,
    pub source_flows: usize,
    pub subflows: usize,
    pub intermediate_flows: usize,
    pub flows_without_handlers: usize,
    /// Percentage of non-sub-flows covered by an error handler
    pub error_handler_coverage: f64,
    pub source_types: BTreeMap<String, usize>,
    pub processor_types: BTreeMap<String, usize>,
    pub transformations: usize,
    /// Every error type named by a strategy: flow, global and `try` handlers
    pub error_types: BTreeSet<String>,
    pub try_scopes: TryScopeSummary,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TryScopeSummary {
    pub total: usize,
    pub with_handler: usize,
    pub without_handler: usize,
}

/// Reference overlay and derived sets computed over a finished model.
///
/// Flow records are never touched; all edges live here, keyed by flow id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrossReferenceIndex {
    pub links: BTreeMap<String, FlowLinks>,
    pub source_flows: Vec<String>,
    pub subflows: Vec<String>,
    pub flows_without_handlers: Vec<String>,
    pub dangling: Vec<DanglingReference>,
    pub statistics: FlowStatistics,
}

impl CrossReferenceIndex {
    /// Resolves every flow reference in a single pass over the model
    pub fn resolve(model: &ApplicationModel, rules: &[FlowRefRule]) -> Self {
        let mut index = Self {
            links: model
                .flows
                .iter()
                .map(|flow| (flow.id.clone(), FlowLinks::default()))
                .collect(),
            ..Default::default()
        };

        for flow in &model.flows {
            for target in flow_references(flow, rules) {
                index.add_edge(flow, target);
            }
        }

        index.source_flows = model.source_flows().map(|f| f.id.clone()).collect();
        index.subflows = model.subflows().map(|f| f.id.clone()).collect();
        index.flows_without_handlers = model
            .flows
            .iter()
            .filter(|flow| !flow.is_subflow && !has_error_handler(model, flow))
            .map(|flow| flow.id.clone())
            .collect();
        index.statistics = statistics(model, &index);

        debug!(
            "Resolved {} reference edges, {} dangling",
            index.edge_count(),
            index.dangling.len()
        );
        index
    }

    fn add_edge(&mut self, from: &Flow, target: &str) {
        if !self.links.contains_key(target) {
            let suggestion = closest_flow(target, self.links.keys());
            warn!(
                "Flow '{}' references missing flow '{}'{}",
                from.id,
                target,
                suggestion
                    .as_deref()
                    .map(|s| format!(" (did you mean '{}'?)", s))
                    .unwrap_or_default()
            );
            self.dangling.push(DanglingReference {
                from_flow: from.id.clone(),
                target: target.to_string(),
                file_name: from.file_name.clone(),
                suggestion,
            });
            return;
        }

        if let Some(links) = self.links.get_mut(&from.id) {
            links.references.insert(target.to_string());
        }
        if let Some(links) = self.links.get_mut(target) {
            links.referenced_by.insert(from.id.clone());
        }
    }

    pub fn references(&self, flow_id: &str) -> Option<&BTreeSet<String>> {
        self.links.get(flow_id).map(|links| &links.references)
    }

    pub fn referenced_by(&self, flow_id: &str) -> Option<&BTreeSet<String>> {
        self.links.get(flow_id).map(|links| &links.referenced_by)
    }

    /// All `(from, to)` edges, ordered by source then target id
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str)> {
        self.links.iter().flat_map(|(from, links)| {
            links
                .references
                .iter()
                .map(move |to| (from.as_str(), to.as_str()))
        })
    }

    pub fn edge_count(&self) -> usize {
        self.links.values().map(|links| links.references.len()).sum()
    }
}

/// Flow names referenced by a flow's generic processors, in document order.
/// Refs nested in choice routes, scopes and error-handler strategies count.
pub fn flow_references<'f>(flow: &'f Flow, rules: &[FlowRefRule]) -> Vec<&'f str> {
    flow.walk()
        .filter(|p| matches!(p, Processor::Generic { .. }))
        .filter_map(|p| {
            rules
                .iter()
                .filter(|rule| rule.element == p.element())
                .find_map(|rule| p.attribute(&rule.attribute))
        })
        .collect()
}

// A local handler counts when it has strategies or delegates to a global
// handler that exists; otherwise the application default applies.
fn has_error_handler(model: &ApplicationModel, flow: &Flow) -> bool {
    let global_exists = |name: &str| model.global_error_handlers.contains_key(name);

    if let Some(handler) = &flow.error_handler {
        if !handler.handlers.is_empty() {
            return true;
        }
        if handler.reference.as_deref().map(global_exists).unwrap_or(false) {
            return true;
        }
    }

    model
        .default_error_handler
        .as_deref()
        .map(global_exists)
        .unwrap_or(false)
}

fn closest_flow<'a>(target: &str, candidates: impl Iterator<Item = &'a String>) -> Option<String> {
    let limit = (target.chars().count() / 3).max(2);
    candidates
        .map(|candidate| (edit_distance::edit_distance(target, candidate), candidate))
        .filter(|(distance, _)| *distance <= limit)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, candidate)| candidate.clone())
}

fn statistics(model: &ApplicationModel, index: &CrossReferenceIndex) -> FlowStatistics {
    let mut stats = FlowStatistics {
        total_flows: model.flows.len(),
        source_flows: index.source_flows.len(),
        subflows: index.subflows.len(),
        flows_without_handlers: index.flows_without_handlers.len(),
        ..Default::default()
    };

    for flow in &model.flows {
        if flow.category() == FlowCategory::Intermediate {
            stats.intermediate_flows += 1;
        }
        if let Some(source) = &flow.source {
            *stats.source_types.entry(source.type_label()).or_insert(0) += 1;
        }
        if let Some(handler) = &flow.error_handler {
            collect_error_types(handler, &mut stats.error_types);
        }
        for processor in flow.walk() {
            *stats
                .processor_types
                .entry(processor.type_name().to_string())
                .or_insert(0) += 1;
            match processor {
                Processor::Transform { .. } => stats.transformations += 1,
                Processor::Scope { error_handler, .. } if processor.element() == "try" => {
                    stats.try_scopes.total += 1;
                    match error_handler {
                        Some(handler) => {
                            stats.try_scopes.with_handler += 1;
                            collect_error_types(handler, &mut stats.error_types);
                        }
                        None => stats.try_scopes.without_handler += 1,
                    }
                }
                _ => {}
            }
        }
    }
    for handler in model.global_error_handlers.values() {
        collect_error_types(handler, &mut stats.error_types);
    }

    let handled_scope = stats.total_flows - stats.subflows;
    stats.error_handler_coverage = if handled_scope == 0 {
        100.0
    } else {
        let covered = handled_scope - stats.flows_without_handlers;
        (covered as f64 / handled_scope as f64 * 1000.0).round() / 10.0
    };
    stats
}

fn collect_error_types(handler: &ErrorHandler, into: &mut BTreeSet<String>) {
    for strategy in &handler.handlers {
        into.extend(strategy.error_types().map(str::to_string));
    }
}
