use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use serde::{Deserialize, Serialize};
use shared_types::{ApplicationModel, FlowCategory};
use std::collections::{HashMap, HashSet};

use super::cross_reference::CrossReferenceIndex;

/// Flow graph node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowNode {
    pub id: String,
    /// Identifier safe to use as a Mermaid node id
    pub diagram_id: String,
    pub category: FlowCategory,
    pub file_name: String,
}

/// Directed graph of flows and the references between them
#[derive(Debug, Clone)]
pub struct FlowGraph {
    graph: DiGraph<FlowNode, ()>,
    index: HashMap<String, NodeIndex>,
}

impl FlowGraph {
    pub fn build(model: &ApplicationModel, xref: &CrossReferenceIndex) -> Self {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        let mut used_ids = HashSet::new();

        for flow in &model.flows {
            let mut diagram_id = sanitize_id(&flow.id);
            let base = diagram_id.clone();
            let mut n = 2;
            while !used_ids.insert(diagram_id.clone()) {
                diagram_id = format!("{}_{}", base, n);
                n += 1;
            }

            let node = graph.add_node(FlowNode {
                id: flow.id.clone(),
                diagram_id,
                category: flow.category(),
                file_name: flow.file_name.clone(),
            });
            index.insert(flow.id.clone(), node);
        }

        for (from, to) in xref.edges() {
            if let (Some(&a), Some(&b)) = (index.get(from), index.get(to)) {
                graph.add_edge(a, b, ());
            }
        }

        Self { graph, index }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn node(&self, flow_id: &str) -> Option<&FlowNode> {
        self.index.get(flow_id).map(|&i| &self.graph[i])
    }

    /// Flows that no source flow can reach through references. Source flows
    /// themselves are never listed.
    pub fn unreachable_flows(&self) -> Vec<String> {
        let mut reached = HashSet::new();
        for start in self.graph.node_indices() {
            if self.graph[start].category != FlowCategory::Source {
                continue;
            }
            let mut bfs = Bfs::new(&self.graph, start);
            while let Some(node) = bfs.next(&self.graph) {
                reached.insert(node);
            }
        }

        self.graph
            .node_indices()
            .filter(|i| !reached.contains(i))
            .map(|i| self.graph[i].id.clone())
            .collect()
    }

    /// Groups of flows that reference each other in a cycle, including a
    /// flow that references itself
    pub fn reference_cycles(&self) -> Vec<Vec<String>> {
        tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || component
                        .first()
                        .map(|&i| self.graph.contains_edge(i, i))
                        .unwrap_or(false)
            })
            .map(|component| {
                let mut ids: Vec<String> =
                    component.into_iter().map(|i| self.graph[i].id.clone()).collect();
                ids.sort();
                ids
            })
            .collect()
    }

    /// Mermaid `graph TD` source: sub-flows square, source flows rounded,
    /// one arrow per reference edge
    pub fn to_mermaid(&self) -> String {
        if self.graph.node_count() == 0 {
            return "graph TD\nA[No flows found]".to_string();
        }

        let mut lines = vec!["graph TD".to_string()];
        for i in self.graph.node_indices() {
            let node = &self.graph[i];
            let label = escape_label(&node.id);
            let (shape, style) = match node.category {
                FlowCategory::Subflow => (format!("[{}]", label), "fill:#e1f5fe,stroke:#0277bd"),
                FlowCategory::Source => (format!("({})", label), "fill:#e8f5e9,stroke:#2e7d32"),
                FlowCategory::Intermediate => (format!("[{}]", label), "fill:#f9f9f9,stroke:#333"),
            };
            lines.push(format!("{}{}", node.diagram_id, shape));
            lines.push(format!("style {} {}", node.diagram_id, style));
        }

        for edge in self.graph.edge_indices() {
            if let Some((a, b)) = self.graph.edge_endpoints(edge) {
                lines.push(format!(
                    "{} --> {}",
                    self.graph[a].diagram_id, self.graph[b].diagram_id
                ));
            }
        }
        lines.join("\n")
    }
}

/// Mermaid node id: non-word characters become `_`, and ids must start
/// with a letter
pub fn sanitize_id(id: &str) -> String {
    if id.is_empty() {
        return "unknown".to_string();
    }
    let sanitized: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    match sanitized.chars().next() {
        Some(c) if c.is_ascii_alphabetic() => sanitized,
        _ => format!("f_{}", sanitized),
    }
}

/// Node label with characters Mermaid would misread replaced
pub fn escape_label(text: &str) -> String {
    if text.is_empty() {
        return "Unnamed Flow".to_string();
    }
    text.chars()
        .filter(|&c| c != '"')
        .map(|c| match c {
            '[' | '<' => '(',
            ']' | '>' => ')',
            '&' => '+',
            '\\' => '/',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{Attributes, Flow, Processor, Source, SourceType};

    fn flow(id: &str, source: bool, is_subflow: bool, refs: &[&str]) -> Flow {
        Flow {
            id: id.to_string(),
            description: None,
            is_subflow,
            source: source.then(|| Source {
                source_type: SourceType::HttpListener,
                element: "http:listener".to_string(),
                attributes: Attributes::new(),
            }),
            processors: refs
                .iter()
                .map(|target| Processor::Generic {
                    element: "flow-ref".to_string(),
                    attributes: Attributes::from([("name".to_string(), target.to_string())]),
                })
                .collect(),
            error_handler: None,
            file_name: "app.xml".to_string(),
        }
    }

    fn graph_of(flows: Vec<Flow>) -> FlowGraph {
        let mut model = ApplicationModel::new("app");
        for f in flows {
            model.insert_flow(f).unwrap();
        }
        let rules = crate::config::ParsingConfig::default().flow_ref_rules;
        let xref = CrossReferenceIndex::resolve(&model, &rules);
        FlowGraph::build(&model, &xref)
    }

    #[test]
    fn test_sanitize_and_escape() {
        assert_eq!(sanitize_id("order-api:main flow"), "order_api_main_flow");
        assert_eq!(sanitize_id("1st"), "f_1st");
        assert_eq!(sanitize_id(""), "unknown");
        assert_eq!(escape_label(r#"a "b" [c] <d> & e\f"#), "a b (c) (d) + e/f");
    }

    #[test]
    fn test_mermaid_shapes_and_edges() {
        let graph = graph_of(vec![
            flow("main-flow", true, false, &["shared"]),
            flow("shared", false, true, &[]),
        ]);
        let mermaid = graph.to_mermaid();
        assert!(mermaid.starts_with("graph TD\n"));
        assert!(mermaid.contains("main_flow(main-flow)"));
        assert!(mermaid.contains("shared[shared]"));
        assert!(mermaid.contains("main_flow --> shared"));
    }

    #[test]
    fn test_colliding_ids_are_disambiguated() {
        let graph = graph_of(vec![flow("a-b", false, false, &[]), flow("a_b", false, false, &[])]);
        assert_eq!(graph.node("a-b").unwrap().diagram_id, "a_b");
        assert_eq!(graph.node("a_b").unwrap().diagram_id, "a_b_2");
    }

    #[test]
    fn test_unreachable_and_cycles() {
        let graph = graph_of(vec![
            flow("entry", true, false, &["used"]),
            flow("used", false, true, &[]),
            flow("orphan", false, true, &["ping"]),
            flow("ping", false, false, &["orphan"]),
        ]);
        assert_eq!(graph.unreachable_flows(), vec!["orphan", "ping"]);
        assert_eq!(graph.reference_cycles(), vec![vec!["orphan".to_string(), "ping".to_string()]]);
    }

    #[test]
    fn test_targets_reached_only_through_a_scope_are_reachable() {
        let mut entry = flow("entry", true, false, &[]);
        let nested = flow("unused", false, false, &["per-item", "guarded"]).processors;
        entry.processors = vec![Processor::Scope {
            element: "foreach".to_string(),
            processors: nested,
            error_handler: None,
            attributes: Attributes::new(),
        }];
        let graph = graph_of(vec![
            entry,
            flow("per-item", false, true, &[]),
            flow("guarded", false, true, &[]),
        ]);
        assert_eq!(graph.edge_count(), 2);
        assert!(graph.unreachable_flows().is_empty());
    }

    #[test]
    fn test_empty_model() {
        let graph = graph_of(vec![]);
        assert_eq!(graph.to_mermaid(), "graph TD\nA[No flows found]");
    }
}
