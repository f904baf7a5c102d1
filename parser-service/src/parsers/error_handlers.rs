use roxmltree::Node;
use shared_types::{ErrorHandler, ErrorStrategy, ErrorStrategyKind, Processor};

use super::namespaces::NamespaceTable;
use super::processors::ProcessorExtractor;

/// Name given to a root-level error handler that declares none
pub const UNNAMED_GLOBAL_HANDLER: &str = "Unnamed Global Error Handler";

/// Reads an `error-handler` element into its strategies
pub fn extract_error_handler(
    node: Node,
    namespaces: &NamespaceTable,
    processors: &ProcessorExtractor,
) -> ErrorHandler {
    let handlers = node
        .children()
        .filter_map(|child| {
            let kind = strategy_kind(child, namespaces)?;
            let steps = processors.extract(processors.content_children(child));
            Some(build_strategy(kind, child, steps))
        })
        .collect();

    handler_shell(node, handlers)
}

/// Kind of an `on-error-*` element; `None` for any other child
pub fn strategy_kind(node: Node, namespaces: &NamespaceTable) -> Option<ErrorStrategyKind> {
    if namespaces.is_core_named(node, "on-error-continue") {
        Some(ErrorStrategyKind::OnErrorContinue)
    } else if namespaces.is_core_named(node, "on-error-propagate") {
        Some(ErrorStrategyKind::OnErrorPropagate)
    } else {
        None
    }
}

pub fn build_strategy(kind: ErrorStrategyKind, node: Node, steps: Vec<Processor>) -> ErrorStrategy {
    ErrorStrategy {
        kind,
        error_type: node.attribute("type").map(str::to_string),
        when: node.attribute("when").map(str::to_string),
        processors: steps.iter().map(|p| p.type_name().to_string()).collect(),
        steps,
    }
}

/// Name and delegation of an `error-handler` element around its strategies
pub fn handler_shell(node: Node, handlers: Vec<ErrorStrategy>) -> ErrorHandler {
    ErrorHandler {
        name: node.attribute("name").map(str::to_string),
        reference: node.attribute("ref").map(str::to_string),
        handlers,
    }
}

/// Error handlers declared directly under the document root, keyed by name
pub fn extract_global_handlers(
    root: Node,
    namespaces: &NamespaceTable,
    processors: &ProcessorExtractor,
) -> Vec<(String, ErrorHandler)> {
    root.children()
        .filter(|child| namespaces.is_core_named(*child, "error-handler"))
        .map(|node| {
            let handler = extract_error_handler(node, namespaces, processors);
            let name = handler
                .name
                .clone()
                .unwrap_or_else(|| UNNAMED_GLOBAL_HANDLER.to_string());
            (name, handler)
        })
        .collect()
}

/// The application-wide default handler named by `configuration`
pub fn default_error_handler(root: Node, namespaces: &NamespaceTable) -> Option<String> {
    root.children()
        .filter(|child| namespaces.is_core_named(*child, "configuration"))
        .find_map(|config| config.attribute("defaultErrorHandler-ref"))
        .map(str::to_string)
}
