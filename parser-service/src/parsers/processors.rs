use roxmltree::{Node, NodeId};
use shared_types::{
    Attributes, ChoiceRoute, ErrorStrategy, ErrorStrategyKind, OtherwiseRoute, Processor,
    DEFAULT_WRITE_MODE, NOT_SPECIFIED, NO_CONDITION, NO_TRANSFORMATION_CODE,
};

use super::classifier::{ElementClassifier, ElementKind};
use super::error_handlers::{build_strategy, handler_shell, strategy_kind};
use super::namespaces::{NamespaceTable, DOC_PREFIX};

/// Turns the ordered children of a flow, sub-flow or route into processor
/// records.
///
/// Choice routers and scopes (including the error handler of a `try`) are
/// expanded with an explicit work stack rather than recursion, so nesting
/// depth is bounded only by memory.
pub struct ProcessorExtractor<'c> {
    namespaces: &'c NamespaceTable,
    classifier: &'c ElementClassifier,
}

enum Branch {
    When(String),
    Otherwise,
}

struct ChoiceFrame<'a, 'input> {
    element: String,
    attributes: Attributes,
    branches: std::vec::IntoIter<Node<'a, 'input>>,
    open: Option<Branch>,
    routes: Vec<ChoiceRoute>,
    otherwise: Option<OtherwiseRoute>,
}

impl ChoiceFrame<'_, '_> {
    fn attach(&mut self, processors: Vec<Processor>) {
        match self.open.take() {
            Some(Branch::When(condition)) => self.routes.push(ChoiceRoute {
                condition,
                processors,
            }),
            // only the first otherwise counts
            Some(Branch::Otherwise) if self.otherwise.is_none() => {
                self.otherwise = Some(OtherwiseRoute { processors })
            }
            _ => {}
        }
    }

    fn finish(self) -> Processor {
        Processor::Choice {
            element: self.element,
            routes: self.routes,
            otherwise: self.otherwise,
            attributes: self.attributes,
        }
    }
}

enum Slot<'a, 'input> {
    Body,
    Strategy(ErrorStrategyKind, Node<'a, 'input>),
}

struct ScopeFrame<'a, 'input> {
    element: String,
    attributes: Attributes,
    body: Option<Vec<Node<'a, 'input>>>,
    handler: Option<Node<'a, 'input>>,
    strategies: std::vec::IntoIter<(ErrorStrategyKind, Node<'a, 'input>)>,
    open: Option<Slot<'a, 'input>>,
    processors: Vec<Processor>,
    handlers: Vec<ErrorStrategy>,
}

impl<'a, 'input> ScopeFrame<'a, 'input> {
    // The body comes first, then one sequence per handler strategy
    fn next_slot(&mut self, extractor: &ProcessorExtractor) -> Option<Vec<Node<'a, 'input>>> {
        if let Some(body) = self.body.take() {
            self.open = Some(Slot::Body);
            return Some(body);
        }
        let (kind, node) = self.strategies.next()?;
        self.open = Some(Slot::Strategy(kind, node));
        Some(extractor.content_children(node))
    }

    fn attach(&mut self, processors: Vec<Processor>) {
        match self.open.take() {
            Some(Slot::Body) => self.processors = processors,
            Some(Slot::Strategy(kind, node)) => {
                self.handlers.push(build_strategy(kind, node, processors))
            }
            None => {}
        }
    }

    fn finish(self) -> Processor {
        let handlers = self.handlers;
        Processor::Scope {
            element: self.element,
            processors: self.processors,
            error_handler: self.handler.map(|node| handler_shell(node, handlers)),
            attributes: self.attributes,
        }
    }
}

enum Frame<'a, 'input> {
    Sequence {
        pending: std::vec::IntoIter<Node<'a, 'input>>,
        output: Vec<Processor>,
    },
    Choice(ChoiceFrame<'a, 'input>),
    Scope(ScopeFrame<'a, 'input>),
}

impl<'a, 'input> Frame<'a, 'input> {
    fn sequence(nodes: Vec<Node<'a, 'input>>) -> Self {
        Frame::Sequence {
            pending: nodes.into_iter(),
            output: Vec::new(),
        }
    }
}

enum Step<'a, 'input> {
    Push(Frame<'a, 'input>),
    Close,
}

impl<'c> ProcessorExtractor<'c> {
    pub fn new(namespaces: &'c NamespaceTable, classifier: &'c ElementClassifier) -> Self {
        Self {
            namespaces,
            classifier,
        }
    }

    /// Processors of a top-level flow: everything except the trigger element
    /// and the error handler
    pub fn extract_flow(&self, flow: Node, source: Option<NodeId>) -> Vec<Processor> {
        let children: Vec<Node> = self
            .content_children(flow)
            .into_iter()
            .filter(|child| Some(child.id()) != source)
            .filter(|child| self.classifier.classify(*child) != ElementKind::ErrorHandler)
            .collect();
        self.extract(children)
    }

    /// Processors of a sub-flow. Sub-flows have no trigger, so a
    /// source-shaped first child is kept as a processor.
    pub fn extract_subflow(&self, subflow: Node) -> Vec<Processor> {
        self.extract_flow(subflow, None)
    }

    /// Element children that take part in execution, skipping documentation
    pub fn content_children<'a, 'input>(&self, node: Node<'a, 'input>) -> Vec<Node<'a, 'input>> {
        node.children()
            .filter(|child| child.is_element())
            .filter(|child| !self.namespaces.is_named(*child, DOC_PREFIX, "description"))
            .collect()
    }

    /// Extracts an ordered processor sequence from `nodes`
    pub fn extract<'a, 'input>(&self, nodes: Vec<Node<'a, 'input>>) -> Vec<Processor> {
        let mut stack = vec![Frame::sequence(nodes)];

        loop {
            let step = match stack.last_mut() {
                None => return Vec::new(),
                Some(Frame::Sequence { pending, output }) => match pending.next() {
                    Some(node) => match self.classifier.classify(node) {
                        ElementKind::Choice => Step::Push(Frame::Choice(self.open_choice(node))),
                        ElementKind::Scope => Step::Push(Frame::Scope(self.open_scope(node))),
                        kind => {
                            output.push(self.leaf(node, kind));
                            continue;
                        }
                    },
                    None => Step::Close,
                },
                Some(Frame::Choice(choice)) => match choice.branches.next() {
                    Some(branch) => {
                        choice.open = Some(self.branch_of(branch));
                        Step::Push(Frame::sequence(self.content_children(branch)))
                    }
                    None => Step::Close,
                },
                Some(Frame::Scope(scope)) => match scope.next_slot(self) {
                    Some(nodes) => Step::Push(Frame::sequence(nodes)),
                    None => Step::Close,
                },
            };

            match step {
                Step::Push(frame) => stack.push(frame),
                Step::Close => match stack.pop() {
                    Some(Frame::Sequence { output, .. }) => match stack.last_mut() {
                        None => return output,
                        Some(Frame::Choice(parent)) => parent.attach(output),
                        Some(Frame::Scope(parent)) => parent.attach(output),
                        Some(Frame::Sequence { output: parent, .. }) => parent.extend(output),
                    },
                    Some(Frame::Choice(choice)) => emit(&mut stack, choice.finish()),
                    Some(Frame::Scope(scope)) => emit(&mut stack, scope.finish()),
                    None => return Vec::new(),
                },
            }
        }
    }

    fn open_scope<'a, 'input>(&self, node: Node<'a, 'input>) -> ScopeFrame<'a, 'input> {
        let (handlers, body): (Vec<Node<'a, 'input>>, Vec<Node<'a, 'input>>) = self
            .content_children(node)
            .into_iter()
            .partition(|child| self.classifier.classify(*child) == ElementKind::ErrorHandler);
        let handler = handlers.into_iter().next();
        let strategies: Vec<(ErrorStrategyKind, Node<'a, 'input>)> = handler
            .iter()
            .flat_map(|h| h.children())
            .filter_map(|child| strategy_kind(child, self.namespaces).map(|kind| (kind, child)))
            .collect();

        ScopeFrame {
            element: self.namespaces.display_tag(node),
            attributes: self.namespaces.collect_attributes(node),
            body: Some(body),
            handler,
            strategies: strategies.into_iter(),
            open: None,
            processors: Vec::new(),
            handlers: Vec::new(),
        }
    }

    fn open_choice<'a, 'input>(&self, node: Node<'a, 'input>) -> ChoiceFrame<'a, 'input> {
        let branches: Vec<Node<'a, 'input>> = node
            .children()
            .filter(|child| {
                self.namespaces.is_core_named(*child, "when")
                    || self.namespaces.is_core_named(*child, "otherwise")
            })
            .collect();

        ChoiceFrame {
            element: self.namespaces.display_tag(node),
            attributes: self.namespaces.collect_attributes(node),
            branches: branches.into_iter(),
            open: None,
            routes: Vec::new(),
            otherwise: None,
        }
    }

    fn branch_of(&self, node: Node) -> Branch {
        if node.tag_name().name() == "otherwise" {
            Branch::Otherwise
        } else {
            let condition = node.attribute("expression").unwrap_or(NO_CONDITION);
            Branch::When(condition.to_string())
        }
    }

    fn leaf(&self, node: Node, kind: ElementKind) -> Processor {
        let element = self.namespaces.display_tag(node);
        let attributes = self.namespaces.collect_attributes(node);

        match kind {
            ElementKind::Transform => Processor::Transform {
                element,
                code: self.transform_code(node),
                attributes,
            },
            ElementKind::FileWrite | ElementKind::SftpWrite => Processor::FileOperation {
                element,
                path: node.attribute("path").unwrap_or(NOT_SPECIFIED).to_string(),
                mode: node.attribute("mode").unwrap_or(DEFAULT_WRITE_MODE).to_string(),
                attributes,
            },
            _ => Processor::Generic {
                element,
                attributes,
            },
        }
    }

    // The payload script lives in a nested set-payload, either inline or as
    // an external resource.
    fn transform_code(&self, node: Node) -> String {
        let set_payload = node.descendants().find(|n| {
            self.namespaces.is_named(*n, "dw", "set-payload")
                || self.namespaces.is_named(*n, "ee", "set-payload")
        });

        set_payload
            .and_then(|n| {
                n.attribute("resource")
                    .map(str::to_string)
                    .or_else(|| element_text(n))
            })
            .unwrap_or_else(|| NO_TRANSFORMATION_CODE.to_string())
    }
}

// A finished router or scope belongs to the sequence below it
fn emit(stack: &mut [Frame], processor: Processor) {
    if let Some(Frame::Sequence { output, .. }) = stack.last_mut() {
        output.push(processor);
    }
}

/// Concatenated text and CDATA content of an element, trimmed; `None` when blank
pub fn element_text(node: Node) -> Option<String> {
    let text: String = node
        .children()
        .filter(|child| child.is_text())
        .filter_map(|child| child.text())
        .collect();
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roxmltree::Document;

    const HEADER: &str = r#"xmlns="http://www.mulesoft.org/schema/mule/core"
        xmlns:doc="http://www.mulesoft.org/schema/mule/documentation"
        xmlns:http="http://www.mulesoft.org/schema/mule/http"
        xmlns:file="http://www.mulesoft.org/schema/mule/file"
        xmlns:ee="http://www.mulesoft.org/schema/mule/ee/core"
        xmlns:sftp="http://www.mulesoft.org/schema/mule/sftp"
        xmlns:dw="http://www.mulesoft.org/schema/mule/ee/dw""#;

    fn extract_sequence(body: &str) -> Vec<Processor> {
        let xml = format!("<mule {}><sub-flow name=\"s\">{}</sub-flow></mule>", HEADER, body);
        let doc = Document::parse(&xml).unwrap();
        let table = NamespaceTable::mule();
        let classifier = ElementClassifier::new(&table);
        let subflow = doc.root_element().first_element_child().unwrap();
        ProcessorExtractor::new(&table, &classifier).extract_subflow(subflow)
    }

    #[test]
    fn test_transform_without_payload_gets_sentinel() {
        let processors = extract_sequence(r#"<ee:transform doc:name="Map"/>"#);
        assert_eq!(processors.len(), 1);
        assert_eq!(processors[0].type_name(), "dw-set-payload");
        assert_eq!(processors[0].attribute("code"), Some(NO_TRANSFORMATION_CODE));
        assert_eq!(processors[0].attribute("doc:name"), Some("Map"));
    }

    #[test]
    fn test_transform_reads_cdata_script() {
        let processors = extract_sequence(
            r#"<ee:transform><ee:message><ee:set-payload><![CDATA[%dw 2.0
output application/json
---
payload]]></ee:set-payload></ee:message></ee:transform>"#,
        );
        let code = processors[0].attribute("code").unwrap();
        assert!(code.starts_with("%dw 2.0"));
        assert!(code.ends_with("payload"));
    }

    #[test]
    fn test_transform_prefers_resource() {
        let processors = extract_sequence(
            r#"<ee:transform><ee:message><ee:set-payload resource="dw/map.dwl"/></ee:message></ee:transform>"#,
        );
        assert_eq!(processors[0].attribute("code"), Some("dw/map.dwl"));
    }

    #[test]
    fn test_file_write_defaults_mode() {
        let processors = extract_sequence(r#"<file:write path="out.csv"/><file:write/>"#);
        assert_eq!(processors[0].attribute("path"), Some("out.csv"));
        assert_eq!(processors[0].attribute("mode"), Some(DEFAULT_WRITE_MODE));
        assert_eq!(processors[1].attribute("path"), Some(NOT_SPECIFIED));
    }

    #[test]
    fn test_element_without_attributes_has_empty_bag() {
        let processors = extract_sequence(r#"<logger/>"#);
        assert!(processors[0].attributes().is_empty());
    }

    #[test]
    fn test_description_is_not_a_processor() {
        let processors =
            extract_sequence(r#"<doc:description>Notes</doc:description><logger/><flow-ref name="x"/>"#);
        let types: Vec<&str> = processors.iter().map(Processor::type_name).collect();
        assert_eq!(types, vec!["logger", "flow-ref"]);
    }

    #[test]
    fn test_when_without_expression_and_duplicate_otherwise() {
        let processors = extract_sequence(
            r#"<choice>
                <when><logger/></when>
                <otherwise><set-payload value="a"/></otherwise>
                <otherwise><set-payload value="b"/></otherwise>
            </choice>"#,
        );
        match &processors[0] {
            Processor::Choice { routes, otherwise, .. } => {
                assert_eq!(routes.len(), 1);
                assert_eq!(routes[0].condition, NO_CONDITION);
                let otherwise = otherwise.as_ref().unwrap();
                assert_eq!(otherwise.processors[0].attribute("value"), Some("a"));
            }
            other => panic!("expected choice, got {:?}", other),
        }
    }

    #[test]
    fn test_sftp_write_is_a_file_operation() {
        let processors = extract_sequence(r#"<sftp:write path="/upload/out.csv" mode="APPEND" config-ref="SFTP"/>"#);
        match &processors[0] {
            Processor::FileOperation {
                element, path, mode, ..
            } => {
                assert_eq!(element, "sftp:write");
                assert_eq!(path, "/upload/out.csv");
                assert_eq!(mode, "APPEND");
            }
            other => panic!("expected file operation, got {:?}", other),
        }
        assert_eq!(processors[0].attribute("config-ref"), Some("SFTP"));
    }

    #[test]
    fn test_dw_namespace_transform() {
        let processors = extract_sequence(
            r#"<dw:transform doc:name="Legacy"><dw:set-payload><![CDATA[%dw 1.0
%output application/xml
---
payload]]></dw:set-payload></dw:transform>"#,
        );
        assert!(matches!(processors[0], Processor::Transform { .. }));
        assert_eq!(processors[0].type_name(), "dw-set-payload");
        assert!(processors[0].attribute("code").unwrap().starts_with("%dw 1.0"));
    }

    #[test]
    fn test_scopes_keep_their_bodies_and_try_handler() {
        let processors = extract_sequence(
            r##"<foreach collection="#[payload]">
                <flow-ref name="per-item"/>
                <choice><when expression="#[x]"><async><logger/></async></when></choice>
            </foreach>
            <try>
                <flow-ref name="guarded"/>
                <error-handler>
                    <on-error-continue type="HTTP:TIMEOUT"><flow-ref name="recover"/></on-error-continue>
                    <on-error-propagate><logger/></on-error-propagate>
                </error-handler>
            </try>"##,
        );
        assert_eq!(processors.len(), 2);

        match &processors[0] {
            Processor::Scope {
                element,
                processors: body,
                error_handler,
                attributes,
            } => {
                assert_eq!(element, "foreach");
                assert_eq!(attributes.get("collection").map(String::as_str), Some("#[payload]"));
                assert!(error_handler.is_none());
                assert_eq!(body[0].attribute("name"), Some("per-item"));
                match &body[1] {
                    Processor::Choice { routes, .. } => {
                        assert_eq!(routes[0].processors[0].type_name(), "async")
                    }
                    other => panic!("expected choice, got {:?}", other),
                }
            }
            other => panic!("expected foreach scope, got {:?}", other),
        }

        match &processors[1] {
            Processor::Scope {
                processors: body,
                error_handler,
                ..
            } => {
                let types: Vec<&str> = body.iter().map(Processor::type_name).collect();
                assert_eq!(types, vec!["flow-ref"]);
                let handler = error_handler.as_ref().expect("try handler");
                assert_eq!(handler.handlers.len(), 2);
                assert_eq!(handler.handlers[0].error_type.as_deref(), Some("HTTP:TIMEOUT"));
                assert_eq!(handler.handlers[0].processors, vec!["flow-ref".to_string()]);
                assert_eq!(handler.handlers[0].steps[0].attribute("name"), Some("recover"));
                assert_eq!(handler.handlers[1].kind, ErrorStrategyKind::OnErrorPropagate);
            }
            other => panic!("expected try scope, got {:?}", other),
        }
    }
}
