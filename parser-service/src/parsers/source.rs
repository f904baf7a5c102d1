use roxmltree::Node;
use shared_types::{Source, SourceType, NOT_SPECIFIED};

use super::classifier::{ElementClassifier, ElementKind};
use super::namespaces::NamespaceTable;

/// Method recorded for HTTP listeners that accept any verb
pub const ALL_METHODS: &str = "All methods";

/// Finds and normalizes the trigger of a top-level flow
pub struct SourceExtractor<'c> {
    namespaces: &'c NamespaceTable,
    classifier: &'c ElementClassifier,
}

impl<'c> SourceExtractor<'c> {
    pub fn new(namespaces: &'c NamespaceTable, classifier: &'c ElementClassifier) -> Self {
        Self {
            namespaces,
            classifier,
        }
    }

    /// The first child of `flow` that is a known source, with the element it
    /// was read from
    pub fn find<'a, 'input>(&self, flow: Node<'a, 'input>) -> Option<(Node<'a, 'input>, Source)> {
        flow.children().find_map(|child| match self.classifier.classify(child) {
            ElementKind::Source(source_type) => Some((child, self.normalize(child, source_type))),
            _ => None,
        })
    }

    pub fn extract(&self, flow: Node) -> Option<Source> {
        self.find(flow).map(|(_, source)| source)
    }

    fn normalize(&self, node: Node, source_type: SourceType) -> Source {
        let mut attributes = self.namespaces.collect_attributes(node);
        let mut fill = |key: &str, value: Option<&str>, default: &str| {
            let value = value.unwrap_or(default).to_string();
            attributes.insert(key.to_string(), value);
        };

        match source_type {
            SourceType::FileListener | SourceType::SftpListener => {
                fill("directory", node.attribute("directory"), NOT_SPECIFIED);
                fill("pattern", node.attribute("matcher"), NOT_SPECIFIED);
            }
            SourceType::HttpListener => {
                fill("path", node.attribute("path"), NOT_SPECIFIED);
                let method = node
                    .attribute("method")
                    .or_else(|| node.attribute("allowedMethods"));
                fill("method", method, ALL_METHODS);
            }
            SourceType::Scheduler => {
                fill("frequency", scheduler_frequency(node), NOT_SPECIFIED);
            }
            SourceType::Unknown => {}
        }

        Source {
            source_type,
            element: self.namespaces.display_tag(node),
            attributes,
        }
    }
}

// A scheduler declares its period directly or through a nested strategy.
fn scheduler_frequency<'a>(node: Node<'a, '_>) -> Option<&'a str> {
    if let Some(frequency) = node.attribute("frequency") {
        return Some(frequency);
    }
    node.descendants()
        .filter(|n| n.is_element())
        .find_map(|n| match n.tag_name().name() {
            "fixed-frequency" => n.attribute("frequency"),
            "cron" => n.attribute("expression"),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use roxmltree::Document;

    const HEADER: &str = r#"xmlns="http://www.mulesoft.org/schema/mule/core"
        xmlns:doc="http://www.mulesoft.org/schema/mule/documentation"
        xmlns:http="http://www.mulesoft.org/schema/mule/http"
        xmlns:file="http://www.mulesoft.org/schema/mule/file""#;

    fn extract(body: &str) -> Option<Source> {
        let xml = format!("<mule {}><flow name=\"f\">{}</flow></mule>", HEADER, body);
        let doc = Document::parse(&xml).unwrap();
        let table = NamespaceTable::mule();
        let classifier = ElementClassifier::new(&table);
        let flow = doc.root_element().first_element_child().unwrap();
        SourceExtractor::new(&table, &classifier).extract(flow)
    }

    #[test]
    fn test_http_listener_defaults_are_filled() {
        let source = extract(r#"<http:listener config-ref="api" doc:name="Listen"/>"#).unwrap();
        assert_eq!(source.source_type, SourceType::HttpListener);
        assert_eq!(source.element, "http:listener");
        assert_eq!(source.attribute("path"), Some(NOT_SPECIFIED));
        assert_eq!(source.attribute("method"), Some(ALL_METHODS));
        assert_eq!(source.attribute("config-ref"), Some("api"));
        assert_eq!(source.attribute("doc:name"), Some("Listen"));
    }

    #[test]
    fn test_allowed_methods_feeds_method() {
        let source = extract(r#"<http:listener path="/orders" allowedMethods="POST"/>"#).unwrap();
        assert_eq!(source.attribute("path"), Some("/orders"));
        assert_eq!(source.attribute("method"), Some("POST"));
    }

    #[test]
    fn test_file_listener_pattern_comes_from_matcher() {
        let source = extract(r#"<file:listener directory="in" matcher="csvOnly"/>"#).unwrap();
        assert_eq!(source.source_type, SourceType::FileListener);
        assert_eq!(source.attribute("directory"), Some("in"));
        assert_eq!(source.attribute("pattern"), Some("csvOnly"));
    }

    #[test]
    fn test_scheduler_reads_nested_strategy() {
        let source = extract(
            r#"<scheduler><scheduling-strategy><fixed-frequency frequency="60000"/></scheduling-strategy></scheduler>"#,
        )
        .unwrap();
        assert_eq!(source.source_type, SourceType::Scheduler);
        assert_eq!(source.attribute("frequency"), Some("60000"));

        let cron = extract(
            r#"<scheduler><scheduling-strategy><cron expression="0 0 * * * ?"/></scheduling-strategy></scheduler>"#,
        )
        .unwrap();
        assert_eq!(cron.attribute("frequency"), Some("0 0 * * * ?"));
    }

    #[test]
    fn test_flow_without_trigger_has_no_source() {
        assert!(extract(r#"<logger message="hi"/>"#).is_none());
    }
}
