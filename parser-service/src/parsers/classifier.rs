use roxmltree::Node;
use shared_types::SourceType;
use std::collections::HashMap;
use tracing::warn;

use super::namespaces::{NamespaceTable, CORE_PREFIX};

/// Semantic role of an element inside a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    /// A flow trigger. Schedulers are `Source(SourceType::Scheduler)`.
    Source(SourceType),
    Transform,
    FileWrite,
    SftpWrite,
    Choice,
    /// Container that runs a nested processor sequence
    Scope,
    ErrorHandler,
    Generic,
}

impl ElementKind {
    pub fn label(&self) -> &'static str {
        match self {
            ElementKind::Source(SourceType::Scheduler) => "source-scheduler",
            ElementKind::Source(_) => "source-listener",
            ElementKind::Transform => "transform",
            ElementKind::FileWrite => "file-write",
            ElementKind::SftpWrite => "sftp-write",
            ElementKind::Choice => "choice",
            ElementKind::Scope => "scope",
            ElementKind::ErrorHandler => "error-handler",
            ElementKind::Generic => "generic",
        }
    }

    pub fn is_source(&self) -> bool {
        matches!(self, ElementKind::Source(_))
    }
}

const DEFAULT_RULES: &[(&str, &str, ElementKind)] = &[
    ("file", "listener", ElementKind::Source(SourceType::FileListener)),
    ("sftp", "listener", ElementKind::Source(SourceType::SftpListener)),
    ("http", "listener", ElementKind::Source(SourceType::HttpListener)),
    (CORE_PREFIX, "scheduler", ElementKind::Source(SourceType::Scheduler)),
    ("ee", "transform", ElementKind::Transform),
    ("dw", "transform", ElementKind::Transform),
    ("file", "write", ElementKind::FileWrite),
    ("sftp", "write", ElementKind::SftpWrite),
    (CORE_PREFIX, "choice", ElementKind::Choice),
    (CORE_PREFIX, "foreach", ElementKind::Scope),
    (CORE_PREFIX, "parallel-foreach", ElementKind::Scope),
    (CORE_PREFIX, "try", ElementKind::Scope),
    (CORE_PREFIX, "async", ElementKind::Scope),
    (CORE_PREFIX, "until-successful", ElementKind::Scope),
    (CORE_PREFIX, "first-successful", ElementKind::Scope),
    (CORE_PREFIX, "round-robin", ElementKind::Scope),
    (CORE_PREFIX, "scatter-gather", ElementKind::Scope),
    (CORE_PREFIX, "route", ElementKind::Scope),
    ("batch", "job", ElementKind::Scope),
    ("batch", "process-records", ElementKind::Scope),
    ("batch", "step", ElementKind::Scope),
    ("batch", "aggregator", ElementKind::Scope),
    ("batch", "on-complete", ElementKind::Scope),
    (CORE_PREFIX, "error-handler", ElementKind::ErrorHandler),
];

/// Lookup table from qualified element name to [`ElementKind`]
#[derive(Debug, Clone)]
pub struct ElementClassifier {
    // namespace uri -> local name -> kind
    rules: HashMap<String, HashMap<String, ElementKind>>,
    core_uri: Option<String>,
}

impl ElementClassifier {
    pub fn new(namespaces: &NamespaceTable) -> Self {
        let mut classifier = Self {
            rules: HashMap::new(),
            core_uri: namespaces.core_uri().map(str::to_string),
        };
        for (prefix, local, kind) in DEFAULT_RULES {
            if let Some(uri) = namespaces.uri(prefix) {
                classifier.add_rule(uri, local, *kind);
            }
        }
        classifier
    }

    /// Registers additional `prefix:local` tags recognised as sources of
    /// unknown type. Tags with an unbound prefix are skipped.
    pub fn with_extra_sources(mut self, namespaces: &NamespaceTable, tags: &[String]) -> Self {
        for tag in tags {
            match namespaces.resolve(tag) {
                Some((uri, local)) => {
                    let uri = uri.to_string();
                    self.rules
                        .entry(uri)
                        .or_default()
                        .entry(local.to_string())
                        .or_insert(ElementKind::Source(SourceType::Unknown));
                }
                None => warn!("Ignoring extra source '{}': prefix is not in the namespace table", tag),
            }
        }
        self
    }

    pub fn add_rule(&mut self, uri: &str, local: &str, kind: ElementKind) {
        self.rules
            .entry(uri.to_string())
            .or_default()
            .insert(local.to_string(), kind);
    }

    pub fn classify(&self, node: Node) -> ElementKind {
        if !node.is_element() {
            return ElementKind::Generic;
        }
        let tag = node.tag_name();
        self.classify_name(tag.namespace(), tag.name())
    }

    /// Classifies by namespace URI and local name; a missing namespace is
    /// read as the core namespace
    pub fn classify_name(&self, namespace: Option<&str>, local: &str) -> ElementKind {
        let uri = match namespace.or(self.core_uri.as_deref()) {
            Some(uri) => uri,
            None => return ElementKind::Generic,
        };
        self.rules
            .get(uri)
            .and_then(|by_local| by_local.get(local))
            .copied()
            .unwrap_or(ElementKind::Generic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roxmltree::Document;

    fn classify_all(xml: &str, extra: &[String]) -> Vec<ElementKind> {
        let table = NamespaceTable::mule();
        let classifier = ElementClassifier::new(&table).with_extra_sources(&table, extra);
        let doc = Document::parse(xml).unwrap();
        doc.root_element()
            .children()
            .filter(|n| n.is_element())
            .map(|n| classifier.classify(n))
            .collect()
    }

    #[test]
    fn test_classifies_by_qualified_name() {
        let kinds = classify_all(
            r#"<mule xmlns="http://www.mulesoft.org/schema/mule/core"
                xmlns:http="http://www.mulesoft.org/schema/mule/http"
                xmlns:file="http://www.mulesoft.org/schema/mule/file"
                xmlns:sftp="http://www.mulesoft.org/schema/mule/sftp"
                xmlns:ee="http://www.mulesoft.org/schema/mule/ee/core">
                <http:listener/><scheduler/><file:listener/><sftp:listener/>
                <ee:transform/><file:write/><sftp:write/><choice/><error-handler/>
                <logger/><http:request/>
            </mule>"#,
            &[],
        );
        assert_eq!(
            kinds,
            vec![
                ElementKind::Source(SourceType::HttpListener),
                ElementKind::Source(SourceType::Scheduler),
                ElementKind::Source(SourceType::FileListener),
                ElementKind::Source(SourceType::SftpListener),
                ElementKind::Transform,
                ElementKind::FileWrite,
                ElementKind::SftpWrite,
                ElementKind::Choice,
                ElementKind::ErrorHandler,
                ElementKind::Generic,
                ElementKind::Generic,
            ]
        );
    }

    #[test]
    fn test_scopes_are_recognised() {
        let kinds = classify_all(
            r#"<mule xmlns="http://www.mulesoft.org/schema/mule/core"
                xmlns:batch="http://www.mulesoft.org/schema/mule/batch">
                <foreach/><try/><async/><until-successful/><scatter-gather/>
                <batch:job/><batch:step/><batch:commit/>
            </mule>"#,
            &[],
        );
        let scopes = kinds.iter().filter(|k| **k == ElementKind::Scope).count();
        assert_eq!(scopes, 7);
        assert_eq!(kinds[7], ElementKind::Generic);
    }

    #[test]
    fn test_same_local_name_in_foreign_namespace_is_generic() {
        let kinds = classify_all(
            r#"<mule xmlns="http://www.mulesoft.org/schema/mule/core"
                xmlns:x="urn:not-mule"><x:choice/><x:listener/></mule>"#,
            &[],
        );
        assert_eq!(kinds, vec![ElementKind::Generic, ElementKind::Generic]);
    }

    #[test]
    fn test_extra_sources_are_unknown_sources() {
        let kinds = classify_all(
            r#"<mule xmlns="http://www.mulesoft.org/schema/mule/core"
                xmlns:vm="http://www.mulesoft.org/schema/mule/vm"><vm:listener/></mule>"#,
            &["vm:listener".to_string(), "bogus:listener".to_string()],
        );
        assert_eq!(kinds, vec![ElementKind::Source(SourceType::Unknown)]);
        assert_eq!(kinds[0].label(), "source-listener");
    }
}
