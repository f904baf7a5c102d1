use roxmltree::Node;
use shared_types::Attributes;
use std::collections::{BTreeMap, HashMap};

/// Prefix of the core configuration namespace
pub const CORE_PREFIX: &str = "mule";
/// Prefix of the documentation namespace (`doc:name`, `doc:description`)
pub const DOC_PREFIX: &str = "doc";

/// Read-only mapping between short prefixes and namespace URIs.
///
/// Built once at startup and handed by reference to every parsing call.
/// Lookups go both ways: prefix to URI when building classification rules,
/// URI to prefix when rendering element tags and attribute keys.
#[derive(Debug, Clone, Default)]
pub struct NamespaceTable {
    by_prefix: BTreeMap<String, String>,
    by_uri: HashMap<String, String>,
}

impl NamespaceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The namespaces used by Mule application configuration files
    pub fn mule() -> Self {
        let mut table = Self::new();
        for (prefix, uri) in [
            (CORE_PREFIX, "http://www.mulesoft.org/schema/mule/core"),
            (DOC_PREFIX, "http://www.mulesoft.org/schema/mule/documentation"),
            ("xsi", "http://www.w3.org/2001/XMLSchema-instance"),
            ("file", "http://www.mulesoft.org/schema/mule/file"),
            ("sftp", "http://www.mulesoft.org/schema/mule/sftp"),
            ("dw", "http://www.mulesoft.org/schema/mule/ee/dw"),
            ("db", "http://www.mulesoft.org/schema/mule/db"),
            ("ee", "http://www.mulesoft.org/schema/mule/ee/core"),
            ("http", "http://www.mulesoft.org/schema/mule/http"),
            ("batch", "http://www.mulesoft.org/schema/mule/batch"),
            ("vm", "http://www.mulesoft.org/schema/mule/vm"),
            ("jms", "http://www.mulesoft.org/schema/mule/jms"),
        ] {
            table.insert(prefix, uri);
        }
        table
    }

    /// Registers a prefix, replacing any earlier binding of the same prefix
    pub fn insert(&mut self, prefix: impl Into<String>, uri: impl Into<String>) {
        let prefix = prefix.into();
        let uri = uri.into();
        if let Some(old_uri) = self.by_prefix.insert(prefix.clone(), uri.clone()) {
            self.by_uri.remove(&old_uri);
        }
        self.by_uri.insert(uri, prefix);
    }

    pub fn uri(&self, prefix: &str) -> Option<&str> {
        self.by_prefix.get(prefix).map(String::as_str)
    }

    pub fn prefix(&self, uri: &str) -> Option<&str> {
        self.by_uri.get(uri).map(String::as_str)
    }

    pub fn core_uri(&self) -> Option<&str> {
        self.uri(CORE_PREFIX)
    }

    pub fn len(&self) -> usize {
        self.by_prefix.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_prefix.is_empty()
    }

    /// Resolves `prefix:local` (or a bare core name) to `(uri, local)`
    pub fn resolve<'t, 'n>(&'t self, qualified: &'n str) -> Option<(&'t str, &'n str)> {
        match qualified.split_once(':') {
            Some((prefix, local)) => self.uri(prefix).map(|uri| (uri, local)),
            None => self.core_uri().map(|uri| (uri, qualified)),
        }
    }

    /// True for elements in the core namespace. Elements with no namespace
    /// at all are treated as core.
    pub fn is_core(&self, node: Node) -> bool {
        match node.tag_name().namespace() {
            None => true,
            Some(uri) => self.core_uri() == Some(uri),
        }
    }

    pub fn is_core_named(&self, node: Node, local: &str) -> bool {
        node.is_element() && node.tag_name().name() == local && self.is_core(node)
    }

    pub fn is_named(&self, node: Node, prefix: &str, local: &str) -> bool {
        node.is_element()
            && node.tag_name().name() == local
            && node.tag_name().namespace().is_some()
            && node.tag_name().namespace() == self.uri(prefix)
    }

    /// Display tag of an element: core names bare, known namespaces as
    /// `prefix:local`, otherwise the document's own prefix or `{uri}local`
    pub fn display_tag(&self, node: Node) -> String {
        let local = node.tag_name().name();
        match node.tag_name().namespace() {
            None => local.to_string(),
            Some(uri) if self.core_uri() == Some(uri) => local.to_string(),
            Some(uri) => self.qualify(node, uri, local),
        }
    }

    /// Attribute bag of an element. Unqualified attributes keep their local
    /// name; namespaced ones are keyed `prefix:local`.
    pub fn collect_attributes(&self, node: Node) -> Attributes {
        node.attributes()
            .map(|attr| {
                let key = match attr.namespace() {
                    None => attr.name().to_string(),
                    Some(uri) => self.qualify(node, uri, attr.name()),
                };
                (key, attr.value().to_string())
            })
            .collect()
    }

    /// Reads an attribute in a namespace known by prefix
    pub fn attribute<'a>(&self, node: Node<'a, '_>, prefix: &str, local: &str) -> Option<&'a str> {
        let uri = self.uri(prefix)?;
        node.attribute((uri, local))
    }

    fn qualify(&self, node: Node, uri: &str, local: &str) -> String {
        match self.prefix(uri).or_else(|| node.lookup_prefix(uri)) {
            Some(prefix) if !prefix.is_empty() => format!("{}:{}", prefix, local),
            _ => format!("{{{}}}{}", uri, local),
        }
    }
}
