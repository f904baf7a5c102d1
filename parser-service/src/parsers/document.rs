use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shared_types::{
    DiagnosticSeverity, ErrorHandler, Flow, GlobalConfigEntry, ParseDiagnostic,
};
use std::path::Path;
use tracing::debug;

use super::classifier::ElementClassifier;
use super::error_handlers::{default_error_handler, extract_error_handler, extract_global_handlers};
use super::global_config::extract_global_configs;
use super::namespaces::{NamespaceTable, DOC_PREFIX};
use super::processors::{element_text, ProcessorExtractor};
use super::source::SourceExtractor;
use crate::config::ParsingConfig;
use crate::error::DocumentError;

/// Id given to a flow that has no `name` attribute
pub const UNNAMED_FLOW: &str = "Unknown";
const BYTES_PER_MB: u64 = 1024 * 1024;

/// Everything recovered from one configuration document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedDocument {
    pub file_name: String,
    /// Flows and sub-flows in document order
    pub flows: Vec<Flow>,
    pub global_configs: Vec<GlobalConfigEntry>,
    pub global_error_handlers: Vec<(String, ErrorHandler)>,
    pub default_error_handler: Option<String>,
    pub diagnostics: Vec<ParseDiagnostic>,
    /// SHA-256 of the document bytes
    pub fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Parses one XML document into flows and global configuration
pub struct DocumentParser {
    namespaces: NamespaceTable,
    classifier: ElementClassifier,
    max_file_size_mb: u64,
    keep_sources: bool,
}

impl DocumentParser {
    pub fn new(namespaces: NamespaceTable, config: &ParsingConfig) -> Self {
        let classifier = ElementClassifier::new(&namespaces)
            .with_extra_sources(&namespaces, &config.extra_sources);
        Self {
            namespaces,
            classifier,
            max_file_size_mb: config.max_file_size_mb,
            keep_sources: config.keep_sources,
        }
    }

    pub fn namespaces(&self) -> &NamespaceTable {
        &self.namespaces
    }

    /// Reads and parses the document at `path`, recording it as `file_name`
    pub fn parse_file(&self, path: &Path, file_name: &str) -> Result<ParsedDocument, DocumentError> {
        let metadata = std::fs::metadata(path).map_err(|source| DocumentError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if metadata.len() > self.max_file_size_mb.saturating_mul(BYTES_PER_MB) {
            return Err(DocumentError::TooLarge {
                path: path.to_path_buf(),
                size_mb: metadata.len().div_ceil(BYTES_PER_MB),
                limit_mb: self.max_file_size_mb,
            });
        }

        let content = std::fs::read_to_string(path).map_err(|source| DocumentError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.parse_str(path, file_name, &content)
    }

    /// Parses document text. Only a well-formedness failure is an error;
    /// odd elements inside are absorbed with defaults.
    pub fn parse_str(
        &self,
        path: &Path,
        file_name: &str,
        content: &str,
    ) -> Result<ParsedDocument, DocumentError> {
        let document = Document::parse(content).map_err(|source| DocumentError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;
        let root = document.root_element();

        let mut parsed = ParsedDocument {
            file_name: file_name.to_string(),
            flows: Vec::new(),
            global_configs: Vec::new(),
            global_error_handlers: Vec::new(),
            default_error_handler: None,
            diagnostics: Vec::new(),
            fingerprint: fingerprint(content.as_bytes()),
            source: self.keep_sources.then(|| content.to_string()),
        };

        if !self.namespaces.is_core_named(root, "mule") {
            parsed.diagnostics.push(ParseDiagnostic {
                severity: DiagnosticSeverity::Info,
                message: format!(
                    "root element '{}' is not a Mule configuration",
                    self.namespaces.display_tag(root)
                ),
                file_path: file_name.to_string(),
                flow_id: None,
            });
        }

        let processors = ProcessorExtractor::new(&self.namespaces, &self.classifier);
        let sources = SourceExtractor::new(&self.namespaces, &self.classifier);

        for node in root.descendants() {
            let is_subflow = self.namespaces.is_core_named(node, "sub-flow");
            if !is_subflow && !self.namespaces.is_core_named(node, "flow") {
                continue;
            }
            let flow = self.parse_flow(node, is_subflow, &sources, &processors, &mut parsed);
            parsed.flows.push(flow);
        }

        parsed.global_configs = extract_global_configs(root, &self.namespaces, file_name);
        parsed.global_error_handlers = extract_global_handlers(root, &self.namespaces, &processors);
        parsed.default_error_handler = default_error_handler(root, &self.namespaces);

        debug!(
            "Parsed {}: {} flows, {} global configs",
            file_name,
            parsed.flows.len(),
            parsed.global_configs.len()
        );
        Ok(parsed)
    }

    fn parse_flow(
        &self,
        node: Node,
        is_subflow: bool,
        sources: &SourceExtractor,
        processors: &ProcessorExtractor,
        parsed: &mut ParsedDocument,
    ) -> Flow {
        let id = match node.attribute("name") {
            Some(name) => name.to_string(),
            None => {
                parsed.diagnostics.push(ParseDiagnostic {
                    severity: DiagnosticSeverity::Warning,
                    message: format!("flow without a name recorded as '{}'", UNNAMED_FLOW),
                    file_path: parsed.file_name.clone(),
                    flow_id: Some(UNNAMED_FLOW.to_string()),
                });
                UNNAMED_FLOW.to_string()
            }
        };

        let (source, flow_processors) = if is_subflow {
            (None, processors.extract_subflow(node))
        } else {
            match sources.find(node) {
                Some((source_node, source)) => {
                    (Some(source), processors.extract_flow(node, Some(source_node.id())))
                }
                None => (None, processors.extract_flow(node, None)),
            }
        };

        let error_handler = node
            .children()
            .find(|child| self.namespaces.is_core_named(*child, "error-handler"))
            .map(|handler| extract_error_handler(handler, &self.namespaces, processors));

        Flow {
            id,
            description: self.description(node),
            is_subflow,
            source,
            processors: flow_processors,
            error_handler,
            file_name: parsed.file_name.clone(),
        }
    }

    fn description(&self, node: Node) -> Option<String> {
        node.children()
            .find(|child| self.namespaces.is_named(*child, DOC_PREFIX, "description"))
            .and_then(element_text)
            .or_else(|| {
                self.namespaces
                    .attribute(node, DOC_PREFIX, "description")
                    .map(str::to_string)
            })
    }
}

/// Hex SHA-256 of document bytes
pub fn fingerprint(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}
