use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::parsers::namespaces::NamespaceTable;

/// Which processor element carries a flow reference, and in which attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRefRule {
    /// Display tag of the processor, e.g. `flow-ref`
    pub element: String,
    pub attribute: String,
}

impl FlowRefRule {
    pub fn new(element: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            element: element.into(),
            attribute: attribute.into(),
        }
    }
}

/// Configuration for the parsing service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsingConfig {
    pub document_extensions: Vec<String>,
    pub max_file_size_mb: u64,
    pub parallel_parsing: bool,
    /// Thread count for parallel parsing; defaults to the CPU count
    pub workers: Option<usize>,
    pub skip_directories: Vec<String>,
    /// Glob patterns relative to the input root; empty means everything
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub flow_ref_rules: Vec<FlowRefRule>,
    /// Extra `prefix:local` tags treated as flow sources
    pub extra_sources: Vec<String>,
    /// Additional prefix -> URI bindings for the namespace table
    pub namespaces: BTreeMap<String, String>,
    /// Keep the raw text of every parsed document
    pub keep_sources: bool,
    /// Read pom, manifest, descriptor, properties and API specs around the
    /// flow documents
    pub collect_metadata: bool,
}

impl Default for ParsingConfig {
    fn default() -> Self {
        Self {
            document_extensions: vec!["xml".to_string()],
            max_file_size_mb: 10,
            parallel_parsing: true,
            workers: None,
            skip_directories: [
                "target", ".git", ".mule", ".settings", "node_modules", ".idea", ".vscode", "bin",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            include: Vec::new(),
            exclude: Vec::new(),
            flow_ref_rules: vec![FlowRefRule::new("flow-ref", "name")],
            extra_sources: vec!["vm:listener".to_string(), "jms:listener".to_string()],
            namespaces: BTreeMap::new(),
            keep_sources: false,
            collect_metadata: true,
        }
    }
}

impl ParsingConfig {
    pub fn from_yaml(yaml_str: &str) -> Result<Self> {
        let config: ParsingConfig =
            serde_yaml::from_str(yaml_str).context("invalid parser configuration")?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// The namespace table with any configured bindings layered on top
    pub fn namespace_table(&self) -> NamespaceTable {
        let mut table = NamespaceTable::mule();
        for (prefix, uri) in &self.namespaces {
            table.insert(prefix.as_str(), uri.as_str());
        }
        table
    }

    pub fn worker_count(&self) -> usize {
        self.workers.filter(|n| *n > 0).unwrap_or_else(num_cpus::get)
    }

    pub fn is_document(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                self.document_extensions
                    .iter()
                    .any(|wanted| wanted.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }

    pub fn should_skip_directory(&self, name: &str) -> bool {
        self.skip_directories.iter().any(|skip| skip == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ParsingConfig::default();
        assert_eq!(config.max_file_size_mb, 10);
        assert_eq!(config.flow_ref_rules, vec![FlowRefRule::new("flow-ref", "name")]);
        assert!(config.is_document(Path::new("src/main/mule/app.XML")));
        assert!(!config.is_document(Path::new("pom.json")));
        assert!(config.should_skip_directory("target"));
    }

    #[test]
    fn test_partial_yaml_keeps_remaining_defaults() {
        let config = ParsingConfig::from_yaml(
            r#"
max_file_size_mb: 2
flow_ref_rules:
  - element: flow-ref
    attribute: name
  - element: "vm:publish"
    attribute: queueName
namespaces:
  acme: "urn:acme"
"#,
        )
        .unwrap();

        assert_eq!(config.max_file_size_mb, 2);
        assert_eq!(config.flow_ref_rules.len(), 2);
        assert!(config.parallel_parsing);
        assert_eq!(config.document_extensions, vec!["xml".to_string()]);
        assert_eq!(config.namespace_table().uri("acme"), Some("urn:acme"));
    }

    #[test]
    fn test_rejects_malformed_yaml() {
        assert!(ParsingConfig::from_yaml("max_file_size_mb: [").is_err());
    }
}
