use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared_types::ApplicationModel;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::analysis::cross_reference::CrossReferenceIndex;
use crate::analysis::dataweave::TransformationSummary;
use crate::analysis::environment::{
    compare_environments, config_differences, EnvironmentComparison, EnvironmentConfig,
};
use crate::analysis::flow_graph::FlowGraph;
use crate::analysis::metadata::ApplicationMetadata;
use crate::analysis::profile::{all_flow_formats, infer_purpose, ApplicationPurpose, FlowFormats};
use crate::services::parsing_service::{ParseReport, ParsedApplication};

pub const MODEL_FILE: &str = "model.json";
pub const DIAGRAM_FILE: &str = "flow_diagram.mmd";

/// Everything the documentation renderer consumes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentationBundle {
    pub generated_at: DateTime<Utc>,
    pub model: ApplicationModel,
    pub cross_references: CrossReferenceIndex,
    pub report: ParseReport,
    pub metadata: ApplicationMetadata,
    pub purpose: ApplicationPurpose,
    /// Inferred input and output format, by flow id
    pub flow_formats: BTreeMap<String, FlowFormats>,
    pub diagram: String,
    pub unreachable_flows: Vec<String>,
    pub reference_cycles: Vec<Vec<String>>,
    pub environments: Vec<EnvironmentConfig>,
    pub config_differences: BTreeSet<String>,
    pub environment_comparison: Option<EnvironmentComparison>,
    pub transformations: Vec<TransformationSummary>,
    /// Raw document text by name, only with `--include-code`
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub sources: BTreeMap<String, String>,
}

impl DocumentationBundle {
    /// Resolves references and builds the diagram for a parsed application
    pub fn assemble(application: ParsedApplication, xref: CrossReferenceIndex) -> Self {
        let graph = FlowGraph::build(&application.model, &xref);
        Self {
            generated_at: Utc::now(),
            diagram: graph.to_mermaid(),
            unreachable_flows: graph.unreachable_flows(),
            reference_cycles: graph.reference_cycles(),
            purpose: infer_purpose(&application.model),
            flow_formats: all_flow_formats(&application.model),
            metadata: application.metadata,
            model: application.model,
            cross_references: xref,
            report: application.report,
            environments: Vec::new(),
            config_differences: BTreeSet::new(),
            environment_comparison: None,
            transformations: Vec::new(),
            sources: application.sources,
        }
    }

    pub fn with_environments(mut self, environments: Vec<EnvironmentConfig>) -> Self {
        self.config_differences = config_differences(&environments);
        self.environment_comparison = Some(compare_environments(&environments));
        self.environments = environments;
        self
    }

    pub fn with_transformations(mut self, transformations: Vec<TransformationSummary>) -> Self {
        self.transformations = transformations;
        self
    }

    /// Writes `model.json` and `flow_diagram.mmd` into `dir`, creating it
    pub fn write_to(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("cannot create output directory {}", dir.display()))?;

        let model_path = dir.join(MODEL_FILE);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&model_path, json)
            .with_context(|| format!("cannot write {}", model_path.display()))?;

        let diagram_path = dir.join(DIAGRAM_FILE);
        std::fs::write(&diagram_path, &self.diagram)
            .with_context(|| format!("cannot write {}", diagram_path.display()))?;

        info!("Wrote documentation bundle to {}", dir.display());
        Ok(vec![model_path, diagram_path])
    }
}
