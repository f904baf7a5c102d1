use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use shared_types::{ApplicationModel, Processor, NO_TRANSFORMATION_CODE};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::services::parsing_service::relative_name;

static VERSION_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"%dw\s+([\d.]+)").unwrap());

static OUTPUT_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"output\s+([\w/\-+.]+)").unwrap());

static VARIABLE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"var\s+(\w+)\s*=").unwrap());

static FUNCTION_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"fun\s+(\w+)\s*\(").unwrap());

static INPUT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"%input\s+(\w+)\s+(\w+/[\w\-+]+)").unwrap());

static CONTROL_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(if|for|while|match)\b").unwrap());

pub const DEFAULT_VERSION: &str = "2.0";
pub const DEFAULT_OUTPUT: &str = "application/json";
const PREVIEW_CHARS: usize = 200;
const SAMPLE_LINES: usize = 5;

/// Shape of one DataWeave script. Scripts are inventoried, never run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationSummary {
    pub file_path: Option<String>,
    pub flow_id: Option<String>,
    pub version: String,
    pub output_type: String,
    /// 0.0 to 10.0, one decimal
    pub complexity: f64,
    pub input_types: BTreeMap<String, String>,
    pub variables: Vec<String>,
    pub functions: Vec<String>,
    pub mapping_sample: String,
    pub code_preview: String,
}

impl TransformationSummary {
    pub fn from_code(code: &str) -> Self {
        let capture = |pattern: &Regex| {
            pattern
                .captures(code)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
        };
        let all = |pattern: &Regex| -> Vec<String> {
            pattern
                .captures_iter(code)
                .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
                .collect()
        };

        let variables = all(&VARIABLE_PATTERN);
        let functions = all(&FUNCTION_PATTERN);
        let input_types = INPUT_PATTERN
            .captures_iter(code)
            .filter_map(|c| Some((c.get(1)?.as_str().to_string(), c.get(2)?.as_str().to_string())))
            .collect();

        Self {
            file_path: None,
            flow_id: None,
            version: capture(&VERSION_PATTERN).unwrap_or_else(|| DEFAULT_VERSION.to_string()),
            output_type: capture(&OUTPUT_PATTERN).unwrap_or_else(|| DEFAULT_OUTPUT.to_string()),
            complexity: complexity(code, variables.len(), functions.len()),
            input_types,
            variables,
            functions,
            mapping_sample: mapping_sample(code),
            code_preview: preview(code),
        }
    }
}

fn complexity(code: &str, variables: usize, functions: usize) -> f64 {
    let lines = code.matches('\n').count() + 1;
    let controls = CONTROL_PATTERN.find_iter(code).count();
    let score = lines as f64 / 10.0
        + variables as f64 * 0.2
        + functions as f64 * 0.5
        + controls as f64 * 0.3;
    (score.min(10.0) * 10.0).round() / 10.0
}

// First non-empty lines of the body, after the `---` header separator.
fn mapping_sample(code: &str) -> String {
    code.lines()
        .skip_while(|line| !line.contains("---"))
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .take(SAMPLE_LINES)
        .collect::<Vec<_>>()
        .join("\n")
}

fn preview(code: &str) -> String {
    if code.chars().count() > PREVIEW_CHARS {
        let head: String = code.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        code.to_string()
    }
}

// Inline code, as opposed to the sentinel or a pointer to a `.dwl` resource
// that is scanned from disk instead.
fn is_inline_code(code: &str) -> bool {
    code != NO_TRANSFORMATION_CODE && !(code.lines().count() <= 1 && code.trim_end().ends_with(".dwl"))
}

/// Summaries of every inline transform in the model, nested routes included
pub fn scan_model(model: &ApplicationModel) -> Vec<TransformationSummary> {
    let mut summaries = Vec::new();
    for flow in &model.flows {
        for processor in flow.walk() {
            if let Processor::Transform { code, .. } = processor {
                if !is_inline_code(code) {
                    continue;
                }
                let mut summary = TransformationSummary::from_code(code);
                summary.file_path = Some(flow.file_name.clone());
                summary.flow_id = Some(flow.id.clone());
                summaries.push(summary);
            }
        }
    }
    debug!("Summarized {} inline transformations", summaries.len());
    summaries
}

/// Summaries of every `.dwl` file under `root`, in path order
pub fn scan_dwl_files(root: &Path) -> Result<Vec<TransformationSummary>> {
    let mut files: Vec<_> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("dwl"))
        .collect();
    files.sort();

    let mut summaries = Vec::with_capacity(files.len());
    for path in files {
        match std::fs::read_to_string(&path) {
            Ok(code) => {
                let mut summary = TransformationSummary::from_code(&code);
                summary.file_path = Some(relative_name(root, &path));
                summaries.push(summary);
            }
            Err(e) => warn!("Skipping {}: {}", path.display(), e),
        }
    }
    info!("Found {} DataWeave files", summaries.len());
    Ok(summaries)
}
