use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use shared_types::{ApplicationModel, DuplicateConfig, DuplicateFlow, ParseDiagnostic};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::analysis::metadata::{extract_metadata, ApplicationMetadata};
use crate::config::ParsingConfig;
use crate::error::{DocumentError, InputError};
use crate::parsers::{DocumentParser, ParsedDocument};
use super::archive::{extract_archive, is_archive};

/// A document that could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFailure {
    pub file_name: String,
    pub error: String,
}

/// What happened during one aggregate parse
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParseReport {
    pub documents_found: usize,
    pub documents_parsed: usize,
    pub failures: Vec<DocumentFailure>,
    pub duplicate_flows: Vec<DuplicateFlow>,
    pub duplicate_configs: Vec<DuplicateConfig>,
    pub diagnostics: Vec<ParseDiagnostic>,
    /// Document name -> SHA-256 of its bytes
    pub fingerprints: BTreeMap<String, String>,
    pub parse_duration_ms: u64,
}

impl ParseReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.duplicate_flows.is_empty() && self.duplicate_configs.is_empty()
    }
}

/// The merged model of every document plus the report of how it was built
#[derive(Debug, Clone)]
pub struct ParsedApplication {
    pub model: ApplicationModel,
    pub report: ParseReport,
    /// Raw document text by name, when sources are kept
    pub sources: BTreeMap<String, String>,
    /// Build metadata; empty for a single-document input or when disabled
    pub metadata: ApplicationMetadata,
}

/// Merges parsed documents in the order given. The first flow or global
/// configuration seen under a name is kept; later ones are reported.
pub fn merge_documents(
    name: &str,
    documents: impl IntoIterator<Item = ParsedDocument>,
) -> ParsedApplication {
    let mut model = ApplicationModel::new(name);
    let mut report = ParseReport::default();
    let mut sources = BTreeMap::new();
    // flow id -> file of its first declaration
    let mut flow_files: HashMap<String, String> = HashMap::new();

    for document in documents {
        report.documents_parsed += 1;
        report
            .fingerprints
            .insert(document.file_name.clone(), document.fingerprint);
        report.diagnostics.extend(document.diagnostics);
        if let Some(source) = document.source {
            sources.insert(document.file_name.clone(), source);
        }

        for flow in document.flows {
            match flow_files.entry(flow.id.clone()) {
                Entry::Occupied(first) => {
                    let duplicate = DuplicateFlow {
                        flow_id: flow.id,
                        first_file: first.get().clone(),
                        duplicate_file: flow.file_name,
                    };
                    warn!(
                        "Duplicate flow '{}' in {} (first declared in {})",
                        duplicate.flow_id, duplicate.duplicate_file, duplicate.first_file
                    );
                    report.duplicate_flows.push(duplicate);
                }
                Entry::Vacant(slot) => {
                    slot.insert(flow.file_name.clone());
                    model.flows.push(flow);
                }
            }
        }

        for entry in document.global_configs {
            if let Err(duplicate) = model.insert_global_config(entry) {
                warn!(
                    "Duplicate global config '{}' in {} (first declared in {})",
                    duplicate.name, duplicate.duplicate_file, duplicate.first_file
                );
                report.duplicate_configs.push(duplicate);
            }
        }

        for (handler_name, handler) in document.global_error_handlers {
            if model.global_error_handlers.contains_key(&handler_name) {
                warn!(
                    "Duplicate global error handler '{}' in {}",
                    handler_name, document.file_name
                );
                continue;
            }
            model.global_error_handlers.insert(handler_name, handler);
        }

        if model.default_error_handler.is_none() {
            model.default_error_handler = document.default_error_handler;
        }
    }

    ParsedApplication {
        model,
        report,
        sources,
        metadata: ApplicationMetadata::default(),
    }
}

/// Drives the document parser over a directory or package archive
pub struct ParsingService {
    config: ParsingConfig,
    parser: DocumentParser,
    include: Vec<glob::Pattern>,
    exclude: Vec<glob::Pattern>,
}

impl ParsingService {
    pub fn new(config: ParsingConfig) -> Result<Self> {
        let compile = |patterns: &[String]| -> Result<Vec<glob::Pattern>> {
            patterns
                .iter()
                .map(|p| glob::Pattern::new(p).with_context(|| format!("invalid glob pattern '{}'", p)))
                .collect()
        };
        let include = compile(&config.include)?;
        let exclude = compile(&config.exclude)?;
        let parser = DocumentParser::new(config.namespace_table(), &config);

        Ok(Self {
            config,
            parser,
            include,
            exclude,
        })
    }

    pub fn config(&self) -> &ParsingConfig {
        &self.config
    }

    pub fn parser(&self) -> &DocumentParser {
        &self.parser
    }

    /// Parses an application from a project directory, a single document,
    /// or a `.jar`/`.zip` package
    pub fn parse_application(&self, input: &Path, name: &str) -> Result<ParsedApplication> {
        if !input.exists() {
            return Err(InputError::Missing(input.to_path_buf()).into());
        }

        if is_archive(input) {
            let extracted = extract_archive(input)?;
            let mut application = self.parse_directory(extracted.root(), name)?;
            application.metadata = self.metadata_of(extracted.archive_root());
            return Ok(application);
        }

        let mut application = self.parse_directory(input, name)?;
        if input.is_dir() {
            application.metadata = self.metadata_of(input);
        }
        Ok(application)
    }

    fn metadata_of(&self, root: &Path) -> ApplicationMetadata {
        if !self.config.collect_metadata {
            return ApplicationMetadata::default();
        }
        extract_metadata(root, &self.config.skip_directories)
    }

    /// Parses every document under `root` in lexical path order
    pub fn parse_directory(&self, root: &Path, name: &str) -> Result<ParsedApplication> {
        let start = Instant::now();
        let documents = self.find_documents(root)?;
        if documents.is_empty() {
            return Err(InputError::NoDocuments(root.to_path_buf()).into());
        }

        let outcomes = if self.config.parallel_parsing && documents.len() > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.worker_count())
                .build()
                .context("failed to build parser thread pool")?;
            pool.install(|| {
                documents
                    .par_iter()
                    .map(|path| self.parse_document(root, path))
                    .collect::<Vec<_>>()
            })
        } else {
            documents
                .iter()
                .map(|path| self.parse_document(root, path))
                .collect()
        };

        let mut parsed = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(document) => parsed.push(document),
                Err(e) => {
                    warn!("{}", e);
                    failures.push(DocumentFailure {
                        file_name: relative_name(root, e.path()),
                        error: e.to_string(),
                    });
                }
            }
        }

        if parsed.is_empty() {
            return Err(InputError::NothingParsed {
                path: root.to_path_buf(),
                failed: failures.len(),
            }
            .into());
        }

        let mut application = merge_documents(name, parsed);
        application.report.documents_found = documents.len();
        application.report.failures = failures;
        application.report.parse_duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Parsed {} of {} documents: {} flows, {} global configs",
            application.report.documents_parsed,
            application.report.documents_found,
            application.model.flows.len(),
            application.model.global_configs.len()
        );
        Ok(application)
    }

    pub fn parse_document(&self, root: &Path, path: &Path) -> Result<ParsedDocument, DocumentError> {
        self.parser.parse_file(path, &relative_name(root, path))
    }

    /// Documents under `root`, honouring skipped directories and globs,
    /// sorted by path
    pub fn find_documents(&self, root: &Path) -> Result<Vec<PathBuf>> {
        info!("Scanning directory: {}", root.display());
        let mut files = Vec::new();

        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !self.should_skip_directory(e));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() || !self.config.is_document(entry.path()) {
                continue;
            }
            let relative = relative_name(root, entry.path());
            if !self.is_selected(&relative) {
                debug!("Filtered out {}", relative);
                continue;
            }
            files.push(entry.into_path());
        }

        files.sort();
        info!("Found {} documents to parse", files.len());
        Ok(files)
    }

    fn should_skip_directory(&self, entry: &walkdir::DirEntry) -> bool {
        entry.file_type().is_dir()
            && entry
                .file_name()
                .to_str()
                .map(|name| self.config.should_skip_directory(name))
                .unwrap_or(false)
    }

    fn is_selected(&self, relative: &str) -> bool {
        let included = self.include.is_empty() || self.include.iter().any(|p| p.matches(relative));
        included && !self.exclude.iter().any(|p| p.matches(relative))
    }
}

/// Path of `path` relative to `root` with `/` separators; the bare file
/// name when `path` is the root itself
pub fn relative_name(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(relative) if !relative.as_os_str().is_empty() => relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        _ => path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string()),
    }
}
