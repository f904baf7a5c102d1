use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw attribute bag of an element, keyed by attribute name
pub type Attributes = BTreeMap<String, String>;

/// Default for connector fields the configuration leaves out
pub const NOT_SPECIFIED: &str = "Not specified";
/// Stand-in code for a transform without a payload-setting child
pub const NO_TRANSFORMATION_CODE: &str = "No transformation code found";
/// Write mode assumed when a file operation does not declare one
pub const DEFAULT_WRITE_MODE: &str = "Overwrite";
/// Condition recorded for a `when` route without an expression
pub const NO_CONDITION: &str = "No condition";
/// Type name reported for every transform processor
pub const TRANSFORM_TYPE: &str = "dw-set-payload";

/// Triggering event kinds a top-level flow can start from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceType {
    #[serde(rename = "file-listener")]
    FileListener,
    #[serde(rename = "sftp-listener")]
    SftpListener,
    #[serde(rename = "http-listener")]
    HttpListener,
    #[serde(rename = "scheduler")]
    Scheduler,
    #[serde(rename = "unknown")]
    Unknown,
}

/// The trigger of a top-level flow, normalized across connector families
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    #[serde(rename = "type")]
    pub source_type: SourceType,
    /// Qualified tag of the element the source was read from
    pub element: String,
    pub attributes: Attributes,
}

impl Source {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Label used when grouping sources; unknown sources keep their tag
    pub fn type_label(&self) -> String {
        match self.source_type {
            SourceType::Unknown => self.element.clone(),
            other => other.to_label(),
        }
    }
}

/// One conditional branch of a choice router
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceRoute {
    pub condition: String,
    pub processors: Vec<Processor>,
}

/// Default branch of a choice router
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtherwiseRoute {
    pub processors: Vec<Processor>,
}

/// One step of flow execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Processor {
    Generic {
        element: String,
        attributes: Attributes,
    },
    Transform {
        element: String,
        code: String,
        attributes: Attributes,
    },
    FileOperation {
        element: String,
        path: String,
        mode: String,
        attributes: Attributes,
    },
    Choice {
        element: String,
        routes: Vec<ChoiceRoute>,
        otherwise: Option<OtherwiseRoute>,
        attributes: Attributes,
    },
    /// A container such as `foreach`, `try`, `async` or a batch step that
    /// runs a nested sequence. Only `try` carries its own error handler.
    Scope {
        element: String,
        processors: Vec<Processor>,
        error_handler: Option<ErrorHandler>,
        attributes: Attributes,
    },
}

impl Processor {
    pub fn element(&self) -> &str {
        match self {
            Processor::Generic { element, .. }
            | Processor::Transform { element, .. }
            | Processor::FileOperation { element, .. }
            | Processor::Choice { element, .. }
            | Processor::Scope { element, .. } => element,
        }
    }

    pub fn attributes(&self) -> &Attributes {
        match self {
            Processor::Generic { attributes, .. }
            | Processor::Transform { attributes, .. }
            | Processor::FileOperation { attributes, .. }
            | Processor::Choice { attributes, .. }
            | Processor::Scope { attributes, .. } => attributes,
        }
    }

    /// The processor type as shown in documentation
    pub fn type_name(&self) -> &str {
        match self {
            Processor::Transform { .. } => TRANSFORM_TYPE,
            Processor::Choice { .. } => "choice",
            other => other.element(),
        }
    }

    /// Looks up a field, preferring the named fields over the attribute bag
    pub fn attribute(&self, key: &str) -> Option<&str> {
        let named = match (self, key) {
            (Processor::Transform { code, .. }, "code") => Some(code.as_str()),
            (Processor::FileOperation { path, .. }, "path") => Some(path.as_str()),
            (Processor::FileOperation { mode, .. }, "mode") => Some(mode.as_str()),
            _ => None,
        };
        named.or_else(|| self.attributes().get(key).map(String::as_str))
    }
}

/// Depth-first, document-order walk over a processor sequence and every
/// sequence nested inside it: choice routes, scope bodies and the strategies
/// of a scope's error handler
pub struct ProcessorWalk<'a> {
    stack: Vec<std::slice::Iter<'a, Processor>>,
}

pub fn walk_processors(processors: &[Processor]) -> ProcessorWalk<'_> {
    ProcessorWalk {
        stack: vec![processors.iter()],
    }
}

impl<'a> ProcessorWalk<'a> {
    // pushed last strategy first so the first one is visited first
    fn push_strategies(&mut self, handler: Option<&'a ErrorHandler>) {
        if let Some(handler) = handler {
            for strategy in handler.handlers.iter().rev() {
                self.stack.push(strategy.steps.iter());
            }
        }
    }
}

impl<'a> Iterator for ProcessorWalk<'a> {
    type Item = &'a Processor;

    fn next(&mut self) -> Option<&'a Processor> {
        loop {
            let top = self.stack.last_mut()?;
            match top.next() {
                Some(processor) => {
                    match processor {
                        Processor::Choice { routes, otherwise, .. } => {
                            if let Some(otherwise) = otherwise {
                                self.stack.push(otherwise.processors.iter());
                            }
                            for route in routes.iter().rev() {
                                self.stack.push(route.processors.iter());
                            }
                        }
                        Processor::Scope {
                            processors,
                            error_handler,
                            ..
                        } => {
                            self.push_strategies(error_handler.as_ref());
                            self.stack.push(processors.iter());
                        }
                        _ => {}
                    }
                    return Some(processor);
                }
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorStrategyKind {
    #[serde(rename = "on-error-continue")]
    OnErrorContinue,
    #[serde(rename = "on-error-propagate")]
    OnErrorPropagate,
}

/// A single on-error-* strategy inside an error handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorStrategy {
    #[serde(rename = "type")]
    pub kind: ErrorStrategyKind,
    pub error_type: Option<String>,
    pub when: Option<String>,
    /// Types of the processors run by this strategy, in order
    pub processors: Vec<String>,
    /// The processors themselves, with any nested routes and scopes
    #[serde(default)]
    pub steps: Vec<Processor>,
}

impl ErrorStrategy {
    /// Error type names this strategy matches; `type` may list several
    /// separated by commas
    pub fn error_types(&self) -> impl Iterator<Item = &str> {
        self.error_type
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Error handler attached to a flow or declared globally
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ErrorHandler {
    pub name: Option<String>,
    /// Name of the global handler this one delegates to
    pub reference: Option<String>,
    pub handlers: Vec<ErrorStrategy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConnectorFamily {
    #[serde(rename = "file")]
    File,
    #[serde(rename = "sftp")]
    Sftp,
    #[serde(rename = "http")]
    Http,
}

/// Type-specific fields of a global connector configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum GlobalConfig {
    File {
        working_directory: String,
    },
    Sftp {
        host: String,
        port: String,
        username: String,
    },
    HttpListener {
        host: String,
        port: String,
        base_path: String,
    },
    HttpRequest {
        host: String,
        port: String,
        protocol: String,
        base_path: String,
    },
}

impl GlobalConfig {
    pub fn family(&self) -> ConnectorFamily {
        match self {
            GlobalConfig::File { .. } => ConnectorFamily::File,
            GlobalConfig::Sftp { .. } => ConnectorFamily::Sftp,
            GlobalConfig::HttpListener { .. } | GlobalConfig::HttpRequest { .. } => {
                ConnectorFamily::Http
            }
        }
    }
}

/// A named global configuration block and the document it came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfigEntry {
    pub name: String,
    pub file_name: String,
    #[serde(flatten)]
    pub config: GlobalConfig,
}

/// A named unit of integration logic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub id: String,
    pub description: Option<String>,
    pub is_subflow: bool,
    pub source: Option<Source>,
    pub processors: Vec<Processor>,
    pub error_handler: Option<ErrorHandler>,
    pub file_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowCategory {
    #[serde(rename = "source")]
    Source,
    #[serde(rename = "subflow")]
    Subflow,
    #[serde(rename = "intermediate")]
    Intermediate,
}

impl Flow {
    /// Walks every processor the flow can run: its own sequence first, then
    /// the steps of its error-handler strategies
    pub fn walk(&self) -> ProcessorWalk<'_> {
        let mut walk = ProcessorWalk { stack: Vec::new() };
        walk.push_strategies(self.error_handler.as_ref());
        walk.stack.push(self.processors.iter());
        walk
    }

    pub fn category(&self) -> FlowCategory {
        if self.is_subflow {
            FlowCategory::Subflow
        } else if self.source.is_some() {
            FlowCategory::Source
        } else {
            FlowCategory::Intermediate
        }
    }
}

/// A second flow declared under an id that is already taken
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateFlow {
    pub flow_id: String,
    pub first_file: String,
    pub duplicate_file: String,
}

/// A second global configuration declared under a name that is already taken
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateConfig {
    pub name: String,
    pub first_file: String,
    pub duplicate_file: String,
}

/// Root aggregate of everything recovered from an application's documents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationModel {
    pub name: String,
    /// Flows in discovery order
    pub flows: Vec<Flow>,
    pub global_configs: BTreeMap<String, GlobalConfigEntry>,
    pub global_error_handlers: BTreeMap<String, ErrorHandler>,
    /// Global handler applied to flows that declare none
    pub default_error_handler: Option<String>,
}

impl ApplicationModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn flow(&self, id: &str) -> Option<&Flow> {
        self.flows.iter().find(|flow| flow.id == id)
    }

    /// Adds a flow unless its id is taken; the first flow always wins
    pub fn insert_flow(&mut self, flow: Flow) -> Result<(), DuplicateFlow> {
        if let Some(existing) = self.flow(&flow.id) {
            return Err(DuplicateFlow {
                flow_id: flow.id,
                first_file: existing.file_name.clone(),
                duplicate_file: flow.file_name,
            });
        }
        self.flows.push(flow);
        Ok(())
    }

    pub fn insert_global_config(&mut self, entry: GlobalConfigEntry) -> Result<(), DuplicateConfig> {
        if let Some(existing) = self.global_configs.get(&entry.name) {
            return Err(DuplicateConfig {
                name: entry.name,
                first_file: existing.file_name.clone(),
                duplicate_file: entry.file_name,
            });
        }
        self.global_configs.insert(entry.name.clone(), entry);
        Ok(())
    }

    pub fn configs_of(&self, family: ConnectorFamily) -> impl Iterator<Item = &GlobalConfigEntry> {
        self.global_configs
            .values()
            .filter(move |entry| entry.config.family() == family)
    }

    pub fn source_flows(&self) -> impl Iterator<Item = &Flow> {
        self.flows
            .iter()
            .filter(|flow| flow.category() == FlowCategory::Source)
    }

    pub fn subflows(&self) -> impl Iterator<Item = &Flow> {
        self.flows
            .iter()
            .filter(|flow| flow.category() == FlowCategory::Subflow)
    }
}

/// Parse diagnostic information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseDiagnostic {
    pub severity: DiagnosticSeverity,
    pub message: String,
    pub file_path: String,
    pub flow_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Info,
    Hint,
}

// String conversion for labels shown in reports and histograms
fn serde_label<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|_| "unknown".to_string())
        .trim_matches('"')
        .to_string()
}

macro_rules! impl_label {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $ty {
                /// Convert to its serialized label
                pub fn to_label(&self) -> String {
                    serde_label(self)
                }

                /// Parse from a serialized label
                pub fn from_label(s: &str) -> Result<Self, serde_json::Error> {
                    serde_json::from_str(&format!("\"{}\"", s))
                }
            }

            impl std::fmt::Display for $ty {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    write!(f, "{}", self.to_label())
                }
            }
        )*
    };
}

impl_label!(SourceType, ErrorStrategyKind, ConnectorFamily, FlowCategory);

#[cfg(test)]
mod tests {
    use super::*;

    fn generic(element: &str) -> Processor {
        Processor::Generic {
            element: element.to_string(),
            attributes: Attributes::new(),
        }
    }

    #[test]
    fn test_labels_round_trip_through_serde_names() {
        assert_eq!(SourceType::HttpListener.to_label(), "http-listener");
        assert_eq!(SourceType::from_label("scheduler").unwrap(), SourceType::Scheduler);
        assert_eq!(ErrorStrategyKind::OnErrorPropagate.to_string(), "on-error-propagate");
        assert!(FlowCategory::from_label("nonsense").is_err());
    }

    #[test]
    fn test_walk_visits_nested_routes_in_document_order() {
        let choice = Processor::Choice {
            element: "choice".to_string(),
            routes: vec![
                ChoiceRoute {
                    condition: "#[a]".to_string(),
                    processors: vec![generic("a1"), generic("a2")],
                },
                ChoiceRoute {
                    condition: "#[b]".to_string(),
                    processors: vec![generic("b1")],
                },
            ],
            otherwise: Some(OtherwiseRoute {
                processors: vec![generic("o1")],
            }),
            attributes: Attributes::new(),
        };
        let sequence = vec![generic("first"), choice, generic("last")];

        let visited: Vec<&str> = walk_processors(&sequence).map(Processor::element).collect();
        assert_eq!(visited, vec!["first", "choice", "a1", "a2", "b1", "o1", "last"]);
    }

    fn strategy(error_type: Option<&str>, steps: Vec<Processor>) -> ErrorStrategy {
        ErrorStrategy {
            kind: ErrorStrategyKind::OnErrorContinue,
            error_type: error_type.map(str::to_string),
            when: None,
            processors: steps.iter().map(|p| p.type_name().to_string()).collect(),
            steps,
        }
    }

    #[test]
    fn test_walk_enters_scopes_and_their_handlers() {
        let guarded = Processor::Scope {
            element: "try".to_string(),
            processors: vec![generic("t1")],
            error_handler: Some(ErrorHandler {
                handlers: vec![strategy(None, vec![generic("h1")]), strategy(None, vec![generic("h2")])],
                ..Default::default()
            }),
            attributes: Attributes::new(),
        };
        let foreach = Processor::Scope {
            element: "foreach".to_string(),
            processors: vec![generic("f1"), guarded],
            error_handler: None,
            attributes: Attributes::new(),
        };
        let sequence = vec![foreach, generic("last")];

        let visited: Vec<&str> = walk_processors(&sequence).map(Processor::type_name).collect();
        assert_eq!(visited, vec!["foreach", "f1", "try", "t1", "h1", "h2", "last"]);
    }

    #[test]
    fn test_flow_walk_includes_handler_steps() {
        let flow = Flow {
            id: "f".to_string(),
            description: None,
            is_subflow: false,
            source: None,
            processors: vec![generic("body")],
            error_handler: Some(ErrorHandler {
                handlers: vec![strategy(Some("HTTP:CONNECTIVITY, HTTP:TIMEOUT"), vec![generic("recover")])],
                ..Default::default()
            }),
            file_name: "app.xml".to_string(),
        };
        let visited: Vec<&str> = flow.walk().map(Processor::element).collect();
        assert_eq!(visited, vec!["body", "recover"]);

        let types: Vec<&str> = flow.error_handler.as_ref().unwrap().handlers[0].error_types().collect();
        assert_eq!(types, vec!["HTTP:CONNECTIVITY", "HTTP:TIMEOUT"]);
    }

    #[test]
    fn test_named_fields_take_precedence_over_attributes() {
        let mut attributes = Attributes::new();
        attributes.insert("path".to_string(), "from-bag".to_string());
        attributes.insert("config-ref".to_string(), "File_Config".to_string());
        let write = Processor::FileOperation {
            element: "file:write".to_string(),
            path: "out/report.csv".to_string(),
            mode: DEFAULT_WRITE_MODE.to_string(),
            attributes,
        };

        assert_eq!(write.attribute("path"), Some("out/report.csv"));
        assert_eq!(write.attribute("config-ref"), Some("File_Config"));
        assert_eq!(write.type_name(), "file:write");
    }

    #[test]
    fn test_insert_flow_keeps_first_occurrence() {
        let flow = |file: &str| Flow {
            id: "dup".to_string(),
            description: None,
            is_subflow: false,
            source: None,
            processors: vec![],
            error_handler: None,
            file_name: file.to_string(),
        };
        let mut model = ApplicationModel::new("app");
        assert!(model.insert_flow(flow("a.xml")).is_ok());
        let duplicate = model.insert_flow(flow("b.xml")).unwrap_err();

        assert_eq!(duplicate.first_file, "a.xml");
        assert_eq!(duplicate.duplicate_file, "b.xml");
        assert_eq!(model.flows.len(), 1);
        assert_eq!(model.flows[0].file_name, "a.xml");
    }
}
