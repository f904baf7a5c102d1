use serde::{Deserialize, Serialize};
use shared_types::{ApplicationModel, Flow, Processor, SourceType};
use std::collections::BTreeMap;

/// Payload format a flow consumes or produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataFormat {
    #[serde(rename = "JSON")]
    Json,
    #[serde(rename = "XML")]
    Xml,
    #[serde(rename = "CSV")]
    Csv,
    Text,
    Unknown,
}

// Checked in order; a script mentioning several types takes the first
const SCRIPT_TYPES: &[(&str, DataFormat)] = &[
    ("application/json", DataFormat::Json),
    ("application/xml", DataFormat::Xml),
    ("application/csv", DataFormat::Csv),
];

impl DataFormat {
    /// Format named by a file extension, as in `orders.csv` or `*.json`
    pub fn from_file_name(name: &str) -> Option<Self> {
        let extension = name.rsplit_once('.')?.1.to_lowercase();
        match extension.as_str() {
            "json" => Some(DataFormat::Json),
            "xml" => Some(DataFormat::Xml),
            "csv" => Some(DataFormat::Csv),
            "txt" => Some(DataFormat::Text),
            _ => None,
        }
    }

    /// Format a DataWeave script mentions. Anything that is not a script,
    /// such as a `.dwl` resource path, has none.
    pub fn from_script(code: &str) -> Option<Self> {
        if !code.trim_start().starts_with("%dw") {
            return None;
        }
        SCRIPT_TYPES
            .iter()
            .find(|(mime, _)| code.contains(mime))
            .map(|(_, format)| *format)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowFormats {
    pub input: DataFormat,
    pub output: DataFormat,
}

/// What an application as a whole appears to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplicationPurpose {
    #[serde(rename = "File Transfer/Transformation")]
    FileTransfer,
    #[serde(rename = "API Service")]
    ApiService,
    #[serde(rename = "File Import")]
    FileImport,
    #[serde(rename = "File Export")]
    FileExport,
    #[serde(rename = "Unknown Purpose")]
    Unknown,
}

impl std::fmt::Display for ApplicationPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ApplicationPurpose::FileTransfer => "File Transfer/Transformation",
            ApplicationPurpose::ApiService => "API Service",
            ApplicationPurpose::FileImport => "File Import",
            ApplicationPurpose::FileExport => "File Export",
            ApplicationPurpose::Unknown => "Unknown Purpose",
        };
        f.write_str(label)
    }
}

/// Input and output formats of a flow.
///
/// The input comes from the first transform whose script names a type,
/// falling back to the file pattern of a file or SFTP trigger. The output
/// comes from the first file write whose path has a known extension,
/// falling back to the last transform that names a type.
pub fn flow_formats(flow: &Flow) -> FlowFormats {
    let scripts: Vec<DataFormat> = flow
        .walk()
        .filter_map(|p| match p {
            Processor::Transform { code, .. } => DataFormat::from_script(code),
            _ => None,
        })
        .collect();

    let input = scripts
        .first()
        .copied()
        .or_else(|| {
            let source = flow.source.as_ref()?;
            match source.source_type {
                SourceType::FileListener | SourceType::SftpListener => {
                    DataFormat::from_file_name(source.attribute("pattern")?)
                }
                _ => None,
            }
        })
        .unwrap_or(DataFormat::Unknown);

    let output = flow
        .walk()
        .find_map(|p| match p {
            Processor::FileOperation { path, .. } => DataFormat::from_file_name(path),
            _ => None,
        })
        .or_else(|| scripts.last().copied())
        .unwrap_or(DataFormat::Unknown);

    FlowFormats { input, output }
}

pub fn all_flow_formats(model: &ApplicationModel) -> BTreeMap<String, FlowFormats> {
    model
        .flows
        .iter()
        .map(|flow| (flow.id.clone(), flow_formats(flow)))
        .collect()
}

/// Guesses the application's purpose from its triggers and file writes
pub fn infer_purpose(model: &ApplicationModel) -> ApplicationPurpose {
    let mut file_input = false;
    let mut file_output = false;
    let mut http = false;

    for flow in &model.flows {
        match flow.source.as_ref().map(|s| s.source_type) {
            Some(SourceType::FileListener | SourceType::SftpListener) => file_input = true,
            Some(SourceType::HttpListener) => http = true,
            _ => {}
        }
        file_output |= flow
            .walk()
            .any(|p| matches!(p, Processor::FileOperation { .. }));
    }

    match (file_input, file_output, http) {
        (true, true, _) => ApplicationPurpose::FileTransfer,
        (_, _, true) => ApplicationPurpose::ApiService,
        (true, false, _) => ApplicationPurpose::FileImport,
        (false, true, _) => ApplicationPurpose::FileExport,
        _ => ApplicationPurpose::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{Attributes, Source, DEFAULT_WRITE_MODE};

    fn transform(code: &str) -> Processor {
        Processor::Transform {
            element: "ee:transform".to_string(),
            code: code.to_string(),
            attributes: Attributes::new(),
        }
    }

    fn write(path: &str) -> Processor {
        Processor::FileOperation {
            element: "sftp:write".to_string(),
            path: path.to_string(),
            mode: DEFAULT_WRITE_MODE.to_string(),
            attributes: Attributes::new(),
        }
    }

    fn flow(source: Option<(SourceType, &str)>, processors: Vec<Processor>) -> Flow {
        Flow {
            id: "f".to_string(),
            description: None,
            is_subflow: false,
            source: source.map(|(source_type, pattern)| Source {
                source_type,
                element: "file:listener".to_string(),
                attributes: Attributes::from([("pattern".to_string(), pattern.to_string())]),
            }),
            processors,
            error_handler: None,
            file_name: "app.xml".to_string(),
        }
    }

    fn model(flows: Vec<Flow>) -> ApplicationModel {
        ApplicationModel {
            flows,
            ..ApplicationModel::new("app")
        }
    }

    #[test]
    fn test_formats_from_scripts() {
        let f = flow(
            None,
            vec![
                transform("%dw 2.0\noutput application/xml\n---\npayload"),
                transform("dwl/ignored.dwl"),
                transform("%dw 2.0\noutput application/csv\n---\npayload"),
            ],
        );
        assert_eq!(
            flow_formats(&f),
            FlowFormats {
                input: DataFormat::Xml,
                output: DataFormat::Csv
            }
        );
    }

    #[test]
    fn test_formats_from_trigger_pattern_and_write_path() {
        let f = flow(Some((SourceType::SftpListener, "*.CSV")), vec![write("/out/orders.json")]);
        let formats = flow_formats(&f);
        assert_eq!(formats.input, DataFormat::Csv);
        assert_eq!(formats.output, DataFormat::Json);

        let bare = flow(Some((SourceType::HttpListener, "x.json")), vec![]);
        assert_eq!(flow_formats(&bare).input, DataFormat::Unknown);
        assert_eq!(flow_formats(&bare).output, DataFormat::Unknown);
    }

    #[test]
    fn test_purpose() {
        let file_in = || flow(Some((SourceType::FileListener, "*.txt")), vec![]);
        let http_in = || flow(Some((SourceType::HttpListener, "")), vec![]);
        let writer = || flow(None, vec![write("out.txt")]);

        assert_eq!(infer_purpose(&model(vec![file_in(), writer()])), ApplicationPurpose::FileTransfer);
        assert_eq!(infer_purpose(&model(vec![http_in(), file_in()])), ApplicationPurpose::ApiService);
        assert_eq!(infer_purpose(&model(vec![file_in()])), ApplicationPurpose::FileImport);
        assert_eq!(infer_purpose(&model(vec![writer()])), ApplicationPurpose::FileExport);
        assert_eq!(infer_purpose(&model(vec![])), ApplicationPurpose::Unknown);
        assert_eq!(ApplicationPurpose::ApiService.to_string(), "API Service");
    }
}
