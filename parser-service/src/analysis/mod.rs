pub mod cross_reference;
pub mod dataweave;
pub mod environment;
pub mod flow_graph;
pub mod metadata;
pub mod profile;

pub use cross_reference::{CrossReferenceIndex, DanglingReference, FlowStatistics, TryScopeSummary};
pub use dataweave::{scan_model, scan_dwl_files, TransformationSummary};
pub use environment::{
    compare_environments, config_differences, load_environments, EnvironmentConfig, PropertyCategory,
};
pub use flow_graph::FlowGraph;
pub use metadata::{extract_metadata, ApplicationMetadata};
pub use profile::{flow_formats, infer_purpose, ApplicationPurpose, DataFormat, FlowFormats};
