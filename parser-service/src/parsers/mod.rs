pub mod classifier;
pub mod document;
pub mod error_handlers;
pub mod global_config;
pub mod namespaces;
pub mod processors;
pub mod source;

pub use classifier::{ElementClassifier, ElementKind};
pub use document::{DocumentParser, ParsedDocument};
pub use namespaces::NamespaceTable;
pub use processors::ProcessorExtractor;
pub use source::SourceExtractor;
