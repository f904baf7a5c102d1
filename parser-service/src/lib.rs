pub mod analysis;
pub mod bundle;
pub mod config;
pub mod error;
pub mod parsers;
pub mod services;

// Re-export commonly used types
pub use crate::analysis::{CrossReferenceIndex, FlowGraph};
pub use crate::bundle::DocumentationBundle;
pub use crate::config::{FlowRefRule, ParsingConfig};
pub use crate::error::{DocumentError, InputError};
pub use crate::parsers::{DocumentParser, NamespaceTable};
pub use crate::services::{ParsedApplication, ParsingService};
