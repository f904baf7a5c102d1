pub mod archive;
pub mod parsing_service;

pub use parsing_service::{DocumentFailure, ParseReport, ParsedApplication, ParsingService};
