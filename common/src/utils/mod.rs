pub mod config;
pub mod embedding;
pub mod file_validation;
pub mod llm;
pub mod sanitize;
