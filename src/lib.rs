//! Formatting-safe correction of .docx documents.
//!
//! Layers, outermost first:
//!
//! 1. [`cli`]: command line
//! 2. [`application`]: configuration and the correction run
//! 3. [`domain`]: units, modifications, seam traits
//! 4. [`data`]: .docx container, XML parts, validation
//! 5. [`engine`]: tokenizer, reconstructor, cache, pipeline, scheduler
//! 6. [`infra`]: backups, cache store, reports, providers

pub mod cli;
pub mod application;
pub mod domain;
pub mod data;
pub mod engine;
pub mod infra;
