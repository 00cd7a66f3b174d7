//! # certforge – batch certificate renderer
//!
//! Stamps recipient names from a CSV file onto a template image and streams
//! one PNG per name into a ZIP archive. The pipeline stages are:
//!
//! 1. **Validate** – decode the template and enforce its size limit ([`template`])
//! 2. **Extract** – read first-column names from the CSV ([`names`])
//! 3. **Render** – draw each name onto a copy of the template ([`render`])
//! 4. **Stream** – append each PNG to a ZIP written to the sink ([`archive`])
//!
//! [`pipeline`] sequences the stages for one batch and owns cleanup of the
//! uploaded files.

pub mod archive;
pub mod error;
pub mod fonts;
pub mod names;
pub mod pipeline;
pub mod render;
pub mod settings;
pub mod template;

// Re-exports for convenience
pub use error::{BatchError, BatchResult};
pub use pipeline::{Batch, BatchInputs, BatchReport, BatchState, Pipeline};
pub use settings::{PipelineConfig, RenderSettings};
