//! Contract for the downstream PDF renderer. Rendering itself is an
//! external collaborator and out of scope here; this is the seam the
//! orchestrator's merged markdown is handed across.

use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// Converts the final merged markdown into a PDF at `output_path`.
#[async_trait]
pub trait PdfRenderer: Send + Sync {
    async fn render(&self, markdown: &str, output_path: &Path) -> Result<()>;
}
