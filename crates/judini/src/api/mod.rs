//! API endpoint implementations.

mod agents;
mod chat;
mod documents;

pub use agents::AgentsApi;
pub use chat::{ChatApi, TextStream};
pub use documents::DocumentsApi;

use crate::error::{Error, Result};

/// Reject a blank identifier before any request is made.
pub(crate) fn require_id(kind: &str, id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(Error::Validation(format!("{} is required", kind)));
    }
    if id == "." || id == ".." {
        return Err(Error::Validation(format!("{} {:?} is not valid", kind, id)));
    }
    Ok(())
}

/// Join `resource` and an id into a path, keeping the id in one segment.
pub(crate) fn id_path(resource: &str, id: &str) -> String {
    format!("{}/{}", resource, urlencoding::encode(id))
}
