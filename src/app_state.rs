use crate::catalog::Catalog;

use std::sync::Arc;

/// Shared application state passed to each request handler.
#[derive(Debug, Default)]
pub struct AppState {
    /// Statistics catalog. Empty until the artifact has been loaded.
    pub catalog: Catalog,
}

impl AppState {
    /// Create and return an [AppState] with nothing loaded.
    pub fn new() -> Self {
        Self::default()
    }
}

/// AppState wrapped in an Atomic Reference Count (Arc) to allow multiple references.
pub type SharedAppState = Arc<AppState>;
