//! Infrastructure wiring for the HTTP layer.

use std::sync::Arc;

use atrium_infra::{AccessService, store::AccessStore};

/// Shared service bundle injected into every handler.
pub struct AppServices {
    pub access: AccessService,
}

pub fn build_services(store: Arc<dyn AccessStore>) -> AppServices {
    AppServices {
        access: AccessService::new(store),
    }
}
