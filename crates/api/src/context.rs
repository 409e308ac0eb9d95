use atrium_core::UserId;

/// Principal context for a request (the authenticated identity).
///
/// Roles and permissions are deliberately NOT carried here: they are resolved
/// per request against the store, so a revocation takes effect immediately
/// instead of living on in old tokens.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    user_id: UserId,
}

impl PrincipalContext {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}
