use super::Principal;

/// Explicit per-request state: who is acting and in which workspace.
/// Nothing about the active workspace lives in globals; components receive this by reference.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub principal: Option<Principal>,
    pub request_id: Option<String>,
    /// Active workspace id; 0 is live.
    pub workspace: u32,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self { principal: None, request_id: None, workspace: 0 }
    }
}

impl RequestContext {
    pub fn for_principal(principal: Principal) -> Self {
        Self {
            principal: Some(principal),
            request_id: Some(uuid::Uuid::new_v4().to_string()),
            workspace: 0,
        }
    }

    pub fn user_id(&self) -> &str {
        self.principal.as_ref().map(|p| p.user_id.as_str()).unwrap_or("anonymous")
    }

    pub fn is_admin(&self) -> bool {
        self.principal.as_ref().map(|p| p.is_admin()).unwrap_or(false)
    }

    pub fn is_live(&self) -> bool { self.workspace == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_context_starts_live_with_request_id() {
        let ctx = RequestContext::for_principal(Principal::admin("editor"));
        assert!(ctx.is_live());
        assert!(ctx.is_admin());
        assert_eq!(ctx.user_id(), "editor");
        assert!(ctx.request_id.as_deref().map(|s| !s.is_empty()).unwrap_or(false));
    }

    #[test]
    fn anonymous_context_is_not_admin() {
        let ctx = RequestContext::default();
        assert_eq!(ctx.user_id(), "anonymous");
        assert!(!ctx.is_admin());
    }
}
