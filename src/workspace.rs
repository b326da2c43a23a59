//! Workspace context manager.
//!
//! Every tool call runs inside a draft workspace of the acting user. The first call of a
//! user either picks the lowest-uid workspace they own or belong to, or creates one; the
//! choice is cached per user for the lifetime of the process.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::engine::{EngineError, SharedBackend};
use crate::identity::RequestContext;

pub struct WorkspaceManager {
    backend: SharedBackend,
    title_prefix: String,
    // Held across lookup and creation so concurrent first calls agree on one workspace.
    by_user: Mutex<HashMap<String, u32>>,
}

impl WorkspaceManager {
    pub fn new(backend: SharedBackend, title_prefix: impl Into<String>) -> Self {
        Self { backend, title_prefix: title_prefix.into(), by_user: Mutex::new(HashMap::new()) }
    }

    pub fn current_workspace(&self, ctx: &RequestContext) -> u32 { ctx.workspace }

    /// Move `ctx` out of live into the user's draft workspace. Idempotent.
    pub fn switch_to_optimal_workspace(&self, ctx: &mut RequestContext) -> Result<u32, EngineError> {
        if ctx.workspace > 0 { return Ok(ctx.workspace); }
        let user = ctx.user_id().to_string();
        let mut cache = self.by_user.lock();
        if let Some(ws) = cache.get(&user).copied() {
            ctx.workspace = ws;
            return Ok(ws);
        }
        let existing = self.backend.workspaces().into_iter()
            .filter(|w| w.owners.iter().chain(w.members.iter()).any(|u| *u == user))
            .map(|w| w.uid)
            .min();
        let ws = match existing {
            Some(uid) => {
                debug!(target: "cmsbridge::workspace", "reusing workspace {} for '{}'", uid, user);
                uid
            }
            None => {
                let title = format!("{} ({})", self.title_prefix, user);
                let created = self.backend.create_workspace(&title, &user)?;
                info!(target: "cmsbridge::workspace", "created workspace {} '{}' for '{}'", created.uid, created.title, user);
                created.uid
            }
        };
        cache.insert(user, ws);
        ctx.workspace = ws;
        Ok(ws)
    }
}
