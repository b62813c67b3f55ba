// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Tenant context propagation
//!
//! Every storage operation is attributed to exactly one `(tenant, environment)`
//! pair. The pair travels with the executing task through a tokio task-local,
//! so two requests running concurrently in the same process never observe each
//! other's binding, even when one of them is suspended mid-body.
//!
//! ```rust,ignore
//! use cdp_core::context::{current_context, with_context, Context};
//!
//! let ctx = Context::new("acme", true);
//! let alias = with_context(ctx, async {
//!     resolver.resolve_alias(LogicalIndex::Event)
//! })
//! .await?;
//! ```
//!
//! Scopes nest as a stack: entering a second scope shadows the first and
//! leaving it restores exactly the previous binding. Restoration happens on
//! every exit path, including panics and a dropped (cancelled) future.

use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Tenant used by the process-default context
pub const DEFAULT_TENANT: &str = "default";

tokio::task_local! {
    static CURRENT: Context;
}

/// User on whose behalf the current request runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            roles: Vec::new(),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Immutable `(tenant, environment, acting user)` triple
///
/// Switching environment or user produces a new value; the original is left
/// untouched so a binding held by another scope never changes under it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    tenant: String,
    production: bool,
    user: Option<User>,
    /// Correlation id, fresh per constructed context
    id: String,
}

impl Context {
    /// Create a context for a tenant and environment
    pub fn new(tenant: impl Into<String>, production: bool) -> Self {
        Self {
            tenant: tenant.into(),
            production,
            user: None,
            id: Uuid::new_v4().to_string(),
        }
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn is_production(&self) -> bool {
        self.production
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    /// Correlation id of this context
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Same tenant and user, production environment
    pub fn production(&self) -> Self {
        self.switch_environment(true)
    }

    /// Same tenant and user, staging environment
    pub fn staging(&self) -> Self {
        self.switch_environment(false)
    }

    /// Same tenant and user with the production flag set to `production`
    pub fn switch_environment(&self, production: bool) -> Self {
        Self {
            production,
            ..self.clone()
        }
    }

    /// Same tenant and environment acting as `user`
    pub fn with_user(&self, user: User) -> Self {
        Self {
            user: Some(user),
            ..self.clone()
        }
    }

    /// Stable cache-key fragment identifying tenant and environment
    pub fn key(&self) -> String {
        format!(
            "{}:{}",
            self.tenant,
            if self.production { "prod" } else { "staging" }
        )
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(DEFAULT_TENANT, false)
    }
}

/// Context identity ignores the correlation id
impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.tenant == other.tenant && self.production == other.production && self.user == other.user
    }
}

impl Eq for Context {}

/// Run `body` with `ctx` bound to the current task
pub async fn with_context<F>(ctx: Context, body: F) -> F::Output
where
    F: Future,
{
    CURRENT.scope(ctx, body).await
}

/// Run a synchronous `body` with `ctx` bound
pub fn with_context_sync<R>(ctx: Context, body: impl FnOnce() -> R) -> R {
    CURRENT.sync_scope(ctx, body)
}

/// Innermost bound context, or `Context::default()` outside any scope
pub fn current_context() -> Context {
    CURRENT
        .try_with(|ctx| ctx.clone())
        .unwrap_or_default()
}

/// Whether a context scope is active for the current task
pub fn is_bound() -> bool {
    CURRENT.try_with(|_| ()).is_ok()
}

/// Correlation id of the bound context; `None` when no scope was entered
pub fn context_id() -> Option<String> {
    CURRENT.try_with(|ctx| ctx.id.clone()).ok()
}

/// Spawn `future` on the runtime carrying the caller's current binding
///
/// Task-locals are not inherited by `tokio::spawn`; this re-binds the
/// context inside the new task. Outside a scope the task runs unbound.
pub fn spawn_with_context<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match CURRENT.try_with(|ctx| ctx.clone()) {
        Ok(ctx) => tokio::spawn(CURRENT.scope(ctx, future)),
        Err(_) => tokio::spawn(future),
    }
}
