//! Per-task operation handle: identity, auth claims, and cancellation.

use std::collections::HashMap;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Read-only context for one submitted task.
///
/// Cloning shares the cancellation token; [`child`](Self::child) derives a
/// token that is cancelled with its parent but can also be cancelled alone.
#[derive(Debug, Clone)]
pub struct TaskContext {
    tenant_id: String,
    user_id: Option<String>,
    request_id: String,
    source_ip: Option<String>,
    user_agent: Option<String>,
    auth_token: Option<String>,
    claims: HashMap<String, Value>,
    cancel: CancellationToken,
}

impl TaskContext {
    /// Context for `tenant_id` with a fresh request id and no claims.
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self::builder(tenant_id).build()
    }

    /// Start building a context.
    pub fn builder(tenant_id: impl Into<String>) -> TaskContextBuilder {
        TaskContextBuilder {
            ctx: Self {
                tenant_id: tenant_id.into(),
                user_id: None,
                request_id: Uuid::new_v4().to_string(),
                source_ip: None,
                user_agent: None,
                auth_token: None,
                claims: HashMap::new(),
                cancel: CancellationToken::new(),
            },
        }
    }

    /// Tenant the task belongs to.
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Submitting user, if known.
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Request identifier, also used as the task id.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Caller address, if known.
    pub fn source_ip(&self) -> Option<&str> {
        self.source_ip.as_deref()
    }

    /// Caller user agent, if known.
    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    /// Authentication token, if any.
    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    /// One claim by name.
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    /// Every claim.
    pub const fn claims(&self) -> &HashMap<String, Value> {
        &self.claims
    }

    /// Cancellation token for this task.
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fire the cancellation signal.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// True once cancellation has fired.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Same identity with a child cancellation token.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            ..self.clone()
        }
    }
}

/// Builder for [`TaskContext`].
#[derive(Debug)]
pub struct TaskContextBuilder {
    ctx: TaskContext,
}

impl TaskContextBuilder {
    /// Set the user id.
    #[must_use]
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.ctx.user_id = Some(user_id.into());
        self
    }

    /// Override the generated request id.
    #[must_use]
    pub fn request_id(mut self, request_id: impl Into<String>) -> Self {
        self.ctx.request_id = request_id.into();
        self
    }

    /// Set the caller address.
    #[must_use]
    pub fn source_ip(mut self, source_ip: impl Into<String>) -> Self {
        self.ctx.source_ip = Some(source_ip.into());
        self
    }

    /// Set the caller user agent.
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.ctx.user_agent = Some(user_agent.into());
        self
    }

    /// Set the authentication token.
    #[must_use]
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.ctx.auth_token = Some(token.into());
        self
    }

    /// Add one claim.
    #[must_use]
    pub fn claim(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ctx.claims.insert(name.into(), value.into());
        self
    }

    /// Use an existing cancellation token.
    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.ctx.cancel = token;
        self
    }

    /// Finish building.
    pub fn build(self) -> TaskContext {
        self.ctx
    }
}
