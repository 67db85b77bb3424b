use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::IgnisError;

/// The user payload attached to a request after authentication succeeds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CurrentUser {
    pub user_id: Option<String>,
    pub claims: Map<String, Value>,
}

impl CurrentUser {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            claims: Map::new(),
        }
    }

    pub fn with_claims(mut self, claims: Map<String, Value>) -> Self {
        self.claims = claims;
        self
    }
}

/// Transport-agnostic request context handed to middleware and handlers.
///
/// The concrete HTTP adapter populates it from the wire request; the core
/// only reads headers/params and carries the current-user marker.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub method: String,
    pub path: String,
    headers: HashMap<String, String>,
    pub path_params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Option<Value>,
    current_user: Option<CurrentUser>,
}

impl RequestContext {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    /// Set a header. Names are case-insensitive.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// The current-user marker, set by the authentication middleware.
    pub fn current_user(&self) -> Option<&CurrentUser> {
        self.current_user.as_ref()
    }

    pub fn set_current_user(&mut self, user: CurrentUser) {
        self.current_user = Some(user);
    }
}

/// Result of a route handler: a status code and a JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerResponse {
    pub status: u16,
    pub body: Value,
}

impl HandlerResponse {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn created(body: Value) -> Self {
        Self { status: 201, body }
    }

    pub fn no_content() -> Self {
        Self {
            status: 204,
            body: Value::Null,
        }
    }
}

/// A request-path interceptor. Auth middleware and route-level middleware
/// both implement this; they run in order before the handler.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, ctx: &mut RequestContext) -> Result<(), IgnisError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_are_case_insensitive() {
        let ctx = RequestContext::new("get", "/ping").with_header("Authorization", "Bearer x");
        assert_eq!(ctx.header("authorization"), Some("Bearer x"));
        assert_eq!(ctx.header("AUTHORIZATION"), Some("Bearer x"));
        assert_eq!(ctx.header("x-other"), None);
    }

    #[test]
    fn current_user_round_trip() {
        let mut ctx = RequestContext::new("get", "/me");
        assert!(ctx.current_user().is_none());
        ctx.set_current_user(CurrentUser::new("u1"));
        assert_eq!(
            ctx.current_user().and_then(|u| u.user_id.as_deref()),
            Some("u1")
        );
    }
}
