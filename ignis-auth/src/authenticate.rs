use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use ignis_core::{
    Application, AuthMode, AuthenticateSpec, CurrentUser, IgnisError, Middleware, RequestContext,
};

use crate::strategy::StrategyRegistry;

/// Build the authentication middleware for a route's `authenticate` spec.
///
/// `mode=any`: the first strategy to produce a user wins. `mode=all`:
/// every strategy must succeed and the last user wins. Total failure is
/// `kind=unauthenticated`, listing the strategies tried.
pub fn authenticate(
    registry: Arc<StrategyRegistry>,
    spec: AuthenticateSpec,
) -> Arc<dyn Middleware> {
    Arc::new(AuthenticateMiddleware { registry, spec })
}

/// Install the auth middleware factory on an application so that routes
/// declaring `authenticate` get wired automatically at mount time.
pub fn install(app: &Application, registry: Arc<StrategyRegistry>) {
    app.set_auth_middleware_factory(Arc::new(move |spec| {
        authenticate(registry.clone(), spec.clone())
    }));
}

struct AuthenticateMiddleware {
    registry: Arc<StrategyRegistry>,
    spec: AuthenticateSpec,
}

impl AuthenticateMiddleware {
    async fn run_strategy(
        &self,
        name: &str,
        ctx: &RequestContext,
    ) -> Result<Option<CurrentUser>, IgnisError> {
        let Some(strategy) = self.registry.get(name) else {
            debug!(strategy = %name, "strategy not registered");
            return Ok(None);
        };
        if strategy.extract_credentials(ctx).await.is_none() {
            debug!(strategy = %name, "request not recognized by strategy");
            return Ok(None);
        }
        strategy.authenticate(ctx).await
    }

    fn failure(&self) -> IgnisError {
        IgnisError::unauthenticated("No authentication strategy accepted the request")
            .with_details(json!({ "strategies": self.spec.strategies }))
    }
}

#[async_trait]
impl Middleware for AuthenticateMiddleware {
    async fn handle(&self, ctx: &mut RequestContext) -> Result<(), IgnisError> {
        match self.spec.mode {
            AuthMode::Any => {
                for name in &self.spec.strategies {
                    match self.run_strategy(name, ctx).await {
                        Ok(Some(user)) => {
                            ctx.set_current_user(user);
                            return Ok(());
                        }
                        Ok(None) => continue,
                        Err(err) => {
                            debug!(strategy = %name, error = %err, "strategy failed");
                            continue;
                        }
                    }
                }
                Err(self.failure())
            }
            AuthMode::All => {
                let mut last_user = None;
                for name in &self.spec.strategies {
                    match self.run_strategy(name, ctx).await? {
                        Some(user) => last_user = Some(user),
                        None => return Err(self.failure()),
                    }
                }
                match last_user {
                    Some(user) => {
                        ctx.set_current_user(user);
                        Ok(())
                    }
                    None => Err(self.failure()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::AuthStrategy;
    use serde_json::Value;

    /// Accepts requests bearing `x-token: <user>` headers.
    struct HeaderStrategy {
        name: &'static str,
        header: &'static str,
    }

    #[async_trait]
    impl AuthStrategy for HeaderStrategy {
        fn name(&self) -> &str {
            self.name
        }
        async fn extract_credentials(&self, ctx: &RequestContext) -> Option<Value> {
            ctx.header(self.header).map(|v| json!({"token": v}))
        }
        async fn authenticate(
            &self,
            ctx: &RequestContext,
        ) -> Result<Option<CurrentUser>, IgnisError> {
            Ok(ctx
                .header(self.header)
                .filter(|v| !v.starts_with("bad"))
                .map(CurrentUser::new))
        }
    }

    fn registry() -> Arc<StrategyRegistry> {
        let registry = StrategyRegistry::new();
        registry.register(Arc::new(HeaderStrategy {
            name: "jwt",
            header: "x-jwt",
        }));
        registry.register(Arc::new(HeaderStrategy {
            name: "basic",
            header: "x-basic",
        }));
        Arc::new(registry)
    }

    fn spec(mode: AuthMode) -> AuthenticateSpec {
        AuthenticateSpec {
            strategies: vec!["jwt".into(), "basic".into()],
            mode,
        }
    }

    #[tokio::test]
    async fn any_mode_first_success_wins() {
        let middleware = authenticate(registry(), spec(AuthMode::Any));
        // JWT does not recognize the request; Basic succeeds.
        let mut ctx = RequestContext::new("get", "/secure").with_header("x-basic", "u-basic");
        middleware.handle(&mut ctx).await.unwrap();
        assert_eq!(
            ctx.current_user().and_then(|u| u.user_id.as_deref()),
            Some("u-basic")
        );
    }

    #[tokio::test]
    async fn any_mode_all_failures_is_unauthenticated_with_strategy_list() {
        let middleware = authenticate(registry(), spec(AuthMode::Any));
        let mut ctx = RequestContext::new("get", "/secure");
        let err = middleware.handle(&mut ctx).await.unwrap_err();
        assert_eq!(err.kind, ignis_core::ErrorKind::Unauthenticated);
        let details = err.details.unwrap();
        assert_eq!(details["strategies"], json!(["jwt", "basic"]));
    }

    #[tokio::test]
    async fn all_mode_requires_every_strategy() {
        let middleware = authenticate(registry(), spec(AuthMode::All));
        // Only Basic present: fails under all-mode.
        let mut ctx = RequestContext::new("get", "/secure").with_header("x-basic", "u-basic");
        let err = middleware.handle(&mut ctx).await.unwrap_err();
        assert_eq!(err.kind, ignis_core::ErrorKind::Unauthenticated);
    }

    #[tokio::test]
    async fn all_mode_last_user_wins() {
        let middleware = authenticate(registry(), spec(AuthMode::All));
        let mut ctx = RequestContext::new("get", "/secure")
            .with_header("x-jwt", "u-jwt")
            .with_header("x-basic", "u-basic");
        middleware.handle(&mut ctx).await.unwrap();
        assert_eq!(
            ctx.current_user().and_then(|u| u.user_id.as_deref()),
            Some("u-basic")
        );
    }

    #[tokio::test]
    async fn any_mode_skips_rejecting_strategy() {
        let middleware = authenticate(registry(), spec(AuthMode::Any));
        // JWT recognizes the request but rejects it; Basic accepts.
        let mut ctx = RequestContext::new("get", "/secure")
            .with_header("x-jwt", "bad-token")
            .with_header("x-basic", "u-basic");
        middleware.handle(&mut ctx).await.unwrap();
        assert_eq!(
            ctx.current_user().and_then(|u| u.user_id.as_deref()),
            Some("u-basic")
        );
    }
}
