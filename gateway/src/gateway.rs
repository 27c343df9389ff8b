//! The per-request pipeline: tenant resolution, credential validation,
//! deployment resolution, route rewrite.
//!
//! `decide` is stateless and fully parallel; the only shared state is the
//! injected cache, which is derived data. The outcome is a routing
//! decision, not a response: the service layer turns it into a forwarded
//! request or a JSON error.

use crate::apikey::ApiKeyValidator;
use crate::config::Config;
use crate::error::ErrorCode;
use crate::metrics_defs::REQUEST_REJECTED;
use crate::resolver::DeploymentResolver;
use crate::routes::{Endpoint, RequestQuery, RewriteContext, RewriteError};
use crate::tenant::{self, TenantRules};
use crate::token;
use http::Method;
use registry::cache::KeyValueCache;
use registry::model::KeyType;
use registry::store::RelationalStore;
use registry::tasks::TaskSpawner;
use shared::counter;
use std::sync::Arc;

/// The pieces of an incoming request the pipeline looks at.
pub struct GatewayRequest<'a> {
    pub method: &'a Method,
    pub host: &'a str,
    pub path: &'a str,
    pub query: &'a str,
    pub internal_token: Option<&'a str>,
    pub authorization: Option<&'a str>,
    pub deployment_override: Option<&'a str>,
}

#[derive(Debug, PartialEq)]
pub enum RouteDecision {
    /// Not a tenant request, or no endpoint rule matched; the request goes
    /// to the upstream unmodified.
    PassThrough,
    /// Authenticated tenant request with a rewritten internal path.
    Forward {
        project_id: String,
        deployment_id: Option<String>,
        internal_path: String,
    },
    /// Resolved locally into a stable error code.
    Reject(ErrorCode),
}

pub struct Gateway {
    rules: TenantRules,
    token_secret: String,
    keys: ApiKeyValidator,
    resolver: DeploymentResolver,
}

fn is_write_method(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

impl Gateway {
    pub fn new(
        config: &Config,
        store: Arc<dyn RelationalStore>,
        cache: Arc<dyn KeyValueCache>,
        spawner: Arc<dyn TaskSpawner>,
    ) -> Self {
        Gateway {
            rules: config.tenant_rules(),
            token_secret: config.internal_token_secret.clone(),
            keys: ApiKeyValidator::new(store.clone(), cache.clone(), spawner),
            resolver: DeploymentResolver::new(store, cache),
        }
    }

    pub async fn decide(&self, request: &GatewayRequest<'_>) -> RouteDecision {
        let decision = self.decide_inner(request).await;

        if let RouteDecision::Reject(code) = &decision {
            counter!(REQUEST_REJECTED).increment(1);
            tracing::debug!(
                code = code.as_str(),
                host = request.host,
                path = request.path,
                "request rejected"
            );
        }
        decision
    }

    async fn decide_inner(&self, request: &GatewayRequest<'_>) -> RouteDecision {
        let Some(project_id) = tenant::resolve_project(request.host, &self.rules) else {
            return RouteDecision::PassThrough;
        };

        // Trusted first-party callers present a signed token instead of a
        // key; an invalid token falls through to bearer validation.
        if let Some(internal_token) = request.internal_token
            && token::verify_internal_token(&self.token_secret, internal_token, &project_id)
        {
            return self.route(request, project_id, request.deployment_override.map(String::from));
        }

        let Some(raw_key) = request
            .authorization
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
        else {
            return RouteDecision::Reject(ErrorCode::MissingApiKey);
        };

        let validated = match self.keys.validate(raw_key, Some(&project_id)).await {
            Ok(Some(validated)) => validated,
            Ok(None) => return RouteDecision::Reject(ErrorCode::InvalidApiKey),
            Err(err) => {
                tracing::error!(error = %err, "store failure during key validation");
                return RouteDecision::Reject(ErrorCode::Internal);
            }
        };

        let Some(endpoint) = Endpoint::match_path(request.path) else {
            return RouteDecision::PassThrough;
        };

        if validated.key_type == KeyType::Pk
            && endpoint.supports_write()
            && is_write_method(request.method)
        {
            return RouteDecision::Reject(ErrorCode::ForbiddenKeyType);
        }

        let deployment_id = match self
            .resolver
            .resolve(
                &project_id,
                request.deployment_override,
                validated.environment.default_target(),
                endpoint.requires_deployment(),
            )
            .await
        {
            Ok(deployment_id) => deployment_id,
            Err(code) => return RouteDecision::Reject(code),
        };

        Self::rewrite(endpoint, request, project_id, deployment_id)
    }

    /// Routing for internal-token callers: the deployment override is taken
    /// as-is, without slot resolution.
    fn route(
        &self,
        request: &GatewayRequest<'_>,
        project_id: String,
        deployment_id: Option<String>,
    ) -> RouteDecision {
        let Some(endpoint) = Endpoint::match_path(request.path) else {
            return RouteDecision::PassThrough;
        };
        Self::rewrite(endpoint, request, project_id, deployment_id)
    }

    fn rewrite(
        endpoint: Endpoint,
        request: &GatewayRequest<'_>,
        project_id: String,
        deployment_id: Option<String>,
    ) -> RouteDecision {
        let query = RequestQuery::parse(request.query);
        let context = RewriteContext {
            project_id: &project_id,
            deployment_id: deployment_id.as_deref(),
            path: request.path,
            query: &query,
        };

        match endpoint.rewrite(&context) {
            Ok(internal_path) => RouteDecision::Forward {
                project_id,
                deployment_id,
                internal_path,
            },
            Err(RewriteError::MissingParameter) => {
                RouteDecision::Reject(ErrorCode::MissingParameter)
            }
            Err(RewriteError::MissingDeployment) => {
                RouteDecision::Reject(ErrorCode::NoDeploymentFound)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apikey::hash_api_key;
    use crate::config::Listener;
    use registry::cache::MokaCache;
    use registry::model::{
        ApiKey, Deployment, DeploymentStatus, Environment, KeyEnvironment, Project,
    };
    use registry::store::MemoryStore;
    use registry::tasks::CollectingSpawner;

    const SECRET: &str = "internal-secret";
    const LIVE_KEY: &str = "portico_sk_live_abcdefgh12345678";
    const PUBLIC_KEY: &str = "portico_pk_live_abcdefgh12345678";

    fn config() -> Config {
        Config {
            listener: Listener::default(),
            base_domain: "portico.dev".into(),
            reserved_labels: vec!["www".into(), "docs".into()],
            preview_domain: "vercel.app".into(),
            internal_token_secret: SECRET.into(),
            upstream_url: "http://127.0.0.1:4000".into(),
        }
    }

    fn seeded_gateway() -> Gateway {
        let store = Arc::new(MemoryStore::new());
        store.insert_project(Project {
            id: "acme".into(),
            org_id: "org_1".into(),
            name: "acme".into(),
            production_deployment_id: Some("dep_prod".into()),
            staging_deployment_id: None,
        });
        store.insert_deployment(Deployment {
            id: "dep_prod".into(),
            project_id: "acme".into(),
            name: "v3".into(),
            status: DeploymentStatus::Ready,
            environment: Some(Environment::Production),
        });
        for (id, raw, key_type) in [("key_sk", LIVE_KEY, registry::model::KeyType::Sk), ("key_pk", PUBLIC_KEY, registry::model::KeyType::Pk)] {
            store.insert_api_key(ApiKey {
                id: id.into(),
                project_id: "acme".into(),
                org_id: "org_1".into(),
                name: id.into(),
                key_hash: hash_api_key(raw),
                key_type,
                environment: KeyEnvironment::Live,
                is_active: true,
                last_used_at: None,
            });
        }

        Gateway::new(
            &config(),
            store,
            Arc::new(MokaCache::new()),
            Arc::new(CollectingSpawner::new()),
        )
    }

    struct RequestBuilder {
        method: Method,
        host: String,
        path: String,
        query: String,
        internal_token: Option<String>,
        authorization: Option<String>,
        deployment_override: Option<String>,
    }

    impl RequestBuilder {
        fn get(host: &str, path: &str) -> Self {
            RequestBuilder {
                method: Method::GET,
                host: host.into(),
                path: path.into(),
                query: String::new(),
                internal_token: None,
                authorization: None,
                deployment_override: None,
            }
        }

        fn method(mut self, method: Method) -> Self {
            self.method = method;
            self
        }

        fn query(mut self, query: &str) -> Self {
            self.query = query.into();
            self
        }

        fn bearer(mut self, key: &str) -> Self {
            self.authorization = Some(format!("Bearer {key}"));
            self
        }

        fn internal_token(mut self, token: &str) -> Self {
            self.internal_token = Some(token.into());
            self
        }

        fn deployment(mut self, id: &str) -> Self {
            self.deployment_override = Some(id.into());
            self
        }

        async fn decide(&self, gateway: &Gateway) -> RouteDecision {
            gateway
                .decide(&GatewayRequest {
                    method: &self.method,
                    host: &self.host,
                    path: &self.path,
                    query: &self.query,
                    internal_token: self.internal_token.as_deref(),
                    authorization: self.authorization.as_deref(),
                    deployment_override: self.deployment_override.as_deref(),
                })
                .await
        }
    }

    #[tokio::test]
    async fn control_plane_hosts_pass_through() {
        let gateway = seeded_gateway();
        let decision = RequestBuilder::get("portico.dev", "/api/search")
            .decide(&gateway)
            .await;
        assert_eq!(decision, RouteDecision::PassThrough);
    }

    #[tokio::test]
    async fn tenant_request_without_credentials_is_401() {
        let gateway = seeded_gateway();
        let decision = RequestBuilder::get("acme.portico.dev", "/api/search")
            .decide(&gateway)
            .await;
        assert_eq!(decision, RouteDecision::Reject(ErrorCode::MissingApiKey));
    }

    #[tokio::test]
    async fn invalid_key_is_403() {
        let gateway = seeded_gateway();
        let decision = RequestBuilder::get("acme.portico.dev", "/api/search")
            .bearer("portico_sk_live_unknownunknown12")
            .decide(&gateway)
            .await;
        assert_eq!(decision, RouteDecision::Reject(ErrorCode::InvalidApiKey));
    }

    #[tokio::test]
    async fn live_key_search_resolves_to_production() {
        let gateway = seeded_gateway();
        let decision = RequestBuilder::get("acme.portico.dev", "/api/search")
            .query("query=routing")
            .bearer(LIVE_KEY)
            .decide(&gateway)
            .await;

        assert_eq!(
            decision,
            RouteDecision::Forward {
                project_id: "acme".into(),
                deployment_id: Some("dep_prod".into()),
                internal_path: "/api/projects/acme/deployments/dep_prod/search/routing".into(),
            }
        );
    }

    #[tokio::test]
    async fn no_ready_production_fails_closed() {
        // Same key, but the project has no ready production deployment
        let store = Arc::new(MemoryStore::new());
        store.insert_project(Project {
            id: "acme".into(),
            org_id: "org_1".into(),
            name: "acme".into(),
            production_deployment_id: None,
            staging_deployment_id: None,
        });
        store.insert_api_key(ApiKey {
            id: "key_sk".into(),
            project_id: "acme".into(),
            org_id: "org_1".into(),
            name: "key_sk".into(),
            key_hash: hash_api_key(LIVE_KEY),
            key_type: registry::model::KeyType::Sk,
            environment: KeyEnvironment::Live,
            is_active: true,
            last_used_at: None,
        });
        let empty_gateway = Gateway::new(
            &config(),
            store,
            Arc::new(MokaCache::new()),
            Arc::new(CollectingSpawner::new()),
        );

        let decision = RequestBuilder::get("acme.portico.dev", "/api/search")
            .query("query=routing")
            .bearer(LIVE_KEY)
            .decide(&empty_gateway)
            .await;
        assert_eq!(decision, RouteDecision::Reject(ErrorCode::NoDeploymentFound));
    }

    #[tokio::test]
    async fn missing_query_parameter_is_400() {
        let gateway = seeded_gateway();
        let decision = RequestBuilder::get("acme.portico.dev", "/api/search")
            .bearer(LIVE_KEY)
            .decide(&gateway)
            .await;
        assert_eq!(decision, RouteDecision::Reject(ErrorCode::MissingParameter));
    }

    #[tokio::test]
    async fn public_key_cannot_mutate_documents() {
        let gateway = seeded_gateway();
        let decision = RequestBuilder::get("acme.portico.dev", "/api/documents")
            .method(Method::POST)
            .bearer(PUBLIC_KEY)
            .decide(&gateway)
            .await;
        assert_eq!(decision, RouteDecision::Reject(ErrorCode::ForbiddenKeyType));

        // Reads are fine
        let decision = RequestBuilder::get("acme.portico.dev", "/api/documents")
            .bearer(PUBLIC_KEY)
            .decide(&gateway)
            .await;
        assert!(matches!(decision, RouteDecision::Forward { .. }));
    }

    #[tokio::test]
    async fn unmatched_paths_pass_through_after_auth() {
        let gateway = seeded_gateway();
        let decision = RequestBuilder::get("acme.portico.dev", "/api/unknown")
            .bearer(LIVE_KEY)
            .decide(&gateway)
            .await;
        assert_eq!(decision, RouteDecision::PassThrough);
    }

    #[tokio::test]
    async fn internal_token_bypasses_key_lookup() {
        let gateway = seeded_gateway();
        let token = token::mint_internal_token(SECRET, "acme");

        let decision = RequestBuilder::get("acme.portico.dev", "/api/deployments")
            .internal_token(&token)
            .decide(&gateway)
            .await;
        assert_eq!(
            decision,
            RouteDecision::Forward {
                project_id: "acme".into(),
                deployment_id: None,
                internal_path: "/api/projects/acme/deployments".into(),
            }
        );
    }

    #[tokio::test]
    async fn internal_token_for_another_project_falls_through() {
        let gateway = seeded_gateway();
        let token = token::mint_internal_token(SECRET, "other");

        let decision = RequestBuilder::get("acme.portico.dev", "/api/deployments")
            .internal_token(&token)
            .decide(&gateway)
            .await;
        // No bearer key to fall back on
        assert_eq!(decision, RouteDecision::Reject(ErrorCode::MissingApiKey));
    }

    #[tokio::test]
    async fn explicit_override_reaches_the_rewrite() {
        let gateway = seeded_gateway();
        let decision = RequestBuilder::get("acme.portico.dev", "/api/search")
            .query("query=routing")
            .bearer(LIVE_KEY)
            .deployment("dep_prod")
            .decide(&gateway)
            .await;
        assert!(matches!(decision, RouteDecision::Forward { deployment_id: Some(id), .. } if id == "dep_prod"));
    }
}
