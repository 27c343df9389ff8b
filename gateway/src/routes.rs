//! The route table: a closed set of endpoint kinds, each owning its own
//! parameter defaults and validation inline in its rewrite.
//!
//! External paths under `/api/` are rewritten into internal,
//! project+deployment-scoped paths consumed by downstream handlers. Matching
//! is first-prefix-wins over a fixed table; a path matching no kind is left
//! for the control-plane site to handle.

use url::form_urlencoded;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endpoint {
    Deployments,
    Documents,
    Snapshots,
    Search,
    Ls,
    Cat,
    Tree,
    Mcp,
    Sse,
    Message,
}

const TABLE: &[(&str, Endpoint)] = &[
    ("/api/deployments", Endpoint::Deployments),
    ("/api/documents", Endpoint::Documents),
    ("/api/snapshots", Endpoint::Snapshots),
    ("/api/search", Endpoint::Search),
    ("/api/ls", Endpoint::Ls),
    ("/api/cat", Endpoint::Cat),
    ("/api/tree", Endpoint::Tree),
    ("/api/mcp", Endpoint::Mcp),
    ("/api/sse", Endpoint::Sse),
    ("/api/message", Endpoint::Message),
];

/// Query parameters of the incoming request, pre-parsed once per request.
pub struct RequestQuery {
    raw: String,
    pairs: Vec<(String, String)>,
}

impl RequestQuery {
    pub fn parse(raw: &str) -> Self {
        let pairs = form_urlencoded::parse(raw.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        RequestQuery {
            raw: raw.to_string(),
            pairs,
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// `?{raw}` when any parameters were supplied, empty otherwise. Used by
    /// rewrites that forward the caller's query untouched.
    fn suffix(&self) -> String {
        if self.raw.is_empty() {
            String::new()
        } else {
            format!("?{}", self.raw)
        }
    }
}

pub struct RewriteContext<'a> {
    pub project_id: &'a str,
    pub deployment_id: Option<&'a str>,
    pub path: &'a str,
    pub query: &'a RequestQuery,
}

#[derive(Debug, PartialEq)]
pub enum RewriteError {
    /// A parameter the endpoint requires was absent or empty.
    MissingParameter,
    /// The endpoint needs a deployment and resolution produced none.
    MissingDeployment,
}

fn encode(segment: &str) -> String {
    form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}

impl Endpoint {
    pub fn match_path(path: &str) -> Option<Endpoint> {
        TABLE
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix))
            .map(|(_, endpoint)| *endpoint)
    }

    /// Whether the endpoint reads deployment content and therefore fails
    /// closed without a resolved deployment.
    pub const fn requires_deployment(&self) -> bool {
        match self {
            Endpoint::Deployments | Endpoint::Documents | Endpoint::Snapshots => false,
            Endpoint::Search
            | Endpoint::Ls
            | Endpoint::Cat
            | Endpoint::Tree
            | Endpoint::Mcp
            | Endpoint::Sse
            | Endpoint::Message => true,
        }
    }

    /// Endpoints with mutating operations, gated on secret keys.
    pub const fn supports_write(&self) -> bool {
        matches!(self, Endpoint::Documents | Endpoint::Snapshots)
    }

    pub fn rewrite(&self, ctx: &RewriteContext<'_>) -> Result<String, RewriteError> {
        let project = ctx.project_id;

        let deployment = || ctx.deployment_id.ok_or(RewriteError::MissingDeployment);

        match self {
            Endpoint::Deployments => Ok(format!("/api/projects/{project}/deployments")),
            Endpoint::Documents => {
                let parts: Vec<&str> = ctx.path.split('/').filter(|p| !p.is_empty()).collect();
                let suffix = ctx.query.suffix();
                match parts.as_slice() {
                    [_, _, "bulk"] => Ok(format!("/api/projects/{project}/documents/bulk{suffix}")),
                    [_, _, document_id] => {
                        Ok(format!("/api/projects/{project}/documents/{document_id}{suffix}"))
                    }
                    _ => Ok(format!("/api/projects/{project}/documents{suffix}")),
                }
            }
            Endpoint::Snapshots => {
                Ok(format!("/api/projects/{project}/snapshots{}", ctx.query.suffix()))
            }
            Endpoint::Search => {
                let deployment = deployment()?;
                let query = match ctx.query.get("query") {
                    Some(q) if !q.is_empty() => q,
                    _ => return Err(RewriteError::MissingParameter),
                };
                Ok(format!(
                    "/api/projects/{project}/deployments/{deployment}/search/{}",
                    encode(query)
                ))
            }
            Endpoint::Ls => {
                let deployment = deployment()?;
                let folder = ctx.query.get("folder").ok_or(RewriteError::MissingParameter)?;
                if folder.is_empty() {
                    return Err(RewriteError::MissingParameter);
                }
                Ok(format!(
                    "/api/projects/{project}/deployments/{deployment}/ls/{}",
                    encode(folder)
                ))
            }
            Endpoint::Cat => {
                let deployment = deployment()?;
                let path = ctx.query.get("path").ok_or(RewriteError::MissingParameter)?;
                if path.is_empty() {
                    return Err(RewriteError::MissingParameter);
                }
                Ok(format!(
                    "/api/projects/{project}/deployments/{deployment}/cat/{}",
                    encode(path)
                ))
            }
            Endpoint::Tree => {
                let deployment = deployment()?;
                let folder = ctx.query.get("folder").filter(|f| !f.is_empty()).unwrap_or("/");
                let depth = ctx.query.get("depth").filter(|d| !d.is_empty()).unwrap_or("0");
                Ok(format!(
                    "/api/projects/{project}/deployments/{deployment}/tree/{}/{depth}",
                    encode(folder)
                ))
            }
            Endpoint::Mcp => Ok(format!(
                "/api/projects/{project}/deployments/{}/mcp/mcp",
                deployment()?
            )),
            Endpoint::Sse => Ok(format!(
                "/api/projects/{project}/deployments/{}/mcp/sse",
                deployment()?
            )),
            Endpoint::Message => Ok(format!(
                "/api/projects/{project}/deployments/{}/mcp/message",
                deployment()?
            )),
        }
    }
}

/// Convenience wrapper over match + requires-deployment, used before
/// deployment resolution.
pub fn requires_deployment(path: &str) -> bool {
    Endpoint::match_path(path).is_some_and(|e| e.requires_deployment())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(
        path: &'a str,
        deployment: Option<&'a str>,
        query: &'a RequestQuery,
    ) -> RewriteContext<'a> {
        RewriteContext {
            project_id: "acme",
            deployment_id: deployment,
            path,
            query,
        }
    }

    #[test]
    fn matching_is_prefix_based() {
        assert_eq!(Endpoint::match_path("/api/search"), Some(Endpoint::Search));
        assert_eq!(
            Endpoint::match_path("/api/documents/doc_42"),
            Some(Endpoint::Documents)
        );
        assert_eq!(Endpoint::match_path("/api/unknown"), None);
        assert_eq!(Endpoint::match_path("/dashboard"), None);
    }

    #[test]
    fn search_requires_a_non_empty_query() {
        let query = RequestQuery::parse("query=rust+routing");
        assert_eq!(
            Endpoint::Search.rewrite(&ctx("/api/search", Some("dep_1"), &query)),
            Ok("/api/projects/acme/deployments/dep_1/search/rust+routing".to_string())
        );

        let empty = RequestQuery::parse("query=");
        assert_eq!(
            Endpoint::Search.rewrite(&ctx("/api/search", Some("dep_1"), &empty)),
            Err(RewriteError::MissingParameter)
        );

        let none = RequestQuery::parse("");
        assert_eq!(
            Endpoint::Search.rewrite(&ctx("/api/search", Some("dep_1"), &none)),
            Err(RewriteError::MissingParameter)
        );
    }

    #[test]
    fn tree_defaults_folder_to_root_and_depth_to_zero() {
        let query = RequestQuery::parse("");
        assert_eq!(
            Endpoint::Tree.rewrite(&ctx("/api/tree", Some("dep_1"), &query)),
            Ok("/api/projects/acme/deployments/dep_1/tree/%2F/0".to_string())
        );

        let query = RequestQuery::parse("folder=%2Fsrc&depth=2");
        assert_eq!(
            Endpoint::Tree.rewrite(&ctx("/api/tree", Some("dep_1"), &query)),
            Ok("/api/projects/acme/deployments/dep_1/tree/%2Fsrc/2".to_string())
        );
    }

    #[test]
    fn documents_keeps_the_caller_query_and_subpaths() {
        let query = RequestQuery::parse("limit=10");
        assert_eq!(
            Endpoint::Documents.rewrite(&ctx("/api/documents", None, &query)),
            Ok("/api/projects/acme/documents?limit=10".to_string())
        );
        assert_eq!(
            Endpoint::Documents.rewrite(&ctx("/api/documents/bulk", None, &query)),
            Ok("/api/projects/acme/documents/bulk?limit=10".to_string())
        );
        assert_eq!(
            Endpoint::Documents.rewrite(&ctx("/api/documents/doc_42", None, &query)),
            Ok("/api/projects/acme/documents/doc_42?limit=10".to_string())
        );
    }

    #[test]
    fn deployment_scoped_endpoints_fail_without_a_deployment() {
        let query = RequestQuery::parse("query=x");
        assert_eq!(
            Endpoint::Search.rewrite(&ctx("/api/search", None, &query)),
            Err(RewriteError::MissingDeployment)
        );
        assert_eq!(
            Endpoint::Mcp.rewrite(&ctx("/api/mcp", None, &RequestQuery::parse(""))),
            Err(RewriteError::MissingDeployment)
        );
    }

    #[test]
    fn protocol_bridge_endpoints_rewrite_to_transport_paths() {
        let query = RequestQuery::parse("");
        assert_eq!(
            Endpoint::Mcp.rewrite(&ctx("/api/mcp", Some("dep_1"), &query)),
            Ok("/api/projects/acme/deployments/dep_1/mcp/mcp".to_string())
        );
        assert_eq!(
            Endpoint::Sse.rewrite(&ctx("/api/sse", Some("dep_1"), &query)),
            Ok("/api/projects/acme/deployments/dep_1/mcp/sse".to_string())
        );
        assert_eq!(
            Endpoint::Message.rewrite(&ctx("/api/message", Some("dep_1"), &query)),
            Ok("/api/projects/acme/deployments/dep_1/mcp/message".to_string())
        );
    }

    #[test]
    fn requires_deployment_follows_the_table() {
        assert!(requires_deployment("/api/search"));
        assert!(requires_deployment("/api/tree"));
        assert!(!requires_deployment("/api/documents"));
        assert!(!requires_deployment("/api/deployments"));
        assert!(!requires_deployment("/anything/else"));
    }
}
