//! Tenant resolution from the request host.
//!
//! Pure string work; no network or database access happens here.

/// Host-parsing rules, derived from the gateway config.
#[derive(Clone, Debug)]
pub struct TenantRules {
    /// The platform's base domain, e.g. `portico.dev`. May carry a port in
    /// local development.
    pub base_domain: String,
    /// Subdomain labels that are not tenants (the docs portal, the bare www
    /// alias).
    pub reserved_labels: Vec<String>,
    /// Suffix of ephemeral build-preview hosts, e.g. `vercel.app`.
    pub preview_domain: String,
}

/// Delimiter separating the project label from the rest of a preview host,
/// as in `myproject---git-branch-hash.vercel.app`.
const PREVIEW_DELIMITER: &str = "---";

/// Derives the project id for a request, or `None` when the host belongs to
/// the public/control-plane site.
pub fn resolve_project(host: &str, rules: &TenantRules) -> Option<String> {
    let hostname = host.split(':').next().unwrap_or(host);

    // Local development: <project>.localhost
    if hostname == "localhost" || hostname == "127.0.0.1" {
        return None;
    }
    if let Some(label) = hostname.strip_suffix(".localhost") {
        return normalize(label, rules);
    }

    // Ephemeral build previews carry the project before the delimiter
    if hostname.ends_with(&format!(".{}", rules.preview_domain))
        && let Some((label, _)) = hostname.split_once(PREVIEW_DELIMITER)
    {
        return normalize(label, rules);
    }

    let root = rules.base_domain.split(':').next().unwrap_or(&rules.base_domain);

    if hostname == root || hostname == format!("www.{root}") {
        return None;
    }

    hostname
        .strip_suffix(&format!(".{root}"))
        .and_then(|label| normalize(label, rules))
}

fn normalize(label: &str, rules: &TenantRules) -> Option<String> {
    if label.is_empty() {
        return None;
    }
    let label = label.to_lowercase();
    if rules.reserved_labels.iter().any(|reserved| *reserved == label) {
        return None;
    }
    Some(label)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> TenantRules {
        TenantRules {
            base_domain: "portico.dev".into(),
            reserved_labels: vec!["www".into(), "docs".into()],
            preview_domain: "vercel.app".into(),
        }
    }

    #[test]
    fn subdomain_is_the_project_id() {
        assert_eq!(
            resolve_project("acme.portico.dev", &rules()),
            Some("acme".to_string())
        );
        // Port is stripped first
        assert_eq!(
            resolve_project("acme.portico.dev:8080", &rules()),
            Some("acme".to_string())
        );
        // Project ids are lowercased
        assert_eq!(
            resolve_project("ACME.portico.dev", &rules()),
            Some("acme".to_string())
        );
    }

    #[test]
    fn control_plane_hosts_resolve_to_none() {
        assert_eq!(resolve_project("portico.dev", &rules()), None);
        assert_eq!(resolve_project("www.portico.dev", &rules()), None);
        assert_eq!(resolve_project("docs.portico.dev", &rules()), None);
        assert_eq!(resolve_project("example.com", &rules()), None);
        assert_eq!(resolve_project("localhost:3000", &rules()), None);
        assert_eq!(resolve_project("127.0.0.1:3000", &rules()), None);
    }

    #[test]
    fn loopback_suffix_resolves_first_label() {
        assert_eq!(
            resolve_project("acme.localhost:3000", &rules()),
            Some("acme".to_string())
        );
    }

    #[test]
    fn preview_hosts_use_the_delimiter() {
        assert_eq!(
            resolve_project("acme---git-main-abc123.vercel.app", &rules()),
            Some("acme".to_string())
        );
        // Preview host without a delimiter is not a tenant
        assert_eq!(resolve_project("something.vercel.app", &rules()), None);
    }
}
