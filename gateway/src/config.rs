use crate::tenant::TenantRules;
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 8000,
        }
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    #[serde(default)]
    pub listener: Listener,
    /// The platform's base domain; tenant hosts are `<project>.<base_domain>`.
    pub base_domain: String,
    #[serde(default = "default_reserved_labels")]
    pub reserved_labels: Vec<String>,
    #[serde(default = "default_preview_domain")]
    pub preview_domain: String,
    /// Server-held secret for internal signed tokens.
    pub internal_token_secret: String,
    /// Base URL the gateway forwards rewritten requests to.
    pub upstream_url: String,
}

fn default_reserved_labels() -> Vec<String> {
    vec!["www".into(), "docs".into()]
}

fn default_preview_domain() -> String {
    "vercel.app".into()
}

impl Config {
    pub fn tenant_rules(&self) -> TenantRules {
        TenantRules {
            base_domain: self.base_domain.clone(),
            reserved_labels: self.reserved_labels.clone(),
            preview_domain: self.preview_domain.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_applied() {
        let yaml = r#"
            base_domain: portico.dev
            internal_token_secret: secret
            upstream_url: http://127.0.0.1:4000
        "#;
        let config: Config = serde_yaml::from_str(yaml).expect("parse config");
        assert_eq!(config.listener.port, 8000);
        assert_eq!(config.reserved_labels, vec!["www", "docs"]);
        assert_eq!(config.preview_domain, "vercel.app");
    }
}
