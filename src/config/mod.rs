//! Configuration loading and management

use anyhow::Result;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A named menu group on the index page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KindGroup {
    /// Heading shown above the group
    pub name: String,

    /// Model paths listed under the heading, in order
    pub paths: Vec<String>,
}

/// Access rules evaluated by the policy authenticator
///
/// Rule keys are either `Kind:action` or a bare `action`; values are policy
/// strings such as `public`, `authenticated`, `admin_only` or `role:editor`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionsConfig {
    #[serde(default = "default_policy")]
    pub default: String,

    #[serde(default)]
    pub rules: IndexMap<String, String>,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            default: default_policy(),
            rules: IndexMap::new(),
        }
    }
}

impl PermissionsConfig {
    /// The policy string for an action, most specific rule first
    pub fn policy_for(&self, kind: Option<&str>, action: &str) -> &str {
        kind.and_then(|kind| self.rules.get(&format!("{}:{}", kind, action)))
            .or_else(|| self.rules.get(action))
            .unwrap_or(&self.default)
    }
}

/// Complete configuration of an admin site
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KibbleConfig {
    /// Site title shown in the header
    pub label: String,

    /// Mount point of every admin URL
    pub url_prefix: String,

    /// Where anonymous visitors are sent
    pub login_url: String,

    /// Directory of templates overriding the bundled ones
    pub template_dir: Option<String>,

    /// Rows per list page unless a view overrides it
    pub page_size: usize,

    /// Upper bound for the `page-size` argument
    pub max_page_size: usize,

    /// Display labels by kind
    pub kind_labels: IndexMap<String, String>,

    /// Index page menu groups; ungrouped paths land in a trailing group
    pub kind_groups: Vec<KindGroup>,

    pub permissions: PermissionsConfig,
}

fn default_policy() -> String {
    "authenticated".to_string()
}

impl Default for KibbleConfig {
    fn default() -> Self {
        Self {
            label: "Admin".to_string(),
            url_prefix: "/admin".to_string(),
            login_url: "/login".to_string(),
            template_dir: None,
            page_size: 20,
            max_page_size: 100,
            kind_labels: IndexMap::new(),
            kind_groups: Vec::new(),
            permissions: PermissionsConfig::default(),
        }
    }
}

impl KibbleConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut config: Self = serde_yaml::from_str(yaml)?;
        config.normalize();
        Ok(config)
    }

    /// Canonical prefix: leading slash, no trailing slash, empty for root
    pub fn prefix(&self) -> &str {
        self.url_prefix.trim_end_matches('/')
    }

    fn normalize(&mut self) {
        let trimmed = self.url_prefix.trim_matches('/');
        self.url_prefix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{}", trimmed)
        };
        self.page_size = self.page_size.max(1);
        self.max_page_size = self.max_page_size.max(self.page_size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = KibbleConfig::default();
        assert_eq!(config.prefix(), "/admin");
        assert_eq!(config.page_size, 20);
        assert_eq!(config.max_page_size, 100);
        assert_eq!(config.permissions.default, "authenticated");
    }

    #[test]
    fn test_yaml_partial_config() {
        let yaml = r#"
label: Bookshelf
url_prefix: manage/
page_size: 10
kind_labels:
  BlogPost: Article
kind_groups:
  - name: Library
    paths: [Author, Author/Book]
permissions:
  default: public
  rules:
    delete: admin_only
    "Author:edit": role:editor
"#;
        let config = KibbleConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.label, "Bookshelf");
        assert_eq!(config.prefix(), "/manage");
        assert_eq!(config.page_size, 10);
        assert_eq!(config.max_page_size, 100);
        assert_eq!(config.kind_labels["BlogPost"], "Article");
        assert_eq!(config.kind_groups[0].paths, vec!["Author", "Author/Book"]);
        assert_eq!(config.login_url, "/login");
    }

    #[test]
    fn test_policy_lookup_order() {
        let yaml = r#"
permissions:
  rules:
    delete: admin_only
    "Author:delete": role:editor
"#;
        let config = KibbleConfig::from_yaml_str(yaml).unwrap();
        let permissions = &config.permissions;
        assert_eq!(permissions.policy_for(Some("Author"), "delete"), "role:editor");
        assert_eq!(permissions.policy_for(Some("Book"), "delete"), "admin_only");
        assert_eq!(permissions.policy_for(None, "list"), "authenticated");
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "label: From File\nurl_prefix: /").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let config = KibbleConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.label, "From File");
        assert_eq!(config.prefix(), "");
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(KibbleConfig::from_yaml_str("page_size: [not a number]").is_err());
        assert!(KibbleConfig::from_yaml_file("/nonexistent/kibble.yaml").is_err());
    }
}
