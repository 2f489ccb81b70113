//! Authorization for admin views
//!
//! Session mechanics live outside kibble. An [`Authenticator`] turns request
//! headers into an [`AuthContext`] and answers `has_permission_for(model,
//! action, key)`; everything else in the admin only consumes those answers.

use crate::config::{KibbleConfig, PermissionsConfig};
use crate::core::key::Key;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use axum::http::HeaderMap;
use uuid::Uuid;

/// Header carrying the authenticated user's id
pub const USER_ID_HEADER: &str = "x-user-id";
/// Header carrying a comma-separated role list
pub const USER_ROLES_HEADER: &str = "x-user-roles";
/// Header carrying a site administrator's id
pub const ADMIN_ID_HEADER: &str = "x-admin-id";

/// Authorization context extracted from a request
#[derive(Debug, Clone)]
pub enum AuthContext {
    /// Authenticated user
    User { user_id: Uuid, roles: Vec<String> },

    /// Site administrator
    Admin { admin_id: Uuid },

    /// Nobody is logged in
    Anonymous,
}

impl AuthContext {
    pub fn is_admin(&self) -> bool {
        matches!(self, AuthContext::Admin { .. })
    }

    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            AuthContext::User { user_id, .. } => Some(*user_id),
            AuthContext::Admin { admin_id } => Some(*admin_id),
            AuthContext::Anonymous => None,
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        match self {
            AuthContext::User { roles, .. } => roles.iter().any(|r| r == role),
            _ => false,
        }
    }
}

/// Authorization policy for an action
#[derive(Debug, Clone)]
pub enum AuthPolicy {
    /// Anyone, logged in or not
    Public,

    /// Any logged-in user
    Authenticated,

    /// User must have one of these roles; administrators always pass
    HasRole(Vec<String>),

    /// Administrators only
    AdminOnly,

    /// Nobody
    Deny,

    /// Combination of policies (AND)
    And(Vec<AuthPolicy>),

    /// Combination of policies (OR)
    Or(Vec<AuthPolicy>),

    /// Custom policy function
    Custom(fn(&AuthContext) -> bool),
}

impl AuthPolicy {
    /// Check if auth context satisfies this policy
    pub fn check(&self, context: &AuthContext) -> bool {
        match self {
            AuthPolicy::Public => true,

            AuthPolicy::Authenticated => !matches!(context, AuthContext::Anonymous),

            AuthPolicy::HasRole(required) => {
                context.is_admin() || required.iter().any(|r| context.has_role(r))
            }

            AuthPolicy::AdminOnly => context.is_admin(),

            AuthPolicy::Deny => false,

            AuthPolicy::And(policies) => policies.iter().all(|p| p.check(context)),

            AuthPolicy::Or(policies) => policies.iter().any(|p| p.check(context)),

            AuthPolicy::Custom(f) => f(context),
        }
    }

    /// Parse policy from string (for YAML config)
    ///
    /// `role:a|b` accepts either role. Unknown strings fall back to
    /// `authenticated`.
    pub fn parse_policy(s: &str) -> Self {
        match s.trim() {
            "public" => AuthPolicy::Public,
            "authenticated" => AuthPolicy::Authenticated,
            "admin_only" => AuthPolicy::AdminOnly,
            "deny" => AuthPolicy::Deny,
            s if s.starts_with("role:") => {
                let roles = s["role:".len()..]
                    .split('|')
                    .map(|r| r.trim().to_string())
                    .filter(|r| !r.is_empty())
                    .collect();
                AuthPolicy::HasRole(roles)
            }
            other => {
                tracing::debug!(policy = other, "unknown policy, requiring authentication");
                AuthPolicy::Authenticated
            }
        }
    }
}

/// Collaborator answering who is making a request and what they may do
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Extract auth context from request headers
    async fn extract_context(&self, headers: &HeaderMap) -> Result<AuthContext>;

    /// Whether the context may see the admin at all
    fn is_logged_in(&self, context: &AuthContext) -> bool {
        !matches!(context, AuthContext::Anonymous)
    }

    /// Where to send visitors who are not logged in
    fn login_url(&self) -> String;

    /// Whether `context` may run `action` on `model`, optionally for one instance
    async fn has_permission_for(
        &self,
        context: &AuthContext,
        model: Option<&str>,
        action: &str,
        key: Option<&Key>,
    ) -> bool;
}

/// Allows everything (for development)
pub struct NoAuthProvider;

#[async_trait]
impl Authenticator for NoAuthProvider {
    async fn extract_context(&self, _headers: &HeaderMap) -> Result<AuthContext> {
        Ok(AuthContext::Anonymous)
    }

    fn is_logged_in(&self, _context: &AuthContext) -> bool {
        true
    }

    fn login_url(&self) -> String {
        "/".to_string()
    }

    async fn has_permission_for(
        &self,
        _context: &AuthContext,
        _model: Option<&str>,
        _action: &str,
        _key: Option<&Key>,
    ) -> bool {
        true
    }
}

/// Header-based authenticator driven by configured policies
///
/// Trusts identity headers set by an upstream proxy and checks each
/// `(kind, action)` against [`PermissionsConfig`].
pub struct PolicyAuthenticator {
    permissions: PermissionsConfig,
    login_url: String,
}

impl PolicyAuthenticator {
    pub fn new(permissions: PermissionsConfig, login_url: impl Into<String>) -> Self {
        Self {
            permissions,
            login_url: login_url.into(),
        }
    }

    pub fn from_config(config: &KibbleConfig) -> Self {
        Self::new(config.permissions.clone(), config.login_url.clone())
    }

    fn header_uuid(headers: &HeaderMap, name: &str) -> Result<Option<Uuid>> {
        let Some(value) = headers.get(name) else {
            return Ok(None);
        };
        let value = value
            .to_str()
            .map_err(|e| anyhow!("invalid {} header: {}", name, e))?;
        let id = Uuid::parse_str(value.trim())
            .map_err(|e| anyhow!("invalid {} header: {}", name, e))?;
        Ok(Some(id))
    }
}

#[async_trait]
impl Authenticator for PolicyAuthenticator {
    async fn extract_context(&self, headers: &HeaderMap) -> Result<AuthContext> {
        if let Some(admin_id) = Self::header_uuid(headers, ADMIN_ID_HEADER)? {
            return Ok(AuthContext::Admin { admin_id });
        }
        let Some(user_id) = Self::header_uuid(headers, USER_ID_HEADER)? else {
            return Ok(AuthContext::Anonymous);
        };
        let roles = headers
            .get(USER_ROLES_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| {
                v.split(',')
                    .map(|r| r.trim().to_string())
                    .filter(|r| !r.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        Ok(AuthContext::User { user_id, roles })
    }

    fn login_url(&self) -> String {
        self.login_url.clone()
    }

    async fn has_permission_for(
        &self,
        context: &AuthContext,
        model: Option<&str>,
        action: &str,
        _key: Option<&Key>,
    ) -> bool {
        let policy = AuthPolicy::parse_policy(self.permissions.policy_for(model, action));
        policy.check(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn user(roles: &[&str]) -> AuthContext {
        AuthContext::User {
            user_id: Uuid::new_v4(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    #[test]
    fn test_policy_check() {
        let editor = user(&["editor"]);
        assert!(AuthPolicy::Authenticated.check(&editor));
        assert!(AuthPolicy::HasRole(vec!["editor".into()]).check(&editor));
        assert!(!AuthPolicy::AdminOnly.check(&editor));

        let anon = AuthContext::Anonymous;
        assert!(AuthPolicy::Public.check(&anon));
        assert!(!AuthPolicy::Authenticated.check(&anon));
        assert!(!AuthPolicy::Deny.check(&anon));
    }

    #[test]
    fn test_admin_passes_role_checks() {
        let admin = AuthContext::Admin {
            admin_id: Uuid::new_v4(),
        };
        assert!(AuthPolicy::HasRole(vec!["editor".into()]).check(&admin));
        assert!(AuthPolicy::AdminOnly.check(&admin));
    }

    #[test]
    fn test_policy_combinators() {
        let viewer = user(&["viewer"]);
        let both = AuthPolicy::And(vec![
            AuthPolicy::Authenticated,
            AuthPolicy::HasRole(vec!["admin".into()]),
        ]);
        assert!(!both.check(&viewer));

        let either = AuthPolicy::Or(vec![
            AuthPolicy::AdminOnly,
            AuthPolicy::HasRole(vec!["viewer".into()]),
        ]);
        assert!(either.check(&viewer));

        fn never(_ctx: &AuthContext) -> bool {
            false
        }
        assert!(!AuthPolicy::Custom(never).check(&viewer));
    }

    #[test]
    fn test_parse_policy() {
        assert!(matches!(AuthPolicy::parse_policy("public"), AuthPolicy::Public));
        assert!(matches!(AuthPolicy::parse_policy("deny"), AuthPolicy::Deny));
        match AuthPolicy::parse_policy("role:editor|owner") {
            AuthPolicy::HasRole(roles) => assert_eq!(roles, vec!["editor", "owner"]),
            other => panic!("Expected HasRole, got {:?}", other),
        }
        assert!(matches!(
            AuthPolicy::parse_policy("something_unknown"),
            AuthPolicy::Authenticated
        ));
    }

    #[tokio::test]
    async fn test_extract_context_from_headers() {
        let auth = PolicyAuthenticator::new(PermissionsConfig::default(), "/login");

        let anonymous = auth.extract_context(&HeaderMap::new()).await.unwrap();
        assert!(!auth.is_logged_in(&anonymous));

        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_str(&id.to_string()).unwrap());
        headers.insert(USER_ROLES_HEADER, HeaderValue::from_static("editor, viewer"));
        let context = auth.extract_context(&headers).await.unwrap();
        assert_eq!(context.user_id(), Some(id));
        assert!(context.has_role("viewer"));
        assert!(auth.is_logged_in(&context));

        let mut bad = HeaderMap::new();
        bad.insert(USER_ID_HEADER, HeaderValue::from_static("not-a-uuid"));
        assert!(auth.extract_context(&bad).await.is_err());
    }

    #[tokio::test]
    async fn test_permission_rules() {
        let mut permissions = PermissionsConfig::default();
        permissions
            .rules
            .insert("delete".to_string(), "admin_only".to_string());
        permissions
            .rules
            .insert("Book:delete".to_string(), "role:librarian".to_string());
        let auth = PolicyAuthenticator::new(permissions, "/login");

        let librarian = user(&["librarian"]);
        assert!(auth.has_permission_for(&librarian, Some("Book"), "delete", None).await);
        assert!(!auth.has_permission_for(&librarian, Some("Author"), "delete", None).await);
        assert!(auth.has_permission_for(&librarian, Some("Author"), "list", None).await);
        assert!(
            !auth
                .has_permission_for(&AuthContext::Anonymous, Some("Author"), "list", None)
                .await
        );
    }

    #[tokio::test]
    async fn test_no_auth_allows_everything() {
        let auth = NoAuthProvider;
        let context = auth.extract_context(&HeaderMap::new()).await.unwrap();
        assert!(auth.is_logged_in(&context));
        assert!(auth.has_permission_for(&context, None, "delete", None).await);
    }
}
