//! Caller identity, parsed from the already-validated identity headers of
//! an upstream gateway. This crate never issues or verifies tokens — only reads
//! what an upstream auth middleware already confirmed, mirroring a
//! `connection::auth`-style permission model but keyed off HTTP
//! headers rather than a username/password login.

use axum::http::HeaderMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Member,
    Admin,
}

/// The caller of a request: either an authenticated tenant member (or
/// admin), or an anonymous caller who gets read-only access to public
/// artifacts.
#[derive(Debug, Clone)]
pub enum Identity {
    Anonymous,
    Confirmed { user_id: String, tenant_id: String, role: Role },
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        matches!(self, Identity::Confirmed { role: Role::Admin, .. })
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Anonymous)
    }

    pub fn tenant(&self) -> Option<&str> {
        match self {
            Identity::Confirmed { tenant_id, .. } => Some(tenant_id.as_str()),
            Identity::Anonymous => None,
        }
    }

    /// Parses `X-Identity-Status`, `X-User-Id`, `X-Tenant-Id`/`X-Project-Id`
    /// and `X-Roles`. Any caller lacking a
    /// confirmed identity status, or a tenant id, is anonymous. Uses the
    /// default admin role name `"admin"`; callers that run with a
    /// configured role name should use `from_headers_with_admin_role`.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self::from_headers_with_admin_role(headers, "admin")
    }

    /// Same as `from_headers`, but matches `admin_role` against `X-Roles`
    /// instead of the literal `"admin"` string.
    pub fn from_headers_with_admin_role(headers: &HeaderMap, admin_role: &str) -> Self {
        let header_str = |name: &str| -> Option<String> {
            headers.get(name).and_then(|v| v.to_str().ok()).map(|s| s.to_string())
        };

        let confirmed = header_str("x-identity-status")
            .map(|s| s.eq_ignore_ascii_case("confirmed"))
            .unwrap_or(false);
        if !confirmed {
            return Identity::Anonymous;
        }

        let user_id = header_str("x-user-id");
        let tenant_id = header_str("x-tenant-id").or_else(|| header_str("x-project-id"));
        let (Some(user_id), Some(tenant_id)) = (user_id, tenant_id) else {
            return Identity::Anonymous;
        };

        let roles = header_str("x-roles").unwrap_or_default();
        let is_admin = roles.split(',').map(|r| r.trim()).any(|r| r.eq_ignore_ascii_case(admin_role));

        Identity::Confirmed {
            user_id,
            tenant_id,
            role: if is_admin { Role::Admin } else { Role::Member },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            h.insert(
                axum::http::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        h
    }

    #[test]
    fn anonymous_without_confirmed_status() {
        let id = Identity::from_headers(&HeaderMap::new());
        assert!(id.is_anonymous());
    }

    #[test]
    fn admin_role_detected() {
        let h = headers(&[
            ("x-identity-status", "Confirmed"),
            ("x-user-id", "u1"),
            ("x-tenant-id", "t1"),
            ("x-roles", "member, admin"),
        ]);
        let id = Identity::from_headers(&h);
        assert!(id.is_admin());
        assert_eq!(id.tenant(), Some("t1"));
    }
}
