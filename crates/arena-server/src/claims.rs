//! Caller identity extraction.
//!
//! Authentication happens upstream; the server only reads the verified user
//! id a proxy attached to the request.

use arena_core::ids::UserId;
use arena_settings::AuthSettings;
use axum::http::HeaderMap;
use serde::Deserialize;

/// Query parameters that may carry an identity.
#[derive(Debug, Default, Deserialize)]
pub struct IdentityQuery {
    /// Development-only user override.
    pub user: Option<String>,
}

/// Resolves the authenticated user of an inbound request.
pub trait ClaimsResolver: Send + Sync {
    /// The caller, or `None` when the request is unauthenticated.
    fn resolve(&self, headers: &HeaderMap, query: &IdentityQuery) -> Option<UserId>;
}

/// Reads the user id from a configured header, optionally falling back to
/// the `user` query parameter.
#[derive(Clone, Debug)]
pub struct HeaderClaimsResolver {
    header: String,
    allow_query_user: bool,
}

impl HeaderClaimsResolver {
    /// Resolver for `header`.
    pub fn new(header: impl Into<String>, allow_query_user: bool) -> Self {
        Self {
            header: header.into().to_ascii_lowercase(),
            allow_query_user,
        }
    }

    /// Resolver configured from settings.
    pub fn from_settings(auth: &AuthSettings) -> Self {
        Self::new(auth.user_header.clone(), auth.allow_query_user)
    }
}

fn non_blank(raw: &str) -> Option<UserId> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| UserId::from(trimmed))
}

impl ClaimsResolver for HeaderClaimsResolver {
    fn resolve(&self, headers: &HeaderMap, query: &IdentityQuery) -> Option<UserId> {
        let from_header = headers
            .get(self.header.as_str())
            .and_then(|v| v.to_str().ok())
            .and_then(non_blank);
        if from_header.is_some() {
            return from_header;
        }
        if self.allow_query_user {
            return query.user.as_deref().and_then(non_blank);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            let _ = map.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        map
    }

    fn query(user: Option<&str>) -> IdentityQuery {
        IdentityQuery {
            user: user.map(str::to_owned),
        }
    }

    #[test]
    fn header_identity_is_trimmed() {
        let resolver = HeaderClaimsResolver::new("x-user-id", false);
        let user = resolver.resolve(&headers(&[("x-user-id", " a@x.io ")]), &query(None));
        assert_eq!(user.unwrap().as_str(), "a@x.io");
    }

    #[test]
    fn header_name_is_case_insensitive() {
        let resolver = HeaderClaimsResolver::new("X-Forwarded-User", false);
        let user = resolver.resolve(&headers(&[("x-forwarded-user", "b@x.io")]), &query(None));
        assert_eq!(user.unwrap().as_str(), "b@x.io");
    }

    #[test]
    fn missing_or_blank_header_is_anonymous() {
        let resolver = HeaderClaimsResolver::new("x-user-id", false);
        assert!(resolver.resolve(&HeaderMap::new(), &query(None)).is_none());
        assert!(resolver.resolve(&headers(&[("x-user-id", "  ")]), &query(None)).is_none());
    }

    #[test]
    fn query_user_ignored_unless_enabled() {
        let strict = HeaderClaimsResolver::new("x-user-id", false);
        assert!(strict.resolve(&HeaderMap::new(), &query(Some("a@x.io"))).is_none());

        let dev = HeaderClaimsResolver::from_settings(&AuthSettings {
            user_header: "x-user-id".into(),
            allow_query_user: true,
        });
        let user = dev.resolve(&HeaderMap::new(), &query(Some("a@x.io")));
        assert_eq!(user.unwrap().as_str(), "a@x.io");
    }

    #[test]
    fn header_wins_over_query() {
        let dev = HeaderClaimsResolver::new("x-user-id", true);
        let user = dev.resolve(&headers(&[("x-user-id", "h@x.io")]), &query(Some("q@x.io")));
        assert_eq!(user.unwrap().as_str(), "h@x.io");
    }
}
