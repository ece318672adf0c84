// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Principal Extraction
//!
//! Bearer tokens are validated upstream; by the time a request reaches
//! the gateway its identity claims are plain headers. Identity stays at
//! the HTTP boundary: everything below this module works with the
//! `Principal` record.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use std::convert::Infallible;

use crate::domain::principal::Principal;

pub const HEADER_SUBJECT: &str = "x-auth-subject";
pub const HEADER_EMAIL: &str = "x-auth-email";
pub const HEADER_TEAMS: &str = "x-auth-teams";
pub const HEADER_ROLES: &str = "x-auth-roles";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn header_list(headers: &HeaderMap, name: &str) -> Vec<String> {
    header_str(headers, name)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Missing subject degrades to the anonymous principal; the registry
/// rejects it, the enforcement adapter audits it as "anonymous".
pub fn principal_from_headers(headers: &HeaderMap) -> Principal {
    let id = header_str(headers, HEADER_SUBJECT)
        .unwrap_or("anonymous")
        .to_string();
    Principal {
        id,
        email: header_str(headers, HEADER_EMAIL).map(str::to_string),
        teams: header_list(headers, HEADER_TEAMS),
        roles: header_list(headers, HEADER_ROLES),
    }
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(principal_from_headers(&parts.headers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_full_claim_set() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_SUBJECT, HeaderValue::from_static("alice"));
        headers.insert(HEADER_EMAIL, HeaderValue::from_static("alice@example.com"));
        headers.insert(HEADER_TEAMS, HeaderValue::from_static("team-a, team-b"));
        headers.insert(HEADER_ROLES, HeaderValue::from_static("admin"));

        let principal = principal_from_headers(&headers);
        assert_eq!(principal.id, "alice");
        assert_eq!(principal.email.as_deref(), Some("alice@example.com"));
        assert_eq!(principal.teams, vec!["team-a", "team-b"]);
        assert!(principal.is_admin());
        assert_eq!(principal.team(), Some("team-a"));
    }

    #[test]
    fn test_missing_subject_is_anonymous() {
        let principal = principal_from_headers(&HeaderMap::new());
        assert_eq!(principal.id, "anonymous");
        assert!(principal.teams.is_empty());
        assert!(!principal.is_admin());
    }
}
