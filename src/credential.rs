//! Credential binding for new sessions
//!
//! Resolves the upstream credential a session carries for its whole lifetime.
//! Sources are consulted in priority order: URL path segment, request header,
//! then the process-wide default. Query parameters are never consulted.

use std::{fmt, sync::Arc, sync::OnceLock};

use axum::http::{HeaderMap, HeaderName};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use regex::Regex;

use crate::errors::AppError;

/// Opaque upstream credential. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(Arc<str>);

impl Credential {
    pub fn new(value: impl Into<Arc<str>>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Path,
    Header,
    Default,
}

#[derive(Debug, Clone)]
pub struct CredentialBinder {
    header: HeaderName,
    default: Option<Credential>,
}

fn path_segment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._~+=:-]{1,512}$").unwrap_or_else(|err| {
            panic!("credential path pattern must compile: {err}");
        })
    })
}

impl CredentialBinder {
    pub fn new(header: HeaderName, default: Option<String>) -> Self {
        Self {
            header,
            default: default
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .map(Credential::new),
        }
    }

    pub fn resolve(
        &self,
        path_segment: Option<&str>,
        headers: &HeaderMap,
    ) -> Result<(Credential, CredentialSource), AppError> {
        if let Some(segment) = path_segment.map(str::trim).filter(|value| !value.is_empty()) {
            if !path_segment_pattern().is_match(segment) {
                return Err(AppError::MissingCredential);
            }
            return Ok((Credential::new(segment), CredentialSource::Path));
        }

        if let Some(token) = self.header_credential(headers) {
            return Ok((Credential::new(token), CredentialSource::Header));
        }

        self.default
            .clone()
            .map(|credential| (credential, CredentialSource::Default))
            .ok_or(AppError::MissingCredential)
    }

    fn header_credential(&self, headers: &HeaderMap) -> Option<String> {
        if let Some(Authorization(bearer)) = headers.typed_get::<Authorization<Bearer>>() {
            let token = bearer.token().trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }

        headers
            .get(&self.header)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{header, HeaderValue};

    use super::*;

    fn binder(default: Option<&str>) -> CredentialBinder {
        CredentialBinder::new(
            HeaderName::from_static("x-api-key"),
            default.map(str::to_string),
        )
    }

    #[test]
    fn path_segment_wins_over_header_and_default() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));

        let (credential, source) = binder(Some("fallback"))
            .resolve(Some("from-path"), &headers)
            .expect("credential resolves");
        assert_eq!(credential.expose(), "from-path");
        assert_eq!(source, CredentialSource::Path);
    }

    #[test]
    fn bearer_header_wins_over_custom_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer bearer-token"));
        headers.insert("x-api-key", HeaderValue::from_static("custom-token"));

        let (credential, source) = binder(None)
            .resolve(None, &headers)
            .expect("credential resolves");
        assert_eq!(credential.expose(), "bearer-token");
        assert_eq!(source, CredentialSource::Header);
    }

    #[test]
    fn custom_header_is_used_without_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("custom-token"));

        let (credential, _) = binder(None)
            .resolve(None, &headers)
            .expect("credential resolves");
        assert_eq!(credential.expose(), "custom-token");
    }

    #[test]
    fn falls_back_to_default() {
        let (credential, source) = binder(Some("  env-default  "))
            .resolve(None, &HeaderMap::new())
            .expect("default resolves");
        assert_eq!(credential.expose(), "env-default");
        assert_eq!(source, CredentialSource::Default);
    }

    #[test]
    fn nothing_resolvable_is_missing_credential() {
        let err = binder(None)
            .resolve(None, &HeaderMap::new())
            .expect_err("no credential anywhere");
        assert_eq!(err, AppError::MissingCredential);

        let err = binder(Some("   "))
            .resolve(Some(""), &HeaderMap::new())
            .expect_err("blank values do not count");
        assert_eq!(err, AppError::MissingCredential);
    }

    #[test]
    fn rejects_path_segments_with_unexpected_characters() {
        assert!(binder(Some("fallback"))
            .resolve(Some("bad token"), &HeaderMap::new())
            .is_err());
    }

    #[test]
    fn debug_output_is_redacted() {
        let credential = Credential::new("super-secret");
        assert_eq!(format!("{credential:?}"), "Credential([REDACTED])");
    }
}
