//! First-contact validation.
//!
//! Checks run in a fixed order: known session, origin whitelist, shared key,
//! custom validator, configured fallback. The first check that accepts
//! wins.

use std::fmt;
use std::sync::Arc;

use roomcast_settings::{AuthSettings, ValidationFallback};

use crate::connection::ConnectionMeta;

/// Why a payload was accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcceptReason {
    /// The connection already has a session.
    Known,
    /// Origin is whitelisted for the current environment.
    Whitelist,
    /// The payload contains the shared key.
    SharedKey,
    /// The custom validator approved it.
    Custom,
    /// Nothing decided and the fallback is `accept`.
    Fallback,
}

/// Validation outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Admit the connection.
    Accept(AcceptReason),
    /// Reject and terminate the connection.
    Reject,
}

impl Verdict {
    /// Whether this verdict admits the connection.
    pub fn is_accept(self) -> bool {
        matches!(self, Self::Accept(_))
    }
}

/// Deployment-specific validation hook, consulted after the built-in checks.
pub trait CustomValidator: Send + Sync {
    /// Return `true` to admit the connection.
    fn validate(&self, meta: &ConnectionMeta, payload: &str) -> bool;
}

impl<F> CustomValidator for F
where
    F: Fn(&ConnectionMeta, &str) -> bool + Send + Sync,
{
    fn validate(&self, meta: &ConnectionMeta, payload: &str) -> bool {
        self(meta, payload)
    }
}

/// Validation pipeline configured from [`AuthSettings`].
#[derive(Clone)]
pub struct Validator {
    allowed: Vec<String>,
    external_key: Option<String>,
    custom: Option<Arc<dyn CustomValidator>>,
    fallback: ValidationFallback,
}

impl Validator {
    /// Pipeline using the whitelist of the configured environment.
    pub fn new(auth: &AuthSettings) -> Self {
        Self {
            allowed: auth
                .allowed_hosts()
                .iter()
                .map(|host| host.trim().to_ascii_lowercase())
                .filter(|host| !host.is_empty())
                .collect(),
            external_key: auth.external_key.clone().filter(|key| !key.is_empty()),
            custom: None,
            fallback: auth.fallback,
        }
    }

    /// Install the custom validation hook.
    #[must_use]
    pub fn with_custom(mut self, custom: Arc<dyn CustomValidator>) -> Self {
        self.custom = Some(custom);
        self
    }

    /// Decide a first-contact payload.
    ///
    /// `known` is whether the connection already holds a session.
    pub fn check(&self, known: bool, meta: &ConnectionMeta, payload: &str) -> Verdict {
        if known {
            return Verdict::Accept(AcceptReason::Known);
        }
        if self.whitelisted(meta) {
            return Verdict::Accept(AcceptReason::Whitelist);
        }
        if self
            .external_key
            .as_deref()
            .is_some_and(|key| payload.contains(key))
        {
            return Verdict::Accept(AcceptReason::SharedKey);
        }
        if let Some(custom) = &self.custom {
            if custom.validate(meta, payload) {
                return Verdict::Accept(AcceptReason::Custom);
            }
            return Verdict::Reject;
        }
        match self.fallback {
            ValidationFallback::Accept => Verdict::Accept(AcceptReason::Fallback),
            ValidationFallback::Reject => Verdict::Reject,
        }
    }

    fn whitelisted(&self, meta: &ConnectionMeta) -> bool {
        if self.allowed.is_empty() {
            return false;
        }
        let origin = meta.origin.as_deref().map(str::to_ascii_lowercase);
        let bare_origin = origin.as_deref().map(strip_scheme);

        [origin.as_deref(), bare_origin]
            .into_iter()
            .flatten()
            .any(|candidate| self.allowed.iter().any(|allowed| allowed == candidate))
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("allowed", &self.allowed)
            .field("external_key", &self.external_key.as_ref().map(|_| "<redacted>"))
            .field("custom", &self.custom.is_some())
            .field("fallback", &self.fallback)
            .finish()
    }
}

fn strip_scheme(origin: &str) -> &str {
    origin
        .split_once("://")
        .map_or(origin, |(_, rest)| rest)
        .trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn auth(hosts: &[&str], key: Option<&str>) -> AuthSettings {
        let mut auth = AuthSettings::default();
        let _ = auth.whitelist.insert(
            "local".into(),
            hosts.iter().map(|h| (*h).to_string()).collect(),
        );
        auth.external_key = key.map(str::to_string);
        auth
    }

    fn meta_with(origin: Option<&str>, host: Option<&str>) -> ConnectionMeta {
        ConnectionMeta {
            origin: origin.map(str::to_string),
            host: host.map(str::to_string),
            ..ConnectionMeta::default()
        }
    }

    #[test]
    fn known_session_bypasses_checks() {
        let validator = Validator::new(&AuthSettings::default());
        assert_eq!(
            validator.check(true, &ConnectionMeta::default(), ""),
            Verdict::Accept(AcceptReason::Known)
        );
    }

    #[test]
    fn origin_whitelist_matches_with_or_without_scheme() {
        let validator = Validator::new(&auth(&["app.test"], None));
        let verdict = validator.check(false, &meta_with(Some("https://APP.test"), None), "{}");
        assert_eq!(verdict, Verdict::Accept(AcceptReason::Whitelist));

        let validator = Validator::new(&auth(&["http://app.test"], None));
        let verdict = validator.check(false, &meta_with(Some("http://app.test"), None), "{}");
        assert_eq!(verdict, Verdict::Accept(AcceptReason::Whitelist));
    }

    #[test]
    fn host_header_alone_is_rejected() {
        let validator = Validator::new(&auth(&["localhost:3000"], None));
        let verdict = validator.check(false, &meta_with(None, Some("localhost:3000")), "{}");
        assert_eq!(verdict, Verdict::Reject);

        let verdict = validator.check(
            false,
            &meta_with(Some("http://localhost:3000"), Some("localhost:3000")),
            "{}",
        );
        assert_eq!(verdict, Verdict::Accept(AcceptReason::Whitelist));
    }

    #[test]
    fn other_environment_is_ignored() {
        let mut settings = auth(&["app.test"], None);
        settings.environment = "production".into();
        let validator = Validator::new(&settings);
        let verdict = validator.check(false, &meta_with(Some("app.test"), None), "{}");
        assert_eq!(verdict, Verdict::Reject);
    }

    #[test]
    fn shared_key_substring() {
        let validator = Validator::new(&auth(&[], Some("s3cret")));
        let verdict = validator.check(
            false,
            &ConnectionMeta::default(),
            r#"{"request":"join:lobby","key":"xx-s3cret-yy"}"#,
        );
        assert_eq!(verdict, Verdict::Accept(AcceptReason::SharedKey));
        assert_eq!(
            validator.check(false, &ConnectionMeta::default(), "nothing"),
            Verdict::Reject
        );
    }

    #[test]
    fn empty_key_never_matches() {
        let validator = Validator::new(&auth(&[], Some("")));
        assert_eq!(
            validator.check(false, &ConnectionMeta::default(), "anything"),
            Verdict::Reject
        );
    }

    #[test]
    fn custom_validator_closure() {
        let custom = |meta: &ConnectionMeta, payload: &str| {
            meta.user_agent.as_deref() == Some("bot") && payload.contains("hello")
        };
        let validator = Validator::new(&AuthSettings::default()).with_custom(Arc::new(custom));
        let meta = ConnectionMeta {
            user_agent: Some("bot".into()),
            ..ConnectionMeta::default()
        };
        assert_matches!(
            validator.check(false, &meta, "hello"),
            Verdict::Accept(AcceptReason::Custom)
        );
        assert_eq!(validator.check(false, &meta, "bye"), Verdict::Reject);
    }

    #[test]
    fn custom_refusal_overrides_accept_fallback() {
        let mut settings = AuthSettings::default();
        settings.fallback = ValidationFallback::Accept;
        let validator =
            Validator::new(&settings).with_custom(Arc::new(|_: &ConnectionMeta, _: &str| false));
        assert_eq!(
            validator.check(false, &ConnectionMeta::default(), ""),
            Verdict::Reject
        );
    }

    #[test]
    fn fallback_decides_last() {
        let mut settings = AuthSettings::default();
        assert_eq!(
            Validator::new(&settings).check(false, &ConnectionMeta::default(), ""),
            Verdict::Reject
        );
        settings.fallback = ValidationFallback::Accept;
        assert_eq!(
            Validator::new(&settings).check(false, &ConnectionMeta::default(), ""),
            Verdict::Accept(AcceptReason::Fallback)
        );
    }

    #[test]
    fn debug_redacts_key() {
        let validator = Validator::new(&auth(&[], Some("s3cret")));
        assert!(!format!("{validator:?}").contains("s3cret"));
    }
}
