//! The two Payroll session cookies.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use time::Duration;

use paybridge_auth::{SessionStage, SessionToken};

pub const IDENTITY_COOKIE: &str = "paybridge_identity";
pub const STEP_UP_COOKIE: &str = "paybridge_step_up";

pub fn cookie_name(stage: SessionStage) -> &'static str {
    match stage {
        SessionStage::IdentityVerified => IDENTITY_COOKIE,
        SessionStage::StepUpPassed => STEP_UP_COOKIE,
    }
}

/// Cookie attributes for the deployment.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CookiePolicy {
    pub secure: bool,
}

impl CookiePolicy {
    /// HTTP-only session cookie carrying `token`, expiring with it.
    pub fn session_cookie(&self, token: &SessionToken, now: DateTime<Utc>) -> Cookie<'static> {
        Cookie::build((cookie_name(token.stage), token.value.clone()))
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(Duration::seconds(token.ttl(now).num_seconds()))
            .build()
    }
}

/// Removal cookie for `stage`.
pub fn clear_session_cookie(stage: SessionStage) -> Cookie<'static> {
    Cookie::build((cookie_name(stage), ""))
        .path("/")
        .max_age(Duration::ZERO)
        .build()
}

pub fn session_token(jar: &CookieJar, stage: SessionStage) -> Option<String> {
    jar.get(cookie_name(stage))
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_cookie_attributes() {
        let now = Utc::now();
        let token = SessionToken {
            value: "abc".to_string(),
            stage: SessionStage::StepUpPassed,
            expires_at: now + chrono::Duration::hours(12),
        };
        let cookie = CookiePolicy { secure: true }.session_cookie(&token, now);
        assert_eq!(cookie.name(), STEP_UP_COOKIE);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.max_age(), Some(Duration::hours(12)));
    }

    #[test]
    fn empty_cookie_counts_as_absent() {
        let jar = CookieJar::new().add(Cookie::new(IDENTITY_COOKIE, ""));
        assert_eq!(session_token(&jar, SessionStage::IdentityVerified), None);
    }
}
