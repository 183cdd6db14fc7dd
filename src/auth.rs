use crate::error::AppError;
use argon2::Argon2;
use axum::{
    async_trait,
    extract::FromRequestParts,
    headers::{authorization::Bearer, Authorization},
    http::{request::Parts, StatusCode},
    TypedHeader,
};
use chrono::NaiveDateTime;
use jsonwebtoken::{
    errors::Result as JwtResult, DecodingKey, EncodingKey, Header, TokenData, Validation,
};
use password_hash::{
    self, rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{ops::Deref, time::Duration};

pub fn hash_password(password: impl AsRef<[u8]>) -> password_hash::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_ref(), &salt)
        .map(|h| h.to_string())
}

pub fn verify_password(
    password: impl AsRef<[u8]>,
    password_hash: impl AsRef<str>,
) -> password_hash::Result<bool> {
    let parsed_hash = PasswordHash::new(password_hash.as_ref())?;
    Ok(Argon2::default()
        .verify_password(password.as_ref(), &parsed_hash)
        .is_ok())
}

struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

lazy_static::lazy_static! {
    static ref KEYS: Keys = {
        let secret = std::env::var("JWT_SECRET").expect("JWT_SECRET must be set");
        Keys {
            encoding: EncodingKey::from_base64_secret(&secret).expect("JWT_SECRET is not valid base64"),
            decoding: DecodingKey::from_base64_secret(&secret).expect("JWT_SECRET is not valid base64"),
        }
    };
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i32,
    pub exp: u64,
}

/// Sessions last a week, matching the client's cached-login window.
pub const SESSION_LIFETIME: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[allow(unused_must_use)]
pub fn ensure_jwt_secret_is_valid() {
    KEYS.deref();
}

pub fn generate_jwt(user_id: i32, exp: Duration) -> JwtResult<String> {
    jsonwebtoken::encode(
        &Header::default(),
        &Claims {
            user_id,
            exp: jsonwebtoken::get_current_timestamp() + exp.as_secs(),
        },
        &KEYS.encoding,
    )
}

pub fn validate_jwt(token: &str) -> JwtResult<TokenData<Claims>> {
    jsonwebtoken::decode::<Claims>(token, &KEYS.decoding, &Validation::default())
}

/// Bearer-token extractor. Decodes and validates the session token; handlers
/// that need the account row (for role or club checks) load it themselves so
/// revoked or deleted accounts fail at the query rather than here.
pub struct ExtractAuth(pub Claims);

#[async_trait]
impl<S> FromRequestParts<S> for ExtractAuth
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| {
                    AppError::from(StatusCode::UNAUTHORIZED, "missing authorization token")
                })?;

        let token = validate_jwt(bearer.token())
            .map_err(|_| AppError::from(StatusCode::UNAUTHORIZED, "invalid or expired token"))?;

        Ok(ExtractAuth(token.claims))
    }
}

/// How long a password-reset code stays usable.
pub const OTP_LIFETIME_MINUTES: i64 = 10;

pub fn generate_otp() -> String {
    // six digits, no leading zeros
    rand::thread_rng().gen_range(100_000..1_000_000).to_string()
}

pub fn otp_expiry(now: NaiveDateTime) -> NaiveDateTime {
    now + chrono::Duration::minutes(OTP_LIFETIME_MINUTES)
}

/// A code is accepted only while the stored copy matches and has not expired.
/// A failed attempt leaves the stored code untouched.
pub fn otp_matches(
    stored: Option<&str>,
    expires: Option<NaiveDateTime>,
    provided: &str,
    now: NaiveDateTime,
) -> bool {
    match (stored, expires) {
        (Some(code), Some(expires)) => code == provided && expires > now,
        _ => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::NaiveDate;

    fn at(hour: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 1)
            .unwrap()
            .and_hms_opt(hour, min, 0)
            .unwrap()
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &hash).unwrap());
        assert!(!verify_password("wrong horse", &hash).unwrap());
    }

    #[test]
    fn hashes_are_salted() {
        let a = hash_password("same input").unwrap();
        let b = hash_password("same input").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn jwt_round_trip() {
        std::env::set_var("JWT_SECRET", "Y2x1YnNwaGVyZS10ZXN0LXNlY3JldA==");
        let token = generate_jwt(42, Duration::from_secs(60)).unwrap();
        let data = validate_jwt(&token).unwrap();
        assert_eq!(data.claims.user_id, 42);
        assert!(validate_jwt("not-a-token").is_err());
    }

    #[test]
    fn otp_is_six_digits() {
        for _ in 0..64 {
            let otp = generate_otp();
            assert_eq!(otp.len(), 6);
            assert!(otp.chars().all(|c| c.is_ascii_digit()));
            assert_ne!(otp.as_bytes()[0], b'0');
        }
    }

    #[test]
    fn otp_accepted_before_expiry() {
        let expires = Some(at(10, 10));
        assert!(otp_matches(Some("123456"), expires, "123456", at(10, 5)));
    }

    #[test]
    fn otp_rejected_when_wrong_expired_or_absent() {
        let expires = Some(at(10, 10));
        assert!(!otp_matches(Some("123456"), expires, "654321", at(10, 5)));
        assert!(!otp_matches(Some("123456"), expires, "123456", at(10, 15)));
        // boundary: an exactly-expired code is no longer valid
        assert!(!otp_matches(Some("123456"), expires, "123456", at(10, 10)));
        assert!(!otp_matches(None, None, "123456", at(10, 5)));
        assert!(!otp_matches(Some("123456"), None, "123456", at(10, 5)));
    }
}
