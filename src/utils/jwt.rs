use std::env;

use jsonwebtoken::{
    decode, encode, errors::Error, Algorithm, DecodingKey, EncodingKey, Header, TokenData,
    Validation,
};
use once_cell::sync::Lazy;

use crate::routes::auth::claims::Claims;

/// Minimum acceptable size for the JWT secret in bytes.
pub const MIN_JWT_SECRET_LENGTH: usize = 32;

struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

static KEYS: Lazy<JwtKeys> = Lazy::new(|| {
    let secret = env::var("JWT_SECRET").expect("JWT_SECRET must be set");
    if secret.len() < MIN_JWT_SECRET_LENGTH {
        panic!(
            "JWT_SECRET must be at least {} bytes, got {}",
            MIN_JWT_SECRET_LENGTH,
            secret.len()
        );
    }
    JwtKeys {
        encoding: EncodingKey::from_secret(secret.as_bytes()),
        decoding: DecodingKey::from_secret(secret.as_bytes()),
    }
});

/// Forces key construction so a missing or short `JWT_SECRET` aborts
/// startup instead of surfacing on the first authenticated request.
pub fn init() {
    Lazy::force(&KEYS);
}

pub fn create_jwt(claims: &Claims) -> Result<String, Error> {
    encode(&Header::default(), claims, &KEYS.encoding)
}

pub fn decode_jwt(token: &str) -> Result<TokenData<Claims>, Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.required_spec_claims.insert("exp".to_string());
    decode::<Claims>(token, &KEYS.decoding, &validation)
}

#[cfg(test)]
pub(crate) fn ensure_test_secret() {
    if env::var("JWT_SECRET").is_err() {
        env::set_var("JWT_SECRET", "0123456789abcdef0123456789abcdef");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};
    use uuid::Uuid;

    fn claims_expiring_in(offset_secs: i64) -> Claims {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        Claims {
            id: Uuid::new_v4().to_string(),
            email: "user@example.com".into(),
            full_name: Some("Jane Doe".into()),
            sid: Uuid::new_v4().to_string(),
            exp: (now + offset_secs) as usize,
        }
    }

    #[test]
    fn round_trips_valid_claims() {
        ensure_test_secret();
        let claims = claims_expiring_in(3600);
        let token = create_jwt(&claims).expect("token should encode");
        let decoded = decode_jwt(&token).expect("token should decode");
        assert_eq!(decoded.claims, claims);
    }

    #[test]
    fn rejects_expired_tokens() {
        ensure_test_secret();
        // Well past the default leeway.
        let claims = claims_expiring_in(-3600);
        let token = create_jwt(&claims).expect("token should encode");
        assert!(decode_jwt(&token).is_err());
    }

    #[test]
    fn rejects_garbage_tokens() {
        ensure_test_secret();
        assert!(decode_jwt("not.a.token").is_err());
    }
}
