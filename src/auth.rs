use bcrypt::{hash, verify, DEFAULT_COST};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{PortalError, Result};
use crate::models::{AuthPayload, Identity, Role};

const PASSWORD_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

pub fn hash_password(password: &str) -> Result<String> {
    Ok(hash(password, DEFAULT_COST)?)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    Ok(verify(password, hash)?)
}

/// Signs a token for a backend session. `role` is the cached role hint the
/// session store starts from.
pub fn create_jwt(
    secret: &str,
    identity: &Identity,
    role: Option<Role>,
    sid: uuid::Uuid,
    ttl_secs: u64,
) -> Result<String> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| PortalError::Internal(e.to_string()))?
        .as_secs();

    let claims = AuthPayload {
        sub: identity.id,
        email: identity.email.clone(),
        role,
        sid,
        exp: (now + ttl_secs) as usize,
    };

    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

pub fn validate_jwt(secret: &str, token: &str) -> Result<AuthPayload> {
    let token_data = decode::<AuthPayload>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )?;
    Ok(token_data.claims)
}

/// Initial password for a registered occupant: eight random alphanumerics
/// plus a trailing `!`.
pub fn generate_password() -> String {
    let mut rng = rand::rng();
    let mut password: String = (0..8)
        .map(|_| PASSWORD_CHARSET[rng.random_range(0..PASSWORD_CHARSET.len())] as char)
        .collect();
    password.push('!');
    password
}
