use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString,
};
use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use jsonwebtoken::{EncodingKey, Header, encode};
use rand_core::OsRng;
use tracing::info;
use uuid::Uuid;

use wadmin_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};

use crate::error::ApiError;
use crate::middleware::{bearer_token, decode_token, require_admin};
use crate::state::AppState;

/// POST /auth/register: the very first account becomes the admin and gets a
/// token back. After that, only an admin (bearer token) can add operators.
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.username.len() < 3 || req.username.len() > 32 {
        return Err(ApiError::Validation("username must be 3-32 characters".into()));
    }
    if req.password.len() < 8 {
        return Err(ApiError::Validation("password must be at least 8 characters".into()));
    }

    let inviter = match bearer_token(&headers) {
        Some(token) => {
            let claims = decode_token(token, &state.jwt_secret)?;
            require_admin(&claims)?;
            Some(claims)
        }
        None => None,
    };

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();

    let user_id = Uuid::new_v4();
    let taken = || "username already taken".to_string();

    let Some(inviter) = inviter else {
        let created = state
            .db
            .create_first_user(&user_id.to_string(), &req.username, &password_hash)
            .map_err(|e| ApiError::from_insert(e, taken))?;
        if !created {
            return Err(ApiError::Forbidden("registration is closed; ask an admin"));
        }
        info!("Bootstrapped admin {}", req.username);

        let token = create_token(&state.jwt_secret, user_id, &req.username, true)?;
        let resp = RegisterResponse {
            user_id,
            is_admin: true,
            token: Some(token),
        };
        return Ok((StatusCode::CREATED, Json(resp)));
    };

    state
        .db
        .create_user(&user_id.to_string(), &req.username, &password_hash, false)
        .map_err(|e| ApiError::from_insert(e, taken))?;
    info!("{} registered operator {}", inviter.username, req.username);

    let resp = RegisterResponse {
        user_id,
        is_admin: false,
        token: None,
    };
    Ok((StatusCode::CREATED, Json(resp)))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .get_user_by_username(&req.username)?
        .ok_or(ApiError::Unauthorized)?;

    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| anyhow::anyhow!("stored hash for {} is corrupt: {}", user.username, e))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized)?;

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| anyhow::anyhow!("corrupt user id '{}': {}", user.id, e))?;

    let token = create_token(&state.jwt_secret, user_id, &user.username, user.is_admin)?;

    Ok(Json(LoginResponse {
        user_id,
        username: user.username,
        is_admin: user.is_admin,
        token,
    }))
}

pub fn create_token(
    secret: &str,
    user_id: Uuid,
    username: &str,
    is_admin: bool,
) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        is_admin,
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
