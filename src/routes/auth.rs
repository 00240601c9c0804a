use std::sync::Arc;
use std::time::Duration;

use argon2::{
    password_hash::{PasswordHasher, SaltString},
    Argon2, PasswordHash, PasswordVerifier,
};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::utils::AppJson;
use crate::{
    db::{
        auth::AuthRepository,
        report::{ReportRepository, ReportSetting},
        user::{NewUser, User},
        utils::RecordId,
    },
    error::AppError,
    validation::auth::{parse_login, parse_register, LoginInput, RegisterInput},
};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    sub: String, // user_id
    exp: i64,    // expiration timestamp
    iat: i64,    // issued at timestamp
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    access_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    user: User,
    #[serde(flatten)]
    tokens: TokenPair,
    report_setting: Option<ReportSetting>,
}

/// Login payload with the message alongside its top-level fields.
#[derive(Debug, Serialize)]
struct LoginEnvelope {
    message: &'static str,
    #[serde(flatten)]
    response: LoginResponse,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    refresh_token: String,
}

// Authentication service
pub struct AuthService {
    repo: Arc<dyn AuthRepository>,
    reports: Arc<dyn ReportRepository>,
    jwt_secret: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl AuthService {
    pub fn new(
        repo: Arc<dyn AuthRepository>,
        reports: Arc<dyn ReportRepository>,
        jwt_secret: String,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            repo,
            reports,
            jwt_secret,
            access_ttl,
            refresh_ttl,
        }
    }

    pub async fn register(&self, req: RegisterInput) -> Result<User, AppError> {
        // Check if user already exists
        if self.repo.find_user_by_email(&req.email).await?.is_some() {
            return Err(AppError::bad_request("User already exists"));
        }

        let password_hash = hash_password(&req.password)?;

        let user = self
            .repo
            .create_user(NewUser {
                name: req.name,
                email: req.email,
                password_hash,
            })
            .await
            .map_err(|err| match err.as_database_error() {
                // lost a race against a concurrent registration
                Some(db_err) if db_err.is_unique_violation() => AppError::bad_request("User already exists"),
                _ => AppError::Database(err),
            })?;
        tracing::info!("user created with email: {}", user.email);

        Ok(user)
    }

    pub async fn login(&self, req: LoginInput) -> Result<LoginResponse, AppError> {
        tracing::info!("Attempting to log in user with email: {}", req.email);

        // Find user
        let user = self
            .repo
            .find_user_by_email(&req.email)
            .await?
            .ok_or_else(|| AppError::not_found("Email/password not found"))?;

        // Verify password
        if !verify_password(&req.password, &user.password_hash)? {
            tracing::warn!("Invalid credentials for user: {}", user.email);
            return Err(AppError::unauthorized("Invalid email or password"));
        }
        tracing::info!("Password verified for user: {}", user.email);

        let tokens = self.issue_tokens(&user.id).await?;
        let report_setting = self.reports.find_setting(&user.id).await?;

        Ok(LoginResponse {
            user,
            tokens,
            report_setting,
        })
    }

    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair, AppError> {
        // Verify refresh token and get user
        let user_id = self
            .repo
            .consume_refresh_token(refresh_token)
            .await?
            .ok_or_else(|| AppError::unauthorized("Invalid refresh token"))?;

        self.issue_tokens(&user_id).await
    }

    pub async fn current_user(&self, user_id: &RecordId) -> Result<User, AppError> {
        self.repo
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::not_found("User not found"))
    }

    pub fn verify_token(&self, token: &str) -> Result<RecordId, AppError> {
        let mut validation = jsonwebtoken::Validation::default();

        validation.leeway = 10;
        validation.validate_exp = true;
        validation.algorithms = vec![jsonwebtoken::Algorithm::HS256];

        let token_data = jsonwebtoken::decode::<Claims>(
            token,
            &jsonwebtoken::DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|err| {
            tracing::warn!("Error decoding token: {:?}", err);
            AppError::unauthorized("Invalid token")
        })?;

        Ok(RecordId::from(token_data.claims.sub))
    }

    /// Signs an access token and stores a fresh refresh token for the user.
    async fn issue_tokens(&self, user_id: &RecordId) -> Result<TokenPair, AppError> {
        let (access_token, expires_at) = self.access_token(user_id)?;

        let refresh_token = Uuid::new_v4().to_string();
        let refresh_expires_at = Utc::now() + self.refresh_ttl;
        self.repo
            .store_refresh_token(user_id, &refresh_token, refresh_expires_at)
            .await?;
        tracing::info!("Stored refresh token for user: {}", user_id);

        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_at,
        })
    }

    pub fn access_token(&self, user_id: &RecordId) -> Result<(String, DateTime<Utc>), AppError> {
        let now = Utc::now();
        let expires_at = now + self.access_ttl;

        let claims = Claims {
            sub: user_id.to_string(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
        };

        let token = jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|err| AppError::internal(format!("unable to sign token: {err}")))?;

        Ok((token, expires_at))
    }
}

fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut rand::thread_rng());
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_err| AppError::internal("unable to hash password"))
}

fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|_err| AppError::internal("unable to parse password hash"))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

// Route for handling new user registration
async fn register_handler(
    State(service): State<Arc<AuthService>>,
    AppJson(body): AppJson<Value>,
) -> Result<impl IntoResponse, AppError> {
    let req = parse_register(&body).map_err(AppError::Validation)?;
    service.register(req).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "User registered successfully" })),
    ))
}

// Route for handling user login
async fn login_handler(
    State(service): State<Arc<AuthService>>,
    AppJson(body): AppJson<Value>,
) -> Result<impl IntoResponse, AppError> {
    let req = parse_login(&body).map_err(AppError::Validation)?;
    let response = service.login(req).await?;

    Ok((
        StatusCode::OK,
        Json(LoginEnvelope {
            message: "User logged in successfully",
            response,
        }),
    ))
}

// Route for handling token refresh
async fn refresh_token_handler(
    State(service): State<Arc<AuthService>>,
    AppJson(req): AppJson<RefreshTokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tokens = service.refresh_token(&req.refresh_token).await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "message": "Token refreshed successfully",
            "accessToken": tokens.access_token,
            "refreshToken": tokens.refresh_token,
            "expiresAt": tokens.expires_at,
        })),
    ))
}

pub fn auth_routes(service: Arc<AuthService>) -> Router {
    Router::new()
        .route("/auth/register", post(register_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/refresh", post(refresh_token_handler))
        .with_state(service)
}
