use axum::{
    extract::{Json, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
    Extension,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::AppError;
use crate::routes::AppState;

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
// password hashing (argon2)
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand_core::OsRng;

const USER_COLUMNS: &str = "id, email, password_hash, full_name, currency, language, \
     budget_alerts, monthly_reports, transaction_updates, security_alerts, created_at";

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterReq>,
) -> Result<(StatusCode, Json<AuthResp>), AppError> {
    let user_id = Uuid::new_v4();
    let password_hash = hash_password(&payload.password)
        .map_err(|e| AppError::Internal(format!("hash error: {e}")))?;

    let sql = format!(
        "INSERT INTO users (id, email, password_hash, full_name) \
         VALUES ($1, $2, $3, $4) \
         RETURNING {USER_COLUMNS}"
    );
    let row = sqlx::query_as::<_, UserRow>(&sql)
        .bind(user_id)
        .bind(&payload.email)
        .bind(&password_hash)
        .bind(&payload.full_name)
        .fetch_one(&state.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.constraint() == Some("users_email_key") => {
                AppError::Conflict("email already registered".to_string())
            }
            e => AppError::Store(e),
        })?;

    let token = encode_jwt(row.id)?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResp {
            user: row.into(),
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginReq>,
) -> Result<Json<AuthResp>, AppError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
    let row: Option<UserRow> = sqlx::query_as(&sql)
        .bind(&payload.email)
        .fetch_optional(&state.pool)
        .await
        .map_err(AppError::Store)?;

    let Some(row) = row else {
        return Err(AppError::Unauthorized(
            "Invalid email or password".to_string(),
        ));
    };
    let is_valid = verify_password(&payload.password, &row.password_hash)
        .map_err(|e| AppError::Internal(format!("verify error: {e}")))?;
    if !is_valid {
        return Err(AppError::Unauthorized(
            "Invalid email or password".to_string(),
        ));
    }

    let token = encode_jwt(row.id)?;
    Ok(Json(AuthResp {
        user: row.into(),
        token,
    }))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<UserDto>, AppError> {
    let row = load_user_db(&state.pool, user.user_id)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => AppError::NotFound("user not found".to_string()),
            e => AppError::Store(e),
        })?;
    Ok(Json(row.into()))
}

pub async fn load_user_db(pool: &sqlx::PgPool, user_id: Uuid) -> Result<UserRow, sqlx::Error> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
    sqlx::query_as::<_, UserRow>(&sql)
        .bind(user_id)
        .fetch_one(pool)
        .await
}

pub async fn update_settings(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<UpdateSettingsReq>,
) -> Result<Json<UserDto>, AppError> {
    // A password change must prove knowledge of the current one first.
    let new_hash = match &req.new_password {
        Some(new_password) => {
            let Some(current) = req.current_password.as_deref() else {
                return Err(AppError::Validation(
                    "current_password is required to change the password".to_string(),
                ));
            };
            let row = load_user_db(&state.pool, user.user_id)
                .await
                .map_err(|e| match e {
                    sqlx::Error::RowNotFound => {
                        AppError::NotFound("user not found".to_string())
                    }
                    e => AppError::Store(e),
                })?;
            let ok = verify_password(current, &row.password_hash)
                .map_err(|e| AppError::Internal(format!("verify error: {e}")))?;
            if !ok {
                return Err(AppError::Unauthorized(
                    "current password is incorrect".to_string(),
                ));
            }
            Some(
                hash_password(new_password)
                    .map_err(|e| AppError::Internal(format!("hash error: {e}")))?,
            )
        }
        None => None,
    };

    let notif = req.notifications.unwrap_or_default();
    let sql = format!(
        "UPDATE users SET \
             full_name = COALESCE($2, full_name), \
             email = COALESCE($3, email), \
             currency = COALESCE($4, currency), \
             language = COALESCE($5, language), \
             budget_alerts = COALESCE($6, budget_alerts), \
             monthly_reports = COALESCE($7, monthly_reports), \
             transaction_updates = COALESCE($8, transaction_updates), \
             security_alerts = COALESCE($9, security_alerts), \
             password_hash = COALESCE($10, password_hash) \
         WHERE id = $1 \
         RETURNING {USER_COLUMNS}"
    );
    let row = sqlx::query_as::<_, UserRow>(&sql)
        .bind(user.user_id)
        .bind(&req.full_name)
        .bind(&req.email)
        .bind(&req.currency)
        .bind(&req.language)
        .bind(notif.budget_alerts)
        .bind(notif.monthly_reports)
        .bind(notif.transaction_updates)
        .bind(notif.security_alerts)
        .bind(&new_hash)
        .fetch_one(&state.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => AppError::NotFound("user not found".to_string()),
            sqlx::Error::Database(ref db) if db.constraint() == Some("users_email_key") => {
                AppError::Conflict("email already in use".to_string())
            }
            e => AppError::Store(e),
        })?;

    Ok(Json(row.into()))
}

pub async fn delete_account(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<StatusCode, AppError> {
    // Owned transactions and budgets go with the user via ON DELETE CASCADE.
    let result = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(user.user_id)
        .execute(&state.pool)
        .await
        .map_err(AppError::Store)?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("user not found".to_string()));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

pub fn verify_password(
    password: &str,
    stored_hash: &str,
) -> Result<bool, argon2::password_hash::Error> {
    let parsed = PasswordHash::new(stored_hash)?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

pub fn encode_jwt(user_id: Uuid) -> Result<String, AppError> {
    let secret = std::env::var("JWT_SECRET")
        .map_err(|_| AppError::Internal("JWT_SECRET not set".to_string()))?;
    let now = Utc::now();
    let expire: chrono::TimeDelta = Duration::hours(24);
    let exp: usize = (now + expire).timestamp() as usize;
    let iat: usize = now.timestamp() as usize;

    let claim = Claims {
        sub: user_id.to_string(),
        iat,
        exp,
    };

    encode(
        &Header::default(),
        &claim,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("jwt encode error: {e}")))
}

pub fn decode_jwt(token: &str) -> Result<Claims, AppError> {
    let secret = std::env::var("JWT_SECRET")
        .map_err(|_| AppError::Internal("JWT_SECRET not set".to_string()))?;

    let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
    validation.validate_exp = true;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| AppError::Unauthorized(format!("invalid token: {e}")))?;

    Ok(data.claims)
}

pub async fn auth_middleware(mut req: Request, next: Next) -> Result<Response, AppError> {
    let auth = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".to_string()))?;

    let token = auth
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthorized("Invalid Authorization scheme".to_string()))?;

    let claims = decode_jwt(token)?;
    let user_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| AppError::Unauthorized("Invalid sub in token".to_string()))?;

    req.extensions_mut().insert(AuthUser { user_id });

    Ok(next.run(req).await)
}

#[derive(Serialize, Deserialize)]
pub struct Claims {
    pub exp: usize, // Expiry time of the token
    pub iat: usize, // Issued at time of the token
    pub sub: String, // user_id (uuid string)
}

#[derive(Deserialize)]
pub struct RegisterReq {
    pub full_name: String,
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginReq {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct AuthResp {
    pub user: UserDto,
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSettingsReq {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub currency: Option<String>,
    pub language: Option<String>,
    pub notifications: Option<NotificationsPatch>,
    pub current_password: Option<String>,
    pub new_password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NotificationsPatch {
    pub budget_alerts: Option<bool>,
    pub monthly_reports: Option<bool>,
    pub transaction_updates: Option<bool>,
    pub security_alerts: Option<bool>,
}

#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: Uuid,
}

#[derive(Debug, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub currency: String,
    pub language: String,
    pub budget_alerts: bool,
    pub monthly_reports: bool,
    pub transaction_updates: bool,
    pub security_alerts: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct NotificationsDto {
    pub budget_alerts: bool,
    pub monthly_reports: bool,
    pub transaction_updates: bool,
    pub security_alerts: bool,
}

#[derive(Debug, Serialize)]
pub struct UserDto {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub currency: String,
    pub language: String,
    pub notifications: NotificationsDto,
    pub created_at: DateTime<Utc>,
}

impl From<UserRow> for UserDto {
    fn from(r: UserRow) -> Self {
        Self {
            id: r.id,
            email: r.email,
            full_name: r.full_name,
            currency: r.currency,
            language: r.language,
            notifications: NotificationsDto {
                budget_alerts: r.budget_alerts,
                monthly_reports: r.monthly_reports,
                transaction_updates: r.transaction_updates,
                security_alerts: r.security_alerts,
            },
            created_at: r.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("hunter2").unwrap();
        assert!(verify_password("hunter2", &hash).unwrap());
        assert!(!verify_password("hunter3", &hash).unwrap());
    }

    #[test]
    fn jwt_round_trip_keeps_subject() {
        std::env::set_var("JWT_SECRET", "test-secret");
        let user_id = Uuid::new_v4();
        let token = encode_jwt(user_id).unwrap();
        let claims = decode_jwt(&token).unwrap();
        assert_eq!(claims.sub, user_id.to_string());
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn tampered_token_is_rejected() {
        std::env::set_var("JWT_SECRET", "test-secret");
        let token = encode_jwt(Uuid::new_v4()).unwrap();
        let mut forged = token.clone();
        forged.push('x');
        assert!(decode_jwt(&forged).is_err());
    }

    #[test]
    fn user_dto_nests_notification_flags() {
        let row = UserRow {
            id: Uuid::new_v4(),
            email: "a@b.c".to_string(),
            password_hash: "hash".to_string(),
            full_name: "Ada".to_string(),
            currency: "USD".to_string(),
            language: "en".to_string(),
            budget_alerts: true,
            monthly_reports: false,
            transaction_updates: true,
            security_alerts: false,
            created_at: Utc::now(),
        };
        let dto: UserDto = row.into();
        assert!(dto.notifications.budget_alerts);
        assert!(!dto.notifications.monthly_reports);
        let json = serde_json::to_value(&dto).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["notifications"]["transaction_updates"], true);
    }
}
