use crate::{
    auth::{self, ExtractAuth},
    email::{self, EMAIL_ADDRESS},
    error::{AppError, AppResult},
    models::{Club, ClubCategory, Role, User},
    schema::*,
    DbPool,
};
use axum::{
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{Datelike, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};
use lettre::{message::Mailbox, Address, Message};
use scoped_futures::ScopedFutureExt;
use serde::{Deserialize, Serialize};

use super::{
    club::ClubSummary, current_user, user::load_user_response, user::UserResponse, MessageResponse,
};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    name: String,
    email: String,
    password: String,
    role: Option<Role>,
    department: Option<String>,
    year: Option<i32>,
    club_name: Option<String>,
    club_description: Option<String>,
    club_category: Option<ClubCategory>,
}

/// Club fields a club-admin registration must carry.
struct ClubSeed {
    name: String,
    description: String,
    category: ClubCategory,
}

impl RegisterRequest {
    fn validate(&self) -> Result<Option<ClubSeed>, &'static str> {
        if self.name.trim().is_empty() {
            return Err("name is required");
        }
        let email = self.email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err("a valid email is required");
        }
        if self.password.len() < 6 {
            return Err("password must be at least 6 characters");
        }

        let role = self.role.unwrap_or(Role::Student);
        if matches!(role, Role::Student | Role::ClubAdmin) {
            let department_given = self
                .department
                .as_deref()
                .map_or(false, |d| !d.trim().is_empty());
            if !department_given || self.year.is_none() {
                return Err("department and year are required");
            }
        }

        if role != Role::ClubAdmin {
            return Ok(None);
        }
        match (&self.club_name, &self.club_description, self.club_category) {
            (Some(name), Some(description), Some(category))
                if !name.trim().is_empty() && !description.trim().is_empty() =>
            {
                Ok(Some(ClubSeed {
                    name: name.trim().to_string(),
                    description: description.clone(),
                    category,
                }))
            }
            _ => Err("club name, description and category are required"),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizedResponse {
    message: String,
    token: String,
    user: UserResponse,
}

async fn register(
    Extension(pool): Extension<DbPool>,
    Json(req): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthorizedResponse>)> {
    #[derive(Insertable)]
    #[diesel(table_name = users)]
    struct NewUser {
        name: String,
        email: String,
        password_hash: String,
        role: Role,
        department: Option<String>,
        year: Option<i32>,
        avatar: String,
    }

    #[derive(Insertable)]
    #[diesel(table_name = clubs)]
    struct NewClub {
        name: String,
        description: String,
        category: ClubCategory,
        founded_year: i32,
        members: i32,
        admin_id: Option<i32>,
        is_approved: bool,
    }

    let club_seed = req
        .validate()
        .map_err(|msg| AppError::from(StatusCode::BAD_REQUEST, msg))?;
    let role = req.role.unwrap_or(Role::Student);

    let new_user = NewUser {
        name: req.name.trim().to_string(),
        email: req.email.trim().to_lowercase(),
        password_hash: auth::hash_password(req.password)?,
        role,
        department: req.department,
        year: req.year,
        avatar: String::new(),
    };

    let mut conn = pool.get().await?;
    let conn = &mut *conn;

    // The user row, the club row and the link between them land together or
    // not at all, so a failure cannot strand a club without its admin.
    let (user, club) = conn
        .transaction::<_, AppError, _>(|conn| {
            async move {
                let user = diesel::insert_into(users::table)
                    .values(new_user)
                    .on_conflict(users::email)
                    .do_nothing()
                    .get_result::<User>(conn)
                    .await
                    .optional()?;

                let Some(user) = user else {
                    return Err(AppError::from(
                        StatusCode::BAD_REQUEST,
                        "User already exists with this email",
                    ));
                };

                let Some(seed) = club_seed else {
                    return Ok((user, None));
                };

                let club = diesel::insert_into(clubs::table)
                    .values(NewClub {
                        name: seed.name,
                        description: seed.description,
                        category: seed.category,
                        founded_year: Utc::now().year(),
                        members: 1,
                        admin_id: Some(user.id),
                        is_approved: false,
                    })
                    .get_result::<Club>(conn)
                    .await?;

                let user = diesel::update(users::table.find(user.id))
                    .set(users::club_id.eq(club.id))
                    .get_result::<User>(conn)
                    .await?;

                Ok((user, Some(club)))
            }
            .scope_boxed()
        })
        .await?;

    let token = auth::generate_jwt(user.id, auth::SESSION_LIFETIME)?;
    let club = club.map(|c| ClubSummary::from(&c));

    Ok((
        StatusCode::CREATED,
        Json(AuthorizedResponse {
            message: "User registered successfully".to_string(),
            token,
            user: UserResponse::from_user(user, club, Vec::new()),
        }),
    ))
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
    role: Option<Role>,
}

async fn login(
    Extension(pool): Extension<DbPool>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<AuthorizedResponse>> {
    let mut conn = pool.get().await?;
    let conn = &mut *conn;

    let Some(user) = users::table
        .filter(users::email.eq(req.email.trim().to_lowercase()))
        .first::<User>(conn)
        .await
        .optional()?
    else {
        return Err(AppError::from(StatusCode::BAD_REQUEST, "Invalid credentials"));
    };

    if !auth::verify_password(req.password, &user.password_hash)? {
        return Err(AppError::from(StatusCode::BAD_REQUEST, "Invalid credentials"));
    }

    // Advisory only: the client sends the role of the login form it used.
    if let Some(role) = req.role {
        if role != user.role {
            return Err(AppError::from(
                StatusCode::BAD_REQUEST,
                "Invalid role for this account",
            ));
        }
    }

    let token = auth::generate_jwt(user.id, auth::SESSION_LIFETIME)?;
    let user = load_user_response(conn, user).await?;

    Ok(Json(AuthorizedResponse {
        message: "Login successful".to_string(),
        token,
        user,
    }))
}

#[derive(Deserialize)]
struct ForgotPasswordRequest {
    email: String,
}

async fn forgot_password(
    Extension(pool): Extension<DbPool>,
    Json(req): Json<ForgotPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    let mut conn = pool.get().await?;
    let conn = &mut *conn;

    let Some(user) = users::table
        .filter(users::email.eq(req.email.trim().to_lowercase()))
        .first::<User>(conn)
        .await
        .optional()?
    else {
        return Err(AppError::from(
            StatusCode::NOT_FOUND,
            "No account found with this email address",
        ));
    };

    let otp = auth::generate_otp();
    let expires = auth::otp_expiry(Utc::now().naive_utc());

    diesel::update(users::table.find(user.id))
        .set((
            users::reset_otp.eq(&otp),
            users::reset_otp_expires.eq(expires),
        ))
        .execute(conn)
        .await?;

    let body = format!(
        r"Hi {},

You have requested to reset your ClubSphere password. Your one-time code is:

    {}

The code expires in {} minutes. If you did not request this password reset you can disregard this message and your password will remain unchanged.

Thanks,
The ClubSphere Team.",
        user.name,
        otp,
        auth::OTP_LIFETIME_MINUTES,
    );

    let destination_address = user
        .email
        .parse::<Address>()
        .map_err(|_| AppError::from(StatusCode::BAD_REQUEST, "invalid email"))?;

    let email = Message::builder()
        .from(Mailbox::new(
            Some("ClubSphere".to_string()),
            EMAIL_ADDRESS.clone(),
        ))
        .to(Mailbox::new(Some(user.name), destination_address))
        .subject("ClubSphere Password Reset Code")
        .body(body)
        .unwrap();

    match email::send(email).await {
        Ok(_) => Ok(Json(MessageResponse::new("OTP sent to your email address"))),
        Err(_) => Err(AppError::from(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to send OTP email",
        )),
    }
}

#[derive(Deserialize)]
struct VerifyOtpRequest {
    email: String,
    otp: String,
}

async fn verify_otp(
    Extension(pool): Extension<DbPool>,
    Json(req): Json<VerifyOtpRequest>,
) -> AppResult<Json<MessageResponse>> {
    let mut conn = pool.get().await?;
    let conn = &mut *conn;

    let user = users::table
        .filter(users::email.eq(req.email.trim().to_lowercase()))
        .first::<User>(conn)
        .await
        .optional()?;

    // A failed attempt does not clear the stored code.
    let valid = user.map_or(false, |user| {
        auth::otp_matches(
            user.reset_otp.as_deref(),
            user.reset_otp_expires,
            &req.otp,
            Utc::now().naive_utc(),
        )
    });

    if !valid {
        return Err(AppError::from(
            StatusCode::BAD_REQUEST,
            "Invalid or expired OTP",
        ));
    }

    Ok(Json(MessageResponse::new("OTP verified successfully")))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResetPasswordRequest {
    email: String,
    otp: String,
    new_password: String,
}

async fn reset_password(
    Extension(pool): Extension<DbPool>,
    Json(req): Json<ResetPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    if req.new_password.len() < 6 {
        return Err(AppError::from(
            StatusCode::BAD_REQUEST,
            "password must be at least 6 characters",
        ));
    }

    let mut conn = pool.get().await?;
    let conn = &mut *conn;

    let user = users::table
        .filter(users::email.eq(req.email.trim().to_lowercase()))
        .first::<User>(conn)
        .await
        .optional()?
        .filter(|user| {
            auth::otp_matches(
                user.reset_otp.as_deref(),
                user.reset_otp_expires,
                &req.otp,
                Utc::now().naive_utc(),
            )
        });

    let Some(user) = user else {
        return Err(AppError::from(
            StatusCode::BAD_REQUEST,
            "Invalid or expired OTP",
        ));
    };

    // Clearing the code makes it single-use.
    diesel::update(users::table.find(user.id))
        .set((
            users::password_hash.eq(auth::hash_password(req.new_password)?),
            users::reset_otp.eq(None::<String>),
            users::reset_otp_expires.eq(None::<chrono::NaiveDateTime>),
        ))
        .execute(conn)
        .await?;

    Ok(Json(MessageResponse::new("Password reset successfully")))
}

async fn me(
    Extension(pool): Extension<DbPool>,
    ExtractAuth(claims): ExtractAuth,
) -> AppResult<Json<UserResponse>> {
    let mut conn = pool.get().await?;
    let conn = &mut *conn;

    let user = current_user(conn, &claims).await?;
    Ok(Json(load_user_response(conn, user).await?))
}

pub fn app() -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/forgot-password", post(forgot_password))
        .route("/verify-otp", post(verify_otp))
        .route("/reset-password", post(reset_password))
        .route("/me", get(me))
}

#[cfg(test)]
mod test {
    use super::*;

    fn student_request() -> RegisterRequest {
        RegisterRequest {
            name: "Arif Hossain".to_string(),
            email: "arif@example.edu".to_string(),
            password: "hunter42".to_string(),
            role: Some(Role::Student),
            department: Some("CSE".to_string()),
            year: Some(3),
            club_name: None,
            club_description: None,
            club_category: None,
        }
    }

    #[test]
    fn student_registration_validates() {
        assert!(matches!(student_request().validate(), Ok(None)));
    }

    #[test]
    fn role_defaults_to_student() {
        let mut req = student_request();
        req.role = None;
        // still needs department and year
        assert!(matches!(req.validate(), Ok(None)));
        req.department = None;
        assert_eq!(req.validate().err(), Some("department and year are required"));
    }

    #[test]
    fn short_passwords_are_refused() {
        let mut req = student_request();
        req.password = "12345".to_string();
        assert_eq!(
            req.validate().err(),
            Some("password must be at least 6 characters")
        );
    }

    #[test]
    fn malformed_emails_are_refused() {
        let mut req = student_request();
        req.email = "not-an-email".to_string();
        assert_eq!(req.validate().err(), Some("a valid email is required"));
    }

    #[test]
    fn students_need_department_and_year() {
        let mut req = student_request();
        req.year = None;
        assert_eq!(req.validate().err(), Some("department and year are required"));
    }

    #[test]
    fn system_admins_skip_department_and_year() {
        let mut req = student_request();
        req.role = Some(Role::Admin);
        req.department = None;
        req.year = None;
        assert!(matches!(req.validate(), Ok(None)));
    }

    #[test]
    fn club_admins_need_club_fields() {
        let mut req = student_request();
        req.role = Some(Role::ClubAdmin);
        assert_eq!(
            req.validate().err(),
            Some("club name, description and category are required")
        );

        req.club_name = Some("Robotics Club".to_string());
        req.club_description = Some("We build robots".to_string());
        req.club_category = Some(ClubCategory::Technology);
        let seed = req.validate().unwrap().unwrap();
        assert_eq!(seed.name, "Robotics Club");
        assert_eq!(seed.category, ClubCategory::Technology);
    }
}
