use crate::{
    auth::Claims,
    error::{AppError, AppResult},
    models::{Role, User},
    schema::users,
};
use axum::{http::StatusCode, Router};
use diesel::prelude::*;
use diesel_async::{pg::AsyncPgConnection, RunQueryDsl};
use serde::Serialize;

pub mod auth;
pub mod club;
pub mod event;
pub mod user;

pub fn app() -> Router {
    Router::new()
        .nest("/auth", auth::app())
        .nest("/clubs", club::app())
        .nest("/events", event::app())
        .nest("/users", user::app())
}

#[derive(Serialize)]
pub(crate) struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Resolve the session claims to a fresh account row. Tokens outlive account
/// deletion, so a missing row is treated as an expired session.
pub(crate) async fn current_user(conn: &mut AsyncPgConnection, claims: &Claims) -> AppResult<User> {
    users::table
        .find(claims.user_id)
        .first::<User>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::from(StatusCode::UNAUTHORIZED, "account no longer exists"))
}

pub(crate) fn require_admin(user: &User) -> AppResult<()> {
    if user.role == Role::Admin {
        Ok(())
    } else {
        Err(AppError::from(StatusCode::FORBIDDEN, "Access denied"))
    }
}
