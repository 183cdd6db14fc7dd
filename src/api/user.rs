use crate::{
    auth::ExtractAuth,
    error::{AppError, AppResult},
    models::{Club, Event, Role, User},
    schema::*,
    DbPool,
};
use axum::{
    extract::Path,
    http::StatusCode,
    routing::{get, put},
    Extension, Json, Router,
};
use diesel::prelude::*;
use diesel::AsChangeset;
use diesel_async::{pg::AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{club::ClubSummary, current_user, event::EventSummary, require_admin, MessageResponse};

#[derive(Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UserSummary {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub avatar: String,
    pub department: Option<String>,
    pub year: Option<i32>,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            avatar: user.avatar.clone(),
            department: user.department.clone(),
            year: user.year,
        }
    }
}

/// Full account view. The password hash never leaves the model layer.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UserResponse {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub department: Option<String>,
    pub year: Option<i32>,
    pub avatar: String,
    pub club: Option<ClubSummary>,
    pub registered_events: Vec<EventSummary>,
}

impl UserResponse {
    pub fn from_user(
        user: User,
        club: Option<ClubSummary>,
        registered_events: Vec<EventSummary>,
    ) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
            department: user.department,
            year: user.year,
            avatar: user.avatar,
            club,
            registered_events,
        }
    }
}

/// Load a user's club and registered events alongside the account row.
pub(crate) async fn load_user_response(
    conn: &mut AsyncPgConnection,
    user: User,
) -> AppResult<UserResponse> {
    let club = match user.club_id {
        Some(id) => clubs::table
            .find(id)
            .first::<Club>(conn)
            .await
            .optional()?
            .map(|c| ClubSummary::from(&c)),
        None => None,
    };

    let event_ids = event_registrations::table
        .filter(event_registrations::user_id.eq(user.id))
        .select(event_registrations::event_id)
        .load::<i32>(conn)
        .await?;
    let registered = events::table
        .filter(events::id.eq_any(event_ids))
        .load::<Event>(conn)
        .await?;

    Ok(UserResponse::from_user(
        user,
        club,
        registered.iter().map(EventSummary::from).collect(),
    ))
}

async fn load_club_summaries(
    conn: &mut AsyncPgConnection,
    users: &[User],
) -> AppResult<HashMap<i32, ClubSummary>> {
    let club_ids: Vec<i32> = users.iter().filter_map(|u| u.club_id).collect();
    Ok(clubs::table
        .filter(clubs::id.eq_any(club_ids))
        .load::<Club>(conn)
        .await?
        .iter()
        .map(|c| (c.id, ClubSummary::from(c)))
        .collect())
}

async fn list(
    Extension(pool): Extension<DbPool>,
    ExtractAuth(claims): ExtractAuth,
) -> AppResult<Json<Vec<UserResponse>>> {
    let mut conn = pool.get().await?;
    let conn = &mut *conn;

    let me = current_user(conn, &claims).await?;
    require_admin(&me)?;

    let users = users::table.load::<User>(conn).await?;
    let clubs = load_club_summaries(conn, &users).await?;

    Ok(Json(
        users
            .into_iter()
            .map(|u| {
                let club = u.club_id.and_then(|id| clubs.get(&id).cloned());
                UserResponse::from_user(u, club, Vec::new())
            })
            .collect(),
    ))
}

async fn list_students(
    Extension(pool): Extension<DbPool>,
    ExtractAuth(claims): ExtractAuth,
) -> AppResult<Json<Vec<UserResponse>>> {
    let mut conn = pool.get().await?;
    let conn = &mut *conn;

    let me = current_user(conn, &claims).await?;
    require_admin(&me)?;

    let students = users::table
        .filter(users::role.eq(Role::Student))
        .load::<User>(conn)
        .await?;
    let clubs = load_club_summaries(conn, &students).await?;

    Ok(Json(
        students
            .into_iter()
            .map(|u| {
                let club = u.club_id.and_then(|id| clubs.get(&id).cloned());
                UserResponse::from_user(u, club, Vec::new())
            })
            .collect(),
    ))
}

async fn info(
    Extension(pool): Extension<DbPool>,
    ExtractAuth(_claims): ExtractAuth,
    Path(user_id): Path<i32>,
) -> AppResult<Json<UserResponse>> {
    let mut conn = pool.get().await?;
    let conn = &mut *conn;

    let user = users::table
        .find(user_id)
        .first::<User>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::from(StatusCode::NOT_FOUND, "User not found"))?;

    Ok(Json(load_user_response(conn, user).await?))
}

#[derive(AsChangeset)]
#[diesel(table_name = users)]
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileChange {
    name: Option<String>,
    department: Option<String>,
    year: Option<i32>,
    avatar: Option<String>,
}

impl ProfileChange {
    fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.department.is_none()
            && self.year.is_none()
            && self.avatar.is_none()
    }
}

async fn edit_profile(
    Extension(pool): Extension<DbPool>,
    ExtractAuth(claims): ExtractAuth,
    Json(req): Json<ProfileChange>,
) -> AppResult<Json<UserResponse>> {
    let mut conn = pool.get().await?;
    let conn = &mut *conn;

    let user = current_user(conn, &claims).await?;

    let user = if req.is_empty() {
        user
    } else {
        diesel::update(users::table.find(user.id))
            .set(req)
            .get_result::<User>(conn)
            .await?
    };

    Ok(Json(load_user_response(conn, user).await?))
}

async fn remove(
    Extension(pool): Extension<DbPool>,
    ExtractAuth(claims): ExtractAuth,
    Path(user_id): Path<i32>,
) -> AppResult<Json<MessageResponse>> {
    let mut conn = pool.get().await?;
    let conn = &mut *conn;

    let me = current_user(conn, &claims).await?;
    if me.role != Role::Admin {
        return Err(AppError::from(
            StatusCode::FORBIDDEN,
            "Access denied. Only admins can delete users.",
        ));
    }

    let deleted = diesel::delete(users::table.find(user_id))
        .execute(conn)
        .await?;
    if deleted == 0 {
        return Err(AppError::from(StatusCode::NOT_FOUND, "User not found"));
    }

    Ok(Json(MessageResponse::new("User deleted successfully")))
}

pub fn app() -> Router {
    Router::new()
        .route("/", get(list))
        .route("/students/all", get(list_students))
        .route("/profile", put(edit_profile))
        .route("/:id", get(info).delete(remove))
}
