use crate::{
    auth::ExtractAuth,
    error::{AppError, AppResult},
    membership::{check_join, review_effect, ReviewEffect},
    models::{
        Club, ClubAnnouncement, ClubCategory, Event, MembershipRequest, RequestStatus, Role, User,
    },
    schema::*,
    DbPool,
};
use axum::{
    extract::{Path, Query},
    http::StatusCode,
    routing::{get, patch, post},
    Extension, Json, Router,
};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::AsChangeset;
use diesel_async::{pg::AsyncPgConnection, AsyncConnection, RunQueryDsl};
use scoped_futures::ScopedFutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{current_user, event::EventSummary, user::UserSummary, MessageResponse};

#[derive(Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ClubSummary {
    pub id: i32,
    pub name: String,
    pub category: ClubCategory,
}

impl From<&Club> for ClubSummary {
    fn from(club: &Club) -> Self {
        Self {
            id: club.id,
            name: club.name.clone(),
            category: club.category,
        }
    }
}

#[derive(Serialize, Clone)]
#[serde(rename_all = "camelCase")]
struct AnnouncementResponse {
    id: i32,
    title: String,
    content: String,
    important: bool,
    posted_at: NaiveDateTime,
}

impl From<ClubAnnouncement> for AnnouncementResponse {
    fn from(a: ClubAnnouncement) -> Self {
        Self {
            id: a.id,
            title: a.title,
            content: a.content,
            important: a.important,
            posted_at: a.posted_at,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClubResponse {
    id: i32,
    name: String,
    description: String,
    category: ClubCategory,
    founded_year: i32,
    members: i32,
    is_approved: bool,
    admin: Option<UserSummary>,
    announcements: Vec<AnnouncementResponse>,
    events: Vec<EventSummary>,
    created_at: NaiveDateTime,
}

async fn load_clubs(
    conn: &mut AsyncPgConnection,
    clubs: Vec<Club>,
) -> AppResult<Vec<ClubResponse>> {
    let club_ids: Vec<i32> = clubs.iter().map(|c| c.id).collect();
    let admin_ids: Vec<i32> = clubs.iter().filter_map(|c| c.admin_id).collect();

    let admins: HashMap<i32, UserSummary> = users::table
        .filter(users::id.eq_any(admin_ids))
        .load::<User>(conn)
        .await?
        .iter()
        .map(|u| (u.id, UserSummary::from(u)))
        .collect();

    let mut events_by_club: HashMap<i32, Vec<EventSummary>> = HashMap::new();
    for event in events::table
        .filter(events::club_id.eq_any(&club_ids))
        .order(events::date.asc())
        .load::<Event>(conn)
        .await?
    {
        events_by_club
            .entry(event.club_id)
            .or_default()
            .push(EventSummary::from(&event));
    }

    let mut announcements_by_club: HashMap<i32, Vec<AnnouncementResponse>> = HashMap::new();
    for announcement in club_announcements::table
        .filter(club_announcements::club_id.eq_any(&club_ids))
        .order(club_announcements::posted_at.desc())
        .load::<ClubAnnouncement>(conn)
        .await?
    {
        announcements_by_club
            .entry(announcement.club_id)
            .or_default()
            .push(AnnouncementResponse::from(announcement));
    }

    Ok(clubs
        .into_iter()
        .map(|club| ClubResponse {
            admin: club.admin_id.and_then(|id| admins.get(&id).cloned()),
            announcements: announcements_by_club.remove(&club.id).unwrap_or_default(),
            events: events_by_club.remove(&club.id).unwrap_or_default(),
            id: club.id,
            name: club.name,
            description: club.description,
            category: club.category,
            founded_year: club.founded_year,
            members: club.members,
            is_approved: club.is_approved,
            created_at: club.created_at,
        })
        .collect())
}

async fn list(Extension(pool): Extension<DbPool>) -> AppResult<Json<Vec<ClubResponse>>> {
    let mut conn = pool.get().await?;
    let conn = &mut *conn;

    let clubs = clubs::table
        .filter(clubs::is_approved.eq(true))
        .load::<Club>(conn)
        .await?;

    Ok(Json(load_clubs(conn, clubs).await?))
}

async fn info(
    Extension(pool): Extension<DbPool>,
    Path(club_id): Path<i32>,
) -> AppResult<Json<ClubResponse>> {
    let mut conn = pool.get().await?;
    let conn = &mut *conn;

    let club = clubs::table
        .find(club_id)
        .first::<Club>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::from(StatusCode::NOT_FOUND, "Club not found"))?;

    Ok(Json(load_clubs(conn, vec![club]).await?.pop().ok_or_else(
        || anyhow::anyhow!("`load_clubs` should return one club"),
    )?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnouncementRequest {
    title: String,
    content: String,
    #[serde(default)]
    important: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClubUpdateRequest {
    name: Option<String>,
    description: Option<String>,
    category: Option<ClubCategory>,
    founded_year: Option<i32>,
    is_approved: Option<bool>,
    announcements: Option<Vec<AnnouncementRequest>>,
}

#[derive(AsChangeset)]
#[diesel(table_name = clubs)]
struct ClubEdit {
    name: Option<String>,
    description: Option<String>,
    category: Option<ClubCategory>,
    founded_year: Option<i32>,
    is_approved: Option<bool>,
}

impl ClubEdit {
    fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.category.is_none()
            && self.founded_year.is_none()
            && self.is_approved.is_none()
    }
}

async fn edit(
    Extension(pool): Extension<DbPool>,
    ExtractAuth(claims): ExtractAuth,
    Path(club_id): Path<i32>,
    Json(req): Json<ClubUpdateRequest>,
) -> AppResult<Json<ClubResponse>> {
    #[derive(Insertable)]
    #[diesel(table_name = club_announcements)]
    struct NewAnnouncement {
        club_id: i32,
        title: String,
        content: String,
        important: bool,
    }

    let mut conn = pool.get().await?;
    let conn = &mut *conn;

    let me = current_user(conn, &claims).await?;
    let club = clubs::table
        .find(club_id)
        .first::<Club>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::from(StatusCode::NOT_FOUND, "Club not found"))?;

    if club.admin_id != Some(me.id) && me.role != Role::Admin {
        return Err(AppError::from(StatusCode::FORBIDDEN, "Access denied"));
    }

    let changes = ClubEdit {
        name: req.name,
        description: req.description,
        category: req.category,
        founded_year: req.founded_year,
        is_approved: req.is_approved,
    };
    if !changes.is_empty() {
        diesel::update(clubs::table.find(club_id))
            .set(changes)
            .execute(conn)
            .await?;
    }

    // Announcements are replaced as a whole, like the embedded list they model.
    if let Some(announcements) = req.announcements {
        diesel::delete(club_announcements::table.filter(club_announcements::club_id.eq(club_id)))
            .execute(conn)
            .await?;
        let rows: Vec<NewAnnouncement> = announcements
            .into_iter()
            .map(|a| NewAnnouncement {
                club_id,
                title: a.title,
                content: a.content,
                important: a.important,
            })
            .collect();
        if !rows.is_empty() {
            diesel::insert_into(club_announcements::table)
                .values(rows)
                .execute(conn)
                .await?;
        }
    }

    let club = clubs::table.find(club_id).first::<Club>(conn).await?;
    Ok(Json(load_clubs(conn, vec![club]).await?.pop().ok_or_else(
        || anyhow::anyhow!("`load_clubs` should return one club"),
    )?))
}

async fn remove(
    Extension(pool): Extension<DbPool>,
    ExtractAuth(claims): ExtractAuth,
    Path(club_id): Path<i32>,
) -> AppResult<Json<MessageResponse>> {
    let mut conn = pool.get().await?;
    let conn = &mut *conn;

    let me = current_user(conn, &claims).await?;
    if me.role != Role::Admin {
        return Err(AppError::from(
            StatusCode::FORBIDDEN,
            "Access denied. Only admins can delete clubs.",
        ));
    }

    let deleted = diesel::delete(clubs::table.find(club_id))
        .execute(conn)
        .await?;
    if deleted == 0 {
        return Err(AppError::from(StatusCode::NOT_FOUND, "Club not found"));
    }

    Ok(Json(MessageResponse::new("Club deleted successfully")))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestResponse {
    id: i32,
    user_id: i32,
    club_id: i32,
    status: RequestStatus,
    request_message: Option<String>,
    admin_response: Option<String>,
    reviewed_at: Option<NaiveDateTime>,
    created_at: NaiveDateTime,
    user: Option<UserSummary>,
    reviewer: Option<UserSummary>,
}

impl RequestResponse {
    fn from_request(
        request: MembershipRequest,
        user: Option<UserSummary>,
        reviewer: Option<UserSummary>,
    ) -> Self {
        Self {
            id: request.id,
            user_id: request.user_id,
            club_id: request.club_id,
            status: request.status,
            request_message: request.request_message,
            admin_response: request.admin_response,
            reviewed_at: request.reviewed_at,
            created_at: request.created_at,
            user,
            reviewer,
        }
    }
}

#[derive(Deserialize)]
struct JoinRequest {
    message: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JoinResponse {
    message: String,
    request: RequestResponse,
}

async fn request_membership(
    Extension(pool): Extension<DbPool>,
    ExtractAuth(claims): ExtractAuth,
    Path(club_id): Path<i32>,
    Json(req): Json<JoinRequest>,
) -> AppResult<(StatusCode, Json<JoinResponse>)> {
    #[derive(Insertable)]
    #[diesel(table_name = membership_requests)]
    struct NewMembershipRequest {
        user_id: i32,
        club_id: i32,
        status: RequestStatus,
        request_message: String,
    }

    let mut conn = pool.get().await?;
    let conn = &mut *conn;

    let club_exists = clubs::table
        .find(club_id)
        .first::<Club>(conn)
        .await
        .optional()?
        .is_some();
    if !club_exists {
        return Err(AppError::from(StatusCode::NOT_FOUND, "Club not found"));
    }

    let user = current_user(conn, &claims).await?;

    let existing = membership_requests::table
        .filter(membership_requests::user_id.eq(user.id))
        .filter(membership_requests::club_id.eq(club_id))
        .first::<MembershipRequest>(conn)
        .await
        .optional()?;

    check_join(&user, existing.map(|r| r.status))
        .map_err(|refusal| AppError::from(StatusCode::BAD_REQUEST, refusal.message()))?;

    // The unique (user, club) index is the last line of defense: a rejected
    // record survives the checks above but still blocks the insert.
    let request = diesel::insert_into(membership_requests::table)
        .values(NewMembershipRequest {
            user_id: user.id,
            club_id,
            status: RequestStatus::Pending,
            request_message: req.message.unwrap_or_default(),
        })
        .on_conflict((membership_requests::user_id, membership_requests::club_id))
        .do_nothing()
        .get_result::<MembershipRequest>(conn)
        .await
        .optional()?;

    let Some(request) = request else {
        return Err(AppError::from(
            StatusCode::BAD_REQUEST,
            "You already have a request for this club",
        ));
    };

    Ok((
        StatusCode::CREATED,
        Json(JoinResponse {
            message: "Membership request sent successfully! Wait for admin approval.".to_string(),
            request: RequestResponse::from_request(request, None, None),
        }),
    ))
}

/// Club admins manage their own club only; system admins manage any club.
fn ensure_manages_club(user: &User, club_id: i32) -> AppResult<()> {
    let allowed = user.role == Role::Admin
        || (user.role == Role::ClubAdmin && user.club_id == Some(club_id));
    if allowed {
        Ok(())
    } else {
        Err(AppError::from(
            StatusCode::FORBIDDEN,
            "Access denied. You can only manage your own club.",
        ))
    }
}

#[derive(Deserialize)]
struct RequestFilter {
    status: Option<RequestStatus>,
}

async fn list_requests(
    Extension(pool): Extension<DbPool>,
    ExtractAuth(claims): ExtractAuth,
    Path(club_id): Path<i32>,
    Query(filter): Query<RequestFilter>,
) -> AppResult<Json<Vec<RequestResponse>>> {
    let mut conn = pool.get().await?;
    let conn = &mut *conn;

    let me = current_user(conn, &claims).await?;
    ensure_manages_club(&me, club_id)?;

    let requests = membership_requests::table
        .filter(membership_requests::club_id.eq(club_id))
        .filter(membership_requests::status.eq(filter.status.unwrap_or(RequestStatus::Pending)))
        .order(membership_requests::created_at.desc())
        .load::<MembershipRequest>(conn)
        .await?;

    let mut people_ids: Vec<i32> = requests.iter().map(|r| r.user_id).collect();
    people_ids.extend(requests.iter().filter_map(|r| r.reviewed_by));
    let people: HashMap<i32, UserSummary> = users::table
        .filter(users::id.eq_any(people_ids))
        .load::<User>(conn)
        .await?
        .iter()
        .map(|u| (u.id, UserSummary::from(u)))
        .collect();

    Ok(Json(
        requests
            .into_iter()
            .map(|request| {
                let user = people.get(&request.user_id).cloned();
                let reviewer = request.reviewed_by.and_then(|id| people.get(&id).cloned());
                RequestResponse::from_request(request, user, reviewer)
            })
            .collect(),
    ))
}

#[derive(Deserialize)]
struct ReviewRequest {
    status: RequestStatus,
    response: Option<String>,
}

async fn review_request(
    Extension(pool): Extension<DbPool>,
    ExtractAuth(claims): ExtractAuth,
    Path((club_id, request_id)): Path<(i32, i32)>,
    Json(req): Json<ReviewRequest>,
) -> AppResult<Json<JoinResponse>> {
    if req.status == RequestStatus::Pending {
        return Err(AppError::from(
            StatusCode::BAD_REQUEST,
            "Invalid status. Must be \"approved\" or \"rejected\"",
        ));
    }

    let mut conn = pool.get().await?;
    let conn = &mut *conn;

    let me = current_user(conn, &claims).await?;
    ensure_manages_club(&me, club_id)?;

    let reviewer_id = me.id;
    let new_status = req.status;
    let response_text = req.response.unwrap_or_default();
    let now = Utc::now().naive_utc();

    // Request flip, club-pointer update and member-count refresh commit
    // together; the counter cannot drift from API-driven reviews.
    let (request, member) = conn
        .transaction::<_, AppError, _>(|conn| {
            async move {
                let request = membership_requests::table
                    .find(request_id)
                    .filter(membership_requests::club_id.eq(club_id))
                    .filter(membership_requests::status.eq_any([
                        RequestStatus::Pending,
                        RequestStatus::Approved,
                    ]))
                    .first::<MembershipRequest>(conn)
                    .await
                    .optional()?
                    .ok_or_else(|| {
                        AppError::from(StatusCode::NOT_FOUND, "Membership request not found")
                    })?;

                let current_status = request.status;
                let member = users::table
                    .find(request.user_id)
                    .first::<User>(conn)
                    .await?;

                let request = diesel::update(membership_requests::table.find(request.id))
                    .set((
                        membership_requests::status.eq(new_status),
                        membership_requests::admin_response.eq(response_text),
                        membership_requests::reviewed_by.eq(reviewer_id),
                        membership_requests::reviewed_at.eq(now),
                    ))
                    .get_result::<MembershipRequest>(conn)
                    .await?;

                match review_effect(current_status, new_status) {
                    ReviewEffect::AddMember => {
                        // Two clubs approving the same user concurrently would
                        // otherwise double-assign; refusing rolls back the flip.
                        if member.club_id.map_or(false, |id| id != club_id) {
                            return Err(AppError::from(
                                StatusCode::CONFLICT,
                                "This user is already a member of another club",
                            ));
                        }
                        diesel::update(users::table.find(member.id))
                            .set(users::club_id.eq(club_id))
                            .execute(conn)
                            .await?;
                        refresh_member_count(conn, club_id).await?;
                    }
                    ReviewEffect::RemoveMember => {
                        diesel::update(
                            users::table
                                .find(member.id)
                                .filter(users::club_id.eq(club_id)),
                        )
                        .set(users::club_id.eq(None::<i32>))
                        .execute(conn)
                        .await?;
                        refresh_member_count(conn, club_id).await?;
                    }
                    ReviewEffect::None => {}
                }

                Ok((request, member))
            }
            .scope_boxed()
        })
        .await?;

    Ok(Json(JoinResponse {
        message: format!("Membership request {} successfully", new_status.as_str()),
        request: RequestResponse::from_request(request, Some(UserSummary::from(&member)), None),
    }))
}

async fn refresh_member_count(conn: &mut AsyncPgConnection, club_id: i32) -> AppResult<()> {
    let members = users::table
        .filter(users::club_id.eq(club_id))
        .count()
        .get_result::<i64>(conn)
        .await?;
    diesel::update(clubs::table.find(club_id))
        .set(clubs::members.eq(members as i32))
        .execute(conn)
        .await?;
    Ok(())
}

#[derive(Serialize)]
struct RequestStatusResponse {
    request: Option<RequestResponse>,
}

async fn request_status(
    Extension(pool): Extension<DbPool>,
    ExtractAuth(claims): ExtractAuth,
    Path(club_id): Path<i32>,
) -> AppResult<Json<RequestStatusResponse>> {
    let mut conn = pool.get().await?;
    let conn = &mut *conn;

    let request = membership_requests::table
        .filter(membership_requests::user_id.eq(claims.user_id))
        .filter(membership_requests::club_id.eq(club_id))
        .order(membership_requests::created_at.desc())
        .first::<MembershipRequest>(conn)
        .await
        .optional()?;

    Ok(Json(RequestStatusResponse {
        request: request.map(|r| RequestResponse::from_request(r, None, None)),
    }))
}

pub fn app() -> Router {
    Router::new()
        .route("/", get(list))
        .route("/:club_id", get(info).put(edit).delete(remove))
        .route("/:club_id/request", post(request_membership))
        .route("/:club_id/requests", get(list_requests))
        .route("/:club_id/requests/:request_id", patch(review_request))
        .route("/:club_id/request-status", get(request_status))
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::NaiveDate;

    fn user(role: Role, club_id: Option<i32>) -> User {
        User {
            id: 10,
            name: "Admin".to_string(),
            email: "admin@example.edu".to_string(),
            password_hash: String::new(),
            role,
            department: None,
            year: None,
            avatar: String::new(),
            club_id,
            reset_otp: None,
            reset_otp_expires: None,
            created_at: NaiveDate::from_ymd_opt(2025, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        }
    }

    #[test]
    fn club_admins_manage_only_their_own_club() {
        assert!(ensure_manages_club(&user(Role::ClubAdmin, Some(3)), 3).is_ok());
        assert!(ensure_manages_club(&user(Role::ClubAdmin, Some(3)), 4).is_err());
        assert!(ensure_manages_club(&user(Role::ClubAdmin, None), 3).is_err());
    }

    #[test]
    fn system_admins_manage_any_club() {
        assert!(ensure_manages_club(&user(Role::Admin, None), 3).is_ok());
    }

    #[test]
    fn students_manage_no_club() {
        assert!(ensure_manages_club(&user(Role::Student, Some(3)), 3).is_err());
    }
}
