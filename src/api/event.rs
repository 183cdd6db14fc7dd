use crate::{
    auth::ExtractAuth,
    error::{AppError, AppResult},
    models::{Club, Event, EventFeedback, EventStatus, Role, User},
    schema::*,
    DbPool,
};
use axum::{
    extract::Path,
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use diesel::AsChangeset;
use diesel_async::{pg::AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

use super::{club::ClubSummary, current_user, user::UserSummary, MessageResponse};

#[derive(Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EventSummary {
    pub id: i32,
    pub title: String,
    pub date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
    pub location: String,
    pub status: EventStatus,
}

impl From<&Event> for EventSummary {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id,
            title: event.title.clone(),
            date: event.date,
            start_time: event.start_time.clone(),
            end_time: event.end_time.clone(),
            location: event.location.clone(),
            status: event.status,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FeedbackResponse {
    id: i32,
    rating: i32,
    comment: Option<String>,
    posted_at: NaiveDateTime,
    user: Option<UserSummary>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EventResponse {
    id: i32,
    title: String,
    description: String,
    date: NaiveDate,
    start_time: String,
    end_time: String,
    location: String,
    category: String,
    status: EventStatus,
    registration_form_url: Option<String>,
    max_participants: Option<i32>,
    club: Option<ClubSummary>,
    registered_users: Vec<UserSummary>,
    feedback: Vec<FeedbackResponse>,
    created_at: NaiveDateTime,
}

async fn load_events(
    conn: &mut AsyncPgConnection,
    events: Vec<Event>,
) -> AppResult<Vec<EventResponse>> {
    let event_ids: Vec<i32> = events.iter().map(|e| e.id).collect();
    let club_ids: Vec<i32> = events.iter().map(|e| e.club_id).collect();

    let clubs: HashMap<i32, ClubSummary> = clubs::table
        .filter(clubs::id.eq_any(club_ids))
        .load::<Club>(conn)
        .await?
        .iter()
        .map(|c| (c.id, ClubSummary::from(c)))
        .collect();

    let registrations: Vec<(i32, i32)> = event_registrations::table
        .filter(event_registrations::event_id.eq_any(&event_ids))
        .select((event_registrations::event_id, event_registrations::user_id))
        .load::<(i32, i32)>(conn)
        .await?;

    let feedback_rows = event_feedback::table
        .filter(event_feedback::event_id.eq_any(&event_ids))
        .order(event_feedback::posted_at.asc())
        .load::<EventFeedback>(conn)
        .await?;

    let mut people_ids: Vec<i32> = registrations.iter().map(|(_, user_id)| *user_id).collect();
    people_ids.extend(feedback_rows.iter().map(|f| f.user_id));
    let people: HashMap<i32, UserSummary> = users::table
        .filter(users::id.eq_any(people_ids))
        .load::<User>(conn)
        .await?
        .iter()
        .map(|u| (u.id, UserSummary::from(u)))
        .collect();

    let mut registered_by_event: HashMap<i32, Vec<UserSummary>> = HashMap::new();
    for (event_id, user_id) in registrations {
        if let Some(person) = people.get(&user_id) {
            registered_by_event
                .entry(event_id)
                .or_default()
                .push(person.clone());
        }
    }

    let mut feedback_by_event: HashMap<i32, Vec<FeedbackResponse>> = HashMap::new();
    for row in feedback_rows {
        feedback_by_event
            .entry(row.event_id)
            .or_default()
            .push(FeedbackResponse {
                id: row.id,
                rating: row.rating,
                comment: row.comment,
                posted_at: row.posted_at,
                user: people.get(&row.user_id).cloned(),
            });
    }

    Ok(events
        .into_iter()
        .map(|event| EventResponse {
            club: clubs.get(&event.club_id).cloned(),
            registered_users: registered_by_event.remove(&event.id).unwrap_or_default(),
            feedback: feedback_by_event.remove(&event.id).unwrap_or_default(),
            id: event.id,
            title: event.title,
            description: event.description,
            date: event.date,
            start_time: event.start_time,
            end_time: event.end_time,
            location: event.location,
            category: event.category,
            status: event.status,
            registration_form_url: event.registration_form_url,
            max_participants: event.max_participants,
            created_at: event.created_at,
        })
        .collect())
}

async fn list(Extension(pool): Extension<DbPool>) -> AppResult<Json<Vec<EventResponse>>> {
    let mut conn = pool.get().await?;
    let conn = &mut *conn;

    let events = events::table
        .order(events::date.asc())
        .load::<Event>(conn)
        .await?;

    Ok(Json(load_events(conn, events).await?))
}

async fn info(
    Extension(pool): Extension<DbPool>,
    Path(event_id): Path<i32>,
) -> AppResult<Json<EventResponse>> {
    let mut conn = pool.get().await?;
    let conn = &mut *conn;

    let event = events::table
        .find(event_id)
        .first::<Event>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::from(StatusCode::NOT_FOUND, "Event not found"))?;

    Ok(Json(load_events(conn, vec![event]).await?.pop().ok_or_else(
        || anyhow::anyhow!("`load_events` should return one event"),
    )?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventPayload {
    title: String,
    description: String,
    date: NaiveDate,
    start_time: String,
    end_time: String,
    location: String,
    category: String,
    status: Option<EventStatus>,
    registration_form_url: Option<String>,
    max_participants: Option<i32>,
}

impl EventPayload {
    /// Returns the cleaned-up registration form url.
    fn validate(&self) -> Result<Option<String>, &'static str> {
        for field in [
            &self.title,
            &self.description,
            &self.start_time,
            &self.end_time,
            &self.location,
            &self.category,
        ] {
            if field.trim().is_empty() {
                return Err("Validation error");
            }
        }
        if let Some(max) = self.max_participants {
            if max < 1 {
                return Err("maxParticipants must be a positive number");
            }
        }
        validate_form_url(self.registration_form_url.as_deref())
    }
}

fn validate_form_url(url: Option<&str>) -> Result<Option<String>, &'static str> {
    match url.map(str::trim) {
        None | Some("") => Ok(None),
        Some(url) => match Url::parse(url) {
            Ok(_) => Ok(Some(url.to_string())),
            Err(_) => Err("Please provide a valid URL for the registration form"),
        },
    }
}

async fn create(
    Extension(pool): Extension<DbPool>,
    ExtractAuth(claims): ExtractAuth,
    Json(req): Json<EventPayload>,
) -> AppResult<(StatusCode, Json<EventResponse>)> {
    #[derive(Insertable)]
    #[diesel(table_name = events)]
    struct NewEvent {
        title: String,
        description: String,
        club_id: i32,
        date: NaiveDate,
        start_time: String,
        end_time: String,
        location: String,
        category: String,
        status: EventStatus,
        registration_form_url: Option<String>,
        max_participants: Option<i32>,
    }

    let registration_form_url = req
        .validate()
        .map_err(|msg| AppError::from(StatusCode::BAD_REQUEST, msg))?;

    let mut conn = pool.get().await?;
    let conn = &mut *conn;

    let me = current_user(conn, &claims).await?;
    // Events always land on the admin's own club.
    let club_id = match (me.role, me.club_id) {
        (Role::ClubAdmin, Some(club_id)) => club_id,
        _ => return Err(AppError::from(StatusCode::FORBIDDEN, "Access denied")),
    };

    let event = diesel::insert_into(events::table)
        .values(NewEvent {
            title: req.title,
            description: req.description,
            club_id,
            date: req.date,
            start_time: req.start_time,
            end_time: req.end_time,
            location: req.location,
            category: req.category,
            status: req.status.unwrap_or(EventStatus::Upcoming),
            registration_form_url,
            max_participants: req.max_participants,
        })
        .get_result::<Event>(conn)
        .await?;

    let event = load_events(conn, vec![event])
        .await?
        .pop()
        .ok_or_else(|| anyhow::anyhow!("`load_events` should return one event"))?;

    Ok((StatusCode::CREATED, Json(event)))
}

fn ensure_manages_event(user: &User, event: &Event, action: &'static str) -> AppResult<()> {
    let allowed = user.role == Role::Admin
        || (user.role == Role::ClubAdmin && user.club_id == Some(event.club_id));
    if allowed {
        Ok(())
    } else {
        Err(AppError::ResponseStatusError(
            StatusCode::FORBIDDEN,
            format!("Access denied. You can only {action} your club events.").into(),
        ))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventUpdateRequest {
    title: Option<String>,
    description: Option<String>,
    date: Option<NaiveDate>,
    start_time: Option<String>,
    end_time: Option<String>,
    location: Option<String>,
    category: Option<String>,
    status: Option<EventStatus>,
    registration_form_url: Option<String>,
    max_participants: Option<i32>,
}

#[derive(AsChangeset)]
#[diesel(table_name = events)]
struct EventEdit {
    title: Option<String>,
    description: Option<String>,
    date: Option<NaiveDate>,
    start_time: Option<String>,
    end_time: Option<String>,
    location: Option<String>,
    category: Option<String>,
    status: Option<EventStatus>,
    registration_form_url: Option<String>,
    max_participants: Option<i32>,
}

impl EventEdit {
    fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.date.is_none()
            && self.start_time.is_none()
            && self.end_time.is_none()
            && self.location.is_none()
            && self.category.is_none()
            && self.status.is_none()
            && self.registration_form_url.is_none()
            && self.max_participants.is_none()
    }
}

async fn edit(
    Extension(pool): Extension<DbPool>,
    ExtractAuth(claims): ExtractAuth,
    Path(event_id): Path<i32>,
    Json(req): Json<EventUpdateRequest>,
) -> AppResult<Json<EventResponse>> {
    let registration_form_url = validate_form_url(req.registration_form_url.as_deref())
        .map_err(|msg| AppError::from(StatusCode::BAD_REQUEST, msg))?;
    if let Some(max) = req.max_participants {
        if max < 1 {
            return Err(AppError::from(
                StatusCode::BAD_REQUEST,
                "maxParticipants must be a positive number",
            ));
        }
    }

    let mut conn = pool.get().await?;
    let conn = &mut *conn;

    let me = current_user(conn, &claims).await?;
    let event = events::table
        .find(event_id)
        .first::<Event>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::from(StatusCode::NOT_FOUND, "Event not found"))?;
    ensure_manages_event(&me, &event, "edit")?;

    let changes = EventEdit {
        title: req.title,
        description: req.description,
        date: req.date,
        start_time: req.start_time,
        end_time: req.end_time,
        location: req.location,
        category: req.category,
        status: req.status,
        registration_form_url,
        max_participants: req.max_participants,
    };

    let event = if changes.is_empty() {
        event
    } else {
        diesel::update(events::table.find(event_id))
            .set(changes)
            .get_result::<Event>(conn)
            .await?
    };

    Ok(Json(load_events(conn, vec![event]).await?.pop().ok_or_else(
        || anyhow::anyhow!("`load_events` should return one event"),
    )?))
}

async fn remove(
    Extension(pool): Extension<DbPool>,
    ExtractAuth(claims): ExtractAuth,
    Path(event_id): Path<i32>,
) -> AppResult<Json<MessageResponse>> {
    let mut conn = pool.get().await?;
    let conn = &mut *conn;

    let me = current_user(conn, &claims).await?;
    let event = events::table
        .find(event_id)
        .first::<Event>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::from(StatusCode::NOT_FOUND, "Event not found"))?;
    ensure_manages_event(&me, &event, "delete")?;

    diesel::delete(events::table.find(event_id))
        .execute(conn)
        .await?;

    Ok(Json(MessageResponse::new("Event deleted successfully")))
}

/// Refusal reason for a registration attempt, if any. The capacity check and
/// the insert are separate steps; two racing registrations can both pass the
/// check, so a full event can slightly overfill under concurrent calls.
fn registration_refusal(
    already_registered: bool,
    registered: i64,
    max_participants: Option<i32>,
) -> Option<&'static str> {
    if already_registered {
        return Some("Already registered for this event");
    }
    if let Some(max) = max_participants {
        if registered >= i64::from(max) {
            return Some("Event is full");
        }
    }
    None
}

async fn register(
    Extension(pool): Extension<DbPool>,
    ExtractAuth(claims): ExtractAuth,
    Path(event_id): Path<i32>,
) -> AppResult<Json<MessageResponse>> {
    #[derive(Insertable)]
    #[diesel(table_name = event_registrations)]
    struct NewRegistration {
        event_id: i32,
        user_id: i32,
    }

    let mut conn = pool.get().await?;
    let conn = &mut *conn;

    let event = events::table
        .find(event_id)
        .first::<Event>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::from(StatusCode::NOT_FOUND, "Event not found"))?;
    let user = current_user(conn, &claims).await?;

    let already_registered = event_registrations::table
        .filter(event_registrations::event_id.eq(event.id))
        .filter(event_registrations::user_id.eq(user.id))
        .first::<crate::models::EventRegistration>(conn)
        .await
        .optional()?
        .is_some();
    let registered = event_registrations::table
        .filter(event_registrations::event_id.eq(event.id))
        .count()
        .get_result::<i64>(conn)
        .await?;

    if let Some(refusal) =
        registration_refusal(already_registered, registered, event.max_participants)
    {
        return Err(AppError::from(StatusCode::BAD_REQUEST, refusal));
    }

    diesel::insert_into(event_registrations::table)
        .values(NewRegistration {
            event_id: event.id,
            user_id: user.id,
        })
        .on_conflict((
            event_registrations::event_id,
            event_registrations::user_id,
        ))
        .do_nothing()
        .execute(conn)
        .await?;

    Ok(Json(MessageResponse::new("Successfully registered for event")))
}

async fn unregister(
    Extension(pool): Extension<DbPool>,
    ExtractAuth(claims): ExtractAuth,
    Path(event_id): Path<i32>,
) -> AppResult<Json<MessageResponse>> {
    let mut conn = pool.get().await?;
    let conn = &mut *conn;

    let event_exists = events::table
        .find(event_id)
        .first::<Event>(conn)
        .await
        .optional()?
        .is_some();
    if !event_exists {
        return Err(AppError::from(StatusCode::NOT_FOUND, "Event not found"));
    }

    // Removing an absent registration is a no-op, not an error.
    diesel::delete(
        event_registrations::table
            .filter(event_registrations::event_id.eq(event_id))
            .filter(event_registrations::user_id.eq(claims.user_id)),
    )
    .execute(conn)
    .await?;

    Ok(Json(MessageResponse::new(
        "Successfully unregistered from event",
    )))
}

/// Refusal reason for a feedback submission, if any.
fn feedback_refusal(rating: i32, status: EventStatus) -> Option<&'static str> {
    if !(1..=5).contains(&rating) {
        return Some("Rating must be between 1 and 5");
    }
    if status != EventStatus::Past {
        return Some("Feedback can only be left after the event has ended");
    }
    None
}

#[derive(Deserialize)]
struct FeedbackRequest {
    rating: i32,
    comment: Option<String>,
}

async fn leave_feedback(
    Extension(pool): Extension<DbPool>,
    ExtractAuth(claims): ExtractAuth,
    Path(event_id): Path<i32>,
    Json(req): Json<FeedbackRequest>,
) -> AppResult<(StatusCode, Json<MessageResponse>)> {
    #[derive(Insertable)]
    #[diesel(table_name = event_feedback)]
    struct NewFeedback {
        event_id: i32,
        user_id: i32,
        rating: i32,
        comment: Option<String>,
    }

    let mut conn = pool.get().await?;
    let conn = &mut *conn;

    let event = events::table
        .find(event_id)
        .first::<Event>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::from(StatusCode::NOT_FOUND, "Event not found"))?;
    let user = current_user(conn, &claims).await?;

    if let Some(refusal) = feedback_refusal(req.rating, event.status) {
        return Err(AppError::from(StatusCode::BAD_REQUEST, refusal));
    }

    diesel::insert_into(event_feedback::table)
        .values(NewFeedback {
            event_id: event.id,
            user_id: user.id,
            rating: req.rating,
            comment: req.comment,
        })
        .execute(conn)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::new("Feedback submitted successfully")),
    ))
}

pub fn app() -> Router {
    Router::new()
        .route("/", get(list).post(create))
        .route("/:event_id", get(info).put(edit).delete(remove))
        .route("/:event_id/register", post(register).delete(unregister))
        .route("/:event_id/feedback", post(leave_feedback))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn uncapped_events_always_admit() {
        assert_eq!(registration_refusal(false, 10_000, None), None);
    }

    #[test]
    fn capacity_admits_exactly_the_first_n() {
        let max = Some(3);
        // serialized registrations: counts 0, 1, 2 admit, 3 is full
        assert_eq!(registration_refusal(false, 0, max), None);
        assert_eq!(registration_refusal(false, 1, max), None);
        assert_eq!(registration_refusal(false, 2, max), None);
        assert_eq!(registration_refusal(false, 3, max), Some("Event is full"));
        assert_eq!(registration_refusal(false, 4, max), Some("Event is full"));
    }

    #[test]
    fn duplicate_registration_is_refused_before_capacity() {
        assert_eq!(
            registration_refusal(true, 0, Some(3)),
            Some("Already registered for this event")
        );
        assert_eq!(
            registration_refusal(true, 3, Some(3)),
            Some("Already registered for this event")
        );
    }

    #[test]
    fn feedback_requires_a_rating_in_range() {
        assert_eq!(
            feedback_refusal(0, EventStatus::Past),
            Some("Rating must be between 1 and 5")
        );
        assert_eq!(
            feedback_refusal(6, EventStatus::Past),
            Some("Rating must be between 1 and 5")
        );
        assert_eq!(feedback_refusal(1, EventStatus::Past), None);
        assert_eq!(feedback_refusal(5, EventStatus::Past), None);
    }

    #[test]
    fn feedback_requires_a_past_event() {
        assert_eq!(
            feedback_refusal(4, EventStatus::Upcoming),
            Some("Feedback can only be left after the event has ended")
        );
        assert_eq!(
            feedback_refusal(4, EventStatus::Ongoing),
            Some("Feedback can only be left after the event has ended")
        );
    }

    #[test]
    fn form_urls_are_validated_and_trimmed() {
        assert_eq!(validate_form_url(None), Ok(None));
        assert_eq!(validate_form_url(Some("")), Ok(None));
        assert_eq!(validate_form_url(Some("   ")), Ok(None));
        assert_eq!(
            validate_form_url(Some(" https://forms.example.com/f/123 ")),
            Ok(Some("https://forms.example.com/f/123".to_string()))
        );
        assert_eq!(
            validate_form_url(Some("not a url")),
            Err("Please provide a valid URL for the registration form")
        );
    }
}
