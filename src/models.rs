use crate::schema::*;
use chrono::{NaiveDate, NaiveDateTime};
use diesel::deserialize::{self, FromSql};
use diesel::pg::{Pg, PgValue};
use diesel::prelude::*;
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use diesel::{AsExpression, FromSqlRow};
use serde::{Deserialize, Serialize};
use std::io::Write;

/// Account roles. `ClubAdmin` is scoped to a single club (the one pointed at
/// by `User::club_id`); `Admin` has global rights.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, AsExpression, FromSqlRow, Serialize, Deserialize,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Student,
    ClubAdmin,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::ClubAdmin => "club-admin",
            Role::Admin => "admin",
        }
    }
}

impl ToSql<Text, Pg> for Role {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        out.write_all(self.as_str().as_bytes())?;
        Ok(IsNull::No)
    }
}

impl FromSql<Text, Pg> for Role {
    fn from_sql(value: PgValue<'_>) -> deserialize::Result<Self> {
        match std::str::from_utf8(value.as_bytes())? {
            "student" => Ok(Role::Student),
            "club-admin" => Ok(Role::ClubAdmin),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unrecognized role: {other}").into()),
        }
    }
}

/// Lifecycle of a membership request. There is no terminal state: an
/// `Approved` request can later be flipped to `Rejected` to remove the member.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, AsExpression, FromSqlRow, Serialize, Deserialize,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
        }
    }
}

impl ToSql<Text, Pg> for RequestStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        out.write_all(self.as_str().as_bytes())?;
        Ok(IsNull::No)
    }
}

impl FromSql<Text, Pg> for RequestStatus {
    fn from_sql(value: PgValue<'_>) -> deserialize::Result<Self> {
        match std::str::from_utf8(value.as_bytes())? {
            "pending" => Ok(RequestStatus::Pending),
            "approved" => Ok(RequestStatus::Approved),
            "rejected" => Ok(RequestStatus::Rejected),
            other => Err(format!("unrecognized request status: {other}").into()),
        }
    }
}

/// Stored event phase. Set by club admins, not derived from the clock, so it
/// can lag behind real time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, AsExpression, FromSqlRow, Serialize, Deserialize,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Upcoming,
    Ongoing,
    Past,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Upcoming => "upcoming",
            EventStatus::Ongoing => "ongoing",
            EventStatus::Past => "past",
        }
    }
}

impl ToSql<Text, Pg> for EventStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        out.write_all(self.as_str().as_bytes())?;
        Ok(IsNull::No)
    }
}

impl FromSql<Text, Pg> for EventStatus {
    fn from_sql(value: PgValue<'_>) -> deserialize::Result<Self> {
        match std::str::from_utf8(value.as_bytes())? {
            "upcoming" => Ok(EventStatus::Upcoming),
            "ongoing" => Ok(EventStatus::Ongoing),
            "past" => Ok(EventStatus::Past),
            other => Err(format!("unrecognized event status: {other}").into()),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, AsExpression, FromSqlRow, Serialize, Deserialize,
)]
#[diesel(sql_type = Text)]
pub enum ClubCategory {
    Technology,
    #[serde(rename = "Arts & Culture")]
    ArtsAndCulture,
    Sports,
    Academic,
    Social,
    Professional,
}

impl ClubCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ClubCategory::Technology => "Technology",
            ClubCategory::ArtsAndCulture => "Arts & Culture",
            ClubCategory::Sports => "Sports",
            ClubCategory::Academic => "Academic",
            ClubCategory::Social => "Social",
            ClubCategory::Professional => "Professional",
        }
    }
}

impl ToSql<Text, Pg> for ClubCategory {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        out.write_all(self.as_str().as_bytes())?;
        Ok(IsNull::No)
    }
}

impl FromSql<Text, Pg> for ClubCategory {
    fn from_sql(value: PgValue<'_>) -> deserialize::Result<Self> {
        match std::str::from_utf8(value.as_bytes())? {
            "Technology" => Ok(ClubCategory::Technology),
            "Arts & Culture" => Ok(ClubCategory::ArtsAndCulture),
            "Sports" => Ok(ClubCategory::Sports),
            "Academic" => Ok(ClubCategory::Academic),
            "Social" => Ok(ClubCategory::Social),
            "Professional" => Ok(ClubCategory::Professional),
            other => Err(format!("unrecognized club category: {other}").into()),
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable)]
pub struct User {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub department: Option<String>,
    pub year: Option<i32>,
    pub avatar: String,
    pub club_id: Option<i32>,
    pub reset_otp: Option<String>,
    pub reset_otp_expires: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
pub struct Club {
    pub id: i32,
    pub name: String,
    pub description: String,
    pub category: ClubCategory,
    pub founded_year: i32,
    pub members: i32,
    pub admin_id: Option<i32>,
    pub is_approved: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
pub struct ClubAnnouncement {
    pub id: i32,
    pub club_id: i32,
    pub title: String,
    pub content: String,
    pub important: bool,
    pub posted_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
pub struct Event {
    pub id: i32,
    pub title: String,
    pub description: String,
    pub club_id: i32,
    pub date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
    pub location: String,
    pub category: String,
    pub status: EventStatus,
    pub registration_form_url: Option<String>,
    pub max_participants: Option<i32>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
pub struct EventRegistration {
    pub id: i32,
    pub event_id: i32,
    pub user_id: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = event_feedback)]
pub struct EventFeedback {
    pub id: i32,
    pub event_id: i32,
    pub user_id: i32,
    pub rating: i32,
    pub comment: Option<String>,
    pub posted_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
pub struct MembershipRequest {
    pub id: i32,
    pub user_id: i32,
    pub club_id: i32,
    pub status: RequestStatus,
    pub request_message: Option<String>,
    pub admin_response: Option<String>,
    pub reviewed_by: Option<i32>,
    pub reviewed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn role_wire_names() {
        assert_eq!(serde_json::to_string(&Role::Student).unwrap(), "\"student\"");
        assert_eq!(
            serde_json::to_string(&Role::ClubAdmin).unwrap(),
            "\"club-admin\""
        );
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
        assert_eq!(
            serde_json::from_str::<Role>("\"club-admin\"").unwrap(),
            Role::ClubAdmin
        );
    }

    #[test]
    fn status_wire_names() {
        assert_eq!(
            serde_json::to_string(&RequestStatus::Pending).unwrap(),
            "\"pending\""
        );
        assert_eq!(
            serde_json::from_str::<RequestStatus>("\"rejected\"").unwrap(),
            RequestStatus::Rejected
        );
        assert_eq!(
            serde_json::to_string(&EventStatus::Upcoming).unwrap(),
            "\"upcoming\""
        );
        assert!(serde_json::from_str::<EventStatus>("\"finished\"").is_err());
    }

    #[test]
    fn category_wire_names() {
        assert_eq!(
            serde_json::to_string(&ClubCategory::ArtsAndCulture).unwrap(),
            "\"Arts & Culture\""
        );
        assert_eq!(
            serde_json::from_str::<ClubCategory>("\"Professional\"").unwrap(),
            ClubCategory::Professional
        );
        assert!(serde_json::from_str::<ClubCategory>("\"Gaming\"").is_err());
    }

    #[test]
    fn enum_str_round_trips_match_serde() {
        for role in [Role::Student, Role::ClubAdmin, Role::Admin] {
            let wire = serde_json::to_string(&role).unwrap();
            assert_eq!(wire, format!("\"{}\"", role.as_str()));
        }
    }
}
