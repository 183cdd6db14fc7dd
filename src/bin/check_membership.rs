//! Cross-checks club membership bookkeeping directly against the store.
//!
//! For every student linked to a club it verifies an approved membership
//! request exists, back-filling a record when one is missing (seeded data
//! skips the request workflow entirely). Then it prints a per-club summary
//! comparing pending/approved request counts, the stored member counter and
//! the actual number of linked users.

use clubsphere::{
    connect_to_db,
    models::{Club, MembershipRequest, RequestStatus, Role, User},
    schema::*,
};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use envconfig::Envconfig;
use tracing_subscriber::EnvFilter;

#[derive(Envconfig)]
struct Config {
    #[envconfig(from = "DATABASE_URL")]
    pub db_url: String,
}

#[derive(Insertable)]
#[diesel(table_name = membership_requests)]
struct BackfilledRequest {
    user_id: i32,
    club_id: i32,
    status: RequestStatus,
    request_message: String,
    admin_response: String,
    reviewed_at: chrono::NaiveDateTime,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::init_from_env()?;
    let pool = connect_to_db(&config.db_url);
    let mut conn = pool.get().await?;
    let conn = &mut *conn;

    let students = users::table
        .filter(users::role.eq(Role::Student))
        .filter(users::club_id.is_not_null())
        .load::<User>(conn)
        .await?;
    tracing::info!("found {} students with club memberships", students.len());

    for student in &students {
        let Some(club) = student.club_id else {
            continue;
        };

        let approved = membership_requests::table
            .filter(membership_requests::user_id.eq(student.id))
            .filter(membership_requests::club_id.eq(club))
            .filter(membership_requests::status.eq(RequestStatus::Approved))
            .first::<MembershipRequest>(conn)
            .await
            .optional()?;

        if approved.is_some() {
            tracing::info!("{} ({}): approved request present", student.name, student.email);
            continue;
        }

        tracing::warn!(
            "{} ({}) belongs to club {} without an approved request, back-filling",
            student.name,
            student.email,
            club
        );
        let inserted = diesel::insert_into(membership_requests::table)
            .values(BackfilledRequest {
                user_id: student.id,
                club_id: club,
                status: RequestStatus::Approved,
                request_message: "Automatically created for seeded data".to_string(),
                admin_response: "Approved during data seeding".to_string(),
                reviewed_at: chrono::Utc::now().naive_utc(),
            })
            .on_conflict((membership_requests::user_id, membership_requests::club_id))
            .do_nothing()
            .execute(conn)
            .await?;
        if inserted == 0 {
            tracing::warn!(
                "a request in another state already exists for user {} and club {}, leaving it untouched",
                student.id,
                club
            );
        }
    }

    for club in clubs::table.load::<Club>(conn).await? {
        let pending = membership_requests::table
            .filter(membership_requests::club_id.eq(club.id))
            .filter(membership_requests::status.eq(RequestStatus::Pending))
            .count()
            .get_result::<i64>(conn)
            .await?;
        let approved = membership_requests::table
            .filter(membership_requests::club_id.eq(club.id))
            .filter(membership_requests::status.eq(RequestStatus::Approved))
            .count()
            .get_result::<i64>(conn)
            .await?;
        let actual = users::table
            .filter(users::club_id.eq(club.id))
            .count()
            .get_result::<i64>(conn)
            .await?;

        tracing::info!(
            "club {:?}: {} pending, {} approved, counter {}, actual members {}",
            club.name,
            pending,
            approved,
            club.members,
            actual
        );
        if i64::from(club.members) != actual {
            tracing::warn!(
                "club {:?}: stored member counter {} does not match {} linked users",
                club.name,
                club.members,
                actual
            );
        }
    }

    Ok(())
}
