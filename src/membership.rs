//! Membership-request state machine.
//!
//! A request for a (user, club) pair moves between `pending`, `approved` and
//! `rejected`. Only two transitions carry membership side effects:
//! `pending -> approved` adds the user to the club, `approved -> rejected`
//! removes them (the "kick member" path). Everything else only stamps the
//! review metadata. The decision logic lives here as plain functions; the
//! handlers in `api::clubs` apply the resulting effects inside a transaction.

use crate::models::{RequestStatus, Role, User};

/// Membership side effect of a review transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewEffect {
    /// Link the user to the club and grow the member count.
    AddMember,
    /// Clear the user's club link and shrink the member count.
    RemoveMember,
    /// Review metadata only.
    None,
}

pub fn review_effect(current: RequestStatus, new: RequestStatus) -> ReviewEffect {
    use RequestStatus::*;
    match (current, new) {
        (Pending, Approved) => ReviewEffect::AddMember,
        (Approved, Rejected) => ReviewEffect::RemoveMember,
        _ => ReviewEffect::None,
    }
}

/// Why a join request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinRefusal {
    AlreadyInAClub,
    ClubAdminsCannotJoin,
    AlreadyMember,
    AlreadyPending,
}

impl JoinRefusal {
    pub fn message(self) -> &'static str {
        match self {
            JoinRefusal::AlreadyInAClub => "You are already a member of a club",
            JoinRefusal::ClubAdminsCannotJoin => "Club admins cannot join other clubs",
            JoinRefusal::AlreadyMember => "You are already a member of this club",
            JoinRefusal::AlreadyPending => "You already have a pending request for this club",
        }
    }
}

/// Preconditions for creating a new `pending` request. `existing` is the
/// status of any prior request by this user for this club; a `rejected` one
/// passes here and is caught by the unique (user, club) index instead.
pub fn check_join(user: &User, existing: Option<RequestStatus>) -> Result<(), JoinRefusal> {
    if user.club_id.is_some() {
        return Err(JoinRefusal::AlreadyInAClub);
    }
    if user.role == Role::ClubAdmin {
        return Err(JoinRefusal::ClubAdminsCannotJoin);
    }
    match existing {
        Some(RequestStatus::Approved) => Err(JoinRefusal::AlreadyMember),
        Some(RequestStatus::Pending) => Err(JoinRefusal::AlreadyPending),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::NaiveDate;

    fn user(role: Role, club_id: Option<i32>) -> User {
        User {
            id: 1,
            name: "Arif Hossain".to_string(),
            email: "arif@example.edu".to_string(),
            password_hash: String::new(),
            role,
            department: Some("CSE".to_string()),
            year: Some(3),
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
    fn approving_a_pending_request_adds_the_member() {
        assert_eq!(
            review_effect(RequestStatus::Pending, RequestStatus::Approved),
            ReviewEffect::AddMember
        );
    }

    #[test]
    fn rejecting_an_approved_request_removes_the_member() {
        assert_eq!(
            review_effect(RequestStatus::Approved, RequestStatus::Rejected),
            ReviewEffect::RemoveMember
        );
    }

    #[test]
    fn rejecting_a_pending_request_has_no_membership_effect() {
        assert_eq!(
            review_effect(RequestStatus::Pending, RequestStatus::Rejected),
            ReviewEffect::None
        );
    }

    #[test]
    fn redundant_transitions_have_no_effect() {
        use RequestStatus::*;
        for (from, to) in [
            (Approved, Approved),
            (Rejected, Rejected),
            (Pending, Pending),
            (Rejected, Approved),
            (Rejected, Pending),
        ] {
            assert_eq!(review_effect(from, to), ReviewEffect::None);
        }
    }

    #[test]
    fn student_without_a_club_may_request() {
        assert_eq!(check_join(&user(Role::Student, None), None), Ok(()));
    }

    #[test]
    fn rejected_history_does_not_block_the_precondition_check() {
        // the unique (user, club) index is what actually stops the re-request
        assert_eq!(
            check_join(&user(Role::Student, None), Some(RequestStatus::Rejected)),
            Ok(())
        );
    }

    #[test]
    fn current_club_membership_blocks_requests() {
        assert_eq!(
            check_join(&user(Role::Student, Some(7)), None),
            Err(JoinRefusal::AlreadyInAClub)
        );
    }

    #[test]
    fn club_admins_cannot_request_membership() {
        // the club check comes first, so test an unlinked club admin too
        assert_eq!(
            check_join(&user(Role::ClubAdmin, None), None),
            Err(JoinRefusal::ClubAdminsCannotJoin)
        );
        assert_eq!(
            check_join(&user(Role::ClubAdmin, Some(7)), None),
            Err(JoinRefusal::AlreadyInAClub)
        );
    }

    #[test]
    fn duplicate_requests_are_refused_by_status() {
        assert_eq!(
            check_join(&user(Role::Student, None), Some(RequestStatus::Pending)),
            Err(JoinRefusal::AlreadyPending)
        );
        assert_eq!(
            check_join(&user(Role::Student, None), Some(RequestStatus::Approved)),
            Err(JoinRefusal::AlreadyMember)
        );
    }
}
