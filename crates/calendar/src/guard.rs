//! Role checks shared by every service.

use std::sync::Arc;

use tracing::debug;

use crate::{
    Error, Result,
    store::MembershipStore,
    types::{CalendarId, Event, Membership, Role, UserId},
};

/// Answers "may this user do that in this calendar".
#[derive(Clone)]
pub struct AccessGuard {
    memberships: Arc<dyn MembershipStore>,
}

impl AccessGuard {
    pub fn new(memberships: Arc<dyn MembershipStore>) -> Self {
        Self { memberships }
    }

    /// The caller's membership if their role is at least `minimum`.
    ///
    /// Non-members and members below `minimum` both get `Forbidden`, so the
    /// answer does not reveal whether the calendar exists.
    pub async fn require_role(
        &self,
        calendar_id: &CalendarId,
        user_id: &UserId,
        minimum: Role,
    ) -> Result<Membership> {
        match self.memberships.find_member(calendar_id, user_id).await? {
            Some(membership) if membership.role.satisfies(minimum) => Ok(membership),
            Some(membership) => {
                debug!(
                    %calendar_id,
                    %user_id,
                    role = %membership.role,
                    required = %minimum,
                    "role too low"
                );
                Err(Error::forbidden(format!(
                    "requires {minimum} role in calendar {calendar_id}"
                )))
            },
            None => {
                debug!(%calendar_id, %user_id, "not a member");
                Err(Error::forbidden(format!(
                    "not a member of calendar {calendar_id}"
                )))
            },
        }
    }

    /// Any membership at all. Every read goes through this.
    pub async fn require_member(
        &self,
        calendar_id: &CalendarId,
        user_id: &UserId,
    ) -> Result<Membership> {
        self.require_role(calendar_id, user_id, Role::Visitor).await
    }

    /// Only the user who created the event, whatever their role.
    pub fn require_creator(&self, event: &Event, user_id: &UserId) -> Result<()> {
        if &event.creator_id == user_id {
            Ok(())
        } else {
            Err(Error::forbidden(format!(
                "only the creator may delete event {}",
                event.id
            )))
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            store::{CalendarStore, UserStore, conformance},
            store_memory::InMemoryStore,
            types::Recurrence,
        },
        rstest::rstest,
    };

    async fn setup(role: Role) -> (AccessGuard, CalendarId, UserId) {
        let store = Arc::new(InMemoryStore::new());
        let owner = conformance::user("owner");
        let member = conformance::user("member");
        store.insert_user(&owner).await.unwrap();
        store.insert_user(&member).await.unwrap();
        let cal = conformance::calendar("team");
        store.create_calendar(&cal, &owner.id).await.unwrap();
        if role == Role::Owner {
            store.add_member(&cal.id, &member.id, Role::Admin).await.unwrap();
            store.set_role(&cal.id, &member.id, Role::Owner).await.unwrap();
        } else {
            store.add_member(&cal.id, &member.id, role).await.unwrap();
        }
        (AccessGuard::new(store), cal.id, member.id)
    }

    #[rstest]
    #[case(Role::Visitor, false)]
    #[case(Role::Editor, true)]
    #[case(Role::Admin, true)]
    #[case(Role::Owner, true)]
    #[tokio::test]
    async fn editor_requirement(#[case] role: Role, #[case] allowed: bool) {
        let (guard, cal, user) = setup(role).await;
        let result = guard.require_role(&cal, &user, Role::Editor).await;
        assert_eq!(result.is_ok(), allowed);
        if !allowed {
            assert!(matches!(result, Err(Error::Forbidden { .. })));
        }
    }

    #[tokio::test]
    async fn non_member_is_forbidden() {
        let (guard, cal, _) = setup(Role::Visitor).await;
        let err = guard
            .require_member(&cal, &UserId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden { .. }));
    }

    #[tokio::test]
    async fn visitor_is_a_member() {
        let (guard, cal, user) = setup(Role::Visitor).await;
        let membership = guard.require_member(&cal, &user).await.unwrap();
        assert_eq!(membership.role, Role::Visitor);
    }

    #[tokio::test]
    async fn creator_rule_ignores_role() {
        let (guard, cal, user) = setup(Role::Visitor).await;
        let start = conformance::ts(10, 0);
        let end = conformance::ts(11, 0);
        let mine = conformance::event(&cal, &user, start, end, Recurrence::None);
        let theirs = conformance::event(&cal, &UserId::new(), start, end, Recurrence::None);
        assert!(guard.require_creator(&mine, &user).is_ok());
        assert!(matches!(
            guard.require_creator(&theirs, &user),
            Err(Error::Forbidden { .. })
        ));
    }
}
