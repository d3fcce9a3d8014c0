//! Calendar lifecycle, sharing and role management.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    Error, Result,
    guard::AccessGuard,
    notifications::Notifier,
    store::{CalendarStore, MembershipStore, NotificationStore, UserStore},
    types::{
        Calendar, CalendarId, CalendarPatch, Membership, NewCalendar, NewNotification,
        NotificationKind, Role, UserId, now_ms,
    },
};

pub struct CalendarService {
    calendars: Arc<dyn CalendarStore>,
    memberships: Arc<dyn MembershipStore>,
    users: Arc<dyn UserStore>,
    guard: AccessGuard,
    notifier: Notifier,
}

fn require_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(Error::bad_request("calendar title must not be empty"));
    }
    Ok(())
}

impl CalendarService {
    pub fn new(
        calendars: Arc<dyn CalendarStore>,
        memberships: Arc<dyn MembershipStore>,
        users: Arc<dyn UserStore>,
        notifications: Arc<dyn NotificationStore>,
    ) -> Self {
        let guard = AccessGuard::new(Arc::clone(&memberships));
        Self {
            calendars,
            memberships,
            users,
            guard,
            notifier: Notifier::new(notifications),
        }
    }

    async fn invite(&self, calendar_id: &CalendarId, membership: &Membership) {
        let title = match self.calendars.get_calendar(calendar_id).await {
            Ok(Some(calendar)) => calendar.title,
            Ok(None) => return,
            Err(e) => {
                warn!(%calendar_id, error = %e, "invitation skipped");
                return;
            },
        };
        self.notifier
            .send(NewNotification {
                user_id: membership.user_id.clone(),
                title: format!("Calendar shared: {title}"),
                message: format!("You were added to \"{title}\" as {}.", membership.role),
                kind: NotificationKind::EventInvitation,
                event_id: None,
            })
            .await;
    }

    /// Create a calendar owned by `owner`.
    pub async fn create_calendar(&self, owner: &UserId, new: NewCalendar) -> Result<Calendar> {
        require_title(&new.title)?;
        let now = now_ms();
        let calendar = Calendar {
            id: CalendarId::new(),
            title: new.title,
            description: new.description,
            created_at: now,
            updated_at: now,
        };
        self.calendars.create_calendar(&calendar, owner).await?;
        info!(calendar_id = %calendar.id, owner = %owner, "calendar created");
        Ok(calendar)
    }

    pub async fn get_calendar(&self, caller: &UserId, id: &CalendarId) -> Result<Calendar> {
        self.guard.require_member(id, caller).await?;
        self.calendars
            .get_calendar(id)
            .await?
            .ok_or_else(|| Error::not_found("calendar", id))
    }

    pub async fn update_calendar(
        &self,
        caller: &UserId,
        id: &CalendarId,
        patch: CalendarPatch,
    ) -> Result<Calendar> {
        self.guard.require_role(id, caller, Role::Admin).await?;
        let mut calendar = self
            .calendars
            .get_calendar(id)
            .await?
            .ok_or_else(|| Error::not_found("calendar", id))?;
        if let Some(title) = patch.title {
            require_title(&title)?;
            calendar.title = title;
        }
        if let Some(description) = patch.description {
            calendar.description = Some(description);
        }
        calendar.updated_at = now_ms();
        self.calendars.update_calendar(&calendar).await?;
        Ok(calendar)
    }

    pub async fn delete_calendar(&self, caller: &UserId, id: &CalendarId) -> Result<()> {
        self.guard.require_role(id, caller, Role::Admin).await?;
        self.calendars.delete_calendar(id).await?;
        info!(calendar_id = %id, by = %caller, "calendar deleted");
        Ok(())
    }

    /// Give each listed user visitor access and an invitation. Users who are
    /// already members are skipped; unknown users are skipped unless nobody
    /// listed exists.
    pub async fn share_calendar(
        &self,
        caller: &UserId,
        calendar_id: &CalendarId,
        users: &[UserId],
    ) -> Result<Vec<Membership>> {
        self.guard
            .require_role(calendar_id, caller, Role::Admin)
            .await?;

        let mut known = 0usize;
        let mut added = Vec::new();
        for user_id in users {
            if self.users.get_user(user_id).await?.is_none() {
                debug!(%calendar_id, %user_id, "share skipped unknown user");
                continue;
            }
            known += 1;
            if self
                .memberships
                .find_member(calendar_id, user_id)
                .await?
                .is_some()
            {
                continue;
            }
            let membership = self
                .memberships
                .add_member(calendar_id, user_id, Role::Visitor)
                .await?;
            self.invite(calendar_id, &membership).await;
            added.push(membership);
        }

        if known == 0 && !users.is_empty() {
            let ids: Vec<&str> = users.iter().map(UserId::as_str).collect();
            return Err(Error::not_found("user", ids.join(", ")));
        }
        info!(%calendar_id, added = added.len(), "calendar shared");
        Ok(added)
    }

    /// Add a member with an explicit role. Ownership is only granted through
    /// [`transfer_ownership`](Self::transfer_ownership).
    pub async fn add_member(
        &self,
        caller: &UserId,
        calendar_id: &CalendarId,
        user_id: &UserId,
        role: Role,
    ) -> Result<Membership> {
        self.guard
            .require_role(calendar_id, caller, Role::Admin)
            .await?;
        if role == Role::Owner {
            return Err(Error::bad_request(
                "new members cannot join as owner; transfer ownership instead",
            ));
        }
        let membership = self
            .memberships
            .add_member(calendar_id, user_id, role)
            .await?;
        self.invite(calendar_id, &membership).await;
        Ok(membership)
    }

    /// Remove a member. Anyone may leave on their own; removing somebody
    /// else needs admin. The owner can never be removed.
    pub async fn remove_member(
        &self,
        caller: &UserId,
        calendar_id: &CalendarId,
        user_id: &UserId,
    ) -> Result<()> {
        if caller == user_id {
            self.guard.require_member(calendar_id, caller).await?;
        } else {
            self.guard
                .require_role(calendar_id, caller, Role::Admin)
                .await?;
        }
        self.memberships.remove_member(calendar_id, user_id).await?;
        info!(%calendar_id, %user_id, by = %caller, "member removed");
        Ok(())
    }

    /// Change a member's role.
    ///
    /// Granting or taking away [`Role::Owner`] needs the caller to be an
    /// owner. Granting owner here does not demote the previous owner; use
    /// [`transfer_ownership`](Self::transfer_ownership) for a full handover.
    pub async fn set_role(
        &self,
        caller: &UserId,
        calendar_id: &CalendarId,
        user_id: &UserId,
        role: Role,
    ) -> Result<Membership> {
        let caller_membership = self
            .guard
            .require_role(calendar_id, caller, Role::Admin)
            .await?;
        let target = self
            .memberships
            .find_member(calendar_id, user_id)
            .await?
            .ok_or_else(|| Error::not_found("membership", format!("{calendar_id}/{user_id}")))?;

        let touches_owner = role == Role::Owner || target.role == Role::Owner;
        if touches_owner && caller_membership.role != Role::Owner {
            return Err(Error::forbidden(format!(
                "only the owner of calendar {calendar_id} can change ownership"
            )));
        }

        let updated = self
            .memberships
            .compare_and_set_role(calendar_id, user_id, target.role, role)
            .await?;
        info!(%calendar_id, %user_id, from = %target.role, to = %role, "role changed");
        Ok(updated)
    }

    /// Hand the calendar over to another member. The new owner is promoted
    /// first, then the caller is demoted to admin. If the demotion fails the
    /// promotion is reverted.
    pub async fn transfer_ownership(
        &self,
        caller: &UserId,
        calendar_id: &CalendarId,
        new_owner: &UserId,
    ) -> Result<Membership> {
        self.guard
            .require_role(calendar_id, caller, Role::Owner)
            .await?;
        if caller == new_owner {
            return Err(Error::bad_request("calendar is already owned by this user"));
        }
        let target = self
            .memberships
            .find_member(calendar_id, new_owner)
            .await?
            .ok_or_else(|| {
                Error::not_found("membership", format!("{calendar_id}/{new_owner}"))
            })?;

        let promoted = self
            .memberships
            .compare_and_set_role(calendar_id, new_owner, target.role, Role::Owner)
            .await?;
        if let Err(e) = self
            .memberships
            .compare_and_set_role(calendar_id, caller, Role::Owner, Role::Admin)
            .await
        {
            warn!(
                %calendar_id,
                from = %caller,
                to = %new_owner,
                error = %e,
                "ownership transfer failed, reverting promotion"
            );
            if let Err(undo) = self
                .memberships
                .compare_and_set_role(calendar_id, new_owner, Role::Owner, target.role)
                .await
            {
                warn!(
                    %calendar_id,
                    from = %caller,
                    to = %new_owner,
                    error = %undo,
                    "promotion could not be reverted"
                );
            }
            return Err(e);
        }
        info!(%calendar_id, from = %caller, to = %new_owner, "ownership transferred");
        Ok(promoted)
    }

    pub async fn members(
        &self,
        caller: &UserId,
        calendar_id: &CalendarId,
    ) -> Result<Vec<Membership>> {
        self.guard.require_member(calendar_id, caller).await?;
        self.memberships.members_of(calendar_id).await
    }

    /// Calendars the user owns.
    pub async fn my_calendars(&self, user_id: &UserId) -> Result<Vec<Calendar>> {
        Ok(self
            .calendars
            .calendars_of_user(user_id)
            .await?
            .into_iter()
            .filter(|(_, role)| *role == Role::Owner)
            .map(|(calendar, _)| calendar)
            .collect())
    }

    /// Calendars the user belongs to without owning them.
    pub async fn shared_calendars(&self, user_id: &UserId) -> Result<Vec<(Calendar, Role)>> {
        Ok(self
            .calendars
            .calendars_of_user(user_id)
            .await?
            .into_iter()
            .filter(|(_, role)| *role != Role::Owner)
            .collect())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            notifications::NotificationService, paging::ListOptions, store::conformance,
            store_memory::InMemoryStore,
        },
        async_trait::async_trait,
    };

    struct Fixture {
        service: CalendarService,
        store: Arc<InMemoryStore>,
        owner: UserId,
        calendar: Calendar,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let owner = conformance::user("owner");
        store.insert_user(&owner).await.unwrap();
        let service =
            CalendarService::new(store.clone(), store.clone(), store.clone(), store.clone());
        let calendar = service
            .create_calendar(&owner.id, NewCalendar {
                title: "Team".into(),
                description: None,
            })
            .await
            .unwrap();
        Fixture {
            service,
            store,
            owner: owner.id,
            calendar,
        }
    }

    async fn join(f: &Fixture, login: &str, role: Role) -> UserId {
        let user = conformance::user(login);
        f.store.insert_user(&user).await.unwrap();
        f.service
            .add_member(&f.owner, &f.calendar.id, &user.id, role)
            .await
            .unwrap();
        user.id
    }

    async fn owners(f: &Fixture) -> Vec<UserId> {
        f.service
            .members(&f.owner, &f.calendar.id)
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|m| m.role == Role::Owner)
            .map(|m| m.user_id)
            .collect()
    }

    #[tokio::test]
    async fn creator_becomes_sole_owner() {
        let f = fixture().await;
        assert_eq!(owners(&f).await, [f.owner.clone()]);
        assert_eq!(f.service.my_calendars(&f.owner).await.unwrap().len(), 1);
        assert!(
            f.service
                .shared_calendars(&f.owner)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn empty_title_rejected() {
        let f = fixture().await;
        let err = f
            .service
            .create_calendar(&f.owner, NewCalendar {
                title: "  ".into(),
                description: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));
    }

    #[tokio::test]
    async fn share_adds_visitors_and_skips_existing() {
        let f = fixture().await;
        let bob = join(&f, "bob", Role::Editor).await;
        let carol = conformance::user("carol");
        f.store.insert_user(&carol).await.unwrap();

        let added = f
            .service
            .share_calendar(&f.owner, &f.calendar.id, &[
                bob.clone(),
                carol.id.clone(),
                UserId::new(),
            ])
            .await
            .unwrap();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].user_id, carol.id);
        assert_eq!(added[0].role, Role::Visitor);

        let shared = f.service.shared_calendars(&bob).await.unwrap();
        assert_eq!(shared[0].1, Role::Editor);
        assert_eq!(owners(&f).await.len(), 1);
    }

    #[tokio::test]
    async fn share_with_only_unknown_users_is_not_found() {
        let f = fixture().await;
        let err = f
            .service
            .share_calendar(&f.owner, &f.calendar.id, &[UserId::new()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn editor_cannot_share() {
        let f = fixture().await;
        let bob = join(&f, "bob", Role::Editor).await;
        let err = f
            .service
            .share_calendar(&bob, &f.calendar.id, &[f.owner.clone()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden { .. }));
    }

    #[tokio::test]
    async fn owner_cannot_be_removed() {
        let f = fixture().await;
        let admin = join(&f, "admin", Role::Admin).await;
        for caller in [&f.owner, &admin] {
            let err = f
                .service
                .remove_member(caller, &f.calendar.id, &f.owner)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::OwnerRemovalForbidden { .. }));
        }
        assert_eq!(owners(&f).await, [f.owner.clone()]);
    }

    #[tokio::test]
    async fn visitor_may_leave_but_not_kick() {
        let f = fixture().await;
        let bob = join(&f, "bob", Role::Visitor).await;
        let carol = join(&f, "carol", Role::Visitor).await;
        let err = f
            .service
            .remove_member(&bob, &f.calendar.id, &carol)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden { .. }));
        f.service
            .remove_member(&bob, &f.calendar.id, &bob)
            .await
            .unwrap();
        assert!(f.service.shared_calendars(&bob).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn admin_cannot_grant_ownership() {
        let f = fixture().await;
        let admin = join(&f, "admin", Role::Admin).await;
        let bob = join(&f, "bob", Role::Editor).await;
        let err = f
            .service
            .set_role(&admin, &f.calendar.id, &bob, Role::Owner)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden { .. }));
        let err = f
            .service
            .set_role(&admin, &f.calendar.id, &f.owner, Role::Editor)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden { .. }));
    }

    #[tokio::test]
    async fn set_role_to_owner_keeps_previous_owner() {
        let f = fixture().await;
        let bob = join(&f, "bob", Role::Admin).await;
        f.service
            .set_role(&f.owner, &f.calendar.id, &bob, Role::Owner)
            .await
            .unwrap();
        assert_eq!(owners(&f).await.len(), 2);
        let earliest = f.store.owner_of(&f.calendar.id).await.unwrap();
        assert_eq!(earliest.user_id, f.owner);
    }

    #[tokio::test]
    async fn transfer_demotes_previous_owner() {
        let f = fixture().await;
        let bob = join(&f, "bob", Role::Editor).await;
        let promoted = f
            .service
            .transfer_ownership(&f.owner, &f.calendar.id, &bob)
            .await
            .unwrap();
        assert_eq!(promoted.role, Role::Owner);
        assert_eq!(owners(&f).await, [bob.clone()]);
        let previous = f
            .store
            .find_member(&f.calendar.id, &f.owner)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(previous.role, Role::Admin);

        let err = f
            .service
            .transfer_ownership(&f.owner, &f.calendar.id, &bob)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden { .. }));
    }

    #[tokio::test]
    async fn transfer_to_non_member_is_not_found() {
        let f = fixture().await;
        let err = f
            .service
            .transfer_ownership(&f.owner, &f.calendar.id, &UserId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert_eq!(owners(&f).await, [f.owner.clone()]);
    }

    #[tokio::test]
    async fn update_and_delete_need_admin() {
        let f = fixture().await;
        let editor = join(&f, "ed", Role::Editor).await;
        let patch = CalendarPatch {
            title: Some("Renamed".into()),
            description: None,
        };
        let err = f
            .service
            .update_calendar(&editor, &f.calendar.id, patch.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden { .. }));

        let updated = f
            .service
            .update_calendar(&f.owner, &f.calendar.id, patch)
            .await
            .unwrap();
        assert_eq!(updated.title, "Renamed");

        assert!(
            f.service
                .delete_calendar(&editor, &f.calendar.id)
                .await
                .is_err()
        );
        f.service
            .delete_calendar(&f.owner, &f.calendar.id)
            .await
            .unwrap();
        let err = f
            .service
            .get_calendar(&f.owner, &f.calendar.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden { .. }));
    }

    #[tokio::test]
    async fn sharing_and_adding_send_invitations() {
        let f = fixture().await;
        let bob = join(&f, "bob", Role::Editor).await;
        let carol = conformance::user("carol");
        f.store.insert_user(&carol).await.unwrap();
        f.service
            .share_calendar(&f.owner, &f.calendar.id, &[bob.clone(), carol.id.clone()])
            .await
            .unwrap();

        let inbox = NotificationService::new(f.store.clone(), f.store.clone());
        let all = ListOptions::default();
        let bobs = inbox.notifications_for(&bob, false, &all).await.unwrap();
        assert_eq!(bobs.total, 1);
        assert_eq!(bobs.items[0].kind, NotificationKind::EventInvitation);
        assert_eq!(bobs.items[0].title, "Calendar shared: Team");
        assert_eq!(bobs.items[0].message, "You were added to \"Team\" as editor.");

        let carols = inbox.notifications_for(&carol.id, false, &all).await.unwrap();
        assert_eq!(carols.total, 1);
        assert_eq!(carols.items[0].message, "You were added to \"Team\" as visitor.");
        assert!(carols.items[0].event_id.is_none());

        let owners_inbox = inbox.notifications_for(&f.owner, false, &all).await.unwrap();
        assert!(owners_inbox.is_empty());
    }

    /// Rejects demoting an owner to admin, as if another writer moved first.
    struct ContendedDemotion(Arc<InMemoryStore>);

    #[async_trait]
    impl MembershipStore for ContendedDemotion {
        async fn add_member(
            &self,
            calendar_id: &CalendarId,
            user_id: &UserId,
            role: Role,
        ) -> Result<Membership> {
            self.0.add_member(calendar_id, user_id, role).await
        }

        async fn remove_member(&self, calendar_id: &CalendarId, user_id: &UserId) -> Result<()> {
            self.0.remove_member(calendar_id, user_id).await
        }

        async fn set_role(
            &self,
            calendar_id: &CalendarId,
            user_id: &UserId,
            role: Role,
        ) -> Result<Membership> {
            self.0.set_role(calendar_id, user_id, role).await
        }

        async fn compare_and_set_role(
            &self,
            calendar_id: &CalendarId,
            user_id: &UserId,
            expected: Role,
            role: Role,
        ) -> Result<Membership> {
            if expected == Role::Owner && role == Role::Admin {
                return Err(Error::conflict("role changed concurrently"));
            }
            self.0
                .compare_and_set_role(calendar_id, user_id, expected, role)
                .await
        }

        async fn find_member(
            &self,
            calendar_id: &CalendarId,
            user_id: &UserId,
        ) -> Result<Option<Membership>> {
            self.0.find_member(calendar_id, user_id).await
        }

        async fn owner_of(&self, calendar_id: &CalendarId) -> Result<Membership> {
            self.0.owner_of(calendar_id).await
        }

        async fn members_of(&self, calendar_id: &CalendarId) -> Result<Vec<Membership>> {
            self.0.members_of(calendar_id).await
        }

        async fn memberships_of_user(&self, user_id: &UserId) -> Result<Vec<Membership>> {
            self.0.memberships_of_user(user_id).await
        }
    }

    #[tokio::test]
    async fn failed_demotion_reverts_promotion() {
        let f = fixture().await;
        let bob = join(&f, "bob", Role::Editor).await;
        let contended = CalendarService::new(
            f.store.clone(),
            Arc::new(ContendedDemotion(f.store.clone())),
            f.store.clone(),
            f.store.clone(),
        );

        let err = contended
            .transfer_ownership(&f.owner, &f.calendar.id, &bob)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
        assert_eq!(owners(&f).await, [f.owner.clone()]);
        let reverted = f
            .store
            .find_member(&f.calendar.id, &bob)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reverted.role, Role::Editor);
    }
}
