//! Per-calendar tags.

use std::sync::Arc;

use tracing::info;

use crate::{
    Error, Result,
    guard::AccessGuard,
    paging::{ListOptions, Page},
    store::{MembershipStore, TagStore},
    types::{CalendarId, DEFAULT_TAG_COLOR, NewTag, Role, Tag, TagId, TagPatch, UserId, now_ms},
};

pub struct TagService {
    tags: Arc<dyn TagStore>,
    guard: AccessGuard,
}

fn check_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::bad_request("tag name must not be empty"));
    }
    Ok(())
}

/// Accepts `#rgb` and `#rrggbb`.
fn check_color(color: &str) -> Result<()> {
    let valid = color.strip_prefix('#').is_some_and(|hex| {
        matches!(hex.len(), 3 | 6) && hex.chars().all(|c| c.is_ascii_hexdigit())
    });
    if !valid {
        return Err(Error::bad_request(format!("invalid tag color: {color}")));
    }
    Ok(())
}

impl TagService {
    pub fn new(tags: Arc<dyn TagStore>, memberships: Arc<dyn MembershipStore>) -> Self {
        Self {
            tags,
            guard: AccessGuard::new(memberships),
        }
    }

    async fn load(&self, id: &TagId) -> Result<Tag> {
        self.tags
            .get_tag(id)
            .await?
            .ok_or_else(|| Error::not_found("tag", id))
    }

    pub async fn create_tag(
        &self,
        caller: &UserId,
        calendar_id: &CalendarId,
        new: NewTag,
    ) -> Result<Tag> {
        check_name(&new.name)?;
        let color = new.color.unwrap_or_else(|| DEFAULT_TAG_COLOR.to_string());
        check_color(&color)?;
        self.guard
            .require_role(calendar_id, caller, Role::Editor)
            .await?;

        let tag = Tag {
            id: TagId::new(),
            calendar_id: calendar_id.clone(),
            name: new.name,
            color,
            description: new.description,
            created_at: now_ms(),
        };
        self.tags.insert_tag(&tag).await?;
        info!(tag_id = %tag.id, %calendar_id, name = %tag.name, "tag created");
        Ok(tag)
    }

    pub async fn get_tag(&self, caller: &UserId, id: &TagId) -> Result<Tag> {
        let tag = self.load(id).await?;
        self.guard.require_member(&tag.calendar_id, caller).await?;
        Ok(tag)
    }

    pub async fn update_tag(&self, caller: &UserId, id: &TagId, patch: TagPatch) -> Result<Tag> {
        let mut tag = self.load(id).await?;
        self.guard
            .require_role(&tag.calendar_id, caller, Role::Editor)
            .await?;
        if let Some(name) = patch.name {
            check_name(&name)?;
            tag.name = name;
        }
        if let Some(color) = patch.color {
            check_color(&color)?;
            tag.color = color;
        }
        if let Some(description) = patch.description {
            tag.description = Some(description);
        }
        self.tags.update_tag(&tag).await?;
        Ok(tag)
    }

    pub async fn delete_tag(&self, caller: &UserId, id: &TagId) -> Result<()> {
        let tag = self.load(id).await?;
        self.guard
            .require_role(&tag.calendar_id, caller, Role::Editor)
            .await?;
        self.tags.delete_tag(id).await?;
        info!(tag_id = %id, by = %caller, "tag deleted");
        Ok(())
    }

    /// Tags of one calendar by name. Search matches the name.
    pub async fn tags_in_calendar(
        &self,
        caller: &UserId,
        calendar_id: &CalendarId,
        options: &ListOptions,
    ) -> Result<Page<Tag>> {
        self.guard.require_member(calendar_id, caller).await?;
        let tags = self.tags.tags_in_calendar(calendar_id).await?;
        Ok(options.apply(tags, |t| t.name.as_str()))
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
        },
        rstest::rstest,
    };

    #[rstest]
    #[case("#6c757d", true)]
    #[case("#FFF", true)]
    #[case("6c757d", false)]
    #[case("#12345", false)]
    #[case("#ggg", false)]
    fn color_format(#[case] color: &str, #[case] ok: bool) {
        assert_eq!(check_color(color).is_ok(), ok);
    }

    fn new_tag(name: &str) -> NewTag {
        NewTag {
            name: name.into(),
            color: None,
            description: None,
        }
    }

    #[tokio::test]
    async fn editor_manages_tags_visitor_reads() {
        let store = Arc::new(InMemoryStore::new());
        let owner = conformance::user("owner");
        let visitor = conformance::user("visitor");
        store.insert_user(&owner).await.unwrap();
        store.insert_user(&visitor).await.unwrap();
        let cal = conformance::calendar("team");
        store.create_calendar(&cal, &owner.id).await.unwrap();
        store
            .add_member(&cal.id, &visitor.id, Role::Visitor)
            .await
            .unwrap();
        let service = TagService::new(store.clone(), store.clone());

        let tag = service
            .create_tag(&owner.id, &cal.id, new_tag("work"))
            .await
            .unwrap();
        assert_eq!(tag.color, DEFAULT_TAG_COLOR);

        let err = service
            .create_tag(&owner.id, &cal.id, new_tag("work"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateTag { .. }));

        let err = service
            .create_tag(&visitor.id, &cal.id, new_tag("home"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden { .. }));

        assert_eq!(service.get_tag(&visitor.id, &tag.id).await.unwrap().name, "work");
        assert_eq!(
            service
                .tags_in_calendar(&visitor.id, &cal.id, &ListOptions::default())
                .await
                .unwrap()
                .total,
            1
        );

        let updated = service
            .update_tag(&owner.id, &tag.id, TagPatch {
                color: Some("#ff8800".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.color, "#ff8800");

        assert!(service.delete_tag(&visitor.id, &tag.id).await.is_err());
        service.delete_tag(&owner.id, &tag.id).await.unwrap();
        let err = service.get_tag(&owner.id, &tag.id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn tag_listing_searches_and_pages() {
        let store = Arc::new(InMemoryStore::new());
        let owner = conformance::user("owner");
        store.insert_user(&owner).await.unwrap();
        let cal = conformance::calendar("team");
        store.create_calendar(&cal, &owner.id).await.unwrap();
        let service = TagService::new(store.clone(), store.clone());
        for name in ["home", "holiday", "work"] {
            service
                .create_tag(&owner.id, &cal.id, new_tag(name))
                .await
                .unwrap();
        }

        let found = service
            .tags_in_calendar(&owner.id, &cal.id, &ListOptions::search("Ho"))
            .await
            .unwrap();
        assert_eq!(found.total, 2);
        assert!(found.items.iter().all(|t| t.name.starts_with('h')));

        let second = service
            .tags_in_calendar(&owner.id, &cal.id, &ListOptions::paged(2, 2))
            .await
            .unwrap();
        assert_eq!(second.total, 3);
        assert_eq!(second.len(), 1);
    }
}
