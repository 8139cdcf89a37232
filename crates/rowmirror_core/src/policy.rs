//! Authorization policies for capture.

use crate::registry::Registry;
use rowmirror_model::{ManyToManyDef, Record, WatchedEntityType};

/// Decides which mutations are replicated.
///
/// Every method has a default. Denials are silent: the hook skips the
/// change and logs at debug level.
pub trait SyncPolicy: Send + Sync {
    /// Whether a newly created record is replicated.
    fn can_create(&self, _record: &Record) -> bool {
        true
    }

    /// Whether an update is replicated.
    fn can_update(&self, _record: &Record) -> bool {
        true
    }

    /// Whether a delete is replicated.
    fn can_delete(&self, _record: &Record) -> bool {
        true
    }

    /// Whether added associations are replicated.
    ///
    /// Defaults to requiring both ends of the relation to be registered.
    fn can_add_m2m(
        &self,
        registry: &Registry,
        owner: &WatchedEntityType,
        relation: &ManyToManyDef,
    ) -> bool {
        registry.is_registered(&owner.key) && registry.is_registered(&relation.target)
    }

    /// Whether removed or cleared associations are replicated.
    ///
    /// Defaults to requiring both ends of the relation to be registered.
    fn can_remove_m2m(
        &self,
        registry: &Registry,
        owner: &WatchedEntityType,
        relation: &ManyToManyDef,
    ) -> bool {
        registry.is_registered(&owner.key) && registry.is_registered(&relation.target)
    }
}

/// The default policy: everything the defaults allow.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl SyncPolicy for AllowAll {}

#[cfg(test)]
mod tests {
    use super::*;
    use rowmirror_model::{EntityKey, FieldKind};

    #[test]
    fn m2m_requires_both_ends_registered() {
        let tag = WatchedEntityType::new("local", "tag").field("name", FieldKind::Text);
        let post = WatchedEntityType::new("local", "post")
            .many_to_many("tags", tag.key.clone())
            .many_to_many("links", EntityKey::new("local", "link"));

        let mut registry = Registry::new();
        registry.register_entity(post.clone()).unwrap();
        registry.register_entity(tag).unwrap();

        let tags = post.relation("tags").unwrap();
        let links = post.relation("links").unwrap();
        assert!(AllowAll.can_add_m2m(&registry, &post, tags));
        assert!(AllowAll.can_remove_m2m(&registry, &post, tags));
        assert!(!AllowAll.can_add_m2m(&registry, &post, links));
        assert!(!AllowAll.can_remove_m2m(&registry, &post, links));
    }

    #[test]
    fn record_gates_default_to_allow() {
        let record = Record::new(EntityKey::new("local", "post"));
        assert!(AllowAll.can_create(&record));
        assert!(AllowAll.can_update(&record));
        assert!(AllowAll.can_delete(&record));
    }
}
