//! Tags, request groups and collections
//!
//! Entities live in id-indexed maps and reference each other by id; a
//! request is identified by its URL. Every mutation that changes state is
//! saved before it returns. Removing a tag or group removes every reference
//! to it.

use crate::capture::classify::{self, RequestStatus};
use crate::capture::CapturedRequest;
use crate::storage::{self, keys, KeyValueStore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestGroup {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Member request URLs
    #[serde(default)]
    pub requests: BTreeSet<String>,
    /// Milliseconds since the Unix epoch
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Member group ids
    #[serde(default)]
    pub groups: BTreeSet<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Fields supplied when creating a group
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewGroup {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub requests: BTreeSet<String>,
}

/// Fields supplied when creating a collection
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewCollection {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub groups: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroupingState {
    pub tags: BTreeMap<String, Tag>,
    pub groups: BTreeMap<String, RequestGroup>,
    pub collections: BTreeMap<String, Collection>,
    /// Request URL to tag ids
    pub request_tags: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStats {
    pub total_requests: usize,
    pub unique_capabilities: Vec<String>,
    /// Mean over requests with a known timing, in milliseconds
    pub average_response_time: f64,
    /// Percentage of successful requests
    pub success_rate: f64,
}

fn new_id() -> String {
    Uuid::now_v7().to_string()
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub struct GroupingStore {
    state: GroupingState,
    storage: Arc<dyn KeyValueStore>,
}

impl GroupingStore {
    /// Load the persisted state, starting empty if there is none
    pub fn load(storage: Arc<dyn KeyValueStore>) -> Self {
        let state = storage::load_or_default(storage.as_ref(), keys::GROUPING_STATE);
        Self { state, storage }
    }

    #[cfg(test)]
    pub fn state(&self) -> &GroupingState {
        &self.state
    }

    fn persist(&self) {
        if let Err(e) = storage::save(self.storage.as_ref(), keys::GROUPING_STATE, &self.state) {
            tracing::warn!("Failed to save grouping state: {}", e);
        }
    }

    // Tags

    pub fn tags(&self) -> impl Iterator<Item = &Tag> {
        self.state.tags.values()
    }

    #[cfg(test)]
    pub fn tag(&self, id: &str) -> Option<&Tag> {
        self.state.tags.get(id)
    }

    pub fn add_tag(&mut self, name: impl Into<String>, color: impl Into<String>) -> Tag {
        let tag = Tag {
            id: new_id(),
            name: name.into(),
            color: color.into(),
        };
        self.state.tags.insert(tag.id.clone(), tag.clone());
        self.persist();
        tag
    }

    pub fn update_tag(&mut self, tag: Tag) -> bool {
        let Some(existing) = self.state.tags.get_mut(&tag.id) else {
            return false;
        };
        *existing = tag;
        self.persist();
        true
    }

    pub fn remove_tag(&mut self, id: &str) -> bool {
        if self.state.tags.remove(id).is_none() {
            return false;
        }
        self.state.request_tags.retain(|_, tags| {
            tags.remove(id);
            !tags.is_empty()
        });
        self.persist();
        true
    }

    // Groups

    pub fn groups(&self) -> impl Iterator<Item = &RequestGroup> {
        self.state.groups.values()
    }

    pub fn group(&self, id: &str) -> Option<&RequestGroup> {
        self.state.groups.get(id)
    }

    pub fn add_group(&mut self, group: NewGroup) -> RequestGroup {
        let now = now_millis();
        let group = RequestGroup {
            id: new_id(),
            name: group.name,
            description: group.description,
            requests: group.requests,
            created_at: now,
            updated_at: now,
        };
        self.state.groups.insert(group.id.clone(), group.clone());
        self.persist();
        group
    }

    /// Replace a group's editable fields; `created_at` is kept
    pub fn update_group(&mut self, group: RequestGroup) -> Option<RequestGroup> {
        let existing = self.state.groups.get_mut(&group.id)?;
        *existing = RequestGroup {
            created_at: existing.created_at,
            updated_at: now_millis(),
            ..group
        };
        let updated = existing.clone();
        self.persist();
        Some(updated)
    }

    pub fn remove_group(&mut self, id: &str) -> bool {
        if self.state.groups.remove(id).is_none() {
            return false;
        }
        let now = now_millis();
        for collection in self.state.collections.values_mut() {
            if collection.groups.remove(id) {
                collection.updated_at = now;
            }
        }
        self.persist();
        true
    }

    /// Returns `false` if the group is unknown or already holds the request
    pub fn add_request_to_group(&mut self, group_id: &str, url: &str) -> bool {
        let Some(group) = self.state.groups.get_mut(group_id) else {
            return false;
        };
        if !group.requests.insert(url.to_string()) {
            return false;
        }
        group.updated_at = now_millis();
        self.persist();
        true
    }

    pub fn remove_request_from_group(&mut self, group_id: &str, url: &str) -> bool {
        let Some(group) = self.state.groups.get_mut(group_id) else {
            return false;
        };
        if !group.requests.remove(url) {
            return false;
        }
        group.updated_at = now_millis();
        self.persist();
        true
    }

    // Collections

    pub fn collections(&self) -> impl Iterator<Item = &Collection> {
        self.state.collections.values()
    }

    #[cfg(test)]
    pub fn collection(&self, id: &str) -> Option<&Collection> {
        self.state.collections.get(id)
    }

    /// Unknown group ids are dropped
    pub fn add_collection(&mut self, collection: NewCollection) -> Collection {
        let now = now_millis();
        let collection = Collection {
            id: new_id(),
            name: collection.name,
            description: collection.description,
            groups: self.known_groups(collection.groups),
            created_at: now,
            updated_at: now,
        };
        self.state
            .collections
            .insert(collection.id.clone(), collection.clone());
        self.persist();
        collection
    }

    pub fn update_collection(&mut self, collection: Collection) -> Option<Collection> {
        let groups = self.known_groups(collection.groups.clone());
        let existing = self.state.collections.get_mut(&collection.id)?;
        *existing = Collection {
            groups,
            created_at: existing.created_at,
            updated_at: now_millis(),
            ..collection
        };
        let updated = existing.clone();
        self.persist();
        Some(updated)
    }

    pub fn remove_collection(&mut self, id: &str) -> bool {
        if self.state.collections.remove(id).is_none() {
            return false;
        }
        self.persist();
        true
    }

    fn known_groups(&self, groups: BTreeSet<String>) -> BTreeSet<String> {
        groups
            .into_iter()
            .filter(|id| self.state.groups.contains_key(id))
            .collect()
    }

    // Request tags

    /// Returns `false` if the tag is unknown or already applied
    pub fn add_tag_to_request(&mut self, url: &str, tag_id: &str) -> bool {
        if !self.state.tags.contains_key(tag_id) {
            return false;
        }
        let tags = self.state.request_tags.entry(url.to_string()).or_default();
        if !tags.insert(tag_id.to_string()) {
            return false;
        }
        self.persist();
        true
    }

    pub fn remove_tag_from_request(&mut self, url: &str, tag_id: &str) -> bool {
        let Some(tags) = self.state.request_tags.get_mut(url) else {
            return false;
        };
        if !tags.remove(tag_id) {
            return false;
        }
        if tags.is_empty() {
            self.state.request_tags.remove(url);
        }
        self.persist();
        true
    }

    pub fn request_tags(&self, url: &str) -> Vec<&Tag> {
        self.state
            .request_tags
            .get(url)
            .into_iter()
            .flatten()
            .filter_map(|id| self.state.tags.get(id))
            .collect()
    }

    pub fn request_groups(&self, url: &str) -> Vec<&RequestGroup> {
        self.state
            .groups
            .values()
            .filter(|group| group.requests.contains(url))
            .collect()
    }

    /// Statistics over the captured requests whose URL is in the group
    pub fn group_stats(&self, group_id: &str, requests: &[Arc<CapturedRequest>]) -> GroupStats {
        let Some(group) = self.state.groups.get(group_id) else {
            return GroupStats::default();
        };
        let members: Vec<&CapturedRequest> = requests
            .iter()
            .filter(|request| group.requests.contains(&request.url))
            .map(Arc::as_ref)
            .collect();
        if members.is_empty() {
            return GroupStats::default();
        }

        let timings: Vec<f64> = members.iter().filter_map(|r| classify::timing(r)).collect();
        let average_response_time = if timings.is_empty() {
            0.0
        } else {
            timings.iter().sum::<f64>() / timings.len() as f64
        };

        let successes = members
            .iter()
            .filter(|r| classify::status(r) == RequestStatus::Success)
            .count();

        let unique_capabilities: BTreeSet<String> = members
            .iter()
            .filter_map(|r| r.request_message().message())
            .flat_map(|message| message.capability_names())
            .map(str::to_string)
            .collect();

        GroupStats {
            total_requests: members.len(),
            unique_capabilities: unique_capabilities.into_iter().collect(),
            average_response_time,
            success_rate: successes as f64 / members.len() as f64 * 100.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::har::test_entries::{car_entry, entry, timed};
    use crate::capture::CaptureSession;
    use crate::storage::MemoryStore;
    use proptest::prelude::*;
    use std::time::Duration;
    use ucanscope_common::fixtures::message_with_capabilities;

    /// Let the millisecond clock advance
    fn tick() {
        std::thread::sleep(Duration::from_millis(5));
    }

    fn store() -> (GroupingStore, Arc<MemoryStore>) {
        let storage = Arc::new(MemoryStore::new());
        (GroupingStore::load(storage.clone()), storage)
    }

    fn group(store: &mut GroupingStore, name: &str) -> RequestGroup {
        store.add_group(NewGroup {
            name: name.into(),
            ..Default::default()
        })
    }

    #[test]
    fn test_mutations_are_persisted() {
        let (mut store, storage) = store();
        let tag = store.add_tag("slow", "#ff0000");
        let g = group(&mut store, "uploads");
        store.add_request_to_group(&g.id, "https://up/");
        store.add_tag_to_request("https://up/", &tag.id);

        let reloaded = GroupingStore::load(storage);
        assert_eq!(reloaded.state(), store.state());
        assert_eq!(reloaded.request_tags("https://up/"), vec![&tag]);
    }

    #[test]
    fn test_remove_tag_cascades() {
        let (mut store, _) = store();
        let slow = store.add_tag("slow", "red");
        let keep = store.add_tag("keep", "blue");
        store.add_tag_to_request("https://a/", &slow.id);
        store.add_tag_to_request("https://b/", &slow.id);
        store.add_tag_to_request("https://b/", &keep.id);

        assert!(store.remove_tag(&slow.id));
        assert!(store.tag(&slow.id).is_none());
        assert!(store.request_tags("https://a/").is_empty());
        assert!(!store.state().request_tags.contains_key("https://a/"));
        assert_eq!(store.request_tags("https://b/"), vec![&keep]);

        assert!(!store.remove_tag(&slow.id));
    }

    #[test]
    fn test_remove_group_cascades_into_collections() {
        let (mut store, _) = store();
        let a = group(&mut store, "a");
        let b = group(&mut store, "b");
        let collection = store.add_collection(NewCollection {
            name: "release".into(),
            groups: BTreeSet::from([a.id.clone(), b.id.clone(), "unknown".to_string()]),
            ..Default::default()
        });
        assert_eq!(collection.groups.len(), 2);

        tick();
        assert!(store.remove_group(&a.id));
        let collection = store.collection(&collection.id).unwrap();
        assert_eq!(collection.groups, BTreeSet::from([b.id.clone()]));
        assert!(collection.updated_at > collection.created_at);
    }

    #[test]
    fn test_membership_changes_refresh_updated_at() {
        let (mut store, _) = store();
        let g = group(&mut store, "g");
        let other = group(&mut store, "other");
        let untouched = store.add_collection(NewCollection {
            name: "untouched".into(),
            groups: BTreeSet::from([g.id.clone()]),
            ..Default::default()
        });

        tick();
        assert!(store.add_request_to_group(&g.id, "https://a/"));
        let added = store.group(&g.id).unwrap().updated_at;
        assert!(added > g.updated_at);

        // Lookups and no-op adds leave it alone
        tick();
        assert_eq!(store.request_groups("https://a/").len(), 1);
        assert!(!store.add_request_to_group(&g.id, "https://a/"));
        assert_eq!(store.group(&g.id).unwrap().updated_at, added);

        tick();
        assert!(store.remove_request_from_group(&g.id, "https://a/"));
        assert!(store.group(&g.id).unwrap().updated_at > added);

        // Removing a group outside the collection does not touch it
        tick();
        assert!(store.remove_group(&other.id));
        assert_eq!(
            store.collection(&untouched.id).unwrap().updated_at,
            untouched.updated_at
        );
    }

    #[test]
    fn test_group_membership_is_idempotent() {
        let (mut store, _) = store();
        let g = group(&mut store, "g");

        assert!(store.add_request_to_group(&g.id, "https://a/"));
        assert!(!store.add_request_to_group(&g.id, "https://a/"));
        assert_eq!(store.group(&g.id).unwrap().requests.len(), 1);
        assert_eq!(store.request_groups("https://a/").len(), 1);

        assert!(store.remove_request_from_group(&g.id, "https://a/"));
        assert!(!store.remove_request_from_group(&g.id, "https://a/"));
        assert!(!store.add_request_to_group("missing", "https://a/"));
    }

    #[test]
    fn test_update_keeps_created_at() {
        let (mut store, _) = store();
        let g = group(&mut store, "old");
        let updated = store
            .update_group(RequestGroup {
                name: "new".into(),
                created_at: 0,
                ..g.clone()
            })
            .unwrap();
        assert_eq!(updated.name, "new");
        assert_eq!(updated.created_at, g.created_at);
        assert!(updated.updated_at >= g.updated_at);

        let mut unknown = g;
        unknown.id = "missing".into();
        assert!(store.update_group(unknown).is_none());
    }

    #[test]
    fn test_tagging_unknown_tag_is_rejected() {
        let (mut store, _) = store();
        assert!(!store.add_tag_to_request("https://a/", "missing"));
        assert!(store.state().request_tags.is_empty());
    }

    #[test]
    fn test_group_stats() {
        let (mut store, _) = store();
        let mut session = CaptureSession::new();
        session.push(&timed(
            car_entry("https://a/", 200, &message_with_capabilities(&["store/add"])),
            100.0,
        ));
        session.push(&timed(
            car_entry("https://a/", 500, &message_with_capabilities(&["upload/add", "store/add"])),
            300.0,
        ));
        session.push(&entry("https://b/", 200));
        session.push(&timed(entry("https://other/", 200), 10_000.0));

        let g = store.add_group(NewGroup {
            name: "g".into(),
            requests: BTreeSet::from(["https://a/".to_string(), "https://b/".to_string()]),
            ..Default::default()
        });

        let stats = store.group_stats(&g.id, session.requests());
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.unique_capabilities, vec!["store/add", "upload/add"]);
        assert_eq!(stats.average_response_time, 200.0);
        assert!((stats.success_rate - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_group_stats_counts_redirects_as_failures() {
        let (mut store, _) = store();
        let mut session = CaptureSession::new();
        session.push(&entry("https://a/", 200));
        session.push(&entry("https://a/", 302));
        session.push(&entry("https://a/", 101));
        session.push(&entry("https://a/", 204));

        let g = store.add_group(NewGroup {
            name: "g".into(),
            requests: BTreeSet::from(["https://a/".to_string()]),
            ..Default::default()
        });

        let stats = store.group_stats(&g.id, session.requests());
        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.success_rate, 50.0);
    }

    #[test]
    fn test_group_stats_empty_intersection() {
        let (mut store, _) = store();
        let mut session = CaptureSession::new();
        session.push(&timed(entry("https://a/", 200), 10.0));

        let g = store.add_group(NewGroup {
            name: "g".into(),
            requests: BTreeSet::from(["https://nowhere/".to_string()]),
            ..Default::default()
        });

        assert_eq!(store.group_stats(&g.id, session.requests()), GroupStats::default());
        assert_eq!(store.group_stats("missing", session.requests()), GroupStats::default());
    }

    proptest! {
        #[test]
        fn tag_toggle_is_idempotent(toggles in prop::collection::vec((0usize..3, any::<bool>()), 0..24)) {
            let (mut store, _) = store();
            let tag = store.add_tag("t", "c");
            let urls = ["https://a/", "https://b/", "https://c/"];

            let mut expected = BTreeSet::new();
            for (index, on) in toggles {
                let url = urls[index];
                if on {
                    store.add_tag_to_request(url, &tag.id);
                    store.add_tag_to_request(url, &tag.id);
                    expected.insert(url);
                } else {
                    store.remove_tag_from_request(url, &tag.id);
                    expected.remove(url);
                }
            }

            for url in urls {
                prop_assert_eq!(store.request_tags(url).len(), usize::from(expected.contains(url)));
            }
        }
    }
}
