//! Unit and property tests for reconciliation

use super::*;
use std::collections::HashSet;
use std::path::PathBuf;
use proptest::prelude::*;
use rstest::*;
use test_case::test_case;

use crate::scanner::PresenceOrigin;

fn audio(id: &str) -> ContentItem {
    ContentItem::new("feed", id, format!("Title {}", id), "podcast", AssetType::Audio)
        .with_download_url(format!("https://example.com/{}.mp3", id))
}

fn archived(origin: PresenceOrigin) -> PresenceFact {
    PresenceFact {
        kind: PresenceKind::Archived {
            path: PathBuf::from("feed/podcast/x.mp3"),
        },
        origin,
    }
}

fn ids(items: &[ContentItem]) -> Vec<String> {
    items.iter().map(|i| i.id.clone()).collect()
}

#[fixture]
fn reconciler() -> Reconciler {
    Reconciler::new()
}

#[rstest]
fn test_empty_archive_fetches_everything(reconciler: Reconciler) {
    let plan = reconciler.reconcile(vec![audio("a"), audio("b"), audio("c")], &PresenceMap::new());

    assert_eq!(ids(&plan.to_fetch), vec!["a", "b", "c"]);
    assert_eq!(plan.counts.indexed, 3);
    assert_eq!(plan.counts.to_fetch, 3);
    assert_eq!(plan.counts.local, 0);
}

#[rstest]
fn test_present_items_are_local(reconciler: Reconciler) {
    let mut present = PresenceMap::new();
    present.insert("b".to_string(), archived(PresenceOrigin::Manifest));

    let plan = reconciler.reconcile(vec![audio("a"), audio("b"), audio("c")], &present);

    assert_eq!(ids(&plan.to_fetch), vec!["a", "c"]);
    assert_eq!(plan.counts.local, 1);
    assert!(plan.adoptions.is_empty());
}

#[rstest]
fn test_duplicates_keep_first_occurrence(reconciler: Reconciler) {
    let first = audio("a");
    let mut second = audio("a");
    second.title = "A different title".to_string();

    let plan = reconciler.reconcile(vec![first.clone(), audio("b"), second], &PresenceMap::new());

    assert_eq!(plan.to_fetch.len(), 2);
    assert_eq!(plan.to_fetch[0], first);
    assert_eq!(plan.counts.indexed, 2);
    assert_eq!(plan.counts.duplicates, 1);
}

#[rstest]
fn test_restricted_and_missing_locator_are_excluded(reconciler: Reconciler) {
    let restricted = audio("r").restricted();
    let mut no_locator = audio("n");
    no_locator.download_url = None;

    let mut present = PresenceMap::new();
    present.insert(
        "m".to_string(),
        PresenceFact {
            kind: PresenceKind::Restricted {
                reason: "HTTP 403".to_string(),
            },
            origin: PresenceOrigin::Manifest,
        },
    );

    let plan = reconciler.reconcile(vec![restricted, no_locator, audio("m"), audio("ok")], &present);

    assert_eq!(ids(&plan.to_fetch), vec!["ok"]);
    assert_eq!(plan.counts.restricted, 2);
    assert_eq!(plan.counts.missing_locator, 1);
    assert_eq!(
        plan.dispositions,
        vec![
            ("r".to_string(), Disposition::Restricted),
            ("n".to_string(), Disposition::MissingLocator),
            ("m".to_string(), Disposition::Restricted),
            ("ok".to_string(), Disposition::Fetch),
        ]
    );
}

#[test]
fn test_disabled_types_still_counted() {
    let reconciler = Reconciler::new().with_enabled_types([AssetType::Audio]);
    let video = ContentItem::new("feed", "v", "Video", "clips", AssetType::Video)
        .with_download_url("https://example.com/v.mp4");

    let plan = reconciler.reconcile(vec![video, audio("a")], &PresenceMap::new());

    assert_eq!(ids(&plan.to_fetch), vec!["a"]);
    assert_eq!(plan.counts.indexed, 2);
    assert_eq!(plan.counts.type_excluded, 1);
}

#[test]
fn test_walk_found_items_are_adoptable() {
    let mut present = PresenceMap::new();
    present.insert("a".to_string(), archived(PresenceOrigin::Filename));
    present.insert("b".to_string(), archived(PresenceOrigin::Sidecar));
    present.insert("c".to_string(), archived(PresenceOrigin::Manifest));

    let plan = Reconciler::new().reconcile(vec![audio("a"), audio("b"), audio("c")], &present);

    let adopted: Vec<&str> = plan.adoptions.iter().map(|a| a.item_id.as_str()).collect();
    assert_eq!(adopted, vec!["a", "b"]);
    assert_eq!(plan.counts.local, 3);
}

#[test_case(None, 5, 0 ; "no limit")]
#[test_case(Some(2), 2, 3 ; "limit below batch")]
#[test_case(Some(10), 5, 0 ; "limit above batch")]
#[test_case(Some(0), 0, 5 ; "zero limit defers all")]
fn test_limit_defers_overflow(limit: Option<usize>, fetched: usize, deferred: usize) {
    let items: Vec<ContentItem> = (0..5).map(|i| audio(&i.to_string())).collect();
    let plan = Reconciler::new().with_limit(limit).reconcile(items, &PresenceMap::new());

    assert_eq!(plan.to_fetch.len(), fetched);
    assert_eq!(plan.counts.deferred, deferred);
    assert_eq!(plan.counts.indexed, 5);
}

fn partition_total(counts: &ReconcileCounts) -> usize {
    counts.local
        + counts.type_excluded
        + counts.restricted
        + counts.missing_locator
        + counts.to_fetch
        + counts.deferred
}

prop_compose! {
    fn arb_item()(
        id in 0u8..12,
        restricted in any::<bool>(),
        has_locator in prop::bool::weighted(0.8),
        video in prop::bool::weighted(0.2),
    ) -> ContentItem {
        let asset_type = if video { AssetType::Video } else { AssetType::Audio };
        let mut item = ContentItem::new("feed", format!("item{}", id), format!("Title {}", id), "podcast", asset_type);
        if has_locator {
            item = item.with_download_url(format!("https://example.com/{}", id));
        }
        if restricted {
            item = item.restricted();
        }
        item
    }
}

proptest! {
    #[test]
    fn prop_to_fetch_is_ordered_subsequence(
        items in prop::collection::vec(arb_item(), 0..30),
        present_ids in prop::collection::hash_set(0u8..12, 0..6),
    ) {
        let present: PresenceMap = present_ids
            .iter()
            .map(|id| (format!("item{}", id), archived(PresenceOrigin::Manifest)))
            .collect();

        let plan = Reconciler::new().reconcile(items.clone(), &present);

        let mut cursor = items.iter();
        for fetched in &plan.to_fetch {
            prop_assert!(cursor.any(|candidate| candidate == fetched));
        }
    }

    #[test]
    fn prop_every_unique_item_lands_in_one_bucket(
        items in prop::collection::vec(arb_item(), 0..30),
        present_ids in prop::collection::hash_set(0u8..12, 0..6),
        limit in prop::option::of(0usize..5),
    ) {
        let present: PresenceMap = present_ids
            .iter()
            .map(|id| (format!("item{}", id), archived(PresenceOrigin::Filename)))
            .collect();

        let unique: HashSet<&str> = items.iter().map(|i| i.id.as_str()).collect();
        let plan = Reconciler::new()
            .with_enabled_types([AssetType::Audio])
            .with_limit(limit)
            .reconcile(items.clone(), &present);

        prop_assert_eq!(plan.counts.indexed, unique.len());
        prop_assert_eq!(plan.counts.duplicates, items.len() - unique.len());
        prop_assert_eq!(partition_total(&plan.counts), plan.counts.indexed);
        prop_assert_eq!(plan.dispositions.len(), plan.counts.indexed);
        prop_assert_eq!(plan.to_fetch.len(), plan.counts.to_fetch);
    }

    #[test]
    fn prop_no_id_fetched_twice(items in prop::collection::vec(arb_item(), 0..30)) {
        let plan = Reconciler::new().reconcile(items, &PresenceMap::new());
        let fetched: HashSet<&str> = plan.to_fetch.iter().map(|i| i.id.as_str()).collect();
        prop_assert_eq!(fetched.len(), plan.to_fetch.len());
    }

    #[test]
    fn prop_reconcile_is_deterministic(items in prop::collection::vec(arb_item(), 0..20)) {
        let reconciler = Reconciler::new().with_limit(Some(3));
        let first = reconciler.reconcile(items.clone(), &PresenceMap::new());
        let second = reconciler.reconcile(items, &PresenceMap::new());
        prop_assert_eq!(first.dispositions, second.dispositions);
    }
}
