//! Property tests over the feed algebra and the placeholder search.

use proptest::prelude::*;
use semver::Version;

use relpack::packaging::bundle::kmp_find;
use relpack::packaging::{AssetType, ReleaseAsset, ReleaseEntryHelper, ReleaseFeed};

fn asset(name: &str, version: Version, kind: AssetType) -> ReleaseAsset {
    ReleaseAsset {
        package_id: "App".into(),
        version,
        kind,
        file_name: name.into(),
        sha1: String::new(),
        sha256: String::new(),
        size: 0,
        notes_markdown: None,
        notes_html: None,
    }
}

fn naive_find(haystack: &[u8], pattern: &[u8]) -> Option<usize> {
    if pattern.is_empty() || pattern.len() > haystack.len() {
        return None;
    }
    haystack.windows(pattern.len()).position(|w| w == pattern)
}

fn version_strategy() -> impl Strategy<Value = Version> {
    (0u64..4, 0u64..4, 0u64..4).prop_map(|(ma, mi, pa)| Version::new(ma, mi, pa))
}

fn feed_strategy() -> impl Strategy<Value = ReleaseFeed> {
    prop::collection::vec(
        (version_strategy(), prop::bool::ANY),
        0..12,
    )
    .prop_map(|entries| {
        let assets = entries
            .into_iter()
            .map(|(v, is_delta)| {
                let kind = if is_delta { AssetType::Delta } else { AssetType::Full };
                let suffix = if is_delta { "delta" } else { "full" };
                asset(&format!("App-{v}-{suffix}.relpkg"), v, kind)
            })
            .collect();
        ReleaseFeed { assets }
    })
}

proptest! {
    #[test]
    fn kmp_agrees_with_naive_search(
        haystack in prop::collection::vec(0u8..4, 0..200),
        pattern in prop::collection::vec(0u8..4, 1..8),
    ) {
        prop_assert_eq!(kmp_find(&haystack, &pattern), naive_find(&haystack, &pattern));
    }

    #[test]
    fn merge_never_duplicates_file_names(a in feed_strategy(), b in feed_strategy()) {
        let merged = ReleaseFeed::merge(&a, &b);
        let mut names: Vec<&str> = merged.assets.iter().map(|x| x.file_name.as_str()).collect();
        names.sort_unstable();
        let before = names.len();
        names.dedup();
        prop_assert_eq!(before, names.len());
    }

    #[test]
    fn merge_priority_entries_always_survive(a in feed_strategy(), b in feed_strategy()) {
        let merged = ReleaseFeed::merge(&a, &b);
        for wanted in &a.assets {
            let found = merged.assets.iter().find(|x| x.file_name == wanted.file_name);
            prop_assert_eq!(found, Some(wanted));
        }
    }

    #[test]
    fn version_gate_matches_definition(feed in feed_strategy(), candidate in version_strategy()) {
        let expected = feed.assets.iter().any(|a| a.version >= candidate);
        let helper = ReleaseEntryHelper::with_assets(
            std::path::Path::new("/nonexistent"),
            "win",
            feed.assets.clone(),
        );
        prop_assert_eq!(helper.does_similar_version_exist(&candidate), expected);
    }

    #[test]
    fn retention_partitions_the_feed(feed in feed_strategy(), keep in 0usize..6) {
        let (kept, deleted) = ReleaseEntryHelper::apply_retention(&feed, keep);
        prop_assert_eq!(kept.assets.len() + deleted.len(), feed.assets.len());

        if keep == 0 {
            prop_assert!(deleted.is_empty());
            return Ok(());
        }

        let mut fulls: Vec<&Version> = feed
            .assets
            .iter()
            .filter(|a| a.kind == AssetType::Full)
            .map(|a| &a.version)
            .collect();
        fulls.sort_by(|a, b| b.cmp(a));
        if fulls.len() <= keep {
            prop_assert!(deleted.is_empty());
            return Ok(());
        }
        let cutoff = fulls[keep - 1];

        for a in &kept.assets {
            prop_assert!(
                a.version > *cutoff || (a.version == *cutoff && a.kind != AssetType::Delta)
            );
        }
        for a in &deleted {
            prop_assert!(
                a.version < *cutoff || (a.version == *cutoff && a.kind == AssetType::Delta)
            );
        }
        // A delta is never kept without a base full release below-or-at it.
        let min_kept_full = kept
            .assets
            .iter()
            .filter(|a| a.kind == AssetType::Full)
            .map(|a| &a.version)
            .min();
        if let Some(min_full) = min_kept_full {
            for a in kept.assets.iter().filter(|a| a.kind == AssetType::Delta) {
                prop_assert!(a.version > *min_full);
            }
        }
    }

    #[test]
    fn feed_json_round_trips(feed in feed_strategy()) {
        let json = feed.to_json().unwrap();
        prop_assert_eq!(ReleaseFeed::from_json(&json).unwrap(), feed);
    }
}
