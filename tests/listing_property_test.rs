//! Property-based tests for listing reconciliation
//!
//! For any cached set L and any sorted remote listing R split into any page size,
//! feeding the pages through the reconciler in order emits exactly L \ R, each
//! name once, all flagged as remotely deleted.

use hybrid_cache::bucket::{Bucket, Provider};
use hybrid_cache::listing::{ListEntry, ListPage, ListingConfig, LocalPages};
use hybrid_cache::meta_store::JsonMetaStore;
use hybrid_cache::mountpoint::{ContentType, Mountpoints};
use hybrid_cache::record::LocalStore;
use hybrid_cache::registry::RecordRegistry;
use quickcheck::{Arbitrary, Gen, QuickCheck, TestResult};
use quickcheck_macros::quickcheck;
use std::collections::BTreeSet;
use std::sync::Arc;
use tempfile::TempDir;

/// Object name drawn from a small namespace, flat or one directory deep
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ObjName(String);

impl Arbitrary for ObjName {
    fn arbitrary(g: &mut Gen) -> Self {
        let leaf = u8::arbitrary(g) % 12;
        if bool::arbitrary(g) {
            ObjName(format!("o{}", leaf))
        } else {
            ObjName(format!("d{}/o{}", u8::arbitrary(g) % 3, leaf))
        }
    }
}

fn run(cached: &BTreeSet<String>, remote: &BTreeSet<String>, page_size: usize, mountpoints: usize) -> Vec<ListEntry> {
    let dir = TempDir::new().unwrap();
    let paths: Vec<_> = (0..mountpoints).map(|i| dir.path().join(format!("mp{}", i))).collect();
    let store = LocalStore::new(
        Mountpoints::new(paths).unwrap(),
        Arc::new(JsonMetaStore::new()),
        RecordRegistry::default(),
    );
    let bck = Arc::new(Bucket::new("b", Provider::Aws));
    for name in cached {
        let placement = store.mountpoints().place(&bck, name).unwrap();
        std::fs::create_dir_all(placement.fqn.parent().unwrap()).unwrap();
        std::fs::write(&placement.fqn, name.as_bytes()).unwrap();
        assert!(placement
            .fqn
            .starts_with(placement.mountpoint.make_path_ct(&bck, ContentType::Object)));
    }

    let remote: Vec<ListEntry> = remote.iter().map(|n| ListEntry::new(n.as_str(), 0)).collect();
    let mut lpis = LocalPages::new(&store, bck, "", &ListingConfig::default());
    let mut out = ListPage::new();
    if remote.is_empty() {
        lpis.reconcile(&[], &mut out, true);
    } else {
        let pages: Vec<_> = remote.chunks(page_size).collect();
        for (i, page) in pages.iter().enumerate() {
            lpis.reconcile(page, &mut out, i + 1 == pages.len());
        }
    }
    assert_eq!(lpis.pending(), 0);
    out.entries
}

#[quickcheck]
fn prop_reconcile_emits_set_difference(cached: Vec<ObjName>, remote: Vec<ObjName>, page_size: u8) -> TestResult {
    if cached.len() > 40 || remote.len() > 40 {
        return TestResult::discard();
    }
    let cached: BTreeSet<String> = cached.into_iter().map(|n| n.0).collect();
    let remote: BTreeSet<String> = remote.into_iter().map(|n| n.0).collect();
    let page_size = (page_size % 7) as usize + 1;

    let out = run(&cached, &remote, page_size, 3);

    let emitted: Vec<&str> = out.iter().map(|en| en.name.as_str()).collect();
    let unique: BTreeSet<&str> = emitted.iter().copied().collect();
    let expected: BTreeSet<&str> = cached.difference(&remote).map(String::as_str).collect();
    TestResult::from_bool(
        emitted.len() == unique.len()
            && unique == expected
            && out.iter().all(|en| en.is_remotely_deleted()),
    )
}

fn prop_sizes_come_from_local_files(cached: Vec<ObjName>, page_size: u8) -> TestResult {
    if cached.len() > 30 {
        return TestResult::discard();
    }
    let cached: BTreeSet<String> = cached.into_iter().map(|n| n.0).collect();
    let out = run(&cached, &BTreeSet::new(), (page_size % 4) as usize + 1, 2);
    TestResult::from_bool(
        out.len() == cached.len() && out.iter().all(|en| en.size == en.name.len() as u64),
    )
}

#[test]
fn test_property_sizes_come_from_local_files() {
    QuickCheck::new()
        .tests(50)
        .quickcheck(prop_sizes_come_from_local_files as fn(Vec<ObjName>, u8) -> TestResult);
}
