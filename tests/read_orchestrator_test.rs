//! Read Orchestrator Tests
//!
//! Decision table of the local data provider: serve local, refresh a stale copy,
//! cold fetch, and skip, plus lock handling around the returned streams.

mod common;

use common::{cache_object, cloud_bucket, local_bucket, local_store, md5, MockBackend};
use hybrid_cache::backend::Backends;
use hybrid_cache::bucket::Provider;
use hybrid_cache::data_provider::{DataProvider, LocalDataProvider, ReadOutcome, ReadSource};
use hybrid_cache::object_attrs::ObjectAttrs;
use hybrid_cache::read_stream::BoxObjectReader;
use hybrid_cache::CacheError;
use hyper::StatusCode;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

async fn read_all(reader: &mut BoxObjectReader) -> Vec<u8> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await.unwrap();
    buf
}

#[tokio::test]
async fn test_serves_local_copy_without_remote_calls() {
    let (_dir, store) = local_store(2);
    let remote = MockBackend::new(Provider::Aws);
    let bck = cloud_bucket("photos", false);
    let attrs = ObjectAttrs::new(5).with_checksum(md5("c1")).with_version("v1");
    let mut rec = cache_object(&store, &bck, "a/x.jpg", b"local", attrs.clone()).await;

    let provider = LocalDataProvider::new(remote.backends());
    let outcome = provider.reader(&mut rec, false).await.unwrap();
    assert_eq!(outcome.source(), Some(ReadSource::Local));
    let ReadOutcome::Ready { mut reader, attrs: header, .. } = outcome else {
        panic!("expected a stream");
    };
    assert_eq!(read_all(&mut reader).await, b"local");
    assert_eq!(header.size, 5);
    assert_eq!(header.checksum, attrs.checksum);
    assert_eq!(header.version, "v1");
    assert!(header.atime > attrs.atime);
    assert_eq!(remote.heads(), 0);
    assert_eq!(remote.gets(), 0);
}

#[tokio::test]
async fn test_local_stream_holds_shared_lock_until_closed() {
    let (_dir, store) = local_store(1);
    let remote = MockBackend::new(Provider::Aws);
    let bck = cloud_bucket("photos", false);
    let mut rec = cache_object(&store, &bck, "x", b"bytes", ObjectAttrs::new(5).with_checksum(md5("c"))).await;
    let other = store.record(Arc::clone(&bck), "x").unwrap();

    let provider = LocalDataProvider::new(remote.backends());
    let ReadOutcome::Ready { mut reader, .. } = provider.reader(&mut rec, false).await.unwrap() else {
        panic!("expected a stream");
    };

    // readers may share, writers must wait
    assert!(other.try_lock(true).is_none());
    let shared = other.try_lock(false).expect("shared hold");
    shared.unlock();

    read_all(&mut reader).await;
    reader.close().unwrap();
    reader.close().unwrap();
    assert!(other.try_lock(true).is_some());
}

#[tokio::test]
async fn test_dropping_stream_releases_lock() {
    let (_dir, store) = local_store(1);
    let remote = MockBackend::new(Provider::Aws);
    let bck = cloud_bucket("photos", false);
    let mut rec = cache_object(&store, &bck, "x", b"bytes", ObjectAttrs::new(5).with_checksum(md5("c"))).await;

    let provider = LocalDataProvider::new(remote.backends());
    let outcome = provider.reader(&mut rec, false).await.unwrap();
    assert!(rec.try_lock(true).is_none());
    drop(outcome);
    assert!(rec.try_lock(true).is_some());
}

#[tokio::test]
async fn test_latest_version_matches_serves_local() {
    let (_dir, store) = local_store(2);
    let remote = MockBackend::new(Provider::Aws);
    let bck = cloud_bucket("photos", false);
    let attrs = ObjectAttrs::new(5).with_checksum(md5("c1")).with_version("v1");
    remote.put("x", b"REMOT", attrs.clone());
    let mut rec = cache_object(&store, &bck, "x", b"local", attrs).await;

    let provider = LocalDataProvider::new(remote.backends());
    let outcome = provider.reader(&mut rec, true).await.unwrap();
    assert_eq!(outcome.source(), Some(ReadSource::Local));
    assert_eq!(remote.heads(), 1);
    assert_eq!(remote.gets(), 0);
}

#[tokio::test]
async fn test_stale_copy_is_refetched_keeping_record_checksum() {
    let (_dir, store) = local_store(2);
    let remote = MockBackend::new(Provider::Aws);
    let bck = cloud_bucket("photos", false);
    remote.put("x", b"fresh!", ObjectAttrs::new(6).with_checksum(md5("c2")).with_version("v2"));
    let mut rec = cache_object(
        &store,
        &bck,
        "x",
        b"stale",
        ObjectAttrs::new(5).with_checksum(md5("c1")).with_version("v1"),
    )
    .await;
    let fqn = rec.fqn().to_path_buf();

    let provider = LocalDataProvider::new(remote.backends());
    let outcome = provider.reader(&mut rec, true).await.unwrap();
    assert_eq!(outcome.source(), Some(ReadSource::Remote));
    let ReadOutcome::Ready { mut reader, attrs, .. } = outcome else {
        panic!("expected a stream");
    };
    assert_eq!(read_all(&mut reader).await, b"fresh!");
    assert_eq!(attrs.size, 6);
    // the record's known checksum wins over the backend-reported one
    assert_eq!(attrs.checksum, Some(md5("c1")));
    assert_eq!(remote.heads(), 1);
    assert_eq!(remote.gets(), 1);

    // a stale copy is not deleted by the read path
    assert!(fqn.exists());
    assert!(rec.try_lock(true).is_some());
}

#[tokio::test]
async fn test_cold_fetch_uses_remote_attributes_and_writes_nothing() {
    let (dir, store) = local_store(2);
    let remote = MockBackend::new(Provider::Aws);
    let bck = cloud_bucket("photos", false);
    remote.put("x", b"remote-bytes", ObjectAttrs::new(12).with_checksum(md5("rc")));
    let mut rec = store.record(Arc::clone(&bck), "x").unwrap();

    let provider = LocalDataProvider::new(remote.backends());
    let outcome = provider.reader(&mut rec, false).await.unwrap();
    assert_eq!(outcome.source(), Some(ReadSource::Remote));
    let ReadOutcome::Ready { mut reader, attrs, .. } = outcome else {
        panic!("expected a stream");
    };
    assert_eq!(read_all(&mut reader).await, b"remote-bytes");
    assert_eq!(attrs.size, 12);
    assert_eq!(attrs.checksum, Some(md5("rc")));
    assert!(attrs.version.is_empty());
    assert_eq!(remote.heads(), 0);
    assert!(!rec.fqn().exists());
    assert!(!rec.meta_fqn().exists());
    let files = walkdir::WalkDir::new(dir.path())
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count();
    assert_eq!(files, 0);
}

#[tokio::test]
async fn test_cold_fetch_backend_error_passes_through() {
    let (_dir, store) = local_store(1);
    let remote = MockBackend::new(Provider::Aws);
    let bck = cloud_bucket("photos", false);
    let mut rec = store.record(Arc::clone(&bck), "missing").unwrap();

    let provider = LocalDataProvider::new(remote.backends());
    let err = provider.reader(&mut rec, false).await.unwrap_err();
    assert!(matches!(err, CacheError::Backend(ref e) if e.is_not_found()));
}

#[tokio::test]
async fn test_local_bucket_without_copy_skips() {
    let (_dir, store) = local_store(2);
    let remote = MockBackend::new(Provider::Aws);
    let bck = local_bucket("scratch");
    let mut rec = store.record(bck, "nothing-here").unwrap();

    let provider = LocalDataProvider::new(remote.backends());
    let outcome = provider.reader(&mut rec, false).await.unwrap();
    assert!(outcome.is_skip());
    assert_eq!(remote.heads() + remote.gets(), 0);
    assert!(rec.try_lock(true).is_some());
}

#[tokio::test]
async fn test_local_bucket_serves_without_backend() {
    let (_dir, store) = local_store(1);
    let bck = local_bucket("scratch");
    let mut rec = cache_object(&store, &bck, "x", b"only copy", ObjectAttrs::new(9)).await;

    let provider = LocalDataProvider::new(Arc::new(Backends::new()));
    let ReadOutcome::Ready { mut reader, source, .. } = provider.reader(&mut rec, false).await.unwrap() else {
        panic!("expected a stream");
    };
    assert_eq!(source, ReadSource::Local);
    assert_eq!(read_all(&mut reader).await, b"only copy");
}

#[tokio::test]
async fn test_remote_not_found_skips_and_keeps_copy() {
    let (_dir, store) = local_store(1);
    let remote = MockBackend::new(Provider::Aws);
    let bck = cloud_bucket("photos", false);
    let mut rec = cache_object(&store, &bck, "x", b"ghost", ObjectAttrs::new(5).with_checksum(md5("c"))).await;
    rec.load(true, None).await.unwrap();
    assert!(store.registry().contains(rec.fqn()));

    let provider = LocalDataProvider::new(remote.backends());
    let outcome = provider.reader(&mut rec, true).await.unwrap();
    assert!(outcome.is_skip());
    assert!(rec.fqn().exists());
    assert!(!store.registry().contains(rec.fqn()));
    assert_eq!(remote.gets(), 0);
    assert!(rec.try_lock(true).is_some());
}

#[tokio::test]
async fn test_remote_not_found_with_sync_policy_deletes_copy() {
    let (_dir, store) = local_store(1);
    let remote = MockBackend::new(Provider::Aws);
    let bck = cloud_bucket("photos", true);
    let mut rec = cache_object(&store, &bck, "x", b"ghost", ObjectAttrs::new(5).with_checksum(md5("c"))).await;

    let provider = LocalDataProvider::new(remote.backends());
    let err = provider.reader(&mut rec, true).await.unwrap_err();
    // the refetch that follows finds nothing either
    assert!(err.is_not_found());
    assert!(!rec.fqn().exists());
    assert!(!rec.meta_fqn().exists());
    assert!(!rec.exists());
    assert_eq!(remote.gets(), 1);
    assert!(rec.try_lock(true).is_some());
}

#[tokio::test]
async fn test_head_failure_is_fetch_failed_and_evicts_registry_only() {
    let (_dir, store) = local_store(1);
    let remote = MockBackend::new(Provider::Aws);
    remote.fail_heads(StatusCode::SERVICE_UNAVAILABLE);
    let bck = cloud_bucket("photos", true);
    let mut rec = cache_object(&store, &bck, "x", b"keep", ObjectAttrs::new(4).with_checksum(md5("c"))).await;
    rec.load(true, None).await.unwrap();

    let provider = LocalDataProvider::new(remote.backends());
    let err = provider.reader(&mut rec, true).await.unwrap_err();
    match &err {
        CacheError::FetchFailed { op, path, .. } => {
            assert_eq!(op, "head-latest");
            assert!(path.contains("photos"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(err.to_string().contains("503"));
    assert!(rec.fqn().exists());
    assert!(!store.registry().contains(rec.fqn()));
    assert!(rec.try_lock(true).is_some());
}

#[tokio::test]
async fn test_corrupt_metadata_is_load_failed() {
    let (_dir, store) = local_store(1);
    let remote = MockBackend::new(Provider::Aws);
    let bck = cloud_bucket("photos", false);
    let mut rec = store.record(Arc::clone(&bck), "x").unwrap();
    std::fs::create_dir_all(rec.meta_fqn().parent().unwrap()).unwrap();
    std::fs::write(rec.meta_fqn(), b"{not json").unwrap();

    let provider = LocalDataProvider::new(remote.backends());
    let err = provider.reader(&mut rec, false).await.unwrap_err();
    assert!(matches!(err, CacheError::LoadFailed { .. }), "{:?}", err);
    assert!(err.to_string().contains("load"));
    assert_eq!(remote.gets(), 0);
}

#[tokio::test]
async fn test_versioning_disabled_compares_checksums() {
    let (_dir, store) = local_store(1);
    let remote = MockBackend::new(Provider::Aws);
    let mut bck = (*cloud_bucket("photos", false)).clone();
    bck.versioning.enabled = false;
    let bck = Arc::new(bck);
    remote.put("x", b"local", ObjectAttrs::new(5).with_checksum(md5("c1")).with_version("v9"));
    let mut rec = cache_object(
        &store,
        &bck,
        "x",
        b"local",
        ObjectAttrs::new(5).with_checksum(md5("c1")).with_version("v1"),
    )
    .await;

    let provider = LocalDataProvider::new(remote.backends());
    let outcome = provider.reader(&mut rec, true).await.unwrap();
    assert_eq!(outcome.source(), Some(ReadSource::Local));
}
