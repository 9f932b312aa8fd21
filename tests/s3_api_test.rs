//! S3 API compliance tests through the AWS SDK
//!
//! Every test spawns the gateway binary; filesystem servers run with
//! signature checking enabled so the SDK's SigV4 signing is exercised too.

mod common;

use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    CompletedMultipartUpload, CompletedPart, Delete, MetadataDirective, ObjectIdentifier,
};
use common::{generate_binary, TestServer};
use md5::{Digest, Md5};
use std::time::Duration;

// ============================================================================
// Object CRUD
// ============================================================================

#[tokio::test]
async fn test_put_get_roundtrip() {
    let server = TestServer::filesystem_with_auth().await;
    let client = server.s3_client().await;

    let data = b"Hello, gateway!";

    let put = client
        .put_object()
        .bucket(server.bucket())
        .key("test.txt")
        .body(ByteStream::from(data.to_vec()))
        .send()
        .await
        .expect("PUT should succeed");
    assert_eq!(
        put.e_tag(),
        Some(format!("\"{}\"", hex::encode(Md5::digest(data))).as_str())
    );

    let get_result = client
        .get_object()
        .bucket(server.bucket())
        .key("test.txt")
        .send()
        .await
        .expect("GET should succeed");

    let body = get_result.body.collect().await.unwrap().into_bytes();
    assert_eq!(body.as_ref(), data, "Content should match");
}

#[tokio::test]
async fn test_put_get_binary_memory_backend() {
    let server = TestServer::memory().await;
    let client = server.s3_client().await;

    let data = generate_binary(100_000, 7);

    client
        .put_object()
        .bucket(server.bucket())
        .key("dir/binary.bin")
        .body(ByteStream::from(data.clone()))
        .send()
        .await
        .expect("PUT should succeed");

    let get_result = client
        .get_object()
        .bucket(server.bucket())
        .key("dir/binary.bin")
        .send()
        .await
        .expect("GET should succeed");

    let body = get_result.body.collect().await.unwrap().into_bytes();
    assert_eq!(body.as_ref(), data.as_slice());
}

#[tokio::test]
async fn test_put_empty_body() {
    let server = TestServer::filesystem_with_auth().await;
    let client = server.s3_client().await;

    client
        .put_object()
        .bucket(server.bucket())
        .key("empty")
        .body(ByteStream::from(Vec::new()))
        .send()
        .await
        .expect("PUT empty should succeed");

    let head = client
        .head_object()
        .bucket(server.bucket())
        .key("empty")
        .send()
        .await
        .unwrap();
    assert_eq!(head.content_length(), Some(0));
    assert_eq!(head.e_tag(), Some("\"d41d8cd98f00b204e9800998ecf8427e\""));
}

#[tokio::test]
async fn test_head_object_metadata() {
    let server = TestServer::filesystem_with_auth().await;
    let client = server.s3_client().await;

    client
        .put_object()
        .bucket(server.bucket())
        .key("meta.json")
        .content_type("application/json")
        .content_disposition("attachment")
        .metadata("owner", "team-a")
        .body(ByteStream::from(b"{}".to_vec()))
        .send()
        .await
        .unwrap();

    let head = client
        .head_object()
        .bucket(server.bucket())
        .key("meta.json")
        .send()
        .await
        .unwrap();
    assert_eq!(head.content_type(), Some("application/json"));
    assert_eq!(head.content_disposition(), Some("attachment"));
    assert_eq!(head.content_length(), Some(2));
    assert_eq!(
        head.metadata().and_then(|m| m.get("owner")).map(String::as_str),
        Some("team-a")
    );
    assert!(head.last_modified().is_some());
}

#[tokio::test]
async fn test_content_type_default() {
    let server = TestServer::filesystem_with_auth().await;
    let client = server.s3_client().await;

    client
        .put_object()
        .bucket(server.bucket())
        .key("untyped")
        .body(ByteStream::from(b"x".to_vec()))
        .send()
        .await
        .unwrap();

    let head = client
        .head_object()
        .bucket(server.bucket())
        .key("untyped")
        .send()
        .await
        .unwrap();
    // The SDK itself may not send a Content-Type; the gateway fills one in.
    assert!(head.content_type().is_some());
}

#[tokio::test]
async fn test_get_nonexistent_is_no_such_key() {
    let server = TestServer::filesystem_with_auth().await;
    let client = server.s3_client().await;

    let err = client
        .get_object()
        .bucket(server.bucket())
        .key("missing")
        .send()
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("NoSuchKey"));
}

#[tokio::test]
async fn test_get_range() {
    let server = TestServer::filesystem_with_auth().await;
    let client = server.s3_client().await;

    client
        .put_object()
        .bucket(server.bucket())
        .key("digits")
        .body(ByteStream::from(b"0123456789".to_vec()))
        .send()
        .await
        .unwrap();

    let resp = client
        .get_object()
        .bucket(server.bucket())
        .key("digits")
        .range("bytes=2-5")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.content_range(), Some("bytes 2-5/10"));
    let body = resp.body.collect().await.unwrap().into_bytes();
    assert_eq!(body.as_ref(), b"2345");

    let suffix = client
        .get_object()
        .bucket(server.bucket())
        .key("digits")
        .range("bytes=-3")
        .send()
        .await
        .unwrap();
    let body = suffix.body.collect().await.unwrap().into_bytes();
    assert_eq!(body.as_ref(), b"789");
}

#[tokio::test]
async fn test_get_range_memory_backend_falls_back_to_slicing() {
    let server = TestServer::memory().await;
    let client = server.s3_client().await;

    client
        .put_object()
        .bucket(server.bucket())
        .key("letters")
        .body(ByteStream::from(b"abcdefghij".to_vec()))
        .send()
        .await
        .unwrap();

    let resp = client
        .get_object()
        .bucket(server.bucket())
        .key("letters")
        .range("bytes=7-")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.content_range(), Some("bytes 7-9/10"));
    let body = resp.body.collect().await.unwrap().into_bytes();
    assert_eq!(body.as_ref(), b"hij");
}

#[tokio::test]
async fn test_unsatisfiable_range() {
    let server = TestServer::filesystem_with_auth().await;
    let client = server.s3_client().await;

    client
        .put_object()
        .bucket(server.bucket())
        .key("short")
        .body(ByteStream::from(b"abc".to_vec()))
        .send()
        .await
        .unwrap();

    let err = client
        .get_object()
        .bucket(server.bucket())
        .key("short")
        .range("bytes=10-20")
        .send()
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("InvalidRange"));
}

#[tokio::test]
async fn test_if_none_match_on_get() {
    let server = TestServer::filesystem_with_auth().await;
    let client = server.s3_client().await;

    let put = client
        .put_object()
        .bucket(server.bucket())
        .key("cached")
        .body(ByteStream::from(b"payload".to_vec()))
        .send()
        .await
        .unwrap();
    let etag = put.e_tag().unwrap().to_string();

    let err = client
        .get_object()
        .bucket(server.bucket())
        .key("cached")
        .if_none_match(&etag)
        .send()
        .await
        .unwrap_err();
    assert_eq!(
        err.raw_response().map(|r| r.status().as_u16()),
        Some(304)
    );

    let err = client
        .get_object()
        .bucket(server.bucket())
        .key("cached")
        .if_match("\"00000000000000000000000000000000\"")
        .send()
        .await
        .unwrap_err();
    assert_eq!(
        err.raw_response().map(|r| r.status().as_u16()),
        Some(412)
    );
}

#[tokio::test]
async fn test_conditional_put_if_none_match_star() {
    for server in [TestServer::filesystem_with_auth().await, TestServer::memory().await] {
        let client = server.s3_client().await;

        client
            .put_object()
            .bucket(server.bucket())
            .key("once")
            .if_none_match("*")
            .body(ByteStream::from(b"first".to_vec()))
            .send()
            .await
            .expect("first create should succeed");

        let err = client
            .put_object()
            .bucket(server.bucket())
            .key("once")
            .if_none_match("*")
            .body(ByteStream::from(b"second".to_vec()))
            .send()
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some("PreconditionFailed"));
    }
}

#[tokio::test]
async fn test_delete_nonexistent_idempotent() {
    let server = TestServer::filesystem_with_auth().await;
    let client = server.s3_client().await;

    client
        .delete_object()
        .bucket(server.bucket())
        .key("never-existed")
        .send()
        .await
        .expect("DELETE of a missing key succeeds");
}

#[tokio::test]
async fn test_delete_then_get_returns_404() {
    let server = TestServer::filesystem_with_auth().await;
    let client = server.s3_client().await;

    client
        .put_object()
        .bucket(server.bucket())
        .key("gone")
        .body(ByteStream::from(b"x".to_vec()))
        .send()
        .await
        .unwrap();
    client
        .delete_object()
        .bucket(server.bucket())
        .key("gone")
        .send()
        .await
        .unwrap();

    let err = client
        .get_object()
        .bucket(server.bucket())
        .key("gone")
        .send()
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("NoSuchKey"));
}

#[tokio::test]
async fn test_unicode_and_space_keys() {
    let server = TestServer::filesystem_with_auth().await;
    let client = server.s3_client().await;

    for key in ["日本語/ファイル.txt", "with space/and+plus.txt", "a=b&c.txt"] {
        client
            .put_object()
            .bucket(server.bucket())
            .key(key)
            .body(ByteStream::from(key.as_bytes().to_vec()))
            .send()
            .await
            .unwrap_or_else(|e| panic!("PUT {} failed: {:?}", key, e));

        let body = client
            .get_object()
            .bucket(server.bucket())
            .key(key)
            .send()
            .await
            .unwrap()
            .body
            .collect()
            .await
            .unwrap()
            .into_bytes();
        assert_eq!(body.as_ref(), key.as_bytes());
    }
}

// ============================================================================
// Copy
// ============================================================================

#[tokio::test]
async fn test_copy_object_preserves_metadata() {
    for server in [TestServer::filesystem_with_auth().await, TestServer::memory().await] {
        let client = server.s3_client().await;

        client
            .put_object()
            .bucket(server.bucket())
            .key("src.txt")
            .content_type("text/plain")
            .metadata("color", "blue")
            .body(ByteStream::from(b"copy me".to_vec()))
            .send()
            .await
            .unwrap();

        let copy = client
            .copy_object()
            .bucket(server.bucket())
            .key("dst.txt")
            .copy_source(format!("{}/src.txt", server.bucket()))
            .send()
            .await
            .expect("COPY should succeed");
        assert!(copy.copy_object_result().and_then(|r| r.e_tag()).is_some());

        let head = client
            .head_object()
            .bucket(server.bucket())
            .key("dst.txt")
            .send()
            .await
            .unwrap();
        assert_eq!(head.content_type(), Some("text/plain"));
        assert_eq!(
            head.metadata().and_then(|m| m.get("color")).map(String::as_str),
            Some("blue")
        );
    }
}

#[tokio::test]
async fn test_copy_replace_metadata() {
    let server = TestServer::filesystem_with_auth().await;
    let client = server.s3_client().await;

    client
        .put_object()
        .bucket(server.bucket())
        .key("src")
        .metadata("old", "1")
        .body(ByteStream::from(b"data".to_vec()))
        .send()
        .await
        .unwrap();

    client
        .copy_object()
        .bucket(server.bucket())
        .key("src")
        .copy_source(format!("{}/src", server.bucket()))
        .metadata_directive(MetadataDirective::Replace)
        .metadata("new", "2")
        .send()
        .await
        .expect("REPLACE copy onto itself is allowed");

    let head = client
        .head_object()
        .bucket(server.bucket())
        .key("src")
        .send()
        .await
        .unwrap();
    let meta = head.metadata().cloned().unwrap_or_default();
    assert_eq!(meta.get("new").map(String::as_str), Some("2"));
    assert!(!meta.contains_key("old"));
}

#[tokio::test]
async fn test_copy_onto_itself_without_replace_is_rejected() {
    let server = TestServer::filesystem_with_auth().await;
    let client = server.s3_client().await;

    client
        .put_object()
        .bucket(server.bucket())
        .key("self")
        .body(ByteStream::from(b"data".to_vec()))
        .send()
        .await
        .unwrap();

    let err = client
        .copy_object()
        .bucket(server.bucket())
        .key("self")
        .copy_source(format!("{}/self", server.bucket()))
        .send()
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("InvalidRequest"));
}

#[tokio::test]
async fn test_copy_nonexistent_source() {
    let server = TestServer::filesystem_with_auth().await;
    let client = server.s3_client().await;

    let err = client
        .copy_object()
        .bucket(server.bucket())
        .key("dst")
        .copy_source(format!("{}/nope", server.bucket()))
        .send()
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("NoSuchKey"));
}

// ============================================================================
// Listing
// ============================================================================

async fn put_keys(server: &TestServer, keys: &[&str]) {
    let client = server.s3_client().await;
    for key in keys {
        client
            .put_object()
            .bucket(server.bucket())
            .key(*key)
            .body(ByteStream::from(b"x".to_vec()))
            .send()
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_list_objects_with_prefix_and_delimiter() {
    let server = TestServer::filesystem_with_auth().await;
    put_keys(
        &server,
        &["a.txt", "dir/one", "dir/two", "dir/sub/three", "other/x"],
    )
    .await;
    let client = server.s3_client().await;

    let top = client
        .list_objects_v2()
        .bucket(server.bucket())
        .delimiter("/")
        .send()
        .await
        .unwrap();
    let keys: Vec<_> = top.contents().iter().filter_map(|o| o.key()).collect();
    let prefixes: Vec<_> = top.common_prefixes().iter().filter_map(|p| p.prefix()).collect();
    assert_eq!(keys, vec!["a.txt"]);
    assert_eq!(prefixes, vec!["dir/", "other/"]);
    assert_eq!(top.key_count(), Some(3));

    let dir = client
        .list_objects_v2()
        .bucket(server.bucket())
        .prefix("dir/")
        .delimiter("/")
        .send()
        .await
        .unwrap();
    let keys: Vec<_> = dir.contents().iter().filter_map(|o| o.key()).collect();
    let prefixes: Vec<_> = dir.common_prefixes().iter().filter_map(|p| p.prefix()).collect();
    assert_eq!(keys, vec!["dir/one", "dir/two"]);
    assert_eq!(prefixes, vec!["dir/sub/"]);
}

#[tokio::test]
async fn test_list_objects_v2_pagination() {
    let server = TestServer::memory().await;
    let keys: Vec<String> = (0..7).map(|i| format!("k{:02}", i)).collect();
    let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
    put_keys(&server, &refs).await;
    let client = server.s3_client().await;

    let mut seen = Vec::new();
    let mut token: Option<String> = None;
    let mut pages = 0;
    loop {
        let mut req = client.list_objects_v2().bucket(server.bucket()).max_keys(3);
        if let Some(t) = &token {
            req = req.continuation_token(t);
        }
        let page = req.send().await.unwrap();
        pages += 1;
        seen.extend(page.contents().iter().filter_map(|o| o.key().map(str::to_string)));
        if page.is_truncated() == Some(true) {
            token = page.next_continuation_token().map(str::to_string);
            assert!(token.is_some());
        } else {
            break;
        }
    }
    assert_eq!(pages, 3);
    assert_eq!(seen, keys);
}

#[tokio::test]
async fn test_list_objects_v1_marker() {
    let server = TestServer::filesystem_with_auth().await;
    put_keys(&server, &["a", "b", "c", "d"]).await;
    let client = server.s3_client().await;

    let page = client
        .list_objects()
        .bucket(server.bucket())
        .marker("b")
        .send()
        .await
        .unwrap();
    let keys: Vec<_> = page.contents().iter().filter_map(|o| o.key()).collect();
    assert_eq!(keys, vec!["c", "d"]);
    assert_eq!(page.is_truncated(), Some(false));
}

#[tokio::test]
async fn test_list_objects_empty_bucket() {
    let server = TestServer::filesystem_with_auth().await;
    let client = server.s3_client().await;

    let page = client
        .list_objects_v2()
        .bucket(server.bucket())
        .send()
        .await
        .unwrap();
    assert!(page.contents().is_empty());
    assert_eq!(page.key_count(), Some(0));
}

#[tokio::test]
async fn test_list_objects_missing_bucket() {
    let server = TestServer::filesystem_with_auth().await;
    let client = server.s3_client().await;

    let err = client
        .list_objects_v2()
        .bucket("no-such-bucket")
        .send()
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("NoSuchBucket"));
}

// ============================================================================
// Batch delete
// ============================================================================

fn delete_request(keys: &[&str], quiet: bool) -> Delete {
    let objects = keys
        .iter()
        .map(|k| ObjectIdentifier::builder().key(*k).build().unwrap())
        .collect::<Vec<_>>();
    Delete::builder()
        .set_objects(Some(objects))
        .quiet(quiet)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_delete_objects_batch() {
    let server = TestServer::filesystem_with_auth().await;
    put_keys(&server, &["x1", "x2", "keep"]).await;
    let client = server.s3_client().await;

    let result = client
        .delete_objects()
        .bucket(server.bucket())
        .delete(delete_request(&["x1", "x2", "never"], false))
        .send()
        .await
        .unwrap();
    assert_eq!(result.deleted().len(), 3, "missing keys count as deleted");
    assert!(result.errors().is_empty());

    let listed = client
        .list_objects_v2()
        .bucket(server.bucket())
        .send()
        .await
        .unwrap();
    let keys: Vec<_> = listed.contents().iter().filter_map(|o| o.key()).collect();
    assert_eq!(keys, vec!["keep"]);
}

#[tokio::test]
async fn test_delete_objects_quiet_mode() {
    let server = TestServer::filesystem_with_auth().await;
    put_keys(&server, &["q1", "q2"]).await;
    let client = server.s3_client().await;

    let result = client
        .delete_objects()
        .bucket(server.bucket())
        .delete(delete_request(&["q1", "q2"], true))
        .send()
        .await
        .unwrap();
    assert!(result.deleted().is_empty());
    assert!(result.errors().is_empty());
}

// ============================================================================
// Buckets
// ============================================================================

#[tokio::test]
async fn test_list_buckets_sorted() {
    let server = TestServer::filesystem_with_auth().await;
    let client = server.s3_client().await;

    for name in ["zeta-bucket", "alpha-bucket"] {
        client.create_bucket().bucket(name).send().await.unwrap();
    }

    let result = client.list_buckets().send().await.unwrap();
    let names: Vec<_> = result.buckets().iter().filter_map(|b| b.name()).collect();
    assert_eq!(names, vec!["alpha-bucket", "bucket", "zeta-bucket"]);
}

#[tokio::test]
async fn test_create_existing_bucket() {
    let server = TestServer::filesystem_with_auth().await;
    let client = server.s3_client().await;

    let err = client
        .create_bucket()
        .bucket(server.bucket())
        .send()
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("BucketAlreadyOwnedByYou"));
}

#[tokio::test]
async fn test_head_bucket() {
    let server = TestServer::filesystem_with_auth().await;
    let client = server.s3_client().await;

    client
        .head_bucket()
        .bucket(server.bucket())
        .send()
        .await
        .expect("existing bucket");
    assert!(client
        .head_bucket()
        .bucket("missing-bucket")
        .send()
        .await
        .is_err());
}

#[tokio::test]
async fn test_delete_nonempty_bucket() {
    let server = TestServer::filesystem_with_auth().await;
    put_keys(&server, &["blocker"]).await;
    let client = server.s3_client().await;

    let err = client
        .delete_bucket()
        .bucket(server.bucket())
        .send()
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("BucketNotEmpty"));

    client
        .delete_object()
        .bucket(server.bucket())
        .key("blocker")
        .send()
        .await
        .unwrap();
    client
        .delete_bucket()
        .bucket(server.bucket())
        .send()
        .await
        .expect("empty bucket deletes");
}

#[tokio::test]
async fn test_invalid_bucket_name() {
    let server = TestServer::filesystem_with_auth().await;
    let client = server.s3_client().await;

    let err = client
        .create_bucket()
        .bucket("Bad_Name")
        .send()
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("InvalidBucketName"));
}

// ============================================================================
// Multipart
// ============================================================================

#[tokio::test]
async fn test_multipart_upload_roundtrip() {
    for server in [
        TestServer::filesystem_with_min_part_size(1024).await,
        TestServer::memory().await,
    ] {
        let client = server.s3_client().await;
        let min_part = 5 * 1024 * 1024;
        let part1 = generate_binary(min_part, 1);
        let part2 = generate_binary(1000, 2);

        let created = client
            .create_multipart_upload()
            .bucket(server.bucket())
            .key("big.bin")
            .content_type("application/x-test")
            .send()
            .await
            .unwrap();
        let upload_id = created.upload_id().unwrap().to_string();

        let mut completed = Vec::new();
        for (n, data) in [(1, &part1), (2, &part2)] {
            let part = client
                .upload_part()
                .bucket(server.bucket())
                .key("big.bin")
                .upload_id(&upload_id)
                .part_number(n)
                .body(ByteStream::from(data.clone()))
                .send()
                .await
                .unwrap();
            completed.push(
                CompletedPart::builder()
                    .part_number(n)
                    .e_tag(part.e_tag().unwrap())
                    .build(),
            );
        }

        let parts = client
            .list_parts()
            .bucket(server.bucket())
            .key("big.bin")
            .upload_id(&upload_id)
            .send()
            .await
            .unwrap();
        let numbers: Vec<_> = parts.parts().iter().filter_map(|p| p.part_number()).collect();
        assert_eq!(numbers, vec![1, 2]);

        let done = client
            .complete_multipart_upload()
            .bucket(server.bucket())
            .key("big.bin")
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .expect("complete should succeed");
        assert!(done.e_tag().is_some());

        let body = client
            .get_object()
            .bucket(server.bucket())
            .key("big.bin")
            .send()
            .await
            .unwrap()
            .body
            .collect()
            .await
            .unwrap()
            .into_bytes();
        assert_eq!(body.len(), part1.len() + part2.len());
        assert_eq!(&body[..part1.len()], part1.as_slice());
        assert_eq!(&body[part1.len()..], part2.as_slice());

        let head = client
            .head_object()
            .bucket(server.bucket())
            .key("big.bin")
            .send()
            .await
            .unwrap();
        assert_eq!(head.content_type(), Some("application/x-test"));
    }
}

#[tokio::test]
async fn test_multipart_part_too_small() {
    let server = TestServer::filesystem_with_min_part_size(1024).await;
    let client = server.s3_client().await;

    let upload_id = client
        .create_multipart_upload()
        .bucket(server.bucket())
        .key("small")
        .send()
        .await
        .unwrap()
        .upload_id()
        .unwrap()
        .to_string();

    let mut completed = Vec::new();
    for n in 1..=2 {
        let part = client
            .upload_part()
            .bucket(server.bucket())
            .key("small")
            .upload_id(&upload_id)
            .part_number(n)
            .body(ByteStream::from(vec![b'x'; 10]))
            .send()
            .await
            .unwrap();
        completed.push(
            CompletedPart::builder()
                .part_number(n)
                .e_tag(part.e_tag().unwrap())
                .build(),
        );
    }

    let err = client
        .complete_multipart_upload()
        .bucket(server.bucket())
        .key("small")
        .upload_id(&upload_id)
        .multipart_upload(
            CompletedMultipartUpload::builder()
                .set_parts(Some(completed))
                .build(),
        )
        .send()
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("EntityTooSmall"));
}

#[tokio::test]
async fn test_multipart_abort_and_list_uploads() {
    let server = TestServer::filesystem_with_auth().await;
    let client = server.s3_client().await;

    let upload_id = client
        .create_multipart_upload()
        .bucket(server.bucket())
        .key("pending")
        .send()
        .await
        .unwrap()
        .upload_id()
        .unwrap()
        .to_string();

    let uploads = client
        .list_multipart_uploads()
        .bucket(server.bucket())
        .send()
        .await
        .unwrap();
    let ids: Vec<_> = uploads.uploads().iter().filter_map(|u| u.upload_id()).collect();
    assert_eq!(ids, vec![upload_id.as_str()]);

    client
        .abort_multipart_upload()
        .bucket(server.bucket())
        .key("pending")
        .upload_id(&upload_id)
        .send()
        .await
        .unwrap();

    let err = client
        .list_parts()
        .bucket(server.bucket())
        .key("pending")
        .upload_id(&upload_id)
        .send()
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("NoSuchUpload"));
}

#[tokio::test]
async fn test_list_multipart_uploads_pages() {
    let server = TestServer::filesystem().await;
    let client = server.s3_client().await;

    for key in ["a", "b", "c"] {
        client
            .create_multipart_upload()
            .bucket(server.bucket())
            .key(key)
            .send()
            .await
            .unwrap();
    }

    let mut keys = Vec::new();
    let (mut key_marker, mut id_marker) = (None::<String>, None::<String>);
    loop {
        let page = client
            .list_multipart_uploads()
            .bucket(server.bucket())
            .max_uploads(2)
            .set_key_marker(key_marker.clone())
            .set_upload_id_marker(id_marker.clone())
            .send()
            .await
            .unwrap();
        keys.extend(page.uploads().iter().filter_map(|u| u.key().map(str::to_string)));
        if !page.is_truncated().unwrap_or(false) {
            break;
        }
        key_marker = page.next_key_marker().map(str::to_string);
        id_marker = page.next_upload_id_marker().map(str::to_string);
        assert!(key_marker.is_some());
    }
    assert_eq!(keys, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_upload_part_copy() {
    let server = TestServer::filesystem_with_min_part_size(4).await;
    let client = server.s3_client().await;

    client
        .put_object()
        .bucket(server.bucket())
        .key("source")
        .body(ByteStream::from(b"0123456789".to_vec()))
        .send()
        .await
        .unwrap();

    let upload_id = client
        .create_multipart_upload()
        .bucket(server.bucket())
        .key("assembled")
        .send()
        .await
        .unwrap()
        .upload_id()
        .unwrap()
        .to_string();

    let copied = client
        .upload_part_copy()
        .bucket(server.bucket())
        .key("assembled")
        .upload_id(&upload_id)
        .part_number(1)
        .copy_source(format!("{}/source", server.bucket()))
        .copy_source_range("bytes=0-4")
        .send()
        .await
        .unwrap();
    let etag1 = copied
        .copy_part_result()
        .and_then(|r| r.e_tag())
        .unwrap()
        .to_string();

    let part2 = client
        .upload_part()
        .bucket(server.bucket())
        .key("assembled")
        .upload_id(&upload_id)
        .part_number(2)
        .body(ByteStream::from(b"-tail".to_vec()))
        .send()
        .await
        .unwrap();

    client
        .complete_multipart_upload()
        .bucket(server.bucket())
        .key("assembled")
        .upload_id(&upload_id)
        .multipart_upload(
            CompletedMultipartUpload::builder()
                .parts(CompletedPart::builder().part_number(1).e_tag(etag1).build())
                .parts(
                    CompletedPart::builder()
                        .part_number(2)
                        .e_tag(part2.e_tag().unwrap())
                        .build(),
                )
                .build(),
        )
        .send()
        .await
        .unwrap();

    let body = client
        .get_object()
        .bucket(server.bucket())
        .key("assembled")
        .send()
        .await
        .unwrap()
        .body
        .collect()
        .await
        .unwrap()
        .into_bytes();
    assert_eq!(body.as_ref(), b"01234-tail");
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_wrong_secret_is_rejected() {
    let server = TestServer::filesystem_with_auth().await;
    let client = server.s3_client_with(common::ACCESS_KEY, "not-the-secret").await;

    let err = client.list_buckets().send().await.unwrap_err();
    assert_eq!(err.code(), Some("SignatureDoesNotMatch"));
}

#[tokio::test]
async fn test_unknown_access_key_is_rejected() {
    let server = TestServer::filesystem_with_auth().await;
    let client = server.s3_client_with("stranger", "whatever").await;

    let err = client.list_buckets().send().await.unwrap_err();
    assert_eq!(err.code(), Some("InvalidAccessKeyId"));
}

#[tokio::test]
async fn test_anonymous_request_denied_when_auth_enabled() {
    let server = TestServer::filesystem_with_auth().await;

    let resp = reqwest::get(format!("{}/", server.endpoint())).await.unwrap();
    assert_eq!(resp.status().as_u16(), 403);
    let body = resp.text().await.unwrap();
    assert!(body.contains("<Code>AccessDenied</Code>"));
}

#[tokio::test]
async fn test_presigned_get() {
    let server = TestServer::filesystem_with_auth().await;
    let client = server.s3_client().await;

    client
        .put_object()
        .bucket(server.bucket())
        .key("shared.txt")
        .body(ByteStream::from(b"presigned content".to_vec()))
        .send()
        .await
        .unwrap();

    let presigned = client
        .get_object()
        .bucket(server.bucket())
        .key("shared.txt")
        .presigned(PresigningConfig::expires_in(Duration::from_secs(300)).unwrap())
        .await
        .unwrap();

    let resp = reqwest::get(presigned.uri()).await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.bytes().await.unwrap().as_ref(), b"presigned content");
}

#[tokio::test]
async fn test_presigned_put() {
    let server = TestServer::filesystem_with_auth().await;
    let client = server.s3_client().await;

    let presigned = client
        .put_object()
        .bucket(server.bucket())
        .key("uploaded.txt")
        .presigned(PresigningConfig::expires_in(Duration::from_secs(300)).unwrap())
        .await
        .unwrap();

    let resp = reqwest::Client::new()
        .put(presigned.uri())
        .body(b"via presigned url".to_vec())
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success(), "status {}", resp.status());

    let body = client
        .get_object()
        .bucket(server.bucket())
        .key("uploaded.txt")
        .send()
        .await
        .unwrap()
        .body
        .collect()
        .await
        .unwrap()
        .into_bytes();
    assert_eq!(body.as_ref(), b"via presigned url");
}

// ============================================================================
// Limits
// ============================================================================

#[tokio::test]
async fn test_put_over_max_object_size() {
    let server = TestServer::filesystem_with_max_object_size(1024).await;
    let client = server.s3_client().await;

    let err = client
        .put_object()
        .bucket(server.bucket())
        .key("huge")
        .body(ByteStream::from(vec![0u8; 4096]))
        .send()
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("EntityTooLarge"));
}
