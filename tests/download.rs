mod support;

use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use support::StubHost;
use ultradrive_client::{
    downloader::{FileStatus, UltraDownloader, UltraDownloaderOptions},
    util::DriveCallback,
    DownloadItem, DriveClient, DriveError,
};

const WAIT: Duration = Duration::from_secs(30);

fn crc_of(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

fn plan_json(
    file_id: &str,
    name: &str,
    method: u8,
    crc: u32,
    key: Option<&str>,
    iv: Option<&str>,
    fragment_sizes: &[(&str, u64)],
) -> String {
    let mut offset = 0u64;
    let fragments: Vec<serde_json::Value> = fragment_sizes
        .iter()
        .enumerate()
        .map(|(index, (attachment_id, size))| {
            let value = serde_json::json!({
                "message_id": format!("m{index}"),
                "attachment_id": attachment_id,
                "offset": offset,
                "sequence": index as u32 + 1,
                "size": size,
            });
            offset += size;
            value
        })
        .collect();

    serde_json::json!([{
        "id": file_id,
        "name": name,
        "encryption_method": method,
        "size": offset,
        "crc": crc,
        "key": key,
        "iv": iv,
        "fragments": fragments,
    }])
    .to_string()
}

fn downloader_for(stub: &StubHost, work_dir: &Path) -> UltraDownloader {
    let client = Arc::new(DriveClient::new(stub.base_url()).expect("client"));
    UltraDownloader::new(
        client,
        UltraDownloaderOptions::builder().temp_dir(work_dir).build(),
    )
    .expect("downloader")
}

#[tokio::test]
async fn downloads_three_fragment_plaintext_file() {
    let stub = StubHost::start().await;
    let expected = b"aaaaaaaaaabbbbbbbbbbcccccccccc";

    stub.put_fragment("a1", vec![b'a'; 10]);
    stub.put_fragment("a2", vec![b'b'; 10]);
    stub.put_fragment("a3", vec![b'c'; 10]);
    stub.set_plan(plan_json(
        "f1",
        "hello.bin",
        0,
        crc_of(expected),
        None,
        None,
        &[("a1", 10), ("a2", 10), ("a3", 10)],
    ));

    let temp = tempfile::tempdir().expect("tempdir");
    let out_dir = temp.path().join("out");
    std::fs::create_dir_all(&out_dir).expect("out dir");

    let completions = Arc::new(AtomicUsize::new(0));
    let seen = completions.clone();
    let on_complete = DriveCallback::from_fn(move |(_, _snapshot)| {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    let downloader = downloader_for(&stub, &temp.path().join("work"));
    let accepted = downloader
        .download(&[DownloadItem::new("f1")], &out_dir, Some(on_complete))
        .await
        .expect("submitted");
    assert_eq!(accepted, vec!["f1".to_string()]);

    let snapshot = tokio::time::timeout(WAIT, downloader.wait_for_file("f1"))
        .await
        .expect("finished in time")
        .expect("known file");
    assert_eq!(snapshot.status, FileStatus::Completed);
    assert_eq!(snapshot.fragments_downloaded, 3);
    assert_eq!(snapshot.bytes_downloaded, 30);

    let output = std::fs::read(out_dir.join("hello.bin")).expect("output file");
    assert_eq!(output, expected);

    // The per-file working directory is gone after a successful move.
    assert!(!temp.path().join("work").join("f1").exists());
    assert_eq!(completions.load(Ordering::SeqCst), 1);
    assert!(downloader.get_download_rate() > 0.0);

    downloader.shutdown().await;
}

#[tokio::test]
async fn downloads_and_decrypts_aes_ctr_file() {
    let stub = StubHost::start().await;

    let key = vec![0u8; 32];
    let iv = vec![0u8; 16];
    let plaintext: Vec<u8> = (0u8..32).collect();

    let mut ciphertext = plaintext.clone();
    ultradrive_client::SeekableCipher::new(
        ultradrive_client::EncryptionMethod::AesCtr,
        Some(&key),
        Some(&iv),
        0,
    )
    .expect("cipher")
    .transform(&mut ciphertext);

    stub.put_fragment("c1", ciphertext[..16].to_vec());
    stub.put_fragment("c2", ciphertext[16..].to_vec());

    use base64::Engine as _;
    let encode = |data: &[u8]| base64::engine::general_purpose::STANDARD.encode(data);
    stub.set_plan(plan_json(
        "enc-1",
        "secret.bin",
        1,
        crc_of(&plaintext),
        Some(&encode(&key)),
        Some(&encode(&iv)),
        &[("c1", 16), ("c2", 16)],
    ));

    let temp = tempfile::tempdir().expect("tempdir");
    let out_dir = temp.path().join("out");
    std::fs::create_dir_all(&out_dir).expect("out dir");

    let downloader = downloader_for(&stub, &temp.path().join("work"));
    downloader
        .download(&[DownloadItem::new("enc-1")], &out_dir, None)
        .await
        .expect("submitted");

    let snapshot = tokio::time::timeout(WAIT, downloader.wait_for_file("enc-1"))
        .await
        .expect("finished in time")
        .expect("known file");
    assert_eq!(snapshot.status, FileStatus::Completed);

    let output = std::fs::read(out_dir.join("secret.bin")).expect("output file");
    assert_eq!(output, plaintext);

    downloader.shutdown().await;
}

#[tokio::test]
async fn retries_after_rate_limit_and_succeeds() {
    let stub = StubHost::start().await;
    let expected = b"0123456789";

    stub.put_fragment("r1", expected.to_vec());
    stub.throttle_once("r1", 1);
    stub.set_plan(plan_json(
        "rl-1",
        "limited.bin",
        0,
        crc_of(expected),
        None,
        None,
        &[("r1", 10)],
    ));

    let temp = tempfile::tempdir().expect("tempdir");
    let out_dir = temp.path().join("out");
    std::fs::create_dir_all(&out_dir).expect("out dir");

    let downloader = downloader_for(&stub, &temp.path().join("work"));
    downloader
        .download(&[DownloadItem::new("rl-1")], &out_dir, None)
        .await
        .expect("submitted");

    let snapshot = tokio::time::timeout(WAIT, downloader.wait_for_file("rl-1"))
        .await
        .expect("finished in time")
        .expect("known file");
    assert_eq!(snapshot.status, FileStatus::Completed);

    // One 429, then the retry landed.
    assert_eq!(stub.throttles_served(), 1);
    assert_eq!(stub.cdn_hits("r1"), 2);

    let output = std::fs::read(out_dir.join("limited.bin")).expect("output file");
    assert_eq!(output, expected);

    downloader.shutdown().await;
}

#[tokio::test]
async fn persistent_throttling_fails_the_file() {
    let stub = StubHost::start().await;

    stub.put_fragment("t1", vec![1u8; 10]);
    stub.throttle_always("t1", 0);
    stub.set_plan(plan_json(
        "hot-1",
        "hot.bin",
        0,
        0,
        None,
        None,
        &[("t1", 10)],
    ));

    let temp = tempfile::tempdir().expect("tempdir");
    let out_dir = temp.path().join("out");
    std::fs::create_dir_all(&out_dir).expect("out dir");

    let client = Arc::new(DriveClient::new(stub.base_url()).expect("client"));
    let downloader = UltraDownloader::new(
        client,
        UltraDownloaderOptions::builder()
            .temp_dir(temp.path().join("work"))
            .max_retries(1)
            .build(),
    )
    .expect("downloader");

    downloader
        .download(&[DownloadItem::new("hot-1")], &out_dir, None)
        .await
        .expect("submitted");

    let snapshot = tokio::time::timeout(WAIT, downloader.wait_for_file("hot-1"))
        .await
        .expect("finished in time")
        .expect("known file");
    assert_eq!(snapshot.status, FileStatus::Failed);
    assert!(matches!(
        snapshot.error.as_deref(),
        Some(DriveError::RateLimit { .. })
    ));
    assert!(downloader.get_last_error().is_some());
    assert_eq!(downloader.get_failed_states().await.len(), 1);

    downloader.shutdown().await;
}

#[tokio::test]
async fn resumes_with_parts_already_on_disk() {
    let stub = StubHost::start().await;
    let expected = b"aaaaaaaaaabbbbbbbbbbcccccccccc";

    stub.put_fragment("s1", vec![b'a'; 10]);
    stub.put_fragment("s2", vec![b'b'; 10]);
    stub.put_fragment("s3", vec![b'c'; 10]);
    stub.set_plan(plan_json(
        "res-1",
        "resume.bin",
        0,
        crc_of(expected),
        None,
        None,
        &[("s1", 10), ("s2", 10), ("s3", 10)],
    ));

    let temp = tempfile::tempdir().expect("tempdir");
    let out_dir = temp.path().join("out");
    std::fs::create_dir_all(&out_dir).expect("out dir");

    // Fragment 2 survived a previous run with the right size.
    let work = temp.path().join("work");
    std::fs::create_dir_all(work.join("res-1")).expect("work dir");
    std::fs::write(work.join("res-1").join("2.part"), vec![b'b'; 10]).expect("seeded part");

    let downloader = downloader_for(&stub, &work);
    downloader
        .download(&[DownloadItem::new("res-1")], &out_dir, None)
        .await
        .expect("submitted");

    let snapshot = tokio::time::timeout(WAIT, downloader.wait_for_file("res-1"))
        .await
        .expect("finished in time")
        .expect("known file");
    assert_eq!(snapshot.status, FileStatus::Completed);

    // The surviving part was never re-fetched.
    assert_eq!(stub.cdn_hits("s2"), 0);
    assert_eq!(stub.cdn_hits("s1"), 1);
    assert_eq!(stub.cdn_hits("s3"), 1);

    let output = std::fs::read(out_dir.join("resume.bin")).expect("output file");
    assert_eq!(output, expected);

    downloader.shutdown().await;
}

#[tokio::test]
async fn crc_mismatch_fails_the_file() {
    let stub = StubHost::start().await;

    stub.put_fragment("x1", vec![9u8; 10]);
    stub.set_plan(plan_json(
        "bad-1",
        "bad.bin",
        0,
        0xDEAD_BEEF,
        None,
        None,
        &[("x1", 10)],
    ));

    let temp = tempfile::tempdir().expect("tempdir");
    let out_dir = temp.path().join("out");
    std::fs::create_dir_all(&out_dir).expect("out dir");

    let downloader = downloader_for(&stub, &temp.path().join("work"));
    downloader
        .download(&[DownloadItem::new("bad-1")], &out_dir, None)
        .await
        .expect("submitted");

    let snapshot = tokio::time::timeout(WAIT, downloader.wait_for_file("bad-1"))
        .await
        .expect("finished in time")
        .expect("known file");
    assert_eq!(snapshot.status, FileStatus::Failed);
    assert!(matches!(
        snapshot.error.as_deref(),
        Some(DriveError::CrcMismatch {
            expected: 0xDEAD_BEEF,
            ..
        })
    ));

    // Nothing was delivered.
    assert!(!out_dir.join("bad.bin").exists());

    downloader.shutdown().await;
}

#[tokio::test]
async fn missing_attachment_fails_the_file() {
    let stub = StubHost::start().await;

    // No fragment payload registered: the CDN answers 404.
    stub.set_plan(plan_json(
        "gone-1",
        "gone.bin",
        0,
        0,
        None,
        None,
        &[("nope", 10)],
    ));

    let temp = tempfile::tempdir().expect("tempdir");
    let out_dir = temp.path().join("out");
    std::fs::create_dir_all(&out_dir).expect("out dir");

    let downloader = downloader_for(&stub, &temp.path().join("work"));
    downloader
        .download(&[DownloadItem::new("gone-1")], &out_dir, None)
        .await
        .expect("submitted");

    let snapshot = tokio::time::timeout(WAIT, downloader.wait_for_file("gone-1"))
        .await
        .expect("finished in time")
        .expect("known file");
    assert_eq!(snapshot.status, FileStatus::Failed);
    assert!(matches!(
        snapshot.error.as_deref(),
        Some(DriveError::AttachmentNotFound(_))
    ));

    downloader.shutdown().await;
}

#[tokio::test]
async fn duplicate_submissions_are_rejected() {
    let stub = StubHost::start().await;
    let expected = b"0123456789";

    stub.put_fragment("d1", expected.to_vec());
    stub.set_plan(plan_json(
        "dup-1",
        "dup.bin",
        0,
        crc_of(expected),
        None,
        None,
        &[("d1", 10)],
    ));

    let temp = tempfile::tempdir().expect("tempdir");
    let out_dir = temp.path().join("out");
    std::fs::create_dir_all(&out_dir).expect("out dir");

    let downloader = downloader_for(&stub, &temp.path().join("work"));
    let first = downloader
        .download(&[DownloadItem::new("dup-1")], &out_dir, None)
        .await
        .expect("submitted");
    assert_eq!(first.len(), 1);

    let second = downloader
        .download(&[DownloadItem::new("dup-1")], &out_dir, None)
        .await
        .expect("submitted");
    assert!(second.is_empty());

    let snapshot = tokio::time::timeout(WAIT, downloader.wait_for_file("dup-1"))
        .await
        .expect("finished in time")
        .expect("known file");
    assert_eq!(snapshot.status, FileStatus::Completed);

    downloader.shutdown().await;
}
