// End-to-end tests of the sync subprotocol against a scripted fake
// daemon. The daemon side reads real frames off a real socket, so these
// tests pin the wire format (tags, little-endian lengths, chunking) and
// the progress contract at the same time.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use adb_host_bridge::{AdbError, ClientConfig, HostConnection, TransferProgress};

async fn bind_daemon() -> (TcpListener, ClientConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = ClientConfig::builder()
        .host(addr.ip().to_string())
        .port(addr.port())
        .build();
    (listener, config)
}

/// Accept a connection and consume the `sync:` handshake.
async fn accept_sync(listener: &TcpListener) -> TcpStream {
    let (mut stream, _) = listener.accept().await.unwrap();
    let mut digits = [0u8; 4];
    stream.read_exact(&mut digits).await.unwrap();
    let len = usize::from_str_radix(std::str::from_utf8(&digits).unwrap(), 16).unwrap();
    let mut request = vec![0u8; len];
    stream.read_exact(&mut request).await.unwrap();
    assert_eq!(request, b"sync:");
    stream.write_all(b"OKAY").await.unwrap();
    stream
}

/// Read one `<tag><u32 LE>` sync frame header.
async fn read_header(stream: &mut TcpStream) -> ([u8; 4], u32) {
    let mut tag = [0u8; 4];
    stream.read_exact(&mut tag).await.unwrap();
    let mut len = [0u8; 4];
    stream.read_exact(&mut len).await.unwrap();
    (tag, u32::from_le_bytes(len))
}

/// Consume the client's parting QUIT frame: bare tag, zero value.
async fn expect_quit(stream: &mut TcpStream) {
    let (tag, value) = read_header(stream).await;
    assert_eq!(&tag, b"QUIT");
    assert_eq!(value, 0);
}

async fn write_frame(stream: &mut TcpStream, tag: &[u8; 4], payload: &[u8]) {
    stream.write_all(tag).await.unwrap();
    stream
        .write_all(&(payload.len() as u32).to_le_bytes())
        .await
        .unwrap();
    stream.write_all(payload).await.unwrap();
}

fn test_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + 7) & 0xFF) as u8).collect()
}

#[tokio::test]
async fn push_chunks_and_reports_progress() {
    let (listener, config) = bind_daemon().await;
    let payload = test_bytes(100_000);
    let expected = payload.clone();

    let daemon = tokio::spawn(async move {
        let mut stream = accept_sync(&listener).await;

        let (tag, len) = read_header(&mut stream).await;
        assert_eq!(&tag, b"SEND");
        let mut spec = vec![0u8; len as usize];
        stream.read_exact(&mut spec).await.unwrap();
        assert_eq!(spec, b"/data/local/tmp/blob,420");

        let mut chunk_sizes = Vec::new();
        let mut received = Vec::new();
        loop {
            let (tag, value) = read_header(&mut stream).await;
            match &tag {
                b"DATA" => {
                    let mut chunk = vec![0u8; value as usize];
                    stream.read_exact(&mut chunk).await.unwrap();
                    chunk_sizes.push(value as usize);
                    received.extend_from_slice(&chunk);
                }
                b"DONE" => {
                    assert_eq!(value, 1_700_000_000, "DONE must carry the mtime");
                    break;
                }
                other => panic!("unexpected tag {:?}", other),
            }
        }
        assert_eq!(chunk_sizes, vec![65536, 34464]);
        assert_eq!(received, expected);

        write_frame(&mut stream, b"OKAY", b"").await;
        expect_quit(&mut stream).await;
    });

    let bridge = HostConnection::connect(config).await.unwrap();
    let mut sync = bridge.open_sync(None).await.unwrap();

    let mut seen: Vec<TransferProgress> = Vec::new();
    let sent = sync
        .push_with_progress(
            &payload[..],
            "/data/local/tmp/blob",
            0o644,
            1_700_000_000,
            Some(payload.len() as u64),
            |p| seen.push(p),
        )
        .await
        .unwrap();
    sync.quit().await.unwrap();

    assert_eq!(sent, 100_000);
    assert_eq!(
        seen,
        vec![
            TransferProgress {
                received: 65536,
                total: 100_000
            },
            TransferProgress {
                received: 100_000,
                total: 100_000
            },
        ]
    );
    daemon.await.unwrap();
}

#[tokio::test]
async fn push_empty_file_sends_done_immediately() {
    let (listener, config) = bind_daemon().await;

    let daemon = tokio::spawn(async move {
        let mut stream = accept_sync(&listener).await;

        let (tag, len) = read_header(&mut stream).await;
        assert_eq!(&tag, b"SEND");
        let mut spec = vec![0u8; len as usize];
        stream.read_exact(&mut spec).await.unwrap();

        // No DATA frame may precede DONE for an empty file.
        let (tag, _) = read_header(&mut stream).await;
        assert_eq!(&tag, b"DONE");

        write_frame(&mut stream, b"OKAY", b"").await;
        expect_quit(&mut stream).await;
    });

    let bridge = HostConnection::connect(config).await.unwrap();
    let mut sync = bridge.open_sync(None).await.unwrap();
    let sent = sync.push(&b""[..], "/data/local/tmp/empty", 0o644, 0).await.unwrap();
    sync.quit().await.unwrap();

    assert_eq!(sent, 0);
    daemon.await.unwrap();
}

#[tokio::test]
async fn push_rejected_by_daemon() {
    let (listener, config) = bind_daemon().await;

    let daemon = tokio::spawn(async move {
        let mut stream = accept_sync(&listener).await;
        let (_, len) = read_header(&mut stream).await;
        let mut spec = vec![0u8; len as usize];
        stream.read_exact(&mut spec).await.unwrap();
        loop {
            let (tag, value) = read_header(&mut stream).await;
            match &tag {
                b"DATA" => {
                    let mut chunk = vec![0u8; value as usize];
                    stream.read_exact(&mut chunk).await.unwrap();
                }
                b"DONE" => break,
                other => panic!("unexpected tag {:?}", other),
            }
        }
        write_frame(&mut stream, b"FAIL", b"secure_mkdirs failed").await;
    });

    let bridge = HostConnection::connect(config).await.unwrap();
    let mut sync = bridge.open_sync(None).await.unwrap();
    let err = sync
        .push(&b"data"[..], "/readonly/x", 0o644, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, AdbError::AdbFail(msg) if msg == "secure_mkdirs failed"));
    assert!(!sync.is_open());
    daemon.await.unwrap();
}

#[tokio::test]
async fn pull_collects_chunks_with_progress() {
    let (listener, config) = bind_daemon().await;
    let payload = test_bytes(70_000);
    let served = payload.clone();

    let daemon = tokio::spawn(async move {
        let mut stream = accept_sync(&listener).await;

        // STAT first, so the client can learn the total.
        let (tag, len) = read_header(&mut stream).await;
        assert_eq!(&tag, b"STAT");
        let mut path = vec![0u8; len as usize];
        stream.read_exact(&mut path).await.unwrap();
        stream.write_all(b"STAT").await.unwrap();
        stream.write_all(&0o100644u32.to_le_bytes()).await.unwrap();
        stream
            .write_all(&(served.len() as u32).to_le_bytes())
            .await
            .unwrap();
        stream.write_all(&1_700_000_000u32.to_le_bytes()).await.unwrap();

        let (tag, len) = read_header(&mut stream).await;
        assert_eq!(&tag, b"RECV");
        let mut path = vec![0u8; len as usize];
        stream.read_exact(&mut path).await.unwrap();
        assert_eq!(path, b"/sdcard/blob");

        write_frame(&mut stream, b"DATA", &served[..65536]).await;
        write_frame(&mut stream, b"DATA", &served[65536..]).await;
        stream.write_all(b"DONE\x00\x00\x00\x00").await.unwrap();
        expect_quit(&mut stream).await;
    });

    let bridge = HostConnection::connect(config).await.unwrap();
    let mut sync = bridge.open_sync(None).await.unwrap();

    let stat = sync.stat("/sdcard/blob").await.unwrap();
    assert_eq!(stat.size as usize, payload.len());
    assert!(stat.mode.is_regular_file());

    let mut collected = Vec::new();
    let mut seen = Vec::new();
    let received = sync
        .pull_with_progress(
            "/sdcard/blob",
            &mut collected,
            Some(stat.size as u64),
            |p| seen.push(p),
        )
        .await
        .unwrap();
    sync.quit().await.unwrap();

    assert_eq!(received, 70_000);
    assert_eq!(collected, payload);
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].received, 65536);
    assert_eq!(seen[1].received, 70_000);
    assert_eq!(seen[1].total, 70_000);
    assert_eq!(seen[1].percent(), 100);
    daemon.await.unwrap();
}

#[tokio::test]
async fn pull_without_stat_reports_zero_total() {
    let (listener, config) = bind_daemon().await;

    let daemon = tokio::spawn(async move {
        let mut stream = accept_sync(&listener).await;
        let (tag, len) = read_header(&mut stream).await;
        assert_eq!(&tag, b"RECV");
        let mut path = vec![0u8; len as usize];
        stream.read_exact(&mut path).await.unwrap();
        write_frame(&mut stream, b"DATA", b"hello").await;
        stream.write_all(b"DONE\x00\x00\x00\x00").await.unwrap();
    });

    let bridge = HostConnection::connect(config).await.unwrap();
    let mut sync = bridge.open_sync(None).await.unwrap();

    let mut collected = Vec::new();
    let mut seen = Vec::new();
    sync.pull_with_progress("/sdcard/x", &mut collected, None, |p| seen.push(p))
        .await
        .unwrap();

    assert_eq!(collected, b"hello");
    assert_eq!(seen, vec![TransferProgress { received: 5, total: 0 }]);
    assert_eq!(seen[0].percent(), 0);
    daemon.await.unwrap();
}

#[tokio::test]
async fn pull_empty_file() {
    let (listener, config) = bind_daemon().await;

    let daemon = tokio::spawn(async move {
        let mut stream = accept_sync(&listener).await;
        let (tag, len) = read_header(&mut stream).await;
        assert_eq!(&tag, b"RECV");
        let mut path = vec![0u8; len as usize];
        stream.read_exact(&mut path).await.unwrap();
        // DONE straight after RECV: the file has no content.
        stream.write_all(b"DONE\x00\x00\x00\x00").await.unwrap();
        expect_quit(&mut stream).await;
    });

    let bridge = HostConnection::connect(config).await.unwrap();
    let mut sync = bridge.open_sync(None).await.unwrap();

    let mut collected = Vec::new();
    let received = sync.pull("/sdcard/empty", &mut collected).await.unwrap();
    sync.quit().await.unwrap();

    assert_eq!(received, 0);
    assert!(collected.is_empty());
    daemon.await.unwrap();
}

#[tokio::test]
async fn pull_failure_closes_the_session() {
    let (listener, config) = bind_daemon().await;

    let daemon = tokio::spawn(async move {
        let mut stream = accept_sync(&listener).await;
        let (tag, len) = read_header(&mut stream).await;
        assert_eq!(&tag, b"RECV");
        let mut path = vec![0u8; len as usize];
        stream.read_exact(&mut path).await.unwrap();
        write_frame(&mut stream, b"FAIL", b"not found").await;
    });

    let bridge = HostConnection::connect(config).await.unwrap();
    let mut sync = bridge.open_sync(None).await.unwrap();

    let mut sink = Vec::new();
    let err = sync.pull("/tmp/gone", &mut sink).await.unwrap_err();
    assert!(matches!(err, AdbError::AdbFail(msg) if msg == "not found"));
    assert!(!sync.is_open());
    daemon.await.unwrap();
}

#[tokio::test]
async fn push_then_pull_round_trips() {
    let (listener, config) = bind_daemon().await;
    let payload = test_bytes(150_000);
    let original = payload.clone();

    // One session, two requests: store on SEND, serve the stored bytes
    // back on RECV, chunked at the wire limit.
    let daemon = tokio::spawn(async move {
        let mut stream = accept_sync(&listener).await;

        let (tag, len) = read_header(&mut stream).await;
        assert_eq!(&tag, b"SEND");
        let mut spec = vec![0u8; len as usize];
        stream.read_exact(&mut spec).await.unwrap();

        let mut stored = Vec::new();
        loop {
            let (tag, value) = read_header(&mut stream).await;
            match &tag {
                b"DATA" => {
                    let start = stored.len();
                    stored.resize(start + value as usize, 0);
                    stream.read_exact(&mut stored[start..]).await.unwrap();
                }
                b"DONE" => break,
                other => panic!("unexpected tag {:?}", other),
            }
        }
        write_frame(&mut stream, b"OKAY", b"").await;

        let (tag, len) = read_header(&mut stream).await;
        assert_eq!(&tag, b"RECV");
        let mut path = vec![0u8; len as usize];
        stream.read_exact(&mut path).await.unwrap();
        for chunk in stored.chunks(64 * 1024) {
            write_frame(&mut stream, b"DATA", chunk).await;
        }
        stream.write_all(b"DONE\x00\x00\x00\x00").await.unwrap();
        expect_quit(&mut stream).await;
    });

    let bridge = HostConnection::connect(config).await.unwrap();
    let mut sync = bridge.open_sync(None).await.unwrap();

    let sent = sync
        .push(&payload[..], "/data/local/tmp/rt", 0o600, 42)
        .await
        .unwrap();
    assert_eq!(sent as usize, original.len());

    let mut restored = Vec::new();
    let received = sync.pull("/data/local/tmp/rt", &mut restored).await.unwrap();
    sync.quit().await.unwrap();

    assert_eq!(received as usize, original.len());
    assert_eq!(restored, original);
    daemon.await.unwrap();
}

#[tokio::test]
async fn list_directory_entries() {
    let (listener, config) = bind_daemon().await;

    let daemon = tokio::spawn(async move {
        let mut stream = accept_sync(&listener).await;
        let (tag, len) = read_header(&mut stream).await;
        assert_eq!(&tag, b"LIST");
        let mut path = vec![0u8; len as usize];
        stream.read_exact(&mut path).await.unwrap();
        assert_eq!(path, b"/sdcard");

        let dents: [(&str, u32, u32); 4] = [
            (".", 0o040755, 0),
            ("..", 0o040755, 0),
            ("Download", 0o040755, 0),
            ("note.txt", 0o100644, 27),
        ];
        for (name, mode, size) in dents {
            stream.write_all(b"DENT").await.unwrap();
            stream.write_all(&mode.to_le_bytes()).await.unwrap();
            stream.write_all(&size.to_le_bytes()).await.unwrap();
            stream.write_all(&1_600_000_000u32.to_le_bytes()).await.unwrap();
            stream
                .write_all(&(name.len() as u32).to_le_bytes())
                .await
                .unwrap();
            stream.write_all(name.as_bytes()).await.unwrap();
        }
        // LIST terminates with a bare DONE tag, no trailing fields.
        stream.write_all(b"DONE").await.unwrap();
        expect_quit(&mut stream).await;
    });

    let bridge = HostConnection::connect(config).await.unwrap();
    let mut sync = bridge.open_sync(None).await.unwrap();
    let entries = sync.list("/sdcard").await.unwrap();
    sync.quit().await.unwrap();

    // Dot entries are dropped.
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].name, "Download");
    assert!(entries[0].mode.is_directory());
    assert_eq!(entries[1].name, "note.txt");
    assert!(entries[1].mode.is_regular_file());
    assert_eq!(entries[1].size, 27);
    daemon.await.unwrap();
}

#[tokio::test]
async fn stat_missing_file_is_all_zeroes() {
    let (listener, config) = bind_daemon().await;

    let daemon = tokio::spawn(async move {
        let mut stream = accept_sync(&listener).await;
        let (tag, len) = read_header(&mut stream).await;
        assert_eq!(&tag, b"STAT");
        let mut path = vec![0u8; len as usize];
        stream.read_exact(&mut path).await.unwrap();
        stream.write_all(b"STAT").await.unwrap();
        stream.write_all(&[0u8; 12]).await.unwrap();
        expect_quit(&mut stream).await;
    });

    let bridge = HostConnection::connect(config).await.unwrap();
    let mut sync = bridge.open_sync(None).await.unwrap();
    let stat = sync.stat("/nope").await.unwrap();
    sync.quit().await.unwrap();

    assert!(!stat.exists());
    daemon.await.unwrap();
}
