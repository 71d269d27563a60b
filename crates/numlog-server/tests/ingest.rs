use core::time::Duration;
use numlog_core::{Error, Ledger};
use numlog_server::{
    IngestServer, ServerConfig, ShutdownSummary, server::connection::registry::ConnectionRegistry,
};
use std::{collections::HashSet, net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

const DEADLINE: Duration = Duration::from_secs(5);

struct Running {
    _dir: tempfile::TempDir,
    log: PathBuf,
    addr: SocketAddr,
    shutdown: CancellationToken,
    ledger: Arc<dyn Ledger>,
    connections: ConnectionRegistry,
    handle: JoinHandle<numlog_core::Result<ShutdownSummary>>,
}

impl Running {
    async fn stop(self) -> (ShutdownSummary, String) {
        self.shutdown.cancel();
        let summary = tokio::time::timeout(DEADLINE, self.handle)
            .await
            .expect("server did not stop in time")
            .unwrap()
            .unwrap();
        let contents = std::fs::read_to_string(&self.log).unwrap();
        (summary, contents)
    }

    /// Waits for a client-requested shutdown to complete.
    async fn stopped_by_client(self) -> (ShutdownSummary, String) {
        let summary = tokio::time::timeout(DEADLINE, self.handle)
            .await
            .expect("shutdown did not complete in time")
            .unwrap()
            .unwrap();
        let contents = std::fs::read_to_string(&self.log).unwrap();
        (summary, contents)
    }
}

fn test_config(dir: &tempfile::TempDir) -> ServerConfig {
    ServerConfig {
        server_addr: "127.0.0.1:0".to_string(),
        log_file: dir.path().join("numbers.log"),
        // Keep the reporter out of the way unless a test asks for it.
        report_delay: Duration::from_secs(3600),
        ..ServerConfig::default()
    }
}

async fn start_with(dir: tempfile::TempDir, config: ServerConfig) -> Running {
    let server = IngestServer::bind(config.clone()).await.unwrap();
    Running {
        log: config.log_file,
        addr: server.local_addr(),
        shutdown: server.shutdown_handle(),
        ledger: server.ledger(),
        connections: server.connections(),
        handle: tokio::spawn(server.run()),
        _dir: dir,
    }
}

async fn start() -> Running {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    start_with(dir, config).await
}

/// Sends `payload`, half-closes, and waits for the server to close its side,
/// which happens only after every line was processed.
async fn send_and_close(addr: SocketAddr, payload: impl AsRef<[u8]>) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(payload.as_ref()).await.unwrap();
    stream.shutdown().await.unwrap();
    let mut rest = Vec::new();
    tokio::time::timeout(DEADLINE, stream.read_to_end(&mut rest))
        .await
        .expect("server kept the connection open")
        .unwrap();
    assert!(rest.is_empty(), "server must never write to clients");
}

/// Whether the server closed `stream` (EOF or reset) within the deadline.
async fn closed_by_server(stream: &mut TcpStream) -> bool {
    let mut buf = [0u8; 16];
    matches!(
        tokio::time::timeout(DEADLINE, stream.read(&mut buf)).await,
        Ok(Ok(0) | Err(_))
    )
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(DEADLINE, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_record_from_three_clients_is_persisted_once() {
    let server = start().await;

    for _ in 0..3 {
        send_and_close(server.addr, "421179925\n").await;
    }

    let stats = server.ledger.snapshot_and_reset();
    assert_eq!((stats.unique, stats.duplicates, stats.unique_total), (1, 2, 1));

    let (summary, contents) = server.stop().await;
    assert_eq!(contents, "421179925\n");
    assert_eq!(summary.unique_total, 1);
    assert_eq!(summary.records_written, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_clients_persist_each_distinct_record_once() {
    let server = start().await;

    // Five clients with heavily overlapping ranges: 0..1000, 200..1200, ...
    let clients: Vec<_> = (0..5u32)
        .map(|c| {
            let addr = server.addr;
            tokio::spawn(async move {
                let payload: String = (c * 200..c * 200 + 1000)
                    .map(|n| format!("{n:09}\n"))
                    .collect();
                send_and_close(addr, payload).await;
            })
        })
        .collect();
    for client in clients {
        client.await.unwrap();
    }

    let (summary, contents) = server.stop().await;
    let lines: Vec<&str> = contents.lines().collect();
    let distinct: HashSet<&str> = lines.iter().copied().collect();

    assert_eq!(summary.unique_total, 1800);
    assert_eq!(summary.records_written, 1800);
    assert_eq!(lines.len(), 1800);
    assert_eq!(distinct.len(), 1800);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sixth_connection_is_closed_while_five_keep_working() {
    let server = start().await;

    let mut admitted = Vec::new();
    for _ in 0..5 {
        admitted.push(TcpStream::connect(server.addr).await.unwrap());
    }
    let connections = server.connections.clone();
    wait_until(|| connections.len() == 5).await;

    let mut rejected = TcpStream::connect(server.addr).await.unwrap();
    assert!(closed_by_server(&mut rejected).await);
    assert_eq!(server.connections.len(), 5);

    for (i, stream) in admitted.iter_mut().enumerate() {
        stream
            .write_all(format!("{:09}\n", i + 1).as_bytes())
            .await
            .unwrap();
        stream.shutdown().await.unwrap();
        assert!(closed_by_server(stream).await);
    }
    assert_eq!(server.ledger.unique_total(), 5);

    // Slots are released once the admitted clients leave.
    wait_until(|| connections.is_empty()).await;
    send_and_close(server.addr, "999999999\n").await;

    let (summary, _) = server.stop().await;
    assert_eq!(summary.unique_total, 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn malformed_lines_change_nothing() {
    let server = start().await;

    send_and_close(
        server.addr,
        "abc\n12345678\n1234567890\n-12345678\n 123456789\n\nTERMINATE\n12345678a\n",
    )
    .await;

    let stats = server.ledger.snapshot_and_reset();
    assert_eq!((stats.unique, stats.duplicates, stats.unique_total), (0, 0, 0));

    let (summary, contents) = server.stop().await;
    assert_eq!(contents, "");
    assert_eq!(summary.records_written, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn crlf_terminated_records_are_accepted() {
    let server = start().await;

    send_and_close(server.addr, "123456789\r\n000000007\r\n123456789\n").await;

    let (summary, contents) = server.stop().await;
    assert_eq!(contents, "123456789\n000000007\n");
    assert_eq!(summary.unique_total, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn terminate_shuts_everything_down() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let server = IngestServer::bind(config.clone()).await.unwrap();
    let addr = server.local_addr();
    let connections = server.connections();
    let mut reports = server.subscribe_reports();
    let handle = tokio::spawn(server.run());

    let mut idle_a = TcpStream::connect(addr).await.unwrap();
    let mut idle_b = TcpStream::connect(addr).await.unwrap();
    wait_until(|| connections.len() == 2).await;

    let mut killer = TcpStream::connect(addr).await.unwrap();
    killer
        .write_all(b"555555555\nplease terminate\n")
        .await
        .unwrap();

    let summary = tokio::time::timeout(DEADLINE, handle)
        .await
        .expect("shutdown did not complete in time")
        .unwrap()
        .unwrap();
    assert_eq!(summary.unique_total, 1);
    assert_eq!(summary.records_written, 1);

    assert!(closed_by_server(&mut idle_a).await);
    assert!(closed_by_server(&mut idle_b).await);
    assert!(closed_by_server(&mut killer).await);
    assert!(connections.is_empty());

    assert!(TcpStream::connect(addr).await.is_err());
    assert!(matches!(
        reports.recv().await,
        Err(tokio::sync::broadcast::error::RecvError::Closed)
    ));
    assert_eq!(
        std::fs::read_to_string(config.log_file).unwrap(),
        "555555555\n"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn terminate_in_overlong_line_shuts_down() {
    let server = start().await;

    let mut client = TcpStream::connect(server.addr).await.unwrap();
    let line = format!("123456789\n{} terminate\n", "x".repeat(2000));
    client.write_all(line.as_bytes()).await.unwrap();

    let (summary, contents) = server.stopped_by_client().await;
    assert_eq!(summary.unique_total, 1);
    assert_eq!(contents, "123456789\n");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn terminate_split_across_writes_of_overlong_line_shuts_down() {
    let server = start().await;

    let mut client = TcpStream::connect(server.addr).await.unwrap();
    client.set_nodelay(true).unwrap();
    let head = format!("{} term", "x".repeat(2000));
    client.write_all(head.as_bytes()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.write_all(b"inate\n").await.unwrap();

    let (summary, contents) = server.stopped_by_client().await;
    assert_eq!(summary.unique_total, 0);
    assert_eq!(contents, "");
    assert!(closed_by_server(&mut client).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reports_window_counts() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        report_delay: Duration::ZERO,
        report_interval: Duration::from_millis(200),
        ..test_config(&dir)
    };
    let server = IngestServer::bind(config).await.unwrap();
    let mut reports = server.subscribe_reports();
    let addr = server.local_addr();
    let shutdown = server.shutdown_handle();
    let handle = tokio::spawn(server.run());

    send_and_close(addr, "111111111\n222222222\n111111111\n").await;

    let (mut unique, mut duplicates) = (0, 0);
    tokio::time::timeout(DEADLINE, async {
        loop {
            let stats = reports.recv().await.unwrap();
            unique += stats.unique;
            duplicates += stats.duplicates;
            if stats.unique_total == 2 && duplicates == 1 {
                break;
            }
        }
    })
    .await
    .expect("no report with the expected totals");
    assert_eq!(unique, 2);

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn bind_failure_is_reported() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        server_addr: taken.local_addr().unwrap().to_string(),
        ..test_config(&dir)
    };

    assert!(matches!(
        IngestServer::bind(config).await,
        Err(Error::Io(_))
    ));
}

#[tokio::test]
async fn unwritable_log_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        log_file: dir.path().join("missing").join("numbers.log"),
        ..test_config(&dir)
    };

    assert!(matches!(
        IngestServer::bind(config).await,
        Err(Error::Io(_))
    ));
}
