//! Fetch-pass properties against a scripted in-process news server
//!
//! Two laws under test: the high watermark covers every *attempted* article
//! regardless of per-article failures, and three consecutive transport
//! errors spend the pass's single reconnect and then resume from the next
//! unfetched article.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use ftn_gate::{ArticleOutcome, NntpConfig, NntpTransport};

/// How a mock connection misbehaves
#[derive(Clone, Copy, PartialEq)]
enum Script {
    /// Answer everything; article MISSING_ARTICLE is a 423
    Normal,
    /// Drop the connection as soon as an ARTICLE command arrives
    DropOnArticle,
}

const MISSING_ARTICLE: u64 = 4;

async fn serve_connection(stream: TcpStream, script: Script) {
    let mut reader = BufReader::new(stream);
    if reader
        .get_mut()
        .write_all(b"200 mock news server ready\r\n")
        .await
        .is_err()
    {
        return;
    }

    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let command = line.trim_end();
        let upper = command.to_ascii_uppercase();

        if upper.starts_with("GROUP ") {
            let group = command.split_whitespace().nth(1).unwrap_or("?");
            let reply = format!("211 10 1 10 {}\r\n", group);
            if reader.get_mut().write_all(reply.as_bytes()).await.is_err() {
                return;
            }
        } else if upper.starts_with("ARTICLE ") {
            if script == Script::DropOnArticle {
                // Abrupt close, no status line
                return;
            }
            let number: u64 = command
                .split_whitespace()
                .nth(1)
                .and_then(|n| n.parse().ok())
                .unwrap_or(0);
            let reply = if number == MISSING_ARTICLE {
                format!("423 no article with number {}\r\n", number)
            } else {
                format!(
                    "220 {n} <a{n}@mock.example> article follows\r\n\
                     From: poster@mock.example\r\n\
                     Newsgroups: mock.group\r\n\
                     Subject: article {n}\r\n\
                     Date: Fri, 07 Aug 2026 10:00:00 +0000\r\n\
                     Message-ID: <a{n}@mock.example>\r\n\
                     \r\n\
                     body of article {n}\r\n\
                     .\r\n",
                    n = number
                )
            };
            if reader.get_mut().write_all(reply.as_bytes()).await.is_err() {
                return;
            }
        } else if upper.starts_with("QUIT") {
            let _ = reader.get_mut().write_all(b"205 bye\r\n").await;
            return;
        } else {
            let _ = reader.get_mut().write_all(b"500 what\r\n").await;
        }
    }
}

/// Start a mock server; connection `n` runs `scripts[min(n, len-1)]`
async fn start_mock(scripts: Vec<Script>) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let connections = Arc::new(AtomicUsize::new(0));

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let n = connections.fetch_add(1, Ordering::SeqCst);
            let script = scripts[n.min(scripts.len() - 1)];
            tokio::spawn(serve_connection(stream, script));
        }
    });
    port
}

fn config_for(port: u16) -> Arc<NntpConfig> {
    let toml_text = format!(
        "host = \"127.0.0.1\"\nport = {}\ntimeout_secs = 5\n",
        port
    );
    Arc::new(toml::from_str(&toml_text).unwrap())
}

#[tokio::test]
async fn broken_article_cannot_wedge_the_watermark() {
    let port = start_mock(vec![Script::Normal]).await;
    let mut transport = NntpTransport::connect(config_for(port)).await.unwrap();

    let report = transport.fetch_range("mock.group", 1, 7).await.unwrap();

    // The watermark target is the top of the requested range even though
    // article 4 failed on every attempt
    assert_eq!(report.highest_attempted, 7);
    assert_eq!(report.articles.len(), 6);
    assert_eq!(report.failed, vec![(MISSING_ARTICLE, ArticleOutcome::NotFound)]);

    let numbers: Vec<u64> = report.articles.iter().map(|a| a.number).collect();
    assert_eq!(numbers, vec![1, 2, 3, 5, 6, 7]);
    assert_eq!(
        report.articles[0].article.headers.message_id,
        "<a1@mock.example>"
    );

    let _ = transport.quit().await;
}

#[tokio::test]
async fn three_transport_errors_reconnect_once_and_resume() {
    // First connection drops on ARTICLE; the replacement behaves
    let port = start_mock(vec![Script::DropOnArticle, Script::Normal]).await;
    let mut transport = NntpTransport::connect(config_for(port)).await.unwrap();

    let report = transport.fetch_range("mock.group", 1, 8).await.unwrap();

    // Articles 1..=3 died with the first connection and are not retried;
    // the pass resumed at 4 after the reconnect (4 is the server's 423)
    assert_eq!(report.highest_attempted, 8);
    let failed_numbers: Vec<u64> = report.failed.iter().map(|(n, _)| *n).collect();
    assert!(failed_numbers.contains(&1));
    assert!(failed_numbers.contains(&2));
    assert!(failed_numbers.contains(&3));
    assert!(
        report
            .failed
            .iter()
            .take(3)
            .all(|(_, o)| *o == ArticleOutcome::ConnectionError || *o == ArticleOutcome::Timeout)
    );

    let numbers: Vec<u64> = report.articles.iter().map(|a| a.number).collect();
    assert_eq!(numbers, vec![5, 6, 7, 8]);

    let _ = transport.quit().await;
}

#[tokio::test]
async fn fetch_order_is_increasing_article_number() {
    let port = start_mock(vec![Script::Normal]).await;
    let mut transport = NntpTransport::connect(config_for(port)).await.unwrap();

    let report = transport.fetch_range("mock.group", 5, 9).await.unwrap();
    let numbers: Vec<u64> = report.articles.iter().map(|a| a.number).collect();
    let mut sorted = numbers.clone();
    sorted.sort_unstable();
    assert_eq!(numbers, sorted);
    assert_eq!(report.highest_attempted, 9);

    let _ = transport.quit().await;
}
