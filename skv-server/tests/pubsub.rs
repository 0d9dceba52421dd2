//! End-to-end tests driving a real `skv-server` instance over TCP, in the
//! style of the teacher workspace's own socket-level client tests
//! (`hkv-client/tests/client.rs`): bind an ephemeral port, connect real
//! `TcpStream`s, and assert on the literal bytes that cross the wire.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use skv_common::Config;
use skv_server::{Metrics, spawn_actor, spawn_sweeper};

async fn start_server(config: Config) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");

    let metrics = Arc::new(Metrics::new());
    let actor = spawn_actor(&config, metrics);
    spawn_sweeper(actor.clone(), Duration::from_millis(config.sweep_interval_ms));

    tokio::spawn(async move {
        let _ = skv_server::accept_loop(listener, actor).await;
    });

    addr
}

async fn connect(addr: std::net::SocketAddr) -> TcpStream {
    TcpStream::connect(addr).await.expect("connect")
}

async fn send_line(stream: &mut TcpStream, line: &str) {
    stream.write_all(line.as_bytes()).await.expect("write");
    stream.write_all(b"\n").await.expect("write newline");
}

async fn read_line(reader: &mut BufReader<&mut TcpStream>) -> String {
    let mut buf = String::new();
    reader.read_line(&mut buf).await.expect("read line");
    buf.trim_end_matches(['\n', '\r']).to_string()
}

#[tokio::test]
async fn string_lifecycle_over_the_wire() {
    let addr = start_server(Config::default()).await;
    let mut stream = connect(addr).await;

    send_line(&mut stream, "SET foo hello").await;
    send_line(&mut stream, "GET foo").await;
    send_line(&mut stream, "DEL foo").await;
    send_line(&mut stream, "GET foo").await;
    stream.flush().await.unwrap();

    let mut reader = BufReader::new(&mut stream);
    assert_eq!(read_line(&mut reader).await, "ok");
    assert_eq!(read_line(&mut reader).await, "hello");
    assert_eq!(read_line(&mut reader).await, "1");
    assert_eq!(read_line(&mut reader).await, "nil");
}

#[tokio::test]
async fn pub_sub_fan_out_over_the_wire() {
    let addr = start_server(Config::default()).await;

    let mut conn_a = connect(addr).await;
    let mut conn_b = connect(addr).await;
    let mut conn_c = connect(addr).await;

    send_line(&mut conn_a, "SUBSCRIBE news").await;
    send_line(&mut conn_b, "SUBSCRIBE news").await;

    {
        let mut reader_a = BufReader::new(&mut conn_a);
        assert_eq!(read_line(&mut reader_a).await, "ok");
    }
    {
        let mut reader_b = BufReader::new(&mut conn_b);
        assert_eq!(read_line(&mut reader_b).await, "ok");
    }

    send_line(&mut conn_c, "PUBLISH news hi").await;
    {
        let mut reader_c = BufReader::new(&mut conn_c);
        assert_eq!(read_line(&mut reader_c).await, "2");
    }

    let mut reader_a = BufReader::new(&mut conn_a);
    assert_eq!(read_line(&mut reader_a).await, "news hi");
    let mut reader_b = BufReader::new(&mut conn_b);
    assert_eq!(read_line(&mut reader_b).await, "news hi");
}

#[tokio::test]
async fn disconnect_unsubscribes_without_affecting_other_subscribers() {
    let addr = start_server(Config::default()).await;

    let mut conn_a = connect(addr).await;
    let conn_b_keepalive;
    {
        let mut conn_b = connect(addr).await;
        send_line(&mut conn_b, "SUBSCRIBE news").await;
        {
            let mut reader_b = BufReader::new(&mut conn_b);
            assert_eq!(read_line(&mut reader_b).await, "ok");
        }
        conn_b_keepalive = conn_b;
    }

    send_line(&mut conn_a, "SUBSCRIBE news").await;
    {
        let mut reader_a = BufReader::new(&mut conn_a);
        assert_eq!(read_line(&mut reader_a).await, "ok");
    }
    drop(conn_a);

    // Give the actor a moment to process the disconnect before publishing.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut conn_c = connect(addr).await;
    send_line(&mut conn_c, "PUBLISH news hi").await;
    let mut reader_c = BufReader::new(&mut conn_c);
    assert_eq!(read_line(&mut reader_c).await, "1");

    drop(conn_b_keepalive);
}
