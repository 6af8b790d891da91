//! Exercises the store-server binary's HTTP surface against spec.md §6:
//! the store protocol (`POST`/`GET`/`HEAD` on `/store/<namespace>/<hash>`
//! and `/<namespace>`) and its cache-layer variant (`/<dedupe>/files/<hash>`,
//! `/<dedupe>/md/<id>.flist`).

use reqwest::StatusCode;
use std::net::TcpListener;
use std::process::{Child, Command};
use std::time::Duration;

struct Server {
    child: Child,
    base_url: String,
    _data_dir: tempfile::TempDir,
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

async fn spawn_server() -> Server {
    let port = free_port();
    let data_dir = tempfile::tempdir().unwrap();
    let addr = format!("127.0.0.1:{port}");
    let base_url = format!("http://{addr}");

    let child = Command::new(env!("CARGO_BIN_EXE_store-server"))
        .arg("--data-dir")
        .arg(data_dir.path())
        .arg("--listen")
        .arg(&addr)
        .spawn()
        .expect("failed to spawn store-server");

    // Give the listener a moment to come up; poll /health instead of a
    // fixed sleep so this isn't flaky under load.
    for _ in 0..50 {
        if reqwest::get(format!("{base_url}/health")).await.is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    Server {
        child,
        base_url,
        _data_dir: data_dir,
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = spawn_server().await;
    let response = reqwest::get(format!("{}/health", server.base_url))
        .await
        .expect("request failed");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_store_round_trip() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();

    let post_resp = client
        .post(format!("{}/ns1", server.base_url))
        .body("hello store")
        .send()
        .await
        .expect("post failed");
    assert_eq!(post_resp.status(), StatusCode::CREATED);
    let hash = post_resp.text().await.unwrap();
    assert!(!hash.is_empty());

    let get_resp = client
        .get(format!("{}/store/ns1/{hash}", server.base_url))
        .send()
        .await
        .expect("get failed");
    assert_eq!(get_resp.status(), StatusCode::OK);
    assert_eq!(get_resp.bytes().await.unwrap().as_ref(), b"hello store");

    let head_resp = client
        .head(format!("{}/store/ns1/{hash}", server.base_url))
        .send()
        .await
        .expect("head failed");
    assert_eq!(head_resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_store_miss_is_404() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/store/ns1/deadbeef", server.base_url))
        .send()
        .await
        .expect("get failed");
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let head_resp = client
        .head(format!("{}/store/ns1/deadbeef", server.base_url))
        .send()
        .await
        .expect("head failed");
    assert_eq!(head_resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cache_layer_file_miss_is_404() {
    let server = spawn_server().await;
    let resp = reqwest::get(format!("{}/dedupe1/files/deadbeef", server.base_url))
        .await
        .expect("get failed");
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cache_layer_meta_miss_is_404() {
    let server = spawn_server().await;
    let resp = reqwest::get(format!("{}/dedupe1/md/missing.flist", server.base_url))
        .await
        .expect("get failed");
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
