//! Shared fixtures for tests that need a real upstream.
//!
//! Upstreams bind to `127.0.0.1:0`, which the validator would refuse, so
//! tests hand targets to services via `StreamTarget::unchecked`.

use axum::Router;

/// Serves `router` on an ephemeral loopback port and returns its base URL.
pub(crate) async fn spawn_upstream(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{}", addr)
}

/// Builds an ICY body: one `metaint`-byte audio cycle per title, each
/// followed by its metadata block. An empty title yields a zero length byte.
pub(crate) fn icy_body(metaint: usize, titles: &[&str]) -> (Vec<u8>, Vec<u8>) {
    let mut wire = Vec::new();
    let mut audio = Vec::new();
    for (i, title) in titles.iter().enumerate() {
        let cycle: Vec<u8> = (0..metaint).map(|j| ((i + j) % 200) as u8).collect();
        wire.extend_from_slice(&cycle);
        audio.extend_from_slice(&cycle);
        if title.is_empty() {
            wire.push(0);
        } else {
            let text = format!("StreamTitle='{}';", title);
            let units = text.len().div_ceil(16);
            wire.push(units as u8);
            wire.extend_from_slice(text.as_bytes());
            wire.resize(wire.len() + units * 16 - text.len(), 0);
        }
    }
    (wire, audio)
}

/// Plain reqwest client for tests.
pub(crate) fn client() -> reqwest::Client {
    reqwest::Client::builder().build().expect("client")
}
