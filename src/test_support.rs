//! Local HTTP stubs for exercising upstream clients without the network

use axum::Router;

/// A port nothing listens on, for connection-refused paths
pub(crate) const REFUSED_URL: &str = "http://127.0.0.1:1";

/// Serve `router` on an ephemeral local port and return its base URL
pub(crate) async fn spawn_stub(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub listener");
    let addr = listener.local_addr().expect("stub address");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("stub server");
    });
    format!("http://{addr}")
}
