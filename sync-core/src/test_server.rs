//! In-process HTTP server for manifest tests

use std::net::SocketAddr;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;

/// Status, content type and body served for one path
pub type Canned = (StatusCode, [(&'static str, &'static str); 1], String);

pub fn xml(body: &str) -> Canned {
    (StatusCode::OK, [("content-type", "text/xml; charset=utf-8")], body.to_string())
}

/// Serve fixed responses on an ephemeral port; unknown paths get 404
pub async fn spawn(routes: Vec<(&'static str, Canned)>) -> SocketAddr {
    let mut app = Router::new();
    for (path, response) in routes {
        app = app.route(path, get(move || async move { response }));
    }

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub fn server_xml(name: &str) -> String {
    format!(
        r#"<ServerManifest version="1"><Name>{}</Name><Description>{} description</Description><LoginServer>127.0.0.1:20260</LoginServer><LoginApiUrl>http://127.0.0.1/api</LoginApiUrl></ServerManifest>"#,
        name, name
    )
}
