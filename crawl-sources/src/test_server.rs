//! Minimal HTTP/1.1 server for exercising the client and sources offline

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::client::HttpOptions;

/// Client options for talking to a local test server
pub fn offline_options() -> HttpOptions {
    HttpOptions {
        retry_initial_interval: std::time::Duration::from_millis(1),
        use_system_proxy: false,
        ..Default::default()
    }
}

/// RSS document with one audio episode per guid, enclosures under `<base>/audio/`
pub fn podcast_xml(base: &str, guids: &[&str]) -> String {
    let items: String = guids
        .iter()
        .map(|g| {
            format!(
                "<item><title>Episode {g}</title><guid>{g}</guid>\
                 <pubDate>Mon, 01 Jan 2024 10:00:00 +0000</pubDate>\
                 <enclosure url=\"{base}/audio/{g}.mp3\" type=\"audio/mpeg\"/></item>"
            )
        })
        .collect();
    format!("<?xml version=\"1.0\"?><rss version=\"2.0\"><channel><title>Show</title>{items}</channel></rss>")
}

type Route = (&'static str, u16, &'static str, String);

pub struct TestServer {
    addr: SocketAddr,
    hits: Arc<Mutex<HashMap<String, usize>>>,
}

impl TestServer {
    /// Serve `(path, status, content type, body)` routes until dropped with the runtime
    pub async fn start(routes: Vec<Route>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(Mutex::new(HashMap::new()));
        let routes = Arc::new(routes);

        let task_hits = hits.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handle(stream, routes.clone(), task_hits.clone()));
            }
        });

        Self { addr, hits }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}

async fn handle(mut stream: TcpStream, routes: Arc<Vec<Route>>, hits: Arc<Mutex<HashMap<String, usize>>>) {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }

    let head = String::from_utf8_lossy(&request);
    let target = head.split_whitespace().nth(1).unwrap_or("/");
    let path = target.split('?').next().unwrap_or(target).to_string();
    *hits.lock().unwrap().entry(path.clone()).or_insert(0) += 1;

    let (status, content_type, body) = routes
        .iter()
        .find(|(route, ..)| *route == path)
        .map(|(_, status, content_type, body)| (*status, *content_type, body.clone()))
        .unwrap_or((404, "text/plain", "not found".to_string()));

    let response = format!(
        "HTTP/1.1 {} X\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}
