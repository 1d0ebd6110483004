#![allow(dead_code)]

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

/// Minimal HTTP/1.1 stub that plays both the backend REST surface and the
/// attachment-host CDN, so the engines can be driven end-to-end without a
/// real server.
pub struct StubHost {
    pub addr: SocketAddr,
    state: Arc<StubState>,
}

#[derive(Default)]
struct StubState {
    base_url: Mutex<String>,
    plan_json: Mutex<String>,
    can_upload_json: Mutex<String>,
    fragments: Mutex<HashMap<String, Vec<u8>>>,
    /// Attachment ids that answer 429 once, with their `Retry-After`.
    throttle_once: Mutex<HashMap<String, u64>>,
    /// Attachment ids that always answer 429.
    throttle_always: Mutex<HashMap<String, u64>>,
    cdn_hits: Mutex<HashMap<String, usize>>,
    throttles_served: AtomicUsize,
    webhook_bodies: Mutex<Vec<usize>>,
    folders_created: AtomicUsize,
}

impl StubHost {
    pub async fn start() -> Self {
        tracing_subscriber::fmt().with_test_writer().try_init().ok();

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub host");
        let addr = listener.local_addr().expect("stub addr");

        let state = Arc::new(StubState::default());
        *state.base_url.lock().expect("lock") = format!("http://{addr}");

        let accept_state = state.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let state = accept_state.clone();
                tokio::spawn(async move {
                    handle_connection(stream, state).await.ok();
                });
            }
        });

        Self { addr, state }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn webhook_url(&self) -> String {
        format!("http://{}/webhook", self.addr)
    }

    pub fn set_plan(&self, json: String) {
        *self.state.plan_json.lock().expect("lock") = json;
    }

    pub fn set_can_upload(&self, json: String) {
        *self.state.can_upload_json.lock().expect("lock") = json;
    }

    pub fn put_fragment(&self, attachment_id: &str, data: Vec<u8>) {
        self.state
            .fragments
            .lock()
            .expect("lock")
            .insert(attachment_id.to_string(), data);
    }

    pub fn throttle_once(&self, attachment_id: &str, retry_after: u64) {
        self.state
            .throttle_once
            .lock()
            .expect("lock")
            .insert(attachment_id.to_string(), retry_after);
    }

    pub fn throttle_always(&self, attachment_id: &str, retry_after: u64) {
        self.state
            .throttle_always
            .lock()
            .expect("lock")
            .insert(attachment_id.to_string(), retry_after);
    }

    pub fn cdn_hits(&self, attachment_id: &str) -> usize {
        self.state
            .cdn_hits
            .lock()
            .expect("lock")
            .get(attachment_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn throttles_served(&self) -> usize {
        self.state.throttles_served.load(Ordering::SeqCst)
    }

    pub fn webhook_post_count(&self) -> usize {
        self.state.webhook_bodies.lock().expect("lock").len()
    }

    pub fn webhook_body_sizes(&self) -> Vec<usize> {
        self.state.webhook_bodies.lock().expect("lock").clone()
    }

    pub fn folders_created(&self) -> usize {
        self.state.folders_created.load(Ordering::SeqCst)
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    state: Arc<StubState>,
) -> std::io::Result<()> {
    let (head, mut body) = read_head(&mut stream).await?;
    let head_text = String::from_utf8_lossy(&head).into_owned();

    let mut lines = head_text.split("\r\n");
    let request_line = lines.next().unwrap_or_default().to_string();

    let mut content_length = 0usize;
    let mut chunked = false;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim();
        match name.as_str() {
            "content-length" => content_length = value.parse().unwrap_or(0),
            "transfer-encoding" if value.eq_ignore_ascii_case("chunked") => chunked = true,
            _ => {}
        }
    }

    if chunked {
        while !body.ends_with(b"0\r\n\r\n") {
            let mut buffer = [0u8; 4096];
            let read = stream.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            body.extend_from_slice(&buffer[..read]);
        }
    } else {
        while body.len() < content_length {
            let mut buffer = [0u8; 4096];
            let read = stream.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            body.extend_from_slice(&buffer[..read]);
        }
    }

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let response = route(&method, &path, &body, &state);
    stream.write_all(&response).await?;
    stream.shutdown().await.ok();
    Ok(())
}

async fn read_head(stream: &mut TcpStream) -> std::io::Result<(Vec<u8>, Vec<u8>)> {
    let mut collected = Vec::new();
    loop {
        if let Some(end) = find_header_end(&collected) {
            let body = collected.split_off(end + 4);
            collected.truncate(end);
            return Ok((collected, body));
        }
        let mut buffer = [0u8; 4096];
        let read = stream.read(&mut buffer).await?;
        if read == 0 {
            return Ok((collected, Vec::new()));
        }
        collected.extend_from_slice(&buffer[..read]);
    }
}

fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|window| window == b"\r\n\r\n")
}

fn route(method: &str, path: &str, body: &[u8], state: &Arc<StubState>) -> Vec<u8> {
    match (method, path) {
        ("POST", "/items/ultraDownload") => {
            json_response(200, &state.plan_json.lock().expect("lock").clone())
        }
        ("POST", "/webhook") => {
            state.webhook_bodies.lock().expect("lock").push(body.len());
            json_response(200, "{}")
        }
        ("POST", "/folders/create") => {
            let count = state.folders_created.fetch_add(1, Ordering::SeqCst);
            json_response(200, &format!("{{\"id\": \"sub-{count}\"}}"))
        }
        _ if method == "GET" && path.starts_with("/items/ultraDownload/attachments/") => {
            let id = path.rsplit('/').next().unwrap_or_default();
            let base = state.base_url.lock().expect("lock").clone();
            json_response(200, &format!("{{\"url\": \"{base}/cdn/{id}\"}}"))
        }
        _ if method == "GET" && path.starts_with("/cdn/") => {
            let id = path.rsplit('/').next().unwrap_or_default().to_string();
            *state
                .cdn_hits
                .lock()
                .expect("lock")
                .entry(id.clone())
                .or_insert(0) += 1;

            let always = state.throttle_always.lock().expect("lock").get(&id).copied();
            let once = state.throttle_once.lock().expect("lock").remove(&id);
            if let Some(wait) = always.or(once) {
                state.throttles_served.fetch_add(1, Ordering::SeqCst);
                return response(
                    429,
                    "Too Many Requests",
                    b"",
                    &[("Retry-After", &wait.to_string())],
                );
            }

            match state.fragments.lock().expect("lock").get(&id) {
                Some(data) => response(
                    200,
                    "OK",
                    data,
                    &[("Content-Type", "application/octet-stream")],
                ),
                None => response(404, "Not Found", b"", &[]),
            }
        }
        _ if method == "GET" && path.starts_with("/user/canUpload/") => {
            json_response(200, &state.can_upload_json.lock().expect("lock").clone())
        }
        _ => response(404, "Not Found", b"{}", &[]),
    }
}

fn json_response(status: u16, body: &str) -> Vec<u8> {
    response(
        status,
        "OK",
        body.as_bytes(),
        &[("Content-Type", "application/json")],
    )
}

fn response(status: u16, reason: &str, body: &[u8], headers: &[(&str, &str)]) -> Vec<u8> {
    let mut head = format!("HTTP/1.1 {status} {reason}\r\n");
    for (name, value) in headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    ));

    let mut bytes = head.into_bytes();
    bytes.extend_from_slice(body);
    bytes
}
