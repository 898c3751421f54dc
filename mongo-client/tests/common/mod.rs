//! Common test utilities for integration tests: an in-process server that
//! speaks the legacy wire protocol.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bson::{doc, Document};
use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use mongo_client::{
    Cluster, ClusterFactory, ClusterListeners, ClusterSettings, ConnectionPoolSettings,
    DefaultClusterFactory, MongoCredential, ServerAddress, ServerSettings, StreamFactory,
    TcpStreamFactory,
};

pub const NONCE: &str = "2375531c32080ae8";

const OP_REPLY: i32 = 1;
const OP_QUERY: i32 = 2004;
const OP_GET_MORE: i32 = 2005;
const OP_KILL_CURSORS: i32 = 2007;

const CURSOR_NOT_FOUND: i32 = 1;
const QUERY_FAILURE: i32 = 2;

/// Cursor id handed out for the second batch of a namespace listing.
pub const NAMESPACES_CURSOR_ID: i64 = 4242;

/// Cursor id whose get-more replies carry an undecodable document.
pub const MALFORMED_CURSOR_ID: i64 = 777;

/// What the mock server knows.
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// Users accepted by `authenticate`, keyed by user name.
    pub users: HashMap<String, String>,
    /// Full namespace names returned from `system.namespaces`.
    pub namespaces: Vec<String>,
    /// Extra fields merged into the `ismaster` reply.
    pub is_master: Document,
    /// Hang up right after answering `getnonce`.
    pub close_after_nonce: bool,
}

impl MockConfig {
    pub fn with_user(mut self, username: &str, password: &str) -> Self {
        self.users.insert(username.to_string(), password.to_string());
        self
    }

    pub fn closing_after_nonce(mut self) -> Self {
        self.close_after_nonce = true;
        self
    }

    pub fn with_namespaces(mut self, namespaces: &[&str]) -> Self {
        self.namespaces = namespaces.iter().map(|s| s.to_string()).collect();
        self
    }
}

#[derive(Debug, Default)]
pub struct MockState {
    commands: Mutex<Vec<Document>>,
    killed_cursors: Mutex<Vec<i64>>,
    connections: AtomicUsize,
    next_request_id: AtomicI32,
}

impl MockState {
    /// Commands received, in order, excluding heartbeats.
    pub fn commands(&self) -> Vec<Document> {
        self.commands.lock().unwrap().clone()
    }

    pub fn killed_cursors(&self) -> Vec<i64> {
        self.killed_cursors.lock().unwrap().clone()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// A mock `mongod` bound to an ephemeral local port.
pub struct MockServer {
    address: ServerAddress,
    state: Arc<MockState>,
    task: JoinHandle<()>,
}

impl MockServer {
    pub async fn start(config: MockConfig) -> Self {
        Self::start_with(|_| config).await
    }

    /// Starts a server whose configuration depends on its own address.
    pub async fn start_with(configure: impl FnOnce(&ServerAddress) -> MockConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock server");
        let port = listener.local_addr().expect("local addr").port();
        let address = ServerAddress::new("127.0.0.1", port);
        let state = Arc::new(MockState::default());
        let config = Arc::new(configure(&address));

        let accept_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_state.connections.fetch_add(1, Ordering::SeqCst);
                let state = Arc::clone(&accept_state);
                let config = Arc::clone(&config);
                tokio::spawn(async move {
                    let _ = serve(stream, &config, &state).await;
                });
            }
        });

        Self {
            address,
            state,
            task,
        }
    }

    pub fn address(&self) -> ServerAddress {
        self.address.clone()
    }

    pub fn state(&self) -> &MockState {
        &self.state
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

enum Request {
    Query {
        namespace: String,
        document: Document,
    },
    GetMore {
        cursor_id: i64,
    },
    KillCursors {
        cursor_ids: Vec<i64>,
    },
}

fn read_cstring(src: &mut BytesMut) -> String {
    let end = src.iter().position(|b| *b == 0).expect("unterminated cstring");
    let value = String::from_utf8(src.split_to(end).to_vec()).expect("utf8 cstring");
    src.advance(1);
    value
}

async fn serve(mut stream: TcpStream, config: &MockConfig, state: &MockState) -> std::io::Result<()> {
    loop {
        let length = stream.read_i32_le().await?;
        let mut frame = BytesMut::zeroed(length as usize - 4);
        stream.read_exact(&mut frame).await?;

        let request_id = frame.get_i32_le();
        let _response_to = frame.get_i32_le();
        let op_code = frame.get_i32_le();
        let request = match op_code {
            OP_QUERY => {
                let _flags = frame.get_i32_le();
                let namespace = read_cstring(&mut frame);
                let _skip = frame.get_i32_le();
                let _number_to_return = frame.get_i32_le();
                let document = Document::from_reader(&mut frame.as_ref()).expect("query document");
                Request::Query { namespace, document }
            }
            OP_GET_MORE => {
                let _zero = frame.get_i32_le();
                let _namespace = read_cstring(&mut frame);
                let _number_to_return = frame.get_i32_le();
                Request::GetMore {
                    cursor_id: frame.get_i64_le(),
                }
            }
            OP_KILL_CURSORS => {
                let _zero = frame.get_i32_le();
                let count = frame.get_i32_le();
                Request::KillCursors {
                    cursor_ids: (0..count).map(|_| frame.get_i64_le()).collect(),
                }
            }
            other => panic!("unexpected op code {}", other),
        };

        let hang_up = config.close_after_nonce
            && matches!(&request, Request::Query { document, .. } if document.contains_key("getnonce"));
        let Some(reply) = handle(request, config, state) else {
            continue;
        };
        let bytes = encode_reply(state.next_request_id.fetch_add(1, Ordering::SeqCst) + 1, request_id, reply);
        stream.write_all(&bytes).await?;
        if hang_up {
            return Ok(());
        }
    }
}

struct Reply {
    flags: i32,
    cursor_id: i64,
    body: Vec<u8>,
    count: i32,
}

impl Reply {
    fn documents(documents: &[Document], cursor_id: i64) -> Self {
        let mut body = Vec::new();
        for document in documents {
            document.to_writer(&mut body).expect("encode reply document");
        }
        Self {
            flags: 0,
            cursor_id,
            body,
            count: documents.len() as i32,
        }
    }

    fn command(document: Document) -> Self {
        Self::documents(&[document], 0)
    }
}

fn handle(request: Request, config: &MockConfig, state: &MockState) -> Option<Reply> {
    match request {
        Request::Query { namespace, document } if namespace.ends_with(".$cmd") => {
            Some(Reply::command(handle_command(document, config, state)))
        }
        Request::Query { namespace, .. } if namespace.ends_with(".system.namespaces") => {
            let names: Vec<Document> = config
                .namespaces
                .iter()
                .map(|name| doc! { "name": name })
                .collect();
            let split = names.len().min(2);
            let cursor_id = if split < names.len() { NAMESPACES_CURSOR_ID } else { 0 };
            Some(Reply::documents(&names[..split], cursor_id))
        }
        Request::Query { .. } => Some(Reply {
            flags: QUERY_FAILURE,
            ..Reply::command(doc! { "$err": "unsupported query", "code": 2 })
        }),
        Request::GetMore { cursor_id } if cursor_id == NAMESPACES_CURSOR_ID => {
            let names: Vec<Document> = config
                .namespaces
                .iter()
                .skip(2)
                .map(|name| doc! { "name": name })
                .collect();
            Some(Reply::documents(&names, 0))
        }
        Request::GetMore { cursor_id } if cursor_id == MALFORMED_CURSOR_ID => Some(Reply {
            flags: 0,
            cursor_id: 0,
            body: vec![8, 0, 0, 0, 0x20, b'a', 0, 0],
            count: 1,
        }),
        Request::GetMore { .. } => Some(Reply {
            flags: CURSOR_NOT_FOUND,
            cursor_id: 0,
            body: Vec::new(),
            count: 0,
        }),
        Request::KillCursors { cursor_ids } => {
            state.killed_cursors.lock().unwrap().extend(cursor_ids);
            None
        }
    }
}

fn handle_command(command: Document, config: &MockConfig, state: &MockState) -> Document {
    let name = command.keys().next().cloned().unwrap_or_default();
    if name != "ismaster" {
        state.commands.lock().unwrap().push(command.clone());
    }
    match name.as_str() {
        "ismaster" => {
            let mut reply = doc! { "ismaster": true, "maxBsonObjectSize": 16 * 1024 * 1024 };
            for (key, value) in &config.is_master {
                reply.insert(key.clone(), value.clone());
            }
            reply.insert("ok", 1.0);
            reply
        }
        "getnonce" => doc! { "nonce": NONCE, "ok": 1.0 },
        "authenticate" => {
            let user = command.get_str("user").unwrap_or_default();
            let key = command.get_str("key").unwrap_or_default();
            let accepted = config
                .users
                .get(user)
                .map(|password| expected_key(user, password) == key)
                .unwrap_or(false);
            if accepted {
                doc! { "dbname": "admin", "user": user, "ok": 1.0 }
            } else {
                doc! { "errmsg": "auth fails", "code": 18, "ok": 0.0 }
            }
        }
        "dropDatabase" | "create" | "renameCollection" => doc! { "ok": 1.0 },
        _ => doc! { "errmsg": format!("no such cmd: {}", name), "code": 59, "ok": 0.0 },
    }
}

fn expected_key(user: &str, password: &str) -> String {
    let digest = format!("{:x}", md5::compute(format!("{}:mongo:{}", user, password)));
    format!("{:x}", md5::compute(format!("{}{}{}", NONCE, user, digest)))
}

fn encode_reply(request_id: i32, response_to: i32, reply: Reply) -> BytesMut {
    let mut dst = BytesMut::with_capacity(36 + reply.body.len());
    dst.put_i32_le((36 + reply.body.len()) as i32);
    dst.put_i32_le(request_id);
    dst.put_i32_le(response_to);
    dst.put_i32_le(OP_REPLY);
    dst.put_i32_le(reply.flags);
    dst.put_i64_le(reply.cursor_id);
    dst.put_i32_le(0);
    dst.put_i32_le(reply.count);
    dst.put_slice(&reply.body);
    dst
}

pub fn fast_server_settings() -> ServerSettings {
    ServerSettings::builder()
        .heartbeat_frequency(Duration::from_millis(200))
        .min_heartbeat_frequency(Duration::from_millis(10))
        .heartbeat_connect_timeout(Duration::from_secs(2))
        .build()
        .expect("failed to build server settings")
}

pub fn create_cluster(settings: ClusterSettings, credentials: Vec<MongoCredential>) -> Cluster {
    create_cluster_with_listeners(settings, credentials, ClusterListeners::default())
}

pub fn create_cluster_with_listeners(
    settings: ClusterSettings,
    credentials: Vec<MongoCredential>,
    listeners: ClusterListeners,
) -> Cluster {
    let streams: Arc<dyn StreamFactory> = Arc::new(TcpStreamFactory::new());
    DefaultClusterFactory::new()
        .create(
            settings,
            fast_server_settings(),
            ConnectionPoolSettings::default(),
            Arc::clone(&streams),
            streams,
            credentials,
            listeners,
        )
        .expect("failed to create cluster")
}

pub fn single_host(address: ServerAddress) -> ClusterSettings {
    ClusterSettings::builder()
        .add_host(address)
        .server_selection_timeout(Duration::from_secs(5))
        .build()
        .expect("failed to build cluster settings")
}
