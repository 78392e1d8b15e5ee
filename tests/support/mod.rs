//! Scripted mock SSC monitor for integration tests.
//!
//! Serves the real wire protocol over a local TCP listener: value reads
//! and writes against a JSON state tree, schema and limits queries, and
//! 404 error envelopes for unknown addresses.

// Not every test binary uses every helper.
#![allow(dead_code)]

use neumann_ssc::Endpoint;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

pub struct MockMonitor {
    pub endpoint: Endpoint,
    commands: Arc<Mutex<Vec<String>>>,
    pub state: Arc<Mutex<Value>>,
}

impl MockMonitor {
    pub async fn start(initial: Value, limits: Value) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let commands = Arc::new(Mutex::new(Vec::new()));
        let state = Arc::new(Mutex::new(initial));
        let limits = Arc::new(limits);

        {
            let commands = commands.clone();
            let state = state.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        return;
                    };
                    let commands = commands.clone();
                    let state = state.clone();
                    let limits = limits.clone();
                    tokio::spawn(async move {
                        let (read_half, mut write_half) = stream.into_split();
                        let mut lines = BufReader::new(read_half).lines();
                        while let Ok(Some(line)) = lines.next_line().await {
                            commands.lock().await.push(line.clone());
                            let reply = handle(&line, &state, &limits).await;
                            let framed = format!("{reply}\n");
                            if write_half.write_all(framed.as_bytes()).await.is_err() {
                                return;
                            }
                        }
                    });
                }
            });
        }

        Self {
            endpoint: Endpoint::new(addr.ip().to_string(), addr.port()),
            commands,
            state,
        }
    }

    /// Every command line received so far
    pub async fn commands(&self) -> Vec<String> {
        self.commands.lock().await.clone()
    }

    pub async fn clear_commands(&self) {
        self.commands.lock().await.clear();
    }

    /// The subset of received commands that carry a value write
    pub async fn writes(&self) -> Vec<String> {
        self.commands
            .lock()
            .await
            .iter()
            .filter(|line| {
                let Ok(command) = serde_json::from_str::<Value>(line) else {
                    return false;
                };
                if command.get("osc").is_some() {
                    return false;
                }
                let (_, payload) = leaf_of(&command);
                !payload.is_null()
            })
            .cloned()
            .collect()
    }

    /// Count of schema queries received so far
    pub async fn schema_queries(&self) -> usize {
        self.commands
            .lock()
            .await
            .iter()
            .filter(|line| line.contains(r#""schema""#))
            .count()
    }
}

async fn handle(line: &str, state: &Arc<Mutex<Value>>, limits: &Value) -> String {
    let Ok(command) = serde_json::from_str::<Value>(line) else {
        return error_reply(400);
    };

    if let Some(list) = command.pointer("/osc/schema").and_then(Value::as_array) {
        let address = path_of(list.first().unwrap_or(&Value::Null));
        let state = state.lock().await;
        let Some(target) = descend(&state, &address) else {
            return error_reply(404);
        };
        let Some(entries) = target.as_object() else {
            return error_reply(404);
        };
        let children: Map<String, Value> = entries
            .iter()
            .map(|(name, entry)| {
                let shape = if entry.is_object() { json!({}) } else { Value::Null };
                (name.clone(), shape)
            })
            .collect();
        return json!({"osc": {"schema": [rewrap(&address, Value::Object(children))]}})
            .to_string();
    }

    if let Some(list) = command.pointer("/osc/limits").and_then(Value::as_array) {
        let address = path_of(list.first().unwrap_or(&Value::Null));
        let target = descend(limits, &address).cloned().unwrap_or_else(|| json!({}));
        return json!({"osc": {"limits": [rewrap(&address, target)]}}).to_string();
    }

    let (address, payload) = leaf_of(&command);
    let mut state = state.lock().await;
    let Some(slot) = descend_mut(&mut state, &address) else {
        return error_reply(404);
    };
    if payload.is_null() {
        return rewrap(&address, slot.clone()).to_string();
    }
    *slot = payload.clone();
    rewrap(&address, payload).to_string()
}

fn error_reply(code: u16) -> String {
    json!({"osc": {"error": {"code": code}}}).to_string()
}

/// Collect the address of a read-style envelope (single-key objects down
/// to a null leaf)
fn path_of(address: &Value) -> Vec<String> {
    let (path, _) = destructure(address);
    path
}

/// Split a command envelope into its address and leaf payload
fn leaf_of(command: &Value) -> (Vec<String>, Value) {
    destructure(command)
}

fn destructure(envelope: &Value) -> (Vec<String>, Value) {
    let mut path = Vec::new();
    let mut node = envelope;
    loop {
        match node {
            Value::Object(map) if map.len() == 1 => {
                let (key, entry) = map.iter().next().unwrap();
                path.push(key.clone());
                node = entry;
            }
            other => return (path, other.clone()),
        }
    }
}

fn descend<'a>(mut node: &'a Value, path: &[String]) -> Option<&'a Value> {
    for segment in path {
        node = node.get(segment)?;
    }
    Some(node)
}

fn descend_mut<'a>(mut node: &'a mut Value, path: &[String]) -> Option<&'a mut Value> {
    for segment in path {
        node = node.get_mut(segment)?;
    }
    Some(node)
}

fn rewrap(path: &[String], value: Value) -> Value {
    let mut node = value;
    for segment in path.iter().rev() {
        node = json!({ segment.as_str(): node });
    }
    node
}

fn eq_group(bands: usize) -> Value {
    json!({
        "boost": vec![0.0; bands],
        "enabled": vec![false; bands],
        "frequency": vec![1000.0; bands],
        "gain": vec![0.0; bands],
        "q": vec![0.7; bands],
        "type": vec!["parametric"; bands],
    })
}

/// A complete monitor state tree covering every well-known address
pub fn full_state() -> Value {
    json!({
        "device": {
            "name": "Studio Left",
            "identity": {"serial": "A1B2C3", "product": "KH 150"}
        },
        "audio": {
            "out": {
                "level": 54.0,
                "mute": false,
                "eq2": eq_group(10),
                "eq3": eq_group(20),
            }
        },
        "ui": {"logo": {"brightness": 80.0}}
    })
}

/// Limits metadata for the leaves that report a type
pub fn full_limits() -> Value {
    json!({
        "audio": {
            "out": {
                "level": {"type": "Number", "units": "dB", "min": 0.0, "max": 120.0, "inc": 0.1},
                "mute": {"type": "Boolean"},
            }
        },
        "ui": {"logo": {"brightness": {"type": "Number", "min": 0.0, "max": 100.0}}}
    })
}
