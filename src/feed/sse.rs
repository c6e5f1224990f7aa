//! server-sent event decoding and firebase tree updates.
//!
//! the firebase REST streaming api sends `put` and `patch` events relative
//! to the subscribed path. we keep a local copy of the whole subtree and
//! apply each event to it, so listeners always see a full snapshot.

use serde::Deserialize;
use serde_json::{Map, Value};

/// one decoded `event:`/`data:` block
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// incremental decoder; chunks may split lines and events anywhere
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// feed raw bytes, returning every event they complete
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(ev) = self.finish_event() {
                    out.push(ev);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }
        out
    }

    fn finish_event(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if event.is_none() && self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

/// firebase streaming events we act on
#[derive(Clone, Debug, PartialEq)]
pub enum FirebaseEvent {
    Put { path: String, data: Value },
    Patch { path: String, data: Value },
    KeepAlive,
    Cancel(String),
    AuthRevoked,
    Unknown(String),
}

#[derive(Deserialize)]
struct PathData {
    path: String,
    #[serde(default)]
    data: Value,
}

impl FirebaseEvent {
    pub fn parse(ev: &SseEvent) -> anyhow::Result<Self> {
        Ok(match ev.event.as_str() {
            "put" => {
                let pd: PathData = serde_json::from_str(&ev.data)?;
                FirebaseEvent::Put { path: pd.path, data: pd.data }
            }
            "patch" => {
                let pd: PathData = serde_json::from_str(&ev.data)?;
                FirebaseEvent::Patch { path: pd.path, data: pd.data }
            }
            "keep-alive" => FirebaseEvent::KeepAlive,
            "cancel" => FirebaseEvent::Cancel(ev.data.trim_matches('"').to_string()),
            "auth_revoked" => FirebaseEvent::AuthRevoked,
            other => FirebaseEvent::Unknown(other.to_string()),
        })
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// set `data` at `path` inside `tree`; null removes the key
pub fn apply_put(tree: &mut Value, path: &str, data: Value) {
    let segs = segments(path);
    let Some((last, parents)) = segs.split_last() else {
        *tree = data;
        return;
    };

    let mut node = tree;
    for seg in parents {
        if !node.is_object() {
            if data.is_null() {
                return;
            }
            *node = Value::Object(Map::new());
        }
        node = match node {
            Value::Object(map) => map
                .entry(seg.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            _ => return,
        };
    }

    if data.is_null() {
        if let Value::Object(map) = node {
            map.remove(*last);
        }
        return;
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        map.insert(last.to_string(), data);
    }
}

/// merge each child of `data` at `path`, as a firebase `update()` does
pub fn apply_patch(tree: &mut Value, path: &str, data: Value) {
    let Value::Object(children) = data else {
        apply_put(tree, path, data);
        return;
    };
    let base = path.trim_end_matches('/');
    for (key, value) in children {
        apply_put(tree, &format!("{}/{}", base, key), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_events_across_chunks() {
        let mut dec = SseDecoder::new();
        assert!(dec.push(b"event: put\nda").is_empty());
        let evs = dec.push(
            b"ta: {\"path\":\"/\",\"data\":42}\r\n\r\nevent: keep-alive\ndata: null\n\n",
        );
        assert_eq!(evs.len(), 2);
        assert_eq!(evs[0].event, "put");
        assert_eq!(evs[0].data, "{\"path\":\"/\",\"data\":42}");
        assert_eq!(FirebaseEvent::parse(&evs[1]).unwrap(), FirebaseEvent::KeepAlive);
    }

    #[test]
    fn comments_and_blank_runs_are_skipped() {
        let mut dec = SseDecoder::new();
        let evs = dec.push(b": hello\n\n\nevent: put\ndata: {\"path\":\"/\",\"data\":null}\n\n");
        assert_eq!(evs.len(), 1);
        let parsed = FirebaseEvent::parse(&evs[0]).unwrap();
        assert_eq!(parsed, FirebaseEvent::Put { path: "/".into(), data: Value::Null });
    }

    #[test]
    fn put_at_root_replaces_tree() {
        let mut tree = json!({"old": 1});
        apply_put(&mut tree, "/", json!({"value": 500, "smokeFlag": 0}));
        assert_eq!(tree, json!({"value": 500, "smokeFlag": 0}));
    }

    #[test]
    fn put_at_child_path() {
        let mut tree = Value::Null;
        apply_put(&mut tree, "/main/current/gas", json!(321));
        assert_eq!(tree, json!({"main": {"current": {"gas": 321}}}));
        apply_put(&mut tree, "/main/current/gas", Value::Null);
        assert_eq!(tree, json!({"main": {"current": {}}}));
    }

    #[test]
    fn patch_merges_children() {
        let mut tree = json!({"value": 100, "smokeFlag": 0});
        apply_patch(&mut tree, "/", json!({"value": 900, "smokeFlag": 1}));
        assert_eq!(tree, json!({"value": 900, "smokeFlag": 1}));

        let mut reg = json!({"a": {"info": {"name": "A"}}});
        apply_patch(&mut reg, "/b", json!({"info": {"name": "B"}}));
        assert_eq!(reg["b"]["info"]["name"], "B");
        assert_eq!(reg["a"]["info"]["name"], "A");
    }

    #[test]
    fn cancel_carries_reason() {
        let ev = SseEvent { event: "cancel".into(), data: "\"permission denied\"".into() };
        assert_eq!(
            FirebaseEvent::parse(&ev).unwrap(),
            FirebaseEvent::Cancel("permission denied".into())
        );
    }
}
