use anyhow::{Context, Result};
use reqwest::blocking::{Client, Response};
use serde_json::{json, Value};
use std::time::Duration;

use syncgate_core::error::RemoteError;
use syncgate_core::remote::{RemoteStore, UploadSession};

const RPC_BASE: &str = "https://api.dropboxapi.com/2";
const CONTENT_BASE: &str = "https://content.dropboxapi.com/2";

/// Remote store backed by the Dropbox HTTP API v2. The access token is taken as
/// given; obtaining it is outside this tool.
pub struct DropboxHttp {
    client: Client,
    token: String,
}

impl DropboxHttp {
    pub fn new(token: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(900))
            .build()
            .context("build HTTP client")?;
        Ok(Self { client, token })
    }

    fn rpc(&self, endpoint: &str, body: Value, path: &str) -> Result<Value, RemoteError> {
        tracing::debug!(endpoint, path, "rpc");
        let resp = self
            .client
            .post(format!("{RPC_BASE}/{endpoint}"))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        read_json(resp, path)
    }

    fn content(
        &self,
        endpoint: &str,
        arg: Value,
        data: &[u8],
        path: &str,
    ) -> Result<Value, RemoteError> {
        tracing::debug!(endpoint, path, bytes = data.len(), "content upload");
        let resp = self
            .client
            .post(format!("{CONTENT_BASE}/{endpoint}"))
            .bearer_auth(&self.token)
            .header("Dropbox-API-Arg", header_safe_json(&arg))
            .header("Content-Type", "application/octet-stream")
            .body(data.to_vec())
            .send()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        read_json(resp, path)
    }
}

fn read_json(resp: Response, path: &str) -> Result<Value, RemoteError> {
    let status = resp.status();
    let text = resp.text().map_err(|e| RemoteError::Transport(e.to_string()))?;
    if status.is_success() {
        if text.trim().is_empty() || text.trim() == "null" {
            return Ok(Value::Null);
        }
        return serde_json::from_str(&text).map_err(|e| RemoteError::Transport(e.to_string()));
    }
    let summary = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|v| v.get("error_summary").and_then(Value::as_str).map(str::to_string))
        .unwrap_or(text);
    // Endpoint errors come back as 409 with a path-like summary.
    if status.as_u16() == 409 {
        if summary.contains("/conflict") {
            return Err(RemoteError::AlreadyExists(path.to_string()));
        }
        if summary.contains("not_found") {
            return Err(RemoteError::NotFound(path.to_string()));
        }
    }
    Err(RemoteError::Api { status: status.as_u16(), summary })
}

/// `Dropbox-API-Arg` must be pure ASCII: escape everything else as `\uXXXX`.
fn header_safe_json(v: &Value) -> String {
    let raw = v.to_string();
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for u in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", u));
            }
        }
    }
    out
}

fn cursor(s: &UploadSession) -> Value {
    json!({ "session_id": s.session_id, "offset": s.cursor_offset })
}

impl RemoteStore for DropboxHttp {
    fn create_folder(&self, path: &str) -> Result<(), RemoteError> {
        self.rpc("files/create_folder_v2", json!({ "path": path, "autorename": false }), path)?;
        Ok(())
    }

    fn exists(&self, path: &str) -> Result<bool, RemoteError> {
        match self.rpc("files/get_metadata", json!({ "path": path }), path) {
            Ok(_) => Ok(true),
            Err(RemoteError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn upload(&self, data: &[u8], path: &str) -> Result<(), RemoteError> {
        self.content("files/upload", json!({ "path": path, "mode": "add" }), data, path)?;
        Ok(())
    }

    fn session_start(&self, chunk: &[u8]) -> Result<String, RemoteError> {
        let v = self.content("files/upload_session/start", json!({ "close": false }), chunk, "")?;
        v.get("session_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RemoteError::Transport("upload session start: no session_id".into()))
    }

    fn session_append(&self, chunk: &[u8], session: &UploadSession) -> Result<(), RemoteError> {
        let arg = json!({ "cursor": cursor(session), "close": false });
        self.content("files/upload_session/append_v2", arg, chunk, &session.remote_path)?;
        Ok(())
    }

    fn session_finish(&self, chunk: &[u8], session: &UploadSession) -> Result<(), RemoteError> {
        let arg = json!({
            "cursor": cursor(session),
            "commit": { "path": session.remote_path, "mode": "add" },
        });
        self.content("files/upload_session/finish", arg, chunk, &session.remote_path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_arg_escapes_non_ascii() {
        let v = json!({ "path": "/Données/été.bin" });
        let s = header_safe_json(&v);
        assert!(s.is_ascii());
        assert!(s.contains("\\u00e9"));
        let back: Value = serde_json::from_str(&s).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn header_arg_escapes_astral_as_surrogates() {
        let v = json!({ "path": "/a😀" });
        let s = header_safe_json(&v);
        assert!(s.contains("\\ud83d\\ude00"));
        let back: Value = serde_json::from_str(&s).unwrap();
        assert_eq!(back, v);
    }
}
