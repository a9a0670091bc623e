// Shared fixtures for session tests: a map-backed host runtime and a
// client-side DBGP framing helper over an in-memory pipe.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use dbgp_engine::object::Scalar;
use dbgp_engine::protocol::encode_base64;
use dbgp_engine::{HostError, HostObject, HostValue, ObjectRef, PropertyId, ScriptHost, StackFrame};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

/// Route engine logs through the test harness. Set RUST_LOG to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Plain script object with insertion-ordered members
#[derive(Debug, Default)]
pub struct MapObject {
    members: Mutex<Vec<(PropertyId, HostValue)>>,
}

impl MapObject {
    pub fn new(members: Vec<(&str, HostValue)>) -> Arc<Self> {
        Arc::new(Self {
            members: Mutex::new(
                members
                    .into_iter()
                    .map(|(name, value)| (PropertyId::from(name), value))
                    .collect(),
            ),
        })
    }
}

impl HostObject for MapObject {
    fn class_name(&self) -> String {
        "Object".to_string()
    }

    fn ids(&self) -> Result<Vec<PropertyId>, HostError> {
        Ok(self.members.lock().iter().map(|(id, _)| id.clone()).collect())
    }

    fn get(&self, id: &PropertyId) -> Result<HostValue, HostError> {
        Ok(self
            .members
            .lock()
            .iter()
            .find(|(key, _)| key == id)
            .map(|(_, value)| value.clone())
            .unwrap_or(HostValue::Scalar(Scalar::NotFound)))
    }

    fn set(&self, id: &PropertyId, value: HostValue) -> Result<(), HostError> {
        let mut members = self.members.lock();
        match members.iter_mut().find(|(key, _)| key == id) {
            Some(entry) => entry.1 = value,
            None => members.push((id.clone(), value)),
        }
        Ok(())
    }

    fn display_string(&self) -> Result<String, HostError> {
        Ok("[object Object]".to_string())
    }
}

/// Evaluates numbers and names visible in the frame scope or the globals
pub struct FakeHost {
    pub globals: ObjectRef,
}

impl FakeHost {
    pub fn new(globals: ObjectRef) -> Arc<Self> {
        Arc::new(Self { globals })
    }
}

impl ScriptHost for FakeHost {
    fn evaluate(&self, expression: &str, frame: Option<&StackFrame>) -> Result<HostValue, HostError> {
        let expression = expression.trim();
        if let Ok(number) = expression.parse::<f64>() {
            return Ok(HostValue::number(number));
        }
        let id = PropertyId::from(expression);
        let scopes = frame
            .and_then(|f| f.scope.clone())
            .into_iter()
            .chain(std::iter::once(self.globals.clone()));
        for scope in scopes {
            let value = scope.get(&id)?;
            if !matches!(value, HostValue::Scalar(Scalar::NotFound)) {
                return Ok(value);
            }
        }
        Err(HostError::new(
            "ReferenceError",
            format!("{} is not defined", expression),
        ))
    }

    fn global_scope(&self) -> Option<ObjectRef> {
        Some(self.globals.clone())
    }
}

/// IDE side of the pipe
pub struct Client<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> Client<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    pub async fn send(&mut self, command: &str) {
        self.writer.write_all(command.as_bytes()).await.unwrap();
        self.writer.write_all(&[0]).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    pub async fn send_with_data(&mut self, command: &str, data: &str) {
        self.send(&format!("{} -- {}", command, encode_base64(data))).await;
    }

    /// Next framed message, failing the test after a few seconds
    pub async fn recv(&mut self) -> String {
        timeout(Duration::from_secs(5), self.read_message())
            .await
            .expect("timed out waiting for a message")
    }

    /// `None` once the engine has closed its side
    pub async fn try_recv(&mut self) -> Option<String> {
        timeout(Duration::from_secs(5), self.read_frame())
            .await
            .expect("timed out waiting for the engine")
    }

    async fn read_message(&mut self) -> String {
        self.read_frame().await.expect("connection closed")
    }

    async fn read_frame(&mut self) -> Option<String> {
        let mut length = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            if self.reader.read(&mut byte).await.ok()? == 0 {
                return None;
            }
            if byte[0] == 0 {
                break;
            }
            length.push(byte[0]);
        }
        let length: usize = String::from_utf8(length).ok()?.parse().ok()?;

        let mut body = vec![0u8; length + 1];
        self.reader.read_exact(&mut body).await.ok()?;
        assert_eq!(body.pop(), Some(0), "message not NUL terminated");
        String::from_utf8(body).ok()
    }
}

/// Value of `name="..."` in the first element of `xml` carrying that attribute
pub fn attribute<'a>(xml: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!(" {}=\"", name);
    let start = xml.find(&needle)? + needle.len();
    let end = xml[start..].find('"')? + start;
    Some(&xml[start..end])
}
