//! The simulator side of the bridge: the value model and the client
//! contract the session consumes.
//!
//! The concrete client (an X-Plane web API connection, for instance) lives
//! outside this crate; tests supply mock implementations.

use tokio::sync::mpsc;

/// Errors surfaced by a simulator client.
#[derive(Clone, Debug, thiserror::Error)]
pub enum SimulatorError {
    #[error("simulator is unreachable")]
    Unreachable,

    #[error("simulator connection closed")]
    Closed,

    #[error("simulator rejected {name}: {reason}")]
    Rejected { name: String, reason: String },
}

/// A simulator variable value.
///
/// Byte strings arrive when the simulator exposes raw character buffers;
/// [`decode_text`] turns them into text where possible, and consumers must
/// tolerate the raw-bytes fallback.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Whether the value switches an indicator on.
    pub fn is_on(&self) -> bool {
        matches!(self, Value::Number(n) if *n != 0.0)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_owned())
    }
}

/// Decode a byte-string value into text.
///
/// The aircraft-declared encoding wins when it decodes cleanly; otherwise
/// the bytes go through best-effort charset detection. Detection below a
/// 0.2 confidence floor returns `None`, and the caller keeps the raw
/// bytes. NUL padding is stripped either way.
pub fn decode_text(raw: &[u8], declared: Option<&str>) -> Option<String> {
    if let Some(label) = declared {
        if let Some(encoding) = encoding_rs::Encoding::for_label(label.as_bytes()) {
            let (text, _, had_errors) = encoding.decode(raw);
            if !had_errors {
                return Some(strip_nuls(&text));
            }
            tracing::debug!(label, "declared encoding failed, falling back to detection");
        }
        else {
            tracing::warn!(label, "unknown declared encoding");
        }
    }

    let (charset, confidence, _language) = chardet::detect(raw);
    if confidence < 0.2 {
        return None;
    }
    let encoding = encoding_rs::Encoding::for_label(chardet::charset2encoding(&charset).as_bytes())?;
    let (text, _, had_errors) = encoding.decode(raw);
    if had_errors {
        return None;
    }
    Some(strip_nuls(&text))
}

fn strip_nuls(text: &str) -> String {
    text.replace('\u{0}', "")
}

/// What the simulator pushes at the bridge.
///
/// The client's callback mechanism is modeled as a channel, wired at the
/// composition root.
#[derive(Clone, Debug, PartialEq)]
pub enum SimulatorEvent {
    ValueUpdated { name: String, value: Value },
    ConnectionClosed,
}

/// Sender half handed to a simulator client implementation.
pub type SimulatorEventSender = mpsc::UnboundedSender<SimulatorEvent>;

/// Receiver half handed to [`Session::run`][crate::session::Session::run].
pub type SimulatorEventReceiver = mpsc::UnboundedReceiver<SimulatorEvent>;

/// Contract the bridge consumes from the simulator's web API.
///
/// Implementations are cheaply cloneable handles onto one connection. The
/// readiness state machine resolves transient failures (unreachable,
/// missing data) by polling, so these methods should report state rather
/// than retry internally.
pub trait SimulatorClient: Clone + Send + Sync + 'static {
    /// Kick off (or re-kick) connection establishment. Idempotent.
    fn connect(&self) -> impl Future<Output = Result<(), SimulatorError>> + Send;

    fn disconnect(&self) -> impl Future<Output = Result<(), SimulatorError>> + Send;

    fn connected(&self) -> bool;

    /// Subscribe to value updates for `names`.
    fn monitor(
        &self,
        names: &[String],
        reason: &str,
    ) -> impl Future<Output = Result<(), SimulatorError>> + Send;

    fn unmonitor(
        &self,
        names: &[String],
        reason: &str,
    ) -> impl Future<Output = Result<(), SimulatorError>> + Send;

    fn get_value(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<Value>, SimulatorError>> + Send;

    fn set_value(
        &self,
        name: &str,
        value: Value,
    ) -> impl Future<Output = Result<(), SimulatorError>> + Send;

    fn execute_command(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<(), SimulatorError>> + Send;

    /// Refresh the client's variable metadata caches.
    fn reload_caches(&self, force: bool) -> impl Future<Output = Result<(), SimulatorError>> + Send;

    /// Whether variable metadata is available yet.
    fn has_data(&self) -> bool;
}
