use ciborium::Value;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use hyperion_types::LogRecord;

use crate::{Error, HEADER_LEN, MAX_FRAME_SIZE};

/// The payload of one frame: an action name with positional arguments, or a
/// log record when `action` is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub action: Option<String>,
    pub args: Vec<Value>,
}

impl Envelope {
    /// Build an action envelope.
    pub fn request(action: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            action: Some(action.into()),
            args,
        }
    }

    /// Build a log-record envelope, the actionless frame slaves use to ship
    /// their logging output to the master.
    pub fn log(record: &LogRecord) -> Result<Self, Error> {
        Ok(Self {
            action: None,
            args: vec![to_value(record)?],
        })
    }

    /// Whether this envelope carries a log record instead of an action.
    pub fn is_log_record(&self) -> bool {
        self.action.is_none()
    }

    /// Extract the log record of an actionless envelope.
    pub fn log_record(&self) -> Result<LogRecord, Error> {
        arg(&self.args, 0)
    }
}

/// Serialize an envelope into a complete frame, length header included.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, Error> {
    let mut payload = Vec::new();
    ciborium::into_writer(envelope, &mut payload)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(Error::OversizedFrame(payload.len()));
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);

    Ok(frame)
}

/// Serialize an action with its arguments into a complete frame.
pub fn encode_request(action: &str, args: Vec<Value>) -> Result<Vec<u8>, Error> {
    encode(&Envelope::request(action, args))
}

/// Convert a typed value into a wire value.
pub fn to_value<T: Serialize>(value: &T) -> Result<Value, Error> {
    Ok(Value::serialized(value)?)
}

/// Convert a wire value back into its typed form.
pub fn from_value<T: DeserializeOwned>(value: &Value) -> Result<T, Error> {
    Ok(value.deserialized()?)
}

/// Extract the positional argument at `index`.
pub fn arg<T: DeserializeOwned>(args: &[Value], index: usize) -> Result<T, Error> {
    let value = args.get(index).ok_or(Error::MissingArg(index))?;
    from_value(value)
}

/// Extract the positional argument at `index`, if present.
pub fn opt_arg<T: DeserializeOwned>(args: &[Value], index: usize) -> Result<Option<T>, Error> {
    match args.get(index) {
        Some(value) => Ok(Some(from_value(value)?)),
        None => Ok(None),
    }
}
