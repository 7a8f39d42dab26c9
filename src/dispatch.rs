//! Turns an operation name and a payload into exactly one register write.

use tracing::{debug, error, trace};

use crate::registers::{EncodeError, FunctionCode, Model, Payload, Value};

pub const UNSUPPORTED: &str = "Not supported for this model";

/// Details a transport reports about a failed request. Every field is best effort.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportFault {
    /// The exception PDU as received, if there was one.
    pub raw: Option<Vec<u8>>,
    pub function_code: Option<u8>,
    pub text: Option<String>,
}

impl TransportFault {
    pub fn with_text(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), ..Self::default() }
    }
}

impl std::fmt::Display for TransportFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut separator = "";
        if let Some(code) = self.function_code {
            write!(f, "function code: {code:#04x}")?;
            separator = ", ";
        }
        if let Some(raw) = &self.raw {
            write!(f, "{separator}encoded: {raw:02x?}")?;
            separator = ", ";
        }
        match &self.text {
            Some(text) => write!(f, "{separator}error string: {text}"),
            None if separator.is_empty() => f.write_str("unknown transport failure"),
            None => Ok(()),
        }
    }
}

impl std::error::Error for TransportFault {}

/// The Modbus client the dispatcher writes through.
///
/// On success a transport may hand back register words echoed by the device.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn write_single_register(
        &mut self,
        address: u16,
        value: u16,
        unit_id: u8,
    ) -> Result<Option<Vec<u16>>, TransportFault>;

    async fn write_multiple_registers(
        &mut self,
        address: u16,
        values: &[u16],
        unit_id: u8,
    ) -> Result<Option<Vec<u16>>, TransportFault>;
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("missing payload for `{0}`")]
    MissingPayload(&'static str),
    #[error("invalid payload for `{1}`")]
    Encode(#[source] EncodeError, &'static str),
    #[error("got an error back when requesting `{1}`")]
    Transport(#[source] TransportFault, &'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub value: Option<Value>,
    pub info_text: &'static str,
}

pub struct Dispatcher<T> {
    model: &'static Model,
    transport: T,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(model: &'static Model, transport: T) -> Self {
        Self { model, transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Write `payload` to the registers behind `operation` on the device `unit_id`.
    ///
    /// Operations the model does not know about are not an error: they produce an empty reply
    /// without touching the transport.
    pub async fn execute(
        &mut self,
        operation: &str,
        payload: Option<&Payload>,
        unit_id: u8,
    ) -> Result<Reply, Error> {
        let Some(entry) = self.model.entry(operation) else {
            debug!(message = "operation not in register map", operation, model = self.model.name);
            return Ok(Reply { value: None, info_text: UNSUPPORTED });
        };
        let payload = payload.ok_or(Error::MissingPayload(entry.name))?;
        let words = entry.encode(payload).map_err(|e| Error::Encode(e, entry.name))?;
        debug!(
            message = "dispatching",
            operation = entry.name,
            function_code = entry.function_code.code(),
            address = entry.address,
            unit_id,
            %payload
        );
        trace!(message = "encoded", ?words);
        let result = match entry.function_code {
            FunctionCode::WriteSingle => {
                self.transport.write_single_register(entry.address, words[0], unit_id).await
            }
            FunctionCode::WriteMultiple => {
                self.transport.write_multiple_registers(entry.address, &words, unit_id).await
            }
        };
        let echoed = result.map_err(|fault| {
            error!(
                message = "request failed",
                operation = entry.name,
                function_code = ?fault.function_code,
                raw = ?fault.raw,
                text = ?fault.text
            );
            Error::Transport(fault, entry.name)
        })?;
        let value = echoed.as_deref().and_then(|words| entry.decode(words));
        Ok(Reply { value, info_text: entry.description })
    }
}
