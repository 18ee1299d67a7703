//! Binary encoding of net messages and an in-memory message boundary.

use std::marker::PhantomData;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::messages::{ClientMessage, ServerMessage};
use crate::error::CodecError;

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(message).map_err(CodecError::Encode)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    bincode::deserialize(bytes).map_err(CodecError::Decode)
}

/// One end of a bidirectional byte channel that sends `Out` and receives `In`
pub struct MessageChannel<Out, In> {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    _marker: PhantomData<fn(Out) -> In>,
}

/// Client end (sends [`ServerMessage`]) and server end (sends [`ClientMessage`])
pub fn channel_pair() -> (
    MessageChannel<ServerMessage, ClientMessage>,
    MessageChannel<ClientMessage, ServerMessage>,
) {
    let (to_server, from_client) = mpsc::channel();
    let (to_client, from_server) = mpsc::channel();
    (
        MessageChannel {
            tx: to_server,
            rx: from_server,
            _marker: PhantomData,
        },
        MessageChannel {
            tx: to_client,
            rx: from_client,
            _marker: PhantomData,
        },
    )
}

impl<Out: Serialize, In: DeserializeOwned> MessageChannel<Out, In> {
    /// Encodes and sends; returns the encoded size in bytes
    pub fn send(&self, message: &Out) -> Result<usize, CodecError> {
        let bytes = encode(message)?;
        let len = bytes.len();
        self.tx.send(bytes).map_err(|_| CodecError::Disconnected)?;
        Ok(len)
    }

    pub fn try_recv(&self) -> Result<Option<In>, CodecError> {
        match self.rx.try_recv() {
            Ok(bytes) => decode(&bytes).map(Some),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(CodecError::Disconnected),
        }
    }

    /// Everything queued right now. Undecodable payloads are logged and skipped.
    pub fn drain(&self) -> Vec<In> {
        let mut out = Vec::new();
        loop {
            match self.try_recv() {
                Ok(Some(message)) => out.push(message),
                Ok(None) | Err(CodecError::Disconnected) => break,
                Err(err) => tracing::warn!(%err, "dropping undecodable message"),
            }
        }
        out
    }
}
