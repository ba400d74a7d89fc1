//! Frame codec over a [`Link`].

use prost::Message;

use crate::class::FailureClass;
use crate::messages::Frame;
use crate::radio::{Link, RadioError};

/// Largest frame accepted from a peer.
pub const MAX_FRAME_LEN: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error(transparent)]
    Radio(#[from] RadioError),

    #[error("Malformed frame: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("Frame too large: {0} bytes")]
    TooLarge(usize),

    #[error("Frame has no payload")]
    Empty,
}

impl CodecError {
    pub const fn class(&self) -> FailureClass {
        match self {
            Self::Radio(_) => FailureClass::Transport,
            Self::Decode(_) | Self::TooLarge(_) | Self::Empty => FailureClass::Protocol,
        }
    }
}

pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    frame.encode_to_vec()
}

pub fn decode_frame(bytes: &[u8]) -> Result<Frame, CodecError> {
    if bytes.len() > MAX_FRAME_LEN {
        return Err(CodecError::TooLarge(bytes.len()));
    }
    let frame = Frame::decode(bytes)?;
    if frame.kind.is_none() {
        return Err(CodecError::Empty);
    }
    Ok(frame)
}

pub async fn send_frame<L: Link + ?Sized>(
    link: &L,
    frame: impl Into<Frame> + Send,
) -> Result<(), RadioError> {
    let frame = frame.into();
    tracing::debug!(peer = link.peer(), kind = frame.kind_name(), "Sending frame");
    link.send(encode_frame(&frame)).await
}

pub async fn recv_frame<L: Link + ?Sized>(link: &mut L) -> Result<Frame, CodecError> {
    let bytes = link.recv().await?;
    let frame = decode_frame(&bytes)?;
    tracing::debug!(peer = link.peer(), kind = frame.kind_name(), "Received frame");
    Ok(frame)
}
