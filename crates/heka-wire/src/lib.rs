//! # heka-wire
//!
//! The Heka binary message codec: growable byte buffers with a hard
//! ceiling, the protobuf-style varint/wire-type codec, the in-memory
//! [`Message`] model with zero-copy field decoding, and the stream framer
//! that locates the next framed record in a byte stream and resyncs on
//! corruption.

pub mod buf;
pub mod framer;
pub mod message;
pub mod protobuf;

pub use buf::{ExpandResult, InputBuffer, OutputBuffer};
pub use framer::{find_message, FindResult};
pub use message::{
    encode, DecodeError, Field, FieldInput, FieldValue, FieldValueInput, Message, MessageInput,
    ValueType, PID_UNSET, SEVERITY_DEFAULT,
};
