//! # Dynamic Protobuf Codec
//!
//! This module implements `tonic::codec::Codec` for `prost_reflect::DynamicMessage`, so that
//! `tonic` can transport messages whose types are only known at runtime.
//!
//! ## How it works
//!
//! 1. **Encoder**: writes an already-built `DynamicMessage` into the gRPC byte buffer.
//! 2. **Decoder**: reads raw bytes from the wire and merges them into a fresh `DynamicMessage`
//!    of the output type. When a receive limit is configured, oversized frames are rejected
//!    with `RESOURCE_EXHAUSTED` before being decoded.
use prost::Message;
use prost::bytes::Buf;
use prost_reflect::{DynamicMessage, MessageDescriptor, ReflectMessage};
use tonic::{
    Status,
    codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder},
};

/// A Codec exchanging `DynamicMessage`s.
///
/// It holds the descriptors (schemas) for both the request and the response messages.
pub struct DynamicCodec {
    /// Schema for the input message.
    req_desc: MessageDescriptor,
    /// Schema for the output message.
    res_desc: MessageDescriptor,
    /// Largest accepted response message, in bytes.
    max_receive: Option<usize>,
}

impl DynamicCodec {
    /// Creates a new `DynamicCodec`.
    ///
    /// # Arguments
    /// * `req_desc` - Descriptor for the request message type.
    /// * `res_desc` - Descriptor for the response message type.
    /// * `max_receive` - Largest accepted response message, `None` for the transport default.
    pub fn new(
        req_desc: MessageDescriptor,
        res_desc: MessageDescriptor,
        max_receive: Option<usize>,
    ) -> Self {
        Self {
            req_desc,
            res_desc,
            max_receive,
        }
    }
}

impl Codec for DynamicCodec {
    type Encode = DynamicMessage;
    type Decode = DynamicMessage;

    type Encoder = DynamicEncoder;
    type Decoder = DynamicDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        DynamicEncoder(self.req_desc.clone())
    }

    fn decoder(&mut self) -> Self::Decoder {
        DynamicDecoder {
            descriptor: self.res_desc.clone(),
            max_receive: self.max_receive,
        }
    }
}

/// Responsible for encoding a `DynamicMessage` into Protobuf bytes.
pub struct DynamicEncoder(MessageDescriptor);

impl Encoder for DynamicEncoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        if item.descriptor() != self.0 {
            return Err(Status::internal(format!(
                "expected a {} message, got {}",
                self.0.full_name(),
                item.descriptor().full_name()
            )));
        }

        item.encode_raw(dst);
        Ok(())
    }
}

/// Responsible for decoding Protobuf bytes into a `DynamicMessage`.
pub struct DynamicDecoder {
    descriptor: MessageDescriptor,
    max_receive: Option<usize>,
}

impl Decoder for DynamicDecoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let len = src.remaining();
        if let Some(max) = self.max_receive
            && len > max
        {
            return Err(Status::resource_exhausted(format!(
                "grpc: received message larger than max ({len} vs. {max})"
            )));
        }

        let mut msg = DynamicMessage::new(self.descriptor.clone());
        msg.merge(src)
            .map_err(|e| Status::internal(format!("Failed to decode Protobuf bytes: {e}")))?;

        Ok(Some(msg))
    }
}
