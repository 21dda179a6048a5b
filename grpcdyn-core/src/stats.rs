//! # Call statistics
//!
//! Two kinds of instrumentation are produced for every RPC:
//!
//! * A [`Sample`] of the call duration, pushed to a [`SampleSink`] exactly once per
//!   invocation attempt by a [`CallMeasurement`] guard.
//! * Optional [`StatEvent`]s describing what went over the wire, rendered by
//!   [`format_stat`] for debugging.
use crate::grpc::metadata::to_string_map;
use prost_reflect::DynamicMessage;
use prost_reflect::text_format::FormatOptions;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::mpsc;
use tonic::Code;
use tonic::metadata::MetadataMap;

/// Name of the request duration metric.
pub const GRPC_REQ_DURATION: &str = "grpc_req_duration";

/// One metric observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub metric: &'static str,
    pub value: Duration,
    pub time: SystemTime,
    pub tags: BTreeMap<String, String>,
}

impl Sample {
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags.get(name).map(String::as_str)
    }
}

/// Destination of metric samples, provided by the host.
pub trait SampleSink: Send + Sync {
    fn push(&self, sample: Sample);
}

impl SampleSink for mpsc::UnboundedSender<Sample> {
    fn push(&self, sample: Sample) {
        // A closed receiver means the host stopped collecting.
        let _ = self.send(sample);
    }
}

/// A sink that drops every sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct Discard;

impl SampleSink for Discard {
    fn push(&self, _sample: Sample) {}
}

/// Times one invocation and emits its sample when dropped.
///
/// The guard is created once the call is known to be well-formed, so every exit path
/// after that point, including cancellation of the surrounding future, produces exactly
/// one sample. A call that never recorded a status is reported as `UNKNOWN`.
pub(crate) struct CallMeasurement {
    sink: Arc<dyn SampleSink>,
    started: Instant,
    time: SystemTime,
    tags: BTreeMap<String, String>,
    status: Code,
}

impl CallMeasurement {
    pub(crate) fn start(
        sink: Arc<dyn SampleSink>,
        address: &str,
        method: &str,
        extra_tags: &BTreeMap<String, String>,
    ) -> Self {
        let mut tags = extra_tags.clone();
        tags.insert("method".to_string(), method.to_string());
        tags.insert("url".to_string(), format!("{address}{method}"));

        Self {
            sink,
            started: Instant::now(),
            time: SystemTime::now(),
            tags,
            status: Code::Unknown,
        }
    }

    pub(crate) fn set_status(&mut self, status: Code) {
        self.status = status;
    }
}

impl Drop for CallMeasurement {
    fn drop(&mut self) {
        let mut tags = std::mem::take(&mut self.tags);
        tags.insert("status".to_string(), (self.status as i32).to_string());

        self.sink.push(Sample {
            metric: GRPC_REQ_DURATION,
            value: self.started.elapsed(),
            time: self.time,
            tags,
        });
    }
}

/// How much of each exchange the debug output shows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Verbosity {
    /// Headers and trailers only.
    #[default]
    Headers,
    /// Headers, trailers and message payloads.
    Full,
}

impl FromStr for Verbosity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "headers" => Ok(Verbosity::Headers),
            "full" => Ok(Verbosity::Full),
            other => Err(format!("unknown debug verbosity {other:?}")),
        }
    }
}

/// Something observed during an RPC.
#[derive(Debug)]
pub enum StatEvent<'a> {
    OutHeader {
        full_method: &'a str,
        remote_addr: &'a str,
        metadata: &'a MetadataMap,
    },
    OutTrailer {
        metadata: &'a MetadataMap,
    },
    OutPayload {
        message: &'a DynamicMessage,
        wire_length: usize,
    },
    InHeader {
        metadata: &'a MetadataMap,
    },
    InTrailer {
        metadata: &'a MetadataMap,
    },
    InPayload {
        message: &'a DynamicMessage,
        wire_length: usize,
    },
}

/// Renders an event as a labeled text block.
///
/// Returns `None` when there is nothing worth showing: payloads below
/// [`Verbosity::Full`] and empty header or trailer sets. The outgoing header block is
/// always rendered since it names the method.
pub fn format_stat(event: &StatEvent<'_>, verbosity: Verbosity) -> Option<String> {
    let mut out = String::new();

    match event {
        StatEvent::OutHeader {
            full_method,
            remote_addr,
            metadata,
        } => {
            let _ = writeln!(out, "Out Header:");
            let _ = writeln!(out, "Full Method: {full_method}");
            let _ = writeln!(out, "Remote Address: {remote_addr}");
            write_metadata(&mut out, metadata);
        }
        StatEvent::OutTrailer { metadata } => {
            if metadata.is_empty() {
                return None;
            }
            let _ = writeln!(out, "Out Trailer:");
            write_metadata(&mut out, metadata);
        }
        StatEvent::OutPayload {
            message,
            wire_length,
        } => {
            if verbosity != Verbosity::Full {
                return None;
            }
            let _ = writeln!(out, "Out Payload:");
            let _ = writeln!(out, "Wire Length: {wire_length}");
            write_payload(&mut out, message);
        }
        StatEvent::InHeader { metadata } => {
            if metadata.is_empty() {
                return None;
            }
            let _ = writeln!(out, "In Header:");
            write_metadata(&mut out, metadata);
        }
        StatEvent::InTrailer { metadata } => {
            if metadata.is_empty() {
                return None;
            }
            let _ = writeln!(out, "In Trailer:");
            write_metadata(&mut out, metadata);
        }
        StatEvent::InPayload {
            message,
            wire_length,
        } => {
            if verbosity != Verbosity::Full {
                return None;
            }
            let _ = writeln!(out, "In Payload:");
            let _ = writeln!(out, "Wire Length: {wire_length}");
            write_payload(&mut out, message);
        }
    }

    Some(out)
}

fn write_metadata(out: &mut String, metadata: &MetadataMap) {
    for (key, values) in to_string_map(metadata) {
        for value in values {
            let _ = writeln!(out, "{key}: {value}");
        }
    }
}

fn write_payload(out: &mut String, message: &DynamicMessage) {
    let text = message.to_text_format_with_options(&FormatOptions::new().pretty(true));
    let _ = writeln!(out, "{text}");
}
