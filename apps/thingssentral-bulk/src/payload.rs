//! SendArray envelope, percent-encoding and request URL.
use crate::buffer::Batch;
use serde::Serialize;
use std::fmt::Write;

pub const SEND_ARRAY_PATH: &str = "/SendArray";
pub const DATA_PARAM: &str = "DataToSend";

/// Field order is the wire order.
#[derive(Debug, Serialize)]
struct SendArrayEnvelope<'a> {
    nodeid: &'a str,
    data: &'a [f32],
    datetime: &'a [String],
}

/// Compact JSON for one batch: `{"nodeid":..,"data":[..],"datetime":[..]}`.
pub fn encode_send_array_payload(node_id: &str, batch: &Batch) -> serde_json::Result<String> {
    let envelope = SendArrayEnvelope {
        nodeid: node_id,
        data: batch.values(),
        datetime: batch.timestamps(),
    };
    serde_json::to_string(&envelope)
}

/// Percent-encodes every byte outside `[A-Za-z0-9-_.~]`. Space becomes `%20`, never `+`.
pub fn percent_encode(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len() * 3);
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            _ => {
                let _ = write!(encoded, "%{byte:02X}");
            }
        }
    }
    encoded
}

pub fn send_array_url(server_url: &str, encoded_payload: &str) -> String {
    format!(
        "{}{}?{}={}",
        server_url.trim_end_matches('/'),
        SEND_ARRAY_PATH,
        DATA_PARAM,
        encoded_payload
    )
}
