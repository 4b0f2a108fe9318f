// Wire codec for the proprietary inference-server protocol.
//
// Messages are framed as a 4-byte big-endian length followed by that many
// payload bytes. The codec only frames: control payloads are UTF-8 JSON,
// stream request payloads are opaque byte buffers, and stream response
// payloads are MessagePack-serialized JSON documents. Document decoding
// and the protocol version gate live here so both transports share one
// contract.

use crate::client::error::{ClientError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde_json::Value;

/// Maximum allowed frame payload size to prevent memory exhaustion from a
/// corrupt or hostile length prefix.
pub const MAX_FRAME_SIZE: u32 = 256 * 1024 * 1024; // 256 MiB

/// Oldest server protocol version this client understands.
pub const MIN_PROTOCOL_VERSION: i64 = 4;

/// Length-prefix size in bytes.
pub const PREFIX_SIZE: usize = 4;

/// Encode one frame: big-endian length prefix followed by the payload.
pub fn encode_frame(payload: &[u8], buf: &mut BytesMut) {
    buf.reserve(PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
}

/// Try to split one complete frame payload off the front of `buf`.
///
/// Returns `Ok(None)` when the buffer does not yet hold a full frame, the
/// payload (possibly empty, a zero-length frame is the stream close
/// marker) when it does, and an error when the length prefix is
/// implausible.
pub fn take_frame(buf: &mut BytesMut) -> Result<Option<Bytes>> {
    if buf.len() < PREFIX_SIZE {
        return Ok(None);
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if len > MAX_FRAME_SIZE {
        return Err(ClientError::Parse(format!(
            "frame length {len} exceeds the {MAX_FRAME_SIZE} byte limit"
        )));
    }
    let len = len as usize;
    if buf.len() < PREFIX_SIZE + len {
        return Ok(None);
    }
    buf.advance(PREFIX_SIZE);
    Ok(Some(buf.split_to(len).freeze()))
}

/// Decode a control response payload: UTF-8 JSON object carrying the
/// protocol version tag.
///
/// Fails with [`ClientError::NotSupportedVersion`] when the `VERSION`
/// field is missing or below [`MIN_PROTOCOL_VERSION`].
pub fn decode_control(payload: &[u8]) -> Result<Value> {
    let doc: Value = serde_json::from_slice(payload)?;
    check_version(&doc)?;
    Ok(doc)
}

/// Decode a stream result payload: MessagePack-serialized JSON document.
pub fn decode_result(payload: &[u8]) -> Result<Value> {
    let doc: Value = rmp_serde::from_slice(payload)
        .map_err(|e| ClientError::Parse(format!("invalid MessagePack result: {e}")))?;
    Ok(doc)
}

/// Validate the `VERSION` tag every control response must carry.
pub fn check_version(doc: &Value) -> Result<()> {
    match doc.get("VERSION").and_then(Value::as_i64) {
        Some(v) if v >= MIN_PROTOCOL_VERSION => Ok(()),
        Some(v) => Err(ClientError::NotSupportedVersion(format!(
            "server protocol version {v} is older than the minimum supported {MIN_PROTOCOL_VERSION}"
        ))),
        None => Err(ClientError::NotSupportedVersion(
            "server response carries no VERSION tag".into(),
        )),
    }
}

/// Surface a decoded response's error signalling as an operation failure.
///
/// A top-level `"success": false` fails with the server-supplied `msg`
/// when present. Responses without a `success` field are treated as
/// successful.
pub fn expect_success(doc: &Value) -> Result<()> {
    match error_message(doc) {
        Some(msg) => Err(ClientError::OperationFailed(msg)),
        None => Ok(()),
    }
}

/// Extract the error message from a result document, if it signals one.
pub fn error_message(doc: &Value) -> Option<String> {
    if doc.get("success").and_then(Value::as_bool) == Some(false) {
        let msg = doc
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or("server reported failure")
            .to_string();
        Some(msg)
    } else {
        None
    }
}

/// Parse the `modelzoo` array of a zoo listing response. Both transports
/// produce the same response document above the wire format.
pub(crate) fn parse_modelzoo(doc: &Value) -> Result<Vec<crate::client::types::ModelInfo>> {
    use crate::client::types::ModelInfo;
    use crate::params::ModelParams;

    let entries = doc
        .get("modelzoo")
        .and_then(Value::as_array)
        .ok_or_else(|| ClientError::Parse("modelzoo response carries no model list".into()))?;

    entries
        .iter()
        .map(|entry| {
            let name = entry
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| ClientError::Parse("model zoo entry has no name".into()))?
                .to_string();
            let extended_params = ModelParams::from_value(
                entry
                    .get("extended_params")
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Default::default())),
            )?;
            Ok(ModelInfo {
                name,
                extended_params,
            })
        })
        .collect()
}

/// Parse the `label_dictionary` object of a label query response.
pub(crate) fn parse_label_dictionary(
    doc: &Value,
) -> Result<serde_json::Map<String, Value>> {
    doc.get("label_dictionary")
        .and_then(Value::as_object)
        .cloned()
        .ok_or_else(|| ClientError::Parse("response carries no label dictionary".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frame_round_trip() {
        let mut buf = BytesMut::new();
        encode_frame(b"hello", &mut buf);
        assert_eq!(&buf[..PREFIX_SIZE], &[0, 0, 0, 5]);

        let payload = take_frame(&mut buf).unwrap().unwrap();
        assert_eq!(&payload[..], b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn take_frame_waits_for_full_payload() {
        let mut buf = BytesMut::new();
        encode_frame(b"abcdef", &mut buf);
        let mut partial = buf.split_to(7); // prefix + 3 payload bytes

        assert!(take_frame(&mut partial).unwrap().is_none());
        partial.unsplit(buf);
        assert_eq!(&take_frame(&mut partial).unwrap().unwrap()[..], b"abcdef");
    }

    #[test]
    fn take_frame_returns_empty_payload_for_close_marker() {
        let mut buf = BytesMut::new();
        encode_frame(b"", &mut buf);
        let payload = take_frame(&mut buf).unwrap().unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn take_frame_rejects_oversized_length() {
        let mut buf = BytesMut::new();
        buf.put_u32(MAX_FRAME_SIZE + 1);
        assert!(matches!(take_frame(&mut buf), Err(ClientError::Parse(_))));
    }

    #[test]
    fn control_json_round_trips_through_the_codec() {
        let doc = json!({"VERSION": 4, "op": "modelzoo", "success": true});
        let payload = serde_json::to_vec(&doc).unwrap();

        let mut buf = BytesMut::new();
        encode_frame(&payload, &mut buf);
        let framed = take_frame(&mut buf).unwrap().unwrap();
        assert_eq!(decode_control(&framed).unwrap(), doc);
    }

    #[test]
    fn version_gate() {
        assert!(check_version(&json!({"VERSION": 4})).is_ok());
        assert!(check_version(&json!({"VERSION": 7})).is_ok());
        assert!(matches!(
            check_version(&json!({"VERSION": 3})),
            Err(ClientError::NotSupportedVersion(_))
        ));
        assert!(matches!(
            check_version(&json!({"ok": true})),
            Err(ClientError::NotSupportedVersion(_))
        ));
    }

    #[test]
    fn error_shape_carries_server_message() {
        let doc = json!({"success": false, "msg": "boom"});
        assert_eq!(error_message(&doc).as_deref(), Some("boom"));
        match expect_success(&doc) {
            Err(ClientError::OperationFailed(msg)) => assert_eq!(msg, "boom"),
            other => panic!("unexpected: {other:?}"),
        }

        assert!(expect_success(&json!({"success": true})).is_ok());
        assert!(expect_success(&json!({"result": 1})).is_ok());
    }

    #[test]
    fn msgpack_result_decodes_to_json_document() {
        let doc = json!({"result": [{"label": "cat", "score": 0.9}]});
        let packed = rmp_serde::to_vec_named(&doc).unwrap();
        assert_eq!(decode_result(&packed).unwrap(), doc);
    }

    #[test]
    fn modelzoo_listing_parses_names_and_params() {
        let doc = json!({
            "VERSION": 4,
            "modelzoo": [
                {"name": "det", "extended_params": {"DEVICE": {"DeviceType": "NPU"}}},
                {"name": "cls"}
            ]
        });
        let models = parse_modelzoo(&doc).unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].name, "det");
        assert_eq!(models[0].extended_params.device_type(), "NPU");
        assert_eq!(models[1].extended_params.device_type(), "CPU");

        assert!(matches!(
            parse_modelzoo(&json!({"VERSION": 4})),
            Err(ClientError::Parse(_))
        ));
    }

    #[test]
    fn label_dictionary_requires_the_dict_field() {
        let doc = json!({"VERSION": 4, "label_dictionary": {"0": "person"}});
        let labels = parse_label_dictionary(&doc).unwrap();
        assert_eq!(labels["0"], json!("person"));

        assert!(parse_label_dictionary(&json!({"VERSION": 4})).is_err());
    }
}
