//! JSON frame codec used by the bundled transports.

use crate::protocol::{CallFrame, ReplyFrame};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("empty frame")]
    Empty,
}

pub fn encode_call(call: &CallFrame) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(call)?)
}

pub fn decode_call(frame: &[u8]) -> Result<CallFrame, CodecError> {
    let frame = trim_ascii(frame);
    if frame.is_empty() {
        return Err(CodecError::Empty);
    }
    Ok(serde_json::from_slice(frame)?)
}

pub fn encode_reply(reply: &ReplyFrame) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(reply)?)
}

pub fn decode_reply(frame: &[u8]) -> Result<ReplyFrame, CodecError> {
    let frame = trim_ascii(frame);
    if frame.is_empty() {
        return Err(CodecError::Empty);
    }
    Ok(serde_json::from_slice(frame)?)
}

// Line-framed transports hand over the trailing newline.
fn trim_ascii(frame: &[u8]) -> &[u8] {
    let start = frame
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(frame.len());
    let end = frame
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &frame[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ErrorKind, RpcError};
    use serde_json::json;

    #[test]
    fn test_decode_call_with_newline() {
        let call =
            decode_call(b"{\"id\":1,\"service\":\"user\",\"method\":\"SayHello\",\"args\":[\"Ann\"]}\n")
                .unwrap();
        assert_eq!(call.id, 1);
        assert_eq!(call.service, "user");
        assert_eq!(call.method, "SayHello");
        assert_eq!(call.args, vec![json!("Ann")]);
    }

    #[test]
    fn test_decode_call_args_default_to_empty() {
        let call = decode_call(br#"{"id":2,"service":"user","method":"Goodbye"}"#).unwrap();
        assert!(call.args.is_empty());
    }

    #[test]
    fn test_decode_call_rejects_garbage() {
        assert!(matches!(decode_call(b"{invalid json}"), Err(CodecError::Json(_))));
        assert!(matches!(decode_call(b"  \n"), Err(CodecError::Empty)));
        // id is mandatory
        assert!(decode_call(br#"{"service":"user","method":"SayHello"}"#).is_err());
    }

    #[test]
    fn test_reply_survives_the_wire() {
        let reply = ReplyFrame::failure(
            Some(9),
            RpcError::new(ErrorKind::Internal, "handler panicked").add_debug("index out of bounds"),
        );
        let bytes = encode_reply(&reply).unwrap();
        assert_eq!(decode_reply(&bytes).unwrap(), reply);
    }
}
