//! Wire boundary for wsrpc.
//!
//! A call frame names a service path, a method and positional arguments and
//! carries a caller-chosen id. A reply frame echoes that id and holds either a
//! result or an [`RpcError`]. The JSON codec in [`codec`] is what the bundled
//! transports put on the wire; other transports may pick their own encoding.

pub mod codec;
mod protocol;

pub use codec::{decode_call, decode_reply, encode_call, encode_reply, CodecError};
pub use protocol::{CallFrame, CallId, ErrorKind, ReplyFrame, RpcError, TARGET_SEPARATOR};
