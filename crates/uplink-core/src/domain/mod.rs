//! Domain model (tokens, envelopes, tickets, upload values, errors).
//!
//! このモジュールは I/O を持たない純粋なデータ型だけを定義します。

pub mod abort;
pub mod envelope;
pub mod errors;
pub mod request;
pub mod ticket;
pub mod token;
pub mod upload;

pub use self::abort::{AbortHandle, AbortSignal};
pub use self::envelope::{ResponseEnvelope, canonicalize_keys, find_message, parse_envelope};
pub use self::errors::{ClientError, ErrorKind};
pub use self::request::{ApiRequest, ApiResponse, HttpMethod, Idempotency};
pub use self::ticket::{AccessRole, PresignRequest, PresignTicket, PresignTicketWire};
pub use self::token::{AccessToken, TokenPair};
pub use self::upload::{ProgressFn, UploadFile, UploadProgress, UploadResult};
