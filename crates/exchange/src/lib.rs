//! Per-request state machine sitting between the HTTP/2 stream and
//! application middleware: request parsing, response assembly, "cool URL"
//! static-file resolution, and hardened response delivery.

mod date;
mod error;
mod exchange;
mod headers;
mod macros;
mod mime_map;
mod request;
mod response;
mod route;

pub use date::{format_http_date, parse_http_date};
pub use error::{ErrorKind, ExchangeError};
pub use exchange::{
    BoxFuture, Exchange, ExchangeTransport, Handler, Next, PreparedValue, Stage, StreamCloseReason,
};
pub use headers::Headers;
pub use mime_map::{media_type_for_extension, media_type_for_path};
pub use request::Request;
pub use response::{Response, ResponseBody};
pub use route::{MatchKind, RoutePattern};
