//! Client side of the NDJSON query stream: newline framing, frame repair,
//! classification, and the HTTP transport that feeds them.

pub mod decoder;
pub mod frames;
pub mod http;
pub mod recovery;
pub mod transport;
pub(crate) mod util;

pub use decoder::FrameDecoder;
pub use frames::{classify, classify_final, frame_stream, DecodeMiss, Decoded, FrameItem};
pub use http::HttpTransport;
pub use recovery::{recover, Recovered, Strategy};
pub use transport::{ByteStream, ChatTransport};
