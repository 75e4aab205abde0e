use cs_domain::error::Result;
use cs_domain::frame::QueryRequest;
use cs_domain::stream::BoxStream;

/// Raw response body, chunk by chunk, in arrival order.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>>>;

/// Opens one streamed exchange with the query backend.
///
/// `open` resolves once the response headers are in and the status is a
/// success; everything after that (including body read errors) surfaces
/// through the returned stream.
#[async_trait::async_trait]
pub trait ChatTransport: Send + Sync {
    async fn open(&self, req: &QueryRequest) -> Result<ByteStream>;
}
