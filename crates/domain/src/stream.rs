use std::pin::Pin;

/// A boxed async stream, used for streamed response bodies and decoded frames.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;
