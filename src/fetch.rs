use bytes::{Bytes, BytesMut};
use futures::StreamExt;

use crate::processor::{ProcessorError, Resolver};

/// Reads a whole source object through the resolver.
///
/// The size limit is enforced while streaming, so an oversized object is
/// rejected without being fully buffered.
///
/// # Errors
/// - `NotFound` when the resolver cannot locate the source
/// - `Validation` when the source exceeds `max_size`
/// - `Internal` on storage failures mid-stream
pub async fn fetch_source(
    resolver: &dyn Resolver,
    identifier: &str,
    max_size: usize,
) -> Result<Bytes, ProcessorError> {
    let mut stream = resolver.open(identifier).await?;

    let mut buf = BytesMut::with_capacity(8192);
    while let Some(chunk) = stream
        .next()
        .await
        .transpose()
        .map_err(|e| ProcessorError::Internal(e.to_string()))?
    {
        if buf.len() + chunk.len() > max_size {
            return Err(ProcessorError::Validation(format!(
                "Source image exceeds size limit of {} bytes",
                max_size
            )));
        }
        buf.extend_from_slice(&chunk);
    }

    Ok(buf.freeze())
}
