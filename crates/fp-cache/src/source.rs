//! What the playback engine reads media from.

use async_trait::async_trait;
use bytes::Bytes;
use fp_core::Result;

use crate::fetch::ByteRange;

/// Byte source handed to the playback engine.
///
/// [`CacheLayer`](crate::CacheLayer) is the production implementation; the
/// engine never talks to the network or the store directly.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Open a whole resource.
    async fn open(&self, url: &str) -> Result<Bytes>;

    /// Read part of a resource.
    async fn read_range(&self, url: &str, range: ByteRange) -> Result<Bytes> {
        let body = self.open(url).await?;
        Ok(range.slice(&body))
    }
}
