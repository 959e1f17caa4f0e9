//! Byte-chunk sources for the session pump.
//!
//! The session only needs "the next block of body bytes, or end-of-stream".
//! Abstracting that behind a trait lets tests drive the exact same pump and
//! framing logic from scripted chunks instead of a live HTTP response.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Response;

/// Source of raw body chunks. `Ok(None)` signals a normally exhausted body;
/// an error is a transport failure and terminates the session.
#[async_trait]
pub trait ChunkStream: Send {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Live HTTP response body, consumed chunk by chunk.
pub struct HttpChunkStream(Response);

impl HttpChunkStream {
    pub fn new(response: Response) -> Self {
        Self(response)
    }
}

#[async_trait]
impl ChunkStream for HttpChunkStream {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let chunk = self
            .0
            .chunk()
            .await
            .map_err(|e| anyhow::anyhow!("error reading response body: {e}"))?;
        Ok(chunk.map(|bytes| bytes.to_vec()))
    }
}

/// Pre-scripted chunk sequence, with arbitrary chunk boundaries. Test-only
/// stand-in for a streaming body.
#[cfg(test)]
pub struct ScriptedChunks(pub std::vec::IntoIter<Vec<u8>>);

#[cfg(test)]
impl ScriptedChunks {
    pub fn from_fragments(fragments: &[&str]) -> Self {
        Self(
            fragments
                .iter()
                .map(|fragment| fragment.as_bytes().to_vec())
                .collect::<Vec<_>>()
                .into_iter(),
        )
    }
}

#[cfg(test)]
#[async_trait]
impl ChunkStream for ScriptedChunks {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.0.next())
    }
}
