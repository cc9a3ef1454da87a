//! Protocol messages for shard RPC
//!
//! Uses a simple length-prefixed JSON protocol:
//! - 4 bytes (little-endian u32): message length
//! - N bytes: JSON-encoded message

use crate::index::native::{NativeOptions, NativeQuery, NativeRepoList, NativeResult};
use crate::query::Q;
use crate::search::{Options, SearchError, SearchResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest accepted message
pub const MAX_MESSAGE_LEN: usize = 100 * 1024 * 1024;

/// Request from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Execute a pinned query against the shard's searcher
    Search { query: Q, options: Options },

    /// List repositories known to the shard's index engine
    List { query: NativeQuery },

    /// Execute a native query against the shard's index engine
    IndexSearch {
        query: NativeQuery,
        options: NativeOptions,
    },

    /// Check server health and get stats
    Status,

    /// Ping for connection testing
    Ping,
}

/// Response from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    Search { result: SearchResult },

    List { list: NativeRepoList },

    IndexSearch { result: NativeResult },

    Status(StatusResponse),

    Pong,

    /// The request failed; the error keeps its kind across the wire
    Error { error: SearchError },
}

/// Server status response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Server uptime in seconds
    pub uptime_secs: u64,
    /// Total searches served
    pub queries_served: u64,
    /// Cache hit rate (0.0 - 1.0)
    pub cache_hit_rate: f32,
    /// Results currently cached
    pub cache_entries: usize,
    /// Name of the searcher behind the server
    pub searcher: String,
}

/// Write a message to a stream with length prefix
pub async fn write_message<W>(writer: &mut W, msg: &impl Serialize) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_vec(msg)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    if json.len() > MAX_MESSAGE_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "Message too large",
        ));
    }

    let len = json.len() as u32;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(&json).await?;
    writer.flush().await?;

    Ok(())
}

/// Read a message from a stream with length prefix
pub async fn read_message<R, T>(reader: &mut R) -> std::io::Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;

    // Sanity check: don't allocate more than 100MB
    if len > MAX_MESSAGE_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "Message too large",
        ));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;

    serde_json::from_slice(&buf).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse;
    use crate::search::Repository;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_search_request_keeps_query() {
        let req = Request::Search {
            query: parse("foo.*bar lang:go").unwrap(),
            options: Options::for_repositories(vec![Repository::new("a")]),
        };

        let mut buf = Vec::new();
        write_message(&mut buf, &req).await.unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: Request = read_message(&mut cursor).await.unwrap();

        match decoded {
            Request::Search { query, options } => {
                assert_eq!(query.to_string(), r#"(and regex:"foo.*bar" lang:go)"#);
                assert_eq!(options.repositories[0].name, "a");
            }
            other => panic!("Wrong variant: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_response_keeps_kind() {
        let resp = Response::Error {
            error: SearchError::RevisionNotFound {
                repo: "a".to_string(),
                spec: "dev".to_string(),
            },
        };

        let mut buf = Vec::new();
        write_message(&mut buf, &resp).await.unwrap();
        let decoded: Response = read_message(&mut Cursor::new(buf)).await.unwrap();

        match decoded {
            Response::Error { error } => {
                assert!(matches!(error, SearchError::RevisionNotFound { .. }));
            }
            other => panic!("Wrong variant: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_oversized_length_rejected() {
        let mut buf = ((MAX_MESSAGE_LEN + 1) as u32).to_le_bytes().to_vec();
        buf.extend_from_slice(b"{}");
        let out: std::io::Result<Request> = read_message(&mut Cursor::new(buf)).await;
        assert_eq!(out.unwrap_err().kind(), std::io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_truncated_stream_is_eof() {
        let out: std::io::Result<Request> = read_message(&mut Cursor::new(vec![1u8, 0])).await;
        assert_eq!(out.unwrap_err().kind(), std::io::ErrorKind::UnexpectedEof);
    }
}
