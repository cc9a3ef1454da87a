//! Client for shard servers

use crate::index::native::{IndexEngine, NativeOptions, NativeQuery, NativeRepoList, NativeResult};
use crate::query::Q;
use crate::search::{Options, SearchContext, SearchError, SearchResult, Searcher};
use crate::server::protocol::{Request, Response, StatusResponse, read_message, write_message};
use async_trait::async_trait;
use std::fmt;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::BufStream;
use tokio::net::TcpStream;

/// Read/write timeout
pub const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for a shard server. Each call opens its own connection, so one
/// client can be shared by any number of concurrent searches.
#[derive(Debug, Clone)]
pub struct RpcClient {
    addr: String,
    io_timeout: Duration,
}

impl RpcClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            io_timeout: IO_TIMEOUT,
        }
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// One request/response exchange
    async fn call(&self, request: &Request) -> Result<Response, SearchError> {
        let exchange = async {
            let stream = TcpStream::connect(&self.addr).await?;
            let mut stream = BufStream::new(stream);
            write_message(&mut stream, request).await?;
            read_message::<_, Response>(&mut stream).await
        };

        match tokio::time::timeout(self.io_timeout, exchange).await {
            Err(_) => Err(SearchError::Timeout),
            Ok(Err(e)) => Err(io_error(&self.addr, e)),
            Ok(Ok(Response::Error { error })) => Err(error),
            Ok(Ok(response)) => Ok(response),
        }
    }

    /// Ping the server
    pub async fn ping(&self) -> Result<(), SearchError> {
        match self.call(&Request::Ping).await? {
            Response::Pong => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// Get server status
    pub async fn status(&self) -> Result<StatusResponse, SearchError> {
        match self.call(&Request::Status).await? {
            Response::Status(status) => Ok(status),
            other => Err(unexpected(&other)),
        }
    }
}

/// Refused and reset connections are worth retrying; everything else is a
/// protocol failure
fn io_error(addr: &str, e: std::io::Error) -> SearchError {
    let message = format!("{}: {}", addr, e);
    match e.kind() {
        ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
            SearchError::Temporary { message }
        }
        ErrorKind::TimedOut => SearchError::Timeout,
        _ => SearchError::Rpc { message },
    }
}

fn unexpected(response: &Response) -> SearchError {
    SearchError::Rpc {
        message: format!("unexpected response: {:?}", response),
    }
}

impl fmt::Display for RpcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rpc({})", self.addr)
    }
}

#[async_trait]
impl Searcher for RpcClient {
    async fn search(
        &self,
        ctx: &SearchContext,
        q: &Q,
        opts: &Options,
    ) -> Result<SearchResult, SearchError> {
        let request = Request::Search {
            query: q.clone(),
            options: opts.clone(),
        };
        match ctx.run(self.call(&request)).await? {
            Response::Search { result } => Ok(result),
            other => Err(unexpected(&other)),
        }
    }
}

#[async_trait]
impl IndexEngine for RpcClient {
    async fn search(
        &self,
        q: &NativeQuery,
        opts: &NativeOptions,
    ) -> Result<NativeResult, SearchError> {
        let request = Request::IndexSearch {
            query: q.clone(),
            options: opts.clone(),
        };
        match self.call(&request).await? {
            Response::IndexSearch { result } => Ok(result),
            other => Err(unexpected(&other)),
        }
    }

    async fn list(&self, q: &NativeQuery) -> Result<NativeRepoList, SearchError> {
        match self.call(&Request::List { query: q.clone() }).await? {
            Response::List { list } => Ok(list),
            other => Err(unexpected(&other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_refused_is_temporary() {
        // Bind then drop to get a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let client = RpcClient::new(addr);
        let err = client.ping().await.unwrap_err();
        assert!(err.is_temporary(), "{err}");
    }

    #[test]
    fn test_display() {
        assert_eq!(RpcClient::new("10.0.0.1:6070").to_string(), "rpc(10.0.0.1:6070)");
    }
}
