//! TCP transport for the remote cache tier.
//!
//! Speaks the conventional RESP key-value protocol (GET / SETEX / DEL /
//! PING / PUBLISH / SUBSCRIBE) over a `tokio` stream. Subscriptions use a
//! dedicated connection each, since the protocol dedicates a connection to
//! push delivery once SUBSCRIBE is issued.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tokio::task::JoinHandle;

use crate::error::CacheError;
use crate::remote::RemoteCacheTransport;

/// One parsed protocol reply.
#[derive(Debug, Clone, PartialEq)]
enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<String>),
    Array(Vec<Reply>),
}

/// Transport over a plain TCP connection.
pub struct TcpTransport {
    addr: String,
    conn: Mutex<Option<BufStream<TcpStream>>>,
    subscriptions: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TcpTransport {
    /// Create a transport for the given service URL.
    pub fn new(url: &str) -> Self {
        Self {
            addr: host_port(url),
            conn: Mutex::new(None),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Issue one command on the shared connection and read its reply.
    async fn command(&self, args: &[&str]) -> Result<Reply, CacheError> {
        let mut guard = self.conn.lock().await;
        let stream = guard.as_mut().ok_or(CacheError::NotConnected)?;
        write_command(stream, args).await?;
        stream.flush().await?;
        let reply = read_reply(stream).await?;
        match reply {
            Reply::Error(message) => Err(CacheError::Protocol(message)),
            reply => Ok(reply),
        }
    }
}

#[async_trait]
impl RemoteCacheTransport for TcpTransport {
    async fn connect(&self) -> Result<(), CacheError> {
        let mut guard = self.conn.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        let stream = TcpStream::connect(&self.addr).await?;
        *guard = Some(BufStream::new(stream));
        debug!("transport connected (addr={})", self.addr);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), CacheError> {
        *self.conn.lock().await = None;
        for (_, task) in self.subscriptions.lock().await.drain() {
            task.abort();
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        match self.command(&["PING"]).await? {
            Reply::Simple(_) | Reply::Bulk(Some(_)) => Ok(()),
            reply => Err(CacheError::Protocol(format!(
                "unexpected ping reply: {reply:?}"
            ))),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        match self.command(&["GET", key]).await? {
            Reply::Bulk(value) => Ok(value),
            reply => Err(CacheError::Protocol(format!(
                "unexpected get reply: {reply:?}"
            ))),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), CacheError> {
        let ttl = ttl_seconds.to_string();
        match self.command(&["SETEX", key, &ttl, value]).await? {
            Reply::Simple(_) => Ok(()),
            reply => Err(CacheError::Protocol(format!(
                "unexpected set reply: {reply:?}"
            ))),
        }
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        match self.command(&["DEL", key]).await? {
            Reply::Integer(_) => Ok(()),
            reply => Err(CacheError::Protocol(format!(
                "unexpected del reply: {reply:?}"
            ))),
        }
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, CacheError> {
        match self.command(&["PUBLISH", channel, payload]).await? {
            Reply::Integer(count) => Ok(count.max(0) as usize),
            reply => Err(CacheError::Protocol(format!(
                "unexpected publish reply: {reply:?}"
            ))),
        }
    }

    async fn subscribe(&self, channel: &str) -> Result<UnboundedReceiver<String>, CacheError> {
        let stream = TcpStream::connect(&self.addr).await?;
        let mut stream = BufStream::new(stream);
        write_command(&mut stream, &["SUBSCRIBE", channel]).await?;
        stream.flush().await?;
        // First reply acknowledges the subscription.
        read_reply(&mut stream).await?;

        let (tx, rx) = unbounded_channel();
        let channel_name = channel.to_string();
        let task = tokio::spawn(async move {
            loop {
                match read_reply(&mut stream).await {
                    Ok(Reply::Array(items)) => {
                        if let Some(payload) = message_payload(&items)
                            && tx.send(payload).is_err()
                        {
                            break;
                        }
                    }
                    Ok(_) => continue,
                    Err(err) => {
                        warn!("subscription stream ended (channel={channel_name}, error={err})");
                        break;
                    }
                }
            }
        });
        self.subscriptions
            .lock()
            .await
            .insert(channel.to_string(), task);
        Ok(rx)
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), CacheError> {
        // Dropping the reader task closes the dedicated connection.
        if let Some(task) = self.subscriptions.lock().await.remove(channel) {
            task.abort();
        }
        Ok(())
    }
}

/// Extract the payload from a `["message", channel, payload]` push frame.
fn message_payload(items: &[Reply]) -> Option<String> {
    match items {
        [Reply::Bulk(Some(kind)), _, Reply::Bulk(Some(payload))] if kind == "message" => {
            Some(payload.clone())
        }
        _ => None,
    }
}

/// Reduce a service URL to a `host:port` address.
fn host_port(url: &str) -> String {
    let trimmed = url.strip_prefix("redis://").unwrap_or(url);
    let trimmed = trimmed.split('/').next().unwrap_or(trimmed);
    if trimmed.contains(':') {
        trimmed.to_string()
    } else {
        format!("{trimmed}:6379")
    }
}

/// Encode one command as an array of bulk strings.
async fn write_command<W>(writer: &mut W, args: &[&str]) -> Result<(), CacheError>
where
    W: AsyncWrite + Unpin,
{
    let mut frame = Vec::with_capacity(64);
    frame.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        frame.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        frame.extend_from_slice(arg.as_bytes());
        frame.extend_from_slice(b"\r\n");
    }
    writer.write_all(&frame).await?;
    Ok(())
}

/// Parse one reply frame. Boxed for the recursive array case.
fn read_reply<'a, R>(
    reader: &'a mut R,
) -> Pin<Box<dyn Future<Output = Result<Reply, CacheError>> + Send + 'a>>
where
    R: AsyncBufRead + Unpin + Send,
{
    Box::pin(async move {
        let mut line = String::new();
        let read = reader.read_line(&mut line).await?;
        if read == 0 {
            return Err(CacheError::Protocol("connection closed".to_string()));
        }
        let line = line.trim_end_matches(['\r', '\n']);
        let Some(rest) = line.get(1..) else {
            return Err(CacheError::Protocol("empty reply line".to_string()));
        };
        match line.as_bytes()[0] {
            b'+' => Ok(Reply::Simple(rest.to_string())),
            b'-' => Ok(Reply::Error(rest.to_string())),
            b':' => {
                let value = rest
                    .parse::<i64>()
                    .map_err(|_| CacheError::Protocol(format!("bad integer: {rest}")))?;
                Ok(Reply::Integer(value))
            }
            b'$' => {
                let len = rest
                    .parse::<i64>()
                    .map_err(|_| CacheError::Protocol(format!("bad bulk length: {rest}")))?;
                if len < 0 {
                    return Ok(Reply::Bulk(None));
                }
                let mut data = vec![0u8; len as usize + 2];
                reader.read_exact(&mut data).await?;
                data.truncate(len as usize);
                let value = String::from_utf8(data)
                    .map_err(|_| CacheError::Protocol("non-utf8 bulk string".to_string()))?;
                Ok(Reply::Bulk(Some(value)))
            }
            b'*' => {
                let len = rest
                    .parse::<i64>()
                    .map_err(|_| CacheError::Protocol(format!("bad array length: {rest}")))?;
                let mut items = Vec::new();
                for _ in 0..len.max(0) {
                    items.push(read_reply(reader).await?);
                }
                Ok(Reply::Array(items))
            }
            other => Err(CacheError::Protocol(format!(
                "unknown reply prefix: {}",
                other as char
            ))),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::{Reply, host_port, message_payload, read_reply, write_command};
    use pretty_assertions::assert_eq;

    #[test]
    fn host_port_handles_scheme_and_defaults() {
        assert_eq!(host_port("redis://cache.internal:6380"), "cache.internal:6380");
        assert_eq!(host_port("redis://cache.internal"), "cache.internal:6379");
        assert_eq!(host_port("127.0.0.1:6379"), "127.0.0.1:6379");
        assert_eq!(host_port("redis://cache.internal/0"), "cache.internal:6379");
    }

    #[tokio::test]
    async fn commands_encode_as_bulk_string_arrays() {
        let mut frame: Vec<u8> = Vec::new();
        write_command(&mut frame, &["SETEX", "k", "60", "v1"])
            .await
            .expect("encode");
        assert_eq!(
            frame,
            b"*4\r\n$5\r\nSETEX\r\n$1\r\nk\r\n$2\r\n60\r\n$2\r\nv1\r\n"
        );
    }

    #[tokio::test]
    async fn replies_parse_all_frame_kinds() {
        let mut input = &b"+OK\r\n"[..];
        assert_eq!(
            read_reply(&mut input).await.expect("simple"),
            Reply::Simple("OK".to_string())
        );

        let mut input = &b":42\r\n"[..];
        assert_eq!(
            read_reply(&mut input).await.expect("integer"),
            Reply::Integer(42)
        );

        let mut input = &b"$5\r\nhello\r\n"[..];
        assert_eq!(
            read_reply(&mut input).await.expect("bulk"),
            Reply::Bulk(Some("hello".to_string()))
        );

        let mut input = &b"$-1\r\n"[..];
        assert_eq!(read_reply(&mut input).await.expect("nil"), Reply::Bulk(None));

        let mut input = &b"*3\r\n$7\r\nmessage\r\n$4\r\nchan\r\n$2\r\nhi\r\n"[..];
        let reply = read_reply(&mut input).await.expect("array");
        let Reply::Array(items) = &reply else {
            panic!("expected array reply");
        };
        assert_eq!(items.len(), 3);
        assert_eq!(message_payload(items), Some("hi".to_string()));
    }

    #[tokio::test]
    async fn error_frames_surface_their_message() {
        let mut input = &b"-ERR wrong number of arguments\r\n"[..];
        assert_eq!(
            read_reply(&mut input).await.expect("error frame"),
            Reply::Error("ERR wrong number of arguments".to_string())
        );
    }

    #[test]
    fn non_message_frames_have_no_payload() {
        let items = vec![
            Reply::Bulk(Some("subscribe".to_string())),
            Reply::Bulk(Some("chan".to_string())),
            Reply::Integer(1),
        ];
        assert_eq!(message_payload(&items), None);
    }
}
