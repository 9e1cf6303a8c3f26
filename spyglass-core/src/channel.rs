//! Bidirectional call channel over a single byte stream.
//!
//! Both sides of a channel can originate calls and serve them; there are no
//! correlation ids. Correctness rests on strict ordering: replies arrive in
//! the order calls were sent, and a call received while a reply is pending
//! must be fully serviced before that reply can arrive. [`Channel::invoke`]
//! therefore pumps the stream itself, dispatching any interleaved incoming
//! calls inline until its own reply shows up.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use spyglass_protocol::{Decoder, Encoder, Message, WireValue};

use crate::error::ChannelError;
use crate::registry::Endpoints;

/// Any stream a channel can attach to.
pub trait Duplex: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Duplex for T {}

type DynStream = Box<dyn Duplex>;

const MIN_READ_BUFFER: usize = 1024;
const MAX_READ_BUFFER: usize = 1024 * 1024;

/// Channel tuning knobs.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Size of the per-read buffer.
    pub read_buffer_size: usize,
    /// Deadline for a full invoke round trip, including any nested calls
    /// serviced along the way. `None` waits indefinitely.
    pub invoke_timeout: Option<Duration>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            read_buffer_size: 8192,
            invoke_timeout: None,
        }
    }
}

impl ChannelConfig {
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER, MAX_READ_BUFFER);
        self
    }

    pub fn with_invoke_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.invoke_timeout = timeout;
        self
    }
}

/// One end of a bidirectional call connection.
pub struct Channel {
    config: ChannelConfig,
    endpoints: Endpoints,
    reader: Mutex<Option<ReadHalf<DynStream>>>,
    writer: Mutex<Option<WriteHalf<DynStream>>>,
    decoder: Mutex<Decoder>,
    // Replies deposited by the read pump, consumed in FIFO order.
    queue: SyncMutex<VecDeque<WireValue>>,
    attached: AtomicBool,
    broken: AtomicBool,
}

impl Channel {
    pub fn new(config: ChannelConfig) -> Self {
        Channel {
            config,
            endpoints: Endpoints::new(),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            decoder: Mutex::new(Decoder::new()),
            queue: SyncMutex::new(VecDeque::new()),
            attached: AtomicBool::new(false),
            broken: AtomicBool::new(false),
        }
    }

    /// Registers an endpoint. The endpoint set is fixed once the channel is
    /// attached, so a peer never observes a half-built surface.
    pub fn bind(
        &self,
        name: impl Into<String>,
        handler: crate::registry::Handler,
    ) -> Result<(), ChannelError> {
        let name = name.into();
        if self.attached.load(Ordering::SeqCst) {
            return Err(ChannelError::BindAfterAttach(name));
        }
        self.endpoints.bind(name, handler);
        Ok(())
    }

    /// Attaches the channel to a connected stream.
    pub async fn attach<S: Duplex + 'static>(&self, stream: S) -> Result<(), ChannelError> {
        if self
            .attached
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ChannelError::AlreadyAttached);
        }
        let (read_half, write_half) = io::split(Box::new(stream) as DynStream);
        *self.reader.lock().await = Some(read_half);
        *self.writer.lock().await = Some(write_half);
        debug!(endpoints = self.endpoints.len(), "channel attached");
        Ok(())
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    /// Number of replies read but not yet consumed.
    pub fn pending_count(&self) -> usize {
        self.queue.lock().len()
    }

    fn mark_broken(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    fn check_usable(&self) -> Result<(), ChannelError> {
        if self.is_broken() {
            return Err(ChannelError::Broken);
        }
        if !self.is_attached() {
            return Err(ChannelError::NotAttached);
        }
        Ok(())
    }

    async fn send(&self, message: &Message) -> Result<(), ChannelError> {
        let bytes = Encoder::encode_message(message)?;
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(ChannelError::NotAttached)?;
        if let Err(err) = async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        }
        .await
        {
            self.mark_broken();
            return Err(ChannelError::Io(err));
        }
        trace!(kind = message.kind(), len = bytes.len(), "message sent");
        Ok(())
    }

    /// Reads the next complete message from the stream.
    async fn read_message(&self) -> Result<Message, ChannelError> {
        let mut reader = self.reader.lock().await;
        let reader = reader.as_mut().ok_or(ChannelError::NotAttached)?;
        let mut decoder = self.decoder.lock().await;
        let mut buf = vec![0u8; self.config.read_buffer_size];
        loop {
            match decoder.decode_message() {
                Ok(Some(message)) => {
                    trace!(kind = message.kind(), "message received");
                    return Ok(message);
                }
                Ok(None) => {}
                Err(err) => {
                    // Any framing error poisons the stream position.
                    self.mark_broken();
                    return Err(ChannelError::Protocol(err));
                }
            }
            let n = match reader.read(&mut buf).await {
                Ok(n) => n,
                Err(err) => {
                    self.mark_broken();
                    return Err(ChannelError::Io(err));
                }
            };
            if n == 0 {
                self.mark_broken();
                return Err(ChannelError::ConnectionClosed);
            }
            decoder.extend(&buf[..n]);
        }
    }

    /// Services one incoming call and sends the reply.
    async fn dispatch(
        &self,
        procedure: String,
        args: Vec<WireValue>,
        kwargs: HashMap<String, WireValue>,
    ) -> Result<(), ChannelError> {
        let Some(handler) = self.endpoints.lookup(&procedure) else {
            warn!(procedure = %procedure, "call to unknown endpoint");
            return self
                .send(&Message::error(
                    format!("unknown endpoint: {procedure}"),
                    String::new(),
                ))
                .await;
        };
        debug!(procedure = %procedure, args = args.len(), "dispatching call");
        let reply = match handler(args, kwargs).await {
            Ok(value) => Message::ret(value),
            Err(fault) => {
                debug!(procedure = %procedure, message = %fault.message, "handler faulted");
                Message::error(fault.message, fault.detail)
            }
        };
        self.send(&reply).await
    }

    /// Calls a remote endpoint and waits for its result, servicing any calls
    /// the peer interleaves before the reply.
    pub async fn invoke(
        &self,
        procedure: &str,
        args: Vec<WireValue>,
        kwargs: HashMap<String, WireValue>,
    ) -> Result<WireValue, ChannelError> {
        self.check_usable()?;
        self.send(&Message::call(procedure, args, kwargs)).await?;
        match self.config.invoke_timeout {
            None => self.pump_reply().await,
            Some(deadline) => match tokio::time::timeout(deadline, self.pump_reply()).await {
                Ok(result) => result,
                Err(_) => {
                    // The reply position in the stream is now unknowable.
                    self.mark_broken();
                    Err(ChannelError::Timeout)
                }
            },
        }
    }

    /// Reads until a reply is available, dispatching interleaved calls.
    async fn pump_reply(&self) -> Result<WireValue, ChannelError> {
        loop {
            if let Some(value) = self.queue.lock().pop_front() {
                return Ok(value);
            }
            match self.read_message().await? {
                Message::Call {
                    procedure,
                    args,
                    kwargs,
                } => {
                    // A call arriving here must resolve before our reply can.
                    self.dispatch(procedure, args, kwargs).await?;
                }
                Message::Return { value } => {
                    self.queue.lock().push_back(value);
                }
                Message::Error { message, detail } => {
                    return Err(ChannelError::Remote { message, detail });
                }
            }
        }
    }

    /// Serves incoming calls until the peer disconnects.
    pub async fn serve(&self) -> Result<(), ChannelError> {
        loop {
            match self.serve_step().await {
                Ok(()) => {}
                Err(ChannelError::ConnectionClosed) => {
                    debug!("peer disconnected");
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Reads and services exactly one incoming call.
    pub async fn serve_step(&self) -> Result<(), ChannelError> {
        self.check_usable()?;
        match self.read_message().await? {
            Message::Call {
                procedure,
                args,
                kwargs,
            } => self.dispatch(procedure, args, kwargs).await,
            Message::Return { .. } | Message::Error { .. } => {
                // A reply with no call outstanding means the two sides have
                // lost agreement on stream position.
                self.mark_broken();
                Err(ChannelError::Desync)
            }
        }
    }

    /// Shuts down the write side; the peer observes end-of-stream.
    pub async fn close(&self) -> Result<(), ChannelError> {
        if let Some(mut writer) = self.writer.lock().await.take() {
            writer.shutdown().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{handler, Fault};
    use std::sync::Arc;

    /// Builds an attached channel pair over an in-memory duplex stream.
    async fn pair(a_cfg: ChannelConfig, b_cfg: ChannelConfig) -> (Arc<Channel>, Arc<Channel>) {
        let (sa, sb) = io::duplex(64 * 1024);
        let a = Arc::new(Channel::new(a_cfg));
        let b = Arc::new(Channel::new(b_cfg));
        a.attach(sa).await.unwrap();
        b.attach(sb).await.unwrap();
        (a, b)
    }

    fn no_args() -> HashMap<String, WireValue> {
        HashMap::new()
    }

    #[tokio::test]
    async fn test_invoke_roundtrip() {
        let a = Arc::new(Channel::new(ChannelConfig::default()));
        let b = Arc::new(Channel::new(ChannelConfig::default()));
        b.bind(
            "double",
            handler(|args, _| async move {
                let n = args[0].as_u64().ok_or_else(|| Fault::new("not a number"))?;
                Ok(WireValue::from_u64(n * 2))
            }),
        )
        .unwrap();

        let (sa, sb) = io::duplex(64 * 1024);
        a.attach(sa).await.unwrap();
        b.attach(sb).await.unwrap();

        let server = tokio::spawn({
            let b = b.clone();
            async move { b.serve().await }
        });

        let result = a
            .invoke("double", vec![WireValue::from_u64(21)], no_args())
            .await
            .unwrap();
        assert_eq!(result.as_u64(), Some(42));

        a.close().await.unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unknown_endpoint_keeps_channel_usable() {
        let (a, b) = pair(ChannelConfig::default(), ChannelConfig::default()).await;
        let b2 = b.clone();
        tokio::spawn(async move { b2.serve().await });

        let err = a.invoke("missing", vec![], no_args()).await.unwrap_err();
        match err {
            ChannelError::Remote { message, .. } => assert!(message.contains("missing")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!a.is_broken());
    }

    #[tokio::test]
    async fn test_fault_propagates() {
        let b = Arc::new(Channel::new(ChannelConfig::default()));
        b.bind(
            "fail",
            handler(|_, _| async { Err::<WireValue, _>(Fault::with_detail("boom", "ctx")) }),
        )
        .unwrap();
        let a = Arc::new(Channel::new(ChannelConfig::default()));

        let (sa, sb) = io::duplex(64 * 1024);
        a.attach(sa).await.unwrap();
        b.attach(sb).await.unwrap();
        let b2 = b.clone();
        tokio::spawn(async move { b2.serve().await });

        let err = a.invoke("fail", vec![], no_args()).await.unwrap_err();
        match err {
            ChannelError::Remote { message, detail } => {
                assert_eq!(message, "boom");
                assert_eq!(detail, "ctx");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // The channel survives a remote fault.
        assert!(!a.is_broken());
        let err = a.invoke("fail", vec![], no_args()).await.unwrap_err();
        assert!(matches!(err, ChannelError::Remote { .. }));
    }

    #[tokio::test]
    async fn test_reentrant_callback() {
        let a = Arc::new(Channel::new(ChannelConfig::default()));
        let b = Arc::new(Channel::new(ChannelConfig::default()));

        // B's handler calls back into A before returning.
        let b_for_handler = b.clone();
        b.bind(
            "run",
            handler(move |_, _| {
                let chan = b_for_handler.clone();
                async move {
                    let n = chan
                        .invoke("cb", vec![WireValue::from_u64(10)], HashMap::new())
                        .await
                        .map_err(|e| Fault::new(e.to_string()))?;
                    let n = n.as_u64().ok_or_else(|| Fault::new("bad callback result"))?;
                    Ok(WireValue::from_u64(n + 1))
                }
            }),
        )
        .unwrap();

        a.bind(
            "cb",
            handler(|args, _| async move {
                let n = args[0].as_u64().ok_or_else(|| Fault::new("bad arg"))?;
                Ok(WireValue::from_u64(n * 3))
            }),
        )
        .unwrap();

        let (sa, sb) = io::duplex(64 * 1024);
        a.attach(sa).await.unwrap();
        b.attach(sb).await.unwrap();
        let b2 = b.clone();
        tokio::spawn(async move { b2.serve().await });

        // A's invoke must service B's nested "cb" call before seeing its
        // own reply: 10 * 3 + 1.
        let result = a.invoke("run", vec![], no_args()).await.unwrap();
        assert_eq!(result.as_u64(), Some(31));
        assert_eq!(a.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_sequential_calls_in_order() {
        let b = Arc::new(Channel::new(ChannelConfig::default()));
        b.bind(
            "echo",
            handler(|args, _| async move { Ok(args.into_iter().next().unwrap()) }),
        )
        .unwrap();
        let a = Arc::new(Channel::new(ChannelConfig::default()));

        let (sa, sb) = io::duplex(64 * 1024);
        a.attach(sa).await.unwrap();
        b.attach(sb).await.unwrap();
        let b2 = b.clone();
        tokio::spawn(async move { b2.serve().await });

        for i in 0..10u64 {
            let result = a
                .invoke("echo", vec![WireValue::from_u64(i)], no_args())
                .await
                .unwrap();
            assert_eq!(result.as_u64(), Some(i));
        }
    }

    #[tokio::test]
    async fn test_attach_twice_rejected() {
        let channel = Channel::new(ChannelConfig::default());
        let (sa, sb) = io::duplex(1024);
        channel.attach(sa).await.unwrap();
        let err = channel.attach(sb).await.unwrap_err();
        assert!(matches!(err, ChannelError::AlreadyAttached));
    }

    #[tokio::test]
    async fn test_bind_after_attach_rejected() {
        let channel = Channel::new(ChannelConfig::default());
        let (sa, _sb) = io::duplex(1024);
        channel.attach(sa).await.unwrap();
        let err = channel
            .bind("late", handler(|_, _| async { Ok(WireValue::nil()) }))
            .unwrap_err();
        assert!(matches!(err, ChannelError::BindAfterAttach(name) if name == "late"));
    }

    #[tokio::test]
    async fn test_invoke_before_attach() {
        let channel = Channel::new(ChannelConfig::default());
        let err = channel.invoke("x", vec![], no_args()).await.unwrap_err();
        assert!(matches!(err, ChannelError::NotAttached));
    }

    #[tokio::test]
    async fn test_unsolicited_reply_is_desync() {
        // Write a raw Return frame straight onto the wire.
        let (sa, sb) = io::duplex(1024);
        let channel = Channel::new(ChannelConfig::default());
        channel.attach(sa).await.unwrap();
        let mut raw = sb;
        let bytes = Encoder::encode_message(&Message::ret(WireValue::from_u64(1))).unwrap();
        raw.write_all(&bytes).await.unwrap();

        let err = channel.serve_step().await.unwrap_err();
        assert!(matches!(err, ChannelError::Desync));
        assert!(channel.is_broken());
        let err = channel.serve_step().await.unwrap_err();
        assert!(matches!(err, ChannelError::Broken));
    }

    #[tokio::test]
    async fn test_invoke_timeout_marks_broken() {
        let config = ChannelConfig::default().with_invoke_timeout(Some(Duration::from_millis(20)));
        let channel = Channel::new(config);
        let (sa, _sb) = io::duplex(1024);
        channel.attach(sa).await.unwrap();

        // Nobody answers on the other end.
        let err = channel.invoke("slow", vec![], no_args()).await.unwrap_err();
        assert!(matches!(err, ChannelError::Timeout));
        assert!(channel.is_broken());
        let err = channel.invoke("slow", vec![], no_args()).await.unwrap_err();
        assert!(matches!(err, ChannelError::Broken));
    }

    #[test]
    fn test_config_clamps_buffer() {
        let config = ChannelConfig::default().with_read_buffer_size(1);
        assert_eq!(config.read_buffer_size, MIN_READ_BUFFER);
        let config = ChannelConfig::default().with_read_buffer_size(usize::MAX);
        assert_eq!(config.read_buffer_size, MAX_READ_BUFFER);
    }
}
