//! Bybit v5 public spot WS client with dynamic topic subscriptions.
//!
//! Single connection, single reader. Subscribe/unsubscribe requests carry
//! a fresh `req_id` and wait on an ack future the reader completes; a
//! negative ack or an exhausted retry budget requests a reconnect of this
//! client only. `set_symbols` updates the desired topic set from anywhere;
//! the control loop diffs desired vs subscribed and applies the delta in
//! batches. A reconnect drops the subscribed set and all pending acks,
//! then re-applies the full desired set.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex, Notify};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::messages::{orderbook_topic, parse_book_frames, BookMessage, WsIncoming, WsRequest};
use crate::market::orderbook::now_ms;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = Arc<Mutex<SplitSink<WsStream, Message>>>;
type WsReader = SplitStream<WsStream>;

const SUBSCRIBE_ATTEMPTS: u32 = 3;
const ATTEMPT_BACKOFF: Duration = Duration::from_millis(300);
const MAX_RECONNECT_BACKOFF: Duration = Duration::from_secs(30);
const RECONNECT_COOLDOWN: Duration = Duration::from_secs(3);

/// Receives normalized book updates. The reader awaits the sink
/// sequentially, so a stalled consumer backpressures the socket instead
/// of buffering unboundedly.
#[async_trait]
pub trait BookSink: Send + Sync {
    async fn on_book_message(&self, msg: BookMessage);
}

#[derive(Debug, Clone)]
pub struct BybitWsConfig {
    pub url: String,
    pub depth: u32,
    pub ping_interval: Duration,
    pub subscribe_batch: usize,
    pub ack_timeout: Duration,
}

impl Default for BybitWsConfig {
    fn default() -> Self {
        Self {
            url: "wss://stream.bybit.com/v5/public/spot".to_string(),
            depth: 50,
            ping_interval: Duration::from_secs(20),
            subscribe_batch: 10,
            ack_timeout: Duration::from_secs(6),
        }
    }
}

#[derive(Default)]
struct WsState {
    desired: HashSet<String>,
    subscribed: HashSet<String>,
    pending_acks: HashMap<String, oneshot::Sender<WsIncoming>>,
    last_reconnect_request: Option<Instant>,
}

pub struct BybitWs {
    cfg: BybitWsConfig,
    sink: Arc<dyn BookSink>,
    state: StdMutex<WsState>,
    desired_changed: Notify,
    reconnect_flag: AtomicBool,
    reconnect_notify: Notify,
    stopped: AtomicBool,
    stop_notify: Notify,
}

impl BybitWs {
    pub fn new(cfg: BybitWsConfig, sink: Arc<dyn BookSink>) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            sink,
            state: StdMutex::new(WsState::default()),
            desired_changed: Notify::new(),
            reconnect_flag: AtomicBool::new(false),
            reconnect_notify: Notify::new(),
            stopped: AtomicBool::new(false),
            stop_notify: Notify::new(),
        })
    }

    /// Update the desired symbol set. Safe to call from any task; the
    /// control loop applies the delta when connected.
    pub fn set_symbols(&self, symbols: &[String]) {
        let topics: HashSet<String> = symbols
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| orderbook_topic(self.cfg.depth, s))
            .collect();

        let changed = {
            let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if st.desired == topics {
                false
            } else {
                st.desired = topics;
                true
            }
        };
        if changed {
            self.desired_changed.notify_one();
        }
    }

    pub fn desired_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .desired
            .len()
    }

    pub fn subscribed_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .subscribed
            .len()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop_notify.notify_one();
        self.reconnect_notify.notify_one();
    }

    /// Ask for a reconnect of this client. Debounced so repeated failures
    /// inside one window collapse into a single reconnect.
    pub fn request_reconnect(&self) {
        {
            let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(last) = st.last_reconnect_request {
                if last.elapsed() < RECONNECT_COOLDOWN {
                    return;
                }
            }
            st.last_reconnect_request = Some(Instant::now());
        }
        self.reconnect_flag.store(true, Ordering::SeqCst);
        self.reconnect_notify.notify_one();
    }

    /// Connection supervisor: reconnects with 1..30s exponential backoff
    /// until `stop` is called.
    pub async fn run(self: Arc<Self>) {
        let mut backoff = Duration::from_secs(1);
        while !self.stopped.load(Ordering::SeqCst) {
            match self.connect_and_run().await {
                Ok(()) => {
                    backoff = Duration::from_secs(1);
                }
                Err(e) => {
                    if self.stopped.load(Ordering::SeqCst) {
                        break;
                    }
                    warn!(error = %e, backoff_ms = backoff.as_millis() as u64, "ws connection lost");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_RECONNECT_BACKOFF);
                }
            }
        }
        info!("ws client stopped");
    }

    async fn connect_and_run(self: &Arc<Self>) -> Result<()> {
        debug!(url = %self.cfg.url, "connecting");
        self.reconnect_flag.store(false, Ordering::SeqCst);

        let (stream, _) = connect_async(self.cfg.url.as_str()).await?;
        info!(url = %self.cfg.url, "ws connected");

        let (write, read) = stream.split();
        let write: WsWriter = Arc::new(Mutex::new(write));

        {
            let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
            st.subscribed.clear();
        }

        let mut set: JoinSet<Result<()>> = JoinSet::new();
        {
            let this = self.clone();
            let write = write.clone();
            set.spawn(async move { this.reader_loop(read, write).await });
        }
        {
            let this = self.clone();
            let write = write.clone();
            set.spawn(async move { this.ping_loop(write).await });
        }
        {
            let this = self.clone();
            let write = write.clone();
            set.spawn(async move { this.control_loop(write).await });
        }
        {
            let this = self.clone();
            set.spawn(async move {
                this.reconnect_watcher().await;
                Ok(())
            });
        }

        // First finished task decides the connection outcome.
        let result = match set.join_next().await {
            Some(Ok(task_result)) => task_result,
            Some(Err(join_err)) => Err(anyhow!("ws task panicked: {join_err}")),
            None => Ok(()),
        };

        set.abort_all();
        while set.join_next().await.is_some() {}
        self.fail_pending_acks();
        {
            let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
            st.subscribed.clear();
        }

        result
    }

    async fn reader_loop(self: &Arc<Self>, mut read: WsReader, write: WsWriter) -> Result<()> {
        while let Some(frame) = read.next().await {
            match frame? {
                Message::Text(text) => self.handle_text(&text).await,
                Message::Ping(data) => {
                    write.lock().await.send(Message::Pong(data)).await?;
                }
                Message::Close(frame) => {
                    return Err(anyhow!("server closed connection: {frame:?}"));
                }
                _ => {}
            }
        }
        Err(anyhow!("ws stream ended"))
    }

    async fn handle_text(self: &Arc<Self>, text: &str) {
        let msg: WsIncoming = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(_) => return,
        };

        // Ack routing comes first so request futures always complete.
        if let Some(req_id) = &msg.req_id {
            let sender = {
                let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
                st.pending_acks.remove(req_id)
            };
            if let Some(tx) = sender {
                let _ = tx.send(msg);
                return;
            }
        }

        if msg.is_ack() && msg.success == Some(false) {
            error!(ret_msg = ?msg.ret_msg, "subscribe/unsubscribe rejected");
            self.request_reconnect();
            return;
        }

        if msg.is_ping_pong() {
            return;
        }

        if msg.is_orderbook() {
            for frame in parse_book_frames(&msg, now_ms()) {
                self.sink.on_book_message(frame).await;
            }
        }
    }

    async fn ping_loop(self: &Arc<Self>, write: WsWriter) -> Result<()> {
        loop {
            tokio::time::sleep(self.cfg.ping_interval).await;
            let payload = serde_json::to_string(&WsRequest::ping())?;
            write.lock().await.send(Message::Text(payload)).await?;
        }
    }

    async fn control_loop(self: &Arc<Self>, write: WsWriter) -> Result<()> {
        loop {
            // Applies the full desired set right after connect, then
            // incremental deltas as set_symbols fires.
            self.apply_topic_delta(&write).await?;
            self.desired_changed.notified().await;
        }
    }

    async fn reconnect_watcher(self: &Arc<Self>) {
        loop {
            if self.reconnect_flag.swap(false, Ordering::SeqCst)
                || self.stopped.load(Ordering::SeqCst)
            {
                return;
            }
            tokio::select! {
                _ = self.reconnect_notify.notified() => {}
                _ = self.stop_notify.notified() => return,
            }
        }
    }

    async fn apply_topic_delta(self: &Arc<Self>, write: &WsWriter) -> Result<()> {
        let (mut to_sub, mut to_unsub) = {
            let st = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let to_sub: Vec<String> = st.desired.difference(&st.subscribed).cloned().collect();
            let to_unsub: Vec<String> = st.subscribed.difference(&st.desired).cloned().collect();
            (to_sub, to_unsub)
        };
        to_sub.sort();
        to_unsub.sort();

        if to_sub.is_empty() && to_unsub.is_empty() {
            return Ok(());
        }

        // Unsubscribe first to shed load before adding topics.
        for chunk in to_unsub.chunks(self.cfg.subscribe_batch.max(1)) {
            self.send_with_ack(write, "unsubscribe", chunk).await?;
        }
        if !to_unsub.is_empty() {
            let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
            for t in &to_unsub {
                st.subscribed.remove(t);
            }
        }

        for chunk in to_sub.chunks(self.cfg.subscribe_batch.max(1)) {
            self.send_with_ack(write, "subscribe", chunk).await?;
            let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
            st.subscribed.extend(chunk.iter().cloned());
        }

        let (subscribed, desired) = {
            let st = self.state.lock().unwrap_or_else(|e| e.into_inner());
            (st.subscribed.len(), st.desired.len())
        };
        info!(
            subscribed,
            desired,
            added = to_sub.len(),
            removed = to_unsub.len(),
            "topics updated"
        );
        Ok(())
    }

    async fn send_with_ack(
        self: &Arc<Self>,
        write: &WsWriter,
        op: &str,
        topics: &[String],
    ) -> Result<()> {
        if topics.is_empty() {
            return Ok(());
        }

        for attempt in 1..=SUBSCRIBE_ATTEMPTS {
            let req_id = Uuid::new_v4().simple().to_string();
            let (tx, rx) = oneshot::channel();
            {
                let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
                st.pending_acks.insert(req_id.clone(), tx);
            }

            let payload = serde_json::to_string(&WsRequest::topics(op, topics, req_id.clone()))?;
            let sent = { write.lock().await.send(Message::Text(payload)).await };

            let outcome = match sent {
                Err(e) => Err(anyhow!("send failed: {e}")),
                Ok(()) => match timeout(self.cfg.ack_timeout, rx).await {
                    Ok(Ok(msg)) if msg.success == Some(true) => Ok(()),
                    Ok(Ok(msg)) => Err(anyhow!("{op} rejected: {:?}", msg.ret_msg)),
                    Ok(Err(_)) => Err(anyhow!("{op} ack channel dropped")),
                    Err(_) => Err(anyhow!("{op} ack timeout")),
                },
            };

            {
                let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
                st.pending_acks.remove(&req_id);
            }

            match outcome {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if attempt < SUBSCRIBE_ATTEMPTS {
                        warn!(
                            op,
                            topics = topics.len(),
                            attempt,
                            error = %e,
                            "ack attempt failed, retrying"
                        );
                        tokio::time::sleep(ATTEMPT_BACKOFF * attempt).await;
                        continue;
                    }
                    self.request_reconnect();
                    return Err(e);
                }
            }
        }
        unreachable!("attempt loop always returns")
    }

    fn fail_pending_acks(&self) {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        // Dropping the senders wakes every waiter with a channel error.
        st.pending_acks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    struct NullSink;

    #[async_trait]
    impl BookSink for NullSink {
        async fn on_book_message(&self, _msg: BookMessage) {}
    }

    fn topics(symbols: &[&str]) -> HashSet<String> {
        symbols.iter().map(|s| orderbook_topic(50, s)).collect()
    }

    #[tokio::test]
    async fn set_symbols_updates_desired_set() {
        let ws = BybitWs::new(BybitWsConfig::default(), Arc::new(NullSink));
        ws.set_symbols(&["AUSDT".into(), "BUSDT".into(), String::new()]);
        assert_eq!(ws.desired_count(), 2);

        let st = ws.state.lock().unwrap();
        assert_eq!(st.desired, topics(&["AUSDT", "BUSDT"]));
    }

    #[tokio::test]
    async fn reconnect_requests_are_debounced() {
        let ws = BybitWs::new(BybitWsConfig::default(), Arc::new(NullSink));
        ws.request_reconnect();
        assert!(ws.reconnect_flag.swap(false, Ordering::SeqCst));
        // Within the cooldown the second request is swallowed.
        ws.request_reconnect();
        assert!(!ws.reconnect_flag.load(Ordering::SeqCst));
    }

    /// Minimal Bybit-shaped server: acks every subscribe/unsubscribe and
    /// records the requested ops.
    async fn spawn_ack_server(
    ) -> (String, tokio::sync::mpsc::UnboundedReceiver<(String, Vec<String>)>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut ws = accept_async(stream).await.unwrap();
                    while let Some(Ok(Message::Text(text))) = ws.next().await {
                        let v: serde_json::Value = serde_json::from_str(&text).unwrap();
                        let op = v["op"].as_str().unwrap_or_default().to_string();
                        if op == "ping" {
                            continue;
                        }
                        let args: Vec<String> = v["args"]
                            .as_array()
                            .map(|a| {
                                a.iter()
                                    .filter_map(|x| x.as_str().map(str::to_string))
                                    .collect()
                            })
                            .unwrap_or_default();
                        let ack = serde_json::json!({
                            "op": op,
                            "success": true,
                            "req_id": v["req_id"],
                        });
                        let _ = tx.send((op, args));
                        if ws.send(Message::Text(ack.to_string())).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        (format!("ws://{addr}"), rx)
    }

    async fn wait_until<F: Fn() -> bool>(cond: F) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn subscribes_then_applies_incremental_diff() {
        let (url, mut ops) = spawn_ack_server().await;
        let cfg = BybitWsConfig {
            url,
            subscribe_batch: 2,
            ..Default::default()
        };
        let ws = BybitWs::new(cfg, Arc::new(NullSink));
        ws.set_symbols(&["AUSDT".into(), "BUSDT".into(), "CUSDT".into()]);

        let runner = tokio::spawn(ws.clone().run());

        wait_until(|| ws.subscribed_count() == 3).await;
        {
            let st = ws.state.lock().unwrap();
            assert_eq!(st.subscribed, st.desired);
        }

        // {A,B,C} -> {B,C,D,E}: expect unsubscribe(A) and subscribe(D,E).
        ws.set_symbols(&["BUSDT".into(), "CUSDT".into(), "DUSDT".into(), "EUSDT".into()]);
        wait_until(|| {
            let st = ws.state.lock().unwrap();
            st.subscribed == st.desired && st.subscribed.len() == 4
        })
        .await;

        let mut seen: Vec<(String, Vec<String>)> = Vec::new();
        while let Ok(op) = ops.try_recv() {
            seen.push(op);
        }
        let unsubs: Vec<_> = seen.iter().filter(|(op, _)| op == "unsubscribe").collect();
        assert_eq!(unsubs.len(), 1);
        assert_eq!(unsubs[0].1, vec![orderbook_topic(50, "AUSDT")]);

        let subbed: HashSet<String> = seen
            .iter()
            .filter(|(op, _)| op == "subscribe")
            .flat_map(|(_, args)| args.iter().cloned())
            .collect();
        assert_eq!(subbed, topics(&["AUSDT", "BUSDT", "CUSDT", "DUSDT", "EUSDT"]));

        ws.stop();
        let _ = runner.await;
    }
}
