//! Shards the active symbol set across several WS clients.
//!
//! Each client owns at most `max_symbols_per_ws` symbols. Shrinking the
//! set never tears a client down mid-run; surplus clients just get an
//! empty desired set. Updates are serialized, so the latest call wins.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

use super::ws::{BookSink, BybitWs, BybitWsConfig};

pub struct BybitWsCluster {
    cfg: BybitWsConfig,
    sink: Arc<dyn BookSink>,
    max_symbols_per_ws: usize,
    inner: Mutex<ClusterInner>,
}

#[derive(Default)]
struct ClusterInner {
    clients: Vec<Arc<BybitWs>>,
    tasks: Vec<JoinHandle<()>>,
}

impl BybitWsCluster {
    pub fn new(cfg: BybitWsConfig, sink: Arc<dyn BookSink>, max_symbols_per_ws: usize) -> Self {
        Self {
            cfg,
            sink,
            max_symbols_per_ws: max_symbols_per_ws.max(1),
            inner: Mutex::new(ClusterInner::default()),
        }
    }

    pub async fn start(&self, symbols: &[String]) {
        self.update_symbols(symbols).await;
    }

    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        for client in &inner.clients {
            client.stop();
        }
        for task in inner.tasks.drain(..) {
            task.abort();
        }
        inner.clients.clear();
    }

    /// Reshard and push the new desired sets to every client.
    pub async fn update_symbols(&self, symbols: &[String]) {
        let shards: Vec<&[String]> = symbols.chunks(self.max_symbols_per_ws).collect();

        let mut inner = self.inner.lock().await;
        while inner.clients.len() < shards.len() {
            let client = BybitWs::new(self.cfg.clone(), self.sink.clone());
            inner.tasks.push(tokio::spawn(client.clone().run()));
            inner.clients.push(client);
        }

        for (idx, client) in inner.clients.iter().enumerate() {
            match shards.get(idx) {
                Some(shard) => client.set_symbols(shard),
                None => client.set_symbols(&[]),
            }
        }

        info!(
            clients = inner.clients.len(),
            symbols = symbols.len(),
            "ws cluster updated"
        );
    }

    pub async fn client_count(&self) -> usize {
        self.inner.lock().await.clients.len()
    }

    pub async fn desired_total(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.clients.iter().map(|c| c.desired_count()).sum()
    }
}
