//! Cache manager (C4) — spec.md §4.4: races layer `open`s in parallel,
//! first success wins, write-back into higher (lower-indexed) writable
//! layers on close. Grounded in `original_source/cache/manager.go`, whose
//! `Open` loops layers *sequentially*; spec.md's REDESIGN FLAGS explicitly
//! calls for the fan-out redesign, so this is the parallel version, built
//! around a bounded channel plus a once-flag per Design Note §9.

use super::{CacheLayer, CacheStream};
use crate::error::{FsError, FsResult};
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// 1 s for peer/cache-tier layers.
pub const CACHE_TIMEOUT: Duration = Duration::from_secs(1);
/// 10 s for origin/store-tier layers (the last layer in priority order is
/// conventionally the origin; callers that want the longer deadline should
/// construct the manager with `origin_timeout`).
pub const ORIGIN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct CacheManager {
    layers: Vec<Arc<dyn CacheLayer>>,
    timeout: Duration,
}

struct RaceWin {
    index: usize,
    stream: CacheStream,
}

impl CacheManager {
    /// Layers are held in the priority order they're added: first layer
    /// wins ties, and is the first consulted on write-back's walk upward.
    pub fn new(layers: Vec<Arc<dyn CacheLayer>>) -> Self {
        CacheManager {
            layers,
            timeout: CACHE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Races every layer's `open(hash)` in parallel. The first success
    /// wins; later successes are dropped (their streams simply go out of
    /// scope). Returns a `DedupingStream` that, on `finish()`, writes the
    /// content back into every writable layer with a lower index than the
    /// winner — spec.md §4.4's write-back rule.
    ///
    /// Never cancellable on its own; callers that need to abort a racing
    /// open on FUSE context cancellation (spec.md §4.4 point 5 / §5) should
    /// use [`CacheManager::open_cancellable`] instead.
    pub async fn open(&self, hash: &str) -> FsResult<DedupingStream> {
        self.open_cancellable(hash, std::future::pending()).await
    }

    /// Same race as `open`, but also aborts with `FsError::Cancelled` the
    /// moment `cancelled` resolves — the caller's FUSE request context
    /// going away mid-race, for example. The spawned per-layer tasks keep
    /// running to completion in the background; only this call returns
    /// early, matching `original_source/cache/manager.go`'s `Open` being
    /// abandonable by its caller's own context.
    pub async fn open_cancellable(
        &self,
        hash: &str,
        cancelled: impl std::future::Future<Output = ()>,
    ) -> FsResult<DedupingStream> {
        let (tx, mut rx) = mpsc::channel::<FsResult<RaceWin>>(self.layers.len().max(1));

        for (idx, layer) in self.layers.iter().cloned().enumerate() {
            let tx = tx.clone();
            let hash = hash.to_string();
            tokio::spawn(async move {
                let result = layer.open(&hash).await.map(|stream| RaceWin { index: idx, stream });
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);
        tokio::pin!(cancelled);

        loop {
            tokio::select! {
                biased;
                _ = &mut cancelled => {
                    return Err(FsError::Cancelled);
                }
                maybe_result = rx.recv() => {
                    match maybe_result {
                        Some(Ok(win)) => {
                            return Ok(DedupingStream {
                                layers: self.layers.clone(),
                                winner_index: win.index,
                                stream: win.stream,
                            });
                        }
                        Some(Err(_)) => continue,
                        None => return Err(FsError::NoEntry),
                    }
                }
                _ = &mut deadline => {
                    return Err(FsError::NoEntry);
                }
            }
        }
    }

    /// Same racing discipline applied to `get_meta`.
    pub async fn get_meta(&self, id: &str) -> FsResult<Vec<String>> {
        self.get_meta_cancellable(id, std::future::pending()).await
    }

    /// Cancellable counterpart to `get_meta`, mirroring `open_cancellable`.
    pub async fn get_meta_cancellable(
        &self,
        id: &str,
        cancelled: impl std::future::Future<Output = ()>,
    ) -> FsResult<Vec<String>> {
        let (tx, mut rx) = mpsc::channel::<FsResult<Vec<String>>>(self.layers.len().max(1));

        for layer in self.layers.iter().cloned() {
            let tx = tx.clone();
            let id = id.to_string();
            tokio::spawn(async move {
                let result = layer.get_meta(&id).await;
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);
        tokio::pin!(cancelled);

        loop {
            tokio::select! {
                biased;
                _ = &mut cancelled => {
                    return Err(FsError::Cancelled);
                }
                maybe_result = rx.recv() => {
                    match maybe_result {
                        Some(Ok(lines)) => return Ok(lines),
                        Some(Err(_)) => continue,
                        None => return Err(FsError::NoEntry),
                    }
                }
                _ = &mut deadline => return Err(FsError::NoEntry),
            }
        }
    }

    /// Short-circuit OR across layers — spec.md §4.4.
    pub async fn exists(&self, hash: &str) -> bool {
        let mut futs = futures_util::stream::FuturesUnordered::new();
        for layer in &self.layers {
            let layer = layer.clone();
            let hash = hash.to_string();
            futs.push(async move { layer.exists(&hash).await });
        }
        use futures_util::StreamExt;
        while let Some(found) = futs.next().await {
            if found {
                return true;
            }
        }
        false
    }
}

/// Wraps the winning layer's stream. `finish()` must be called by the
/// caller on close; it performs write-back and is the only place
/// write-back happens (at most once, per spec.md §5's racing-open
/// correctness property).
pub struct DedupingStream {
    layers: Vec<Arc<dyn CacheLayer>>,
    winner_index: usize,
    stream: CacheStream,
}

impl DedupingStream {
    pub fn reader(&mut self) -> &mut CacheStream {
        &mut self.stream
    }

    pub fn into_reader(self) -> CacheStream {
        self.stream
    }

    /// Reads the full stream into memory, writes it back into every
    /// writable layer above (lower index than) the winner, and returns the
    /// bytes read. Write-back failures are logged, never surfaced —
    /// spec.md §4.4.
    pub async fn finish(mut self, hash: &str) -> FsResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.stream.read_to_end(&mut buf)?;

        for (idx, layer) in self.layers.iter().enumerate() {
            if idx >= self.winner_index || !layer.is_writable() {
                continue;
            }
            let dedupe_stream: CacheStream = Box::new(std::io::Cursor::new(buf.clone()));
            if let Err(e) = layer.dedupe(hash, dedupe_stream).await {
                tracing::warn!(layer = layer.name(), hash, error = %e, "cache write-back failed");
            }
        }

        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheLayer, CacheStream};
    use async_trait::async_trait;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingLayer;
    #[async_trait]
    impl CacheLayer for FailingLayer {
        fn name(&self) -> &str {
            "failing"
        }
        async fn open(&self, _hash: &str) -> FsResult<CacheStream> {
            Err(FsError::NoEntry)
        }
        async fn exists(&self, _hash: &str) -> bool {
            false
        }
    }

    struct OkLayer {
        body: &'static [u8],
        dedupe_calls: Arc<AtomicUsize>,
        writable: bool,
    }
    #[async_trait]
    impl CacheLayer for OkLayer {
        fn name(&self) -> &str {
            "ok"
        }
        async fn open(&self, _hash: &str) -> FsResult<CacheStream> {
            Ok(Box::new(Cursor::new(self.body.to_vec())))
        }
        async fn exists(&self, _hash: &str) -> bool {
            true
        }
        fn is_writable(&self) -> bool {
            self.writable
        }
        async fn dedupe(&self, _hash: &str, _stream: CacheStream) -> FsResult<()> {
            self.dedupe_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn races_layers_first_success_wins() {
        let dedupe_calls = Arc::new(AtomicUsize::new(0));
        let layers: Vec<Arc<dyn CacheLayer>> = vec![
            Arc::new(FailingLayer),
            Arc::new(OkLayer {
                body: b"hello world",
                dedupe_calls: dedupe_calls.clone(),
                writable: true,
            }),
            Arc::new(OkLayer {
                body: b"other content",
                dedupe_calls: dedupe_calls.clone(),
                writable: true,
            }),
        ];
        let manager = CacheManager::new(layers);
        let stream = manager.open("h").await.unwrap();
        let bytes = stream.finish("h").await.unwrap();
        assert_eq!(bytes, b"hello world");
        // layer 0 (FailingLayer) isn't writable; write-back only targets
        // indices below the winner (index 1), so layer 0 receives a call
        // attempt count of zero dedupe invocations from this race.
        assert_eq!(dedupe_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn all_layers_fail_is_no_entry() {
        let layers: Vec<Arc<dyn CacheLayer>> = vec![Arc::new(FailingLayer), Arc::new(FailingLayer)];
        let manager = CacheManager::new(layers);
        let err = manager.open("h").await.unwrap_err();
        assert!(matches!(err, FsError::NoEntry));
    }

    struct SlowLayer;
    #[async_trait]
    impl CacheLayer for SlowLayer {
        fn name(&self) -> &str {
            "slow"
        }
        async fn open(&self, _hash: &str) -> FsResult<CacheStream> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Box::new(Cursor::new(b"too late".to_vec())))
        }
        async fn exists(&self, _hash: &str) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn open_cancellable_aborts_before_any_layer_wins() {
        let layers: Vec<Arc<dyn CacheLayer>> = vec![Arc::new(SlowLayer)];
        let manager = CacheManager::new(layers).with_timeout(Duration::from_secs(60));
        let err = manager
            .open_cancellable("h", std::future::ready(()))
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::Cancelled));
    }
}
