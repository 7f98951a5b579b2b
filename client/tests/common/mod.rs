// Each integration-test binary compiles this module separately and uses a
// different subset of it.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use client::transport::{BoxFuture, StreamTarget, StreamTransport, TransportHandle};
use shared::sse::SseFrame;

/// Scripted transport for driving the session state machine in tests.
///
/// Each `open` pops the next planned outcome (falling back to
/// `default_ok`), records when it happened on the (possibly paused) tokio
/// clock, and on success hands out a channel-backed handle the test can
/// feed frames into.
pub struct FakeTransport {
    plan: Mutex<VecDeque<bool>>,
    default_ok: bool,
    opens: AtomicUsize,
    open_times: Mutex<Vec<tokio::time::Instant>>,
    senders: Mutex<Vec<mpsc::Sender<SseFrame>>>,
}

impl FakeTransport {
    fn with_plan(plan: VecDeque<bool>, default_ok: bool) -> Arc<Self> {
        Arc::new(Self {
            plan: Mutex::new(plan),
            default_ok,
            opens: AtomicUsize::new(0),
            open_times: Mutex::new(Vec::new()),
            senders: Mutex::new(Vec::new()),
        })
    }

    pub fn succeeding() -> Arc<Self> {
        Self::with_plan(VecDeque::new(), true)
    }

    pub fn always_failing() -> Arc<Self> {
        Self::with_plan(VecDeque::new(), false)
    }

    /// Fail the first `n` opens, succeed afterwards.
    pub fn fail_then_succeed(n: usize) -> Arc<Self> {
        Self::with_plan(std::iter::repeat_n(false, n).collect(), true)
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Clock reading taken at every `open` call, in order.
    pub fn open_times(&self) -> Vec<tokio::time::Instant> {
        self.open_times.lock().unwrap().clone()
    }

    /// Streams whose handle is still alive on the session side.
    pub fn live_streams(&self) -> usize {
        self.senders
            .lock()
            .unwrap()
            .iter()
            .filter(|sender| !sender.is_closed())
            .count()
    }

    /// Push one frame into the most recent live stream.
    pub async fn emit(&self, frame: SseFrame) {
        let sender = self
            .senders
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|sender| !sender.is_closed())
            .cloned();
        if let Some(sender) = sender {
            let _ = sender.send(frame).await;
        }
    }

    /// Server-side close of every open stream.
    pub fn end_streams(&self) {
        self.senders.lock().unwrap().clear();
    }
}

impl StreamTransport for FakeTransport {
    fn open(&self, _target: &StreamTarget) -> BoxFuture<anyhow::Result<TransportHandle>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.open_times
            .lock()
            .unwrap()
            .push(tokio::time::Instant::now());

        let ok = self
            .plan
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.default_ok);

        if !ok {
            return Box::pin(async { Err(anyhow::anyhow!("connection refused")) });
        }

        let (tx, rx) = mpsc::channel(16);
        self.senders.lock().unwrap().push(tx);
        Box::pin(async move { Ok(TransportHandle::new(rx)) })
    }
}

/// Let spawned session tasks run without advancing the paused clock.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}
