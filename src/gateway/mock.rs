//! Scripted gateway for tests: records every item handed to any link in
//! global arrival order, can refuse connects, can keep at most one link
//! live at a time, and can tear the live link down with a chosen closure
//! signal.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::config::GatewayConfig;
use crate::types::Notification;

use super::{
    ClosureSignal, FeedbackEntry, FeedbackService, GatewayConnector, GatewayError, GatewayLink,
    GatewayResult,
};

#[derive(Clone)]
pub struct MockGateway {
    state: Arc<MockState>,
}

struct MockState {
    single_link: bool,
    sent: Mutex<Vec<Notification>>,
    connects: AtomicUsize,
    fail_connect: AtomicBool,
    paused: AtomicBool,
    link_capacity: AtomicUsize,
    live: Mutex<Option<Live>>,
    next_link_id: AtomicUsize,
    feedback: Mutex<Vec<FeedbackEntry>>,
    feedback_error: AtomicBool,
}

struct Live {
    id: usize,
    kill_tx: oneshot::Sender<ClosureSignal>,
}

impl MockGateway {
    /// `single_link` makes extra connects fail while a link is open, which
    /// keeps global send order deterministic in scenario tests.
    pub fn new(single_link: bool) -> Self {
        Self {
            state: Arc::new(MockState {
                single_link,
                sent: Mutex::new(Vec::new()),
                connects: AtomicUsize::new(0),
                fail_connect: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                link_capacity: AtomicUsize::new(16),
                live: Mutex::new(None),
                next_link_id: AtomicUsize::new(0),
                feedback: Mutex::new(Vec::new()),
                feedback_error: AtomicBool::new(false),
            }),
        }
    }

    /// Every item accepted by any link, in arrival order.
    pub fn sent(&self) -> Vec<Notification> {
        self.state.sent.lock().clone()
    }

    /// Total connect attempts, successful or not.
    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.state.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// While paused, links stop draining: sends back up into the link
    /// buffer and then stall, as they do against a wedged gateway.
    pub fn set_paused(&self, paused: bool) {
        self.state.paused.store(paused, Ordering::SeqCst);
    }

    /// Buffer depth of links opened from now on. Shrink it to make a
    /// paused link stall after very few sends.
    pub fn set_link_capacity(&self, capacity: usize) {
        self.state.link_capacity.store(capacity, Ordering::SeqCst);
    }

    pub fn has_live_link(&self) -> bool {
        self.state.live.lock().is_some()
    }

    /// Tear down the live link with the given signal. Returns false when no
    /// link is open.
    pub fn close_live(&self, signal: ClosureSignal) -> bool {
        match self.state.live.lock().take() {
            Some(live) => live.kill_tx.send(signal).is_ok(),
            None => false,
        }
    }

    pub fn set_feedback(&self, entries: Vec<FeedbackEntry>) {
        *self.state.feedback.lock() = entries;
    }

    pub fn set_feedback_error(&self, fail: bool) {
        self.state.feedback_error.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl GatewayConnector for MockGateway {
    async fn connect(&self, _config: &GatewayConfig) -> GatewayResult<GatewayLink> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(GatewayError::Connect("scripted connect failure".into()));
        }

        let id = self.state.next_link_id.fetch_add(1, Ordering::SeqCst);
        let (kill_tx, kill_rx) = oneshot::channel();
        {
            let mut live = self.state.live.lock();
            if self.state.single_link && live.is_some() {
                return Err(GatewayError::Connect("link already open".into()));
            }
            *live = Some(Live { id, kill_tx });
        }

        let capacity = self.state.link_capacity.load(Ordering::SeqCst).max(1);
        let (item_tx, item_rx) = mpsc::channel(capacity);
        let (closed_tx, closed_rx) = oneshot::channel();
        let (disc_tx, disc_rx) = oneshot::channel();

        let state = Arc::clone(&self.state);
        tokio::spawn(pump(state, id, item_rx, closed_tx, kill_rx, disc_rx));

        Ok(GatewayLink::new(item_tx, closed_rx, disc_tx))
    }
}

async fn pump(
    state: Arc<MockState>,
    id: usize,
    mut item_rx: mpsc::Receiver<Notification>,
    closed_tx: oneshot::Sender<ClosureSignal>,
    mut kill_rx: oneshot::Receiver<ClosureSignal>,
    mut disc_rx: oneshot::Receiver<()>,
) {
    loop {
        let draining = !state.paused.load(Ordering::SeqCst);
        tokio::select! {
            item = item_rx.recv(), if draining => match item {
                Some(item) => state.sent.lock().push(item),
                None => break,
            },
            _ = tokio::time::sleep(Duration::from_millis(5)), if !draining => {}
            signal = &mut kill_rx => {
                if let Ok(signal) = signal {
                    let _ = closed_tx.send(signal);
                }
                break;
            }
            _ = &mut disc_rx => break,
        }
    }
    let mut live = state.live.lock();
    if live.as_ref().map(|l| l.id) == Some(id) {
        *live = None;
    }
}

#[async_trait]
impl FeedbackService for MockGateway {
    async fn poll(&self, _config: &GatewayConfig) -> GatewayResult<Vec<FeedbackEntry>> {
        if self.state.feedback_error.load(Ordering::SeqCst) {
            return Err(GatewayError::Feedback("scripted feedback failure".into()));
        }
        Ok(self.state.feedback.lock().clone())
    }
}
