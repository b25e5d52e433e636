//! Respawn scheduling for dead players.
//!
//! Tickets are timed one at a time in arrival order: only the head of the
//! queue accumulates elapsed time, and when it reaches the ticket's delay the
//! ticket fires and the accumulator starts over for the next one. The timing
//! loop runs as its own task and reports due tickets through a callback, which
//! the server wires to its event channel.

use crate::config::RespawnWindow;
use log::{debug, info, warn};
use rand::Rng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};

#[derive(Debug, Clone, PartialEq)]
pub struct RespawnTicket {
    pub player_id: String,
    pub delay: Duration,
}

/// FIFO of pending tickets plus the head's accumulated wait.
#[derive(Debug, Default)]
pub struct RespawnQueue {
    tickets: VecDeque<RespawnTicket>,
    accumulated: Duration,
}

impl RespawnQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, ticket: RespawnTicket) {
        self.tickets.push_back(ticket);
    }

    /// Adds `elapsed` to the head ticket's wait and pops it once due.
    ///
    /// At most one ticket fires per call. Time does not accumulate while the
    /// queue is empty.
    pub fn advance(&mut self, elapsed: Duration) -> Option<RespawnTicket> {
        let head = self.tickets.front()?;
        self.accumulated += elapsed;

        if self.accumulated >= head.delay {
            self.accumulated = Duration::ZERO;
            return self.tickets.pop_front();
        }
        None
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }
}

/// Owns the background timing task and the channel that feeds it tickets.
pub struct RespawnScheduler {
    window: RespawnWindow,
    ticket_tx: mpsc::UnboundedSender<RespawnTicket>,
    ticket_rx: Option<mpsc::UnboundedReceiver<RespawnTicket>>,
    running: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl RespawnScheduler {
    /// Creates an idle scheduler. Tickets scheduled before [`start`](Self::start)
    /// are buffered and timed once the loop runs.
    pub fn new(window: RespawnWindow) -> Self {
        let (ticket_tx, ticket_rx) = mpsc::unbounded_channel();

        Self {
            window,
            ticket_tx,
            ticket_rx: Some(ticket_rx),
            running: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    /// Spawns the timing loop, calling `on_due` for every ticket that fires.
    ///
    /// `on_due` runs on the scheduler task and must not block. Returns false
    /// if the scheduler was already started or has been stopped.
    pub fn start<F>(&mut self, tick: Duration, on_due: F) -> bool
    where
        F: Fn(RespawnTicket) + Send + 'static,
    {
        let Some(mut ticket_rx) = self.ticket_rx.take() else {
            return false;
        };

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);

        self.task = Some(tokio::spawn(async move {
            let mut queue = RespawnQueue::new();
            let mut ticker = interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut last_tick = Instant::now();

            while running.load(Ordering::SeqCst) {
                ticker.tick().await;

                let now = Instant::now();
                let elapsed = now.duration_since(last_tick);
                last_tick = now;

                while let Ok(ticket) = ticket_rx.try_recv() {
                    queue.push(ticket);
                }

                if let Some(ticket) = queue.advance(elapsed) {
                    info!("Respawn due for player {}", ticket.player_id);
                    on_due(ticket);
                }
            }

            debug!("Respawn scheduler stopped with {} pending tickets", queue.len());
        }));

        true
    }

    /// Queues a respawn with a delay drawn from the configured window.
    pub fn schedule<R: Rng>(&self, player_id: &str, rng: &mut R) -> Duration {
        let delay = self.window.roll(rng);
        let ticket = RespawnTicket {
            player_id: player_id.to_string(),
            delay,
        };

        if self.ticket_tx.send(ticket).is_err() {
            warn!("Respawn scheduler is gone, dropping ticket for {}", player_id);
        }
        delay
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Halts the timing loop and drops pending tickets. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.ticket_rx = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for RespawnScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
