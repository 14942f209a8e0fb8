//! One-second ticker backed by a thread per generation.
//!
//! Stopping only raises a flag; a tick already in the channel is still
//! delivered and dropped by the tracker's generation check.

use budget_core::{BudgetEvent, Ticker};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::state::LoopMessage;

pub struct ThreadTicker {
    tx: Sender<LoopMessage>,
    interval: Duration,
    running: Option<(u64, Arc<AtomicBool>)>,
}

impl ThreadTicker {
    pub fn new(tx: Sender<LoopMessage>) -> Self {
        Self::with_interval(tx, Duration::from_secs(1))
    }

    pub fn with_interval(tx: Sender<LoopMessage>, interval: Duration) -> Self {
        Self {
            tx,
            interval,
            running: None,
        }
    }
}

impl Ticker for ThreadTicker {
    fn start(&mut self, generation: u64) {
        if let Some((previous, stop)) = self.running.take() {
            tracing::warn!(previous, generation, "Ticker started while running; stopping old one");
            stop.store(true, Ordering::SeqCst);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let tx = self.tx.clone();
        let interval = self.interval;
        thread::spawn(move || loop {
            thread::sleep(interval);
            if flag.load(Ordering::SeqCst) {
                break;
            }
            if tx
                .send(LoopMessage::Event(BudgetEvent::Tick { generation }))
                .is_err()
            {
                break;
            }
        });
        self.running = Some((generation, stop));
    }

    fn stop(&mut self, generation: u64) {
        match self.running.take() {
            Some((running, stop)) if running == generation => {
                stop.store(true, Ordering::SeqCst);
            }
            Some(other) => {
                tracing::debug!(generation, running = other.0, "Stop for a different ticker");
                self.running = Some(other);
            }
            None => {}
        }
    }
}

impl Drop for ThreadTicker {
    fn drop(&mut self) {
        if let Some((_, stop)) = self.running.take() {
            stop.store(true, Ordering::SeqCst);
        }
    }
}
