//! Debounced connectivity detection.
//!
//! Raw signals (platform callbacks or a periodic reachability probe) are
//! noisy. A signal that contradicts the published state has to hold for the
//! dwell time before it is published; a flap back within the dwell cancels
//! it. The published state starts OFFLINE.

use crate::transport::Transport;
use sitesync_engine::Connectivity;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::WatchStream;

/// Pure debounce state machine.
#[derive(Debug, Clone)]
pub struct Debouncer {
    dwell: Duration,
    published: Connectivity,
    candidate: Option<(Connectivity, Instant)>,
}

impl Debouncer {
    pub fn new(dwell: Duration) -> Self {
        Self {
            dwell,
            published: Connectivity::Offline,
            candidate: None,
        }
    }

    /// Feed a raw signal. Returns a state to publish, if one is due.
    pub fn observe(&mut self, signal: Connectivity, now: Instant) -> Option<Connectivity> {
        if signal == self.published {
            self.candidate = None;
            return None;
        }
        match self.candidate {
            Some((pending, _)) if pending == signal => {}
            _ => self.candidate = Some((signal, now)),
        }
        self.poll(now)
    }

    /// Publish the candidate once it has held for the dwell time.
    pub fn poll(&mut self, now: Instant) -> Option<Connectivity> {
        let (pending, since) = self.candidate?;
        if now.duration_since(since) >= self.dwell {
            self.candidate = None;
            self.published = pending;
            Some(pending)
        } else {
            None
        }
    }

    /// When the current candidate becomes publishable.
    pub fn deadline(&self) -> Option<Instant> {
        self.candidate.map(|(_, since)| since + self.dwell)
    }

    pub fn published(&self) -> Connectivity {
        self.published
    }
}

/// Publishes debounced ONLINE/OFFLINE transitions.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    state: watch::Receiver<Connectivity>,
    tasks: Vec<JoinHandle<()>>,
}

impl ConnectivityMonitor {
    /// Debounce push signals from the platform.
    pub fn from_signals(signals: mpsc::Receiver<Connectivity>, dwell: Duration) -> Self {
        let (tx, state) = watch::channel(Connectivity::Offline);
        let task = tokio::spawn(debounce(signals, tx, Debouncer::new(dwell)));
        Self {
            state,
            tasks: vec![task],
        }
    }

    /// Probe the transport every `every` and debounce the results.
    pub fn with_probe(transport: Arc<dyn Transport>, every: Duration, dwell: Duration) -> Self {
        let (signal_tx, signal_rx) = mpsc::channel(8);
        let mut monitor = Self::from_signals(signal_rx, dwell);

        let probe = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let signal = match transport.probe().await {
                    Ok(()) => Connectivity::Online,
                    Err(e) => {
                        tracing::trace!("Probe failed: {}", e);
                        Connectivity::Offline
                    }
                };
                if signal_tx.send(signal).await.is_err() {
                    break;
                }
            }
        });
        monitor.tasks.push(probe);
        monitor
    }

    /// Stream of published states, starting with the current one.
    pub fn observe(&self) -> WatchStream<Connectivity> {
        WatchStream::new(self.state.clone())
    }

    /// Receiver for the scheduler.
    pub fn receiver(&self) -> watch::Receiver<Connectivity> {
        self.state.clone()
    }

    pub fn current(&self) -> Connectivity {
        *self.state.borrow()
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn debounce(
    mut signals: mpsc::Receiver<Connectivity>,
    tx: watch::Sender<Connectivity>,
    mut debouncer: Debouncer,
) {
    let mut open = true;
    loop {
        let deadline = debouncer.deadline();
        if !open && deadline.is_none() {
            break;
        }

        tokio::select! {
            signal = signals.recv(), if open => match signal {
                Some(signal) => {
                    if let Some(state) = debouncer.observe(signal, Instant::now()) {
                        publish(&tx, state);
                    }
                }
                None => open = false,
            },
            _ = wait_until(deadline) => {
                if let Some(state) = debouncer.poll(Instant::now()) {
                    publish(&tx, state);
                }
            }
        }
    }
}

fn publish(tx: &watch::Sender<Connectivity>, state: Connectivity) {
    tracing::info!("Connectivity changed: {}", state);
    tx.send_replace(state);
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    const DWELL: Duration = Duration::from_millis(500);

    #[test]
    fn starts_offline_and_ignores_agreeing_signals() {
        let mut d = Debouncer::new(DWELL);
        let t0 = Instant::now();
        assert_eq!(d.published(), Connectivity::Offline);
        assert_eq!(d.observe(Connectivity::Offline, t0), None);
        assert_eq!(d.deadline(), None);
    }

    #[test]
    fn change_must_hold_for_dwell() {
        let mut d = Debouncer::new(DWELL);
        let t0 = Instant::now();

        assert_eq!(d.observe(Connectivity::Online, t0), None);
        assert_eq!(d.deadline(), Some(t0 + DWELL));
        assert_eq!(d.observe(Connectivity::Online, t0 + DWELL / 2), None);
        assert_eq!(
            d.observe(Connectivity::Online, t0 + DWELL),
            Some(Connectivity::Online)
        );
        assert_eq!(d.published(), Connectivity::Online);
    }

    #[test]
    fn flap_within_dwell_is_suppressed() {
        let mut d = Debouncer::new(DWELL);
        let t0 = Instant::now();

        d.observe(Connectivity::Online, t0);
        d.observe(Connectivity::Offline, t0 + Duration::from_millis(100));
        assert_eq!(d.deadline(), None);
        assert_eq!(d.poll(t0 + DWELL * 2), None);
        assert_eq!(d.published(), Connectivity::Offline);
    }

    #[test]
    fn sparse_signal_publishes_on_poll() {
        let mut d = Debouncer::new(DWELL);
        let t0 = Instant::now();
        d.observe(Connectivity::Online, t0);
        assert_eq!(d.poll(t0 + DWELL), Some(Connectivity::Online));
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_publishes_after_dwell() {
        let (tx, rx) = mpsc::channel(4);
        let monitor = ConnectivityMonitor::from_signals(rx, DWELL);
        let mut stream = monitor.observe();
        assert_eq!(stream.next().await, Some(Connectivity::Offline));

        tx.send(Connectivity::Online).await.unwrap();
        tokio::time::sleep(DWELL / 2).await;
        assert_eq!(monitor.current(), Connectivity::Offline);

        // A single sparse signal still lands once the dwell elapses
        assert_eq!(stream.next().await, Some(Connectivity::Online));
        assert_eq!(monitor.current(), Connectivity::Online);
    }
}
