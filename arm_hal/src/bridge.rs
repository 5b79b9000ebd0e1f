//! Adapters between the cyclic loop and the outside world.
//!
//! - [`CommandIngest`] applies inbound [`JointCommand`]s to the command table.
//! - [`StatePublisher`] samples the state snapshot at a fixed period and
//!   emits [`JointStateMsg`]s.
//!
//! Both run on their own threads and exchange messages over
//! `crossbeam-channel`; neither touches the process image.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arm_common::codec::PositionCodec;
use arm_common::joint::{JointCommand, JointCommandTable, JointStateMsg, JointStateSnapshot};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, info, warn};

/// How often blocked threads re-check the running flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

// ─── Command ingest ─────────────────────────────────────────────────

/// Writes inbound joint targets into the shared command table.
pub struct CommandIngest {
    table: Arc<JointCommandTable>,
    codec: PositionCodec,
    received: u64,
    rejected: u64,
}

impl CommandIngest {
    /// Ingest writing to `table`.
    pub fn new(table: Arc<JointCommandTable>, codec: PositionCodec) -> Self {
        Self {
            table,
            codec,
            received: 0,
            rejected: 0,
        }
    }

    /// Apply one command; returns the number of joints updated.
    ///
    /// Non-finite entries are rejected and leave their joint's previous
    /// command in place.
    pub fn apply(&mut self, cmd: &JointCommand) -> usize {
        self.received += 1;
        let considered = cmd.positions.len().min(self.table.len());
        let rejected = cmd.positions[..considered]
            .iter()
            .filter(|rad| !rad.is_finite())
            .count();
        if rejected > 0 {
            self.rejected += 1;
            warn!(
                "Command #{}: {} non-finite entries rejected {:?}",
                self.received,
                rejected,
                &cmd.positions[..considered]
            );
        }

        let applied = self.table.apply_radians(&cmd.positions, &self.codec);
        if cmd.positions.len() > considered {
            debug!(
                "Command #{}: {} of {} entries ignored",
                self.received,
                cmd.positions.len() - considered,
                cmd.positions.len()
            );
        }
        applied
    }

    /// Commands that carried at least one non-finite entry.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Commands applied so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Apply commands from `rx` until `running` clears or all senders drop.
    pub fn run(mut self, rx: Receiver<JointCommand>, running: &AtomicBool) {
        info!("Command ingest started");
        while running.load(Ordering::Relaxed) {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(cmd) => {
                    self.apply(&cmd);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Command channel closed");
                    break;
                }
            }
        }
        info!("Command ingest stopped after {} commands", self.received);
    }
}

// ─── State publisher ────────────────────────────────────────────────

/// Emits joint names and positions at a fixed period.
pub struct StatePublisher {
    snapshot: Arc<JointStateSnapshot>,
    codec: PositionCodec,
    names: Vec<String>,
    counts: Vec<i32>,
    period: Duration,
    dropped: u64,
}

impl StatePublisher {
    /// Publisher reading `snapshot`; `names` are in joint order.
    pub fn new(
        snapshot: Arc<JointStateSnapshot>,
        codec: PositionCodec,
        names: Vec<String>,
        period: Duration,
    ) -> Self {
        let counts = vec![0; snapshot.len()];
        Self {
            snapshot,
            codec,
            names,
            counts,
            period,
            dropped: 0,
        }
    }

    /// Read the snapshot and convert it.
    ///
    /// `None` before the first cycle or if no consistent copy could be taken.
    pub fn sample(&mut self) -> Option<JointStateMsg> {
        if self.snapshot.write_seq() == 0 {
            return None;
        }
        let cycle = self.snapshot.read_into(&mut self.counts)?;
        Some(JointStateMsg {
            names: self.names.clone(),
            positions: self
                .counts
                .iter()
                .map(|&c| self.codec.counts_to_radians(c))
                .collect(),
            cycle,
        })
    }

    /// Messages dropped because the receiver lagged.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Publish every period until `running` clears or the receiver drops.
    pub fn run(mut self, tx: Sender<JointStateMsg>, running: &AtomicBool) {
        info!("State publisher started (period {:?})", self.period);
        let ticker = crossbeam_channel::tick(self.period);
        while running.load(Ordering::Relaxed) {
            if ticker.recv_timeout(POLL_INTERVAL).is_err() {
                continue;
            }
            let Some(msg) = self.sample() else {
                continue;
            };
            match tx.try_send(msg) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.dropped += 1;
                    if self.dropped <= 10 || self.dropped % 1000 == 0 {
                        warn!("State receiver lagging, {} messages dropped", self.dropped);
                    }
                }
                Err(TrySendError::Disconnected(_)) => {
                    info!("State channel closed");
                    break;
                }
            }
        }
        info!("State publisher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn ingest_updates_prefix_only() {
        let codec = PositionCodec::default();
        let table = Arc::new(JointCommandTable::new(6));
        for j in 0..6 {
            table.store(j, 1000 * j as i32);
        }
        let mut ingest = CommandIngest::new(Arc::clone(&table), codec);

        assert_eq!(ingest.apply(&JointCommand::new([PI / 2.0, -PI / 2.0])), 2);
        assert_eq!(table.load(0), Some(codec.radians_to_counts(PI / 2.0)));
        assert_eq!(table.load(1), Some(codec.radians_to_counts(-PI / 2.0)));
        for j in 2..6 {
            assert_eq!(table.load(j), Some(1000 * j as i32));
        }
        assert_eq!(ingest.received(), 1);
    }

    #[test]
    fn ingest_rejects_non_finite_entries() {
        let codec = PositionCodec::default();
        let table = Arc::new(JointCommandTable::new(3));
        for j in 0..3 {
            table.store(j, 500);
        }
        let mut ingest = CommandIngest::new(Arc::clone(&table), codec);

        assert_eq!(ingest.apply(&JointCommand::new([f64::NAN, 0.25, f64::INFINITY])), 1);
        assert_eq!(table.load(0), Some(500));
        assert_eq!(table.load(1), Some(codec.radians_to_counts(0.25)));
        assert_eq!(table.load(2), Some(500));
        assert_eq!(ingest.rejected(), 1);

        assert_eq!(ingest.apply(&JointCommand::new([0.1])), 1);
        assert_eq!(ingest.rejected(), 1);
        assert_eq!(ingest.received(), 2);
    }

    #[test]
    fn ingest_run_stops_when_senders_drop() {
        let table = Arc::new(JointCommandTable::new(1));
        let ingest = CommandIngest::new(Arc::clone(&table), PositionCodec::default());
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(JointCommand::new([0.5])).unwrap();
        drop(tx);

        let running = AtomicBool::new(true);
        ingest.run(rx, &running);
        assert_eq!(
            table.load(0),
            Some(PositionCodec::default().radians_to_counts(0.5))
        );
    }

    #[test]
    fn publisher_waits_for_first_cycle() {
        let snapshot = Arc::new(JointStateSnapshot::new(2));
        let mut publisher = StatePublisher::new(
            Arc::clone(&snapshot),
            PositionCodec::default(),
            vec!["j1".into(), "j2".into()],
            Duration::from_millis(20),
        );
        assert!(publisher.sample().is_none());

        let codec = PositionCodec::default();
        snapshot.write(3, &[0, codec.max_count()]);
        let msg = publisher.sample().unwrap();
        assert_eq!(msg.names, ["j1", "j2"]);
        assert_eq!(msg.cycle, 3);
        assert_eq!(msg.positions[0], 0.0);
        assert!((msg.positions[1] - PI).abs() < 1e-9);
    }

    #[test]
    fn publisher_emits_on_tick() {
        let snapshot = Arc::new(JointStateSnapshot::new(1));
        snapshot.write(1, &[0]);
        let publisher = StatePublisher::new(
            snapshot,
            PositionCodec::default(),
            vec!["j1".into()],
            Duration::from_millis(5),
        );
        let (tx, rx) = crossbeam_channel::bounded(4);
        let running = Arc::new(AtomicBool::new(true));

        let handle = {
            let running = Arc::clone(&running);
            std::thread::spawn(move || publisher.run(tx, &running))
        };
        let msg = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(msg.names, ["j1"]);
        drop(rx);
        running.store(false, Ordering::SeqCst);
        handle.join().unwrap();
    }
}
