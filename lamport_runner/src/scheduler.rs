// lamport_runner/src/scheduler.rs
//! The node's driving loop.
//!
//! Each tick sleeps `1 / clock_rate` seconds, then either consumes one queued
//! timestamp or performs a randomly drawn action. The decision is the pure
//! [`decide`] function; [`Scheduler`] executes it against the clock, the
//! sender and the event log.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::Rng;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::clock::{ClockTransition, LamportClock};
use crate::config::{ActionWeights, PeerAddr};
use crate::error::NodeError;
use crate::event::EventRecord;
use crate::eventlog::EventLogSink;
use crate::network::NetworkSender;
use crate::queue::IncomingQueue;
use crate::stats::NodeStats;
use crate::utils::now_secs;
use crate::wire::MAX_TIMESTAMP;

/// What one tick does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Receive,
    /// Send to the peer at this index of the configured peer list.
    SendTo(usize),
    SendAll,
    Internal,
}

/// Single-send slots are always laid out for at least this many peers. A
/// slot with no peer behind it becomes an internal event, so the default
/// weights give each existing peer 1 draw in 10 whether there are one or two.
pub const MIN_PEER_SLOTS: usize = 2;

/// Choose the next action.
///
/// A waiting message always wins. Otherwise the draw is weighted by
/// `weights`: `per_peer` for each single-peer send slot, `all_peers` for the
/// broadcast, `internal` for the rest. Slots the peer list cannot fill (a
/// second peer, or a broadcast with fewer than two peers) fall through to
/// an internal event. With every weight at zero the node idles with an
/// internal event.
pub fn decide<R: Rng + ?Sized>(
    rng: &mut R,
    queue_len: usize,
    weights: &ActionWeights,
    peer_count: usize,
) -> Action {
    if queue_len > 0 {
        return Action::Receive;
    }

    let per_peer = u64::from(weights.per_peer);
    let single = per_peer * peer_count.max(MIN_PEER_SLOTS) as u64;
    let all = u64::from(weights.all_peers);
    let total = single + all + u64::from(weights.internal);
    if total == 0 {
        return Action::Internal;
    }

    let draw = rng.gen_range(0..total);
    if draw < single {
        match (draw / per_peer) as usize {
            index if index < peer_count => Action::SendTo(index),
            _ => Action::Internal,
        }
    } else if draw < single + all && peer_count >= 2 {
        Action::SendAll
    } else {
        Action::Internal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Running,
    ShuttingDown,
    Stopped,
}

/// Everything the scheduler drives, handed over at startup.
pub struct SchedulerParts<W: Write> {
    pub machine_id: u32,
    pub clock_rate: u32,
    pub peers: Arc<[PeerAddr]>,
    pub weights: ActionWeights,
    pub queue: Arc<IncomingQueue>,
    pub sender: NetworkSender,
    pub sink: EventLogSink<W>,
    pub stats: Arc<NodeStats>,
    pub rng: StdRng,
}

pub struct Scheduler<W: Write> {
    machine_id: u32,
    clock_rate: u32,
    tick_interval: Duration,
    clock: LamportClock,
    peers: Arc<[PeerAddr]>,
    weights: ActionWeights,
    queue: Arc<IncomingQueue>,
    sender: NetworkSender,
    sink: EventLogSink<W>,
    stats: Arc<NodeStats>,
    rng: StdRng,
    state: SchedulerState,
}

impl<W: Write> Scheduler<W> {
    /// Emit STARTUP and enter `Running`. `clock_rate` must be non-zero.
    pub fn start(parts: SchedulerParts<W>) -> Result<Self, NodeError> {
        if parts.clock_rate == 0 {
            return Err(NodeError::InvalidConfig(
                "clock rate must be at least 1 tick/sec".into(),
            ));
        }
        let mut scheduler = Self {
            machine_id: parts.machine_id,
            clock_rate: parts.clock_rate,
            tick_interval: Duration::from_secs_f64(1.0 / f64::from(parts.clock_rate)),
            clock: LamportClock::new(),
            peers: parts.peers,
            weights: parts.weights,
            queue: parts.queue,
            sender: parts.sender,
            sink: parts.sink,
            stats: parts.stats,
            rng: parts.rng,
            state: SchedulerState::Running,
        };
        scheduler.emit(EventRecord::Startup {
            system_time: now_secs(),
            machine_id: scheduler.machine_id,
            clock_rate: scheduler.clock_rate,
        })?;
        info!(
            machine_id = scheduler.machine_id,
            clock_rate = scheduler.clock_rate,
            peers = scheduler.peers.len(),
            "scheduler started"
        );
        Ok(scheduler)
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn clock(&self) -> u64 {
        self.clock.value()
    }

    pub fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Tick until `deadline`, then move to `ShuttingDown`. The deadline is
    /// checked once per tick, so the last tick may overrun it by up to one
    /// interval plus any send timeout.
    pub async fn run_until(&mut self, deadline: Instant) -> Result<(), NodeError> {
        while self.state == SchedulerState::Running {
            if Instant::now() >= deadline {
                self.state = SchedulerState::ShuttingDown;
                debug!(machine_id = self.machine_id, "run duration elapsed");
                break;
            }
            self.tick().await?;
        }
        Ok(())
    }

    pub async fn tick(&mut self) -> Result<Action, NodeError> {
        sleep(self.tick_interval).await;
        self.step().await
    }

    /// One tick's work without the sleep.
    pub async fn step(&mut self) -> Result<Action, NodeError> {
        if self.state != SchedulerState::Running {
            return Err(NodeError::AlreadyStopped);
        }

        let mut action = decide(
            &mut self.rng,
            self.queue.len(),
            &self.weights,
            self.peers.len(),
        );
        if action == Action::Receive {
            match self.queue.pop() {
                Some((timestamp, remaining)) if timestamp <= MAX_TIMESTAMP => {
                    self.handle_receive(timestamp, remaining)?;
                    return Ok(action);
                }
                Some((timestamp, _)) => {
                    self.stats.record_malformed();
                    warn!(
                        machine_id = self.machine_id,
                        timestamp, "discarding out-of-range timestamp"
                    );
                    action = decide(&mut self.rng, 0, &self.weights, self.peers.len());
                }
                None => {
                    action = decide(&mut self.rng, 0, &self.weights, self.peers.len());
                }
            }
        }

        match action {
            Action::SendTo(index) => {
                let recipients = vec![self.peers[index].clone()];
                self.handle_send(recipients).await?;
            }
            Action::SendAll => {
                let recipients = self.peers.to_vec();
                self.handle_send(recipients).await?;
            }
            Action::Internal => self.handle_internal()?,
            Action::Receive => unreachable!("decide never yields Receive for an empty queue"),
        }
        Ok(action)
    }

    /// Emit END and stop. Allowed from `Running` or `ShuttingDown`.
    pub fn finish(&mut self) -> Result<u64, NodeError> {
        if self.state == SchedulerState::Stopped {
            return Err(NodeError::AlreadyStopped);
        }
        self.state = SchedulerState::ShuttingDown;
        let final_clock = self.clock.value();
        self.emit(EventRecord::End {
            system_time: now_secs(),
            machine_id: self.machine_id,
            final_clock,
        })?;
        self.state = SchedulerState::Stopped;
        info!(machine_id = self.machine_id, final_clock, "scheduler stopped");
        Ok(final_clock)
    }

    fn handle_receive(&mut self, timestamp: u64, remaining: usize) -> Result<(), NodeError> {
        let t = self.clock.receive(timestamp);
        self.stats.record_queue_len(remaining);
        self.emit(EventRecord::receive(now_secs(), self.machine_id, t, remaining))
    }

    async fn handle_send(&mut self, recipients: Vec<PeerAddr>) -> Result<(), NodeError> {
        let t: ClockTransition = self.clock.send();
        let system_time = now_secs();

        let results = self.sender.send_to_all(&recipients, t.new).await;
        for result in results {
            if let Err(e) = result {
                self.stats.record_failed_send();
                warn!(machine_id = self.machine_id, clock = t.new, error = %e, "send failed");
            }
        }

        self.emit(EventRecord::send(system_time, self.machine_id, t, recipients))
    }

    fn handle_internal(&mut self) -> Result<(), NodeError> {
        let t = self.clock.internal();
        self.emit(EventRecord::internal(now_secs(), self.machine_id, t))
    }

    fn emit(&mut self, record: EventRecord) -> Result<(), NodeError> {
        if self.state == SchedulerState::Stopped {
            return Err(NodeError::AlreadyStopped);
        }
        let clock = record
            .clocks()
            .map(|(_, new)| new)
            .unwrap_or_else(|| self.clock.value());
        self.sink.append(&record)?;
        self.stats.record_event(record.kind(), clock);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::eventlog::testing::{BrokenWriter, SharedBuffer};
    use crate::network::bind_listener;
    use rand::SeedableRng;
    use std::collections::HashMap;
    use std::net::SocketAddr;

    fn parts<W: Write>(
        sink: EventLogSink<W>,
        peers: Vec<PeerAddr>,
        weights: ActionWeights,
        queue: Arc<IncomingQueue>,
    ) -> SchedulerParts<W> {
        SchedulerParts {
            machine_id: 7,
            clock_rate: 6,
            peers: peers.into(),
            weights,
            queue,
            sender: NetworkSender::new(Duration::from_millis(300)),
            sink,
            stats: Arc::new(NodeStats::new(7)),
            rng: StdRng::seed_from_u64(42),
        }
    }

    const INTERNAL_ONLY: ActionWeights = ActionWeights {
        per_peer: 0,
        all_peers: 0,
        internal: 1,
    };

    #[test]
    fn test_decide_prefers_queued_message() {
        let mut rng = StdRng::seed_from_u64(1);
        let weights = ActionWeights::default();
        for _ in 0..100 {
            assert_eq!(decide(&mut rng, 3, &weights, 2), Action::Receive);
        }
    }

    #[test]
    fn test_decide_degenerate_weights() {
        let mut rng = StdRng::seed_from_u64(2);
        let broadcast_only = ActionWeights {
            per_peer: 0,
            all_peers: 1,
            internal: 0,
        };
        assert_eq!(decide(&mut rng, 0, &broadcast_only, 2), Action::SendAll);
        // Broadcast needs two peers; nothing left to draw.
        assert_eq!(decide(&mut rng, 0, &broadcast_only, 1), Action::Internal);

        let single_only = ActionWeights {
            per_peer: 1,
            all_peers: 0,
            internal: 0,
        };
        for _ in 0..50 {
            assert!(matches!(
                decide(&mut rng, 0, &single_only, 2),
                Action::SendTo(0) | Action::SendTo(1)
            ));
            // The empty second-peer slot idles instead of resending.
            assert!(matches!(
                decide(&mut rng, 0, &single_only, 1),
                Action::SendTo(0) | Action::Internal
            ));
        }
        assert_eq!(decide(&mut rng, 0, &INTERNAL_ONLY, 2), Action::Internal);
        assert_eq!(
            decide(&mut rng, 0, &ActionWeights::default(), 0),
            Action::Internal
        );
    }

    #[test]
    fn test_decide_default_distribution_matches_weights() {
        let mut rng = StdRng::seed_from_u64(1234);
        let weights = ActionWeights::default();
        let draws = 100_000;
        let mut counts: HashMap<Action, usize> = HashMap::new();
        for _ in 0..draws {
            *counts.entry(decide(&mut rng, 0, &weights, 2)).or_default() += 1;
        }
        let share = |a: Action| *counts.get(&a).unwrap_or(&0) as f64 / draws as f64;
        assert!((share(Action::SendTo(0)) - 0.1).abs() < 0.01);
        assert!((share(Action::SendTo(1)) - 0.1).abs() < 0.01);
        assert!((share(Action::SendAll) - 0.1).abs() < 0.01);
        assert!((share(Action::Internal) - 0.7).abs() < 0.01);
    }

    #[test]
    fn test_decide_single_peer_keeps_one_in_ten() {
        let mut rng = StdRng::seed_from_u64(4321);
        let weights = ActionWeights::default();
        let draws = 100_000;
        let mut sends = 0usize;
        for _ in 0..draws {
            match decide(&mut rng, 0, &weights, 1) {
                Action::SendTo(0) => sends += 1,
                Action::Internal => {}
                other => panic!("unexpected {:?}", other),
            }
        }
        let share = sends as f64 / draws as f64;
        assert!((share - 0.1).abs() < 0.01, "{}", share);
    }

    #[test]
    fn test_decide_spreads_over_every_peer() {
        let mut rng = StdRng::seed_from_u64(99);
        let weights = ActionWeights {
            per_peer: 3,
            all_peers: 0,
            internal: 0,
        };
        let mut seen = [0usize; 4];
        for _ in 0..4000 {
            match decide(&mut rng, 0, &weights, 4) {
                Action::SendTo(i) => seen[i] += 1,
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(seen.iter().all(|&n| n > 800), "{:?}", seen);
    }

    #[tokio::test]
    async fn test_receive_drains_queue_in_order() {
        let buffer = SharedBuffer::default();
        let queue = Arc::new(IncomingQueue::new());
        let mut scheduler = Scheduler::start(parts(
            EventLogSink::new(buffer.clone()),
            vec![],
            INTERNAL_ONLY,
            Arc::clone(&queue),
        ))
        .unwrap();

        for ts in [10, 2, 30] {
            queue.push(ts);
        }
        for _ in 0..4 {
            scheduler.step().await.unwrap();
        }
        scheduler.finish().unwrap();

        let records = buffer.records();
        let kinds: Vec<_> = records.iter().map(EventRecord::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Startup,
                EventKind::Receive,
                EventKind::Receive,
                EventKind::Receive,
                EventKind::Internal,
                EventKind::End,
            ]
        );
        let receives: Vec<_> = records
            .iter()
            .filter_map(|r| match r {
                EventRecord::Receive {
                    old_clock,
                    new_clock,
                    queue_len,
                    ..
                } => Some((*old_clock, *new_clock, *queue_len)),
                _ => None,
            })
            .collect();
        // 10 -> max(0,10)+1, 2 -> max(11,2)+1, 30 -> max(12,30)+1
        assert_eq!(receives, vec![(0, 11, 2), (11, 12, 1), (12, 31, 0)]);
        assert!(matches!(
            records.last(),
            Some(EventRecord::End { final_clock: 32, .. })
        ));
    }

    #[tokio::test]
    async fn test_send_increments_once_for_all_recipients() {
        let a = bind_listener("127.0.0.1:0".parse::<SocketAddr>().unwrap()).unwrap();
        let b = bind_listener("127.0.0.1:0".parse::<SocketAddr>().unwrap()).unwrap();
        let peers = vec![
            PeerAddr::new("127.0.0.1", a.local_addr().unwrap().port()),
            PeerAddr::new("127.0.0.1", b.local_addr().unwrap().port()),
        ];
        let broadcast_only = ActionWeights {
            per_peer: 0,
            all_peers: 1,
            internal: 0,
        };
        let buffer = SharedBuffer::default();
        let mut scheduler = Scheduler::start(parts(
            EventLogSink::new(buffer.clone()),
            peers.clone(),
            broadcast_only,
            Arc::new(IncomingQueue::new()),
        ))
        .unwrap();

        assert_eq!(scheduler.step().await.unwrap(), Action::SendAll);
        assert_eq!(scheduler.clock(), 1);

        for listener in [a, b] {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut text = String::new();
            tokio::io::AsyncReadExt::read_to_string(&mut stream, &mut text)
                .await
                .unwrap();
            assert_eq!(text, "1\n");
        }

        let records = buffer.records();
        assert_eq!(
            records[1],
            EventRecord::Send {
                system_time: records[1].system_time(),
                machine_id: 7,
                old_clock: 0,
                new_clock: 1,
                recipients: peers,
            }
        );
    }

    #[tokio::test]
    async fn test_failed_send_is_logged_not_fatal() {
        let gone: Vec<_> = (0..2)
            .map(|_| bind_listener("127.0.0.1:0".parse::<SocketAddr>().unwrap()).unwrap())
            .collect();
        let peers: Vec<_> = gone
            .iter()
            .map(|l| PeerAddr::new("127.0.0.1", l.local_addr().unwrap().port()))
            .collect();
        drop(gone);

        let single_only = ActionWeights {
            per_peer: 1,
            all_peers: 0,
            internal: 0,
        };
        let buffer = SharedBuffer::default();
        let p = parts(
            EventLogSink::new(buffer.clone()),
            peers,
            single_only,
            Arc::new(IncomingQueue::new()),
        );
        let stats = Arc::clone(&p.stats);
        let mut scheduler = Scheduler::start(p).unwrap();

        for _ in 0..2 {
            assert!(matches!(
                scheduler.step().await.unwrap(),
                Action::SendTo(_)
            ));
        }
        assert_eq!(scheduler.clock(), 2);
        assert_eq!(stats.snapshot().failed_sends, 2);
        assert_eq!(buffer.records().len(), 3);
    }

    #[tokio::test]
    async fn test_huge_queued_timestamp_cannot_wrap_clock() {
        let buffer = SharedBuffer::default();
        let queue = Arc::new(IncomingQueue::new());
        let p = parts(
            EventLogSink::new(buffer.clone()),
            vec![],
            INTERNAL_ONLY,
            Arc::clone(&queue),
        );
        let stats = Arc::clone(&p.stats);
        let mut scheduler = Scheduler::start(p).unwrap();

        queue.push(u64::MAX - 1);
        queue.push(MAX_TIMESTAMP);
        assert_eq!(scheduler.step().await.unwrap(), Action::Internal);
        assert_eq!(scheduler.clock(), 1);
        assert_eq!(stats.snapshot().malformed_lines, 1);

        assert_eq!(scheduler.step().await.unwrap(), Action::Receive);
        assert_eq!(scheduler.clock(), MAX_TIMESTAMP + 1);
        assert_eq!(scheduler.step().await.unwrap(), Action::Internal);
        assert_eq!(scheduler.clock(), MAX_TIMESTAMP + 2);

        let clocks: Vec<u64> = buffer
            .records()
            .iter()
            .filter_map(|r| r.clocks())
            .map(|(_, new)| new)
            .collect();
        assert!(clocks.windows(2).all(|w| w[0] < w[1]), "{:?}", clocks);
    }

    #[tokio::test]
    async fn test_nothing_after_end() {
        let buffer = SharedBuffer::default();
        let mut scheduler = Scheduler::start(parts(
            EventLogSink::new(buffer.clone()),
            vec![],
            INTERNAL_ONLY,
            Arc::new(IncomingQueue::new()),
        ))
        .unwrap();
        scheduler.step().await.unwrap();
        assert_eq!(scheduler.finish().unwrap(), 1);
        assert_eq!(scheduler.state(), SchedulerState::Stopped);

        assert!(matches!(
            scheduler.step().await,
            Err(NodeError::AlreadyStopped)
        ));
        assert!(matches!(scheduler.finish(), Err(NodeError::AlreadyStopped)));
        assert_eq!(buffer.records().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_respects_tick_rate() {
        let buffer = SharedBuffer::default();
        let mut scheduler = Scheduler::start(parts(
            EventLogSink::new(buffer.clone()),
            vec![],
            INTERNAL_ONLY,
            Arc::new(IncomingQueue::new()),
        ))
        .unwrap();
        assert_eq!(scheduler.tick_interval(), Duration::from_secs_f64(1.0 / 6.0));

        let deadline = Instant::now() + Duration::from_secs(2);
        scheduler.run_until(deadline).await.unwrap();
        assert_eq!(scheduler.state(), SchedulerState::ShuttingDown);

        // Six ticks per second for two seconds, give or take the boundary tick.
        let internals = buffer
            .records()
            .iter()
            .filter(|r| r.kind() == EventKind::Internal)
            .count();
        assert!((12..=13).contains(&internals), "{} ticks", internals);
    }

    #[tokio::test]
    async fn test_log_write_failure_is_fatal() {
        let result = Scheduler::start(parts(
            EventLogSink::new(BrokenWriter),
            vec![],
            INTERNAL_ONLY,
            Arc::new(IncomingQueue::new()),
        ));
        assert!(matches!(result, Err(NodeError::LogWrite(_))));
    }

    #[test]
    fn test_zero_clock_rate_rejected() {
        let mut p = parts(
            EventLogSink::new(SharedBuffer::default()),
            vec![],
            INTERNAL_ONLY,
            Arc::new(IncomingQueue::new()),
        );
        p.clock_rate = 0;
        assert!(matches!(
            Scheduler::start(p),
            Err(NodeError::InvalidConfig(_))
        ));
    }
}
