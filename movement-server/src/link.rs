//! Simulated network link between the hosted client and server.
//!
//! Each direction is a lane of encoded packets stamped with a delivery
//! time. Latency, jitter and loss are seeded, so a run with the same
//! config replays the same packet fate. Jitter can reorder packets; the
//! reconciliation layer is what makes that safe.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use movement_core::error::CodecError;
use movement_core::net::{decode, encode, ClientMessage, ServerMessage};

#[derive(Debug, Error)]
pub enum LinkError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("packet of {size} bytes exceeds the {max} byte limit")]
    PacketTooLarge { size: usize, max: usize },

    #[error("invalid link config: {0}")]
    InvalidConfig(String),
}

/// Link conditions for one direction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// One-way delay in seconds
    pub latency: f32,
    /// Uniform extra delay in `[0, jitter)` seconds
    pub jitter: f32,
    /// Probability in `[0, 1)` that a packet is dropped
    pub loss: f32,
    pub max_packet_size: usize,
    pub seed: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            latency: 0.05,
            jitter: 0.0,
            loss: 0.0,
            max_packet_size: 1200,
            seed: 0x5eed,
        }
    }
}

impl LinkConfig {
    pub fn validate(&self) -> Result<(), LinkError> {
        if !(self.latency >= 0.0 && self.jitter >= 0.0) {
            return Err(LinkError::InvalidConfig("latency and jitter must be non-negative".into()));
        }
        if !(0.0..1.0).contains(&self.loss) {
            return Err(LinkError::InvalidConfig(format!("loss {} outside [0, 1)", self.loss)));
        }
        if self.max_packet_size == 0 {
            return Err(LinkError::InvalidConfig("max_packet_size must be positive".into()));
        }
        Ok(())
    }
}

/// Counters for one lane
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LaneStats {
    pub sent: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub bytes: u64,
}

#[derive(Debug)]
struct Lane {
    config: LinkConfig,
    rng: Xoshiro256PlusPlus,
    in_flight: VecDeque<(f64, Vec<u8>)>,
    stats: LaneStats,
}

impl Lane {
    fn new(config: LinkConfig, stream: u64) -> Self {
        let rng = Xoshiro256PlusPlus::seed_from_u64(config.seed ^ stream);
        Self {
            config,
            rng,
            in_flight: VecDeque::new(),
            stats: LaneStats::default(),
        }
    }

    fn push(&mut self, now: f64, bytes: Vec<u8>) {
        self.stats.sent += 1;
        self.stats.bytes += bytes.len() as u64;
        if self.config.loss > 0.0 && self.rng.gen::<f32>() < self.config.loss {
            self.stats.dropped += 1;
            return;
        }
        let jitter = if self.config.jitter > 0.0 {
            self.rng.gen_range(0.0..self.config.jitter)
        } else {
            0.0
        };
        let deliver_at = now + f64::from(self.config.latency + jitter);
        // Keep the queue sorted by delivery time; equal times stay in send order
        let index = self.in_flight.partition_point(|(at, _)| *at <= deliver_at);
        self.in_flight.insert(index, (deliver_at, bytes));
    }

    fn pop_due(&mut self, now: f64) -> Vec<Vec<u8>> {
        let mut due = Vec::new();
        while self.in_flight.front().is_some_and(|(at, _)| *at <= now) {
            if let Some((_, bytes)) = self.in_flight.pop_front() {
                due.push(bytes);
            }
        }
        self.stats.delivered += due.len() as u64;
        due
    }
}

/// One end of the link: sends `Out`, receives `In`
pub struct LinkEnd<Out, In> {
    outgoing: Arc<Mutex<Lane>>,
    incoming: Arc<Mutex<Lane>>,
    _marker: PhantomData<fn(Out) -> In>,
}

impl<Out, In> Clone for LinkEnd<Out, In> {
    fn clone(&self) -> Self {
        Self {
            outgoing: Arc::clone(&self.outgoing),
            incoming: Arc::clone(&self.incoming),
            _marker: PhantomData,
        }
    }
}

pub type ClientLink = LinkEnd<ServerMessage, ClientMessage>;
pub type ServerLink = LinkEnd<ClientMessage, ServerMessage>;

/// Client and server ends of a link with the same conditions both ways
pub fn link_pair(config: &LinkConfig) -> Result<(ClientLink, ServerLink), LinkError> {
    config.validate()?;
    let upstream = Arc::new(Mutex::new(Lane::new(config.clone(), 1)));
    let downstream = Arc::new(Mutex::new(Lane::new(config.clone(), 2)));
    Ok((
        LinkEnd {
            outgoing: Arc::clone(&upstream),
            incoming: Arc::clone(&downstream),
            _marker: PhantomData,
        },
        LinkEnd {
            outgoing: downstream,
            incoming: upstream,
            _marker: PhantomData,
        },
    ))
}

impl<Out: Serialize, In: DeserializeOwned> LinkEnd<Out, In> {
    /// Encodes and queues a message; returns the packet size
    pub fn send(&self, now: f64, message: &Out) -> Result<usize, LinkError> {
        let bytes = encode(message)?;
        let size = bytes.len();
        let mut lane = self.outgoing.lock();
        if size > lane.config.max_packet_size {
            return Err(LinkError::PacketTooLarge {
                size,
                max: lane.config.max_packet_size,
            });
        }
        lane.push(now, bytes);
        Ok(size)
    }

    /// Messages whose delivery time has come. Undecodable packets are logged and skipped.
    pub fn receive(&self, now: f64) -> Vec<In> {
        let due = self.incoming.lock().pop_due(now);
        due.iter()
            .filter_map(|bytes| match decode(bytes) {
                Ok(message) => Some(message),
                Err(err) => {
                    tracing::warn!(%err, len = bytes.len(), "dropping undecodable packet");
                    None
                }
            })
            .collect()
    }

    pub fn in_flight(&self) -> usize {
        self.outgoing.lock().in_flight.len() + self.incoming.lock().in_flight.len()
    }

    pub fn sent_stats(&self) -> LaneStats {
        self.outgoing.lock().stats
    }

    pub fn received_stats(&self) -> LaneStats {
        self.incoming.lock().stats
    }
}
