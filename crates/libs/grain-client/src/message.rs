//! The wire data model: correlation ids, messages, responses, headers.

use crate::config::ClientConfig;
use crate::identity::{ActivationId, GrainId, SiloAddress};
use rand_core::{OsRng, RngCore};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

static NEXT_CORRELATION_SEQ: AtomicU64 = AtomicU64::new(1);

/// Cross-node clock skew absorbed into expiration stamping (§4.4 step 6).
pub const MAXIMUM_CLOCK_SKEW: Duration = Duration::from_secs(60);

/// Header key carrying the accumulated chain of prior targets a resent
/// message has been bounced off of.
pub const TARGET_HISTORY: &str = "target-history";

/// Opaque unique token per outbound request; unique for the lifetime of any
/// outstanding request in the process (sequence counter salted with a
/// random process seed, so ids never collide across client instances
/// sharing a process).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct CorrelationId(pub u64);

impl CorrelationId {
    pub fn generate() -> Self {
        static PROCESS_SALT: AtomicU64 = AtomicU64::new(0);
        let salt = {
            let mut current = PROCESS_SALT.load(Ordering::Relaxed);
            if current == 0 {
                let mut rng = OsRng;
                let mut buf = [0u8; 8];
                rng.fill_bytes(&mut buf);
                let generated = u64::from_be_bytes(buf) | 1;
                match PROCESS_SALT.compare_exchange(
                    0,
                    generated,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => current = generated,
                    Err(existing) => current = existing,
                }
            }
            current
        };
        let seq = NEXT_CORRELATION_SEQ.fetch_add(1, Ordering::Relaxed);
        CorrelationId(seq ^ salt)
    }
}

/// Message direction, as in spec.md §3.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Direction {
    Request,
    Response,
    OneWay,
}

/// What an inbound response carries.
#[derive(Clone, Debug)]
pub enum Response {
    Value(Vec<u8>),
    Exception(Vec<u8>),
    Rejection(RejectionKind),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RejectionKind {
    DuplicateRequest,
    GatewayTooBusy,
    Unrecoverable,
}

/// A wire message. Owned by its current holder; handing it to the
/// transport transfers ownership (`OutboundPath::dispatch` consumes it).
#[derive(Clone, Debug)]
pub struct Message {
    pub id: CorrelationId,
    pub direction: Direction,
    pub sending_grain: GrainId,
    pub sending_activation: ActivationId,
    pub target_grain: GrainId,
    pub target_silo: Option<SiloAddress>,
    pub target_activation: Option<ActivationId>,
    pub generic_grain_type: Option<String>,
    pub debug_context: Option<String>,
    pub body: Vec<u8>,
    pub headers: BTreeMap<String, String>,
    pub expiration: Option<Instant>,
    pub resend_count: u32,
    pub response: Option<Response>,
}

impl Message {
    pub fn new_request(
        id: CorrelationId,
        sending_grain: GrainId,
        sending_activation: ActivationId,
        target_grain: GrainId,
        direction: Direction,
        body: Vec<u8>,
    ) -> Self {
        Self {
            id,
            direction,
            sending_grain,
            sending_activation,
            target_grain,
            target_silo: None,
            target_activation: None,
            generic_grain_type: None,
            debug_context: None,
            body,
            headers: BTreeMap::new(),
            expiration: None,
            resend_count: 0,
            response: None,
        }
    }

    pub fn is_system_target(&self) -> bool {
        self.target_silo.is_some()
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.expiration, Some(deadline) if Instant::now() >= deadline)
    }

    /// Expirable unless the target is a system target (§4.4 step 6).
    pub fn is_expirable(&self, _config: &ClientConfig) -> bool {
        !self.is_system_target()
    }

    /// Whether a timed-out request may still be resent, bounded by the
    /// configured resend budget.
    pub fn may_resend(&self, config: &ClientConfig) -> bool {
        self.resend_count < config.max_resend_count
    }

    /// Applies the resend policy: bump the counter, append to
    /// `TARGET_HISTORY` unconditionally, and for non-system targets strip
    /// the activation and silo stamps so the gateway rebinds (§4.4 TryResend
    /// policy).
    pub fn prepare_for_resend(&mut self) {
        self.resend_count += 1;
        let entry = format!("{:?}@{:?}", self.target_grain, self.target_silo);
        self.headers
            .entry(TARGET_HISTORY.to_string())
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(&entry);
            })
            .or_insert(entry);
        if !self.is_system_target() {
            self.target_activation = None;
            self.headers.remove("target-activation");
            self.headers.remove("target-silo");
        }
    }
}
