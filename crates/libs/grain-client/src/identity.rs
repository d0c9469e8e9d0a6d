//! Client identity and generation assignment (C1).
//!
//! A client distinguishes itself from a server by a negative generation
//! number. Generations are drawn from a single process-wide monotonic
//! counter so that two clients hosted in the same process (the "secondary"
//! construction mode used by test harnesses, see spec.md §9 Open Question c)
//! never collide.

use rand_core::{OsRng, RngCore};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::OnceLock;

static NEXT_GENERATION: AtomicI64 = AtomicI64::new(1);

/// Opaque silo-assigned address a gateway proxies a client through.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SiloAddress(pub [u8; 16]);

/// A grain id: either a client-addressable target or a remote grain.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct GrainId(pub u128);

impl GrainId {
    /// Allocates a fresh id tagged as a client-addressable grain. The high
    /// bit is reserved to mark "client target" the same way `generation`'s
    /// sign marks client vs. server identities — cheap to check, hard to
    /// forge by accident.
    pub fn new_client_target() -> Self {
        let mut rng = OsRng;
        let mut bytes = [0u8; 16];
        rng.fill_bytes(&mut bytes);
        let mut value = u128::from_be_bytes(bytes);
        value |= 1 << 127;
        GrainId(value)
    }

    pub fn is_client_target(&self) -> bool {
        self.0 & (1 << 127) != 0
    }
}

/// Per-activation identifier stamped on outbound messages.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ActivationId(pub u128);

impl ActivationId {
    pub fn new() -> Self {
        let mut rng = OsRng;
        let mut bytes = [0u8; 16];
        rng.fill_bytes(&mut bytes);
        ActivationId(u128::from_be_bytes(bytes))
    }

    /// Deterministic activation id for a system target, derived from
    /// `(grain_id, silo)` so repeated sends address the same activation
    /// without a round trip.
    pub fn for_system_target(grain_id: GrainId, silo: SiloAddress) -> Self {
        let mut acc = grain_id.0;
        for chunk in silo.0.chunks(8) {
            let mut buf = [0u8; 8];
            buf[..chunk.len()].copy_from_slice(chunk);
            acc ^= u128::from(u64::from_be_bytes(buf)) << 32;
        }
        ActivationId(acc)
    }
}

impl Default for ActivationId {
    fn default() -> Self {
        Self::new()
    }
}

/// Fresh per-process client identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ClientGuid(pub u128);

impl ClientGuid {
    pub fn new() -> Self {
        let mut rng = OsRng;
        let mut bytes = [0u8; 16];
        rng.fill_bytes(&mut bytes);
        ClientGuid(u128::from_be_bytes(bytes))
    }
}

impl Default for ClientGuid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// The address a gateway routes responses back to, materialized only after
/// the transport's local endpoint is known (i.e. after `Start`).
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct ClientAddress {
    pub grain_id: GrainId,
    pub activation_id: ActivationId,
    pub endpoint: String,
}

/// `{ clientGuid, generation < 0, selfGrainId, selfAddress }`.
#[derive(Debug)]
pub struct ClientIdentity {
    pub client_guid: ClientGuid,
    pub generation: i64,
    pub self_grain_id: GrainId,
    pub self_activation_id: ActivationId,
    self_address: OnceLock<ClientAddress>,
}

impl ClientIdentity {
    /// Allocates a fresh identity: negated next generation, fresh guid, and
    /// a client-addressable self grain id. `self_address` is left unset
    /// until the transport completes `start`.
    pub fn allocate() -> Self {
        let generation = -NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
        debug_assert!(generation < 0, "client generation must be negative");
        Self {
            client_guid: ClientGuid::new(),
            generation,
            self_grain_id: GrainId::new_client_target(),
            self_activation_id: ActivationId::new(),
            self_address: OnceLock::new(),
        }
    }

    /// Reads the self address. Returns `None` if `Start` has not completed
    /// transport binding yet — callers map this to
    /// `ClientError::InvalidContext` at the API boundary.
    pub fn self_address(&self) -> Option<&ClientAddress> {
        self.self_address.get()
    }

    /// Called once by the lifecycle manager right after transport start.
    /// Subsequent calls are no-ops: the address is materialized exactly
    /// once per identity.
    pub fn bind_self_address(&self, endpoint: String) {
        let _ = self.self_address.set(ClientAddress {
            grain_id: self.self_grain_id,
            activation_id: self.self_activation_id,
            endpoint,
        });
    }
}
