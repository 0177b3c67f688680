//! Typed models and codecs for garden state payloads.
//!
//! The store speaks a small Italian-keyed JSON document
//! (`{stato, famiglia, timestamp}`); everything inside the crate works on the
//! validated [`ResourceState`] instead.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoordinationError, CoordinationResult};

/// Default roster of parties sharing the garden.
pub const DEFAULT_ROSTER: &[&str] = &["ermes-ben", "raya", "Visualizzatore"];

/// Default reserved read-only observer.
pub const DEFAULT_OBSERVER: &str = "Visualizzatore";

// ---------------------------------------------------------------------------
// Occupancy
// ---------------------------------------------------------------------------

/// Whether the garden is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Occupancy {
    /// Nobody holds the garden.
    #[serde(rename = "libero")]
    Free,
    /// A party holds the garden.
    #[serde(rename = "occupato")]
    Occupied,
}

impl fmt::Display for Occupancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Occupancy::Free => write!(f, "libero"),
            Occupancy::Occupied => write!(f, "occupato"),
        }
    }
}

// ---------------------------------------------------------------------------
// Parties
// ---------------------------------------------------------------------------

/// Self-declared identity of a party. Only values from a [`Roster`] are
/// meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartyId(String);

impl PartyId {
    /// Wrap a raw party name without roster validation.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The party name as sent on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartyId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Fixed set of parties known at config time, one of which is the read-only
/// observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    parties: Vec<PartyId>,
    observer: PartyId,
}

impl Roster {
    /// Build a roster. The observer must be one of `parties` and names must be
    /// unique and non-empty.
    pub fn new<I, S>(parties: I, observer: &str) -> CoordinationResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list: Vec<PartyId> = Vec::new();
        for name in parties {
            let name = name.as_ref().trim();
            if name.is_empty() {
                return Err(CoordinationError::Config(
                    "roster contains an empty party name".into(),
                ));
            }
            let party = PartyId::new(name);
            if list.contains(&party) {
                return Err(CoordinationError::Config(format!(
                    "roster lists party '{name}' twice"
                )));
            }
            list.push(party);
        }
        let observer = PartyId::new(observer.trim());
        if !list.contains(&observer) {
            return Err(CoordinationError::Config(format!(
                "observer '{observer}' is not part of the roster"
            )));
        }
        Ok(Self {
            parties: list,
            observer,
        })
    }

    /// Look up a party by name.
    pub fn resolve(&self, name: &str) -> Option<PartyId> {
        self.parties.iter().find(|p| p.as_str() == name).cloned()
    }

    /// All parties, observer included.
    pub fn parties(&self) -> &[PartyId] {
        &self.parties
    }

    /// The reserved read-only party.
    pub fn observer(&self) -> &PartyId {
        &self.observer
    }

    /// Returns true if `party` may only watch.
    pub fn is_observer(&self, party: &PartyId) -> bool {
        &self.observer == party
    }
}

impl Default for Roster {
    fn default() -> Self {
        Self {
            parties: DEFAULT_ROSTER.iter().copied().map(PartyId::from).collect(),
            observer: PartyId::from(DEFAULT_OBSERVER),
        }
    }
}

// ---------------------------------------------------------------------------
// Resource state
// ---------------------------------------------------------------------------

/// Raw wire document. Every field is optional here so a partial payload can be
/// reported as a protocol error instead of a generic decode failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stato: Option<Occupancy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub famiglia: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// Immutable snapshot of the garden as recorded by the store.
///
/// When `occupancy` is [`Occupancy::Free`] the party field records the last
/// user rather than a holder; use [`ResourceState::holder`] to ask who holds
/// the garden.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "StatePayload", try_from = "StatePayload")]
pub struct ResourceState {
    occupancy: Occupancy,
    party: PartyId,
    since: i64,
}

impl ResourceState {
    /// Snapshot marking `party` as holder since `since` (ms since epoch).
    pub fn occupied(party: PartyId, since: i64) -> Self {
        Self {
            occupancy: Occupancy::Occupied,
            party,
            since,
        }
    }

    /// Snapshot marking the garden free, last used by `party`.
    pub fn free(party: PartyId, since: i64) -> Self {
        Self {
            occupancy: Occupancy::Free,
            party,
            since,
        }
    }

    pub fn occupancy(&self) -> Occupancy {
        self.occupancy
    }

    pub fn is_free(&self) -> bool {
        self.occupancy == Occupancy::Free
    }

    /// The holder, only while occupied.
    pub fn holder(&self) -> Option<&PartyId> {
        match self.occupancy {
            Occupancy::Occupied => Some(&self.party),
            Occupancy::Free => None,
        }
    }

    /// The party named in the snapshot: holder when occupied, last user when
    /// free.
    pub fn party(&self) -> &PartyId {
        &self.party
    }

    /// Milliseconds since the unix epoch when this state was written.
    pub fn since(&self) -> i64 {
        self.since
    }

    /// Returns true if `party` holds the garden in this snapshot.
    pub fn is_held_by(&self, party: &PartyId) -> bool {
        self.holder() == Some(party)
    }

    /// Returns true if someone other than `party` holds the garden.
    pub fn is_held_by_other(&self, party: &PartyId) -> bool {
        matches!(self.holder(), Some(holder) if holder != party)
    }
}

impl TryFrom<StatePayload> for ResourceState {
    type Error = CoordinationError;

    fn try_from(payload: StatePayload) -> CoordinationResult<Self> {
        let occupancy = payload
            .stato
            .ok_or_else(|| CoordinationError::Protocol("state payload missing 'stato'".into()))?;
        let party = payload.famiglia.ok_or_else(|| {
            CoordinationError::Protocol("state payload missing 'famiglia'".into())
        })?;
        let since = payload.timestamp.ok_or_else(|| {
            CoordinationError::Protocol("state payload missing 'timestamp'".into())
        })?;
        Ok(Self {
            occupancy,
            party: PartyId::new(party),
            since,
        })
    }
}

impl From<ResourceState> for StatePayload {
    fn from(state: ResourceState) -> Self {
        StatePayload {
            stato: Some(state.occupancy),
            famiglia: Some(state.party.0),
            timestamp: Some(state.since),
        }
    }
}

// ---------------------------------------------------------------------------
// Connectivity
// ---------------------------------------------------------------------------

/// How reachable the store currently is from this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityStatus {
    /// No health probe has answered yet.
    Bootstrapping,
    /// Health probes are failing and being retried.
    Connecting,
    /// The store answered the last probe or poll.
    Connected,
    /// The last poll failed; the held state may be stale.
    Degraded,
}

impl ConnectivityStatus {
    /// Claim/release writes are only admitted while connected.
    pub fn admits_writes(&self) -> bool {
        matches!(self, ConnectivityStatus::Connected)
    }
}

impl fmt::Display for ConnectivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectivityStatus::Bootstrapping => write!(f, "bootstrapping"),
            ConnectivityStatus::Connecting => write!(f, "connecting"),
            ConnectivityStatus::Connected => write!(f, "connected"),
            ConnectivityStatus::Degraded => write!(f, "degraded"),
        }
    }
}

// ---------------------------------------------------------------------------
// Codec helpers
// ---------------------------------------------------------------------------

/// Encode a model value to JSON bytes.
pub fn encode<T: Serialize>(value: &T) -> CoordinationResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| CoordinationError::Protocol(e.to_string()))
}

/// Decode JSON bytes into a typed model. Missing fields and unknown `stato`
/// values surface as [`CoordinationError::Protocol`].
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> CoordinationResult<T> {
    serde_json::from_slice(data).map_err(|e| CoordinationError::Protocol(e.to_string()))
}

/// Current wall-clock time in milliseconds since the unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
