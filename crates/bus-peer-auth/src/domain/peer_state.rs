//! # Peer State
//!
//! Everything this node knows about one remote peer: the negotiated
//! version, session and group keys, access rights, replay window, clock
//! offset and, while a negotiation is running, the conversation transcript.
//!
//! ## Locking
//!
//! | Lock                      | Kind                  | Guards                   |
//! |---------------------------|-----------------------|--------------------------|
//! | `PeerStateTable::peers`   | `parking_lot::RwLock` | name to state map        |
//! | `PeerState::inner`        | `parking_lot::Mutex`  | keys, rights, window     |
//! | `PeerState::transcript`   | `tokio::sync::Mutex`  | conversation hash        |
//!
//! The table lock is always taken before a state's own locks, and
//! `inner` is never held across an await.

use std::collections::HashMap;
use std::sync::Arc;

use bus_crypto::ConversationHash;
use bus_types::{BusResult, Guid128, Message};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{watch, Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use super::key_blob::{now_ms, KeyBlob, KeyRole, GROUP_KEY_TAG};
use super::rights::{AccessRights, ALLOW_SECURE_TX};
use super::version::{auth_version, CONVERSATION_V4};

/// Size of the replay detection window.
pub const SERIAL_WINDOW_SIZE: usize = 128;

/// Interval after which the clock offset is nudged to re-confirm the minimum.
const CLOCK_DRIFT_INTERVAL_MS: u32 = 10_000;

/// Outcome broadcast to everyone waiting on an authentication.
pub type AuthOutcome = Option<BusResult<()>>;

/// Result of trying to start an authentication with a peer.
pub enum AuthClaim {
    /// This caller owns the conversation and must publish the outcome.
    Started(watch::Sender<AuthOutcome>),
    /// Another caller owns it; wait on this receiver.
    InProgress(watch::Receiver<AuthOutcome>),
}

struct ClockState {
    offset: i32,
    last_drift_adjust: u32,
    first: bool,
}

struct PeerInner {
    guid: Option<Guid128>,
    auth_version: u32,
    session_key: Option<KeyBlob>,
    group_key: Option<KeyBlob>,
    rights: AccessRights,
    is_secure: bool,
    is_local: bool,
    public_key: Option<Vec<u8>>,
    issuer_keys: Vec<Vec<u8>>,
    manifest: Vec<u8>,
    memberships: Vec<Vec<u8>>,
    window: [u32; SERIAL_WINDOW_SIZE],
    clock: ClockState,
    auth_event: Option<watch::Receiver<AuthOutcome>>,
}

pub struct PeerState {
    inner: Mutex<PeerInner>,
    transcript: AsyncMutex<Option<ConversationHash>>,
}

impl Default for PeerState {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PeerInner {
                guid: None,
                auth_version: 0,
                session_key: None,
                group_key: None,
                rights: AccessRights::none(),
                is_secure: false,
                is_local: false,
                public_key: None,
                issuer_keys: Vec::new(),
                manifest: Vec::new(),
                memberships: Vec::new(),
                window: [0; SERIAL_WINDOW_SIZE],
                clock: ClockState {
                    offset: 0,
                    last_drift_adjust: 0,
                    first: true,
                },
                auth_event: None,
            }),
            transcript: AsyncMutex::new(None),
        }
    }

    // =========================================================================
    // IDENTITY
    // =========================================================================

    #[must_use]
    pub fn guid(&self) -> Option<Guid128> {
        self.inner.lock().guid
    }

    #[must_use]
    pub fn auth_version(&self) -> u32 {
        self.inner.lock().auth_version
    }

    pub fn set_guid_and_auth_version(&self, guid: Guid128, version: u32) {
        let mut inner = self.inner.lock();
        inner.guid = Some(guid);
        inner.auth_version = version;
    }

    #[must_use]
    pub fn is_local(&self) -> bool {
        self.inner.lock().is_local
    }

    pub fn set_local(&self, local: bool) {
        self.inner.lock().is_local = local;
    }

    // =========================================================================
    // KEYS AND RIGHTS
    // =========================================================================

    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.inner.lock().is_secure
    }

    /// Install a session key; the peer counts as secure from now on.
    pub fn set_session_key(&self, key: KeyBlob) {
        let mut inner = self.inner.lock();
        inner.session_key = Some(key);
        inner.is_secure = true;
    }

    pub fn set_group_key(&self, key: KeyBlob) {
        self.inner.lock().group_key = Some(key);
    }

    #[must_use]
    pub fn session_key(&self) -> Option<KeyBlob> {
        self.inner.lock().session_key.clone()
    }

    #[must_use]
    pub fn group_key(&self) -> Option<KeyBlob> {
        self.inner.lock().group_key.clone()
    }

    /// Forget both keys; the next secure message re-authenticates.
    pub fn clear_keys(&self) {
        let mut inner = self.inner.lock();
        inner.session_key = None;
        inner.group_key = None;
        inner.is_secure = false;
    }

    #[must_use]
    pub fn rights(&self) -> AccessRights {
        self.inner.lock().rights
    }

    pub fn set_rights(&self, rights: AccessRights) {
        self.inner.lock().rights = rights;
    }

    pub fn allow_signal_tx(&self) {
        let mut inner = self.inner.lock();
        inner.rights.0[bus_types::MessageType::Signal.index()] |= ALLOW_SECURE_TX;
    }

    // =========================================================================
    // IDENTITY MATERIAL (ECDSA SUITE)
    // =========================================================================

    pub fn set_identity(&self, public_key: Option<Vec<u8>>, issuer_keys: Vec<Vec<u8>>) {
        let mut inner = self.inner.lock();
        inner.public_key = public_key;
        inner.issuer_keys = issuer_keys;
    }

    #[must_use]
    pub fn public_key(&self) -> Option<Vec<u8>> {
        self.inner.lock().public_key.clone()
    }

    #[must_use]
    pub fn issuer_keys(&self) -> Vec<Vec<u8>> {
        self.inner.lock().issuer_keys.clone()
    }

    pub fn set_manifest(&self, manifest: Vec<u8>) {
        self.inner.lock().manifest = manifest;
    }

    #[must_use]
    pub fn manifest(&self) -> Vec<u8> {
        self.inner.lock().manifest.clone()
    }

    pub fn set_memberships(&self, memberships: Vec<Vec<u8>>) {
        self.inner.lock().memberships = memberships;
    }

    #[must_use]
    pub fn memberships(&self) -> Vec<Vec<u8>> {
        self.inner.lock().memberships.clone()
    }

    // =========================================================================
    // REPLAY WINDOW AND CLOCK
    // =========================================================================

    /// Replay check for an incoming serial number.
    ///
    /// Serial 0 is never valid. A serial is accepted once per window slot
    /// and only if it lies in the forward half of the serial space from the
    /// serial last seen in that slot.
    pub fn is_valid_serial(&self, serial: u32, _secure: bool, _unreliable: bool) -> bool {
        if serial == 0 {
            return false;
        }
        let mut inner = self.inner.lock();
        let slot = serial as usize % SERIAL_WINDOW_SIZE;
        let entry = inner.window[slot];
        if entry != serial && in_range(serial, entry, u32::MAX / 2) {
            inner.window[slot] = serial;
            true
        } else {
            false
        }
    }

    /// Map a remote timestamp (ms) into local time using the smallest
    /// offset seen so far.
    pub fn estimate_timestamp(&self, remote: u32) -> u32 {
        self.estimate_timestamp_at(remote, local_timestamp())
    }

    pub(crate) fn estimate_timestamp_at(&self, remote: u32, local: u32) -> u32 {
        let mut inner = self.inner.lock();
        let clock = &mut inner.clock;
        let delta = local.wrapping_sub(remote) as i32;
        let old_offset = clock.offset;

        if local.wrapping_sub(clock.last_drift_adjust) > CLOCK_DRIFT_INTERVAL_MS {
            clock.last_drift_adjust = local;
            clock.offset = clock.offset.wrapping_add(1);
        }
        if old_offset.wrapping_sub(delta) > 0 || clock.first {
            clock.offset = delta;
            clock.first = false;
        }
        remote.wrapping_add(clock.offset as u32)
    }

    // =========================================================================
    // AUTHENTICATION EVENT
    // =========================================================================

    /// Claim the right to run the authentication conversation with this peer.
    pub fn begin_authentication(&self) -> AuthClaim {
        let mut inner = self.inner.lock();
        if let Some(rx) = &inner.auth_event {
            if rx.borrow().is_none() {
                return AuthClaim::InProgress(rx.clone());
            }
        }
        let (tx, rx) = watch::channel(None);
        inner.auth_event = Some(rx);
        AuthClaim::Started(tx)
    }

    #[must_use]
    pub fn authentication_in_progress(&self) -> bool {
        self.inner
            .lock()
            .auth_event
            .as_ref()
            .is_some_and(|rx| rx.borrow().is_none())
    }

    /// Publish the outcome and release every waiter.
    pub fn finish_authentication(&self, tx: &watch::Sender<AuthOutcome>, outcome: BusResult<()>) {
        let mut inner = self.inner.lock();
        let _ = tx.send(Some(outcome));
        inner.auth_event = None;
    }

    // =========================================================================
    // CONVERSATION TRANSCRIPT
    // =========================================================================

    /// Lock the conversation transcript.
    pub async fn transcript(&self) -> Transcript<'_> {
        let guard = self.transcript.lock().await;
        Transcript {
            guard,
            auth_version: auth_version(self.auth_version()),
        }
    }
}

/// Wait for a running authentication to publish its outcome.
pub async fn wait_for_outcome(mut rx: watch::Receiver<AuthOutcome>) -> BusResult<()> {
    loop {
        if let Some(outcome) = rx.borrow().clone() {
            return outcome;
        }
        if rx.changed().await.is_err() {
            return rx
                .borrow()
                .clone()
                .unwrap_or(Err(bus_types::BusError::AuthFail));
        }
    }
}

fn in_range(val: u32, start: u32, size: u32) -> bool {
    let end = start.wrapping_add(size);
    if start <= end {
        val >= start && val < end
    } else {
        !(val >= end && val < start)
    }
}

fn local_timestamp() -> u32 {
    (now_ms() & u64::from(u32::MAX)) as u32
}

/// Locked conversation transcript of one peer.
///
/// Updates tagged v1 apply only to peers below version 4; updates tagged v4
/// apply only at version 4, where byte strings are length prefixed.
pub struct Transcript<'a> {
    guard: AsyncMutexGuard<'a, Option<ConversationHash>>,
    auth_version: u16,
}

impl Transcript<'_> {
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.guard.is_some()
    }

    pub fn initialize(&mut self) {
        *self.guard = Some(ConversationHash::new());
    }

    pub fn free(&mut self) {
        *self.guard = None;
    }

    pub fn update_v1(&mut self, data: &[u8]) {
        if self.auth_version >= CONVERSATION_V4 {
            return;
        }
        if let Some(hash) = self.guard.as_mut() {
            hash.update(data);
        }
    }

    pub fn update_v4(&mut self, data: &[u8]) {
        if self.auth_version != CONVERSATION_V4 {
            return;
        }
        if let Some(hash) = self.guard.as_mut() {
            hash.update_length_prefixed(data);
        }
    }

    /// Hash a whole message (version 4 only).
    pub fn update_message(&mut self, msg: &Message) {
        if self.auth_version != CONVERSATION_V4 || self.guard.is_none() {
            return;
        }
        match msg.to_bytes() {
            Ok(bytes) => self.update_v4(&bytes),
            Err(e) => tracing::warn!(error = %e, "message could not be hashed"),
        }
    }

    /// Current digest, or zeros outside a conversation.
    #[must_use]
    pub fn digest(&self) -> [u8; 32] {
        self.guard.as_ref().map_or([0; 32], ConversationHash::digest)
    }
}

// =============================================================================
// PEER STATE TABLE
// =============================================================================

/// Peer states by bus name. Unique names and their aliases share one state.
pub struct PeerStateTable {
    peers: RwLock<HashMap<String, Arc<PeerState>>>,
    /// Carrier of the local group key.
    group: RwLock<Arc<PeerState>>,
}

impl Default for PeerStateTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerStateTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            group: RwLock::new(Arc::new(new_group_peer())),
        }
    }

    #[must_use]
    pub fn is_known_peer(&self, name: &str) -> bool {
        self.peers.read().contains_key(name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<PeerState>> {
        self.peers.read().get(name).cloned()
    }

    pub fn get_or_create(&self, name: &str) -> Arc<PeerState> {
        if let Some(state) = self.get(name) {
            return state;
        }
        Arc::clone(
            self.peers
                .write()
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(PeerState::new())),
        )
    }

    /// State shared by `unique` and `alias`, created if neither has one.
    pub fn link(&self, unique: &str, alias: &str) -> Arc<PeerState> {
        let mut peers = self.peers.write();
        let state = match peers.get(unique) {
            Some(state) => Arc::clone(state),
            None => Arc::clone(
                peers
                    .entry(alias.to_string())
                    .or_insert_with(|| Arc::new(PeerState::new())),
            ),
        };
        peers.insert(unique.to_string(), Arc::clone(&state));
        peers.insert(alias.to_string(), Arc::clone(&state));
        state
    }

    /// True when both names resolve to the same peer.
    #[must_use]
    pub fn is_alias(&self, a: &str, b: &str) -> bool {
        if a == b {
            return true;
        }
        let peers = self.peers.read();
        match (peers.get(a), peers.get(b)) {
            (Some(x), Some(y)) => Arc::ptr_eq(x, y),
            _ => false,
        }
    }

    #[must_use]
    pub fn find_by_guid(&self, guid: &Guid128) -> Option<Arc<PeerState>> {
        self.peers
            .read()
            .values()
            .find(|state| state.guid().as_ref() == Some(guid))
            .cloned()
    }

    pub fn remove(&self, name: &str) {
        self.peers.write().remove(name);
    }

    /// Drop every peer and mint a new group key.
    pub fn clear(&self) {
        let mut peers = self.peers.write();
        peers.clear();
        *self.group.write() = Arc::new(new_group_peer());
    }

    /// The local group key.
    #[must_use]
    pub fn group_key(&self) -> Option<KeyBlob> {
        let group = self.group.read();
        group.allow_signal_tx();
        group.session_key()
    }

    #[must_use]
    pub fn secure_peer_count(&self) -> usize {
        let peers = self.peers.read();
        let mut seen: Vec<*const PeerState> = Vec::new();
        for state in peers.values() {
            let ptr = Arc::as_ptr(state);
            if state.is_secure() && !seen.contains(&ptr) {
                seen.push(ptr);
            }
        }
        seen.len()
    }
}

fn new_group_peer() -> PeerState {
    let peer = PeerState::new();
    peer.set_session_key(KeyBlob::random_aes().with_tag(GROUP_KEY_TAG, KeyRole::NoRole));
    peer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::version::compose;

    #[test]
    fn test_serial_zero_is_invalid() {
        let peer = PeerState::new();
        assert!(!peer.is_valid_serial(0, true, false));
    }

    #[test]
    fn test_replayed_serial_is_rejected() {
        let peer = PeerState::new();
        assert!(peer.is_valid_serial(5, true, false));
        assert!(!peer.is_valid_serial(5, true, false));
        assert!(peer.is_valid_serial(6, true, false));
    }

    #[test]
    fn test_old_serial_in_same_slot_is_rejected() {
        let peer = PeerState::new();
        let later = 5 + SERIAL_WINDOW_SIZE as u32;
        assert!(peer.is_valid_serial(later, true, false));
        assert!(!peer.is_valid_serial(5, true, false));
    }

    #[test]
    fn test_serial_window_handles_wrap() {
        let peer = PeerState::new();
        assert!(peer.is_valid_serial(0x7FFF_FF80, true, false));
        assert!(peer.is_valid_serial(0xFFFF_FF00, true, false));
        // Same slot, past the top of the serial space.
        assert!(peer.is_valid_serial(0x0000_0080, true, false));
        assert!(!peer.is_valid_serial(0xFFFF_FF00, true, false));
    }

    #[test]
    fn test_estimate_timestamp_keeps_smallest_offset() {
        let peer = PeerState::new();
        assert_eq!(peer.estimate_timestamp_at(1_000, 1_500), 1_500);
        // A larger delay does not raise the offset.
        assert_eq!(peer.estimate_timestamp_at(2_000, 2_900), 2_500);
        // A smaller one lowers it.
        assert_eq!(peer.estimate_timestamp_at(3_000, 3_100), 3_100);
    }

    #[test]
    fn test_estimate_timestamp_drifts_after_interval() {
        let peer = PeerState::new();
        peer.estimate_timestamp_at(1_000, 1_500);
        let estimate = peer.estimate_timestamp_at(20_000, 20_700);
        assert_eq!(estimate, 20_000 + 501);
    }

    #[test]
    fn test_link_shares_state() {
        let table = PeerStateTable::new();
        let a = table.link(":a.1", "org.example");
        let b = table.get_or_create(":a.1");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(table.is_alias(":a.1", "org.example"));
        assert!(!table.is_alias(":a.1", ":b.1"));
    }

    #[test]
    fn test_find_by_guid() {
        let table = PeerStateTable::new();
        let guid = Guid128::generate();
        table.get_or_create(":a.1").set_guid_and_auth_version(guid, compose(4, 0));
        assert!(table.find_by_guid(&guid).is_some());
    }

    #[test]
    fn test_clear_regenerates_group_key() {
        let table = PeerStateTable::new();
        table.get_or_create(":a.1");
        let before = table.group_key().unwrap();
        table.clear();
        let after = table.group_key().unwrap();
        assert_eq!(after.tag(), GROUP_KEY_TAG);
        assert_eq!(after.role(), KeyRole::NoRole);
        assert_ne!(before.data(), after.data());
        assert!(!table.is_known_peer(":a.1"));
    }

    #[test]
    fn test_clear_keys_drops_security() {
        let peer = PeerState::new();
        peer.set_session_key(KeyBlob::random_aes());
        assert!(peer.is_secure());
        peer.clear_keys();
        assert!(!peer.is_secure());
        assert!(peer.session_key().is_none());
    }

    #[test]
    fn test_second_claim_waits_on_first() {
        let peer = PeerState::new();
        let AuthClaim::Started(tx) = peer.begin_authentication() else {
            panic!("first claim must start");
        };
        let AuthClaim::InProgress(rx) = peer.begin_authentication() else {
            panic!("second claim must wait");
        };
        peer.finish_authentication(&tx, Ok(()));
        assert_eq!(*rx.borrow(), Some(Ok(())));
        assert!(!peer.authentication_in_progress());
    }

    #[tokio::test]
    async fn test_transcript_respects_version() {
        let peer = PeerState::new();
        peer.set_guid_and_auth_version(Guid128::generate(), compose(4, 0));
        let mut t = peer.transcript().await;
        assert_eq!(t.digest(), [0; 32]);
        t.initialize();
        let empty = t.digest();
        t.update_v1(b"ignored at v4");
        assert_eq!(t.digest(), empty);
        t.update_v4(b"counted");
        assert_ne!(t.digest(), empty);
        t.free();
        assert!(!t.is_initialized());
    }
}
