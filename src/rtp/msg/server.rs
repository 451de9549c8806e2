//! `MsgServer`: the hub. Every logged-in identity lives behind exactly
//! one link — the raw session that carries it — and a link may carry
//! more than one identity: a direct client's link carries only its own
//! base identity, while a `MsgC2s` relay's link additionally carries
//! every sub-user currently registered behind it. `user2link` is the
//! single source of truth routing consults; an incoming application
//! frame addressed to `N` destinations is grouped by the link each
//! resolves to and forwarded once per link, preserving the original
//! `RTP_MSG_HEADER` (source, charset) rather than just the body.
//!
//! A direct client's (or a relay's own) login is validated once its
//! raw session reaches `Ready`, from the claimed identity embedded in
//! `RTP_SESSION_INFO.userData` during the handshake — not from a
//! `client_login` control message. Sub-users behind a relay, which the
//! hub never dials directly, register the old way: a `client_login`
//! control message sent over the relay's already-`Ready` uplink
//! session, answered with `client_login_ok`/`client_login_error`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::rtp::codec::{Header0, MsgFrame, PackMode, Packet};
use crate::rtp::collections::{hash_map, hash_set, HashMap, HashSet};
use crate::rtp::config::SessionConfig;
use crate::rtp::error::*;
use crate::rtp::handshake::{Handshaker, PROTOCOL_VERSION};
use crate::rtp::identity::{User, CLASS_ID_SERVER, USER_ID_DYNAMIC_MIN, USER_ID_MAX};
use crate::rtp::msg::ctrl::{kind, CtrlMessage};
use crate::rtp::reactor::Reactor;
use crate::rtp::service::ServiceObserver;
use crate::rtp::session::Session;
use crate::rtp::session::SessionObserver;
use crate::rtp::store::IUserStore;
use crate::rtp::sync::{Mutex, RwLock};
use crate::rtp::timer::TimerFactory;

fn root() -> User {
    User::new_unchecked(CLASS_ID_SERVER, User::ROOT_USER_ID, 0)
}

/// One accepted connection's place in the router: the session that
/// carries it, the identity it logged in as, and — for a relay link —
/// the sub-users currently registered behind it.
struct LinkContext {
    session: Arc<Session>,
    base_user: User,
    is_c2s: bool,
    sub_users: Mutex<HashSet<User>>,
}

/// Router state shared by every session the hub currently serves.
pub struct MsgServer {
    store: Arc<dyn IUserStore>,
    user2link: RwLock<HashMap<User, Arc<LinkContext>>>,
    next_dynamic_id: AtomicU64,
}

impl MsgServer {
    pub fn new(store: Arc<dyn IUserStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            user2link: RwLock::new(hash_map()),
            next_dynamic_id: AtomicU64::new(USER_ID_DYNAMIC_MIN),
        })
    }

    fn allocate_dynamic_id(&self) -> u64 {
        loop {
            let id = self.next_dynamic_id.fetch_add(1, Ordering::Relaxed);
            if id <= USER_ID_MAX {
                return id;
            }
            self.next_dynamic_id.store(USER_ID_DYNAMIC_MIN, Ordering::Relaxed);
        }
    }

    fn observed_ipv4(session: &Arc<Session>) -> Option<Ipv4Addr> {
        match session.peer_addr()?.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(v6) => v6.to_ipv4(),
        }
    }

    fn check_bound_ip(bound_ip: Option<[u8; 4]>, observed: Option<Ipv4Addr>) -> Result<()> {
        if let Some(bound) = bound_ip {
            if observed != Some(Ipv4Addr::from(bound)) {
                return Err("remote address does not match the bound IP on file").wrapped(ErrorKind::MsgServer);
            }
        }
        Ok(())
    }

    fn send_ctrl(&self, session: &Arc<Session>, ctrl: &CtrlMessage) -> Result<()> {
        let frame = MsgFrame::new(root(), 0, Vec::new(), Arc::from(ctrl.encode().as_slice()))?;
        let wire = frame.encode()?;
        session.send_packet(Packet::from_slice(Default::default(), &wire))
    }

    /// Evicts whoever currently holds `user`, whether that's a direct
    /// client's own link or a sub-user registered behind a relay.
    fn evict_prior_occupant(&self, user: User) {
        let prior = self.user2link.write().remove(&user);
        let Some(prior) = prior else { return };
        self.store.record_offline(user);
        if prior.base_user == user {
            prior.session.close();
        } else {
            prior.sub_users.lock().remove(&user);
            let kickout = CtrlMessage::new().set(kind::CLIENT_KICKOUT, "").set("clientId", user.to_string());
            let _ = self.send_ctrl(&prior.session, &kickout);
        }
    }

    /// Validates the claimed identity a freshly-`Ready` session carries
    /// in its `RTP_SESSION_INFO`, assigns it a link, and acks.
    fn admit(&self, session: &Arc<Session>) -> Result<()> {
        let info = session.remote_session_info().ok_or(()).simple(ErrorKind::MsgServer)?;
        let claimed = Handshaker::claimed_user(&info)?;
        if claimed.class_id() == 0 {
            return Err("classId 0 may not log in").wrapped(ErrorKind::MsgServer);
        }

        let row = self.store.lookup(claimed.class_id(), claimed.user_id()).ok_or(()).simple(ErrorKind::MsgServer)?;
        Handshaker::new().validate_session_info(&info, &session.nonce(), row.password_hash.as_ref())?;

        let observed_ip = Self::observed_ipv4(session);
        Self::check_bound_ip(row.bound_ip, observed_ip)?;

        let user_id = if claimed.wants_dynamic_id() { self.allocate_dynamic_id() } else { claimed.user_id() };
        let user = User::new(claimed.class_id(), user_id, 0)?;

        self.evict_prior_occupant(user);

        let link = Arc::new(LinkContext {
            session: session.clone(),
            base_user: user,
            is_c2s: row.is_c2s,
            sub_users: Mutex::new(hash_set()),
        });
        self.user2link.write().insert(user, link);
        session.set_peer(user);
        self.store.record_online(user);

        for kick in self.store.take_pending_kicks(user) {
            let _ = kick;
            self.kick(user);
        }

        let public_ip = observed_ip.map(|v4| v4.octets()).unwrap_or([0u8; 4]);
        let ack = Header0 { version: PROTOCOL_VERSION, user, public_ip };
        session.send_packet(Packet::from_slice(Default::default(), &ack.serialize()))
    }

    /// Registers a sub-user behind `link` from a `client_login` control
    /// message forwarded by a relay, and replies with
    /// `client_login_ok`/`client_login_error` correlated by
    /// `clientIndex`.
    fn handle_sub_login(&self, link: &Arc<LinkContext>, ctrl: &CtrlMessage) {
        let client_index = ctrl.get_u64("clientIndex").unwrap_or(0);
        let reply = match self.try_login_subuser(link, ctrl) {
            Ok(user) => CtrlMessage::new()
                .set(kind::CLIENT_LOGIN_OK, "")
                .set("clientIndex", client_index)
                .set("clientId", user.to_string()),
            Err(err) => CtrlMessage::new()
                .set(kind::CLIENT_LOGIN_ERROR, format!("{}", err))
                .set("clientIndex", client_index),
        };
        let _ = self.send_ctrl(&link.session, &reply);
    }

    /// Registers one sub-user from a `client_login` forwarded by a
    /// relay. The claimed identity travels as a single `"cid-uid"`
    /// `clientId` field, the password proof as a 64-hex-digit
    /// `hashString` keyed off `nonce`, matching the wire shape a
    /// `MsgC2s` uplink composes on the sub-user's behalf.
    fn try_login_subuser(&self, link: &Arc<LinkContext>, ctrl: &CtrlMessage) -> Result<User> {
        if !link.is_c2s {
            return Err("only a relay link may register sub-users").wrapped(ErrorKind::MsgServer);
        }

        let client_id = ctrl.get("clientId").ok_or(()).simple(ErrorKind::MsgServer)?;
        let claimed: User = client_id.parse().simple(ErrorKind::MsgServer)?;
        if claimed.class_id() == 0 {
            return Err("classId 0 is invalid").wrapped(ErrorKind::MsgServer);
        }
        let requested_user_id = claimed.user_id();
        let hash_hex = ctrl.get("hashString").unwrap_or("");
        let nonce_hex = ctrl.get("nonce").unwrap_or("");

        let row = self.store.lookup(claimed.class_id(), requested_user_id).ok_or(()).simple(ErrorKind::MsgServer)?;
        if row.is_c2s {
            return Err("a relay identity cannot log in as a sub-user").wrapped(ErrorKind::MsgServer);
        }

        let nonce = hex::decode(nonce_hex).simple(ErrorKind::MsgServer)?;
        let claimed_hash = hex::decode(hash_hex).simple(ErrorKind::MsgServer)?;
        let expected = crate::rtp::crypto::hash::password_hash(&nonce, row.password_hash.as_ref());
        if claimed_hash != expected.as_ref() {
            return Err("password mismatch").wrapped(ErrorKind::MsgServer);
        }

        let user_id = if requested_user_id == 0 { self.allocate_dynamic_id() } else { requested_user_id };
        let user = User::new(claimed.class_id(), user_id, 0)?;
        if user.is_root() {
            return Err("the root identity may not be claimed").wrapped(ErrorKind::MsgServer);
        }
        if user.class_id() == link.base_user.class_id() && user.user_id() == link.base_user.user_id() {
            return Err("a relay may not register itself as its own sub-user").wrapped(ErrorKind::MsgServer);
        }

        let observed_ip = ctrl
            .get("publicIp")
            .and_then(|s| s.parse::<Ipv4Addr>().ok())
            .or_else(|| Self::observed_ipv4(&link.session));
        Self::check_bound_ip(row.bound_ip, observed_ip)?;

        self.evict_prior_occupant(user);

        link.sub_users.lock().insert(user);
        self.user2link.write().insert(user, link.clone());
        self.store.record_online(user);

        for kick in self.store.take_pending_kicks(user) {
            let _ = kick;
            self.kick(user);
        }

        Ok(user)
    }

    /// A relay's downlink session for `clientId` closed; drop the
    /// sub-user entry without replying (there's nothing to ack — the
    /// relay has already forgotten the session by the time this
    /// arrives).
    fn handle_sub_logout(&self, link: &Arc<LinkContext>, ctrl: &CtrlMessage) {
        let Some(client_id) = ctrl.get("clientId") else { return };
        let Ok(user) = client_id.parse::<User>() else { return };
        if !link.sub_users.lock().remove(&user) {
            return;
        }
        self.user2link.write().remove(&user);
        self.store.record_offline(user);
    }

    /// Forces a logged-in identity's link closed (its own session, if
    /// it's a direct/relay base identity, or just the one sub-user
    /// entry, if it's a sub-user behind a relay), as if kicked by an
    /// operator.
    pub fn kick(&self, user: User) {
        self.evict_prior_occupant(user);
    }

    /// Groups `frame`'s destinations by the link each resolves to and
    /// forwards one re-encoded `RTP_MSG_HEADER` per link, preserving
    /// the original source and charset. Destinations with no link are
    /// silently dropped, matching a best-effort fanout over an
    /// unreliable overlay.
    fn route(&self, frame: &MsgFrame) {
        let mut by_link: HashMap<usize, (Arc<Session>, Vec<User>)> = hash_map();
        {
            let user2link = self.user2link.read();
            for dst in frame.dsts() {
                if let Some(link) = user2link.get(dst) {
                    let key = Arc::as_ptr(&link.session) as usize;
                    by_link.entry(key).or_insert_with(|| (link.session.clone(), Vec::new())).1.push(*dst);
                }
            }
        }
        for (_, (session, dsts)) in by_link {
            let out = match MsgFrame::new(frame.src(), frame.charset(), dsts, Arc::from(frame.body())) {
                Ok(f) => f,
                Err(_) => continue,
            };
            if let Ok(wire) = out.encode() {
                let _ = session.send_packet(Packet::from_slice(Default::default(), &wire));
            }
        }
    }

    fn handle_disconnect(&self, session: &Arc<Session>) {
        let carried: Vec<User> = {
            let user2link = self.user2link.read();
            user2link.iter().filter(|(_, link)| Arc::ptr_eq(&link.session, session)).map(|(u, _)| *u).collect()
        };
        let mut user2link = self.user2link.write();
        for user in carried {
            user2link.remove(&user);
            self.store.record_offline(user);
        }
    }
}

impl SessionObserver for MsgServer {
    fn on_ok(&self, session: &Arc<Session>) {
        if self.admit(session).is_err() {
            session.close();
        }
    }

    fn on_recv(&self, session: &Arc<Session>, packet: Packet) {
        if packet.is_heartbeat() {
            return;
        }
        let base_user = match session.peer() {
            Some(u) => u,
            None => return,
        };
        let link = match self.user2link.read().get(&base_user).cloned() {
            Some(link) => link,
            None => return,
        };

        let frame = match MsgFrame::decode(packet.payload(), base_user) {
            Ok(f) => f,
            Err(_) => return,
        };

        if link.is_c2s && frame.src() == link.base_user && frame.dsts().iter().any(|d| d.is_root()) {
            if let Ok(ctrl) = CtrlMessage::parse(frame.body()) {
                if ctrl.get(kind::CLIENT_LOGIN).is_some() {
                    self.handle_sub_login(&link, &ctrl);
                    return;
                }
                if ctrl.get(kind::CLIENT_LOGOUT).is_some() {
                    self.handle_sub_logout(&link, &ctrl);
                    return;
                }
            }
        }

        self.route(&frame);
    }

    fn on_close(&self, session: &Arc<Session>, _reason: &Error) {
        self.handle_disconnect(session);
    }
}

/// Wraps `MsgServer` as a `Service`'s accept-time observer: every
/// connection accepted on a bound port becomes a `Role::Acceptor`
/// session observed by the same hub, registered with the given
/// reactor. One `HubListener` per listening port; many can share one
/// `MsgServer`.
pub struct HubListener {
    server: Arc<MsgServer>,
    reactor: Arc<Reactor>,
    session_config: SessionConfig,
    timers: Arc<TimerFactory>,
}

impl HubListener {
    pub fn new(
        server: Arc<MsgServer>,
        reactor: Arc<Reactor>,
        session_config: SessionConfig,
        timers: Arc<TimerFactory>,
    ) -> Arc<Self> {
        Arc::new(Self { server, reactor, session_config, timers })
    }
}

impl ServiceObserver for HubListener {
    fn on_accept(&self, stream: mio::net::TcpStream, addr: SocketAddr) {
        let observer: Arc<dyn SessionObserver> = self.server.clone();
        if let Err(err) = Session::accept(
            stream,
            PackMode::Tcp4,
            self.session_config.clone(),
            observer,
            self.timers.clone(),
            &self.reactor,
        ) {
            log::warn!("failed to register accepted connection from {}: {}", addr, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp::codec::{PackMode, SessionInfo};
    use crate::rtp::crypto::hash::Digest;
    use crate::rtp::session::Role;
    use crate::rtp::store::{InMemoryUserStore, UserRow};
    use crate::rtp::transport::{IoOutcome, RingRecvPool, Transport};

    struct RecordingTransport {
        sent: Mutex<Vec<Vec<u8>>>,
    }
    impl Transport for RecordingTransport {
        fn fill_recv_pool(&mut self, _pool: &mut RingRecvPool) -> Result<IoOutcome> {
            Ok(IoOutcome::WouldBlock)
        }
        fn send(&mut self, data: &[u8]) -> Result<IoOutcome> {
            self.sent.lock().push(data.to_vec());
            Ok(IoOutcome::Progress(data.len()))
        }
    }

    fn store_with(row: UserRow) -> Arc<InMemoryUserStore> {
        let store = Arc::new(InMemoryUserStore::new());
        store.insert(row);
        store
    }

    fn direct_row(password: &[u8]) -> UserRow {
        UserRow {
            class_id: 2,
            user_id: 100,
            max_inst_ids: 1,
            is_c2s: false,
            password_hash: Digest::compute(b"", password),
            bound_ip: None,
        }
    }

    #[test]
    fn admit_accepts_matching_password_and_assigns_identity() {
        let password = b"correct horse";
        let store = store_with(direct_row(password));
        let server = MsgServer::new(store);

        let config = crate::rtp::config::SessionConfig::default();
        let timers = Arc::new(TimerFactory::new());
        let session = Session::new(
            Box::new(RecordingTransport { sent: Mutex::new(Vec::new()) }),
            PackMode::Tcp4,
            config,
            server.clone(),
            timers,
            Role::Acceptor,
        );

        session.enter_preamble_for_test();

        let claimed = User::new(2, 100, 0).unwrap();
        let digest = Digest::compute(b"", password);
        let nonce = session.nonce();
        let expected_hash = crate::rtp::crypto::hash::password_hash(&nonce, digest.as_ref());

        let info = SessionInfo {
            local_version: PROTOCOL_VERSION,
            remote_version: PROTOCOL_VERSION,
            session_type: 0,
            mm_type: 0,
            pack_mode: PackMode::Tcp4,
            password_hash: expected_hash.as_ref().try_into().unwrap(),
            some_id: 0,
            mm_id: 0,
            in_src_mm_id: 0,
            out_src_mm_id: 0,
            user_data: {
                let header0 = Header0 { version: PROTOCOL_VERSION, user: claimed, public_ip: [0u8; 4] };
                let mut buf = [0u8; 64];
                buf[..Header0::LENGTH].copy_from_slice(&header0.serialize());
                buf
            },
        };
        session.handle_incoming(Packet::from_slice(Default::default(), &info.serialize()));

        assert_eq!(session.state(), crate::rtp::session::SessionState::Ready);
        assert_eq!(session.peer(), Some(claimed));
    }

    #[test]
    fn admit_rejects_mismatched_password() {
        let store = store_with(direct_row(b"correct horse"));
        let server = MsgServer::new(store);

        let config = crate::rtp::config::SessionConfig::default();
        let timers = Arc::new(TimerFactory::new());
        let session = Session::new(
            Box::new(RecordingTransport { sent: Mutex::new(Vec::new()) }),
            PackMode::Tcp4,
            config,
            server.clone(),
            timers,
            Role::Acceptor,
        );

        session.enter_preamble_for_test();

        let claimed = User::new(2, 100, 0).unwrap();
        let nonce = session.nonce();
        let wrong_hash = crate::rtp::crypto::hash::password_hash(&nonce, b"wrong secret");

        let info = SessionInfo {
            local_version: PROTOCOL_VERSION,
            remote_version: PROTOCOL_VERSION,
            session_type: 0,
            mm_type: 0,
            pack_mode: PackMode::Tcp4,
            password_hash: wrong_hash.as_ref().try_into().unwrap(),
            some_id: 0,
            mm_id: 0,
            in_src_mm_id: 0,
            out_src_mm_id: 0,
            user_data: {
                let header0 = Header0 { version: PROTOCOL_VERSION, user: claimed, public_ip: [0u8; 4] };
                let mut buf = [0u8; 64];
                buf[..Header0::LENGTH].copy_from_slice(&header0.serialize());
                buf
            },
        };
        session.handle_incoming(Packet::from_slice(Default::default(), &info.serialize()));

        assert_eq!(session.state(), crate::rtp::session::SessionState::Closed);
        assert_eq!(session.peer(), None);
    }
}
