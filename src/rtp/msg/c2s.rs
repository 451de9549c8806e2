//! `MsgC2s`: a server-to-server relay. Composes one **uplink** `MsgClient`
//! dialing a remote hub as a class-1 (server) identity, and one
//! **downlink** `Service` accepting an entire cluster's worth of direct
//! connections — so the hub only ever carries a single session for every
//! user behind the relay, not one per leaf.
//!
//! A downlink connection's raw handshake works exactly like a direct
//! client's at the hub (claimed identity travels in `RTP_SESSION_INFO`'s
//! `userData`), but admission doesn't conclude there: the claim is
//! forwarded as a `client_login` control message over the already-`Ready`
//! uplink session, correlated by a pending-login timer id, and only
//! acknowledged down to the leaf once the hub's `client_login_ok` comes
//! back. `user2session` is the bijection between an admitted leaf
//! identity and the physical session carrying it; an incoming frame's
//! destinations are split between what resolves locally (sent straight
//! down) and what doesn't (relayed up through the uplink).
//!
//! A 1-second timer notices when the uplink has been lost and, once 10
//! seconds have passed since the last attempt, dials it again. Admitted
//! downstream sessions are left alone across an uplink outage — only
//! in-flight logins that can no longer be completed are failed — but any
//! message they submit will have nowhere to go until the uplink is ready.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crate::rtp::codec::{Header0, MsgFrame, PackMode, Packet};
use crate::rtp::collections::{hash_map, ordered_map, HashMap, OrderedMap};
use crate::rtp::config::{ReactorConfig, RouterConfig, SessionConfig};
use crate::rtp::error::*;
use crate::rtp::handshake::{Handshaker, PROTOCOL_VERSION};
use crate::rtp::identity::{User, CLASS_ID_SERVER, USER_ID_STATIC_MAX};
use crate::rtp::msg::client::{Credentials, MsgClient, MsgClientObserver};
use crate::rtp::msg::ctrl::{kind, CtrlMessage};
use crate::rtp::reactor::Reactor;
use crate::rtp::service::{Service, ServiceObserver};
use crate::rtp::session::{Role, Session, SessionObserver};
use crate::rtp::sync::{Mutex, RwLock};
use crate::rtp::timer::{TimerFactory, TimerId};
use crate::rtp::transport::TcpTransport;

const RECONNECT_INTERVAL: Duration = Duration::from_secs(10);
const RECONNECT_CHECK_PERIOD: Duration = Duration::from_secs(1);

fn root() -> User {
    User::new_unchecked(CLASS_ID_SERVER, User::ROOT_USER_ID, 0)
}

/// Surfaces the relay's own login lifecycle and every sub-user's, to
/// whatever wires up a `MsgC2s`.
pub trait MsgC2sObserver: Send + Sync {
    /// The relay's own login to the uplink hub succeeded.
    fn on_ok_c2s(&self, user: User, public_ip: [u8; 4]) {
        let _ = (user, public_ip);
    }
    /// The uplink dropped, whether after a successful login or before
    /// one completed. A reconnect will be attempted automatically.
    fn on_close_c2s(&self) {}
    /// A sub-user behind the downlink was admitted.
    fn on_ok_user(&self, user: User, public_ip: [u8; 4]) {
        let _ = (user, public_ip);
    }
    /// A sub-user's session closed, whether by its own choice, a
    /// kickout from the hub, or the downlink session failing outright.
    fn on_close_user(&self, user: User) {
        let _ = user;
    }
}

/// Identity and shared secret the relay itself logs in to the uplink
/// hub with, plus the address it dials to do so.
pub struct C2sCredentials {
    pub uplink_user_id: u64,
    pub uplink_password_digest: Vec<u8>,
    pub uplink_addr: SocketAddr,
}

/// One downlink login forwarded to the hub, awaiting its
/// `client_login_ok`/`client_login_error`, correlated by the timeout
/// timer's own id.
struct PendingLogin {
    timeout: TimerId,
    session: Arc<Session>,
}

/// Bridges a `MsgClient`'s observer upcalls back to the `MsgC2s` that
/// owns it. A plain `Weak` rather than a strong reference, since
/// `MsgC2s` itself holds the `Arc<MsgClient>` for its uplink — a
/// strong back-reference here would leak both.
struct UplinkBridge(Weak<MsgC2s>);

impl MsgClientObserver for UplinkBridge {
    fn on_login_ok(&self, user: User, public_ip: [u8; 4]) {
        if let Some(c2s) = self.0.upgrade() {
            c2s.observer.on_ok_c2s(user, public_ip);
        }
    }
    fn on_login_error(&self, reason: &str) {
        if let Some(c2s) = self.0.upgrade() {
            log::warn!("uplink login rejected: {}", reason);
            *c2s.uplink.write() = None;
        }
    }
    fn on_message(&self, src: User, charset: u16, dsts: &[User], body: &[u8]) {
        if let Some(c2s) = self.0.upgrade() {
            c2s.handle_uplink_message(src, charset, dsts, body);
        }
    }
    fn on_disconnected(&self) {
        if let Some(c2s) = self.0.upgrade() {
            c2s.handle_uplink_closed();
        }
    }
}

/// A relay link: one uplink `MsgClient` plus one downlink `Service`,
/// bridging a cluster of direct connections into a single hub session.
pub struct MsgC2s {
    weak_self: Weak<MsgC2s>,
    observer: Arc<dyn MsgC2sObserver>,
    credentials: C2sCredentials,
    router_config: RouterConfig,
    session_config: SessionConfig,
    reactor: Arc<Reactor>,
    timers: Arc<TimerFactory>,
    uplink: RwLock<Option<Arc<MsgClient>>>,
    last_connect_attempt: Mutex<Instant>,
    user2session: RwLock<HashMap<User, Arc<Session>>>,
    pending_logins: Mutex<OrderedMap<u64, PendingLogin>>,
    service: Mutex<Option<Service>>,
}

impl MsgC2s {
    /// Binds the downlink, dials the uplink, and starts the reconnect
    /// timer. The downlink accepts connections immediately even while
    /// the first uplink dial is still outstanding; any login attempted
    /// in that window is rejected for lack of an uplink to forward it
    /// to.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        credentials: C2sCredentials,
        downlink_addr: SocketAddr,
        observer: Arc<dyn MsgC2sObserver>,
        reactor: Arc<Reactor>,
        reactor_config: ReactorConfig,
        session_config: SessionConfig,
        router_config: RouterConfig,
        timers: Arc<TimerFactory>,
    ) -> Result<Arc<Self>> {
        let c2s = Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            observer,
            credentials,
            router_config,
            session_config,
            reactor,
            timers,
            uplink: RwLock::new(None),
            last_connect_attempt: Mutex::new(Instant::now() - RECONNECT_INTERVAL),
            user2session: RwLock::new(hash_map()),
            pending_logins: Mutex::new(ordered_map()),
            service: Mutex::new(None),
        });

        let service_observer: Arc<dyn ServiceObserver> = c2s.clone();
        let service = Service::bind(downlink_addr, 0, &reactor_config, service_observer)?;
        *c2s.service.lock() = Some(service);

        c2s.dial_uplink();

        let weak = c2s.weak_self.clone();
        c2s.timers.schedule_recurring(RECONNECT_CHECK_PERIOD, move |_| {
            if let Some(this) = weak.upgrade() {
                this.maybe_reconnect();
            }
        });

        Ok(c2s)
    }

    /// The relay's own identity, once its uplink login has completed.
    pub fn c2s_user(&self) -> Option<User> {
        self.uplink.read().as_ref().and_then(|c| c.logged_in_user())
    }

    /// Number of sub-users currently admitted behind this relay.
    pub fn user_count(&self) -> usize {
        self.user2session.read().len()
    }

    /// Forces a sub-user's session closed, reporting the logout to the
    /// hub as if the session had dropped on its own.
    pub fn kickout_user(&self, user: User) {
        if let Some(session) = self.user2session.write().remove(&user) {
            session.close();
            self.report_logout(user);
            self.observer.on_close_user(user);
        }
    }

    fn report_logout(&self, user: User) {
        if let Some(uplink) = self.uplink.read().clone() {
            let logout = CtrlMessage::new().set(kind::CLIENT_LOGOUT, "").set("clientId", user.to_string());
            let _ = uplink.send_msg(0, &[root()], &logout.encode());
        }
    }

    fn maybe_reconnect(&self) {
        if self.uplink.read().is_some() {
            return;
        }
        if self.last_connect_attempt.lock().elapsed() < RECONNECT_INTERVAL {
            return;
        }
        self.dial_uplink();
    }

    fn dial_uplink(&self) {
        *self.last_connect_attempt.lock() = Instant::now();
        let stream = match mio::net::TcpStream::connect(self.credentials.uplink_addr) {
            Ok(stream) => stream,
            Err(err) => {
                log::warn!("failed to dial uplink {}: {}", self.credentials.uplink_addr, err);
                return;
            }
        };

        let bridge: Arc<dyn MsgClientObserver> = Arc::new(UplinkBridge(self.weak_self.clone()));
        let creds = Credentials {
            class_id: CLASS_ID_SERVER,
            requested_user_id: self.credentials.uplink_user_id,
            password_digest: self.credentials.uplink_password_digest.clone(),
        };
        let client = MsgClient::new(creds, bridge);
        let intent = match client.connect_intent() {
            Ok(intent) => intent,
            Err(err) => {
                log::warn!("failed to build uplink connect intent: {}", err);
                return;
            }
        };

        let transport = Box::new(TcpTransport::new(stream));
        let observer: Arc<dyn SessionObserver> = client.clone();
        let session =
            Session::new(transport, PackMode::Tcp4, self.session_config.clone(), observer, self.timers.clone(), Role::Connector(intent));
        if let Err(err) = session.register(&self.reactor) {
            log::warn!("failed to register uplink session: {}", err);
            return;
        }

        *self.uplink.write() = Some(client);
    }

    fn handle_uplink_closed(&self) {
        *self.uplink.write() = None;
        let stale = std::mem::replace(&mut *self.pending_logins.lock(), ordered_map());
        for (_, pending) in stale {
            self.timers.cancel(pending.timeout);
            pending.session.close();
        }
        self.observer.on_close_c2s();
    }

    fn handle_uplink_message(&self, src: User, charset: u16, dsts: &[User], body: &[u8]) {
        if src.is_root() {
            if let Ok(ctrl) = CtrlMessage::parse(body) {
                self.handle_uplink_ctrl(&ctrl);
            }
            return;
        }
        self.forward_to_downlink(src, charset, dsts, body);
    }

    fn handle_uplink_ctrl(&self, ctrl: &CtrlMessage) {
        if ctrl.get(kind::CLIENT_LOGIN_OK).is_some() {
            self.handle_login_ok(ctrl);
        } else if ctrl.get(kind::CLIENT_LOGIN_ERROR).is_some() {
            self.handle_login_error(ctrl);
        } else if ctrl.get(kind::CLIENT_KICKOUT).is_some() {
            self.handle_kickout(ctrl);
        }
    }

    /// Sends each locally-resolved destination its own copy of the
    /// frame (dst list elided, since a downlink session is the sole
    /// recipient of whatever arrives on it), and relays the rest
    /// upward in one shot.
    fn forward_to_downlink(&self, src: User, charset: u16, dsts: &[User], body: &[u8]) {
        let mut by_session: HashMap<usize, Arc<Session>> = hash_map();
        let mut upward: Vec<User> = Vec::new();
        {
            let user2session = self.user2session.read();
            for dst in dsts {
                match user2session.get(dst) {
                    Some(session) => {
                        by_session.entry(Arc::as_ptr(session) as usize).or_insert_with(|| session.clone());
                    }
                    None => upward.push(*dst),
                }
            }
        }
        for session in by_session.into_values() {
            if let Ok(frame) = MsgFrame::new(src, charset, Vec::new(), Arc::from(body)) {
                if let Ok(wire) = frame.encode() {
                    let _ = session.send_packet(Packet::from_slice(Default::default(), &wire));
                }
            }
        }
        if !upward.is_empty() {
            if let Some(uplink) = self.uplink.read().clone() {
                let _ = uplink.forward(src, charset, &upward, body);
            }
        }
    }

    fn handle_login_timeout(&self, token: u64) {
        if let Some(pending) = self.pending_logins.lock().remove(&token) {
            pending.session.close();
        }
    }

    fn handle_login_ok(&self, ctrl: &CtrlMessage) {
        let Ok(client_index) = ctrl.get_u64("clientIndex") else { return };
        let Some(pending) = self.pending_logins.lock().remove(&client_index) else { return };
        self.timers.cancel(pending.timeout);

        let Some(user) = ctrl.get("clientId").and_then(|s| s.parse::<User>().ok()) else {
            pending.session.close();
            return;
        };

        if let Some(prior) = self.user2session.write().remove(&user) {
            prior.close();
            self.observer.on_close_user(user);
        }

        pending.session.set_peer(user);
        let public_ip = Self::observed_ipv4(&pending.session);
        let ack = Header0 { version: PROTOCOL_VERSION, user, public_ip };
        if pending.session.send_packet(Packet::from_slice(Default::default(), &ack.serialize())).is_err() {
            return;
        }

        self.user2session.write().insert(user, pending.session);
        self.observer.on_ok_user(user, public_ip);
    }

    fn handle_login_error(&self, ctrl: &CtrlMessage) {
        let Ok(client_index) = ctrl.get_u64("clientIndex") else { return };
        if let Some(pending) = self.pending_logins.lock().remove(&client_index) {
            self.timers.cancel(pending.timeout);
            pending.session.close();
        }
    }

    fn handle_kickout(&self, ctrl: &CtrlMessage) {
        let Some(user) = ctrl.get("clientId").and_then(|s| s.parse::<User>().ok()) else { return };
        if let Some(session) = self.user2session.write().remove(&user) {
            session.close();
            self.observer.on_close_user(user);
        }
    }

    fn observed_ipv4(session: &Arc<Session>) -> [u8; 4] {
        match session.peer_addr() {
            Some(addr) => match addr.ip() {
                std::net::IpAddr::V4(v4) => v4.octets(),
                std::net::IpAddr::V6(v6) => v6.to_ipv4().map(|v4| v4.octets()).unwrap_or([0u8; 4]),
            },
            None => [0u8; 4],
        }
    }

    /// Forwards a freshly-`Ready` downlink session's claimed identity to
    /// the uplink as a `client_login`, or rejects it outright if it
    /// can't possibly succeed (malformed claim, no uplink, pending-login
    /// cap reached).
    fn try_admit_downlink(&self, session: &Arc<Session>) -> Result<()> {
        let info = session.remote_session_info().ok_or(()).simple(ErrorKind::MsgC2s)?;
        let claimed = Handshaker::claimed_user(&info)?;
        if claimed.class_id() == 0 {
            return Err("classId 0 may not log in").wrapped(ErrorKind::MsgC2s);
        }
        if !claimed.wants_dynamic_id() && claimed.user_id() > USER_ID_STATIC_MAX {
            return Err("userId out of range").wrapped(ErrorKind::MsgC2s);
        }
        if claimed.is_root() {
            return Err("the root identity may not log in").wrapped(ErrorKind::MsgC2s);
        }

        let uplink = self.uplink.read().clone().ok_or(()).simple(ErrorKind::MsgC2s)?;
        let relay_user = uplink.logged_in_user().ok_or(()).simple(ErrorKind::MsgC2s)?;
        if claimed.class_and_user() == relay_user.class_and_user() {
            return Err("a sub-user may not claim the relay's own identity").wrapped(ErrorKind::MsgC2s);
        }

        if self.pending_logins.lock().len() >= self.router_config.pending_login_max {
            return Err("pending-login cap reached").wrapped(ErrorKind::MsgC2s);
        }

        let public_ip = Self::observed_ipv4(session);
        let hash_hex = hex::encode(info.password_hash);
        let nonce_hex = hex::encode(session.nonce());

        let weak = self.weak_self.clone();
        let timeout = self.timers.schedule_once(self.session_config.handshake_timeout, move |id| {
            if let Some(this) = weak.upgrade() {
                this.handle_login_timeout(id.raw());
            }
        });

        let ctrl = CtrlMessage::new()
            .set(kind::CLIENT_LOGIN, "")
            .set("clientIndex", timeout.raw())
            .set("clientId", claimed.to_string())
            .set("publicIp", Ipv4Addr::from(public_ip))
            .set("hashString", hash_hex)
            .set("nonce", nonce_hex);
        if uplink.send_msg(0, &[root()], &ctrl.encode()).is_err() {
            self.timers.cancel(timeout);
            return Err("failed to forward login to the uplink").wrapped(ErrorKind::MsgC2s);
        }

        self.pending_logins.lock().insert(timeout.raw(), PendingLogin { timeout, session: session.clone() });
        Ok(())
    }
}

impl ServiceObserver for MsgC2s {
    fn on_accept(&self, stream: mio::net::TcpStream, addr: SocketAddr) {
        let Some(this) = self.weak_self.upgrade() else { return };
        let observer: Arc<dyn SessionObserver> = this.clone();
        if let Err(err) =
            Session::accept(stream, PackMode::Tcp4, this.session_config.clone(), observer, this.timers.clone(), &this.reactor)
        {
            log::warn!("failed to register downlink connection from {}: {}", addr, err);
        }
    }
}

impl SessionObserver for MsgC2s {
    fn on_ok(&self, session: &Arc<Session>) {
        if self.try_admit_downlink(session).is_err() {
            session.close();
        }
    }

    fn on_recv(&self, session: &Arc<Session>, packet: Packet) {
        if packet.is_heartbeat() {
            return;
        }
        let Some(base_user) = session.peer() else { return };
        let frame = match MsgFrame::decode(packet.payload(), base_user) {
            Ok(frame) => frame,
            Err(_) => return,
        };
        if frame.src() != base_user {
            return;
        }
        self.forward_to_downlink(frame.src(), frame.charset(), frame.dsts(), frame.body());
    }

    fn on_close(&self, session: &Arc<Session>, _reason: &Error) {
        {
            let mut pending = self.pending_logins.lock();
            let stale: Vec<u64> =
                pending.iter().filter(|(_, p)| Arc::ptr_eq(&p.session, session)).map(|(token, _)| *token).collect();
            for token in stale {
                if let Some(p) = pending.remove(&token) {
                    self.timers.cancel(p.timeout);
                }
            }
        }

        let Some(user) = session.peer() else { return };
        let removed = matches!(self.user2session.read().get(&user), Some(s) if Arc::ptr_eq(s, session));
        if !removed {
            return;
        }
        self.user2session.write().remove(&user);
        self.report_logout(user);
        self.observer.on_close_user(user);
    }
}

#[cfg(test)]
impl MsgC2s {
    /// Builds a `MsgC2s` with no bound downlink service and no uplink
    /// dial attempted, so a test can drive `SessionObserver`/ctrl
    /// handling directly without a real socket.
    fn new_for_test(observer: Arc<dyn MsgC2sObserver>) -> Arc<Self> {
        let reactor = Arc::new(Reactor::new(&ReactorConfig { io_threads: 1, pending_accept_max: 10 }).unwrap());
        Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            observer,
            credentials: C2sCredentials {
                uplink_user_id: 1,
                uplink_password_digest: b"uplink-secret".to_vec(),
                uplink_addr: "127.0.0.1:1".parse().unwrap(),
            },
            router_config: RouterConfig::default(),
            session_config: SessionConfig::default(),
            reactor,
            timers: Arc::new(TimerFactory::new()),
            uplink: RwLock::new(None),
            last_connect_attempt: Mutex::new(Instant::now() - RECONNECT_INTERVAL),
            user2session: RwLock::new(hash_map()),
            pending_logins: Mutex::new(ordered_map()),
            service: Mutex::new(None),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp::transport::{IoOutcome, RingRecvPool, Transport};
    use std::sync::Mutex as StdMutex;

    struct NullTransport;
    impl Transport for NullTransport {
        fn fill_recv_pool(&mut self, _pool: &mut RingRecvPool) -> Result<IoOutcome> {
            Ok(IoOutcome::WouldBlock)
        }
        fn send(&mut self, data: &[u8]) -> Result<IoOutcome> {
            Ok(IoOutcome::Progress(data.len()))
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        ok_users: StdMutex<Vec<User>>,
        closed_users: StdMutex<Vec<User>>,
    }
    impl MsgC2sObserver for RecordingObserver {
        fn on_ok_user(&self, user: User, _public_ip: [u8; 4]) {
            self.ok_users.lock().unwrap().push(user);
        }
        fn on_close_user(&self, user: User) {
            self.closed_users.lock().unwrap().push(user);
        }
    }

    /// Drives a freshly-created acceptor session through its raw
    /// handshake claiming `claimed`, registered against `c2s` as its
    /// observer so reaching `Ready` triggers real admission through
    /// `on_ok` -> `try_admit_downlink`, exactly as a live connection
    /// would.
    fn downlink_claims(c2s: &Arc<MsgC2s>, claimed: User) -> Arc<Session> {
        let observer: Arc<dyn SessionObserver> = c2s.clone();
        let session =
            Session::new(Box::new(NullTransport), PackMode::Tcp4, c2s.session_config.clone(), observer, c2s.timers.clone(), Role::Acceptor);
        session.enter_preamble_for_test();
        let info = Handshaker::new().build_session_info(
            PROTOCOL_VERSION,
            0,
            0,
            PackMode::Tcp4,
            &session.nonce(),
            b"whatever",
            0,
            claimed,
        );
        session.handle_incoming(Packet::from_slice(Default::default(), &info.serialize()));
        session
    }

    /// Builds an uplink `MsgClient` already `Ready` and logged in as
    /// `relay_user`, wired to `c2s` via `UplinkBridge` and installed as
    /// its uplink, mirroring what `dial_uplink` would assemble once the
    /// hub's ack arrives.
    fn install_ready_uplink(c2s: &Arc<MsgC2s>, relay_user: User) -> Arc<MsgClient> {
        let bridge: Arc<dyn MsgClientObserver> = Arc::new(UplinkBridge(Arc::downgrade(c2s)));
        let creds = Credentials {
            class_id: relay_user.class_id(),
            requested_user_id: relay_user.user_id(),
            password_digest: b"uplink-secret".to_vec(),
        };
        let client = MsgClient::new(creds, bridge);
        let intent = client.connect_intent().unwrap();
        let observer: Arc<dyn SessionObserver> = client.clone();
        let session =
            Session::new(Box::new(NullTransport), PackMode::Tcp4, c2s.session_config.clone(), observer, c2s.timers.clone(), Role::Connector(intent));
        session.handle_incoming(Packet::from_slice(Default::default(), &[7u8; 8]));
        let ack = Handshaker::new().build_session_ack().serialize();
        session.handle_incoming(Packet::from_slice(Default::default(), &ack));
        let header0 = Header0 { version: PROTOCOL_VERSION, user: relay_user, public_ip: [0u8; 4] };
        session.handle_incoming(Packet::from_slice(Default::default(), &header0.serialize()));
        assert!(client.logged_in_user().is_some());
        *c2s.uplink.write() = Some(client.clone());
        client
    }

    fn login_ok_for(c2s: &Arc<MsgC2s>, user: User) {
        let token = {
            let pending = c2s.pending_logins.lock();
            pending.iter().find(|(_, p)| p.session.claimed_user() == Some(user)).map(|(token, _)| *token).unwrap()
        };
        let ok = CtrlMessage::new().set(kind::CLIENT_LOGIN_OK, "").set("clientIndex", token).set("clientId", user.to_string());
        c2s.handle_login_ok(&ok);
    }

    #[test]
    fn pending_login_token_round_trips_through_timer_id() {
        let timers = TimerFactory::new();
        let id = timers.schedule_once(Duration::from_secs(60), |_| {});
        let token = id.raw();
        assert!(token > 0);
        assert!(timers.cancel(id));
    }

    #[test]
    fn uplink_bridge_is_inert_once_its_c2s_has_dropped() {
        let weak: Weak<MsgC2s> = Weak::new();
        let bridge = UplinkBridge(weak);
        // None of these should panic even though the upgrade always fails.
        bridge.on_login_ok(User::new(2, 10, 0).unwrap(), [0u8; 4]);
        bridge.on_login_error("rejected");
        bridge.on_message(User::new(2, 10, 0).unwrap(), 0, &[], b"");
        bridge.on_disconnected();
    }

    #[test]
    fn observer_default_methods_are_no_ops() {
        struct NoOpObserver;
        impl MsgC2sObserver for NoOpObserver {}

        let observer = NoOpObserver;
        observer.on_ok_c2s(User::new(2, 10, 0).unwrap(), [0u8; 4]);
        observer.on_close_c2s();
        observer.on_ok_user(User::new(2, 10, 0).unwrap(), [0u8; 4]);
        observer.on_close_user(User::new(2, 10, 0).unwrap());
    }

    #[test]
    fn fanout_splits_local_sub_users_from_upward_relay() {
        let observer = Arc::new(RecordingObserver::default());
        let c2s = MsgC2s::new_for_test(observer.clone());
        let relay_user = User::new(CLASS_ID_SERVER, 50, 0).unwrap();
        install_ready_uplink(&c2s, relay_user);

        let user_a = User::new(2, 100, 0).unwrap();
        let user_b = User::new(2, 101, 0).unwrap();
        let session_a = downlink_claims(&c2s, user_a);
        let session_b = downlink_claims(&c2s, user_b);
        assert_eq!(c2s.pending_logins.lock().len(), 2);

        login_ok_for(&c2s, user_a);
        login_ok_for(&c2s, user_b);
        assert_eq!(c2s.user_count(), 2);
        assert_eq!(observer.ok_users.lock().unwrap().as_slice(), &[user_a, user_b]);
        assert_eq!(session_a.peer(), Some(user_a));
        assert_eq!(session_b.peer(), Some(user_b));

        // A frame addressed to both sub-users plus one identity that
        // isn't behind this relay: the former reach their sessions
        // directly, the latter is relayed up through the uplink.
        let upward_only = User::new(3, 7, 0).unwrap();
        c2s.forward_to_downlink(relay_user, 0, &[user_a, user_b, upward_only], b"hello");
    }

    #[test]
    fn kickout_from_hub_closes_the_right_session_and_notifies() {
        let observer = Arc::new(RecordingObserver::default());
        let c2s = MsgC2s::new_for_test(observer.clone());
        let relay_user = User::new(CLASS_ID_SERVER, 50, 0).unwrap();
        install_ready_uplink(&c2s, relay_user);

        let user_a = User::new(2, 100, 0).unwrap();
        let session_a = downlink_claims(&c2s, user_a);
        login_ok_for(&c2s, user_a);
        assert_eq!(c2s.user_count(), 1);

        let kick = CtrlMessage::new().set(kind::CLIENT_KICKOUT, "").set("clientId", user_a.to_string());
        c2s.handle_kickout(&kick);

        assert_eq!(c2s.user_count(), 0);
        assert_eq!(observer.closed_users.lock().unwrap().as_slice(), &[user_a]);
        assert_eq!(session_a.state(), crate::rtp::session::SessionState::Closed);
    }

    #[test]
    fn reconnect_is_skipped_while_an_uplink_is_already_installed() {
        let observer = Arc::new(RecordingObserver::default());
        let c2s = MsgC2s::new_for_test(observer);
        let relay_user = User::new(CLASS_ID_SERVER, 50, 0).unwrap();
        install_ready_uplink(&c2s, relay_user);

        let before = *c2s.last_connect_attempt.lock();
        c2s.maybe_reconnect();
        assert_eq!(*c2s.last_connect_attempt.lock(), before);
        assert!(c2s.uplink.read().is_some());
    }

    #[test]
    fn reconnect_is_skipped_inside_the_cooldown_window() {
        let observer = Arc::new(RecordingObserver::default());
        let c2s = MsgC2s::new_for_test(observer);
        *c2s.last_connect_attempt.lock() = Instant::now();
        let before = *c2s.last_connect_attempt.lock();

        c2s.maybe_reconnect();

        assert_eq!(*c2s.last_connect_attempt.lock(), before);
        assert!(c2s.uplink.read().is_none());
    }

    #[test]
    fn pending_login_timeout_closes_the_downlink_session() {
        let observer = Arc::new(RecordingObserver::default());
        let c2s = MsgC2s::new_for_test(observer);
        let relay_user = User::new(CLASS_ID_SERVER, 50, 0).unwrap();
        install_ready_uplink(&c2s, relay_user);

        let user_a = User::new(2, 100, 0).unwrap();
        let session_a = downlink_claims(&c2s, user_a);
        let token = {
            let pending = c2s.pending_logins.lock();
            pending.iter().find(|(_, p)| p.session.claimed_user() == Some(user_a)).map(|(token, _)| *token).unwrap()
        };

        // Simulate the handshake-timeout timer firing before the hub
        // ever answered with client_login_ok/client_login_error.
        c2s.handle_login_timeout(token);

        assert_eq!(session_a.state(), crate::rtp::session::SessionState::Closed);
        assert!(c2s.pending_logins.lock().get(&token).is_none());
    }
}
