//! `MsgClient`: the leaf side of a direct login. Wraps one `Session` to
//! the hub. The login itself happens during the session's own raw
//! handshake — the claimed identity and password proof travel in
//! `RTP_SESSION_INFO.userData`, never as a `client_login` control
//! message, which is reserved for sub-users registering behind a
//! `MsgC2s` uplink. Once the session is `Ready`, the very first
//! application packet it carries is the hub's `RTP_MSG_HEADER0` ack
//! naming the identity actually assigned; everything after that is
//! ordinary `RTP_MSG_HEADER` traffic.

use std::sync::Arc;

use crate::rtp::codec::{Header0, MsgFrame, Packet};
use crate::rtp::error::*;
use crate::rtp::identity::User;
use crate::rtp::session::{ConnectIntent, Session, SessionObserver};
use crate::rtp::sync::Mutex;

/// Login outcome and subsequent traffic, surfaced to whatever owns a
/// `MsgClient`.
pub trait MsgClientObserver: Send + Sync {
    /// The hub admitted the login, assigning `user` (which may differ
    /// from the identity claimed if a dynamic user id was requested)
    /// and reporting the public IP it saw this connection arrive from.
    fn on_login_ok(&self, user: User, public_ip: [u8; 4]) {
        let _ = (user, public_ip);
    }
    fn on_login_error(&self, reason: &str) {
        let _ = reason;
    }
    /// `dsts` is the destination list the frame still carried on
    /// arrival: empty (fallback to self) for a message addressed
    /// singularly to this client, non-empty when a `MsgC2s` uplink
    /// needs to know which of its sub-users to relay the frame to.
    fn on_message(&self, src: User, charset: u16, dsts: &[User], body: &[u8]) {
        let _ = (src, charset, dsts, body);
    }
    fn on_disconnected(&self) {}
}

enum LoginState {
    AwaitingAck,
    LoggedIn(User),
    Failed,
}

/// Identity and shared secret a `MsgClient` claims when dialing in.
pub struct Credentials {
    pub class_id: u8,
    pub requested_user_id: u64,
    pub password_digest: Vec<u8>,
}

pub struct MsgClient {
    observer: Arc<dyn MsgClientObserver>,
    credentials: Credentials,
    state: Mutex<LoginState>,
    session: Mutex<Option<Arc<Session>>>,
}

impl MsgClient {
    pub fn new(credentials: Credentials, observer: Arc<dyn MsgClientObserver>) -> Arc<Self> {
        Arc::new(Self {
            observer,
            credentials,
            state: Mutex::new(LoginState::AwaitingAck),
            session: Mutex::new(None),
        })
    }

    /// The `ConnectIntent` a `Session` should be built with to carry
    /// out this client's login during its raw handshake.
    pub fn connect_intent(&self) -> Result<ConnectIntent> {
        let claimed_user = if self.credentials.requested_user_id == 0 {
            // userId 0 requests dynamic allocation by the hub.
            User::new_unchecked(self.credentials.class_id, 0, 0)
        } else {
            User::new(self.credentials.class_id, self.credentials.requested_user_id, 0)?
        };
        Ok(ConnectIntent {
            claimed_user,
            password_digest: self.credentials.password_digest.clone(),
            mm_type: 0,
            session_type: 0,
        })
    }

    /// `true` once the hub's login ack has been received.
    pub fn logged_in_user(&self) -> Option<User> {
        match &*self.state.lock() {
            LoginState::LoggedIn(user) => Some(*user),
            _ => None,
        }
    }

    /// Sends one message to `dsts`, stamping `src` as the identity this
    /// client was assigned at login. Fails if login hasn't completed
    /// yet, or if the session closes the connection for exceeding its
    /// send redline.
    pub fn send_msg(&self, charset: u16, dsts: &[User], body: &[u8]) -> Result<()> {
        let my_user = match &*self.state.lock() {
            LoginState::LoggedIn(user) => *user,
            _ => return Err("not logged in yet").wrapped(ErrorKind::MsgClient),
        };
        let session = self.session.lock().clone().ok_or_else(|| Error::simple(ErrorKind::MsgClient))?;
        let frame = MsgFrame::new(my_user, charset, dsts.to_vec(), Arc::from(body))?;
        let wire = frame.encode()?;
        session.send_packet(Packet::from_slice(Default::default(), &wire))
    }

    /// Relays a message that didn't originate from this client itself,
    /// preserving the original `src` rather than stamping the identity
    /// this client logged in as. Used by a `MsgC2s` forwarding traffic
    /// from one of its sub-users up to the hub.
    pub fn forward(&self, src: User, charset: u16, dsts: &[User], body: &[u8]) -> Result<()> {
        let session = self.session.lock().clone().ok_or_else(|| Error::simple(ErrorKind::MsgClient))?;
        let frame = MsgFrame::new(src, charset, dsts.to_vec(), Arc::from(body))?;
        let wire = frame.encode()?;
        session.send_packet(Packet::from_slice(Default::default(), &wire))
    }
}

impl SessionObserver for MsgClient {
    fn on_ok(&self, session: &Arc<Session>) {
        *self.session.lock() = Some(session.clone());
    }

    fn on_recv(&self, _session: &Arc<Session>, packet: Packet) {
        if packet.is_heartbeat() {
            return;
        }

        let awaiting_ack = matches!(*self.state.lock(), LoginState::AwaitingAck);
        if awaiting_ack {
            match Header0::parse(packet.payload()) {
                Ok(ack) => {
                    *self.state.lock() = LoginState::LoggedIn(ack.user);
                    self.observer.on_login_ok(ack.user, ack.public_ip);
                }
                Err(_) => {
                    *self.state.lock() = LoginState::Failed;
                    self.observer.on_login_error("malformed login ack");
                }
            }
            return;
        }

        let my_user = match &*self.state.lock() {
            LoginState::LoggedIn(user) => *user,
            _ => return,
        };
        let frame = match MsgFrame::decode(packet.payload(), my_user) {
            Ok(f) => f,
            Err(_) => return,
        };
        self.observer.on_message(frame.src(), frame.charset(), frame.dsts(), frame.body());
    }

    fn on_close(&self, _session: &Arc<Session>, _reason: &Error) {
        *self.session.lock() = None;
        self.observer.on_disconnected();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp::config::SessionConfig;
    use crate::rtp::handshake::Handshaker;
    use crate::rtp::session::Role;
    use crate::rtp::timer::TimerFactory;
    use crate::rtp::transport::{IoOutcome, RingRecvPool, Transport};
    use std::sync::Mutex as StdMutex;

    struct RecordingTransport {
        sent: StdMutex<Vec<Vec<u8>>>,
    }
    impl Transport for RecordingTransport {
        fn fill_recv_pool(&mut self, _pool: &mut RingRecvPool) -> Result<IoOutcome> {
            Ok(IoOutcome::WouldBlock)
        }
        fn send(&mut self, data: &[u8]) -> Result<IoOutcome> {
            self.sent.lock().unwrap().push(data.to_vec());
            Ok(IoOutcome::Progress(data.len()))
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        login_ok: StdMutex<Option<User>>,
        messages: StdMutex<Vec<(User, Vec<User>)>>,
        disconnected: StdMutex<bool>,
    }
    impl MsgClientObserver for RecordingObserver {
        fn on_login_ok(&self, user: User, _public_ip: [u8; 4]) {
            *self.login_ok.lock().unwrap() = Some(user);
        }
        fn on_message(&self, src: User, _charset: u16, dsts: &[User], _body: &[u8]) {
            self.messages.lock().unwrap().push((src, dsts.to_vec()));
        }
        fn on_disconnected(&self) {
            *self.disconnected.lock().unwrap() = true;
        }
    }

    /// Builds a `MsgClient` whose session has already reached `Ready`
    /// and whose login has been acknowledged as `assigned`, without a
    /// real socket: feeds the raw handshake bytes and the
    /// `RTP_MSG_HEADER0` ack straight into the session exactly as a
    /// live hub connection would deliver them.
    fn logged_in_client(assigned: User) -> (Arc<MsgClient>, Arc<RecordingObserver>, Arc<Session>) {
        let observer = Arc::new(RecordingObserver::default());
        let credentials = Credentials { class_id: assigned.class_id(), requested_user_id: assigned.user_id(), password_digest: b"secret".to_vec() };
        let client = MsgClient::new(credentials, observer.clone());
        let intent = client.connect_intent().unwrap();
        let timers = Arc::new(TimerFactory::new());
        let session_observer: Arc<dyn SessionObserver> = client.clone();
        let session = Session::new(
            Box::new(RecordingTransport { sent: StdMutex::new(Vec::new()) }),
            crate::rtp::codec::PackMode::Tcp4,
            SessionConfig::default(),
            session_observer,
            timers,
            Role::Connector(intent),
        );
        session.handle_incoming(Packet::from_slice(Default::default(), &[3u8; 8]));
        let ack = Handshaker::new().build_session_ack().serialize();
        session.handle_incoming(Packet::from_slice(Default::default(), &ack));
        let header0 = Header0 { version: crate::rtp::handshake::PROTOCOL_VERSION, user: assigned, public_ip: [0u8; 4] };
        session.handle_incoming(Packet::from_slice(Default::default(), &header0.serialize()));
        (client, observer, session)
    }

    #[test]
    fn send_msg_fails_before_login_completes() {
        let observer = Arc::new(RecordingObserver::default());
        let credentials = Credentials { class_id: 2, requested_user_id: 10, password_digest: b"secret".to_vec() };
        let client = MsgClient::new(credentials, observer);
        assert!(client.send_msg(0, &[], b"hi").is_err());
    }

    #[test]
    fn send_msg_stamps_the_assigned_identity() {
        let assigned = User::new(2, 10, 0).unwrap();
        let (client, observer, _session) = logged_in_client(assigned);
        assert_eq!(observer.login_ok.lock().unwrap().as_ref(), Some(&assigned));
        assert_eq!(client.logged_in_user(), Some(assigned));

        let dst = User::new(2, 20, 0).unwrap();
        client.send_msg(0, &[dst], b"hello").unwrap();
    }

    #[test]
    fn forward_preserves_a_caller_supplied_src() {
        let assigned = User::new(1, 50, 0).unwrap();
        let (client, _observer, _session) = logged_in_client(assigned);

        let sub_user = User::new(2, 55, 0).unwrap();
        let dst = User::new(2, 56, 0).unwrap();
        // `forward` must carry `sub_user` as the frame's src, not the
        // identity this client itself logged in as.
        client.forward(sub_user, 0, &[dst], b"relayed").unwrap();
    }

    #[test]
    fn on_message_surfaces_the_original_destination_list() {
        let assigned = User::new(2, 10, 0).unwrap();
        let (_client, observer, session) = logged_in_client(assigned);

        let sub_a = User::new(2, 55, 0).unwrap();
        let sub_b = User::new(2, 56, 0).unwrap();
        let frame = MsgFrame::new(assigned, 0, vec![sub_a, sub_b], Arc::from(&b"payload"[..])).unwrap();
        session.handle_incoming(Packet::from_slice(Default::default(), &frame.encode().unwrap()));

        let messages = observer.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0], (assigned, vec![sub_a, sub_b]));
    }

    #[test]
    fn disconnect_clears_the_session_and_notifies() {
        let assigned = User::new(2, 10, 0).unwrap();
        let (client, observer, session) = logged_in_client(assigned);
        session.close();
        assert!(*observer.disconnected.lock().unwrap());
        assert!(client.send_msg(0, &[], b"too late").is_err());
    }
}
