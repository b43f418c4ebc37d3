use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    io,
    net::{Ipv4Addr, SocketAddr},
    rc::Rc,
};

use crate::{
    game::ControllerLayout,
    transceiver::{Listener, Transceiver},
    wire::{de32, Command, CommandClass, LoginData},
};

/// Both directions of one simulated TCP connection.
#[derive(Debug)]
pub struct Pipe {
    to_server: VecDeque<u8>,
    to_client: VecDeque<u8>,
    client_closed: bool,
    server_closed: bool,
    /// Bytes the client side buffers unread before the server sees a full socket.
    window: usize,
    /// Most bytes handed to the server per read.
    chunk: usize,
}

impl Default for Pipe {
    fn default() -> Self {
        Self {
            to_server: VecDeque::new(),
            to_client: VecDeque::new(),
            client_closed: false,
            server_closed: false,
            window: usize::MAX,
            chunk: usize::MAX,
        }
    }
}

/// Server end of a [`Pipe`].
pub struct SimStream {
    pipe: Rc<RefCell<Pipe>>,
}

impl Transceiver for SimStream {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        let mut pipe = self.pipe.borrow_mut();
        if pipe.to_server.is_empty() {
            return Ok(pipe.client_closed.then_some(0));
        }
        let n = buf.len().min(pipe.chunk).min(pipe.to_server.len());
        for (dst, src) in buf.iter_mut().zip(pipe.to_server.drain(..n)) {
            *dst = src;
        }
        Ok(Some(n))
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut pipe = self.pipe.borrow_mut();
        if pipe.client_closed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        let room = pipe.window.saturating_sub(pipe.to_client.len());
        let n = buf.len().min(room);
        pipe.to_client.extend(&buf[..n]);
        Ok(n)
    }
}

impl Drop for SimStream {
    fn drop(&mut self) {
        self.pipe.borrow_mut().server_closed = true;
    }
}

type Backlog = Rc<RefCell<VecDeque<(SimStream, SocketAddr)>>>;

/// Hands out connected client/listener pairs.
#[derive(Default)]
pub struct SimNetwork {
    backlog: Backlog,
    next_port: Cell<u16>,
}

impl SimNetwork {
    pub fn listener(&self) -> SimListener {
        SimListener {
            backlog: self.backlog.clone(),
        }
    }

    pub fn connect(&self) -> SimClient {
        let pipe = Rc::new(RefCell::new(Pipe::default()));
        let port = 40000 + self.next_port.get();
        self.next_port.set(self.next_port.get() + 1);
        self.backlog.borrow_mut().push_back((
            SimStream { pipe: pipe.clone() },
            SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
        ));
        SimClient {
            pipe,
            total_size: 4,
            inbox: Vec::new(),
        }
    }
}

pub struct SimListener {
    backlog: Backlog,
}

impl Listener for SimListener {
    type Stream = SimStream;

    fn accept(&mut self) -> io::Result<Option<(SimStream, SocketAddr)>> {
        Ok(self.backlog.borrow_mut().pop_front())
    }
}

/// One server message as the client sees it. Input frames come out as
/// `Command::Emulator(0)` with the merged data as payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub cmd: Command,
    pub len: u32,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn is_input(&self) -> bool {
        self.cmd == Command::Emulator(0)
    }

    /// Chat text with the sender prefix stripped.
    pub fn text(&self) -> String {
        let nick_len = de32(&self.payload) as usize;
        String::from_utf8_lossy(&self.payload[4 + nick_len..]).into_owned()
    }
}

/// Client end of a [`Pipe`], speaking the protocol by hand.
pub struct SimClient {
    pipe: Rc<RefCell<Pipe>>,
    total_size: usize,
    inbox: Vec<u8>,
}

impl SimClient {
    pub fn send(&self, bytes: &[u8]) {
        self.pipe.borrow_mut().to_server.extend(bytes);
    }

    pub fn login(&mut self, login: &LoginData) {
        if let Ok(layout) = ControllerLayout::from_login(&login.header) {
            self.total_size = layout.total_size;
        }
        let block = login.to_bytes();
        self.send(&(block.len() as u32).to_le_bytes());
        self.send(&block);
    }

    pub fn input(&self, data: &[u8]) {
        self.send(&[0]);
        self.send(data);
    }

    /// A command, framed as an update frame of `1 + local_size` bytes plus
    /// the length field.
    pub fn command(&self, cmd: Command, local_size: usize, len: u32) {
        self.send(&[cmd.byte()]);
        self.send(&vec![0; local_size]);
        self.send(&len.to_le_bytes());
    }

    pub fn payload_command(&self, cmd: Command, local_size: usize, payload: &[u8]) {
        self.command(cmd, local_size, payload.len() as u32);
        self.send(payload);
    }

    /// Everything the server has sent since the last call.
    pub fn recv(&mut self) -> Vec<Message> {
        self.inbox.extend(self.pipe.borrow_mut().to_client.drain(..));
        let header = self.total_size + 1;
        let mut messages = vec![];
        let mut at = 0;
        while self.inbox.len() - at >= header {
            let frame = &self.inbox[at..at + header];
            let cmd = Command::from(frame[self.total_size]);
            if cmd == Command::Emulator(0) {
                messages.push(Message {
                    cmd,
                    len: 0,
                    payload: frame[..self.total_size].to_vec(),
                });
                at += header;
                continue;
            }
            let len = de32(frame);
            let payload_len = match cmd.class() {
                CommandClass::Payload => len as usize,
                _ => 0,
            };
            if self.inbox.len() - at < header + payload_len {
                break;
            }
            let payload = self.inbox[at + header..at + header + payload_len].to_vec();
            messages.push(Message { cmd, len, payload });
            at += header + payload_len;
        }
        self.inbox.drain(..at);
        messages
    }

    pub fn close(&self) {
        self.pipe.borrow_mut().client_closed = true;
    }

    pub fn is_disconnected(&self) -> bool {
        self.pipe.borrow().server_closed
    }

    /// Stop reading once `bytes` are waiting.
    pub fn set_window(&self, bytes: usize) {
        self.pipe.borrow_mut().window = bytes;
    }

    pub fn set_chunk(&self, bytes: usize) {
        self.pipe.borrow_mut().chunk = bytes;
    }
}

mod tests {
    use crate::{
        config::{password_digest, ServerConfig},
        consts::{
            EMULATOR_ID_SIZE, GAME_ID_SIZE, MAX_CLIENTS_PER_GAME, MAX_CONTROLLERS_PER_GAME,
            MAX_SLEEP_US,
        },
        server::Server,
        wire::LoginHeader,
    };

    use super::*;

    const TICK: u64 = 20_000;
    const EMULATOR: &[u8] = b"mednafen 1.32";

    /// Set `NETPLAY_TEST_LOG` to see server logs in test output.
    fn enable_logging() {
        if std::env::var_os("NETPLAY_TEST_LOG").is_some() {
            let _ = env_logger::builder()
                .is_test(true)
                .filter_level(log::LevelFilter::Debug)
                .try_init();
        }
    }

    fn login(game: u8, types: &[u8], sizes: &[u8], local_players: u8, nick: &str) -> LoginData {
        let mut controller_type = [0; MAX_CONTROLLERS_PER_GAME];
        controller_type[..types.len()].copy_from_slice(types);
        let mut controller_data_size = [0; MAX_CONTROLLERS_PER_GAME];
        controller_data_size[..sizes.len()].copy_from_slice(sizes);
        let mut emulator_id = [0; EMULATOR_ID_SIZE];
        emulator_id[..EMULATOR.len()].copy_from_slice(EMULATOR);
        LoginData {
            header: LoginHeader {
                game_id: [game; GAME_ID_SIZE],
                password: [0; 16],
                protocol_version: 3,
                total_controllers: types.len() as u8,
                emulator_id_len: EMULATOR.len() as u32,
                controller_data_size,
                controller_type,
                local_players,
            },
            nickname: nick.as_bytes().to_vec(),
            emulator_id,
        }
    }

    /// Two controllers of one byte each.
    fn pad(nick: &str) -> LoginData {
        login(1, &[1, 1], &[1, 1], 1, nick)
    }

    fn setup(cfg: ServerConfig) -> (SimNetwork, Server<SimListener>) {
        enable_logging();
        let net = SimNetwork::default();
        let server = Server::with_listener(cfg, net.listener());
        (net, server)
    }

    fn default_cfg() -> ServerConfig {
        ServerConfig::new(0, 40, 5)
    }

    fn tick(server: &mut Server<SimListener>, time: &mut u64) {
        *time += TICK;
        server.update(*time);
    }

    /// Alice and Bob in game 1, holding controllers 0 and 1.
    fn two_players() -> (SimNetwork, Server<SimListener>, SimClient, SimClient) {
        let (net, mut server) = setup(default_cfg());
        let mut alice = net.connect();
        alice.login(&pad("alice"));
        server.update(0);
        let mut bob = net.connect();
        bob.login(&pad("bob"));
        server.update(0);
        (net, server, alice, bob)
    }

    fn commands(messages: &[Message]) -> Vec<Command> {
        messages
            .iter()
            .filter(|m| !m.is_input())
            .map(|m| m.cmd)
            .collect()
    }

    fn last_input(messages: &[Message]) -> Vec<u8> {
        messages
            .iter()
            .rev()
            .find(|m| m.is_input())
            .map(|m| m.payload.clone())
            .unwrap_or_default()
    }

    #[test]
    fn two_clients_share_one_game() {
        let (_net, server, mut alice, mut bob) = two_players();

        assert_eq!(server.iter_games().count(), 1);
        let game = server.game(0).unwrap();
        assert_eq!(game.ownership[0], 0b01);
        assert_eq!(game.ownership[1], 0b10);
        assert_eq!(game.in_use, 0b11);
        assert_eq!(server.client(0).unwrap().local_data_size, 1);
        assert_eq!(server.client(1).unwrap().slot, 1);

        let to_alice = alice.recv();
        assert_eq!(
            commands(&to_alice),
            vec![Command::YouJoined, Command::RequestState, Command::PlayerJoined]
        );
        assert_eq!(to_alice[0].payload, b"\x01\0\0\0\0\0\0\0alice");
        assert_eq!(to_alice[2].payload, b"\x02\0\0\0\0\0\0\0bob");

        let to_bob = bob.recv();
        assert_eq!(
            commands(&to_bob),
            vec![Command::PlayerJoined, Command::YouJoined]
        );
        assert_eq!(to_bob[1].payload, b"\x02\0\0\0\0\0\0\0bob");
    }

    #[test]
    fn login_survives_fragmentation() {
        let (net, mut server) = setup(default_cfg());
        let mut client = net.connect();
        client.set_chunk(3);
        client.login(&pad("slow"));
        server.update(0);
        assert_eq!(server.iter_games().count(), 1);
        assert_eq!(commands(&client.recv()), vec![Command::YouJoined]);
    }

    #[test]
    fn tick_broadcasts_or_of_inputs() {
        let (_net, mut server, mut alice, mut bob) = two_players();
        let mut time = 0;

        // bob duplicates controller 0 and acknowledges
        bob.command(Command::CtrlrDupe, 1, 0b01);
        tick(&mut server, &mut time);
        let to_bob = bob.recv();
        let change = to_bob.iter().find(|m| m.cmd == Command::CtrlChange).unwrap();
        assert_eq!(change.len, 0b11);
        assert!(alice.recv().iter().any(|m| m.cmd == Command::CtrlrDupeNotif));
        assert_eq!(server.client(1).unwrap().pending, 1);

        bob.command(Command::CtrlChangeAck, 1, 0b11);
        tick(&mut server, &mut time);
        assert_eq!(server.client(1).unwrap().pending, 0);
        assert_eq!(server.client(1).unwrap().local_data_size, 2);

        alice.input(&[0b0001]);
        bob.input(&[0b0010, 0b0100]);
        tick(&mut server, &mut time);
        assert_eq!(last_input(&alice.recv()), vec![0b0011, 0b0100, 0, 0]);
        assert_eq!(last_input(&bob.recv()), vec![0b0011, 0b0100, 0, 0]);
    }

    #[test]
    fn take_waits_for_acknowledgement() {
        let (_net, mut server, mut alice, mut bob) = two_players();
        let mut time = 0;
        alice.input(&[0x11]);
        bob.input(&[0x22]);
        tick(&mut server, &mut time);
        assert_eq!(last_input(&alice.recv()), vec![0x11, 0x22, 0, 0]);
        bob.recv();

        alice.command(Command::CtrlrTake, 1, 0b10);
        tick(&mut server, &mut time);
        assert_eq!(server.game(0).unwrap().ownership[..2], [0b11, 0]);
        assert_eq!(server.client(0).unwrap().pending, 1);
        assert_eq!(server.client(1).unwrap().pending, 1);
        let to_bob = bob.recv();
        let change = to_bob.iter().find(|m| m.cmd == Command::CtrlChange).unwrap();
        assert_eq!(change.len, 0);
        assert!(to_bob.iter().any(|m| m.cmd == Command::CtrlrTakeNotif));
        // nobody acknowledged yet, so nobody's input counts
        assert_eq!(last_input(&to_bob), vec![0, 0, 0, 0]);
        alice.recv();

        // bob still sends frames sized for the old mask; they are ignored
        bob.input(&[0x7F]);
        bob.command(Command::CtrlChangeAck, 1, 0);
        tick(&mut server, &mut time);
        let bob_conn = server.client(1).unwrap();
        assert_eq!(bob_conn.pending, 0);
        assert_eq!(bob_conn.local_data_size, 0);
        assert_eq!(bob_conn.assembler.expected(), 1);

        alice.command(Command::CtrlChangeAck, 1, 0b11);
        tick(&mut server, &mut time);
        assert_eq!(server.client(0).unwrap().local_data_size, 2);

        alice.input(&[0x01, 0x02]);
        bob.input(&[]);
        tick(&mut server, &mut time);
        assert_eq!(last_input(&alice.recv()), vec![0x01, 0x02, 0, 0]);
        assert!(!bob.is_disconnected());
    }

    #[test]
    fn drop_and_swap() {
        let (_net, mut server, mut alice, mut bob) = two_players();
        let mut time = 0;

        // controllers 0 and 1
        alice.command(Command::CtrlrSwap, 1, 1 << 8);
        tick(&mut server, &mut time);
        assert_eq!(server.game(0).unwrap().ownership[..2], [0b10, 0b01]);
        let notice = alice
            .recv()
            .into_iter()
            .find(|m| m.cmd == Command::CtrlrSwapNotif)
            .unwrap();
        assert_eq!(notice.len, 0x0100);
        bob.recv();

        // still pending from the swap, but a drop of something not owned is refused
        alice.command(Command::CtrlrDrop, 1, 0b01);
        tick(&mut server, &mut time);
        let refusal = alice
            .recv()
            .into_iter()
            .find(|m| m.cmd == Command::Text)
            .unwrap();
        assert_eq!(
            refusal.text(),
            "Controller(s) you don't have control of specified."
        );
        assert!(!alice.is_disconnected());

        alice.command(Command::CtrlrDrop, 1, 0b10);
        tick(&mut server, &mut time);
        assert_eq!(server.game(0).unwrap().in_use, 0b01);
    }

    #[test]
    fn nonexistent_controller_is_fatal() {
        let (_net, mut server, alice, _bob) = two_players();
        let mut time = 0;
        alice.command(Command::CtrlrTake, 1, 0b100);
        tick(&mut server, &mut time);
        assert!(alice.is_disconnected());
        let reason = server.client(0).unwrap().disconnect_reason.clone();
        assert_eq!(reason.as_deref(), Some("Nonexistent controller(s) specified."));
    }

    #[test]
    fn mismatched_layout_is_rejected() {
        let (net, mut server) = setup(default_cfg());
        let mut alice = net.connect();
        alice.login(&pad("alice"));
        server.update(0);

        let mut eve = net.connect();
        eve.login(&login(1, &[1, 2], &[1, 1], 1, "eve"));
        server.update(0);

        let texts = eve.recv();
        assert_eq!(
            texts[0].text(),
            "Controller type mismatch for controller 2.  Game: 1, You: 2"
        );
        assert!(eve.is_disconnected());
        assert_eq!(server.game(0).unwrap().member_count(), 1);
        assert_eq!(server.game(0).unwrap().in_use, 0b01);
    }

    #[test]
    fn different_game_ids_get_different_games() {
        let (net, mut server) = setup(default_cfg());
        let mut a = net.connect();
        a.login(&pad("a"));
        let mut b = net.connect();
        b.login(&login(2, &[1], &[3], 1, "b"));
        server.update(0);
        assert_eq!(server.iter_games().count(), 2);
        assert_eq!(server.game(1).unwrap().layout.total_size, 4);
    }

    #[test]
    fn game_full() {
        let (net, mut server) = setup(default_cfg());
        let mut clients = (0..=MAX_CLIENTS_PER_GAME)
            .map(|i| {
                let mut c = net.connect();
                c.login(&pad(&format!("player{i}")));
                c
            })
            .collect::<Vec<_>>();
        server.update(0);

        assert_eq!(server.game(0).unwrap().member_count(), MAX_CLIENTS_PER_GAME);
        let last = clients.last_mut().unwrap();
        assert_eq!(last.recv()[0].text(), "Sorry, game is full.");
        assert!(last.is_disconnected());
        assert!(clients[..MAX_CLIENTS_PER_GAME]
            .iter()
            .all(|c| !c.is_disconnected()));
    }

    #[test]
    fn stalled_reader_is_disconnected() {
        let (net, mut server) = setup(default_cfg().min_sendq_size(16).max_sendq_size(64));
        let mut stalled = net.connect();
        stalled.set_window(0);
        stalled.login(&pad("stalled"));
        let mut healthy = net.connect();
        healthy.login(&pad("healthy"));
        server.update(0);

        let mut time = 0;
        for _ in 0..50 {
            tick(&mut server, &mut time);
            if let Some(conn) = server.client(0) {
                assert!(conn.sendq.len() <= 64);
                assert!(conn.sendq.allocated() <= 64);
            }
            if stalled.is_disconnected() {
                break;
            }
            healthy.recv();
        }
        assert!(stalled.is_disconnected());
        let reason = server.client(0).unwrap().disconnect_reason.clone().unwrap();
        assert!(reason.starts_with("Exceeded MaxSendQSize"), "{reason}");
        assert!(stalled.recv().is_empty());
        assert!(!healthy.is_disconnected());

        tick(&mut server, &mut time);
        let left = healthy
            .recv()
            .into_iter()
            .find(|m| m.cmd == Command::PlayerLeft)
            .unwrap();
        assert_eq!(left.payload, b"\x01\0\0\0\0\0\0\0stalled");
    }

    #[test]
    fn connect_timeout() {
        let (net, mut server) = setup(default_cfg());
        let idle = net.connect();
        server.update(0);
        assert_eq!(server.iter_clients().count(), 1);
        server.update(5_000_000);
        assert!(!idle.is_disconnected());
        server.update(5_000_001);
        assert!(idle.is_disconnected());
        server.update(5_000_002);
        assert_eq!(server.iter_clients().count(), 0);
    }

    #[test]
    fn idle_member_times_out_and_game_is_destroyed() {
        let (net, mut server) = setup(default_cfg().idle_timeout(1));
        let mut lonely = net.connect();
        lonely.login(&pad("lonely"));
        server.update(0);
        assert_eq!(server.iter_games().count(), 1);

        server.update(1_000_000);
        assert!(!lonely.is_disconnected());
        server.update(1_020_000);
        assert!(lonely.is_disconnected());
        assert_eq!(
            server.client(0).unwrap().disconnect_reason.as_deref(),
            Some("Idle timeout met.")
        );

        // reaped, zombie-marked and destroyed in the same pass
        server.update(1_040_000);
        assert_eq!(server.iter_clients().count(), 0);
        assert_eq!(server.iter_games().count(), 0);
    }

    #[test]
    fn rejoin_revives_zombie_game() {
        let (net, mut server) = setup(default_cfg());
        let mut alice = net.connect();
        alice.login(&pad("alice"));
        server.update(0);
        alice.close();
        tick(&mut server, &mut 0);
        assert!(alice.is_disconnected());

        // alice's slot is reaped at the start of this pass, then bob logs in
        // before the game is considered for teardown
        let mut bob = net.connect();
        bob.login(&pad("bob"));
        server.update(TICK * 2);
        assert_eq!(server.iter_games().count(), 1);
        assert!(!server.game(0).unwrap().zombie);
        assert_eq!(server.game(0).unwrap().ownership[0], 0b01);
        assert!(!bob.is_disconnected());
    }

    #[test]
    fn wrong_password_is_rejected() {
        let (net, mut server) = setup(default_cfg().password("secret"));
        let mut guest = net.connect();
        guest.login(&pad("guest"));
        let mut member = net.connect();
        let mut data = pad("member");
        data.header.password = password_digest("secret");
        member.login(&data);
        server.update(0);

        assert_eq!(guest.recv()[0].text(), "Invalid server password.");
        assert!(guest.is_disconnected());
        assert!(!member.is_disconnected());
        assert_eq!(server.game(0).unwrap().member_count(), 1);
    }

    #[test]
    fn bad_login_length_disconnects() {
        let (net, mut server) = setup(default_cfg());
        let client = net.connect();
        client.send(&10u32.to_le_bytes());
        server.update(0);
        assert!(client.is_disconnected());
        assert_eq!(
            server.client(0).unwrap().disconnect_reason.as_deref(),
            Some("Login len(10) out of range.")
        );
    }

    #[test]
    fn chat_echo_and_nicknames() {
        let (_net, mut server, mut alice, mut bob) = two_players();
        let mut time = 0;
        alice.recv();
        bob.recv();

        alice.payload_command(Command::Text, 1, b"hi");
        alice.payload_command(Command::Echo, 1, b"ping");
        tick(&mut server, &mut time);
        let chat = bob
            .recv()
            .into_iter()
            .find(|m| m.cmd == Command::Text)
            .unwrap();
        assert_eq!(chat.payload, b"\x05\0\0\0alicehi");
        let to_alice = alice.recv();
        assert!(to_alice.iter().any(|m| m.cmd == Command::Text));
        let echo = to_alice.iter().find(|m| m.cmd == Command::Echo).unwrap();
        assert_eq!(echo.payload, b"ping");

        alice.payload_command(Command::SetNick, 1, b"BOB");
        tick(&mut server, &mut time);
        let changed = bob
            .recv()
            .into_iter()
            .find(|m| m.cmd == Command::NickChanged)
            .unwrap();
        let new = &server.client(0).unwrap().nickname;
        assert_eq!(new.len(), 8);
        assert_eq!(changed.payload, format!("alice\n{new}\0").as_bytes());

        alice.payload_command(Command::SetNick, 1, b"carol<admin>");
        tick(&mut server, &mut time);
        assert_eq!(server.client(0).unwrap().nickname, "carol");
    }

    #[test]
    fn emulator_commands_and_state_are_forwarded() {
        let (_net, mut server, mut alice, mut bob) = two_players();
        let mut time = 0;
        alice.recv();
        bob.recv();

        alice.command(Command::Emulator(0x01), 1, 0);
        alice.payload_command(Command::LoadState, 1, b"state");
        alice.payload_command(Command::SetMedia, 1, &[9; 16]);
        alice.command(Command::Integrity, 1, 0);
        tick(&mut server, &mut time);
        assert_eq!(
            commands(&bob.recv()),
            vec![
                Command::Emulator(0x01),
                Command::LoadState,
                Command::SetMedia,
                Command::Integrity
            ]
        );

        alice.recv();
        alice.payload_command(Command::SetMedia, 1, &[9; 4]);
        tick(&mut server, &mut time);
        let to_alice = alice.recv();
        assert_eq!(commands(&to_alice), vec![Command::Text]);
        assert_eq!(to_alice[0].text(), "SET_MEDIA command length is wrong.");
        assert!(alice.is_disconnected());
    }

    #[test]
    fn fps_changes_and_range_check() {
        let (_net, mut server, mut alice, _bob) = two_players();
        let mut time = 0;
        alice.recv();

        alice.command(Command::SetFps, 1, 200 << 24);
        tick(&mut server, &mut time);
        let refusal = alice
            .recv()
            .into_iter()
            .find(|m| m.cmd == Command::Text)
            .unwrap();
        assert_eq!(refusal.text(), "FPS out of range(range is from 1 to 130).");

        alice.command(Command::SetFps, 1, 50 << 24);
        tick(&mut server, &mut time);
        assert_eq!(server.game(0).unwrap().fps, 50 << 24);
        assert_eq!(server.game(0).unwrap().interval_us(), 20_000);
    }

    #[test]
    fn protocol_violations_disconnect() {
        let (_net, mut server, mut alice, mut bob) = two_players();
        let mut time = 0;
        alice.recv();
        bob.recv();

        alice.command(Command::from(0x42), 1, 0);
        bob.command(Command::Text, 1, 100 << 20);
        tick(&mut server, &mut time);

        assert_eq!(alice.recv()[0].text(), "Unknown command: 0x42");
        assert!(alice.is_disconnected());
        let to_bob = bob.recv();
        assert_eq!(commands(&to_bob), vec![Command::Text]);
        assert_eq!(
            to_bob[0].text(),
            "Tried to exceed maximum command payload by 99614720 bytes!"
        );
        assert!(bob.is_disconnected());
        assert_eq!(
            server.client(1).unwrap().disconnect_reason.as_deref(),
            Some("Tried to exceed maximum command payload by 99614720 bytes!")
        );
    }

    #[test]
    fn server_only_command_refused_without_payload() {
        let (_net, mut server, mut alice, _bob) = two_players();
        let mut time = 0;
        alice.recv();

        alice.command(Command::from(0x85), 1, 0);
        tick(&mut server, &mut time);

        let to_alice = alice.recv();
        assert_eq!(commands(&to_alice), vec![Command::Text]);
        assert_eq!(to_alice[0].text(), "Unknown command: 0x85");
        assert!(alice.is_disconnected());
    }

    #[test]
    fn quit_without_reason() {
        let (_net, mut server, alice, _bob) = two_players();
        let mut time = 0;
        alice.command(Command::Quit, 1, 0);
        tick(&mut server, &mut time);
        assert!(alice.is_disconnected());
        assert_eq!(
            server.client(0).unwrap().disconnect_reason.as_deref(),
            Some("Quit")
        );
    }

    #[test]
    fn stacked_changes_follow_acknowledged_mask() {
        let (net, mut server) = setup(default_cfg());
        let mut alice = net.connect();
        alice.login(&login(1, &[1, 1, 1], &[1, 1, 1], 1, "alice"));
        let mut bob = net.connect();
        bob.login(&login(1, &[1, 1, 1], &[1, 1, 1], 2, "bob"));
        server.update(0);
        assert_eq!(server.game(0).unwrap().ownership[..2], [0b001, 0b110]);
        assert_eq!(server.client(1).unwrap().assembler.expected(), 3);
        let mut time = 0;

        // two takes before bob answers either
        alice.command(Command::CtrlrTake, 1, 0b010);
        alice.command(Command::CtrlrTake, 1, 0b100);
        tick(&mut server, &mut time);
        let changes = bob
            .recv()
            .into_iter()
            .filter(|m| m.cmd == Command::CtrlChange)
            .map(|m| m.len)
            .collect::<Vec<_>>();
        assert_eq!(changes, vec![0b100, 0]);
        assert_eq!(server.client(1).unwrap().pending, 2);
        assert_eq!(server.client(1).unwrap().assembler.expected(), 3);

        // first ack: still one change outstanding, frames sized by the acked mask
        bob.input(&[0x7F, 0x7F]);
        bob.command(Command::CtrlChangeAck, 2, 0b100);
        tick(&mut server, &mut time);
        let bob_conn = server.client(1).unwrap();
        assert_eq!(bob_conn.pending, 1);
        assert_eq!(bob_conn.local_data_size, 1);
        assert_eq!(bob_conn.assembler.expected(), 2);

        bob.input(&[0x55]);
        bob.command(Command::CtrlChangeAck, 1, 0);
        tick(&mut server, &mut time);
        let bob_conn = server.client(1).unwrap();
        assert_eq!(bob_conn.pending, 0);
        assert_eq!(bob_conn.local_data_size, 0);
        assert_eq!(bob_conn.assembler.expected(), 1);
        assert_eq!(last_input(&bob.recv()), vec![0, 0, 0, 0]);

        alice.command(Command::CtrlChangeAck, 1, 0b011);
        alice.command(Command::CtrlChangeAck, 2, 0b111);
        tick(&mut server, &mut time);
        assert_eq!(server.client(0).unwrap().local_data_size, 3);

        alice.input(&[1, 2, 3]);
        bob.input(&[]);
        tick(&mut server, &mut time);
        assert_eq!(last_input(&bob.recv()), vec![1, 2, 3, 0]);
        assert!(!bob.is_disconnected());
    }

    #[test]
    fn quit_and_player_left() {
        let (_net, mut server, alice, mut bob) = two_players();
        let mut time = 0;
        bob.recv();

        alice.payload_command(Command::Quit, 1, b"see\nya");
        tick(&mut server, &mut time);
        assert_eq!(
            server.client(0).unwrap().disconnect_reason.as_deref(),
            Some("Quit: see ya")
        );

        tick(&mut server, &mut time);
        assert!(server.client(0).is_none());
        let left = bob
            .recv()
            .into_iter()
            .find(|m| m.cmd == Command::PlayerLeft)
            .unwrap();
        assert_eq!(left.payload, b"\x01\0\0\0\0\0\0\0alice");
        assert_eq!(server.game(0).unwrap().in_use, 0b10);
    }

    #[test]
    fn request_list_resends_roster() {
        let (_net, mut server, mut alice, _bob) = two_players();
        let mut time = 0;
        alice.recv();
        alice.command(Command::RequestList, 1, 0);
        tick(&mut server, &mut time);
        assert_eq!(
            commands(&alice.recv()),
            vec![Command::YouJoined, Command::PlayerJoined]
        );
    }

    #[test]
    fn sleep_until_next_tick() {
        let (net, mut server) = setup(default_cfg());
        assert_eq!(server.sleep_duration(0).as_micros() as u64, MAX_SLEEP_US);
        let mut alice = net.connect();
        alice.login(&pad("alice"));
        server.update(0);
        let interval = server.game(0).unwrap().interval_us();
        assert_eq!(interval, 16_638);
        assert_eq!(server.sleep_duration(0).as_micros() as u64, MAX_SLEEP_US.min(interval));
        assert_eq!(server.sleep_duration(10_000).as_micros() as u64, interval - 10_000);
        assert_eq!(server.sleep_duration(interval + 5).as_micros(), 0);
    }
}
