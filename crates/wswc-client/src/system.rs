// system.rs -- frame driver for clients and the server browser
//
// An owned handle created with System::new(); the host passes it by
// reference through every call. frame() pins the system to the calling
// thread on first use: the single-threaded cooperative model is part of the
// contract, and the pin check catches accidental cross-thread driving
// before it corrupts anything.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use wswc_common::console::ConsoleRef;
use wswc_common::net::NetworkAddress;
use wswc_common::qcommon::{MAX_FAKE_CLIENT_INSTANCES, MAX_MASTER_SERVERS, PROTOCOL21};

use crate::cl_browser::{ServerList, ServerListListener};
use crate::client::Client;

/// Monotonic millisecond clock shared by every timed component.
pub trait Clock: Send + Sync {
    fn millis(&self) -> i64;
}

/// The frame-driven clock: advanced once per System::frame() so that every
/// component observes the same timestamp within a frame.
pub struct SystemClock {
    millis: AtomicI64,
}

impl SystemClock {
    fn new() -> Self {
        Self { millis: AtomicI64::new(0) }
    }

    fn advance_to(&self, millis: i64) {
        self.millis.store(millis, Ordering::Relaxed);
    }
}

impl Clock for SystemClock {
    fn millis(&self) -> i64 {
        self.millis.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientId(usize);

pub struct System {
    console: ConsoleRef,
    clock: Arc<SystemClock>,
    started_at: Instant,

    clients: [Option<Client>; MAX_FAKE_CLIENT_INSTANCES],

    master_servers: Vec<NetworkAddress>,

    server_list: Option<ServerList>,
    pending_show_empty_servers: bool,
    pending_show_player_info: bool,

    pinned_to_thread: Option<ThreadId>,
}

impl System {
    pub fn new(console: ConsoleRef) -> Self {
        Self {
            console,
            clock: Arc::new(SystemClock::new()),
            started_at: Instant::now(),
            clients: Default::default(),
            master_servers: Vec::new(),
            server_list: None,
            pending_show_empty_servers: false,
            pending_show_player_info: false,
            pinned_to_thread: None,
        }
    }

    pub fn millis(&self) -> i64 {
        self.clock.millis()
    }

    pub fn sleep(&self, millis: u64) {
        thread::sleep(Duration::from_millis(millis));
    }

    fn check_thread(&self, function: &str) {
        let Some(pinned) = self.pinned_to_thread else {
            return;
        };
        if pinned == thread::current().id() {
            return;
        }
        self.console.vprintf(format_args!(
            "{}: Attempt to use the System instance from different threads has been detected\n",
            function
        ));
        panic!("System: cross-thread use detected");
    }

    // ========================================================
    // Clients
    // ========================================================

    /// Creates a client in a free slot. Returns `None` when all
    /// MAX_FAKE_CLIENT_INSTANCES slots are occupied.
    pub fn new_client(&mut self, console: ConsoleRef) -> Option<ClientId> {
        for (index, slot) in self.clients.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(Client::new(console, self.clock.clone()));
                return Some(ClientId(index));
            }
        }
        None
    }

    pub fn client_mut(&mut self, id: ClientId) -> Option<&mut Client> {
        self.clients.get_mut(id.0).and_then(Option::as_mut)
    }

    pub fn delete_client(&mut self, id: ClientId) {
        match self.clients.get_mut(id.0) {
            Some(slot) if slot.is_some() => *slot = None,
            _ => self.console.printf("System::delete_client(): unregistered client id\n"),
        }
    }

    // ========================================================
    // Master servers
    // ========================================================

    pub fn add_master_server(&mut self, address: NetworkAddress) -> bool {
        if self.master_servers.len() == MAX_MASTER_SERVERS {
            return false;
        }
        if self.master_servers.contains(&address) {
            return false;
        }
        self.master_servers.push(address);
        true
    }

    pub fn remove_master_server(&mut self, address: &NetworkAddress) -> bool {
        match self.master_servers.iter().position(|known| known == address) {
            Some(index) => {
                self.master_servers.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn is_master_server(&self, address: &NetworkAddress) -> bool {
        self.master_servers.contains(address)
    }

    // ========================================================
    // Server list lifecycle
    // ========================================================

    /// Starts polling master and game servers. Not idempotent: a second
    /// call without stop_updating_server_list() in-between is fatal.
    pub fn start_updating_server_list(&mut self, listener: Box<dyn ServerListListener>) -> bool {
        if self.server_list.is_some() {
            self.console.printf("System::start_updating_server_list(): already updating the server list\n");
            panic!("System::start_updating_server_list(): already updating the server list");
        }

        let Some(mut server_list) = ServerList::new(self.console.clone(), listener, PROTOCOL21) else {
            return false;
        };

        server_list.set_options(self.pending_show_empty_servers, self.pending_show_player_info);
        self.server_list = Some(server_list);
        true
    }

    /// May be called before start_updating_server_list(); the options are
    /// applied when updating begins.
    pub fn set_server_list_update_options(&mut self, show_empty_servers: bool, show_player_info: bool) {
        self.pending_show_empty_servers = show_empty_servers;
        self.pending_show_player_info = show_player_info;

        if let Some(server_list) = self.server_list.as_mut() {
            server_list.set_options(show_empty_servers, show_player_info);
        }
    }

    /// Idempotent; fine to call without a prior start.
    pub fn stop_updating_server_list(&mut self) {
        self.server_list = None;
    }

    // ========================================================
    // Frame
    // ========================================================

    /// Runs one cooperative frame: advances the clock, drains every socket,
    /// then drives client and server-list timers. When nothing was readable
    /// the frame waits up to `max_millis` before a second drain pass.
    pub fn frame(&mut self, max_millis: u64) {
        let current_thread = thread::current().id();
        match self.pinned_to_thread {
            None => self.pinned_to_thread = Some(current_thread),
            Some(_) => self.check_thread("System::frame()"),
        }

        self.time_frame();

        if self.net_poll_frame() == 0 && max_millis > 0 {
            self.sleep(max_millis);
            self.time_frame();
            self.net_poll_frame();
        }

        let now = self.clock.millis();

        for slot in self.clients.iter_mut() {
            if let Some(client) = slot.as_mut() {
                client.frame();
            }
        }

        if let Some(server_list) = self.server_list.as_mut() {
            server_list.frame(now, &self.master_servers);
        }
    }

    fn time_frame(&mut self) {
        self.clock.advance_to(self.started_at.elapsed().as_millis() as i64);
    }

    fn net_poll_frame(&mut self) -> usize {
        let mut datagrams = 0;

        for slot in self.clients.iter_mut() {
            if let Some(client) = slot.as_mut() {
                datagrams += client.frame_io();
            }
        }

        if let Some(server_list) = self.server_list.as_mut() {
            datagrams += server_list.frame_io(self.clock.millis());
        }

        datagrams
    }
}

#[cfg(test)]
pub mod tests_support {
    use super::Clock;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// A settable clock for deterministic timer tests.
    pub struct ManualClock {
        millis: AtomicI64,
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self { millis: AtomicI64::new(0) }
        }

        pub fn set(&self, millis: i64) {
            self.millis.store(millis, Ordering::Relaxed);
        }
    }

    impl Clock for ManualClock {
        fn millis(&self) -> i64 {
            self.millis.load(Ordering::Relaxed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cl_browser::ServerView;
    use std::sync::Arc;
    use wswc_common::console::NullConsole;

    struct SilentListener;

    impl ServerListListener for SilentListener {
        fn on_server_added(&mut self, _server: &ServerView<'_>) {}
        fn on_server_removed(&mut self, _server: &ServerView<'_>) {}
        fn on_server_updated(&mut self, _server: &ServerView<'_>) {}
    }

    fn test_system() -> System {
        System::new(Arc::new(NullConsole))
    }

    #[test]
    fn client_slots_are_bounded() {
        let mut system = test_system();
        let console: ConsoleRef = Arc::new(NullConsole);

        let mut ids = Vec::new();
        for _ in 0..MAX_FAKE_CLIENT_INSTANCES {
            ids.push(system.new_client(console.clone()).unwrap());
        }
        assert!(system.new_client(console.clone()).is_none());

        system.delete_client(ids[1]);
        assert!(system.new_client(console).is_some());
    }

    #[test]
    fn deleted_clients_are_unreachable() {
        let mut system = test_system();
        let id = system.new_client(Arc::new(NullConsole)).unwrap();
        assert!(system.client_mut(id).is_some());

        system.delete_client(id);
        assert!(system.client_mut(id).is_none());
        // A second delete only warns
        system.delete_client(id);
    }

    #[test]
    fn master_server_bookkeeping() {
        let mut system = test_system();
        let first = NetworkAddress::parse("1.2.3.4:27950").unwrap();

        assert!(system.add_master_server(first));
        assert!(!system.add_master_server(first));
        assert!(system.is_master_server(&first));

        for i in 0..MAX_MASTER_SERVERS - 1 {
            let address = NetworkAddress::parse(&format!("1.2.3.{}:27950", 10 + i)).unwrap();
            assert!(system.add_master_server(address));
        }
        let extra = NetworkAddress::parse("9.9.9.9:27950").unwrap();
        assert!(!system.add_master_server(extra));

        assert!(system.remove_master_server(&first));
        assert!(!system.remove_master_server(&first));
        assert!(system.add_master_server(extra));
    }

    #[test]
    fn server_list_lifecycle_is_guarded() {
        let mut system = test_system();
        assert!(system.start_updating_server_list(Box::new(SilentListener)));

        // Idempotent stop
        system.stop_updating_server_list();
        system.stop_updating_server_list();

        assert!(system.start_updating_server_list(Box::new(SilentListener)));
        system.stop_updating_server_list();
    }

    #[test]
    #[should_panic(expected = "already updating the server list")]
    fn double_start_is_fatal() {
        let mut system = test_system();
        assert!(system.start_updating_server_list(Box::new(SilentListener)));
        let _ = system.start_updating_server_list(Box::new(SilentListener));
    }

    #[test]
    fn options_set_before_start_are_deferred() {
        let mut system = test_system();
        system.set_server_list_update_options(true, true);
        assert!(system.start_updating_server_list(Box::new(SilentListener)));
        // Options may also be flipped while active
        system.set_server_list_update_options(false, true);
    }

    #[test]
    fn frame_advances_the_clock() {
        let mut system = test_system();
        system.frame(0);
        let first = system.millis();
        system.sleep(2);
        system.frame(0);
        assert!(system.millis() >= first);
    }
}
