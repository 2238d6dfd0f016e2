//! The watcher: the protocol state machine that ties the packet codec,
//! reassembly pool, serial transport and command worker together.
//!
//! One dedicated thread runs [`Watcher::run`]; each dispatched command gets
//! its own short-lived thread rather than being scheduled onto an async
//! runtime.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::context::AgentContext;
use crate::error::AgentError;
use crate::packet::{self, CommandType, Packet, ResponseType};
use crate::reassembly::ReassemblyPool;
use crate::registry::Module;
use crate::transport::SerialTransport;
use crate::worker::{self, LaunchOutcome, LaunchResult};

/// How many bytes the ingest phase tries to read from the transport per
/// iteration.
const INGRESS_READ_MAX: usize = 4096;
/// How long the ingest phase's transport read may block.
const INGRESS_READ_TIMEOUT: Duration = Duration::from_millis(50);
/// The main loop's inter-iteration sleep.
const LOOP_SLEEP: Duration = Duration::from_millis(10);

/// The literal prefix that marks a command as a software update.
const UPDATE_SOFTWARE_PREFIX: &str = "updateSoftware";

/// A reassembled logical command, ready for dispatch to a worker.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    guid: String,
    command_text: String,
    module: Module,
    is_update_software: bool,
}

impl CommandRequest {
    /// Builds a request from a reassembled command body, resolving the
    /// module alias (the body's first whitespace-separated token) against
    /// `context`'s root directory.
    fn new(guid: String, body: &[u8], context: &AgentContext) -> Self {
        let command_text = extract_command_string(body);
        let alias = command_text.split_whitespace().next().unwrap_or("");
        let module = Module::lookup(alias, context.root_dir());
        let is_update_software = command_text.starts_with(UPDATE_SOFTWARE_PREFIX);

        CommandRequest {
            guid,
            command_text,
            module,
            is_update_software,
        }
    }

    /// The logical command's GUID.
    pub fn guid(&self) -> &str {
        &self.guid
    }

    /// The unwrapped `commandString` text (module alias plus arguments).
    pub fn command_text(&self) -> &str {
        &self.command_text
    }

    /// The module this request resolved to (may be invalid).
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// `true` if `command_text` starts with the literal token
    /// `updateSoftware`.
    pub fn is_update_software(&self) -> bool {
        self.is_update_software
    }
}

/// Pulls the text out of a `<commandString>...</commandString>` wrapper
/// and reverses the three-entity escaping [`packet::escape`] applies.
///
/// This does not parse XML in any general sense - it trusts the wrapping
/// tags exactly as the original agent does.
fn extract_command_string(body: &[u8]) -> String {
    const START: &str = "<commandString>";
    const END: &str = "</commandString>";

    let text = String::from_utf8_lossy(body);
    match (text.find(START), text.find(END)) {
        (Some(start), Some(end)) if end > start => {
            unescape(&text[start + START.len()..end])
        }
        _ => String::new(),
    }
}

/// Reverses [`packet::escape`]: `&lt;`/`&gt;` must be undone before
/// `&amp;`, since `escape` would otherwise have produced `&amp;lt;` for a
/// literal `&lt;` in the source text.
fn unescape(s: &str) -> String {
    s.replace("&lt;", "<").replace("&gt;", ">").replace("&amp;", "&")
}

/// The watcher's handle on one in-flight worker thread.
struct WorkerHandle {
    thread: thread::JoinHandle<()>,
    blocking: bool,
}

/// The protocol state machine: owns the transport, the reassembly pool,
/// the pending/in-flight command state, and the shared egress queue.
#[allow(missing_debug_implementations)]
pub struct Watcher<T: SerialTransport> {
    port: T,
    context: AgentContext,
    ingress_buffer: Vec<u8>,
    pool: ReassemblyPool,
    workers: HashMap<String, WorkerHandle>,
    egress: Arc<Mutex<VecDeque<Packet>>>,
    pending_commands: VecDeque<CommandRequest>,
    process_serially: bool,
}

impl<T: SerialTransport> Watcher<T> {
    /// Builds a watcher over `port`, using `context` to resolve module
    /// paths and timeouts.
    pub fn new(port: T, context: AgentContext) -> Self {
        Watcher {
            port,
            context,
            ingress_buffer: Vec::new(),
            pool: ReassemblyPool::new(),
            workers: HashMap::new(),
            egress: Arc::new(Mutex::new(VecDeque::new())),
            pending_commands: VecDeque::new(),
            process_serially: false,
        }
    }

    /// Runs the main loop until `stop_flag` is observed set, then joins
    /// every in-flight worker before returning.
    pub fn run(&mut self, stop_flag: &AtomicBool) {
        info!("watcher starting");
        while !stop_flag.load(Ordering::Relaxed) {
            self.tick();
            thread::sleep(LOOP_SLEEP);
        }
        info!("watcher stopping, joining workers");
        self.join_all_workers();
    }

    /// Runs one iteration of the main loop: drain egress, ingest, dispatch,
    /// reap. Exposed so tests can drive the FSM deterministically.
    pub fn tick(&mut self) {
        self.drain_egress();
        self.ingest();
        self.dispatch();
        self.reap_workers();
    }

    fn send_later(&self, p: Packet) {
        self.egress.lock().unwrap().push_back(p);
    }

    /// Phase 1: write every queued outbound packet to the transport, in
    /// FIFO order, under the egress mutex.
    fn drain_egress(&mut self) {
        let queued: Vec<Packet> = {
            let mut q = self.egress.lock().unwrap();
            q.drain(..).collect()
        };
        for p in queued {
            if let Err(e) = self.port.write(&p.encode()) {
                let err = AgentError::Transport(e);
                warn!(%err, "failed writing packet to transport");
            }
        }
    }

    /// Phase 2: read available bytes, decode as many full packets as are
    /// buffered, and react to each in turn.
    fn ingest(&mut self) {
        match self.port.read(INGRESS_READ_MAX, INGRESS_READ_TIMEOUT) {
            Ok(bytes) if !bytes.is_empty() => self.ingress_buffer.extend_from_slice(&bytes),
            Ok(_) => {}
            Err(e) => {
                let err = AgentError::Transport(e);
                warn!(%err, "transport read failed");
                return;
            }
        }

        while Packet::has_full_packet(&self.ingress_buffer) {
            match Packet::decode(&self.ingress_buffer) {
                Ok((packet, consumed)) => {
                    self.ingress_buffer.drain(..consumed);
                    self.react(packet);
                }
                Err(e) => {
                    let err = AgentError::from(e);
                    warn!(%err, "discarding unparseable buffer contents");
                    self.ingress_buffer.clear();
                    break;
                }
            }
        }
    }

    /// Phase 2b: react to one decoded packet according to its type.
    fn react(&mut self, packet: Packet) {
        match packet.command_type() {
            CommandType::Command => self.react_command(packet),
            CommandType::Ack | CommandType::Received | CommandType::Response => {
                // No-op for the core agent: these are either purely
                // informational to the host, or not expected inbound.
            }
            CommandType::AuthResponse => {
                self.retire_worker(packet.guid());
            }
        }
    }

    fn react_command(&mut self, packet: Packet) {
        let guid = packet.guid().to_owned();
        let number = packet.packet_number();
        let count = packet.packet_count();

        if self.workers.contains_key(&guid) {
            warn!(%guid, "dropping fragment for a command already in flight");
            return;
        }

        self.pool.add(packet);

        if self.pool.is_complete(&guid) {
            let body = self.pool.assemble(&guid).expect("pool reports complete");
            self.pool.remove(&guid);

            let request = CommandRequest::new(guid.clone(), &body, &self.context);
            self.send_later(packet::ack(guid));
            self.pending_commands.push_back(request);
        } else {
            self.send_later(packet::received(guid, number, count, false));
        }
    }

    /// Phase 3: dispatch at most one pending command, provided no blocking
    /// worker is in flight.
    fn dispatch(&mut self) {
        if self.process_serially {
            return;
        }
        let Some(request) = self.pending_commands.pop_front() else {
            return;
        };

        if !request.module.is_valid() {
            warn!(guid = %request.guid, alias = %request.module.alias(), "unknown module alias");
            let result = LaunchResult {
                outcome: LaunchOutcome::Failure,
                output: format!("unknown module alias '{}'", request.module.alias()),
                exit_code: 1,
            };
            let response = response_packet(&request, &result);
            self.send_later(packet::auth_response(request.guid.clone()));
            self.send_later(response);
            return;
        }

        self.process_serially = request.module.is_blocking();
        let guid = request.guid.clone();
        let blocking = request.module.is_blocking();
        let egress = Arc::clone(&self.egress);
        let timeout = self.context.command_timeout();

        debug!(%guid, module = %request.module, "dispatching command");
        let thread = thread::spawn(move || run_worker(request, timeout, egress));
        self.workers.insert(guid, WorkerHandle { thread, blocking });
    }

    /// Phase 4: reap finished workers, clearing `process_serially` if the
    /// worker that just finished was the one holding it.
    fn reap_workers(&mut self) {
        let done: Vec<String> = self
            .workers
            .iter()
            .filter(|(_, h)| h.thread.is_finished())
            .map(|(guid, _)| guid.clone())
            .collect();

        for guid in done {
            self.retire_worker(&guid);
        }
    }

    /// Removes `guid`'s worker handle, joining its thread and clearing
    /// `process_serially` if it was the blocking worker holding it.
    ///
    /// Shared by [`Watcher::reap_workers`] (the worker finished first) and
    /// the `AuthResponse` reaction (the host acknowledged completion first)
    /// so that either path retires the handle through the same join and
    /// `process_serially` reset - a worker must never be dropped without
    /// both happening.
    fn retire_worker(&mut self, guid: &str) {
        if let Some(handle) = self.workers.remove(guid) {
            if let Err(panic) = handle.thread.join() {
                warn!(%guid, ?panic, "worker thread panicked");
            }
            if handle.blocking {
                self.process_serially = false;
            }
        }
    }

    fn join_all_workers(&mut self) {
        for (guid, handle) in self.workers.drain() {
            if let Err(panic) = handle.thread.join() {
                warn!(%guid, ?panic, "worker thread panicked during shutdown");
            }
        }
    }
}

/// Runs one command's worker to completion and enqueues its completion
/// packets. Spawned as its own thread by [`Watcher::dispatch`]; may only
/// talk back to the watcher through `egress`.
fn run_worker(request: CommandRequest, timeout: Duration, egress: Arc<Mutex<VecDeque<Packet>>>) {
    debug!(guid = %request.guid, module = %request.module, "running command");

    // updateSoftware commands are not expected to capture output: the
    // original passes `!isUpdateSoftware()` as `capture_output`.
    let capture_output = !request.is_update_software;
    let result = worker::launch(
        request.module.full_path(),
        &request.command_text,
        capture_output,
        timeout,
    );

    let response = response_packet(&request, &result);

    let mut q = egress.lock().unwrap();
    q.push_back(packet::auth_response(request.guid.clone()));
    q.push_back(response);
}

/// Maps a [`LaunchResult`] onto the outgoing `Response` packet.
fn response_packet(request: &CommandRequest, result: &LaunchResult) -> Packet {
    let (response_type, output, message, exit_code) = match result.outcome {
        LaunchOutcome::Timeout => (ResponseType::TimeOut, String::new(), String::new(), result.exit_code),
        LaunchOutcome::Success if result.exit_code == 0 => {
            (ResponseType::Success, result.output.clone(), String::new(), 0)
        }
        _ => (ResponseType::Error, String::new(), result.output.clone(), result.exit_code),
    };

    packet::response(
        request.guid.clone(),
        response_type,
        &request.command_text,
        &output,
        exit_code,
        &message,
    )
}
