//! # Command Layer
//!
//! Request/response commands on top of a dedicated [`Bus`]. All command names
//! share one bus: the command name is the request topic and
//! `"<command name>:response"` is the response topic.
//!
//! ## Correlation
//!
//! Every outgoing invocation draws the next value of a sequence counter shared
//! by all command names and travels wrapped in an [`Envelope`] carrying that
//! value. Actors answer on the response topic with the sequence id of the
//! request they served. A caller waiting for a response installs a one-time
//! handler bound to its own sequence id: every waiter sees every response on
//! the shared topic, only the one whose id matches reacts, and it unsubscribes
//! itself when it does.
//!
//! ```text
//! run_command("login", p)           add_command("login", actor)
//!   seq = next()                          │
//!   on("login:response", seq) ──┐         │
//!   emit("login", {seq, p}) ────┼────────▶│ spawn actor(p)
//!                               │         │
//!   resolves ◀── {seq, r} ──────┘◀────────┘ emit("login:response", {seq, r})
//! ```
//!
//! ## Unanswered commands
//!
//! A command nobody handles never gets a response. [`Commands::run_command`]
//! then waits forever and its response subscription stays registered, unless a
//! timeout is configured or [`Commands::run_command_with_timeout`] is used.

use std::{
    future::Future,
    ops::Deref,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::{runtime::Handle, sync::oneshot};
use tracing::{debug, instrument, trace, warn, Instrument, Span};

use crate::{
    config::CommandConfig,
    registry::{Registry, RegistryError},
};

use super::bus::{Bus, SubscriberId};

/// Registry identifier of the bus shared by all commands.
pub const COMMAND_BUS_NAME: &str = "_COMMAND_BUS_NAME";
/// Registry identifier of the shared command sequence counter.
pub const COMMAND_SEQUENCE_NAME: &str = "_COMMAND_SEQUENCE";

pub const RESPONSE_TOPIC_SUFFIX: &str = ":response";

/// Topic on which responses to `command_name` are published.
pub fn response_topic(command_name: &str) -> String {
    format!("{command_name}{RESPONSE_TOPIC_SUFFIX}")
}

/// A command payload together with the sequence id correlating it to its
/// response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<P> {
    pub command_sequence_id: u64,
    pub payload: P,
}

impl<P> Envelope<P> {
    pub fn new(command_sequence_id: u64, payload: P) -> Self {
        Self {
            command_sequence_id,
            payload,
        }
    }

    pub fn into_payload(self) -> P {
        self.payload
    }
}

impl<P> Deref for Envelope<P> {
    type Target = P;

    fn deref(&self) -> &Self::Target {
        &self.payload
    }
}

pub type CommandBus = Bus<String, Envelope<Value>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandlerType {
    /// Unsubscribes after reacting once.
    OneTime,
    #[default]
    Continuous,
}

/// Monotonic source of command sequence ids. The first id issued is 1.
#[derive(Debug, Default)]
pub struct SequenceCounter(AtomicU64);

impl SequenceCounter {
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Last id issued, 0 before the first invocation.
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handle on the command layer of one registry.
///
/// Cheap to clone; every handle created from the same registry shares the
/// command bus and the sequence counter.
#[derive(Clone)]
pub struct Commands {
    bus: Arc<CommandBus>,
    sequence: Arc<SequenceCounter>,
    default_timeout: Option<Duration>,
}

struct Dispatched {
    sequence_id: u64,
    subscriber_id: SubscriberId,
    receiver: oneshot::Receiver<Envelope<Value>>,
}

impl Commands {
    pub fn new(registry: &Registry) -> CommandResult<Self> {
        Ok(Self {
            bus: CommandBus::shared(registry, COMMAND_BUS_NAME)?,
            sequence: registry.get_or_insert_with(COMMAND_SEQUENCE_NAME, SequenceCounter::default)?,
            default_timeout: None,
        })
    }

    /// Command layer of the process-wide registry.
    pub fn global() -> CommandResult<Self> {
        Self::new(&Registry::global())
    }

    pub fn with_config(registry: &Registry, config: &CommandConfig) -> CommandResult<Self> {
        let mut commands = Self::new(registry)?;
        commands.default_timeout = config.timeout;
        Ok(commands)
    }

    pub fn bus(&self) -> &Arc<CommandBus> {
        &self.bus
    }

    pub fn current_sequence_id(&self) -> u64 {
        self.sequence.current()
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    /// Registers `actor` as the responder for `command_name`.
    ///
    /// Each request is decoded into `P`, the actor runs as a task on the tokio
    /// runtime current at registration, and its result is published on the
    /// response topic under the request's sequence id. Requests whose payload
    /// does not decode into `P` are skipped.
    ///
    /// Several actors may be registered for one name; all of them run and all
    /// of them answer, the first answer for a sequence id wins.
    ///
    /// # Errors
    ///
    /// `CommandError::NoRuntime` when called outside a tokio runtime.
    pub fn add_command<P, R, F, Fut>(
        &self,
        command_name: &str,
        actor: F,
    ) -> CommandResult<SubscriberId>
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| CommandError::NoRuntime {
            command: command_name.to_string(),
        })?;
        let bus = Arc::downgrade(&self.bus);
        let command = command_name.to_string();
        let topic = response_topic(command_name);

        let subscriber_id = self.bus.on(command_name, move |request: &Envelope<Value>| {
            let sequence_id = request.command_sequence_id;
            let payload = match serde_json::from_value::<P>(request.payload.clone()) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(command = %command, sequence_id, error = %e, "Skipping undecodable command payload");
                    return;
                }
            };
            let response = actor(payload);
            let bus = bus.clone();
            let command = command.clone();
            let topic = topic.clone();
            runtime.spawn(async move {
                let response = match serde_json::to_value(response.await) {
                    Ok(response) => response,
                    Err(e) => {
                        warn!(command = %command, sequence_id, error = %e, "Dropping unencodable command response");
                        return;
                    }
                };
                if let Some(bus) = bus.upgrade() {
                    trace!(command = %command, sequence_id, "Responding");
                    bus.emit(topic.as_str(), &Envelope::new(sequence_id, response));
                }
            });
        });
        debug!(command = command_name, subscriber_id, "Command actor added");
        Ok(subscriber_id)
    }

    /// Registers a raw envelope handler.
    ///
    /// With `bound_sequence_id` the handler listens on the response topic and
    /// reacts only to responses carrying that id. Without it, the handler
    /// listens on the command topic itself and reacts to every request.
    /// A [`HandlerType::OneTime`] handler unsubscribes itself the first time it
    /// reacts and never reacts again.
    pub fn add_command_handler<F>(
        &self,
        command_name: &str,
        handler: F,
        handler_type: HandlerType,
        bound_sequence_id: Option<u64>,
    ) -> SubscriberId
    where
        F: Fn(&Envelope<Value>) + Send + Sync + 'static,
    {
        let topic = match bound_sequence_id {
            Some(_) => response_topic(command_name),
            None => command_name.to_string(),
        };
        let bus = Arc::downgrade(&self.bus);
        let fired = AtomicBool::new(false);

        self.bus.on_with_id(topic, move |subscriber_id| {
            move |envelope: &Envelope<Value>| {
                if bound_sequence_id.is_some_and(|bound| bound != envelope.command_sequence_id) {
                    return;
                }
                if handler_type == HandlerType::OneTime {
                    if fired.swap(true, Ordering::SeqCst) {
                        return;
                    }
                    if let Some(bus) = bus.upgrade() {
                        bus.off(subscriber_id);
                    }
                }
                handler(envelope);
            }
        })
    }

    /// Issues `command_name` and returns a future resolving to the correlated
    /// response.
    ///
    /// The sequence id is drawn and the request emitted by this call, before
    /// the future is first polled. Dropping the future stops the wait, not the
    /// command.
    ///
    /// Waits indefinitely unless a default timeout was configured; see
    /// [`Commands::run_command_with_timeout`].
    #[instrument(skip(self, payload))]
    pub fn run_command<P, R>(
        &self,
        command_name: &str,
        payload: P,
    ) -> impl Future<Output = CommandResult<Envelope<R>>> + Send
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let dispatched = self.dispatch(command_name, payload);
        self.wait_for_response(command_name, dispatched, self.default_timeout)
    }

    /// Like [`Commands::run_command`], giving up after `timeout`. A timed out
    /// invocation removes its response subscription.
    #[instrument(skip(self, payload))]
    pub fn run_command_with_timeout<P, R>(
        &self,
        command_name: &str,
        payload: P,
        timeout: Duration,
    ) -> impl Future<Output = CommandResult<Envelope<R>>> + Send
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let dispatched = self.dispatch(command_name, payload);
        self.wait_for_response(command_name, dispatched, Some(timeout))
    }

    /// Issues `command_name` without waiting for anything. Returns the
    /// sequence id of the invocation.
    pub fn command<P>(&self, command_name: &str, payload: P) -> CommandResult<u64>
    where
        P: Serialize,
    {
        let payload = encode(command_name, payload)?;
        let sequence_id = self.sequence.next();
        self.emit(command_name, sequence_id, payload);
        Ok(sequence_id)
    }

    /// Issues `command_name` and hands the correlated response to
    /// `on_response` once it arrives. Returns right after the request is
    /// emitted, without waiting for the response or the callback.
    ///
    /// A response that does not decode into `R` is logged and dropped.
    pub fn command_with_response<P, R, F>(
        &self,
        command_name: &str,
        payload: P,
        on_response: F,
    ) -> CommandResult<u64>
    where
        P: Serialize,
        R: DeserializeOwned,
        F: FnOnce(Envelope<R>) + Send + 'static,
    {
        let payload = encode(command_name, payload)?;
        let sequence_id = self.sequence.next();
        let command = command_name.to_string();
        let on_response = Mutex::new(Some(on_response));
        self.add_command_handler(
            command_name,
            move |response| {
                let Some(on_response) = on_response.lock().take() else {
                    return;
                };
                match decode(&command, response.clone()) {
                    Ok(response) => on_response(response),
                    Err(e) => warn!(command = %command, sequence_id, error = %e, "Dropping command response"),
                }
            },
            HandlerType::OneTime,
            Some(sequence_id),
        );
        self.emit(command_name, sequence_id, payload);
        Ok(sequence_id)
    }

    fn wait_for_response<R>(
        &self,
        command_name: &str,
        dispatched: CommandResult<Dispatched>,
        timeout: Option<Duration>,
    ) -> impl Future<Output = CommandResult<Envelope<R>>> + Send
    where
        R: DeserializeOwned,
    {
        let bus = self.bus.clone();
        let command = command_name.to_string();
        async move {
            let Dispatched {
                sequence_id,
                subscriber_id,
                receiver,
            } = dispatched?;

            let received = match timeout {
                Some(timeout) => match tokio::time::timeout(timeout, receiver).await {
                    Ok(received) => received,
                    Err(_) => {
                        bus.off(subscriber_id);
                        debug!(command = %command, sequence_id, "Command timed out");
                        return Err(CommandError::Timeout {
                            command,
                            sequence_id,
                        });
                    }
                },
                None => receiver.await,
            };
            let response = received.map_err(|_| CommandError::ChannelClosed {
                command: command.clone(),
                sequence_id,
            })?;
            decode(&command, response)
        }
        .instrument(Span::current())
    }

    fn dispatch<P>(&self, command_name: &str, payload: P) -> CommandResult<Dispatched>
    where
        P: Serialize,
    {
        let payload = encode(command_name, payload)?;
        let sequence_id = self.sequence.next();
        let (sender, receiver) = oneshot::channel();
        let sender = Mutex::new(Some(sender));
        let subscriber_id = self.add_command_handler(
            command_name,
            move |response| {
                if let Some(sender) = sender.lock().take() {
                    // The waiter may be gone already.
                    let _ = sender.send(response.clone());
                }
            },
            HandlerType::OneTime,
            Some(sequence_id),
        );
        self.emit(command_name, sequence_id, payload);
        Ok(Dispatched {
            sequence_id,
            subscriber_id,
            receiver,
        })
    }

    fn emit(&self, command_name: &str, sequence_id: u64, payload: Value) {
        let actors = self
            .bus
            .emit(command_name, &Envelope::new(sequence_id, payload));
        trace!(command = command_name, sequence_id, actors, "Command issued");
    }
}

impl std::fmt::Debug for Commands {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Commands")
            .field("bus", &self.bus)
            .field("sequence", &self.sequence.current())
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

fn encode<P: Serialize>(command_name: &str, payload: P) -> CommandResult<Value> {
    serde_json::to_value(payload).map_err(|source| CommandError::Payload {
        command: command_name.to_string(),
        source,
    })
}

fn decode<R: DeserializeOwned>(
    command_name: &str,
    response: Envelope<Value>,
) -> CommandResult<Envelope<R>> {
    let Envelope {
        command_sequence_id,
        payload,
    } = response;
    let payload = serde_json::from_value(payload).map_err(|source| CommandError::Payload {
        command: command_name.to_string(),
        source,
    })?;
    Ok(Envelope::new(command_sequence_id, payload))
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Command registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Command {command} must be registered from within a tokio runtime")]
    NoRuntime { command: String },

    #[error("Command {command} payload conversion failed: {source}")]
    Payload {
        command: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Command {command} response channel closed: sequence {sequence_id}")]
    ChannelClosed { command: String, sequence_id: u64 },

    #[error("Command {command} timed out: sequence {sequence_id}")]
    Timeout { command: String, sequence_id: u64 },
}

pub type CommandResult<T> = Result<T, CommandError>;
