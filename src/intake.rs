//! Turns platform events and the periodic sweep into reconsideration signals.

use std::{io, time::Duration};

use crossbeam_channel::{select, Receiver, RecvError, Sender};
use jod_thread::JoinHandle;
use tokio::runtime::Handle;

use crate::{
    engine::Engine,
    ids::{ChannelId, GuildId},
    store::StateStore,
    template::Placeholders,
};

/// Why a channel is being reconsidered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// Someone joined or left the channel.
    VoiceMembership,

    /// The channel itself changed, possibly renamed by hand.
    ResourceUpdate,

    /// A member's online status changed.
    Presence,

    /// Periodic pass over every lock.
    Sweep,

    /// An explicit user action. Skips the unchanged and cooldown checks.
    Command,
}

impl Trigger {
    pub fn is_forced(self) -> bool {
        matches!(self, Trigger::Command)
    }

    /// Whether the signal may mean the live name no longer matches what the
    /// engine last applied.
    pub fn revalidates(self) -> bool {
        matches!(self, Trigger::ResourceUpdate | Trigger::Sweep)
    }
}

/// "Reconsider this channel." Carries only identifiers; live state is always
/// re-read at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signal {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub trigger: Trigger,
}

/// Events as the platform reports them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeEvent {
    VoiceStateChanged {
        guild_id: GuildId,
        before: Option<ChannelId>,
        after: Option<ChannelId>,
    },
    ChannelUpdated {
        guild_id: GuildId,
        channel_id: ChannelId,
    },
    PresenceChanged,

    /// The gateway session (re)connected. Events may have been missed, so
    /// every lock is swept.
    Connected,
}

/// Maps one event to the signals it implies. Channels without a lock are
/// dropped here.
pub fn normalize(event: &IntakeEvent, store: &dyn StateStore) -> Vec<Signal> {
    let locked =
        |guild_id: GuildId, channel_id: ChannelId| store.lock(guild_id, channel_id).is_some();

    match *event {
        IntakeEvent::VoiceStateChanged {
            guild_id,
            before,
            after,
        } => {
            // Mute, deafen and stream toggles keep the member where they are.
            if before == after {
                return Vec::new();
            }

            [before, after]
                .into_iter()
                .flatten()
                .filter(|channel_id| locked(guild_id, *channel_id))
                .map(|channel_id| Signal {
                    guild_id,
                    channel_id,
                    trigger: Trigger::VoiceMembership,
                })
                .collect()
        }

        IntakeEvent::ChannelUpdated {
            guild_id,
            channel_id,
        } => {
            if !locked(guild_id, channel_id) {
                return Vec::new();
            }
            vec![Signal {
                guild_id,
                channel_id,
                trigger: Trigger::ResourceUpdate,
            }]
        }

        IntakeEvent::PresenceChanged => store
            .all_locks()
            .into_iter()
            .filter(|lock| Placeholders::scan(&lock.template).uses_presence())
            .map(|lock| Signal {
                guild_id: lock.guild_id,
                channel_id: lock.channel_id,
                trigger: Trigger::Presence,
            })
            .collect(),

        IntakeEvent::Connected => store
            .all_locks()
            .into_iter()
            .map(|lock| Signal {
                guild_id: lock.guild_id,
                channel_id: lock.channel_id,
                trigger: Trigger::Sweep,
            })
            .collect(),
    }
}

/// Producer side of the intake. Cheap to clone and safe to use from any
/// thread, including serenity's event handlers.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: Sender<IntakeEvent>,
}

impl EventSender {
    pub fn send(&self, event: IntakeEvent) {
        if self.sender.send(event).is_err() {
            log::debug!("Intake has shut down; dropping event");
        }
    }
}

/// Owns the intake thread.
///
/// The thread waits on platform events, a sweep ticker and a shutdown
/// channel. Signals are handed to the engine, whose work runs on the tokio
/// runtime given at start.
pub struct IntakeProcessor {
    /// Signaled on drop so the thread leaves its loop.
    shutdown_sender: Sender<()>,

    /// Joined on drop.
    #[allow(unused)]
    job_thread: JoinHandle<Result<(), RecvError>>,
}

impl IntakeProcessor {
    pub fn start(
        engine: Engine,
        runtime: Handle,
        sweep_interval: Duration,
    ) -> io::Result<(Self, EventSender)> {
        let (shutdown_sender, shutdown_receiver) = crossbeam_channel::bounded(1);
        let (event_sender, event_receiver) = crossbeam_channel::unbounded();
        let sweep_receiver = crossbeam_channel::tick(sweep_interval);

        let job_thread = jod_thread::Builder::new()
            .name("Intake thread".to_owned())
            .spawn(move || {
                log::trace!("Intake thread started");
                let _runtime = runtime.enter();

                run_loop(&engine, event_receiver, sweep_receiver, shutdown_receiver)
            })?;

        let processor = Self {
            shutdown_sender,
            job_thread,
        };
        let sender = EventSender {
            sender: event_sender,
        };
        Ok((processor, sender))
    }
}

fn run_loop(
    engine: &Engine,
    events: Receiver<IntakeEvent>,
    sweeps: Receiver<std::time::Instant>,
    shutdown: Receiver<()>,
) -> Result<(), RecvError> {
    loop {
        select! {
            recv(events) -> event => {
                let event = event?;
                let signals = normalize(&event, engine.store().as_ref());
                log::trace!("{:?} -> {} signal(s)", event, signals.len());

                for signal in signals {
                    engine.reconsider(signal);
                }
            },
            recv(sweeps) -> _ => {
                engine.sweep();
            },
            recv(shutdown) -> _ => {
                log::trace!("Intake shutdown signal received...");
                return Ok(());
            },
        }
    }
}

impl Drop for IntakeProcessor {
    fn drop(&mut self) {
        let _ = self.shutdown_sender.send(());
    }
}
