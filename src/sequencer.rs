//! Command sequencer
//!
//! Sends one patch in strict order with the inter-phase delays the receiving hardware
//! needs. In USB_DIRECT the channel-1 program changes go out before the relay comes
//! up, so the relay never echoes them back to the CH1 device.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::drivers::CommandSender;
use crate::error::RelayError;
use crate::events::{ActivityDirection, Notification, Notifier, Severity};
use crate::midi::{Channel, Command, Patch};
use crate::mode::{ConnectionMode, DeviceRole, RoleBindings};
use crate::relay::SharedRelay;
use crate::routing;

/// A patch split around the relay start
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SequencePlan {
    pub pre_relay: Vec<Command>,
    pub post_relay: Vec<Command>,
}

/// Partition `commands`, preserving order inside each phase.
///
/// Only USB_DIRECT has a pre-relay phase: its channel-1 program changes.
pub fn plan(commands: &[Command], mode: ConnectionMode) -> SequencePlan {
    let (pre_relay, post_relay) = if mode == ConnectionMode::UsbDirect {
        commands
            .iter()
            .cloned()
            .partition(|c| c.is_program_change_on(Channel::One))
    } else {
        (Vec::new(), commands.to_vec())
    };

    SequencePlan {
        pre_relay,
        post_relay,
    }
}

/// Copy of the controller state a sequencer run needs.
#[derive(Debug, Clone)]
pub struct SequenceContext {
    pub mode: ConnectionMode,
    pub ch1_override: bool,
    pub ch1_present: bool,
    pub bindings: RoleBindings,
}

impl SequenceContext {
    pub fn target(&self, command: &Command) -> &str {
        let role = routing::resolve(
            self.mode,
            command.channel(),
            self.ch1_override,
            self.ch1_present,
        );
        self.bindings.device(role)
    }
}

/// Wake-up command repeated before every patch
#[derive(Debug, Clone)]
pub struct Preamble {
    pub command: Command,
    pub repeat: u32,
    pub gap: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct SequencerTiming {
    pub pre_relay_pause: Duration,
    pub relay_settle: Duration,
    pub pacing: Duration,
}

impl Default for SequencerTiming {
    fn default() -> Self {
        Self {
            pre_relay_pause: Duration::from_millis(50),
            relay_settle: Duration::from_secs(1),
            pacing: Duration::from_millis(250),
        }
    }
}

#[derive(Clone)]
pub struct Sequencer {
    sender: Arc<dyn CommandSender>,
    relay: SharedRelay,
    notifier: Notifier,
    timing: SequencerTiming,
    preamble: Option<Preamble>,
    halt: watch::Receiver<bool>,
}

impl Sequencer {
    pub fn new(
        sender: Arc<dyn CommandSender>,
        relay: SharedRelay,
        notifier: Notifier,
        timing: SequencerTiming,
    ) -> Self {
        Self {
            sender,
            relay,
            notifier,
            timing,
            preamble: None,
            halt: watch::channel(false).1,
        }
    }

    /// Abandon runs in progress once `halt` reads true.
    pub fn with_halt(mut self, halt: watch::Receiver<bool>) -> Self {
        self.halt = halt;
        self
    }

    fn halted(&self, label: &str) -> bool {
        let halted = *self.halt.borrow();
        if halted {
            info!(label, "Restart pending, abandoning patch");
        }
        halted
    }

    pub fn with_preamble(mut self, preamble: Option<Preamble>) -> Self {
        self.preamble = preamble;
        self
    }

    /// Timing and preamble from the config file
    pub fn configure(mut self, config: &AppConfig) -> crate::error::Result<Self> {
        self.timing = SequencerTiming {
            pre_relay_pause: config.timing.pre_relay_pause(),
            relay_settle: config.timing.relay_settle(),
            pacing: config.timing.pacing(),
        };
        self.preamble = match &config.sequencer.preamble {
            Some(p) => Some(Preamble {
                command: Command::try_from(&p.command)?,
                repeat: p.repeat,
                gap: Duration::from_millis(p.gap_ms),
            }),
            None => None,
        };
        Ok(self)
    }

    /// Run `patch` on its own task. `on_complete` fires when the task ends, however it
    /// ends.
    pub fn spawn(
        &self,
        patch: Patch,
        ctx: SequenceContext,
        on_complete: impl FnOnce() + Send + 'static,
    ) -> JoinHandle<()> {
        let sequencer = self.clone();
        let guard = CompletionGuard {
            label: patch.label().to_string(),
            notifier: self.notifier.clone(),
            on_complete: Some(Box::new(on_complete)),
        };

        tokio::spawn(async move {
            let _guard = guard;
            sequencer.run(patch, ctx).await;
        })
    }

    /// Send every command of `patch`. Individual failures are reported and skipped.
    ///
    /// The halt signal is checked before every send and before the relay start, so a
    /// run overtaken by a mode change stops at the next step.
    pub async fn run(&self, patch: Patch, ctx: SequenceContext) {
        let label = patch.label();
        info!(label, mode = %ctx.mode, "Sending patch");
        self.notifier.notify(Notification::PatchStarted {
            label: label.to_string(),
        });
        if patch.is_test() {
            self.notifier.toast("TESTING", Severity::Warning);
        }

        self.relay.lock().await.stop().await;

        if let Some(preamble) = &self.preamble {
            for _ in 0..preamble.repeat {
                if self.halted(label) {
                    return;
                }
                self.emit(&preamble.command, &ctx).await;
                sleep(preamble.gap).await;
            }
        }

        let plan = plan(&patch.commands_for(ctx.mode), ctx.mode);

        for command in &plan.pre_relay {
            if self.halted(label) {
                return;
            }
            self.emit(command, &ctx).await;
        }
        if !plan.pre_relay.is_empty() {
            sleep(self.timing.pre_relay_pause).await;
        }

        if self.halted(label) {
            return;
        }
        if ctx.mode.needs_relay() {
            let from = ctx.bindings.device(DeviceRole::Channel2);
            let to = ctx.bindings.device(DeviceRole::Channel1);
            match self.relay.lock().await.start(from, to).await {
                Ok(()) => {},
                Err(RelayError::Halted) => return,
                Err(e) => {
                    warn!("Relay start failed: {}", e);
                    self.notifier.toast(format!("Relay failed: {}", e), Severity::Error);
                },
            }
        }

        sleep(self.timing.relay_settle).await;

        for (i, command) in plan.post_relay.iter().enumerate() {
            if i > 0 {
                sleep(self.timing.pacing).await;
            }
            if self.halted(label) {
                return;
            }
            self.emit(command, &ctx).await;
        }
    }

    async fn emit(&self, command: &Command, ctx: &SequenceContext) {
        let device = ctx.target(command);
        debug!("-> {}: {}", device, command);

        match self.sender.send(device, command).await {
            Ok(()) => self.notifier.activity(ActivityDirection::Sending),
            Err(e) => {
                warn!("Send failed: {}", e);
                self.notifier
                    .toast(format!("MIDI send failed: {}", e), Severity::Error);
            },
        }
    }
}

/// Reports completion when dropped, including on panic or abort.
struct CompletionGuard {
    label: String,
    notifier: Notifier,
    on_complete: Option<Box<dyn FnOnce() + Send>>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.notifier.notify(Notification::PatchCompleted {
            label: std::mem::take(&mut self.label),
        });
        if let Some(on_complete) = self.on_complete.take() {
            on_complete();
        }
    }
}
