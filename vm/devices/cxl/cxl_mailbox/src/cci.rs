// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The command dispatcher shared by every kind of CCI.

use crate::background::BackgroundJob;
use crate::background::BackgroundState;
use crate::commands::firmware::FirmwareState;
use crate::device::Type3State;
use crate::platform::BackgroundTimer;
use crate::platform::CciPlatform;
use crate::platform::InterruptMode;
use crate::platform::MailboxInterrupt;
use crate::platform::VirtualClock;
use crate::switch::SwitchState;
use crate::timestamp::Timestamp;
use cxl_resources::ComponentIdentity;
use cxl_spec::CommandEffects;
use cxl_spec::ComponentType;
use cxl_spec::MAILBOX_MAX_PAYLOAD_SIZE;
use cxl_spec::Opcode;
use cxl_spec::ReturnCode;
use cxl_spec::logs::CelEntry;
use parking_lot::Mutex;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use tracing::instrument;
use zerocopy::Immutable;
use zerocopy::IntoBytes;

/// Commands refused while the media is disabled, e.g. during a sanitize.
const MEDIA_GATED_COMMANDS: &[Opcode] = &[
    Opcode::GET_PARTITION_INFO,
    Opcode::GET_LSA,
    Opcode::SET_LSA,
    Opcode::GET_LOG,
    Opcode::GET_POISON_LIST,
    Opcode::INJECT_POISON,
    Opcode::CLEAR_POISON,
    Opcode::SANITIZE,
    Opcode::TRANSFER_FW,
    Opcode::ACTIVATE_FW,
];

pub(crate) type Handler = fn(&Cci, &[u8]) -> Result<Completion, ReturnCode>;

/// The input payload length a command accepts.
#[derive(Debug, Copy, Clone)]
pub(crate) enum PayloadLength {
    Exact(usize),
    Variable,
}

/// One entry of a command set.
#[derive(Copy, Clone)]
pub(crate) struct CommandDefinition {
    pub opcode: Opcode,
    pub name: &'static str,
    pub handler: Handler,
    pub input: PayloadLength,
    pub effects: CommandEffects,
}

/// What a handler produced.
pub(crate) enum Completion {
    /// The command finished with this output payload.
    Done(Vec<u8>),
    /// The command continues in the background.
    Background {
        job: BackgroundJob,
        runtime_ms: u64,
    },
}

impl Completion {
    pub fn empty() -> Self {
        Self::Done(Vec::new())
    }

    pub fn with<T: IntoBytes + Immutable>(value: &T) -> Self {
        Self::Done(value.as_bytes().to_vec())
    }
}

/// The outcome of a mailbox command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CciResponse {
    /// Result code reported to the caller.
    pub return_code: ReturnCode,
    /// Output payload. Empty unless the command succeeded.
    pub payload: Vec<u8>,
    /// The command continues as a background operation.
    pub background_started: bool,
}

impl CciResponse {
    fn error(return_code: ReturnCode) -> Self {
        Self {
            return_code,
            payload: Vec::new(),
            background_started: false,
        }
    }
}

/// The component a CCI manages.
pub(crate) enum CciTarget {
    Type3(Arc<Type3State>),
    Switch(Arc<SwitchState>),
}

#[derive(Default)]
struct CommandTable {
    commands: HashMap<Opcode, CommandDefinition>,
    cel: Vec<CelEntry>,
}

impl CommandTable {
    fn rebuild_cel(&mut self) {
        self.cel = self
            .commands
            .values()
            .map(|c| CelEntry {
                opcode: c.opcode,
                effects: c.effects,
            })
            .collect();
        self.cel.sort_by_key(|e| e.opcode);
    }
}

/// A Component Command Interface: one mailbox endpoint with its own command
/// table, background operation, and firmware update state.
pub struct Cci {
    name: String,
    target: CciTarget,
    logical_devices: Vec<Arc<Cci>>,
    commands: RwLock<CommandTable>,
    payload_max: AtomicUsize,
    pub(crate) background: Mutex<BackgroundState>,
    pub(crate) timer: Box<dyn BackgroundTimer>,
    pub(crate) firmware: Mutex<FirmwareState>,
    pub(crate) clock: Arc<dyn VirtualClock>,
    interrupt: Arc<dyn MailboxInterrupt>,
    mailbox_vector: u16,
    pub(crate) this: Weak<Cci>,
}

impl Cci {
    /// Creates a CCI with an empty command table. `logical_devices` are the
    /// tunnel targets of an FM-owned LD CCI.
    pub(crate) fn new(
        name: impl Into<String>,
        target: CciTarget,
        logical_devices: Vec<Arc<Cci>>,
        platform: &CciPlatform,
        mailbox_vector: u16,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            name: name.into(),
            target,
            logical_devices,
            commands: RwLock::new(CommandTable::default()),
            payload_max: AtomicUsize::new(MAILBOX_MAX_PAYLOAD_SIZE),
            background: Mutex::new(BackgroundState::new()),
            timer: platform.timers.new_timer(),
            firmware: Mutex::new(FirmwareState::new()),
            clock: platform.clock.clone(),
            interrupt: platform.interrupt.clone(),
            mailbox_vector,
            this: this.clone(),
        })
    }

    /// Layers a command set onto this CCI and regenerates the Command
    /// Effects Log.
    pub(crate) fn register(&self, commands: &[CommandDefinition]) {
        let mut table = self.commands.write();
        for command in commands {
            table.commands.insert(command.opcode, *command);
        }
        table.rebuild_cel();
    }

    /// The name used to identify this CCI in traces.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current maximum payload size.
    pub fn payload_max(&self) -> usize {
        self.payload_max.load(Ordering::Relaxed)
    }

    pub(crate) fn set_payload_max(&self, size: usize) {
        self.payload_max.store(size, Ordering::Relaxed);
    }

    /// The Command Effects Log: every supported opcode with its effects,
    /// in opcode order.
    pub fn command_effects_log(&self) -> Vec<CelEntry> {
        self.commands.read().cel.clone()
    }

    pub(crate) fn effects(&self, opcode: Opcode) -> Option<CommandEffects> {
        self.commands
            .read()
            .commands
            .get(&opcode)
            .map(|c| c.effects)
    }

    /// Runs one mailbox command to completion, or until it hands off to the
    /// background operation.
    #[instrument(level = "debug", skip(self, input), fields(cci = %self.name, opcode = ?Opcode::new(command_set, command)))]
    pub fn process(&self, command_set: u8, command: u8, input: &[u8]) -> CciResponse {
        let opcode = Opcode::new(command_set, command);
        let Some(definition) = self.commands.read().commands.get(&opcode).copied() else {
            tracing::debug!("unsupported command");
            return CciResponse::error(ReturnCode::UNSUPPORTED);
        };

        if let PayloadLength::Exact(len) = definition.input {
            if input.len() != len {
                tracing::debug!(
                    command = definition.name,
                    expected = len,
                    actual = input.len(),
                    "invalid payload length"
                );
                return CciResponse::error(ReturnCode::INVALID_PAYLOAD_LENGTH);
            }
        }

        if definition.effects.background_operation() && self.background_running() {
            tracing::debug!(command = definition.name, "background operation in progress");
            return CciResponse::error(ReturnCode::BUSY);
        }

        if self.media_disabled() && MEDIA_GATED_COMMANDS.contains(&opcode) {
            tracing::debug!(command = definition.name, "media disabled");
            return CciResponse::error(ReturnCode::MEDIA_DISABLED);
        }

        match (definition.handler)(self, input) {
            Ok(Completion::Done(payload)) => CciResponse {
                return_code: ReturnCode::SUCCESS,
                payload,
                background_started: false,
            },
            Ok(Completion::Background { job, runtime_ms }) => {
                if !definition.effects.background_operation() {
                    tracing::error!(
                        command = definition.name,
                        "foreground command tried to start a background operation"
                    );
                    return CciResponse::error(ReturnCode::INTERNAL_ERROR);
                }
                self.start_background(opcode, job, runtime_ms);
                CciResponse {
                    return_code: ReturnCode::BACKGROUND_STARTED,
                    payload: Vec::new(),
                    background_started: true,
                }
            }
            Err(return_code) => {
                tracing::debug!(command = definition.name, ?return_code, "command failed");
                CciResponse::error(return_code)
            }
        }
    }

    pub(crate) fn target(&self) -> &CciTarget {
        &self.target
    }

    /// The memory device behind this CCI.
    pub(crate) fn type3(&self) -> Result<&Arc<Type3State>, ReturnCode> {
        match &self.target {
            CciTarget::Type3(state) => Ok(state),
            CciTarget::Switch(_) => Err(ReturnCode::INTERNAL_ERROR),
        }
    }

    /// The switch behind this CCI.
    pub(crate) fn switch(&self) -> Result<&Arc<SwitchState>, ReturnCode> {
        match &self.target {
            CciTarget::Switch(state) => Ok(state),
            CciTarget::Type3(_) => Err(ReturnCode::INTERNAL_ERROR),
        }
    }

    pub(crate) fn identity(&self) -> (&ComponentIdentity, ComponentType) {
        match &self.target {
            CciTarget::Type3(state) => (&state.identity, ComponentType::TYPE3),
            CciTarget::Switch(state) => (&state.identity, ComponentType::SWITCH),
        }
    }

    pub(crate) fn timestamp(&self) -> &Timestamp {
        match &self.target {
            CciTarget::Type3(state) => &state.timestamp,
            CciTarget::Switch(state) => &state.timestamp,
        }
    }

    fn media_disabled(&self) -> bool {
        match &self.target {
            CciTarget::Type3(state) => state.media_disabled(),
            CciTarget::Switch(_) => false,
        }
    }

    /// Resolves the nested CCI a tunneled command is addressed to: a
    /// logical device for a Type-3 device, or the FM-owned LD of the device
    /// attached to a downstream port for a switch.
    pub(crate) fn tunnel_target(&self, port_or_ld: u8) -> Option<Arc<Cci>> {
        match &self.target {
            CciTarget::Type3(_) => self.logical_devices.get(port_or_ld as usize).cloned(),
            CciTarget::Switch(state) => state.attached_cci(port_or_ld),
        }
    }

    pub(crate) fn raise_interrupt(&self) {
        let mode = self.interrupt.mode();
        if mode != InterruptMode::Disabled {
            self.interrupt.signal(mode, self.mailbox_vector);
        }
    }
}
