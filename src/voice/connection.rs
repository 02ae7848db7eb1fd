use parking_lot::RwLock;
use serenity::{
    async_trait,
    model::id::{ChannelId, GuildId},
};
use songbird::{Call, CoreEvent, Event, EventContext, EventHandler as VoiceEventHandler};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Estados de la conexión de voz.
///
/// `Signalling → Connecting → Ready` es el camino del join; `Disconnected`
/// llega por pérdida de transporte y `Destroyed` es terminal (teardown manual
/// o fallo irrecuperable).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Signalling,
    Connecting,
    Ready,
    Disconnected,
    Destroyed,
}

/// Máquina de estados de la conexión. Las transiciones ilegales se ignoran,
/// nunca hacen panic; `Destroyed` es pegajoso.
pub(crate) struct StateMachine {
    state: RwLock<ConnectionState>,
}

impl StateMachine {
    pub(crate) fn new() -> Self {
        Self {
            state: RwLock::new(ConnectionState::Signalling),
        }
    }

    pub(crate) fn current(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Aplica una transición si es legal. Devuelve si hubo cambio.
    pub(crate) fn advance(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        let mut state = self.state.write();
        let legal = match (*state, next) {
            (Destroyed, _) => false,
            (_, Destroyed) => true,
            (Signalling, Connecting) => true,
            (Connecting, Ready) | (Connecting, Disconnected) => true,
            (Ready, Disconnected) => true,
            (Disconnected, Connecting) | (Disconnected, Ready) => true,
            _ => false,
        };

        if legal {
            debug!("🔀 Conexión: {:?} -> {:?}", *state, next);
            *state = next;
        } else if *state != next {
            debug!("🔀 Transición ignorada: {:?} -> {:?}", *state, next);
        }

        legal
    }
}

/// Una sesión de transporte hacia un canal de voz de una guild.
///
/// Es propiedad exclusiva del registro durante toda su vida y se destruye
/// explícitamente, nunca por recolección implícita. El token de cancelación
/// encadena los pipelines de transcodificación de la sesión: destruir la
/// conexión los cancela.
pub struct VoiceConnection {
    guild_id: GuildId,
    channel_id: ChannelId,
    call: Arc<Mutex<Call>>,
    machine: Arc<StateMachine>,
    cancel: CancellationToken,
}

impl VoiceConnection {
    pub(crate) fn from_parts(
        guild_id: GuildId,
        channel_id: ChannelId,
        call: Arc<Mutex<Call>>,
        machine: Arc<StateMachine>,
    ) -> Self {
        Self {
            guild_id,
            channel_id,
            call,
            machine,
            cancel: CancellationToken::new(),
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.current()
    }

    #[allow(dead_code)]
    pub fn is_live(&self) -> bool {
        self.machine.current() != ConnectionState::Destroyed
    }

    pub fn call(&self) -> Arc<Mutex<Call>> {
        self.call.clone()
    }

    /// Token hijo para atar recursos (pipeline de transcodificación) a la
    /// vida de esta conexión.
    pub fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Marca la conexión como destruida y cancela sus recursos en vuelo.
    /// Seguro de llamar varias veces.
    pub(crate) fn mark_destroyed(&self) {
        if self.machine.advance(ConnectionState::Destroyed) {
            info!("🔌 Conexión destruida en guild {}", self.guild_id);
        }
        self.cancel.cancel();
    }

    /// Registra observadores de estado del driver sobre el call.
    pub(crate) async fn install_observers(&self) {
        let mut call = self.call.lock().await;
        call.add_global_event(
            Event::Core(CoreEvent::DriverConnect),
            DriverStateObserver {
                guild_id: self.guild_id,
                machine: self.machine.clone(),
                next: ConnectionState::Ready,
            },
        );
        call.add_global_event(
            Event::Core(CoreEvent::DriverReconnect),
            DriverStateObserver {
                guild_id: self.guild_id,
                machine: self.machine.clone(),
                next: ConnectionState::Ready,
            },
        );
        call.add_global_event(
            Event::Core(CoreEvent::DriverDisconnect),
            DriverStateObserver {
                guild_id: self.guild_id,
                machine: self.machine.clone(),
                next: ConnectionState::Disconnected,
            },
        );
    }
}

/// Observador de transiciones del driver de songbird.
struct DriverStateObserver {
    guild_id: GuildId,
    machine: Arc<StateMachine>,
    next: ConnectionState,
}

#[async_trait]
impl VoiceEventHandler for DriverStateObserver {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        if self.machine.advance(self.next) && self.next == ConnectionState::Disconnected {
            info!("🔌 Transporte perdido en guild {}", self.guild_id);
        }
        None
    }
}
