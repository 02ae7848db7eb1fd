//! Controlador de reproducción.
//!
//! Es el dueño del reproductor de audio: suscribe el recurso a la conexión,
//! observa la máquina de estados del track de songbird y aplica la política
//! de teardown al terminar. Un error de reproducción jamás deja una conexión
//! huérfana: el recurso se suelta y, si no hay que persistir, la conexión se
//! destruye.

use anyhow::anyhow;
use dashmap::DashMap;
use parking_lot::RwLock;
use serenity::model::id::GuildId;
use songbird::{
    tracks::{PlayMode, TrackHandle},
    Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    error::StreamError,
    sources::AudioResource,
    voice::{VoiceConnection, VoiceRegistry},
};

/// Estados del reproductor.
///
/// `Idle → Buffering → Playing → Idle` es el ciclo normal; `Paused` y
/// `AutoPaused` pueden aparecer si el driver pausa el track (pérdida
/// temporal de suscriptores) y se toleran sin drama.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Buffering,
    Playing,
    Paused,
    #[allow(dead_code)]
    AutoPaused,
}

/// Receptor de las notificaciones de una sesión de reproducción.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn started(&self, descriptor: &str);
    async fn finished(&self);
    async fn failed(&self, error: &StreamError);
}

/// Cómo terminó el track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PlaybackOutcome {
    /// Fin de stream después de haber sonado.
    Finished,
    /// El track terminó sin pasar nunca por Playing (recurso vacío). Se
    /// reporta como error de reproducción, no como finalización normal.
    Empty,
    /// Fallo de decodificación o de transporte a mitad del stream.
    Errored(String),
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum TeardownNotice {
    Finished,
    Failed(String),
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct TeardownAction {
    pub destroy_connection: bool,
    pub notice: TeardownNotice,
}

/// Política de teardown al final del track.
pub(crate) fn teardown_action(persist: bool, outcome: PlaybackOutcome) -> TeardownAction {
    let notice = match outcome {
        PlaybackOutcome::Finished => TeardownNotice::Finished,
        PlaybackOutcome::Empty => TeardownNotice::Failed(
            "el stream terminó sin llegar a reproducirse".to_string(),
        ),
        PlaybackOutcome::Errored(detail) => TeardownNotice::Failed(detail),
    };

    TeardownAction {
        destroy_connection: !persist,
        notice,
    }
}

/// Estado compartido entre los observadores de un track.
///
/// `finish` es de un solo disparo: el primer evento terminal (End o Error)
/// aplica la política y los siguientes son no-ops, igual que un reemplazo
/// de recurso marca el monitor como superado antes de frenar el track viejo.
struct PlaybackMonitor {
    guild_id: GuildId,
    persist: bool,
    descriptor: String,
    registry: Arc<VoiceRegistry>,
    manager: Arc<Songbird>,
    notifier: Arc<dyn Notifier>,
    state: RwLock<PlayerState>,
    saw_playing: AtomicBool,
    done: AtomicBool,
    resource_cancel: CancellationToken,
}

impl PlaybackMonitor {
    fn set_state(&self, next: PlayerState) {
        *self.state.write() = next;
    }

    fn state(&self) -> PlayerState {
        *self.state.read()
    }

    /// Marca el monitor como superado por un nuevo `play`: suelta el recurso
    /// viejo sin disparar la política de teardown.
    fn supersede(&self) {
        self.done.store(true, Ordering::SeqCst);
        self.resource_cancel.cancel();
    }

    async fn finish(&self, outcome: PlaybackOutcome) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }

        self.set_state(PlayerState::Idle);
        // Soltar el recurso siempre, pase lo que pase con la conexión
        self.resource_cancel.cancel();

        let action = teardown_action(self.persist, outcome);
        if action.destroy_connection {
            self.registry.destroy(&self.manager, self.guild_id).await;
        } else {
            debug!(
                "📌 Conexión persistida en guild {} tras fin de reproducción",
                self.guild_id
            );
        }

        match action.notice {
            TeardownNotice::Finished => {
                info!("✅ Reproducción finalizada en guild {}", self.guild_id);
                self.notifier.finished().await;
            }
            TeardownNotice::Failed(detail) => {
                error!(
                    "❌ Reproducción fallida en guild {}: {}",
                    self.guild_id, detail
                );
                self.notifier.failed(&StreamError::Playback(detail)).await;
            }
        }
    }
}

pub struct PlaybackController {
    current: DashMap<GuildId, (TrackHandle, Arc<PlaybackMonitor>)>,
}

impl PlaybackController {
    pub fn new() -> Self {
        Self {
            current: DashMap::new(),
        }
    }

    /// Adjunta el recurso a la conexión y arranca la reproducción.
    ///
    /// A lo sumo un recurso por reproductor: si había un track en curso para
    /// la guild se frena y se suelta antes de suscribir el nuevo.
    pub async fn play(
        &self,
        connection: &Arc<VoiceConnection>,
        resource: AudioResource,
        persist: bool,
        manager: Arc<Songbird>,
        registry: Arc<VoiceRegistry>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<(), StreamError> {
        let guild_id = connection.guild_id();

        if let Some((_, (old_handle, old_monitor))) = self.current.remove(&guild_id) {
            debug!("🔄 Reemplazando recurso en guild {}", guild_id);
            old_monitor.supersede();
            let _ = old_handle.stop();
        }

        let monitor = Arc::new(PlaybackMonitor {
            guild_id,
            persist,
            descriptor: resource.descriptor.clone(),
            registry,
            manager,
            notifier,
            state: RwLock::new(PlayerState::Buffering),
            saw_playing: AtomicBool::new(false),
            done: AtomicBool::new(false),
            resource_cancel: resource.cancel.clone(),
        });

        let handle = {
            let call = connection.call();
            let mut call = call.lock().await;
            call.play_input(resource.input)
        };

        for (event, observer) in [
            (
                Event::Track(TrackEvent::Play),
                TrackObserver::Start(monitor.clone()),
            ),
            (
                Event::Track(TrackEvent::Pause),
                TrackObserver::Pause(monitor.clone()),
            ),
            (
                Event::Track(TrackEvent::End),
                TrackObserver::End(monitor.clone()),
            ),
            (
                Event::Track(TrackEvent::Error),
                TrackObserver::Error(monitor.clone()),
            ),
        ] {
            handle
                .add_event(event, observer)
                .map_err(|e| StreamError::Internal(anyhow!("error al observar el track: {e}")))?;
        }

        self.current.insert(guild_id, (handle, monitor));
        Ok(())
    }

    /// Consulta de estado del reproductor de la guild.
    #[allow(dead_code)]
    pub fn state(&self, guild_id: GuildId) -> Option<PlayerState> {
        self.current.get(&guild_id).map(|entry| entry.1.state())
    }

    /// Frena y suelta el track de la guild sin disparar la política de
    /// teardown (limpieza por desconexión externa).
    pub fn drop_track(&self, guild_id: GuildId) {
        if let Some((_, (handle, monitor))) = self.current.remove(&guild_id) {
            monitor.supersede();
            let _ = handle.stop();
        }
    }
}

impl Default for PlaybackController {
    fn default() -> Self {
        Self::new()
    }
}

/// Observador de eventos del track de songbird.
enum TrackObserver {
    Start(Arc<PlaybackMonitor>),
    Pause(Arc<PlaybackMonitor>),
    End(Arc<PlaybackMonitor>),
    Error(Arc<PlaybackMonitor>),
}

#[async_trait::async_trait]
impl VoiceEventHandler for TrackObserver {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        match self {
            Self::Start(monitor) => {
                if !monitor.saw_playing.swap(true, Ordering::SeqCst) {
                    monitor.set_state(PlayerState::Playing);
                    info!(
                        "▶️ Reproduciendo {} en guild {}",
                        monitor.descriptor, monitor.guild_id
                    );
                    monitor.notifier.started(&monitor.descriptor).await;
                }
            }
            Self::Pause(monitor) => {
                // Tolerado: el driver puede pausar si pierde suscriptores
                monitor.set_state(PlayerState::Paused);
                debug!("⏸️ Track pausado en guild {}", monitor.guild_id);
            }
            Self::End(monitor) => {
                let errored = track_errored(ctx);
                let outcome = if errored {
                    PlaybackOutcome::Errored("el track terminó en estado de error".to_string())
                } else if monitor.saw_playing.load(Ordering::SeqCst) {
                    PlaybackOutcome::Finished
                } else {
                    PlaybackOutcome::Empty
                };
                monitor.finish(outcome).await;
            }
            Self::Error(monitor) => {
                let detail = error_detail(ctx);
                monitor.finish(PlaybackOutcome::Errored(detail)).await;
            }
        }

        None
    }
}

fn track_errored(ctx: &EventContext<'_>) -> bool {
    if let EventContext::Track(track_list) = ctx {
        track_list
            .iter()
            .any(|(state, _)| matches!(state.playing, PlayMode::Errored(_)))
    } else {
        false
    }
}

fn error_detail(ctx: &EventContext<'_>) -> String {
    if let EventContext::Track(track_list) = ctx {
        for (state, _) in *track_list {
            if let PlayMode::Errored(e) = &state.playing {
                return e.to_string();
            }
        }
    }
    "fallo de decodificación del track".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct RecordingNotifier {
        events: Mutex<Vec<String>>,
    }

    impl RecordingNotifier {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
            })
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().clone()
        }
    }

    #[async_trait::async_trait]
    impl Notifier for RecordingNotifier {
        async fn started(&self, descriptor: &str) {
            self.events.lock().push(format!("started:{descriptor}"));
        }

        async fn finished(&self) {
            self.events.lock().push("finished".to_string());
        }

        async fn failed(&self, error: &StreamError) {
            self.events.lock().push(format!("failed:{error}"));
        }
    }

    fn monitor_with(persist: bool, notifier: Arc<RecordingNotifier>) -> PlaybackMonitor {
        PlaybackMonitor {
            guild_id: GuildId::new(100),
            persist,
            descriptor: "prueba.ogg".to_string(),
            registry: Arc::new(VoiceRegistry::new(Duration::from_secs(5))),
            manager: Songbird::serenity(),
            notifier,
            state: RwLock::new(PlayerState::Buffering),
            saw_playing: AtomicBool::new(true),
            done: AtomicBool::new(false),
            resource_cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn test_politica_fin_normal_sin_persistir() {
        let action = teardown_action(false, PlaybackOutcome::Finished);
        assert!(action.destroy_connection);
        assert_eq!(action.notice, TeardownNotice::Finished);
    }

    #[test]
    fn test_politica_fin_normal_persistiendo() {
        let action = teardown_action(true, PlaybackOutcome::Finished);
        assert!(!action.destroy_connection);
        assert_eq!(action.notice, TeardownNotice::Finished);
    }

    #[test]
    fn test_politica_recurso_vacio_es_error() {
        // Idle sin Playing previo no se anuncia como "finalizado"
        let action = teardown_action(false, PlaybackOutcome::Empty);
        assert!(action.destroy_connection);
        assert!(matches!(action.notice, TeardownNotice::Failed(_)));
    }

    #[test]
    fn test_politica_error_suelta_la_conexion() {
        let action = teardown_action(false, PlaybackOutcome::Errored("x".to_string()));
        assert!(action.destroy_connection);
        assert!(matches!(action.notice, TeardownNotice::Failed(_)));
    }

    #[test]
    fn test_politica_error_persistiendo_conserva_la_conexion() {
        let action = teardown_action(true, PlaybackOutcome::Errored("x".to_string()));
        assert!(!action.destroy_connection);
    }

    #[tokio::test]
    async fn test_finish_es_de_un_solo_disparo() {
        let notifier = RecordingNotifier::new();
        let monitor = monitor_with(false, notifier.clone());

        monitor.finish(PlaybackOutcome::Finished).await;
        monitor.finish(PlaybackOutcome::Finished).await;

        assert_eq!(notifier.events(), vec!["finished".to_string()]);
        assert_eq!(monitor.state(), PlayerState::Idle);
    }

    #[tokio::test]
    async fn test_finish_cancela_el_recurso() {
        let notifier = RecordingNotifier::new();
        let monitor = monitor_with(false, notifier.clone());
        let token = monitor.resource_cancel.clone();

        monitor.finish(PlaybackOutcome::Errored("pipeline roto".to_string())).await;

        assert!(token.is_cancelled());
        let events = notifier.events();
        assert_eq!(events.len(), 1);
        assert!(events[0].starts_with("failed:"));
    }

    #[tokio::test]
    async fn test_supersede_silencia_el_teardown() {
        let notifier = RecordingNotifier::new();
        let monitor = monitor_with(false, notifier.clone());

        monitor.supersede();
        monitor.finish(PlaybackOutcome::Finished).await;

        assert!(notifier.events().is_empty());
    }
}
