//! Orquestador de sesiones de reproducción.
//!
//! Secuencia una invocación completa: gatekeeper → clasificación de la
//! fuente → join → resolución del recurso → reproducción. Cualquier fallo
//! posterior al join destruye la conexión antes de reportar el error; una
//! fuente inválida falla antes de que exista conexión alguna.

use serenity::model::id::{GuildId, UserId};
use songbird::Songbird;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

use crate::{
    audio::{Notifier, PlaybackController, PlayerState},
    config::Config,
    error::StreamError,
    gatekeeper::{self, PermissionProvider},
    sources::{self, MediaResolver},
    voice::VoiceRegistry,
};

/// Una invocación validada del comando. Inmutable una vez construida.
#[derive(Debug, Clone)]
pub struct PlaybackRequest {
    pub source: String,
    pub persist: bool,
    pub user_id: UserId,
    pub guild_id: GuildId,
}

/// Resultado de una invocación que llegó a arrancar. La finalización o el
/// fallo posterior se reportan por el [`Notifier`].
#[derive(Debug, Clone)]
pub enum SessionOutcome {
    Started { descriptor: String, transcoded: bool },
}

pub struct Sessions {
    registry: Arc<VoiceRegistry>,
    player: Arc<PlaybackController>,
    resolver: MediaResolver,
}

impl Sessions {
    pub fn new(config: &Config) -> Self {
        Self {
            registry: Arc::new(VoiceRegistry::new(Duration::from_secs(
                config.join_timeout_secs,
            ))),
            player: Arc::new(PlaybackController::new()),
            resolver: MediaResolver::new(config),
        }
    }

    #[allow(dead_code)]
    pub fn registry(&self) -> &Arc<VoiceRegistry> {
        &self.registry
    }

    /// Consulta de estado del reproductor de la guild.
    #[allow(dead_code)]
    pub fn player_state(&self, guild_id: GuildId) -> Option<PlayerState> {
        self.player.state(guild_id)
    }

    /// Ejecuta una invocación de principio a fin.
    ///
    /// Orden estricto: ningún paso arranca antes de que complete su
    /// predecesor. El join solo ocurre con el gatekeeper aprobado y la
    /// fuente clasificada como válida.
    pub async fn run(
        &self,
        gate: &dyn PermissionProvider,
        manager: Arc<Songbird>,
        request: PlaybackRequest,
        notifier: Arc<dyn Notifier>,
    ) -> Result<SessionOutcome, StreamError> {
        let channel_id = gatekeeper::clear_for_join(gate, request.guild_id, request.user_id)?;

        let kind = sources::classify(&request.source)?;

        let connection = self
            .registry
            .join(&manager, request.guild_id, channel_id)
            .await?;

        let resource = match self.resolver.resolve(kind, connection.child_token()).await {
            Ok(resource) => resource,
            Err(e) => {
                warn!(
                    "🧹 Resolución fallida en guild {}, destruyendo conexión",
                    request.guild_id
                );
                self.registry.destroy(&manager, request.guild_id).await;
                return Err(e);
            }
        };

        let descriptor = resource.descriptor.clone();
        let transcoded = resource.transcoded;

        if let Err(e) = self
            .player
            .play(
                &connection,
                resource,
                request.persist,
                manager.clone(),
                self.registry.clone(),
                notifier,
            )
            .await
        {
            self.registry.destroy(&manager, request.guild_id).await;
            return Err(e);
        }

        info!(
            "🎙️ Sesión iniciada en guild {} ({}{})",
            request.guild_id,
            descriptor,
            if transcoded { ", transcodificado" } else { "" }
        );

        Ok(SessionOutcome::Started {
            descriptor,
            transcoded,
        })
    }

    /// Limpieza cuando el host desconectó al bot por fuera de una sesión
    /// (expulsión manual, canal borrado). El call ya no existe: se suelta el
    /// track y se olvida la conexión.
    pub fn handle_external_disconnect(&self, guild_id: GuildId) {
        self.player.drop_track(guild_id);
        self.registry.forget(guild_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gatekeeper::MockPermissionProvider;
    use serenity::{async_trait, model::id::ChannelId, model::Permissions};

    struct NullNotifier;

    #[async_trait]
    impl Notifier for NullNotifier {
        async fn started(&self, _descriptor: &str) {}
        async fn finished(&self) {}
        async fn failed(&self, _error: &StreamError) {}
    }

    fn request_for(source: &str) -> PlaybackRequest {
        PlaybackRequest {
            source: source.to_string(),
            persist: false,
            user_id: UserId::new(200),
            guild_id: GuildId::new(100),
        }
    }

    #[tokio::test]
    async fn test_usuario_fuera_de_canal_no_crea_conexion() {
        let sessions = Sessions::new(&Config::default());
        let manager = Songbird::serenity();

        let mut gate = MockPermissionProvider::new();
        gate.expect_voice_channel_of().returning(|_, _| None);

        let result = sessions
            .run(
                &gate,
                manager,
                request_for("https://ejemplo.com/a.mp3"),
                Arc::new(NullNotifier),
            )
            .await;

        assert!(matches!(result, Err(StreamError::NotInChannel)));
        assert!(sessions.registry().get(GuildId::new(100)).is_none());
    }

    #[tokio::test]
    async fn test_fuente_invalida_no_crea_conexion() {
        let sessions = Sessions::new(&Config::default());
        let manager = Songbird::serenity();

        let mut gate = MockPermissionProvider::new();
        gate.expect_voice_channel_of()
            .returning(|_, _| Some(ChannelId::new(300)));
        gate.expect_bot_in_guild().returning(|_| true);
        gate.expect_bot_permissions_in()
            .returning(|_, _| Some(Permissions::CONNECT | Permissions::SPEAK));

        let result = sessions
            .run(
                &gate,
                manager,
                request_for("ftp://ejemplo.com/a.mp3"),
                Arc::new(NullNotifier),
            )
            .await;

        assert!(matches!(result, Err(StreamError::InvalidSource(_))));
        assert!(sessions.registry().get(GuildId::new(100)).is_none());
    }

    #[tokio::test]
    async fn test_permisos_insuficientes_no_crean_conexion() {
        let sessions = Sessions::new(&Config::default());
        let manager = Songbird::serenity();

        let mut gate = MockPermissionProvider::new();
        gate.expect_voice_channel_of()
            .returning(|_, _| Some(ChannelId::new(300)));
        gate.expect_bot_in_guild().returning(|_| true);
        gate.expect_bot_permissions_in()
            .returning(|_, _| Some(Permissions::CONNECT));

        let result = sessions
            .run(
                &gate,
                manager,
                request_for("https://ejemplo.com/a.mp3"),
                Arc::new(NullNotifier),
            )
            .await;

        assert!(matches!(result, Err(StreamError::MissingSpeak)));
        assert!(sessions.registry().get(GuildId::new(100)).is_none());
    }
}
