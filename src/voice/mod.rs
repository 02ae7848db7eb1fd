//! Registro de conexiones de voz, una por guild.
//!
//! El registro es el dueño del ciclo de vida de cada [`VoiceConnection`]:
//! se crea al arrancar el proceso, impone la regla de una conexión viva por
//! guild y el teardown pasa siempre por [`VoiceRegistry::destroy`]. Ningún
//! estado global ambiente.

pub mod connection;

pub use connection::{ConnectionState, VoiceConnection};

use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{error::JoinError, Songbird};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use crate::error::StreamError;
use connection::StateMachine;

/// Decisión ante un join para una guild que quizá ya tiene conexión.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JoinPlan {
    /// Ya hay una conexión viva al mismo canal: se reutiliza.
    Reuse,
    /// Hay una conexión a otro canal o muerta: se destruye y se vuelve a unir.
    Replace,
    /// No hay conexión previa.
    Fresh,
}

pub(crate) fn join_plan(
    existing: Option<(ChannelId, ConnectionState)>,
    target: ChannelId,
) -> JoinPlan {
    match existing {
        None => JoinPlan::Fresh,
        Some((channel, state)) => {
            if state == ConnectionState::Destroyed {
                JoinPlan::Replace
            } else if channel == target {
                JoinPlan::Reuse
            } else {
                JoinPlan::Replace
            }
        }
    }
}

pub struct VoiceRegistry {
    connections: DashMap<GuildId, Arc<VoiceConnection>>,
    join_timeout: Duration,
}

impl VoiceRegistry {
    pub fn new(join_timeout: Duration) -> Self {
        Self {
            connections: DashMap::new(),
            join_timeout,
        }
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<VoiceConnection>> {
        self.connections.get(&guild_id).map(|c| c.clone())
    }

    /// Une el bot al canal de voz. Idempotente por guild: nunca deja dos
    /// sesiones de transporte vivas para la misma guild.
    ///
    /// No alcanzar `Ready` dentro del tiempo acotado se reporta como
    /// [`StreamError::ConnectionTimeout`]; cualquier call a medio unir se
    /// limpia antes de reportar.
    pub async fn join(
        &self,
        manager: &Arc<Songbird>,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<VoiceConnection>, StreamError> {
        let existing = self
            .connections
            .get(&guild_id)
            .map(|c| (c.channel_id(), c.state()));

        match join_plan(existing, channel_id) {
            JoinPlan::Reuse => {
                // Carrera con un destroy concurrente: si ya no está, join fresco
                if let Some(connection) = self.get(guild_id) {
                    debug!(
                        "🔁 Reutilizando conexión de voz en guild {} (canal {})",
                        guild_id, channel_id
                    );
                    return Ok(connection);
                }
            }
            JoinPlan::Replace => {
                debug!("♻️ Reemplazando conexión de voz en guild {}", guild_id);
                self.destroy(manager, guild_id).await;
            }
            JoinPlan::Fresh => {}
        }

        // Señalización: la máquina arranca en Signalling y pasa a Connecting
        // al despachar el handshake al adaptador de transporte.
        let machine = Arc::new(StateMachine::new());
        machine.advance(ConnectionState::Connecting);

        let call = match tokio::time::timeout(
            self.join_timeout,
            manager.join(guild_id, channel_id),
        )
        .await
        {
            Err(_elapsed) => {
                warn!("⏰ Join sin respuesta en guild {}", guild_id);
                let _ = manager.remove(guild_id).await;
                return Err(StreamError::ConnectionTimeout);
            }
            Ok(Err(JoinError::TimedOut)) => {
                let _ = manager.remove(guild_id).await;
                return Err(StreamError::ConnectionTimeout);
            }
            Ok(Err(e)) => {
                let _ = manager.remove(guild_id).await;
                return Err(StreamError::Internal(anyhow::anyhow!(
                    "fallo de señalización de voz: {e}"
                )));
            }
            Ok(Ok(call)) => call,
        };

        machine.advance(ConnectionState::Ready);

        let connection = Arc::new(VoiceConnection::from_parts(
            guild_id, channel_id, call, machine,
        ));
        connection.install_observers().await;
        self.connections.insert(guild_id, connection.clone());

        info!("🔊 Conectado al canal de voz en guild {}", guild_id);
        Ok(connection)
    }

    /// Destruye la conexión de la guild: cancela los pipelines en vuelo,
    /// marca `Destroyed` y suelta el call de songbird. Seguro de llamar
    /// varias veces; nunca devuelve error.
    pub async fn destroy(&self, manager: &Arc<Songbird>, guild_id: GuildId) {
        if let Some((_, connection)) = self.connections.remove(&guild_id) {
            connection.mark_destroyed();
        }

        if let Err(e) = manager.remove(guild_id).await {
            // Sin call para la guild: destroy repetido o desconexión externa
            debug!("Remove de call sin efecto en guild {}: {:?}", guild_id, e);
        }
    }

    /// Limpieza cuando el host ya desconectó al bot (el call ya no existe):
    /// solo marca y cancela, sin tocar al manager.
    pub fn forget(&self, guild_id: GuildId) {
        if let Some((_, connection)) = self.connections.remove(&guild_id) {
            connection.mark_destroyed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET: ChannelId = ChannelId::new(300);
    const OTHER: ChannelId = ChannelId::new(301);

    #[test]
    fn test_join_sin_conexion_previa() {
        assert_eq!(join_plan(None, TARGET), JoinPlan::Fresh);
    }

    #[test]
    fn test_join_reutiliza_misma_conexion() {
        let existing = Some((TARGET, ConnectionState::Ready));
        assert_eq!(join_plan(existing, TARGET), JoinPlan::Reuse);
    }

    #[test]
    fn test_join_reemplaza_otro_canal() {
        let existing = Some((OTHER, ConnectionState::Ready));
        assert_eq!(join_plan(existing, TARGET), JoinPlan::Replace);
    }

    #[test]
    fn test_join_reemplaza_conexion_muerta() {
        let existing = Some((TARGET, ConnectionState::Destroyed));
        assert_eq!(join_plan(existing, TARGET), JoinPlan::Replace);
    }

    #[tokio::test]
    async fn test_destroy_es_idempotente() {
        let manager = Songbird::serenity();
        let registry = VoiceRegistry::new(Duration::from_secs(5));
        let guild_id = GuildId::new(100);

        // Sin conexión registrada: ambas llamadas son no-ops silenciosos
        registry.destroy(&manager, guild_id).await;
        registry.destroy(&manager, guild_id).await;
        assert!(registry.get(guild_id).is_none());
    }
}
