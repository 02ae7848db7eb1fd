//! # Bot Module
//!
//! Implementación del bot de Discord para Open Stream.
//!
//! Este módulo contiene el pegamento con el host: registro del comando
//! `/stream`, despacho de interacciones hacia el orquestador de sesiones,
//! logging de mensajes de texto y limpieza ante desconexiones externas.
//! La lógica de la sesión de voz vive en [`crate::session`].

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, Message, Ready, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod commands;
pub mod handlers;

use crate::{config::Config, session::Sessions};

/// Handler principal del bot.
///
/// Implementa el [`EventHandler`] de serenity y delega cada invocación del
/// comando en [`Sessions`].
pub struct OpenStreamBot {
    config: Arc<Config>,
    sessions: Arc<Sessions>,
}

impl OpenStreamBot {
    pub fn new(config: Config) -> Self {
        let sessions = Arc::new(Sessions::new(&config));

        Self {
            config: Arc::new(config),
            sessions,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sessions(&self) -> &Sessions {
        &self.sessions
    }

    /// Registra el comando slash, global o por guild según configuración.
    ///
    /// Los comandos de guild propagan en ~1 segundo (útil en desarrollo);
    /// los globales pueden tardar hasta una hora.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);
                let guild_id = GuildId::from(guild_id);

                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id).await?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for OpenStreamBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }

        info!(
            "💬 {}: \"{}\" en canal {}",
            msg.author.name, msg.content, msg.channel_id
        );
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command_interaction) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    /// Limpieza cuando el bot es desconectado del canal por fuera de la
    /// sesión (expulsión manual, canal borrado).
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id {
            return;
        }

        if old.is_some() && new.channel_id.is_none() {
            if let Some(guild_id) = new.guild_id {
                info!("🔌 Bot desconectado en guild {}", guild_id);

                self.sessions.handle_external_disconnect(guild_id);

                if let Some(manager) = songbird::get(&ctx).await {
                    let _ = manager.remove(guild_id).await;
                }
            }
        }
    }
}
