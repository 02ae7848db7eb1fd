use anyhow::Result;
use serenity::{
    async_trait,
    builder::{
        CreateInteractionResponse, CreateInteractionResponseFollowup,
        CreateInteractionResponseMessage, EditInteractionResponse,
    },
    http::Http,
    model::application::CommandInteraction,
    prelude::Context,
};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::{
    audio::Notifier,
    bot::OpenStreamBot,
    error::StreamError,
    gatekeeper::CacheGate,
    session::{PlaybackRequest, SessionOutcome},
};

/// Maneja comandos slash
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &OpenStreamBot,
) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    match command.data.name.as_str() {
        "stream" => handle_stream(ctx, command, bot).await?,
        _ => {
            command
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new()
                            .content("❌ Comando no reconocido")
                            .ephemeral(true),
                    ),
                )
                .await?;
        }
    }

    Ok(())
}

async fn handle_stream(
    ctx: &Context,
    command: CommandInteraction,
    bot: &OpenStreamBot,
) -> Result<()> {
    let guild_id = command.guild_id.unwrap();

    let source = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "url")
        .and_then(|opt| opt.value.as_str())
        .map(str::to_string)
        // Sin valor del host: suena el asset por defecto
        .unwrap_or_else(|| bot.config().default_asset.display().to_string());

    let persist = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "stay")
        .and_then(|opt| opt.value.as_bool())
        .unwrap_or(false);

    // Defer la respuesta ya que resolver la fuente puede tomar tiempo
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let manager = songbird::get(ctx)
        .await
        .ok_or_else(|| anyhow::anyhow!("Songbird no inicializado"))?;

    let request = PlaybackRequest {
        source,
        persist,
        user_id: command.user.id,
        guild_id,
    };

    let notifier: Arc<dyn Notifier> = Arc::new(FollowupNotifier {
        http: ctx.http.clone(),
        interaction: command.clone(),
    });
    let gate = CacheGate::new(ctx);

    match bot.sessions().run(&gate, manager, request, notifier).await {
        Ok(SessionOutcome::Started {
            descriptor,
            transcoded,
        }) => {
            debug!(
                "Sesión arrancada para {} (transcodificado: {})",
                descriptor, transcoded
            );
            command
                .edit_response(
                    &ctx.http,
                    EditInteractionResponse::new()
                        .content("🎙️ Uniéndome a tu canal y reproduciendo el audio..."),
                )
                .await?;
        }
        Err(e) => {
            if matches!(e, StreamError::Internal(_)) {
                error!("💥 Error inesperado en la sesión: {:?}", e);
            }
            command
                .edit_response(
                    &ctx.http,
                    EditInteractionResponse::new().content(e.user_message()),
                )
                .await?;
        }
    }

    Ok(())
}

/// Notificador que publica followups sobre la interacción original.
pub struct FollowupNotifier {
    http: Arc<Http>,
    interaction: CommandInteraction,
}

impl FollowupNotifier {
    async fn followup(&self, content: String) {
        let message = CreateInteractionResponseFollowup::new().content(content);
        if let Err(e) = self.interaction.create_followup(&self.http, message).await {
            error!("Error al enviar followup: {:?}", e);
        }
    }
}

#[async_trait]
impl Notifier for FollowupNotifier {
    async fn started(&self, descriptor: &str) {
        self.followup(format!("▶️ Reproduciendo: {}", descriptor)).await;
    }

    async fn finished(&self) {
        self.followup("✅ Reproducción finalizada!".to_string()).await;
    }

    async fn failed(&self, error: &StreamError) {
        self.followup(error.user_message()).await;
    }
}
