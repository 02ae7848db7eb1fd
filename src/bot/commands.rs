use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in [stream_command()] {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, vec![stream_command()]).await?;

    Ok(())
}

fn stream_command() -> CreateCommand {
    CreateCommand::new("stream")
        .description("Reproduce un stream de audio en tu canal de voz")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::String,
                "url",
                "URL del medio o ruta de un asset local",
            )
            .required(true),
        )
        .add_option(CreateCommandOption::new(
            CommandOptionType::Boolean,
            "stay",
            "Quedarse en el canal al terminar la reproducción",
        ))
}
