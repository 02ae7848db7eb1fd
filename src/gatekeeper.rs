//! Validación previa al join: canal de voz del usuario y permisos del bot.
//!
//! El proveedor de identidad/permisos es un colaborador externo detrás del
//! trait [`PermissionProvider`]; en producción lo respalda la caché de
//! serenity y en tests un mock. La verificación es una consulta pura, sin
//! efectos secundarios.

use serenity::{
    model::{
        id::{ChannelId, GuildId, UserId},
        Permissions,
    },
    prelude::Context,
};

use crate::error::StreamError;

/// Capacidades efectivas del bot sobre un canal de voz. Derivada, no se almacena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityCheck {
    pub can_connect: bool,
    pub can_speak: bool,
}

/// Consulta de identidad y permisos contra el host.
#[cfg_attr(test, mockall::automock)]
pub trait PermissionProvider: Send + Sync {
    /// Canal de voz actual del usuario, si está en alguno.
    fn voice_channel_of(&self, guild_id: GuildId, user_id: UserId) -> Option<ChannelId>;

    /// Si el bot tiene registro de membresía en la guild.
    fn bot_in_guild(&self, guild_id: GuildId) -> bool;

    /// Permisos efectivos del bot sobre el canal. `None` si la caché no
    /// alcanza para evaluarlos.
    fn bot_permissions_in(&self, guild_id: GuildId, channel_id: ChannelId) -> Option<Permissions>;
}

/// Implementación respaldada por la caché de serenity.
pub struct CacheGate<'a> {
    ctx: &'a Context,
}

impl<'a> CacheGate<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }
}

impl PermissionProvider for CacheGate<'_> {
    fn voice_channel_of(&self, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
        let guild = self.ctx.cache.guild(guild_id)?;
        guild
            .voice_states
            .get(&user_id)
            .and_then(|voice_state| voice_state.channel_id)
    }

    fn bot_in_guild(&self, guild_id: GuildId) -> bool {
        let bot_id = self.ctx.cache.current_user().id;
        self.ctx
            .cache
            .guild(guild_id)
            .map_or(false, |guild| guild.members.contains_key(&bot_id))
    }

    fn bot_permissions_in(&self, guild_id: GuildId, channel_id: ChannelId) -> Option<Permissions> {
        let bot_id = self.ctx.cache.current_user().id;
        let guild = self.ctx.cache.guild(guild_id)?;
        let member = guild.members.get(&bot_id)?;
        let channel = guild.channels.get(&channel_id)?;
        Some(guild.user_permissions_in(channel, member))
    }
}

/// Deriva ambas capacidades en una sola pasada sobre los permisos.
pub fn capabilities(permissions: Permissions) -> CapabilityCheck {
    CapabilityCheck {
        can_connect: permissions.contains(Permissions::CONNECT),
        can_speak: permissions.contains(Permissions::SPEAK),
    }
}

/// Verifica que la invocación pueda convertirse en un join.
///
/// Orden de chequeo: usuario en canal de voz, membresía del bot, permiso
/// CONNECT y por último SPEAK (sin CONNECT el SPEAK es irrelevante).
/// Devuelve el canal objetivo del join.
pub fn clear_for_join(
    provider: &dyn PermissionProvider,
    guild_id: GuildId,
    user_id: UserId,
) -> Result<ChannelId, StreamError> {
    let channel_id = provider
        .voice_channel_of(guild_id, user_id)
        .ok_or(StreamError::NotInChannel)?;

    if !provider.bot_in_guild(guild_id) {
        return Err(StreamError::BotNotInGuild);
    }

    let permissions = provider
        .bot_permissions_in(guild_id, channel_id)
        .ok_or(StreamError::BotNotInGuild)?;

    let check = capabilities(permissions);
    if !check.can_connect {
        return Err(StreamError::MissingConnect);
    }
    if !check.can_speak {
        return Err(StreamError::MissingSpeak);
    }

    Ok(channel_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUILD: GuildId = GuildId::new(100);
    const USER: UserId = UserId::new(200);
    const CHANNEL: ChannelId = ChannelId::new(300);

    fn provider_with(
        user_channel: Option<ChannelId>,
        bot_present: bool,
        permissions: Option<Permissions>,
    ) -> MockPermissionProvider {
        let mut provider = MockPermissionProvider::new();
        provider
            .expect_voice_channel_of()
            .returning(move |_, _| user_channel);
        provider.expect_bot_in_guild().returning(move |_| bot_present);
        provider
            .expect_bot_permissions_in()
            .returning(move |_, _| permissions);
        provider
    }

    #[test]
    fn test_usuario_sin_canal_de_voz() {
        let provider = provider_with(None, true, Some(Permissions::all()));
        let result = clear_for_join(&provider, GUILD, USER);
        assert!(matches!(result, Err(StreamError::NotInChannel)));
    }

    #[test]
    fn test_bot_fuera_de_la_guild() {
        let provider = provider_with(Some(CHANNEL), false, None);
        let result = clear_for_join(&provider, GUILD, USER);
        assert!(matches!(result, Err(StreamError::BotNotInGuild)));
    }

    #[test]
    fn test_permisos_no_evaluables() {
        let provider = provider_with(Some(CHANNEL), true, None);
        let result = clear_for_join(&provider, GUILD, USER);
        assert!(matches!(result, Err(StreamError::BotNotInGuild)));
    }

    #[test]
    fn test_sin_permiso_connect() {
        let provider = provider_with(Some(CHANNEL), true, Some(Permissions::SPEAK));
        let result = clear_for_join(&provider, GUILD, USER);
        assert!(matches!(result, Err(StreamError::MissingConnect)));
    }

    #[test]
    fn test_sin_permiso_speak() {
        let provider = provider_with(Some(CHANNEL), true, Some(Permissions::CONNECT));
        let result = clear_for_join(&provider, GUILD, USER);
        assert!(matches!(result, Err(StreamError::MissingSpeak)));
    }

    #[test]
    fn test_connect_gana_sobre_speak() {
        // Faltando ambos, el primer fallo reportado es CONNECT
        let provider = provider_with(Some(CHANNEL), true, Some(Permissions::empty()));
        let result = clear_for_join(&provider, GUILD, USER);
        assert!(matches!(result, Err(StreamError::MissingConnect)));
    }

    #[test]
    fn test_con_todos_los_permisos() {
        let provider = provider_with(
            Some(CHANNEL),
            true,
            Some(Permissions::CONNECT | Permissions::SPEAK),
        );
        let channel = clear_for_join(&provider, GUILD, USER).unwrap();
        assert_eq!(channel, CHANNEL);
    }

    #[test]
    fn test_capacidades_en_una_pasada() {
        let check = capabilities(Permissions::CONNECT);
        assert!(check.can_connect);
        assert!(!check.can_speak);

        let check = capabilities(Permissions::CONNECT | Permissions::SPEAK);
        assert!(check.can_connect);
        assert!(check.can_speak);
    }
}
