use thiserror::Error;

/// Errores de una sesión de reproducción.
///
/// Todos se manejan en el límite del orquestador: ninguno tumba el proceso y
/// cada uno se traduce a un mensaje para el usuario con [`StreamError::user_message`].
/// Ninguno se reintenta automáticamente.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("el usuario no está en un canal de voz")]
    NotInChannel,

    #[error("el bot no es miembro de la guild")]
    BotNotInGuild,

    #[error("falta el permiso CONNECT para el canal de voz")]
    MissingConnect,

    #[error("falta el permiso SPEAK para el canal de voz")]
    MissingSpeak,

    #[error("fuente no válida: {0}")]
    InvalidSource(String),

    #[error("error al descargar la fuente: {0}")]
    FetchFailed(String),

    #[error("error en el pipeline de transcodificación: {0}")]
    TranscodeFailed(String),

    #[error("no se alcanzó el estado Ready del canal de voz a tiempo")]
    ConnectionTimeout,

    #[error("error de reproducción: {0}")]
    Playback(String),

    /// Fallo inesperado de un colaborador. Se loggea y se reporta genérico.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl StreamError {
    /// Mensaje apto para mostrar al usuario que invocó el comando.
    pub fn user_message(&self) -> String {
        match self {
            Self::NotInChannel => "❌ Debes unirte a un canal de voz primero!".to_string(),
            Self::BotNotInGuild => "❌ El bot no es miembro de este servidor".to_string(),
            Self::MissingConnect => {
                "🔒 No tengo permiso para conectarme al canal de voz!".to_string()
            }
            Self::MissingSpeak => "🔇 No tengo permiso para hablar en el canal de voz!".to_string(),
            Self::InvalidSource(detail) => format!("❌ Fuente no válida: {}", detail),
            Self::FetchFailed(_) => "🌐 No se pudo descargar la fuente de audio".to_string(),
            Self::TranscodeFailed(_) => "🎛️ No se pudo transcodificar el audio".to_string(),
            Self::ConnectionTimeout => {
                "⏰ No se pudo conectar al canal de voz a tiempo".to_string()
            }
            Self::Playback(_) | Self::Internal(_) => {
                "💥 Hubo un error al intentar reproducir el audio!".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cada_error_tiene_mensaje_de_usuario() {
        let errors = [
            StreamError::NotInChannel,
            StreamError::BotNotInGuild,
            StreamError::MissingConnect,
            StreamError::MissingSpeak,
            StreamError::InvalidSource("x".into()),
            StreamError::FetchFailed("x".into()),
            StreamError::TranscodeFailed("x".into()),
            StreamError::ConnectionTimeout,
            StreamError::Playback("x".into()),
        ];

        for error in errors {
            assert!(!error.user_message().is_empty());
        }
    }

    #[test]
    fn test_errores_internos_se_reportan_genericos() {
        let error = StreamError::Internal(anyhow::anyhow!("detalle interno"));
        assert!(!error.user_message().contains("detalle interno"));
    }
}
