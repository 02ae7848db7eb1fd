use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Audio
    pub default_asset: PathBuf,
    pub opus_bitrate: u32,

    // Transcodificación
    pub ffmpeg_path: String,
    pub pipe_capacity: usize, // Chunks en vuelo entre ffmpeg y el reproductor

    // Límites
    pub join_timeout_secs: u64,
    pub first_chunk_timeout_secs: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")?,
            application_id: std::env::var("APPLICATION_ID")?.parse()?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            // Audio
            default_asset: std::env::var("DEFAULT_ASSET")
                .unwrap_or_else(|_| "./assets/audio/echo.ogg".to_string())
                .into(),
            opus_bitrate: std::env::var("OPUS_BITRATE")
                .unwrap_or_else(|_| "128000".to_string()) // 128kbps, target del transcodificador
                .parse()?,

            // Transcodificación
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
            pipe_capacity: std::env::var("PIPE_CAPACITY")
                .unwrap_or_else(|_| "64".to_string())
                .parse()?,

            // Límites
            join_timeout_secs: std::env::var("JOIN_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            first_chunk_timeout_secs: std::env::var("FIRST_CHUNK_TIMEOUT_SECS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Valida los valores de configuración antes de arrancar el bot.
    ///
    /// - El bitrate Opus debe estar entre 8kbps y 510kbps (límite de Discord)
    /// - La capacidad del pipe debe ser mayor que cero (si no, no hay backpressure posible)
    /// - Los timeouts deben ser mayores que cero
    pub fn validate(&self) -> Result<()> {
        if self.opus_bitrate > 510_000 {
            anyhow::bail!(
                "Opus bitrate cannot exceed 510kbps, got: {}",
                self.opus_bitrate
            );
        }

        if self.opus_bitrate < 8_000 {
            anyhow::bail!("Opus bitrate too low, minimum 8kbps, got: {}", self.opus_bitrate);
        }

        if self.pipe_capacity == 0 {
            anyhow::bail!("Pipe capacity must be greater than 0");
        }

        if self.join_timeout_secs == 0 {
            anyhow::bail!("Join timeout must be greater than 0");
        }

        if self.first_chunk_timeout_secs == 0 {
            anyhow::bail!("First chunk timeout must be greater than 0");
        }

        Ok(())
    }

    /// Resumen de la configuración para los logs, sin datos sensibles.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Audio: {}kbps opus, asset por defecto {}\n  \
            Transcode: {} (pipe de {} chunks)\n  \
            Límites: join {}s, primer chunk {}s",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.opus_bitrate / 1000,
            self.default_asset.display(),
            self.ffmpeg_path,
            self.pipe_capacity,
            self.join_timeout_secs,
            self.first_chunk_timeout_secs,
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (sin defaults - deben proveerse)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            // Audio defaults
            default_asset: "./assets/audio/echo.ogg".into(),
            opus_bitrate: 128_000,

            // Transcode defaults
            ffmpeg_path: "ffmpeg".to_string(),
            pipe_capacity: 64,

            // Límites
            join_timeout_secs: 10,
            first_chunk_timeout_secs: 15,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_por_defecto_es_valida() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_bitrate_fuera_de_rango() {
        let mut config = Config::default();
        config.opus_bitrate = 600_000;
        assert!(config.validate().is_err());

        config.opus_bitrate = 4_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pipe_sin_capacidad() {
        let mut config = Config::default();
        config.pipe_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeouts_en_cero() {
        let mut config = Config::default();
        config.join_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.first_chunk_timeout_secs = 0;
        assert!(config.validate().is_err());
    }
}
