//! Resolución de fuentes de audio.
//!
//! Una fuente es una ruta a un asset local o una URL remota. Los assets se
//! abren directo como input perezoso de songbird (sin transcodificar); las
//! URLs pasan por el pipeline de transcodificación a Ogg/Opus de
//! [`transcode`]. La clasificación es síncrona y corre antes de cualquier
//! join: una fuente inválida jamás llega a crear una conexión.

pub mod transcode;

use songbird::input::{File as FileInput, Input};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use url::Url;

use crate::{config::Config, error::StreamError};

/// Referencia de fuente ya validada.
#[derive(Debug, Clone)]
pub enum SourceKind {
    LocalAsset(PathBuf),
    RemoteUrl(Url),
}

impl SourceKind {
    /// Identidad de la fuente para logs y notificaciones.
    pub fn describe(&self) -> String {
        match self {
            Self::LocalAsset(path) => path.display().to_string(),
            Self::RemoteUrl(url) => url.to_string(),
        }
    }
}

/// Valida la referencia de fuente sin tocar la red ni abrir nada.
///
/// Las rutas locales deben existir y ser archivos regulares; las referencias
/// remotas deben ser URLs `http`/`https` bien formadas con host. Todo lo
/// demás es [`StreamError::InvalidSource`].
pub fn classify(raw: &str) -> Result<SourceKind, StreamError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(StreamError::InvalidSource("referencia vacía".to_string()));
    }

    if trimmed.contains("://") {
        let url = Url::parse(trimmed)
            .map_err(|_| StreamError::InvalidSource(format!("URL mal formada: {}", trimmed)))?;

        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(StreamError::InvalidSource(format!(
                    "esquema no soportado: {}",
                    other
                )))
            }
        }

        if url.host_str().is_none() {
            return Err(StreamError::InvalidSource("URL sin host".to_string()));
        }

        Ok(SourceKind::RemoteUrl(url))
    } else {
        let path = PathBuf::from(trimmed);
        if !path.is_file() {
            return Err(StreamError::InvalidSource(format!(
                "el asset no existe: {}",
                trimmed
            )));
        }

        Ok(SourceKind::LocalAsset(path))
    }
}

/// Stream de audio decodificable más su metadata de origen.
///
/// Propiedad del controlador de reproducción; el token cancela el pipeline
/// de transcodificación asociado (no-op para assets locales).
pub struct AudioResource {
    pub input: Input,
    pub descriptor: String,
    pub transcoded: bool,
    pub cancel: CancellationToken,
}

/// Convierte una [`SourceKind`] en un [`AudioResource`] reproducible.
pub struct MediaResolver {
    settings: transcode::PipelineSettings,
}

impl MediaResolver {
    pub fn new(config: &Config) -> Self {
        Self {
            settings: transcode::PipelineSettings {
                ffmpeg_path: config.ffmpeg_path.clone(),
                opus_bitrate: config.opus_bitrate,
                pipe_capacity: config.pipe_capacity,
                first_chunk_timeout: Duration::from_secs(config.first_chunk_timeout_secs),
            },
        }
    }

    /// Abre la fuente como recurso reproducible.
    ///
    /// El stream remoto es perezoso, de una sola pasada y no reiniciable una
    /// vez consumido; `cancel` ata su pipeline a la vida de la conexión.
    pub async fn resolve(
        &self,
        kind: SourceKind,
        cancel: CancellationToken,
    ) -> Result<AudioResource, StreamError> {
        let descriptor = kind.describe();

        match kind {
            SourceKind::LocalAsset(path) => {
                info!("📁 Abriendo asset local: {}", descriptor);
                Ok(AudioResource {
                    input: Input::from(FileInput::new(path)),
                    descriptor,
                    transcoded: false,
                    cancel,
                })
            }
            SourceKind::RemoteUrl(url) => {
                info!("🎛️ Abriendo pipeline de transcodificación para {}", url);
                // Solo timeout de conexión: un timeout total cortaría streams largos
                let http = reqwest::Client::builder()
                    .connect_timeout(Duration::from_secs(10))
                    .build()
                    .map_err(|e| StreamError::Internal(e.into()))?;
                let input =
                    transcode::open_pipeline(&http, url, &self.settings, cancel.clone()).await?;
                Ok(AudioResource {
                    input,
                    descriptor,
                    transcoded: true,
                    cancel,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_url_https_valida() {
        let kind = classify("https://ejemplo.com/audio.mp3").unwrap();
        assert!(matches!(kind, SourceKind::RemoteUrl(_)));
    }

    #[test]
    fn test_url_mal_formada() {
        let result = classify("https://");
        assert!(matches!(result, Err(StreamError::InvalidSource(_))));
    }

    #[test]
    fn test_esquema_no_soportado() {
        let result = classify("ftp://ejemplo.com/audio.mp3");
        assert!(matches!(result, Err(StreamError::InvalidSource(_))));

        let result = classify("file:///etc/passwd");
        assert!(matches!(result, Err(StreamError::InvalidSource(_))));
    }

    #[test]
    fn test_referencia_vacia() {
        assert!(matches!(
            classify("   "),
            Err(StreamError::InvalidSource(_))
        ));
    }

    #[test]
    fn test_asset_local_existente() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("echo.ogg");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"OggS").unwrap();

        let kind = classify(path.to_str().unwrap()).unwrap();
        match kind {
            SourceKind::LocalAsset(found) => assert_eq!(found, path),
            other => panic!("se esperaba asset local, llegó {:?}", other),
        }
    }

    #[test]
    fn test_asset_local_inexistente() {
        let result = classify("./no/existe/echo.ogg");
        assert!(matches!(result, Err(StreamError::InvalidSource(_))));
    }

    #[test]
    fn test_describe_conserva_la_identidad() {
        let kind = classify("https://ejemplo.com/audio.mp3").unwrap();
        assert_eq!(kind.describe(), "https://ejemplo.com/audio.mp3");
    }
}
