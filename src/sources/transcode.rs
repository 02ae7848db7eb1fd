//! Pipeline de transcodificación a Ogg/Opus.
//!
//! Descarga el medio crudo con reqwest, lo pasa por un proceso ffmpeg que
//! extrae el stream de audio y lo re-codifica a Opus, y expone el stdout de
//! ffmpeg como input en vivo de songbird. Productor y consumidor corren en
//! paralelo sobre un canal acotado: si el reproductor consume lento, el canal
//! se llena, el pump se bloquea, el pipe de stdout de ffmpeg se llena y la
//! descarga se detiene. La memoria queda acotada para streams de cualquier
//! duración.

use bytes::{Buf, Bytes};
use futures::StreamExt;
use songbird::input::{
    core::io::{MediaSource, ReadOnlySource},
    core::probe::Hint,
    AudioStream, Input, LiveInput,
};
use std::io::Read;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::error::StreamError;

const CHUNK_SIZE: usize = 8192;
const STDERR_TAIL: usize = 2048;

#[derive(Debug, Clone)]
pub(crate) struct PipelineSettings {
    pub ffmpeg_path: String,
    pub opus_bitrate: u32,
    pub pipe_capacity: usize,
    pub first_chunk_timeout: Duration,
}

/// Argumentos de ffmpeg: demux del medio de entrada, descarta video y
/// re-codifica solo el audio a Opus dentro de un contenedor Ogg, todo por
/// stdin/stdout.
pub(crate) fn ffmpeg_args(opus_bitrate: u32) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        "pipe:0".to_string(),
        "-vn".to_string(),
        "-acodec".to_string(),
        "libopus".to_string(),
        "-b:a".to_string(),
        format!("{}k", opus_bitrate / 1000),
        "-f".to_string(),
        "ogg".to_string(),
        "pipe:1".to_string(),
    ]
}

/// Abre el pipeline completo y devuelve el input listo para el reproductor.
///
/// Espera el primer chunk transcodificado antes de devolver: un pipeline que
/// no produce nada falla acá como [`StreamError::TranscodeFailed`] en lugar
/// de sonar como un stream vacío. Cancelar `cancel` mata el proceso ffmpeg y
/// suelta el pipe.
pub(crate) async fn open_pipeline(
    http: &reqwest::Client,
    url: Url,
    settings: &PipelineSettings,
    cancel: CancellationToken,
) -> Result<Input, StreamError> {
    let response = http
        .get(url.clone())
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| StreamError::FetchFailed(e.to_string()))?;

    let mut child = Command::new(&settings.ffmpeg_path)
        .args(ffmpeg_args(settings.opus_bitrate))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            StreamError::TranscodeFailed(format!(
                "no se pudo lanzar {}: {}",
                settings.ffmpeg_path, e
            ))
        })?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| StreamError::TranscodeFailed("ffmpeg sin stdin".to_string()))?;
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| StreamError::TranscodeFailed("ffmpeg sin stdout".to_string()))?;

    let (tx, rx) = flume::bounded::<std::io::Result<Bytes>>(settings.pipe_capacity);

    // Alimentador: cuerpo HTTP -> stdin de ffmpeg. El backpressure llega
    // desde el pipe de stdin cuando ffmpeg deja de leer.
    let feed_cancel = cancel.clone();
    tokio::spawn(async move {
        let mut body = response.bytes_stream();
        loop {
            tokio::select! {
                _ = feed_cancel.cancelled() => break,
                chunk = body.next() => match chunk {
                    Some(Ok(bytes)) => {
                        if stdin.write_all(&bytes).await.is_err() {
                            // ffmpeg cerró su stdin (terminó o murió)
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("🌐 Descarga interrumpida: {}", e);
                        break;
                    }
                    None => break,
                },
            }
        }
        let _ = stdin.shutdown().await;
        debug!("Alimentador del pipeline terminado");
    });

    // Pump: stdout de ffmpeg -> canal acotado hacia el reproductor.
    let pump_cancel = cancel.clone();
    tokio::spawn(async move {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let finished = loop {
            tokio::select! {
                _ = pump_cancel.cancelled() => {
                    let _ = child.kill().await;
                    debug!("Pipeline de transcodificación cancelado");
                    break false;
                }
                read = stdout.read(&mut buf) => match read {
                    Ok(0) => break true,
                    Ok(n) => {
                        let chunk = Bytes::copy_from_slice(&buf[..n]);
                        if tx.send_async(Ok(chunk)).await.is_err() {
                            // El consumidor soltó el pipe: reproducción detenida
                            let _ = child.kill().await;
                            break false;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send_async(Err(e)).await;
                        let _ = child.kill().await;
                        break false;
                    }
                },
            }
        };

        if finished {
            match child.wait().await {
                Ok(status) if status.success() => {
                    debug!("ffmpeg terminó limpio");
                }
                Ok(status) => {
                    let detail = read_stderr_tail(child.stderr.take()).await;
                    let _ = tx
                        .send_async(Err(std::io::Error::other(format!(
                            "ffmpeg terminó con {}: {}",
                            status, detail
                        ))))
                        .await;
                }
                Err(e) => {
                    let _ = tx
                        .send_async(Err(std::io::Error::other(format!(
                            "no se pudo esperar a ffmpeg: {}",
                            e
                        ))))
                        .await;
                }
            }
        }
    });

    // Primer chunk: distingue TranscodeFailed en resolve de un stream vacío
    let first = match tokio::time::timeout(settings.first_chunk_timeout, rx.recv_async()).await {
        Err(_elapsed) => {
            cancel.cancel();
            return Err(StreamError::TranscodeFailed(
                "el transcodificador no produjo datos a tiempo".to_string(),
            ));
        }
        Ok(Err(_disconnected)) => {
            return Err(StreamError::TranscodeFailed(
                "el pipeline terminó sin producir audio".to_string(),
            ));
        }
        Ok(Ok(Err(e))) => {
            return Err(StreamError::TranscodeFailed(e.to_string()));
        }
        Ok(Ok(Ok(bytes))) => bytes,
    };

    let reader = PipeReader::new(first, rx);
    let mut hint = Hint::new();
    hint.with_extension("ogg");
    hint.mime_type("audio/ogg");

    let stream = AudioStream {
        input: Box::new(ReadOnlySource::new(reader)) as Box<dyn MediaSource>,
        hint: Some(hint),
    };

    Ok(Input::Live(LiveInput::Raw(stream), None))
}

async fn read_stderr_tail(stderr: Option<tokio::process::ChildStderr>) -> String {
    let Some(mut stderr) = stderr else {
        return "sin diagnóstico".to_string();
    };

    let mut raw = String::new();
    let _ = stderr.read_to_string(&mut raw).await;
    let tail_start = raw.len().saturating_sub(STDERR_TAIL);
    raw[tail_start..].trim().to_string()
}

/// Lado consumidor del pipe: un `Read` bloqueante sobre el canal acotado.
///
/// El driver de songbird lo lee desde su propio hilo, así que el `recv`
/// bloqueante no pisa el runtime async. EOF cuando el pump suelta el canal;
/// un error del pipeline llega como error de I/O y termina el track con
/// error, no como fin normal.
pub(crate) struct PipeReader {
    current: Bytes,
    rx: flume::Receiver<std::io::Result<Bytes>>,
}

impl PipeReader {
    pub(crate) fn new(first: Bytes, rx: flume::Receiver<std::io::Result<Bytes>>) -> Self {
        Self { current: first, rx }
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        while self.current.is_empty() {
            match self.rx.recv() {
                Ok(Ok(bytes)) => self.current = bytes,
                Ok(Err(e)) => return Err(e),
                Err(flume::RecvError::Disconnected) => return Ok(0),
            }
        }

        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current[..n]);
        self.current.advance(n);
        Ok(n)
    }
}
