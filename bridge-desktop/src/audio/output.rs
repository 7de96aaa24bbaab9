//! Rodio-backed [`PlaybackAdapter`].
//!
//! `rodio::OutputStream` must stay on the thread that opened it, so every
//! sink lives on one dedicated audio thread. Async callers talk to it over a
//! command channel and get replies on oneshot channels.

use super::probe::probe_file;
use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    playback::{
        PlaybackAdapter, PlaybackRequest, PlaybackSessionId, PlaybackState, PreparedSource,
    },
};
use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

type Reply<T> = oneshot::Sender<Result<T>>;

enum AudioCommand {
    Prepare {
        session: PlaybackSessionId,
        request: PlaybackRequest,
        reply: Reply<()>,
    },
    Play(PlaybackSessionId, Reply<()>),
    Pause(PlaybackSessionId, Reply<()>),
    Stop(PlaybackSessionId, Reply<()>),
    Seek(PlaybackSessionId, Duration, Reply<()>),
    SetVolume(PlaybackSessionId, f32, Reply<()>),
    Position(PlaybackSessionId, Reply<Duration>),
    State(PlaybackSessionId, Reply<PlaybackState>),
    Unload(PlaybackSessionId, Reply<()>),
}

/// Desktop audio output through the default device.
pub struct RodioPlaybackAdapter {
    commands: mpsc::Sender<AudioCommand>,
}

impl RodioPlaybackAdapter {
    /// Spawn the audio thread. The output device is opened lazily on the
    /// first `prepare`, so construction never touches the sound system.
    pub fn new() -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("surah-audio".to_string())
            .spawn(move || AudioThread::default().run(rx))
            .map_err(BridgeError::Io)?;

        Ok(Self { commands: tx })
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> AudioCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| BridgeError::DeviceUnavailable("audio thread stopped".to_string()))?;

        rx.await
            .map_err(|_| BridgeError::DeviceUnavailable("audio thread stopped".to_string()))?
    }
}

#[async_trait]
impl PlaybackAdapter for RodioPlaybackAdapter {
    async fn prepare(&self, request: PlaybackRequest) -> Result<PreparedSource> {
        let path = request.path.clone();
        let summary = tokio::task::spawn_blocking(move || probe_file(&path))
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("Probe task failed: {}", e)))??;

        let session = PlaybackSessionId::new();
        self.request(|reply| AudioCommand::Prepare {
            session,
            request,
            reply,
        })
        .await?;

        Ok(PreparedSource {
            session,
            duration: summary.duration,
        })
    }

    async fn play(&self, session: PlaybackSessionId) -> Result<()> {
        self.request(|reply| AudioCommand::Play(session, reply)).await
    }

    async fn pause(&self, session: PlaybackSessionId) -> Result<()> {
        self.request(|reply| AudioCommand::Pause(session, reply)).await
    }

    async fn stop(&self, session: PlaybackSessionId) -> Result<()> {
        self.request(|reply| AudioCommand::Stop(session, reply)).await
    }

    async fn seek(&self, session: PlaybackSessionId, position: Duration) -> Result<()> {
        self.request(|reply| AudioCommand::Seek(session, position, reply))
            .await
    }

    async fn set_volume(&self, session: PlaybackSessionId, volume: f32) -> Result<()> {
        self.request(|reply| AudioCommand::SetVolume(session, volume, reply))
            .await
    }

    async fn get_position(&self, session: PlaybackSessionId) -> Result<Duration> {
        self.request(|reply| AudioCommand::Position(session, reply))
            .await
    }

    async fn state(&self, session: PlaybackSessionId) -> Result<PlaybackState> {
        self.request(|reply| AudioCommand::State(session, reply)).await
    }

    async fn unload(&self, session: PlaybackSessionId) -> Result<()> {
        self.request(|reply| AudioCommand::Unload(session, reply)).await
    }
}

#[derive(Default)]
struct AudioThread {
    stream: Option<OutputStream>,
    sinks: HashMap<PlaybackSessionId, Sink>,
}

impl AudioThread {
    fn run(mut self, commands: mpsc::Receiver<AudioCommand>) {
        info!("Audio thread started");
        while let Ok(command) = commands.recv() {
            self.handle(command);
        }
        for (_, sink) in self.sinks.drain() {
            sink.stop();
        }
        info!("Audio thread stopped");
    }

    fn handle(&mut self, command: AudioCommand) {
        match command {
            AudioCommand::Prepare {
                session,
                request,
                reply,
            } => {
                let _ = reply.send(self.prepare(session, request));
            }
            AudioCommand::Play(session, reply) => {
                let _ = reply.send(self.with_sink(session, |sink| sink.play()));
            }
            AudioCommand::Pause(session, reply) => {
                let _ = reply.send(self.with_sink(session, |sink| sink.pause()));
            }
            AudioCommand::Stop(session, reply) => {
                let _ = reply.send(self.with_sink(session, |sink| sink.stop()));
            }
            AudioCommand::SetVolume(session, volume, reply) => {
                let volume = volume.clamp(0.0, 1.0);
                let _ = reply.send(self.with_sink(session, |sink| sink.set_volume(volume)));
            }
            AudioCommand::Seek(session, position, reply) => {
                let result = self.sink(session).and_then(|sink| {
                    sink.try_seek(position)
                        .map_err(|e| BridgeError::OperationFailed(format!("Seek failed: {}", e)))
                });
                let _ = reply.send(result);
            }
            AudioCommand::Position(session, reply) => {
                let _ = reply.send(self.sink(session).map(|sink| sink.get_pos()));
            }
            AudioCommand::State(session, reply) => {
                let state = self.sink(session).map(|sink| {
                    if sink.empty() {
                        PlaybackState::Completed
                    } else if sink.is_paused() {
                        PlaybackState::Paused
                    } else {
                        PlaybackState::Playing
                    }
                });
                let _ = reply.send(state);
            }
            AudioCommand::Unload(session, reply) => {
                if let Some(sink) = self.sinks.remove(&session) {
                    sink.stop();
                    debug!(%session, "Unloaded sink");
                }
                self.release_output_if_idle();
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn output(&mut self) -> Result<&OutputStream> {
        if self.stream.is_none() {
            let stream = OutputStreamBuilder::from_default_device()
                .and_then(|builder| builder.open_stream_or_fallback())
                .map_err(|e| {
                    error!(error = %e, "Failed to open audio output");
                    BridgeError::DeviceUnavailable(e.to_string())
                })?;
            self.stream = Some(stream);
        }

        self.stream
            .as_ref()
            .ok_or_else(|| BridgeError::DeviceUnavailable("no output stream".to_string()))
    }

    /// Close the device once no sink is left; the next `prepare` reopens it.
    fn release_output_if_idle(&mut self) {
        if self.sinks.is_empty() && self.stream.take().is_some() {
            info!("Audio output released");
        }
    }

    fn prepare(&mut self, session: PlaybackSessionId, request: PlaybackRequest) -> Result<()> {
        let file = File::open(&request.path)?;
        let source = Decoder::new(BufReader::new(file))
            .map_err(|e| BridgeError::Decode(format!("Failed to decode: {}", e)))?;

        let sink = Sink::connect_new(self.output()?.mixer());
        sink.pause();
        sink.set_volume(request.options.initial_volume.clamp(0.0, 1.0));
        sink.append(source);

        if !request.options.start_position.is_zero() {
            if let Err(e) = sink.try_seek(request.options.start_position) {
                warn!(error = %e, "Initial seek failed, starting from the beginning");
            }
        }

        debug!(%session, path = ?request.path, "Prepared sink");
        self.sinks.insert(session, sink);
        Ok(())
    }

    fn sink(&self, session: PlaybackSessionId) -> Result<&Sink> {
        self.sinks
            .get(&session)
            .ok_or_else(|| BridgeError::UnknownSource(session.to_string()))
    }

    fn with_sink(&self, session: PlaybackSessionId, f: impl FnOnce(&Sink)) -> Result<()> {
        self.sink(session).map(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_session_is_rejected() {
        let adapter = RodioPlaybackAdapter::new().unwrap();
        let err = adapter.play(PlaybackSessionId::new()).await.unwrap_err();
        assert!(matches!(err, BridgeError::UnknownSource(_)));
    }

    #[test]
    fn test_unloading_last_sink_releases_device() {
        // Needs a real output device; nothing to check without one.
        let Ok(stream) = OutputStreamBuilder::from_default_device()
            .and_then(|builder| builder.open_stream_or_fallback())
        else {
            return;
        };

        let mut thread = AudioThread::default();
        let first = PlaybackSessionId::new();
        let second = PlaybackSessionId::new();
        thread.sinks.insert(first, Sink::connect_new(stream.mixer()));
        thread.sinks.insert(second, Sink::connect_new(stream.mixer()));
        thread.stream = Some(stream);

        let (reply, _rx) = oneshot::channel();
        thread.handle(AudioCommand::Unload(first, reply));
        assert!(thread.stream.is_some());

        let (reply, _rx) = oneshot::channel();
        thread.handle(AudioCommand::Unload(second, reply));
        assert!(thread.stream.is_none());
        assert!(thread.sinks.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_fails_before_touching_device() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("002.mp3");
        std::fs::write(&path, b"not audio").unwrap();

        let adapter = RodioPlaybackAdapter::new().unwrap();
        let err = adapter
            .prepare(PlaybackRequest::new(path))
            .await
            .unwrap_err();
        assert!(err.is_decode());
    }
}
