use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bevy_asset::Assets;
use bevy_audio::{AudioPlayer, AudioSink, AudioSource, PlaybackSettings};
use bevy_ecs::prelude::*;
use bevy_log::{error, info};
use bevy_tasks::{block_on, futures_lite::future, IoTaskPool, Task};
use bevy_time::{Real, Time, Timer, TimerMode};
use thiserror::Error;
use url::Url;

use crate::{AudioOutput, ImportSettings, MediaKind, MediaLoadFailed, MediaReady, MediaRouted};

#[derive(Debug, Error)]
pub enum AudioLoadError {
    #[error("cannot read {url}: {source}")]
    Read { url: String, source: io::Error },
    #[error("{url} is empty")]
    Empty { url: String },
    #[error("loading {url} timed out after {timeout:?}")]
    TimedOut { url: String, timeout: Duration },
}

/// `file://` URL audio files get fetched from. Relative paths, which have no
/// URL form, fall back to the plain display form.
pub fn file_url(path: &Path) -> String {
    Url::from_file_path(path)
        .map(String::from)
        .unwrap_or_else(|()| format!("file://{}", path.display()))
}

fn read_audio(path: &Path) -> Result<Vec<u8>, AudioLoadError> {
    let bytes = fs::read(path).map_err(|source| AudioLoadError::Read {
        url: file_url(path),
        source,
    })?;
    if bytes.is_empty() {
        return Err(AudioLoadError::Empty {
            url: file_url(path),
        });
    }
    Ok(bytes)
}

struct AudioLoad {
    path: PathBuf,
    output: Entity,
    task: Task<Result<Vec<u8>, AudioLoadError>>,
    deadline: Timer,
}

/// Audio file currently being fetched. At most one load is pending, starting
/// another one cancels it.
#[derive(Resource, Default)]
pub struct AudioLoader {
    pending: Option<AudioLoad>,
}

impl AudioLoader {
    /// Path of the file currently being fetched.
    pub fn loading(&self) -> Option<&Path> {
        self.pending.as_ref().map(|load| load.path.as_path())
    }

    /// Cancel the pending load, returns whether there was one.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(load) => {
                info!("Canceled loading {}", file_url(&load.path));
                true
            }
            None => false,
        }
    }

    fn start(&mut self, path: PathBuf, output: Entity, timeout: Duration) {
        self.cancel();
        let url = file_url(&path);
        info!("Loading audio from {url}");

        let source = path.clone();
        let task = IoTaskPool::get().spawn(async move { read_audio(&source) });
        self.pending = Some(AudioLoad {
            path,
            output,
            task,
            deadline: Timer::new(timeout, TimerMode::Once),
        });
    }
}

pub(crate) fn load_audio(
    mut ev_routed: EventReader<MediaRouted>,
    outputs: Query<Entity, With<AudioOutput>>,
    settings: Res<ImportSettings>,
    mut loader: ResMut<AudioLoader>,
) {
    for ev in ev_routed.read().filter(|ev| ev.kind == MediaKind::Audio) {
        let Ok(output) = outputs.get_single() else {
            error!("No AudioOutput assigned for playing audio");
            continue;
        };
        loader.start(ev.path.clone(), output, settings.audio_timeout);
    }
}

pub(crate) fn poll_audio_loads(
    mut commands: Commands,
    time: Res<Time<Real>>,
    mut loader: ResMut<AudioLoader>,
    mut sources: ResMut<Assets<AudioSource>>,
    mut ev_ready: EventWriter<MediaReady>,
    mut ev_failed: EventWriter<MediaLoadFailed>,
) {
    let Some(mut load) = loader.pending.take() else {
        return;
    };

    let result = match block_on(future::poll_once(&mut load.task)) {
        Some(result) => result,
        None if load.deadline.tick(time.delta()).finished() => {
            Err(AudioLoadError::TimedOut {
                url: file_url(&load.path),
                timeout: load.deadline.duration(),
            })
        }
        None => {
            loader.pending = Some(load);
            return;
        }
    };

    match result {
        Ok(bytes) => {
            let Some(mut output) = commands.get_entity(load.output) else {
                error!("AudioOutput was removed while loading {}", load.path.display());
                return;
            };
            let handle = sources.add(AudioSource {
                bytes: bytes.into(),
            });
            output
                .remove::<AudioSink>()
                .insert((AudioPlayer(handle), PlaybackSettings::ONCE));
            info!("Playing {}", load.path.display());
            ev_ready.send(MediaReady {
                path: load.path,
                kind: MediaKind::Audio,
            });
        }
        Err(err) => {
            error!("Failed to load audio: {err}");
            ev_failed.send(MediaLoadFailed {
                path: load.path,
                kind: MediaKind::Audio,
                reason: err.to_string(),
            });
        }
    }
}
