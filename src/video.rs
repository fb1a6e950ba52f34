use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bevy_asset::{Assets, Handle, RenderAssetUsages};
use bevy_derive::Deref;
use bevy_ecs::prelude::*;
use bevy_image::Image;
use bevy_log::{error, info, warn};
use bevy_tasks::{block_on, futures_lite::future, AsyncComputeTaskPool, Task};
use bevy_time::{Time, Timer, TimerMode};
use crossbeam_channel::{Receiver, TryRecvError};
use image::{DynamicImage, RgbaImage};
use thiserror::Error;

use crate::{DisplaySurface, MediaKind, MediaLoadFailed, MediaReady, MediaRouted, VideoDisplay};

#[derive(Debug, Error)]
pub enum VideoError {
    #[error("cannot run {program}: {source}")]
    Spawn {
        program: String,
        source: io::Error,
    },
    #[error("{program} failed: {stderr}")]
    Failed { program: String, stderr: String },
    #[error("cannot parse probe output: {0}")]
    Probe(#[from] serde_json::Error),
    #[error("{} has no video stream", .0.display())]
    NoVideoStream(PathBuf),
}

/// Properties of a video stream found while preparing it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    /// Duration in seconds, zero when unknown.
    pub duration: f64,
}

/// One decoded RGBA frame.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Frames of a playing video. Dropping the stream stops the decoder.
#[derive(Debug)]
pub struct FrameStream {
    frames: Receiver<VideoFrame>,
    frame_rate: f64,
}

impl FrameStream {
    pub fn new(frames: Receiver<VideoFrame>, frame_rate: f64) -> Self {
        Self { frames, frame_rate }
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }
}

/// Decoder the video handler prepares and plays videos with.
pub trait VideoDecoder: Send + Sync + 'static {
    /// Inspect the video at `path`. Runs on the async compute pool.
    fn prepare(&self, path: &Path) -> Result<VideoInfo, VideoError>;

    /// Start decoding the prepared video at `path`.
    fn start(&self, path: &Path, info: &VideoInfo) -> Result<FrameStream, VideoError>;
}

#[derive(Resource, Deref)]
pub(crate) struct VideoBackend(pub(crate) Arc<dyn VideoDecoder>);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VideoState {
    /// Nothing loaded, either before the first video or after a stop.
    #[default]
    Idle,
    /// The video is being probed in the background.
    Preparing,
    /// Frames are being rendered into the output texture.
    Playing,
    /// The frame stream ended.
    Finished,
    /// Preparing or starting the video failed.
    Failed,
}

/// Video playback object. Plays the video routed to it and renders the frames
/// into [`VideoPlayer::output`], which gets bound to the [`VideoDisplay`]
/// surface once the video is prepared.
#[derive(Component, Default)]
pub struct VideoPlayer {
    url: Option<PathBuf>,
    state: VideoState,
    output: Option<Handle<Image>>,
    pending: Option<Task<Result<VideoInfo, VideoError>>>,
    stream: Option<FrameStream>,
    frame_timer: Timer,
}

impl VideoPlayer {
    /// Path of the video the player is sourced from.
    pub fn url(&self) -> Option<&Path> {
        self.url.as_deref()
    }

    pub fn state(&self) -> VideoState {
        self.state
    }

    /// Texture the decoded frames are rendered into.
    pub fn output(&self) -> Option<&Handle<Image>> {
        self.output.as_ref()
    }

    pub fn is_preparing(&self) -> bool {
        self.pending.is_some()
    }

    /// Stop playback and cancel a pending prepare.
    pub fn stop(&mut self) {
        self.pending = None;
        self.stream = None;
        self.state = VideoState::Idle;
    }

    fn prepare(&mut self, path: PathBuf, decoder: Arc<dyn VideoDecoder>) {
        if self.pending.is_some() {
            info!(
                "Canceled preparing {}",
                self.url.as_deref().unwrap_or(Path::new("")).display()
            );
        }
        self.stop();

        let source = path.clone();
        self.pending = Some(
            AsyncComputeTaskPool::get().spawn(async move { decoder.prepare(&source) }),
        );
        self.url = Some(path);
        self.state = VideoState::Preparing;
    }
}

pub(crate) fn prepare_video(
    mut ev_routed: EventReader<MediaRouted>,
    displays: Query<Entity, With<VideoDisplay>>,
    mut players: Query<&mut VideoPlayer>,
    backend: Res<VideoBackend>,
) {
    for ev in ev_routed.read().filter(|ev| ev.kind == MediaKind::Video) {
        let (Ok(_), Ok(mut player)) = (displays.get_single(), players.get_single_mut()) else {
            error!("VideoDisplay or VideoPlayer is not assigned");
            continue;
        };
        info!("Preparing video {}", ev.path.display());
        player.prepare(ev.path.clone(), backend.0.clone());
    }
}

/// Runs the completion of finished prepares: binds the player's output to the
/// video surface and starts playback.
pub(crate) fn poll_video_prepare(
    mut players: Query<&mut VideoPlayer>,
    mut surfaces: Query<&mut DisplaySurface, With<VideoDisplay>>,
    mut images: ResMut<Assets<Image>>,
    backend: Res<VideoBackend>,
    mut ev_ready: EventWriter<MediaReady>,
    mut ev_failed: EventWriter<MediaLoadFailed>,
) {
    for mut player in &mut players {
        let Some(task) = player.pending.as_mut() else {
            continue;
        };
        let Some(result) = block_on(future::poll_once(task)) else {
            continue;
        };
        player.pending = None;
        let Some(path) = player.url.clone() else {
            continue;
        };

        let started = result.and_then(|info| {
            let stream = backend.start(&path, &info)?;
            Ok((info, stream))
        });
        match started {
            Ok((info, stream)) => {
                let player = &mut *player;
                let output = player
                    .output
                    .get_or_insert_with(|| images.add(Image::default()))
                    .clone();
                match surfaces.get_single_mut() {
                    Ok(mut surface) => surface.texture = Some(output),
                    Err(_) => warn!("VideoDisplay was removed while preparing"),
                }
                player.frame_timer = Timer::from_seconds(
                    (1.0 / stream.frame_rate().max(1.0)) as f32,
                    TimerMode::Repeating,
                );
                player.stream = Some(stream);
                player.state = VideoState::Playing;
                info!(
                    "Playing {} ({}x{}, {:.2} fps)",
                    path.display(),
                    info.width,
                    info.height,
                    info.frame_rate
                );
                ev_ready.send(MediaReady {
                    path,
                    kind: MediaKind::Video,
                });
            }
            Err(err) => {
                player.state = VideoState::Failed;
                error!("Failed to prepare {}: {err}", path.display());
                ev_failed.send(MediaLoadFailed {
                    path,
                    kind: MediaKind::Video,
                    reason: err.to_string(),
                });
            }
        }
    }
}

fn frame_image(frame: VideoFrame) -> Option<Image> {
    let rgba = RgbaImage::from_raw(frame.width, frame.height, frame.data)?;
    Some(Image::from_dynamic(
        DynamicImage::ImageRgba8(rgba),
        true,
        RenderAssetUsages::default(),
    ))
}

pub(crate) fn stream_video_frames(
    time: Res<Time>,
    mut players: Query<&mut VideoPlayer>,
    mut images: ResMut<Assets<Image>>,
) {
    for mut player in &mut players {
        if player.state != VideoState::Playing {
            continue;
        }
        let player = &mut *player;
        if player.frame_timer.tick(time.delta()).times_finished_this_tick() == 0 {
            continue;
        }
        let (Some(stream), Some(output)) = (&player.stream, &player.output) else {
            continue;
        };

        // Frames that arrived while the app was stalled get skipped.
        let mut latest = None;
        let mut ended = false;
        for _ in 0..player.frame_timer.times_finished_this_tick() {
            match stream.frames.try_recv() {
                Ok(frame) => latest = Some(frame),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    ended = true;
                    break;
                }
            }
        }

        if let Some(frame) = latest {
            match frame_image(frame) {
                Some(image) => {
                    images.insert(output, image);
                }
                None => warn!("Dropped malformed video frame"),
            }
        }
        if ended {
            info!(
                "Finished playing {}",
                player.url.as_deref().unwrap_or(Path::new("")).display()
            );
            player.stream = None;
            player.state = VideoState::Finished;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bevy_app::prelude::*;
    use bevy_tasks::TaskPool;
    use crossbeam_channel::bounded;

    use super::*;

    struct FakeDecoder;

    impl VideoDecoder for FakeDecoder {
        fn prepare(&self, _path: &Path) -> Result<VideoInfo, VideoError> {
            Ok(VideoInfo {
                width: 2,
                height: 1,
                frame_rate: 10.0,
                duration: 1.0,
            })
        }

        fn start(&self, _path: &Path, info: &VideoInfo) -> Result<FrameStream, VideoError> {
            let (tx, rx) = bounded(1);
            tx.send(VideoFrame {
                width: info.width,
                height: info.height,
                data: vec![255; 8],
            })
            .unwrap();
            Ok(FrameStream::new(rx, info.frame_rate))
        }
    }

    fn app() -> App {
        AsyncComputeTaskPool::get_or_init(TaskPool::new);
        let mut app = App::new();
        app.insert_resource(Time::<()>::default())
            .insert_resource(VideoBackend(Arc::new(FakeDecoder)))
            .init_resource::<Assets<Image>>()
            .add_event::<MediaReady>()
            .add_event::<MediaLoadFailed>()
            .add_systems(Update, (poll_video_prepare, stream_video_frames).chain());
        app
    }

    fn wait_until_playing(app: &mut App, player: Entity) {
        for _ in 0..500 {
            app.update();
            if app.world().get::<VideoPlayer>(player).unwrap().state() != VideoState::Preparing {
                return;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        panic!("video never finished preparing");
    }

    #[test]
    fn prepare_completion_binds_output_and_plays() {
        let mut app = app();
        let display = app.world_mut().spawn(VideoDisplay).id();
        let decoder = app.world().resource::<VideoBackend>().0.clone();
        let mut player = VideoPlayer::default();
        player.prepare(PathBuf::from("/app/data/clip.mp4"), decoder);
        let player = app.world_mut().spawn(player).id();

        wait_until_playing(&mut app, player);

        let player = app.world().get::<VideoPlayer>(player).unwrap();
        assert_eq!(player.state(), VideoState::Playing);
        let surface = app.world().get::<DisplaySurface>(display).unwrap();
        assert_eq!(surface.texture.as_ref(), player.output());
        assert!(player.output().is_some());
    }

    #[test]
    fn frames_are_uploaded_into_output() {
        let mut app = app();
        app.world_mut().spawn(VideoDisplay);
        let decoder = app.world().resource::<VideoBackend>().0.clone();
        let mut player = VideoPlayer::default();
        player.prepare(PathBuf::from("/app/data/clip.mp4"), decoder);
        let player = app.world_mut().spawn(player).id();
        wait_until_playing(&mut app, player);

        app.world_mut()
            .resource_mut::<Time>()
            .advance_by(Duration::from_millis(100));
        app.update();

        let output = app
            .world()
            .get::<VideoPlayer>(player)
            .unwrap()
            .output()
            .cloned()
            .unwrap();
        let image = app.world().resource::<Assets<Image>>().get(&output).unwrap();
        assert_eq!((image.width(), image.height()), (2, 1));

        // The fake stream holds a single frame, the sender is gone by now.
        app.update();
        assert_eq!(
            app.world().get::<VideoPlayer>(player).unwrap().state(),
            VideoState::Finished
        );
    }

    #[test]
    fn preparing_again_replaces_pending_prepare() {
        AsyncComputeTaskPool::get_or_init(TaskPool::new);
        let decoder: Arc<dyn VideoDecoder> = Arc::new(FakeDecoder);
        let mut player = VideoPlayer::default();

        player.prepare(PathBuf::from("/data/first.mp4"), decoder.clone());
        player.prepare(PathBuf::from("/data/second.mp4"), decoder);

        assert!(player.is_preparing());
        assert_eq!(player.url(), Some(Path::new("/data/second.mp4")));
        assert_eq!(player.state(), VideoState::Preparing);

        player.stop();
        assert!(!player.is_preparing());
        assert_eq!(player.state(), VideoState::Idle);
    }

    #[test]
    fn malformed_frame_is_rejected() {
        let frame = VideoFrame {
            width: 4,
            height: 4,
            data: vec![0; 3],
        };
        assert!(frame_image(frame).is_none());
    }
}
