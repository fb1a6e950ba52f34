//! Pick a file with a native dialog, import it into the application's storage
//! directory and show it on a display surface according to its type.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bevy_app::prelude::*;
use bevy_ecs::prelude::*;
use crossbeam_channel::bounded;

mod audio;
mod dialog;
mod dispatch;
mod ffmpeg;
mod import;
mod surface;
mod texture;
mod video;

pub use audio::{file_url, AudioLoadError, AudioLoader};
pub use dialog::{FilePickCanceled, FilePicked, DIALOG_FILTERS};
pub use dispatch::{classify, MediaFormat, MediaKind, MediaRouted, Route, UnsupportedMedia};
pub use ffmpeg::FfmpegDecoder;
pub use import::{import_file, ConflictPolicy, FileImported, ImportError, ImportFailed};
pub use surface::{AudioOutput, DisplaySurface, ImageDisplay, PathLabel, VideoDisplay};
pub use texture::{decode_image, load_texture, DecodeError};
pub use video::{
    FrameStream, VideoDecoder, VideoError, VideoFrame, VideoInfo, VideoPlayer, VideoState,
};

use dialog::{DialogReceiver, DialogResult, DialogSender, DialogState};
use import::PendingDispatch;
use video::VideoBackend;

pub mod prelude {
    //! Prelude for the media import plugin.
    pub use crate::{
        AudioOutput, ConflictPolicy, DisplaySurface, FileImported, FilePickCanceled, FilePicked,
        ImageDisplay, ImportCommandsExt, ImportFailed, ImportSettings, MediaImportPlugin,
        MediaKind, MediaLoadFailed, MediaReady, MediaRouted, PathLabel, UnsupportedMedia,
        VideoDisplay, VideoPlayer, VideoState,
    };
}

/// Event that gets sent when an imported file finished loading and is shown
/// on (or playing through) its surface.
#[derive(Event, Debug, Clone)]
pub struct MediaReady {
    /// Path of the imported file.
    pub path: PathBuf,

    /// Handler that displayed the file.
    pub kind: MediaKind,
}

/// Event that gets sent when a handler could not load an imported file. The
/// surface keeps whatever it displayed before.
#[derive(Event, Debug, Clone)]
pub struct MediaLoadFailed {
    /// Path of the imported file.
    pub path: PathBuf,

    /// Handler that failed.
    pub kind: MediaKind,

    /// Human readable failure reason.
    pub reason: String,
}

/// Runtime configuration of the import flow. Inserted by
/// [`MediaImportPlugin`], can be modified by systems afterwards.
#[derive(Resource, Debug, Clone)]
pub struct ImportSettings {
    /// Directory imported files are copied into.
    pub storage_root: PathBuf,

    /// What to do when a file with the same name was imported before.
    pub conflict_policy: ConflictPolicy,

    /// How long an audio load may take before it is abandoned.
    pub audio_timeout: Duration,

    /// Title of the open file dialog.
    pub title: String,

    /// Directory the open file dialog starts in.
    pub directory: Option<PathBuf>,
}

impl ImportSettings {
    /// Settings storing imported files in the per-user data directory of
    /// `app_name`.
    pub fn new(app_name: &str) -> Self {
        Self {
            storage_root: persistent_data_dir(app_name),
            conflict_policy: ConflictPolicy::default(),
            audio_timeout: Duration::from_secs(30),
            title: "Open File".to_string(),
            directory: None,
        }
    }
}

/// Per-user writable directory for `app_name`, falls back to a relative
/// directory when the platform has no such location.
pub fn persistent_data_dir(app_name: &str) -> PathBuf {
    dirs_next::data_local_dir()
        .unwrap_or_default()
        .join(app_name)
}

/// Add this plugin to Bevy App to pick, import and display media files.
///
/// The host spawns the surfaces the plugin writes into ([`PathLabel`],
/// [`ImageDisplay`], [`AudioOutput`], [`VideoDisplay`] and [`VideoPlayer`])
/// and starts the flow with [`ImportCommandsExt::open_file_browser`].
///
/// The app needs `Assets<Image>`, `Assets<AudioSource>`, `Time`, `Time<Real>`
/// and initialized task pools, all of which are provided by `DefaultPlugins`.
pub struct MediaImportPlugin {
    settings: ImportSettings,
    decoder: Arc<dyn VideoDecoder>,
}

impl MediaImportPlugin {
    /// Create the plugin, imported files are stored in the per-user data
    /// directory of `app_name`.
    pub fn new(app_name: impl AsRef<str>) -> Self {
        Self {
            settings: ImportSettings::new(app_name.as_ref()),
            decoder: Arc::new(FfmpegDecoder::default()),
        }
    }

    /// Store imported files in `root` instead of the per-user data directory.
    pub fn with_storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.settings.storage_root = root.into();
        self
    }

    /// Set what happens when an imported file name is already taken.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.settings.conflict_policy = policy;
        self
    }

    /// Set how long an audio file may load before it is abandoned.
    pub fn with_audio_timeout(mut self, timeout: Duration) -> Self {
        self.settings.audio_timeout = timeout;
        self
    }

    /// Set the title of the open file dialog.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.settings.title = title.into();
        self
    }

    /// Set the directory the open file dialog starts in.
    pub fn with_directory(mut self, directory: impl AsRef<Path>) -> Self {
        self.settings.directory = Some(directory.as_ref().to_path_buf());
        self
    }

    /// Decode videos with `decoder` instead of the ffmpeg command line tools.
    pub fn with_video_decoder(mut self, decoder: impl VideoDecoder) -> Self {
        self.decoder = Arc::new(decoder);
        self
    }

    /// Settings the plugin inserts into the app.
    pub fn settings(&self) -> &ImportSettings {
        &self.settings
    }
}

impl Plugin for MediaImportPlugin {
    fn build(&self, app: &mut App) {
        let (tx, rx) = bounded::<DialogResult>(1);
        app.insert_resource(self.settings.clone());
        app.insert_resource(DialogSender(tx));
        app.insert_resource(DialogReceiver(rx));
        app.insert_resource(VideoBackend(self.decoder.clone()));
        app.init_resource::<DialogState>();
        app.init_resource::<PendingDispatch>();
        app.init_resource::<AudioLoader>();
        app.add_event::<FilePicked>();
        app.add_event::<FilePickCanceled>();
        app.add_event::<FileImported>();
        app.add_event::<ImportFailed>();
        app.add_event::<MediaRouted>();
        app.add_event::<UnsupportedMedia>();
        app.add_event::<MediaReady>();
        app.add_event::<MediaLoadFailed>();
        // Imports staged during `Update` are dispatched in the next frame's
        // `PreUpdate`, which is the single yield between copy and dispatch.
        app.add_systems(
            PreUpdate,
            (
                dialog::handle_dialog_result,
                dialog::update_path_labels,
                dispatch::dispatch_imported,
            )
                .chain(),
        );
        app.add_systems(
            Update,
            (
                import::import_picked_files,
                (
                    texture::display_image,
                    audio::load_audio,
                    video::prepare_video,
                ),
                (
                    audio::poll_audio_loads,
                    video::poll_video_prepare,
                    video::stream_video_frames,
                )
                    .chain(),
            )
                .chain(),
        );
    }
}

/// Extension trait starting the import flow from [`Commands`].
pub trait ImportCommandsExt {
    /// Open the native open file dialog. The picked file gets imported and
    /// displayed, closing the dialog sends [`FilePickCanceled`].
    fn open_file_browser(&mut self);

    /// Import and display `path` as if it was picked in the dialog.
    fn import_path(&mut self, path: impl Into<PathBuf>);
}

impl ImportCommandsExt for Commands<'_, '_> {
    fn open_file_browser(&mut self) {
        self.queue(dialog::open_file_browser);
    }

    fn import_path(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        self.queue(move |world: &mut World| {
            world.send_event(FilePicked { path });
        });
    }
}
