use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};

use bevy_ecs::prelude::*;
use bevy_log::info;

use crate::import::PendingDispatch;

/// Handler an imported file gets routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// Decoded and shown on the [`ImageDisplay`](crate::ImageDisplay) surface.
    Image,
    /// Played through the [`AudioOutput`](crate::AudioOutput) entity.
    Audio,
    /// Played by the [`VideoPlayer`](crate::VideoPlayer).
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MediaKind::Image => "image",
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        })
    }
}

/// File formats the plugin knows how to display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaFormat {
    /// `.jpg` image.
    Jpg,
    /// `.png` image.
    Png,
    /// `.mp3` audio.
    Mp3,
    /// `.mp4` video.
    Mp4,
}

impl MediaFormat {
    /// Parse a file extension without the leading dot. Letter case is
    /// ignored, spelling is not: `JPG` is [`MediaFormat::Jpg`], `jpeg` is
    /// unknown.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_lowercase().as_str() {
            "jpg" => Some(MediaFormat::Jpg),
            "png" => Some(MediaFormat::Png),
            "mp3" => Some(MediaFormat::Mp3),
            "mp4" => Some(MediaFormat::Mp4),
            _ => None,
        }
    }

    /// Handler files of this format are routed to.
    pub fn kind(self) -> MediaKind {
        match self {
            MediaFormat::Jpg | MediaFormat::Png => MediaKind::Image,
            MediaFormat::Mp3 => MediaKind::Audio,
            MediaFormat::Mp4 => MediaKind::Video,
        }
    }
}

/// Outcome of classifying an imported file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Supported format, handled by the handler of this kind.
    Media(MediaKind),
    /// Unknown or missing extension, no handler runs.
    Unsupported,
}

/// Classify `path` by its extension.
pub fn classify(path: &Path) -> Route {
    path.extension()
        .and_then(OsStr::to_str)
        .and_then(MediaFormat::from_extension)
        .map_or(Route::Unsupported, |format| Route::Media(format.kind()))
}

/// Event that gets sent when an imported file gets handed to the handler of
/// its kind.
#[derive(Event, Debug, Clone)]
pub struct MediaRouted {
    /// Path of the imported file.
    pub path: PathBuf,

    /// Handler the file is routed to.
    pub kind: MediaKind,
}

/// Event that gets sent when an imported file has an extension no handler
/// accepts.
#[derive(Event, Debug, Clone)]
pub struct UnsupportedMedia {
    /// Path of the imported file.
    pub path: PathBuf,
}

pub(crate) fn dispatch_imported(
    mut pending: ResMut<PendingDispatch>,
    mut ev_routed: EventWriter<MediaRouted>,
    mut ev_unsupported: EventWriter<UnsupportedMedia>,
) {
    for path in pending.0.drain(..) {
        match classify(&path) {
            Route::Media(kind) => {
                info!("Dispatching {} as {kind}", path.display());
                ev_routed.send(MediaRouted { path, kind });
            }
            Route::Unsupported => {
                info!("Unsupported file type: {}", path.display());
                ev_unsupported.send(UnsupportedMedia { path });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bevy_app::prelude::*;

    use super::*;

    #[test]
    fn supported_extensions_route_to_one_kind() {
        let cases = [
            ("/app/data/photo.jpg", MediaKind::Image),
            ("/app/data/photo.png", MediaKind::Image),
            ("/app/data/song.mp3", MediaKind::Audio),
            ("/app/data/clip.mp4", MediaKind::Video),
        ];
        for (path, kind) in cases {
            assert_eq!(classify(Path::new(path)), Route::Media(kind), "{path}");
        }
    }

    #[test]
    fn extension_is_lower_cased_before_matching() {
        assert_eq!(
            classify(Path::new("/tmp/PHOTO.JPG")),
            Route::Media(MediaKind::Image)
        );
        assert_eq!(
            classify(Path::new("/tmp/clip.Mp4")),
            Route::Media(MediaKind::Video)
        );
    }

    #[test]
    fn other_extensions_are_unsupported() {
        for path in ["a.jpeg", "a.JPEG", "a.wav", "a.txt", "a", ".png", "a.png.bak"] {
            assert_eq!(classify(Path::new(path)), Route::Unsupported, "{path}");
        }
    }

    #[test]
    fn dispatch_drains_pending_in_order() {
        let mut app = App::new();
        app.insert_resource(PendingDispatch(vec![
            PathBuf::from("/data/a.png"),
            PathBuf::from("/data/b.txt"),
            PathBuf::from("/data/c.mp3"),
        ]))
        .add_event::<MediaRouted>()
        .add_event::<UnsupportedMedia>()
        .add_systems(PreUpdate, dispatch_imported);

        app.update();

        assert!(app.world().resource::<PendingDispatch>().0.is_empty());
        let routed: Vec<_> = app
            .world_mut()
            .resource_mut::<Events<MediaRouted>>()
            .drain()
            .map(|ev| ev.kind)
            .collect();
        assert_eq!(routed, [MediaKind::Image, MediaKind::Audio]);
        let unsupported: Vec<_> = app
            .world_mut()
            .resource_mut::<Events<UnsupportedMedia>>()
            .drain()
            .map(|ev| ev.path)
            .collect();
        assert_eq!(unsupported, [PathBuf::from("/data/b.txt")]);
    }
}
