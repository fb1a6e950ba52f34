//! This example demonstrates picking a media file and showing it.
//!
//! Press Ctrl+O to open the file dialog. Images are shown as a sprite on the
//! left, videos on the right (requires `ffmpeg` and `ffprobe` on `PATH`), mp3
//! files start playing.

use bevy::prelude::*;
use bevy_media_import::prelude::*;

fn main() {
    App::new()
        .add_plugins(DefaultPlugins)
        .add_plugins(
            MediaImportPlugin::new("bevy_media_import_demo")
                .with_title("Import media")
                .with_conflict_policy(ConflictPolicy::Rename),
        )
        .add_systems(Startup, setup)
        .add_systems(Update, (open, mirror_surfaces, print_events))
        .run();
}

fn setup(mut commands: Commands) {
    commands.spawn(Camera2d);
    commands.spawn((ImageDisplay, Sprite::default(), Transform::from_xyz(-320.0, 0.0, 0.0)));
    commands.spawn((
        VideoDisplay,
        VideoPlayer::default(),
        Sprite::default(),
        Transform::from_xyz(320.0, 0.0, 0.0),
    ));
    commands.spawn(AudioOutput);
    commands.spawn((PathLabel::default(), Text::new("Ctrl+O to open a file")));
}

fn open(mut commands: Commands, keys: Res<ButtonInput<KeyCode>>) {
    if keys.any_pressed([KeyCode::ControlLeft, KeyCode::ControlRight])
        && keys.just_pressed(KeyCode::KeyO)
    {
        commands.open_file_browser();
    }
}

fn mirror_surfaces(
    mut sprites: Query<(&DisplaySurface, &mut Sprite), Changed<DisplaySurface>>,
    mut labels: Query<(&PathLabel, &mut Text), Changed<PathLabel>>,
) {
    for (surface, mut sprite) in &mut sprites {
        if let Some(texture) = &surface.texture {
            sprite.image = texture.clone();
        }
    }
    for (label, mut text) in &mut labels {
        text.0 = label.0.clone();
    }
}

fn print_events(
    mut ev_ready: EventReader<MediaReady>,
    mut ev_failed: EventReader<MediaLoadFailed>,
    mut ev_unsupported: EventReader<UnsupportedMedia>,
) {
    for ev in ev_ready.read() {
        eprintln!("Showing {} {}", ev.kind, ev.path.display());
    }
    for ev in ev_failed.read() {
        eprintln!("Failed to show {}: {}", ev.path.display(), ev.reason);
    }
    for ev in ev_unsupported.read() {
        eprintln!("Unsupported file {}", ev.path.display());
    }
}
