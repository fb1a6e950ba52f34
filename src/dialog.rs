use std::path::PathBuf;

use bevy_derive::Deref;
use bevy_ecs::prelude::*;
use bevy_log::{error, info, warn};
use bevy_tasks::prelude::*;
use crossbeam_channel::{Receiver, Sender};
use rfd::AsyncFileDialog;

use crate::{ImportSettings, PathLabel};

/// Filters offered by the open file dialog, as `(name, extensions)`.
pub const DIALOG_FILTERS: &[(&str, &[&str])] = &[
    ("All Files", &["*"]),
    ("Images", &["jpg", "png"]),
    ("Audio", &["mp3"]),
    ("Video", &["mp4"]),
];

/// Event that gets sent when file path gets selected from file system.
#[derive(Event, Debug, Clone)]
pub struct FilePicked {
    /// Path of picked file.
    pub path: PathBuf,
}

/// Event that gets sent when user closes the open file dialog without picking
/// any file.
#[derive(Event, Debug, Clone, Default)]
pub struct FilePickCanceled;

pub(crate) enum DialogResult {
    Picked(PathBuf),
    Canceled,
}

#[derive(Resource, Deref)]
pub(crate) struct DialogSender(pub(crate) Sender<DialogResult>);

#[derive(Resource, Deref)]
pub(crate) struct DialogReceiver(pub(crate) Receiver<DialogResult>);

#[derive(Resource, Default)]
pub(crate) struct DialogState {
    open: bool,
}

fn build_dialog(settings: &ImportSettings) -> AsyncFileDialog {
    let mut dialog = AsyncFileDialog::new().set_title(&settings.title);
    if let Some(directory) = &settings.directory {
        dialog = dialog.set_directory(directory);
    }
    for (name, extensions) in DIALOG_FILTERS {
        dialog = dialog.add_filter(*name, *extensions);
    }
    dialog
}

/// Command opening the dialog on the async compute pool, the result is
/// received by [`handle_dialog_result`].
pub(crate) fn open_file_browser(world: &mut World) {
    let (Some(sender), Some(settings)) = (
        world.get_resource::<DialogSender>(),
        world.get_resource::<ImportSettings>(),
    ) else {
        error!("MediaImportPlugin is not added to the app");
        return;
    };
    let sender = sender.0.clone();
    let dialog = build_dialog(settings);

    let mut state = world.resource_mut::<DialogState>();
    if state.open {
        warn!("Open file dialog is already open");
        return;
    }
    state.open = true;

    AsyncComputeTaskPool::get()
        .spawn(async move {
            let result = match dialog.pick_file().await {
                Some(file) => DialogResult::Picked(file.path().to_path_buf()),
                None => DialogResult::Canceled,
            };
            if sender.send(result).is_err() {
                warn!("Open file dialog result dropped, app is shutting down");
            }
        })
        .detach();
}

pub(crate) fn handle_dialog_result(
    receiver: Res<DialogReceiver>,
    mut state: ResMut<DialogState>,
    mut ev_picked: EventWriter<FilePicked>,
    mut ev_canceled: EventWriter<FilePickCanceled>,
) {
    for result in receiver.try_iter() {
        state.open = false;
        match result {
            DialogResult::Picked(path) => {
                info!("File picked: {}", path.display());
                ev_picked.send(FilePicked { path });
            }
            DialogResult::Canceled => {
                info!("Open file dialog closed");
                ev_canceled.send_default();
            }
        }
    }
}

/// Echo every picked path into the host's [`PathLabel`]s.
pub(crate) fn update_path_labels(
    mut ev_picked: EventReader<FilePicked>,
    mut labels: Query<&mut PathLabel>,
) {
    for ev in ev_picked.read() {
        for mut label in &mut labels {
            label.0 = ev.path.display().to_string();
        }
    }
}
