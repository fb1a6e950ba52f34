use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bevy_asset::{Assets, RenderAssetUsages};
use bevy_ecs::prelude::*;
use bevy_image::Image;
use bevy_log::{error, info};
use thiserror::Error;

use crate::{DisplaySurface, ImageDisplay, MediaKind, MediaLoadFailed, MediaReady, MediaRouted};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("cannot read {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Image(#[from] image::ImageError),
}

/// Decode `bytes` into a texture. The format is detected from the content,
/// not from the file name.
pub fn decode_image(bytes: &[u8]) -> Result<Image, DecodeError> {
    let decoded = image::load_from_memory(bytes)?;
    Ok(Image::from_dynamic(
        decoded,
        true,
        RenderAssetUsages::default(),
    ))
}

/// Read and decode the image file at `path`.
pub fn load_texture(path: &Path) -> Result<Image, DecodeError> {
    let bytes = fs::read(path).map_err(|source| DecodeError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    decode_image(&bytes)
}

pub(crate) fn display_image(
    mut ev_routed: EventReader<MediaRouted>,
    mut surfaces: Query<&mut DisplaySurface, With<ImageDisplay>>,
    mut images: ResMut<Assets<Image>>,
    mut ev_ready: EventWriter<MediaReady>,
    mut ev_failed: EventWriter<MediaLoadFailed>,
) {
    for ev in ev_routed.read().filter(|ev| ev.kind == MediaKind::Image) {
        let Ok(mut surface) = surfaces.get_single_mut() else {
            error!("No ImageDisplay assigned for displaying images");
            continue;
        };

        match load_texture(&ev.path) {
            Ok(image) => {
                info!(
                    "Displaying {} ({}x{})",
                    ev.path.display(),
                    image.width(),
                    image.height()
                );
                surface.texture = Some(images.add(image));
                ev_ready.send(MediaReady {
                    path: ev.path.clone(),
                    kind: MediaKind::Image,
                });
            }
            Err(err) => {
                error!("Failed to display {}: {err}", ev.path.display());
                ev_failed.send(MediaLoadFailed {
                    path: ev.path.clone(),
                    kind: MediaKind::Image,
                    reason: err.to_string(),
                });
            }
        }
    }
}
