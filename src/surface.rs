//! Components the host spawns for the plugin to write into.

use bevy_asset::Handle;
use bevy_derive::{Deref, DerefMut};
use bevy_ecs::prelude::*;
use bevy_image::Image;

/// Texture slot of a display surface. The host mirrors `texture` into
/// whatever actually renders it (a `Sprite`, an `ImageNode`, a material).
#[derive(Component, Debug, Default, Clone)]
pub struct DisplaySurface {
    pub texture: Option<Handle<Image>>,
}

/// Marks the surface imported images get displayed on.
#[derive(Component, Debug, Default, Clone, Copy)]
#[require(DisplaySurface)]
pub struct ImageDisplay;

/// Marks the surface imported videos get displayed on.
#[derive(Component, Debug, Default, Clone, Copy)]
#[require(DisplaySurface)]
pub struct VideoDisplay;

/// Marks the entity imported audio gets played through.
#[derive(Component, Debug, Default, Clone, Copy)]
pub struct AudioOutput;

/// Text label echoing the path of the last picked file.
#[derive(Component, Debug, Default, Clone, Deref, DerefMut)]
pub struct PathLabel(pub String);
