pub mod player;

pub use player::{Notifier, PlaybackController, PlayerState};
