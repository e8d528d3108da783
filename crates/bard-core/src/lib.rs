pub mod audio_graph;
pub mod audio_params;
pub mod buffer_pool;
mod contract;
pub mod debounce;
pub mod engine;
pub mod event_source;
pub mod flags;
pub mod ipc;
pub mod performance;
pub mod playback;
pub mod render;
pub mod router;
pub mod settings;

pub use audio_graph::*;
pub use audio_params::*;
pub use buffer_pool::*;
pub use debounce::*;
pub use engine::*;
pub use event_source::*;
pub use flags::*;
pub use ipc::*;
pub use performance::*;
pub use playback::*;
pub use render::*;
pub use router::*;
pub use settings::*;
