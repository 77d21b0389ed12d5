mod device;
mod loader;
mod resources;
mod traits;

pub mod blip;

pub use device::device;
pub use image;
pub use resources::ModelSource;
pub use tokenizers;
pub use traits::*;

use tokio::sync::oneshot;

pub type HandlerPayload<TItem, TOutput> = (
    Vec<TItem>,
    oneshot::Sender<anyhow::Result<Vec<anyhow::Result<TOutput>>>>,
);
