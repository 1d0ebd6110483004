pub mod discord;
pub mod media;
pub mod prepare;
pub mod state;
pub mod ultra;
pub mod worker;

pub use media::*;
pub use state::*;
pub use ultra::{UltraUploader, UltraUploaderOptions};
