pub mod ingest;
pub mod inspect;
pub mod matching;
pub mod project;
pub mod status;
pub mod util;

pub use ingest::*;
pub use inspect::*;
pub use matching::*;
pub use project::*;
pub use status::*;
pub use util::*;
