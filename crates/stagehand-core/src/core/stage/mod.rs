//! Local staging: the version marker, the on-disk layout and the unpack worker.

pub mod layout;
pub mod unpack;
pub mod version_gate;

pub use layout::{StagingLayout, WORKSPACE_DIR};
pub use unpack::{
    clean_staging_dir, extract_archive, ExtractionError, UnpackReport, UnpackWorker,
};
pub use version_gate::check_and_update;
