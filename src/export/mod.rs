//! Export of separated stems and the JSON run manifest

pub mod json;
pub mod wav;

pub use json::{
    read_existing_separations, read_existing_tracks, write_run_manifest, TrackRecord,
    RUN_MANIFEST_FILENAME,
};
pub use wav::{stem_file_name, write_stem, write_stems, BitDepth};
