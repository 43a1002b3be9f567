pub mod labeler;

pub use labeler::{ExportResult, Failure, VideoLabeler};
