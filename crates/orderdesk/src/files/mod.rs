//! Files entering and leaving an order: uploads, conversion outputs and
//! their removal.

pub mod detect;
pub mod intake;

pub use detect::{detect_file_type, FileType};
pub use intake::{
    unique_filename, ClearConversionsReport, ConversionOrigin, ConversionReport, FileIntake, RemovalReport,
    UploadReceipt,
};
