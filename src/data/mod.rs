//! Result persistence: encoding datasets and placing result files.

pub mod hdf5_writer;
pub mod output;
pub mod result_writer;

pub use hdf5_writer::Hdf5Container;
pub use output::result_file_path;
pub use result_writer::{
    EncodedDataset, MemoryContainer, ResultContainer, ResultSerializer, TypeCode, BOOL_MARKER,
    INT_MARKER,
};
