//! HDF5 result files with clean feature flag handling.
//!
//! With `storage_hdf5` enabled, [`Hdf5Container`] writes each encoded dataset
//! into an HDF5 file. Without it, opening a container fails with
//! [`DaqError::FeatureNotEnabled`] so callers see a clear message instead of
//! silently losing results.

#[cfg(not(feature = "storage_hdf5"))]
use crate::error::DaqError;
use crate::error::AppResult;
use std::path::Path;

// ============================================================================
// HDF5 enabled
// ============================================================================

#[cfg(feature = "storage_hdf5")]
#[allow(unsafe_code)] // Raw HDF5 calls build the big-endian file types
mod hdf5_enabled {
    use super::*;
    use crate::data::result_writer::{EncodedDataset, ResultContainer, TypeCode};
    use crate::error::DaqError;
    use hdf5::File;
    use hdf5_sys::h5::{herr_t, hsize_t};
    use hdf5_sys::h5d::{H5Dclose, H5Dcreate2, H5Dwrite};
    use hdf5_sys::h5i::hid_t;
    use hdf5_sys::h5p::H5P_DEFAULT;
    use hdf5_sys::h5s::{H5S_class_t, H5Sclose, H5Screate, H5Screate_simple, H5S_ALL};
    use hdf5_sys::h5t::{
        H5T_str_t, H5Tclose, H5Tcopy, H5Tset_ebias, H5Tset_fields, H5Tset_size, H5Tset_strpad,
        H5T_C_S1, H5T_IEEE_F32BE, H5T_IEEE_F64BE, H5T_STD_I16BE, H5T_STD_I32BE, H5T_STD_I64BE,
        H5T_STD_I8BE, H5T_STD_U16BE, H5T_STD_U32BE, H5T_STD_U64BE, H5T_STD_U8BE,
    };
    use std::borrow::Cow;
    use std::ffi::CString;
    use std::os::raw::c_int;
    use std::path::PathBuf;
    use std::ptr;

    /// Result file on disk.
    ///
    /// Numeric datasets are created with the big-endian file type named by
    /// their [`TypeCode`] and receive the encoded bytes unchanged. Strings
    /// are fixed-length, null-padded ASCII datasets.
    pub struct Hdf5Container {
        file: File,
        path: PathBuf,
    }

    impl Hdf5Container {
        /// Create (or truncate) the file at `path`.
        pub fn create(path: impl AsRef<Path>) -> AppResult<Self> {
            let path = path.as_ref().to_path_buf();
            let file = File::create(&path)?;
            tracing::info!("HDF5 result file opened: {:?}", path);
            Ok(Self { file, path })
        }

        /// Location of the file.
        pub fn path(&self) -> &Path {
            &self.path
        }

        /// Flush and close the file.
        pub fn close(self) -> AppResult<()> {
            self.file.flush()?;
            Ok(())
        }

        fn write_encoded(&self, name: &str, encoded: &EncodedDataset) -> AppResult<()> {
            let elements: usize = encoded.shape.iter().product();
            if encoded.data.len() != encoded.type_code.size() * elements {
                return Err(DaqError::Storage(format!(
                    "dataset '{}': {} bytes do not match {:?} with shape {:?}",
                    name,
                    encoded.data.len(),
                    encoded.type_code,
                    encoded.shape
                )));
            }
            // HDF5 has no zero-length string type; an empty string is stored
            // as a single null byte.
            let data: Cow<'_, [u8]> = match encoded.type_code {
                TypeCode::FixedString(0) => Cow::Owned(vec![0u8; elements]),
                _ => Cow::Borrowed(&encoded.data),
            };
            let c_name = CString::new(name)
                .map_err(|e| DaqError::Storage(format!("dataset '{}': {}", name, e)))?;

            let dtype = file_type(encoded.type_code)?;
            let space = data_space(&encoded.shape)?;
            // SAFETY: every id passed below is live for the duration of the
            // call, and `data` holds exactly the number of bytes the file
            // type and data space describe.
            unsafe {
                let dataset = RawHandle::new(
                    H5Dcreate2(
                        self.file.id(),
                        c_name.as_ptr(),
                        dtype.0,
                        space.0,
                        H5P_DEFAULT,
                        H5P_DEFAULT,
                        H5P_DEFAULT,
                    ),
                    H5Dclose,
                    name,
                )?;
                check(
                    H5Dwrite(
                        dataset.0,
                        dtype.0,
                        H5S_ALL,
                        H5S_ALL,
                        H5P_DEFAULT,
                        data.as_ptr().cast(),
                    ),
                    name,
                )?;
            }
            Ok(())
        }
    }

    /// Owned HDF5 identifier, closed on drop.
    struct RawHandle(hid_t, unsafe extern "C" fn(hid_t) -> herr_t);

    impl RawHandle {
        fn new(
            id: hid_t,
            close: unsafe extern "C" fn(hid_t) -> herr_t,
            context: &str,
        ) -> AppResult<Self> {
            if id < 0 {
                return Err(DaqError::Storage(format!(
                    "dataset '{}': HDF5 call failed",
                    context
                )));
            }
            Ok(Self(id, close))
        }
    }

    impl Drop for RawHandle {
        fn drop(&mut self) {
            // SAFETY: the id was returned by a successful HDF5 call and is
            // closed exactly once.
            unsafe {
                (self.1)(self.0);
            }
        }
    }

    fn check(status: herr_t, context: &str) -> AppResult<()> {
        if status < 0 {
            return Err(DaqError::Storage(format!(
                "dataset '{}': HDF5 call failed",
                context
            )));
        }
        Ok(())
    }

    /// Big-endian file type for `code`.
    fn file_type(code: TypeCode) -> AppResult<RawHandle> {
        let context = "<type>";
        // SAFETY: the library is initialised by `File::create`; the
        // predefined types are only copied, never modified.
        unsafe {
            let base = match code {
                TypeCode::I8Be => *H5T_STD_I8BE,
                TypeCode::I16Be => *H5T_STD_I16BE,
                TypeCode::I32Be => *H5T_STD_I32BE,
                TypeCode::I64Be => *H5T_STD_I64BE,
                TypeCode::U8Be => *H5T_STD_U8BE,
                TypeCode::U16Be => *H5T_STD_U16BE,
                TypeCode::U32Be => *H5T_STD_U32BE,
                TypeCode::U64Be => *H5T_STD_U64BE,
                TypeCode::F16Be | TypeCode::F32Be => *H5T_IEEE_F32BE,
                TypeCode::F64Be => *H5T_IEEE_F64BE,
                TypeCode::FixedString(_) => *H5T_C_S1,
            };
            let dtype = RawHandle::new(H5Tcopy(base), H5Tclose, context)?;
            match code {
                TypeCode::F16Be => {
                    // IEEE 754 binary16: sign bit 15, 5-bit exponent at 10,
                    // 10-bit mantissa at 0, bias 15.
                    check(H5Tset_fields(dtype.0, 15, 10, 5, 0, 10), context)?;
                    check(H5Tset_size(dtype.0, 2), context)?;
                    check(H5Tset_ebias(dtype.0, 15), context)?;
                }
                TypeCode::FixedString(len) => {
                    check(H5Tset_size(dtype.0, len.max(1)), context)?;
                    check(
                        H5Tset_strpad(dtype.0, H5T_str_t::H5T_STR_NULLPAD),
                        context,
                    )?;
                }
                _ => {}
            }
            Ok(dtype)
        }
    }

    fn data_space(shape: &[usize]) -> AppResult<RawHandle> {
        let context = "<space>";
        // SAFETY: `dims` outlives the call and holds `rank` entries.
        unsafe {
            if shape.is_empty() {
                return RawHandle::new(H5Screate(H5S_class_t::H5S_SCALAR), H5Sclose, context);
            }
            let dims: Vec<hsize_t> = shape.iter().map(|&d| d as hsize_t).collect();
            RawHandle::new(
                H5Screate_simple(dims.len() as c_int, dims.as_ptr(), ptr::null()),
                H5Sclose,
                context,
            )
        }
    }

    impl ResultContainer for Hdf5Container {
        fn create_dataset(&mut self, name: &str, encoded: &EncodedDataset) -> AppResult<()> {
            self.write_encoded(name, encoded)?;

            let dataset = self.file.dataset(name)?;
            for marker in &encoded.attributes {
                dataset
                    .new_attr::<i8>()
                    .shape(())
                    .create(*marker)?
                    .write_scalar(&1i8)?;
            }
            Ok(())
        }
    }
}

#[cfg(feature = "storage_hdf5")]
pub use hdf5_enabled::Hdf5Container;

// ============================================================================
// HDF5 disabled
// ============================================================================

#[cfg(not(feature = "storage_hdf5"))]
mod hdf5_disabled {
    use super::*;
    use crate::data::result_writer::{EncodedDataset, ResultContainer};

    /// Placeholder used when the crate is built without `storage_hdf5`.
    pub struct Hdf5Container;

    impl Hdf5Container {
        /// Fails: HDF5 support is not compiled in.
        pub fn create(_path: impl AsRef<Path>) -> AppResult<Self> {
            Err(DaqError::FeatureNotEnabled("storage_hdf5".to_string()))
        }

        /// Always empty.
        pub fn path(&self) -> &Path {
            Path::new("")
        }

        /// Fails: HDF5 support is not compiled in.
        pub fn close(self) -> AppResult<()> {
            Err(DaqError::FeatureNotEnabled("storage_hdf5".to_string()))
        }
    }

    impl ResultContainer for Hdf5Container {
        fn create_dataset(&mut self, _name: &str, _dataset: &EncodedDataset) -> AppResult<()> {
            Err(DaqError::FeatureNotEnabled("storage_hdf5".to_string()))
        }
    }
}

#[cfg(not(feature = "storage_hdf5"))]
pub use hdf5_disabled::Hdf5Container;

#[cfg(all(test, not(feature = "storage_hdf5")))]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_backend_reports_feature() {
        let err = Hdf5Container::create("results/000000001-x.h5").err();
        assert!(matches!(err, Some(DaqError::FeatureNotEnabled(f)) if f == "storage_hdf5"));
    }
}
