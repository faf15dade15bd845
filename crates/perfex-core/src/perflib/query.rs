//! Raw snapshot sources.
//!
//! A [`PerfQuery`] turns a batch of perflib object title indexes into the
//! performance objects of one snapshot. On Windows the live source is
//! [`RegistryQuery`]; [`FixtureQuery`](super::FixtureQuery) serves recorded or
//! synthetic data everywhere else and in tests.

use super::PerfObject;
use super::binary::ParseError;

/// Error type for snapshot acquisition. Fatal for the whole scrape.
#[derive(Debug)]
pub enum QueryError {
    /// I/O error reading a snapshot source.
    Io(std::io::Error),
    /// OS call failed with the given status code.
    Os { code: u32, context: String },
    /// Malformed performance data.
    Parse(ParseError),
    /// Malformed fixture file.
    Fixture(String),
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::Io(e) => write!(f, "I/O error: {}", e),
            QueryError::Os { code, context } => {
                write!(f, "{} failed with status {}", context, code)
            }
            QueryError::Parse(e) => write!(f, "{}", e),
            QueryError::Fixture(msg) => write!(f, "fixture error: {}", msg),
        }
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            QueryError::Io(e) => Some(e),
            QueryError::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for QueryError {
    fn from(e: std::io::Error) -> Self {
        QueryError::Io(e)
    }
}

impl From<ParseError> for QueryError {
    fn from(e: ParseError) -> Self {
        QueryError::Parse(e)
    }
}

/// The raw-counter query primitive.
///
/// `object_ids` are perflib title indexes as decimal strings (e.g. `"238"`
/// for `Processor`). Implementations fetch all of them in one call.
pub trait PerfQuery: Send + Sync {
    fn query(&self, object_ids: &[String]) -> Result<Vec<PerfObject>, QueryError>;
}

#[cfg(windows)]
pub use registry::RegistryQuery;

#[cfg(windows)]
mod registry {
    use tracing::debug;
    use windows_sys::Win32::Foundation::{ERROR_MORE_DATA, ERROR_SUCCESS};
    use windows_sys::Win32::System::Registry::{
        HKEY_PERFORMANCE_DATA, RegCloseKey, RegQueryValueExW,
    };

    use super::{PerfQuery, QueryError};
    use crate::perflib::PerfObject;
    use crate::perflib::binary;
    use crate::perflib::names::NameTable;

    const INITIAL_BUFFER: usize = 64 * 1024;
    const MAX_BUFFER: usize = 256 * 1024 * 1024;

    /// Live snapshots through `HKEY_PERFORMANCE_DATA`.
    pub struct RegistryQuery {
        names: NameTable,
    }

    impl RegistryQuery {
        /// Loads the English counter name table.
        pub fn new() -> Result<Self, QueryError> {
            let raw = query_value("Counter 009")?;
            let names = NameTable::from_multi_sz(&raw)?;
            debug!(names = names.len(), "loaded perflib name table");
            Ok(Self { names })
        }
    }

    impl PerfQuery for RegistryQuery {
        fn query(&self, object_ids: &[String]) -> Result<Vec<PerfObject>, QueryError> {
            let raw = query_value(&object_ids.join(" "))?;
            Ok(binary::parse(&raw, &self.names)?)
        }
    }

    fn query_value(value: &str) -> Result<Vec<u8>, QueryError> {
        let name: Vec<u16> = value.encode_utf16().chain(Some(0)).collect();
        let mut buf = vec![0u8; INITIAL_BUFFER];

        let result = loop {
            let mut len = buf.len() as u32;
            // SAFETY: `name` is NUL-terminated and outlives the call; `buf`
            // is valid for `len` bytes of writes.
            let status = unsafe {
                RegQueryValueExW(
                    HKEY_PERFORMANCE_DATA,
                    name.as_ptr(),
                    std::ptr::null(),
                    std::ptr::null_mut(),
                    buf.as_mut_ptr(),
                    &mut len,
                )
            };
            match status {
                ERROR_SUCCESS => {
                    buf.truncate(len as usize);
                    break Ok(buf);
                }
                ERROR_MORE_DATA if buf.len() < MAX_BUFFER => {
                    let grown = buf.len() * 2;
                    buf.resize(grown, 0);
                }
                code => {
                    break Err(QueryError::Os {
                        code,
                        context: format!("RegQueryValueExW({:?})", value),
                    });
                }
            }
        };

        // SAFETY: closing the predefined performance key releases the
        // provider handles opened by the query above.
        unsafe {
            RegCloseKey(HKEY_PERFORMANCE_DATA);
        }

        result
    }
}
