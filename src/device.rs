use std::{fmt::Display, io::Read, str::FromStr, sync::LazyLock};

use regex::Regex;
use tracing::{debug, warn};

use crate::error::BatchError;

/// Name of the CSV column holding device MAC addresses.
pub const MAC_COLUMN: &str = "mac_addresses";

static MAC_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}$").expect("MAC address regex is valid")
});

/// A device's hardware address, as written in the batch file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid MAC address '{0}'")]
pub struct InvalidDeviceId(pub String);

impl DeviceId {
    pub fn parse(s: &str) -> Result<Self, InvalidDeviceId> {
        if MAC_ADDRESS.is_match(s) {
            Ok(Self(s.to_owned()))
        } else {
            Err(InvalidDeviceId(s.to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for DeviceId {
    type Err = InvalidDeviceId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lazily reads validated [DeviceId]s out of a CSV batch file.
///
/// Rows with an invalid address are logged and skipped. Only the device
/// column has to be UTF-8. The first structural error is yielded once, after
/// which the iterator is exhausted.
pub struct DeviceReader<R: Read> {
    records: csv::ByteRecordsIntoIter<R>,
    column: usize,
    row: usize,
    skipped: usize,
    failed: bool,
}

impl<R: Read> DeviceReader<R> {
    /// Reads the header row and locates the [MAC_COLUMN].
    pub fn new(input: R) -> Result<Self, BatchError> {
        let mut reader = csv::Reader::from_reader(input);

        let headers = reader.byte_headers().map_err(|e| {
            BatchError::configuration(format!("Failed to read batch input header: {e}"))
        })?;
        let column = headers
            .iter()
            .position(|h| h == MAC_COLUMN.as_bytes())
            .ok_or_else(|| {
                BatchError::configuration(format!("Batch input missing '{MAC_COLUMN}' column"))
            })?;
        debug!(column, "Found device column");

        Ok(Self {
            records: reader.into_byte_records(),
            column,
            row: 0,
            skipped: 0,
            failed: false,
        })
    }

    /// How many rows have been skipped so far for holding an invalid address.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl<R: Read> Iterator for DeviceReader<R> {
    type Item = Result<DeviceId, BatchError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        loop {
            let record = match self.records.next()? {
                Ok(r) => r,
                Err(source) => {
                    self.failed = true;
                    return Some(Err(BatchError::Input {
                        row: self.row + 1,
                        source,
                    }));
                }
            };
            self.row += 1;

            let value = record.get(self.column).unwrap_or_default();
            let parsed = match std::str::from_utf8(value) {
                Ok(value) => DeviceId::parse(value),
                Err(_) => Err(InvalidDeviceId(String::from_utf8_lossy(value).into_owned())),
            };
            match parsed {
                Ok(id) => return Some(Ok(id)),
                Err(e) => {
                    warn!(row = self.row, "Skipping row {}: {e}", self.row);
                    self.skipped += 1;
                }
            }
        }
    }
}
