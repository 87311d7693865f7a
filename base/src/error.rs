use std::error::Error;
use std::fmt::{self, Display, Formatter};

/// A value could not be represented in the requested word width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionFailed {
    TooLarge,
    TooSmall,
}

impl Display for ConversionFailed {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.write_str(match self {
            ConversionFailed::TooLarge => "value is too large for the target width",
            ConversionFailed::TooSmall => "value is negative",
        })
    }
}

impl Error for ConversionFailed {}
