use std::error;
use std::fmt;

#[derive(Debug)]

/**
 * Error to represent an unrecognized configuration value. Precondition
 * violations (use of an uninitialized integrator, centering mismatches,
 * out-of-range indexes) are programming errors and panic instead.
 */
pub enum Error {
    UnknownLimiterType(String),
    UnknownExtrapolationType(String),
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        use Error::*;

        match self {
            UnknownLimiterType(name) => writeln!(fmt, "unknown limiter type: {}", name),
            UnknownExtrapolationType(name) => writeln!(fmt, "unknown boundary extrapolation type: {}", name),
        }
    }
}

impl error::Error for Error {}
