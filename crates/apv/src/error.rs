//! Error type shared by the encoder, decoder and metadata container.

/// Result type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure raised by a codec operation.
///
/// Every variant carries a stable numeric code, exposed through
/// [`Error::code`], so callers bridging to C-style integer conventions can
/// map errors without matching on variants. Success is the `Ok` arm and
/// corresponds to any non-negative code.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An argument violated its documented constraints.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// An internal buffer exceeded its configured bound.
    #[error("out of memory")]
    OutOfMemory,
    /// A container or list reached its maximum size.
    #[error("reached maximum capacity: {0}")]
    ReachedMax(&'static str),
    /// The requested operation or coding tool is not supported.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    /// An internal invariant was violated. This is a bug in the library,
    /// not in the caller's input.
    #[error("unexpected internal state: {0}")]
    Unexpected(&'static str),
    /// The picture buffer's color space cannot be coded by the selected
    /// profile.
    #[error("unsupported colorspace")]
    UnsupportedColorspace,
    /// The bitstream violates the syntax, including non-zero reserved
    /// fields and truncated payloads.
    #[error("malformed bitstream: {0}")]
    MalformedBitstream(&'static str),
    /// The output bitstream buffer is too small for the encoded payload.
    #[error("out of bitstream buffer")]
    OutOfBitstreamBuffer,
    /// The requested item does not exist.
    #[error("not found")]
    NotFound,
    /// A system call failed.
    #[error("failed system call")]
    FailedSyscall,
    /// The requested level does not cover the configured sample rate or
    /// bitrate.
    #[error("invalid level")]
    InvalidLevel,
    /// The frame width is not representable in the selected chroma format.
    #[error("invalid width")]
    InvalidWidth,
}

impl Error {
    /// The stable numeric code for this error.
    pub const fn code(&self) -> i32 {
        match self {
            Error::InvalidArgument(_) => -101,
            Error::OutOfMemory => -102,
            Error::ReachedMax(_) => -103,
            Error::Unsupported(_) => -104,
            Error::Unexpected(_) => -105,
            Error::UnsupportedColorspace => -201,
            Error::MalformedBitstream(_) => -202,
            Error::OutOfBitstreamBuffer => -203,
            Error::NotFound => -204,
            Error::FailedSyscall => -301,
            Error::InvalidLevel => -401,
            Error::InvalidWidth => -405,
        }
    }
}

#[cfg(test)]
#[cfg_attr(all(test, coverage_nightly), coverage(off))]
mod tests {
    use super::Error;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::InvalidArgument("x").code(), -101);
        assert_eq!(Error::MalformedBitstream("x").code(), -202);
        assert_eq!(Error::OutOfBitstreamBuffer.code(), -203);
        assert_eq!(Error::InvalidLevel.code(), -401);
        assert_eq!(Error::InvalidWidth.code(), -405);
    }
}
