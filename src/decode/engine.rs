//! Decode engine with out-of-memory retry.
//!
//! # Retry Policy
//!
//! A decode that fails because the pixels could not be allocated is retried
//! with the sample factor doubled. Once the factor reaches the give-up cap
//! the engine stops and reports the last error, so a failure that is not
//! really about memory cannot loop forever. Any other error is returned
//! immediately.

use tracing::{debug, warn};

use super::buffer::PixelBuffer;
use super::sample::DownsampleOptions;
use super::source::ImageSource;
use crate::error::DecodeError;

/// Sample factor at which the engine gives up retrying.
pub const DEFAULT_MAX_SAMPLE_FACTOR: u32 = 20;

/// Stateless decoder applying the sample-factor retry policy.
#[derive(Debug, Clone)]
pub struct DecodeEngine {
    max_sample_factor: u32,
}

impl DecodeEngine {
    pub fn new() -> Self {
        Self {
            max_sample_factor: DEFAULT_MAX_SAMPLE_FACTOR,
        }
    }

    /// Give up once the sample factor reaches `max_sample_factor`.
    pub fn with_max_sample_factor(max_sample_factor: u32) -> Self {
        Self {
            max_sample_factor: max_sample_factor.max(2),
        }
    }

    pub fn max_sample_factor(&self) -> u32 {
        self.max_sample_factor
    }

    /// Decode so the result covers a `req_width` × `req_height` box.
    ///
    /// Reads the source dimensions first, picks the sample factor, then
    /// decodes with retry.
    pub fn decode_bounded<S: ImageSource + ?Sized>(
        &self,
        source: &S,
        req_width: u32,
        req_height: u32,
    ) -> Result<PixelBuffer, DecodeError> {
        let info = source.info()?;
        let options = DownsampleOptions::for_box(info.width, info.height, req_width, req_height);

        debug!(
            source = source.identifier(),
            width = info.width,
            height = info.height,
            sample_factor = options.sample_factor,
            "Decoding bounded"
        );

        self.decode_with(source, options)
    }

    /// Decode at a caller-chosen sample factor, with retry.
    pub fn decode<S: ImageSource + ?Sized>(
        &self,
        source: &S,
        sample_factor: u32,
    ) -> Result<PixelBuffer, DecodeError> {
        self.decode_with(source, DownsampleOptions::forced(sample_factor))
    }

    /// Run the retry loop starting from `options.sample_factor`.
    pub fn decode_with<S: ImageSource + ?Sized>(
        &self,
        source: &S,
        mut options: DownsampleOptions,
    ) -> Result<PixelBuffer, DecodeError> {
        loop {
            let err = match source.decode(options.sample_factor) {
                Ok(buffer) => return Ok(buffer),
                Err(err) if err.is_out_of_memory() => err,
                Err(err) => return Err(DecodeError::Source(err)),
            };

            let last_factor = options.sample_factor;
            options.escalate();

            if options.sample_factor >= self.max_sample_factor || options.sample_factor == last_factor
            {
                warn!(
                    source = source.identifier(),
                    last_factor,
                    "Giving up decode after out-of-memory retries: {}",
                    err
                );
                return Err(DecodeError::RetriesExhausted {
                    last_factor,
                    source: err,
                });
            }

            debug!(
                source = source.identifier(),
                sample_factor = options.sample_factor,
                "Out of memory, retrying at larger sample factor"
            );
        }
    }
}

impl Default for DecodeEngine {
    fn default() -> Self {
        Self::new()
    }
}
