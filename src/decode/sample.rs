//! Downsample factor calculation.
//!
//! Large images are decoded at a power-of-two sample factor so that the
//! decoded buffer is no larger than needed to fill the requested box. A
//! factor of `f` divides both dimensions by `f`, reducing memory by `f²`.

/// Sample factor meaning "decode at full resolution".
pub const NO_DOWNSAMPLING: u32 = 1;

/// Compute the largest power-of-two sample factor that keeps the decoded
/// image at least as large as the requested box on both axes.
///
/// Returns 1 when both requested dimensions are non-positive, or when the
/// source already fits within the box. Degenerate source dimensions also
/// yield 1.
///
/// # Example
///
/// ```
/// use pixel_loader::decode::calculate_sample_factor;
///
/// assert_eq!(calculate_sample_factor(1200, 800, 200, 200), 2);
/// assert_eq!(calculate_sample_factor(100, 100, 200, 200), 1);
/// ```
pub fn calculate_sample_factor(
    source_width: i64,
    source_height: i64,
    req_width: i64,
    req_height: i64,
) -> u32 {
    if source_width <= 0 || source_height <= 0 {
        return NO_DOWNSAMPLING;
    }
    if req_width <= 0 && req_height <= 0 {
        return NO_DOWNSAMPLING;
    }
    if source_height <= req_height && source_width <= req_width {
        return NO_DOWNSAMPLING;
    }

    let half_height = source_height / 2;
    let half_width = source_width / 2;

    let mut factor: i64 = 1;
    while half_height / factor > req_height && half_width / factor > req_width {
        factor *= 2;
    }

    u32::try_from(factor).unwrap_or(1 << 31)
}

/// Dimensions of an image decoded at `sample_factor`.
///
/// Each axis is divided by the factor and never drops below one pixel.
pub fn sampled_dimensions(width: u32, height: u32, sample_factor: u32) -> (u32, u32) {
    let factor = sample_factor.max(1);
    ((width / factor).max(1), (height / factor).max(1))
}

/// Parameters of a downsampled decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownsampleOptions {
    /// Requested box width (0 when the factor was forced)
    pub requested_width: u32,

    /// Requested box height (0 when the factor was forced)
    pub requested_height: u32,

    /// Power-of-two sample factor, at least 1
    pub sample_factor: u32,
}

impl DownsampleOptions {
    /// Derive the sample factor that fits a source into a requested box.
    pub fn for_box(
        source_width: u32,
        source_height: u32,
        requested_width: u32,
        requested_height: u32,
    ) -> Self {
        Self {
            requested_width,
            requested_height,
            sample_factor: calculate_sample_factor(
                source_width as i64,
                source_height as i64,
                requested_width as i64,
                requested_height as i64,
            ),
        }
    }

    /// Use a caller-chosen sample factor.
    ///
    /// The factor is rounded up to the next power of two.
    pub fn forced(sample_factor: u32) -> Self {
        Self {
            requested_width: 0,
            requested_height: 0,
            sample_factor: normalize_factor(sample_factor),
        }
    }

    /// Double the sample factor, saturating at the largest power of two.
    pub fn escalate(&mut self) {
        self.sample_factor = self.sample_factor.checked_mul(2).unwrap_or(self.sample_factor);
    }
}

/// Round a factor up to a power of two, treating 0 as 1.
pub fn normalize_factor(factor: u32) -> u32 {
    factor.max(1).checked_next_power_of_two().unwrap_or(1 << 31)
}
