//! Resize filter construction.

use ffconv_models::{ConversionOptions, FitMode};

/// Build the `-vf` scale chain for the requested resize, if any.
///
/// Returns `None` when video is dropped or no dimension is set.
pub fn build_resize_filter(opts: &ConversionOptions) -> Option<String> {
    if opts.remove_video {
        return None;
    }

    match (opts.resize_width, opts.resize_height) {
        (None, None) => None,
        (Some(w), Some(h)) if opts.keep_aspect => Some(match opts.fit() {
            FitMode::Cover => filter_cover(w, h),
            FitMode::Contain => filter_contain(w, h),
        }),
        (w, h) => Some(filter_scale(w, h)),
    }
}

/// Plain scale; a missing dimension is derived from the source aspect.
pub fn filter_scale(width: Option<u32>, height: Option<u32>) -> String {
    format!("scale={}:{}", dimension(width), dimension(height))
}

/// Fill the box, then crop the overflow.
pub fn filter_cover(width: u32, height: u32) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h}",
        w = width,
        h = height
    )
}

/// Fit inside the box, then pad to it centered.
pub fn filter_contain(width: u32, height: u32) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2",
        w = width,
        h = height
    )
}

fn dimension(value: Option<u32>) -> String {
    value.map_or_else(|| "-1".to_string(), |v| v.to_string())
}
