pub mod blind_search_parser;
pub mod fast1d_parser;
pub mod snake_search_parser;

use crate::base::{Error, Result};
use crate::types::AdcChannels;

/// Checks that `channels` selects exactly one ADC channel.
pub(crate) fn require_single_channel(channels: AdcChannels, what: &str) -> Result<()> {
    if channels.count() != 1 {
        return Err(Error::InvalidArgument {
            description: format!(
                "exactly one ADC channel is required for {}, got {}",
                what,
                channels.count()
            ),
        });
    }
    Ok(())
}

/// Checks that samples are not denser than the distance between two sweep lines.
pub(crate) fn require_gap_covers_interval(gap: u32, interval: u16, axis: &str) -> Result<()> {
    if interval == 0 || gap == 0 {
        return Err(Error::InvalidArgument {
            description: format!("gap and interval of the {} axis must not be zero", axis),
        });
    }
    if gap < interval as u32 {
        return Err(Error::InvalidArgument {
            description: format!(
                "capture interval {} of the {} axis exceeds the gap {}",
                interval, axis, gap
            ),
        });
    }
    Ok(())
}
