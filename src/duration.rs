// Copyright (C) 2022 Electronic Arts, Inc. All rights reserved.

//! Duration specific functions.
use std::time::Duration;

/// Convert a duration into a formatted string.
///
/// Milliseconds are included.
pub fn duration_string(duration: &Duration) -> String {
    let millis = duration.subsec_millis();
    let seconds = duration.as_secs() % 60;
    let minutes = (duration.as_secs() / 60) % 60;
    let hours = (duration.as_secs() / 60) / 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_string() {
        assert_eq!(duration_string(&Duration::from_millis(0)), "00:00:00.000");
        assert_eq!(duration_string(&Duration::from_millis(1_250)), "00:00:01.250");
        assert_eq!(
            duration_string(&Duration::from_secs(3 * 3600 + 25 * 60 + 7)),
            "03:25:07.000"
        );
    }
}
