use std::time::Duration;

fn get_nearest_exponent(secs: f64) -> i32 {
    match secs {
        x if x >= 1.0 => 0,
        x if x >= 1e-3 => 3,
        x if x >= 1e-6 => 6,
        _ => 9,
    }
}

fn format_shifted_value(value: f64, fraction_digits: usize) -> String {
    if fraction_digits == 0 && value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.fraction_digits$}")
    }
}

/// Human readable duration, scaled to the largest unit that keeps the value above 1.
pub fn format_duration(duration: Duration, fraction_digits: Option<usize>) -> String {
    let fraction_digits = fraction_digits.unwrap_or(1);
    let secs = duration.as_secs_f64();
    if duration < Duration::from_nanos(1) {
        return "< 1 ns".to_string();
    }

    let exponent = get_nearest_exponent(secs);
    let shifted = format_shifted_value(secs * 10f64.powi(exponent), fraction_digits);
    let unit = match exponent {
        0 => "s",
        3 => "ms",
        6 => "µs",
        _ => "ns",
    };
    format!("{shifted} {unit}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration_seconds() {
        assert_eq!(format_duration(Duration::from_millis(1100), None), "1.1 s");
        assert_eq!(format_duration(Duration::from_secs(1), Some(0)), "1 s");
        assert_eq!(format_duration(Duration::from_millis(1234), Some(2)), "1.23 s");
        assert_eq!(format_duration(Duration::from_secs(95), None), "95.0 s");
    }

    #[test]
    fn test_format_duration_milliseconds() {
        assert_eq!(format_duration(Duration::from_millis(1), None), "1.0 ms");
        assert_eq!(format_duration(Duration::from_millis(12), Some(0)), "12 ms");
        assert_eq!(format_duration(Duration::from_micros(1234), Some(2)), "1.23 ms");
    }

    #[test]
    fn test_format_duration_microseconds_and_nanoseconds() {
        assert_eq!(format_duration(Duration::from_micros(1), None), "1.0 µs");
        assert_eq!(format_duration(Duration::from_nanos(5), Some(0)), "5 ns");
    }

    #[test]
    fn test_format_duration_zero() {
        assert_eq!(format_duration(Duration::ZERO, None), "< 1 ns");
    }
}
