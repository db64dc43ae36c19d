const BASE: f64 = 1024.0;
const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];

fn get_unit_index(bytes: f64) -> usize {
    if bytes < 1.0 {
        return 0;
    }
    let index = (bytes.ln() / BASE.ln()).floor() as usize;
    index.min(UNITS.len() - 1)
}

fn format_shifted_value(value: f64, fraction_digits: usize) -> String {
    let formatted_value = format!("{value:.fraction_digits$}");

    if fraction_digits > 0 {
        formatted_value
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_owned()
    } else {
        formatted_value
    }
}

pub fn format_memory(bytes: f64, fraction_digits: Option<usize>) -> String {
    let fraction_digits = fraction_digits.unwrap_or(1); // Default to 1 decimal place

    if bytes == 0.0 {
        return "0 B".to_string();
    }

    let unit_index = get_unit_index(bytes);
    let unit = UNITS[unit_index];
    let shifted_value = bytes / BASE.powi(unit_index as i32);

    format!(
        "{} {}",
        format_shifted_value(shifted_value, fraction_digits),
        unit
    )
}

/// Signed variant of [`format_memory`] used for before/after comparisons.
pub fn format_memory_delta(delta_bytes: i64) -> String {
    let magnitude = format_memory(delta_bytes.unsigned_abs() as f64, None);
    match delta_bytes.signum() {
        1 => format!("+{magnitude}"),
        -1 => format!("-{magnitude}"),
        _ => magnitude,
    }
}
