use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::bail;
use crate::error::{DevPodResult, ErrorKind};

fn suffix_multiplier(suffix: &str) -> Option<f64> {
    let multiplier = match suffix {
        "" => 1.0,
        "Ki" => 1024.0,
        "Mi" => 1024f64.powi(2),
        "Gi" => 1024f64.powi(3),
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        _ => {
            let exponent = suffix
                .strip_prefix('e')
                .or_else(|| suffix.strip_prefix('E'))?;
            10f64.powi(exponent.parse::<i32>().ok()?)
        }
    };

    Some(multiplier)
}

/// Returns the numeric value of a resource quantity such as `10Gi`, `500m` or `1e3`.
pub fn quantity_value(value: &str) -> DevPodResult<f64> {
    let trimmed = value.trim();

    let number_end = trimmed
        .char_indices()
        .find(|(index, c)| {
            !(c.is_ascii_digit() || *c == '.' || (*index == 0 && (*c == '+' || *c == '-')))
        })
        .map(|(index, _)| index)
        .unwrap_or(trimmed.len());
    let (number, suffix) = trimmed.split_at(number_end);

    let Ok(number) = number.parse::<f64>() else {
        bail!(
            ErrorKind::InvalidQuantity,
            "Resource quantity is not a number",
            value
        );
    };

    let Some(multiplier) = suffix_multiplier(suffix) else {
        bail!(
            ErrorKind::InvalidQuantity,
            "Resource quantity has an unknown suffix",
            value
        );
    };

    Ok(number * multiplier)
}

/// Validates a resource quantity and returns it in its typed form.
pub fn parse_quantity(value: &str) -> DevPodResult<Quantity> {
    quantity_value(value)?;

    Ok(Quantity(value.trim().to_string()))
}

/// Returns `true` when both quantities denote the same amount, e.g. `1Gi` and `1024Mi`.
pub fn same_quantity(a: &str, b: &str) -> bool {
    match (quantity_value(a), quantity_value(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
