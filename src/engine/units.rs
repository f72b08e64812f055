//! Kubernetes resource-quantity parsing for numeric bounds
//!
//! CPU quantities are normalized to millicores (`1500m` == `1.5`), memory
//! quantities to bytes (`2Gi` == `2048Mi`). Bare integers with no unit on
//! either side are compared as plain numbers, covering replica counts and
//! similar fields.

/// Unit family a comparison is carried out in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitFamily {
    /// CPU, normalized to millicores
    Cpu,
    /// Memory, normalized to bytes
    Memory,
    /// Unitless numbers
    Count,
}

const MEMORY_SUFFIXES: [(&str, f64); 8] = [
    ("Ki", 1024.0),
    ("Mi", 1024.0 * 1024.0),
    ("Gi", 1024.0 * 1024.0 * 1024.0),
    ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("K", 1000.0),
    ("M", 1_000_000.0),
    ("G", 1_000_000_000.0),
    ("T", 1_000_000_000_000.0),
];

fn memory_suffix(raw: &str) -> Option<(&str, f64)> {
    // Two-letter binary suffixes first so "Mi" is not read as "M"
    MEMORY_SUFFIXES
        .iter()
        .find(|(suffix, _)| raw.ends_with(suffix))
        .map(|&(suffix, factor)| (&raw[..raw.len() - suffix.len()], factor))
}

/// Parse a memory quantity into bytes; plain numbers are taken as bytes
pub fn mem_bytes(raw: &str) -> Result<f64, String> {
    let raw = raw.trim();
    let (digits, factor) = memory_suffix(raw).unwrap_or((raw, 1.0));
    digits
        .parse::<f64>()
        .map(|value| value * factor)
        .map_err(|_| format!("'{raw}' is not a memory quantity"))
}

/// Parse a CPU quantity into millicores; `500m` is 500, `1.5` is 1500
pub fn cpu_millis(raw: &str) -> Result<f64, String> {
    let raw = raw.trim();
    if let Some(digits) = raw.strip_suffix('m') {
        digits
            .parse::<f64>()
            .map_err(|_| format!("'{raw}' is not a CPU quantity"))
    } else {
        raw.parse::<f64>()
            .map(|cores| cores * 1000.0)
            .map_err(|_| format!("'{raw}' is not a CPU quantity"))
    }
}

fn looks_like_cpu(raw: &str) -> bool {
    raw.ends_with('m') || raw.contains('.')
}

/// Pick the unit family for comparing `actual` against `bound`. A memory
/// suffix on either side wins, then a CPU marker, then plain numbers.
pub fn family_of(actual: &str, bound: &str) -> UnitFamily {
    if memory_suffix(actual.trim()).is_some() || memory_suffix(bound.trim()).is_some() {
        UnitFamily::Memory
    } else if looks_like_cpu(actual.trim()) || looks_like_cpu(bound.trim()) {
        UnitFamily::Cpu
    } else {
        UnitFamily::Count
    }
}

/// Normalize both sides of a comparison into the same unit family.
/// A parse failure on either side is a reportable rule finding, not a
/// crash.
pub fn comparable_pair(actual: &str, bound: &str) -> Result<(f64, f64, UnitFamily), String> {
    let family = family_of(actual, bound);
    let pair = match family {
        UnitFamily::Memory => (mem_bytes(actual)?, mem_bytes(bound)?),
        UnitFamily::Cpu => (cpu_millis(actual)?, cpu_millis(bound)?),
        UnitFamily::Count => (
            actual
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("'{actual}' is not numeric"))?,
            bound
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("'{bound}' is not numeric"))?,
        ),
    };
    Ok((pair.0, pair.1, family))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("500m", 500.0)]
    #[case("1500m", 1500.0)]
    #[case("1.5", 1500.0)]
    #[case("2", 2000.0)]
    fn test_cpu_normalization(#[case] raw: &str, #[case] millis: f64) {
        assert_eq!(cpu_millis(raw).unwrap(), millis);
    }

    #[rstest]
    #[case("1Ki", 1024.0)]
    #[case("2Gi", 2.0 * 1024.0 * 1024.0 * 1024.0)]
    #[case("1024Mi", 1024.0 * 1024.0 * 1024.0)]
    #[case("1M", 1_000_000.0)]
    #[case("512", 512.0)]
    fn test_memory_normalization(#[case] raw: &str, #[case] bytes: f64) {
        assert_eq!(mem_bytes(raw).unwrap(), bytes);
    }

    #[test]
    fn test_cpu_millicores_equals_fractional_cores() {
        let (actual, bound, family) = comparable_pair("1500m", "1.5").unwrap();
        assert_eq!(family, UnitFamily::Cpu);
        assert_eq!(actual, bound);
    }

    #[test]
    fn test_cpu_exceeds_max() {
        let (actual, bound, _) = comparable_pair("1500m", "1000m").unwrap();
        assert!(actual > bound);
    }

    #[test]
    fn test_memory_comparisons_cross_suffix() {
        let (actual, bound, family) = comparable_pair("2Gi", "1024Mi").unwrap();
        assert_eq!(family, UnitFamily::Memory);
        assert!(actual > bound);

        let (actual, bound, _) = comparable_pair("2Gi", "2048Mi").unwrap();
        assert!(actual <= bound);
    }

    #[test]
    fn test_unitless_values_compare_as_counts() {
        let (actual, bound, family) = comparable_pair("6", "4").unwrap();
        assert_eq!(family, UnitFamily::Count);
        assert!(actual > bound);
    }

    #[test]
    fn test_unparseable_value_is_an_error() {
        assert!(comparable_pair("lots", "4").is_err());
        assert!(cpu_millis("many-m").is_err());
        assert!(mem_bytes("bigGi").is_err());
    }
}
