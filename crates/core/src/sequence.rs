//! Human-readable sequence codes of the form `PREFIX-YYYY-NNNN`, numbered
//! per prefix per calendar year.

/// `WO` + 2025 + 7 -> `WO-2025-0007`.
pub fn format_code(prefix: &str, year: i32, number: u32) -> String {
    format!("{prefix}-{year}-{number:04}")
}

/// SQL LIKE pattern matching every code of a prefix/year scope.
pub fn like_pattern(prefix: &str, year: i32) -> String {
    format!("{prefix}-{year}-%")
}

/// Trailing number of `code` within the given prefix/year scope. Codes from
/// another scope, or with an unparsable suffix, count as 0 so the next
/// generated code starts the year at 0001.
pub fn trailing_number(code: &str, prefix: &str, year: i32) -> u32 {
    let scope = format!("{prefix}-{year}-");
    code.strip_prefix(&scope).and_then(|suffix| suffix.parse::<u32>().ok()).unwrap_or(0)
}

/// Next code in the scope given the greatest existing code, if any.
pub fn next_code(prefix: &str, year: i32, last: Option<&str>) -> String {
    let last_number = last.map(|code| trailing_number(code, prefix, year)).unwrap_or(0);
    format_code(prefix, year, last_number + 1)
}

#[cfg(test)]
mod tests {
    use super::{format_code, like_pattern, next_code, trailing_number};

    #[test]
    fn increments_the_greatest_same_year_suffix() {
        assert_eq!(next_code("WO", 2025, Some("WO-2025-0009")), "WO-2025-0010");
        assert_eq!(next_code("RFQ", 2025, Some("RFQ-2025-0123")), "RFQ-2025-0124");
    }

    #[test]
    fn first_code_of_a_year_is_0001() {
        assert_eq!(next_code("NAEF", 2025, None), "NAEF-2025-0001");
    }

    #[test]
    fn codes_from_another_year_are_ignored() {
        assert_eq!(next_code("WO", 2025, Some("WO-2024-0042")), "WO-2025-0001");
    }

    #[test]
    fn unparsable_suffix_counts_as_zero() {
        assert_eq!(trailing_number("WO-2025-draft", "WO", 2025), 0);
        assert_eq!(next_code("WO", 2025, Some("WO-2025-draft")), "WO-2025-0001");
    }

    #[test]
    fn numbers_are_zero_padded_to_four_digits() {
        assert_eq!(format_code("FSL", 2025, 7), "FSL-2025-0007");
        assert_eq!(format_code("FSL", 2025, 9999), "FSL-2025-9999");
        assert_eq!(next_code("FSL", 2025, Some("FSL-2025-9999")), "FSL-2025-10000");
    }

    #[test]
    fn like_pattern_scopes_by_prefix_and_year() {
        assert_eq!(like_pattern("TR", 2025), "TR-2025-%");
    }
}
