/// Class codes in the order of the classifier's output logits.
pub const CLASS_CODES: [&str; 3] = ["DLBCL", "Follicular", "Hodgkin"];

pub const GENERIC_DESCRIPTION: &str = "Lymphoma subtype classification.";

pub fn display_name(code: &str) -> &str {
    match code {
        "DLBCL" => "Diffuse Large B-Cell Lymphoma",
        "Follicular" => "Follicular Lymphoma",
        "Hodgkin" => "Hodgkin Lymphoma",
        other => other,
    }
}

pub fn description(code: &str) -> &'static str {
    match code {
        "DLBCL" => "High-grade malignant lymphoma characterized by large B-cells.",
        "Follicular" => "Indolent B-cell lymphoma with follicular growth pattern.",
        "Hodgkin" => "Lymphoma characterized by Reed-Sternberg cells.",
        _ => GENERIC_DESCRIPTION,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes_have_specific_entries() {
        for code in CLASS_CODES {
            assert_ne!(display_name(code), code);
            assert_ne!(description(code), GENERIC_DESCRIPTION);
        }
        assert_eq!(display_name("Hodgkin"), "Hodgkin Lymphoma");
    }

    #[test]
    fn test_unknown_code_falls_back() {
        assert_eq!(display_name("Mantle"), "Mantle");
        assert_eq!(description("Mantle"), GENERIC_DESCRIPTION);
    }
}
