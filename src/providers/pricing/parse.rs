//! Shape name to price list service category and type

pub const CATEGORY_VIRTUAL_MACHINE: &str = "Compute - Virtual Machine";
pub const CATEGORY_BARE_METAL: &str = "Compute - Bare Metal";
pub const CATEGORY_GPU: &str = "Compute - GPU";
pub const CATEGORY_COMPUTE: &str = "Compute";

/// Categories searched, in order, when the parsed category has no match.
pub const FALLBACK_CATEGORIES: &[&str] = &[
    CATEGORY_VIRTUAL_MACHINE,
    CATEGORY_BARE_METAL,
    CATEGORY_GPU,
    CATEGORY_COMPUTE,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedShape {
    pub category: &'static str,
    /// `GPU`, `DenseIO`, `Standard`, `Optimized`, `HPC` or the raw family segment
    pub service_type: String,
    /// GPU model or processor generation
    pub sub_type: Option<String>,
}

impl ParsedShape {
    /// Text matched against price item display names.
    pub fn pattern(&self) -> String {
        match &self.sub_type {
            Some(sub) => format!("{} - {}", self.service_type, sub),
            None => self.service_type.clone(),
        }
    }
}

/// Processor generation implied by a numbered family, e.g. `Standard2` is X7.
fn numbered_generation(number: &str) -> Option<String> {
    match number {
        "1" => Some("X5".to_string()),
        "2" => Some("X7".to_string()),
        "3" => Some("X9".to_string()),
        _ => None,
    }
}

/// `E4`, `A1`, `X9` and the like; excludes `Flex` and core counts.
fn is_generation(segment: &str) -> bool {
    let mut chars = segment.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && segment.len() > 1
        && chars.all(|c| c.is_ascii_digit())
}

fn gpu_model(segment: &str) -> String {
    segment
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect()
}

pub fn parse_shape(name: &str) -> ParsedShape {
    let segments: Vec<&str> = name.split('.').collect();
    let machine_category = if name.starts_with("BM.") {
        CATEGORY_BARE_METAL
    } else {
        CATEGORY_VIRTUAL_MACHINE
    };

    if let Some(pos) = segments.iter().position(|s| s.starts_with("GPU")) {
        let sub_type = match segments[pos] {
            "GPU2" => Some("P100".to_string()),
            "GPU3" => Some("V100".to_string()),
            "GPU4" => Some("A100".to_string()),
            "GPU" => segments.get(pos + 1).map(|s| gpu_model(s)),
            _ => None,
        };
        return ParsedShape {
            category: CATEGORY_GPU,
            service_type: "GPU".to_string(),
            sub_type,
        };
    }

    if let Some(pos) = segments.iter().position(|s| s.starts_with("DenseIO")) {
        let sub_type = match &segments[pos]["DenseIO".len()..] {
            "" => segments
                .get(pos + 1)
                .filter(|s| is_generation(s))
                .map(|s| s.to_string()),
            number => numbered_generation(number),
        };
        return ParsedShape {
            category: machine_category,
            service_type: "DenseIO".to_string(),
            sub_type,
        };
    }

    for family in ["Standard", "Optimized", "HPC"] {
        if let Some(pos) = segments.iter().position(|s| s.starts_with(family)) {
            let sub_type = match &segments[pos][family.len()..] {
                "" => segments
                    .get(pos + 1)
                    .filter(|s| is_generation(s))
                    .map(|s| s.to_string()),
                number => numbered_generation(number),
            };
            return ParsedShape {
                category: machine_category,
                service_type: family.to_string(),
                sub_type,
            };
        }
    }

    ParsedShape {
        category: machine_category,
        service_type: segments.get(1).unwrap_or(&name).to_string(),
        sub_type: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(category: &'static str, service_type: &str, sub_type: Option<&str>) -> ParsedShape {
        ParsedShape {
            category,
            service_type: service_type.to_string(),
            sub_type: sub_type.map(str::to_string),
        }
    }

    #[test]
    fn test_parse_gpu_shapes() {
        assert_eq!(
            parse_shape("BM.GPU.A10.4"),
            parsed(CATEGORY_GPU, "GPU", Some("A10"))
        );
        assert_eq!(
            parse_shape("BM.GPU.A100-v2.8"),
            parsed(CATEGORY_GPU, "GPU", Some("A100"))
        );
        assert_eq!(parse_shape("VM.GPU3.1"), parsed(CATEGORY_GPU, "GPU", Some("V100")));
        assert_eq!(parse_shape("VM.GPU2.1"), parsed(CATEGORY_GPU, "GPU", Some("P100")));
    }

    #[test]
    fn test_parse_dense_io() {
        assert_eq!(
            parse_shape("VM.DenseIO.E4.Flex"),
            parsed(CATEGORY_VIRTUAL_MACHINE, "DenseIO", Some("E4"))
        );
        assert_eq!(
            parse_shape("BM.DenseIO2.52"),
            parsed(CATEGORY_BARE_METAL, "DenseIO", Some("X7"))
        );
        assert_eq!(
            parse_shape("BM.DenseIO3"),
            parsed(CATEGORY_BARE_METAL, "DenseIO", Some("X9"))
        );
    }

    #[test]
    fn test_parse_standard_families() {
        assert_eq!(
            parse_shape("VM.Standard.E4.Flex"),
            parsed(CATEGORY_VIRTUAL_MACHINE, "Standard", Some("E4"))
        );
        assert_eq!(
            parse_shape("VM.Standard2.1"),
            parsed(CATEGORY_VIRTUAL_MACHINE, "Standard", Some("X7"))
        );
        assert_eq!(
            parse_shape("VM.Standard3.Flex"),
            parsed(CATEGORY_VIRTUAL_MACHINE, "Standard", Some("X9"))
        );
        assert_eq!(
            parse_shape("BM.Optimized3.36"),
            parsed(CATEGORY_BARE_METAL, "Optimized", Some("X9"))
        );
        assert_eq!(
            parse_shape("BM.HPC2.36"),
            parsed(CATEGORY_BARE_METAL, "HPC", Some("X7"))
        );
        assert_eq!(parse_shape("VM.Standard.E4.Flex").pattern(), "Standard - E4");
    }

    #[test]
    fn test_parse_unknown_family() {
        let p = parse_shape("VM.Mystery.1");
        assert_eq!(p.service_type, "Mystery");
        assert_eq!(p.sub_type, None);
        assert_eq!(p.pattern(), "Mystery");
    }
}
