use crate::utilities::split_first;

/// Weights of the multifactor priority plugin that compete with job niceness
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PriorityWeights {
    /// `PriorityWeightAge`; the maximum number of points a job gains by waiting
    pub age: Option<usize>,
    /// `PriorityWeightFairshare`
    pub fairshare: Option<usize>,
}

impl PriorityWeights {
    /// Arguments for `scontrol`
    pub fn scontrol_args() -> Vec<String> {
        vec!["show".to_string(), "config".to_string()]
    }

    /// Collects the relevant values from the output of `scontrol show config`
    pub fn parse(output: &[u8]) -> PriorityWeights {
        let mut weights = PriorityWeights::default();

        for line in output.split(|&c| c == b'\n') {
            if let Some((key, value)) = split_first(line, b'=') {
                match key.trim_ascii() {
                    b"PriorityWeightAge" => weights.age = Self::parse_weight(value),
                    b"PriorityWeightFairshare" => weights.fairshare = Self::parse_weight(value),
                    _ => {}
                }
            }
        }

        weights
    }

    /// Parse numerical weights, returning None on invalid values
    fn parse_weight(value: &[u8]) -> Option<usize> {
        std::str::from_utf8(value.trim_ascii())
            .ok()?
            .parse::<usize>()
            .ok()
    }
}
