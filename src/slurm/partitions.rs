use std::fmt;
use std::str::FromStr;

/// Summarizes the state of CPUs in a partition, as reported by `sinfo -o %C`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CPUState {
    /// Allocated CPUs
    pub allocated: usize,
    /// Idle CPUs
    pub idle: usize,
    /// Unavailable CPUs
    pub other: usize,
    /// Total number of CPUs
    pub total: usize,
}

#[derive(Debug, PartialEq, Eq)]
pub struct InvalidCPUState(String);

impl fmt::Display for InvalidCPUState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "expected CPU states in the form 'A/I/O/T', found {:?}",
            self.0
        )
    }
}

impl std::error::Error for InvalidCPUState {}

impl FromStr for CPUState {
    type Err = InvalidCPUState;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidCPUState(value.to_string());

        let values = value
            .trim()
            .split('/')
            .map(|v| v.parse::<usize>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;

        match values[..] {
            [allocated, idle, other, total] => Ok(CPUState {
                allocated,
                idle,
                other,
                total,
            }),
            _ => Err(invalid()),
        }
    }
}

/// Generates the arguments for querying the CPU states of `partition`
pub fn sinfo_args(partition: &str) -> Vec<String> {
    ["--partition", partition, "--noheader", "-o", "%C"]
        .iter()
        .map(|v| v.to_string())
        .collect()
}
