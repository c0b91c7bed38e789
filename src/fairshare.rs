use std::fmt;

/// Niceness applied to jobs of users within their fair share
pub const DEFAULT_FAIR_USE_NICE: u32 = 1001;
/// Niceness applied to jobs of users exceeding their fair share
pub const DEFAULT_OVERUSE_NICE: u32 = 2001;

/// Returns the number of cores each user with pending jobs is entitled to, or
/// None if nobody is waiting and there is therefore no contention
pub fn fair_share(total_cores: usize, pending_users: usize) -> Option<usize> {
    total_cores.checked_div(pending_users)
}

/// Classification of a user relative to their fair share
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    FairUse,
    Overuse,
}

impl Verdict {
    /// Compares the cores (not tasks) used by a user against their fair share
    pub fn classify(used_cores: usize, fair_share: usize) -> Self {
        if used_cores > fair_share {
            Verdict::Overuse
        } else {
            Verdict::FairUse
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Verdict::FairUse => f.write_str("fair use"),
            Verdict::Overuse => f.write_str("overuse"),
        }
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("overuse niceness ({overuse}) must be greater than fair-use niceness ({fair_use})")]
pub struct NiceLevelsError {
    pub fair_use: u32,
    pub overuse: u32,
}

/// The two niceness values applied to pending array jobs
///
/// Both values should exceed the priority a job can gain from other factors,
/// in particular age, so that they are not cancelled out while jobs wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NiceLevels {
    fair_use: u32,
    overuse: u32,
}

impl NiceLevels {
    pub fn new(fair_use: u32, overuse: u32) -> Result<Self, NiceLevelsError> {
        if overuse > fair_use {
            Ok(Self { fair_use, overuse })
        } else {
            Err(NiceLevelsError { fair_use, overuse })
        }
    }

    pub fn fair_use(&self) -> u32 {
        self.fair_use
    }

    pub fn overuse(&self) -> u32 {
        self.overuse
    }

    pub fn select(&self, verdict: Verdict) -> u32 {
        match verdict {
            Verdict::FairUse => self.fair_use,
            Verdict::Overuse => self.overuse,
        }
    }

    /// Returns a description of the problem if the levels can be overridden by
    /// `age_weight` priority points
    pub fn check_age_weight(&self, age_weight: usize) -> Option<String> {
        let age_weight = age_weight as u64;
        if (self.fair_use as u64) < age_weight {
            Some(format!(
                "fair-use niceness {} is below PriorityWeightAge={}",
                self.fair_use, age_weight
            ))
        } else if ((self.overuse - self.fair_use) as u64) < age_weight {
            Some(format!(
                "gap between niceness levels ({} to {}) is below PriorityWeightAge={}",
                self.fair_use, self.overuse, age_weight
            ))
        } else {
            None
        }
    }
}

impl Default for NiceLevels {
    fn default() -> Self {
        Self {
            fair_use: DEFAULT_FAIR_USE_NICE,
            overuse: DEFAULT_OVERUSE_NICE,
        }
    }
}
