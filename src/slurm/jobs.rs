use std::{fmt, str::FromStr};

use serde::{de, Deserialize, Deserializer};

use super::{misc::format_string, ProbeError};

/// Job states that `squeue` is asked to filter on
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueState {
    /// Queued, waiting for resources or priority
    Pending,
    /// Currently executing
    Running,
}

impl QueueState {
    /// Value passed to `squeue --states`
    pub fn as_arg(&self) -> &'static str {
        match self {
            QueueState::Pending => "PENDING",
            QueueState::Running => "RUNNING",
        }
    }
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_arg())
    }
}

/// Array index part of a job ID as reported by `squeue -O JobArrayID`
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArrayIndex {
    /// An individual task, e.g. the `7` in `1234_7`
    Task(String),
    /// A bracketed expression covering one or more pending tasks, e.g. the
    /// `2-5%4` in `1234_[2-5%4]`
    Tasks(String),
}

/// A job ID split into its base ID and optional array index
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobId {
    pub base: String,
    pub array_index: Option<ArrayIndex>,
}

impl JobId {
    /// Returns true for standalone jobs and for arrays consisting solely of task 1.
    /// Such jobs are never re-prioritized.
    pub fn is_single_task(&self) -> bool {
        match &self.array_index {
            None => true,
            Some(ArrayIndex::Tasks(tasks)) => tasks == "1",
            Some(ArrayIndex::Task(_)) => false,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct InvalidJobId(String);

impl fmt::Display for InvalidJobId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid job ID {:?}", self.0)
    }
}

impl std::error::Error for InvalidJobId {}

impl FromStr for JobId {
    type Err = InvalidJobId;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidJobId(value.to_string());

        let (base, array_index) = match value.split_once('_') {
            None => (value, None),
            Some((base, index)) => {
                let index = if let Some(tasks) = index.strip_prefix('[') {
                    let tasks = tasks.strip_suffix(']').ok_or_else(invalid)?;
                    ArrayIndex::Tasks(tasks.to_string())
                } else {
                    ArrayIndex::Task(index.to_string())
                };

                (base, Some(index))
            }
        };

        match &array_index {
            Some(ArrayIndex::Task(v)) | Some(ArrayIndex::Tasks(v)) if v.is_empty() => {
                return Err(invalid())
            }
            _ => {}
        }

        if base.is_empty() || base.contains(|c: char| c.is_whitespace() || c == ',') {
            return Err(invalid());
        }

        Ok(JobId {
            base: base.to_string(),
            array_index,
        })
    }
}

/// Formats the job ID to match squeue output, which is also accepted by `scontrol`
impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.array_index {
            None => fmt::Display::fmt(&self.base, f),
            Some(ArrayIndex::Task(task)) => write!(f, "{}_{}", self.base, task),
            Some(ArrayIndex::Tasks(tasks)) => write!(f, "{}_[{}]", self.base, tasks),
        }
    }
}

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(de::Error::custom)
    }
}

/// Joins job IDs into the comma-separated list accepted by `scontrol`
pub fn join_ids(jobs: &[JobId]) -> String {
    jobs.iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// A single row of `squeue` output; one per array task or standalone job
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct QueueEntry {
    /// Job ID including the array index, if any
    #[serde(rename = "JOBID")]
    pub id: JobId,
    /// Owner of the job
    #[serde(rename = "USER")]
    pub user: String,
    /// Number of CPUs allocated to (running) or requested by (pending) the job
    #[serde(rename = "CPUS")]
    pub cpus: usize,
}

impl QueueEntry {
    /// Parses the pipe-separated output of `squeue --Format`, including the header
    pub fn parse<R>(reader: R) -> Result<Vec<QueueEntry>, csv::Error>
    where
        R: std::io::Read,
    {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'|')
            .trim(csv::Trim::All)
            .from_reader(reader);

        reader.deserialize().collect()
    }
}

/// Generates the arguments for listing the jobs in `partition` with the given
/// state, optionally restricted to a single user
pub fn squeue_args(partition: &str, state: QueueState, user: Option<&str>) -> Vec<String> {
    let mut args = vec![
        "--partition".to_string(),
        partition.to_string(),
        "--states".to_string(),
        state.as_arg().to_string(),
    ];

    if let Some(user) = user {
        args.push("--user".to_string());
        args.push(user.to_string());
    }

    args.push("--Format".to_string());
    args.push(squeue_format());
    args
}

/// Generates parameter for the `-O` command-line option for `squeue`
fn squeue_format() -> String {
    format_string(["JobArrayID", "UserName", "NumCPUs"].iter())
}

pub(super) fn parse_entries(command: &str, stdout: &[u8]) -> Result<Vec<QueueEntry>, ProbeError> {
    QueueEntry::parse(stdout).map_err(|source| ProbeError::Parse {
        command: command.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(value: &str) -> JobId {
        value.parse().unwrap()
    }

    #[test]
    fn test_parse_job_id() {
        assert_eq!(
            job("1234"),
            JobId {
                base: "1234".into(),
                array_index: None
            }
        );
        assert_eq!(
            job("78_[2]"),
            JobId {
                base: "78".into(),
                array_index: Some(ArrayIndex::Tasks("2".into()))
            }
        );
        assert_eq!(
            job("78_[2-5%4]"),
            JobId {
                base: "78".into(),
                array_index: Some(ArrayIndex::Tasks("2-5%4".into()))
            }
        );
        assert_eq!(
            job("78_3"),
            JobId {
                base: "78".into(),
                array_index: Some(ArrayIndex::Task("3".into()))
            }
        );
    }

    #[test]
    fn test_parse_invalid_job_id() {
        for value in ["", "_[1]", "78_", "78_[", "78_[]", "78_[2", "7 8", "78,79"] {
            assert!(value.parse::<JobId>().is_err(), "{:?} was accepted", value);
        }
    }

    #[test]
    fn test_display_matches_squeue() {
        for value in ["1234", "77_[1]", "78_[2]", "78_[2-5,7]", "78_12"] {
            assert_eq!(job(value).to_string(), value);
        }
    }

    #[test]
    fn test_join_ids() {
        assert_eq!(join_ids(&[job("78_[2]"), job("78_[5]")]), "78_[2],78_[5]");
        assert_eq!(join_ids(&[job("1234")]), "1234");
        assert_eq!(join_ids(&[]), "");
    }

    #[test]
    fn test_single_task() {
        assert!(job("1234").is_single_task());
        assert!(job("77_[1]").is_single_task());
        assert!(!job("78_[2]").is_single_task());
        assert!(!job("78_[1-4]").is_single_task());
        assert!(!job("78_1").is_single_task());
    }

    #[test]
    fn test_parse_entries() {
        let output = b"JOBID|USER|CPUS\n77_[1]|alice|1\n78_[2-5]|bob  |4\n79   |alice|16\n";
        let entries = QueueEntry::parse(&output[..]).unwrap();

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].id, job("77_[1]"));
        assert_eq!(entries[1].user, "bob");
        assert_eq!(entries[1].cpus, 4);
        assert_eq!(entries[2].id, job("79"));
        assert_eq!(entries[2].cpus, 16);
    }

    #[test]
    fn test_parse_empty_listing() {
        assert_eq!(QueueEntry::parse(&b"JOBID|USER|CPUS\n"[..]).unwrap(), vec![]);
        assert_eq!(QueueEntry::parse(&b""[..]).unwrap(), vec![]);
    }

    #[test]
    fn test_parse_malformed_entries() {
        assert!(QueueEntry::parse(&b"JOBID|USER|CPUS\n78_[2]|bob|many\n"[..]).is_err());
        assert!(QueueEntry::parse(&b"JOBID|USER|CPUS\n78_[2]|bob\n"[..]).is_err());
    }

    #[test]
    fn test_squeue_args() {
        assert_eq!(
            squeue_args("infai_1", QueueState::Running, Some("alice")),
            [
                "--partition",
                "infai_1",
                "--states",
                "RUNNING",
                "--user",
                "alice",
                "--Format",
                "JobArrayID:0|,UserName:0|,NumCPUs:0"
            ]
        );
        assert_eq!(
            squeue_args("infai_2", QueueState::Pending, None),
            [
                "--partition",
                "infai_2",
                "--states",
                "PENDING",
                "--Format",
                "JobArrayID:0|,UserName:0|,NumCPUs:0"
            ]
        );
    }
}
