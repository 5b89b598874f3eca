use std::path::PathBuf;

use clap::Parser;
use jobservice_queue::{JobRequest, Parameters};

/// Parsed command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "jobservice", version, about = "Registry job service worker")]
pub struct CliArgs {
    /// Path to configuration file (.toml, .yaml/.yml or .json)
    #[arg(short = 'c', long = "config-path", env = "JOBSERVICE_CONFIG_PATH")]
    pub config_path: Option<PathBuf>,

    /// Enqueue a job at start, e.g. `--submit gc` or
    /// `--submit 'retention.sweep={"repository":"library/app","retain":3}'`
    #[arg(long = "submit", value_name = "TYPE[=JSON]", value_parser = parse_submission)]
    pub submit: Vec<Submission>,

    /// Enqueue a job on a cron schedule (seconds field first), e.g.
    /// `--schedule 'gc@0 0 3 * * *'`
    #[arg(long = "schedule", value_name = "TYPE[=JSON]@CRON", value_parser = parse_schedule)]
    pub schedule: Vec<Schedule>,
}

/// A periodic job requested on the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    pub cron: String,
    pub submission: Submission,
}

/// A job requested on the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub job_type: String,
    pub parameters: Parameters,
}

impl Submission {
    pub fn into_request(self) -> JobRequest {
        JobRequest::new(self.job_type, self.parameters)
    }
}

fn parse_submission(s: &str) -> Result<Submission, String> {
    let (job_type, json) = match s.split_once('=') {
        Some((job_type, json)) => (job_type.trim(), Some(json)),
        None => (s.trim(), None),
    };
    if job_type.is_empty() {
        return Err("job type must not be empty".into());
    }

    let parameters = match json {
        Some(json) => match serde_json::from_str(json) {
            Ok(serde_json::Value::Object(map)) => map,
            Ok(_) => return Err("job parameters must be a JSON object".into()),
            Err(e) => return Err(format!("invalid job parameters: {e}")),
        },
        None => Parameters::new(),
    };

    Ok(Submission {
        job_type: job_type.to_string(),
        parameters,
    })
}

fn parse_schedule(s: &str) -> Result<Schedule, String> {
    let Some((job, cron)) = s.rsplit_once('@') else {
        return Err("expected TYPE[=JSON]@CRON".into());
    };
    let cron = cron.trim();
    if cron.is_empty() {
        return Err("cron expression must not be empty".into());
    }
    Ok(Schedule {
        cron: cron.to_string(),
        submission: parse_submission(job)?,
    })
}
