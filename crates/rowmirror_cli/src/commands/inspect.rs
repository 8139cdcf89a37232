//! Inspect command implementation.

use rowmirror_protocol::Job;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// One decoded job.
#[derive(Debug, Serialize)]
pub struct JobSummary {
    /// 1-based line in the job file.
    pub line: usize,
    /// Operation name.
    pub operation: String,
    /// Entity type.
    pub entity: String,
    /// Pre-write identity of an update.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_identity: Option<String>,
    /// Own identity carried in the payload, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Payload keys.
    pub fields: Vec<String>,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let jobs = summarize(path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&jobs)?);
        }
        _ => {
            print_text_output(path, &jobs);
        }
    }

    Ok(())
}

/// Decodes every job in a JSON-lines file. Blank lines are skipped.
pub fn summarize(path: &Path) -> Result<Vec<JobSummary>, Box<dyn std::error::Error>> {
    let file = File::open(path).map_err(|e| format!("cannot open {}: {e}", path.display()))?;
    let mut jobs = Vec::new();

    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let job = Job::from_wire(&line).map_err(|e| format!("line {}: {e}", index + 1))?;
        let payload = job
            .payload()
            .map_err(|e| format!("line {}: {e}", index + 1))?;

        jobs.push(JobSummary {
            line: index + 1,
            operation: job.operation.to_string(),
            entity: job.entity.to_string(),
            original_identity: job.original_identity.as_ref().map(ToString::to_string),
            reference: payload.own_reference().map(|r| r.to_string()),
            fields: payload.iter().map(|(key, _)| key.to_string()).collect(),
        });
    }

    Ok(jobs)
}

fn print_text_output(path: &Path, jobs: &[JobSummary]) {
    println!("Job file: {}", path.display());
    println!("Jobs: {}", jobs.len());
    println!();

    for job in jobs {
        println!("  [{}] {} {}", job.line, job.operation, job.entity);
        if let Some(identity) = &job.original_identity {
            println!("      original: {identity}");
        }
        if let Some(reference) = &job.reference {
            println!("      identity: {reference}");
        }
        println!("      fields:   {}", job.fields.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowmirror_model::{EntityKey, Identity, Value};
    use rowmirror_protocol::{ChangeEvent, Payload};
    use serde_json::json;
    use std::io::Write;

    fn entity() -> EntityKey {
        EntityKey::new("local", "relatedmodel")
    }

    fn payload(value: serde_json::Value) -> Payload {
        Payload::from_json_str(&value.to_string()).unwrap()
    }

    #[test]
    fn summarizes_each_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let create = ChangeEvent::create(entity(), payload(json!({"pk": ["foo"], "char_field": "foo"})));
        let update = ChangeEvent::update(
            entity(),
            Identity::NaturalKey(vec![Value::Text("foo".into())]),
            payload(json!({"pk": ["bar"], "char_field": "bar"})),
        );
        writeln!(file, "{}", create.to_job().to_wire().unwrap()).unwrap();
        writeln!(file).unwrap();
        writeln!(file, "{}", update.to_job().to_wire().unwrap()).unwrap();

        let jobs = summarize(file.path()).unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].line, 1);
        assert_eq!(jobs[0].operation, "create");
        assert_eq!(jobs[0].entity, "local.relatedmodel");
        assert!(jobs[0].original_identity.is_none());
        assert_eq!(jobs[1].line, 3);
        assert!(jobs[1].original_identity.is_some());
        assert!(jobs[1].fields.contains(&"char_field".to_string()));
    }

    #[test]
    fn malformed_line_names_its_position() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not json").unwrap();

        let err = summarize(file.path()).unwrap_err();
        assert!(err.to_string().starts_with("line 1:"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(summarize(&dir.path().join("absent.jsonl")).is_err());
    }
}
