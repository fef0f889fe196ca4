use anyhow::Result;
use profmerge::{InspectOutcome, ReportOutcome};
use serde::Serialize;
use serde_json::Value;

pub struct CliLogger {
    json: bool,
    no_color: bool,
}

impl CliLogger {
    pub fn new(json: bool, no_color: bool) -> Self {
        Self { json, no_color }
    }

    pub fn print_serialized<T: Serialize>(&self, value: &T) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(value)?);
            return Ok(());
        }

        let rendered = render_value(&serde_json::to_value(value)?, 0);
        println!("{rendered}");
        Ok(())
    }

    pub fn print_report(&self, outcome: &ReportOutcome) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(outcome)?);
            return Ok(());
        }

        for skipped in &outcome.skipped {
            self.print_warning(skipped);
        }
        match &outcome.output {
            Some(path) => println!(
                "{} {} ({} snapshots)",
                self.style("report", "90"),
                path.display(),
                outcome.snapshots
            ),
            None => print!("{}", outcome.content),
        }
        Ok(())
    }

    pub fn print_inspection(&self, outcome: &InspectOutcome) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(outcome)?);
            return Ok(());
        }

        let meta = &outcome.meta;
        let digest = if outcome.digest_matches {
            self.style("ok", "32;1")
        } else {
            self.style("MISMATCH", "31;1")
        };

        let mut out = String::new();
        out.push_str(&format!(
            "{} {}\n",
            self.style("snapshot", "36;1"),
            outcome.snapshot.display()
        ));
        out.push_str(&format!("{} {}\n", self.style("entry", "90"), meta.entry_point));
        out.push_str(&format!(
            "{} {} - {} - {}\n",
            self.style("unit", "90"),
            meta.group_name,
            meta.task_name,
            meta.execution_unit_id
        ));
        out.push_str(&format!("{} {}\n", self.style("task_id", "90"), meta.task_id));
        out.push_str(&format!("{} {}\n", self.style("pid", "90"), meta.pid));
        out.push_str(&format!(
            "{} {} ({})\n",
            self.style("recorded", "90"),
            meta.recorded_at,
            meta.timestamp
        ));
        out.push_str(&format!("{} {}\n", self.style("digest", "90"), digest));
        out.push_str(&format!(
            "{} sites={} calls={} primitive={} time={:.6}s\n",
            self.style("totals", "90"),
            outcome.sites,
            outcome.total_calls,
            outcome.primitive_calls,
            outcome.total_time
        ));
        println!("{}", out.trim_end());
        Ok(())
    }

    pub fn print_error(&self, msg: &str) {
        if self.json {
            let out = serde_json::json!({
                "status": "error",
                "code": "error",
                "message": msg,
            });
            println!("{out}");
            return;
        }
        eprintln!("{} {msg}", self.style("error", "31;1"));
    }

    pub fn print_warning(&self, msg: &str) {
        if self.json {
            let out = serde_json::json!({
                "status": "warning",
                "code": "warning",
                "message": msg,
            });
            eprintln!("{out}");
            return;
        }
        eprintln!("{} {msg}", self.style("warn", "33;1"));
    }

    fn style(&self, text: &str, ansi: &str) -> String {
        if self.no_color {
            return text.to_string();
        }
        format!("\x1b[{ansi}m{text}\x1b[0m")
    }
}

fn render_value(value: &Value, indent: usize) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(v) => v.to_string(),
        Value::Number(v) => v.to_string(),
        Value::String(v) => v.clone(),
        Value::Array(items) => render_array(items, indent),
        Value::Object(map) => render_object(map, indent),
    }
}

fn render_array(items: &[Value], indent: usize) -> String {
    if items.is_empty() {
        return "[]".to_string();
    }

    let pad = " ".repeat(indent);
    let mut out = String::new();
    for item in items {
        match item {
            Value::Object(_) | Value::Array(_) => {
                out.push_str(&format!("{pad}-\n{}\n", render_value(item, indent + 2)));
            }
            _ => out.push_str(&format!("{pad}- {}\n", render_value(item, indent + 2))),
        }
    }
    out.trim_end().to_string()
}

fn render_object(map: &serde_json::Map<String, Value>, indent: usize) -> String {
    if map.is_empty() {
        return "{}".to_string();
    }

    let pad = " ".repeat(indent);
    let mut out = String::new();
    for (key, value) in map {
        match value {
            Value::Object(_) | Value::Array(_) => {
                out.push_str(&format!("{pad}{key}:\n{}\n", render_value(value, indent + 2)));
            }
            _ => out.push_str(&format!("{pad}{key}: {}\n", render_value(value, indent + 2))),
        }
    }
    out.trim_end().to_string()
}
