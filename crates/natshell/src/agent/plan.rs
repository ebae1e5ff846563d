//! Markdown plan parsing for `/plan` and `/exeplan`.
//!
//! A plan file has an optional `#` title, optional preamble text (tech
//! stack, conventions), and one `##` heading per step. Headings may carry
//! a `Step N:` or `N.` prefix, which is stripped.

use anyhow::{bail, Context, Result};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

#[derive(Debug, Clone)]
pub struct PlanStep {
    pub number: usize,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct Plan {
    pub title: String,
    pub preamble: String,
    pub steps: Vec<PlanStep>,
}

fn step_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^##\s+(?:(?:Step\s+)?(\d+)[.:]\s*)?(.+)$").unwrap())
}

pub fn parse_plan_file(path: &Path) -> Result<Plan> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("plan file not found: {}", path.display()))?;
    parse_plan_text(&text)
}

pub fn parse_plan_text(text: &str) -> Result<Plan> {
    let mut title = "Untitled Plan".to_string();
    let mut preamble_lines: Vec<&str> = Vec::new();
    let mut steps: Vec<PlanStep> = Vec::new();
    let mut current_title: Option<String> = None;
    let mut current_body: Vec<&str> = Vec::new();
    let mut in_preamble = true;

    let mut flush = |title: &mut Option<String>, body: &mut Vec<&str>, steps: &mut Vec<PlanStep>| {
        if let Some(step_title) = title.take() {
            steps.push(PlanStep {
                number: steps.len() + 1,
                title: step_title,
                body: body.join("\n").trim().to_string(),
            });
            body.clear();
        }
    };

    for line in text.lines() {
        if in_preamble && line.starts_with("# ") && !line.starts_with("## ") {
            title = line[2..].trim().to_string();
            continue;
        }
        if let Some(captures) = step_heading_re().captures(line) {
            flush(&mut current_title, &mut current_body, &mut steps);
            in_preamble = false;
            current_title = Some(captures[2].trim().to_string());
            continue;
        }
        if in_preamble {
            preamble_lines.push(line);
        } else {
            current_body.push(line);
        }
    }
    flush(&mut current_title, &mut current_body, &mut steps);

    if steps.is_empty() {
        bail!("no steps found — expected at least one ## heading");
    }

    Ok(Plan {
        title,
        preamble: preamble_lines.join("\n").trim().to_string(),
        steps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# Upgrade the web stack

Debian 12 host, nginx + systemd. Always reload rather than restart.

## Step 1: Check current versions
Run nginx -v and systemctl status nginx.

## 2. Upgrade packages
```
apt update && apt upgrade nginx
```

## Validate config
nginx -t before reloading.
";

    #[test]
    fn parses_title_preamble_and_steps() {
        let plan = parse_plan_text(SAMPLE).unwrap();
        assert_eq!(plan.title, "Upgrade the web stack");
        assert!(plan.preamble.contains("Debian 12 host"));
        assert_eq!(plan.steps.len(), 3);
        assert_eq!(plan.steps[0].title, "Check current versions");
        assert_eq!(plan.steps[1].title, "Upgrade packages");
        assert_eq!(plan.steps[1].number, 2);
        assert!(plan.steps[1].body.contains("apt update"));
        assert_eq!(plan.steps[2].title, "Validate config");
    }

    #[test]
    fn plan_without_steps_is_an_error() {
        assert!(parse_plan_text("# Title only\njust prose\n").is_err());
    }

    #[test]
    fn untitled_plan_gets_a_default_title() {
        let plan = parse_plan_text("## Only step\ndo the thing\n").unwrap();
        assert_eq!(plan.title, "Untitled Plan");
        assert_eq!(plan.steps.len(), 1);
        assert!(plan.preamble.is_empty());
    }
}
