//! Search-and-replace file editing with read-before-edit enforcement.

use super::read_file::resolve;
use super::tracker::TrackerStatus;
use super::{parse_args, Tool, ToolContext, ToolResult, ToolSpec};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Deserialize)]
struct EditFileInput {
    path: String,
    search: String,
    replace: String,
}

pub struct EditFileTool;

#[async_trait::async_trait]
impl Tool for EditFileTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "edit_file",
            description: "Make a targeted edit to an existing file by replacing an exact text \
                match. The search text must match exactly one location in the file. Use this \
                for small, precise changes. Read the file first; editing an unread file is \
                refused. For new files, use write_file instead.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Path to the file to edit."
                    },
                    "search": {
                        "type": "string",
                        "description": "Exact text to find and replace. Can and should span \
                            multiple lines when changing a block. Must match exactly one \
                            location; include enough surrounding context to be unique."
                    },
                    "replace": {
                        "type": "string",
                        "description": "Replacement text. Use an empty string to delete the \
                            matched text."
                    }
                },
                "required": ["path", "search", "replace"]
            }),
            requires_confirmation: true,
        }
    }

    async fn execute(&self, context: &mut ToolContext<'_>, args: &Value) -> ToolResult {
        let input: EditFileInput = match parse_args(&self.spec(), args) {
            Ok(input) => input,
            Err(failure) => return failure,
        };

        let target = resolve(&input.path);
        if !target.exists() {
            return ToolResult::failure(format!("File not found: {}", target.display()));
        }
        if !target.is_file() {
            return ToolResult::failure(format!("Not a file: {}", target.display()));
        }
        let content = match std::fs::read_to_string(&target) {
            Ok(content) => content,
            Err(err) => return ToolResult::failure(format!("Error reading file: {err}")),
        };

        // Read-before-edit: the tracker must hold the hash of what is on
        // disk right now.
        match context.tracker.status(&target, &content) {
            TrackerStatus::Unread => {
                return ToolResult::failure(format!(
                    "Cannot edit {}: you must read file before editing it. \
                     Call read_file first, then retry.",
                    target.display()
                ));
            }
            TrackerStatus::Stale => {
                return ToolResult::failure(format!(
                    "Cannot edit {}: the file changed since it was last read. \
                     Read it again to see the current content, then retry.",
                    target.display()
                ));
            }
            TrackerStatus::Current => {}
        }

        let matches = content.matches(&input.search).count();
        if matches == 0 {
            let mut message = format!("search text not found in {}.", target.display());
            let suggestions = fuzzy_suggestions(&content, &input.search);
            if !suggestions.is_empty() {
                message.push_str("\nClosest lines in the file:");
                for (line_no, line) in suggestions {
                    message.push_str(&format!("\n  {line_no:4} | {line}"));
                }
            }
            return ToolResult::failure(message);
        }
        if matches > 1 {
            return ToolResult::failure(format!(
                "search text matches {matches} locations (must be unique). \
                 Include more surrounding context to pin down one occurrence."
            ));
        }

        if let Err(err) = context.backups.backup(&target) {
            return ToolResult::failure(format!("Backup refused: {err}"));
        }

        let new_content = content.replacen(&input.search, &input.replace, 1);
        if let Err(err) = std::fs::write(&target, &new_content) {
            return ToolResult::failure(format!("Error writing file: {err}"));
        }
        context.tracker.record(&target, &new_content);

        // Match position, for the context window below.
        let match_offset = content.find(&input.search).unwrap_or(0);
        let first_line = content[..match_offset].matches('\n').count() + 1;
        let replace_lines = if input.replace.is_empty() {
            0
        } else {
            input.replace.matches('\n').count() + 1
        };

        let diff = similar::TextDiff::from_lines(content.as_str(), new_content.as_str())
            .unified_diff()
            .header(&input.path, &input.path)
            .to_string();

        let window = context_window(&new_content, first_line, replace_lines);

        ToolResult::success(format!(
            "Edited {} at line {first_line}.\n\n{diff}\n{window}",
            target.display()
        ))
    }
}

/// Lines around the edit point (±5) with line numbers, so the model sees
/// the result in place without another read.
fn context_window(content: &str, first_line: usize, replaced_lines: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let start = first_line.saturating_sub(6); // zero-based, 5 lines before
    let end = (first_line - 1 + replaced_lines + 5).min(lines.len());
    let numbered: Vec<String> = lines[start..end]
        .iter()
        .enumerate()
        .map(|(i, line)| format!("{:4} | {}", start + i + 1, line))
        .collect();
    format!(
        "[lines {}-{} after edit]\n{}",
        start + 1,
        end,
        numbered.join("\n")
    )
}

/// Up to three file lines with the smallest edit distance to the first
/// line of the search text. Helps the model correct a stale mental copy.
fn fuzzy_suggestions(content: &str, search: &str) -> Vec<(usize, String)> {
    let needle = search.lines().next().unwrap_or("").trim();
    if needle.is_empty() {
        return Vec::new();
    }
    let threshold = (needle.chars().count() / 2).max(5);
    let mut scored: Vec<(usize, usize, String)> = content
        .lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                return None;
            }
            let distance = levenshtein(needle, trimmed);
            (distance <= threshold).then(|| (distance, index + 1, line.to_string()))
        })
        .collect();
    scored.sort_by_key(|(distance, line_no, _)| (*distance, *line_no));
    scored
        .into_iter()
        .take(3)
        .map(|(_, line_no, line)| (line_no, line))
        .collect()
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::ContextFixture;
    use crate::tools::tracker::TrackerStatus;

    async fn run(fixture: &mut ContextFixture, args: Value) -> ToolResult {
        let mut context = fixture.context();
        EditFileTool.execute(&mut context, &args).await
    }

    fn edit_args(path: &std::path::Path, search: &str, replace: &str) -> Value {
        json!({"path": path.to_string_lossy(), "search": search, "replace": replace})
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[tokio::test]
    async fn refuses_editing_an_unread_file() {
        let mut fixture = ContextFixture::new();
        let path = fixture.dir.path().join("a.txt");
        std::fs::write(&path, "old text").unwrap();

        let result = run(&mut fixture, edit_args(&path, "old", "new")).await;
        assert!(!result.is_success());
        assert!(result.error.contains("must read file before editing"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "old text");
    }

    #[tokio::test]
    async fn refuses_editing_a_file_changed_since_the_read() {
        let mut fixture = ContextFixture::new();
        let path = fixture.dir.path().join("a.txt");
        std::fs::write(&path, "version 1").unwrap();
        fixture.tracker.record(&path, "version 1");
        std::fs::write(&path, "version 2 from elsewhere").unwrap();

        let result = run(&mut fixture, edit_args(&path, "version", "v")).await;
        assert!(!result.is_success());
        assert!(result.error.contains("changed since it was last read"));
    }

    #[tokio::test]
    async fn edits_a_unique_match_with_backup_and_diff() {
        let mut fixture = ContextFixture::new();
        let path = fixture.dir.path().join("main.py");
        let content = "def main():\n    print(\"hello\")\n    return 0\n";
        std::fs::write(&path, content).unwrap();
        fixture.tracker.record(&path, content);

        let result = run(
            &mut fixture,
            edit_args(&path, "print(\"hello\")", "print(\"goodbye\")"),
        )
        .await;
        assert!(result.is_success(), "{}", result.error);
        let new_content = std::fs::read_to_string(&path).unwrap();
        assert!(new_content.contains("goodbye"));
        // Backup precedes the write.
        assert_eq!(fixture.backups.history().len(), 1);
        // Unified diff plus a context window.
        assert!(result.output.contains("-    print(\"hello\")"));
        assert!(result.output.contains("+    print(\"goodbye\")"));
        assert!(result.output.contains("after edit"));
        // The tracker now holds the post-edit hash.
        assert_eq!(
            fixture.tracker.status(&path, &new_content),
            TrackerStatus::Current
        );
    }

    #[tokio::test]
    async fn zero_matches_suggests_close_lines() {
        let mut fixture = ContextFixture::new();
        let path = fixture.dir.path().join("conf.ini");
        let content = "max_connections = 100\ntimeout = 30\n";
        std::fs::write(&path, content).unwrap();
        fixture.tracker.record(&path, content);

        let result = run(
            &mut fixture,
            edit_args(&path, "max_connection = 100", "max_connection = 200"),
        )
        .await;
        assert!(!result.is_success());
        assert!(result.error.contains("not found"));
        assert!(result.error.contains("max_connections = 100"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), content);
    }

    #[tokio::test]
    async fn multiple_matches_are_ambiguous() {
        let mut fixture = ContextFixture::new();
        let path = fixture.dir.path().join("dup.txt");
        let content = "token\ntoken\ntoken\n";
        std::fs::write(&path, content).unwrap();
        fixture.tracker.record(&path, content);

        let result = run(&mut fixture, edit_args(&path, "token", "value")).await;
        assert!(!result.is_success());
        assert!(result.error.contains("matches 3 locations"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), content);
    }

    #[tokio::test]
    async fn empty_replacement_deletes_the_match() {
        let mut fixture = ContextFixture::new();
        let path = fixture.dir.path().join("x.txt");
        let content = "keep\nremove me\nkeep too\n";
        std::fs::write(&path, content).unwrap();
        fixture.tracker.record(&path, content);

        let result = run(&mut fixture, edit_args(&path, "remove me\n", "")).await;
        assert!(result.is_success(), "{}", result.error);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "keep\nkeep too\n"
        );
    }
}
