use std::{fs, path::PathBuf};

/// Renders rows as a Markdown table with one column per header.
pub fn markdown_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push(format!("| {} |", headers.join(" | ")));
    lines.push(format!("|{}", "---|".repeat(headers.len())));
    lines.extend(rows.iter().map(|row| format!("| {} |", row.join(" | "))));
    lines.join("\n")
}

/// Replaces (or appends) the `section` block in `benchmarks/RESULTS.md`.
pub fn record_section(section: &str, content: &str) -> std::io::Result<PathBuf> {
    let tag = section.to_uppercase();
    let start = format!("<!-- {tag}_START -->");
    let end = format!("<!-- {tag}_END -->");
    let block = format!("{start}\n{content}\n{end}");

    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("benchmarks/RESULTS.md");
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut body = fs::read_to_string(&path)
        .unwrap_or_else(|_| "# Causal attention benchmarks\n".to_string());

    match (body.find(&start), body.find(&end)) {
        (Some(from), Some(to)) if from < to => {
            body.replace_range(from..to + end.len(), &block);
        }
        _ => {
            if !body.ends_with('\n') {
                body.push('\n');
            }
            body.push('\n');
            body.push_str(&block);
            body.push('\n');
        }
    }
    fs::write(&path, body)?;
    Ok(path)
}
