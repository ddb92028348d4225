use anyhow::{Context, Result};
use byte_unit::{Byte, UnitType};
use colored::*;
use comfy_table::{Cell, CellAlignment, Color, ContentArrangement, Table, presets::UTF8_FULL};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use xask_core::{CostBreakdown, FileRecord, UsageRecord};

pub struct Summary<'a> {
    pub annotated_tree: &'a str,
    pub files: &'a [FileRecord],
    pub rules: &'a [FileRecord],
    pub estimated_tokens: usize,
    pub correction: f64,
    pub top_files: usize,
}

pub fn format_estimate(tokens: usize, correction: f64) -> String {
    format!("{} (cl100k x {:.2})", tokens, correction)
}

/// Largest files by estimate, ties kept in path order.
pub fn top_files(files: &[FileRecord], n: usize) -> Vec<&FileRecord> {
    let mut sorted: Vec<&FileRecord> = files.iter().collect();
    sorted.sort_by(|a, b| b.estimated_tokens.cmp(&a.estimated_tokens));
    sorted.truncate(n);
    sorted
}

fn readable_size(bytes: usize) -> String {
    let byte = Byte::from_u128(bytes as u128).unwrap_or_default();
    byte.get_appropriate_unit(UnitType::Binary).to_string()
}

pub fn print_summary(summary: &Summary<'_>) {
    println!();
    println!("{}", " Included Files ".green().bold().underline());
    if summary.annotated_tree.is_empty() {
        println!("{}", "(No files matched the include patterns)".yellow());
    } else {
        print!("{}", summary.annotated_tree);
    }

    let largest = top_files(summary.files, summary.top_files);
    if !largest.is_empty() {
        println!("\n{}", " Largest Files ".green().bold().underline());
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            Cell::new("Path").fg(Color::Green),
            Cell::new("Size").fg(Color::Green),
            Cell::new("Est. Tokens").fg(Color::Green),
        ]);
        for file in largest {
            table.add_row(vec![
                Cell::new(&file.path).fg(Color::Cyan),
                Cell::new(readable_size(file.content.len()))
                    .set_alignment(CellAlignment::Right)
                    .fg(Color::DarkGrey),
                Cell::new(file.estimated_tokens).set_alignment(CellAlignment::Right),
            ]);
        }
        println!("{table}");
    }

    println!();
    println!(
        "{:<20} {}",
        "Files:".green(),
        summary.files.len().to_string().cyan()
    );
    if !summary.rules.is_empty() {
        let names: Vec<&str> = summary.rules.iter().map(|r| r.path.as_str()).collect();
        println!("{:<20} {}", "Rules:".green(), names.join(", ").cyan());
    }
    println!(
        "{:<20} {}",
        "Est. Tokens:".green(),
        format_estimate(summary.estimated_tokens, summary.correction).cyan()
    );
    println!();
}

pub fn print_remote_count(tokens: usize, limit: usize) {
    println!(
        "{:<20} {} {}",
        "API Token Count:".green(),
        tokens.to_string().cyan(),
        format!("(limit {})", limit).dimmed()
    );
}

pub fn print_cost(usage: &UsageRecord, breakdown: &CostBreakdown) {
    println!();
    println!("{}", " Usage & Cost ".green().bold().underline());
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Kind").fg(Color::Green),
        Cell::new("Tokens").fg(Color::Green),
        Cell::new("Cost ($)").fg(Color::Green),
    ]);
    let rows = [
        ("Input", usage.input_tokens, breakdown.input_cost),
        ("Cache write", usage.cache_write_tokens, breakdown.cache_write_cost),
        ("Cache read", usage.cache_read_tokens, breakdown.cache_read_cost),
        ("Output", usage.output_tokens, breakdown.output_cost),
    ];
    for (kind, tokens, cost) in rows {
        table.add_row(vec![
            Cell::new(kind).fg(Color::Cyan),
            Cell::new(tokens).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.4}", cost)).set_alignment(CellAlignment::Right),
        ]);
    }
    println!("{table}");
    println!(
        "{:<20} {}",
        "Total Input Tokens:".green(),
        breakdown.total_input_tokens.to_string().cyan()
    );
    println!(
        "{:<20} {}",
        "Total Cost:".green(),
        format!("${:.4}", breakdown.total_cost).cyan().bold()
    );
}

pub fn write_to_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let mut file =
        File::create(path).with_context(|| format!("Failed to create file {}", path.display()))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("Failed to write to file {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, tokens: usize) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            last_modified_ms: 0,
            content: String::new(),
            rendered_block: String::new(),
            estimated_tokens: tokens,
        }
    }

    #[test]
    fn top_files_are_largest_first_and_stable() {
        let files = vec![record("a", 5), record("b", 9), record("c", 5), record("d", 1)];
        let top: Vec<&str> = top_files(&files, 3).iter().map(|r| r.path.as_str()).collect();
        assert_eq!(top, vec!["b", "a", "c"]);
    }

    #[test]
    fn estimate_line_shows_correction_factor() {
        assert_eq!(format_estimate(1234, 1.2), "1234 (cl100k x 1.20)");
    }

    #[test]
    fn write_to_file_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/response.md");
        write_to_file(&path, "first").unwrap();
        write_to_file(&path, "second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
    }
}
