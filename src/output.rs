//! Output formatting for search results

use crate::search::{FileMatch, SearchResult, Status};
use std::io::{self, Write};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Print a result in grep style: matches to stdout, statuses to stderr
pub fn print_result(result: &SearchResult, color: bool, heading: bool) -> io::Result<()> {
    let choice = if color {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    };
    let mut stdout = StandardStream::stdout(choice);
    write_files(&mut stdout, &result.files, heading)?;

    let mut stderr = StandardStream::stderr(choice);
    write_summary(&mut stderr, result)
}

/// Print only file names (for -l flag)
pub fn print_files_only(result: &SearchResult) -> io::Result<()> {
    let mut stdout = StandardStream::stdout(ColorChoice::Auto);
    for file in &result.files {
        write_file_name(&mut stdout, file)?;
        writeln!(stdout)?;
    }
    Ok(())
}

/// Write file matches. With `heading`, each file gets a header line and
/// its matches are listed under it; otherwise every line carries the path.
pub fn write_files<W: WriteColor>(out: &mut W, files: &[FileMatch], heading: bool) -> io::Result<()> {
    for (i, file) in files.iter().enumerate() {
        if heading {
            if i > 0 {
                // Add blank line between files
                writeln!(out)?;
            }
            out.set_color(ColorSpec::new().set_fg(Some(Color::Magenta)).set_bold(true))?;
            write_file_name(out, file)?;
            out.reset()?;
            writeln!(out)?;
        }

        // File name matches have no lines
        if file.line_matches.is_empty() && !heading {
            write_file_name(out, file)?;
            writeln!(out)?;
            continue;
        }

        for m in &file.line_matches {
            if !heading {
                out.set_color(ColorSpec::new().set_fg(Some(Color::Magenta)))?;
                write_file_name(out, file)?;
                out.reset()?;
                write!(out, ":")?;
            }
            out.set_color(ColorSpec::new().set_fg(Some(Color::Green)))?;
            write!(out, "{}", m.line_number)?;
            out.reset()?;
            writeln!(out, ":{}", m.line)?;
        }
    }
    Ok(())
}

fn write_file_name<W: Write>(out: &mut W, file: &FileMatch) -> io::Result<()> {
    match &file.commit {
        Some(commit) => write!(out, "{}@{}:{}", file.repository, short(commit), file.path),
        None => write!(out, "{}:{}", file.repository, file.path),
    }
}

fn short(commit: &str) -> &str {
    commit.get(..10).unwrap_or(commit)
}

/// Write counts, then every repository that was not fully searched and
/// every backend that was unavailable
pub fn write_summary<W: WriteColor>(out: &mut W, result: &SearchResult) -> io::Result<()> {
    let stats = &result.stats;
    writeln!(
        out,
        "{} matches in {} files ({} repositories)",
        stats.match_count,
        stats.file_count,
        stats.status.len()
    )?;

    for status in stats.status.iter().filter(|s| s.status != Status::Searched) {
        let color = match status.status {
            Status::LimitHit => Color::Yellow,
            _ => Color::Red,
        };
        out.set_color(ColorSpec::new().set_fg(Some(color)))?;
        write!(out, "{}", status.status)?;
        out.reset()?;
        writeln!(out, ": {} ({})", status.repository, status.source)?;
    }

    for source in &stats.unavailable {
        out.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true))?;
        write!(out, "unavailable")?;
        out.reset()?;
        writeln!(out, ": {}", source)?;
    }
    Ok(())
}
