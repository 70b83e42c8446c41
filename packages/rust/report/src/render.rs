//! Document renderers.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use radar_shared::{MaturityTier, RadarError, Result};
use tracing::info;

use crate::generator::{CompanyEntry, Report, Selection};
use crate::stats::{RosterStats, percent};

/// A rendered document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub file_name: String,
    pub media_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Turns a [`Report`] into a document format.
pub trait DocumentRenderer {
    fn render(&self, report: &Report) -> Result<Artifact>;
}

/// Write `artifact` into `dir`, creating the directory if needed.
pub fn write_artifact(artifact: &Artifact, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| RadarError::io(dir, e))?;
    let path = dir.join(&artifact.file_name);
    std::fs::write(&path, &artifact.bytes).map_err(|e| RadarError::io(&path, e))?;
    info!(path = %path.display(), bytes = artifact.bytes.len(), "report written");
    Ok(path)
}

fn file_stem(selection: &Selection) -> String {
    match selection {
        Selection::Roster => "roster-report".to_string(),
        Selection::Company(id) => id
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '-' })
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// Markdown
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MarkdownRenderer;

impl DocumentRenderer for MarkdownRenderer {
    fn render(&self, report: &Report) -> Result<Artifact> {
        let mut out = String::new();
        let fmt_err = |e: std::fmt::Error| RadarError::RenderFailed(e.to_string());

        writeln!(out, "# {}\n", report.title).map_err(fmt_err)?;
        writeln!(
            out,
            "{} · {} · {}\n",
            report.region,
            report.topic,
            report.generated_at.format("%d.%m.%Y")
        )
        .map_err(fmt_err)?;

        if let Some(stats) = &report.stats {
            markdown_stats(&mut out, stats).map_err(fmt_err)?;
        }

        for entry in &report.entries {
            markdown_entry(&mut out, entry, &report.topic).map_err(fmt_err)?;
        }

        if let Some(footer) = &report.footer {
            writeln!(out, "---\n\n{footer}").map_err(fmt_err)?;
        }

        Ok(Artifact {
            file_name: format!("{}.md", file_stem(&report.selection)),
            media_type: "text/markdown",
            bytes: out.into_bytes(),
        })
    }
}

fn markdown_stats(out: &mut String, stats: &RosterStats) -> std::fmt::Result {
    writeln!(out, "## Overview\n")?;
    writeln!(out, "- Companies: {}", stats.total)?;
    writeln!(out, "- Adoption rate: {}", percent(stats.adoption_rate))?;
    writeln!(
        out,
        "- Geocoded: {} ({})\n",
        stats.geocoded,
        percent(stats.geocoded_share)
    )?;
    writeln!(out, "| Tier | Companies | Share |")?;
    writeln!(out, "|------|-----------|-------|")?;
    for tier in MaturityTier::ALL.iter().rev() {
        if let Some(share) = stats.by_tier.get(tier) {
            writeln!(
                out,
                "| {} | {} | {} |",
                tier.title(),
                share.count,
                percent(share.share)
            )?;
        }
    }
    writeln!(out)
}

fn markdown_entry(out: &mut String, entry: &CompanyEntry, topic: &str) -> std::fmt::Result {
    let company = &entry.record.company;
    let classification = &entry.record.classification;

    writeln!(out, "## {}\n", company.name)?;
    writeln!(out, "- Website: <{}>", company.website)?;
    writeln!(out, "- Address: {}", company.address)?;
    if let Some(industry) = &company.industry {
        writeln!(out, "- Industry: {industry}")?;
    }
    writeln!(out, "- {topic} maturity: **{}**", classification.tier.title())?;
    writeln!(
        out,
        "- Score: {}/10 ({})",
        entry.score.score,
        entry.score.level.title()
    )?;
    if let Some(confidence) = classification.confidence {
        writeln!(out, "- Confidence: {confidence}%")?;
    }
    if !classification.applications.is_empty() {
        writeln!(out, "- Applications: {}", classification.applications.join(", "))?;
    }
    if let Some(geo) = &entry.record.geo {
        writeln!(
            out,
            "- Location: {:.5}, {:.5} ({})",
            geo.latitude,
            geo.longitude,
            geo.precision.as_str()
        )?;
    }
    writeln!(out, "\n{}\n", classification.biography)?;
    writeln!(out, "> {}\n", classification.rationale)
}

// ---------------------------------------------------------------------------
// HTML
// ---------------------------------------------------------------------------

/// Self-contained HTML meant for printing to PDF from a browser.
#[derive(Debug, Default)]
pub struct HtmlRenderer;

const PRINT_CSS: &str = "\
body{font-family:Helvetica,Arial,sans-serif;color:#222;max-width:48rem;margin:2rem auto;line-height:1.45}\
h1{color:#1a5276;margin-bottom:0}\
.meta{color:#666;margin-top:.25rem}\
table{border-collapse:collapse;width:100%;margin:1rem 0}\
th,td{border-bottom:1px solid #ddd;padding:.35rem .5rem;text-align:left}\
th{background:#f5f5f5}\
section.company{page-break-inside:avoid;border-top:2px solid #1a5276;margin-top:1.5rem}\
.tier{font-weight:bold}\
blockquote{color:#555;border-left:3px solid #ccc;margin-left:0;padding-left:.75rem}\
footer{margin-top:2rem;font-size:.8rem;color:#666}\
@media print{body{margin:0}}";

impl DocumentRenderer for HtmlRenderer {
    fn render(&self, report: &Report) -> Result<Artifact> {
        let mut out = String::new();
        let fmt_err = |e: std::fmt::Error| RadarError::RenderFailed(e.to_string());

        writeln!(
            out,
            "<!DOCTYPE html>\n<html lang=\"en\"><head><meta charset=\"utf-8\">\
             <title>{title}</title><style>{PRINT_CSS}</style></head><body>\n\
             <h1>{title}</h1><p class=\"meta\">{region} · {topic} · {date}</p>",
            title = escape(&report.title),
            region = escape(&report.region),
            topic = escape(&report.topic),
            date = report.generated_at.format("%d.%m.%Y"),
        )
        .map_err(fmt_err)?;

        if let Some(stats) = &report.stats {
            html_stats(&mut out, stats).map_err(fmt_err)?;
        }

        for entry in &report.entries {
            html_entry(&mut out, entry, &report.topic).map_err(fmt_err)?;
        }

        if let Some(footer) = &report.footer {
            writeln!(out, "<footer>{}</footer>", escape(footer)).map_err(fmt_err)?;
        }
        out.push_str("</body></html>\n");

        Ok(Artifact {
            file_name: format!("{}.html", file_stem(&report.selection)),
            media_type: "text/html",
            bytes: out.into_bytes(),
        })
    }
}

fn html_stats(out: &mut String, stats: &RosterStats) -> std::fmt::Result {
    writeln!(
        out,
        "<h2>Overview</h2><p>{} companies · adoption rate {} · geocoded {} ({})</p>\n\
         <table><thead><tr><th>Tier</th><th>Companies</th><th>Share</th></tr></thead><tbody>",
        stats.total,
        percent(stats.adoption_rate),
        stats.geocoded,
        percent(stats.geocoded_share)
    )?;
    for tier in MaturityTier::ALL.iter().rev() {
        if let Some(share) = stats.by_tier.get(tier) {
            writeln!(
                out,
                "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
                tier.title(),
                share.count,
                percent(share.share)
            )?;
        }
    }
    out.push_str("</tbody></table>\n");
    Ok(())
}

fn html_entry(out: &mut String, entry: &CompanyEntry, topic: &str) -> std::fmt::Result {
    let company = &entry.record.company;
    let classification = &entry.record.classification;

    write!(
        out,
        "<section class=\"company\"><h2>{}</h2><ul>\
         <li>Website: <a href=\"{url}\">{url}</a></li><li>Address: {}</li>",
        escape(&company.name),
        escape(&company.address),
        url = escape(company.website.as_str()),
    )?;
    if let Some(industry) = &company.industry {
        write!(out, "<li>Industry: {}</li>", escape(industry))?;
    }
    write!(
        out,
        "<li>{} maturity: <span class=\"tier\">{}</span></li><li>Score: {}/10 ({})</li>",
        escape(topic),
        classification.tier.title(),
        entry.score.score,
        entry.score.level.title()
    )?;
    if let Some(confidence) = classification.confidence {
        write!(out, "<li>Confidence: {confidence}%</li>")?;
    }
    if !classification.applications.is_empty() {
        write!(
            out,
            "<li>Applications: {}</li>",
            escape(&classification.applications.join(", "))
        )?;
    }
    if let Some(geo) = &entry.record.geo {
        write!(
            out,
            "<li>Location: {:.5}, {:.5} ({})</li>",
            geo.latitude,
            geo.longitude,
            geo.precision.as_str()
        )?;
    }
    writeln!(
        out,
        "</ul><p>{}</p><blockquote>{}</blockquote></section>",
        escape(&classification.biography),
        escape(&classification.rationale)
    )
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape("<b>R&D \"Lab\"</b>"),
            "&lt;b&gt;R&amp;D &quot;Lab&quot;&lt;/b&gt;"
        );
    }

    #[test]
    fn company_file_names_are_path_safe() {
        let id = radar_shared::CompanyId::new("acme.example/de").unwrap();
        assert_eq!(file_stem(&Selection::Company(id)), "acme.example-de");
        assert_eq!(file_stem(&Selection::Roster), "roster-report");
    }
}
