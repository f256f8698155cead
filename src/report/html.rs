//! HTML documents: the narrative cluster report and the cluster table

use crate::structs::{AtlasName, ClusterRecord};
use std::fmt::Write as _;

/// Header information shared by both documents
#[derive(Debug, Clone)]
pub struct ReportMeta {
    pub source_name: String,
    pub atlas: AtlasName,
    pub alpha: f64,
    pub z_threshold: f64,
    pub two_sided: bool,
}

/// Slice image of one cluster, or why it is missing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SliceImage {
    /// Base64-encoded PNG
    Png(String),
    Failed(String),
}

/// A cluster as it appears in the report
#[derive(Debug, Clone)]
pub struct ClusterView<'a> {
    pub record: &'a ClusterRecord,
    pub image: SliceImage,
}

const REPORT_STYLE: &str = r"
        body {
            font-family: Arial, sans-serif;
            background-color: #f4f4f4;
            color: #333;
            text-align: center;
        }
        h1 {
            margin-top: 20px;
        }
        .meta {
            color: #555;
            margin-bottom: 30px;
        }
        .cluster {
            margin-bottom: 40px;
            padding: 20px;
            background-color: #fff;
            border-radius: 8px;
            box-shadow: 0 0 10px rgba(0, 0, 0, 0.1);
            display: inline-block;
            text-align: center;
            width: 80%;
        }
        .cluster ul {
            list-style-type: none;
            padding: 0;
        }
        img {
            max-width: 100%;
            height: auto;
            margin-top: 20px;
            border-radius: 8px;
            background-color: #000;
        }
        .render-failed {
            margin-top: 20px;
            padding: 40px;
            border: 2px dashed #c0392b;
            border-radius: 8px;
            color: #c0392b;
        }
        .no-clusters {
            font-style: italic;
        }
";

const TABLE_STYLE: &str = r"
        body {
            font-family: Arial, sans-serif;
            background-color: #f4f4f4;
            color: #333;
        }
        table.clusters {
            border-collapse: collapse;
            margin: 20px auto;
            background-color: #fff;
            box-shadow: 0 0 10px rgba(0, 0, 0, 0.1);
        }
        table.clusters th {
            background-color: #2c3e50;
            color: #fff;
            padding: 8px 14px;
        }
        table.clusters td {
            padding: 6px 14px;
            border-bottom: 1px solid #ddd;
            text-align: right;
        }
        table.clusters td.region {
            text-align: left;
        }
        table.clusters tr:nth-child(even) {
            background-color: #f8f8f8;
        }
        caption {
            caption-side: top;
            padding: 10px;
            font-weight: bold;
        }
";

/// Escape text for element content and double-quoted attributes
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Fixed decimals with trailing zeros removed
#[must_use]
pub fn format_number(value: f64, decimals: usize) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    let s = format!("{value:.decimals$}");
    let s = if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s
    };
    if s == "-0" {
        "0".to_string()
    } else {
        s
    }
}

fn format_size(size: Option<f64>) -> String {
    size.map_or_else(|| "n/a".to_string(), |s| format_number(s, 2))
}

fn threshold_line(meta: &ReportMeta) -> String {
    format!(
        "Atlas: {} &middot; threshold p &lt; {} ({}, |z| &ge; {})",
        escape_html(meta.atlas.as_str()),
        format_number(meta.alpha, 6),
        if meta.two_sided { "two-sided" } else { "one-sided" },
        format_number(meta.z_threshold, 3)
    )
}

fn document_head(out: &mut String, title: &str, style: &str) {
    out.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    out.push_str("    <meta charset=\"UTF-8\">\n");
    out.push_str(
        "    <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n",
    );
    let _ = writeln!(out, "    <title>{}</title>", escape_html(title));
    let _ = writeln!(out, "    <style>{style}    </style>");
    out.push_str("</head>\n<body>\n");
}

/// Narrative report: one block per cluster, in the order given
#[must_use]
pub fn render_report(meta: &ReportMeta, clusters: &[ClusterView<'_>]) -> String {
    let mut out = String::new();
    document_head(
        &mut out,
        &format!("Cluster Report - {}", meta.source_name),
        REPORT_STYLE,
    );

    out.push_str("    <h1>Cluster Report</h1>\n");
    let _ = writeln!(
        out,
        "    <p class=\"meta\">{}<br>{}<br>{} cluster(s)</p>",
        escape_html(&meta.source_name),
        threshold_line(meta),
        clusters.len()
    );

    if clusters.is_empty() {
        out.push_str("    <p class=\"no-clusters\">No clusters survived thresholding.</p>\n");
    }

    for view in clusters {
        let r = view.record;
        out.push_str("    <div class=\"cluster\">\n");
        let _ = writeln!(out, "        <h2>Cluster ID: {}</h2>", escape_html(&r.id));
        out.push_str("        <ul>\n");
        let _ = writeln!(
            out,
            "            <li><strong>Coordinates:</strong> ({}, {}, {})</li>",
            format_number(r.x, 2),
            format_number(r.y, 2),
            format_number(r.z, 2)
        );
        let _ = writeln!(
            out,
            "            <li><strong>Peak Stat:</strong> {}</li>",
            format_number(r.peak_stat, 2)
        );
        let _ = writeln!(
            out,
            "            <li><strong>Cluster Size (mm&sup3;):</strong> {}</li>",
            format_size(r.size_mm3)
        );
        let _ = writeln!(
            out,
            "            <li><strong>Region:</strong> {}</li>",
            escape_html(r.region_name())
        );
        out.push_str("        </ul>\n");

        match &view.image {
            SliceImage::Png(data) => {
                let _ = writeln!(
                    out,
                    "        <img src=\"data:image/png;base64,{data}\" alt=\"Ortho slice\">"
                );
            }
            SliceImage::Failed(reason) => {
                let _ = writeln!(
                    out,
                    "        <div class=\"render-failed\">Slice image unavailable: {}</div>",
                    escape_html(reason)
                );
            }
        }
        out.push_str("    </div>\n");
    }

    out.push_str("</body>\n</html>\n");
    out
}

/// Styled table of clusters, in the order given
#[must_use]
pub fn render_table(meta: &ReportMeta, records: &[ClusterRecord]) -> String {
    let mut out = String::new();
    document_head(
        &mut out,
        &format!("Cluster Table - {}", meta.source_name),
        TABLE_STYLE,
    );

    out.push_str("    <table class=\"clusters\">\n");
    let _ = writeln!(
        out,
        "        <caption>{}<br>{}</caption>",
        escape_html(&meta.source_name),
        threshold_line(meta)
    );
    out.push_str("        <thead>\n            <tr>");
    for header in [
        "Cluster ID",
        "X",
        "Y",
        "Z",
        "Peak Stat",
        "Cluster Size (mm3)",
        "Region",
    ] {
        let _ = write!(out, "<th>{header}</th>");
    }
    out.push_str("</tr>\n        </thead>\n        <tbody>\n");

    for r in records {
        let _ = writeln!(
            out,
            "            <tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td class=\"region\">{}</td></tr>",
            escape_html(&r.id),
            format_number(r.x, 2),
            format_number(r.y, 2),
            format_number(r.z, 2),
            format_number(r.peak_stat, 2),
            format_size(r.size_mm3),
            escape_html(r.region_name())
        );
    }

    out.push_str("        </tbody>\n    </table>\n</body>\n</html>\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> ReportMeta {
        ReportMeta {
            source_name: "sub-01_zmap.nii.gz".into(),
            atlas: AtlasName::Aal3,
            alpha: 0.001,
            z_threshold: 3.290_527,
            two_sided: true,
        }
    }

    fn record(id: &str, region: Option<&str>) -> ClusterRecord {
        ClusterRecord {
            id: id.into(),
            x: -42.0,
            y: 18.5,
            z: 0.0,
            peak_stat: 5.123,
            size_mm3: Some(216.0),
            region: region.map(str::to_string),
        }
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html("<b>\"A&B's\"</b>"),
            "&lt;b&gt;&quot;A&amp;B&#39;s&quot;&lt;/b&gt;"
        );
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(216.0, 2), "216");
        assert_eq!(format_number(18.5, 2), "18.5");
        assert_eq!(format_number(5.123, 2), "5.12");
        assert_eq!(format_number(-0.001, 2), "0");
        assert_eq!(format_number(0.001, 6), "0.001");
    }

    #[test]
    fn test_render_report_blocks() {
        let a = record("1", Some("Precentral_L"));
        let b = record("2", None);
        let views = vec![
            ClusterView {
                record: &a,
                image: SliceImage::Png("iVBORw0KGgo=".into()),
            },
            ClusterView {
                record: &b,
                image: SliceImage::Failed("cut point outside <volume>".into()),
            },
        ];

        let html = render_report(&meta(), &views);
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert_eq!(html.matches("<div class=\"cluster\">").count(), 2);
        assert!(html.contains("data:image/png;base64,iVBORw0KGgo="));
        assert!(html.contains("Precentral_L"));
        assert!(html.contains("Unknown region"));
        assert!(html.contains("Slice image unavailable: cut point outside &lt;volume&gt;"));
        assert!(html.contains("(-42, 18.5, 0)"));
        assert!(html.trim_end().ends_with("</html>"));
    }

    #[test]
    fn test_render_empty_report() {
        let html = render_report(&meta(), &[]);
        assert_eq!(html.matches("<div class=\"cluster\">").count(), 0);
        assert!(html.contains("No clusters survived thresholding."));
        assert!(html.contains("0 cluster(s)"));
    }

    #[test]
    fn test_render_table_rows() {
        let records = vec![record("1", Some("A<B")), record("2", Some("C"))];
        let html = render_table(&meta(), &records);

        assert!(html.contains("<table class=\"clusters\">"));
        assert_eq!(html.matches("<tr><td>").count(), 2);
        assert!(html.contains("A&lt;B"));
        assert!(html.contains("<th>Cluster Size (mm3)</th>"));
    }
}
