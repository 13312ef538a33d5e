use std::fmt::Write;

use crate::compare::percent_change;
use crate::models::{EntityDetails, EntityHeader, MetricTotals};

fn kind_label(header: &EntityHeader) -> &'static str {
    match header {
        EntityHeader::Task(_) => "Task",
        EntityHeader::Project(_) => "Project",
        EntityHeader::Page(_) => "Page",
    }
}

fn format_change(change: Option<f64>) -> String {
    match change {
        Some(change) => format!("{change:+.1}%"),
        None => "n/a".to_string(),
    }
}

/// (label, current, previous) rows for the traffic table.
fn traffic_rows(current: &MetricTotals, previous: &MetricTotals) -> Vec<(&'static str, i64, i64)> {
    vec![
        ("Visits", current.visits, previous.visits),
        ("Helpful (yes)", current.dyf_yes, previous.dyf_yes),
        ("Helpful (no)", current.dyf_no, previous.dyf_no),
        ("Search clicks", current.gsc_total_clicks, previous.gsc_total_clicks),
        ("Search impressions", current.gsc_total_impressions, previous.gsc_total_impressions),
    ]
}

pub fn build_report(details: &EntityDetails) -> String {
    let current = &details.date_range_data;
    let previous = &details.comparison_date_range_data;

    let mut output = String::new();

    let _ = writeln!(output, "# {} Report: {}", kind_label(&details.header), details.header.title());
    let _ = writeln!(
        output,
        "Window {} compared with {}",
        details.date_range, details.comparison_date_range
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Traffic");
    let _ = writeln!(output, "| Metric | Current | Previous | Change |");
    let _ = writeln!(output, "|---|---|---|---|");
    for (label, now, before) in traffic_rows(&current.metrics.totals, &previous.metrics.totals) {
        let _ = writeln!(
            output,
            "| {} | {} | {} | {} |",
            label,
            now,
            before,
            format_change(percent_change(now as f64, before as f64))
        );
    }
    let _ = writeln!(
        output,
        "| Calls | {} | {} | {} |",
        current.total_calldrivers,
        previous.total_calldrivers,
        format_change(percent_change(
            current.total_calldrivers as f64,
            previous.total_calldrivers as f64
        ))
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Feedback");
    if current.feedback_by_tags.is_empty() {
        let _ = writeln!(output, "No feedback recorded for this window.");
    } else {
        for tag in current.feedback_by_tags.iter() {
            let _ = writeln!(output, "- {}: {} comments", tag.tag, tag.num_comments);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Calls by Enquiry Line");
    if current.calldrivers_enquiry.is_empty() {
        let _ = writeln!(output, "No calls recorded for this window.");
    } else {
        for line in current.calldrivers_enquiry.iter() {
            let label = line.enquiry_line.as_deref().unwrap_or("Unspecified");
            let _ = writeln!(output, "- {}: {} calls", label, line.calls);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Top Search Terms");
    if details.search_terms.is_empty() {
        let _ = writeln!(output, "No search terms recorded for this window.");
    } else {
        for term in details.search_terms.iter() {
            let change = term
                .clicks_change
                .map(|change| format!("{:+.0}%", change * 100.0))
                .unwrap_or_else(|| "new".to_string());
            let _ = writeln!(output, "- {}: {} clicks ({})", term.term, term.clicks, change);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Pages by Visits");
    let mut pages = current.metrics.visits_by_page.clone();
    pages.sort_by(|a, b| b.totals.visits.cmp(&a.totals.visits).then_with(|| a.title.cmp(&b.title)));
    if pages.is_empty() {
        let _ = writeln!(output, "No page visits recorded for this window.");
    } else {
        for page in pages.iter() {
            let _ = writeln!(output, "- {} ({}): {} visits", page.title, page.url, page.totals.visits);
        }
    }

    if let Some(date) = &details.date_from_last_test {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Usability Testing");
        match details.avg_task_success_from_last_test {
            Some(rate) => {
                let _ = writeln!(output, "Latest round on {}: {:.0}% task success", date, rate * 100.0);
            }
            None => {
                let _ = writeln!(output, "Latest round on {}: no success rate recorded", date);
            }
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AggregatedMetrics, CallsByEnquiryLine, PageHeader, PageVisits, SearchTermStat, WindowData,
    };

    fn details() -> EntityDetails {
        EntityDetails {
            header: EntityHeader::Page(PageHeader {
                id: "p1".into(),
                title: "File your return".into(),
                url: "/file".into(),
                all_urls: vec!["/file".into()],
                tasks: Vec::new(),
            }),
            date_range: "2025-02-01/2025-02-28".into(),
            date_range_data: WindowData {
                metrics: AggregatedMetrics {
                    totals: MetricTotals {
                        visits: 150,
                        ..Default::default()
                    },
                    visits_by_page: vec![
                        PageVisits {
                            id: "p2".into(),
                            title: "Deadlines".into(),
                            url: "/deadlines".into(),
                            totals: MetricTotals {
                                visits: 50,
                                ..Default::default()
                            },
                        },
                        PageVisits {
                            id: "p1".into(),
                            title: "File your return".into(),
                            url: "/file".into(),
                            totals: MetricTotals {
                                visits: 100,
                                ..Default::default()
                            },
                        },
                    ],
                },
                calldrivers_enquiry: vec![CallsByEnquiryLine {
                    enquiry_line: Some("Individual tax".into()),
                    calls: 12,
                }],
                total_calldrivers: 12,
                ..Default::default()
            },
            comparison_date_range: "2025-01-01/2025-01-31".into(),
            comparison_date_range_data: WindowData {
                metrics: AggregatedMetrics {
                    totals: MetricTotals {
                        visits: 100,
                        ..Default::default()
                    },
                    visits_by_page: Vec::new(),
                },
                ..Default::default()
            },
            search_terms: vec![
                SearchTermStat {
                    term: "file taxes".into(),
                    clicks: 30,
                    position: Some(1.2),
                    clicks_change: Some(0.5),
                },
                SearchTermStat {
                    term: "refund".into(),
                    clicks: 4,
                    position: None,
                    clicks_change: None,
                },
            ],
            feedback_comments: Vec::new(),
            task_success_by_ux_test: Vec::new(),
            avg_task_success_from_last_test: None,
            date_from_last_test: None,
        }
    }

    #[test]
    fn report_includes_sections_and_changes() {
        let report = build_report(&details());
        assert!(report.starts_with("# Page Report: File your return"));
        assert!(report.contains("| Visits | 150 | 100 | +50.0% |"));
        assert!(report.contains("| Calls | 12 | 0 | n/a |"));
        assert!(report.contains("- Individual tax: 12 calls"));
        assert!(report.contains("- file taxes: 30 clicks (+50%)"));
        assert!(report.contains("- refund: 4 clicks (new)"));
        assert!(report.contains("No feedback recorded for this window."));
        assert!(!report.contains("## Usability Testing"));
    }

    #[test]
    fn pages_are_listed_by_visits() {
        let report = build_report(&details());
        let file = report.find("- File your return (/file): 100 visits").unwrap();
        let deadlines = report.find("- Deadlines (/deadlines): 50 visits").unwrap();
        assert!(file < deadlines);
    }
}
