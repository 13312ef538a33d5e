//! Deterministic sample dataset, loaded into Postgres by `seed` and into the
//! in-memory store by `serve --demo`.

use serde_json::{json, Value};

use crate::pipeline::Collection;

/// Daily page-metric rows for the sample pages, January and February 2025.
const METRIC_DAYS: [&str; 6] = [
    "2025-01-06",
    "2025-01-13",
    "2025-01-20",
    "2025-02-03",
    "2025-02-10",
    "2025-02-17",
];

pub fn sample_documents() -> Vec<(Collection, Value)> {
    let mut docs = vec![
        (
            Collection::Tasks,
            json!({
                "_id": "task-file-return",
                "title": "File an income tax return",
                "group": "Tax",
                "subgroup": "Individuals",
                "topic": "Filing",
                "subtopic": "Returns",
                "user_type": ["Individual"],
                "program": "Income tax",
                "service": "Filing",
                "user_journey": ["Apply"],
                "status": "Active",
                "channel": ["Online"],
                "core": ["Top task"],
                "pages": ["page-file", "page-deadlines"],
                "tpc_ids": [201, 202],
                "ux_tests": ["ux-file-r1", "ux-file-r2a", "ux-file-r2b"],
                "projects": ["project-filing-redesign"],
            }),
        ),
        (
            Collection::Tasks,
            json!({
                "_id": "task-check-refund",
                "title": "Check refund status",
                "group": "Tax",
                "topic": "Refunds",
                "user_type": ["Individual"],
                "status": "Active",
                "pages": ["page-refund"],
                "tpc_ids": [203],
                "ux_tests": [],
                "projects": ["project-filing-redesign"],
            }),
        ),
        (
            Collection::Projects,
            json!({
                "_id": "project-filing-redesign",
                "title": "Filing journey redesign",
                "status": "In progress",
                "cops": false,
                "description": "Simplify the online filing journey.",
                "tasks": ["task-file-return", "task-check-refund"],
                "ux_tests": ["ux-file-r1", "ux-file-r2a"],
                "attachments": [
                    {
                        "_id": "att-1",
                        "filename": "round-2-findings.pdf",
                        "storage_url": "https://files.example.org/round-2-findings.pdf",
                        "size": 48213,
                    }
                ],
            }),
        ),
        (
            Collection::Pages,
            json!({
                "_id": "page-file",
                "title": "File your return",
                "url": "www.example.org/en/taxes/file",
                "all_urls": ["www.example.org/en/taxes/file", "www.example.org/en/taxes/file-online"],
                "tasks": ["task-file-return"],
                "projects": ["project-filing-redesign"],
            }),
        ),
        (
            Collection::Pages,
            json!({
                "_id": "page-deadlines",
                "title": "Filing deadlines",
                "url": "www.example.org/en/taxes/deadlines",
                "tasks": ["task-file-return"],
                "projects": ["project-filing-redesign"],
            }),
        ),
        (
            Collection::Pages,
            json!({
                "_id": "page-refund",
                "title": "Where is my refund",
                "url": "www.example.org/en/taxes/refund",
                "tasks": ["task-check-refund"],
                "projects": ["project-filing-redesign"],
            }),
        ),
        (
            Collection::UxTests,
            json!({
                "_id": "ux-file-r1",
                "title": "Filing baseline",
                "date": "2024-09-12",
                "test_type": "Baseline",
                "success_rate": 0.58,
                "total_users": 12,
                "scenario": "Find out how to file online.",
            }),
        ),
        (
            Collection::UxTests,
            json!({
                "_id": "ux-file-r2a",
                "title": "Filing validation (desktop)",
                "date": "2025-01-22",
                "test_type": "Validation",
                "success_rate": 0.83,
                "total_users": 12,
                "scenario": "Find out how to file online.",
            }),
        ),
        (
            Collection::UxTests,
            json!({
                "_id": "ux-file-r2b",
                "title": "Filing validation (mobile)",
                "date": "2025-01-22",
                "test_type": "Validation",
                "success_rate": 0.75,
                "total_users": 8,
                "scenario": "Find out how to file online.",
            }),
        ),
    ];

    docs.extend(page_metric_rows());
    docs.extend([
        feedback("fb-1", "2025-02-04", "www.example.org/en/taxes/file", "The sign in link is hard to find.", &["Sign in"]),
        feedback("fb-2", "2025-02-11", "www.example.org/en/taxes/file-online", "Page said my return was late.", &["Deadlines", "Error"]),
        feedback("fb-3", "2025-02-12", "www.example.org/en/taxes/deadlines", "Which deadline applies to me?", &["Deadlines"]),
        feedback("fb-4", "2025-01-15", "www.example.org/en/taxes/refund", "No status shown.", &["Refund status"]),
        calldriver("cd-1", "2025-02-05", 201, "Individual tax", "Filing", "Returns", 340),
        calldriver("cd-2", "2025-02-12", 202, "Individual tax", "Filing", "Deadlines", 120),
        calldriver("cd-3", "2025-02-12", 203, "Refunds", "Refunds", "Status", 410),
        calldriver("cd-4", "2025-01-08", 201, "Individual tax", "Filing", "Returns", 295),
        calldriver("cd-5", "2025-01-14", 203, "Refunds", "Refunds", "Status", 388),
    ]);
    docs
}

fn page_metric_rows() -> Vec<(Collection, Value)> {
    let pages = [
        ("page-file", "www.example.org/en/taxes/file", "task-file-return", 1200),
        ("page-file", "www.example.org/en/taxes/file-online", "task-file-return", 300),
        ("page-deadlines", "www.example.org/en/taxes/deadlines", "task-file-return", 450),
        ("page-refund", "www.example.org/en/taxes/refund", "task-check-refund", 900),
    ];

    let mut rows = Vec::new();
    for (day_index, day) in METRIC_DAYS.iter().enumerate() {
        let growth = day_index as i64 * 40;
        let refund_clicks = if day_index < 3 { 5 } else { 9 };
        for (page, url, task, base_visits) in pages {
            let visits = base_visits + growth;
            rows.push((
                Collection::PageMetrics,
                json!({
                    "_id": format!("{url}-{day}"),
                    "date": day,
                    "url": url,
                    "page": page,
                    "tasks": [task],
                    "projects": ["project-filing-redesign"],
                    "visits": visits,
                    "dyf_yes": visits / 50,
                    "dyf_no": visits / 80,
                    "fwylf_cant_find_info": visits / 200,
                    "fwylf_error": visits / 400,
                    "fwylf_hard_to_understand": visits / 300,
                    "fwylf_other": visits / 500,
                    "gsc_total_clicks": visits / 3,
                    "gsc_total_impressions": visits * 4,
                    "gsc_total_ctr": 0.08 + day_index as f64 * 0.005,
                    "gsc_total_position": 4.5 - day_index as f64 * 0.25,
                    "aa_searchterms": [
                        { "term": "File taxes", "clicks": 30 + growth / 4, "position": 1.2 },
                        { "term": "tax deadline", "clicks": 12 + day_index as i64, "position": 2.4 },
                        { "term": "Refund", "clicks": refund_clicks, "position": 3.1 },
                    ],
                }),
            ));
        }
    }
    rows
}

fn feedback(id: &str, date: &str, url: &str, comment: &str, tags: &[&str]) -> (Collection, Value) {
    (
        Collection::Feedback,
        json!({ "_id": id, "date": date, "url": url, "comment": comment, "tags": tags }),
    )
}

fn calldriver(
    id: &str,
    date: &str,
    tpc_id: i64,
    enquiry_line: &str,
    topic: &str,
    subtopic: &str,
    calls: i64,
) -> (Collection, Value) {
    (
        Collection::CallDrivers,
        json!({
            "_id": id,
            "date": date,
            "tpc_id": tpc_id,
            "enquiry_line": enquiry_line,
            "topic": topic,
            "subtopic": subtopic,
            "calls": calls,
        }),
    )
}
