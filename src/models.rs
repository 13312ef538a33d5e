use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::pipeline::Collection;

/// Aggregation rows carry explicit `null` where a source field was absent.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Task,
    Project,
    Page,
}

impl EntityKind {
    pub fn collection(self) -> Collection {
        match self {
            EntityKind::Task => Collection::Tasks,
            EntityKind::Project => Collection::Projects,
            EntityKind::Page => Collection::Pages,
        }
    }

    /// Field on page-metric documents that links a row to this kind of entity.
    pub fn metrics_field(self) -> &'static str {
        match self {
            EntityKind::Task => "tasks",
            EntityKind::Project => "projects",
            EntityKind::Page => "page",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Task => "task",
            EntityKind::Project => "project",
            EntityKind::Page => "page",
        };
        f.write_str(name)
    }
}

/// URLs and topic ids that scope metric lookups for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityScope {
    pub kind: EntityKind,
    pub id: String,
    pub urls: Vec<String>,
    pub tpc_ids: Vec<i64>,
}

/// Query parameters as received from callers.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiParams {
    pub id: Option<String>,
    pub date_range: Option<String>,
    pub comparison_date_range: Option<String>,
}

// ---- stored documents -------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TaskRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub group: Option<String>,
    pub subgroup: Option<String>,
    pub topic: Option<String>,
    pub subtopic: Option<String>,
    pub sub_subtopic: Option<String>,
    pub user_type: Vec<String>,
    pub program: Option<String>,
    pub service: Option<String>,
    pub user_journey: Vec<String>,
    pub status: Option<String>,
    pub channel: Vec<String>,
    pub core: Vec<String>,
    pub pages: Vec<String>,
    pub tpc_ids: Vec<i64>,
    pub ux_tests: Vec<String>,
    pub projects: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProjectRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub status: Option<String>,
    pub cops: bool,
    pub description: Option<String>,
    pub tasks: Vec<String>,
    pub ux_tests: Vec<String>,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PageRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub url: String,
    pub all_urls: Vec<String>,
    pub tasks: Vec<String>,
    pub projects: Vec<String>,
}

impl PageRecord {
    /// Every URL a page has been served under, falling back to its canonical one.
    pub fn scope_urls(&self) -> Vec<String> {
        if !self.all_urls.is_empty() {
            return self.all_urls.clone();
        }
        if self.url.is_empty() {
            return Vec::new();
        }
        vec![self.url.clone()]
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UxTestRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub date: Option<String>,
    pub test_type: Option<String>,
    pub success_rate: Option<f64>,
    pub total_users: Option<i64>,
    pub scenario: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Attachment {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub filename: String,
    pub storage_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
}

impl Attachment {
    /// Attachments are served through a proxy that prepends its own scheme.
    pub fn without_scheme(mut self) -> Self {
        if let Some(rest) = self.storage_url.strip_prefix("https://") {
            self.storage_url = rest.to_string();
        }
        self
    }
}

// ---- aggregation results ----------------------------------------------------

/// Sums and means shared by the per-page and the whole-entity rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricTotals {
    pub visits: i64,
    pub dyf_yes: i64,
    pub dyf_no: i64,
    pub fwylf_cant_find_info: i64,
    pub fwylf_error: i64,
    pub fwylf_hard_to_understand: i64,
    pub fwylf_other: i64,
    pub gsc_total_clicks: i64,
    pub gsc_total_impressions: i64,
    pub gsc_total_ctr: Option<f64>,
    pub gsc_total_position: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageVisits {
    #[serde(rename = "_id", deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(deserialize_with = "null_as_default")]
    pub url: String,
    #[serde(flatten)]
    pub totals: MetricTotals,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AggregatedMetrics {
    #[serde(flatten)]
    pub totals: MetricTotals,
    pub visits_by_page: Vec<PageVisits>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallsByEnquiryLine {
    pub enquiry_line: Option<String>,
    pub calls: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallsByTopic {
    pub tpc_id: i64,
    pub topic: Option<String>,
    pub subtopic: Option<String>,
    pub sub_subtopic: Option<String>,
    pub calls: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeedbackByTag {
    #[serde(deserialize_with = "null_as_default")]
    pub tag: String,
    pub num_comments: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackComment {
    #[serde(deserialize_with = "null_as_default")]
    pub url: String,
    #[serde(deserialize_with = "null_as_default")]
    pub date: String,
    #[serde(deserialize_with = "null_as_default")]
    pub comment: String,
    #[serde(deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
}

/// Everything computed for one entity over one window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WindowData {
    #[serde(flatten)]
    pub metrics: AggregatedMetrics,
    pub calldrivers_enquiry: Vec<CallsByEnquiryLine>,
    pub calls_by_topic: Vec<CallsByTopic>,
    pub total_calldrivers: i64,
    pub feedback_by_tags: Vec<FeedbackByTag>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchTermStat {
    #[serde(default, deserialize_with = "null_as_default")]
    pub term: String,
    pub clicks: i64,
    #[serde(default)]
    pub position: Option<f64>,
    #[serde(default)]
    pub clicks_change: Option<f64>,
}

// ---- response payloads ------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectLink {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskLink {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskHeader {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub group: Option<String>,
    pub subgroup: Option<String>,
    pub topic: Option<String>,
    pub subtopic: Option<String>,
    pub sub_subtopic: Option<String>,
    pub user_type: Vec<String>,
    pub program: Option<String>,
    pub service: Option<String>,
    pub user_journey: Vec<String>,
    pub status: Option<String>,
    pub channel: Vec<String>,
    pub core: Vec<String>,
    pub projects: Vec<ProjectLink>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectHeader {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub status: Option<String>,
    pub cops: bool,
    pub description: Option<String>,
    pub attachments: Vec<Attachment>,
    pub tasks: Vec<TaskLink>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageHeader {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub url: String,
    pub all_urls: Vec<String>,
    pub tasks: Vec<TaskLink>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EntityHeader {
    Task(TaskHeader),
    Project(ProjectHeader),
    Page(PageHeader),
}

impl EntityHeader {
    pub fn title(&self) -> &str {
        match self {
            EntityHeader::Task(task) => &task.title,
            EntityHeader::Project(project) => &project.title,
            EntityHeader::Page(page) => &page.title,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UxTestResult {
    pub title: String,
    pub date: Option<String>,
    pub test_type: Option<String>,
    pub success_rate: Option<f64>,
    pub total_users: Option<i64>,
    pub scenario: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDetails {
    #[serde(flatten)]
    pub header: EntityHeader,
    pub date_range: String,
    pub date_range_data: WindowData,
    pub comparison_date_range: String,
    pub comparison_date_range_data: WindowData,
    pub search_terms: Vec<SearchTermStat>,
    pub feedback_comments: Vec<FeedbackComment>,
    pub task_success_by_ux_test: Vec<UxTestResult>,
    pub avg_task_success_from_last_test: Option<f64>,
    pub date_from_last_test: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TasksHomeRow {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub group: Option<String>,
    pub topic: Option<String>,
    pub subtopic: Option<String>,
    pub visits: i64,
    pub calls: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TasksHomeData {
    pub date_range: String,
    pub date_range_data: Vec<TasksHomeRow>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn page_scope_prefers_all_urls() {
        let page = PageRecord {
            url: "/en/a".into(),
            all_urls: vec!["/en/a".into(), "/en/a-old".into()],
            ..Default::default()
        };
        assert_eq!(page.scope_urls(), vec!["/en/a", "/en/a-old"]);

        let page = PageRecord {
            url: "/en/b".into(),
            ..Default::default()
        };
        assert_eq!(page.scope_urls(), vec!["/en/b"]);
        assert!(PageRecord::default().scope_urls().is_empty());
    }

    #[test]
    fn null_fields_decode_to_defaults() {
        let comment: FeedbackComment =
            serde_json::from_value(json!({ "url": null, "date": "2024-02-03", "comment": null, "tags": null })).unwrap();
        assert_eq!(comment.url, "");
        assert_eq!(comment.comment, "");
        assert!(comment.tags.is_empty());

        let page: PageVisits = serde_json::from_value(json!({ "_id": "p1", "title": null, "visits": 4 })).unwrap();
        assert_eq!(page.title, "");
        assert_eq!(page.totals.visits, 4);

        let line: CallsByEnquiryLine = serde_json::from_value(json!({ "enquiry_line": null, "calls": 3 })).unwrap();
        assert_eq!(line.enquiry_line, None);
        assert_eq!(line.calls, 3);

        let term: SearchTermStat = serde_json::from_value(json!({ "term": null, "clicks": 2 })).unwrap();
        assert_eq!(term.term, "");
    }

    #[test]
    fn attachment_scheme_is_stripped() {
        let attachment = Attachment {
            storage_url: "https://blob.example.net/report.pdf".into(),
            ..Default::default()
        }
        .without_scheme();
        assert_eq!(attachment.storage_url, "blob.example.net/report.pdf");
    }

    #[test]
    fn window_data_serializes_flat_camel_case() {
        let data = WindowData {
            metrics: AggregatedMetrics {
                totals: MetricTotals {
                    visits: 3,
                    ..Default::default()
                },
                visits_by_page: vec![],
            },
            total_calldrivers: 4,
            ..Default::default()
        };
        let value = serde_json::to_value(&data).unwrap();
        assert_eq!(value["visits"], json!(3));
        assert_eq!(value["totalCalldrivers"], json!(4));
        assert_eq!(value["gscTotalCtr"], json!(null));
        assert_eq!(value["visitsByPage"], json!([]));
    }

    #[test]
    fn entity_header_carries_kind_tag() {
        let header = EntityHeader::Page(PageHeader {
            id: "p1".into(),
            title: "Page".into(),
            url: "/p".into(),
            all_urls: vec![],
            tasks: vec![],
        });
        let value = serde_json::to_value(&header).unwrap();
        assert_eq!(value["kind"], json!("page"));
        assert_eq!(value["_id"], json!("p1"));
    }
}
