//! Entity details and task overview assembly.
//!
//! The service owns no state besides its two injected capabilities: a
//! document source and a cache store.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use crate::cache::{read_through, CacheKey, CacheStore};
use crate::compare;
use crate::error::{AppError, Result, StoreError};
use crate::join::merge_window;
use crate::models::{
    AggregatedMetrics, ApiParams, CallsByEnquiryLine, CallsByTopic, EntityDetails, EntityHeader,
    EntityKind, EntityScope, FeedbackByTag, FeedbackComment, PageHeader, PageRecord,
    ProjectHeader, ProjectLink, ProjectRecord, SearchTermStat, TaskHeader, TaskLink, TaskRecord,
    TasksHomeData, TasksHomeRow, UxTestRecord, UxTestResult, WindowData,
};
use crate::pipeline::{get_path, Collection, Pipeline, SortOrder};
use crate::queries;
use crate::store::{aggregate, aggregate_as, find_by_id, find_by_ids, DocumentSource};
use crate::window::DateWindow;

/// A validated details request.
#[derive(Debug, Clone)]
pub struct DetailsRequest {
    pub id: String,
    pub date_range: String,
    pub comparison_date_range: String,
    pub window: DateWindow,
    pub comparison: DateWindow,
}

impl DetailsRequest {
    pub fn from_params(params: &ApiParams) -> Result<Self> {
        let id = params
            .id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::invalid("an entity id is required"))?;
        if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(AppError::invalid(format!("malformed entity id '{id}'")));
        }

        let date_range = required(params.date_range.as_deref(), "dateRange")?;
        let comparison_date_range =
            required(params.comparison_date_range.as_deref(), "comparisonDateRange")?;

        Ok(Self {
            id: id.to_string(),
            window: DateWindow::parse(date_range)?,
            comparison: DateWindow::parse(comparison_date_range)?,
            date_range: date_range.to_string(),
            comparison_date_range: comparison_date_range.to_string(),
        })
    }
}

fn required<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::invalid(format!("{name} is required")))
}

/// An entity loaded with everything needed to scope its metrics.
struct ResolvedEntity {
    header: EntityHeader,
    scope: EntityScope,
    ux_tests: Vec<UxTestResult>,
}

pub struct AnalyticsService {
    source: Arc<dyn DocumentSource>,
    cache: Arc<dyn CacheStore>,
}

impl AnalyticsService {
    pub fn new(source: Arc<dyn DocumentSource>, cache: Arc<dyn CacheStore>) -> Self {
        Self { source, cache }
    }

    pub async fn task_details(&self, params: &ApiParams) -> Result<EntityDetails> {
        self.entity_details(EntityKind::Task, params).await
    }

    /// Details for one entity over a window and a comparison window.
    #[tracing::instrument(skip(self, params), fields(id = params.id.as_deref().unwrap_or("")))]
    pub async fn entity_details(&self, kind: EntityKind, params: &ApiParams) -> Result<EntityDetails> {
        let request = DetailsRequest::from_params(params)?;
        let key = CacheKey::new("entityDetails")
            .part(kind)
            .part(&request.id)
            .part(&request.date_range)
            .part(&request.comparison_date_range);

        read_through(self.cache.as_ref(), &key, || self.compute_details(kind, &request))
            .await
            .inspect_err(|err| {
                if err.is_retryable() {
                    tracing::error!(key = %key, error = %err, "entity details failed");
                }
            })
    }

    async fn compute_details(&self, kind: EntityKind, request: &DetailsRequest) -> Result<EntityDetails> {
        let started = Instant::now();
        let resolved = self.resolve(kind, &request.id).await?;
        let source = self.source.as_ref();

        let comments_plan = queries::feedback_comments(&resolved.scope, request.window);
        let (date_range_data, comparison_date_range_data, search_terms, feedback_comments) = tokio::try_join!(
            window_data(source, &resolved.scope, request.window),
            window_data(source, &resolved.scope, request.comparison),
            top_search_terms(source, kind, &request.id, request.window, request.comparison),
            aggregate_as::<FeedbackComment>(source, &comments_plan),
        )?;

        let ux_tests = compare::sort_ux_tests(resolved.ux_tests);
        let details = EntityDetails {
            header: resolved.header,
            date_range: request.date_range.clone(),
            date_range_data,
            comparison_date_range: request.comparison_date_range.clone(),
            comparison_date_range_data,
            search_terms,
            feedback_comments,
            avg_task_success_from_last_test: compare::avg_success_from_last_tests(&ux_tests),
            date_from_last_test: compare::latest_test_date(&ux_tests),
            task_success_by_ux_test: ux_tests,
        };

        tracing::info!(
            kind = %kind,
            id = %request.id,
            window = %request.window,
            comparison = %request.comparison,
            urls = resolved.scope.urls.len(),
            tpc_ids = resolved.scope.tpc_ids.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "computed entity details"
        );
        Ok(details)
    }

    async fn resolve(&self, kind: EntityKind, id: &str) -> Result<ResolvedEntity> {
        let source = self.source.as_ref();
        let not_found = || AppError::NotFound {
            kind,
            id: id.to_string(),
        };

        match kind {
            EntityKind::Task => {
                let task: TaskRecord = find_by_id(source, kind.collection(), id)
                    .await?
                    .ok_or_else(not_found)?;
                let (pages, projects, ux_tests) = tokio::try_join!(
                    find_by_ids::<PageRecord>(source, Collection::Pages, &task.pages),
                    find_by_ids::<ProjectRecord>(source, Collection::Projects, &task.projects),
                    find_by_ids::<UxTestRecord>(source, Collection::UxTests, &task.ux_tests),
                )?;

                let scope = EntityScope {
                    kind,
                    id: task.id.clone(),
                    urls: page_urls(&pages),
                    tpc_ids: task.tpc_ids.clone(),
                };
                let header = EntityHeader::Task(TaskHeader {
                    id: task.id,
                    title: task.title,
                    group: task.group,
                    subgroup: task.subgroup,
                    topic: task.topic,
                    subtopic: task.subtopic,
                    sub_subtopic: task.sub_subtopic,
                    user_type: task.user_type,
                    program: task.program,
                    service: task.service,
                    user_journey: task.user_journey,
                    status: task.status,
                    channel: task.channel,
                    core: task.core,
                    projects: projects
                        .into_iter()
                        .map(|project| ProjectLink {
                            id: project.id,
                            title: project.title,
                            attachments: project
                                .attachments
                                .into_iter()
                                .map(|attachment| attachment.without_scheme())
                                .collect(),
                        })
                        .collect(),
                });

                Ok(ResolvedEntity {
                    header,
                    scope,
                    ux_tests: ux_tests.into_iter().map(ux_result).collect(),
                })
            }
            EntityKind::Project => {
                let project: ProjectRecord = find_by_id(source, kind.collection(), id)
                    .await?
                    .ok_or_else(not_found)?;
                let (tasks, ux_tests) = tokio::try_join!(
                    find_by_ids::<TaskRecord>(source, Collection::Tasks, &project.tasks),
                    find_by_ids::<UxTestRecord>(source, Collection::UxTests, &project.ux_tests),
                )?;
                let page_ids: Vec<String> = distinct(tasks.iter().flat_map(|task| task.pages.iter().cloned()));
                let pages: Vec<PageRecord> = find_by_ids(source, Collection::Pages, &page_ids).await?;

                let scope = EntityScope {
                    kind,
                    id: project.id.clone(),
                    urls: page_urls(&pages),
                    tpc_ids: distinct(tasks.iter().flat_map(|task| task.tpc_ids.iter().copied())),
                };
                let header = EntityHeader::Project(ProjectHeader {
                    id: project.id,
                    title: project.title,
                    status: project.status,
                    cops: project.cops,
                    description: project.description,
                    attachments: project
                        .attachments
                        .into_iter()
                        .map(|attachment| attachment.without_scheme())
                        .collect(),
                    tasks: task_links(tasks),
                });

                Ok(ResolvedEntity {
                    header,
                    scope,
                    ux_tests: ux_tests.into_iter().map(ux_result).collect(),
                })
            }
            EntityKind::Page => {
                let page: PageRecord = find_by_id(source, kind.collection(), id)
                    .await?
                    .ok_or_else(not_found)?;
                let tasks: Vec<TaskRecord> = find_by_ids(source, Collection::Tasks, &page.tasks).await?;

                let scope = EntityScope {
                    kind,
                    id: page.id.clone(),
                    urls: page.scope_urls(),
                    tpc_ids: distinct(tasks.iter().flat_map(|task| task.tpc_ids.iter().copied())),
                };
                let header = EntityHeader::Page(PageHeader {
                    id: page.id,
                    title: page.title,
                    url: page.url,
                    all_urls: page.all_urls,
                    tasks: task_links(tasks),
                });

                Ok(ResolvedEntity {
                    header,
                    scope,
                    ux_tests: Vec::new(),
                })
            }
        }
    }

    /// Every task with its visits and calls over the window.
    #[tracing::instrument(skip(self))]
    pub async fn tasks_home(&self, date_range: Option<&str>) -> Result<TasksHomeData> {
        let date_range = required(date_range, "dateRange")?;
        let window = DateWindow::parse(date_range)?;
        let key = CacheKey::new("tasksHome").part(date_range);

        read_through(self.cache.as_ref(), &key, || self.compute_tasks_home(date_range, window)).await
    }

    async fn compute_tasks_home(&self, date_range: &str, window: DateWindow) -> Result<TasksHomeData> {
        let source = self.source.as_ref();
        let tasks_plan = Pipeline::on(Collection::Tasks).sort(&[("title", SortOrder::Asc)]);
        let visits_plan = queries::visits_by_task(window);

        let (tasks, visit_rows) = tokio::try_join!(
            aggregate_as::<TaskRecord>(source, &tasks_plan),
            aggregate(source, &visits_plan),
        )?;

        let tpc_ids: Vec<i64> = distinct(tasks.iter().flat_map(|task| task.tpc_ids.iter().copied()));
        let call_rows = aggregate(source, &queries::calls_by_topic_id(window, &tpc_ids)).await?;

        let visits_by_task: HashMap<String, i64> = visit_rows
            .iter()
            .filter_map(|row| {
                let id = get_path(row, "_id")?.as_str()?.to_string();
                Some((id, get_path(row, "visits")?.as_i64()?))
            })
            .collect();
        let calls_by_tpc_id: HashMap<i64, i64> = call_rows
            .iter()
            .filter_map(|row| Some((get_path(row, "_id")?.as_i64()?, get_path(row, "calls")?.as_i64()?)))
            .collect();

        let rows = tasks
            .into_iter()
            .map(|task| TasksHomeRow {
                visits: visits_by_task.get(&task.id).copied().unwrap_or(0),
                calls: task
                    .tpc_ids
                    .iter()
                    .filter_map(|tpc_id| calls_by_tpc_id.get(tpc_id))
                    .sum(),
                id: task.id,
                title: task.title,
                group: task.group,
                topic: task.topic,
                subtopic: task.subtopic,
            })
            .collect();

        Ok(TasksHomeData {
            date_range: date_range.to_string(),
            date_range_data: rows,
        })
    }
}

/// Metrics, call drivers and feedback for one window, fetched concurrently.
async fn window_data(
    source: &dyn DocumentSource,
    scope: &EntityScope,
    window: DateWindow,
) -> std::result::Result<WindowData, StoreError> {
    let metrics_plan = queries::page_metrics(scope, window);
    let enquiry_plan = queries::calls_by_enquiry_line(scope, window);
    let topic_plan = queries::calls_by_topic(scope, window);
    let tags_plan = queries::feedback_by_tag(scope, window);

    let (metrics, enquiry, by_topic, by_tag) = tokio::try_join!(
        aggregate_as::<AggregatedMetrics>(source, &metrics_plan),
        aggregate_as::<CallsByEnquiryLine>(source, &enquiry_plan),
        aggregate_as::<CallsByTopic>(source, &topic_plan),
        aggregate_as::<FeedbackByTag>(source, &tags_plan),
    )?;

    Ok(merge_window(metrics.into_iter().next(), enquiry, by_topic, by_tag))
}

/// Top terms in the window with their click change against the comparison window.
async fn top_search_terms(
    source: &dyn DocumentSource,
    kind: EntityKind,
    id: &str,
    window: DateWindow,
    comparison: DateWindow,
) -> std::result::Result<Vec<SearchTermStat>, StoreError> {
    let current: Vec<SearchTermStat> = aggregate_as(source, &queries::search_terms(kind, id, window)).await?;
    let terms: Vec<String> = current.iter().map(|stat| stat.term.clone()).collect();
    let prior: Vec<SearchTermStat> =
        aggregate_as(source, &queries::prior_search_terms(kind, id, comparison, &terms)).await?;

    Ok(compare::with_clicks_change(current, &prior))
}

fn page_urls(pages: &[PageRecord]) -> Vec<String> {
    distinct(pages.iter().flat_map(PageRecord::scope_urls))
}

fn task_links(tasks: Vec<TaskRecord>) -> Vec<TaskLink> {
    tasks
        .into_iter()
        .map(|task| TaskLink {
            id: task.id,
            title: task.title,
        })
        .collect()
}

fn ux_result(test: UxTestRecord) -> UxTestResult {
    UxTestResult {
        title: test.title,
        date: test.date,
        test_type: test.test_type,
        success_rate: test.success_rate,
        total_users: test.total_users,
        scenario: test.scenario,
    }
}

/// First occurrence order, duplicates dropped.
fn distinct<T: Ord + Clone>(items: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut seen = BTreeSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}
