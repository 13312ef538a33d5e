//! Concrete aggregation plans used by the analytics service.

use crate::models::{EntityKind, EntityScope};
use crate::pipeline::{Accumulator, Collection, GroupKey, Pipeline, SortOrder};
use crate::window::DateWindow;

/// How many search terms the details view ranks.
pub const TOP_SEARCH_TERMS: usize = 10;

/// (output field, source field) for every summed page-metric column.
const SUMMED_COLUMNS: [(&str, &str); 9] = [
    ("visits", "visits"),
    ("dyfYes", "dyf_yes"),
    ("dyfNo", "dyf_no"),
    ("fwylfCantFindInfo", "fwylf_cant_find_info"),
    ("fwylfError", "fwylf_error"),
    ("fwylfHardToUnderstand", "fwylf_hard_to_understand"),
    ("fwylfOther", "fwylf_other"),
    ("gscTotalClicks", "gsc_total_clicks"),
    ("gscTotalImpressions", "gsc_total_impressions"),
];

const AVERAGED_COLUMNS: [(&str, &str); 2] = [
    ("gscTotalCtr", "gsc_total_ctr"),
    ("gscTotalPosition", "gsc_total_position"),
];

fn per_page_accumulators() -> Vec<(String, Accumulator)> {
    let mut accumulators = vec![("page".to_string(), Accumulator::first("page"))];
    accumulators.extend(
        SUMMED_COLUMNS
            .iter()
            .map(|(name, column)| (name.to_string(), Accumulator::sum(column))),
    );
    accumulators.extend(
        AVERAGED_COLUMNS
            .iter()
            .map(|(name, column)| (name.to_string(), Accumulator::avg(column))),
    );
    accumulators
}

/// Second pass: fold the per-page rows into one, keeping them as `visitsByPage`.
fn entity_accumulators() -> Vec<(String, Accumulator)> {
    let mut accumulators: Vec<(String, Accumulator)> = SUMMED_COLUMNS
        .iter()
        .map(|(name, _)| (name.to_string(), Accumulator::sum(name)))
        .collect();
    accumulators.extend(
        AVERAGED_COLUMNS
            .iter()
            .map(|(name, _)| (name.to_string(), Accumulator::avg(name))),
    );
    accumulators.push(("visitsByPage".to_string(), Accumulator::Push));
    accumulators
}

/// Page metrics for an entity: one row with totals and a per-page breakdown.
pub fn page_metrics(scope: &EntityScope, window: DateWindow) -> Pipeline {
    Pipeline::on(Collection::PageMetrics)
        .match_window("date", window)
        .match_in("url", scope.urls.iter().cloned())
        .sort(&[("date", SortOrder::Desc), ("url", SortOrder::Asc)])
        .group(GroupKey::Field("url".into()), per_page_accumulators())
        .lookup(Collection::Pages, "page", "_id", "page")
        .unwind("page")
        .set(&[("_id", "page._id"), ("title", "page.title"), ("url", "page.url")])
        .unset(&["page"])
        .sort(&[("title", SortOrder::Asc)])
        .group(GroupKey::All, entity_accumulators())
        .unset(&["_id"])
}

fn calldrivers(scope: &EntityScope, window: DateWindow) -> Pipeline {
    Pipeline::on(Collection::CallDrivers)
        .match_window("date", window)
        .match_in("tpc_id", scope.tpc_ids.iter().copied())
}

pub fn calls_by_enquiry_line(scope: &EntityScope, window: DateWindow) -> Pipeline {
    calldrivers(scope, window)
        .group(
            GroupKey::Field("enquiry_line".into()),
            [("calls", Accumulator::sum("calls"))],
        )
        .rename("_id", "enquiry_line")
        .sort(&[("enquiry_line", SortOrder::Asc)])
}

pub fn calls_by_topic(scope: &EntityScope, window: DateWindow) -> Pipeline {
    calldrivers(scope, window)
        .group(
            GroupKey::Field("tpc_id".into()),
            [
                ("topic", Accumulator::first("topic")),
                ("subtopic", Accumulator::first("subtopic")),
                ("sub_subtopic", Accumulator::first("sub_subtopic")),
                ("calls", Accumulator::sum("calls")),
            ],
        )
        .rename("_id", "tpc_id")
        .sort(&[("calls", SortOrder::Desc), ("tpc_id", SortOrder::Asc)])
}

fn feedback(scope: &EntityScope, window: DateWindow) -> Pipeline {
    Pipeline::on(Collection::Feedback)
        .match_window("date", window)
        .match_in("url", scope.urls.iter().cloned())
}

pub fn feedback_by_tag(scope: &EntityScope, window: DateWindow) -> Pipeline {
    feedback(scope, window)
        .unwind("tags")
        .group(GroupKey::Field("tags".into()), [("numComments", Accumulator::Count)])
        .rename("_id", "tag")
        .sort(&[("numComments", SortOrder::Desc), ("tag", SortOrder::Asc)])
}

pub fn feedback_comments(scope: &EntityScope, window: DateWindow) -> Pipeline {
    feedback(scope, window).sort(&[("date", SortOrder::Desc), ("url", SortOrder::Asc)])
}

fn search_term_rows(kind: EntityKind, id: &str, window: DateWindow) -> Pipeline {
    Pipeline::on(Collection::PageMetrics)
        .match_window("date", window)
        .match_eq(kind.metrics_field(), id)
        .unwind("aa_searchterms")
        .lowercase("aa_searchterms.term")
}

/// Top terms by clicks in the window, case-folded.
pub fn search_terms(kind: EntityKind, id: &str, window: DateWindow) -> Pipeline {
    search_term_rows(kind, id, window)
        .group(
            GroupKey::Field("aa_searchterms.term".into()),
            [
                ("clicks", Accumulator::sum("aa_searchterms.clicks")),
                ("position", Accumulator::avg("aa_searchterms.position")),
            ],
        )
        .rename("_id", "term")
        .sort(&[("clicks", SortOrder::Desc), ("term", SortOrder::Asc)])
        .limit(TOP_SEARCH_TERMS)
        .round("position", 2)
}

/// Clicks for the given terms in a comparison window.
pub fn prior_search_terms(kind: EntityKind, id: &str, window: DateWindow, terms: &[String]) -> Pipeline {
    search_term_rows(kind, id, window)
        .match_in("aa_searchterms.term", terms.iter().cloned())
        .group(
            GroupKey::Field("aa_searchterms.term".into()),
            [("clicks", Accumulator::sum("aa_searchterms.clicks"))],
        )
        .rename("_id", "term")
}

/// Visits per task id over the window.
pub fn visits_by_task(window: DateWindow) -> Pipeline {
    Pipeline::on(Collection::PageMetrics)
        .match_window("date", window)
        .unwind("tasks")
        .group(GroupKey::Field("tasks".into()), [("visits", Accumulator::sum("visits"))])
}

/// Calls per topic id over the window.
pub fn calls_by_topic_id(window: DateWindow, tpc_ids: &[i64]) -> Pipeline {
    Pipeline::on(Collection::CallDrivers)
        .match_window("date", window)
        .match_in("tpc_id", tpc_ids.iter().copied())
        .group(GroupKey::Field("tpc_id".into()), [("calls", Accumulator::sum("calls"))])
}
