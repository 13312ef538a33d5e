use crate::models::{AggregatedMetrics, CallsByEnquiryLine, CallsByTopic, FeedbackByTag, WindowData};

/// Merge the independently aggregated results for one entity and window.
///
/// Missing sub-results become zero counts and empty lists.
pub fn merge_window(
    metrics: Option<AggregatedMetrics>,
    calldrivers_enquiry: Vec<CallsByEnquiryLine>,
    calls_by_topic: Vec<CallsByTopic>,
    feedback_by_tags: Vec<FeedbackByTag>,
) -> WindowData {
    let total_calldrivers = calldrivers_enquiry.iter().map(|line| line.calls).sum();

    WindowData {
        metrics: metrics.unwrap_or_default(),
        calldrivers_enquiry,
        calls_by_topic,
        total_calldrivers,
        feedback_by_tags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetricTotals;

    #[test]
    fn empty_inputs_become_zero_defaults() {
        let data = merge_window(None, Vec::new(), Vec::new(), Vec::new());
        assert_eq!(data, WindowData::default());
        assert_eq!(data.metrics.totals.visits, 0);
        assert!(data.metrics.visits_by_page.is_empty());
        assert_eq!(data.total_calldrivers, 0);
    }

    #[test]
    fn totals_calls_across_enquiry_lines() {
        let data = merge_window(
            Some(AggregatedMetrics {
                totals: MetricTotals {
                    visits: 15,
                    ..Default::default()
                },
                visits_by_page: Vec::new(),
            }),
            vec![
                CallsByEnquiryLine {
                    enquiry_line: Some("Benefits".into()),
                    calls: 12,
                },
                CallsByEnquiryLine {
                    enquiry_line: Some("Tax".into()),
                    calls: 30,
                },
            ],
            Vec::new(),
            vec![FeedbackByTag {
                tag: "Login".into(),
                num_comments: 2,
            }],
        );

        assert_eq!(data.total_calldrivers, 42);
        assert_eq!(data.metrics.totals.visits, 15);
        assert!(data.calls_by_topic.is_empty());
        assert_eq!(data.feedback_by_tags.len(), 1);
    }
}
