use std::collections::HashMap;

use crate::models::{SearchTermStat, UxTestResult};

/// Relative click change rounded to two places, halves toward positive infinity.
///
/// `None` when there is no prior value or it is zero: "no comparable data"
/// is distinct from "no change".
pub fn clicks_change(current: i64, previous: Option<i64>) -> Option<f64> {
    match previous {
        Some(previous) if previous != 0 => {
            let ratio = (current - previous) as f64 / previous as f64;
            Some((ratio * 100.0 + 0.5).floor() / 100.0)
        }
        _ => None,
    }
}

/// Attach `clicksChange` to each current term from the prior-window clicks.
pub fn with_clicks_change(
    current: Vec<SearchTermStat>,
    prior: &[SearchTermStat],
) -> Vec<SearchTermStat> {
    let prior_clicks: HashMap<&str, i64> = prior
        .iter()
        .map(|stat| (stat.term.as_str(), stat.clicks))
        .collect();

    current
        .into_iter()
        .map(|stat| {
            let previous = prior_clicks.get(stat.term.as_str()).copied();
            SearchTermStat {
                clicks_change: clicks_change(stat.clicks, previous),
                ..stat
            }
        })
        .collect()
}

/// Percent change between two totals; `None` when the previous total is zero.
pub fn percent_change(current: f64, previous: f64) -> Option<f64> {
    if previous == 0.0 {
        return None;
    }
    Some((current - previous) / previous * 100.0)
}

/// UX tests newest first; undated tests sort last.
pub fn sort_ux_tests(mut tests: Vec<UxTestResult>) -> Vec<UxTestResult> {
    tests.sort_by(|a, b| b.date.cmp(&a.date));
    tests
}

/// Date of the most recent test.
pub fn latest_test_date(tests: &[UxTestResult]) -> Option<String> {
    tests.iter().filter_map(|test| test.date.clone()).max()
}

/// Mean success rate of the tests run on the most recent test date.
pub fn avg_success_from_last_tests(tests: &[UxTestResult]) -> Option<f64> {
    let latest = latest_test_date(tests)?;
    let rates: Vec<f64> = tests
        .iter()
        .filter(|test| test.date.as_deref() == Some(latest.as_str()))
        .filter_map(|test| test.success_rate)
        .collect();

    if rates.is_empty() {
        None
    } else {
        Some(rates.iter().sum::<f64>() / rates.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(term: &str, clicks: i64) -> SearchTermStat {
        SearchTermStat {
            term: term.into(),
            clicks,
            position: None,
            clicks_change: None,
        }
    }

    fn ux_test(date: Option<&str>, success_rate: Option<f64>) -> UxTestResult {
        UxTestResult {
            title: "Test".into(),
            date: date.map(String::from),
            test_type: None,
            success_rate,
            total_users: None,
            scenario: None,
        }
    }

    #[test]
    fn change_is_null_without_comparable_prior() {
        assert_eq!(clicks_change(10, None), None);
        assert_eq!(clicks_change(10, Some(0)), None);
    }

    #[test]
    fn change_is_rounded_ratio() {
        assert_eq!(clicks_change(15, Some(10)), Some(0.5));
        assert_eq!(clicks_change(10, Some(10)), Some(0.0));
        assert_eq!(clicks_change(1, Some(3)), Some(-0.67));
        assert_eq!(clicks_change(0, Some(4)), Some(-1.0));
    }

    #[test]
    fn negative_halves_round_up() {
        assert_eq!(clicks_change(7, Some(8)), Some(-0.12));
        assert_eq!(clicks_change(9, Some(8)), Some(0.13));
    }

    #[test]
    fn terms_missing_from_prior_window_get_null() {
        let current = vec![term("tax", 8), term("benefits", 4)];
        let prior = vec![term("tax", 4)];
        let merged = with_clicks_change(current, &prior);
        assert_eq!(merged[0].clicks_change, Some(1.0));
        assert_eq!(merged[1].clicks_change, None);
    }

    #[test]
    fn percent_change_guards_zero() {
        assert_eq!(percent_change(150.0, 100.0), Some(50.0));
        assert_eq!(percent_change(5.0, 0.0), None);
    }

    #[test]
    fn ux_tests_sort_newest_first() {
        let sorted = sort_ux_tests(vec![
            ux_test(Some("2023-01-01"), None),
            ux_test(None, None),
            ux_test(Some("2024-06-01"), None),
        ]);
        let dates: Vec<Option<String>> = sorted.into_iter().map(|test| test.date).collect();
        assert_eq!(
            dates,
            vec![Some("2024-06-01".into()), Some("2023-01-01".into()), None]
        );
    }

    #[test]
    fn averages_only_the_latest_round() {
        let tests = vec![
            ux_test(Some("2024-06-01"), Some(0.8)),
            ux_test(Some("2024-06-01"), Some(0.6)),
            ux_test(Some("2023-01-01"), Some(0.1)),
        ];
        assert_eq!(latest_test_date(&tests).as_deref(), Some("2024-06-01"));
        let avg = avg_success_from_last_tests(&tests).unwrap();
        assert!((avg - 0.7).abs() < 1e-9);
        assert_eq!(avg_success_from_last_tests(&[]), None);
    }
}
