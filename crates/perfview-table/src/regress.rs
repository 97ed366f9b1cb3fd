//! Windowed verified-delta regression detection.
//!
//! For one column of a time-sorted table, each index is scored by the delta
//! against the value `window` records back. A nonzero `radius` verifies the
//! delta: the score is clamped by the confirmed gap between the extremes of
//! the `radius` records before the back point and the `radius` records
//! after the current one, so single-sample noise cannot register as a step.
//!
//! ```text
//!              + - \
//!            /       /
//!          /
//!  - / \ /
//!
//! |r|r|r|b| | |c|r|r|r|
//!  +-+-+  +----+ +-+-+
//!  |      |      |
//!  radius |      radius
//!        window
//! ```
//!
//! With thresholds set, the scores become a detector: a point is a
//! regression iff its score exceeds `pos` or falls below `neg`. Without a
//! surviving point the column is dropped entirely (`None`). With
//! `return_segments`, regression points are replaced by their raw values
//! (plus the immediately preceding raw value) and everything else cleared,
//! yielding plot-ready highlight segments.

use crate::table::DataRow;

#[derive(Debug, Clone, Default)]
pub struct RegressionParams {
    pub selected: bool,
    /// Positive regression threshold.
    pub pos: Option<f64>,
    /// Negative regression threshold.
    pub neg: Option<f64>,
    /// Return regression segments instead of regression function values.
    pub return_segments: bool,

    /// Size of the verification span before and after the window.
    pub radius: usize,
    /// Distance in records used to calculate the delta. Must be >= 1.
    pub window: usize,
    /// Express results as a percentage of the back value.
    pub use_percent: bool,
    /// With `use_percent`, skip points whose magnitude is below this.
    pub ignore_lt: f64,
}

fn get(data: &[DataRow], row: usize, col: usize) -> Option<f64> {
    data.get(row).and_then(|r| r.get(col)).copied().flatten()
}

/// Computes the thresholded regression column over `data[..][col]`.
/// `None` means no regression was found and the column should be dropped.
pub fn verified_regression(
    data: &[DataRow],
    col: usize,
    params: &RegressionParams,
) -> Option<Vec<Option<f64>>> {
    let mut result = compute_verified_regression(data, col, params);

    let (pos, neg) = (params.pos, params.neg);
    if pos.is_none() && neg.is_none() {
        return Some(result);
    }

    let mut have_regression = false;
    for i in 0..result.len() {
        let Some(value) = result[i] else {
            continue;
        };
        let is_regression =
            pos.is_some_and(|t| value > t) || neg.is_some_and(|t| value < t);
        if is_regression {
            if params.return_segments {
                result[i] = get(data, i, col);
                if i > 0 {
                    // Include the previous point so the segment has a slope.
                    result[i - 1] = get(data, i - 1, col);
                }
            }
            have_regression = true;
        } else if params.return_segments {
            result[i] = None;
        }
    }

    if !have_regression {
        return None;
    }
    Some(result)
}

fn compute_verified_regression(
    data: &[DataRow],
    col: usize,
    params: &RegressionParams,
) -> Vec<Option<f64>> {
    let mut result: Vec<Option<f64>> = vec![None; data.len()];

    let window = params.window as i64;
    let radius = params.radius as i64;

    // The index must be high enough to hold the window and all reverse
    // points, and low enough to hold all forward points.
    let first = window + radius;
    let last = data.len() as i64 - radius - window;
    let mut n = first;
    while n <= last {
        let index = n as usize;
        n += 1;

        let n_back = index - params.window;
        let Some(back) = get(data, n_back, col) else {
            continue;
        };
        if params.use_percent && back == 0.0 {
            // Guard for division by zero.
            continue;
        }
        let Some(current) = get(data, index, col) else {
            continue;
        };
        if params.use_percent
            && (back.abs() < params.ignore_lt || current.abs() < params.ignore_lt)
        {
            continue;
        }
        let back_delta = current - back;

        let mut confirmed = None;
        if params.radius != 0 {
            confirmed = confirmed_deltas(data, col, index, n_back, params.radius);
            if confirmed.is_none() {
                continue;
            }
        }
        let (conf_delta_pos, conf_delta_neg) = confirmed.unwrap_or((0.0, 0.0));

        let abs_result;
        if params.window == 1 {
            if params.radius == 0 {
                abs_result = back_delta;
            } else if back_delta > 0.0 {
                abs_result = back_delta.min(conf_delta_pos);
            } else {
                abs_result = back_delta.max(conf_delta_neg);
            }
        } else {
            // fwd_delta cleans up artifacts when the window size is > 1.
            let Some(fwd_value) = get(data, index + params.window - 1, col) else {
                continue;
            };
            let Some(prior_value) = get(data, index - 1, col) else {
                continue;
            };
            let mut fwd_delta = fwd_value - prior_value;

            if back_delta > 0.0 {
                if fwd_delta < 0.0 {
                    fwd_delta = 0.0;
                }
                abs_result = if params.radius == 0 {
                    back_delta.min(fwd_delta)
                } else {
                    back_delta.min(fwd_delta).min(conf_delta_pos)
                };
            } else {
                if fwd_delta > 0.0 {
                    fwd_delta = 0.0;
                }
                abs_result = if params.radius == 0 {
                    back_delta.max(fwd_delta)
                } else {
                    back_delta.max(fwd_delta).max(conf_delta_neg)
                };
            }
        }

        result[index] = if params.use_percent {
            Some(abs_result / back.abs() * 100.0)
        } else {
            Some(abs_result)
        };
    }

    result
}

/// Confirmed deltas over the verification spans: the positive gap between
/// the forward minimum and backward maximum (clamped at zero from below)
/// and the negative gap between the forward maximum and backward minimum
/// (clamped at zero from above). All `2 * radius` points must be present.
fn confirmed_deltas(
    data: &[DataRow],
    col: usize,
    n: usize,
    n_back: usize,
    radius: usize,
) -> Option<(f64, f64)> {
    let mut min_back = f64::INFINITY;
    let mut max_back = f64::NEG_INFINITY;
    for i in 0..radius {
        let value = get(data, n_back - radius + i, col)?;
        min_back = min_back.min(value);
        max_back = max_back.max(value);
    }

    let mut min_fwd = f64::INFINITY;
    let mut max_fwd = f64::NEG_INFINITY;
    for i in 0..radius {
        let value = get(data, n + 1 + i, col)?;
        min_fwd = min_fwd.min(value);
        max_fwd = max_fwd.max(value);
    }

    let conf_delta_pos = (min_fwd - max_back).max(0.0);
    let conf_delta_neg = (max_fwd - min_back).min(0.0);
    Some((conf_delta_pos, conf_delta_neg))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(values: &[Option<f64>]) -> Vec<DataRow> {
        values.iter().map(|&v| vec![v]).collect()
    }

    fn vals(values: &[i64]) -> Vec<Option<f64>> {
        values.iter().map(|&v| Some(v as f64)).collect()
    }

    fn check(params: RegressionParams, input: &[Option<f64>], want: Option<&[Option<f64>]>) {
        let data = table(input);
        let got = verified_regression(&data, 0, &params);
        match (got, want) {
            (None, None) => {}
            (Some(got), Some(want)) => {
                assert_eq!(got.len(), want.len());
                for (i, (g, w)) in got.iter().zip(want.iter()).enumerate() {
                    match (g, w) {
                        (None, None) => {}
                        (Some(g), Some(w)) => {
                            assert!((g - w).abs() < 0.005, "index {i}: got {g}, want {w}")
                        }
                        _ => panic!("index {i}: got {g:?}, want {w:?}"),
                    }
                }
            }
            (got, want) => panic!("got {got:?}, want {want:?}"),
        }
    }

    const INPUT_A: &[i64] = &[1, 2, 3, 1, 2, 3, -1, -2, -3, 0];
    const INPUT_B: &[i64] = &[1, 1, 1, 1, 1, 10, 10, 10, 10, 10];

    #[test]
    fn test_straight_delta() {
        check(
            RegressionParams {
                window: 1,
                ..Default::default()
            },
            &vals(INPUT_A),
            Some(&[
                None,
                Some(1.0),
                Some(1.0),
                Some(-2.0),
                Some(1.0),
                Some(1.0),
                Some(-4.0),
                Some(-1.0),
                Some(-1.0),
                Some(3.0),
            ]),
        );
    }

    #[test]
    fn test_straight_delta_window_2() {
        check(
            RegressionParams {
                window: 2,
                ..Default::default()
            },
            &vals(INPUT_A),
            Some(&[
                None,
                None,
                Some(0.0),
                Some(-1.0),
                Some(0.0),
                Some(0.0),
                Some(-3.0),
                Some(-2.0),
                Some(0.0),
                None,
            ]),
        );
    }

    #[test]
    fn test_straight_delta_percent() {
        check(
            RegressionParams {
                window: 1,
                use_percent: true,
                ..Default::default()
            },
            &vals(INPUT_A),
            Some(&[
                None,
                Some(100.0),
                Some(50.0),
                Some(-66.67),
                Some(100.0),
                Some(50.0),
                Some(-133.33),
                Some(-100.0),
                Some(-50.0),
                Some(100.0),
            ]),
        );
    }

    #[test]
    fn test_straight_delta_window_2_percent() {
        check(
            RegressionParams {
                window: 2,
                use_percent: true,
                ..Default::default()
            },
            &vals(INPUT_A),
            Some(&[
                None,
                None,
                Some(0.0),
                Some(-50.0),
                Some(0.0),
                Some(0.0),
                Some(-150.0),
                Some(-66.67),
                Some(0.0),
                None,
            ]),
        );
    }

    #[test]
    fn test_straight_delta_with_missing_inputs() {
        let input: Vec<Option<f64>> = vec![
            None,
            Some(2.0),
            Some(3.0),
            None,
            Some(2.0),
            Some(3.0),
            Some(-1.0),
            None,
            Some(-3.0),
            Some(0.0),
        ];
        check(
            RegressionParams {
                window: 1,
                ..Default::default()
            },
            &input,
            Some(&[
                None,
                None,
                Some(1.0),
                None,
                None,
                Some(1.0),
                Some(-4.0),
                None,
                None,
                Some(3.0),
            ]),
        );
    }

    #[test]
    fn test_small_radius() {
        check(
            RegressionParams {
                window: 1,
                radius: 1,
                ..Default::default()
            },
            &vals(INPUT_B),
            Some(&[
                None,
                None,
                Some(0.0),
                Some(0.0),
                Some(0.0),
                Some(9.0),
                Some(0.0),
                Some(0.0),
                Some(0.0),
                None,
            ]),
        );
    }

    #[test]
    fn test_large_radius() {
        check(
            RegressionParams {
                window: 1,
                radius: 4,
                ..Default::default()
            },
            &vals(INPUT_B),
            Some(&[
                None,
                None,
                None,
                None,
                None,
                Some(9.0),
                None,
                None,
                None,
                None,
            ]),
        );
    }

    #[test]
    fn test_small_radius_window_2() {
        check(
            RegressionParams {
                window: 2,
                radius: 1,
                ..Default::default()
            },
            &vals(INPUT_B),
            Some(&[
                None,
                None,
                None,
                Some(0.0),
                Some(0.0),
                Some(9.0),
                Some(0.0),
                Some(0.0),
                None,
                None,
            ]),
        );
    }

    #[test]
    fn test_threshold_over_step_finds_nothing() {
        check(
            RegressionParams {
                selected: true,
                window: 1,
                radius: 1,
                pos: Some(10.0),
                ..Default::default()
            },
            &vals(INPUT_B),
            None,
        );
    }

    #[test]
    fn test_threshold_under_step_keeps_scores() {
        check(
            RegressionParams {
                selected: true,
                window: 1,
                radius: 1,
                pos: Some(1.0),
                ..Default::default()
            },
            &vals(INPUT_B),
            Some(&[
                None,
                None,
                Some(0.0),
                Some(0.0),
                Some(0.0),
                Some(9.0),
                Some(0.0),
                Some(0.0),
                Some(0.0),
                None,
            ]),
        );
    }

    #[test]
    fn test_return_segments() {
        check(
            RegressionParams {
                selected: true,
                window: 1,
                radius: 1,
                pos: Some(1.0),
                return_segments: true,
                ..Default::default()
            },
            &vals(INPUT_B),
            Some(&[
                None,
                None,
                None,
                None,
                Some(1.0),
                Some(10.0),
                None,
                None,
                None,
                None,
            ]),
        );
    }

    #[test]
    fn test_negative_threshold() {
        let input: Vec<Option<f64>> =
            vals(&[10, 10, 10, 10, 10, 1, 1, 1, 1, 1]);
        check(
            RegressionParams {
                selected: true,
                window: 1,
                radius: 1,
                neg: Some(-1.0),
                return_segments: true,
                ..Default::default()
            },
            &input,
            Some(&[
                None,
                None,
                None,
                None,
                Some(10.0),
                Some(1.0),
                None,
                None,
                None,
                None,
            ]),
        );
    }

    #[test]
    fn test_no_thresholds_returns_raw_scores() {
        let data = table(&vals(&[1, 2]));
        let got = verified_regression(
            &data,
            0,
            &RegressionParams {
                window: 1,
                ..Default::default()
            },
        );
        assert_eq!(got, Some(vec![None, Some(1.0)]));
    }

    #[test]
    fn test_short_input_yields_all_absent() {
        let data = table(&vals(&[1, 2]));
        let got = verified_regression(
            &data,
            0,
            &RegressionParams {
                window: 2,
                radius: 2,
                ..Default::default()
            },
        );
        assert_eq!(got, Some(vec![None, None]));
    }

    #[test]
    fn test_percent_skips_zero_and_small_backs() {
        let input = vals(&[0, 5, 100, 100]);
        let got = verified_regression(
            &table(&input),
            0,
            &RegressionParams {
                window: 1,
                use_percent: true,
                ignore_lt: 10.0,
                ..Default::default()
            },
        )
        .unwrap();
        // back == 0 at n=1; |back| < 10 at n=2; only n=3 scores.
        assert_eq!(got, vec![None, None, None, Some(0.0)]);
    }
}
