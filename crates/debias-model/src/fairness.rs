use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ModelError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupConfusion {
    pub count: usize,
    pub true_positive: usize,
    pub false_positive: usize,
    pub true_negative: usize,
    pub false_negative: usize,
    pub sensitivity: Option<f64>,
    pub specificity: Option<f64>,
    pub ppv: Option<f64>,
}

pub fn group_confusion_metrics(
    outcomes: &[f64],
    scores: &[f64],
    groups: &[String],
    threshold: f64,
) -> Result<BTreeMap<String, GroupConfusion>, ModelError> {
    check_len(outcomes.len(), scores.len())?;
    check_len(outcomes.len(), groups.len())?;

    let mut tallies: BTreeMap<String, [usize; 4]> = BTreeMap::new();
    for ((outcome, score), group) in outcomes.iter().zip(scores).zip(groups) {
        let actual = *outcome >= 0.5;
        let predicted = *score >= threshold;
        let tally = tallies.entry(group.clone()).or_default();
        let slot = match (predicted, actual) {
            (true, true) => 0,
            (true, false) => 1,
            (false, false) => 2,
            (false, true) => 3,
        };
        tally[slot] += 1;
    }

    Ok(tallies
        .into_iter()
        .map(|(group, [tp, fp, tn, fneg])| {
            let confusion = GroupConfusion {
                count: tp + fp + tn + fneg,
                true_positive: tp,
                false_positive: fp,
                true_negative: tn,
                false_negative: fneg,
                sensitivity: ratio(tp, tp + fneg),
                specificity: ratio(tn, tn + fp),
                ppv: ratio(tp, tp + fp),
            };
            (group, confusion)
        })
        .collect())
}

pub fn group_means(
    predictions: &[f64],
    groups: &[String],
) -> Result<BTreeMap<String, f64>, ModelError> {
    check_len(predictions.len(), groups.len())?;
    let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for (prediction, group) in predictions.iter().zip(groups) {
        let entry = sums.entry(group.clone()).or_insert((0.0, 0));
        entry.0 += prediction;
        entry.1 += 1;
    }
    Ok(sums
        .into_iter()
        .map(|(group, (sum, count))| (group, sum / count as f64))
        .collect())
}

pub fn mean_prediction_gap(
    predictions: &[f64],
    groups: &[String],
) -> Result<Option<f64>, ModelError> {
    let means = group_means(predictions, groups)?;
    if means.len() < 2 {
        return Ok(None);
    }
    let max = means.values().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = means.values().copied().fold(f64::INFINITY, f64::min);
    Ok(Some(max - min))
}

fn ratio(numerator: usize, denominator: usize) -> Option<f64> {
    (denominator > 0).then(|| numerator as f64 / denominator as f64)
}

fn check_len(expected: usize, actual: usize) -> Result<(), ModelError> {
    if expected == actual {
        Ok(())
    } else {
        Err(ModelError::LengthMismatch { expected, actual })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| (*value).to_owned()).collect()
    }

    #[test]
    fn confusion_rates_per_group() {
        let outcomes = [1.0, 0.0, 1.0, 0.0, 1.0, 0.0];
        let scores = [0.9, 0.6, 0.2, 0.1, 0.7, 0.4];
        let groups = labels(&["a", "a", "a", "a", "b", "b"]);

        let metrics = group_confusion_metrics(&outcomes, &scores, &groups, 0.5).expect("metrics");
        let a = &metrics["a"];
        assert_eq!(
            (a.true_positive, a.false_positive, a.true_negative, a.false_negative),
            (1, 1, 1, 1)
        );
        assert_eq!(a.sensitivity, Some(0.5));
        assert_eq!(a.specificity, Some(0.5));
        assert_eq!(a.ppv, Some(0.5));

        let b = &metrics["b"];
        assert_eq!(b.count, 2);
        assert_eq!(b.sensitivity, Some(1.0));
        assert_eq!(b.ppv, Some(1.0));
    }

    #[test]
    fn rates_without_denominator_are_none() {
        let metrics =
            group_confusion_metrics(&[0.0], &[0.1], &labels(&["a"]), 0.5).expect("metrics");
        assert_eq!(metrics["a"].sensitivity, None);
        assert_eq!(metrics["a"].ppv, None);
        assert_eq!(metrics["a"].specificity, Some(1.0));
    }

    #[test]
    fn gap_between_group_means() {
        let gap = mean_prediction_gap(&[0.2, 0.4, 0.9], &labels(&["a", "a", "b"]))
            .expect("gap")
            .expect("two groups");
        assert!((gap - 0.6).abs() < 1e-12);
        assert_eq!(
            mean_prediction_gap(&[0.2], &labels(&["a"])).expect("gap"),
            None
        );
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        assert!(matches!(
            group_means(&[0.1, 0.2], &labels(&["a"])),
            Err(ModelError::LengthMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }
}
