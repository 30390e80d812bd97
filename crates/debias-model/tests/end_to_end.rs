use std::collections::BTreeSet;

use debias_core::{Attributes, Cell, ColumnKind, ColumnSpec, Dataset, Schema};
use debias_graph_algo::CausalGraph;
use debias_model::{
    DebiasSession, ModelError, PredictOptions, SamplerOptions, build, fit, mean_prediction_gap,
    predict,
};
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rand_xoshiro::Xoshiro256PlusPlus;

fn graph_from(edges: &[(&str, &str)]) -> CausalGraph {
    let mut graph = CausalGraph::new();
    for (source, target) in edges {
        graph
            .add_edge(source, target, Attributes::new())
            .expect("edge");
    }
    graph
}

fn quick_options(seed: u64) -> SamplerOptions {
    SamplerOptions {
        samples: 300,
        tune: 300,
        chains: 2,
        seed,
        ..SamplerOptions::default()
    }
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Gaussian,
    Binary,
}

/// Outcome depends on the group only through an offset on the mediator's
/// hierarchical block; the mediator itself is independent of the group.
fn simulate_group_shift(seed: u64, rows: usize, outcome: Outcome) -> Dataset {
    let score_kind = match outcome {
        Outcome::Gaussian => ColumnKind::Numeric,
        Outcome::Binary => ColumnKind::Binary,
    };
    let schema = Schema::new(vec![
        ColumnSpec::new("group", ColumnKind::Categorical),
        ColumnSpec::new("mediator", ColumnKind::Numeric),
        ColumnSpec::new("score", score_kind),
    ])
    .expect("schema");
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut data = Dataset::new(schema);
    for row in 0..rows {
        let in_second = row % 2 == 1;
        let mediator: f64 = rng.sample(StandardNormal);
        let noise: f64 = rng.sample(StandardNormal);
        let shift = if in_second { 2.0 } else { 0.0 };
        let score = match outcome {
            Outcome::Gaussian => 0.5 + mediator + shift + 0.5 * noise,
            Outcome::Binary => {
                let eta: f64 = -1.0 + mediator + shift;
                let positive = rng.random_bool(1.0 / (1.0 + (-eta).exp()));
                if positive { 1.0 } else { 0.0 }
            }
        };
        let group = if in_second { "g1" } else { "g0" };
        data.push_row(vec![group.into(), mediator.into(), score.into()])
            .expect("row");
    }
    data
}

/// One-sided binomial tail P(X >= successes) for a fair coin.
fn sign_test_p_value(successes: usize, trials: usize) -> f64 {
    let mut coefficient = 1.0_f64;
    let mut tail = 0.0;
    for k in 0..=trials {
        if k > 0 {
            coefficient *= (trials - k + 1) as f64 / k as f64;
        }
        if k >= successes {
            tail += coefficient;
        }
    }
    tail / 2.0_f64.powi(trials as i32)
}

/// Fits one model per simulated dataset and returns how many times the
/// corrected gap came out below the uncorrected one.
fn count_shrunk_gaps(outcome: Outcome, datasets: u64) -> usize {
    let mut shrunk = 0;
    for seed in 0..datasets {
        let data = simulate_group_shift(100 + seed, 150, outcome);
        let mut session = DebiasSession::new(
            graph_from(&[("group", "mediator"), ("mediator", "score")]),
            data.clone(),
        );
        let model = session.build_model("score", &["group"]).expect("build");
        assert_eq!(model.hierarchical_effects().count(), 1);
        session.fit(&quick_options(seed)).expect("fit");

        let groups = data.labels("group").expect("groups");
        let corrected = session.predict(&data, "score", true).expect("corrected");
        let uncorrected = session.predict(&data, "score", false).expect("uncorrected");
        let corrected_gap = mean_prediction_gap(&corrected, &groups)
            .expect("gap")
            .expect("two groups");
        let uncorrected_gap = mean_prediction_gap(&uncorrected, &groups)
            .expect("gap")
            .expect("two groups");
        if corrected_gap < uncorrected_gap {
            shrunk += 1;
        }
    }
    shrunk
}

#[test]
fn cancer_scenario_bias_nodes_follow_the_indirect_chain() {
    let graph = graph_from(&[
        ("ethnicity", "smoking"),
        ("smoking", "cancer"),
        ("ethnicity", "test_positive"),
        ("cancer", "test_positive"),
    ]);
    let session = DebiasSession::new(
        graph,
        Dataset::new(Schema::new(Vec::new()).expect("schema")),
    );
    let nodes = session
        .identify_bias_nodes("test_positive", &["ethnicity"])
        .expect("bias nodes");
    assert_eq!(
        nodes,
        BTreeSet::from(["cancer".to_owned(), "smoking".to_owned()])
    );
}

const SIMULATED_DATASETS: u64 = 20;
const SIGNIFICANCE: f64 = 0.05;

#[test]
fn sign_test_tail_matches_binomial_table() {
    assert!((sign_test_p_value(4, 4) - 0.0625).abs() < 1e-12);
    assert!((sign_test_p_value(15, 20) - 0.020_694).abs() < 1e-6);
    assert!(sign_test_p_value(14, 20) > SIGNIFICANCE);
}

#[test]
fn bias_correction_shrinks_gaussian_group_gap() {
    let shrunk = count_shrunk_gaps(Outcome::Gaussian, SIMULATED_DATASETS);
    let p = sign_test_p_value(shrunk, SIMULATED_DATASETS as usize);
    assert!(p < SIGNIFICANCE, "shrunk {shrunk}/{SIMULATED_DATASETS}, p = {p}");
}

#[test]
fn bias_correction_shrinks_bernoulli_group_gap() {
    let shrunk = count_shrunk_gaps(Outcome::Binary, SIMULATED_DATASETS);
    let p = sign_test_p_value(shrunk, SIMULATED_DATASETS as usize);
    assert!(p < SIGNIFICANCE, "shrunk {shrunk}/{SIMULATED_DATASETS}, p = {p}");
}

#[test]
fn derived_offsets_track_the_shifted_group() {
    let data = simulate_group_shift(7, 120, Outcome::Gaussian);
    let graph = graph_from(&[("group", "mediator"), ("mediator", "score")]);
    let bias = BTreeSet::from(["mediator".to_owned()]);
    let model = build(&graph, &data, "score", &bias, &["group"]).expect("build");
    let outcome = fit(&model, &quick_options(7)).expect("fit");

    let low = outcome
        .posterior
        .mean("offset[mediator|group][g0]")
        .expect("g0 offset");
    let high = outcome
        .posterior
        .mean("offset[mediator|group][g1]")
        .expect("g1 offset");
    assert!(high - low > 1.0, "offset gap {}", high - low);
    assert_eq!(
        outcome.diagnostics.len(),
        model.dim() + model.derived_names().len()
    );
}

#[test]
fn correction_is_a_no_op_without_bias_nodes() {
    let data = simulate_group_shift(3, 60, Outcome::Gaussian);
    let graph = graph_from(&[("mediator", "score"), ("group", "other")]);
    let bias = BTreeSet::new();
    let model = build(&graph, &data, "score", &bias, &["group"]).expect("build");
    assert_eq!(model.hierarchical_effects().count(), 0);
    let posterior = fit(&model, &quick_options(3)).expect("fit").posterior;

    let corrected = predict(
        &model,
        &posterior,
        &data,
        "score",
        &PredictOptions::corrected(&["group"]),
    )
    .expect("corrected");
    let uncorrected = predict(
        &model,
        &posterior,
        &data,
        "score",
        &PredictOptions::uncorrected(),
    )
    .expect("uncorrected");
    assert_eq!(corrected, uncorrected);
}

#[test]
fn prediction_is_idempotent() {
    let data = simulate_group_shift(5, 60, Outcome::Gaussian);
    let mut session = DebiasSession::new(
        graph_from(&[("group", "mediator"), ("mediator", "score")]),
        data.clone(),
    );
    session.build_model("score", &["group"]).expect("build");
    session.fit(&quick_options(5)).expect("fit");

    let options = PredictOptions::corrected(&["group"]);
    let first = session
        .predict_with(&data, "score", &options)
        .expect("first");
    let second = session
        .predict_with(&data, "score", &options)
        .expect("second");
    assert_eq!(first, second);
}

#[test]
fn unseen_category_fails_prediction() {
    let schema = Schema::new(vec![
        ColumnSpec::new("region", ColumnKind::Categorical),
        ColumnSpec::new("score", ColumnKind::Numeric),
    ])
    .expect("schema");
    let rows: Vec<Vec<Cell>> = [("north", 1.0), ("south", 2.0), ("north", 1.2)]
        .into_iter()
        .map(|(region, score)| vec![region.into(), score.into()])
        .collect();
    let data = Dataset::from_rows(schema.clone(), rows).expect("data");
    let graph = graph_from(&[("region", "score")]);
    let model = build(&graph, &data, "score", &BTreeSet::new(), &[] as &[&str]).expect("build");
    let options = SamplerOptions {
        samples: 20,
        tune: 20,
        chains: 1,
        ..SamplerOptions::default()
    };
    let posterior = fit(&model, &options).expect("fit").posterior;

    let new = Dataset::from_rows(schema, vec![vec!["east".into(), 0.0.into()]]).expect("new");
    let err = predict(
        &model,
        &posterior,
        &new,
        "score",
        &PredictOptions::uncorrected(),
    )
    .expect_err("unseen category");
    assert!(matches!(
        err,
        ModelError::UnseenCategory { column, value } if column == "region" && value == "east"
    ));
}
